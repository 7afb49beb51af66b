use super::RecordParser;
use crate::config::ParserSettings;
use crate::reading::Reading;
use crate::transport::TransportEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Run a [`RecordParser`] over one transport's event mailbox.
///
/// Chunks are parsed in arrival order; `Disconnected` resets the parser. Readings go
/// to `readings` as the throttle releases them, including deferred deliveries. The
/// task ends when the mailbox closes or the reading consumer goes away.
pub fn spawn_parser(
    settings: ParserSettings,
    mut events: mpsc::Receiver<TransportEvent>,
    readings: mpsc::Sender<Reading>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut parser = RecordParser::new(settings);

        loop {
            let deadline = parser.deadline();
            let delivered = tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Data(chunk)) => parser.push_chunk(&chunk, Instant::now()),
                    Some(TransportEvent::Disconnected) => {
                        debug!("transport ended, parser reset");
                        parser.reset();
                        None
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    parser.poll_deferred(Instant::now())
                }
            };

            if let Some(reading) = delivered {
                if readings.send(reading).await.is_err() {
                    break;
                }
            }
        }

        debug!("parser task finished");
    })
}
