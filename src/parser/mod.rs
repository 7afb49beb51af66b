//! Chunk-to-record parser.
//!
//! Transports hand over text in arbitrary pieces; record boundaries are recovered by
//! tracking `{`/`}` nesting depth over an append-only buffer. Each complete top-level
//! object is decoded into a [`Reading`] (or dropped), and the most recent success waits
//! in a single pending slot until the throttle gate lets it out.
//!
//! The scanner knows nothing about JSON strings, so a brace inside a string value
//! desynchronises depth tracking until the next truncation. The board never sends
//! string values, and the behaviour is kept as is.
//!
//! [`RecordParser`] is synchronous and takes the current time as an argument, which
//! keeps the throttle testable without a runtime. [`spawn_parser`] wraps it in a task
//! that owns the parser exclusively and fires deferred deliveries.

mod task;

pub use task::spawn_parser;

use crate::config::ParserSettings;
use crate::reading::Reading;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Buffer, pending slot and throttle state for one transport.
#[derive(Debug)]
pub struct RecordParser {
    settings: ParserSettings,
    buffer: String,
    pending: Option<Reading>,
    last_delivery: Option<Instant>,
    deadline: Option<Instant>,
}

impl RecordParser {
    /// Create an empty parser.
    pub fn new(settings: ParserSettings) -> Self {
        Self {
            settings,
            buffer: String::new(),
            pending: None,
            last_delivery: None,
            deadline: None,
        }
    }

    /// Append a chunk, extract complete records and apply the throttle gate.
    ///
    /// Returns the reading to deliver right now, if the gate is open and a reading is
    /// pending. When the gate is closed a deferred delivery is (re)scheduled; see
    /// [`deadline`](Self::deadline).
    pub fn push_chunk(&mut self, chunk: &str, now: Instant) -> Option<Reading> {
        self.buffer.push_str(chunk);
        self.extract();

        let interval = self.settings.throttle_interval();
        match self.last_delivery {
            Some(last) if now.saturating_duration_since(last) < interval => {
                self.deadline = last.checked_add(interval);
                None
            }
            _ => self.flush(now),
        }
    }

    /// Release the pending reading and restart the throttle window at `now`.
    ///
    /// The window restarts even when nothing was pending.
    pub fn flush(&mut self, now: Instant) -> Option<Reading> {
        self.deadline = None;
        self.last_delivery = Some(now);
        self.pending.take()
    }

    /// Flush if the deferred delivery is due.
    pub fn poll_deferred(&mut self, now: Instant) -> Option<Reading> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.flush(now),
            _ => None,
        }
    }

    /// When the scheduled deferred delivery fires, if one is scheduled.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clear buffer, pending slot and throttle state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
        self.last_delivery = None;
        self.deadline = None;
    }

    /// Unconsumed tail of the stream.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Reading waiting for the throttle gate.
    pub fn pending(&self) -> Option<&Reading> {
        self.pending.as_ref()
    }

    fn extract(&mut self) {
        while let Some((start, end)) = next_candidate(&self.buffer) {
            match Reading::decode(&self.buffer[start..=end]) {
                Ok(reading) => self.pending = Some(reading),
                Err(err) => trace!(error = %err, "discarding malformed record"),
            }
            self.buffer.drain(..=end);
        }
        self.enforce_ceiling();
    }

    fn enforce_ceiling(&mut self) {
        let len = self.buffer.chars().count();
        if len <= self.settings.buffer_ceiling {
            return;
        }
        let keep = self.settings.buffer_keep.min(self.settings.buffer_ceiling);
        let dropped = len.saturating_sub(keep);
        let cut = self
            .buffer
            .char_indices()
            .nth(dropped)
            .map_or(self.buffer.len(), |(index, _)| index);
        self.buffer.drain(..cut);
        debug!(
            dropped_chars = dropped,
            kept_chars = keep,
            "parse buffer exceeded ceiling, truncated"
        );
    }
}

/// Locate the first complete top-level `{...}` span, as inclusive byte offsets.
///
/// A `}` at depth zero has nothing to close and is skipped.
fn next_candidate(buffer: &str) -> Option<(usize, usize)> {
    let mut depth = 0usize;
    let mut start = 0usize;
    for (index, byte) in buffer.bytes().enumerate() {
        match byte {
            b'{' => {
                if depth == 0 {
                    start = index;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, index));
                }
            }
            _ => {}
        }
    }
    None
}
