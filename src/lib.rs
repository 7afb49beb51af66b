//! # Telemetry Link
//!
//! Ingest for a micro:bit weather-station board streaming JSON telemetry over either a
//! BLE UART link or USB serial. The library turns an unframed text stream into
//! discrete [`Reading`](reading::Reading)s, rate-limits their delivery, and keeps a
//! short rolling history for display.
//!
//! ## Crate Structure
//!
//! - **`reading`**: The six-field `Reading` and its structural decode.
//! - **`parser`**: `RecordParser` recovers records from arbitrary chunks by brace depth,
//!   bounds its buffer, and gates delivery to one reading per throttle interval.
//!   `spawn_parser` runs one as a task over a transport's event mailbox.
//! - **`history`**: Fixed-capacity FIFO windows for temperature, light and sound.
//! - **`transport`**: The shared connection state machine (`ConnectionManager`) and the
//!   radio and wired variants behind the `Transport` trait.
//! - **`pipeline`**: Wires managers, parsers and the dashboard state together.
//! - **`config`**: Layered configuration with `figment`.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: `TransportError` and `TelemetryError`.
//!
//! ## Features
//!
//! - `serial` (default): `tokio-serial` backend for the wired link.
//! - `ble`: `btleplug` backend for the radio link.

pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod reading;
pub mod transport;

pub use error::{AppResult, TelemetryError, TransportError};
pub use pipeline::{LatestReading, LinkOverview, TelemetryPipeline};
pub use reading::Reading;
