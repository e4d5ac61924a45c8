//! # MQTT Integration Module
//!
//! Everything that touches the message bus: broker settings, the payload
//! codec, the connection lifecycle and publish acknowledgement tracking.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and reconnect policy
//! ├── codec.rs            - Command encoding, telemetry decoding
//! ├── message_manager.rs  - Inbound message and worker event types
//! ├── state_machine.rs    - Connection lifecycle graph
//! ├── inflight.rs         - Publish handles and broker acknowledgements
//! └── mqtt_handler.rs     - Connection worker task and its handle
//! ```
//!
//! Only the worker in [`mqtt_handler`] owns a rumqttc client. Other components
//! reach the bus through a [`mqtt_handler::ConnectionHandle`] and receive
//! inbound traffic as [`message_manager::ConnectionEvent`]s, in the order the
//! transport delivered it.

pub mod codec;
pub mod config;
pub mod inflight;
pub mod message_manager;
pub mod mqtt_handler;
pub mod state_machine;

pub use codec::{Codec, Command, DecodeError, DecodeErrorKind, DecodedMessage};
pub use inflight::{PublishError, PublishHandle};
pub use message_manager::{ConnectionEvent, TelemetryMessage};
pub use mqtt_handler::{ConnectionHandle, ConnectionState};
