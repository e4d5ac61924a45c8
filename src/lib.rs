//! Operator dashboard for an MQTT-connected parking installation.
//!
//! ```text
//! broker ◀──▶ mqtt (ConnectionHandle) ──events──▶ bridge (Dispatcher) ──snapshots──▶ ui
//!                        ▲                              │
//!                        └────────── publish ───────────┘
//! ```
//!
//! [`mqtt`] owns the broker session, [`dashboard`] holds the parking model and
//! message log, [`bridge`] is the only place that model changes and [`ui`]
//! renders it.

pub mod bridge;
pub mod config;
pub mod dashboard;
pub mod mqtt;
pub mod ui;
