//! Glue between the connection worker and the front ends.
//!
//! ```text
//! ConnectionHandle ──ConnectionEvent──▶ ┌────────────┐ ──watch──────▶ get_state
//!                                       │ Dispatcher │ ──broadcast──▶ subscribe_to_changes
//! BridgeHandle ─────BridgeRequest─────▶ └────────────┘
//!        ▲                                  │ publish
//!        └── issue_command / clear_log      ▼
//!                                     CommandPublisher
//! ```
//!
//! The dispatcher runs in a single task ([`Bridge::spawn`]) and is the only
//! writer of parking state and the message log.

pub mod bridge_handle;
pub mod dispatcher;

pub use bridge_handle::{Bridge, BridgeHandle};
pub use dispatcher::{
    validate_command, ChangeCause, CommandError, CommandPublisher, CommandRoute,
    DashboardSnapshot, Dispatcher, StateChange, ValidationError,
};
