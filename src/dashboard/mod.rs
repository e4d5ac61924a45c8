//! Dashboard model: spot occupancy, warning light, display board text and the
//! bounded message log.
//!
//! Both stores are plain single-owner data. Concurrency is handled one level
//! up, in [`crate::bridge`], which owns them and is the only place they are
//! mutated.

pub mod log_store;
pub mod parking_state;

pub use log_store::{LogRecord, LogStore, DEFAULT_LOG_CAPACITY};
pub use parking_state::{
    DisplayMessage, OutOfRange, ParkingSnapshot, ParkingSpot, ParkingState, WarningLight,
    SPOT_COUNT,
};
