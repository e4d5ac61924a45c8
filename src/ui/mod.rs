//! Operator front ends.
//!
//! A front end only renders [`crate::bridge::DashboardSnapshot`]s and forwards
//! operator intents to a [`crate::bridge::BridgeHandle`]; it never mutates
//! dashboard state itself.

pub mod console;
