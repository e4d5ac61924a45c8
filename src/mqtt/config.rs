//! Broker connection settings and the reconnect policy.

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection parameters for the parking installation's broker.
///
/// Topic names are deployment configuration: the dashboard listens on
/// `subscribe_topics`, sends operator commands to `publish_topic` and
/// registers its last will on `status_topic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Topic filters carrying inbound telemetry. Wildcards are allowed.
    pub subscribe_topics: Vec<String>,
    /// Topic the field device listens on for commands
    pub publish_topic: String,
    /// Topic the broker publishes our last will on
    pub status_topic: String,
    pub last_will_payload: String,

    /// QoS level (0, 1 or 2) for operator commands
    pub command_qos: u8,
    pub command_retain: bool,

    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Buffer size of the rumqttc request channel
    pub request_capacity: usize,

    pub reconnect: ReconnectPolicy,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.mqttdashboard.com".to_string(),
            port: 1883,
            client_id: "parking-dashboard".to_string(),
            username: None,
            password: None,
            subscribe_topics: vec!["jep453-pmi479/asn3/admin".to_string()],
            publish_topic: "jep453-pmi479/asn3/rpi".to_string(),
            status_topic: "jep453-pmi479/asn3/dashboard/status".to_string(),
            last_will_payload: "dashboard offline".to_string(),
            command_qos: 1,
            command_retain: false,
            keep_alive_secs: 5,
            connect_timeout_secs: 10,
            request_capacity: 100,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// QoS used for commands. Values above 2 are rejected by config
    /// validation, so anything else maps to `ExactlyOnce`.
    pub fn command_qos(&self) -> QoS {
        qos_from_level(self.command_qos)
    }
}

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// Bounded exponential backoff between failed connection attempts.
///
/// After `max_retries` consecutive failures the connection stays in the
/// Error state until the operator asks for a new attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` once the
    /// retry budget is spent.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Some(Duration::from_millis(delay))
    }
}
