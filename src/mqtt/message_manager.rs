use chrono::{DateTime, Local};
use rumqttc::Publish;
use std::fmt;

use super::state_machine::ConnectionState;

/// One inbound bus message, as received by the connection worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    topic: String,
    payload: Vec<u8>,
    received_at: DateTime<Local>,
    retained: bool,
}

impl fmt::Display for TelemetryMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.received_at.format("%H:%M:%S"),
            self.render()
        )
    }
}

impl TelemetryMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retained: bool) -> Self {
        TelemetryMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
            retained,
        }
    }

    pub fn from_publish(publish: &Publish) -> Self {
        Self::new(publish.topic.clone(), publish.payload.to_vec(), publish.retain)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    pub fn is_retained(&self) -> bool {
        self.retained
    }

    /// Log line for the dashboard: `[topic] payload`, retained messages
    /// marked as such. Non UTF-8 bytes are replaced.
    pub fn render(&self) -> String {
        let prefix = if self.retained { "(retained) " } else { "" };
        format!(
            "{}[{}] {}",
            prefix,
            self.topic,
            String::from_utf8_lossy(&self.payload)
        )
    }

    /// Payload as lossy UTF-8, cut to `max_chars` characters with a trailing
    /// `...` when longer.
    pub fn payload_preview(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        match text.char_indices().nth(max_chars) {
            Some((end, _)) => format!("{}...", &text[..end]),
            None => text.into_owned(),
        }
    }
}

/// Everything the connection worker hands over to the bridge, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        state: ConnectionState,
        reason: Option<String>,
    },
    Message(TelemetryMessage),
}
