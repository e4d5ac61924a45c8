//! The single mutation path of the dashboard.
//!
//! [`Dispatcher`] owns the parking model and the log. It is driven by exactly
//! one task (see [`super::bridge_handle`]), so connection events and operator
//! commands are applied one at a time and in arrival order. After each applied
//! change it publishes a complete [`DashboardSnapshot`]; observers never see a
//! half-applied update.
//!
//! Command policy: a command is applied to local state as soon as the
//! connection worker accepted the publish. Telemetry arriving later always
//! wins, so a device that disagrees simply overwrites the optimistic value.
//! A failed publish leaves the state untouched. A QoS 0 command accepted in
//! the instant the session drops is lost without a report; the optimistic
//! value then stands until the next telemetry. The worker logs the drop.

use std::sync::Arc;

use rumqttc::QoS;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::dashboard::{
    DisplayMessage, LogRecord, LogStore, OutOfRange, ParkingSpot, ParkingState, WarningLight,
    SPOT_COUNT,
};
use crate::mqtt::codec::EncodeError;
use crate::mqtt::config::MqttConfig;
use crate::mqtt::mqtt_handler::WorkerStopped;
use crate::mqtt::{
    Codec, Command, ConnectionEvent, ConnectionHandle, ConnectionState, DecodeErrorKind,
    DecodedMessage, PublishError, PublishHandle, TelemetryMessage,
};

/// Buffered notifications per observer before it starts lagging.
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;
/// Characters of an undecodable payload kept in its diagnostic record.
pub const PAYLOAD_PREVIEW_CHARS: usize = 120;

/// Log records oldest first. Snapshots share both the slice and the records.
pub type LogView = Arc<[Arc<LogRecord>]>;

/// Seam between the dispatcher and the bus.
pub trait CommandPublisher: Send + 'static {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishHandle, PublishError>;
}

impl CommandPublisher for ConnectionHandle {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishHandle, PublishError> {
        ConnectionHandle::publish(self, topic, payload, qos, retain)
    }
}

/// Where operator commands go on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRoute {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
}

impl CommandRoute {
    pub fn from_config(config: &MqttConfig) -> Self {
        Self {
            topic: config.publish_topic.clone(),
            qos: config.command_qos(),
            retain: config.command_retain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(transparent)]
    SpotOutOfRange(#[from] OutOfRange),

    #[error("Display message is empty")]
    EmptyMessage,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid command: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not connected to the broker")]
    NotConnected,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("Publish failed: {0}")]
    Publish(PublishError),

    #[error("Dashboard bridge is not running")]
    BridgeStopped,

    #[error(transparent)]
    Connection(#[from] WorkerStopped),
}

impl From<PublishError> for CommandError {
    fn from(error: PublishError) -> Self {
        match error {
            PublishError::NotConnected => CommandError::NotConnected,
            other => CommandError::Publish(other),
        }
    }
}

/// Checks field constraints and normalizes the command (message text is
/// trimmed). Runs before anything touches the network.
pub fn validate_command(command: Command) -> Result<Command, ValidationError> {
    match command {
        Command::ToggleSpot(index) if index >= SPOT_COUNT => Err(OutOfRange { index }.into()),
        Command::SetDisplayMessage(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Err(ValidationError::EmptyMessage)
            } else {
                Ok(Command::SetDisplayMessage(trimmed.to_string()))
            }
        }
        other => Ok(other),
    }
}

/// What the UI renders. Always a fully applied state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSnapshot {
    pub revision: u64,
    pub connection_status: ConnectionState,
    pub connection_error: Option<String>,
    pub device_status: Option<String>,
    pub spots: [ParkingSpot; SPOT_COUNT],
    pub available_spots: usize,
    pub warning_light: WarningLight,
    pub display_message: DisplayMessage,
    pub logs: LogView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeCause {
    Telemetry { retained: bool },
    DecodeFailure(DecodeErrorKind),
    Command(&'static str),
    LogCleared,
    Connection(ConnectionState),
}

/// One observer notification, carrying the state it announces.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub revision: u64,
    pub cause: ChangeCause,
    pub snapshot: Arc<DashboardSnapshot>,
}

pub struct Dispatcher<P> {
    parking: ParkingState,
    log: LogStore,
    codec: Codec,
    publisher: P,
    route: CommandRoute,
    connection_status: ConnectionState,
    connection_error: Option<String>,
    device_status: Option<String>,
    logs: LogView,
    revision: u64,
    state_tx: watch::Sender<Arc<DashboardSnapshot>>,
    changes_tx: broadcast::Sender<StateChange>,
}

impl<P: CommandPublisher> Dispatcher<P> {
    pub fn new(
        parking: ParkingState,
        log: LogStore,
        codec: Codec,
        publisher: P,
        route: CommandRoute,
    ) -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let initial = parking.snapshot();
        let logs: LogView = log.snapshot().into();
        let (state_tx, _) = watch::channel(Arc::new(DashboardSnapshot {
            revision: 0,
            connection_status: ConnectionState::Disconnected,
            connection_error: None,
            device_status: None,
            spots: initial.spots,
            available_spots: initial.available_spots(),
            warning_light: initial.warning_light,
            display_message: initial.display_message,
            logs: logs.clone(),
        }));

        Self {
            parking,
            log,
            codec,
            publisher,
            route,
            connection_status: ConnectionState::Disconnected,
            connection_error: None,
            device_status: None,
            logs,
            revision: 0,
            state_tx,
            changes_tx,
        }
    }

    pub fn watch_state(&self) -> watch::Receiver<Arc<DashboardSnapshot>> {
        self.state_tx.subscribe()
    }

    pub fn changes(&self) -> broadcast::Sender<StateChange> {
        self.changes_tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes_tx.subscribe()
    }

    pub fn state(&self) -> Arc<DashboardSnapshot> {
        self.state_tx.borrow().clone()
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged { state, reason } => self.connection_changed(state, reason),
            ConnectionEvent::Message(message) => self.ingest(message),
        }
    }

    /// Applies one inbound message and notifies observers exactly once.
    /// Undecodable messages only leave a diagnostic log line.
    pub fn ingest(&mut self, message: TelemetryMessage) {
        match self.codec.decode_telemetry(&message) {
            Ok(decoded) => {
                self.append_log(&message, message.render());
                self.apply_telemetry(decoded, message.is_retained());
                self.notify(ChangeCause::Telemetry {
                    retained: message.is_retained(),
                });
            }
            Err(e) => {
                warn!("Dropping message on {}: {}", message.topic(), e);
                let text = format!(
                    "decode error ({}) on {}: {} | payload: {}",
                    e.kind,
                    message.topic(),
                    e.detail,
                    message.payload_preview(PAYLOAD_PREVIEW_CHARS)
                );
                self.append_log(&message, text);
                self.notify(ChangeCause::DecodeFailure(e.kind));
            }
        }
    }

    fn append_log(&mut self, message: &TelemetryMessage, text: String) {
        self.log.append(message.received_at(), text);
        self.logs = self.log.snapshot().into();
    }

    fn apply_telemetry(&mut self, decoded: DecodedMessage, retained: bool) {
        match decoded {
            DecodedMessage::SpotOccupancy { spot, occupied } => {
                if let Err(e) = self.parking.set_spot(spot, occupied) {
                    warn!("Ignoring occupancy update: {}", e);
                }
            }
            DecodedMessage::SpotSnapshot(spots) => {
                self.parking.set_all_spots(spots);
            }
            DecodedMessage::Warning(on) => {
                self.parking.set_warning(on);
            }
            DecodedMessage::DisplayEcho(text) => {
                self.parking.set_display_message(text);
            }
            DecodedMessage::Status(status) if retained => {
                debug!("Ignoring retained device status '{}'", status);
            }
            DecodedMessage::Status(status) => {
                self.device_status = Some(status);
            }
        }
    }

    /// Publishes an operator command and, once the worker accepted it,
    /// applies it locally.
    pub fn command(&mut self, command: Command) -> Result<PublishHandle, CommandError> {
        let command = validate_command(command)?;

        if self.connection_status != ConnectionState::Connected {
            info!(
                "Rejecting {} command while {}",
                command.kind(),
                self.connection_status
            );
            return Err(CommandError::NotConnected);
        }

        let payload = self.codec.encode_command(&command)?;
        let handle = self
            .publisher
            .publish(&self.route.topic, payload, self.route.qos, self.route.retain)?;

        match &command {
            Command::ToggleSpot(index) => {
                if let Err(e) = self.parking.toggle_spot(*index) {
                    warn!("Toggle not applied locally: {}", e);
                }
            }
            Command::SetWarning(on) => {
                self.parking.set_warning(*on);
            }
            Command::SetDisplayMessage(text) => {
                self.parking.set_display_message(text.as_str());
            }
        }

        info!("Sent {} command to {}", command.kind(), self.route.topic);
        self.notify(ChangeCause::Command(command.kind()));
        Ok(handle)
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.logs = self.log.snapshot().into();
        self.notify(ChangeCause::LogCleared);
    }

    pub fn connection_changed(&mut self, state: ConnectionState, reason: Option<String>) {
        self.connection_status = state;
        match state {
            ConnectionState::Error => self.connection_error = reason,
            ConnectionState::Connected => self.connection_error = None,
            _ => {}
        }
        self.notify(ChangeCause::Connection(state));
    }

    fn notify(&mut self, cause: ChangeCause) {
        self.revision += 1;
        let parking = self.parking.snapshot();
        let snapshot = Arc::new(DashboardSnapshot {
            revision: self.revision,
            connection_status: self.connection_status,
            connection_error: self.connection_error.clone(),
            device_status: self.device_status.clone(),
            spots: parking.spots,
            available_spots: parking.available_spots(),
            warning_light: parking.warning_light,
            display_message: parking.display_message,
            logs: self.logs.clone(),
        });

        self.state_tx.send_replace(snapshot.clone());
        // No receivers is fine, the watch channel still holds the state.
        let _ = self.changes_tx.send(StateChange {
            revision: self.revision,
            cause,
            snapshot,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::DEFAULT_LOG_CAPACITY;
    use std::sync::Mutex;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::sync::oneshot;

    const ADMIN: &str = "lot/admin";

    #[derive(Debug, Clone, PartialEq)]
    struct Published {
        topic: String,
        payload: String,
        qos: QoS,
        retain: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        published: Arc<Mutex<Vec<Published>>>,
        failure: Option<PublishError>,
        acks: Arc<Mutex<Vec<oneshot::Sender<Result<(), PublishError>>>>>,
    }

    impl RecordingPublisher {
        fn count(&self) -> usize {
            self.published.lock().unwrap().len()
        }
    }

    impl CommandPublisher for RecordingPublisher {
        fn publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            qos: QoS,
            retain: bool,
        ) -> Result<PublishHandle, PublishError> {
            self.published.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload: String::from_utf8(payload).unwrap(),
                qos,
                retain,
            });
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            let (handle, tx) = PublishHandle::pending();
            self.acks.lock().unwrap().push(tx);
            Ok(handle)
        }
    }

    fn dispatcher_with(
        publisher: RecordingPublisher,
        capacity: usize,
    ) -> Dispatcher<RecordingPublisher> {
        Dispatcher::new(
            ParkingState::new(),
            LogStore::new(capacity),
            Codec::new(vec![ADMIN.to_string()]),
            publisher,
            CommandRoute {
                topic: "lot/rpi".to_string(),
                qos: QoS::AtLeastOnce,
                retain: false,
            },
        )
    }

    fn connected(publisher: RecordingPublisher) -> Dispatcher<RecordingPublisher> {
        let mut dispatcher = dispatcher_with(publisher, DEFAULT_LOG_CAPACITY);
        dispatcher.connection_changed(ConnectionState::Connecting, None);
        dispatcher.connection_changed(ConnectionState::Connected, None);
        dispatcher
    }

    fn telemetry(payload: &str) -> TelemetryMessage {
        TelemetryMessage::new(ADMIN, payload, false)
    }

    fn drain(rx: &mut broadcast::Receiver<StateChange>) -> Vec<StateChange> {
        let mut changes = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(change) => changes.push(change),
                Err(TryRecvError::Empty) => return changes,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
    }

    #[test]
    fn occupancy_telemetry_updates_spot_with_one_notification() {
        let mut dispatcher = connected(RecordingPublisher::default());
        let mut rx = dispatcher.subscribe();

        dispatcher.ingest(telemetry(r#"{"type":"occupancy","spot":2,"occupied":true}"#));

        let changes = drain(&mut rx);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].cause, ChangeCause::Telemetry { retained: false });

        let state = dispatcher.state();
        assert!(state.spots[2].occupied);
        assert_eq!(state.available_spots, SPOT_COUNT - 1);
        assert_eq!(state.logs.len(), 1);
        assert!(state.logs[0].text.starts_with("[lot/admin]"));
        assert_eq!(changes[0].snapshot, state);
    }

    #[test]
    fn commands_while_not_connected_never_publish() {
        let publisher = RecordingPublisher::default();
        let mut dispatcher = dispatcher_with(publisher.clone(), DEFAULT_LOG_CAPACITY);

        let states = [
            (ConnectionState::Disconnected, None),
            (ConnectionState::Connecting, None),
            (ConnectionState::Error, Some("refused".to_string())),
        ];
        for (state, reason) in states {
            dispatcher.connection_changed(state, reason);
            let before = dispatcher.state();

            for command in [
                Command::ToggleSpot(1),
                Command::SetWarning(true),
                Command::SetDisplayMessage("hello".into()),
            ] {
                let err = dispatcher.command(command).unwrap_err();
                assert!(matches!(err, CommandError::NotConnected), "{err}");
            }
            assert_eq!(dispatcher.state(), before);
        }
        assert_eq!(publisher.count(), 0);
    }

    #[test]
    fn malformed_payload_leaves_one_diagnostic_record() {
        let mut dispatcher = connected(RecordingPublisher::default());
        dispatcher.ingest(telemetry(r#"{"type":"occupancy","spot":1,"occupied":true}"#));
        let before = dispatcher.state();
        let mut rx = dispatcher.subscribe();

        dispatcher.ingest(telemetry("{{{ definitely not json"));

        let changes = drain(&mut rx);
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes[0].cause,
            ChangeCause::DecodeFailure(DecodeErrorKind::MalformedPayload)
        );

        let after = dispatcher.state();
        assert_eq!(after.logs.len(), before.logs.len() + 1);
        let record = &after.logs.last().unwrap().text;
        assert!(record.starts_with("decode error (malformed payload) on lot/admin: "));
        assert!(record.ends_with(" | payload: {{{ definitely not json"));
        assert_eq!(after.spots, before.spots);
        assert_eq!(after.warning_light, before.warning_light);
        assert_eq!(after.display_message, before.display_message);
    }

    #[test]
    fn diagnostic_record_truncates_binary_payload() {
        let mut dispatcher = connected(RecordingPublisher::default());
        let mut payload = vec![0xff, 0xfe];
        payload.extend(std::iter::repeat(b'x').take(500));

        dispatcher.ingest(TelemetryMessage::new(ADMIN, payload, false));

        let state = dispatcher.state();
        let text = &state.logs[0].text;
        assert!(text.starts_with("decode error (encoding error) on lot/admin: "));
        let preview = text.split(" | payload: ").nth(1).unwrap();
        assert!(preview.starts_with("\u{fffd}\u{fffd}xxx"));
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), PAYLOAD_PREVIEW_CHARS + 3);
    }

    #[test]
    fn snapshots_share_log_records() {
        let mut dispatcher = connected(RecordingPublisher::default());
        dispatcher.ingest(telemetry(r#"{"type":"status","status":"a"}"#));
        let first = dispatcher.state();

        dispatcher.connection_changed(ConnectionState::Error, Some("lost".into()));
        let second = dispatcher.state();
        assert!(Arc::ptr_eq(&first.logs, &second.logs));

        dispatcher.ingest(telemetry(r#"{"type":"status","status":"b"}"#));
        let third = dispatcher.state();
        assert!(!Arc::ptr_eq(&second.logs, &third.logs));
        assert!(Arc::ptr_eq(&second.logs[0], &third.logs[0]));
        assert_eq!(third.logs.len(), 2);
    }

    #[test]
    fn unknown_topic_is_logged_not_applied() {
        let mut dispatcher = connected(RecordingPublisher::default());
        dispatcher.ingest(TelemetryMessage::new(
            "somewhere/else",
            r#"{"type":"warning","state":"on"}"#,
            false,
        ));

        let state = dispatcher.state();
        assert!(!state.warning_light.on);
        assert!(state.logs[0].text.contains("unknown topic"));
    }

    #[test]
    fn log_keeps_most_recent_records_in_delivery_order() {
        let mut dispatcher = dispatcher_with(RecordingPublisher::default(), 500);
        for n in 0..600 {
            dispatcher.ingest(telemetry(&format!(
                r#"{{"type":"status","status":"ping {}"}}"#,
                n
            )));
        }

        let logs = &dispatcher.state().logs;
        assert_eq!(logs.len(), 500);
        assert_eq!(logs[0].sequence, 101);
        assert!(logs[0].text.ends_with(r#""ping 100"}"#));
        assert!(logs.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn command_publishes_then_applies_optimistically() {
        let publisher = RecordingPublisher::default();
        let mut dispatcher = connected(publisher.clone());
        let mut rx = dispatcher.subscribe();

        dispatcher.command(Command::SetWarning(true)).unwrap();
        dispatcher
            .command(Command::SetDisplayMessage("  Lot full  ".into()))
            .unwrap();

        let published = publisher.published.lock().unwrap().clone();
        assert_eq!(
            published,
            vec![
                Published {
                    topic: "lot/rpi".into(),
                    payload: r#"{"command":"warning","state":"on"}"#.into(),
                    qos: QoS::AtLeastOnce,
                    retain: false,
                },
                Published {
                    topic: "lot/rpi".into(),
                    payload: r#"{"command":"display_to_console","message":"Lot full"}"#.into(),
                    qos: QoS::AtLeastOnce,
                    retain: false,
                },
            ]
        );

        assert_eq!(drain(&mut rx).len(), 2);
        let state = dispatcher.state();
        assert!(state.warning_light.on);
        assert_eq!(state.display_message.text, "Lot full");

        // device disagrees: telemetry wins
        dispatcher.ingest(telemetry(r#"{"type":"warning","state":"off"}"#));
        assert!(!dispatcher.state().warning_light.on);
    }

    #[tokio::test]
    async fn command_handle_resolves_on_broker_ack() {
        let publisher = RecordingPublisher::default();
        let mut dispatcher = connected(publisher.clone());

        let handle = dispatcher.command(Command::ToggleSpot(0)).unwrap();
        assert!(dispatcher.state().spots[0].occupied);

        let ack = publisher.acks.lock().unwrap().pop().unwrap();
        ack.send(Ok(())).unwrap();
        assert_eq!(handle.delivered().await, Ok(()));
    }

    #[test]
    fn toggle_command_twice_restores_spot() {
        let mut dispatcher = connected(RecordingPublisher::default());
        let before = dispatcher.state().spots;

        dispatcher.command(Command::ToggleSpot(4)).unwrap();
        dispatcher.command(Command::ToggleSpot(4)).unwrap();
        assert_eq!(dispatcher.state().spots, before);
    }

    #[test]
    fn publish_failure_is_propagated_without_mutation() {
        let publisher = RecordingPublisher {
            failure: Some(PublishError::Client("request queue full".into())),
            ..RecordingPublisher::default()
        };
        let mut dispatcher = connected(publisher);
        let before = dispatcher.state();
        let mut rx = dispatcher.subscribe();

        let err = dispatcher.command(Command::SetWarning(true)).unwrap_err();
        assert!(matches!(err, CommandError::Publish(PublishError::Client(_))));
        assert_eq!(dispatcher.state(), before);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn invalid_commands_are_rejected_before_publishing() {
        let publisher = RecordingPublisher::default();
        let mut dispatcher = connected(publisher.clone());

        let err = dispatcher.command(Command::ToggleSpot(SPOT_COUNT)).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Validation(ValidationError::SpotOutOfRange(OutOfRange { index: 5 }))
        ));

        let err = dispatcher
            .command(Command::SetDisplayMessage(" \t ".into()))
            .unwrap_err();
        assert!(matches!(err, CommandError::Validation(ValidationError::EmptyMessage)));
        assert_eq!(publisher.count(), 0);
    }

    #[test]
    fn retained_messages_restore_state_but_not_device_status() {
        let mut dispatcher = connected(RecordingPublisher::default());

        dispatcher.ingest(TelemetryMessage::new(
            ADMIN,
            r#"{"type":"spots","occupied":[true,true,false,false,false]}"#,
            true,
        ));
        dispatcher.ingest(TelemetryMessage::new(
            ADMIN,
            r#"{"type":"status","status":"offline"}"#,
            true,
        ));

        let state = dispatcher.state();
        assert_eq!(state.available_spots, 3);
        assert_eq!(state.device_status, None);
        assert!(state.logs.iter().all(|r| r.text.starts_with("(retained) ")));

        dispatcher.ingest(telemetry(r#"{"type":"status","status":"online"}"#));
        assert_eq!(dispatcher.state().device_status.as_deref(), Some("online"));
    }

    #[test]
    fn clearing_the_log_keeps_numbering() {
        let mut dispatcher = connected(RecordingPublisher::default());
        dispatcher.ingest(telemetry(r#"{"type":"status","status":"a"}"#));
        dispatcher.ingest(telemetry(r#"{"type":"status","status":"b"}"#));

        dispatcher.clear_log();
        assert!(dispatcher.state().logs.is_empty());

        dispatcher.ingest(telemetry(r#"{"type":"status","status":"c"}"#));
        assert_eq!(dispatcher.state().logs[0].sequence, 3);
    }

    #[test]
    fn connection_errors_are_reported_until_reconnected() {
        let mut dispatcher = dispatcher_with(RecordingPublisher::default(), 10);
        let mut rx = dispatcher.subscribe();

        dispatcher.connection_changed(ConnectionState::Connecting, None);
        dispatcher.connection_changed(ConnectionState::Error, Some("timed out".into()));
        assert_eq!(dispatcher.state().connection_error.as_deref(), Some("timed out"));

        dispatcher.connection_changed(ConnectionState::Connecting, None);
        assert_eq!(dispatcher.state().connection_error.as_deref(), Some("timed out"));
        dispatcher.connection_changed(ConnectionState::Connected, None);
        assert_eq!(dispatcher.state().connection_error, None);

        let revisions: Vec<u64> = drain(&mut rx).iter().map(|c| c.revision).collect();
        assert_eq!(revisions, vec![1, 2, 3, 4]);
    }
}
