//! Connection worker and its handle.
//!
//! The worker is the only owner of the rumqttc client. It runs as its own
//! tokio task and talks to the rest of the dashboard through channels:
//!
//! ```text
//! ConnectionHandle ─[ConnectionRequest]→ MqttWorker ─[ConnectionEvent]→ Bridge
//!        ▲                                  │
//!        └──────[watch<ConnectionState>]────┘
//! ```
//!
//! Every connection attempt builds a fresh `AsyncClient`/`EventLoop` pair so
//! the last will is registered anew and subscriptions are always re-issued
//! after the broker acknowledges the session.

use std::ops::ControlFlow;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use statum::{machine, state};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::MqttConfig;
use super::inflight::{InflightTracker, PublishError, PublishHandle, Waiter};
use super::message_manager::{ConnectionEvent, TelemetryMessage};
pub use super::state_machine::{ConnectionState, ConnectionStateMachine, Trigger};

const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);
const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;

/// Why a session ended in the Error state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionFailure {
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker refused the connection: {0}")]
    Refused(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Connection worker is not running")]
pub struct WorkerStopped;

#[derive(Debug)]
pub enum ConnectionRequest {
    Connect,
    Disconnect,
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        waiter: Waiter,
    },
}

enum SessionEnd {
    Disconnected,
    Failed {
        failure: ConnectionFailure,
        was_connected: bool,
    },
    Shutdown,
}

enum BackoffEnd {
    Elapsed,
    RetryNow,
    Disconnected,
    Shutdown,
}

/// Cloneable front of the connection worker.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    requests: mpsc::Sender<ConnectionRequest>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Spawns the worker in the Disconnected state. Nothing touches the
    /// network until [`ConnectionHandle::connect`] is called.
    pub fn spawn(
        config: MqttConfig,
        events: mpsc::Sender<ConnectionEvent>,
    ) -> (Self, JoinHandle<()>) {
        info!(
            "Spawning MQTT worker for {}:{} as '{}'",
            config.host, config.port, config.client_id
        );

        let (request_tx, request_rx) = mpsc::channel(config.request_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();

        let worker = MqttWorker::create(config, request_rx, events, state_tx, shutdown.clone());
        let task = tokio::spawn(async move {
            worker.start().run().await;
        });

        let handle = Self {
            requests: request_tx,
            state: state_rx,
            shutdown,
        };
        (handle, task)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Starts a connection attempt (or an immediate retry while backing off).
    pub async fn connect(&self) -> Result<(), WorkerStopped> {
        self.requests
            .send(ConnectionRequest::Connect)
            .await
            .map_err(|_| WorkerStopped)
    }

    /// Closes the session and cancels any pending reconnect.
    pub async fn disconnect(&self) -> Result<(), WorkerStopped> {
        self.requests
            .send(ConnectionRequest::Disconnect)
            .await
            .map_err(|_| WorkerStopped)
    }

    /// Hands a message to the worker without waiting for the network.
    ///
    /// Fails with [`PublishError::NotConnected`] unless the connection is
    /// Connected; nothing is queued for later delivery.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<PublishHandle, PublishError> {
        if self.state() != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }

        let (handle, waiter) = if qos == QoS::AtMostOnce {
            (PublishHandle::completed(), None)
        } else {
            let (handle, tx) = PublishHandle::pending();
            (handle, Some(tx))
        };

        let request = ConnectionRequest::Publish {
            topic: topic.into(),
            payload,
            qos,
            retain,
            waiter,
        };

        match self.requests.try_send(request) {
            Ok(()) => Ok(handle),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(PublishError::Client("request queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PublishError::WorkerStopped),
        }
    }

    /// Stops the worker; an open session is closed cleanly first.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Configured,
    Running,
}

#[machine]
pub struct MqttWorker<S: WorkerState> {
    config: MqttConfig,
    requests: mpsc::Receiver<ConnectionRequest>,
    events: mpsc::Sender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    lifecycle: ConnectionStateMachine,
    inflight: InflightTracker,
    shutdown: CancellationToken,
}

impl MqttWorker<Configured> {
    pub fn create(
        config: MqttConfig,
        requests: mpsc::Receiver<ConnectionRequest>,
        events: mpsc::Sender<ConnectionEvent>,
        state_tx: watch::Sender<ConnectionState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self::new(
            config,
            requests,
            events,
            state_tx,
            ConnectionStateMachine::new(),
            InflightTracker::new(),
            shutdown,
        )
    }

    pub fn start(self) -> MqttWorker<Running> {
        debug!("MQTT worker configured, transitioning to Running");
        self.transition()
    }
}

impl MqttWorker<Running> {
    pub async fn run(mut self) {
        info!("MQTT worker running");

        loop {
            let request = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                request = self.requests.recv() => request,
            };

            match request {
                None => break,
                Some(ConnectionRequest::Connect) => {
                    if self.run_with_retries().await.is_break() {
                        break;
                    }
                }
                Some(ConnectionRequest::Disconnect) => {
                    self.advance(Trigger::Disconnect, None).await;
                }
                Some(ConnectionRequest::Publish { topic, waiter, .. }) => {
                    reject(&topic, waiter, PublishError::NotConnected);
                }
            }
        }

        self.inflight.fail_all(PublishError::WorkerStopped);
        info!("MQTT worker stopped");
    }

    /// Runs sessions until one ends cleanly or the retry budget is spent.
    /// `Break` means the worker has to stop.
    async fn run_with_retries(&mut self) -> ControlFlow<()> {
        let mut failures = 0u32;

        loop {
            match self.run_session().await {
                SessionEnd::Shutdown => return ControlFlow::Break(()),
                SessionEnd::Disconnected => return ControlFlow::Continue(()),
                SessionEnd::Failed {
                    failure,
                    was_connected,
                } => {
                    if was_connected {
                        failures = 0;
                    }
                    failures += 1;

                    let Some(delay) = self.config.reconnect.backoff(failures) else {
                        error!(
                            "Giving up after {} failed attempts ({}), waiting for operator retry",
                            failures, failure
                        );
                        return ControlFlow::Continue(());
                    };

                    warn!(
                        "Reconnecting in {:?} (attempt {}/{})",
                        delay, failures, self.config.reconnect.max_retries
                    );

                    match self.wait_backoff(delay).await {
                        BackoffEnd::Elapsed => {}
                        BackoffEnd::RetryNow => failures = 0,
                        BackoffEnd::Disconnected => return ControlFlow::Continue(()),
                        BackoffEnd::Shutdown => return ControlFlow::Break(()),
                    }
                }
            }
        }
    }

    async fn wait_backoff(&mut self, delay: Duration) -> BackoffEnd {
        let deadline = sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return BackoffEnd::Shutdown,
                _ = &mut deadline => return BackoffEnd::Elapsed,
                request = self.requests.recv() => match request {
                    None => return BackoffEnd::Shutdown,
                    Some(ConnectionRequest::Connect) => {
                        info!("Operator requested immediate reconnect");
                        return BackoffEnd::RetryNow;
                    }
                    Some(ConnectionRequest::Disconnect) => {
                        info!("Reconnect cancelled by disconnect");
                        self.advance(Trigger::Disconnect, None).await;
                        return BackoffEnd::Disconnected;
                    }
                    Some(ConnectionRequest::Publish { topic, waiter, .. }) => {
                        reject(&topic, waiter, PublishError::NotConnected);
                    }
                },
            }
        }
    }

    async fn run_session(&mut self) -> SessionEnd {
        self.advance(Trigger::Connect, None).await;

        info!(
            "Connecting to MQTT broker at {}:{}",
            self.config.host, self.config.port
        );
        let (client, mut eventloop) =
            AsyncClient::new(self.session_options(), self.config.request_capacity.max(1));
        let connect_timeout = self.config.connect_timeout();
        let deadline = Instant::now() + connect_timeout;
        let mut connected = false;

        let end = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    close_session(&client, &mut eventloop, connected).await;
                    break SessionEnd::Shutdown;
                }
                _ = sleep_until(deadline), if !connected => {
                    break SessionEnd::Failed {
                        failure: ConnectionFailure::Timeout(connect_timeout),
                        was_connected: false,
                    };
                }
                request = self.requests.recv() => match request {
                    None => {
                        close_session(&client, &mut eventloop, connected).await;
                        break SessionEnd::Shutdown;
                    }
                    Some(ConnectionRequest::Connect) => {
                        debug!("Connect requested while {}", self.lifecycle.state());
                    }
                    Some(ConnectionRequest::Disconnect) => {
                        close_session(&client, &mut eventloop, connected).await;
                        break SessionEnd::Disconnected;
                    }
                    Some(ConnectionRequest::Publish { topic, payload, qos, retain, waiter }) => {
                        if connected {
                            self.publish(&client, topic, payload, qos, retain, waiter);
                        } else {
                            reject(&topic, waiter, PublishError::NotConnected);
                        }
                    }
                },
                event = eventloop.poll() => match event {
                    Ok(event) => {
                        if let Err(failure) = self.handle_event(&client, event, &mut connected).await {
                            break SessionEnd::Failed { failure, was_connected: connected };
                        }
                    }
                    Err(e) => {
                        break SessionEnd::Failed {
                            failure: ConnectionFailure::Transport(e.to_string()),
                            was_connected: connected,
                        };
                    }
                },
            }
        };

        let lost = self.inflight.fail_all(PublishError::ConnectionLost);
        if lost > 0 {
            warn!("{} publishes lost their acknowledgement", lost);
        }

        match &end {
            SessionEnd::Failed { failure, .. } => {
                error!("MQTT session failed: {}", failure);
                self.advance(Trigger::Failed, Some(failure.to_string()))
                    .await;
            }
            SessionEnd::Disconnected | SessionEnd::Shutdown => {
                self.advance(Trigger::Disconnect, None).await;
            }
        }

        end
    }

    async fn handle_event(
        &mut self,
        client: &AsyncClient,
        event: Event,
        connected: &mut bool,
    ) -> Result<(), ConnectionFailure> {
        if self.inflight.observe(&event) {
            return Ok(());
        }

        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(ConnectionFailure::Refused(format!("{:?}", ack.code)));
                }
                *connected = true;
                info!(
                    "Connected to MQTT broker (session present: {})",
                    ack.session_present
                );
                self.advance(Trigger::Acknowledged, None).await;
                self.subscribe_all(client)?;
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let message = TelemetryMessage::from_publish(&publish);
                debug!("Received message on {}", message.topic());
                self.emit(ConnectionEvent::Message(message)).await;
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!("Subscription confirmed (pkid {})", ack.pkid);
            }
            Event::Incoming(Packet::Disconnect) => {
                return Err(ConnectionFailure::Transport(
                    "broker closed the session".to_string(),
                ));
            }
            other => trace!("MQTT event: {:?}", other),
        }

        Ok(())
    }

    fn subscribe_all(&self, client: &AsyncClient) -> Result<(), ConnectionFailure> {
        for filter in &self.config.subscribe_topics {
            client
                .try_subscribe(filter.clone(), SUBSCRIBE_QOS)
                .map_err(|e| ConnectionFailure::Transport(e.to_string()))?;
            info!("Subscribing to {}", filter);
        }
        Ok(())
    }

    fn publish(
        &mut self,
        client: &AsyncClient,
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        waiter: Waiter,
    ) {
        match client.try_publish(topic.clone(), qos, retain, payload) {
            Ok(()) => {
                debug!("Publishing to {} with {:?}", topic, qos);
                self.inflight.track(waiter);
            }
            Err(e) => {
                warn!("Publish to {} rejected: {}", topic, e);
                reject(&topic, waiter, PublishError::Client(e.to_string()));
            }
        }
    }

    fn session_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options
            .set_keep_alive(self.config.keep_alive())
            .set_clean_session(true)
            .set_last_will(LastWill::new(
                self.config.status_topic.clone(),
                self.config.last_will_payload.clone(),
                QoS::AtLeastOnce,
                true,
            ));

        if let (Some(user), Some(password)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        debug!("Registered last will on {}", self.config.status_topic);
        options
    }

    async fn advance(&mut self, trigger: Trigger, reason: Option<String>) {
        let previous = self.lifecycle.state();
        match self.lifecycle.apply(trigger) {
            Ok(state) if state == previous => {}
            Ok(state) => {
                info!("MQTT connection {} -> {}", previous, state);
                self.state_tx.send_replace(state);
                self.emit(ConnectionEvent::StateChanged { state, reason })
                    .await;
            }
            Err(e) => error!("{}", e),
        }
    }

    async fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Bridge is gone, dropping connection event");
        }
    }
}

/// Fails a publish request. QoS 0 requests have no waiter, so the loss is
/// only visible in the log.
fn reject(topic: &str, waiter: Waiter, error: PublishError) {
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(Err(error));
        }
        None => warn!("Dropped fire-and-forget publish to {}: {}", topic, error),
    }
}

/// Sends DISCONNECT so the broker does not fire the last will.
async fn close_session(client: &AsyncClient, eventloop: &mut EventLoop, connected: bool) {
    if !connected {
        return;
    }
    if let Err(e) = client.try_disconnect() {
        warn!("Could not request disconnect: {}", e);
        return;
    }

    let flushed = timeout(DISCONNECT_FLUSH_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if flushed.is_err() {
        warn!("Disconnect was not flushed within {:?}", DISCONNECT_FLUSH_TIMEOUT);
    } else {
        info!("Disconnected from MQTT broker");
    }
}
