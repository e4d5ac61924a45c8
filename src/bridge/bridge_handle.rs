//! Bridge task and its handle.
//!
//! One task owns the [`Dispatcher`] and feeds it from two mailboxes: events
//! from the connection worker and requests from front ends. Each mailbox is
//! FIFO, and every item is fully applied before the next is taken, so
//! observers only ever see complete states.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::{
    validate_command, CommandError, CommandPublisher, DashboardSnapshot, Dispatcher, StateChange,
};
use crate::mqtt::mqtt_handler::WorkerStopped;
use crate::mqtt::{Command, ConnectionEvent, ConnectionHandle, PublishHandle};

const REQUEST_CAPACITY: usize = 32;

#[derive(Debug)]
enum BridgeRequest {
    Command {
        command: Command,
        response_tx: oneshot::Sender<Result<PublishHandle, CommandError>>,
    },
    ClearLog {
        response_tx: oneshot::Sender<()>,
    },
}

/// Cloneable front-end API of the running bridge.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    requests: mpsc::Sender<BridgeRequest>,
    state: watch::Receiver<Arc<DashboardSnapshot>>,
    changes: broadcast::Sender<StateChange>,
    connection: Option<ConnectionHandle>,
    shutdown: CancellationToken,
}

pub struct Bridge;

impl Bridge {
    /// Moves `dispatcher` into its own task. The task ends when all handles
    /// are dropped or [`BridgeHandle::shutdown`] is called.
    pub fn spawn<P: CommandPublisher>(
        dispatcher: Dispatcher<P>,
        events: mpsc::Receiver<ConnectionEvent>,
    ) -> (BridgeHandle, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let shutdown = CancellationToken::new();

        let handle = BridgeHandle {
            requests: request_tx,
            state: dispatcher.watch_state(),
            changes: dispatcher.changes(),
            connection: None,
            shutdown: shutdown.clone(),
        };

        let task = tokio::spawn(run(dispatcher, events, request_rx, shutdown));
        (handle, task)
    }
}

async fn run<P: CommandPublisher>(
    mut dispatcher: Dispatcher<P>,
    mut events: mpsc::Receiver<ConnectionEvent>,
    mut requests: mpsc::Receiver<BridgeRequest>,
    shutdown: CancellationToken,
) {
    info!("Dashboard bridge started");
    let mut events_open = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            event = events.recv(), if events_open => match event {
                Some(event) => dispatcher.handle_event(event),
                None => {
                    warn!("Connection event stream closed");
                    events_open = false;
                }
            },

            request = requests.recv() => match request {
                Some(BridgeRequest::Command { command, response_tx }) => {
                    let result = dispatcher.command(command);
                    if let Err(e) = &result {
                        debug!("Command not sent: {}", e);
                    }
                    if response_tx.send(result).is_err() {
                        debug!("Command issuer went away before the reply");
                    }
                }
                Some(BridgeRequest::ClearLog { response_tx }) => {
                    dispatcher.clear_log();
                    let _ = response_tx.send(());
                }
                None => break,
            },
        }
    }

    info!("Dashboard bridge stopped");
}

impl BridgeHandle {
    /// Lets front ends start and stop the broker connection through this
    /// handle.
    pub fn with_connection(mut self, connection: ConnectionHandle) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Latest fully applied state.
    pub fn get_state(&self) -> Arc<DashboardSnapshot> {
        self.state.borrow().clone()
    }

    /// One [`StateChange`] per applied ingest, command, log clear or
    /// connection transition. A receiver that falls more than
    /// [`super::dispatcher::CHANGE_CHANNEL_CAPACITY`] behind gets
    /// `RecvError::Lagged` and should resync with [`Self::get_state`].
    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Waits until a newer state than `revision` is available.
    pub async fn wait_for_revision(&self, revision: u64) -> Result<Arc<DashboardSnapshot>, CommandError> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|snapshot| snapshot.revision > revision)
            .await
            .map_err(|_| CommandError::BridgeStopped)?;
        Ok(snapshot.clone())
    }

    /// Validates locally, then hands the command to the bridge task.
    /// Invalid commands never reach the bus.
    pub async fn issue_command(&self, command: Command) -> Result<PublishHandle, CommandError> {
        let command = validate_command(command)?;
        let (response_tx, response_rx) = oneshot::channel();

        self.requests
            .send(BridgeRequest::Command {
                command,
                response_tx,
            })
            .await
            .map_err(|_| CommandError::BridgeStopped)?;

        response_rx.await.map_err(|_| CommandError::BridgeStopped)?
    }

    pub async fn clear_log(&self) -> Result<(), CommandError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.requests
            .send(BridgeRequest::ClearLog { response_tx })
            .await
            .map_err(|_| CommandError::BridgeStopped)?;
        response_rx.await.map_err(|_| CommandError::BridgeStopped)
    }

    /// Operator-triggered connection attempt, also cuts a reconnect backoff
    /// short.
    pub async fn connect(&self) -> Result<(), CommandError> {
        let connection = self.connection.as_ref().ok_or(WorkerStopped)?;
        connection.connect().await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), CommandError> {
        let connection = self.connection.as_ref().ok_or(WorkerStopped)?;
        connection.disconnect().await?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
