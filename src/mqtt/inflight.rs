//! Publish acknowledgement bookkeeping.
//!
//! rumqttc assigns packet ids inside the event loop, so a publish request only
//! learns its pkid once `Outgoing::Publish(pkid)` comes back from `poll()`.
//! Requests are handed to the event loop in FIFO order, which lets the tracker
//! pair them up:
//!
//! ```text
//! track(waiter) ──► queued ──Outgoing::Publish(pkid)──► awaiting[pkid]
//!                                                          │
//!                                    PubAck / PubComp(pkid)▼
//!                                                     waiter resolved
//! ```

use rumqttc::{Event, Outgoing, Packet};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Connection lost before the broker acknowledged delivery")]
    ConnectionLost,

    #[error("Publish rejected by the MQTT client: {0}")]
    Client(String),

    #[error("Connection worker is not running")]
    WorkerStopped,
}

type DeliveryResult = Result<(), PublishError>;

/// Completion of one publish. Resolves once the broker acknowledged a QoS 1/2
/// message, or right away for QoS 0. Dropping the handle does not affect
/// delivery.
#[derive(Debug)]
pub struct PublishHandle {
    rx: oneshot::Receiver<DeliveryResult>,
}

impl PublishHandle {
    pub(crate) fn pending() -> (Self, oneshot::Sender<DeliveryResult>) {
        let (tx, rx) = oneshot::channel();
        (Self { rx }, tx)
    }

    /// Fire-and-forget handle that is already complete.
    pub fn completed() -> Self {
        let (handle, tx) = Self::pending();
        let _ = tx.send(Ok(()));
        handle
    }

    pub async fn delivered(self) -> DeliveryResult {
        self.rx.await.unwrap_or(Err(PublishError::WorkerStopped))
    }

    /// Non-blocking check, `None` while the acknowledgement is outstanding.
    pub fn try_result(&mut self) -> Option<DeliveryResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PublishError::WorkerStopped)),
        }
    }
}

/// `None` entries stand for QoS 0 publishes whose handle already completed.
pub(crate) type Waiter = Option<oneshot::Sender<DeliveryResult>>;

#[derive(Debug, Default)]
pub struct InflightTracker {
    queued: VecDeque<Waiter>,
    awaiting: HashMap<u16, oneshot::Sender<DeliveryResult>>,
}

impl InflightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a publish that was just handed to the rumqttc client.
    pub(crate) fn track(&mut self, waiter: Waiter) {
        self.queued.push_back(waiter);
    }

    /// Feeds one event loop notification. Returns `true` when a handle was
    /// resolved by it.
    pub fn observe(&mut self, event: &Event) -> bool {
        match event {
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                self.on_outgoing_publish(*pkid);
                false
            }
            Event::Incoming(Packet::PubAck(ack)) => self.acknowledge(ack.pkid),
            Event::Incoming(Packet::PubComp(comp)) => self.acknowledge(comp.pkid),
            _ => false,
        }
    }

    fn on_outgoing_publish(&mut self, pkid: u16) {
        match self.queued.pop_front() {
            Some(Some(waiter)) if pkid != 0 => {
                debug!("Publish pkid {} waiting for broker acknowledgement", pkid);
                self.awaiting.insert(pkid, waiter);
            }
            Some(Some(waiter)) => {
                let _ = waiter.send(Ok(()));
            }
            Some(None) => {}
            None => warn!("Outgoing publish {} without a tracked request", pkid),
        }
    }

    fn acknowledge(&mut self, pkid: u16) -> bool {
        match self.awaiting.remove(&pkid) {
            Some(waiter) => {
                debug!("Broker acknowledged publish pkid {}", pkid);
                // Receiver may be gone, the caller is free to stop waiting.
                let _ = waiter.send(Ok(()));
                true
            }
            None => {
                debug!("Acknowledgement for unknown pkid {}", pkid);
                false
            }
        }
    }

    /// Fails every outstanding handle, used when a session ends.
    pub fn fail_all(&mut self, error: PublishError) -> usize {
        let mut failed = 0;
        for waiter in self.queued.drain(..).flatten() {
            let _ = waiter.send(Err(error.clone()));
            failed += 1;
        }
        for (_, waiter) in self.awaiting.drain() {
            let _ = waiter.send(Err(error.clone()));
            failed += 1;
        }
        failed
    }

    pub fn outstanding(&self) -> usize {
        self.queued.iter().filter(|w| w.is_some()).count() + self.awaiting.len()
    }
}
