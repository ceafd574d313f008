use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::payload::RegistrationReceipt;
use super::sink::{DeliveryError, EventSink, Heartbeat};
use crate::registration::RegistrationBatch;
use crate::tripwire::CrossingEvent;

/// A message for the server.
#[derive(Debug, Clone)]
pub enum Outbound {
    Crossing(CrossingEvent),
    Registration(RegistrationBatch),
    Heartbeat(Heartbeat),
}

impl Outbound {
    fn kind(&self) -> &'static str {
        match self {
            Outbound::Crossing(_) => "crossing",
            Outbound::Registration(_) => "registration",
            Outbound::Heartbeat(_) => "heartbeat",
        }
    }
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The queue is at capacity; the message was dropped.
    #[error("dispatch queue full, dropped {0} message")]
    Full(&'static str),
    /// The worker has stopped.
    #[error("dispatch worker stopped, dropped {0} message")]
    Closed(&'static str),
}

/// Final result of a registration submission, reported to the operator.
#[derive(Debug)]
pub struct RegistrationOutcome {
    pub session_id: u64,
    pub attempts: u32,
    pub result: Result<RegistrationReceipt, DeliveryError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
    pub retried: u64,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    /// Extra attempts after the first for a registration batch
    pub registration_retries: u32,
    /// Wait before retry `n` is `n * retry_backoff`
    pub retry_backoff: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            registration_retries: 2,
            retry_backoff: Duration::from_millis(300),
        }
    }
}

/// Handle to the dispatch worker thread.
///
/// The capture loop enqueues without blocking; one worker delivers messages in
/// FIFO order. Dropping the handle without [`Dispatcher::shutdown`] detaches
/// the worker, which still drains the queue.
pub struct Dispatcher {
    tx: Option<Sender<Outbound>>,
    outcomes: Receiver<RegistrationOutcome>,
    handle: Option<JoinHandle<DispatchStats>>,
}

impl Dispatcher {
    pub fn spawn<S: EventSink + 'static>(sink: S, config: DispatcherConfig) -> std::io::Result<Self> {
        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let (outcome_tx, outcomes) = unbounded();

        let handle = thread::Builder::new()
            .name("dispatch".to_string())
            .spawn(move || {
                let mut worker = Worker {
                    sink,
                    config,
                    outcomes: outcome_tx,
                    stats: DispatchStats::default(),
                };
                worker.run(rx)
            })?;

        Ok(Self {
            tx: Some(tx),
            outcomes,
            handle: Some(handle),
        })
    }

    /// Queue a message; never blocks. A full queue drops the new message.
    pub fn enqueue(&self, message: Outbound) -> Result<(), EnqueueError> {
        let kind = message.kind();
        let Some(tx) = &self.tx else {
            return Err(EnqueueError::Closed(kind));
        };
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full(kind),
            TrySendError::Disconnected(_) => EnqueueError::Closed(kind),
        })
    }

    /// Messages waiting for the worker.
    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Next finished registration, if any.
    pub fn try_outcome(&self) -> Option<RegistrationOutcome> {
        self.outcomes.try_recv().ok()
    }

    /// Close the queue, let the worker deliver what is left, and join it.
    pub fn shutdown(mut self) -> DispatchStats {
        self.tx.take();
        let stats = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("dispatch worker panicked");
                DispatchStats::default()
            }
            None => DispatchStats::default(),
        };
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            retried = stats.retried,
            "dispatcher stopped"
        );
        stats
    }
}

struct Worker<S> {
    sink: S,
    config: DispatcherConfig,
    outcomes: Sender<RegistrationOutcome>,
    stats: DispatchStats,
}

impl<S: EventSink> Worker<S> {
    fn run(&mut self, rx: Receiver<Outbound>) -> DispatchStats {
        debug!("dispatch worker started");
        // recv() keeps yielding buffered messages after the sender is dropped.
        while let Ok(message) = rx.recv() {
            match message {
                Outbound::Crossing(event) => self.deliver_crossing(&event),
                Outbound::Registration(batch) => self.deliver_registration(batch),
                Outbound::Heartbeat(heartbeat) => self.deliver_heartbeat(&heartbeat),
            }
        }
        self.stats
    }

    fn deliver_crossing(&mut self, event: &CrossingEvent) {
        match self.sink.send_crossing(event) {
            Ok(()) => {
                self.stats.delivered += 1;
                debug!(track_id = event.track_id, direction = %event.direction, "crossing delivered");
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(
                    track_id = event.track_id,
                    direction = %event.direction,
                    error = %e,
                    "crossing event dropped"
                );
            }
        }
    }

    fn deliver_heartbeat(&mut self, heartbeat: &Heartbeat) {
        match self.sink.send_heartbeat(heartbeat) {
            Ok(()) => self.stats.delivered += 1,
            Err(e) => {
                self.stats.failed += 1;
                debug!(error = %e, "heartbeat failed");
            }
        }
    }

    fn deliver_registration(&mut self, batch: RegistrationBatch) {
        let member_id = batch.member_id.as_deref().unwrap_or("<unlabeled>");
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            match self.sink.send_registration(&batch) {
                Ok(receipt) => break Ok(receipt),
                Err(e) if e.is_retryable() && attempts <= self.config.registration_retries => {
                    self.stats.retried += 1;
                    warn!(
                        session_id = batch.session_id,
                        member_id,
                        attempt = attempts,
                        error = %e,
                        "registration failed, retrying"
                    );
                    thread::sleep(self.config.retry_backoff * attempts);
                }
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(receipt) => {
                self.stats.delivered += 1;
                info!(
                    session_id = batch.session_id,
                    member_id = receipt.member_id.as_deref().unwrap_or(member_id),
                    attempts,
                    "registration submitted"
                );
            }
            Err(e) => {
                self.stats.failed += 1;
                error!(session_id = batch.session_id, member_id, attempts, error = %e, "registration failed");
            }
        }

        // The loop may already be gone during shutdown.
        let _ = self.outcomes.send(RegistrationOutcome {
            session_id: batch.session_id,
            attempts,
            result,
        });
    }
}
