use crate::utils::{SecretRef, StopSignal, metric_name};
use k8s_openapi::api::core::v1::Secret;
use log::warn;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Meter},
};
use rustrial_k8s_credential_janitor_apis::RequestKind;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

const DISPATCHER: &'static str = "dispatcher";

/// Default capacity of the per kind work queue.
pub(crate) const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Create the bounded work queue of one request kind.
pub(crate) fn work_queue(kind: RequestKind, capacity: usize) -> (Dispatcher, WorkQueue) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let meter: Meter = global::meter(DISPATCHER);
    let dropped = meter
        .u64_counter(metric_name("dispatch_dropped"))
        .with_description("Count of request notifications dropped because the work queue was full")
        .build();
    (
        Dispatcher {
            kind,
            sender,
            dropped,
        },
        WorkQueue { kind, receiver },
    )
}

/// Non-blocking producer side of a [`WorkQueue`].
///
/// Notifications arriving while the queue is full are dropped with a warning; the next
/// resync delivers the object again as long as it is not processed.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    kind: RequestKind,
    sender: mpsc::Sender<Arc<Secret>>,
    dropped: Counter<u64>,
}

impl Dispatcher {
    /// Returns `true` if the object was enqueued.
    pub fn dispatch(&self, secret: Arc<Secret>) -> bool {
        match self.sender.try_send(secret) {
            Ok(()) => true,
            Err(TrySendError::Full(secret)) => {
                warn!(
                    "{} work queue is full, dropping event for {}",
                    self.kind,
                    SecretRef::from(secret.as_ref())
                );
                self.dropped
                    .add(1, &[KeyValue::new("kind", self.kind.as_str())]);
                false
            }
            Err(TrySendError::Closed(secret)) => {
                warn!(
                    "{} work queue is closed, dropping event for {}",
                    self.kind,
                    SecretRef::from(secret.as_ref())
                );
                false
            }
        }
    }
}

/// Single-consumer side of the work queue of one request kind.
pub(crate) struct WorkQueue {
    kind: RequestKind,
    receiver: mpsc::Receiver<Arc<Secret>>,
}

impl WorkQueue {
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Wait for the next object, `None` once `stop` fired or all dispatchers are gone.
    pub async fn next(&mut self, stop: &mut StopSignal) -> Option<Arc<Secret>> {
        if stop.is_stopped() {
            return None;
        }
        tokio::select! {
            _ = stop.stopped() => None,
            secret = self.receiver.recv() => secret,
        }
    }
}
