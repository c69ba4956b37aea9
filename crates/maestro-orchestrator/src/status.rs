use crate::types::Execution;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Push side of execution status.
///
/// Every change to any execution publishes a full snapshot. Delivery is
/// best-effort: a subscriber that falls behind skips the snapshots it
/// missed and continues with newer ones, so the store stays the source of
/// truth.
#[derive(Clone)]
pub struct StatusChannel {
    tx: broadcast::Sender<Arc<Execution>>,
}

impl StatusChannel {
    /// A channel buffering up to `capacity` snapshots per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a snapshot. Having no subscribers is fine.
    pub fn publish(&self, snapshot: Execution) {
        let _ = self.tx.send(Arc::new(snapshot));
    }

    /// Subscribe to every execution, or only to `execution_id`.
    pub fn subscribe(&self, execution_id: Option<Uuid>) -> StatusSubscription {
        StatusSubscription {
            rx: self.tx.subscribe(),
            execution_id,
        }
    }

    /// Current number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One item from a [`StatusSubscription`].
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// A snapshot taken right after a change.
    Snapshot(Arc<Execution>),
    /// The subscriber fell behind and `skipped` snapshots were dropped,
    /// possibly including a terminal one. Re-read the store.
    Lagged(u64),
}

impl StatusEvent {
    /// The snapshot, if this is one.
    pub fn snapshot(self) -> Option<Arc<Execution>> {
        match self {
            StatusEvent::Snapshot(snapshot) => Some(snapshot),
            StatusEvent::Lagged(_) => None,
        }
    }
}

/// Receiving end returned by [`StatusChannel::subscribe`].
pub struct StatusSubscription {
    rx: broadcast::Receiver<Arc<Execution>>,
    execution_id: Option<Uuid>,
}

impl StatusSubscription {
    /// Next matching snapshot or lag report, or `None` once the channel is
    /// closed.
    ///
    /// The channel is shared by all executions, so a filtered subscriber
    /// can lag because of traffic it never sees.
    pub async fn next(&mut self) -> Option<StatusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => {
                    if self
                        .execution_id
                        .map_or(true, |id| id == snapshot.execution_id)
                    {
                        return Some(StatusEvent::Snapshot(snapshot));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Status subscriber lagged");
                    return Some(StatusEvent::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Execution this subscription is limited to, if any.
    pub fn execution_id(&self) -> Option<Uuid> {
        self.execution_id
    }
}
