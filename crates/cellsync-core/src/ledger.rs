//! Best-effort broadcast of committed state changes.
//!
//! Publishing never waits and never touches barrier credits. A subscriber
//! that falls more than `capacity` entries behind loses the oldest ones.

use cellsync_types::{CellValue, Observation};
use tokio::sync::broadcast;

/// Shared sink for [`Observation`]s.
#[derive(Debug)]
pub struct Ledger<S> {
    sender: broadcast::Sender<Observation<S>>,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<S: CellValue> Ledger<S> {
    /// Create a ledger buffering up to `capacity` entries per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Start receiving every observation published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Observation<S>> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an observation. Dropped silently if nobody is listening.
    pub(crate) fn publish(&self, observation: Observation<S>) {
        let _ = self.sender.send(observation);
    }
}
