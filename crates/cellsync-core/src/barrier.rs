//! Settlement barrier shared by the coordinator and every cell.
//!
//! The barrier counts outstanding credits for the current tick. The
//! coordinator [`reset`](Barrier::reset)s it to the number of cells before
//! any tick signal goes out, and then [`wait`](Barrier::wait)s for it to
//! drain. Cells release one credit when they have finished reacting to the
//! tick signal, and account for every neighbor message with a paired
//! [`begin_propagation`](Barrier::begin_propagation) /
//! [`end_propagation`](Barrier::end_propagation).
//!
//! The sender takes the credit before the message leaves, and the receiver
//! gives it back only after applying the message, so the counter cannot
//! reach zero while a message is in flight.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;

/// One outstanding neighbor message.
///
/// Issued by [`Barrier::begin_propagation`] and travels with the message.
/// The receiving cell hands it back through [`Barrier::end_propagation`]
/// once the message has been applied.
#[derive(Debug)]
#[must_use = "a propagation credit must be returned with Barrier::end_propagation"]
pub struct PropagationCredit {
    _private: (),
}

/// Shared credit counter with a wake-on-zero wait.
#[derive(Debug, Default)]
pub struct Barrier {
    /// Credits not yet released for the current tick.
    outstanding: AtomicUsize,

    /// Neighbor messages issued since the last reset.
    messages: AtomicU64,

    /// Number of times the counter has drained to zero.
    settlements: AtomicU64,

    /// Wakes the waiting coordinator when `outstanding` reaches zero.
    zero: Notify,
}

impl Barrier {
    /// Create a drained barrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the barrier for a new tick with one credit per cell.
    ///
    /// Must run before the first tick signal of the tick is dispatched.
    pub fn reset(&self, cells: usize) {
        self.messages.store(0, Ordering::Release);
        self.outstanding.store(cells, Ordering::Release);
        if cells == 0 {
            self.settlements.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Take a credit for a neighbor message that is about to be sent.
    pub fn begin_propagation(&self) -> PropagationCredit {
        self.add_credit();
        self.messages.fetch_add(1, Ordering::AcqRel);
        PropagationCredit { _private: () }
    }

    /// Return the credit of a neighbor message that has been applied (or
    /// could not be delivered).
    pub fn end_propagation(&self, credit: PropagationCredit) {
        let PropagationCredit { _private: () } = credit;
        self.release_credit();
    }

    /// Release the per-cell "finished reacting to the tick" credit.
    pub fn finish_reaction(&self) {
        self.release_credit();
    }

    /// Block until every credit of the current tick has been released.
    ///
    /// Only meaningful after [`reset`](Self::reset) for the current tick.
    pub async fn wait(&self) {
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            // Register before checking so a release between the check and
            // the await still wakes us.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Credits still outstanding.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Neighbor messages issued since the last [`reset`](Self::reset).
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Acquire)
    }

    /// How many times the barrier has drained to zero since creation.
    pub fn settlements(&self) -> u64 {
        self.settlements.load(Ordering::Acquire)
    }

    fn add_credit(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    fn release_credit(&self) {
        let released =
            self.outstanding
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        // A release without a matching credit means the accounting is
        // already broken; continuing would let a tick settle early.
        assert!(
            released.is_ok(),
            "barrier credit released with no credit outstanding"
        );
        if released == Ok(1) {
            self.settlements.fetch_add(1, Ordering::AcqRel);
            self.zero.notify_waiters();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_returns_once_all_cells_finish() {
        let barrier = Arc::new(Barrier::new());
        barrier.reset(3);

        let worker = Arc::clone(&barrier);
        let handle = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::task::yield_now().await;
                worker.finish_reaction();
            }
        });

        tokio::time::timeout(Duration::from_secs(5), barrier.wait())
            .await
            .unwrap();
        handle.await.unwrap();
        assert_eq!(barrier.outstanding(), 0);
        assert_eq!(barrier.settlements(), 1);
    }

    #[tokio::test]
    async fn in_flight_message_holds_the_barrier() {
        let barrier = Barrier::new();
        barrier.reset(1);
        let credit = barrier.begin_propagation();
        barrier.finish_reaction();

        assert_eq!(barrier.outstanding(), 1);
        let early = tokio::time::timeout(Duration::from_millis(20), barrier.wait()).await;
        assert!(early.is_err(), "barrier drained with a message in flight");

        barrier.end_propagation(credit);
        assert_eq!(barrier.outstanding(), 0);
        assert_eq!(barrier.messages(), 1);
        tokio::time::timeout(Duration::from_secs(1), barrier.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_reset_settles_immediately() {
        let barrier = Barrier::new();
        barrier.reset(0);
        barrier.wait().await;
        assert_eq!(barrier.settlements(), 1);
    }

    #[test]
    fn reset_clears_message_count() {
        let barrier = Barrier::new();
        barrier.reset(1);
        let credit = barrier.begin_propagation();
        barrier.end_propagation(credit);
        barrier.finish_reaction();
        assert_eq!(barrier.messages(), 1);

        barrier.reset(2);
        assert_eq!(barrier.messages(), 0);
        assert_eq!(barrier.outstanding(), 2);
    }

    #[test]
    #[should_panic(expected = "no credit outstanding")]
    fn releasing_past_zero_is_fatal() {
        let barrier = Barrier::new();
        barrier.finish_reaction();
    }
}
