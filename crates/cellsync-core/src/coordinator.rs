//! Tick coordinator: the global clock that drives every cell.
//!
//! One call to [`TickCoordinator::tick`] runs one complete tick:
//!
//! 1. **Arm** -- reset the barrier to one credit per registered cell.
//! 2. **Dispatch** -- hand a [`TickSignal`] to each cell and wait for the
//!    cell to acknowledge it. A cell whose channel is closed, or that does
//!    not acknowledge within the dispatch timeout, stalls the tick.
//! 3. **Commence** -- in [`PropagationMode::SingleHop`], release every cell
//!    to react at once, now that all of them hold their pending snapshot.
//! 4. **Settle** -- wait for the barrier to drain, bounded by the settle
//!    timeout.
//! 5. **Advance** -- increment the tick identifier.
//!
//! When `tick` returns `Ok`, every cell's committed state is final for that
//! tick and may be read safely. A stalled tick halts the coordinator: work
//! from the stalled tick may still be running, so the barrier is never
//! reset again and every later call fails with
//! [`StalledTickError::Halted`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::barrier::Barrier;
use crate::config::{CoordinatorConfig, PropagationMode};

/// Errors that stop a tick from settling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StalledTickError {
    /// The cell's actor has terminated and will never accept the signal.
    #[error("tick {tick}: cell #{cell_index} has stopped")]
    CellStopped {
        /// The tick that could not be dispatched.
        tick: u64,
        /// Registration index of the stopped cell.
        cell_index: usize,
    },

    /// The cell did not accept its tick signal in time.
    #[error("tick {tick}: cell #{cell_index} did not accept the tick signal within {timeout_ms}ms")]
    CellUnresponsive {
        /// The tick that could not be dispatched.
        tick: u64,
        /// Registration index of the unresponsive cell.
        cell_index: usize,
        /// The dispatch timeout that elapsed.
        timeout_ms: u128,
    },

    /// Every cell accepted the signal but the barrier never drained.
    #[error("tick {tick}: {outstanding} barrier credit(s) still outstanding after {timeout_ms}ms")]
    Unsettled {
        /// The tick that did not settle.
        tick: u64,
        /// Credits outstanding when the timeout elapsed.
        outstanding: usize,
        /// The settle timeout that elapsed.
        timeout_ms: u128,
    },

    /// The tick identifier cannot advance further.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,

    /// An earlier tick stalled; no further ticks will run.
    #[error("coordinator halted after tick {stalled_tick} stalled")]
    Halted {
        /// The tick that stalled.
        stalled_tick: u64,
    },
}

/// The signal a cell receives once per tick.
#[derive(Debug)]
pub struct TickSignal {
    /// Identifier of the tick being run.
    pub(crate) tick: u64,
    /// Completed by the cell as soon as it has accepted the signal.
    pub(crate) ack: oneshot::Sender<()>,
    /// In single-hop mode, flips to `true` once every cell has accepted.
    pub(crate) commence: Option<watch::Receiver<bool>>,
}

/// A cell's registration with the coordinator: where its tick signals
/// arrive, and the barrier it accounts against.
#[derive(Debug)]
pub struct TickReceiver {
    pub(crate) signals: mpsc::Receiver<TickSignal>,
    pub(crate) barrier: Arc<Barrier>,
}

/// Summary of one settled tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickSummary {
    /// The tick that settled.
    pub tick: u64,
    /// Neighbor messages exchanged during the tick.
    pub messages: u64,
    /// Wall-clock time from dispatch to settlement.
    pub elapsed: Duration,
}

/// Drives the global clock.
#[derive(Debug)]
pub struct TickCoordinator {
    /// Identifier of the next tick to run (starts at 0).
    tick: u64,
    /// One tick-signal endpoint per registered cell.
    endpoints: Vec<mpsc::Sender<TickSignal>>,
    /// Settlement barrier shared with every registered cell.
    barrier: Arc<Barrier>,
    config: CoordinatorConfig,
    /// Set by the first stalled tick.
    halted: Option<u64>,
}

/// Why a single hand-off failed before its timeout.
struct CellGone;

impl TickCoordinator {
    /// Create a coordinator with no registered cells.
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            tick: 0,
            endpoints: Vec::new(),
            barrier: Arc::new(Barrier::new()),
            config,
            halted: None,
        }
    }

    /// Register one more cell and return the receiver it should be started
    /// with.
    ///
    /// The signal channel holds a single signal; the hand-off is complete
    /// only when the cell acknowledges it.
    pub fn register(&mut self) -> TickReceiver {
        let (tx, rx) = mpsc::channel(1);
        self.endpoints.push(tx);
        TickReceiver {
            signals: rx,
            barrier: Arc::clone(&self.barrier),
        }
    }

    /// Identifier of the next tick to run.
    pub const fn tick_id(&self) -> u64 {
        self.tick
    }

    /// Number of registered cells.
    pub fn cell_count(&self) -> usize {
        self.endpoints.len()
    }

    /// The settlement barrier.
    pub const fn barrier(&self) -> &Arc<Barrier> {
        &self.barrier
    }

    /// The configuration this coordinator runs with.
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Whether a stalled tick has halted the coordinator.
    pub const fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Run one tick to settlement.
    ///
    /// On error the tick identifier is not advanced. A stall
    /// ([`CellStopped`](StalledTickError::CellStopped),
    /// [`CellUnresponsive`](StalledTickError::CellUnresponsive) or
    /// [`Unsettled`](StalledTickError::Unsettled)) halts the coordinator.
    /// Late acknowledgements and credits from the stalled tick then drain
    /// into the old barrier count instead of a new one.
    pub async fn tick(&mut self) -> Result<TickSummary, StalledTickError> {
        if let Some(stalled_tick) = self.halted {
            return Err(StalledTickError::Halted { stalled_tick });
        }
        let result = self.run_tick().await;
        if let Err(
            StalledTickError::CellStopped { tick, .. }
            | StalledTickError::CellUnresponsive { tick, .. }
            | StalledTickError::Unsettled { tick, .. },
        ) = result
        {
            self.halted = Some(tick);
        }
        result
    }

    async fn run_tick(&mut self) -> Result<TickSummary, StalledTickError> {
        let tick = self.tick;
        let started = Instant::now();

        self.barrier.reset(self.endpoints.len());

        let (commence_tx, commence_rx) = match self.config.propagation {
            PropagationMode::SingleHop => {
                let (tx, rx) = watch::channel(false);
                (Some(tx), Some(rx))
            }
            PropagationMode::Unordered => (None, None),
        };

        let dispatch_timeout = self.config.dispatch_timeout();
        for (cell_index, endpoint) in self.endpoints.iter().enumerate() {
            let (ack, accepted) = oneshot::channel();
            let signal = TickSignal {
                tick,
                ack,
                commence: commence_rx.clone(),
            };
            let handoff = async {
                endpoint.send(signal).await.map_err(|_err| CellGone)?;
                accepted.await.map_err(|_err| CellGone)
            };
            match tokio::time::timeout(dispatch_timeout, handoff).await {
                Ok(Ok(())) => {}
                Ok(Err(CellGone)) => {
                    warn!(tick, cell_index, "Cell stopped before accepting tick signal");
                    return Err(StalledTickError::CellStopped { tick, cell_index });
                }
                Err(_elapsed) => {
                    warn!(tick, cell_index, "Cell did not accept tick signal in time");
                    return Err(StalledTickError::CellUnresponsive {
                        tick,
                        cell_index,
                        timeout_ms: dispatch_timeout.as_millis(),
                    });
                }
            }
        }

        if let Some(commence) = commence_tx {
            commence.send_replace(true);
        }

        let settle_timeout = self.config.settle_timeout();
        if tokio::time::timeout(settle_timeout, self.barrier.wait())
            .await
            .is_err()
        {
            let outstanding = self.barrier.outstanding();
            warn!(tick, outstanding, "Tick did not settle in time");
            return Err(StalledTickError::Unsettled {
                tick,
                outstanding,
                timeout_ms: settle_timeout.as_millis(),
            });
        }

        self.tick = self
            .tick
            .checked_add(1)
            .ok_or(StalledTickError::TickOverflow)?;

        let summary = TickSummary {
            tick,
            messages: self.barrier.messages(),
            elapsed: started.elapsed(),
        };
        debug!(
            tick,
            messages = summary.messages,
            elapsed_us = summary.elapsed.as_micros(),
            "Tick settled"
        );
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            dispatch_timeout_ms: 50,
            settle_timeout_ms: 50,
            propagation: PropagationMode::SingleHop,
        }
    }

    #[tokio::test]
    async fn empty_coordinator_ticks() {
        let mut coordinator = TickCoordinator::new(fast_config());
        let summary = coordinator.tick().await.unwrap();
        assert_eq!(summary.tick, 0);
        assert_eq!(summary.messages, 0);
        assert_eq!(coordinator.tick_id(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_is_reported_as_stopped() {
        let mut coordinator = TickCoordinator::new(fast_config());
        drop(coordinator.register());

        let err = coordinator.tick().await.unwrap_err();
        assert_eq!(
            err,
            StalledTickError::CellStopped {
                tick: 0,
                cell_index: 0
            }
        );
        assert_eq!(coordinator.tick_id(), 0);
    }

    #[tokio::test]
    async fn silent_receiver_is_reported_as_unresponsive() {
        let mut coordinator = TickCoordinator::new(fast_config());
        let _held = coordinator.register();

        let err = coordinator.tick().await.unwrap_err();
        assert!(matches!(
            err,
            StalledTickError::CellUnresponsive { cell_index: 0, .. }
        ));
    }

    #[tokio::test]
    async fn retry_after_unresponsive_cell_is_refused() {
        let mut coordinator = TickCoordinator::new(CoordinatorConfig {
            propagation: PropagationMode::Unordered,
            ..fast_config()
        });
        let mut receiver = coordinator.register();

        // Accept the signal only after the dispatch timeout, then finish.
        let late = tokio::spawn(async move {
            let signal = receiver.signals.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = signal.ack.send(());
            receiver.barrier.finish_reaction();
            receiver
        });

        let err = coordinator.tick().await.unwrap_err();
        assert!(matches!(
            err,
            StalledTickError::CellUnresponsive { tick: 0, cell_index: 0, .. }
        ));
        assert!(coordinator.is_halted());

        let err = coordinator.tick().await.unwrap_err();
        assert_eq!(err, StalledTickError::Halted { stalled_tick: 0 });
        assert_eq!(coordinator.tick_id(), 0);

        // The late release drains the stalled tick's own credit.
        let receiver = late.await.unwrap();
        assert_eq!(receiver.barrier.outstanding(), 0);
        assert_eq!(coordinator.barrier().settlements(), 1);
    }

    #[tokio::test]
    async fn missing_done_credit_is_reported_as_unsettled() {
        let mut coordinator = TickCoordinator::new(fast_config());
        let mut receiver = coordinator.register();

        // Accept the signal but never release the "done" credit.
        let acceptor = tokio::spawn(async move {
            let signal = receiver.signals.recv().await.unwrap();
            signal.ack.send(()).unwrap();
            receiver
        });

        let err = coordinator.tick().await.unwrap_err();
        assert_eq!(
            err,
            StalledTickError::Unsettled {
                tick: 0,
                outstanding: 1,
                timeout_ms: 50,
            }
        );
        drop(acceptor.await.unwrap());
    }

    #[tokio::test]
    async fn acknowledged_and_finished_cell_settles() {
        let mut coordinator = TickCoordinator::new(fast_config());
        let mut receiver = coordinator.register();

        let cell = tokio::spawn(async move {
            for _ in 0..2 {
                let mut signal = receiver.signals.recv().await.unwrap();
                signal.ack.send(()).unwrap();
                let mut commence = signal.commence.take().unwrap();
                commence.wait_for(|go| *go).await.unwrap();
                receiver.barrier.finish_reaction();
            }
        });

        assert_eq!(coordinator.tick().await.unwrap().tick, 0);
        assert_eq!(coordinator.tick().await.unwrap().tick, 1);
        cell.await.unwrap();
        assert_eq!(coordinator.barrier().settlements(), 2);
    }
}
