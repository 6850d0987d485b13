//! Cell actors.
//!
//! A [`Cell`] holds a committed state (what [`Cell::state`] returns) and a
//! pending state (what it will commit at its next tick reaction). Before it
//! is started, a cell is wired to its neighbors with [`Cell::add_neighbor`].
//! [`Cell::start`] then moves the link tables into a dedicated task that
//! runs until [`Cell::stop`] is called.
//!
//! # Actor loop
//!
//! The task waits on three event sources at once, with no priority between
//! them:
//!
//! - **Tick signal** -- acknowledge it, compare pending with committed, and
//!   if they differ commit the pending state and send it to every
//!   neighbor. Release the "done" credit either way.
//! - **Neighbor message** -- overwrite the pending state with the received
//!   value and return the message's barrier credit. Applied immediately,
//!   whatever phase the tick is in.
//! - **Stop signal** -- exit, also while a tick is waiting to commence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cellsync_types::{CellId, CellValue, Direction, Observation};
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::barrier::Barrier;
use crate::coordinator::{TickReceiver, TickSignal};
use crate::ledger::Ledger;
use crate::link::{LinkEnds, LinkReceiver, LinkSender, LinkTable, Propagation};

/// Errors raised while wiring or starting cells.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The slot is already linked to a different neighbor.
    #[error("cell {cell} already has a neighbor to the {direction}")]
    SlotOccupied {
        /// The cell whose slot is taken.
        cell: CellId,
        /// The occupied slot.
        direction: Direction,
    },

    /// The cell has already been started; topology is frozen.
    #[error("cell {cell} is already running; topology is fixed once ticking starts")]
    AlreadyStarted {
        /// The running cell.
        cell: CellId,
    },

    /// A cell was introduced to itself.
    #[error("cell {cell} cannot be its own neighbor")]
    SelfLoop {
        /// The offending cell.
        cell: CellId,
    },

    /// `start` was called outside a Tokio runtime.
    #[error("cell {cell} must be started from within a Tokio runtime")]
    NoRuntime {
        /// The cell that could not be started.
        cell: CellId,
    },
}

/// Committed and pending state, guarded together.
#[derive(Debug, Default)]
struct Slots<S> {
    committed: S,
    pending: S,
}

/// The task half of a started cell.
#[derive(Debug)]
struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// A single cellular-automaton cell.
#[derive(Debug)]
pub struct Cell<S: CellValue> {
    id: CellId,
    slots: Arc<Mutex<Slots<S>>>,
    /// Link tables, present until the cell is started.
    links: Option<LinkTable<S>>,
    /// Neighbor identities, kept after start for introspection.
    neighbors: BTreeMap<Direction, CellId>,
    /// Slots this cell has introduced itself, directly or by confirming the
    /// neighbor's introduction.
    introduced: BTreeSet<Direction>,
    running: Option<Running>,
}

impl<S: CellValue> Default for Cell<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CellValue> Cell<S> {
    /// Create an unwired cell in the empty (`S::default()`) state.
    pub fn new() -> Self {
        Self {
            id: CellId::new(),
            slots: Arc::new(Mutex::new(Slots::default())),
            links: Some(LinkTable::new()),
            neighbors: BTreeMap::new(),
            introduced: BTreeSet::new(),
            running: None,
        }
    }

    /// The cell's opaque identity.
    pub const fn id(&self) -> CellId {
        self.id
    }

    /// The neighbor wired under `direction`, if any.
    pub fn neighbor(&self, direction: Direction) -> Option<CellId> {
        self.neighbors.get(&direction).copied()
    }

    /// Number of wired neighbors.
    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Tell this cell that `other` is its neighbor in `direction`.
    ///
    /// Wires both links of the adjacency: `other` files them under
    /// `direction.recip()`, this cell under `direction`. Once `other` has
    /// made the introduction, the matching call from this side is accepted
    /// without rewiring. Repeating a call from the same side fails with
    /// [`ConfigurationError::SlotOccupied`].
    pub fn add_neighbor(
        &mut self,
        direction: Direction,
        other: &mut Self,
    ) -> Result<(), ConfigurationError> {
        if self.id == other.id {
            return Err(ConfigurationError::SelfLoop { cell: self.id });
        }
        self.ensure_unstarted()?;
        other.ensure_unstarted()?;
        match (self.neighbor(direction), other.neighbor(direction.recip())) {
            (None, None) => {}
            (Some(a), Some(b))
                if a == other.id
                    && b == self.id
                    && other.introduced.contains(&direction.recip())
                    && !self.introduced.contains(&direction) =>
            {
                trace!(cell = %self.id, %direction, neighbor = %other.id, "Introduction confirmed");
                self.introduced.insert(direction);
                return Ok(());
            }
            (Some(_), _) => {
                return Err(ConfigurationError::SlotOccupied {
                    cell: self.id,
                    direction,
                });
            }
            (None, Some(_)) => {
                return Err(ConfigurationError::SlotOccupied {
                    cell: other.id,
                    direction: direction.recip(),
                });
            }
        }

        let ends = other.channels(direction, self.id)?;
        self.unstarted_links()?.insert(direction, ends);
        self.neighbors.insert(direction, other.id);
        self.introduced.insert(direction);
        debug!(cell = %self.id, %direction, neighbor = %other.id, "Neighbor wired");
        Ok(())
    }

    /// Return the link ends `caller` should use to talk to this cell.
    ///
    /// `recip_index` is the relationship this cell has to the caller: "you
    /// are my `Down`". This cell is therefore the caller's `Down` and the
    /// caller is this cell's `Up`, so the new links are filed under
    /// `recip_index.recip()`.
    pub(crate) fn channels(
        &mut self,
        recip_index: Direction,
        caller: CellId,
    ) -> Result<LinkEnds<S>, ConfigurationError> {
        let slot = recip_index.recip();
        self.ensure_unstarted()?;
        if self.neighbors.contains_key(&slot) {
            return Err(ConfigurationError::SlotOccupied {
                cell: self.id,
                direction: slot,
            });
        }
        let (kept, handed_out) = LinkTable::open();
        self.unstarted_links()?.insert(slot, kept);
        self.neighbors.insert(slot, caller);
        Ok(handed_out)
    }

    /// The committed state.
    ///
    /// Stable between ticks. While a tick is in flight the value may be
    /// either side of the commit.
    pub fn state(&self) -> S {
        self.lock().committed.clone()
    }

    /// The pending state: what the cell will commit at its next reaction.
    pub fn pending(&self) -> S {
        self.lock().pending.clone()
    }

    /// Set the pending state. The last call before the next tick wins.
    pub fn set_state(&self, value: S) {
        self.lock().pending = value;
    }

    /// Whether [`start`](Self::start) has been called. Topology is frozen
    /// from then on.
    pub const fn is_started(&self) -> bool {
        self.links.is_none()
    }

    /// Whether the actor task is alive.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Spawn the actor task.
    ///
    /// Freezes the cell's topology. Committed changes are copied to
    /// `ledger` when one is given.
    pub fn start(
        &mut self,
        ticks: TickReceiver,
        ledger: Option<Ledger<S>>,
    ) -> Result<(), ConfigurationError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_err| ConfigurationError::NoRuntime { cell: self.id })?;
        let links = self
            .links
            .take()
            .ok_or(ConfigurationError::AlreadyStarted { cell: self.id })?;

        let (stop, stopped) = oneshot::channel();
        let actor = CellActor::new(self.id, Arc::clone(&self.slots), links, ticks, ledger);
        let task = runtime.spawn(actor.run(stopped));
        self.running = Some(Running { stop, task });
        Ok(())
    }

    /// Stop the actor task and wait for it to exit.
    ///
    /// Safe to call more than once, and on a cell that was never started.
    /// Neighbors still sending to a stopped cell have their messages
    /// dropped; stop cells only after the last settled tick.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        // The task may already have exited on its own.
        let _ = running.stop.send(());
        if let Err(err) = running.task.await {
            warn!(cell = %self.id, %err, "Cell task ended abnormally");
        }
        debug!(cell = %self.id, "Cell stopped");
    }

    fn ensure_unstarted(&self) -> Result<(), ConfigurationError> {
        if self.is_started() {
            Err(ConfigurationError::AlreadyStarted { cell: self.id })
        } else {
            Ok(())
        }
    }

    fn unstarted_links(&mut self) -> Result<&mut LinkTable<S>, ConfigurationError> {
        let cell = self.id;
        self.links
            .as_mut()
            .ok_or(ConfigurationError::AlreadyStarted { cell })
    }

    fn lock(&self) -> MutexGuard<'_, Slots<S>> {
        lock_slots(&self.slots)
    }
}

/// Lock the state slots, recovering from a poisoned mutex. The slots hold
/// plain values, so a panic elsewhere cannot leave them half-written.
fn lock_slots<S>(slots: &Mutex<Slots<S>>) -> MutexGuard<'_, Slots<S>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the actor task owns.
struct CellActor<S: CellValue> {
    id: CellId,
    slots: Arc<Mutex<Slots<S>>>,
    outgoing: BTreeMap<Direction, LinkSender<S>>,
    /// Every incoming link merged into one stream, tagged by direction.
    inbound: SelectAll<BoxStream<'static, (Direction, Propagation<S>)>>,
    ticks: TickReceiver,
    ledger: Option<Ledger<S>>,
}

impl<S: CellValue> CellActor<S> {
    fn new(
        id: CellId,
        slots: Arc<Mutex<Slots<S>>>,
        links: LinkTable<S>,
        ticks: TickReceiver,
        ledger: Option<Ledger<S>>,
    ) -> Self {
        let inbound = stream::select_all(
            links
                .incoming
                .into_iter()
                .map(|(direction, receiver)| tagged(direction, receiver)),
        );
        Self {
            id,
            slots,
            outgoing: links.outgoing,
            inbound,
            ticks,
            ledger,
        }
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        debug!(cell = %self.id, neighbors = self.outgoing.len(), "Cell started");
        loop {
            tokio::select! {
                _ = &mut stop => break,
                signal = self.ticks.signals.recv() => {
                    let Some(signal) = signal else {
                        debug!(cell = %self.id, "Tick source closed");
                        break;
                    };
                    let candidate = self.lock().pending.clone();
                    let tick = signal.tick;
                    match accept(self.id, signal, &mut stop).await {
                        Acceptance::Commenced => self.react(tick, candidate),
                        Acceptance::Abandoned => {}
                        Acceptance::Stopped => break,
                    }
                }
                Some((direction, message)) = self.inbound.next(), if !self.inbound.is_empty() => {
                    self.on_neighbor_state(direction, message);
                }
            }
        }
    }

    /// Commit `candidate` if it differs from the committed state, and send
    /// it to every neighbor.
    fn react(&self, tick: u64, candidate: S) {
        let changed = {
            let mut slots = self.lock();
            if candidate == slots.committed {
                None
            } else {
                slots.committed.clone_from(&candidate);
                Some(candidate)
            }
        };

        if let Some(state) = changed {
            debug!(cell = %self.id, tick, ?state, "State committed");
            if let Some(ledger) = &self.ledger {
                ledger.publish(Observation::now(self.id, tick, state.clone()));
            }
            for (direction, link) in &self.outgoing {
                let credit = self.barrier().begin_propagation();
                let message = Propagation {
                    state: state.clone(),
                    credit,
                };
                if let Err(undelivered) = link.send(message) {
                    warn!(cell = %self.id, tick, %direction, "Neighbor has stopped, state not delivered");
                    self.barrier().end_propagation(undelivered.0.credit);
                }
            }
        } else {
            trace!(cell = %self.id, tick, "No change");
        }

        self.barrier().finish_reaction();
    }

    fn on_neighbor_state(&self, direction: Direction, message: Propagation<S>) {
        let Propagation { state, credit } = message;
        trace!(cell = %self.id, %direction, ?state, "Neighbor state received");
        self.lock().pending = state;
        self.barrier().end_propagation(credit);
    }

    fn barrier(&self) -> &Barrier {
        &self.ticks.barrier
    }

    fn lock(&self) -> MutexGuard<'_, Slots<S>> {
        lock_slots(&self.slots)
    }
}

/// How an accepted tick signal resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acceptance {
    /// React now.
    Commenced,
    /// The coordinator gave up on the tick before commencing it.
    Abandoned,
    /// The cell was told to stop while waiting.
    Stopped,
}

/// Acknowledge a tick signal and, in single-hop mode, wait for the
/// coordinator to commence. The stop signal is watched throughout.
///
/// The caller snapshots the pending state before calling this, so the
/// snapshot predates every propagation of the tick.
async fn accept(
    cell: CellId,
    signal: TickSignal,
    stop: &mut oneshot::Receiver<()>,
) -> Acceptance {
    let TickSignal {
        tick,
        ack,
        commence,
    } = signal;
    if ack.send(()).is_err() {
        trace!(%cell, tick, "Coordinator no longer waiting for ack");
    }
    let Some(mut commence) = commence else {
        return Acceptance::Commenced;
    };
    tokio::select! {
        _ = stop => {
            debug!(%cell, tick, "Stopped while waiting for commence");
            Acceptance::Stopped
        }
        commenced = commence.wait_for(|go| *go) => {
            if commenced.is_ok() {
                Acceptance::Commenced
            } else {
                debug!(%cell, tick, "Tick abandoned before commence");
                Acceptance::Abandoned
            }
        }
    }
}

/// Turn one incoming link into a stream of direction-tagged messages.
fn tagged<S: CellValue>(
    direction: Direction,
    receiver: LinkReceiver<S>,
) -> BoxStream<'static, (Direction, Propagation<S>)> {
    stream::unfold(receiver, move |mut receiver| async move {
        let message = receiver.recv().await?;
        Some(((direction, message), receiver))
    })
    .boxed()
}
