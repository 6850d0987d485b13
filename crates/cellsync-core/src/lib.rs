//! Barrier-synchronized cell actors for Cellsync.
//!
//! Every cell runs as its own task and talks only to its direct neighbors.
//! The [`TickCoordinator`] advances all of them in lockstep: when
//! [`TickCoordinator::tick`] returns, every message the tick caused has been
//! applied and every committed state is final, so reading any cell is
//! deterministic.
//!
//! # Modules
//!
//! - [`barrier`] -- Credit counter that tells the coordinator a tick has
//!   settled.
//! - [`cell`] -- The cell actor: wiring, state, and the per-tick reaction.
//! - [`config`] -- Configuration loading from `cellsync.yaml` into
//!   strongly-typed structs.
//! - [`coordinator`] -- The global clock: dispatch, settlement, tick ids.
//! - [`ledger`] -- Best-effort broadcast of committed state changes.
//! - [`runner`] -- Bounded run loop with a per-tick callback.
//! - [`topology`] -- Rectangular grid builder.
//!
//! [`TickCoordinator`]: coordinator::TickCoordinator
//! [`TickCoordinator::tick`]: coordinator::TickCoordinator::tick

pub mod barrier;
pub mod cell;
pub mod config;
pub mod coordinator;
pub mod ledger;
mod link;
pub mod runner;
pub mod topology;

pub use barrier::Barrier;
pub use cell::{Cell, ConfigurationError};
pub use coordinator::{StalledTickError, TickCoordinator, TickReceiver, TickSummary};
pub use ledger::Ledger;
pub use topology::{Grid, TopologyError};
