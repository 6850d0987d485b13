//! Committed state changes published to monitoring sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::CellId;

/// A copy of one committed state change.
///
/// Observations are produced by a cell at the moment it commits a new
/// state. They are informational only and take no part in tick settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation<S> {
    /// The cell whose state changed.
    pub cell: CellId,
    /// The tick during which the change was committed.
    pub tick: u64,
    /// The newly committed state.
    pub state: S,
    /// Wall-clock time of the commit.
    pub observed_at: DateTime<Utc>,
}

impl<S> Observation<S> {
    /// Record a commit of `state` by `cell` during `tick`, stamped now.
    pub fn now(cell: CellId, tick: u64, state: S) -> Self {
        Self {
            cell,
            tick,
            state,
            observed_at: Utc::now(),
        }
    }
}
