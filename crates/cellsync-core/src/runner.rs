//! Simulation loop runner.
//!
//! [`run_simulation`] drives the coordinator tick after tick until a bound
//! is met:
//!
//! - **Bounded run**: stop after `max_ticks` ticks (0 = unlimited)
//! - **Quiescence**: optionally stop after the first tick that exchanged no
//!   neighbor messages, since every later tick would leave every cell
//!   unchanged
//! - **Pacing**: sleep `tick_interval_ms` between ticks
//!
//! The runner wraps the single-tick [`TickCoordinator::tick`] and adds the
//! control plane around it.

use cellsync_types::CellValue;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::coordinator::{StalledTickError, TickCoordinator, TickSummary};
use crate::topology::Grid;

/// Errors that can occur during the simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A tick failed to settle.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: StalledTickError,
    },
}

/// Reason why the simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationEndReason {
    /// Reached the configured `max_ticks` limit.
    MaxTicksReached,
    /// A tick settled without any neighbor messages.
    Quiescent,
}

/// Result of the simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The reason the simulation ended.
    pub end_reason: SimulationEndReason,
    /// The last tick summary, if any tick completed.
    pub final_summary: Option<TickSummary>,
    /// Total number of ticks executed.
    pub total_ticks: u64,
}

/// Callback invoked after each settled tick.
///
/// The grid is safe to read: every committed state is final for the tick.
pub trait TickCallback<S: CellValue>: Send {
    /// Called after a tick settles.
    fn on_tick(&mut self, summary: &TickSummary, grid: &Grid<S>);
}

/// A no-op tick callback for testing.
pub struct NoOpCallback;

impl<S: CellValue> TickCallback<S> for NoOpCallback {
    fn on_tick(&mut self, _summary: &TickSummary, _grid: &Grid<S>) {}
}

/// Run ticks until a termination condition is met.
///
/// `grid` must already be started against `coordinator`.
pub async fn run_simulation<S: CellValue>(
    coordinator: &mut TickCoordinator,
    grid: &Grid<S>,
    bounds: &RunConfig,
    callback: &mut dyn TickCallback<S>,
) -> Result<SimulationResult, RunnerError> {
    let mut total_ticks: u64 = 0;

    info!(
        max_ticks = bounds.max_ticks,
        tick_interval_ms = bounds.tick_interval_ms,
        stop_when_quiescent = bounds.stop_when_quiescent,
        cells = coordinator.cell_count(),
        "Simulation starting"
    );

    loop {
        let summary = coordinator.tick().await?;
        total_ticks = total_ticks.saturating_add(1);

        callback.on_tick(&summary, grid);

        if bounds.stop_when_quiescent && summary.messages == 0 {
            info!(tick = summary.tick, "No neighbor messages, grid is quiescent");
            return Ok(SimulationResult {
                end_reason: SimulationEndReason::Quiescent,
                final_summary: Some(summary),
                total_ticks,
            });
        }

        if bounds.max_ticks > 0 && total_ticks >= bounds.max_ticks {
            info!(
                tick = summary.tick,
                max_ticks = bounds.max_ticks,
                "Tick limit reached"
            );
            return Ok(SimulationResult {
                end_reason: SimulationEndReason::MaxTicksReached,
                final_summary: Some(summary),
                total_ticks,
            });
        }

        if bounds.tick_interval_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(bounds.tick_interval_ms)).await;
        }
    }
}

/// Log the simulation end.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        reason = ?result.end_reason,
        total_ticks = result.total_ticks,
        final_tick = result.final_summary.as_ref().map(|s| s.tick),
        "Simulation ended"
    );

    if result.final_summary.is_none() {
        warn!("Simulation ended with no ticks executed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;

    async fn started_line(len: usize) -> (TickCoordinator, Grid<u8>) {
        let mut coordinator = TickCoordinator::new(CoordinatorConfig::default());
        let mut grid = Grid::line(len).unwrap();
        grid.start(&mut coordinator, None).unwrap();
        (coordinator, grid)
    }

    #[tokio::test]
    async fn bounded_by_max_ticks() {
        let (mut coordinator, mut grid) = started_line(3).await;
        let bounds = RunConfig {
            max_ticks: 5,
            tick_interval_ms: 0,
            stop_when_quiescent: false,
        };

        let result = run_simulation(&mut coordinator, &grid, &bounds, &mut NoOpCallback)
            .await
            .unwrap();

        assert_eq!(result.end_reason, SimulationEndReason::MaxTicksReached);
        assert_eq!(result.total_ticks, 5);
        assert_eq!(result.final_summary.unwrap().tick, 4);
        grid.stop().await;
    }

    #[tokio::test]
    async fn stops_when_quiescent() {
        let (mut coordinator, mut grid) = started_line(5).await;
        grid.set_state(0, 0, 1).unwrap();
        let bounds = RunConfig {
            max_ticks: 100,
            tick_interval_ms: 0,
            stop_when_quiescent: true,
        };

        let result = run_simulation(&mut coordinator, &grid, &bounds, &mut NoOpCallback)
            .await
            .unwrap();

        assert_eq!(result.end_reason, SimulationEndReason::Quiescent);
        assert_eq!(grid.snapshot(), vec![1; 5]);
        // Five ticks to reach the far end, then one silent tick.
        assert_eq!(result.total_ticks, 6);
        grid.stop().await;
    }

    #[tokio::test]
    async fn tick_callback_is_called() {
        struct CountCallback {
            count: u64,
        }
        impl TickCallback<u8> for CountCallback {
            fn on_tick(&mut self, _summary: &TickSummary, _grid: &Grid<u8>) {
                self.count = self.count.saturating_add(1);
            }
        }

        let (mut coordinator, mut grid) = started_line(2).await;
        let bounds = RunConfig {
            max_ticks: 3,
            tick_interval_ms: 0,
            stop_when_quiescent: false,
        };
        let mut cb = CountCallback { count: 0 };

        let _ = run_simulation(&mut coordinator, &grid, &bounds, &mut cb)
            .await
            .unwrap();

        assert_eq!(cb.count, 3);
        grid.stop().await;
    }

    #[tokio::test]
    async fn stalled_tick_is_reported() {
        let (mut coordinator, mut grid) = started_line(2).await;
        grid.stop().await;

        let result = run_simulation(
            &mut coordinator,
            &grid,
            &RunConfig::default(),
            &mut NoOpCallback,
        )
        .await;
        assert!(matches!(
            result,
            Err(RunnerError::Tick {
                source: StalledTickError::CellStopped { .. }
            })
        ));
    }
}
