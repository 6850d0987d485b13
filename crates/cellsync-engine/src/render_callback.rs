//! Tick callback that logs the grid after every settled tick.

use cellsync_core::runner::TickCallback;
use cellsync_core::{Grid, TickSummary};
use tracing::info;

use crate::goo::Goo;

/// Logs the rendered grid rows and keeps the most recent rendering.
#[derive(Debug, Default)]
pub struct RenderCallback {
    last: Vec<String>,
}

impl RenderCallback {
    /// Create a callback with nothing rendered yet.
    pub const fn new() -> Self {
        Self { last: Vec::new() }
    }

    /// Rows rendered after the most recent tick.
    pub fn last(&self) -> &[String] {
        &self.last
    }
}

impl TickCallback<Goo> for RenderCallback {
    fn on_tick(&mut self, summary: &TickSummary, grid: &Grid<Goo>) {
        self.last = grid.render(|goo| goo.glyph());
        info!(
            tick = summary.tick,
            messages = summary.messages,
            elapsed_us = summary.elapsed.as_micros(),
            "Tick settled"
        );
        for (row, line) in self.last.iter().enumerate() {
            info!(tick = summary.tick, row, "{line}");
        }
    }
}
