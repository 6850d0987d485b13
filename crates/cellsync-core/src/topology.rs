//! Rectangular grid topology.
//!
//! [`Grid`] owns its cells in row-major order and wires every orthogonal
//! adjacency once (no wrap-around at the edges). A one-row grid is a line.

use cellsync_types::{CellValue, Direction};
use tracing::info;

use crate::cell::{Cell, ConfigurationError};
use crate::coordinator::TickCoordinator;
use crate::ledger::Ledger;

/// Errors raised while building or addressing a grid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// A grid needs at least one cell.
    #[error("grid must be at least 1x1, got {width}x{height}")]
    Empty {
        /// Requested columns.
        width: usize,
        /// Requested rows.
        height: usize,
    },

    /// The requested size does not fit in memory addressing.
    #[error("grid of {width}x{height} cells is too large")]
    TooLarge {
        /// Requested columns.
        width: usize,
        /// Requested rows.
        height: usize,
    },

    /// A coordinate lies outside the grid.
    #[error("({x}, {y}) lies outside the {width}x{height} grid")]
    OutOfBounds {
        /// Requested column.
        x: usize,
        /// Requested row.
        y: usize,
        /// Grid columns.
        width: usize,
        /// Grid rows.
        height: usize,
    },

    /// Two grid positions could not be paired for wiring.
    #[error("cells #{from} and #{to} are not two distinct cells of the grid")]
    UnpairedCells {
        /// Index of the introducing cell.
        from: usize,
        /// Index of the introduced cell.
        to: usize,
    },

    /// Wiring or starting a cell failed.
    #[error("wiring error: {source}")]
    Wiring {
        /// The underlying configuration error.
        #[from]
        source: ConfigurationError,
    },
}

/// A `width x height` grid of cells.
#[derive(Debug)]
pub struct Grid<S: CellValue> {
    width: usize,
    height: usize,
    cells: Vec<Cell<S>>,
}

impl<S: CellValue> Grid<S> {
    /// Build and wire a rectangular grid.
    pub fn rectangular(width: usize, height: usize) -> Result<Self, TopologyError> {
        if width == 0 || height == 0 {
            return Err(TopologyError::Empty { width, height });
        }
        let len = width
            .checked_mul(height)
            .ok_or(TopologyError::TooLarge { width, height })?;

        let mut grid = Self {
            width,
            height,
            cells: (0..len).map(|_| Cell::new()).collect(),
        };
        for y in 0..height {
            for x in 0..width {
                let Some(from) = grid.index(x, y) else {
                    continue;
                };
                for direction in [Direction::Right, Direction::Down] {
                    if let Some(to) = grid.neighbor_index(x, y, direction) {
                        grid.introduce(from, direction, to)?;
                    }
                }
            }
        }
        Ok(grid)
    }

    /// Build a single row of `len` cells.
    pub fn line(len: usize) -> Result<Self, TopologyError> {
        Self::rectangular(len, 1)
    }

    /// Number of columns.
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the grid has no cells. Never true for a built grid.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All cells, row-major.
    pub fn cells(&self) -> &[Cell<S>] {
        &self.cells
    }

    /// The cell at column `x`, row `y`.
    pub fn cell(&self, x: usize, y: usize) -> Option<&Cell<S>> {
        self.index(x, y).and_then(|i| self.cells.get(i))
    }

    /// Set the pending state of the cell at `(x, y)`.
    pub fn set_state(&self, x: usize, y: usize, value: S) -> Result<(), TopologyError> {
        let cell = self.cell(x, y).ok_or(TopologyError::OutOfBounds {
            x,
            y,
            width: self.width,
            height: self.height,
        })?;
        cell.set_state(value);
        Ok(())
    }

    /// Committed state of every cell, row-major.
    pub fn snapshot(&self) -> Vec<S> {
        self.cells.iter().map(Cell::state).collect()
    }

    /// Render each row as a string, one character per cell.
    pub fn render(&self, glyph: impl Fn(&S) -> char) -> Vec<String> {
        self.cells
            .chunks(self.width)
            .map(|row| row.iter().map(|cell| glyph(&cell.state())).collect())
            .collect()
    }

    /// Register every cell with `coordinator` and start it.
    ///
    /// Fails without registering anything if any cell is already started.
    pub fn start(
        &mut self,
        coordinator: &mut TickCoordinator,
        ledger: Option<&Ledger<S>>,
    ) -> Result<(), TopologyError> {
        if let Some(cell) = self.cells.iter().find(|cell| cell.is_started()) {
            return Err(ConfigurationError::AlreadyStarted { cell: cell.id() }.into());
        }
        for cell in &mut self.cells {
            cell.start(coordinator.register(), ledger.cloned())?;
        }
        info!(
            width = self.width,
            height = self.height,
            cells = self.cells.len(),
            "Grid started"
        );
        Ok(())
    }

    /// Stop every cell. Call only after the last settled tick.
    pub async fn stop(&mut self) {
        for cell in &mut self.cells {
            cell.stop().await;
        }
        info!(cells = self.cells.len(), "Grid stopped");
    }

    fn index(&self, x: usize, y: usize) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        y.checked_mul(self.width)?.checked_add(x)
    }

    fn neighbor_index(&self, x: usize, y: usize, direction: Direction) -> Option<usize> {
        let (dx, dy) = direction.offset();
        let nx = x.checked_add_signed(isize::try_from(dx).ok()?)?;
        let ny = y.checked_add_signed(isize::try_from(dy).ok()?)?;
        self.index(nx, ny)
    }

    /// Introduce cell `from` to cell `to`, which lies in `direction`.
    fn introduce(
        &mut self,
        from: usize,
        direction: Direction,
        to: usize,
    ) -> Result<(), TopologyError> {
        let (a, b) =
            pair_mut(&mut self.cells, from, to).ok_or(TopologyError::UnpairedCells { from, to })?;
        a.add_neighbor(direction, b)?;
        Ok(())
    }
}

/// Mutable references to two distinct elements of a slice.
fn pair_mut<T>(items: &mut [T], first: usize, second: usize) -> Option<(&mut T, &mut T)> {
    if first < second {
        let (head, tail) = items.split_at_mut_checked(second)?;
        Some((head.get_mut(first)?, tail.first_mut()?))
    } else if second < first {
        let (head, tail) = items.split_at_mut_checked(first)?;
        let (b, a) = (head.get_mut(second)?, tail.first_mut()?);
        Some((a, b))
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;

    #[test]
    fn introducing_a_cell_to_itself_is_an_unpaired_error() {
        let mut grid = Grid::<u8>::line(2).unwrap();
        let err = grid.introduce(1, Direction::Right, 1).unwrap_err();
        assert_eq!(err, TopologyError::UnpairedCells { from: 1, to: 1 });
        let err = grid.introduce(0, Direction::Right, 7).unwrap_err();
        assert_eq!(err, TopologyError::UnpairedCells { from: 0, to: 7 });
    }

    #[test]
    fn empty_grid_is_rejected() {
        let err = Grid::<u8>::rectangular(0, 3).unwrap_err();
        assert_eq!(err, TopologyError::Empty { width: 0, height: 3 });
    }

    #[test]
    fn interior_cell_has_four_neighbors() {
        let grid = Grid::<u8>::rectangular(3, 3).unwrap();
        let centre = grid.cell(1, 1).unwrap();
        assert_eq!(centre.neighbor_count(), 4);
        assert_eq!(
            centre.neighbor(Direction::Up),
            Some(grid.cell(1, 0).unwrap().id())
        );
        assert_eq!(
            centre.neighbor(Direction::Right),
            Some(grid.cell(2, 1).unwrap().id())
        );
        assert_eq!(
            centre.neighbor(Direction::Down),
            Some(grid.cell(1, 2).unwrap().id())
        );
        assert_eq!(
            centre.neighbor(Direction::Left),
            Some(grid.cell(0, 1).unwrap().id())
        );
    }

    #[test]
    fn corners_and_edges_do_not_wrap() {
        let grid = Grid::<u8>::rectangular(3, 2).unwrap();
        let corner = grid.cell(0, 0).unwrap();
        assert_eq!(corner.neighbor_count(), 2);
        assert_eq!(corner.neighbor(Direction::Up), None);
        assert_eq!(corner.neighbor(Direction::Left), None);
        assert_eq!(grid.cell(1, 1).unwrap().neighbor_count(), 3);
    }

    #[test]
    fn line_is_a_single_row() {
        let grid = Grid::<u8>::line(5).unwrap();
        assert_eq!((grid.width(), grid.height(), grid.len()), (5, 1, 5));
        assert_eq!(grid.cell(0, 0).unwrap().neighbor_count(), 1);
        assert_eq!(grid.cell(2, 0).unwrap().neighbor_count(), 2);
        assert!(grid.cell(5, 0).is_none());
    }

    #[test]
    fn set_state_out_of_bounds_fails() {
        let grid = Grid::<u8>::line(2).unwrap();
        let err = grid.set_state(2, 0, 1).unwrap_err();
        assert!(matches!(err, TopologyError::OutOfBounds { x: 2, .. }));
    }

    #[test]
    fn render_uses_committed_state() {
        let grid = Grid::<u8>::rectangular(2, 2).unwrap();
        grid.set_state(1, 1, 1).unwrap();
        let rows = grid.render(|v| if *v == 0 { '-' } else { 'X' });
        assert_eq!(rows, vec!["--".to_owned(), "--".to_owned()]);
    }

    #[test]
    fn pair_mut_handles_both_orders() {
        let mut items = [1, 2, 3];
        let (a, b) = pair_mut(&mut items, 2, 0).unwrap();
        assert_eq!((*a, *b), (3, 1));
        assert!(pair_mut(&mut items, 1, 1).is_none());
        assert!(pair_mut(&mut items, 0, 3).is_none());
    }

    #[tokio::test]
    async fn start_registers_every_cell() {
        let mut grid = Grid::<u8>::rectangular(2, 3).unwrap();
        let mut coordinator = TickCoordinator::new(CoordinatorConfig::default());
        grid.start(&mut coordinator, None).unwrap();
        assert_eq!(coordinator.cell_count(), 6);
        assert!(grid.cells().iter().all(Cell::is_running));

        let err = grid.start(&mut coordinator, None).unwrap_err();
        assert!(matches!(err, TopologyError::Wiring { .. }));
        assert_eq!(coordinator.cell_count(), 6);
        grid.stop().await;
    }
}
