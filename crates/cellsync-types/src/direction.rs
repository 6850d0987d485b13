//! Adjacency directions.
//!
//! A cell addresses its link tables by [`Direction`]. When one cell
//! introduces itself to another, the other side files the new link under
//! the [`reciprocal`](Direction::recip) direction: if `b` is `a`'s neighbor
//! to the `Down`, then `a` is `b`'s neighbor to the `Up`.

use serde::{Deserialize, Serialize};

/// One of the four adjacency directions of a rectangular grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Towards the previous row.
    Up,
    /// Towards the next column.
    Right,
    /// Towards the next row.
    Down,
    /// Towards the previous column.
    Left,
}

impl Direction {
    /// Every direction, in clockwise order starting at [`Direction::Up`].
    pub const ALL: [Self; 4] = [Self::Up, Self::Right, Self::Down, Self::Left];

    /// Return the opposite direction.
    ///
    /// `recip` is an involution without fixed points:
    /// `d.recip().recip() == d` and `d.recip() != d` for every `d`.
    pub const fn recip(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Right => Self::Left,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
        }
    }

    /// Column and row offset of the neighbor in this direction.
    ///
    /// Rows grow downwards, so `Up` is `(0, -1)`.
    pub const fn offset(self) -> (i64, i64) {
        match self {
            Self::Up => (0, -1),
            Self::Right => (1, 0),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Up => "up",
            Self::Right => "right",
            Self::Down => "down",
            Self::Left => "left",
        };
        f.write_str(name)
    }
}
