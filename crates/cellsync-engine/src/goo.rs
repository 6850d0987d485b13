//! The goo rule: a cell is either clean or covered in goo, and goo spreads
//! to every adjacent cell one tick at a time.
//!
//! The cell actor already spreads whatever it commits, so the rule needs no
//! transition logic of its own. Seeding a cell with [`Goo::Gooed`] before a
//! tick is all it takes.

use serde::Serialize;

/// State of one goo cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Goo {
    /// Not (yet) covered in goo.
    #[default]
    Clean,
    /// Covered in goo.
    Gooed,
}

impl Goo {
    /// Single-character rendering: `-` clean, `X` gooed.
    pub const fn glyph(self) -> char {
        match self {
            Self::Clean => '-',
            Self::Gooed => 'X',
        }
    }
}
