//! Cell identity.
//!
//! Cells are addressed by an opaque handle wrapping a [`Uuid`]. IDs use
//! UUID v7 (time-ordered), so cells created in sequence also sort in
//! creation order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a cell actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(Uuid);

impl CellId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for CellId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = CellId::new();
        let b = CellId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_sort_in_creation_order() {
        let first = CellId::new();
        let second = CellId::new();
        assert!(first < second);
    }

    #[test]
    fn id_serializes_as_plain_uuid() {
        let id = CellId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.into_inner()));
        let back: CellId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
