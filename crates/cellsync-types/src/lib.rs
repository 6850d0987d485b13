//! Shared type definitions for the Cellsync cellular automaton core.
//!
//! Types defined here are used by the core (cells, links, coordinator) and by
//! anything that drives it: topology builders, automaton rules, and the
//! engine binary.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for cell identity
//! - [`direction`] -- Adjacency directions and their reciprocals
//! - [`observation`] -- Committed state changes published for monitoring

pub mod direction;
pub mod ids;
pub mod observation;

pub use direction::Direction;
pub use ids::CellId;
pub use observation::Observation;

/// Values a cell can hold.
///
/// `Default` is the empty state every cell starts in. `PartialEq` decides
/// whether a pending state differs from the committed one and therefore has
/// to be propagated.
pub trait CellValue: Clone + PartialEq + Default + core::fmt::Debug + Send + Sync + 'static {}

impl<T> CellValue for T where T: Clone + PartialEq + Default + core::fmt::Debug + Send + Sync + 'static
{}
