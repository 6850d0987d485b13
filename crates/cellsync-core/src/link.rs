//! Neighbor links: directed channels between adjacent cells.
//!
//! One adjacency between cells `a` and `b` is two links, `a -> b` and
//! `b -> a`. Each link has exactly one sending cell and one receiving cell.
//! Links are unbounded so a sender never waits on a slow neighbor.

use std::collections::BTreeMap;

use cellsync_types::Direction;
use tokio::sync::mpsc;

use crate::barrier::PropagationCredit;

/// A committed state travelling from one cell to a neighbor.
#[derive(Debug)]
pub(crate) struct Propagation<S> {
    /// The sender's newly committed state.
    pub(crate) state: S,
    /// Barrier credit taken by the sender, returned by the receiver.
    pub(crate) credit: PropagationCredit,
}

/// Sending half of a neighbor link.
pub(crate) type LinkSender<S> = mpsc::UnboundedSender<Propagation<S>>;

/// Receiving half of a neighbor link.
pub(crate) type LinkReceiver<S> = mpsc::UnboundedReceiver<Propagation<S>>;

/// The endpoints one cell uses to talk to one neighbor.
#[derive(Debug)]
pub(crate) struct LinkEnds<S> {
    /// Carries states to the neighbor.
    pub(crate) to: LinkSender<S>,
    /// Carries states from the neighbor.
    pub(crate) from: LinkReceiver<S>,
}

/// A cell's links, keyed by the direction of the neighbor at the far end.
#[derive(Debug)]
pub(crate) struct LinkTable<S> {
    pub(crate) outgoing: BTreeMap<Direction, LinkSender<S>>,
    pub(crate) incoming: BTreeMap<Direction, LinkReceiver<S>>,
}

impl<S> LinkTable<S> {
    pub(crate) const fn new() -> Self {
        Self {
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
        }
    }

    /// File `ends` as the link pair to the neighbor in `direction`.
    pub(crate) fn insert(&mut self, direction: Direction, ends: LinkEnds<S>) {
        self.outgoing.insert(direction, ends.to);
        self.incoming.insert(direction, ends.from);
    }

    /// Create both links of a new adjacency.
    ///
    /// Returns the ends this side keeps and the ends handed to the neighbor.
    pub(crate) fn open() -> (LinkEnds<S>, LinkEnds<S>) {
        let (to_far, from_near) = mpsc::unbounded_channel();
        let (to_near, from_far) = mpsc::unbounded_channel();
        let near = LinkEnds {
            to: to_far,
            from: from_far,
        };
        let far = LinkEnds {
            to: to_near,
            from: from_near,
        };
        (near, far)
    }
}
