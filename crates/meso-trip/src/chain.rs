//! Core chain types: `Activity`, `Leg`, `ChainItem`, and `TripChain`.

use meso_core::{NodeId, RoleKind};

use crate::{TripError, TripResult};

// ── Items ─────────────────────────────────────────────────────────────────────

/// A stationary activity at a node.
///
/// `start_ms`/`end_ms` are the *planned* window from the demand model.  The
/// engine re-anchors the window to the tick at which the activity actually
/// begins; only the duration (`end_ms - start_ms`) survives that anchoring.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Activity {
    pub location: NodeId,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl Activity {
    /// Planned duration in milliseconds.
    #[inline]
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// A travel leg executed by one role.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Leg {
    /// Which role plays this leg.  The engine's role factory builds the
    /// matching movement implementation.
    pub role: RoleKind,
    pub origin: NodeId,
    pub destination: NodeId,
    /// Planned leg duration in milliseconds.  Teleported roles
    /// (train/car passenger) sleep exactly this long; on-road roles ignore
    /// it and take however long traffic allows.
    pub duration_ms: u64,
}

/// One entry in a trip chain.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChainItem {
    Activity(Activity),
    Leg(Leg),
}

impl ChainItem {
    /// `true` for activity items.
    #[inline]
    pub fn is_activity(&self) -> bool {
        matches!(self, ChainItem::Activity(_))
    }
}

// ── Chain status ──────────────────────────────────────────────────────────────

/// Result of advancing a trip chain.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChainStatus {
    /// The cursor now points at a valid item.
    Continue,
    /// The chain is exhausted; the person is done for the day.
    Done,
}

// ── TripChain ─────────────────────────────────────────────────────────────────

/// An ordered trip chain with a cursor.
///
/// The cursor starts *before* the first item; the first
/// [`advance`](Self::advance) positions it on item 0.  This mirrors how the
/// engine consumes chains: a freshly loaded person has no current item until
/// dispatch advances the chain once.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TripChain {
    items: Vec<ChainItem>,
    cursor: usize,
    started: bool,
}

impl TripChain {
    /// Construct a chain, validating activity windows.
    ///
    /// # Errors
    /// Returns [`TripError::BadActivityWindow`] if any activity has
    /// `end_ms < start_ms`.
    pub fn new(items: Vec<ChainItem>) -> TripResult<Self> {
        for (i, item) in items.iter().enumerate() {
            if let ChainItem::Activity(act) = item {
                if act.end_ms < act.start_ms {
                    return Err(TripError::BadActivityWindow { item: i });
                }
            }
        }
        Ok(Self {
            items,
            cursor: 0,
            started: false,
        })
    }

    /// A chain with no items; the first `advance` reports `Done`.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
            started: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The item the cursor points at, or `None` before the first `advance`
    /// and after exhaustion.
    pub fn current(&self) -> Option<&ChainItem> {
        if !self.started {
            return None;
        }
        self.items.get(self.cursor)
    }

    /// Move to the next item (or onto the first item for a fresh chain).
    pub fn advance(&mut self) -> ChainStatus {
        if !self.started {
            self.started = true;
        } else {
            self.cursor += 1;
        }
        if self.cursor < self.items.len() {
            ChainStatus::Continue
        } else {
            ChainStatus::Done
        }
    }
}
