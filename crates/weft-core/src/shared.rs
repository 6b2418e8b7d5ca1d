//! Shared text buffer abstraction.
//!
//! The `SharedText` trait is the editor's only view of the replicated
//! buffer. Implementations wrap a CRDT text (see the `weft-crdt` crate) or
//! the in-process [`MemoryText`](crate::memory::MemoryText). Handles are
//! cheap to clone and share one underlying buffer.
//!
//! All offsets are UTF-16 code units.

use std::fmt;
use std::sync::Arc;

use crate::attributes::AttributeMap;
use crate::delta::DeltaInsert;
use crate::error::EditorError;

/// Who a transaction is attributed to.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash)]
pub enum TransactOrigin {
    /// A local edit by this client, captured by undo history.
    Local { client_id: u64 },
    /// A local edit that history capture skips.
    Untracked,
    /// An edit that arrived from another replica.
    Remote { client_id: u64 },
}

impl TransactOrigin {
    pub fn is_local(&self) -> bool {
        !matches!(self, TransactOrigin::Remote { .. })
    }
}

/// Notification delivered after a transaction commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextEvent {
    pub origin: TransactOrigin,
}

/// Change callback. Backends may call it from their own commit path, so it
/// must be `Send + Sync`.
pub type TextObserver = Arc<dyn Fn(&TextEvent) + Send + Sync>;

/// Which neighbour a relative position sticks to.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash)]
pub enum Assoc {
    /// Stick to the character before the position.
    Before,
    /// Stick to the character after the position. Text inserted exactly at
    /// the position pushes it right.
    After,
}

/// A mutable, replicated sequence of formatted text.
pub trait SharedText: Clone + 'static {
    /// Position anchored to buffer content rather than to an offset.
    type RelativePosition: Clone + fmt::Debug + PartialEq;
    /// Keeps an observer registered until dropped.
    type Subscription: 'static;

    /// Whether the buffer belongs to a replication document.
    fn is_attached(&self) -> bool;

    /// The replica id local transactions are attributed to.
    fn client_id(&self) -> Option<u64>;

    /// Length in UTF-16 units.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_string(&self) -> String;

    fn to_delta(&self) -> Vec<DeltaInsert>;

    /// Insert `text` carrying exactly `attributes`. Nothing is inherited
    /// from the neighbouring runs.
    fn insert(
        &self,
        index: usize,
        text: &str,
        attributes: Option<&AttributeMap>,
    ) -> Result<(), EditorError>;

    fn delete(&self, index: usize, len: usize) -> Result<(), EditorError>;

    /// Apply an attribute patch. `Null` values remove the key.
    fn format(&self, index: usize, len: usize, patch: &AttributeMap) -> Result<(), EditorError>;

    /// Run `f` as one atomic unit attributed to `origin`.
    ///
    /// Observers see nothing until the outermost call returns. Nested calls
    /// join the enclosing transaction.
    fn transact<R>(
        &self,
        origin: TransactOrigin,
        f: impl FnOnce(&Self) -> Result<R, EditorError>,
    ) -> Result<R, EditorError>;

    fn observe(&self, callback: TextObserver) -> Self::Subscription;

    /// Anchor `index` to the surrounding content. `None` when out of range.
    fn relative_position(&self, index: usize, assoc: Assoc) -> Option<Self::RelativePosition>;

    /// Current offset of an anchored position.
    fn resolve_relative_position(&self, pos: &Self::RelativePosition) -> Option<usize>;

    /// Append the runs of `deltas` at the end of the buffer.
    fn apply_delta(&self, deltas: &[DeltaInsert]) -> Result<(), EditorError> {
        self.transact(TransactOrigin::Untracked, |text| {
            for delta in deltas.iter().filter(|d| !d.is_empty()) {
                text.insert(text.len(), &delta.insert, delta.attributes.as_ref())?;
            }
            Ok(())
        })
    }
}
