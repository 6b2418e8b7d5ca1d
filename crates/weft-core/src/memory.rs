//! In-process shared text.
//!
//! `MemoryText` keeps one item per character. Each item has a stable
//! `(client, clock)` id and deletions leave tombstones, so relative positions
//! keep resolving after the text around them changes. Every committed
//! transaction is appended to an inspectable log.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use crate::attributes::{AttributeMap, AttributeValue};
use crate::delta::DeltaInsert;
use crate::error::EditorError;
use crate::shared::{Assoc, SharedText, TextEvent, TextObserver, TransactOrigin};
use crate::types::InlineRange;

/// Stable identity of one character.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    pub client: u64,
    pub clock: u64,
}

#[derive(Clone, Debug)]
struct Item {
    id: ItemId,
    ch: char,
    attributes: Option<AttributeMap>,
    deleted: bool,
}

impl Item {
    fn visible_len(&self) -> usize {
        if self.deleted { 0 } else { self.ch.len_utf16() }
    }
}

/// One operation inside a committed transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum TextOp {
    Insert {
        index: usize,
        text: String,
        attributes: Option<AttributeMap>,
    },
    Delete {
        index: usize,
        len: usize,
    },
    Format {
        index: usize,
        len: usize,
        patch: AttributeMap,
    },
}

/// A committed transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionRecord {
    pub origin: TransactOrigin,
    pub ops: Vec<TextOp>,
}

/// Anchor into a [`MemoryText`].
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryPosition {
    item: Option<ItemId>,
    assoc: Assoc,
}

struct Pending {
    origin: TransactOrigin,
    ops: Vec<TextOp>,
    snapshot: Vec<Item>,
}

struct TextState {
    client_id: Option<u64>,
    items: Vec<Item>,
    clocks: BTreeMap<u64, u64>,
    depth: usize,
    pending: Option<Pending>,
    log: Vec<TransactionRecord>,
    observers: Vec<(u64, TextObserver)>,
    next_observer: u64,
}

impl TextState {
    fn len(&self) -> usize {
        self.items.iter().map(Item::visible_len).sum()
    }

    /// Vector position of the visible item starting at `offset`, or the end
    /// of the vector when `offset` is the text length.
    fn locate(&self, offset: usize) -> Option<usize> {
        let mut units = 0;
        for (pos, item) in self.items.iter().enumerate() {
            if item.deleted {
                continue;
            }
            if units == offset {
                return Some(pos);
            }
            units += item.visible_len();
            if units > offset {
                return None;
            }
        }
        (units == offset).then_some(self.items.len())
    }

    /// Vector positions covering `[index, index + len)`.
    fn locate_range(&self, index: usize, len: usize) -> Result<(usize, usize), EditorError> {
        let invalid = || EditorError::InvalidRange {
            range: InlineRange::new(index, len),
            len: self.len(),
        };
        let start = self.locate(index).ok_or_else(invalid)?;
        let end = self.locate(index + len).ok_or_else(invalid)?;
        Ok((start, end))
    }

    fn visible_before(&self, pos: usize) -> usize {
        self.items[..pos].iter().map(Item::visible_len).sum()
    }

    fn position_of(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn next_id(&mut self, client: u64) -> ItemId {
        let clock = self.clocks.entry(client).or_insert(0);
        let id = ItemId {
            client,
            clock: *clock,
        };
        *clock += 1;
        id
    }

    fn record(&mut self, op: TextOp) {
        if let Some(pending) = self.pending.as_mut() {
            pending.ops.push(op);
        }
    }

    fn author(&self) -> u64 {
        match self.pending.as_ref().map(|p| p.origin) {
            Some(TransactOrigin::Local { client_id }) | Some(TransactOrigin::Remote { client_id }) => {
                client_id
            }
            _ => self.client_id.unwrap_or_default(),
        }
    }
}

/// In-memory [`SharedText`] handle.
#[derive(Clone)]
pub struct MemoryText {
    state: Rc<RefCell<TextState>>,
}

impl std::fmt::Debug for MemoryText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("MemoryText")
            .field("client_id", &state.client_id)
            .field("len", &state.len())
            .finish()
    }
}

impl MemoryText {
    fn with_client(client_id: Option<u64>) -> Self {
        Self {
            state: Rc::new(RefCell::new(TextState {
                client_id,
                items: Vec::new(),
                clocks: BTreeMap::new(),
                depth: 0,
                pending: None,
                log: Vec::new(),
                observers: Vec::new(),
                next_observer: 0,
            })),
        }
    }

    /// A text that belongs to no document. Editors refuse it.
    pub fn detached() -> Self {
        Self::with_client(None)
    }

    /// Committed transactions, oldest first.
    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.state.borrow().log.clone()
    }

    pub fn clear_transactions(&self) {
        self.state.borrow_mut().log.clear();
    }

    /// Apply `f` as an edit arriving from replica `client_id`.
    pub fn apply_remote<R>(
        &self,
        client_id: u64,
        f: impl FnOnce(&Self) -> Result<R, EditorError>,
    ) -> Result<R, EditorError> {
        self.transact(TransactOrigin::Remote { client_id }, f)
    }

    fn local_origin(&self) -> TransactOrigin {
        match self.state.borrow().client_id {
            Some(client_id) => TransactOrigin::Local { client_id },
            None => TransactOrigin::Untracked,
        }
    }

    fn in_transaction(&self) -> bool {
        self.state.borrow().depth > 0
    }
}

impl SharedText for MemoryText {
    type RelativePosition = MemoryPosition;
    type Subscription = MemorySubscription;

    fn is_attached(&self) -> bool {
        self.state.borrow().client_id.is_some()
    }

    fn client_id(&self) -> Option<u64> {
        self.state.borrow().client_id
    }

    fn len(&self) -> usize {
        self.state.borrow().len()
    }

    fn to_string(&self) -> String {
        self.state
            .borrow()
            .items
            .iter()
            .filter(|item| !item.deleted)
            .map(|item| item.ch)
            .collect()
    }

    fn to_delta(&self) -> Vec<DeltaInsert> {
        let state = self.state.borrow();
        let mut deltas: Vec<DeltaInsert> = Vec::new();
        for item in state.items.iter().filter(|item| !item.deleted) {
            match deltas.last_mut() {
                Some(last) if last.attributes == item.attributes => last.insert.push(item.ch),
                _ => deltas.push(DeltaInsert::new(item.ch, item.attributes.clone())),
            }
        }
        deltas
    }

    fn insert(
        &self,
        index: usize,
        text: &str,
        attributes: Option<&AttributeMap>,
    ) -> Result<(), EditorError> {
        if !self.in_transaction() {
            return self.transact(self.local_origin(), |t| t.insert(index, text, attributes));
        }
        let mut state = self.state.borrow_mut();
        let pos = state.locate_range(index, 0)?.0;
        let attributes = attributes.filter(|a| !a.is_empty()).cloned();
        let client = state.author();
        let items: Vec<Item> = text
            .chars()
            .map(|ch| Item {
                id: state.next_id(client),
                ch,
                attributes: attributes.clone(),
                deleted: false,
            })
            .collect();
        state.items.splice(pos..pos, items);
        state.record(TextOp::Insert {
            index,
            text: text.to_string(),
            attributes,
        });
        Ok(())
    }

    fn delete(&self, index: usize, len: usize) -> Result<(), EditorError> {
        if !self.in_transaction() {
            return self.transact(self.local_origin(), |t| t.delete(index, len));
        }
        let mut state = self.state.borrow_mut();
        let (start, end) = state.locate_range(index, len)?;
        if len == 0 {
            return Ok(());
        }
        for item in &mut state.items[start..end] {
            item.deleted = true;
        }
        state.record(TextOp::Delete { index, len });
        Ok(())
    }

    fn format(&self, index: usize, len: usize, patch: &AttributeMap) -> Result<(), EditorError> {
        if !self.in_transaction() {
            return self.transact(self.local_origin(), |t| t.format(index, len, patch));
        }
        let mut state = self.state.borrow_mut();
        let (start, end) = state.locate_range(index, len)?;
        if len == 0 || patch.is_empty() {
            return Ok(());
        }
        for item in state.items[start..end].iter_mut().filter(|i| !i.deleted) {
            let mut attrs = item.attributes.take().unwrap_or_default();
            for (key, value) in patch {
                match value {
                    AttributeValue::Null => {
                        attrs.remove(key);
                    }
                    value => {
                        attrs.insert(key.clone(), value.clone());
                    }
                }
            }
            item.attributes = if attrs.is_empty() { None } else { Some(attrs) };
        }
        state.record(TextOp::Format {
            index,
            len,
            patch: patch.clone(),
        });
        Ok(())
    }

    fn transact<R>(
        &self,
        origin: TransactOrigin,
        f: impl FnOnce(&Self) -> Result<R, EditorError>,
    ) -> Result<R, EditorError> {
        {
            let mut state = self.state.borrow_mut();
            if state.depth == 0 {
                let snapshot = state.items.clone();
                state.pending = Some(Pending {
                    origin,
                    ops: Vec::new(),
                    snapshot,
                });
            }
            state.depth += 1;
        }

        let result = f(self);

        let (event, observers) = {
            let mut state = self.state.borrow_mut();
            state.depth -= 1;
            if state.depth > 0 {
                return result;
            }
            let Some(pending) = state.pending.take() else {
                return result;
            };
            if result.is_err() {
                tracing::debug!(origin = ?pending.origin, "rolling back failed transaction");
                state.items = pending.snapshot;
                return result;
            }
            if pending.ops.is_empty() {
                return result;
            }
            let event = TextEvent {
                origin: pending.origin,
            };
            state.log.push(TransactionRecord {
                origin: pending.origin,
                ops: pending.ops,
            });
            let observers: Vec<TextObserver> =
                state.observers.iter().map(|(_, cb)| cb.clone()).collect();
            (event, observers)
        };

        for observer in observers {
            observer(&event);
        }
        result
    }

    fn observe(&self, callback: TextObserver) -> MemorySubscription {
        let mut state = self.state.borrow_mut();
        let id = state.next_observer;
        state.next_observer += 1;
        state.observers.push((id, callback));
        MemorySubscription {
            state: Rc::downgrade(&self.state),
            id,
        }
    }

    fn relative_position(&self, index: usize, assoc: Assoc) -> Option<MemoryPosition> {
        let state = self.state.borrow();
        let pos = state.locate(index)?;
        let item = match assoc {
            Assoc::After => state.items.get(pos).map(|item| item.id),
            Assoc::Before => state.items[..pos]
                .iter()
                .rev()
                .find(|item| !item.deleted)
                .map(|item| item.id),
        };
        Some(MemoryPosition { item, assoc })
    }

    fn resolve_relative_position(&self, pos: &MemoryPosition) -> Option<usize> {
        let state = self.state.borrow();
        match (pos.item, pos.assoc) {
            (None, Assoc::After) => Some(state.len()),
            (None, Assoc::Before) => Some(0),
            (Some(id), Assoc::After) => state.position_of(id).map(|p| state.visible_before(p)),
            (Some(id), Assoc::Before) => {
                state.position_of(id).map(|p| state.visible_before(p + 1))
            }
        }
    }
}

/// Unregisters its observer when dropped.
pub struct MemorySubscription {
    state: Weak<RefCell<TextState>>,
    id: u64,
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            if let Ok(mut state) = state.try_borrow_mut() {
                state.observers.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// A replication document that hands out attached texts.
#[derive(Clone, Debug)]
pub struct MemoryDoc {
    client_id: u64,
}

impl MemoryDoc {
    pub fn new(client_id: u64) -> Self {
        Self { client_id }
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// A new empty text owned by this document.
    pub fn text(&self) -> MemoryText {
        MemoryText::with_client(Some(self.client_id))
    }

    /// A new text holding `content`, with no transaction logged.
    pub fn text_with(&self, content: &[DeltaInsert]) -> Result<MemoryText, EditorError> {
        let text = self.text();
        text.apply_delta(content)?;
        text.clear_transactions();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::attributes;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text(content: &str) -> MemoryText {
        MemoryDoc::new(1)
            .text_with(&[DeltaInsert::plain(content)])
            .unwrap()
    }

    #[test]
    fn test_basic_operations() {
        let t = text("hello world");
        assert_eq!(t.len(), 11);
        t.insert(5, " beautiful", None).unwrap();
        assert_eq!(t.to_string(), "hello beautiful world");
        t.delete(5, 10).unwrap();
        assert_eq!(t.to_string(), "hello world");
        assert_eq!(t.transactions().len(), 2);
    }

    #[test]
    fn test_format_merges_and_removes() {
        let t = text("Hello World");
        t.format(0, 5, &attributes([("bold", true)])).unwrap();
        assert_eq!(
            t.to_delta(),
            vec![
                DeltaInsert::new("Hello", Some(attributes([("bold", true)]))),
                DeltaInsert::plain(" World"),
            ]
        );
        t.format(0, 11, &attributes([("bold", AttributeValue::Null)]))
            .unwrap();
        assert_eq!(t.to_delta(), vec![DeltaInsert::plain("Hello World")]);
    }

    #[test]
    fn test_insert_does_not_inherit() {
        let t = text("ab");
        t.format(0, 2, &attributes([("bold", true)])).unwrap();
        t.insert(1, "x", None).unwrap();
        assert_eq!(t.to_delta().len(), 3);
    }

    #[test]
    fn test_invalid_ranges() {
        let t = text("a😀");
        assert!(matches!(
            t.insert(4, "x", None),
            Err(EditorError::InvalidRange { .. })
        ));
        // Inside the surrogate pair.
        assert!(t.insert(2, "x", None).is_err());
        assert!(t.delete(1, 1).is_err());
        assert!(t.delete(1, 2).is_ok());
        assert_eq!(t.to_string(), "a");
    }

    #[test]
    fn test_transaction_is_atomic_and_rolls_back() {
        let t = text("abc");
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let _sub = t.observe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        t.transact(TransactOrigin::Local { client_id: 1 }, |t| {
            t.delete(0, 1)?;
            t.insert(0, "X", None)?;
            t.transact(TransactOrigin::Untracked, |t| t.insert(3, "!", None))
        })
        .unwrap();
        assert_eq!(t.to_string(), "Xbc!");
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(t.transactions().last().unwrap().ops.len(), 3);

        let result = t.transact(TransactOrigin::Local { client_id: 1 }, |t| {
            t.insert(0, "lost", None)?;
            t.delete(100, 1)
        });
        assert!(result.is_err());
        assert_eq!(t.to_string(), "Xbc!");
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_drop_unregisters() {
        let t = text("");
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let sub = t.observe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        t.insert(0, "a", None).unwrap();
        drop(sub);
        t.insert(0, "b", None).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_relative_positions_survive_edits() {
        let t = text("hello");
        let after = t.relative_position(2, Assoc::After).unwrap();
        let before = t.relative_position(2, Assoc::Before).unwrap();
        let end = t.relative_position(5, Assoc::After).unwrap();

        t.apply_remote(2, |t| t.insert(0, ">>", None)).unwrap();
        assert_eq!(t.resolve_relative_position(&after), Some(4));
        assert_eq!(t.resolve_relative_position(&before), Some(4));
        assert_eq!(t.resolve_relative_position(&end), Some(7));

        // Insert exactly at the position.
        t.insert(4, "_", None).unwrap();
        assert_eq!(t.resolve_relative_position(&after), Some(5));
        assert_eq!(t.resolve_relative_position(&before), Some(4));

        // Delete the anchor character.
        t.delete(5, 1).unwrap();
        assert_eq!(t.to_string(), ">>he_lo");
        assert_eq!(t.resolve_relative_position(&after), Some(5));
    }

    #[test]
    fn test_remote_origin_is_logged() {
        let t = text("");
        t.apply_remote(7, |t| t.insert(0, "x", None)).unwrap();
        assert_eq!(
            t.transactions(),
            vec![TransactionRecord {
                origin: TransactOrigin::Remote { client_id: 7 },
                ops: vec![TextOp::Insert {
                    index: 0,
                    text: "x".into(),
                    attributes: None,
                }],
            }]
        );
    }

    #[test]
    fn test_detached() {
        let t = MemoryText::detached();
        assert!(!t.is_attached());
        assert!(MemoryDoc::new(3).text().is_attached());
    }
}
