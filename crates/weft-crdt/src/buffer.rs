//! Loro-backed shared text.

use std::borrow::Cow;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use loro::cursor::{Cursor, PosType, Side};
use loro::event::DiffEvent;
use loro::{
    ContainerTrait, EventTriggerKind, ExpandType, ExportMode, Frontiers, LoroDoc, LoroText,
    LoroValue, StyleConfig, TextDelta, UndoManager, VersionVector,
};
use smol_str::{SmolStr, format_smolstr};
use weft_core::{
    Assoc, AttributeMap, AttributeValue, DeltaInsert, EditorError, InlineRange, SharedText,
    TextEvent, TextObserver, TransactOrigin,
};

use crate::CrdtError;

/// Container name the editor text lives under.
pub const TEXT_CONTAINER: &str = "content";

/// Commit origin labels.
///
/// Loro records a free-form origin string per commit. Transactions are
/// labelled `"{local}:{client}"`, `"{untracked}"` or `"{remote}:{client}"`
/// so observers can classify them again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoroOrigins {
    pub local: SmolStr,
    pub untracked: SmolStr,
    pub remote: SmolStr,
}

impl Default for LoroOrigins {
    fn default() -> Self {
        Self {
            local: SmolStr::new_static("weft:local"),
            untracked: SmolStr::new_static("weft:untracked"),
            remote: SmolStr::new_static("weft:remote"),
        }
    }
}

impl LoroOrigins {
    pub fn label(&self, origin: TransactOrigin) -> SmolStr {
        match origin {
            TransactOrigin::Local { client_id } => format_smolstr!("{}:{}", self.local, client_id),
            TransactOrigin::Untracked => self.untracked.clone(),
            TransactOrigin::Remote { client_id } => {
                format_smolstr!("{}:{}", self.remote, client_id)
            }
        }
    }

    /// Classify a commit. Unlabelled imports count as remote, unlabelled
    /// local commits are attributed to `peer`.
    pub fn parse(&self, label: &str, imported: bool, peer: u64) -> TransactOrigin {
        let client = |prefix: &str| {
            label
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix(':'))
                .and_then(|id| id.parse::<u64>().ok())
        };
        if label.starts_with(self.untracked.as_str()) {
            return TransactOrigin::Untracked;
        }
        if label.starts_with(self.remote.as_str()) || imported {
            return TransactOrigin::Remote {
                client_id: client(&self.remote).unwrap_or_default(),
            };
        }
        TransactOrigin::Local {
            client_id: client(&self.local).unwrap_or(peer),
        }
    }
}

/// [`SharedText`] over a `LoroText` container.
///
/// Clones share the document and the open-transaction depth. Two handles
/// built separately over the same `LoroDoc` do not share the depth, so
/// nesting only works through one handle family.
#[derive(Clone)]
pub struct LoroSharedText {
    doc: LoroDoc,
    text: LoroText,
    origins: LoroOrigins,
    depth: Rc<Cell<usize>>,
}

impl std::fmt::Debug for LoroSharedText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoroSharedText")
            .field("peer", &self.doc.peer_id())
            .field("attached", &self.text.is_attached())
            .field("len", &self.text.len_utf16())
            .finish()
    }
}

impl LoroSharedText {
    /// Create a buffer in a fresh document.
    pub fn new() -> Self {
        Self::from_doc(LoroDoc::new())
    }

    /// Bind to the editor text of an existing document.
    pub fn from_doc(doc: LoroDoc) -> Self {
        // Marks never grow over text typed at their edges.
        doc.config_default_text_style(Some(StyleConfig {
            expand: ExpandType::None,
        }));
        let text = doc.get_text(TEXT_CONTAINER);
        Self {
            doc,
            text,
            origins: LoroOrigins::default(),
            depth: Rc::new(Cell::new(0)),
        }
    }

    /// A text container outside any document. Editors refuse it.
    pub fn detached() -> Self {
        Self {
            doc: LoroDoc::new(),
            text: LoroText::new(),
            origins: LoroOrigins::default(),
            depth: Rc::new(Cell::new(0)),
        }
    }

    /// Create a buffer from an exported snapshot.
    pub fn from_snapshot(snapshot: &[u8]) -> Result<Self, CrdtError> {
        let doc = LoroDoc::new();
        doc.import(snapshot)
            .map_err(|e| CrdtError::Import(e.to_string()))?;
        Ok(Self::from_doc(doc))
    }

    pub fn with_origins(mut self, origins: LoroOrigins) -> Self {
        self.origins = origins;
        self
    }

    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn content(&self) -> &LoroText {
        &self.text
    }

    pub fn origins(&self) -> &LoroOrigins {
        &self.origins
    }

    /// Export full snapshot.
    pub fn export_snapshot(&self) -> Result<Vec<u8>, CrdtError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    /// Export updates since given version. `None` when there is nothing new.
    pub fn export_updates_since(&self, version: &VersionVector) -> Option<Vec<u8>> {
        let current_vv = self.doc.oplog_vv();
        if *version == current_vv {
            return None;
        }

        let updates = self
            .doc
            .export(ExportMode::Updates {
                from: Cow::Owned(version.clone()),
            })
            .ok()?;

        if updates.is_empty() {
            return None;
        }
        Some(updates)
    }

    /// Import changes from another replica. Observers see a remote origin.
    pub fn import(&self, data: &[u8]) -> Result<(), CrdtError> {
        self.doc
            .import_with(data, &self.origins.remote)
            .map_err(|e| CrdtError::Import(e.to_string()))?;
        Ok(())
    }

    /// Get current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    /// Undo manager that skips untracked transactions.
    pub fn undo_manager(&self) -> UndoManager {
        let mut undo = UndoManager::new(&self.doc);
        undo.add_exclude_origin_prefix(&self.origins.untracked);
        undo
    }

    fn local_origin(&self) -> TransactOrigin {
        TransactOrigin::Local {
            client_id: self.doc.peer_id(),
        }
    }

    fn in_transaction(&self) -> bool {
        self.depth.get() > 0
    }

    fn invalid(&self, index: usize, len: usize) -> EditorError {
        EditorError::InvalidRange {
            range: InlineRange::new(index, len),
            len: self.text.len_utf16(),
        }
    }

    /// Unicode position of a UTF-16 offset. Offsets inside a surrogate pair
    /// have no unicode position and are rejected.
    fn to_unicode(&self, index: usize) -> Option<usize> {
        let len = self.text.len_utf16();
        if index > len {
            return None;
        }
        if index == len {
            return Some(self.text.len_unicode());
        }
        let pos = self
            .text
            .convert_pos(index, PosType::Utf16, PosType::Unicode)?;
        let back = self
            .text
            .convert_pos(pos, PosType::Unicode, PosType::Utf16)?;
        (back == index).then_some(pos)
    }

    fn to_utf16(&self, pos: usize) -> usize {
        if pos >= self.text.len_unicode() {
            return self.text.len_utf16();
        }
        self.text
            .convert_pos(pos, PosType::Unicode, PosType::Utf16)
            .unwrap_or(self.text.len_utf16())
    }

    fn unicode_range(&self, index: usize, len: usize) -> Result<(usize, usize), EditorError> {
        let start = self
            .to_unicode(index)
            .ok_or_else(|| self.invalid(index, len))?;
        let end = self
            .to_unicode(index + len)
            .ok_or_else(|| self.invalid(index, len))?;
        Ok((start, end))
    }

    fn apply_patch(&self, start: usize, end: usize, patch: &AttributeMap) -> Result<(), CrdtError> {
        for (key, value) in patch {
            match to_loro_value(value) {
                Some(value) => self.text.mark(start..end, key, value)?,
                None => self.text.unmark(start..end, key)?,
            }
        }
        Ok(())
    }

    /// Mark keys present anywhere in the unicode range `start..end`.
    fn mark_keys(&self, start: usize, end: usize) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let mut offset = 0;
        for delta in self.text.to_delta() {
            if offset >= end {
                break;
            }
            let TextDelta::Insert { insert, attributes } = delta else {
                continue;
            };
            let run_end = offset + insert.chars().count();
            if run_end > start {
                for key in attributes.into_iter().flat_map(|a| a.into_keys()) {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
            }
            offset = run_end;
        }
        keys
    }

    fn commit(&self, origin: &str) {
        self.doc.set_next_commit_origin(origin);
        self.doc.commit();
    }

    fn roll_back(&self, before: &Frontiers) {
        self.commit(&self.origins.untracked);
        if self.doc.state_frontiers() == *before {
            return;
        }
        if let Err(e) = self.doc.revert_to(before) {
            tracing::warn!("failed to revert aborted transaction: {}", e);
        }
        self.commit(&self.origins.untracked);
    }
}

impl Default for LoroSharedText {
    fn default() -> Self {
        Self::new()
    }
}

fn to_loro_value(value: &AttributeValue) -> Option<LoroValue> {
    match value {
        AttributeValue::Bool(b) => Some(LoroValue::from(*b)),
        AttributeValue::Int(i) => Some(LoroValue::from(*i)),
        AttributeValue::Str(s) => Some(LoroValue::from(s.as_str())),
        AttributeValue::Null => None,
    }
}

fn from_loro_value(value: &LoroValue) -> Option<AttributeValue> {
    match value {
        LoroValue::Bool(b) => Some(AttributeValue::Bool(*b)),
        LoroValue::I64(i) => Some(AttributeValue::Int(*i)),
        LoroValue::Double(d) if d.fract() == 0.0 => Some(AttributeValue::Int(*d as i64)),
        LoroValue::String(s) => Some(AttributeValue::Str(SmolStr::new(s.as_str()))),
        other => {
            tracing::debug!("dropping unsupported mark value {:?}", other);
            None
        }
    }
}

impl SharedText for LoroSharedText {
    type RelativePosition = Cursor;
    type Subscription = loro::Subscription;

    fn is_attached(&self) -> bool {
        self.text.is_attached()
    }

    fn client_id(&self) -> Option<u64> {
        self.is_attached().then(|| self.doc.peer_id())
    }

    fn len(&self) -> usize {
        self.text.len_utf16()
    }

    fn to_string(&self) -> String {
        self.text.to_string()
    }

    fn to_delta(&self) -> Vec<DeltaInsert> {
        let mut deltas: Vec<DeltaInsert> = Vec::new();
        for delta in self.text.to_delta() {
            let TextDelta::Insert { insert, attributes } = delta else {
                continue;
            };
            let attributes: Option<AttributeMap> = attributes
                .map(|attrs| {
                    attrs
                        .iter()
                        .filter_map(|(k, v)| Some((SmolStr::new(k), from_loro_value(v)?)))
                        .collect::<AttributeMap>()
                })
                .filter(|attrs| !attrs.is_empty());
            match deltas.last_mut() {
                Some(last) if last.attributes == attributes => last.insert.push_str(&insert),
                _ => deltas.push(DeltaInsert::new(insert, attributes)),
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
        let pos = self
            .to_unicode(index)
            .ok_or_else(|| self.invalid(index, 0))?;
        if text.is_empty() {
            return Ok(());
        }
        let end = pos + text.chars().count();
        self.text.insert(pos, text).map_err(CrdtError::from)?;
        // Text typed inside a marked run picks up its marks.
        for key in self.mark_keys(pos, end) {
            if !attributes.is_some_and(|a| a.contains_key(key.as_str())) {
                self.text.unmark(pos..end, &key).map_err(CrdtError::from)?;
            }
        }
        if let Some(attributes) = attributes {
            self.apply_patch(pos, end, attributes)?;
        }
        Ok(())
    }

    fn delete(&self, index: usize, len: usize) -> Result<(), EditorError> {
        if !self.in_transaction() {
            return self.transact(self.local_origin(), |t| t.delete(index, len));
        }
        let (start, end) = self.unicode_range(index, len)?;
        if start == end {
            return Ok(());
        }
        self.text
            .delete(start, end - start)
            .map_err(CrdtError::from)?;
        Ok(())
    }

    fn format(&self, index: usize, len: usize, patch: &AttributeMap) -> Result<(), EditorError> {
        if !self.in_transaction() {
            return self.transact(self.local_origin(), |t| t.format(index, len, patch));
        }
        let (start, end) = self.unicode_range(index, len)?;
        if start == end || patch.is_empty() {
            return Ok(());
        }
        self.apply_patch(start, end, patch)?;
        Ok(())
    }

    fn transact<R>(
        &self,
        origin: TransactOrigin,
        f: impl FnOnce(&Self) -> Result<R, EditorError>,
    ) -> Result<R, EditorError> {
        let depth = self.depth.get();
        if depth > 0 {
            self.depth.set(depth + 1);
            let result = f(self);
            self.depth.set(depth);
            return result;
        }

        // Anything left pending by direct container access is not ours.
        self.commit(&self.origins.untracked);
        let before = self.doc.state_frontiers();

        self.depth.set(1);
        let result = f(self);
        self.depth.set(0);

        match &result {
            Ok(_) => self.commit(&self.origins.label(origin)),
            Err(e) => {
                tracing::debug!(?origin, "rolling back failed transaction: {}", e);
                self.roll_back(&before);
            }
        }
        result
    }

    fn observe(&self, callback: TextObserver) -> loro::Subscription {
        let origins = self.origins.clone();
        let peer = self.doc.peer_id();
        self.doc.subscribe(
            &self.text.id(),
            Arc::new(move |event: DiffEvent| {
                let imported = matches!(event.triggered_by, EventTriggerKind::Import);
                let origin = origins.parse(event.origin, imported, peer);
                callback(&TextEvent { origin });
            }),
        )
    }

    fn relative_position(&self, index: usize, assoc: Assoc) -> Option<Cursor> {
        let pos = self.to_unicode(index)?;
        match assoc {
            Assoc::After => self.text.get_cursor(pos, Side::Middle),
            Assoc::Before if pos > 0 => self.text.get_cursor(pos - 1, Side::Right),
            Assoc::Before => self.text.get_cursor(pos, Side::Left),
        }
    }

    fn resolve_relative_position(&self, pos: &Cursor) -> Option<usize> {
        let result = self.doc.get_cursor_pos(pos).ok()?;
        Some(self.to_utf16(result.current.pos))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use weft_core::attributes;

    use super::*;

    fn text_with_peer(peer: u64) -> LoroSharedText {
        let doc = LoroDoc::new();
        doc.set_peer_id(peer).unwrap();
        LoroSharedText::from_doc(doc)
    }

    #[test]
    fn test_basic_operations() {
        let text = LoroSharedText::new();

        text.insert(0, "Hello", None).unwrap();
        assert_eq!(text.to_string(), "Hello");

        text.insert(5, " World", None).unwrap();
        assert_eq!(text.to_string(), "Hello World");

        text.delete(5, 1).unwrap();
        assert_eq!(text.to_string(), "HelloWorld");
    }

    #[test]
    fn test_utf16_offsets() {
        let text = LoroSharedText::new();
        text.insert(0, "a😀b", None).unwrap();
        assert_eq!(text.len(), 4);

        text.insert(3, "!", None).unwrap();
        assert_eq!(text.to_string(), "a😀!b");

        // Inside the surrogate pair.
        assert!(matches!(
            text.insert(2, "x", None),
            Err(EditorError::InvalidRange { .. })
        ));
        assert!(text.delete(0, 9).is_err());
        assert_eq!(text.to_string(), "a😀!b");
    }

    #[test]
    fn test_format_and_delta() {
        let text = LoroSharedText::new();
        text.insert(0, "Hello World", None).unwrap();
        text.format(0, 5, &attributes([("bold", true)])).unwrap();

        assert_eq!(
            text.to_delta(),
            vec![
                DeltaInsert::new("Hello", Some(attributes([("bold", true)]))),
                DeltaInsert::plain(" World"),
            ]
        );

        let mut unset = AttributeMap::new();
        unset.insert(SmolStr::new("bold"), AttributeValue::Null);
        text.format(0, 5, &unset).unwrap();
        assert_eq!(text.to_delta(), vec![DeltaInsert::plain("Hello World")]);
    }

    #[test]
    fn test_insert_does_not_inherit_marks() {
        let text = LoroSharedText::new();
        text.insert(0, "ab", Some(&attributes([("italic", true)])))
            .unwrap();
        text.insert(2, "c", None).unwrap();
        text.insert(0, "z", None).unwrap();

        assert_eq!(
            text.to_delta(),
            vec![
                DeltaInsert::plain("z"),
                DeltaInsert::new("ab", Some(attributes([("italic", true)]))),
                DeltaInsert::plain("c"),
            ]
        );
    }

    #[test]
    fn test_insert_inside_run_does_not_inherit_marks() {
        let bold = attributes([("bold", true)]);
        let text = LoroSharedText::new();
        text.insert(0, "abcd", Some(&bold)).unwrap();
        text.insert(2, "x", None).unwrap();

        assert_eq!(
            text.to_delta(),
            vec![
                DeltaInsert::new("ab", Some(bold.clone())),
                DeltaInsert::plain("x"),
                DeltaInsert::new("cd", Some(bold.clone())),
            ]
        );

        text.insert(1, "y", Some(&attributes([("italic", true)])))
            .unwrap();
        assert_eq!(
            text.to_delta()[..2],
            [
                DeltaInsert::new("a", Some(bold.clone())),
                DeltaInsert::new("y", Some(attributes([("italic", true)]))),
            ]
        );

        text.insert(5, "z", Some(&bold)).unwrap();
        assert_eq!(text.to_delta()[4..], [DeltaInsert::new("czd", Some(bold))]);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let text = LoroSharedText::new();
        text.insert(0, "keep", None).unwrap();

        let result = text.transact(TransactOrigin::Local { client_id: 1 }, |t| {
            t.insert(4, " me", None)?;
            t.delete(0, 100)
        });
        assert!(result.is_err());
        assert_eq!(text.to_string(), "keep");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let text = LoroSharedText::new();
        text.insert(0, "Test content", Some(&attributes([("code", true)])))
            .unwrap();

        let snapshot = text.export_snapshot().unwrap();
        let restored = LoroSharedText::from_snapshot(&snapshot).unwrap();

        assert_eq!(restored.to_string(), "Test content");
        assert_eq!(restored.to_delta(), text.to_delta());
    }

    #[test]
    fn test_cursor_survives_remote_insert() {
        let a = text_with_peer(1);
        a.insert(0, "hello", None).unwrap();
        let cursor = a.relative_position(2, Assoc::After).unwrap();

        let b = LoroSharedText::from_snapshot(&a.export_snapshot().unwrap()).unwrap();
        b.doc().set_peer_id(2).unwrap();
        let before = b.version();
        b.insert(0, "XX", None).unwrap();

        let updates = b.export_updates_since(&before).unwrap();
        a.import(&updates).unwrap();

        assert_eq!(a.to_string(), "XXhello");
        assert_eq!(a.resolve_relative_position(&cursor), Some(4));
        assert!(a.export_updates_since(&a.version()).is_none());
    }

    #[test]
    fn test_observer_sees_origins() {
        let a = text_with_peer(7);
        let seen: Arc<Mutex<Vec<TransactOrigin>>> = Arc::default();
        let sink = seen.clone();
        let _sub = a.observe(Arc::new(move |event: &TextEvent| {
            sink.lock().unwrap().push(event.origin);
        }));

        a.insert(0, "local", None).unwrap();
        a.transact(TransactOrigin::Untracked, |t| t.insert(0, "quiet ", None))
            .unwrap();

        let b = text_with_peer(8);
        b.insert(0, "far ", None).unwrap();
        a.import(&b.export_snapshot().unwrap()).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                TransactOrigin::Local { client_id: 7 },
                TransactOrigin::Untracked,
                TransactOrigin::Remote { client_id: 0 },
            ]
        );
    }

    #[test]
    fn test_origin_labels_parse_back() {
        let origins = LoroOrigins::default();
        for origin in [
            TransactOrigin::Local { client_id: 3 },
            TransactOrigin::Untracked,
            TransactOrigin::Remote { client_id: 12 },
        ] {
            assert_eq!(origins.parse(&origins.label(origin), false, 99), origin);
        }
        assert_eq!(
            origins.parse("", false, 99),
            TransactOrigin::Local { client_id: 99 }
        );
    }

    #[test]
    fn test_detached_text() {
        let text = LoroSharedText::detached();
        assert!(!text.is_attached());
        assert_eq!(text.client_id(), None);
    }
}
