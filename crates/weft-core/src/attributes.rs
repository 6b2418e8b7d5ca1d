//! Attribute schema, normalization and pending marks.
//!
//! Formatting lives on delta runs as an [`AttributeMap`]. The schema decides
//! which keys are accepted; unknown keys are stripped and values of the wrong
//! kind reject the whole map. [`AttributeValue::Null`] is only meaningful in
//! a format patch, where it removes the key.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::delta::{DeltaEntry, DeltaInsert};
use crate::types::InlineRange;

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Str(SmolStr),
    /// Removes the attribute when used in a format patch.
    Null,
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(SmolStr::new(v))
    }
}

/// Attribute name to value, ordered so serialized forms are stable.
pub type AttributeMap = BTreeMap<SmolStr, AttributeValue>;

/// Build an attribute map from `(name, value)` pairs.
pub fn attributes<K, V, I>(pairs: I) -> AttributeMap
where
    K: Into<SmolStr>,
    V: Into<AttributeValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Drop removal markers, returning `None` for an empty result.
pub fn strip_nulls(map: &AttributeMap) -> Option<AttributeMap> {
    let out: AttributeMap = map
        .iter()
        .filter(|(_, v)| **v != AttributeValue::Null)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if out.is_empty() { None } else { Some(out) }
}

/// Value kind accepted by a schema entry.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Only `true` (or `Null` to remove).
    Flag,
    Text,
    Integer,
}

impl AttributeKind {
    fn accepts(&self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (_, AttributeValue::Null)
                | (AttributeKind::Flag, AttributeValue::Bool(true))
                | (AttributeKind::Text, AttributeValue::Str(_))
                | (AttributeKind::Integer, AttributeValue::Int(_))
        )
    }
}

/// The set of attributes an editor accepts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeSchema {
    kinds: BTreeMap<SmolStr, AttributeKind>,
}

impl Default for AttributeSchema {
    fn default() -> Self {
        Self::base()
    }
}

impl AttributeSchema {
    /// An empty schema that strips everything.
    pub fn empty() -> Self {
        Self {
            kinds: BTreeMap::new(),
        }
    }

    /// Base text attributes: `bold`, `italic`, `underline`, `strike`, `code`
    /// flags and a `link` text attribute.
    pub fn base() -> Self {
        Self::empty()
            .with("bold", AttributeKind::Flag)
            .with("italic", AttributeKind::Flag)
            .with("underline", AttributeKind::Flag)
            .with("strike", AttributeKind::Flag)
            .with("code", AttributeKind::Flag)
            .with("link", AttributeKind::Text)
    }

    pub fn with(mut self, name: impl Into<SmolStr>, kind: AttributeKind) -> Self {
        self.kinds.insert(name.into(), kind);
        self
    }

    pub fn kind(&self, name: &str) -> Option<AttributeKind> {
        self.kinds.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.kinds.keys()
    }
}

/// How a run is presented: element tag plus DOM attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementSpec {
    pub tag: SmolStr,
    pub attributes: Vec<(SmolStr, String)>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<SmolStr>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<SmolStr>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }
}

/// Maps a run to its presentation. Consulted on every render.
pub type AttributeRenderer = Rc<dyn Fn(&DeltaInsert) -> ElementSpec>;

/// Presentation for the base text attributes.
pub fn default_attribute_renderer(delta: &DeltaInsert) -> ElementSpec {
    let attrs = delta.attributes.as_ref();
    let flag = |key: &str| {
        attrs
            .and_then(|a| a.get(key))
            .is_some_and(|v| *v == AttributeValue::Bool(true))
    };

    let mut style = String::new();
    if flag("bold") {
        style.push_str("font-weight: bold;");
    }
    if flag("italic") {
        style.push_str("font-style: italic;");
    }
    let decorations: Vec<&str> = [("underline", "underline"), ("strike", "line-through")]
        .into_iter()
        .filter(|(key, _)| flag(key))
        .map(|(_, css)| css)
        .collect();
    if !decorations.is_empty() {
        style.push_str("text-decoration: ");
        style.push_str(&decorations.join(" "));
        style.push(';');
    }

    let link = attrs.and_then(|a| match a.get("link") {
        Some(AttributeValue::Str(href)) => Some(href.clone()),
        _ => None,
    });

    let mut spec = match (link, flag("code")) {
        (Some(href), _) => ElementSpec::new("a").with_attribute("href", href.as_str()),
        (None, true) => ElementSpec::new("code"),
        (None, false) => ElementSpec::new("span"),
    };
    if !style.is_empty() {
        spec = spec.with_attribute("style", style);
    }
    spec
}

/// Schema, renderer and pending marks.
pub struct AttributeService {
    schema: AttributeSchema,
    renderer: AttributeRenderer,
    marks: Option<AttributeMap>,
}

impl AttributeService {
    pub fn new(schema: AttributeSchema) -> Self {
        Self {
            schema,
            renderer: Rc::new(default_attribute_renderer),
            marks: None,
        }
    }

    pub fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    pub fn set_attribute_schema(&mut self, schema: AttributeSchema) {
        self.schema = schema;
    }

    pub fn set_attribute_renderer(&mut self, renderer: AttributeRenderer) {
        self.renderer = renderer;
    }

    pub fn render_element(&self, delta: &DeltaInsert) -> ElementSpec {
        (self.renderer)(delta)
    }

    pub fn marks(&self) -> Option<&AttributeMap> {
        self.marks.as_ref()
    }

    pub fn set_marks(&mut self, marks: AttributeMap) {
        self.marks = if marks.is_empty() { None } else { Some(marks) };
    }

    pub fn reset_marks(&mut self) {
        self.marks = None;
    }

    /// Validate `raw` against the schema.
    ///
    /// Unknown keys are stripped. A value of the wrong kind rejects the whole
    /// map. `Null` values are kept as removal markers. Returns `None` when
    /// nothing is left.
    pub fn normalize_attributes(&self, raw: &AttributeMap) -> Option<AttributeMap> {
        let mut out = AttributeMap::new();
        for (key, value) in raw {
            match self.schema.kind(key) {
                None => {
                    tracing::trace!(%key, "normalize_attributes: stripping unknown attribute");
                }
                Some(kind) if !kind.accepts(value) => {
                    tracing::warn!(%key, ?value, ?kind, "normalize_attributes: rejected attribute value");
                    return None;
                }
                Some(_) => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
        if out.is_empty() { None } else { Some(out) }
    }

    /// Attributes uniformly applied across `range`.
    ///
    /// `entries` are the runs touching the range, as returned by the delta
    /// service. A run ending exactly at `range.index` does not count, so a
    /// collapsed caret on a boundary takes the format of the run to its
    /// right. In strict mode a run without attributes empties the result and
    /// a key whose values disagree is dropped. `loose` unions instead, later
    /// runs winning.
    pub fn get_format(
        &self,
        entries: &[DeltaEntry],
        range: InlineRange,
        loose: bool,
    ) -> AttributeMap {
        let covered: Vec<Option<&AttributeMap>> = entries
            .iter()
            .filter(|e| e.range.end() > range.index && e.range.index <= range.end())
            .map(|e| e.delta.attributes.as_ref())
            .collect();

        if loose {
            return covered
                .into_iter()
                .flatten()
                .fold(AttributeMap::new(), |mut acc, attrs| {
                    acc.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
                    acc
                });
        }

        let mut iter = covered.into_iter();
        let Some(Some(first)) = iter.next() else {
            return AttributeMap::new();
        };
        let mut format = first.clone();
        for attrs in iter {
            let Some(attrs) = attrs else {
                return AttributeMap::new();
            };
            format.retain(|key, value| attrs.get(key) == Some(value));
        }
        format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AttributeService {
        AttributeService::new(AttributeSchema::base())
    }

    fn entry(text: &str, index: usize, attrs: Option<AttributeMap>) -> DeltaEntry {
        DeltaEntry {
            delta: DeltaInsert::new(text, attrs),
            range: InlineRange::new(index, text.encode_utf16().count()),
        }
    }

    #[test]
    fn test_normalize_strips_unknown_keys() {
        let raw = attributes([("bold", AttributeValue::Bool(true)), ("color", "red".into())]);
        assert_eq!(
            service().normalize_attributes(&raw),
            Some(attributes([("bold", true)]))
        );
    }

    #[test]
    fn test_normalize_empty_is_none() {
        assert_eq!(service().normalize_attributes(&AttributeMap::new()), None);
        let raw = attributes([("color", "red")]);
        assert_eq!(service().normalize_attributes(&raw), None);
    }

    #[test]
    fn test_normalize_rejects_wrong_kind() {
        let raw = attributes([("bold", AttributeValue::Str("yes".into()))]);
        assert_eq!(service().normalize_attributes(&raw), None);
        // Flags only accept true.
        let raw = attributes([("italic", false)]);
        assert_eq!(service().normalize_attributes(&raw), None);
    }

    #[test]
    fn test_normalize_keeps_null_for_removal() {
        let raw = attributes([("bold", AttributeValue::Null)]);
        assert_eq!(
            service().normalize_attributes(&raw),
            Some(attributes([("bold", AttributeValue::Null)]))
        );
        assert_eq!(strip_nulls(&raw), None);
    }

    #[test]
    fn test_get_format_conflict_drops_key() {
        let bold = attributes([("bold", true)]);
        let entries = vec![
            entry("Hello", 0, Some(bold.clone())),
            entry(" World", 5, None),
        ];
        let svc = service();
        assert_eq!(svc.get_format(&entries[..1], InlineRange::new(0, 5), false), bold);
        assert!(svc.get_format(&entries, InlineRange::new(0, 11), false).is_empty());
        assert_eq!(svc.get_format(&entries, InlineRange::new(0, 11), true), bold);
    }

    #[test]
    fn test_get_format_differing_values() {
        let entries = vec![
            entry("ab", 0, Some(attributes([("link", "a"), ("bold", "x")]))),
            entry("cd", 2, Some(attributes([("link", "b"), ("bold", "x")]))),
        ];
        let format = service().get_format(&entries, InlineRange::new(0, 4), false);
        assert_eq!(format, attributes([("bold", "x")]));
    }

    #[test]
    fn test_get_format_caret_on_boundary_uses_right_run() {
        let entries = vec![
            entry("ab", 0, Some(attributes([("bold", true)]))),
            entry("cd", 2, Some(attributes([("italic", true)]))),
        ];
        let format = service().get_format(&entries, InlineRange::caret(2), false);
        assert_eq!(format, attributes([("italic", true)]));
    }

    #[test]
    fn test_marks() {
        let mut svc = service();
        assert!(svc.marks().is_none());
        svc.set_marks(attributes([("bold", true)]));
        assert_eq!(svc.marks(), Some(&attributes([("bold", true)])));
        svc.reset_marks();
        assert!(svc.marks().is_none());
    }

    #[test]
    fn test_default_renderer() {
        let delta = DeltaInsert::new(
            "x",
            Some(attributes([("bold", true), ("underline", true), ("strike", true)])),
        );
        let spec = default_attribute_renderer(&delta);
        assert_eq!(spec.tag, "span");
        assert_eq!(
            spec.attributes,
            vec![(
                SmolStr::new("style"),
                "font-weight: bold;text-decoration: underline line-through;".to_string()
            )]
        );

        let link = DeltaInsert::new("x", Some(attributes([("link", "https://example.com")])));
        let spec = default_attribute_renderer(&link);
        assert_eq!(spec.tag, "a");
        assert_eq!(
            spec.attributes,
            vec![(SmolStr::new("href"), "https://example.com".to_string())]
        );
    }
}
