//! Attribute dictionary (component D, `udict`).
//!
//! An ordered collection of `(key, type) -> value` pairs. The spec's own
//! rationale (low cardinality, typically ≤ 10 attributes per uref) argues
//! directly for a packed `Vec`, not a hash map, so that's what this is:
//! `Udict` wraps an `Arc<Vec<Attr>>`, materialized via `Arc::make_mut` on
//! first mutation, so `dup` stays effectively free until somebody writes.

use std::sync::Arc;

/// Reserved hot attribute names (§6), stored with a single-byte tag instead
/// of the full string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shorthand {
    PtsOrig,
    DtsOrig,
    PtsSys,
    DtsSys,
    Cr,
    Duration,
    Rate,
    FlowDef,
    FlowId,
    FlowRawdef,
    PicNumber,
    Key,
    Tff,
    Progressive,
    Rap,
    BlockStart,
    BlockEnd,
    TsPid,
    PsiFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttrKey {
    Shorthand(Shorthand),
    Name(String),
}

impl From<Shorthand> for AttrKey {
    fn from(s: Shorthand) -> Self {
        AttrKey::Shorthand(s)
    }
}

impl From<&str> for AttrKey {
    fn from(s: &str) -> Self {
        AttrKey::Name(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Void,
    Bool(bool),
    U8(u8),
    I8(i8),
    U64(u64),
    I64(i64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    Rational { num: i64, den: u64 },
}

/// A discriminant-only view of [`AttrValue`], used for typed `get`/`delete`
/// lookups without constructing a dummy value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Void,
    Bool,
    U8,
    I8,
    U64,
    I64,
    F64,
    Str,
    Bytes,
    Rational,
}

impl AttrValue {
    #[must_use]
    pub fn type_of(&self) -> AttrType {
        match self {
            AttrValue::Void => AttrType::Void,
            AttrValue::Bool(_) => AttrType::Bool,
            AttrValue::U8(_) => AttrType::U8,
            AttrValue::I8(_) => AttrType::I8,
            AttrValue::U64(_) => AttrType::U64,
            AttrValue::I64(_) => AttrType::I64,
            AttrValue::F64(_) => AttrType::F64,
            AttrValue::Str(_) => AttrType::Str,
            AttrValue::Bytes(_) => AttrType::Bytes,
            AttrValue::Rational { .. } => AttrType::Rational,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Attr {
    key: AttrKey,
    value: AttrValue,
}

/// A cheaply-duplicable, copy-on-write attribute dictionary.
#[derive(Debug, Clone, Default)]
pub struct Udict {
    attrs: Arc<Vec<Attr>>,
}

impl Udict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicates the dictionary, sharing the backing storage until the
    /// duplicate (or the original) is next mutated.
    #[must_use]
    pub fn dup(&self) -> Self {
        self.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    fn position(&self, key: &AttrKey, ty: AttrType) -> Option<usize> {
        self.attrs.iter().position(|a| &a.key == key && a.value.type_of() == ty)
    }

    /// Linear scan; `None` if absent.
    #[must_use]
    pub fn get(&self, key: impl Into<AttrKey>, ty: AttrType) -> Option<&AttrValue> {
        let key = key.into();
        self.position(&key, ty).map(|i| &self.attrs[i].value)
    }

    /// Overwrite-or-append. Grows (and copy-on-writes, via `Arc::make_mut`)
    /// the backing storage as needed.
    pub fn set(&mut self, key: impl Into<AttrKey>, value: AttrValue) {
        let key = key.into();
        let ty = value.type_of();
        let attrs = Arc::make_mut(&mut self.attrs);
        if let Some(existing) = attrs.iter_mut().find(|a| a.key == key && a.value.type_of() == ty) {
            existing.value = value;
        } else {
            attrs.push(Attr { key, value });
        }
    }

    /// Removes the `(key, type)` pair, if present, and compacts.
    pub fn delete(&mut self, key: impl Into<AttrKey>, ty: AttrType) -> bool {
        let key = key.into();
        if let Some(idx) = self.position(&key, ty) {
            Arc::make_mut(&mut self.attrs).remove(idx);
            true
        } else {
            false
        }
    }

    /// Yields `(key, value)` in insertion order.
    pub fn iterate(&self) -> impl Iterator<Item = (&AttrKey, &AttrValue)> {
        self.attrs.iter().map(|a| (&a.key, &a.value))
    }

    /// Replaces or appends each attribute from `other` into `self`.
    pub fn import(&mut self, other: &Udict) {
        for attr in other.attrs.iter() {
            self.set(attr.key.clone(), attr.value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s2_dictionary_round_trip() {
        let mut d = Udict::new();
        d.set("flow.def", AttrValue::Str("block.".to_string()));
        d.set("cr", AttrValue::U64(90_000));

        assert_eq!(d.get("flow.def", AttrType::Str), Some(&AttrValue::Str("block.".to_string())));
        assert_eq!(d.get("cr", AttrType::U64), Some(&AttrValue::U64(90_000)));
        assert_eq!(d.get("missing", AttrType::U64), None);

        assert!(d.delete("cr", AttrType::U64));
        assert_eq!(d.get("cr", AttrType::U64), None);

        let remaining: Vec<_> = d.iterate().collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, &AttrKey::Name("flow.def".to_string()));
    }

    #[test]
    fn dup_shares_until_mutated() {
        let mut a = Udict::new();
        a.set("flow.def", AttrValue::Str("block.".to_string()));
        let b = a.dup();
        assert!(Arc::ptr_eq(&a.attrs, &b.attrs));

        a.set("flow.id", AttrValue::U64(1));
        assert!(!Arc::ptr_eq(&a.attrs, &b.attrs));
        assert_eq!(b.len(), 1);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn shorthand_and_string_keys_are_distinct() {
        let mut d = Udict::new();
        d.set(Shorthand::Cr, AttrValue::U64(1));
        d.set("cr", AttrValue::U64(2));
        assert_eq!(d.len(), 2);
        assert_eq!(d.get(Shorthand::Cr, AttrType::U64), Some(&AttrValue::U64(1)));
        assert_eq!(d.get("cr", AttrType::U64), Some(&AttrValue::U64(2)));
    }

    #[test]
    fn import_overwrites_and_appends() {
        let mut a = Udict::new();
        a.set("flow.def", AttrValue::Str("block.".to_string()));
        let mut b = Udict::new();
        b.set("flow.def", AttrValue::Str("pic.".to_string()));
        b.set("flow.id", AttrValue::U64(7));

        a.import(&b);
        assert_eq!(a.get("flow.def", AttrType::Str), Some(&AttrValue::Str("pic.".to_string())));
        assert_eq!(a.get("flow.id", AttrType::U64), Some(&AttrValue::U64(7)));
    }
}
