#![forbid(unsafe_code)]

//! Rows, attributes, and relation schemes.
//!
//! A [`Row`] is an ordered attribute-to-value record: the unit stored in
//! relations, carried through change sets and deltas, and projected by the
//! array layer. Rows are plain values (`Ord` + `Hash`), so they can live in
//! persistent ordered sets and be diffed structurally.
//!
//! [`Attribute`] is an interned column name: a shared `str` that is cheap to
//! clone and compares by content, so rows and schemes can pass names around
//! freely without allocating per lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// A column name. Cheap to clone, ordered and hashable by content.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attribute(Rc<str>);

impl Attribute {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Attribute(Rc::from(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Attribute::new(name)
    }
}

impl From<String> for Attribute {
    fn from(name: String) -> Self {
        Attribute(Rc::from(name.as_str()))
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attribute({:?})", &*self.0)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered attribute → value record.
///
/// Rows compare and hash by their full contents, which makes them directly
/// usable in ordered sets; two rows that agree on every attribute are the
/// same row.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Row {
    values: BTreeMap<Attribute, Value>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Row::default()
    }

    /// Build a row from attribute/value pairs.
    pub fn from_pairs<A, V>(pairs: impl IntoIterator<Item = (A, V)>) -> Self
    where
        A: Into<Attribute>,
        V: Into<Value>,
    {
        Row {
            values: pairs
                .into_iter()
                .map(|(a, v)| (a.into(), v.into()))
                .collect(),
        }
    }

    /// Functional extension: returns a copy of this row with one attribute set.
    #[must_use]
    pub fn with(mut self, attr: impl Into<Attribute>, value: impl Into<Value>) -> Self {
        self.values.insert(attr.into(), value.into());
        self
    }

    pub fn insert(&mut self, attr: impl Into<Attribute>, value: impl Into<Value>) {
        self.values.insert(attr.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, attr: &Attribute) -> Option<&Value> {
        self.values.get(attr)
    }

    #[must_use]
    pub fn contains(&self, attr: &Attribute) -> bool {
        self.values.contains_key(attr)
    }

    /// Merge another row's values into this one (update semantics: the
    /// other row's values win on conflict).
    pub fn merge(&mut self, other: &Row) {
        for (attr, value) in &other.values {
            self.values.insert(attr.clone(), value.clone());
        }
    }

    /// Returns a copy of this row with `other`'s values merged in.
    #[must_use]
    pub fn merged(&self, other: &Row) -> Row {
        let mut row = self.clone();
        row.merge(other);
        row
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.values.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Attribute, &Value)> {
        self.values.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<A: Into<Attribute>, V: Into<Value>> FromIterator<(A, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (A, V)>>(iter: I) -> Self {
        Row::from_pairs(iter)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (attr, value) in &self.values {
            map.entry(&attr.as_str(), &format_args!("{value}"));
        }
        map.finish()
    }
}

/// The attribute set a relation's rows must carry.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct Scheme {
    attributes: BTreeSet<Attribute>,
}

impl Scheme {
    pub fn new<A: Into<Attribute>>(attrs: impl IntoIterator<Item = A>) -> Self {
        Scheme {
            attributes: attrs.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, attr: &Attribute) -> bool {
        self.attributes.contains(attr)
    }

    /// True when every attribute of `row` belongs to this scheme and the
    /// row carries the scheme's full attribute set.
    #[must_use]
    pub fn matches_row(&self, row: &Row) -> bool {
        row.len() == self.attributes.len() && row.attributes().all(|a| self.attributes.contains(a))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
