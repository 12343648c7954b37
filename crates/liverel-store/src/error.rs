#![forbid(unsafe_code)]

//! Store error taxonomy.
//!
//! Store failures are never fatal: they surface through observer callbacks
//! as `Result` values and it is the consumer's call whether to drop a view,
//! rebuild it, or propagate further.

use std::fmt;

use crate::row::Attribute;

/// Errors surfaced by the store and its relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No relation with this name exists in the store.
    UnknownRelation(String),
    /// A relation with this name already exists.
    DuplicateRelation(String),
    /// A row does not carry the relation's attribute set, or the scheme
    /// itself is unusable (empty).
    SchemeMismatch { relation: String },
    /// An operation referenced an attribute the relation does not have.
    MissingAttribute {
        relation: String,
        attribute: Attribute,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::UnknownRelation(name) => write!(f, "unknown relation {name:?}"),
            StoreError::DuplicateRelation(name) => {
                write!(f, "relation {name:?} already exists")
            }
            StoreError::SchemeMismatch { relation } => {
                write!(f, "row does not match the scheme of relation {relation:?}")
            }
            StoreError::MissingAttribute {
                relation,
                attribute,
            } => {
                write!(f, "relation {relation:?} has no attribute {attribute}")
            }
        }
    }
}

impl std::error::Error for StoreError {}
