//! Document store.
//!
//! Collections hold JSON objects keyed by a string `id`. The `Collection`
//! trait is the storage seam: `postgres` keeps each collection in a JSONB
//! table, `memory` keeps it in process. `Model<T>` layers schema casting,
//! default scopes and typed (de)serialization on top of either.

pub mod filter;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod schema;
pub mod timestamp;
pub mod update;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use filter::{CmpOp, Condition, Filter};
pub use model::{Entity, Model};
pub use schema::{Field, FieldKind, Schema};
pub use update::Update;

pub type Document = Map<String, Value>;

/// Reads a document id from a path segment.
pub fn parse_id(raw: &str) -> Result<uuid::Uuid, StoreError> {
    uuid::Uuid::parse_str(raw).map_err(|_| StoreError::Cast {
        path: "id".to_string(),
        value: raw.to_string(),
    })
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cast to {path} failed for value {value}")]
    Cast { path: String, value: String },

    #[error("duplicate value {value} for unique field {field}")]
    Duplicate { field: String, value: String },

    #[error("validation failed: {}", .0.join(". "))]
    Validation(Vec<String>),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Only these fields (plus `id`).
    Include(Vec<String>),
    /// Everything except these fields.
    Exclude(Vec<String>),
}

impl Default for Projection {
    fn default() -> Self {
        Self::Exclude(vec![schema::VERSION_KEY.to_string()])
    }
}

impl Projection {
    pub fn apply(&self, doc: Document) -> Document {
        match self {
            Self::Include(fields) => doc
                .into_iter()
                .filter(|(k, _)| k == "id" || fields.iter().any(|f| f == k))
                .collect(),
            Self::Exclude(fields) => doc
                .into_iter()
                .filter(|(k, _)| !fields.iter().any(|f| f == k))
                .collect(),
        }
    }
}

/// An unresolved read: nothing touches the backend until it is handed to a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadQuery {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl ReadQuery {
    pub fn new(filter: Filter) -> Self {
        Self { filter, ..Default::default() }
    }
}

#[async_trait]
pub trait Collection: Send + Sync {
    /// Inserts a validated document, enforcing unique fields.
    async fn insert(&self, doc: Document) -> Result<Document, StoreError>;

    /// Filter, sort, skip and limit. Projection is left to the caller.
    async fn find(&self, query: &ReadQuery) -> Result<Vec<Document>, StoreError>;

    /// Atomically applies `update` to the first match and returns the new document.
    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Document>, StoreError>;

    async fn update_many(&self, filter: &Filter, update: &Update) -> Result<u64, StoreError>;

    async fn find_one_and_delete(&self, filter: &Filter) -> Result<Option<Document>, StoreError>;

    async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError>;

    async fn count(&self, filter: &Filter) -> Result<u64, StoreError>;
}

/// Renders the offending value of a unique field for error messages.
pub(crate) fn describe(doc: &Document, field: &str) -> String {
    match doc.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
