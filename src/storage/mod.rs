//! Storage abstraction.
//!
//! The concrete business schemas and the database live outside this crate.
//! What the ownership layer needs from them is small: records with named
//! fields, `WHERE`-style predicates on queries and mutations, and the kind
//! of each mutation. Mediators reach the mutation through the
//! [`StorageMutation`] trait and its capability accessors.

pub mod memory;

pub use memory::MemoryStorage;

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::ops::{Op, QueryOp};

/// A persisted business object.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub id: String,
    pub object_type: String,
    pub fields: BTreeMap<String, Value>,
    /// Soft-delete marker (logical timestamp).
    pub deleted_at: Option<u64>,
}

impl Record {
    pub fn new(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Record {
            id: id.into(),
            object_type: object_type.into(),
            fields: BTreeMap::new(),
            deleted_at: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// String value of a scalar field; empty strings count as unset.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        if name == crate::types::field::ID {
            return Some(&self.id);
        }
        match self.fields.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Ids referenced by a field, whether stored as a scalar or a list.
    pub fn ids(&self, name: &str) -> Vec<String> {
        if name == crate::types::field::ID {
            return vec![self.id.clone()];
        }
        self.fields.get(name).map(ids_of).unwrap_or_default()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Ids held by a JSON value: a non-empty string or an array of them.
pub fn ids_of(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// `WHERE`-style filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    IdIn(Vec<String>),
    /// Field value (or any element of a list field) is one of `values`.
    FieldIn { field: String, values: Vec<String> },
    FieldEq { field: String, value: Value },
    FieldIsNull(String),
    NotDeleted,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn id_in<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::IdIn(ids.into_iter().map(Into::into).collect())
    }

    pub fn field_in<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::FieldIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Empty id lists match nothing, so an empty authorized set yields zero rows.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::IdIn(ids) => ids.iter().any(|id| *id == record.id),
            Predicate::FieldIn { field, values } => {
                let held = record.ids(field);
                held.iter().any(|h| values.contains(h))
            }
            Predicate::FieldEq { field, value } => record.field(field) == Some(value),
            Predicate::FieldIsNull(field) => record.ids(field).is_empty(),
            Predicate::NotDeleted => !record.is_deleted(),
            Predicate::And(ps) => ps.iter().all(|p| p.matches(record)),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(record)),
            Predicate::Not(p) => !p.matches(record),
        }
    }
}

/// A read against one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub object_type: String,
    pub op: QueryOp,
    pub predicates: Vec<Predicate>,
    pub include_deleted: bool,
}

impl Query {
    pub fn all(object_type: impl Into<String>) -> Self {
        Query {
            object_type: object_type.into(),
            op: QueryOp::All,
            predicates: Vec::new(),
            include_deleted: false,
        }
    }

    /// Fetch of exactly one record by primary key.
    pub fn only(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Query {
            op: QueryOp::Only,
            predicates: vec![Predicate::IdIn(vec![id.into()])],
            ..Self::all(object_type)
        }
    }

    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn where_p(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    /// True when the query returns at most one record addressed by primary key.
    pub fn is_single_record(&self) -> bool {
        self.op == QueryOp::Only
            && self
                .predicates
                .iter()
                .any(|p| matches!(p, Predicate::IdIn(ids) if ids.len() <= 1))
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.object_type == self.object_type
            && (self.include_deleted || !record.is_deleted())
            && self.predicates.iter().all(|p| p.matches(record))
    }
}

/// A pending create, update or delete.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub object_type: String,
    pub op: Op,
    /// Target id for single-record kinds, or a caller-chosen id on create.
    pub id: Option<String>,
    pub predicates: Vec<Predicate>,
    pub set: BTreeMap<String, Value>,
    pub cleared: BTreeSet<String>,
    /// Deletes are soft unless this is set.
    pub hard_delete: bool,
}

impl Mutation {
    fn new(object_type: impl Into<String>, op: Op) -> Self {
        Mutation {
            object_type: object_type.into(),
            op,
            id: None,
            predicates: Vec::new(),
            set: BTreeMap::new(),
            cleared: BTreeSet::new(),
            hard_delete: false,
        }
    }

    pub fn create(object_type: impl Into<String>) -> Self {
        Self::new(object_type, Op::Create)
    }

    pub fn update_one(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Mutation { id: Some(id.into()), ..Self::new(object_type, Op::UpdateOne) }
    }

    pub fn update(object_type: impl Into<String>) -> Self {
        Self::new(object_type, Op::Update)
    }

    pub fn delete_one(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Mutation { id: Some(id.into()), ..Self::new(object_type, Op::DeleteOne) }
    }

    pub fn delete(object_type: impl Into<String>) -> Self {
        Self::new(object_type, Op::Delete)
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        self.cleared.remove(&field);
        self.set.insert(field, value.into());
        self
    }

    #[must_use]
    pub fn clear(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.set.remove(&field);
        self.cleared.insert(field);
        self
    }

    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    #[must_use]
    pub fn hard(mut self) -> Self {
        self.hard_delete = true;
        self
    }

    /// True when `record` is one of the rows this mutation affects. Soft-deleted
    /// rows are only reachable by a hard delete (purge).
    pub fn targets(&self, record: &Record) -> bool {
        record.object_type == self.object_type
            && (self.hard_delete || !record.is_deleted())
            && self.id.as_ref().map_or(true, |id| *id == record.id)
            && self.predicates.iter().all(|p| p.matches(record))
    }
}

/// Capability: the mutation accepts extra predicates on its affected rows.
pub trait PredicateNarrowable {
    fn narrow(&mut self, predicate: Predicate);
}

/// Capability: owner fields can be written before the mutation executes.
pub trait OwnerSettable {
    fn set_owner(&mut self, field: &str, id: &str);
}

/// Introspection every storage mutation offers to the mediators.
pub trait StorageMutation {
    fn object_type(&self) -> &str;
    fn op(&self) -> Op;
    fn id(&self) -> Option<&str>;
    /// Value the mutation will write to `field`, if any.
    fn value(&self, field: &str) -> Option<&Value>;
    fn clears(&self, field: &str) -> bool;

    fn narrowable(&mut self) -> Option<&mut dyn PredicateNarrowable> {
        None
    }

    fn owner_settable(&mut self) -> Option<&mut dyn OwnerSettable> {
        None
    }

    /// Ids the mutation writes to `field`.
    fn ids(&self, field: &str) -> Vec<String> {
        self.value(field).map(ids_of).unwrap_or_default()
    }

    fn touches(&self, field: &str) -> bool {
        self.value(field).is_some() || self.clears(field)
    }
}

impl PredicateNarrowable for Mutation {
    fn narrow(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }
}

impl OwnerSettable for Mutation {
    fn set_owner(&mut self, field: &str, id: &str) {
        self.cleared.remove(field);
        self.set.insert(field.to_string(), Value::String(id.to_string()));
    }
}

impl StorageMutation for Mutation {
    fn object_type(&self) -> &str {
        &self.object_type
    }

    fn op(&self) -> Op {
        self.op
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn value(&self, field: &str) -> Option<&Value> {
        self.set.get(field)
    }

    fn clears(&self, field: &str) -> bool {
        self.cleared.contains(field)
    }

    fn narrowable(&mut self) -> Option<&mut dyn PredicateNarrowable> {
        Some(self)
    }

    fn owner_settable(&mut self) -> Option<&mut dyn OwnerSettable> {
        Some(self)
    }
}

/// State of one affected row before and after a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub before: Option<Record>,
    pub after: Option<Record>,
}

impl Change {
    pub fn id(&self) -> Option<&str> {
        self.after.as_ref().or(self.before.as_ref()).map(|r| r.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Record {0} already exists")]
    AlreadyExists(String),
    #[error("No transaction in progress")]
    NoTransaction,
    #[error("Transaction already in progress")]
    TransactionInProgress,
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Generic record CRUD with predicate injection and transactions.
pub trait Storage {
    fn begin(&mut self) -> Result<(), StorageError>;
    fn commit(&mut self) -> Result<(), StorageError>;
    fn rollback(&mut self) -> Result<(), StorageError>;

    fn query(&self, query: &Query) -> Result<Vec<Record>, StorageError>;

    /// Executes the mutation and reports each affected row.
    fn apply(&mut self, mutation: &Mutation) -> Result<Vec<Change>, StorageError>;
}
