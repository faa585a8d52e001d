//! Tuple synchronization.
//!
//! Keeps the ReBAC store's tuples consistent with the relationship fields of
//! a record. The tuple set of a record is a pure function of its relationship
//! fields, so every change reduces to a set difference between the tuples of
//! the before and after states.

use std::collections::BTreeSet;

use crate::env::Env;
use crate::error::AccessError;
use crate::rebac::Tuple;
use crate::storage::{Change, Record};

/// Maps one record field onto tuples `record#relation@subject_type:<value>[#subject_relation]`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RelationField {
    pub field: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_relation: Option<String>,
}

impl RelationField {
    pub fn new(field: impl Into<String>, relation: impl Into<String>, subject_type: impl Into<String>) -> Self {
        RelationField {
            field: field.into(),
            relation: relation.into(),
            subject_type: subject_type.into(),
            subject_relation: None,
        }
    }

    /// Grants to a userset such as `group:<id>#member`.
    #[must_use]
    pub fn userset(mut self, relation: impl Into<String>) -> Self {
        self.subject_relation = Some(relation.into());
        self
    }
}

/// All tuples implied by the record's relationship fields.
pub fn derive_tuples(object_type: &str, record: &Record, fields: &[RelationField]) -> BTreeSet<Tuple> {
    let mut tuples = BTreeSet::new();
    for rf in fields {
        for subject_id in record.ids(&rf.field) {
            let tuple = Tuple::new(object_type, &record.id, &rf.relation, &rf.subject_type, subject_id);
            tuples.insert(match &rf.subject_relation {
                Some(userset) => tuple.with_subject_relation(userset),
                None => tuple,
            });
        }
    }
    tuples
}

/// Tuples to write and delete for one record change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleDelta {
    pub additions: Vec<Tuple>,
    pub removals: Vec<Tuple>,
}

impl TupleDelta {
    pub fn between(object_type: &str, before: Option<&Record>, after: Option<&Record>, fields: &[RelationField]) -> Self {
        let old = before.map(|r| derive_tuples(object_type, r, fields)).unwrap_or_default();
        let new = after.map(|r| derive_tuples(object_type, r, fields)).unwrap_or_default();
        TupleDelta {
            additions: new.difference(&old).cloned().collect(),
            removals: old.difference(&new).cloned().collect(),
        }
    }

    /// Delta for a storage change. A soft delete keeps the tuples so a restore
    /// needs no re-sync; a hard delete (no after state) removes them all.
    pub fn for_change(object_type: &str, change: &Change, fields: &[RelationField]) -> Self {
        match (&change.before, &change.after) {
            (Some(before), Some(after)) if after.is_deleted() && !before.is_deleted() => TupleDelta::default(),
            (before, after) => Self::between(object_type, before.as_ref(), after.as_ref(), fields),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

pub struct TupleSynchronizer;

impl TupleSynchronizer {
    /// Writes the additions, then deletes the removals. An empty delta makes no store call.
    pub fn sync(env: &Env<'_>, object_type: &str, change: &Change, fields: &[RelationField]) -> Result<TupleDelta, AccessError> {
        let delta = TupleDelta::for_change(object_type, change, fields);
        if delta.is_empty() {
            tracing::debug!(object_type, id = ?change.id(), "no tuple changes");
            return Ok(delta);
        }
        tracing::debug!(
            object_type,
            id = ?change.id(),
            additions = delta.additions.len(),
            removals = delta.removals.len(),
            "syncing tuples"
        );
        env.write_tuples(&delta.additions)?;
        env.delete_tuples(&delta.removals)?;
        Ok(delta)
    }
}
