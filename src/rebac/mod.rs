//! Relationship-based access control store interface.
//!
//! The store itself (graph reachability, conditions, caching) lives outside
//! this crate. The layer only issues checks, list requests, and idempotent
//! tuple writes/deletes through [`RebacStore`].

pub mod memory;

pub use memory::MemoryRebacStore;

/// A single relationship grant: `object_type:object_id#relation@subject_type:subject_id[#subject_relation]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Tuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub subject_type: String,
    pub subject_id: String,
    /// Userset relation on the subject, e.g. `member` for `group:g1#member`.
    pub subject_relation: Option<String>,
}

impl Tuple {
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Tuple {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            subject_relation: None,
        }
    }

    #[must_use]
    pub fn with_subject_relation(mut self, relation: impl Into<String>) -> Self {
        self.subject_relation = Some(relation.into());
        self
    }
}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}:{}",
            self.object_type, self.object_id, self.relation, self.subject_type, self.subject_id
        )?;
        if let Some(rel) = &self.subject_relation {
            write!(f, "#{}", rel)?;
        }
        Ok(())
    }
}

/// One permission question for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCheck {
    pub subject_type: String,
    pub subject_id: String,
    pub relation: String,
    pub object_type: String,
    pub object_id: String,
}

/// Failures reported by the ReBAC store client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or timed out.
    #[error("ReBAC store unavailable: {0}")]
    Unavailable(String),
    /// The store refused the request (unknown type, invalid relation, ...).
    #[error("ReBAC store rejected request: {0}")]
    Rejected(String),
}

/// Client interface of the external ReBAC store.
///
/// Calls are synchronous round-trips. `write_tuples` must be an idempotent
/// upsert and `delete_tuples` must tolerate tuples that are already gone.
pub trait RebacStore: Send + Sync {
    fn check_access(&self, check: &AccessCheck) -> Result<bool, StoreError>;

    /// Ids of every `object_type` object on which the subject holds `relation`.
    fn list_authorized_object_ids(
        &self,
        subject_type: &str,
        subject_id: &str,
        object_type: &str,
        relation: &str,
    ) -> Result<Vec<String>, StoreError>;

    fn write_tuples(&self, tuples: &[Tuple]) -> Result<(), StoreError>;

    fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), StoreError>;
}

impl<T: RebacStore + ?Sized> RebacStore for std::sync::Arc<T> {
    fn check_access(&self, check: &AccessCheck) -> Result<bool, StoreError> {
        (**self).check_access(check)
    }

    fn list_authorized_object_ids(
        &self,
        subject_type: &str,
        subject_id: &str,
        object_type: &str,
        relation: &str,
    ) -> Result<Vec<String>, StoreError> {
        (**self).list_authorized_object_ids(subject_type, subject_id, object_type, relation)
    }

    fn write_tuples(&self, tuples: &[Tuple]) -> Result<(), StoreError> {
        (**self).write_tuples(tuples)
    }

    fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), StoreError> {
        (**self).delete_tuples(tuples)
    }
}
