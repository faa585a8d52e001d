//! Per-request evaluation environment.
//!
//! Bundles the caller context with the ReBAC store client and the creator
//! registry, and is the only path through which mediators and rules reach the
//! store. Every store call first checks for cancellation; check/list failures
//! become [`AccessError::AccessCheckUnavailable`] and write/delete failures become
//! [`AccessError::TupleSyncFailure`]. Successful writes are journaled so the
//! engine can undo them when the surrounding mutation rolls back.

use std::cell::RefCell;

use crate::context::{CallerContext, CallerContextAccessor};
use crate::error::AccessError;
use crate::rebac::{AccessCheck, RebacStore, Tuple};
use crate::registry::CreatorRegistry;

#[derive(Debug, Clone)]
enum Applied {
    Wrote(Vec<Tuple>),
    Deleted(Vec<Tuple>),
}

pub struct Env<'a> {
    ctx: &'a CallerContext,
    rebac: &'a dyn RebacStore,
    registry: Option<&'a CreatorRegistry>,
    journal: RefCell<Vec<Applied>>,
}

impl<'a> Env<'a> {
    pub fn new(ctx: &'a CallerContext, rebac: &'a dyn RebacStore) -> Self {
        Env { ctx, rebac, registry: None, journal: RefCell::new(Vec::new()) }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: &'a CreatorRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn ctx(&self) -> &'a CallerContext {
        self.ctx
    }

    pub fn registry(&self) -> Option<&'a CreatorRegistry> {
        self.registry
    }

    pub fn ensure_active(&self) -> Result<(), AccessError> {
        if self.ctx.is_cancelled() {
            tracing::debug!("request cancelled, aborting before store call");
            return Err(AccessError::Cancelled);
        }
        Ok(())
    }

    /// Does the caller hold `relation` on `object_type:object_id`?
    pub fn check(&self, relation: &str, object_type: &str, object_id: &str) -> Result<bool, AccessError> {
        self.ensure_active()?;
        let subject_id = self.ctx.subject_id()?;
        let check = AccessCheck {
            subject_type: self.ctx.subject_kind().as_str().to_string(),
            subject_id: subject_id.to_string(),
            relation: relation.to_string(),
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
        };
        self.rebac.check_access(&check).map_err(|e| {
            tracing::error!(relation, object_type, object_id, error = %e, "access check failed");
            AccessError::AccessCheckUnavailable(e)
        })
    }

    /// Every `object_type` id on which the caller holds `relation`.
    pub fn list_authorized(&self, object_type: &str, relation: &str) -> Result<Vec<String>, AccessError> {
        self.ensure_active()?;
        let subject_id = self.ctx.subject_id()?;
        self.rebac
            .list_authorized_object_ids(self.ctx.subject_kind().as_str(), subject_id, object_type, relation)
            .map_err(|e| {
                tracing::error!(relation, object_type, error = %e, "listing authorized objects failed");
                AccessError::AccessCheckUnavailable(e)
            })
    }

    pub fn write_tuples(&self, tuples: &[Tuple]) -> Result<(), AccessError> {
        if tuples.is_empty() {
            return Ok(());
        }
        self.ensure_active()?;
        self.rebac.write_tuples(tuples).map_err(|e| {
            tracing::error!(count = tuples.len(), error = %e, "writing tuples failed");
            AccessError::TupleSyncFailure(e)
        })?;
        self.journal.borrow_mut().push(Applied::Wrote(tuples.to_vec()));
        Ok(())
    }

    pub fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), AccessError> {
        if tuples.is_empty() {
            return Ok(());
        }
        self.ensure_active()?;
        self.rebac.delete_tuples(tuples).map_err(|e| {
            tracing::error!(count = tuples.len(), error = %e, "deleting tuples failed");
            AccessError::TupleSyncFailure(e)
        })?;
        self.journal.borrow_mut().push(Applied::Deleted(tuples.to_vec()));
        Ok(())
    }

    pub fn tuples_written(&self) -> usize {
        self.journal
            .borrow()
            .iter()
            .map(|a| match a {
                Applied::Wrote(t) => t.len(),
                Applied::Deleted(_) => 0,
            })
            .sum()
    }

    pub fn tuples_deleted(&self) -> usize {
        self.journal
            .borrow()
            .iter()
            .map(|a| match a {
                Applied::Deleted(t) => t.len(),
                Applied::Wrote(_) => 0,
            })
            .sum()
    }

    /// Undoes every journaled write/delete in reverse order. Runs even when the
    /// request was cancelled; failures are logged and otherwise ignored.
    pub fn compensate(&self) {
        let applied: Vec<Applied> = self.journal.borrow_mut().drain(..).collect();
        for entry in applied.into_iter().rev() {
            let result = match &entry {
                Applied::Wrote(tuples) => self.rebac.delete_tuples(tuples),
                Applied::Deleted(tuples) => self.rebac.write_tuples(tuples),
            };
            if let Err(e) = result {
                tracing::error!(error = %e, entry = ?entry, "failed to revert tuple change");
            }
        }
    }

    /// Forgets the journal once the surrounding transaction committed.
    pub fn settle(&self) {
        self.journal.borrow_mut().clear();
    }
}

impl std::fmt::Debug for Env<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("ctx", &self.ctx)
            .field("journal", &self.journal.borrow().len())
            .finish()
    }
}
