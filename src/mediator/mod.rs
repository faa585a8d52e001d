//!
//! Mediators intercept storage operations of one entity type.
//!
//! Write mediators run a `before` hook (may rewrite the mutation) and an
//! `after` hook (sees each affected row). Read mediators rewrite queries.
//! Both reach the ReBAC store only through [`Env`].

pub mod read;
pub mod write;

pub use read::{AuthorizedIdFilter, GroupBlockFilter};
pub use write::{ImmutableOwnerGuard, NarrowOnMutate, SetOwnerOnCreate, SyncTuples};

use crate::composer::EntityAccessPolicy;
use crate::context::CallerContextAccessor;
use crate::declaration::OwnershipDeclaration;
use crate::env::Env;
use crate::error::AccessError;
use crate::ops::{kind, OpMask};
use crate::storage::{Change, Predicate, Query, StorageMutation};
use crate::types::{relation, OwnerKind};

pub trait WriteMediator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Mutation kinds the hooks run for.
    fn ops(&self) -> OpMask {
        kind::ALL_MUTATIONS
    }

    fn before(
        &self,
        _env: &Env<'_>,
        _policy: &EntityAccessPolicy,
        _mutation: &mut dyn StorageMutation,
    ) -> Result<(), AccessError> {
        Ok(())
    }

    fn after(&self, _env: &Env<'_>, _policy: &EntityAccessPolicy, _change: &Change) -> Result<(), AccessError> {
        Ok(())
    }
}

pub trait ReadMediator: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn intercept(&self, env: &Env<'_>, policy: &EntityAccessPolicy, query: &mut Query) -> Result<(), AccessError>;
}

/// Which side of the authorized set a predicate is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl Access {
    pub fn permission(self) -> &'static str {
        match self {
            Access::Read => relation::CAN_VIEW,
            Access::Write => relation::CAN_EDIT,
        }
    }
}

/// Predicates restricting `decl.object_type` rows to those the caller may access.
///
/// Organization-owned rows are matched on the owner field against the caller's
/// organizations; writes additionally need an edit grant in the store.
/// Object-owned rows come from the store's authorized id list. User-owned
/// rows must be owned by the subject.
pub fn ownership_predicates(
    env: &Env<'_>,
    decl: &OwnershipDeclaration,
    access: Access,
) -> Result<Vec<Predicate>, AccessError> {
    let ctx = env.ctx();
    let mut predicates = Vec::new();
    match decl.owner_kind {
        OwnerKind::Organization => {
            predicates.push(Predicate::field_in(&decl.owner_field, ctx.organization_ids()?));
            if access == Access::Write {
                predicates.push(Predicate::IdIn(env.list_authorized(&decl.object_type, access.permission())?));
            }
        }
        OwnerKind::Object => {
            predicates.push(Predicate::IdIn(env.list_authorized(&decl.object_type, access.permission())?));
            if let Some(org_field) = decl.organization_field() {
                predicates.push(Predicate::field_in(org_field, ctx.organization_ids()?));
            }
        }
        OwnerKind::User => {
            predicates.push(Predicate::field_in(&decl.owner_field, [ctx.subject_id()?]));
        }
    }
    Ok(predicates)
}
