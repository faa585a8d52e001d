//! Stock write mediators: owner injection, predicate narrowing, tuple sync.

use crate::composer::EntityAccessPolicy;
use crate::context::CallerContextAccessor;
use crate::env::Env;
use crate::error::AccessError;
use crate::ops::{kind, OpMask};
use crate::storage::{Change, StorageMutation};
use crate::sync::TupleSynchronizer;
use crate::types::{field, OwnerKind, SubjectKind};

use super::{ownership_predicates, Access, WriteMediator};

fn unsupported(object_type: &str, capability: &'static str) -> AccessError {
    AccessError::UnsupportedMutationShape { object_type: object_type.to_string(), capability }
}

/// Fills owner fields on create from the caller context.
///
/// - organization owner: the requested organization if it is one of the
///   caller's, otherwise the active or only organization
/// - user owner: always the subject
/// - object owner: parents come from the caller; a required declaration with
///   no parent set fails with [`AccessError::MissingOwner`]
///
/// A declared bypass token skips the hook entirely.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetOwnerOnCreate;

impl WriteMediator for SetOwnerOnCreate {
    fn name(&self) -> &'static str {
        "set_owner_on_create"
    }

    fn ops(&self) -> OpMask {
        kind::CREATE
    }

    fn before(
        &self,
        env: &Env<'_>,
        policy: &EntityAccessPolicy,
        mutation: &mut dyn StorageMutation,
    ) -> Result<(), AccessError> {
        let decl = policy.declaration();
        if mutation.owner_settable().is_none() {
            return Err(unsupported(&decl.object_type, "owner_settable"));
        }
        let ctx = env.ctx();
        if let Some(token) = ctx.bypass_token(&decl.bypass_tokens) {
            tracing::debug!(object_type = %decl.object_type, token = token.token_type.as_str(), "bypass token, owner left as given");
            return Ok(());
        }
        let admin_escape = decl.admin_escape(ctx);
        let mut assignments: Vec<(String, String)> = Vec::new();

        if let Some(org_field) = decl.organization_field() {
            let requested = mutation.ids(org_field).into_iter().next();
            if requested.is_none() && admin_escape {
                tracing::debug!(object_type = %decl.object_type, "admin create without organization owner");
            } else {
                match ctx.resolve_organization(requested.as_deref()) {
                    Ok(org) => assignments.push((org_field.to_string(), org)),
                    Err(e) if requested.is_none() && !decl.required => {
                        tracing::debug!(object_type = %decl.object_type, reason = %e, "optional organization owner left empty");
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        match decl.owner_kind {
            OwnerKind::User => {
                let subject = ctx.subject_id()?;
                if let Some(requested) = mutation.ids(&decl.owner_field).first() {
                    if requested != subject {
                        return Err(AccessError::denied_op(
                            &decl.object_type,
                            mutation.op(),
                            "user-owned records can only be created for the caller",
                        ));
                    }
                }
                assignments.push((decl.owner_field.clone(), subject.to_string()));
            }
            OwnerKind::Object => {
                let subject = ctx.subject_id()?;
                let parents = decl.parent_fields();
                let has_parent = parents.iter().any(|(f, _)| !mutation.ids(f).is_empty());
                if let Some((first, _)) = parents.first() {
                    if decl.required && !has_parent && !admin_escape {
                        return Err(AccessError::MissingOwner {
                            object_type: decl.object_type.clone(),
                            field: first.clone(),
                        });
                    }
                }
                if decl.grant_creator && ctx.subject_kind() == SubjectKind::User {
                    assignments.push((field::CREATED_BY.to_string(), subject.to_string()));
                }
            }
            OwnerKind::Organization => {}
        }

        let setter = mutation
            .owner_settable()
            .ok_or_else(|| unsupported(&decl.object_type, "owner_settable"))?;
        for (name, value) in &assignments {
            tracing::debug!(object_type = %decl.object_type, field = %name, value = %value, "setting owner field");
            setter.set_owner(name, value);
        }
        Ok(())
    }
}

/// Rejects updates that set or clear a field fixed at creation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmutableOwnerGuard;

impl WriteMediator for ImmutableOwnerGuard {
    fn name(&self) -> &'static str {
        "immutable_owner_guard"
    }

    fn ops(&self) -> OpMask {
        kind::ANY_UPDATE
    }

    fn before(
        &self,
        _env: &Env<'_>,
        policy: &EntityAccessPolicy,
        mutation: &mut dyn StorageMutation,
    ) -> Result<(), AccessError> {
        match policy.fields().iter().find(|f| f.immutable && mutation.touches(&f.name)) {
            Some(f) => Err(AccessError::ImmutableField {
                object_type: policy.object_type().to_string(),
                field: f.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Narrows updates and deletes to rows the caller may edit.
///
/// An empty authorized set narrows to zero rows instead of failing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NarrowOnMutate;

impl WriteMediator for NarrowOnMutate {
    fn name(&self) -> &'static str {
        "narrow_on_mutate"
    }

    fn ops(&self) -> OpMask {
        kind::ANY_UPDATE | kind::ANY_DELETE
    }

    fn before(
        &self,
        env: &Env<'_>,
        policy: &EntityAccessPolicy,
        mutation: &mut dyn StorageMutation,
    ) -> Result<(), AccessError> {
        let decl = policy.declaration();
        if mutation.narrowable().is_none() {
            return Err(unsupported(&decl.object_type, "predicate_narrowable"));
        }
        let ctx = env.ctx();
        if decl.is_bypassed(ctx) {
            tracing::debug!(object_type = %decl.object_type, "bypass token, mutation not narrowed");
            return Ok(());
        }
        if decl.admin_escape(ctx) {
            tracing::debug!(object_type = %decl.object_type, "admin, mutation not narrowed");
            return Ok(());
        }
        let predicates = ownership_predicates(env, decl, Access::Write)?;
        let narrowable = mutation
            .narrowable()
            .ok_or_else(|| unsupported(&decl.object_type, "predicate_narrowable"))?;
        tracing::debug!(object_type = %decl.object_type, predicates = predicates.len(), "narrowing mutation");
        for p in predicates {
            narrowable.narrow(p);
        }
        Ok(())
    }
}

/// Writes and deletes tuples for every affected row.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncTuples;

impl WriteMediator for SyncTuples {
    fn name(&self) -> &'static str {
        "sync_tuples"
    }

    fn after(&self, env: &Env<'_>, policy: &EntityAccessPolicy, change: &Change) -> Result<(), AccessError> {
        TupleSynchronizer::sync(env, policy.object_type(), change, policy.relation_fields()).map(|_| ())
    }
}
