//!
//! Request execution for the ownership layer.
//!
//! A mutation runs inside one storage transaction: before-mediators, the rule
//! chain, the storage apply, then after-mediators (tuple sync) for every
//! affected row. Any error rolls the transaction back and reverts the tuple
//! writes already made. Queries run the read chain, then the rule chain,
//! then storage.

use std::collections::BTreeSet;

use crate::composer::{EdgeRoute, EntityAccessPolicy, PolicySet};
use crate::context::CallerContext;
use crate::env::Env;
use crate::error::AccessError;
use crate::policy::OperationDescriptor;
use crate::rebac::RebacStore;
use crate::storage::{Mutation, Predicate, Query, Record, Storage};

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// After state of every affected row; the before state for hard deletes.
    pub records: Vec<Record>,
    pub tuples_written: usize,
    pub tuples_deleted: usize,
}

impl MutationOutcome {
    pub fn affected(&self) -> usize {
        self.records.len()
    }

    pub fn first_id(&self) -> Option<&str> {
        self.records.first().map(|r| r.id.as_str())
    }
}

/// Mediates every query and mutation against `S` through the composed policies.
#[derive(Debug)]
pub struct AccessEngine<S: Storage, R: RebacStore> {
    policies: PolicySet,
    storage: S,
    rebac: R,
}

impl<S: Storage, R: RebacStore> AccessEngine<S, R> {
    pub fn new(policies: PolicySet, storage: S, rebac: R) -> Self {
        AccessEngine { policies, storage, rebac }
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Direct storage access, bypassing every mediator. Meant for seeding and inspection.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn rebac(&self) -> &R {
        &self.rebac
    }

    fn env<'a>(&'a self, ctx: &'a CallerContext) -> Env<'a> {
        Env::new(ctx, &self.rebac).with_registry(self.policies.registry())
    }

    pub fn query(&self, ctx: &CallerContext, mut query: Query) -> Result<Vec<Record>, AccessError> {
        let policy = self.policies.get(&query.object_type)?;
        let env = self.env(ctx);
        env.ensure_active()?;
        for mediator in policy.read_mediators() {
            mediator.intercept(&env, policy, &mut query)?;
        }
        policy
            .rules()
            .enforce(&env, &OperationDescriptor::query(policy.declaration(), &query))?;
        env.ensure_active()?;
        let records = self.storage.query(&query)?;
        tracing::debug!(object_type = %query.object_type, rows = records.len(), "query served");
        Ok(records)
    }

    pub fn mutate(&mut self, ctx: &CallerContext, mut mutation: Mutation) -> Result<MutationOutcome, AccessError> {
        let policy = self.policies.get(&mutation.object_type)?;
        let env = Env::new(ctx, &self.rebac).with_registry(self.policies.registry());
        env.ensure_active()?;
        self.storage.begin()?;

        let result = match execute(&mut self.storage, &env, policy, &mut mutation) {
            Ok(outcome) => self.storage.commit().map(|_| outcome).map_err(AccessError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(outcome) => {
                env.settle();
                tracing::debug!(
                    object_type = %mutation.object_type,
                    op = %mutation.op,
                    rows = outcome.affected(),
                    tuples_written = outcome.tuples_written,
                    tuples_deleted = outcome.tuples_deleted,
                    "mutation committed"
                );
                Ok(outcome)
            }
            Err(e) => {
                env.compensate();
                if let Err(rollback) = self.storage.rollback() {
                    tracing::warn!(error = %rollback, "rollback after failed mutation did not complete");
                }
                tracing::debug!(object_type = %mutation.object_type, op = %mutation.op, error = %e, "mutation rolled back");
                Err(e)
            }
        }
    }

    /// Follows `edge` from the records `source` returns.
    ///
    /// Both sides go through their own type's read chain, so the target rows
    /// are filtered for the caller exactly as a direct query would be.
    pub fn traverse(&self, ctx: &CallerContext, source: Query, edge: &str) -> Result<Vec<Record>, AccessError> {
        let route = self.policies.resolve_edge(&source.object_type, edge)?;
        let sources = self.query(ctx, source)?;
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        let target = match route {
            EdgeRoute::Forward { target_type, field } => {
                let ids: BTreeSet<String> = sources.iter().flat_map(|r| r.ids(&field)).collect();
                Query::all(target_type).filter(Predicate::id_in(ids))
            }
            EdgeRoute::Inverse { target_type, field } => {
                Query::all(target_type).filter(Predicate::field_in(field, sources.iter().map(|r| r.id.clone())))
            }
        };
        self.query(ctx, target)
    }
}

fn execute<S: Storage>(
    storage: &mut S,
    env: &Env<'_>,
    policy: &EntityAccessPolicy,
    mutation: &mut Mutation,
) -> Result<MutationOutcome, AccessError> {
    let op = mutation.op;
    for mediator in policy.write_mediators().iter().filter(|m| op.is(m.ops())) {
        tracing::debug!(object_type = %policy.object_type(), mediator = mediator.name(), "before");
        mediator.before(env, policy, &mut *mutation)?;
    }
    policy
        .rules()
        .enforce(env, &OperationDescriptor::mutation(policy.declaration(), &*mutation))?;
    env.ensure_active()?;

    let changes = storage.apply(mutation)?;
    for change in &changes {
        for mediator in policy.write_mediators().iter().filter(|m| op.is(m.ops())) {
            mediator.after(env, policy, change)?;
        }
    }
    Ok(MutationOutcome {
        records: changes.into_iter().filter_map(|c| c.after.or(c.before)).collect(),
        tuples_written: env.tuples_written(),
        tuples_deleted: env.tuples_deleted(),
    })
}
