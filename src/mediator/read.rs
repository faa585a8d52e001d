//! Stock read mediators.

use crate::composer::EntityAccessPolicy;
use crate::env::Env;
use crate::error::AccessError;
use crate::storage::{Predicate, Query};
use crate::types::{field, object_type, relation, SkipMode};

use super::{ownership_predicates, Access, ReadMediator};

/// Restricts queries to records the caller is authorized to see.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthorizedIdFilter;

impl ReadMediator for AuthorizedIdFilter {
    fn name(&self) -> &'static str {
        "authorized_id_filter"
    }

    fn intercept(&self, env: &Env<'_>, policy: &EntityAccessPolicy, query: &mut Query) -> Result<(), AccessError> {
        let decl = policy.declaration();
        let skip = match decl.skip_read_filter {
            SkipMode::All => true,
            SkipMode::OnlySingleRecordQuery => query.is_single_record(),
            SkipMode::None => false,
        };
        if skip {
            tracing::debug!(object_type = %decl.object_type, mode = ?decl.skip_read_filter, "read filter skipped");
            return Ok(());
        }
        let ctx = env.ctx();
        if decl.is_bypassed(ctx) {
            tracing::debug!(object_type = %decl.object_type, "bypass token, read not filtered");
            return Ok(());
        }
        if decl.admin_escape(ctx) {
            tracing::debug!(object_type = %decl.object_type, "admin, read not filtered");
            return Ok(());
        }
        for p in ownership_predicates(env, decl, Access::Read)? {
            query.where_p(p);
        }
        Ok(())
    }
}

/// Hides records that block a group the caller belongs to.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupBlockFilter;

impl ReadMediator for GroupBlockFilter {
    fn name(&self) -> &'static str {
        "group_block_filter"
    }

    fn intercept(&self, env: &Env<'_>, policy: &EntityAccessPolicy, query: &mut Query) -> Result<(), AccessError> {
        let decl = policy.declaration();
        let ctx = env.ctx();
        if decl.skip_read_filter == SkipMode::All || decl.is_bypassed(ctx) || decl.admin_escape(ctx) {
            return Ok(());
        }
        let groups = env.list_authorized(object_type::GROUP, relation::MEMBER)?;
        if groups.is_empty() {
            return Ok(());
        }
        tracing::debug!(object_type = %decl.object_type, groups = groups.len(), "excluding blocked groups");
        query.where_p(Predicate::Not(Box::new(Predicate::field_in(field::BLOCKED_GROUPS, groups))));
        Ok(())
    }
}
