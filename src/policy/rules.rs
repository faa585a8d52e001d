//! Stock privacy rules.

use crate::context::CallerContextAccessor;
use crate::env::Env;
use crate::error::AccessError;
use crate::types::{object_type, relation, TokenType};

use super::{Decision, OperationDescriptor, Rule};

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAllow;

impl Rule for AlwaysAllow {
    fn evaluate(&self, _env: &Env<'_>, _op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        Ok(Decision::Allow)
    }
}

#[derive(Debug, Clone)]
pub struct AlwaysDeny(pub String);

impl Rule for AlwaysDeny {
    fn evaluate(&self, _env: &Env<'_>, _op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        Ok(Decision::Deny(self.0.clone()))
    }
}

/// Allows when the request carries one of the listed token types.
///
/// A token bound to an owner only allows mutations that write that owner (or
/// no owner at all); otherwise the rule skips.
#[derive(Debug, Clone)]
pub struct AllowIfBypassToken(pub Vec<TokenType>);

impl Rule for AllowIfBypassToken {
    fn evaluate(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        let Some(token) = env.ctx().bypass_token(&self.0) else {
            return Ok(Decision::Skip);
        };
        if let (Some(owner), Some(m)) = (&token.owner_id, op.as_mutation()) {
            if let Some(written) = m.ids(&op.declaration.owner_field).first() {
                if written != owner {
                    tracing::debug!(
                        object_type = op.object_type(),
                        token = token.token_type.as_str(),
                        "token owner does not match mutation owner"
                    );
                    return Ok(Decision::Skip);
                }
            }
        }
        Ok(Decision::Allow)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowIfAdmin;

impl Rule for AllowIfAdmin {
    fn evaluate(&self, env: &Env<'_>, _op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        Ok(if env.ctx().is_admin() { Decision::Allow } else { Decision::Skip })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowIfAuthenticated;

impl Rule for AllowIfAuthenticated {
    fn evaluate(&self, env: &Env<'_>, _op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        Ok(if env.ctx().subject().is_some() { Decision::Allow } else { Decision::Skip })
    }
}

/// Fails with [`AccessError::AuthContextMissing`] for anonymous callers, skips otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyIfNotAuthenticated;

impl Rule for DenyIfNotAuthenticated {
    fn evaluate(&self, env: &Env<'_>, _op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        env.ctx().subject_id()?;
        Ok(Decision::Skip)
    }
}

/// Owner organization of the operation: the one written by the mutation, else the caller's.
fn target_organization(env: &Env<'_>, op: &OperationDescriptor<'_>) -> Option<String> {
    op.as_mutation()
        .zip(op.declaration.organization_field())
        .and_then(|(m, f)| m.ids(f).into_iter().next())
        .or_else(|| env.ctx().resolve_organization(None).ok())
}

/// Checks `relation` on the target organization.
#[derive(Debug, Clone)]
pub struct CheckOrgAccess {
    pub relation: String,
}

impl CheckOrgAccess {
    pub fn new(relation: impl Into<String>) -> Self {
        CheckOrgAccess { relation: relation.into() }
    }
}

impl Rule for CheckOrgAccess {
    fn evaluate(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        if env.ctx().subject().is_none() {
            return Ok(Decision::Skip);
        }
        let Some(org) = target_organization(env, op) else {
            return Ok(Decision::Skip);
        };
        let allowed = env.check(&self.relation, object_type::ORGANIZATION, &org)?;
        Ok(Decision::from_check(allowed, format!("caller lacks {} on organization {}", self.relation, org)))
    }
}

/// Checks `relation` on the record addressed by a single-record mutation.
#[derive(Debug, Clone)]
pub struct CheckObjectAccess {
    pub relation: String,
}

impl CheckObjectAccess {
    pub fn new(relation: impl Into<String>) -> Self {
        CheckObjectAccess { relation: relation.into() }
    }
}

impl Rule for CheckObjectAccess {
    fn evaluate(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        let Some(id) = op.as_mutation().and_then(|m| m.id()) else {
            return Ok(Decision::Skip);
        };
        if env.ctx().subject().is_none() {
            return Ok(Decision::Skip);
        }
        let allowed = env.check(&self.relation, op.object_type(), id)?;
        Ok(Decision::from_check(allowed, format!("caller lacks {} on {}:{}", self.relation, op.object_type(), id)))
    }
}

/// Create check on the owner organization.
///
/// Types listed in the creator registry need `can_create_<type>`; other types
/// need edit access on the organization.
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckCreateAccess;

impl Rule for CheckCreateAccess {
    fn evaluate(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        if op.op().map_or(true, |k| !k.is_create()) || env.ctx().subject().is_none() {
            return Ok(Decision::Skip);
        }
        let Some(org) = target_organization(env, op) else {
            return Ok(Decision::Skip);
        };
        let target = op.object_type();
        let permission = match env.registry() {
            Some(registry) if registry.supports_creation(target) => relation::can_create(target),
            _ => relation::CAN_EDIT.to_string(),
        };
        let allowed = env.check(&permission, object_type::ORGANIZATION, &org)?;
        Ok(Decision::from_check(allowed, format!("caller lacks {} on organization {}", permission, org)))
    }
}

/// Create check on every parent the mutation links to; needs edit on each.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanCreateUnderParents;

impl Rule for CanCreateUnderParents {
    fn evaluate(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        let Some(m) = op.as_mutation().filter(|m| m.op().is_create()) else {
            return Ok(Decision::Skip);
        };
        if env.ctx().subject().is_none() {
            return Ok(Decision::Skip);
        }
        let mut checked = false;
        for (field, kind) in op.declaration.parent_fields() {
            for id in m.ids(&field) {
                checked = true;
                if !env.check(relation::CAN_EDIT, kind, &id)? {
                    return Ok(Decision::deny(format!("caller cannot edit parent {}:{}", kind, id)));
                }
            }
        }
        Ok(if checked { Decision::Allow } else { Decision::Skip })
    }
}
