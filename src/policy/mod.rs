//!
//! Privacy rule chains.
//!
//! Rules are evaluated in order; the first `Allow` or `Deny` wins and `Skip`
//! defers to the next rule. A chain that runs out of rules denies.

pub mod rules;

pub use rules::{
    AllowIfAdmin, AllowIfAuthenticated, AllowIfBypassToken, AlwaysAllow, AlwaysDeny, CanCreateUnderParents,
    CheckCreateAccess, CheckObjectAccess, CheckOrgAccess, DenyIfNotAuthenticated,
};

use std::sync::Arc;

use crate::declaration::OwnershipDeclaration;
use crate::env::Env;
use crate::error::AccessError;
use crate::ops::{Op, OpMask};
use crate::storage::{Query, StorageMutation};

/// Outcome of a single rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
    Skip,
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny(reason.into())
    }

    pub fn from_check(allowed: bool, reason: impl Into<String>) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny(reason.into())
        }
    }
}

#[derive(Clone, Copy)]
pub enum Operation<'a> {
    Query(&'a Query),
    Mutation(&'a dyn StorageMutation),
}

/// What a rule gets to look at.
#[derive(Clone, Copy)]
pub struct OperationDescriptor<'a> {
    pub declaration: &'a OwnershipDeclaration,
    pub operation: Operation<'a>,
}

impl<'a> OperationDescriptor<'a> {
    pub fn query(declaration: &'a OwnershipDeclaration, query: &'a Query) -> Self {
        OperationDescriptor { declaration, operation: Operation::Query(query) }
    }

    pub fn mutation(declaration: &'a OwnershipDeclaration, mutation: &'a dyn StorageMutation) -> Self {
        OperationDescriptor { declaration, operation: Operation::Mutation(mutation) }
    }

    pub fn object_type(&self) -> &'a str {
        &self.declaration.object_type
    }

    /// Mutation kind; `None` for queries.
    pub fn op(&self) -> Option<Op> {
        self.as_mutation().map(|m| m.op())
    }

    pub fn as_mutation(&self) -> Option<&'a dyn StorageMutation> {
        match self.operation {
            Operation::Mutation(m) => Some(m),
            Operation::Query(_) => None,
        }
    }

    pub fn as_query(&self) -> Option<&'a Query> {
        match self.operation {
            Operation::Query(q) => Some(q),
            Operation::Mutation(_) => None,
        }
    }

    /// Label used in denial errors.
    pub fn label(&self) -> &'static str {
        self.op().map_or("query", Op::as_str)
    }
}

impl std::fmt::Debug for OperationDescriptor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("object_type", &self.object_type())
            .field("op", &self.label())
            .finish()
    }
}

pub trait Rule: Send + Sync + std::fmt::Debug {
    fn evaluate(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError>;
}

pub type RuleRef = Arc<dyn Rule>;

/// A mutation rule restricted to some mutation kinds; `ops: None` matches all.
#[derive(Debug, Clone)]
pub struct ScopedRule {
    pub ops: Option<OpMask>,
    pub rule: RuleRef,
}

impl ScopedRule {
    pub fn any(rule: impl Rule + 'static) -> Self {
        ScopedRule { ops: None, rule: Arc::new(rule) }
    }

    /// Runs `rule` only for the kinds in `mask`.
    pub fn on(mask: OpMask, rule: impl Rule + 'static) -> Self {
        ScopedRule { ops: Some(mask), rule: Arc::new(rule) }
    }

    fn applies(&self, op: Option<Op>) -> bool {
        match (self.ops, op) {
            (None, _) => true,
            (Some(mask), Some(op)) => op.is(mask),
            (Some(_), None) => false,
        }
    }
}

fn first_decision<'r>(
    rules: impl Iterator<Item = &'r RuleRef>,
    env: &Env<'_>,
    op: &OperationDescriptor<'_>,
) -> Result<Decision, AccessError> {
    for rule in rules {
        match rule.evaluate(env, op)? {
            Decision::Skip => continue,
            decision => {
                tracing::debug!(object_type = op.object_type(), op = op.label(), rule = ?rule, decision = ?decision, "rule decided");
                return Ok(decision);
            }
        }
    }
    Ok(Decision::deny("no rule allowed the operation"))
}

#[derive(Debug, Clone, Default)]
pub struct RuleChain {
    query_rules: Vec<RuleRef>,
    mutation_rules: Vec<ScopedRule>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(query_rules: Vec<RuleRef>, mutation_rules: Vec<ScopedRule>) -> Self {
        RuleChain { query_rules, mutation_rules }
    }

    #[must_use]
    pub fn query_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.query_rules.push(Arc::new(rule));
        self
    }

    #[must_use]
    pub fn mutation_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.mutation_rules.push(ScopedRule::any(rule));
        self
    }

    #[must_use]
    pub fn on_operation(mut self, mask: OpMask, rule: impl Rule + 'static) -> Self {
        self.mutation_rules.push(ScopedRule::on(mask, rule));
        self
    }

    pub fn query_rules(&self) -> &[RuleRef] {
        &self.query_rules
    }

    pub fn mutation_rules(&self) -> &[ScopedRule] {
        &self.mutation_rules
    }

    pub fn evaluate_query(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        first_decision(self.query_rules.iter(), env, op)
    }

    pub fn evaluate_mutation(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        let kind = op.op();
        first_decision(
            self.mutation_rules.iter().filter(|r| r.applies(kind)).map(|r| &r.rule),
            env,
            op,
        )
    }

    /// Evaluates the matching side of the chain and turns anything but `Allow` into an error.
    pub fn enforce(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<(), AccessError> {
        let decision = match op.operation {
            Operation::Query(_) => self.evaluate_query(env, op)?,
            Operation::Mutation(_) => self.evaluate_mutation(env, op)?,
        };
        match decision {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                tracing::info!(object_type = op.object_type(), op = op.label(), subject = ?env.ctx().subject(), reason = %reason, "denied");
                Err(AccessError::denied(op.object_type(), op.label(), reason))
            }
            Decision::Skip => {
                tracing::info!(object_type = op.object_type(), op = op.label(), subject = ?env.ctx().subject(), "no rule allowed");
                Err(AccessError::denied(op.object_type(), op.label(), "no rule allowed the operation"))
            }
        }
    }
}

/// Conjunction of rules.
///
/// Members run in order. The first `Deny` is returned at once. `Allow` needs
/// every member to allow; any `Skip` without a deny makes the whole rule skip.
#[derive(Debug, Clone)]
pub struct AllOf(pub Vec<RuleRef>);

impl AllOf {
    pub fn new(rules: Vec<RuleRef>) -> Self {
        AllOf(rules)
    }
}

impl Rule for AllOf {
    fn evaluate(&self, env: &Env<'_>, op: &OperationDescriptor<'_>) -> Result<Decision, AccessError> {
        if self.0.is_empty() {
            return Ok(Decision::Skip);
        }
        let mut skipped = false;
        for rule in &self.0 {
            match rule.evaluate(env, op)? {
                Decision::Deny(reason) => return Ok(Decision::Deny(reason)),
                Decision::Skip => skipped = true,
                Decision::Allow => {}
            }
        }
        Ok(if skipped { Decision::Skip } else { Decision::Allow })
    }
}
