//! Option functions accepted by [`compose`](super::compose).

use std::sync::Arc;

use super::{ComposeOption, GroupPermissions};
use crate::mediator::{ReadMediator, WriteMediator};
use crate::policy::{RuleRef, ScopedRule};
use crate::types::{SkipMode, TokenType};

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Parent object kinds, each referenced through `<kind>_id`.
pub fn with_parents(kinds: &[&str]) -> ComposeOption {
    let kinds = owned(kinds);
    Box::new(move |c| c.declaration.parent_kinds.extend(kinds))
}

/// Relation used for the owner and creator tuples.
pub fn with_relation(relation: &str) -> ComposeOption {
    let relation = relation.to_string();
    Box::new(move |c| c.declaration.relation = relation)
}

pub fn with_bypass_tokens(tokens: &[TokenType]) -> ComposeOption {
    let tokens = tokens.to_vec();
    Box::new(move |c| {
        for t in tokens {
            if !c.declaration.bypass_tokens.contains(&t) {
                c.declaration.bypass_tokens.push(t);
            }
        }
    })
}

pub fn allow_empty_for_admin() -> ComposeOption {
    Box::new(|c| c.declaration.allow_empty_for_admin = true)
}

/// Adds the organization `owner_id` to an object- or user-owned entity.
pub fn with_organization_owner(allow_empty_for_admin: bool) -> ComposeOption {
    Box::new(move |c| {
        c.declaration.organization_owner = true;
        c.declaration.allow_empty_for_admin |= allow_empty_for_admin;
    })
}

pub fn with_skip_read_filter(mode: SkipMode) -> ComposeOption {
    Box::new(move |c| c.declaration.skip_read_filter = mode)
}

/// Replaces the default write mediator chain.
pub fn with_write_mediators(mediators: Vec<Arc<dyn WriteMediator>>) -> ComposeOption {
    Box::new(move |c| c.write_mediators = Some(mediators))
}

/// Replaces the default read mediator chain.
pub fn with_read_mediators(mediators: Vec<Arc<dyn ReadMediator>>) -> ComposeOption {
    Box::new(move |c| c.read_mediators = Some(mediators))
}

/// Replaces the default query rules.
pub fn with_query_rules(rules: Vec<RuleRef>) -> ComposeOption {
    Box::new(move |c| c.query_rules = Some(rules))
}

/// Replaces the default mutation rules.
pub fn with_mutation_rules(rules: Vec<ScopedRule>) -> ComposeOption {
    Box::new(move |c| c.mutation_rules = Some(rules))
}

/// Adds `editors` and `blocked_groups` list fields, plus `viewers` when `view` is set.
pub fn with_group_permissions(view: bool) -> ComposeOption {
    Box::new(move |c| c.group_permissions = Some(GroupPermissions { view }))
}

/// Adds [`GroupBlockFilter`](crate::mediator::GroupBlockFilter) to the default read chain.
pub fn with_blocked_group_filter() -> ComposeOption {
    Box::new(|c| c.blocked_group_filter = true)
}

/// `<type>_creators` list fields for each creatable type; meant for the organization entity.
pub fn with_creator_groups(types: &[&str]) -> ComposeOption {
    let types = owned(types);
    Box::new(move |c| c.creator_groups.extend(types))
}

/// Marks an object-owned entity with no parent field as enforced purely by inherited relations.
pub fn with_inherited_enforcement(note: &str) -> ComposeOption {
    let note = note.to_string();
    Box::new(move |c| c.declaration.inherited_enforcement = Some(note))
}

pub fn with_owner_field(name: &str) -> ComposeOption {
    let name = name.to_string();
    Box::new(move |c| c.declaration.owner_field = name)
}

pub fn without_creator_grant() -> ComposeOption {
    Box::new(|c| c.declaration.grant_creator = false)
}

/// Creates may omit the owner or parent.
pub fn optional_owner() -> ComposeOption {
    Box::new(|c| c.declaration.required = false)
}
