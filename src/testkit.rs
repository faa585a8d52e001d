//! Fixtures shared by unit, property and conformance tests.
//!
//! The policy set models a small compliance platform:
//!
//! | type | owner | notes |
//! |---|---|---|
//! | `organization` | inherited only | carries creator groups for `control` and `risk` |
//! | `program` | organization | group permissions |
//! | `control` | organization | group permissions, blocked-group read filter |
//! | `risk` | object (`program`) + organization | delegated create via `can_create_risk` |
//! | `task` | object (`program`) | |
//! | `invite` | organization | `org_invite` bypass, single-record reads unfiltered |
//! | `export` | organization | admins may leave the owner empty |
//! | `user_setting` | user | |
//! | `email_verification_token` | user | `email_verify` bypass, reads unfiltered |
//!
//! Fixture construction panics on invalid configuration.

use crate::composer::{options::*, PolicySet};
use crate::context::CallerContext;
use crate::declaration::OwnershipDeclaration;
use crate::engine::AccessEngine;
use crate::rebac::{MemoryRebacStore, Tuple};
use crate::registry::{CreatorRegistry, RegistryConfig};
use crate::storage::MemoryStorage;
use crate::types::{object_type, relation, SkipMode, TokenType};

pub const ORG_1: &str = "org-1";
pub const ORG_2: &str = "org-2";

pub type TestEngine = AccessEngine<MemoryStorage, MemoryRebacStore>;

pub fn registry() -> CreatorRegistry {
    CreatorRegistry::from_config(&RegistryConfig::with_types(["control", "risk"])).expect("fixture registry is valid")
}

pub fn policies() -> Result<PolicySet, crate::error::ConfigError> {
    PolicySet::builder()
        .with_registry(registry())
        .compose(
            OwnershipDeclaration::object(object_type::ORGANIZATION),
            vec![
                with_inherited_enforcement("members reach the organization through their own tuples"),
                without_creator_grant(),
                with_creator_groups(&["control", "risk"]),
            ],
        )?
        .compose(OwnershipDeclaration::organization("program"), vec![with_group_permissions(true)])?
        .compose(
            OwnershipDeclaration::organization("control"),
            vec![with_group_permissions(true), with_blocked_group_filter()],
        )?
        .compose(
            OwnershipDeclaration::object("risk"),
            vec![with_parents(&["program"]), with_organization_owner(false), with_group_permissions(false)],
        )?
        .compose(OwnershipDeclaration::object("task"), vec![with_parents(&["program"])])?
        .compose(
            OwnershipDeclaration::organization("invite"),
            vec![
                with_bypass_tokens(&[TokenType::OrgInvite]),
                with_skip_read_filter(SkipMode::OnlySingleRecordQuery),
            ],
        )?
        .compose(OwnershipDeclaration::organization("export"), vec![allow_empty_for_admin()])?
        .compose(OwnershipDeclaration::user("user_setting", "setting"), Vec::new())?
        .compose(
            OwnershipDeclaration::user("email_verification_token", "email_verification_tokens"),
            vec![with_bypass_tokens(&[TokenType::EmailVerify]), with_skip_read_filter(SkipMode::All)],
        )?
        .build()
}

/// Engine over empty in-memory stores.
pub fn engine() -> TestEngine {
    let policies = policies().expect("fixture policies are valid");
    AccessEngine::new(policies, MemoryStorage::new(), MemoryRebacStore::new())
}

pub fn org_role(org: &str, role: &str, user: &str) -> Tuple {
    Tuple::new(object_type::ORGANIZATION, org, role, object_type::USER, user)
}

pub fn org_admin(org: &str, user: &str) -> Tuple {
    org_role(org, relation::ADMIN, user)
}

pub fn org_member(org: &str, user: &str) -> Tuple {
    org_role(org, relation::MEMBER, user)
}

pub fn group_member(group: &str, user: &str) -> Tuple {
    Tuple::new(object_type::GROUP, group, relation::MEMBER, object_type::USER, user)
}

/// Caller `user` with membership in `orgs`.
pub fn caller(user: &str, orgs: &[&str]) -> CallerContext {
    CallerContext::for_subject(user).with_organizations(orgs.iter().copied())
}
