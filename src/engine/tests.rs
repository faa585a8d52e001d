#![cfg(test)]

use std::sync::Arc;

use serde_json::json;

use crate::composer::{options::*, EntityAccessPolicy, PolicySet};
use crate::context::{CallerContext, CancellationFlag, PrivacyToken};
use crate::declaration::OwnershipDeclaration;
use crate::engine::AccessEngine;
use crate::env::Env;
use crate::error::{AccessError, ErrorClass};
use crate::mediator::{SetOwnerOnCreate, SyncTuples, WriteMediator};
use crate::rebac::{MemoryRebacStore, RebacStore, Tuple};
use crate::storage::{Change, MemoryStorage, Mutation, Query, Record};
use crate::testkit::{self, caller, group_member, org_admin, org_member, TestEngine, ORG_1, ORG_2};
use crate::types::TokenType;

// --- Test Utilities ---

fn engine_with(tuples: &[Tuple]) -> TestEngine {
    let engine = testkit::engine();
    for t in tuples {
        engine.rebac().grant(t.clone());
    }
    engine
}

fn parent_org(object_type: &str, id: &str, org: &str) -> Tuple {
    Tuple::new(object_type, id, "parent", "organization", org)
}

fn create_program(engine: &mut TestEngine, ctx: &CallerContext, id: &str) -> Record {
    let outcome = engine
        .mutate(ctx, Mutation::create("program").with_id(id).set("name", "Audit"))
        .unwrap();
    outcome.records[0].clone()
}

fn ids(records: &[Record]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

/// Cancels the request once the row has been written.
#[derive(Debug)]
struct CancelAfterApply(CancellationFlag);

impl WriteMediator for CancelAfterApply {
    fn name(&self) -> &'static str {
        "cancel_after_apply"
    }

    fn after(&self, _env: &Env<'_>, _policy: &EntityAccessPolicy, _change: &Change) -> Result<(), AccessError> {
        self.0.cancel();
        Ok(())
    }
}

/// Fails every mutation after the earlier hooks have run.
#[derive(Debug)]
struct FailAfter;

impl WriteMediator for FailAfter {
    fn name(&self) -> &'static str {
        "fail_after"
    }

    fn after(&self, _env: &Env<'_>, policy: &EntityAccessPolicy, _change: &Change) -> Result<(), AccessError> {
        Err(AccessError::denied(policy.object_type(), "create", "rejected by downstream hook"))
    }
}

fn program_engine(mediators: Vec<Arc<dyn WriteMediator>>) -> TestEngine {
    let policies = PolicySet::builder()
        .compose(OwnershipDeclaration::organization("program"), vec![with_write_mediators(mediators)])
        .unwrap()
        .build()
        .unwrap();
    let engine = AccessEngine::new(policies, MemoryStorage::new(), MemoryRebacStore::new());
    engine.rebac().grant(org_admin(ORG_1, "u1"));
    engine
}

// --- Organization-owned entities ---

#[test]
fn test_create_sets_owner_from_context_and_syncs_parent() {
    let mut engine = engine_with(&[org_admin(ORG_1, "u1")]);
    let ctx = caller("u1", &[ORG_1]);
    let outcome = engine
        .mutate(&ctx, Mutation::create("program").with_id("p1").set("name", "Audit"))
        .unwrap();

    assert_eq!(outcome.affected(), 1);
    assert_eq!(outcome.records[0].str_field("owner_id"), Some(ORG_1));
    assert_eq!(outcome.tuples_written, 1);
    assert!(engine.rebac().contains(&parent_org("program", "p1", ORG_1)));
    assert!(!engine.storage().in_transaction());
}

#[test]
fn test_update_after_switching_organization_affects_zero_rows() {
    let mut engine = engine_with(&[org_admin(ORG_1, "u1")]);
    create_program(&mut engine, &caller("u1", &[ORG_1]), "p1");

    let switched = caller("u1", &[ORG_2]);
    let outcome = engine
        .mutate(&switched, Mutation::update_one("program", "p1").set("name", "Renamed"))
        .unwrap();
    assert_eq!(outcome.affected(), 0);
    assert_eq!(engine.storage().get("program", "p1").unwrap().field("name"), Some(&json!("Audit")));

    let outcome = engine
        .mutate(&caller("u1", &[ORG_1]), Mutation::update_one("program", "p1").set("name", "Renamed"))
        .unwrap();
    assert_eq!(outcome.affected(), 1);
}

#[test]
fn test_member_without_edit_grant_updates_nothing() {
    let mut engine = engine_with(&[org_admin(ORG_1, "u1"), org_member(ORG_1, "u2")]);
    create_program(&mut engine, &caller("u1", &[ORG_1]), "p1");

    let outcome = engine
        .mutate(&caller("u2", &[ORG_1]), Mutation::update("program").set("name", "x"))
        .unwrap();
    assert_eq!(outcome.affected(), 0);
}

#[test]
fn test_read_excludes_other_organizations() {
    let engine_rows = [
        Record::new("program", "p1").with_field("owner_id", ORG_1),
        Record::new("program", "p2").with_field("owner_id", ORG_2),
    ];
    let mut engine = testkit::engine();
    for r in engine_rows {
        engine.storage_mut().seed(r);
    }

    let rows = engine.query(&caller("u1", &[ORG_1]), Query::all("program")).unwrap();
    assert_eq!(ids(&rows), vec!["p1"]);

    let rows = engine.query(&caller("u3", &[]), Query::all("program")).unwrap();
    assert!(rows.is_empty());

    let err = engine.query(&CallerContext::anonymous(), Query::all("program")).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Unauthenticated);
}

#[test]
fn test_owner_field_cannot_change() {
    let mut engine = engine_with(&[org_admin(ORG_1, "u1")]);
    let ctx = caller("u1", &[ORG_1, ORG_2]).with_active_organization(ORG_1);
    create_program(&mut engine, &ctx, "p1");

    let err = engine
        .mutate(&ctx, Mutation::update_one("program", "p1").set("owner_id", ORG_2))
        .unwrap_err();
    assert_eq!(err, AccessError::ImmutableField { object_type: "program".into(), field: "owner_id".into() });
    assert_eq!(engine.storage().get("program", "p1").unwrap().str_field("owner_id"), Some(ORG_1));
}

#[test]
fn test_create_without_edit_on_organization_is_forbidden() {
    let mut engine = engine_with(&[org_member(ORG_1, "u2")]);
    let err = engine
        .mutate(&caller("u2", &[ORG_1]), Mutation::create("program"))
        .unwrap_err();
    assert!(matches!(err, AccessError::PolicyDenied { .. }));
    assert_eq!(err.class(), ErrorClass::Forbidden);
    assert!(engine.storage().is_empty());
}

#[test]
fn test_store_outage_is_not_a_denial() {
    let mut engine = engine_with(&[org_admin(ORG_1, "u1")]);
    engine.rebac().set_unavailable(true);
    let err = engine
        .mutate(&caller("u1", &[ORG_1]), Mutation::create("program"))
        .unwrap_err();
    assert!(matches!(err, AccessError::AccessCheckUnavailable(_)));
    assert_eq!(err.class(), ErrorClass::Unavailable);
    assert!(err.is_retryable());
    assert!(engine.storage().is_empty());
}

// --- Tuple synchronization inside the transaction ---

#[test]
fn test_sync_failure_rolls_back_the_record() {
    let mut engine = engine_with(&[org_admin(ORG_1, "u1")]);
    engine.rebac().set_reject_writes(true);
    let err = engine
        .mutate(&caller("u1", &[ORG_1]), Mutation::create("program").with_id("p1"))
        .unwrap_err();
    assert!(matches!(err, AccessError::TupleSyncFailure(_)));
    assert!(engine.storage().is_empty());
    assert!(!engine.storage().in_transaction());
}

#[test]
fn test_later_failure_reverts_written_tuples() {
    let mut engine = program_engine(vec![Arc::new(SetOwnerOnCreate), Arc::new(SyncTuples), Arc::new(FailAfter)]);
    let err = engine
        .mutate(&caller("u1", &[ORG_1]), Mutation::create("program").with_id("p1"))
        .unwrap_err();
    assert!(matches!(err, AccessError::PolicyDenied { .. }));
    assert!(engine.storage().is_empty());
    assert_eq!(engine.rebac().write_calls(), 1);
    assert!(!engine.rebac().contains(&parent_org("program", "p1", ORG_1)));
}

#[test]
fn test_cancellation_rolls_back_before_sync() {
    let flag = CancellationFlag::default();
    let mut engine = program_engine(vec![
        Arc::new(SetOwnerOnCreate),
        Arc::new(CancelAfterApply(flag.clone())),
        Arc::new(SyncTuples),
    ]);
    let ctx = caller("u1", &[ORG_1]).with_cancellation(flag);
    let err = engine.mutate(&ctx, Mutation::create("program").with_id("p1")).unwrap_err();
    assert_eq!(err, AccessError::Cancelled);
    assert!(engine.storage().is_empty());
    assert_eq!(engine.rebac().write_calls(), 0);
}

#[test]
fn test_group_field_updates_sync_only_the_delta() {
    let mut engine = engine_with(&[org_admin(ORG_1, "u1")]);
    let ctx = caller("u1", &[ORG_1]);
    let created = engine
        .mutate(&ctx, Mutation::create("control").with_id("c1").set("editors", json!(["g1"])))
        .unwrap();
    assert_eq!(created.tuples_written, 2);

    let changed = engine
        .mutate(&ctx, Mutation::update_one("control", "c1").set("editors", json!(["g2"])))
        .unwrap();
    assert_eq!((changed.tuples_written, changed.tuples_deleted), (1, 1));
    let g2 = Tuple::new("control", "c1", "editor", "group", "g2").with_subject_relation("member");
    assert!(engine.rebac().contains(&g2));

    let calls = (engine.rebac().write_calls(), engine.rebac().delete_calls());
    let replay = engine
        .mutate(&ctx, Mutation::update_one("control", "c1").set("editors", json!(["g2"])))
        .unwrap();
    assert_eq!((replay.tuples_written, replay.tuples_deleted), (0, 0));
    assert_eq!((engine.rebac().write_calls(), engine.rebac().delete_calls()), calls);
}

#[test]
fn test_soft_delete_keeps_tuples_hard_delete_removes_them() {
    let mut engine = engine_with(&[org_admin(ORG_1, "u1")]);
    let ctx = caller("u1", &[ORG_1]);
    create_program(&mut engine, &ctx, "p1");
    let parent = parent_org("program", "p1", ORG_1);

    let soft = engine.mutate(&ctx, Mutation::delete_one("program", "p1")).unwrap();
    assert_eq!(soft.affected(), 1);
    assert_eq!(soft.tuples_deleted, 0);
    assert!(engine.rebac().contains(&parent));
    assert!(engine.query(&ctx, Query::all("program")).unwrap().is_empty());

    let hard = engine.mutate(&ctx, Mutation::delete_one("program", "p1").hard()).unwrap();
    assert_eq!(hard.affected(), 1);
    assert_eq!(hard.tuples_deleted, 1);
    assert!(!engine.rebac().contains(&parent));
    assert!(engine.storage().get("program", "p1").is_none());
}

// --- Object-owned entities ---

#[test]
fn test_object_owned_record_visible_once_parent_access_is_granted() {
    let mut engine = engine_with(&[Tuple::new("program", "program-42", "editor", "user", "u0")]);
    engine
        .mutate(
            &CallerContext::for_subject("u0"),
            Mutation::create("task").with_id("t1").set("program_id", "program-42"),
        )
        .unwrap();
    let stored = engine.storage().get("task", "t1").unwrap();
    assert_eq!(stored.str_field("owner_id"), None);
    assert_eq!(stored.str_field("created_by"), Some("u0"));

    let ctx = CallerContext::for_subject("u1");
    assert!(engine.query(&ctx, Query::all("task")).unwrap().is_empty());

    engine
        .rebac()
        .write_tuples(&[Tuple::new("program", "program-42", "editor", "user", "u1")])
        .unwrap();
    let rows = engine.query(&ctx, Query::all("task")).unwrap();
    assert_eq!(ids(&rows), vec!["t1"]);
}

#[test]
fn test_object_create_requires_edit_on_parent() {
    let mut engine = engine_with(&[Tuple::new("program", "p1", "viewer", "user", "u1")]);
    let ctx = CallerContext::for_subject("u1");
    let err = engine
        .mutate(&ctx, Mutation::create("task").set("program_id", "p1"))
        .unwrap_err();
    assert!(matches!(err, AccessError::PolicyDenied { .. }));

    let err = engine.mutate(&ctx, Mutation::create("task")).unwrap_err();
    assert_eq!(err, AccessError::MissingOwner { object_type: "task".into(), field: "program_id".into() });
}

#[test]
fn test_anonymous_object_create_needs_subject() {
    let mut engine = engine_with(&[Tuple::new("program", "p1", "editor", "user", "u1")]);
    let err = engine
        .mutate(&CallerContext::anonymous(), Mutation::create("task").set("program_id", "p1"))
        .unwrap_err();
    assert!(matches!(err, AccessError::AuthContextMissing(_)));
    assert_eq!(err.class(), ErrorClass::Unauthenticated);
    assert!(engine.storage().is_empty());
}

#[test]
fn test_delegated_create_through_creator_group() {
    let mut engine = engine_with(&[
        org_admin(ORG_1, "admin"),
        org_member(ORG_1, "u2"),
        org_member(ORG_1, "u3"),
        group_member("g1", "u2"),
        Tuple::new("program", "p1", "editor", "user", "u2"),
        Tuple::new("program", "p1", "editor", "user", "u3"),
    ]);
    engine.storage_mut().seed(Record::new("organization", ORG_1));

    // creator groups are edited on the organization record and synced like any other grant
    let admin = caller("admin", &[ORG_1]);
    let outcome = engine
        .mutate(&admin, Mutation::update_one("organization", ORG_1).set("risk_creators", json!(["g1"])))
        .unwrap();
    assert_eq!(outcome.tuples_written, 1);

    let risk = || Mutation::create("risk").set("program_id", "p1");
    let created = engine.mutate(&caller("u2", &[ORG_1]), risk()).unwrap();
    assert_eq!(created.records[0].str_field("owner_id"), Some(ORG_1));

    let err = engine.mutate(&caller("u3", &[ORG_1]), risk()).unwrap_err();
    assert!(matches!(err, AccessError::PolicyDenied { .. }));
}

// --- User-owned entities and bypass tokens ---

#[test]
fn test_user_owned_rows_are_private_to_owner() {
    let mut engine = testkit::engine();
    let u1 = CallerContext::for_subject("u1");
    engine
        .mutate(&u1, Mutation::create("user_setting").with_id("s1").set("theme", "dark"))
        .unwrap();
    assert!(engine.rebac().contains(&Tuple::new("user_setting", "s1", "parent", "user", "u1")));

    assert_eq!(engine.query(&u1, Query::all("user_setting")).unwrap().len(), 1);
    assert!(engine
        .query(&CallerContext::for_subject("u2"), Query::all("user_setting"))
        .unwrap()
        .is_empty());

    let err = engine
        .mutate(&CallerContext::anonymous(), Mutation::create("user_setting"))
        .unwrap_err();
    assert!(matches!(err, AccessError::AuthContextMissing(_)));
}

#[test]
fn test_email_verify_token_works_without_subject() {
    let mut engine = testkit::engine();
    let ctx = CallerContext::anonymous().with_token(PrivacyToken::new(TokenType::EmailVerify));

    engine
        .mutate(
            &ctx,
            Mutation::create("email_verification_token").with_id("e1").set("owner_id", "u1").set("token", "abc"),
        )
        .unwrap();
    assert!(engine.rebac().contains(&Tuple::new("email_verification_token", "e1", "parent", "user", "u1")));

    let rows = engine.query(&ctx, Query::all("email_verification_token")).unwrap();
    assert_eq!(ids(&rows), vec!["e1"]);

    let outcome = engine
        .mutate(&ctx, Mutation::update_one("email_verification_token", "e1").set("verified", true))
        .unwrap();
    assert_eq!(outcome.affected(), 1);
}

#[test]
fn test_undeclared_token_type_has_no_effect() {
    let mut engine = testkit::engine();
    engine.storage_mut().seed(Record::new("invite", "i1").with_field("owner_id", ORG_1));
    engine.storage_mut().seed(Record::new("invite", "i2").with_field("owner_id", ORG_2));

    let wrong = CallerContext::anonymous().with_token(PrivacyToken::new(TokenType::SignUp));
    assert!(matches!(
        engine.query(&wrong, Query::all("invite")),
        Err(AccessError::AuthContextMissing(_))
    ));

    let invited = CallerContext::anonymous().with_token(PrivacyToken::new(TokenType::OrgInvite));
    assert_eq!(engine.query(&invited, Query::all("invite")).unwrap().len(), 2);
}

#[test]
fn test_single_record_reads_skip_filter_where_declared() {
    let mut engine = testkit::engine();
    engine.storage_mut().seed(Record::new("invite", "i1").with_field("owner_id", ORG_2));
    let ctx = caller("u1", &[ORG_1]);
    assert_eq!(ids(&engine.query(&ctx, Query::only("invite", "i1")).unwrap()), vec!["i1"]);
    assert!(engine.query(&ctx, Query::all("invite")).unwrap().is_empty());
}

#[test]
fn test_admin_may_leave_owner_empty() {
    let mut engine = testkit::engine();
    engine.storage_mut().seed(Record::new("export", "x2").with_field("owner_id", ORG_2));
    let admin = CallerContext::for_subject("ops").with_admin(true);

    let outcome = engine.mutate(&admin, Mutation::create("export").with_id("x1")).unwrap();
    assert_eq!(outcome.records[0].str_field("owner_id"), None);
    assert_eq!(outcome.tuples_written, 0);
    assert_eq!(engine.query(&admin, Query::all("export")).unwrap().len(), 2);

    let member = caller("u1", &[ORG_1]);
    assert!(engine.query(&member, Query::all("export")).unwrap().is_empty());
}

#[test]
fn test_blocked_group_hides_rows() {
    let mut engine = engine_with(&[group_member("g9", "u1")]);
    engine
        .storage_mut()
        .seed(Record::new("control", "c1").with_field("owner_id", ORG_1).with_field("blocked_groups", json!(["g9"])));
    engine.storage_mut().seed(Record::new("control", "c2").with_field("owner_id", ORG_1));
    let rows = engine.query(&caller("u1", &[ORG_1]), Query::all("control")).unwrap();
    assert_eq!(ids(&rows), vec!["c2"]);
}

// --- Traversal ---

#[test]
fn test_traversal_applies_target_read_chain() {
    let mut engine = engine_with(&[Tuple::new("task", "t1", "viewer", "user", "u1")]);
    engine.storage_mut().seed(Record::new("program", "p1").with_field("owner_id", ORG_1));
    engine.storage_mut().seed(Record::new("task", "t1").with_field("program_id", "p1"));
    engine.storage_mut().seed(Record::new("task", "t2").with_field("program_id", "p1"));

    let ctx = caller("u1", &[ORG_1]);
    let tasks = engine.traverse(&ctx, Query::all("program"), "tasks").unwrap();
    assert_eq!(ids(&tasks), vec!["t1"]);

    let programs = engine.traverse(&ctx, Query::all("task"), "program").unwrap();
    assert_eq!(ids(&programs), vec!["p1"]);

    // the task is still visible, its program is not
    let elsewhere = caller("u1", &[ORG_2]);
    assert!(engine.traverse(&elsewhere, Query::all("task"), "program").unwrap().is_empty());

    assert!(matches!(
        engine.traverse(&ctx, Query::all("program"), "nothing"),
        Err(AccessError::Config(_))
    ));
}

#[test]
fn test_unknown_entity_type() {
    let engine = testkit::engine();
    assert_eq!(
        engine.query(&caller("u1", &[ORG_1]), Query::all("ghost")),
        Err(AccessError::UnknownEntityType("ghost".into()))
    );
}
