//! In-process ReBAC store for tests and local development.
//!
//! Implements a small fixed permission model, enough to exercise the layer
//! end to end:
//! - `can_view` is granted by viewer, editor, owner, admin, member, parent
//! - `can_edit` is granted by editor, owner, admin, parent
//! - `can_delete` is granted by owner, admin, parent
//! - `can_create_<t>` is granted by `<t>_creator`, owner, admin
//! - usersets (`group:g#member`) are followed
//! - a `parent` tuple pointing at another object inherits that object's `can_*` permissions
//! - `blocked` removes view and edit
//!
//! It also counts write/delete calls and can simulate an outage.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use super::{AccessCheck, RebacStore, StoreError, Tuple};
use crate::types::relation;

const MAX_DEPTH: usize = 8;

#[derive(Debug, Default)]
struct Inner {
    tuples: BTreeSet<Tuple>,
    write_calls: usize,
    delete_calls: usize,
    unavailable: bool,
    reject_writes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryRebacStore {
    inner: Mutex<Inner>,
}

impl MemoryRebacStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another test thread panicked mid-call; the set is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seeds tuples directly, without counting a write call.
    pub fn grant(&self, tuple: Tuple) {
        self.lock().tuples.insert(tuple);
    }

    pub fn revoke(&self, tuple: &Tuple) {
        self.lock().tuples.remove(tuple);
    }

    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.lock().tuples.contains(tuple)
    }

    pub fn tuples(&self) -> Vec<Tuple> {
        self.lock().tuples.iter().cloned().collect()
    }

    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }

    /// Every call fails with [`StoreError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Writes and deletes fail with [`StoreError::Rejected`] while set; checks still work.
    pub fn set_reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }
}

fn granting_relations(permission: &str) -> Vec<String> {
    match permission {
        relation::CAN_VIEW => [
            relation::VIEWER,
            relation::EDITOR,
            relation::OWNER,
            relation::ADMIN,
            relation::MEMBER,
            relation::PARENT,
        ]
        .iter()
        .map(|r| r.to_string())
        .collect(),
        relation::CAN_EDIT => [relation::EDITOR, relation::OWNER, relation::ADMIN, relation::PARENT]
            .iter()
            .map(|r| r.to_string())
            .collect(),
        relation::CAN_DELETE => [relation::OWNER, relation::ADMIN, relation::PARENT]
            .iter()
            .map(|r| r.to_string())
            .collect(),
        other => match other.strip_prefix("can_create_") {
            Some(object_type) => vec![
                relation::creator(object_type),
                relation::OWNER.to_string(),
                relation::ADMIN.to_string(),
            ],
            None => vec![other.to_string()],
        },
    }
}

fn inherits_through_parent(permission: &str) -> bool {
    matches!(permission, relation::CAN_VIEW | relation::CAN_EDIT | relation::CAN_DELETE)
}

struct Subject<'a> {
    kind: &'a str,
    id: &'a str,
}

/// Direct or userset relation between subject and object.
fn is_related(tuples: &BTreeSet<Tuple>, subject: &Subject<'_>, rel: &str, object_type: &str, object_id: &str, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    tuples
        .iter()
        .filter(|t| t.object_type == object_type && t.object_id == object_id && t.relation == rel)
        .any(|t| match &t.subject_relation {
            None => t.subject_type == subject.kind && t.subject_id == subject.id,
            Some(userset) => is_related(tuples, subject, userset, &t.subject_type, &t.subject_id, depth + 1),
        })
}

fn has_permission(
    tuples: &BTreeSet<Tuple>,
    subject: &Subject<'_>,
    permission: &str,
    object_type: &str,
    object_id: &str,
    depth: usize,
) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    if matches!(permission, relation::CAN_VIEW | relation::CAN_EDIT)
        && is_related(tuples, subject, relation::BLOCKED, object_type, object_id, 0)
    {
        return false;
    }
    if granting_relations(permission)
        .iter()
        .any(|rel| is_related(tuples, subject, rel, object_type, object_id, 0))
    {
        return true;
    }
    if !inherits_through_parent(permission) {
        return false;
    }
    tuples
        .iter()
        .filter(|t| {
            t.object_type == object_type
                && t.object_id == object_id
                && t.relation == relation::PARENT
                && t.subject_relation.is_none()
                && !(t.subject_type == subject.kind && t.subject_id == subject.id)
        })
        .any(|t| has_permission(tuples, subject, permission, &t.subject_type, &t.subject_id, depth + 1))
}

impl RebacStore for MemoryRebacStore {
    fn check_access(&self, check: &AccessCheck) -> Result<bool, StoreError> {
        let inner = self.lock();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        let subject = Subject { kind: &check.subject_type, id: &check.subject_id };
        Ok(has_permission(&inner.tuples, &subject, &check.relation, &check.object_type, &check.object_id, 0))
    }

    fn list_authorized_object_ids(
        &self,
        subject_type: &str,
        subject_id: &str,
        object_type: &str,
        relation: &str,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        let subject = Subject { kind: subject_type, id: subject_id };
        let candidates: BTreeSet<&str> = inner
            .tuples
            .iter()
            .filter(|t| t.object_type == object_type)
            .map(|t| t.object_id.as_str())
            .collect();
        Ok(candidates
            .into_iter()
            .filter(|id| has_permission(&inner.tuples, &subject, relation, object_type, id, 0))
            .map(str::to_string)
            .collect())
    }

    fn write_tuples(&self, tuples: &[Tuple]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        if inner.reject_writes {
            return Err(StoreError::Rejected("writes disabled".into()));
        }
        inner.write_calls += 1;
        inner.tuples.extend(tuples.iter().cloned());
        Ok(())
    }

    fn delete_tuples(&self, tuples: &[Tuple]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        if inner.reject_writes {
            return Err(StoreError::Rejected("writes disabled".into()));
        }
        inner.delete_calls += 1;
        for t in tuples {
            inner.tuples.remove(t);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(subject: &str, rel: &str, object_type: &str, object_id: &str) -> AccessCheck {
        AccessCheck {
            subject_type: "user".into(),
            subject_id: subject.into(),
            relation: rel.into(),
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    #[test]
    fn editor_grants_edit_and_view() {
        let store = MemoryRebacStore::new();
        store.grant(Tuple::new("program", "p1", "editor", "user", "u1"));
        assert!(store.check_access(&check("u1", "can_edit", "program", "p1")).unwrap());
        assert!(store.check_access(&check("u1", "can_view", "program", "p1")).unwrap());
        assert!(!store.check_access(&check("u1", "can_delete", "program", "p1")).unwrap());
        assert!(!store.check_access(&check("u2", "can_view", "program", "p1")).unwrap());
    }

    #[test]
    fn permissions_inherit_through_parent() {
        let store = MemoryRebacStore::new();
        store.grant(Tuple::new("control", "c1", "parent", "program", "p1"));
        store.grant(Tuple::new("program", "p1", "editor", "user", "u1"));
        assert!(store.check_access(&check("u1", "can_edit", "control", "c1")).unwrap());
        assert_eq!(
            store.list_authorized_object_ids("user", "u1", "control", "can_view").unwrap(),
            vec!["c1".to_string()]
        );
    }

    #[test]
    fn group_membership_is_followed_and_blocked_wins() {
        let store = MemoryRebacStore::new();
        store.grant(Tuple::new("risk", "r1", "viewer", "group", "g1").with_subject_relation("member"));
        store.grant(Tuple::new("group", "g1", "member", "user", "u1"));
        assert!(store.check_access(&check("u1", "can_view", "risk", "r1")).unwrap());

        store.grant(Tuple::new("risk", "r1", "blocked", "user", "u1"));
        assert!(!store.check_access(&check("u1", "can_view", "risk", "r1")).unwrap());
    }

    #[test]
    fn creator_relation_grants_can_create() {
        let store = MemoryRebacStore::new();
        store.grant(
            Tuple::new("organization", "org-1", "control_creator", "group", "g1").with_subject_relation("member"),
        );
        store.grant(Tuple::new("group", "g1", "member", "user", "u1"));
        assert!(store.check_access(&check("u1", "can_create_control", "organization", "org-1")).unwrap());
        assert!(!store.check_access(&check("u1", "can_create_risk", "organization", "org-1")).unwrap());
    }

    #[test]
    fn writes_are_idempotent_and_counted() {
        let store = MemoryRebacStore::new();
        let t = Tuple::new("control", "c1", "parent", "organization", "org-1");
        store.write_tuples(&[t.clone()]).unwrap();
        store.write_tuples(&[t.clone()]).unwrap();
        assert_eq!(store.tuples().len(), 1);
        assert_eq!(store.write_calls(), 2);
        store.delete_tuples(&[t.clone()]).unwrap();
        store.delete_tuples(&[t]).unwrap();
        assert!(store.tuples().is_empty());
    }

    #[test]
    fn outage_is_reported_as_unavailable() {
        let store = MemoryRebacStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.check_access(&check("u1", "can_view", "program", "p1")),
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(store.write_tuples(&[]), Err(StoreError::Unavailable(_))));
    }
}
