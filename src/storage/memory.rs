//! In-memory [`Storage`] with snapshot transactions.
//!
//! Used by the tests and as a template for real storage adapters. A
//! transaction takes a full snapshot on `begin` and restores it on
//! `rollback`, which is enough to prove that a failed tuple sync leaves no
//! trace of the mutation.

use std::collections::BTreeMap;

use super::{Change, Mutation, Query, Record, Storage, StorageError};
use crate::ops::Op;

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: BTreeMap<(String, String), Record>,
    snapshot: Option<BTreeMap<(String, String), Record>>,
    clock: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record directly, bypassing every mediator.
    pub fn seed(&mut self, record: Record) {
        self.records.insert((record.object_type.clone(), record.id.clone()), record);
    }

    /// Looks a record up directly, including soft-deleted ones.
    pub fn get(&self, object_type: &str, id: &str) -> Option<&Record> {
        self.records.get(&(object_type.to_string(), id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn create(&mut self, mutation: &Mutation) -> Result<Vec<Change>, StorageError> {
        let id = mutation
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = (mutation.object_type.clone(), id.clone());
        if self.records.contains_key(&key) {
            return Err(StorageError::AlreadyExists(id));
        }
        let mut record = Record::new(mutation.object_type.clone(), id);
        for (field, value) in &mutation.set {
            record.fields.insert(field.clone(), value.clone());
        }
        self.records.insert(key, record.clone());
        Ok(vec![Change { before: None, after: Some(record) }])
    }

    fn affected_keys(&self, mutation: &Mutation) -> Vec<(String, String)> {
        self.records
            .iter()
            .filter(|(_, r)| mutation.targets(r))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn update(&mut self, mutation: &Mutation) -> Result<Vec<Change>, StorageError> {
        let mut changes = Vec::new();
        for key in self.affected_keys(mutation) {
            if let Some(record) = self.records.get_mut(&key) {
                let before = record.clone();
                for (field, value) in &mutation.set {
                    record.fields.insert(field.clone(), value.clone());
                }
                for field in &mutation.cleared {
                    record.fields.remove(field);
                }
                changes.push(Change { before: Some(before), after: Some(record.clone()) });
            }
        }
        Ok(changes)
    }

    fn delete(&mut self, mutation: &Mutation) -> Result<Vec<Change>, StorageError> {
        let mut changes = Vec::new();
        let stamp = self.tick();
        for key in self.affected_keys(mutation) {
            if mutation.hard_delete {
                if let Some(before) = self.records.remove(&key) {
                    changes.push(Change { before: Some(before), after: None });
                }
            } else if let Some(record) = self.records.get_mut(&key) {
                let before = record.clone();
                record.deleted_at = Some(stamp);
                changes.push(Change { before: Some(before), after: Some(record.clone()) });
            }
        }
        Ok(changes)
    }
}

impl Storage for MemoryStorage {
    fn begin(&mut self) -> Result<(), StorageError> {
        if self.snapshot.is_some() {
            return Err(StorageError::TransactionInProgress);
        }
        self.snapshot = Some(self.records.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.snapshot.take().map(|_| ()).ok_or(StorageError::NoTransaction)
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        let snapshot = self.snapshot.take().ok_or(StorageError::NoTransaction)?;
        self.records = snapshot;
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<Vec<Record>, StorageError> {
        Ok(self.records.values().filter(|r| query.matches(r)).cloned().collect())
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<Vec<Change>, StorageError> {
        match mutation.op {
            Op::Create => self.create(mutation),
            Op::Update | Op::UpdateOne => self.update(mutation),
            Op::Delete | Op::DeleteOne => self.delete(mutation),
        }
    }
}
