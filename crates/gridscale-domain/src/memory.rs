//! In-memory CityStore
//!
//! Backs unit tests and embedders that do not need persistence. Batches are
//! real: `rollback_batch` restores the snapshot taken by `begin_batch`.

use crate::traits::CityStore;
use crate::{City, CityId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Errors from the in-memory store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    /// An injected write failure (see [`InMemoryStore::fail_after_writes`])
    WriteFailed,
    /// `begin_batch` called while a batch is open
    BatchAlreadyOpen,
    /// `commit_batch`/`rollback_batch` called with no open batch
    NoOpenBatch,
    /// An injected rollback failure (see [`InMemoryStore::fail_rollbacks`])
    RollbackFailed,
}

impl fmt::Display for MemoryStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryStoreError::WriteFailed => write!(f, "write failed"),
            MemoryStoreError::BatchAlreadyOpen => write!(f, "a batch is already open"),
            MemoryStoreError::NoOpenBatch => write!(f, "no open batch"),
            MemoryStoreError::RollbackFailed => write!(f, "rollback failed"),
        }
    }
}

impl std::error::Error for MemoryStoreError {}

/// BTreeMap-backed implementation of [`CityStore`]
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    cities: BTreeMap<CityId, City>,
    snapshot: Option<BTreeMap<CityId, City>>,
    writes_left: Option<usize>,
    rollback_fails: bool,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next `n` writes succeed and fail every write after that
    ///
    /// Used to exercise partial-failure paths of multi-record updates.
    pub fn fail_after_writes(&mut self, n: usize) {
        self.writes_left = Some(n);
    }

    /// Make every `rollback_batch` fail and leave the batch open
    pub fn fail_rollbacks(&mut self) {
        self.rollback_fails = true;
    }

    /// Number of stored cities
    pub fn len(&self) -> usize {
        self.cities.len()
    }

    /// Whether the store holds no cities
    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    fn take_write(&mut self) -> Result<(), MemoryStoreError> {
        match self.writes_left.as_mut() {
            Some(0) => Err(MemoryStoreError::WriteFailed),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl CityStore for InMemoryStore {
    type Error = MemoryStoreError;

    fn get_city(&self, id: CityId) -> Result<Option<City>, Self::Error> {
        Ok(self.cities.get(&id).cloned())
    }

    fn get_cities(&self, ids: &BTreeSet<CityId>) -> Result<BTreeMap<CityId, City>, Self::Error> {
        Ok(ids
            .iter()
            .filter_map(|id| self.cities.get(id).map(|c| (*id, c.clone())))
            .collect())
    }

    fn save_city(&mut self, city: &City) -> Result<(), Self::Error> {
        self.take_write()?;
        self.cities.insert(city.id, city.clone());
        Ok(())
    }

    fn delete_city(&mut self, id: CityId) -> Result<bool, Self::Error> {
        self.take_write()?;
        Ok(self.cities.remove(&id).is_some())
    }

    fn list_cities(&self) -> Result<Vec<City>, Self::Error> {
        Ok(self.cities.values().cloned().collect())
    }

    fn begin_batch(&mut self) -> Result<(), Self::Error> {
        if self.snapshot.is_some() {
            return Err(MemoryStoreError::BatchAlreadyOpen);
        }
        self.snapshot = Some(self.cities.clone());
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<(), Self::Error> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or(MemoryStoreError::NoOpenBatch)
    }

    fn rollback_batch(&mut self) -> Result<(), Self::Error> {
        if self.rollback_fails {
            return Err(MemoryStoreError::RollbackFailed);
        }
        let snapshot = self.snapshot.take().ok_or(MemoryStoreError::NoOpenBatch)?;
        self.cities = snapshot;
        Ok(())
    }
}
