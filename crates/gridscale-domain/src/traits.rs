//! Trait definitions for external interactions
//!
//! These traits define the boundaries between domain logic and infrastructure.
//! Infrastructure implementations live in other crates.

use crate::{City, CityId};
use std::collections::{BTreeMap, BTreeSet};

/// Trait for storing and retrieving cities
///
/// Implemented by the infrastructure layer (gridscale-store) and by
/// [`crate::memory::InMemoryStore`].
///
/// The store does not know about alliance symmetry; it persists whatever
/// `allies` set it is handed. Symmetry is maintained by [`crate::alliance`].
pub trait CityStore {
    /// Error type for store operations
    type Error;

    /// Get a city by ID
    fn get_city(&self, id: CityId) -> Result<Option<City>, Self::Error>;

    /// Get several cities at once
    ///
    /// Ids that do not resolve are absent from the returned map.
    fn get_cities(&self, ids: &BTreeSet<CityId>) -> Result<BTreeMap<CityId, City>, Self::Error>;

    /// Insert or replace a city
    ///
    /// The write is durable once this returns (or once the enclosing batch
    /// commits).
    fn save_city(&mut self, city: &City) -> Result<(), Self::Error>;

    /// Delete a city by ID, returning `false` if it did not exist
    fn delete_city(&mut self, id: CityId) -> Result<bool, Self::Error>;

    /// List every city
    fn list_cities(&self) -> Result<Vec<City>, Self::Error>;

    /// Start grouping writes into one atomic unit
    ///
    /// Stores without transactions keep the default no-op and every save
    /// stands on its own.
    fn begin_batch(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Make every write since [`CityStore::begin_batch`] permanent
    fn commit_batch(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Discard every write since [`CityStore::begin_batch`]
    fn rollback_batch(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
