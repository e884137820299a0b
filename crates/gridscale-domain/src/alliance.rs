//! Alliance consistency engine
//!
//! Alliances are stored as an adjacency set on each city. The store does not
//! enforce symmetry, so every mutation of `allies` goes through this module:
//! for any two distinct cities A and B, `B ∈ A.allies ⇔ A ∈ B.allies`, and no
//! city lists itself.
//!
//! Each multi-record update runs inside a store batch
//! ([`CityStore::begin_batch`]). When the store supports transactions the
//! update is atomic; otherwise a failure part way through can leave the graph
//! temporarily asymmetric, and the next successful update touching the same
//! cities heals it.

use crate::traits::CityStore;
use crate::{City, CityId};
use std::collections::BTreeSet;
use std::fmt;

/// Errors from alliance operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllianceError<E> {
    /// The city the operation targets does not exist
    NotFound(CityId),

    /// The store failed to read or write
    Storage(E),

    /// A batch failed and rolling it back failed too
    ///
    /// The store may still hold the batch open.
    Rollback {
        /// The failure that aborted the batch
        error: E,
        /// The failure returned by `rollback_batch`
        rollback: E,
    },
}

impl<E: fmt::Display> fmt::Display for AllianceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllianceError::NotFound(id) => write!(f, "City not found: {}", id),
            AllianceError::Storage(e) => write!(f, "Storage error: {}", e),
            AllianceError::Rollback { error, rollback } => {
                write!(f, "Storage error: {} (rollback failed: {})", error, rollback)
            }
        }
    }
}

impl<E> std::error::Error for AllianceError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AllianceError::NotFound(_) => None,
            AllianceError::Storage(e) | AllianceError::Rollback { error: e, .. } => Some(e),
        }
    }
}

fn fetch<S: CityStore>(store: &S, id: CityId) -> Result<City, AllianceError<S::Error>> {
    store
        .get_city(id)
        .map_err(AllianceError::Storage)?
        .ok_or(AllianceError::NotFound(id))
}

/// Run `op` inside a store batch, rolling back if it or the commit fails
fn in_batch<S, T, F>(store: &mut S, op: F) -> Result<T, AllianceError<S::Error>>
where
    S: CityStore,
    F: FnOnce(&mut S) -> Result<T, S::Error>,
{
    store.begin_batch().map_err(AllianceError::Storage)?;

    let result = op(&mut *store).and_then(|value| store.commit_batch().map(|()| value));

    result.map_err(|error| match store.rollback_batch() {
        Ok(()) => AllianceError::Storage(error),
        Err(rollback) => AllianceError::Rollback { error, rollback },
    })
}

/// Replace a city's alliance set, updating every affected ally
///
/// - Ids in `desired` that do not resolve to a stored city are dropped.
/// - `target_id` inside `desired` is ignored.
/// - Allies whose membership does not change are not written; the target
///   itself is always re-saved.
///
/// Callers re-read the target to see the resulting set.
///
/// # Errors
///
/// [`AllianceError::NotFound`] if the target does not exist (nothing is
/// written), [`AllianceError::Storage`] if the store fails.
pub fn set_alliances<S: CityStore>(
    store: &mut S,
    target_id: CityId,
    desired: &BTreeSet<CityId>,
) -> Result<(), AllianceError<S::Error>> {
    let target = fetch(store, target_id)?;
    in_batch(store, |store| apply_alliances(store, target, desired))
}

fn apply_alliances<S: CityStore>(
    store: &mut S,
    mut target: City,
    desired: &BTreeSet<CityId>,
) -> Result<(), S::Error> {
    let desired: BTreeSet<CityId> = desired
        .iter()
        .copied()
        .filter(|id| *id != target.id)
        .collect();

    let to_remove: BTreeSet<CityId> = target.allies.difference(&desired).copied().collect();
    let to_add: BTreeSet<CityId> = desired.difference(&target.allies).copied().collect();

    // Allies that are already gone need no cleanup.
    for (_, mut former) in store.get_cities(&to_remove)? {
        if former.allies.remove(&target.id) {
            store.save_city(&former)?;
        }
    }

    let mut joined = BTreeSet::new();
    for (id, mut ally) in store.get_cities(&to_add)? {
        if ally.allies.insert(target.id) {
            store.save_city(&ally)?;
        }
        joined.insert(id);
    }

    target.allies = target
        .allies
        .intersection(&desired)
        .copied()
        .chain(joined)
        .collect();

    store.save_city(&target)
}

/// Save a city's field changes and, optionally, replace its alliance set
///
/// `city` carries the new field values; its `allies` are ignored and the
/// stored set is kept. When `allies` is given it is applied as in
/// [`set_alliances`]. Fields and alliances share one batch, so a failed
/// alliance update leaves the fields unchanged too.
///
/// # Errors
///
/// [`AllianceError::NotFound`] if the city does not exist (nothing is
/// written), [`AllianceError::Storage`] if the store fails.
pub fn update_city<S: CityStore>(
    store: &mut S,
    mut city: City,
    allies: Option<&BTreeSet<CityId>>,
) -> Result<(), AllianceError<S::Error>> {
    city.allies = fetch(store, city.id)?.allies;

    in_batch(store, |store| {
        store.save_city(&city)?;
        match allies {
            Some(allies) => apply_alliances(store, city, allies),
            None => Ok(()),
        }
    })
}

/// Store a new city and form its initial alliances
///
/// The city is persisted with an empty alliance set first, then `allies` is
/// applied as in [`set_alliances`], all in one batch. Returns the stored
/// record.
pub fn insert_city<S: CityStore>(
    store: &mut S,
    mut city: City,
    allies: &BTreeSet<CityId>,
) -> Result<City, AllianceError<S::Error>> {
    city.allies.clear();
    let id = city.id;

    in_batch(store, |store| {
        store.save_city(&city)?;
        apply_alliances(store, city, allies)
    })?;

    fetch(store, id)
}

/// Delete a city and remove it from every ally's set
///
/// Ally cleanup and the record deletion share one batch: if cleanup fails
/// the record is kept, so no dangling references are left behind.
/// Returns the deleted record.
pub fn delete_city<S: CityStore>(
    store: &mut S,
    id: CityId,
) -> Result<City, AllianceError<S::Error>> {
    let city = fetch(store, id)?;

    in_batch(store, |store| {
        // By symmetry the city's own set lists every city that references it.
        for (_, mut ally) in store.get_cities(&city.allies)? {
            if ally.allies.remove(&city.id) {
                store.save_city(&ally)?;
            }
        }
        store.delete_city(city.id).map(|_| ())
    })?;

    Ok(city)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::memory::{InMemoryStore, MemoryStoreError};
    use crate::{Beauty, GeoLocation};

    pub(crate) fn add_city(store: &mut InMemoryStore, name: &str) -> CityId {
        let city = City::new(
            name,
            GeoLocation::new(0.0, 0.0).unwrap(),
            Beauty::Average,
            1000,
        )
        .unwrap();
        let id = city.id;
        store.save_city(&city).unwrap();
        id
    }

    pub(crate) fn allies_of(store: &InMemoryStore, id: CityId) -> BTreeSet<CityId> {
        store.get_city(id).unwrap().unwrap().allies
    }

    /// Every (a, b) pair where a lists b but b does not list a
    pub(crate) fn asymmetric_pairs(store: &InMemoryStore) -> Vec<(CityId, CityId)> {
        let cities = store.list_cities().unwrap();
        let mut pairs = Vec::new();
        for city in &cities {
            for ally in &city.allies {
                let reciprocated = cities
                    .iter()
                    .find(|c| c.id == *ally)
                    .is_some_and(|c| c.allies.contains(&city.id));
                if !reciprocated {
                    pairs.push((city.id, *ally));
                }
            }
        }
        pairs
    }

    fn set(ids: &[CityId]) -> BTreeSet<CityId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_add_alliances_is_symmetric() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");
        let c = add_city(&mut store, "C");

        set_alliances(&mut store, a, &set(&[b, c])).unwrap();

        assert_eq!(allies_of(&store, a), set(&[b, c]));
        assert_eq!(allies_of(&store, b), set(&[a]));
        assert_eq!(allies_of(&store, c), set(&[a]));
        assert!(asymmetric_pairs(&store).is_empty());
    }

    #[test]
    fn test_clearing_alliances_severs_both_sides() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");

        set_alliances(&mut store, a, &set(&[b])).unwrap();
        set_alliances(&mut store, a, &BTreeSet::new()).unwrap();

        assert!(allies_of(&store, a).is_empty());
        assert!(allies_of(&store, b).is_empty());
    }

    #[test]
    fn test_shrinking_alliances() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");
        let c = add_city(&mut store, "C");

        set_alliances(&mut store, a, &set(&[b, c])).unwrap();
        set_alliances(&mut store, a, &set(&[c])).unwrap();

        assert_eq!(allies_of(&store, a), set(&[c]));
        assert!(allies_of(&store, b).is_empty());
        assert_eq!(allies_of(&store, c), set(&[a]));
    }

    #[test]
    fn test_update_from_other_side_keeps_existing_alliances() {
        // City2 allies with City3 while City1 already holds both.
        let mut store = InMemoryStore::new();
        let c1 = add_city(&mut store, "City1");
        let c2 = add_city(&mut store, "City2");
        let c3 = add_city(&mut store, "City3");

        set_alliances(&mut store, c1, &set(&[c2, c3])).unwrap();
        set_alliances(&mut store, c2, &set(&[c1, c3])).unwrap();

        assert_eq!(allies_of(&store, c1), set(&[c2, c3]));
        assert_eq!(allies_of(&store, c2), set(&[c1, c3]));
        assert_eq!(allies_of(&store, c3), set(&[c1, c2]));
    }

    #[test]
    fn test_unresolved_ally_is_dropped() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");

        set_alliances(&mut store, a, &set(&[CityId::new()])).unwrap();

        assert!(allies_of(&store, a).is_empty());
    }

    #[test]
    fn test_self_alliance_is_ignored() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");

        set_alliances(&mut store, a, &set(&[a, b])).unwrap();

        assert_eq!(allies_of(&store, a), set(&[b]));
        assert_eq!(allies_of(&store, b), set(&[a]));
    }

    #[test]
    fn test_unchanged_set_only_rewrites_target() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");
        let c = add_city(&mut store, "C");
        set_alliances(&mut store, a, &set(&[b, c])).unwrap();
        let before = store.list_cities().unwrap();

        // A single write is allowed: the target itself.
        store.fail_after_writes(1);
        set_alliances(&mut store, a, &set(&[b, c])).unwrap();

        assert_eq!(store.list_cities().unwrap(), before);
    }

    #[test]
    fn test_missing_target_is_not_found() {
        let mut store = InMemoryStore::new();
        let b = add_city(&mut store, "B");
        let ghost = CityId::new();

        let err = set_alliances(&mut store, ghost, &set(&[b])).unwrap_err();

        assert_eq!(err, AllianceError::NotFound(ghost));
        assert!(allies_of(&store, b).is_empty());
    }

    #[test]
    fn test_storage_failure_rolls_back() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");
        let c = add_city(&mut store, "C");
        let before = store.list_cities().unwrap();

        store.fail_after_writes(1);
        let err = set_alliances(&mut store, a, &set(&[b, c])).unwrap_err();

        assert_eq!(err, AllianceError::Storage(MemoryStoreError::WriteFailed));
        assert_eq!(store.list_cities().unwrap(), before);
    }

    #[test]
    fn test_asymmetric_state_is_healed() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");

        // B lists A, A does not list B, as after a failed non-transactional update.
        let mut city_b = store.get_city(b).unwrap().unwrap();
        city_b.allies.insert(a);
        store.save_city(&city_b).unwrap();

        set_alliances(&mut store, a, &set(&[b])).unwrap();

        assert_eq!(allies_of(&store, a), set(&[b]));
        assert_eq!(allies_of(&store, b), set(&[a]));
    }

    #[test]
    fn test_insert_city_forms_initial_alliances() {
        let mut store = InMemoryStore::new();
        let b = add_city(&mut store, "B");
        let mut city = City::new(
            "New",
            GeoLocation::new(10.0, 10.0).unwrap(),
            Beauty::Gorgeous,
            5,
        )
        .unwrap();
        // Whatever the caller put here is discarded.
        city.allies.insert(CityId::new());

        let stored = insert_city(&mut store, city, &set(&[b, CityId::new()])).unwrap();

        assert_eq!(stored.allies, set(&[b]));
        assert_eq!(allies_of(&store, b), set(&[stored.id]));
    }

    #[test]
    fn test_delete_removes_dangling_references() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");
        let c = add_city(&mut store, "C");
        set_alliances(&mut store, a, &set(&[b, c])).unwrap();
        set_alliances(&mut store, b, &set(&[a, c])).unwrap();

        let deleted = delete_city(&mut store, a).unwrap();

        assert_eq!(deleted.id, a);
        assert!(store.get_city(a).unwrap().is_none());
        assert_eq!(allies_of(&store, b), set(&[c]));
        assert_eq!(allies_of(&store, c), set(&[b]));
        assert!(asymmetric_pairs(&store).is_empty());
    }

    #[test]
    fn test_delete_missing_city_is_not_found() {
        let mut store = InMemoryStore::new();
        let ghost = CityId::new();

        assert_eq!(
            delete_city(&mut store, ghost).unwrap_err(),
            AllianceError::NotFound(ghost)
        );
    }

    #[test]
    fn test_delete_failure_keeps_record() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");
        let c = add_city(&mut store, "C");
        set_alliances(&mut store, a, &set(&[b, c])).unwrap();

        store.fail_after_writes(1);
        assert!(delete_city(&mut store, a).is_err());

        assert_eq!(allies_of(&store, a), set(&[b, c]));
        assert_eq!(allies_of(&store, b), set(&[a]));
        assert_eq!(allies_of(&store, c), set(&[a]));
    }

    #[test]
    fn test_update_city_saves_fields_and_alliances() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");

        let mut city = store.get_city(a).unwrap().unwrap();
        city.name = "Renamed".to_string();
        city.population = 999;
        update_city(&mut store, city, Some(&set(&[b]))).unwrap();

        let stored = store.get_city(a).unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.population, 999);
        assert_eq!(stored.allies, set(&[b]));
        assert_eq!(allies_of(&store, b), set(&[a]));
    }

    #[test]
    fn test_update_city_fields_only_keeps_stored_allies() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");
        set_alliances(&mut store, a, &set(&[b])).unwrap();

        let mut city = store.get_city(a).unwrap().unwrap();
        city.name = "Renamed".to_string();
        // A stale or edited set on the input does not reach the store.
        city.allies.clear();
        update_city(&mut store, city, None).unwrap();

        assert_eq!(store.get_city(a).unwrap().unwrap().name, "Renamed");
        assert_eq!(allies_of(&store, a), set(&[b]));
        assert_eq!(allies_of(&store, b), set(&[a]));
    }

    #[test]
    fn test_update_city_alliance_failure_keeps_fields() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");
        let before = store.list_cities().unwrap();

        let mut city = store.get_city(a).unwrap().unwrap();
        city.name = "Renamed".to_string();
        city.population = 999;

        // The field save succeeds, the write to B fails.
        store.fail_after_writes(1);
        let err = update_city(&mut store, city, Some(&set(&[b]))).unwrap_err();

        assert_eq!(err, AllianceError::Storage(MemoryStoreError::WriteFailed));
        assert_eq!(store.list_cities().unwrap(), before);
    }

    #[test]
    fn test_update_missing_city_is_not_found() {
        let mut store = InMemoryStore::new();
        let ghost = City::new(
            "Ghost",
            GeoLocation::new(0.0, 0.0).unwrap(),
            Beauty::Ugly,
            1,
        )
        .unwrap();
        let id = ghost.id;

        assert_eq!(
            update_city(&mut store, ghost, None).unwrap_err(),
            AllianceError::NotFound(id)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_rollback_is_reported() {
        let mut store = InMemoryStore::new();
        let a = add_city(&mut store, "A");
        let b = add_city(&mut store, "B");

        store.fail_after_writes(0);
        store.fail_rollbacks();
        let err = set_alliances(&mut store, a, &set(&[b])).unwrap_err();

        assert_eq!(
            err,
            AllianceError::Rollback {
                error: MemoryStoreError::WriteFailed,
                rollback: MemoryStoreError::RollbackFailed,
            }
        );
        assert_eq!(
            err.to_string(),
            "Storage error: write failed (rollback failed: rollback failed)"
        );
        // The batch is still open, so the next one is refused.
        assert_eq!(store.begin_batch(), Err(MemoryStoreError::BatchAlreadyOpen));
    }

    #[test]
    fn test_error_display() {
        let id = CityId::from_value(0);
        let err: AllianceError<MemoryStoreError> = AllianceError::NotFound(id);
        assert_eq!(
            err.to_string(),
            "City not found: 00000000-0000-0000-0000-000000000000"
        );
    }
}
