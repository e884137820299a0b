//! Allied power computation
//!
//! A city's allied power is its own population plus a distance-weighted share
//! of each ally's population:
//!
//! | Great-circle distance | Ally contribution |
//! |-----------------------|-------------------|
//! | d <= 1000 km          | population        |
//! | 1000 < d <= 10000 km  | population / 2    |
//! | d > 10000 km          | population / 4    |
//!
//! Fractions are rounded half to even, in integer arithmetic, so the result
//! does not depend on floating point formatting or platform rounding.

use crate::alliance::AllianceError;
use crate::traits::CityStore;
use crate::{City, CityId, GeoLocation};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Mean Earth radius used for great-circle distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Allies at or within this distance count in full
pub const FULL_WEIGHT_MAX_KM: f64 = 1000.0;

/// Allies at or within this distance (and beyond [`FULL_WEIGHT_MAX_KM`]) count half
pub const HALF_WEIGHT_MAX_KM: f64 = 10000.0;

/// Weighting band an ally falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceTier {
    /// Within [`FULL_WEIGHT_MAX_KM`]
    Near,
    /// Within [`HALF_WEIGHT_MAX_KM`]
    Far,
    /// Beyond [`HALF_WEIGHT_MAX_KM`]
    Remote,
}

impl DistanceTier {
    /// Classify a distance in kilometers
    pub fn for_distance(distance_km: f64) -> Self {
        if distance_km > HALF_WEIGHT_MAX_KM {
            DistanceTier::Remote
        } else if distance_km > FULL_WEIGHT_MAX_KM {
            DistanceTier::Far
        } else {
            DistanceTier::Near
        }
    }

    /// Divisor applied to the ally's population
    pub fn divisor(&self) -> u64 {
        match self {
            DistanceTier::Near => 1,
            DistanceTier::Far => 2,
            DistanceTier::Remote => 4,
        }
    }
}

/// Great-circle distance in kilometers (haversine formula)
pub fn haversine_km(from: GeoLocation, to: GeoLocation) -> f64 {
    let d_lat = (to.latitude - from.latitude).to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + from.latitude.to_radians().cos()
            * to.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1 for antipodal points.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// `value / divisor` rounded half to even
pub fn div_round_half_even(value: u64, divisor: u64) -> u64 {
    let quotient = value / divisor;
    let remainder = value % divisor;

    match (remainder * 2).cmp(&divisor) {
        Ordering::Less => quotient,
        Ordering::Greater => quotient + 1,
        Ordering::Equal if quotient % 2 == 0 => quotient,
        Ordering::Equal => quotient + 1,
    }
}

/// What an ally of `population` at `distance_km` adds to allied power
pub fn weighted_contribution(population: u64, distance_km: f64) -> u64 {
    div_round_half_even(population, DistanceTier::for_distance(distance_km).divisor())
}

/// Allied power of `city` given its already-resolved allies
///
/// Ids in `city.allies` missing from `allies` contribute nothing.
pub fn allied_power_of(city: &City, allies: &BTreeMap<CityId, City>) -> u64 {
    city.allies
        .iter()
        .filter(|id| **id != city.id)
        .filter_map(|id| allies.get(id))
        .map(|ally| {
            let distance = haversine_km(city.location, ally.location);
            weighted_contribution(ally.population, distance)
        })
        .fold(city.population, u64::saturating_add)
}

/// Allied power of the stored city `id`
///
/// Resolves every ally with a single batch read. Pure read, no writes.
pub fn allied_power<S: CityStore>(store: &S, id: CityId) -> Result<u64, AllianceError<S::Error>> {
    let city = store
        .get_city(id)
        .map_err(AllianceError::Storage)?
        .ok_or(AllianceError::NotFound(id))?;
    let allies = store.get_cities(&city.allies).map_err(AllianceError::Storage)?;

    Ok(allied_power_of(&city, &allies))
}
