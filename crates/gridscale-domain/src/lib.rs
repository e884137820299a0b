//! Gridscale Domain Layer
//!
//! This crate contains the core logic and domain model for Gridscale.
//! Apart from `uuid` for identifiers it has no external dependencies; it
//! defines the city model, the store trait, and the two engines that run on
//! top of it.
//!
//! ## Key Concepts
//!
//! - **City**: a record with location, population, beauty and an alliance set
//! - **Alliance**: a symmetric relationship, stored as mutual membership in
//!   each city's `allies` set
//! - **Allied power**: own population plus distance-weighted ally populations
//!
//! ## Architecture
//!
//! - [`alliance`] keeps alliance sets symmetric across partial updates
//! - [`power`] computes allied power from the current graph
//! - [`traits::CityStore`] is the boundary to persistence; infrastructure
//!   implementations live in other crates, [`memory::InMemoryStore`] here

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alliance;
pub mod city;
pub mod memory;
pub mod power;
pub mod traits;

// Re-exports for convenience
pub use alliance::{delete_city, insert_city, set_alliances, update_city, AllianceError};
pub use city::{Beauty, City, CityId, GeoLocation, ValidationError};
pub use power::{allied_power, allied_power_of, haversine_km};
