//! Gridscale Storage Layer
//!
//! Implements the CityStore trait on SQLite.
//!
//! # Architecture
//!
//! - One `cities` table; each row embeds its alliance set as a JSON array
//! - City ids are stored as 16-byte big-endian blobs
//! - Store batches map onto SQLite transactions, so a multi-city alliance
//!   update either lands completely or not at all
//!
//! # Examples
//!
//! ```no_run
//! use gridscale_store::SqliteStore;
//!
//! let store = SqliteStore::new(":memory:").unwrap();
//! // Store is now ready for city operations
//! ```

#![warn(missing_docs)]

use gridscale_domain::traits::CityStore;
use gridscale_domain::{Beauty, City, CityId, GeoLocation};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Alliance set could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Largest population the `population` column can hold
pub const MAX_POPULATION: u64 = i64::MAX as u64;

const SELECT_COLUMNS: &str =
    "SELECT id, name, latitude, longitude, beauty, population, allies FROM cities";

/// Raw column values of one `cities` row
struct CityRow {
    id: Vec<u8>,
    name: String,
    latitude: f64,
    longitude: f64,
    beauty: String,
    population: i64,
    allies: String,
}

impl CityRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            latitude: row.get(2)?,
            longitude: row.get(3)?,
            beauty: row.get(4)?,
            population: row.get(5)?,
            allies: row.get(6)?,
        })
    }

    fn into_city(self) -> Result<City, StoreError> {
        let id = SqliteStore::bytes_to_city_id(&self.id)?;
        let location = GeoLocation::new(self.latitude, self.longitude)
            .map_err(|e| StoreError::InvalidData(format!("city {}: {}", id, e)))?;
        let beauty = Beauty::parse(&self.beauty)
            .map_err(|e| StoreError::InvalidData(format!("city {}: {}", id, e)))?;
        let population = u64::try_from(self.population).map_err(|_| {
            StoreError::InvalidData(format!("city {}: negative population", id))
        })?;

        let ally_strings: Vec<String> = serde_json::from_str(&self.allies)?;
        let allies = ally_strings
            .iter()
            .map(|s| CityId::from_string(s).map_err(StoreError::InvalidData))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(City {
            id,
            name: self.name,
            location,
            beauty,
            population,
            allies,
        })
    }
}

/// SQLite-based implementation of CityStore
///
/// # Thread Safety
///
/// SQLite connections are not thread-safe. Share one store behind a mutex
/// (as the router does) or give each thread its own SqliteStore instance.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Create a new SqliteStore with the given database path
    ///
    /// Use `:memory:` for an in-memory database (useful for testing).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gridscale_store::SqliteStore;
    ///
    /// let store = SqliteStore::new("gridscale.db").unwrap();
    /// ```
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&mut self) -> Result<(), StoreError> {
        let schema = include_str!("schema.sql");
        self.conn.execute_batch(schema)?;
        Ok(())
    }

    /// Number of stored cities
    pub fn count_cities(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Convert CityId to bytes for storage
    fn city_id_to_bytes(id: CityId) -> Vec<u8> {
        id.value().to_be_bytes().to_vec()
    }

    /// Convert bytes to CityId
    fn bytes_to_city_id(bytes: &[u8]) -> Result<CityId, StoreError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| {
            StoreError::InvalidData(format!("Expected 16 bytes for CityId, got {}", bytes.len()))
        })?;
        Ok(CityId::from_value(u128::from_be_bytes(arr)))
    }

    fn encode_allies(allies: &BTreeSet<CityId>) -> Result<String, StoreError> {
        let strings: Vec<String> = allies.iter().map(CityId::to_string).collect();
        Ok(serde_json::to_string(&strings)?)
    }
}

impl CityStore for SqliteStore {
    type Error = StoreError;

    fn get_city(&self, id: CityId) -> Result<Option<City>, Self::Error> {
        let id_bytes = Self::city_id_to_bytes(id);

        let row = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![&id_bytes],
                CityRow::from_row,
            )
            .optional()?;

        row.map(CityRow::into_city).transpose()
    }

    fn get_cities(&self, ids: &BTreeSet<CityId>) -> Result<BTreeMap<CityId, City>, Self::Error> {
        if ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("{} WHERE id IN ({})", SELECT_COLUMNS, placeholders);
        let id_bytes: Vec<Vec<u8>> = ids.iter().map(|id| Self::city_id_to_bytes(*id)).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(id_bytes.iter()), CityRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| row.into_city().map(|city| (city.id, city)))
            .collect()
    }

    fn save_city(&mut self, city: &City) -> Result<(), Self::Error> {
        let id_bytes = Self::city_id_to_bytes(city.id);
        let allies = Self::encode_allies(&city.allies)?;
        let population = i64::try_from(city.population).map_err(|_| {
            StoreError::InvalidData(format!("Population {} exceeds storage range", city.population))
        })?;

        self.conn.execute(
            "INSERT INTO cities (id, name, latitude, longitude, beauty, population, allies)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
             name = excluded.name, latitude = excluded.latitude, longitude = excluded.longitude,
             beauty = excluded.beauty, population = excluded.population, allies = excluded.allies",
            params![
                &id_bytes,
                &city.name,
                city.location.latitude,
                city.location.longitude,
                city.beauty.as_str(),
                population,
                &allies,
            ],
        )?;

        Ok(())
    }

    fn delete_city(&mut self, id: CityId) -> Result<bool, Self::Error> {
        let id_bytes = Self::city_id_to_bytes(id);
        let deleted = self
            .conn
            .execute("DELETE FROM cities WHERE id = ?1", params![&id_bytes])?;
        Ok(deleted > 0)
    }

    fn list_cities(&self) -> Result<Vec<City>, Self::Error> {
        let mut stmt = self.conn.prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))?;
        let rows = stmt
            .query_map([], CityRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(CityRow::into_city).collect()
    }

    fn begin_batch(&mut self) -> Result<(), Self::Error> {
        // A transaction left open by a failed rollback would make BEGIN fail
        // from here on; discard it.
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        // IMMEDIATE takes the write lock up front so reads inside the batch
        // see the state the writes are based on.
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<(), Self::Error> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_batch(&mut self) -> Result<(), Self::Error> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}
