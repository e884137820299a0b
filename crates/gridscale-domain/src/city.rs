//! City module - the entities tracked by Gridscale

use std::collections::BTreeSet;
use std::fmt;

/// Unique identifier for a city based on UUIDv7
///
/// UUIDv7 keeps identifiers chronologically sortable, so the ordered
/// alliance sets list older cities first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CityId(u128);

impl CityId {
    /// Generate a new UUIDv7-based CityId
    ///
    /// # Examples
    ///
    /// ```
    /// use gridscale_domain::CityId;
    ///
    /// let id = CityId::new();
    /// assert!(id.value() > 0);
    /// ```
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().as_u128())
    }

    /// Create a CityId from a raw u128 value
    ///
    /// This is primarily for storage layer deserialization.
    pub fn from_value(value: u128) -> Self {
        Self(value)
    }

    /// Parse a CityId from its hyphenated UUID string
    ///
    /// # Examples
    ///
    /// ```
    /// use gridscale_domain::CityId;
    ///
    /// let id = CityId::new();
    /// let parsed = CityId::from_string(&id.to_string()).unwrap();
    /// assert_eq!(id, parsed);
    /// ```
    pub fn from_string(s: &str) -> Result<Self, String> {
        uuid::Uuid::parse_str(s)
            .map(|u| Self(u.as_u128()))
            .map_err(|e| format!("Invalid city UUID: {}", e))
    }

    /// Get the raw u128 value
    pub fn value(&self) -> u128 {
        self.0
    }
}

impl Default for CityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from_u128(self.0))
    }
}

/// Error raised when a city field is out of its allowed range
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Latitude outside [-90, 90]
    Latitude(f64),
    /// Longitude outside [-180, 180]
    Longitude(f64),
    /// Name is empty or whitespace only
    EmptyName,
    /// Unknown beauty label
    Beauty(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Latitude(v) => write!(f, "latitude {} is outside [-90, 90]", v),
            ValidationError::Longitude(v) => write!(f, "longitude {} is outside [-180, 180]", v),
            ValidationError::EmptyName => write!(f, "city name must not be empty"),
            ValidationError::Beauty(s) => {
                write!(f, "unknown beauty '{}' (expected Ugly, Average or Gorgeous)", s)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A point on the globe in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
    /// Latitude in [-90, 90]
    pub latitude: f64,
    /// Longitude in [-180, 180]
    pub longitude: f64,
}

impl GeoLocation {
    /// Create a location, rejecting coordinates outside their ranges
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::Latitude(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::Longitude(longitude));
        }
        Ok(Self { latitude, longitude })
    }
}

/// How a city looks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Beauty {
    /// Not much to look at
    Ugly,
    /// Unremarkable
    Average,
    /// Worth the trip
    Gorgeous,
}

impl Beauty {
    /// Get the beauty label as stored and serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            Beauty::Ugly => "Ugly",
            Beauty::Average => "Average",
            Beauty::Gorgeous => "Gorgeous",
        }
    }

    /// Parse a beauty label (exact, capitalized form)
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "Ugly" => Ok(Beauty::Ugly),
            "Average" => Ok(Beauty::Average),
            "Gorgeous" => Ok(Beauty::Gorgeous),
            other => Err(ValidationError::Beauty(other.to_string())),
        }
    }
}

impl fmt::Display for Beauty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A city record
///
/// `allies` is only ever changed through [`crate::alliance::set_alliances`]
/// and [`crate::alliance::delete_city`], which keep it symmetric across
/// cities. Writing it directly breaks that guarantee.
#[derive(Debug, Clone, PartialEq)]
pub struct City {
    /// Unique identifier
    pub id: CityId,

    /// Display name
    pub name: String,

    /// Where the city is
    pub location: GeoLocation,

    /// How the city looks
    pub beauty: Beauty,

    /// Number of inhabitants
    pub population: u64,

    /// Allied cities
    pub allies: BTreeSet<CityId>,
}

impl City {
    /// Create a new city with a fresh id and no allies
    pub fn new(
        name: impl Into<String>,
        location: GeoLocation,
        beauty: Beauty,
        population: u64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        Ok(Self {
            id: CityId::new(),
            name,
            location,
            beauty,
            population,
            allies: BTreeSet::new(),
        })
    }
}
