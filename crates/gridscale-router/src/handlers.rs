//! HTTP request handlers for the Router service.
//!
//! Thin JSON layer over the domain engines: requests are parsed into domain
//! types, alliance changes go through [`gridscale_domain::alliance`], and
//! allied power is computed on read.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router as AxumRouter,
};
use gridscale_domain::traits::CityStore;
use gridscale_domain::{
    alliance, allied_power, delete_city, insert_city, AllianceError, Beauty, City, CityId,
    GeoLocation, ValidationError,
};
use gridscale_store::{SqliteStore, StoreError, MAX_POPULATION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Shared application state
///
/// Every request holds the store lock for its whole duration, so alliance
/// updates touching overlapping cities never interleave.
#[derive(Clone)]
pub struct AppState {
    /// City store
    pub store: Arc<Mutex<SqliteStore>>,
}

impl AppState {
    /// Wrap a store for sharing between handlers
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, SqliteStore>, AppError> {
        self.store
            .lock()
            .map_err(|_| AppError::Internal("City store lock poisoned".to_string()))
    }
}

/// City as returned by the API
#[derive(Debug, Serialize, Deserialize)]
pub struct CityResponse {
    /// City identifier
    pub city_uuid: String,
    /// Display name
    pub name: String,
    /// Latitude in degrees
    pub geo_location_latitude: f64,
    /// Longitude in degrees
    pub geo_location_longitude: f64,
    /// Ugly, Average or Gorgeous
    pub beauty: String,
    /// Number of inhabitants
    pub population: u64,
    /// Allied city identifiers
    pub allied_cities: Vec<String>,
    /// Only present on single-city reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allied_power: Option<u64>,
}

impl CityResponse {
    fn from_city(city: &City, allied_power: Option<u64>) -> Self {
        Self {
            city_uuid: city.id.to_string(),
            name: city.name.clone(),
            geo_location_latitude: city.location.latitude,
            geo_location_longitude: city.location.longitude,
            beauty: city.beauty.as_str().to_string(),
            population: city.population,
            allied_cities: city.allies.iter().map(CityId::to_string).collect(),
            allied_power,
        }
    }
}

/// City creation request
#[derive(Debug, Deserialize)]
pub struct CreateCityRequest {
    /// Display name
    pub name: String,
    /// Latitude in degrees
    pub geo_location_latitude: f64,
    /// Longitude in degrees
    pub geo_location_longitude: f64,
    /// Ugly, Average or Gorgeous
    pub beauty: String,
    /// Number of inhabitants
    pub population: u64,
    /// Initial allies; unknown ids are dropped
    #[serde(default)]
    pub allied_cities: Vec<String>,
}

/// Partial city update; absent fields are left unchanged
#[derive(Debug, Default, Deserialize)]
pub struct UpdateCityRequest {
    /// New display name
    pub name: Option<String>,
    /// New latitude
    pub geo_location_latitude: Option<f64>,
    /// New longitude
    pub geo_location_longitude: Option<f64>,
    /// New beauty
    pub beauty: Option<String>,
    /// New population
    pub population: Option<u64>,
    /// Replacement alliance set
    pub allied_cities: Option<Vec<String>>,
}

/// Response to a successful creation
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedResponse {
    /// Identifier of the new city
    pub city_uuid: String,
}

/// Plain confirmation message
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Human-readable message
    pub message: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Overall health status
    pub status: String,
    /// Number of stored cities
    pub city_count: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The addressed city does not exist
    #[error("City not found")]
    NotFound(CityId),

    /// The request carried unusable values
    #[error("{0}")]
    BadRequest(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Internal server error
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(id) => {
                warn!("City not found: {}", id);
                StatusCode::NOT_FOUND
            }
            AppError::BadRequest(msg) => {
                debug!("Rejected request: {}", msg);
                StatusCode::BAD_REQUEST
            }
            AppError::Storage(e) => {
                error!("Storage error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AllianceError<StoreError>> for AppError {
    fn from(e: AllianceError<StoreError>) -> Self {
        match e {
            AllianceError::NotFound(id) => AppError::NotFound(id),
            AllianceError::Storage(e) => AppError::Storage(e),
            e @ AllianceError::Rollback { .. } => AppError::Internal(e.to_string()),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

fn parse_city_id(s: &str) -> Result<CityId, AppError> {
    CityId::from_string(s).map_err(AppError::BadRequest)
}

fn parse_city_ids(ids: &[String]) -> Result<BTreeSet<CityId>, AppError> {
    ids.iter().map(|s| parse_city_id(s)).collect()
}

fn check_population(population: u64) -> Result<u64, AppError> {
    if population > MAX_POPULATION {
        return Err(AppError::BadRequest(format!(
            "population {} exceeds {}",
            population, MAX_POPULATION
        )));
    }
    Ok(population)
}

fn fetch_city(store: &SqliteStore, id: CityId) -> Result<City, AppError> {
    store.get_city(id)?.ok_or(AppError::NotFound(id))
}

/// POST /cities - Create a city
async fn create_city(
    State(state): State<AppState>,
    Json(request): Json<CreateCityRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let location = GeoLocation::new(request.geo_location_latitude, request.geo_location_longitude)?;
    let beauty = Beauty::parse(&request.beauty)?;
    let population = check_population(request.population)?;
    let city = City::new(request.name, location, beauty, population)?;
    let allies = parse_city_ids(&request.allied_cities)?;

    let mut store = state.lock_store()?;
    let city = insert_city(&mut *store, city, &allies)?;
    info!("Created city {} ({} allies)", city.id, city.allies.len());

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            city_uuid: city.id.to_string(),
        }),
    ))
}

/// GET /cities - List every city
async fn list_cities(State(state): State<AppState>) -> Result<Json<Vec<CityResponse>>, AppError> {
    let store = state.lock_store()?;
    let cities = store.list_cities()?;

    Ok(Json(
        cities
            .iter()
            .map(|city| CityResponse::from_city(city, None))
            .collect(),
    ))
}

/// GET /cities/:city_uuid - One city with its allied power
async fn get_city(
    State(state): State<AppState>,
    Path(city_uuid): Path<String>,
) -> Result<Json<CityResponse>, AppError> {
    let id = parse_city_id(&city_uuid)?;

    let store = state.lock_store()?;
    let city = fetch_city(&store, id)?;
    let power = allied_power(&*store, id)?;

    Ok(Json(CityResponse::from_city(&city, Some(power))))
}

/// PUT /cities/:city_uuid - Update fields and/or the alliance set
///
/// Every value is validated before anything is written.
async fn update_city(
    State(state): State<AppState>,
    Path(city_uuid): Path<String>,
    Json(request): Json<UpdateCityRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_city_id(&city_uuid)?;
    let allies = request
        .allied_cities
        .as_deref()
        .map(parse_city_ids)
        .transpose()?;

    let population = request.population.map(check_population).transpose()?;

    let mut store = state.lock_store()?;
    let mut city = fetch_city(&store, id)?;

    if let Some(name) = request.name {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        city.name = name;
    }
    city.location = GeoLocation::new(
        request
            .geo_location_latitude
            .unwrap_or(city.location.latitude),
        request
            .geo_location_longitude
            .unwrap_or(city.location.longitude),
    )?;
    if let Some(beauty) = request.beauty {
        city.beauty = Beauty::parse(&beauty)?;
    }
    if let Some(population) = population {
        city.population = population;
    }

    // Fields and alliances are written in one batch.
    alliance::update_city(&mut *store, city, allies.as_ref())?;

    info!(
        "Updated city {}{}",
        id,
        if allies.is_some() { " and its alliances" } else { "" }
    );
    Ok(Json(MessageResponse {
        message: "City updated successfully".to_string(),
    }))
}

/// DELETE /cities/:city_uuid - Delete a city and detach it from its allies
async fn remove_city(
    State(state): State<AppState>,
    Path(city_uuid): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let id = parse_city_id(&city_uuid)?;

    let mut store = state.lock_store()?;
    let deleted = delete_city(&mut *store, id)?;
    info!(
        "Deleted city {} and detached it from {} allies",
        id,
        deleted.allies.len()
    );

    Ok(Json(MessageResponse {
        message: "City deleted successfully".to_string(),
    }))
}

/// GET /health - Health check
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthCheckResponse>, AppError> {
    let store = state.lock_store()?;
    let city_count = store.count_cities()?;

    Ok(Json(HealthCheckResponse {
        status: "healthy".to_string(),
        city_count,
    }))
}

/// Create the axum router with all routes
pub fn create_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/cities", get(list_cities).post(create_city))
        .route(
            "/cities/:city_uuid",
            get(get_city).put(update_city).delete(remove_city),
        )
        .route("/health", get(health_check))
        .with_state(state)
}
