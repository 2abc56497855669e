//! In-memory SmartWaste API for local development and end-to-end tests.
//!
//! Every route under `/api` except login and register expects
//! `Authorization: Bearer <token>`; the users routes also need the admin
//! role. Failures are JSON `{ "message": ... }` bodies.
//!
//! Fleet registration, analytics, route optimisation and uploads are
//! lightweight: they answer with plausible open JSON derived from the store.

pub mod state;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartError, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub use state::{Bin, Location, Store, UserRecord, Vehicle, SEED_PASSWORD};

pub type Db = Arc<RwLock<Store>>;

const PERIODS: [&str; 4] = ["daily", "weekly", "monthly", "yearly"];

/// Router over freshly seeded data.
pub fn app() -> Router {
    router(Arc::new(RwLock::new(Store::seeded())))
}

pub fn router(db: Db) -> Router {
    let api = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/profile", get(get_profile).put(update_profile))
        .route("/bins/nearby", get(nearby_bins))
        .route("/bins/collection-priority", get(collection_priority))
        .route("/bins/register", post(register_bin))
        .route("/bins/analytics", get(bin_analytics))
        .route("/bins/{bin_id}/status", get(bin_status))
        .route("/bins/{bin_id}/collect", post(collect_bin))
        .route("/bins/{bin_id}/maintenance", post(report_maintenance))
        .route("/bins/{bin_id}/sensor-data", put(bin_sensor_data))
        .route("/vehicles/overview", get(vehicles_overview))
        .route("/vehicles/register", post(register_vehicle))
        .route("/vehicles/analytics", get(vehicle_analytics))
        .route("/vehicles/{vehicle_id}/location", get(vehicle_location))
        .route("/vehicles/{vehicle_id}/route", get(vehicle_route))
        .route("/vehicles/{vehicle_id}/status", put(vehicle_status))
        .route("/routes/active", get(active_routes))
        .route("/routes/optimize", post(optimize_route))
        .route("/routes/analytics", get(route_analytics))
        .route("/routes/{route_id}/progress", put(route_progress))
        .route("/analytics/dashboard", get(dashboard))
        .route("/analytics/environmental-impact", get(environmental_impact))
        .route("/analytics/predictions", get(predictions))
        .route("/analytics/reports/generate", post(generate_report))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{user_id}", put(update_user).delete(delete_user))
        .route("/upload", post(upload));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// --- errors ---

#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    message: String,
}

impl Failure {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn not_found(what: &str, id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} {id} not found"))
    }
}

impl From<MultipartError> for Failure {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "message": self.message }))).into_response()
    }
}

// --- auth extractors ---

/// The user behind the request's bearer token.
pub struct Caller(pub UserRecord);

impl FromRequestParts<Db> for Caller {
    type Rejection = Failure;

    async fn from_request_parts(parts: &mut Parts, db: &Db) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| Failure::unauthorized("Missing bearer token"))?;

        let store = db.read().await;
        store
            .tokens
            .get(token)
            .and_then(|user_id| store.users.get(user_id))
            .cloned()
            .map(Caller)
            .ok_or_else(|| Failure::unauthorized("Invalid or expired token"))
    }
}

/// A caller with the admin role.
pub struct Admin(pub UserRecord);

impl FromRequestParts<Db> for Admin {
    type Rejection = Failure;

    async fn from_request_parts(parts: &mut Parts, db: &Db) -> Result<Self, Self::Rejection> {
        let Caller(user) = Caller::from_request_parts(parts, db).await?;
        if user.user_type != "admin" {
            return Err(Failure::new(StatusCode::FORBIDDEN, "Admin access required"));
        }
        Ok(Admin(user))
    }
}

// --- inputs ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub user_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub password: String,
    pub user_type: String,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Deserialize)]
pub struct ProfileInput {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub location: Option<Location>,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectInput {
    pub vehicle_id: String,
    pub collected_weight: f64,
    pub driver_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceInput {
    pub issue_type: String,
    pub description: String,
    pub reported_by: String,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatusInput {
    pub location: Location,
    pub status: String,
    pub fuel_level: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInput {
    pub completed_bin_id: String,
    pub collected_weight: f64,
    pub next_bin_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

impl PeriodQuery {
    fn period(&self) -> Result<&str, Failure> {
        let period = self.period.as_deref().unwrap_or("daily");
        if !PERIODS.contains(&period) {
            return Err(Failure::bad_request(format!("Unknown period {period}")));
        }
        Ok(period)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBinInput {
    pub bin_id: String,
    pub location: Location,
    #[serde(rename = "type", default)]
    pub bin_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorInput {
    pub fill_percentage: u32,
}

#[derive(Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVehicleInput {
    pub vehicle_id: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub fuel_level: Option<u32>,
}

#[derive(Deserialize)]
pub struct OptimizeInput {
    pub bins: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
    pub user_type: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserInput {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: String,
    pub user_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub user_type: Option<String>,
    pub status: Option<String>,
}

fn check_new_account(
    store: &Store,
    name: &str,
    email: &str,
    password: &str,
    user_type: &str,
) -> Result<(), Failure> {
    if name.trim().is_empty() || !email.contains('@') {
        return Err(Failure::bad_request("Name and a valid email are required"));
    }
    if password.len() < 6 {
        return Err(Failure::bad_request("Password must be at least 6 characters"));
    }
    if !matches!(user_type, "citizen" | "driver" | "admin") {
        return Err(Failure::bad_request(format!("Unknown user type {user_type}")));
    }
    if store.user_by_email(email).is_some() {
        return Err(Failure::bad_request("Email already registered"));
    }
    Ok(())
}

// --- handlers ---

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn login(
    State(db): State<Db>,
    Json(input): Json<LoginInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    let user = store
        .user_by_email(&input.email)
        .filter(|u| u.password == input.password)
        .filter(|u| input.user_type.as_deref().is_none_or(|t| t == u.user_type))
        .cloned()
        .ok_or_else(|| Failure::unauthorized("Invalid email or password"))?;

    let token = Uuid::new_v4().to_string();
    store.tokens.insert(token.clone(), user.user_id.clone());
    tracing::info!(user_id = %user.user_id, "login");

    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": {
            "userId": user.user_id,
            "name": user.name,
            "email": user.email,
            "userType": user.user_type,
            "permissions": user.permissions(),
        }
    })))
}

async fn register(
    State(db): State<Db>,
    Json(input): Json<RegisterInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    check_new_account(&store, &input.name, &input.email, &input.password, &input.user_type)?;

    let user_id = store.next_id("u");
    let token = Uuid::new_v4().to_string();
    store.users.insert(
        user_id.clone(),
        UserRecord {
            user_id: user_id.clone(),
            name: input.name,
            email: input.email,
            phone: input.phone,
            user_type: input.user_type,
            status: "active".to_string(),
            password: input.password,
            location: input.location,
        },
    );
    store.tokens.insert(token.clone(), user_id.clone());
    tracing::info!(%user_id, "registered");

    Ok(Json(json!({ "success": true, "userId": user_id, "token": token })))
}

async fn get_profile(Caller(user): Caller) -> Json<Value> {
    Json(json!({
        "userId": user.user_id,
        "name": user.name,
        "email": user.email,
        "phone": user.phone,
        "userType": user.user_type,
        "location": user.location,
        "preferences": {
            "notifications": true,
            "language": "en",
            "collectionReminders": true,
        }
    }))
}

async fn update_profile(
    State(db): State<Db>,
    Caller(user): Caller,
    Json(input): Json<ProfileInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    let record = store
        .users
        .get_mut(&user.user_id)
        .ok_or_else(|| Failure::not_found("User", &user.user_id))?;
    if let Some(name) = input.name {
        record.name = name;
    }
    if let Some(phone) = input.phone {
        record.phone = phone;
    }
    if input.location.is_some() {
        record.location = input.location;
    }
    Ok(Json(json!({ "success": true })))
}

async fn nearby_bins(
    State(db): State<Db>,
    _: Caller,
    Query(q): Query<NearbyQuery>,
) -> Json<Value> {
    let origin = Location {
        lat: q.lat,
        lng: q.lng,
        address: None,
    };
    let radius = f64::from(q.radius.unwrap_or(500));

    let store = db.read().await;
    let mut hits: Vec<(f64, &Bin)> = store
        .bins
        .values()
        .map(|bin| (origin.distance_m(&bin.location), bin))
        .filter(|(d, _)| *d <= radius)
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0));

    let nearby: Vec<Value> = hits
        .into_iter()
        .map(|(d, bin)| {
            json!({
                "binId": bin.bin_id,
                "distance": d.round() as u32,
                "fillPercentage": bin.fill_percentage,
                "status": bin.status,
                "location": bin.location,
                "type": bin.bin_type,
            })
        })
        .collect();
    Json(json!({ "nearbyBins": nearby }))
}

async fn collection_priority(State(db): State<Db>, _: Caller) -> Json<Value> {
    let store = db.read().await;
    let mut bins: Vec<&Bin> = store.bins.values().collect();
    bins.sort_by(|a, b| b.fill_percentage.cmp(&a.fill_percentage));
    Json(json!({ "bins": bins }))
}

async fn register_bin(
    State(db): State<Db>,
    _: Caller,
    Json(input): Json<NewBinInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    if store.bins.contains_key(&input.bin_id) {
        return Err(Failure::bad_request(format!("Bin {} already exists", input.bin_id)));
    }
    let bin = Bin {
        bin_id: input.bin_id.clone(),
        location: input.location,
        fill_percentage: 0,
        status: "empty".to_string(),
        bin_type: input.bin_type.unwrap_or_else(|| "general".to_string()),
    };
    store.bins.insert(input.bin_id.clone(), bin);
    tracing::info!(bin_id = %input.bin_id, "bin registered");

    Ok(Json(json!({ "success": true, "binId": input.bin_id })))
}

async fn bin_sensor_data(
    State(db): State<Db>,
    _: Caller,
    Path(bin_id): Path<String>,
    Json(input): Json<SensorInput>,
) -> Result<Json<Value>, Failure> {
    if input.fill_percentage > 100 {
        return Err(Failure::bad_request("fillPercentage must be between 0 and 100"));
    }

    let mut store = db.write().await;
    let bin = store
        .bins
        .get_mut(&bin_id)
        .ok_or_else(|| Failure::not_found("Bin", &bin_id))?;
    bin.set_fill(input.fill_percentage);
    tracing::debug!(%bin_id, fill = bin.fill_percentage, "sensor reading");

    Ok(Json(json!({
        "success": true,
        "binId": bin.bin_id,
        "fillPercentage": bin.fill_percentage,
        "status": bin.status,
    })))
}

async fn bin_analytics(State(db): State<Db>, _: Caller) -> Json<Value> {
    let store = db.read().await;
    let total = store.bins.len();
    let fill_sum: u32 = store.bins.values().map(|b| b.fill_percentage).sum();
    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for bin in store.bins.values() {
        *by_type.entry(bin.bin_type.as_str()).or_default() += 1;
    }

    Json(json!({
        "totalBins": total,
        "averageFill": fill_sum as usize / total.max(1),
        "needsCollection": store.bins.values().filter(|b| b.fill_percentage >= 80).count(),
        "byType": by_type,
    }))
}

async fn bin_status(
    State(db): State<Db>,
    _: Caller,
    Path(bin_id): Path<String>,
) -> Result<Json<Bin>, Failure> {
    let store = db.read().await;
    store
        .bins
        .get(&bin_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| Failure::not_found("Bin", &bin_id))
}

async fn collect_bin(
    State(db): State<Db>,
    _: Caller,
    Path(bin_id): Path<String>,
    Json(input): Json<CollectInput>,
) -> Result<Json<Value>, Failure> {
    if input.collected_weight < 0.0 {
        return Err(Failure::bad_request("collectedWeight must not be negative"));
    }

    let mut store = db.write().await;
    let bin = store
        .bins
        .get_mut(&bin_id)
        .ok_or_else(|| Failure::not_found("Bin", &bin_id))?;
    bin.set_fill(0);

    store.stats.bins_collected += 1;
    store.stats.waste_collected_kg += input.collected_weight;
    let collection_id = store.next_id("COL");
    tracing::info!(
        %bin_id,
        vehicle_id = %input.vehicle_id,
        driver_id = %input.driver_id,
        "bin collected"
    );

    Ok(Json(json!({
        "success": true,
        "collectionId": collection_id,
        "updatedStatus": "empty",
    })))
}

async fn report_maintenance(
    State(db): State<Db>,
    _: Caller,
    Path(bin_id): Path<String>,
    Json(input): Json<MaintenanceInput>,
) -> Result<Json<Value>, Failure> {
    if input.issue_type.trim().is_empty() || input.description.trim().is_empty() {
        return Err(Failure::bad_request("issueType and description are required"));
    }

    let mut store = db.write().await;
    if !store.bins.contains_key(&bin_id) {
        return Err(Failure::not_found("Bin", &bin_id));
    }
    store.stats.open_tickets += 1;
    let ticket_id = store.next_id("TKT");
    tracing::info!(
        %bin_id,
        %ticket_id,
        reported_by = %input.reported_by,
        priority = input.priority.as_deref().unwrap_or("medium"),
        "maintenance reported"
    );

    Ok(Json(json!({ "success": true, "ticketId": ticket_id })))
}

fn vehicle_json(vehicle: &Vehicle) -> Value {
    json!({
        "vehicleId": vehicle.vehicle_id,
        "status": vehicle.status,
        "location": vehicle.location,
        "fuelLevel": vehicle.fuel_level,
        "routeId": vehicle.route_id,
    })
}

async fn vehicles_overview(
    State(db): State<Db>,
    _: Caller,
    Query(filter): Query<StatusFilter>,
) -> Json<Value> {
    let store = db.read().await;
    let mut vehicles: Vec<&Vehicle> = store
        .vehicles
        .values()
        .filter(|v| filter.status.as_ref().is_none_or(|s| *s == v.status))
        .collect();
    vehicles.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
    let vehicles: Vec<Value> = vehicles.into_iter().map(vehicle_json).collect();
    Json(json!({ "vehicles": vehicles }))
}

async fn vehicle_location(
    State(db): State<Db>,
    _: Caller,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, Failure> {
    let store = db.read().await;
    store
        .vehicles
        .get(&vehicle_id)
        .map(|v| Json(vehicle_json(v)))
        .ok_or_else(|| Failure::not_found("Vehicle", &vehicle_id))
}

async fn register_vehicle(
    State(db): State<Db>,
    _: Caller,
    Json(input): Json<NewVehicleInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    if store.vehicles.contains_key(&input.vehicle_id) {
        return Err(Failure::bad_request(format!(
            "Vehicle {} already exists",
            input.vehicle_id
        )));
    }
    let vehicle = Vehicle {
        vehicle_id: input.vehicle_id.clone(),
        route_id: None,
        location: input.location.unwrap_or_else(|| Location::at(22.5726, 88.3639)),
        status: "idle".to_string(),
        fuel_level: input.fuel_level,
    };
    store.vehicles.insert(input.vehicle_id.clone(), vehicle);
    tracing::info!(vehicle_id = %input.vehicle_id, "vehicle registered");

    Ok(Json(json!({ "success": true, "vehicleId": input.vehicle_id })))
}

async fn vehicle_analytics(State(db): State<Db>, _: Caller) -> Json<Value> {
    let store = db.read().await;
    let fuel: Vec<u32> = store.vehicles.values().filter_map(|v| v.fuel_level).collect();
    let average_fuel = fuel.iter().sum::<u32>() as usize / fuel.len().max(1);
    let count = |status: &str| store.vehicles.values().filter(|v| v.status == status).count();

    Json(json!({
        "totalVehicles": store.vehicles.len(),
        "active": count("active"),
        "idle": count("idle"),
        "averageFuelLevel": average_fuel,
    }))
}

async fn vehicle_route(
    State(db): State<Db>,
    _: Caller,
    Path(vehicle_id): Path<String>,
) -> Result<Json<Value>, Failure> {
    let store = db.read().await;
    let vehicle = store
        .vehicles
        .get(&vehicle_id)
        .ok_or_else(|| Failure::not_found("Vehicle", &vehicle_id))?;

    let route = vehicle.route_id.as_ref().and_then(|id| store.routes.get(id));
    let body = match route {
        Some(route) => json!({
            "routeId": route.route_id,
            "assignedBins": route.bins,
            "estimatedTime": route.estimated_time,
            "estimatedDistance": route.estimated_distance,
            "status": route.status(),
        }),
        None => json!({
            "assignedBins": [],
            "estimatedTime": 0,
            "estimatedDistance": 0.0,
            "status": "unassigned",
        }),
    };
    Ok(Json(body))
}

async fn vehicle_status(
    State(db): State<Db>,
    _: Caller,
    Path(vehicle_id): Path<String>,
    Json(input): Json<VehicleStatusInput>,
) -> Result<Json<Value>, Failure> {
    if input.fuel_level.is_some_and(|f| f > 100) {
        return Err(Failure::bad_request("fuelLevel must be between 0 and 100"));
    }

    let mut store = db.write().await;
    let vehicle = store
        .vehicles
        .get_mut(&vehicle_id)
        .ok_or_else(|| Failure::not_found("Vehicle", &vehicle_id))?;
    vehicle.location = input.location;
    vehicle.status = input.status;
    if input.fuel_level.is_some() {
        vehicle.fuel_level = input.fuel_level;
    }
    tracing::debug!(%vehicle_id, status = %vehicle.status, "vehicle status");

    Ok(Json(json!({ "success": true, "updated": true })))
}

async fn active_routes(State(db): State<Db>, _: Caller) -> Json<Value> {
    let store = db.read().await;
    let routes: Vec<Value> = store
        .routes
        .values()
        .filter(|r| !r.is_completed())
        .map(|r| {
            let remaining = r.remaining();
            let minutes_left = r.estimated_time as usize * remaining.len() / r.bins.len().max(1);
            json!({
                "routeId": r.route_id,
                "vehicleId": r.vehicle_id,
                "progress": r.progress(),
                "currentBin": remaining.first(),
                "estimatedCompletion": format!("{minutes_left} min"),
                "binsRemaining": remaining.len(),
                "totalBins": r.bins.len(),
                "status": r.status(),
            })
        })
        .collect();
    Json(json!({ "activeRoutes": routes }))
}

/// Fullest bins first; ties keep the requested order.
async fn optimize_route(
    State(db): State<Db>,
    _: Caller,
    Json(input): Json<OptimizeInput>,
) -> Result<Json<Value>, Failure> {
    let store = db.read().await;
    let mut stops = Vec::with_capacity(input.bins.len());
    for bin_id in &input.bins {
        let bin = store
            .bins
            .get(bin_id)
            .ok_or_else(|| Failure::not_found("Bin", bin_id))?;
        stops.push(bin);
    }
    stops.sort_by(|a, b| b.fill_percentage.cmp(&a.fill_percentage));

    let distance_m: f64 = stops
        .windows(2)
        .map(|leg| leg[0].location.distance_m(&leg[1].location))
        .sum();
    let order: Vec<&str> = stops.iter().map(|b| b.bin_id.as_str()).collect();

    Ok(Json(json!({
        "success": true,
        "optimizedOrder": order,
        "estimatedDistance": (distance_m / 100.0).round() / 10.0,
        "estimatedTime": 10 * order.len(),
    })))
}

async fn route_analytics(State(db): State<Db>, _: Caller) -> Json<Value> {
    let store = db.read().await;
    let active = store.routes.values().filter(|r| !r.is_completed()).count();

    Json(json!({
        "activeRoutes": active,
        "completedRoutes": store.stats.routes_completed,
        "binsCollected": store.stats.bins_collected,
        "wasteCollected": store.stats.waste_collected_kg.round() as u32,
    }))
}

async fn route_progress(
    State(db): State<Db>,
    _: Caller,
    Path(route_id): Path<String>,
    Json(input): Json<ProgressInput>,
) -> Result<Json<Value>, Failure> {
    let mut guard = db.write().await;
    let Store {
        routes,
        bins,
        stats,
        ..
    } = &mut *guard;

    let route = routes
        .get_mut(&route_id)
        .ok_or_else(|| Failure::not_found("Route", &route_id))?;
    if !route.bins.contains(&input.completed_bin_id) {
        return Err(Failure::bad_request(format!(
            "Bin {} is not on route {route_id}",
            input.completed_bin_id
        )));
    }

    let was_completed = route.is_completed();
    if !route.completed.contains(&input.completed_bin_id) {
        route.completed.push(input.completed_bin_id.clone());
        stats.bins_collected += 1;
        stats.waste_collected_kg += input.collected_weight;
        if let Some(bin) = bins.get_mut(&input.completed_bin_id) {
            bin.set_fill(0);
        }
    }
    let completed = route.is_completed();
    if completed && !was_completed {
        stats.routes_completed += 1;
        tracing::info!(%route_id, "route completed");
    }

    let remaining = route.remaining();
    let next = input
        .next_bin_id
        .as_ref()
        .filter(|id| remaining.contains(id))
        .or_else(|| remaining.first().copied())
        .and_then(|id| bins.get(id))
        .map(|bin| {
            json!({
                "binId": bin.bin_id,
                "location": bin.location,
                "fillPercentage": bin.fill_percentage,
                "estimatedWeight": bin.fill_percentage * 6 / 5,
            })
        });

    Ok(Json(json!({
        "success": true,
        "routeProgress": route.progress(),
        "nextBinDetails": next,
        "routeCompleted": completed,
    })))
}

/// Totals are cumulative since start-up whatever the period.
async fn dashboard(
    State(db): State<Db>,
    _: Caller,
    Query(q): Query<PeriodQuery>,
) -> Result<Json<Value>, Failure> {
    q.period()?;

    let store = db.read().await;
    let urgent = store.bins.values().filter(|b| b.fill_percentage >= 80).count();
    let low_fuel = store
        .vehicles
        .values()
        .filter(|v| v.fuel_level.is_some_and(|f| f < 20))
        .count();

    Ok(Json(json!({
        "todayStats": {
            "binsCollected": store.stats.bins_collected,
            "wasteCollected": store.stats.waste_collected_kg.round() as u32,
            "fuelUsed": 0.0,
            "routesCompleted": store.stats.routes_completed,
            "efficiency": 87,
        },
        "alerts": {
            "urgentBins": urgent,
            "lowBattery": low_fuel,
            "maintenanceNeeded": store.stats.open_tickets,
        },
        "trends": {
            "efficiencyTrend": "up",
            "wasteGeneration": "stable",
        }
    })))
}

async fn environmental_impact(
    State(db): State<Db>,
    _: Caller,
    Query(q): Query<PeriodQuery>,
) -> Result<Json<Value>, Failure> {
    let period = q.period()?;
    let store = db.read().await;
    let waste = store.stats.waste_collected_kg;

    Ok(Json(json!({
        "period": period,
        "wasteDivertedKg": waste.round() as u32,
        "co2SavedKg": (waste * 0.5).round() as u32,
        "recyclingRate": 35,
    })))
}

/// Hours until each bin is full at a flat 4% an hour, soonest first.
async fn predictions(State(db): State<Db>, _: Caller) -> Json<Value> {
    let store = db.read().await;
    let mut bins: Vec<&Bin> = store.bins.values().collect();
    bins.sort_by(|a, b| b.fill_percentage.cmp(&a.fill_percentage));
    let predictions: Vec<Value> = bins
        .into_iter()
        .map(|bin| {
            json!({
                "binId": bin.bin_id,
                "currentFill": bin.fill_percentage,
                "hoursUntilFull": 100u32.saturating_sub(bin.fill_percentage) / 4,
            })
        })
        .collect();
    Json(json!({ "predictions": predictions }))
}

async fn generate_report(
    State(db): State<Db>,
    Caller(user): Caller,
    Json(request): Json<Value>,
) -> Json<Value> {
    let report_id = db.write().await.next_id("RPT");
    tracing::info!(%report_id, by = %user.user_id, "report requested");
    Json(json!({
        "success": true,
        "reportId": report_id,
        "status": "queued",
        "request": request,
    }))
}

async fn list_users(
    State(db): State<Db>,
    _: Admin,
    Query(filter): Query<UserFilter>,
) -> Json<Value> {
    let store = db.read().await;
    let users: Vec<&UserRecord> = store
        .users
        .values()
        .filter(|u| filter.user_type.as_ref().is_none_or(|t| *t == u.user_type))
        .filter(|u| filter.status.as_ref().is_none_or(|s| *s == u.status))
        .collect();
    Json(json!({ "users": users }))
}

async fn create_user(
    State(db): State<Db>,
    Admin(admin): Admin,
    Json(input): Json<NewUserInput>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    check_new_account(&store, &input.name, &input.email, &input.password, &input.user_type)?;

    let user_id = store.next_id("u");
    store.users.insert(
        user_id.clone(),
        UserRecord {
            user_id: user_id.clone(),
            name: input.name,
            email: input.email,
            phone: input.phone.unwrap_or_default(),
            user_type: input.user_type,
            status: "active".to_string(),
            password: input.password,
            location: None,
        },
    );
    tracing::info!(%user_id, by = %admin.user_id, "user created");

    Ok(Json(json!({ "success": true, "userId": user_id })))
}

async fn update_user(
    State(db): State<Db>,
    _: Admin,
    Path(user_id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    let record = store
        .users
        .get_mut(&user_id)
        .ok_or_else(|| Failure::not_found("User", &user_id))?;
    if let Some(name) = patch.name {
        record.name = name;
    }
    if let Some(email) = patch.email {
        record.email = email;
    }
    if let Some(phone) = patch.phone {
        record.phone = phone;
    }
    if let Some(user_type) = patch.user_type {
        record.user_type = user_type;
    }
    if let Some(status) = patch.status {
        record.status = status;
    }
    Ok(Json(json!({ "success": true })))
}

async fn delete_user(
    State(db): State<Db>,
    Admin(admin): Admin,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, Failure> {
    let mut store = db.write().await;
    store
        .users
        .remove(&user_id)
        .ok_or_else(|| Failure::not_found("User", &user_id))?;
    // Outstanding tokens die with the account.
    store.tokens.retain(|_, owner| *owner != user_id);
    tracing::info!(%user_id, by = %admin.user_id, "user deleted");

    Ok(Json(json!({ "success": true })))
}

/// Accepts any multipart form and reports what arrived.
async fn upload(Caller(user): Caller, mut form: Multipart) -> Result<Json<Value>, Failure> {
    let mut files = Vec::new();
    while let Some(field) = form.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let size = field.bytes().await?.len();
        files.push(json!({ "field": name, "fileName": file_name, "size": size }));
    }
    if files.is_empty() {
        return Err(Failure::bad_request("No file uploaded"));
    }
    tracing::info!(count = files.len(), by = %user.user_id, "upload received");

    Ok(Json(json!({ "success": true, "files": files })))
}
