//! Endpoint descriptors and the per-call request description.
//!
//! # Design
//! Every API operation is a `const Endpoint` in the `endpoints` table, so the
//! set of operations is fixed at compile time. `Endpoint::call` resolves the
//! `{placeholder}` segments of its template into an `ApiRequest`, which is
//! still relative to the base URL and unaware of the session. `ApiClient`
//! turns it into an absolute `HttpRequest`.

use std::fmt;

use serde::Serialize;

use crate::error::ApiError;
use crate::http::{FormPart, HttpBody, HttpMethod};

/// A primitive query-string value.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryValue::Str(s) => f.write_str(s),
            QueryValue::Int(i) => write!(f, "{i}"),
            QueryValue::Float(x) => write!(f, "{x}"),
            QueryValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Str(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Str(value)
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        QueryValue::Float(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Bool(value)
    }
}

macro_rules! query_value_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for QueryValue {
            fn from(value: $ty) -> Self {
                QueryValue::Int(i64::from(value))
            }
        })*
    };
}

query_value_from_int!(i32, u32, i64, u16, u8);

/// One call relative to the base URL. Built per call and consumed by
/// `ApiClient::request`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Unencoded path segments; the client percent-encodes each one.
    pub segments: Vec<String>,
    pub query: Vec<(String, QueryValue)>,
    pub body: Option<HttpBody>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self {
            method,
            segments: split_path(path),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl Into<QueryValue>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// Append every pair of a filter map, in iteration order.
    pub fn query_pairs<K, V, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<QueryValue>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let encoded = serde_json::to_string(body)
            .map_err(|e| ApiError::unknown(None, format!("serialization failed: {e}")))?;
        self.body = Some(HttpBody::Json(encoded));
        Ok(self)
    }

    /// Send `parts` as a `multipart/form-data` body.
    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = Some(HttpBody::Multipart(parts));
        self
    }

    /// The path as sent, without the base URL or query.
    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Static descriptor of one API operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub name: &'static str,
    pub method: HttpMethod,
    /// Path relative to the base URL, e.g. `bins/{binId}/collect`.
    pub template: &'static str,
}

impl Endpoint {
    pub const fn new(name: &'static str, method: HttpMethod, template: &'static str) -> Self {
        Self {
            name,
            method,
            template,
        }
    }

    /// Number of `{placeholder}` segments in the template.
    pub fn arity(&self) -> usize {
        self.template
            .split('/')
            .filter(|s| is_placeholder(s))
            .count()
    }

    /// Resolve placeholders in order. Each parameter fills exactly one path
    /// segment; the client encodes it, so a `/` inside a parameter cannot
    /// escape its segment.
    pub fn call(&self, params: &[&str]) -> Result<ApiRequest, ApiError> {
        if params.len() != self.arity() {
            return Err(ApiError::unknown(
                None,
                format!(
                    "endpoint {} expects {} path parameter(s), got {}",
                    self.name,
                    self.arity(),
                    params.len()
                ),
            ));
        }
        let mut params = params.iter();
        let mut segments = Vec::new();
        for segment in self.template.split('/').filter(|s| !s.is_empty()) {
            if is_placeholder(segment) {
                // Arity was checked above.
                if let Some(value) = params.next() {
                    segments.push((*value).to_string());
                }
            } else {
                segments.push(segment.to_string());
            }
        }
        Ok(ApiRequest {
            method: self.method,
            segments,
            query: Vec::new(),
            body: None,
        })
    }
}

fn is_placeholder(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}')
}

/// The frozen operation table.
pub mod endpoints {
    use super::Endpoint;
    use crate::http::HttpMethod::{Delete, Get, Post, Put};

    pub const LOGIN: Endpoint = Endpoint::new("login", Post, "auth/login");
    pub const REGISTER: Endpoint = Endpoint::new("register", Post, "auth/register");
    pub const GET_PROFILE: Endpoint = Endpoint::new("get_profile", Get, "auth/profile");
    pub const UPDATE_PROFILE: Endpoint = Endpoint::new("update_profile", Put, "auth/profile");

    pub const NEARBY_BINS: Endpoint = Endpoint::new("get_nearby_bins", Get, "bins/nearby");
    pub const COLLECT_BIN: Endpoint = Endpoint::new("collect_bin", Post, "bins/{binId}/collect");
    pub const REPORT_MAINTENANCE: Endpoint =
        Endpoint::new("report_maintenance", Post, "bins/{binId}/maintenance");
    pub const BINS: Endpoint = Endpoint::new("get_bins", Get, "bins/collection-priority");
    pub const BIN_STATUS: Endpoint = Endpoint::new("get_bin", Get, "bins/{binId}/status");
    pub const REGISTER_BIN: Endpoint = Endpoint::new("register_bin", Post, "bins/register");
    pub const BIN_SENSOR_DATA: Endpoint =
        Endpoint::new("update_bin_sensor_data", Put, "bins/{binId}/sensor-data");
    pub const BIN_ANALYTICS: Endpoint = Endpoint::new("get_bin_analytics", Get, "bins/analytics");

    pub const VEHICLE_ROUTE: Endpoint =
        Endpoint::new("get_vehicle_route", Get, "vehicles/{vehicleId}/route");
    pub const VEHICLE_STATUS: Endpoint =
        Endpoint::new("update_vehicle_status", Put, "vehicles/{vehicleId}/status");
    pub const VEHICLES: Endpoint = Endpoint::new("get_vehicles", Get, "vehicles/overview");
    pub const VEHICLE_LOCATION: Endpoint =
        Endpoint::new("get_vehicle", Get, "vehicles/{vehicleId}/location");
    pub const REGISTER_VEHICLE: Endpoint =
        Endpoint::new("register_vehicle", Post, "vehicles/register");
    pub const VEHICLE_ANALYTICS: Endpoint =
        Endpoint::new("get_vehicle_analytics", Get, "vehicles/analytics");

    pub const ACTIVE_ROUTES: Endpoint = Endpoint::new("get_active_routes", Get, "routes/active");
    pub const ROUTE_PROGRESS: Endpoint =
        Endpoint::new("update_route_progress", Put, "routes/{routeId}/progress");
    pub const OPTIMIZE_ROUTE: Endpoint = Endpoint::new("optimize_route", Post, "routes/optimize");
    pub const ROUTE_ANALYTICS: Endpoint =
        Endpoint::new("get_route_analytics", Get, "routes/analytics");

    pub const DASHBOARD: Endpoint =
        Endpoint::new("get_dashboard_analytics", Get, "analytics/dashboard");
    pub const ENVIRONMENTAL_IMPACT: Endpoint = Endpoint::new(
        "get_environmental_impact",
        Get,
        "analytics/environmental-impact",
    );
    pub const PREDICTIONS: Endpoint =
        Endpoint::new("get_predictions", Get, "analytics/predictions");
    pub const GENERATE_REPORT: Endpoint =
        Endpoint::new("generate_report", Post, "analytics/reports/generate");

    pub const USERS: Endpoint = Endpoint::new("get_users", Get, "users");
    pub const CREATE_USER: Endpoint = Endpoint::new("create_user", Post, "users");
    pub const UPDATE_USER: Endpoint = Endpoint::new("update_user", Put, "users/{userId}");
    pub const DELETE_USER: Endpoint = Endpoint::new("delete_user", Delete, "users/{userId}");

    /// Default target of `ApiClient::upload_file`.
    pub const UPLOAD: Endpoint = Endpoint::new("upload_file", Post, "upload");

    /// Every operation, for table-driven checks.
    pub const ALL: &[Endpoint] = &[
        LOGIN,
        REGISTER,
        GET_PROFILE,
        UPDATE_PROFILE,
        NEARBY_BINS,
        COLLECT_BIN,
        REPORT_MAINTENANCE,
        BINS,
        BIN_STATUS,
        REGISTER_BIN,
        BIN_SENSOR_DATA,
        BIN_ANALYTICS,
        VEHICLE_ROUTE,
        VEHICLE_STATUS,
        VEHICLES,
        VEHICLE_LOCATION,
        REGISTER_VEHICLE,
        VEHICLE_ANALYTICS,
        ACTIVE_ROUTES,
        ROUTE_PROGRESS,
        OPTIMIZE_ROUTE,
        ROUTE_ANALYTICS,
        DASHBOARD,
        ENVIRONMENTAL_IMPACT,
        PREDICTIONS,
        GENERATE_REPORT,
        USERS,
        CREATE_USER,
        UPDATE_USER,
        DELETE_USER,
        UPLOAD,
    ];
}
