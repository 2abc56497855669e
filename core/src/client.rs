//! Session-aware HTTP client façade for the SmartWaste API.
//!
//! # Design
//! Every call goes through the same pipeline: `build_request` turns an
//! `ApiRequest` into an absolute `HttpRequest` (reading the session token
//! once), the `Transport` executes it under the configured deadline, and
//! `parse_response` decodes or classifies the result. The build and parse
//! halves are pure and are unit-tested without a network.
//!
//! The client mutates the session in exactly three places: a successful
//! login (or registration that returns a token) sets it, `logout` clears it,
//! and a 401 response clears it before the error is returned. Nothing is
//! retried.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::endpoint::{endpoints, ApiRequest, QueryValue};
use crate::error::ApiError;
use crate::http::{FormPart, HttpBody, HttpMethod, HttpRequest, HttpResponse};
use crate::session::{FileStore, MemoryStore, Session, SessionState, SessionStore, SessionUser};
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{
    ActiveRoutesResponse, CollectBinRequest, CollectBinResponse, CreateUserResponse,
    DashboardResponse, LoginRequest, LoginResponse, LogoutResponse, MaintenanceRequest,
    MaintenanceResponse, NearbyBinsResponse, NewUser, Period, ProfileUpdate, RegisterRequest,
    RegisterResponse, RouteProgressRequest, RouteProgressResponse, SuccessResponse, UserProfile,
    UserUpdate, UsersResponse, VehicleRouteResponse, VehicleStatusRequest, VehicleStatusResponse,
};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Async client for the SmartWaste API.
///
/// Cloning is cheap and clones share the session: logging out through one
/// clone logs out all of them.
#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    session: Arc<SessionState>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Build a client, restoring any session `store` already holds.
    pub fn new(
        config: ClientConfig,
        transport: impl Transport + 'static,
        store: impl SessionStore + 'static,
    ) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            session: Arc::new(SessionState::restore(Box::new(store))),
        }
    }

    /// Real network, session kept in memory only.
    pub fn from_config(config: ClientConfig) -> Self {
        Self::new(config, ReqwestTransport::new(), MemoryStore::new())
    }

    /// Real network, session persisted as JSON at `path`. Pass
    /// `FileStore::default_path()` for the per-user data directory.
    pub fn with_file_store(config: ClientConfig, path: impl Into<PathBuf>) -> Self {
        Self::new(config, ReqwestTransport::new(), FileStore::new(path))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> Option<Session> {
        self.session.snapshot()
    }

    pub fn token(&self) -> Option<String> {
        self.session.token()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.token().is_some()
    }

    /// Install a session obtained outside `login`, persisting it.
    pub fn set_session(&self, session: Session) {
        self.session.replace(session);
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Resolve `request` against the base URL and attach headers.
    ///
    /// Multipart bodies get no `content-type` here; the transport sets it
    /// together with the boundary.
    pub fn build_request(&self, request: &ApiRequest) -> Result<HttpRequest, ApiError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::unknown(None, "base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(&request.segments);
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, &value.to_string());
            }
        }

        let mut headers = Vec::with_capacity(2);
        if !matches!(request.body, Some(HttpBody::Multipart(_))) {
            headers.push(("content-type".to_string(), CONTENT_TYPE_JSON.to_string()));
        }
        if let Some(token) = self.session.token() {
            headers.push(("authorization".to_string(), format!("Bearer {token}")));
        }

        Ok(HttpRequest {
            method: request.method,
            url: url.into(),
            headers,
            body: request.body.clone(),
        })
    }

    /// Decode a 2xx body into `T`, or classify the failure.
    ///
    /// Has no side effects; the 401 session reset lives in `request`.
    pub fn parse_response<T: DeserializeOwned>(
        &self,
        response: HttpResponse,
    ) -> Result<T, ApiError> {
        if !response.is_success() {
            return Err(classify_status(response.status, &response.body));
        }
        let body = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        serde_json::from_str(body).map_err(|e| {
            ApiError::unknown(
                Some(response.status),
                format!("unexpected response body: {e}"),
            )
        })
    }

    /// Issue one call and decode its result.
    ///
    /// Any 401 clears the session, including one installed by a concurrent
    /// `login` after this call was built.
    pub async fn request<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let http = self.build_request(&request)?;
        let response = self.send(http).await?;
        if response.status == 401 {
            if self.session.clear() {
                tracing::warn!(path = %request.path(), "unauthorized response, session cleared");
            } else {
                tracing::debug!(path = %request.path(), "unauthorized response without a session");
            }
        }
        self.parse_response(response)
    }

    /// `request`, abandoned as soon as `cancel` fires. A cancelled call
    /// never touches the session.
    pub async fn request_cancellable<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T, ApiError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(path = %request.path(), "request cancelled");
                Err(ApiError::cancelled())
            }
            result = self.request(request.clone()) => result,
        }
    }

    async fn send(&self, http: HttpRequest) -> Result<HttpResponse, ApiError> {
        tracing::debug!(method = %http.method, url = %http.url, "sending request");
        match tokio::time::timeout(self.config.timeout, self.transport.execute(http)).await {
            Ok(Ok(response)) => {
                tracing::debug!(status = response.status, "response received");
                Ok(response)
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "transport failed");
                Err(ApiError::network(e.to_string()))
            }
            Err(_) => {
                tracing::debug!(timeout = ?self.config.timeout, "request deadline elapsed");
                Err(ApiError::network(format!(
                    "request timed out after {:?}",
                    self.config.timeout
                )))
            }
        }
    }

    /// Run `requests` concurrently, at most `max_concurrent_requests` at a
    /// time. Results keep input order; one failure does not stop the rest.
    pub async fn batch(&self, requests: Vec<ApiRequest>) -> Vec<Result<Value, ApiError>> {
        stream::iter(requests)
            .map(|request| self.request::<Value>(request))
            .buffered(self.config.max_concurrent_requests.max(1))
            .collect()
            .await
    }

    /// GET `<origin>/health`, where origin is the base URL minus a trailing
    /// `api` segment. Sent without credentials; never fails.
    pub async fn health_check(&self) -> bool {
        let mut url = self.config.base_url.clone();
        let mut segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        if segments.last().map(String::as_str) == Some("api") {
            segments.pop();
        }
        segments.push("health".to_string());
        match url.path_segments_mut() {
            Ok(mut path) => {
                path.clear().extend(&segments);
            }
            Err(()) => return false,
        }
        url.set_query(None);

        let http = HttpRequest {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        };
        matches!(self.send(http).await, Ok(response) if response.is_success())
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    /// Log in and, on success, install the returned token as the session.
    ///
    /// A 2xx body with `success: false` or no token is surfaced as
    /// `Validation` and leaves the session as it was.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        user_type: &str,
    ) -> Result<LoginResponse, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            user_type: user_type.to_string(),
        };
        let request = endpoints::LOGIN.call(&[])?.json(&body)?;
        let response: LoginResponse = self.request(request).await?;

        if !response.success || response.token.is_empty() {
            let message = response
                .message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Login failed".to_string());
            return Err(ApiError::Validation { message });
        }

        let mut session = Session::new(response.token.clone());
        if let Some(user) = &response.user {
            session = session.with_user(SessionUser::from(user));
        }
        self.session.replace(session);
        tracing::info!(user_type, "session established");
        Ok(response)
    }

    /// Register an account. A token in the response logs the new account in.
    pub async fn register(&self, body: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let request = endpoints::REGISTER.call(&[])?.json(body)?;
        let response: RegisterResponse = self.request(request).await?;
        if let Some(token) = response.token.as_deref().filter(|t| !t.is_empty()) {
            let user = SessionUser {
                user_id: response.user_id.clone(),
                name: body.name.clone(),
                email: body.email.clone(),
                user_type: body.user_type.clone(),
            };
            self.session.replace(Session::new(token).with_user(user));
            tracing::info!(user_type = %body.user_type, "session established from registration");
        }
        Ok(response)
    }

    /// Drop the session locally. Always succeeds.
    pub async fn logout(&self) -> Result<LogoutResponse, ApiError> {
        if self.session.clear() {
            tracing::info!("logged out");
        }
        Ok(LogoutResponse { success: true })
    }

    pub async fn get_profile(&self) -> Result<UserProfile, ApiError> {
        self.request(endpoints::GET_PROFILE.call(&[])?).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Value, ApiError> {
        self.request(endpoints::UPDATE_PROFILE.call(&[])?.json(update)?).await
    }

    // -----------------------------------------------------------------------
    // Bins
    // -----------------------------------------------------------------------

    pub async fn get_nearby_bins(
        &self,
        lat: f64,
        lng: f64,
        radius_meters: u32,
    ) -> Result<NearbyBinsResponse, ApiError> {
        let request = endpoints::NEARBY_BINS
            .call(&[])?
            .query("lat", lat)
            .query("lng", lng)
            .query("radius", radius_meters);
        self.request(request).await
    }

    pub async fn collect_bin(
        &self,
        bin_id: &str,
        body: &CollectBinRequest,
    ) -> Result<CollectBinResponse, ApiError> {
        self.request(endpoints::COLLECT_BIN.call(&[bin_id])?.json(body)?).await
    }

    pub async fn report_maintenance(
        &self,
        bin_id: &str,
        body: &MaintenanceRequest,
    ) -> Result<MaintenanceResponse, ApiError> {
        self.request(endpoints::REPORT_MAINTENANCE.call(&[bin_id])?.json(body)?).await
    }

    /// Bins ordered by collection priority.
    pub async fn get_bins(&self, filters: &[(&str, QueryValue)]) -> Result<Value, ApiError> {
        self.request(with_filters(endpoints::BINS.call(&[])?, filters)).await
    }

    pub async fn get_bin(&self, bin_id: &str) -> Result<Value, ApiError> {
        self.request(endpoints::BIN_STATUS.call(&[bin_id])?).await
    }

    pub async fn register_bin<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, ApiError> {
        self.request(endpoints::REGISTER_BIN.call(&[])?.json(body)?).await
    }

    pub async fn update_bin_sensor_data<B: Serialize + ?Sized>(
        &self,
        bin_id: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        self.request(endpoints::BIN_SENSOR_DATA.call(&[bin_id])?.json(body)?).await
    }

    pub async fn get_bin_analytics(
        &self,
        filters: &[(&str, QueryValue)],
    ) -> Result<Value, ApiError> {
        self.request(with_filters(endpoints::BIN_ANALYTICS.call(&[])?, filters)).await
    }

    // -----------------------------------------------------------------------
    // Vehicles
    // -----------------------------------------------------------------------

    pub async fn get_vehicle_route(
        &self,
        vehicle_id: &str,
    ) -> Result<VehicleRouteResponse, ApiError> {
        self.request(endpoints::VEHICLE_ROUTE.call(&[vehicle_id])?).await
    }

    pub async fn update_vehicle_status(
        &self,
        vehicle_id: &str,
        body: &VehicleStatusRequest,
    ) -> Result<VehicleStatusResponse, ApiError> {
        self.request(endpoints::VEHICLE_STATUS.call(&[vehicle_id])?.json(body)?).await
    }

    pub async fn get_vehicles(&self, filters: &[(&str, QueryValue)]) -> Result<Value, ApiError> {
        self.request(with_filters(endpoints::VEHICLES.call(&[])?, filters)).await
    }

    /// Current location of one vehicle.
    pub async fn get_vehicle(&self, vehicle_id: &str) -> Result<Value, ApiError> {
        self.request(endpoints::VEHICLE_LOCATION.call(&[vehicle_id])?).await
    }

    pub async fn register_vehicle<B: Serialize + ?Sized>(
        &self,
        body: &B,
    ) -> Result<Value, ApiError> {
        self.request(endpoints::REGISTER_VEHICLE.call(&[])?.json(body)?).await
    }

    pub async fn get_vehicle_analytics(
        &self,
        filters: &[(&str, QueryValue)],
    ) -> Result<Value, ApiError> {
        self.request(with_filters(endpoints::VEHICLE_ANALYTICS.call(&[])?, filters)).await
    }

    // -----------------------------------------------------------------------
    // Routes
    // -----------------------------------------------------------------------

    pub async fn get_active_routes(&self) -> Result<ActiveRoutesResponse, ApiError> {
        self.request(endpoints::ACTIVE_ROUTES.call(&[])?).await
    }

    pub async fn update_route_progress(
        &self,
        route_id: &str,
        body: &RouteProgressRequest,
    ) -> Result<RouteProgressResponse, ApiError> {
        self.request(endpoints::ROUTE_PROGRESS.call(&[route_id])?.json(body)?).await
    }

    pub async fn optimize_route<B: Serialize + ?Sized>(&self, body: &B) -> Result<Value, ApiError> {
        self.request(endpoints::OPTIMIZE_ROUTE.call(&[])?.json(body)?).await
    }

    pub async fn get_route_analytics(
        &self,
        filters: &[(&str, QueryValue)],
    ) -> Result<Value, ApiError> {
        self.request(with_filters(endpoints::ROUTE_ANALYTICS.call(&[])?, filters)).await
    }

    // -----------------------------------------------------------------------
    // Analytics
    // -----------------------------------------------------------------------

    pub async fn get_dashboard_analytics(
        &self,
        period: Period,
    ) -> Result<DashboardResponse, ApiError> {
        let request = endpoints::DASHBOARD.call(&[])?.query("period", period.as_str());
        self.request(request).await
    }

    pub async fn get_environmental_impact(&self, period: Period) -> Result<Value, ApiError> {
        let request = endpoints::ENVIRONMENTAL_IMPACT
            .call(&[])?
            .query("period", period.as_str());
        self.request(request).await
    }

    pub async fn get_predictions(&self) -> Result<Value, ApiError> {
        self.request(endpoints::PREDICTIONS.call(&[])?).await
    }

    pub async fn generate_report<B: Serialize + ?Sized>(
        &self,
        body: &B,
    ) -> Result<Value, ApiError> {
        self.request(endpoints::GENERATE_REPORT.call(&[])?.json(body)?).await
    }

    // -----------------------------------------------------------------------
    // Users (admin)
    // -----------------------------------------------------------------------

    pub async fn get_users(
        &self,
        filters: &[(&str, QueryValue)],
    ) -> Result<UsersResponse, ApiError> {
        self.request(with_filters(endpoints::USERS.call(&[])?, filters)).await
    }

    pub async fn create_user(&self, body: &NewUser) -> Result<CreateUserResponse, ApiError> {
        self.request(endpoints::CREATE_USER.call(&[])?.json(body)?).await
    }

    pub async fn update_user(
        &self,
        user_id: &str,
        body: &UserUpdate,
    ) -> Result<SuccessResponse, ApiError> {
        self.request(endpoints::UPDATE_USER.call(&[user_id])?.json(body)?).await
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<SuccessResponse, ApiError> {
        self.request(endpoints::DELETE_USER.call(&[user_id])?).await
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    /// POST `file` as `multipart/form-data` to `endpoint`, relative to the
    /// base URL. `endpoints::UPLOAD` is the usual target.
    pub async fn upload_file(&self, file: FormPart, endpoint: &str) -> Result<Value, ApiError> {
        self.request(ApiRequest::post(endpoint).multipart(vec![file])).await
    }

    /// Read `path` and upload it as the `file` form field.
    pub async fn upload_path(
        &self,
        path: impl AsRef<Path>,
        endpoint: &str,
    ) -> Result<Value, ApiError> {
        let path = path.as_ref();
        let file = FormPart::from_path("file", path).await.map_err(|e| {
            ApiError::unknown(None, format!("cannot read {}: {e}", path.display()))
        })?;
        self.upload_file(file, endpoint).await
    }
}

fn with_filters(request: ApiRequest, filters: &[(&str, QueryValue)]) -> ApiRequest {
    request.query_pairs(filters.iter().map(|(k, v)| (*k, v.clone())))
}

/// Map a non-2xx response to an `ApiError`, preferring the server's own
/// `message` (or `error`) field over the status-keyed default.
pub fn classify_status(status: u16, body: &str) -> ApiError {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["message", "error"]
            .iter()
            .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
    });
    ApiError::from_status(status, message)
}
