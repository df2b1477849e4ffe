//! HTTP front end: response model, error mapping and the axum router.

use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use crate::error::ErrorKind;
use crate::ratelimit::IpRateLimit;
use crate::record::GeoInfo;
use crate::service::GeoService;
use crate::Error;

/// Lookup route.
pub const LOOKUP_PATH: &str = "/api/v1/ip_geo";

/// Readiness route.
pub const HEALTHZ_PATH: &str = "/healthz";

/// How long browsers may cache a preflight answer.
pub const CORS_MAX_AGE: Duration = Duration::from_secs(86400);

/// Lookup response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoResponse {
    pub db_version: String,
    pub continent_code: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub city: String,
    /// No source field supplies a district; always empty.
    pub district: String,
    pub area_code: String,
    pub isp: String,
    pub isp_domain: String,
    pub zip_code: String,
    pub latitude: String,
    pub longitude: String,
    pub timezone: String,
}

impl From<GeoInfo> for GeoResponse {
    fn from(info: GeoInfo) -> Self {
        let r = info.record;
        Self {
            db_version: info.db_version,
            continent_code: info.continent_code,
            country: r.country,
            country_code: r.country_code,
            region: r.province,
            city: r.city,
            district: String::new(),
            area_code: r.area_code,
            isp: r.isp,
            isp_domain: r.domain,
            zip_code: r.zip_code,
            latitude: r.latitude,
            longitude: r.longitude,
            timezone: r.timezone,
        }
    }
}

/// Envelope around every JSON body: `code` 0 on success, the HTTP status
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> BaseResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// Lookup query string.
#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub ip_addr: String,
}

/// HTTP status for a lookup error.
pub fn status_code(err: &Error) -> StatusCode {
    match err.kind() {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        let body = BaseResponse::<()> {
            code: i32::from(status.as_u16()),
            msg: self.to_string(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GeoService>,
    pub rate_limit: Option<IpRateLimit>,
}

/// Build the router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the rate-limit
/// gate can see the peer address.
pub fn router(state: AppState) -> Router {
    let lookup = Router::new()
        .route(LOOKUP_PATH, get(lookup_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit_layer));

    Router::new()
        .merge(lookup)
        .route(HEALTHZ_PATH, get(healthz_handler))
        .with_state(state)
        .layer(cors_layer())
}

/// Cross-origin access for browser clients: any origin, read-only methods.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(CORS_MAX_AGE)
}

async fn lookup_handler(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<BaseResponse<GeoResponse>>, Error> {
    log::debug!("GetIpGeo, ip_addr: {}", query.ip_addr);
    match state.service.lookup(&query.ip_addr) {
        Ok(info) => Ok(Json(BaseResponse::ok(GeoResponse::from(info)))),
        Err(e) => {
            if status_code(&e) == StatusCode::INTERNAL_SERVER_ERROR {
                log::error!("query ip database failed, ip: {}, err: {}", query.ip_addr, e);
            }
            Err(e)
        }
    }
}

async fn healthz_handler(State(state): State<AppState>) -> Response {
    if state.service.is_ready() {
        (StatusCode::OK, Json(BaseResponse::ok("ready"))).into_response()
    } else {
        Error::NotReady.into_response()
    }
}

async fn rate_limit_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(gate) = &state.rate_limit {
        let forwarded = forwarded_for(request.headers());
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        if !gate.check(forwarded.as_deref(), peer) {
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }
    next.run(request).await
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
