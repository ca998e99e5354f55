// HTTP server for the upload guard
//
// Routes:
// - GET  /api/admin/config   current policy (optionally password-gated)
// - POST /api/admin/config   {password, config} -> normalized policy
// - POST /api/uploads/check  upload-path preflight, allow or deny with reason
// - GET  /metrics            Prometheus text format (when enabled)
// - GET  /health             liveness

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, Extensions, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::metrics;
use crate::rate_limit::{
    extension_of, AdminAuthGate, ConfigError, ConfigService, Decision, DenyReason,
    JsonPolicyStore, PolicyDocument, PolicyStore, RateLimitEnforcer, UploadAttempt,
};

/// Header carrying the admin password on protected reads
pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

/// Header carrying an explicit client identity
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Shared handler state
#[derive(Debug, Clone)]
pub struct AppState {
    pub enforcer: RateLimitEnforcer,
    pub config_service: ConfigService,
    /// Require the admin password for policy reads
    pub protect_reads: bool,
    /// Key clients on `X-Client-Id` / `X-Forwarded-For` instead of the peer
    pub trust_client_headers: bool,
}

impl AppState {
    /// Wire enforcer and config service over one shared store
    pub fn new(store: Arc<dyn PolicyStore>, gate: AdminAuthGate, protect_reads: bool) -> Self {
        Self {
            enforcer: RateLimitEnforcer::new(store.clone()),
            config_service: ConfigService::new(gate, store),
            protect_reads,
            trust_client_headers: false,
        }
    }

    /// Honour caller-supplied identity headers (trusted proxy deployments)
    pub fn with_trusted_client_headers(mut self, trust: bool) -> Self {
        self.trust_client_headers = trust;
        self
    }
}

/// Build the application router
pub fn router(state: AppState, metrics_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/api/admin/config", get(get_config_handler).post(update_config_handler))
        .route("/api/uploads/check", post(upload_check_handler))
        .route("/health", get(health_handler));

    if metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.with_state(state).layer(TraceLayer::new_for_http())
}

/// Start the HTTP server and the eviction sweep, run until Ctrl-C
pub async fn serve(config: &Config) -> Result<()> {
    if config.metrics.enabled {
        metrics::init().context("Failed to initialize metrics")?;
    }

    let store = JsonPolicyStore::open(&config.policy.path)
        .with_context(|| format!("Failed to open policy store at {}", config.policy.path))?;
    let gate = AdminAuthGate::from_config(config.admin.password.as_deref());
    if !gate.is_enabled() {
        info!("No admin password configured; policy changes are disabled");
    }
    if config.server.trust_client_headers {
        info!("Keying upload limits on X-Client-Id / X-Forwarded-For");
    }

    let state = AppState::new(Arc::new(store), gate, config.admin.protect_reads)
        .with_trusted_client_headers(config.server.trust_client_headers);
    let eviction = spawn_eviction_task(state.enforcer.clone(), config.eviction_interval());
    let app = router(state, config.metrics.enabled);

    let addr = config.listen_addr()?;
    info!("Starting upload guard on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    eviction.abort();
    info!("Upload guard stopped");
    Ok(())
}

/// Periodically drop idle client counters
pub fn spawn_eviction_task(enforcer: RateLimitEnforcer, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            enforcer.evict_idle(Utc::now());
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Identity used for upload counting.
///
/// By default this is the peer IP. With trusted client headers the order is
/// `X-Client-Id`, first `X-Forwarded-For` hop, then the peer IP. Without a
/// peer address the identity is `anonymous`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    /// Resolve the identity from request headers and extensions
    pub fn resolve(headers: &HeaderMap, extensions: &Extensions, trust_headers: bool) -> Self {
        if trust_headers {
            let header_value = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
            };

            if let Some(id) = header_value(CLIENT_ID_HEADER) {
                return Self(id.to_string());
            }
            if let Some(forwarded) = header_value("x-forwarded-for") {
                if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                    return Self(first.to_string());
                }
            }
        }

        match extensions.get::<ConnectInfo<SocketAddr>>() {
            Some(ConnectInfo(addr)) => Self(addr.ip().to_string()),
            None => Self("anonymous".to_string()),
        }
    }
}

impl FromRequestParts<AppState> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::resolve(
            &parts.headers,
            &parts.extensions,
            state.trust_client_headers,
        ))
    }
}

/// Body of POST /api/uploads/check
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCheckRequest {
    pub file_name: String,
    /// Bytes
    pub file_size: u64,
}

/// Body returned by POST /api/uploads/check
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadCheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Handler error mapped onto HTTP responses
#[derive(Debug)]
pub enum ApiError {
    Config(ConfigError),
    /// Body could not be read as JSON of the expected shape
    BadRequest(String),
    Denied {
        reason: DenyReason,
        retry_after_secs: Option<u64>,
    },
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Config(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn deny_status(reason: DenyReason) -> StatusCode {
    if reason.is_rate_related() {
        return StatusCode::TOO_MANY_REQUESTS;
    }
    match reason {
        DenyReason::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn deny_message(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::CooldownActive => "Too many uploads, please wait before trying again",
        DenyReason::BlockedExtension => "This file type is not allowed",
        DenyReason::FileTooLarge => "File exceeds the maximum allowed size",
        DenyReason::RateLimitExceeded => "Upload rate limit exceeded",
        DenyReason::StoreUnavailable => "Uploads are temporarily unavailable",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Config(ConfigError::Unauthorized) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response(),
            ApiError::Config(ConfigError::Validation(e)) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string(), "field": e.field })),
            )
                .into_response(),
            ApiError::Config(ConfigError::StoreUnavailable(msg)) => {
                error!("Policy store unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": "Policy store unavailable" })),
                )
                    .into_response()
            }
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Denied {
                reason,
                retry_after_secs,
            } => {
                let body = UploadCheckResponse {
                    allowed: false,
                    reason: Some(reason.as_str().to_string()),
                    error: Some(deny_message(reason).to_string()),
                    retry_after: retry_after_secs,
                };
                let mut response = (deny_status(reason), Json(body)).into_response();
                if let Some(secs) = retry_after_secs {
                    if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                        response.headers_mut().insert(header::RETRY_AFTER, value);
                    }
                }
                response
            }
        }
    }
}

/// GET /api/admin/config
async fn get_config_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PolicyDocument>, ApiError> {
    let document = if state.protect_reads {
        let password = headers
            .get(ADMIN_PASSWORD_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        state.config_service.read_policy(password).await?
    } else {
        state.config_service.current_policy().await?
    };
    Ok(Json(document))
}

/// POST /api/admin/config
///
/// The body is taken as raw JSON so the password is checked before any
/// policy field is interpreted.
async fn update_config_handler(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<PolicyDocument>, ApiError> {
    let Json(body) = body?;
    let password = body.get("password").and_then(Value::as_str).unwrap_or_default();
    let null = Value::Null;
    let config = body.get("config").unwrap_or(&null);

    let stored = state.config_service.write_policy_json(password, config).await?;
    Ok(Json(stored))
}

/// POST /api/uploads/check
async fn upload_check_handler(
    State(state): State<AppState>,
    client: ClientIdentity,
    request: Result<Json<UploadCheckRequest>, JsonRejection>,
) -> Result<Json<UploadCheckResponse>, ApiError> {
    let Json(request) = request?;
    let extension = extension_of(&request.file_name);
    let attempt = UploadAttempt {
        client_id: &client.0,
        file_size_bytes: request.file_size,
        file_extension: extension.as_deref(),
    };

    match state.enforcer.evaluate(attempt, Utc::now()).await {
        Decision::Allow => Ok(Json(UploadCheckResponse {
            allowed: true,
            reason: None,
            error: None,
            retry_after: None,
        })),
        Decision::Deny {
            reason,
            retry_after_secs,
        } => Err(ApiError::Denied {
            reason,
            retry_after_secs,
        }),
    }
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
