use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{async_trait, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::error::ApiError;
use crate::schema::{EmailRequest, EmailResponse};
use crate::smtp::Dispatcher;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(settings: Settings, dispatcher: Dispatcher) -> Self {
        Self {
            settings: Arc::new(settings),
            dispatcher,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.allowed_origins);
    let api = Router::new()
        .route("/send", post(send_email))
        .route("/health", get(health));

    Router::new()
        .route("/", get(root))
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Checks a provided key against the configured one.
///
/// Always passes when no key is configured.
pub fn verify_api_key(expected: Option<&str>, provided: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match provided {
        None | Some("") => Err(ApiError::MissingApiKey),
        Some(key) if key == expected => Ok(()),
        Some(_) => Err(ApiError::InvalidApiKey),
    }
}

/// Extractor guarding routes behind `X-API-Key`.
pub struct ApiKey;

#[async_trait]
impl FromRequestParts<AppState> for ApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        match verify_api_key(state.settings.api_key(), provided) {
            Ok(()) => Ok(ApiKey),
            Err(err) => {
                tracing::warn!("Rejected request: {err}");
                Err(err)
            }
        }
    }
}

async fn send_email(
    _key: ApiKey,
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<EmailResponse>, ApiError> {
    let Json(email) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    email.validate()?;

    tracing::info!(
        "Received email request from {} to [{}]",
        email.from_email,
        email.recipients()
    );

    if !email.has_content() {
        return Err(ApiError::MissingContent);
    }

    let response = state.dispatcher.dispatch(&email).await;
    if !response.success {
        return Err(ApiError::Delivery(response.message));
    }
    Ok(Json(response))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "smtp-bridge",
    }))
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "service": state.settings.app_name,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}
