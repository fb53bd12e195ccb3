//! axum HTTP surface: deal listing, detail with view tracking, click events
//! and the authenticated ingestion trigger.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use dealfeed_core::{ClickEvent, DealFilters, DealType, PageRequest};
use dealfeed_storage::{client_fingerprint, sha256_hex, DealStore, QueryService};
use dealfeed_sync::{connect_store, maybe_build_scheduler, IngestionPipeline, SyncConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dealfeed-web";

pub struct AppState {
    store: Arc<dyn DealStore>,
    query: QueryService,
    pipeline: Option<Arc<IngestionPipeline>>,
    trigger_secret: Option<SecretString>,
}

impl AppState {
    pub fn new(store: Arc<dyn DealStore>) -> Self {
        Self {
            query: QueryService::new(Arc::clone(&store)),
            store,
            pipeline: None,
            trigger_secret: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<IngestionPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Without a secret the trigger endpoint answers 401 to everyone.
    pub fn with_trigger_secret(mut self, secret: SecretString) -> Self {
        self.trigger_secret = Some(secret);
        self
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DealsQuery {
    #[serde(rename = "type")]
    deal_type: Option<String>,
    origin: Option<String>,
    destination: Option<String>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    limit: Option<usize>,
    offset: Option<usize>,
    #[serde(default)]
    distinct: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DealsQuery {
    fn filters(&self) -> Result<DealFilters, String> {
        let deal_type = match non_blank(self.deal_type.clone()) {
            Some(raw) => Some(DealType::parse(&raw).ok_or_else(|| format!("unknown deal type: {raw}"))?),
            None => None,
        };
        Ok(DealFilters {
            deal_type,
            origin: non_blank(self.origin.clone()).map(|o| o.to_ascii_uppercase()),
            destination: non_blank(self.destination.clone()).map(|d| d.to_ascii_uppercase()),
            min_price: self.min_price,
            max_price: self.max_price,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClickQuery {
    deal_id: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/deals", get(list_deals_handler).post(trigger_ingestion_handler))
        .route("/deals/clicks", post(record_click_handler))
        .route("/deals/{id}", get(deal_detail_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Store, pipeline and optional scheduler from the environment, then serve.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let mut config = SyncConfig::from_env();
    let store = connect_store(&config).await?;
    let pipeline = Arc::new(IngestionPipeline::from_config(&config, Arc::clone(&store))?);

    let scheduler = maybe_build_scheduler(&config, Arc::clone(&pipeline)).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(cron = %config.sync_cron, "ingestion scheduler started");
    }

    let mut state = AppState::new(store).with_pipeline(pipeline);
    match config.trigger_secret.take() {
        Some(secret) => state = state.with_trigger_secret(secret),
        None => warn!("DEALS_TRIGGER_SECRET not set; POST /deals will answer 401"),
    }

    let listener = TcpListener::bind(("0.0.0.0", config.web_port))
        .await
        .with_context(|| format!("binding port {}", config.web_port))?;
    info!(port = config.web_port, "dealfeed web listening");
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn list_deals_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DealsQuery>,
) -> Response {
    let filters = match params.filters() {
        Ok(filters) => filters,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, &message),
    };
    let page = PageRequest::new(params.limit, params.offset);
    match state.query.query(&filters, page, params.distinct, Utc::now()).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => server_error(err),
    }
}

async fn deal_detail_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(id.trim()) else {
        return json_error(StatusCode::NOT_FOUND, "deal not found");
    };
    match state.store.increment_view(id).await {
        Ok(Some(deal)) => Json(deal).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "deal not found"),
        Err(err) => server_error(err),
    }
}

async fn record_click_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClickQuery>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    let Some(raw) = non_blank(params.deal_id) else {
        return json_error(StatusCode::BAD_REQUEST, "dealId is required");
    };
    let Ok(deal_id) = Uuid::parse_str(&raw) else {
        return json_error(StatusCode::BAD_REQUEST, "dealId must be a UUID");
    };

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let event = ClickEvent {
        deal_id,
        clicked_at: Utc::now(),
        client_hash: client_fingerprint(&client_address(&headers, &extensions), user_agent),
    };
    match state.store.record_click(&event).await {
        Ok(true) => Json(json!({ "success": true })).into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "deal not found"),
        Err(err) => server_error(err),
    }
}

async fn trigger_ingestion_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(state.trigger_secret.as_ref(), &headers) {
        warn!("ingestion trigger rejected");
        return json_error(StatusCode::UNAUTHORIZED, "unauthorized");
    }
    let Some(pipeline) = state.pipeline.clone() else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "ingestion pipeline not configured");
    };

    // Partial failures come back inside the result; only a panicked run is a 500.
    match tokio::spawn(async move { pipeline.run_once().await }).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => server_error(err),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

fn authorized(secret: Option<&SecretString>, headers: &HeaderMap) -> bool {
    match (secret, bearer_token(headers)) {
        (Some(secret), Some(token)) => secrets_match(token, secret.expose_secret()),
        _ => false,
    }
}

/// Compares digests so the comparison time does not depend on where the inputs differ.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let provided = sha256_hex(provided.as_bytes());
    let expected = sha256_hex(expected.as_bytes());
    provided
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn client_address(headers: &HeaderMap, extensions: &Extensions) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn server_error(err: impl Display) -> Response {
    error!(error = %err, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}
