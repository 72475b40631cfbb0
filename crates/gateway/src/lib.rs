//! OpenAI-compatible HTTP gateway for GemRelay.
//!
//! Exposes `/health`, `/v1/models` and `/v1/chat/completions` on top of the
//! client pool, the conversation store and the continuity matcher.
//!
//! Built on Axum for high performance async HTTP.

pub mod chat;
pub mod error;
pub mod openai;

#[cfg(test)]
mod testing;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::{
    Router,
    extract::State,
    middleware::{self, Next},
    response::Json,
    routing::{get, post},
};
use gemrelay_config::{AppConfig, CorsConfig};
use gemrelay_continuity::{ContinuityMatcher, Materializer};
use gemrelay_core::RemoteBackend;
use gemrelay_pool::{BridgeBackend, ClientPool};
use gemrelay_store::{ConversationStore, StoreOptions};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::openai::HealthResponse;

/// Request bodies carry inline base64 attachments.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state for the gateway.
pub struct AppState {
    pub config: AppConfig,
    pub pool: Arc<ClientPool>,
    pub store: Arc<ConversationStore>,
    pub matcher: ContinuityMatcher,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Attachment fetches share the remote request timeout.
    pub fn new(
        config: AppConfig,
        pool: ClientPool,
        store: ConversationStore,
    ) -> gemrelay_core::Result<Self> {
        let pool = Arc::new(pool);
        let store = Arc::new(store);
        let materializer =
            Materializer::with_timeout(Duration::from_secs(config.remote.timeout))?;
        let matcher = ContinuityMatcher::new(pool.clone(), store.clone(), materializer);
        Ok(Self {
            config,
            pool,
            store,
            matcher,
        })
    }

    /// Build the pool and open the store from configuration. Each pool
    /// member talks to the configured bridge through its own connection.
    pub fn build(config: AppConfig) -> gemrelay_core::Result<Self> {
        let bridge_url = config.remote.bridge_url.clone();
        let pool = ClientPool::from_config(&config.remote, |_| {
            Arc::new(BridgeBackend::new(bridge_url.clone())) as Arc<dyn RemoteBackend>
        })?;

        let store = ConversationStore::open(
            StoreOptions {
                path: config.storage.path.clone(),
                max_size: config.storage.max_size,
            },
            pool.ids(),
        )?;

        Self::new(config, pool, store)
    }
}

/// Build the Axum router with all gateway routes.
///
/// `/v1` routes require the configured API key; CORS follows the `[cors]`
/// section.
pub fn build_router(state: SharedState) -> Router {
    let v1 = Router::new()
        .route("/models", get(chat::list_models))
        .route("/chat/completions", post(chat::create_chat_completion))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    if state.config.cors.enabled {
        router = router.layer(cors_layer(&state.config.cors));
    }

    router.layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Brings every pool member up first; the server does not start if any of
/// them fails.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::build(config)?);

    if let Err(e) = state.pool.init().await {
        error!(error = %e, "Failed to initialize remote clients");
        return Err(e.into());
    }
    info!(clients = ?state.pool.ids(), "Remote clients initialized");

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "GemRelay gateway ready to serve requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.store.close();
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "GemRelay",
        "description": "OpenAI-compatible API for Gemini Web",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "models": "/v1/models",
            "chat": "/v1/chat/completions",
        },
        "status": "running",
    }))
}

/// Health never fails: problems are reported in the body.
async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    if let Err(e) = state.pool.init().await {
        error!(error = %e, "Failed to initialize remote clients");
        return Json(HealthResponse {
            ok: false,
            error: Some(e.to_string()),
            ..Default::default()
        });
    }

    let clients = state.pool.status();
    let all_live = clients.values().all(|live| *live);
    if !all_live {
        warn!("One or more remote clients not running");
    }

    match state.store.stats() {
        Ok(stats) => Json(HealthResponse {
            ok: all_live,
            storage: Some(stats),
            clients: Some(clients),
            error: None,
        }),
        Err(e) => {
            error!(error = %e, "Failed to retrieve conversation store stats");
            Json(HealthResponse {
                ok: false,
                storage: None,
                clients: Some(clients),
                error: Some("Conversation store unavailable".into()),
            })
        }
    }
}

/// Bearer API-key check for `/v1` routes. Open when no key is configured.
async fn auth_middleware(
    State(state): State<SharedState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, ApiError> {
    let Some(expected) = state.config.server.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty());

    match token {
        Some(token) if token == expected => Ok(next.run(req).await),
        Some(_) => {
            warn!("Rejected /v1 request with wrong API key");
            Err(ApiError::new(
                axum::http::StatusCode::FORBIDDEN,
                "Wrong API key",
            ))
        }
        None => {
            warn!("Unauthorized /v1 request: missing or invalid bearer token");
            Err(ApiError::new(
                axum::http::StatusCode::UNAUTHORIZED,
                "Invalid or missing token",
            ))
        }
    }
}

/// CORS policy from configuration.
///
/// Browsers reject `*` together with credentials, so wildcard entries mirror
/// the request instead when credentials are allowed.
fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let wildcard = |values: &[String]| values.iter().any(|v| v == "*");
    let mirror = cors.allow_credentials;

    let origin = if wildcard(&cors.allow_origins) {
        if mirror {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        }
    } else {
        AllowOrigin::list(parse_all::<HeaderValue>(&cors.allow_origins, "origin"))
    };

    let methods = if wildcard(&cors.allow_methods) {
        if mirror {
            AllowMethods::mirror_request()
        } else {
            AllowMethods::any()
        }
    } else {
        AllowMethods::list(parse_all::<Method>(&cors.allow_methods, "method"))
    };

    let headers = if wildcard(&cors.allow_headers) {
        if mirror {
            AllowHeaders::mirror_request()
        } else {
            AllowHeaders::any()
        }
    } else {
        AllowHeaders::list(parse_all::<HeaderName>(&cors.allow_headers, "header"))
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(cors.allow_credentials)
}

fn parse_all<T: std::str::FromStr>(values: &[String], what: &str) -> Vec<T> {
    values
        .iter()
        .filter_map(|value| match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(value = %value, kind = what, "Ignoring invalid CORS entry");
                None
            }
        })
        .collect()
}
