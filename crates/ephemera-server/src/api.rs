use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Query, State},
    http::{Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use ephemera_shared::protocol::{
    FetchParams, FetchResponse, InitRequest, InitResponse, SendRequest, SendResponse,
};
use ephemera_shared::{ChannelClass, ChannelId};
use ephemera_store::ChannelStore;

use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::rate_limit::{rate_limit_middleware, ClientOrigin, Limiters};
use crate::redact::IdentityRedactor;
use crate::relay::{FetchInput, RelayService, RelaySettings, SendInput};

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
    pub limiters: Limiters,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the store, relay, and limiters described by `config`.
    pub fn from_config(config: ServerConfig) -> Self {
        let store = ChannelStore::new(config.channel_capacity, config.fetch_limit_ceiling);
        let relay = RelayService::new(
            store,
            RelaySettings {
                max_body_chars: config.max_message_length,
                sanitize_html: config.sanitize_html,
                default_class: config.default_channel_class,
                default_fetch_limit: config.default_fetch_limit,
            },
        );
        let limiters = Limiters::new(
            IdentityRedactor::new(&config.rate_limit_salt),
            config.general_budget,
            config.session_budget,
            config.send_budget,
        );

        Self {
            relay: Arc::new(relay),
            limiters,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AnyOrigin);

    let chat = Router::new()
        .route("/init", post(chat_init))
        .route("/send", post(chat_send))
        .route("/messages", get(chat_messages))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/chat", chat)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn chat_init(
    State(state): State<AppState>,
    Extension(origin): Extension<ClientOrigin>,
    body: Result<Json<InitRequest>, JsonRejection>,
) -> Result<Json<InitResponse>, RelayError> {
    let Json(req) = body.map_err(|_| RelayError::Validation("Invalid request body".into()))?;

    state
        .limiters
        .session
        .admit(req.user_id.as_deref(), origin.as_str())
        .await?;

    let ack = state
        .relay
        .init_session(req.user_id.as_deref(), req.username.as_deref())?;

    Ok(Json(InitResponse {
        success: true,
        message: "Session initialized".to_string(),
        user_id: ack.user_id,
    }))
}

async fn chat_send(
    State(state): State<AppState>,
    Extension(origin): Extension<ClientOrigin>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, RelayError> {
    let Json(req) = body.map_err(|_| RelayError::Validation("Invalid request body".into()))?;

    state
        .limiters
        .send
        .admit(req.user_id.as_deref(), origin.as_str())
        .await?;

    let channel_class = req
        .channel_class
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(str::parse::<ChannelClass>)
        .transpose()?;

    let message = state
        .relay
        .send(SendInput {
            sender_id: req.user_id,
            username: req.username,
            display_name: req.display_name,
            body: req.message,
            channel_class,
            channel_id: req.channel_id,
        })
        .await?;

    Ok(Json(SendResponse {
        success: true,
        message: "Message sent".to_string(),
        message_data: message,
    }))
}

async fn chat_messages(
    State(state): State<AppState>,
    params: Result<Query<FetchParams>, axum::extract::rejection::QueryRejection>,
) -> Result<Json<FetchResponse>, RelayError> {
    let Query(params) =
        params.map_err(|_| RelayError::Validation("Invalid channel request".into()))?;

    let channel_class = params
        .channel_class
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(str::parse::<ChannelClass>)
        .transpose()
        .map_err(|_| RelayError::Validation("Invalid channel request".into()))?;

    let messages = state
        .relay
        .fetch(FetchInput {
            channel_class,
            channel_id: params.channel_id.as_deref().and_then(ChannelId::parse),
            after: params.after.as_deref().map(parse_after),
            limit: params.limit.as_deref().and_then(parse_limit),
        })
        .await?;

    Ok(Json(FetchResponse {
        success: true,
        count: messages.len(),
        messages,
    }))
}

/// Leading-integer parse; anything unparsable reads as the epoch.
fn parse_after(raw: &str) -> i64 {
    leading_integer(raw).unwrap_or(0)
}

/// Leading-integer parse; unparsable or negative limits fall back to the
/// default.
fn parse_limit(raw: &str) -> Option<usize> {
    leading_integer(raw).and_then(|n| usize::try_from(n).ok())
}

fn leading_integer(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let end = raw
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    raw[..end].parse().ok()
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    RelayError::Internal("handler panicked".to_string()).into_response()
}

pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
