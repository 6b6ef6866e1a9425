//! Gateway HTTP server: the connector webhook plus health and diagnostic endpoints.

use crate::auth::{ChannelRouter, CredentialCache, InboundVerifier};
use crate::config::{BotSettings, Config};
use crate::connector::ConnectorClient;
use crate::error::GatewayError;
use crate::turn::{ActivityHandler, LoggingMiddleware, TurnDispatcher};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Shared state for the gateway: settings plus the verifier, dispatcher and token cache built
/// from them.
#[derive(Clone)]
pub struct GatewayState {
    pub settings: Arc<BotSettings>,
    pub verifier: Arc<InboundVerifier>,
    pub dispatcher: Arc<TurnDispatcher>,
    pub credentials: Arc<CredentialCache>,
}

impl GatewayState {
    /// Wire the components. The verifier and the connector client share one router so a reply
    /// uses the route of the activity that triggered it.
    pub fn new(
        settings: Arc<BotSettings>,
        handler: Arc<dyn ActivityHandler>,
    ) -> Result<Self, GatewayError> {
        let router = ChannelRouter::new(settings.clone());
        let credentials = Arc::new(CredentialCache::new(
            settings.app_id(),
            settings.app_password(),
            settings.token_timeout_ms(),
        )?);
        let connector = ConnectorClient::new(
            credentials.clone(),
            router.clone(),
            settings.delivery_timeout_ms(),
        )?;
        let verifier = InboundVerifier::new(settings.clone(), router)?;
        let mut dispatcher = TurnDispatcher::new(handler, Arc::new(connector))
            .with_middleware(Arc::new(LoggingMiddleware));
        if let Some(notice) = settings.error_notice() {
            dispatcher = dispatcher.with_error_notice(notice);
        }
        Ok(Self {
            settings,
            verifier: Arc::new(verifier),
            dispatcher: Arc::new(dispatcher),
            credentials,
        })
    }
}

/// HTTP routes served by the gateway.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/ping", get(ping))
        .route("/healthz", get(healthz))
        .route("/diag/oauth", get(diag_oauth))
        .route("/api/messages", post(messages).get(messages_get))
        .with_state(state)
}

/// Startup diagnostics. Only the secret's length is printed.
fn log_boot_diagnostics(settings: &BotSettings) {
    log::info!("=== boot diagnostics ===");
    log::info!("app id: {}", settings.app_id());
    log::info!("app type: {}", settings.app_type().as_str());
    log::info!(
        "channel service: {}",
        settings.channel_service().unwrap_or("(global)")
    );
    log::info!("openid metadata: {}", settings.open_id_metadata());
    log::info!(
        "token authority: {} ({})",
        settings.login_url(),
        settings.oauth_scope()
    );
    log::info!("secret length: {}", settings.secret_len());
    log::info!("========================");
}

/// Validate settings, start the HTTP server and block until shutdown (Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config, handler: Arc<dyn ActivityHandler>) -> Result<()> {
    let settings = Arc::new(BotSettings::from_config(&config).context("invalid bot settings")?);
    log_boot_diagnostics(&settings);
    let state = GatewayState::new(settings, handler).context("building gateway state")?;

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("bot up on http://{}/api/messages", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// POST /api/messages: verify, then run the turn to completion before answering 200.
async fn messages(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let verified = match state.verifier.verify(authorization, &body).await {
        Ok(v) => v,
        Err(e) => {
            let status = StatusCode::from_u16(e.inbound_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            log::warn!("inbound activity rejected ({}): {}", status.as_u16(), e);
            let reason = status.canonical_reason().unwrap_or("Error");
            return (status, reason).into_response();
        }
    };
    state.dispatcher.dispatch(verified).await;
    StatusCode::OK.into_response()
}

/// GET /api/messages is not part of the connector protocol.
async fn messages_get() -> (StatusCode, &'static str) {
    (StatusCode::METHOD_NOT_ALLOWED, "Use POST /api/messages")
}

async fn root() -> &'static str {
    "Root reachable"
}

async fn ping() -> &'static str {
    "pong"
}

/// GET /healthz: identity summary for probes; never includes the secret.
async fn healthz(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let s = &state.settings;
    Json(json!({
        "status": "ok",
        "appId": s.app_id(),
        "appType": s.app_type().as_str(),
        "channelService": s.channel_service(),
        "openId": s.open_id_metadata(),
        "secretLen": s.secret_len(),
    }))
}

/// GET /diag/oauth: acquire a token for the global route through the credential cache.
async fn diag_oauth(State(state): State<GatewayState>) -> Response {
    let authority = state.settings.global_authority();
    match state
        .credentials
        .get_token(&authority.login_url, &authority.scope)
        .await
    {
        Ok(token) => {
            let expires_on = state
                .credentials
                .credential(&authority.login_url, &authority.scope)
                .await
                .map(|c| c.expires_at.to_rfc3339());
            let prefix: String = token.chars().take(16).collect();
            Json(json!({
                "ok": true,
                "scope": authority.scope,
                "expiresOn": expires_on,
                "tokenStartsWith": prefix,
            }))
            .into_response()
        }
        Err(e) => {
            log::warn!("diag/oauth: {}", e);
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "ok": false, "error": "oauth_failed", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}
