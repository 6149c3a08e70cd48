use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::conversation::CaptureOutcome;
use crate::intake::Intake;
use crate::types::ChatId;

#[derive(Clone)]
pub struct AppState {
    intake: Arc<Intake>,
}

#[derive(Debug, Deserialize)]
pub struct TrackQuery {
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
}

pub fn router(intake: Arc<Intake>) -> Router {
    Router::new()
        .route("/track", get(track))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(AppState { intake })
}

pub async fn spawn_server(bind: &str, intake: Arc<Intake>, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "capture endpoint listening");
    axum::serve(
        listener,
        router(intake).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;
    Ok(())
}

/// Caller address: first `X-Forwarded-For` entry, else the peer address.
pub fn caller_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    match forwarded {
        Some(addr) => Some(addr.to_string()),
        None => peer.map(|p| p.ip().to_canonical().to_string()),
    }
}

async fn track(
    State(app): State<AppState>,
    Query(query): Query<TrackQuery>,
    request: Request,
) -> impl IntoResponse {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let Some(raw) = caller_address(request.headers(), peer) else {
        error!(chat = query.chat_id, "no caller address available");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string());
    };
    let ip: IpAddr = match raw.parse() {
        Ok(ip) => ip,
        Err(_) => {
            warn!(chat = query.chat_id, address = %raw, "rejected malformed caller address");
            return (StatusCode::BAD_REQUEST, "Malformed client address".to_string());
        }
    };
    let ip = ip.to_string();
    info!(chat = query.chat_id, address = %ip, "address captured");

    match app.intake.capture(query.chat_id, &ip) {
        CaptureOutcome::Started(_) => (
            StatusCode::OK,
            format!("Thanks, address {ip} captured. You can close this page."),
        ),
        CaptureOutcome::Busy => (
            StatusCode::CONFLICT,
            "A scan is already running for this chat.".to_string(),
        ),
        CaptureOutcome::NotRequested => (
            StatusCode::CONFLICT,
            "No address capture was requested for this chat.".to_string(),
        ),
    }
}
