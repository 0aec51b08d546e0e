//! HTTP surface.
//!
//! `GET /` answers with the greeting; every other method and path goes to
//! the [`Dispatcher`]. Responses are always status 200: JSON for resolved
//! templates and error envelopes, plain text for non-JSON proxy bodies.

use crate::config::{GlobalSettings, MockServerConfig};
use crate::context::RequestParts;
use crate::dispatcher::{Dispatcher, MockResponse};
use crate::routes::RouteRegistry;
use anyhow::Context as _;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub greeting: Arc<str>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, settings: &GlobalSettings) -> Self {
        Self {
            dispatcher,
            greeting: Arc::from(settings.greeting.as_str()),
            max_body_bytes: settings.max_body_bytes,
        }
    }
}

/// Build the router with CORS and request tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(greet).fallback(handle_mock))
        .route("/{*path}", any(handle_mock))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until Ctrl+C.
///
/// Routes are reloaded on SIGHUP, and on file changes when watching is on.
pub async fn serve(config: &MockServerConfig, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Dropping the watcher stops it, so it lives until the server stops.
    let _watcher = if config.settings.watch {
        Some(watch_routes(dispatcher.routes().clone()).context("failed to start route watcher")?)
    } else {
        None
    };
    #[cfg(unix)]
    reload_on_hangup(dispatcher.routes().clone()).context("failed to install SIGHUP handler")?;

    let app = build_router(AppState::new(dispatcher, &config.settings))
        .into_make_service_with_connect_info::<SocketAddr>();

    info!(address = %listener.local_addr()?, "Mock server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Mock server stopped");
    Ok(())
}

async fn greet(State(state): State<AppState>) -> String {
    state.greeting.to_string()
}

async fn handle_mock(State(state): State<AppState>, request: Request<Body>) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %parts.uri.path(), error = %e, "Failed to read request body");
            return Json(json!({ "error": format!("failed to read request body: {e}") }))
                .into_response();
        }
    };

    let request = RequestParts {
        method: parts.method.to_string(),
        uri: parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string()),
        headers: flatten_headers(&parts.headers),
        body: body.to_vec(),
        remote_addr,
    };

    match state.dispatcher.dispatch(&request).await {
        MockResponse::Json(value) => Json(value).into_response(),
        MockResponse::Text(text) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
    }
}

/// Collapse repeated headers into one value per lower-case name.
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flat: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let separator = if name == header::COOKIE { "; " } else { ", " };
        flat.entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push_str(separator);
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

/// Rebuild the route table whenever the resources tree changes.
pub fn watch_routes(routes: Arc<RouteRegistry>) -> notify::Result<RecommendedWatcher> {
    let root = routes.root().to_path_buf();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() => {
                if let Err(e) = routes.reload() {
                    error!(error = %e, "Failed to reload routes, keeping current table");
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = ?e, "Watch error"),
        },
        Config::default().with_poll_interval(Duration::from_secs(2)),
    )?;

    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(path = %root.display(), "Route watcher started");
    Ok(watcher)
}

#[cfg(unix)]
fn reload_on_hangup(routes: Arc<RouteRegistry>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading routes");
            if let Err(e) = routes.reload() {
                error!(error = %e, "Failed to reload routes, keeping current table");
            }
        }
    });
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
