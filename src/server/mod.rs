//! Reference HTTP wiring for the session engine.
//!
//! Not required to use the library; it shows how a service maps session
//! states to responses and serves as the demo binary.

use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::manager::SessionManager;
use crate::store::SessionStore;

pub mod handlers;

pub const DEFAULT_COOKIE_NAME: &str = "sessionguard";

/// Shared by all handlers.
pub struct AppState {
    pub manager: SessionManager<Arc<dyn SessionStore>>,
    pub cookie_name: String,
}

impl AppState {
    #[must_use]
    pub fn new(manager: SessionManager<Arc<dyn SessionStore>>, cookie_name: String) -> Self {
        Self {
            manager,
            cookie_name,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/v1/session",
            get(handlers::session)
                .post(handlers::login)
                .delete(handlers::logout),
        )
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve until Ctrl-C.
///
/// # Errors
/// Returns an error if the port cannot be bound or the server fails.
pub async fn new(port: u16, state: Arc<AppState>) -> Result<()> {
    let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("listening on {addr}");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
