//! Query API server
//!
//! Wires the shared application state into the axum router and serves it
//! with optional CORS and request tracing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use chrono::Duration;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::routes::create_router;
use crate::config::ApiConfig;
use crate::scheduler::Orchestrator;
use crate::storage::{ChannelStore, ScheduleEventStore};

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Channel definitions
    pub channels: Arc<dyn ChannelStore>,

    /// Schedule events
    pub events: Arc<dyn ScheduleEventStore>,

    /// Running scheduler, for status and operator resets
    pub orchestrator: Arc<Orchestrator>,

    /// Horizon used for upcoming-schedule queries
    pub default_horizon: Duration,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        channels: Arc<dyn ChannelStore>,
        events: Arc<dyn ScheduleEventStore>,
        orchestrator: Arc<Orchestrator>,
        default_horizon: Duration,
    ) -> Self {
        Self {
            channels,
            events,
            orchestrator,
            default_horizon,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// API Server
// ============================================================================

/// HTTP server for schedule queries and scheduler administration
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router with all routes and configured layers
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.config.bind_address
    }

    /// Serve until `shutdown_signal` resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        tracing::info!(address = %addr, "Query API listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Query API shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("Failed to bind: {0}")]
    Bind(String),

    /// Server error
    #[error("Server error: {0}")]
    Serve(String),
}
