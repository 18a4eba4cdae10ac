//! HTTP edge that accepts biometric readings from devices.
//!
//! This module provides an HTTP server that:
//! - Accepts a JSON reading via POST /ClientGateway/Biometrics
//! - Publishes it to the readings topic keyed by device id
//! - Answers 202 Accepted with the echoed reading
//!
//! # Architecture
//!
//! ```text
//! Device ──→ POST /ClientGateway/Biometrics ──→ BiometricsImported ──→ zone worker
//! ```

use crate::config::Config;
use crate::core::BiometricReading;
use crate::stream::{OutgoingMessage, StreamProducer};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Topic readings are published to
    pub topic: String,
    /// Time allowed for flushing each publish
    pub flush_timeout: Duration,
}

impl ServerConfig {
    /// Create a new server configuration bound to localhost
    pub fn new(port: u16, topic: impl Into<String>) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            topic: topic.into(),
            flush_timeout: Duration::from_secs(5),
        }
    }

    /// Derive the server configuration from the main configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.http.host.clone(),
            ..Self::new(config.http.port, config.input_topic.clone())
        }
    }
}

/// Shared server state
pub struct ServerState {
    /// Producer for the readings topic
    producer: Arc<dyn StreamProducer>,
    /// Readings topic
    topic: String,
    flush_timeout: Duration,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /ClientGateway/Hello
async fn hello() -> String {
    tracing::info!("Hello World");
    "Hello World".to_string()
}

/// POST /ClientGateway/Biometrics
///
/// Publishes the reading keyed by its device id and echoes it back.
async fn record_measurements(
    State(state): State<Arc<ServerState>>,
    Json(reading): Json<BiometricReading>,
) -> Result<(StatusCode, Json<BiometricReading>), ApiError> {
    tracing::info!("Accepted biometrics from device {}", reading.device_id);

    let outgoing = OutgoingMessage::json(reading.key(), &reading).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid reading: {}", e),
                code: "INVALID_READING".to_string(),
            }),
        )
    })?;

    // Broker clients may block on delivery; keep them off the async workers.
    let producer = state.producer.clone();
    let topic = state.topic.clone();
    let flush_timeout = state.flush_timeout;
    let delivery = tokio::task::spawn_blocking(move || {
        let delivery = producer.produce(&topic, outgoing)?;
        if let Err(e) = producer.flush(flush_timeout) {
            tracing::warn!("Failed to flush {}: {}", topic, e);
        }
        Ok::<_, crate::error::StreamError>(delivery)
    })
    .await
    .map_err(|e| {
        tracing::error!("Publish task failed: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Publish task failed: {}", e),
                code: "INTERNAL_ERROR".to_string(),
            }),
        )
    })?
    .map_err(|e| {
        tracing::error!("Failed to publish reading: {}", e);
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "PUBLISH_ERROR".to_string(),
            }),
        )
    })?;

    tracing::debug!(
        "Reading for {} stored at {}@{}",
        reading.device_id,
        delivery.topic,
        delivery.offset
    );
    Ok((StatusCode::ACCEPTED, Json(reading)))
}

/// Build the router without binding it.
pub fn router(config: &ServerConfig, producer: Arc<dyn StreamProducer>) -> Router {
    let state = Arc::new(ServerState {
        producer,
        topic: config.topic.clone(),
        flush_timeout: config.flush_timeout,
    });

    Router::new()
        .route("/health", get(health))
        .route("/ClientGateway/Hello", get(hello))
        .route("/ClientGateway/Biometrics", post(record_measurements))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    producer: Arc<dyn StreamProducer>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(&config, producer);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Client gateway listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
