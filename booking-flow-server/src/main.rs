mod app;
mod config;

use axum::{
    http::{HeaderName, HeaderValue, Request},
    middleware::{Next, from_fn},
};
use booking_flow::{HttpVerificationEndpoint, PaymentPoller};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::ServerConfig;

static CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Structured logging; `LOG_FORMAT=pretty` for local runs.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "booking_flow_server=info,booking_flow=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "pretty" {
        registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_level(true),
            )
            .init();
    }
}

/// Tags each request with a correlation id. A well-formed id sent by the
/// caller (the booking frontend forwards its own) is kept; otherwise a fresh
/// one is minted. The id is echoed on the response.
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = request
        .headers()
        .get(&CORRELATION_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .unwrap_or_else(Uuid::new_v4)
        .to_string();

    let header = HeaderValue::from_str(&correlation_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert(CORRELATION_ID.clone(), value.clone());
    }

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;
    if let Some(value) = header {
        response.headers_mut().insert(CORRELATION_ID.clone(), value);
    }
    response
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    // Booking data stays per session and in memory; nothing is written to disk.
    let endpoint = Arc::new(HttpVerificationEndpoint::new(&config.verify_base_url)?);
    let poller = PaymentPoller::new(endpoint, config.poller);
    let state = AppState::new(poller, config.retention);
    let sweeper = state.spawn_sweeper();

    let app = app::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id_middleware));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(
        addr = %config.bind_addr,
        session_idle_secs = config.retention.session_idle.as_secs(),
        "Booking flow server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Stop polling the gateway for pages nobody will read.
    sweeper.abort();
    state.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, routing::get};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/health", get(|| async { "OK" }))
            .layer(from_fn(correlation_id_middleware))
    }

    #[tokio::test]
    async fn caller_correlation_id_is_kept() {
        let id = Uuid::new_v4().to_string();
        let request = Request::builder()
            .uri("/health")
            .header("x-correlation-id", &id)
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-correlation-id"], id.as_str());
    }

    #[tokio::test]
    async fn malformed_correlation_id_is_replaced() {
        let request = Request::builder()
            .uri("/health")
            .header("x-correlation-id", "not an id")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let echoed = response.headers()["x-correlation-id"].to_str().unwrap();
        assert!(Uuid::parse_str(echoed).is_ok());
    }
}
