//! # approve-links: signed approval links
//!
//! `approve-links` turns an approval decision into a link. A caller with admin credentials posts two
//! callback URIs and a description; the service signs them with its secret and returns a link to
//! an approval page. Whoever opens the link sees the description and can approve or reject, which
//! sends a GET to the matching callback URI and relays the callback's answer.
//!
//! ## Architecture
//!
//! The service is built on [Axum](https://github.com/tokio-rs/axum) and keeps no database. Every
//! fact about a pending approval travels inside the signed link.
//!
//! - **Approval** ([`approval`]): HMAC signing, link generation and callback dispatch
//! - **API** ([`api`]): JSON endpoints under `/api/v1` and the HTML page at `/link`
//! - **Auth** ([`auth`]): identity from a trusted proxy header or an admin API key
//! - **Throttle** ([`throttle`]): per-client limit on failed signature checks
//!
//! ## Usage
//!
//! ```no_run
//! use approve_links::{Application, Config};
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = approve_links::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     approve_links::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod approval;
pub mod auth;
pub mod config;
pub mod errors;
mod openapi;
pub mod telemetry;
pub mod throttle;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, http,
    http::HeaderValue,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    approval::{CallbackClient, Dispatcher, ReqwestCallbackClient},
    config::CorsOrigin,
    openapi::ApiDoc,
    throttle::Throttle,
};

pub use config::Config;

/// Shared state passed to every handler.
///
/// - `config`: Application configuration loaded from environment/files
/// - `dispatcher`: Signs links and sends callbacks
/// - `throttle`: Failed-attempt counters, shared across clones
/// - `templates`: The approval and error page templates
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub dispatcher: Arc<Dispatcher>,
    pub throttle: Throttle,
    pub templates: Arc<minijinja::Environment<'static>>,
}

impl AppState {
    /// Wire up state from configuration and an outbound client.
    pub fn from_config(config: Config, client: Arc<dyn CallbackClient>, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let dispatcher = Dispatcher::from_config(&config, client, shutdown)?;
        let templates = api::handlers::page::templates()?;

        Ok(Self::builder()
            .throttle(Throttle::new(&config.throttle))
            .dispatcher(Arc::new(dispatcher))
            .templates(Arc::new(templates))
            .config(config)
            .build())
    }
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            // Origins never carry a trailing slash, Url always adds one
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(config.auth.cors.allow_credentials);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - `GET /healthz`
/// - `GET /link` (or `links.path`): the approval page
/// - `POST /api/v1/link`, `POST /api/v1/approve`, `POST /api/v1/reject`
/// - `GET /api/docs`: API reference
/// - `GET /internal/metrics` when `enable_metrics` is set
///
/// The API and docs live under the path of `public_url`, so a `public_url` of
/// `https://example.com/apps/approve/` serves `/apps/approve/api/v1/approve`.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/link", post(api::handlers::links::generate_link))
        .route("/approve", post(api::handlers::approvals::approve))
        .route("/reject", post(api::handlers::approvals::reject))
        .with_state(state.clone());

    let page_path = state.dispatcher.link_path();
    let base_path = state.config.base_path();

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route(&page_path, get(api::handlers::page::view_link))
        .with_state(state.clone())
        .nest(&state.config.api_base_path(), api_routes)
        .merge(Scalar::with_url(format!("{base_path}/api/docs"), ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The HTTP server together with the state it serves.
pub struct Application {
    router: Router,
    config: Config,
    /// Cancels in-flight callbacks once the server stops accepting requests
    shutdown: CancellationToken,
}

impl Application {
    /// Create an application that sends callbacks with reqwest.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = ReqwestCallbackClient::new()?;
        Self::new_with_client(config, Arc::new(client))
    }

    /// Create an application with a custom outbound client.
    pub fn new_with_client(config: Config, client: Arc<dyn CallbackClient>) -> anyhow::Result<Self> {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let state = AppState::from_config(config.clone(), client, shutdown.clone())?;
        let router = build_router(&state)?;

        Ok(Self { router, config, shutdown })
    }

    /// Convert application into a test server (for tests)
    #[cfg(any(test, feature = "test-utils"))]
    pub fn into_test_server(self) -> axum_test::TestServer {
        // The mock transport has no socket, so every test request comes from one peer
        let router = self
            .router
            .layer(axum::extract::connect_info::MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
        axum_test::TestServer::new(router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("approve-links listening on http://{}, links point at {}", bind_addr, self.config.public_url);

        let token = self.shutdown.clone();
        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutdown requested, cancelling in-flight callbacks...");
                token.cancel();
            })
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{create_test_app, create_test_app_with_config, create_test_config};
    use axum::http::StatusCode;

    #[test_log::test(tokio::test)]
    async fn test_healthz() {
        let (server, _client) = create_test_app();

        let response = server.get("/healthz").await;

        response.assert_status_ok();
        response.assert_text("OK");
    }

    #[test_log::test(tokio::test)]
    async fn test_api_docs_are_served() {
        let (server, _client) = create_test_app();

        let response = server.get("/api/docs").await;

        response.assert_status_ok();
        assert!(response.text().contains("approve-links"));
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_route() {
        let (server, _client) = create_test_app();

        server.get("/api/v1/approve").await.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        server.get("/nope").await.assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_custom_page_path() {
        let mut config = create_test_config();
        config.links.path = "/approvals/open".to_string();
        let (server, _client) = create_test_app_with_config(config);

        server.get("/link").await.assert_status_not_found();
        // Reaches the handler, which rejects the missing parameters
        server.get("/approvals/open").await.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn test_public_url_prefix() {
        let mut config = create_test_config();
        config.public_url = "http://localhost:3001/apps/approve/".to_string();
        config.links.path = "link".to_string();
        let (server, _client) = create_test_app_with_config(config);

        server.get("/apps/approve/link").await.assert_status(StatusCode::BAD_REQUEST);
        server.post("/apps/approve/api/v1/approve").json(&serde_json::json!({})).await.assert_status(StatusCode::BAD_REQUEST);
        server.get("/apps/approve/api/docs").await.assert_status_ok();
        server.post("/api/v1/approve").json(&serde_json::json!({})).await.assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_metrics_endpoint_when_enabled() {
        let mut config = create_test_config();
        config.enable_metrics = true;
        let (server, _client) = create_test_app_with_config(config);

        server.get("/healthz").await.assert_status_ok();
        let response = server.get("/internal/metrics").await;

        response.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_cors_preflight() {
        let mut config = create_test_config();
        config.auth.cors.allowed_origins = vec![CorsOrigin::Url("https://app.example.com".parse().unwrap())];
        let (server, _client) = create_test_app_with_config(config);

        let response = server
            .method(http::Method::OPTIONS, "/api/v1/approve")
            .add_header("origin", "https://app.example.com")
            .add_header("access-control-request-method", "POST")
            .await;

        assert_eq!(response.header("access-control-allow-origin"), "https://app.example.com");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = create_test_config();
        config.secret_key = None;

        assert!(Application::new(config).is_err());
    }
}
