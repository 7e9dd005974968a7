//! Test utilities for integration testing (available with `test-utils` feature).

use std::sync::Arc;

use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use crate::{
    AppState, Application,
    approval::{ReqwestCallbackClient, http::MockCallbackClient},
    config::Config,
};

pub const TEST_SECRET: &str = "test-secret-key-for-testing-only";

pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_url: "http://localhost:3001".to_string(),
        secret_key: Some(TEST_SECRET.to_string()),
        enable_metrics: false,
        enable_otel_export: false,
        ..Default::default()
    }
}

/// State backed by a mock callback client. The returned mock shares its queue with the state.
pub fn create_test_state(config: Config) -> (AppState, MockCallbackClient) {
    let client = MockCallbackClient::new();
    let state = AppState::from_config(config, Arc::new(client.clone()), CancellationToken::new())
        .expect("Failed to create test state");
    (state, client)
}

pub fn create_test_app() -> (TestServer, MockCallbackClient) {
    create_test_app_with_config(create_test_config())
}

pub fn create_test_app_with_config(config: Config) -> (TestServer, MockCallbackClient) {
    let client = MockCallbackClient::new();
    let app = Application::new_with_client(config, Arc::new(client.clone())).expect("Failed to create application");
    (app.into_test_server(), client)
}

/// Test server whose callbacks go over real HTTP, for use with wiremock.
pub fn create_test_app_with_http(config: Config) -> TestServer {
    let client = ReqwestCallbackClient::new().expect("Failed to create HTTP client");
    let app = Application::new_with_client(config, Arc::new(client)).expect("Failed to create application");
    app.into_test_server()
}
