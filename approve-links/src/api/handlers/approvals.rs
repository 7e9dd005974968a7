//! HTTP handlers for approving and rejecting a signed link.

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::links::{DispatchResponse, SignedLink},
    approval::{error::DispatchError, types::Direction},
    auth::MaybeUser,
    errors::{Error, ErrorBody, Result},
    throttle::{ClientAddress, ThrottleAction},
};

/// Approve a signed link.
#[utoipa::path(
    post,
    path = "/api/v1/approve",
    tag = "approvals",
    summary = "Approve",
    description = "Verify the link signature and request the approve callback with GET.",
    request_body = SignedLink,
    responses(
        (status = 200, description = "Callback answered", body = DispatchResponse),
        (status = 400, description = "Wrong user, invalid callback URI or callback failure", body = ErrorBody),
        (status = 401, description = "Invalid signature", body = ErrorBody),
        (status = 429, description = "Too many failed attempts", body = ErrorBody),
    ),
    security(
        (),
        ("X-Approve-User" = [])
    )
)]
#[instrument(skip_all)]
pub async fn approve(
    State(state): State<AppState>,
    client: ClientAddress,
    user: MaybeUser,
    payload: std::result::Result<Json<SignedLink>, JsonRejection>,
) -> Result<Json<DispatchResponse>> {
    resolve(&state, Direction::Approve, &client, &user, payload).await
}

/// Reject a signed link.
#[utoipa::path(
    post,
    path = "/api/v1/reject",
    tag = "approvals",
    summary = "Reject",
    description = "Verify the link signature and request the reject callback with GET.",
    request_body = SignedLink,
    responses(
        (status = 200, description = "Callback answered", body = DispatchResponse),
        (status = 400, description = "Wrong user, invalid callback URI or callback failure", body = ErrorBody),
        (status = 401, description = "Invalid signature", body = ErrorBody),
        (status = 429, description = "Too many failed attempts", body = ErrorBody),
    ),
    security(
        (),
        ("X-Approve-User" = [])
    )
)]
#[instrument(skip_all)]
pub async fn reject(
    State(state): State<AppState>,
    client: ClientAddress,
    user: MaybeUser,
    payload: std::result::Result<Json<SignedLink>, JsonRejection>,
) -> Result<Json<DispatchResponse>> {
    resolve(&state, Direction::Reject, &client, &user, payload).await
}

async fn resolve(
    state: &AppState,
    direction: Direction,
    client: &ClientAddress,
    user: &MaybeUser,
    payload: std::result::Result<Json<SignedLink>, JsonRejection>,
) -> Result<Json<DispatchResponse>> {
    let action = ThrottleAction::for_direction(direction);
    state.throttle.acquire(action, client.as_str()).await?;

    let result = match payload {
        Ok(Json(link)) => {
            let (request, signature) = link.into_parts();
            state
                .dispatcher
                .resolve(direction, &request, &signature, user.id())
                .await
                .map_err(Error::from)
        }
        Err(e) => Err(Error::BadRequest { message: e.body_text() }),
    };

    // Only a forged signature keeps its attempt counted
    if !matches!(result, Err(Error::Dispatch(DispatchError::InvalidSignature))) {
        state.throttle.release(action, client.as_str()).await;
    }

    result.map(|outcome| Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::signing::Signer;
    use crate::test_utils::{TEST_SECRET, create_test_app, create_test_app_with_config, create_test_config};
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn signed_body(approve: &str, reject: &str, description: &str, user_id: Option<&str>) -> Value {
        let signature = Signer::new(TEST_SECRET).unwrap().sign(approve, reject, description, user_id);
        let mut body = json!({
            "approveCallbackUri": approve,
            "rejectCallbackUri": reject,
            "description": description,
            "signature": signature.as_str(),
        });
        if let Some(user_id) = user_id {
            body["userId"] = json!(user_id);
        }
        body
    }

    #[test_log::test(tokio::test)]
    async fn test_approve_calls_approve_callback() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/approve"))
            .and(header("User-Agent", "approve-links callback dispatcher"))
            .respond_with(ResponseTemplate::new(200).set_body_string("approved"))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reject"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let server = crate::test_utils::create_test_app_with_http(create_test_config());
        let body = signed_body(
            &format!("{}/approve", mock_server.uri()),
            &format!("{}/reject", mock_server.uri()),
            "description",
            None,
        );

        let response = server.post("/api/v1/approve").json(&body).await;

        response.assert_status_ok();
        response.assert_json(&json!({ "result": { "body": "approved" } }));
    }

    #[test_log::test(tokio::test)]
    async fn test_reject_calls_reject_callback() {
        let (server, client) = create_test_app();
        client.push_response(200, "rejected");
        let body = signed_body("http://localhost/approve", "http://localhost/reject", "description", None);

        let response = server.post("/api/v1/reject").json(&body).await;

        response.assert_status_ok();
        let result: DispatchResponse = response.json();
        assert_eq!(result.result.body, "rejected");
        assert_eq!(client.calls()[0].url.as_str(), "http://localhost/reject");
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_signature_is_rejected_without_dispatch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let server = crate::test_utils::create_test_app_with_http(create_test_config());
        let mut body = signed_body(
            &format!("{}/approve", mock_server.uri()),
            &format!("{}/reject", mock_server.uri()),
            "description",
            None,
        );
        body["description"] = json!("a different description");

        let response = server.post("/api/v1/approve").json(&body).await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let error: Value = response.json();
        assert_eq!(error["error"], "signature");
    }

    #[test_log::test(tokio::test)]
    async fn test_wrong_user_is_rejected_without_dispatch() {
        let mut config = create_test_config();
        config.auth.proxy_header.enabled = true;
        let (server, client) = create_test_app_with_config(config);
        let body = signed_body("http://localhost/approve", "http://localhost/reject", "description", Some("alice"));

        let response = server.post("/api/v1/approve").add_header("x-approve-user", "bob").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let error: Value = response.json();
        assert_eq!(error["error"], "unauthorized_user");

        let response = server.post("/api/v1/approve").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);

        assert_eq!(client.call_count(), 0);

        let response = server.post("/api/v1/approve").add_header("x-approve-user", "alice").json(&body).await;
        response.assert_status_ok();
        assert_eq!(client.call_count(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_upstream_error_reports_status_and_body() {
        let (server, client) = create_test_app();
        client.push_response(500, "database down");
        let body = signed_body("http://localhost/approve", "http://localhost/reject", "description", None);

        let response = server.post("/api/v1/approve").json(&body).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let error: Value = response.json();
        assert_eq!(error["error"], "upstream");
        assert_eq!(error["message"], "Callback returned HTTP 500: database down");
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_callback_uri() {
        let (server, client) = create_test_app();
        let body = signed_body("javascript:alert(1)", "http://localhost/reject", "description", None);

        let response = server.post("/api/v1/approve").json(&body).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let error: Value = response.json();
        assert_eq!(error["error"], "invalid_callback_uri");
        assert_eq!(client.call_count(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_repeated_signature_failures_are_throttled() {
        let mut config = create_test_config();
        config.throttle.max_attempts = 2;
        config.throttle.client_ip_header = Some("x-forwarded-for".to_string());
        let (server, client) = create_test_app_with_config(config);

        let mut forged = signed_body("http://localhost/approve", "http://localhost/reject", "description", None);
        forged["signature"] = json!("0".repeat(64));
        let valid = signed_body("http://localhost/approve", "http://localhost/reject", "description", None);

        for _ in 0..2 {
            let response = server.post("/api/v1/approve").add_header("x-forwarded-for", "203.0.113.7").json(&forged).await;
            response.assert_status(StatusCode::UNAUTHORIZED);
        }

        // Even a valid link is refused once the client is throttled
        let response = server.post("/api/v1/approve").add_header("x-forwarded-for", "203.0.113.7").json(&valid).await;
        response.assert_status(StatusCode::TOO_MANY_REQUESTS);
        let error: Value = response.json();
        assert_eq!(error["error"], "too_many_requests");

        // Other actions and other clients are unaffected
        let response = server.post("/api/v1/reject").add_header("x-forwarded-for", "203.0.113.7").json(&valid).await;
        response.assert_status_ok();
        let response = server.post("/api/v1/approve").add_header("x-forwarded-for", "198.51.100.1").json(&valid).await;
        response.assert_status_ok();

        assert_eq!(client.call_count(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_forwarded_header_ignored_without_trusted_proxy() {
        let mut config = create_test_config();
        config.throttle.max_attempts = 2;
        let (server, client) = create_test_app_with_config(config);

        let mut forged = signed_body("http://localhost/approve", "http://localhost/reject", "description", None);
        forged["signature"] = json!("0".repeat(64));

        let mut statuses = Vec::new();
        for i in 0..10 {
            let response = server
                .post("/api/v1/approve")
                .add_header("x-forwarded-for", format!("10.0.0.{i}"))
                .json(&forged)
                .await;
            statuses.push(response.status_code());
        }

        assert_eq!(&statuses[..2], &[StatusCode::UNAUTHORIZED, StatusCode::UNAUTHORIZED]);
        assert!(statuses[2..].iter().all(|status| *status == StatusCode::TOO_MANY_REQUESTS));
        assert_eq!(client.call_count(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_successful_and_rejected_calls_are_not_throttled() {
        let mut config = create_test_config();
        config.throttle.max_attempts = 1;
        config.auth.proxy_header.enabled = true;
        let (server, client) = create_test_app_with_config(config);
        let bound = signed_body("http://localhost/approve", "http://localhost/reject", "description", Some("alice"));

        for _ in 0..3 {
            client.push_response(500, "busy");
            server.post("/api/v1/approve").add_header("x-approve-user", "alice").json(&bound).await.assert_status(StatusCode::BAD_REQUEST);
            server.post("/api/v1/approve").add_header("x-approve-user", "bob").json(&bound).await.assert_status(StatusCode::BAD_REQUEST);
        }

        server.post("/api/v1/approve").add_header("x-approve-user", "alice").json(&bound).await.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_malformed_body() {
        let (server, client) = create_test_app();

        let response = server
            .post("/api/v1/reject")
            .json(&json!({ "approveCallbackUri": "http://localhost/approve" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(client.call_count(), 0);
    }
}
