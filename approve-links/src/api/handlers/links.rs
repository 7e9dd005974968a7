//! HTTP handler for link generation.

use axum::{
    extract::{State, rejection::JsonRejection},
    http::header,
    response::{IntoResponse, Json},
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::links::{LinkCreate, LinkResponse},
    approval::types::ApprovalRequest,
    auth::Admin,
    errors::{Error, ErrorBody, Result},
};

/// Generated links never change for the same input, so clients may keep them for a day.
pub const LINK_CACHE_CONTROL: &str = "private, max-age=86400, immutable";

/// Generate a signed approval link.
#[utoipa::path(
    post,
    path = "/api/v1/link",
    tag = "links",
    summary = "Generate link",
    description = "Sign the callback URIs and description and return a link to the approval page. \
        Nothing is sent to the callbacks until someone approves or rejects.",
    request_body = LinkCreate,
    responses(
        (status = 200, description = "Signed link", body = LinkResponse),
        (status = 400, description = "The link would be too long", body = ErrorBody),
        (status = 401, description = "No admin credentials", body = ErrorBody),
        (status = 403, description = "Caller is not an admin", body = ErrorBody),
    ),
    security(
        ("BearerAuth" = []),
        ("X-Approve-User" = [])
    )
)]
#[instrument(skip_all)]
pub async fn generate_link(
    State(state): State<AppState>,
    admin: Admin,
    payload: std::result::Result<Json<LinkCreate>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(create) = payload.map_err(|e| Error::BadRequest { message: e.body_text() })?;
    let request = ApprovalRequest::from(create);

    let link = state.dispatcher.generate_link(&request)?;
    tracing::info!(admin = ?admin, bound_user = request.authorized_user_id.is_some(), "Generated approval link");

    Ok((
        [(header::CACHE_CONTROL, LINK_CACHE_CONTROL)],
        Json(LinkResponse { link: link.to_string() }),
    ))
}
