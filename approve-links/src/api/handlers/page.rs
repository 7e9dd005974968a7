//! The approval page a generated link points to.
//!
//! The page shows the description and two buttons that post the link parameters to
//! `<api base>/approve` or `<api base>/reject`, where the API base follows `public_url`. The signature is checked before rendering so a forged
//! link never shows a page that looks legitimate.

use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use minijinja::context;
use tracing::instrument;

use crate::{
    AppState,
    api::models::links::SignedLink,
    approval::error::DispatchError,
    auth::MaybeUser,
    errors::Error,
    throttle::{ClientAddress, ThrottleAction},
};

pub const PAGE_TEMPLATE: &str = "page.html";
pub const ERROR_TEMPLATE: &str = "error.html";

/// Load the page templates into a template environment.
pub fn templates() -> Result<minijinja::Environment<'static>, minijinja::Error> {
    let mut env = minijinja::Environment::new();
    env.add_template(PAGE_TEMPLATE, include_str!("../../../templates/page.html"))?;
    env.add_template(ERROR_TEMPLATE, include_str!("../../../templates/error.html"))?;
    Ok(env)
}

/// Render the approval page for a signed link.
#[utoipa::path(
    get,
    path = "/link",
    tag = "page",
    summary = "Approval page",
    description = "HTML page with approve and reject buttons. Responds with an HTML error page when the \
        signature is invalid or the link is bound to another user.",
    params(SignedLink),
    responses(
        (status = 200, description = "Approval page", content_type = "text/html"),
        (status = 400, description = "Missing link parameters", content_type = "text/html"),
        (status = 401, description = "Invalid signature or wrong user", content_type = "text/html"),
        (status = 429, description = "Too many failed attempts", content_type = "text/html"),
    )
)]
#[instrument(skip_all)]
pub async fn view_link(
    State(state): State<AppState>,
    client: ClientAddress,
    user: MaybeUser,
    query: std::result::Result<Query<SignedLink>, QueryRejection>,
) -> Response {
    let action = ThrottleAction::ApprovePage;
    if let Err(e) = state.throttle.acquire(action, client.as_str()).await {
        return render_error(&state, &e);
    }

    let Query(link) = match query {
        Ok(query) => query,
        Err(e) => {
            state.throttle.release(action, client.as_str()).await;
            return render_error(&state, &Error::BadRequest { message: e.body_text() });
        }
    };

    let (request, signature) = link.into_parts();
    if let Err(e) = state.dispatcher.authorize(&request, &signature, user.id()) {
        return render_error(&state, &Error::Dispatch(e));
    }
    state.throttle.release(action, client.as_str()).await;

    let ctx = context! {
        description => request.description,
        approve_callback_uri => request.approve_callback_uri,
        reject_callback_uri => request.reject_callback_uri,
        signature => signature,
        user_id => request.authorized_user_id,
        current_user => user.id(),
        // A parsed URL path, already percent-encoded
        api_base => minijinja::Value::from_safe_string(state.config.api_base_path()),
    };
    render(&state, PAGE_TEMPLATE, StatusCode::OK, ctx)
}

/// Every authorization failure on the page is a 401, unlike the JSON API.
fn page_status(error: &Error) -> StatusCode {
    match error {
        Error::Dispatch(DispatchError::InvalidSignature | DispatchError::UnauthorizedUser) => StatusCode::UNAUTHORIZED,
        other => other.status_code(),
    }
}

fn render_error(state: &AppState, error: &Error) -> Response {
    tracing::info!(error = %error, "Refusing to show approval page");
    let status = page_status(error);
    let ctx = context! {
        status => status.as_u16(),
        title => status.canonical_reason().unwrap_or("Error"),
        message => error.user_message(),
    };
    render(state, ERROR_TEMPLATE, status, ctx)
}

fn render(state: &AppState, name: &str, status: StatusCode, ctx: minijinja::Value) -> Response {
    let rendered = state.templates.get_template(name).and_then(|template| template.render(ctx));
    match rendered {
        Ok(html) => (status, [(header::CACHE_CONTROL, "no-store")], Html(html)).into_response(),
        Err(e) => {
            tracing::error!(template = name, error = %e, "Failed to render template");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
