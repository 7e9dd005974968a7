//! OpenAPI documentation for the JSON API and the approval page.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{api, errors::ErrorBody};

/// Security schemes: the admin API key and the trusted proxy user header.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "BearerAuth".to_string(),
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("API Key")
                        .description(Some(
                            "Admin API key configured as `auth.admin_api_key`:\n\n\
                            ```\nAuthorization: Bearer YOUR_API_KEY\n```",
                        ))
                        .build(),
                ),
            );
            components.security_schemes.insert(
                "X-Approve-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "x-approve-user",
                    "User id set by a trusted authenticating proxy. The header name is configurable.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "approve-links",
        description = "Signed approval links. Generate a link carrying approve and reject callback URIs; \
            whoever opens it can approve or reject, which requests the matching callback."
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::links::generate_link,
        api::handlers::approvals::approve,
        api::handlers::approvals::reject,
        api::handlers::page::view_link,
    ),
    components(
        schemas(
            api::models::links::LinkCreate,
            api::models::links::LinkResponse,
            api::models::links::SignedLink,
            api::models::links::DispatchResponse,
            api::models::links::DispatchResult,
            ErrorBody,
        )
    ),
    tags(
        (name = "links", description = "Link generation"),
        (name = "approvals", description = "Acting on a link"),
        (name = "page", description = "Server-rendered approval page"),
    )
)]
pub struct ApiDoc;
