use crate::{
    AppState,
    config::Config,
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use subtle::ConstantTimeEq;
use tracing::{instrument, trace};

/// A user identified by the trusted proxy header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
}

/// The proxy-header user, if any. Never rejects a request for lacking one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeUser(pub Option<CurrentUser>);

impl MaybeUser {
    pub fn id(&self) -> Option<&str> {
        self.0.as_ref().map(|user| user.id.as_str())
    }
}

/// A caller allowed to generate links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admin {
    User(CurrentUser),
    ApiKey,
}

/// Extract user from proxy header if present and valid
/// Returns:
/// - None: proxy header auth disabled or header absent
/// - Some(Ok(user)): header present
/// - Some(Err(error)): header present but not valid UTF-8 or empty
fn try_proxy_header_auth(parts: &Parts, config: &Config) -> Option<Result<CurrentUser>> {
    if !config.auth.proxy_header.enabled {
        return None;
    }

    let header = parts.headers.get(&config.auth.proxy_header.header_name)?;
    let id = match header.to_str() {
        Ok(id) => id.trim(),
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid user header: {e}"),
            }));
        }
    };

    if id.is_empty() {
        return Some(Err(Error::BadRequest {
            message: "Empty user header".to_string(),
        }));
    }

    Some(Ok(CurrentUser { id: id.to_string() }))
}

/// Check a bearer token against the admin API key
/// Returns:
/// - None: no admin key configured or no bearer token sent
/// - Some(Ok(())): token matches
/// - Some(Err(error)): token sent but wrong
fn try_api_key_auth(parts: &Parts, config: &Config) -> Option<Result<()>> {
    let expected = config.auth.admin_api_key.as_deref().filter(|key| !key.is_empty())?;
    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    // Not a Bearer token, try other auth methods
    let api_key = auth_str.strip_prefix("Bearer ")?;

    if bool::from(api_key.as_bytes().ct_eq(expected.as_bytes())) {
        Some(Ok(()))
    } else {
        Some(Err(Error::Unauthenticated {
            message: Some("Invalid API key".to_string()),
        }))
    }
}

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match try_proxy_header_auth(parts, &state.config) {
            Some(Ok(user)) => {
                trace!(user_id = %user.id, "Found proxy header user");
                Ok(MaybeUser(Some(user)))
            }
            Some(Err(e)) => Err(e),
            None => Ok(MaybeUser(None)),
        }
    }
}

impl FromRequestParts<AppState> for Admin {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        // A valid API key wins even if a non-admin proxy user is also present
        let api_key_result = try_api_key_auth(parts, &state.config);
        if let Some(Ok(())) = api_key_result {
            trace!("Admin authenticated with API key");
            return Ok(Admin::ApiKey);
        }

        match try_proxy_header_auth(parts, &state.config) {
            Some(Ok(user)) if state.config.auth.admin_users.contains(&user.id) => {
                trace!(user_id = %user.id, "Admin authenticated with proxy header");
                Ok(Admin::User(user))
            }
            Some(Ok(_)) => Err(Error::InsufficientPermissions {
                action: "generate links".to_string(),
            }),
            Some(Err(e)) => Err(e),
            None => match api_key_result {
                Some(Err(e)) => Err(e),
                _ => Err(Error::Unauthenticated { message: None }),
            },
        }
    }
}
