//! Link generation and approve/reject resolution.
//!
//! ```text
//! dispatcher.resolve(direction, request, signature, actor)
//!   ├─ authorize()
//!   │    ├─ signer.verify()            // InvalidSignature, nothing else runs
//!   │    └─ authorized user == actor?  // UnauthorizedUser, still no network
//!   ├─ parse callback URI              // InvalidCallbackUri
//!   └─ request(url, [], GET)
//!        ├─ client.execute()           // bounded by timeout, aborted on shutdown
//!        ├─ status >= 400  → Upstream
//!        ├─ no response    → Transport
//!        └─ otherwise      → DispatchOutcome
//! ```
//!
//! Nothing is retried: callbacks may not be idempotent, so a failed dispatch is reported back to
//! the caller who can decide to click again.

use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::approval::error::{DispatchError, LinkError, TransportErrorKind};
use crate::approval::http::{CallbackClient, CallbackRequest, TransportFailure};
use crate::approval::signing::Signer;
use crate::approval::types::{ApprovalLink, ApprovalRequest, CallbackMethod, Direction, DispatchOutcome};
use crate::config::Config;

/// Longest link accepted by default; mail clients and chat tools start truncating past this.
pub const DEFAULT_MAX_LINK_LENGTH: usize = 2000;

pub const DEFAULT_USER_AGENT: &str = "approve-links callback dispatcher";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Query parameter names of a generated link.
pub mod params {
    pub const APPROVE_CALLBACK_URI: &str = "approveCallbackUri";
    pub const REJECT_CALLBACK_URI: &str = "rejectCallbackUri";
    pub const DESCRIPTION: &str = "description";
    pub const SIGNATURE: &str = "signature";
    pub const USER_ID: &str = "userId";
}

#[derive(Builder)]
pub struct Dispatcher {
    signer: Signer,
    client: Arc<dyn CallbackClient>,
    /// Absolute URL of the approval page; link parameters are appended to it
    link_url: Url,
    #[builder(default = DEFAULT_MAX_LINK_LENGTH)]
    max_link_length: usize,
    #[builder(into, default = DEFAULT_USER_AGENT.to_string())]
    user_agent: String,
    #[builder(default = DEFAULT_TIMEOUT)]
    timeout: Duration,
    /// Cancelled on application shutdown; in-flight callbacks resolve as cancelled
    #[builder(default)]
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Build a dispatcher from application configuration.
    pub fn from_config(config: &Config, client: Arc<dyn CallbackClient>, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let signer = Signer::new(config.secret_key.as_deref().unwrap_or_default())?;
        let link_url = config.link_url()?;

        Ok(Self::builder()
            .signer(signer)
            .client(client)
            .link_url(link_url)
            .max_link_length(config.links.max_length)
            .user_agent(config.dispatch.user_agent.clone())
            .timeout(config.dispatch.timeout)
            .shutdown(shutdown)
            .build())
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Path component of the approval page URL, where the page is routed.
    pub fn link_path(&self) -> String {
        self.link_url.path().to_string()
    }

    /// Sign a request and embed it in a link to the approval page.
    pub fn generate_link(&self, request: &ApprovalRequest) -> Result<ApprovalLink, LinkError> {
        let signature = self.signer.sign(
            &request.approve_callback_uri,
            &request.reject_callback_uri,
            &request.description,
            request.authorized_user_id.as_deref(),
        );

        let mut url = self.link_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair(params::APPROVE_CALLBACK_URI, &request.approve_callback_uri)
                .append_pair(params::REJECT_CALLBACK_URI, &request.reject_callback_uri)
                .append_pair(params::DESCRIPTION, &request.description)
                .append_pair(params::SIGNATURE, signature.as_str());
            if let Some(user_id) = &request.authorized_user_id {
                query.append_pair(params::USER_ID, user_id);
            }
        }

        // Percent-encoding leaves only ASCII, so bytes and characters agree
        let length = url.as_str().len();
        if length > self.max_link_length {
            tracing::debug!(length, max = self.max_link_length, "Generated link is too long");
            return Err(LinkError::LengthExceeded {
                length,
                max: self.max_link_length,
            });
        }

        Ok(ApprovalLink::new(url))
    }

    /// Check that a link is authentic and that `actor` may act on it.
    ///
    /// The signature is checked first so a forged link never reveals anything about user binding.
    pub fn authorize(&self, request: &ApprovalRequest, signature: &str, actor: Option<&str>) -> Result<(), DispatchError> {
        if !self.signer.verify(
            &request.approve_callback_uri,
            &request.reject_callback_uri,
            &request.description,
            signature,
            request.authorized_user_id.as_deref(),
        ) {
            return Err(DispatchError::InvalidSignature);
        }

        if let Some(authorized) = request.authorized_user_id.as_deref()
            && actor != Some(authorized)
        {
            return Err(DispatchError::UnauthorizedUser);
        }

        Ok(())
    }

    /// Verify a link and request the callback for `direction`.
    #[instrument(skip_all, fields(direction = %direction, dispatch_id = %Uuid::new_v4()))]
    pub async fn resolve(
        &self,
        direction: Direction,
        request: &ApprovalRequest,
        signature: &str,
        actor: Option<&str>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let result = match self.authorize(request, signature, actor) {
            Ok(()) => match parse_callback_uri(request.callback_uri(direction)) {
                Ok(url) => self.request(url, &[], CallbackMethod::Get).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        counter!("approve_links_dispatch_total", "direction" => direction.as_str(), "outcome" => outcome).increment(1);

        result
    }

    /// Send a single callback request and classify the result.
    ///
    /// Non-empty `params` go into the query string for GET and into a JSON object body for every
    /// other method.
    pub async fn request(&self, mut url: Url, params: &[(String, String)], method: CallbackMethod) -> Result<DispatchOutcome, DispatchError> {
        let mut headers = vec![("User-Agent".to_string(), self.user_agent.clone())];
        let mut body = None;

        if !params.is_empty() {
            match method {
                CallbackMethod::Get => {
                    url.query_pairs_mut().extend_pairs(params);
                }
                _ => {
                    let object: serde_json::Map<String, serde_json::Value> = params
                        .iter()
                        .map(|(key, value)| (key.clone(), serde_json::Value::String(value.clone())))
                        .collect();
                    headers.push(("Content-Type".to_string(), "application/json".to_string()));
                    body = Some(serde_json::Value::Object(object).to_string());
                }
            }
        }

        let host = url.host_str().unwrap_or_default().to_string();
        let callback = CallbackRequest {
            method,
            url,
            headers,
            body,
            timeout: self.timeout,
        };

        tracing::debug!(host = %host, method = %method, "Sending callback request");

        let response = tokio::select! {
            result = tokio::time::timeout(self.timeout, self.client.execute(&callback)) => match result {
                Ok(response) => response,
                Err(_) => Err(TransportFailure::new(
                    TransportErrorKind::Timeout,
                    format!("no response within {:?}", self.timeout),
                )),
            },
            _ = self.shutdown.cancelled() => Err(TransportFailure::new(
                TransportErrorKind::Cancelled,
                "dispatch cancelled by shutdown",
            )),
        };

        match response {
            Ok(response) if response.status >= 400 => {
                tracing::warn!(
                    host = %host,
                    status_code = response.status,
                    response_body = %response.body,
                    "Callback returned an error status"
                );
                Err(DispatchError::Upstream {
                    status: response.status,
                    body: (!response.body.is_empty()).then_some(response.body),
                })
            }
            Ok(response) => {
                tracing::info!(host = %host, status_code = response.status, "Callback dispatched");
                Ok(DispatchOutcome {
                    success: true,
                    status: response.status,
                    body: response.body,
                })
            }
            Err(failure) => {
                tracing::warn!(host = %host, kind = %failure.kind, error = %failure.message, "Callback request failed");
                Err(DispatchError::Transport {
                    kind: failure.kind,
                    message: failure.message,
                })
            }
        }
    }
}

/// Parse a callback URI, accepting only absolute http and https URLs.
pub fn parse_callback_uri(uri: &str) -> Result<Url, DispatchError> {
    let url = Url::parse(uri).map_err(|e| DispatchError::InvalidCallbackUri { reason: e.to_string() })?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(DispatchError::InvalidCallbackUri {
            reason: "missing host".to_string(),
        }),
        scheme => Err(DispatchError::InvalidCallbackUri {
            reason: format!("unsupported scheme '{scheme}'"),
        }),
    }
}
