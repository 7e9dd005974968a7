//! API request and response models for link endpoints.
//!
//! Field names are camelCase so generated links, API bodies and page query strings all use the
//! same parameter names.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::approval::types::{ApprovalRequest, DispatchOutcome};

/// Request to generate a signed approval link.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkCreate {
    /// URI requested with GET when the link is approved
    #[schema(example = "https://ci.example.com/deploy/42/approve")]
    pub approve_callback_uri: String,
    /// URI requested with GET when the link is rejected
    #[schema(example = "https://ci.example.com/deploy/42/reject")]
    pub reject_callback_uri: String,
    /// Text shown to the person deciding
    pub description: String,
    /// Only this user may act on the link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl From<LinkCreate> for ApprovalRequest {
    fn from(create: LinkCreate) -> Self {
        ApprovalRequest {
            approve_callback_uri: create.approve_callback_uri,
            reject_callback_uri: create.reject_callback_uri,
            description: create.description,
            authorized_user_id: normalize_user_id(create.user_id),
        }
    }
}

/// A generated link.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LinkResponse {
    pub link: String,
}

/// Parameters of a signed link, as received by the approve/reject endpoints and the page.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct SignedLink {
    pub approve_callback_uri: String,
    pub reject_callback_uri: String,
    pub description: String,
    /// Signature embedded in the generated link
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SignedLink {
    /// Split into the signed request and the signature to check.
    pub fn into_parts(self) -> (ApprovalRequest, String) {
        let request = ApprovalRequest {
            approve_callback_uri: self.approve_callback_uri,
            reject_callback_uri: self.reject_callback_uri,
            description: self.description,
            authorized_user_id: normalize_user_id(self.user_id),
        };
        (request, self.signature)
    }
}

/// Response after a callback was requested successfully.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DispatchResponse {
    pub result: DispatchResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DispatchResult {
    /// Body returned by the callback
    pub body: String,
}

impl From<DispatchOutcome> for DispatchResponse {
    fn from(outcome: DispatchOutcome) -> Self {
        Self {
            result: DispatchResult { body: outcome.body },
        }
    }
}

/// An empty user id signs like an absent one, so treat it as absent everywhere.
fn normalize_user_id(user_id: Option<String>) -> Option<String> {
    user_id.filter(|id| !id.is_empty())
}
