use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::approval::error::DispatchError;

/// The plaintext contents of an approval link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approve_callback_uri: String,
    pub reject_callback_uri: String,
    pub description: String,
    /// When set, only this user may approve or reject
    pub authorized_user_id: Option<String>,
}

impl ApprovalRequest {
    pub fn new(approve_callback_uri: impl Into<String>, reject_callback_uri: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            approve_callback_uri: approve_callback_uri.into(),
            reject_callback_uri: reject_callback_uri.into(),
            description: description.into(),
            authorized_user_id: None,
        }
    }

    pub fn with_authorized_user(mut self, user_id: impl Into<String>) -> Self {
        self.authorized_user_id = Some(user_id.into());
        self
    }

    /// The callback URI for a direction, as supplied by the link creator.
    pub fn callback_uri(&self, direction: Direction) -> &str {
        match direction {
            Direction::Approve => &self.approve_callback_uri,
            Direction::Reject => &self.reject_callback_uri,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Approve,
    Reject,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Approve => "approve",
            Direction::Reject => "reject",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP methods a callback may be requested with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallbackMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl CallbackMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackMethod::Get => "GET",
            CallbackMethod::Post => "POST",
            CallbackMethod::Put => "PUT",
            CallbackMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for CallbackMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackMethod {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(CallbackMethod::Get),
            "POST" => Ok(CallbackMethod::Post),
            "PUT" => Ok(CallbackMethod::Put),
            "DELETE" => Ok(CallbackMethod::Delete),
            _ => Err(DispatchError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// A generated, signed link to the approval page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalLink(Url);

impl ApprovalLink {
    pub(crate) fn new(url: Url) -> Self {
        Self(url)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Look up a query parameter embedded in the link.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.0.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
    }
}

impl fmt::Display for ApprovalLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Result of a callback request that completed with a non-error status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub status: u16,
    pub body: String,
}
