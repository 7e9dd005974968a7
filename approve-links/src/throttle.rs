//! Brute-force protection for signature checks.
//!
//! Every attempt is counted against the action and the client before the signature is checked,
//! and handed back with [`Throttle::release`] when the check passes. Reserving first keeps the
//! cap exact under concurrency: once `throttle.max_attempts` attempts are failed or in flight,
//! further requests for that action are refused with HTTP 429. A counter expires
//! `throttle.window` after its last change.
//!
//! The client is the peer address of the connection, or the first hop of
//! `throttle.client_ip_header` when a trusted proxy sets it.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::request::Parts,
};
use metrics::counter;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};

use crate::AppState;
use crate::approval::types::Direction;
use crate::config::ThrottleConfig;
use crate::errors::{Error, Result};

/// Client key used when neither the proxy header nor the peer address is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleAction {
    ApprovePage,
    ApproveLink,
    RejectLink,
}

impl ThrottleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleAction::ApprovePage => "approve_page",
            ThrottleAction::ApproveLink => "approve_link",
            ThrottleAction::RejectLink => "reject_link",
        }
    }

    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::Approve => ThrottleAction::ApproveLink,
            Direction::Reject => ThrottleAction::RejectLink,
        }
    }
}

impl fmt::Display for ThrottleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt counters keyed by action and client.
///
/// Cloning is cheap; clones share the same counters.
#[derive(Clone)]
pub struct Throttle {
    /// None when throttling is disabled
    attempts: Option<Cache<String, u32>>,
    max_attempts: u32,
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("enabled", &self.attempts.is_some())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Throttle {
    pub fn new(config: &ThrottleConfig) -> Self {
        let attempts = config.enabled.then(|| {
            Cache::builder()
                .max_capacity(100_000)
                .time_to_live(config.window)
                .build()
        });

        Self {
            attempts,
            max_attempts: config.max_attempts,
        }
    }

    fn key(action: ThrottleAction, client: &str) -> String {
        format!("{action}:{client}")
    }

    /// Reserve one attempt, or refuse if the client has none left for this action.
    ///
    /// The reservation stays counted as a failure unless it is handed back with [`Self::release`].
    pub async fn acquire(&self, action: ThrottleAction, client: &str) -> Result<()> {
        let Some(attempts) = &self.attempts else {
            return Ok(());
        };

        let max_attempts = self.max_attempts;
        let result = attempts
            .entry(Self::key(action, client))
            .and_compute_with(|existing| async move {
                let count = existing.map_or(0, |entry| entry.into_value());
                if count >= max_attempts { Op::Nop } else { Op::Put(count + 1) }
            })
            .await;

        match result {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) => {
                tracing::debug!(action = %action, client = %client, attempts = entry.into_value(), "Reserved attempt");
                Ok(())
            }
            _ => {
                counter!("approve_links_throttled_total", "action" => action.as_str()).increment(1);
                tracing::warn!(action = %action, client = %client, "Request throttled after repeated failures");
                Err(Error::TooManyRequests {
                    message: "Too many failed attempts. Please retry later.".to_string(),
                })
            }
        }
    }

    /// Hand back an attempt reserved by [`Self::acquire`] that did not fail.
    pub async fn release(&self, action: ThrottleAction, client: &str) {
        let Some(attempts) = &self.attempts else {
            return;
        };

        attempts
            .entry(Self::key(action, client))
            .and_compute_with(|existing| async move {
                match existing.map(|entry| entry.into_value()) {
                    Some(count) if count > 1 => Op::Put(count - 1),
                    Some(_) => Op::Remove,
                    None => Op::Nop,
                }
            })
            .await;
    }

    /// Attempts currently counted for this action and client.
    pub async fn attempts(&self, action: ThrottleAction, client: &str) -> u32 {
        match &self.attempts {
            Some(attempts) => attempts.get(&Self::key(action, client)).await.unwrap_or(0),
            None => 0,
        }
    }
}

/// The client address used as throttle key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress(pub String);

impl ClientAddress {
    /// First hop of `trusted_header` when configured and present, else the connection's peer IP.
    pub fn from_parts(parts: &Parts, trusted_header: Option<&str>) -> Self {
        let forwarded = trusted_header
            .and_then(|name| parts.headers.get(name))
            .and_then(|h| h.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty())
            .map(str::to_string);

        let address = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(peer)| peer.ip().to_string())
            })
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        ClientAddress(address)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequestParts<AppState> for ClientAddress {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        Ok(ClientAddress::from_parts(parts, state.config.throttle.client_ip_header.as_deref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn throttle(max_attempts: u32, window: Duration) -> Throttle {
        Throttle::new(&ThrottleConfig {
            enabled: true,
            window,
            max_attempts,
            client_ip_header: None,
        })
    }

    fn request_parts(headers: &[(&str, &str)], peer: Option<SocketAddr>) -> Parts {
        let mut builder = axum::http::Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        if let Some(peer) = peer {
            parts.extensions.insert(ConnectInfo(peer));
        }
        parts
    }

    #[tokio::test]
    async fn test_refuses_after_max_attempts() {
        let throttle = throttle(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(throttle.acquire(ThrottleAction::ApproveLink, "10.0.0.1").await.is_ok());
        }

        assert_eq!(throttle.attempts(ThrottleAction::ApproveLink, "10.0.0.1").await, 3);
        assert!(matches!(
            throttle.acquire(ThrottleAction::ApproveLink, "10.0.0.1").await,
            Err(Error::TooManyRequests { .. })
        ));
        // Refusals are not counted
        assert_eq!(throttle.attempts(ThrottleAction::ApproveLink, "10.0.0.1").await, 3);
    }

    #[tokio::test]
    async fn test_released_attempts_do_not_count() {
        let throttle = throttle(2, Duration::from_secs(60));

        for _ in 0..10 {
            throttle.acquire(ThrottleAction::RejectLink, "10.0.0.1").await.unwrap();
            throttle.release(ThrottleAction::RejectLink, "10.0.0.1").await;
        }

        assert_eq!(throttle.attempts(ThrottleAction::RejectLink, "10.0.0.1").await, 0);
        assert!(throttle.acquire(ThrottleAction::RejectLink, "10.0.0.1").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_attempts_respect_cap() {
        let throttle = throttle(5, Duration::from_secs(60));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let throttle = throttle.clone();
                tokio::spawn(async move { throttle.acquire(ThrottleAction::ApproveLink, "10.0.0.1").await.is_ok() })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 5);
        assert_eq!(throttle.attempts(ThrottleAction::ApproveLink, "10.0.0.1").await, 5);
    }

    #[tokio::test]
    async fn test_counters_are_per_action_and_client() {
        let throttle = throttle(1, Duration::from_secs(60));
        throttle.acquire(ThrottleAction::ApproveLink, "10.0.0.1").await.unwrap();

        assert!(throttle.acquire(ThrottleAction::ApproveLink, "10.0.0.1").await.is_err());
        assert!(throttle.acquire(ThrottleAction::RejectLink, "10.0.0.1").await.is_ok());
        assert!(throttle.acquire(ThrottleAction::ApprovePage, "10.0.0.1").await.is_ok());
        assert!(throttle.acquire(ThrottleAction::ApproveLink, "10.0.0.2").await.is_ok());
    }

    #[tokio::test]
    async fn test_counters_expire_after_window() {
        let throttle = throttle(1, Duration::from_millis(50));
        throttle.acquire(ThrottleAction::RejectLink, "10.0.0.1").await.unwrap();
        assert!(throttle.acquire(ThrottleAction::RejectLink, "10.0.0.1").await.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(throttle.acquire(ThrottleAction::RejectLink, "10.0.0.1").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_throttle_never_refuses() {
        let throttle = Throttle::new(&ThrottleConfig {
            enabled: false,
            ..Default::default()
        });

        for _ in 0..20 {
            assert!(throttle.acquire(ThrottleAction::ApprovePage, "10.0.0.1").await.is_ok());
        }
        assert_eq!(throttle.attempts(ThrottleAction::ApprovePage, "10.0.0.1").await, 0);
    }

    #[test]
    fn test_client_address_defaults_to_peer() {
        let peer: SocketAddr = "198.51.100.4:52100".parse().unwrap();

        // Without a trusted proxy the header is ignored
        let parts = request_parts(&[("x-forwarded-for", "203.0.113.9")], Some(peer));
        assert_eq!(ClientAddress::from_parts(&parts, None).as_str(), "198.51.100.4");

        let parts = request_parts(&[], None);
        assert_eq!(ClientAddress::from_parts(&parts, None).as_str(), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_client_address_from_trusted_header() {
        let peer: SocketAddr = "10.0.0.2:443".parse().unwrap();

        let parts = request_parts(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")], Some(peer));
        assert_eq!(ClientAddress::from_parts(&parts, Some("x-forwarded-for")).as_str(), "203.0.113.9");

        // Falls back to the peer when the proxy did not set the header
        let parts = request_parts(&[], Some(peer));
        assert_eq!(ClientAddress::from_parts(&parts, Some("x-forwarded-for")).as_str(), "10.0.0.2");
    }

    #[test]
    fn test_action_for_direction() {
        assert_eq!(ThrottleAction::for_direction(Direction::Approve), ThrottleAction::ApproveLink);
        assert_eq!(ThrottleAction::for_direction(Direction::Reject).as_str(), "reject_link");
    }
}
