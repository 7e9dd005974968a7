//! HTTP request handlers.
//!
//! - [`links`]: link generation
//! - [`approvals`]: approve and reject
//! - [`page`]: the server-rendered approval page
//!
//! Handlers that check signatures take a [`crate::throttle::ClientAddress`] and reserve an
//! attempt in the shared throttle before checking.

pub mod approvals;
pub mod links;
pub mod page;
