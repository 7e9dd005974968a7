//! Signed approval links.
//!
//! A link carries two callback URIs, a description and an optional user binding, all signed with
//! the server secret. Clicking approve or reject re-verifies the signature and then issues a GET
//! to the matching callback URI.
//!
//! - [`signing`]: HMAC construction shared by generation and verification
//! - [`dispatcher`]: link generation, authorization and callback dispatch
//! - [`http`]: the outbound HTTP seam

pub mod dispatcher;
pub mod error;
pub mod http;
pub mod signing;
pub mod types;

pub use dispatcher::{Dispatcher, parse_callback_uri};
pub use error::{DispatchError, LinkError, SigningError, TransportErrorKind};
pub use http::{CallbackClient, CallbackRequest, CallbackResponse, ReqwestCallbackClient, TransportFailure};
pub use signing::{Signature, Signer};
pub use types::{ApprovalLink, ApprovalRequest, CallbackMethod, Direction, DispatchOutcome};
