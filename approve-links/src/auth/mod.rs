//! Caller identity.
//!
//! The service keeps no user database. Identity comes from two places:
//!
//! - **Proxy header**: a trusted upstream proxy (oauth2-proxy, vouch, ...) sets
//!   `auth.proxy_header.header_name` to the user id. The id is compared with the `userId` bound
//!   into a link, and users listed in `auth.admin_users` may generate links.
//! - **Admin API key**: `Authorization: Bearer <auth.admin_api_key>` allows link generation for
//!   service-to-service callers.
//!
//! See [`current_user`] for the extractors.

pub mod current_user;

pub use current_user::{Admin, CurrentUser, MaybeUser};
