//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Links** (`POST /api/v1/link`): generate a signed link, admin only
//! - **Approvals** (`POST /api/v1/approve`, `POST /api/v1/reject`): act on a signed link
//! - **Page** (`GET /link`): the HTML page a generated link points to
//!
//! The JSON API is documented with `utoipa`; the docs are served at `/api/docs`.

pub mod handlers;
pub mod models;
