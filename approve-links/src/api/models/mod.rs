//! Request/response data structures for the JSON API.

pub mod links;
