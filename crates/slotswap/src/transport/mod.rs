//! Transport layer for slotswap.
//!
//! Currently provides HTTP transport via axum. Identity is established by an
//! upstream authenticator; handlers read it from the `x-user-id` header.

pub mod http;

pub use http::{ServerConfig, serve};
