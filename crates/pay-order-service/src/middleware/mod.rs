//! HTTP 中间件

pub mod auth;

pub use auth::{AUTH_TOKEN_HEADER, auth_middleware, extract_user};
