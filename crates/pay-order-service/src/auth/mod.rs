//! 会话认证模块

pub mod session;

pub use session::{CurrentUser, JwtSessionValidator, SessionClaims, SessionValidator};
