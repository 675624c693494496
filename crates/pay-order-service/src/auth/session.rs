//! 会话令牌校验
//!
//! 会话由认证子系统签发（HS256 JWT，`sub` 为用户 ID），本服务只做校验。

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use pay_shared::config::SessionConfig;
use serde::{Deserialize, Serialize};

use crate::error::{PayError, Result};

/// 会话令牌载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// 用户 ID
    pub sub: String,
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// 当前登录用户，由认证中间件注入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub user_id: String,
}

/// 会话校验接口
pub trait SessionValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<CurrentUser>;
}

/// HS256 会话校验器
#[derive(Clone)]
pub struct JwtSessionValidator {
    issuer: String,
    decoding_key: DecodingKey,
}

impl JwtSessionValidator {
    pub fn new(secret: &str, issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.secret, config.issuer.clone())
    }
}

impl SessionValidator for JwtSessionValidator {
    fn validate(&self, token: &str) -> Result<CurrentUser> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => PayError::Unauthorized("会话已过期".to_string()),
                ErrorKind::InvalidToken => PayError::Unauthorized("无效的会话令牌".to_string()),
                _ => PayError::Unauthorized(format!("会话校验失败: {}", e)),
            },
        )?;

        if data.claims.sub.trim().is_empty() {
            return Err(PayError::Unauthorized("会话缺少用户ID".to_string()));
        }

        Ok(CurrentUser {
            user_id: data.claims.sub,
        })
    }
}
