//! 会话认证中间件
//!
//! 从 `auth_token` 头（移动端）或 `Authorization: Bearer` 中提取会话令牌，
//! 校验后把 `CurrentUser` 注入请求扩展。

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::CurrentUser;
use crate::error::PayError;
use crate::state::AppState;

pub const AUTH_TOKEN_HEADER: &str = "auth_token";

/// 公开路由：通知回调的可信度来自签名，健康检查无需会话
const PUBLIC_PATHS: [&str; 3] = ["/pay/apple-notify", "/health", "/ready"];

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if PUBLIC_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let Some(token) = extract_token(&request) else {
        return PayError::Unauthorized("缺少会话令牌".to_string()).into_response();
    };

    match state.session_validator.validate(&token) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

fn extract_token(request: &Request<Body>) -> Option<String> {
    let headers = request.headers();

    if let Some(token) = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_string());
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// 从请求扩展中读取当前用户
pub fn extract_user(request: &Request<Body>) -> Option<&CurrentUser> {
    request.extensions().get::<CurrentUser>()
}

/// 处理器直接以 `CurrentUser` 作为参数，未经认证中间件的请求返回 401
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = PayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| PayError::Unauthorized("未登录".to_string()))
    }
}
