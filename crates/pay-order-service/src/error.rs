//! 支付服务错误类型定义
//!
//! 错误分为业务错误（校验、验签、订单不存在、非法迁移）和系统错误（冲突、瞬时故障、数据库）。
//! 通知回调只对瞬时错误返回非 2xx，让 App Store 重投；其余结果一律确认收到。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pay_shared::error::SharedError;
use serde_json::json;

use crate::models::{EventKind, OrderStatus};

/// 支付服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum PayError {
    // 输入错误
    #[error("参数验证失败: {0}")]
    Validation(String),
    #[error("无效的商品名称: {0}")]
    GoodsNotFound(String),

    // 身份错误
    #[error("未授权: {0}")]
    Unauthorized(String),
    #[error("禁止访问: {0}")]
    Forbidden(String),
    #[error("签名校验失败: {0}")]
    Authentication(String),

    // 订单状态
    #[error("订单不存在: {0}")]
    OrderNotFound(String),
    #[error("订单状态不允许此操作: order_id={order_id}, event={event}, current_status={current_status}")]
    InvalidTransition {
        order_id: String,
        event: EventKind,
        current_status: OrderStatus,
    },
    #[error("订单并发更新冲突: order_id={0}")]
    Conflict(String),

    // 系统错误
    #[error("服务暂时不可用: {0}")]
    Transient(String),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, PayError>;

impl PayError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::GoodsNotFound(_) | Self::Authentication(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidTransition { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::GoodsNotFound(_) => "GOODS_NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Conflict(_) => "CONFLICT",
            Self::Transient(_) => "TRANSIENT_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否可在服务内部重试（仅并发冲突）
    ///
    /// 瞬时错误不在内部重试，交给调用方或 App Store 重投。
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// 是否为瞬时故障（存储或网络），回调接口据此返回 5xx
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Database(_) | Self::Internal(_) | Self::Conflict(_)
        )
    }

    /// 调用方（或 App Store 重投）是否值得重试
    pub fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    /// 是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !self.is_transient()
    }
}

impl IntoResponse for PayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志，防止信息泄露
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "数据库操作失败");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "内部错误");
                "服务内部错误，请稍后重试".to_string()
            }
            Self::Transient(e) => {
                tracing::warn!(error = %e, "瞬时故障");
                "服务暂时不可用，请稍后重试".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for PayError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// 从共享基础设施错误转换
impl From<SharedError> for PayError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::Database(e) => Self::Database(e),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON 处理错误: {}", err))
    }
}
