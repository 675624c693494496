//! 服务层数据传输对象
//!
//! 请求体与响应体统一使用 camelCase，与客户端约定一致；时间在响应中以毫秒时间戳返回。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Entitlement, GoodsType, OrderStatus, PayOrder, PlanType, VipStatus};

/// 创建订单请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 64, message = "商品名称长度必须在1-64个字符之间"))]
    pub goods_name: String,
}

/// 创建订单响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub amount: i64,
    pub discount: i64,
    /// 实付金额 = amount - discount
    pub final_amount: i64,
    pub goods_name: String,
    pub goods_type: GoodsType,
    pub order_time: i64,
}

impl From<&PayOrder> for CreateOrderResponse {
    fn from(order: &PayOrder) -> Self {
        Self {
            order_id: order.order_id.clone(),
            amount: order.order_amount,
            discount: order.order_discount,
            final_amount: order.final_amount(),
            goods_name: order.goods_name.clone(),
            goods_type: order.goods_type,
            order_time: order.order_time.timestamp_millis(),
        }
    }
}

/// App Store 通知回调请求（responseBodyV2）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    pub signed_payload: String,
}

/// 通知处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// 已应用到订单和会员窗口
    Processed,
    /// 幂等账本中已存在
    Duplicate,
    /// 无需处理的通知
    Ignored,
    /// 验签失败或业务拒绝
    Rejected,
    /// 找不到对应订单
    NotFound,
    /// 当前订单状态不接受该事件
    InvalidTransition,
}

impl NotificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::Rejected => "rejected",
            Self::NotFound => "not_found",
            Self::InvalidTransition => "invalid_transition",
        }
    }
}

/// 通知回调响应
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyResponse {
    pub outcome: NotificationOutcome,
}

/// 客户端主动校验支付请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, message = "订单ID不能为空"))]
    pub order_id: String,
    #[validate(length(min = 1, message = "交易ID不能为空"))]
    pub transaction_id: String,
    #[serde(default)]
    pub sandbox: bool,
}

/// 校验支付响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub order_id: String,
    /// 会员到期时间（毫秒时间戳）
    pub expires_date: i64,
}

/// 取消订单请求
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, message = "订单ID不能为空"))]
    pub order_id: String,
}

/// 订单详情
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub order_id: String,
    pub goods_key: String,
    pub goods_name: String,
    pub goods_type: GoodsType,
    pub amount: i64,
    pub discount: i64,
    pub final_amount: i64,
    pub order_status: OrderStatus,
    pub pay_transaction_status: OrderStatus,
    pub pay_transaction_id: Option<String>,
    pub pay_transaction_time: Option<i64>,
    pub pay_time: Option<i64>,
    pub auto_renew: bool,
    pub order_time: i64,
}

impl From<PayOrder> for OrderDto {
    fn from(order: PayOrder) -> Self {
        let final_amount = order.final_amount();
        Self {
            order_id: order.order_id,
            goods_key: order.goods_key,
            goods_name: order.goods_name,
            goods_type: order.goods_type,
            amount: order.order_amount,
            discount: order.order_discount,
            final_amount,
            order_status: order.order_status,
            pay_transaction_status: order.pay_transaction_status,
            pay_transaction_id: order.pay_transaction_id,
            pay_transaction_time: order.pay_transaction_time.map(|t| t.timestamp_millis()),
            pay_time: order.pay_time.map(|t| t.timestamp_millis()),
            auto_renew: order.auto_renew,
            order_time: order.order_time.timestamp_millis(),
        }
    }
}

/// 会员状态
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VipStatusResponse {
    pub status: VipStatus,
    pub plan_type: PlanType,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// OPEN 且未到期
    pub active: bool,
    /// 取自最近一笔已支付订单，没有已支付订单时为 false
    pub auto_renew: bool,
}

impl VipStatusResponse {
    pub fn new(entitlement: &Entitlement, auto_renew: bool, now: DateTime<Utc>) -> Self {
        Self {
            status: entitlement.vip_status,
            plan_type: entitlement.vip_type,
            start_time: entitlement.vip_start_time.map(|t| t.timestamp_millis()),
            end_time: entitlement.vip_end_time.map(|t| t.timestamp_millis()),
            active: entitlement.is_active(now),
            auto_renew,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notify_request_field_name() {
        let req: NotifyRequest =
            serde_json::from_value(json!({ "signedPayload": "a.b.c" })).unwrap();
        assert_eq!(req.signed_payload, "a.b.c");
    }

    #[test]
    fn test_verify_request_sandbox_defaults_false() {
        let req: VerifyPaymentRequest = serde_json::from_value(json!({
            "orderId": "o1",
            "transactionId": "t1"
        }))
        .unwrap();
        assert!(!req.sandbox);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_outcome_serializes_as_str() {
        for outcome in [
            NotificationOutcome::Processed,
            NotificationOutcome::Duplicate,
            NotificationOutcome::Ignored,
            NotificationOutcome::Rejected,
            NotificationOutcome::NotFound,
            NotificationOutcome::InvalidTransition,
        ] {
            assert_eq!(serde_json::to_value(outcome).unwrap(), json!(outcome.as_str()));
        }
    }

    #[test]
    fn test_create_request_rejects_empty_goods() {
        let req = CreateOrderRequest {
            goods_name: String::new(),
        };
        assert!(req.validate().is_err());
    }
}
