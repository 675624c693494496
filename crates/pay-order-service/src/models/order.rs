//! 支付订单模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::{GoodsType, OrderStatus};
use super::validation::{ValidationResult, check_amounts};

/// 支付订单
///
/// 一次购买尝试。订单永不物理删除，终态记录保留用于审计和重放识别。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PayOrder {
    pub order_id: String,
    pub user_id: String,
    /// 商品目录中的键（如 MONTHLY_FIRST）
    pub goods_key: String,
    /// 商品描述
    pub goods_name: String,
    pub goods_type: GoodsType,
    /// 订单金额（最小货币单位）
    pub order_amount: i64,
    pub order_discount: i64,
    pub order_status: OrderStatus,
    pub pay_transaction_status: OrderStatus,
    /// 外部交易 ID（原始交易 ID），首次支付成功前为空
    pub pay_transaction_id: Option<String>,
    pub pay_transaction_time: Option<DateTime<Utc>>,
    pub pay_time: Option<DateTime<Utc>>,
    /// 自动续订意向，只由 AUTO_RENEW_* 事件修改
    pub auto_renew: bool,
    /// 最近一次生效的自动续订通知的签发时间，更早的通知不再覆盖标记
    pub auto_renew_changed_at: Option<DateTime<Utc>>,
    pub order_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayOrder {
    /// 实付金额
    pub fn final_amount(&self) -> i64 {
        self.order_amount - self.order_discount
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// 待创建订单
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: String,
    pub goods_key: String,
    pub goods_name: String,
    pub goods_type: GoodsType,
    pub order_amount: i64,
    pub order_discount: i64,
}

impl NewOrder {
    /// 以 UNPAID 状态落成完整订单
    pub fn into_order(self, order_id: String, now: DateTime<Utc>) -> PayOrder {
        PayOrder {
            order_id,
            user_id: self.user_id,
            goods_key: self.goods_key,
            goods_name: self.goods_name,
            goods_type: self.goods_type,
            order_amount: self.order_amount,
            order_discount: self.order_discount,
            order_status: OrderStatus::Unpaid,
            pay_transaction_status: OrderStatus::Unpaid,
            pay_transaction_id: None,
            pay_transaction_time: None,
            pay_time: None,
            auto_renew: true,
            auto_renew_changed_at: None,
            order_time: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 校验待创建订单
pub fn validate_new_order(order: &NewOrder) -> ValidationResult {
    let mut errors = Vec::new();

    if order.user_id.trim().is_empty() {
        errors.push("用户ID不能为空".to_string());
    }
    check_amounts(order.order_amount, order.order_discount, &mut errors);
    if order.goods_name.trim().is_empty() {
        errors.push("商品名称不能为空".to_string());
    }

    ValidationResult::from_errors(errors)
}

/// 状态迁移补丁
///
/// 由状态迁移引擎生成；`None` 字段表示保持原值。
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPatch {
    pub order_status: OrderStatus,
    pub pay_transaction_status: OrderStatus,
    pub pay_transaction_id: Option<String>,
    pub pay_transaction_time: Option<DateTime<Utc>>,
    pub pay_time: Option<DateTime<Utc>>,
}

impl TransitionPatch {
    /// 仅改变状态
    pub fn status_only(status: OrderStatus) -> Self {
        Self {
            order_status: status,
            pay_transaction_status: status,
            pay_transaction_id: None,
            pay_transaction_time: None,
            pay_time: None,
        }
    }

    /// 把补丁应用到订单副本（内存仓储与测试使用，语义与 SQL 中的 COALESCE 一致）
    pub fn apply_to(&self, order: &mut PayOrder, now: DateTime<Utc>) {
        order.order_status = self.order_status;
        order.pay_transaction_status = self.pay_transaction_status;
        if let Some(id) = &self.pay_transaction_id {
            order.pay_transaction_id = Some(id.clone());
        }
        if let Some(time) = self.pay_transaction_time {
            order.pay_transaction_time = Some(time);
        }
        if let Some(time) = self.pay_time {
            order.pay_time = Some(time);
        }
        order.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(amount: i64, discount: i64) -> NewOrder {
        NewOrder {
            user_id: "user-1".to_string(),
            goods_key: "MONTHLY_FIRST".to_string(),
            goods_name: "月度会员首充优惠".to_string(),
            goods_type: GoodsType::Monthly,
            order_amount: amount,
            order_discount: discount,
        }
    }

    #[test]
    fn test_validate_new_order_ok() {
        assert!(validate_new_order(&new_order(2900, 1000)).valid);
        assert!(validate_new_order(&new_order(2900, 2900)).valid);
    }

    #[test]
    fn test_validate_discount_exceeds_amount() {
        let result = validate_new_order(&new_order(1000, 2900));
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("优惠金额")));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut order = new_order(0, 0);
        order.user_id = " ".to_string();
        order.goods_name = String::new();
        let result = validate_new_order(&order);
        assert_eq!(result.errors.len(), 3);
    }

    #[test]
    fn test_into_order_starts_unpaid() {
        let now = Utc::now();
        let order = new_order(2900, 1000).into_order("o-1".to_string(), now);
        assert_eq!(order.order_status, OrderStatus::Unpaid);
        assert_eq!(order.pay_transaction_status, OrderStatus::Unpaid);
        assert!(order.pay_transaction_id.is_none());
        assert_eq!(order.final_amount(), 1900);
    }

    #[test]
    fn test_patch_keeps_unset_fields() {
        let now = Utc::now();
        let mut order = new_order(2900, 0).into_order("o-1".to_string(), now);
        order.pay_transaction_id = Some("tx-1".to_string());

        TransitionPatch::status_only(OrderStatus::Refunded).apply_to(&mut order, now);

        assert_eq!(order.order_status, OrderStatus::Refunded);
        assert_eq!(order.pay_transaction_id.as_deref(), Some("tx-1"));
    }
}
