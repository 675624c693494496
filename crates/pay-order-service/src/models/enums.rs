//! 支付服务枚举类型定义
//!
//! 所有持久化枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};
use std::fmt;

/// 订单状态
///
/// 订单状态和交易状态共用同一枚举，两者都只能由状态迁移引擎修改
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 未支付 - 下单后的初始状态
    #[default]
    Unpaid,
    /// 已支付
    Paid,
    /// 已取消 - 用户在支付前取消
    Cancelled,
    /// 已退款
    Refunded,
    /// 已过期 - 订阅到期未续费，后续续费仍可回到已支付
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "UNPAID",
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 商品类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoodsType {
    /// 月度订阅
    #[default]
    Monthly,
    /// 年度订阅
    Yearly,
}

impl GoodsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }

    /// 商品类型对应的会员套餐
    pub fn plan_type(&self) -> PlanType {
        match self {
            Self::Monthly => PlanType::Month,
            Self::Yearly => PlanType::Year,
        }
    }
}

/// 会员状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VipStatus {
    Open,
    #[default]
    Closed,
}

/// 会员套餐类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    Month,
    Year,
    #[default]
    None,
}

/// 内部事件类型
///
/// 外部通知经分类后得到的事件，以及客户端发起的取消事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// 付费续订成功（含首次订阅）
    Renewed,
    /// 退款，立即生效
    Refunded,
    /// 订阅过期，立即生效
    Expired,
    /// 关闭自动续订，仅更新标记
    AutoRenewDisabled,
    /// 重新开启自动续订，仅更新标记
    AutoRenewEnabled,
    /// 客户端取消未支付订单
    Cancelled,
    /// 无需处理的通知
    Ignored,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Renewed => "RENEWED",
            Self::Refunded => "REFUNDED",
            Self::Expired => "EXPIRED",
            Self::AutoRenewDisabled => "AUTO_RENEW_DISABLED",
            Self::AutoRenewEnabled => "AUTO_RENEW_ENABLED",
            Self::Cancelled => "CANCELLED",
            Self::Ignored => "IGNORED",
        }
    }

    /// 是否只翻转自动续订标记，不改变订单状态
    pub fn is_flag_only(&self) -> bool {
        matches!(self, Self::AutoRenewDisabled | Self::AutoRenewEnabled)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
