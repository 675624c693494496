//! 用户会员窗口模型
//!
//! 会员窗口是订单事件的派生状态，每个用户同一时间只有一个窗口。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::{PlanType, VipStatus};

/// 用户会员窗口
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Entitlement {
    pub user_id: String,
    pub vip_status: VipStatus,
    pub vip_type: PlanType,
    pub vip_start_time: Option<DateTime<Utc>>,
    pub vip_end_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// 续订带来的窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGrant {
    pub plan_type: PlanType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Entitlement {
    /// 首次引用时的默认窗口：CLOSED / NONE
    pub fn closed(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            vip_status: VipStatus::Closed,
            vip_type: PlanType::None,
            vip_start_time: None,
            vip_end_time: None,
            updated_at: now,
        }
    }

    /// 当前是否处于会员有效期内
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.vip_status == VipStatus::Open && self.vip_end_time.is_some_and(|end| end > now)
    }

    /// 按续订窗口延长
    ///
    /// 到期时间单调不减：只有新到期时间晚于已存储的到期时间才产生新窗口，
    /// 否则返回 `None`（迟到或重复的续订不会让窗口回退）。
    pub fn extended(&self, grant: &WindowGrant, now: DateTime<Utc>) -> Option<Self> {
        if self.vip_end_time.is_some_and(|end| grant.end <= end) {
            return None;
        }
        Some(Self {
            user_id: self.user_id.clone(),
            vip_status: VipStatus::Open,
            vip_type: grant.plan_type,
            vip_start_time: Some(grant.start),
            vip_end_time: Some(grant.end),
            updated_at: now,
        })
    }

    /// 立即关闭窗口：CLOSED / NONE，到期时间设为当前时间
    pub fn closed_at(&self, now: DateTime<Utc>) -> Self {
        Self {
            user_id: self.user_id.clone(),
            vip_status: VipStatus::Closed,
            vip_type: PlanType::None,
            vip_start_time: self.vip_start_time,
            vip_end_time: Some(now),
            updated_at: now,
        }
    }
}
