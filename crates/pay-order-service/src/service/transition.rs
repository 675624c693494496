//! 订单状态迁移引擎
//!
//! 迁移表（事件 → 允许的源状态 → 目标状态）：
//!
//! | 事件 | 源状态 | 目标状态 |
//! |---|---|---|
//! | RENEWED | UNPAID, PAID, EXPIRED | PAID |
//! | REFUNDED | PAID | REFUNDED |
//! | EXPIRED | PAID | EXPIRED |
//! | CANCELLED | UNPAID | CANCELLED |
//! | AUTO_RENEW_* | 任意 | 不变，仅翻转自动续订标记 |
//!
//! 不在表中的组合返回 `InvalidTransition`，乱序和重复投递的事件因此被拒绝而不是覆盖。
//! 写入是以读取时状态为期望值的条件更新，并发写入者中只有一个能成功。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pay_shared::observability::metrics;
use tracing::{debug, info, instrument, warn};

use crate::error::{PayError, Result};
use crate::models::{EventKind, OrderStatus, PayOrder, TransactionInfo, TransitionPatch};
use crate::repository::OrderRepositoryTrait;

struct TransitionRule {
    event: EventKind,
    sources: &'static [OrderStatus],
    destination: OrderStatus,
}

static TRANSITIONS: &[TransitionRule] = &[
    TransitionRule {
        event: EventKind::Renewed,
        sources: &[OrderStatus::Unpaid, OrderStatus::Paid, OrderStatus::Expired],
        destination: OrderStatus::Paid,
    },
    TransitionRule {
        event: EventKind::Refunded,
        sources: &[OrderStatus::Paid],
        destination: OrderStatus::Refunded,
    },
    TransitionRule {
        event: EventKind::Expired,
        sources: &[OrderStatus::Paid],
        destination: OrderStatus::Expired,
    },
    TransitionRule {
        event: EventKind::Cancelled,
        sources: &[OrderStatus::Unpaid],
        destination: OrderStatus::Cancelled,
    },
];

/// 查询迁移目标状态，非法组合返回 `None`
pub fn destination(event: EventKind, current: OrderStatus) -> Option<OrderStatus> {
    TRANSITIONS
        .iter()
        .find(|rule| rule.event == event && rule.sources.contains(&current))
        .map(|rule| rule.destination)
}

/// 计算迁移补丁
///
/// RENEWED 记录原始交易 ID、购买时间和支付时间，其余事件只改变状态。
pub fn plan_transition(
    order: &PayOrder,
    event: EventKind,
    transaction: Option<&TransactionInfo>,
    now: DateTime<Utc>,
) -> Result<TransitionPatch> {
    let target = destination(event, order.order_status).ok_or_else(|| {
        PayError::InvalidTransition {
            order_id: order.order_id.clone(),
            event,
            current_status: order.order_status,
        }
    })?;

    if event != EventKind::Renewed {
        return Ok(TransitionPatch::status_only(target));
    }

    let tx = transaction
        .ok_or_else(|| PayError::Validation("续订事件缺少交易信息".to_string()))?;
    if tx.expires_at().is_none() {
        return Err(PayError::Validation(format!(
            "交易缺少过期时间: {}",
            tx.transaction_id
        )));
    }
    let purchased_at = tx
        .purchased_at()
        .ok_or_else(|| PayError::Validation(format!("交易购买时间无效: {}", tx.purchase_date)))?;

    Ok(TransitionPatch {
        order_status: target,
        pay_transaction_status: target,
        pay_transaction_id: Some(tx.original_transaction_id.clone()),
        pay_transaction_time: Some(purchased_at),
        pay_time: Some(now),
    })
}

/// 状态迁移引擎
pub struct TransitionEngine {
    orders: Arc<dyn OrderRepositoryTrait>,
}

impl TransitionEngine {
    pub fn new(orders: Arc<dyn OrderRepositoryTrait>) -> Self {
        Self { orders }
    }

    /// 以当前时间为事件时间应用事件
    pub async fn apply(
        &self,
        order: &PayOrder,
        event: EventKind,
        transaction: Option<&TransactionInfo>,
    ) -> Result<PayOrder> {
        self.apply_at(order, event, transaction, Utc::now()).await
    }

    /// 把事件应用到订单
    ///
    /// `order` 是调用方读取到的快照，其状态作为条件更新的期望值；
    /// 快照过期时返回 `Conflict`，由调用方重新读取后重试。
    /// `occurred_at` 是事件的签发时间，自动续订标记只接受不早于上次变更的事件。
    #[instrument(skip(self, order, transaction), fields(order_id = %order.order_id, event_kind = %event))]
    pub async fn apply_at(
        &self,
        order: &PayOrder,
        event: EventKind,
        transaction: Option<&TransactionInfo>,
        occurred_at: DateTime<Utc>,
    ) -> Result<PayOrder> {
        match event {
            EventKind::Ignored => return Ok(order.clone()),
            EventKind::AutoRenewDisabled | EventKind::AutoRenewEnabled => {
                let enabled = event == EventKind::AutoRenewEnabled;
                let updated = self
                    .orders
                    .set_auto_renew(&order.order_id, enabled, occurred_at)
                    .await?;
                if updated.auto_renew == enabled {
                    metrics::record_transition(event.as_str(), "flag");
                    debug!(auto_renew = enabled, "自动续订标记已更新");
                } else {
                    metrics::record_transition(event.as_str(), "stale");
                    info!(
                        auto_renew = updated.auto_renew,
                        changed_at = ?updated.auto_renew_changed_at,
                        "自动续订通知早于已生效的变更，已忽略"
                    );
                }
                return Ok(updated);
            }
            _ => {}
        }

        let patch = match plan_transition(order, event, transaction, Utc::now()) {
            Ok(patch) => patch,
            Err(e) => {
                metrics::record_transition(event.as_str(), "rejected");
                warn!(current_status = %order.order_status, error = %e, "事件不适用于当前订单状态");
                return Err(e);
            }
        };

        match self
            .orders
            .apply_transition(&order.order_id, order.order_status, patch)
            .await
        {
            Ok(updated) => {
                metrics::record_transition(event.as_str(), "applied");
                info!(
                    from = %order.order_status,
                    to = %updated.order_status,
                    "订单状态已迁移"
                );
                Ok(updated)
            }
            Err(e) => {
                if e.is_conflict() {
                    metrics::record_transition(event.as_str(), "conflict");
                }
                Err(e)
            }
        }
    }
}
