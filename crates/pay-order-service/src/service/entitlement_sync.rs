//! 会员窗口同步
//!
//! 订单迁移成功后更新派生的会员窗口：续订按交易窗口延长（到期时间单调不减），
//! 退款和过期立即关闭。窗口更新与订单写入不在同一事务，重放由幂等账本和迁移表兜底。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pay_shared::observability::metrics;
use tracing::{debug, info};

use crate::error::{PayError, Result};
use crate::models::{Entitlement, EventKind, PayOrder, TransactionInfo, WindowGrant};
use crate::repository::EntitlementRepositoryTrait;

pub struct EntitlementSync {
    entitlements: Arc<dyn EntitlementRepositoryTrait>,
}

impl EntitlementSync {
    pub fn new(entitlements: Arc<dyn EntitlementRepositoryTrait>) -> Self {
        Self { entitlements }
    }

    /// 根据事件同步窗口，不影响窗口的事件返回 `None`
    pub async fn sync(
        &self,
        order: &PayOrder,
        event: EventKind,
        transaction: Option<&TransactionInfo>,
        now: DateTime<Utc>,
    ) -> Result<Option<Entitlement>> {
        match event {
            EventKind::Renewed => {
                let grant = renewal_grant(order, transaction)?;
                let (entitlement, changed) =
                    self.entitlements.extend(&order.user_id, grant, now).await?;
                if changed {
                    metrics::record_entitlement_update("extended");
                    info!(
                        user_id = %order.user_id,
                        end = %grant.end,
                        "会员窗口已延长"
                    );
                } else {
                    metrics::record_entitlement_update("stale");
                    debug!(
                        user_id = %order.user_id,
                        stored_end = ?entitlement.vip_end_time,
                        "续订到期时间不晚于当前窗口，保持不变"
                    );
                }
                Ok(Some(entitlement))
            }
            EventKind::Refunded | EventKind::Expired => {
                let entitlement = self.entitlements.close(&order.user_id, now).await?;
                metrics::record_entitlement_update("closed");
                info!(user_id = %order.user_id, event_kind = %event, "会员窗口已关闭");
                Ok(Some(entitlement))
            }
            _ => Ok(None),
        }
    }
}

/// 续订窗口：套餐由商品类型决定，起止时间取自交易
fn renewal_grant(order: &PayOrder, transaction: Option<&TransactionInfo>) -> Result<WindowGrant> {
    let tx = transaction
        .ok_or_else(|| PayError::Validation("续订事件缺少交易信息".to_string()))?;
    let start = tx
        .purchased_at()
        .ok_or_else(|| PayError::Validation(format!("交易购买时间无效: {}", tx.purchase_date)))?;
    let end = tx
        .expires_at()
        .ok_or_else(|| PayError::Validation(format!("交易缺少过期时间: {}", tx.transaction_id)))?;

    Ok(WindowGrant {
        plan_type: order.goods_type.plan_type(),
        start,
        end,
    })
}
