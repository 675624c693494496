//! 通知幂等守卫
//!
//! 账本键由通知自身的签名 ID 与分类后的事件类型组成，同一笔交易的续订和后续退款
//! 不会互相误判为重放。记录在验签和分类之后、订单写入之前插入。

use std::sync::Arc;

use tracing::{error, warn};

use crate::error::Result;
use crate::models::EventKind;
use crate::repository::ProcessedNotificationRepositoryTrait;

/// 通知账本键
pub fn ledger_key(notification_id: &str, event: EventKind) -> String {
    format!("{}:{}", notification_id, event.as_str())
}

/// 客户端主动校验的账本键
///
/// 包含订单 ID：同一笔交易对另一个订单的校验不能被当作重放直接返回成功。
pub fn verify_ledger_key(order_id: &str, transaction_id: &str) -> String {
    format!(
        "verify:{}:{}:{}",
        order_id,
        transaction_id,
        EventKind::Renewed.as_str()
    )
}

pub struct IdempotencyGuard {
    ledger: Arc<dyn ProcessedNotificationRepositoryTrait>,
}

impl IdempotencyGuard {
    pub fn new(ledger: Arc<dyn ProcessedNotificationRepositoryTrait>) -> Self {
        Self { ledger }
    }

    /// 占用账本键，已被占用返回 false
    pub async fn acquire(&self, key: &str, notification_id: &str, event: EventKind) -> Result<bool> {
        let inserted = self
            .ledger
            .try_insert(key, notification_id, event.as_str())
            .await?;
        if !inserted {
            warn!(ledger_key = %key, "重复通知，跳过处理");
        }
        Ok(inserted)
    }

    /// 释放账本键，让重投的通知可以再次处理
    ///
    /// 释放失败只记录日志：调用方已经在返回错误的路径上。
    pub async fn release(&self, key: &str) {
        if let Err(e) = self.ledger.release(key).await {
            error!(ledger_key = %key, error = %e, "释放幂等账本记录失败");
        }
    }
}
