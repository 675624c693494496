//! 通知幂等账本仓储
//!
//! 依赖主键唯一约束实现去重：`ON CONFLICT DO NOTHING` 未插入即视为已处理。

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::ProcessedNotificationRepositoryTrait;
use crate::error::Result;

pub struct ProcessedNotificationRepository {
    pool: PgPool,
}

impl ProcessedNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedNotificationRepositoryTrait for ProcessedNotificationRepository {
    async fn try_insert(
        &self,
        ledger_key: &str,
        notification_id: &str,
        event_kind: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_notifications (ledger_key, notification_id, event_kind)
            VALUES ($1, $2, $3)
            ON CONFLICT (ledger_key) DO NOTHING
            "#,
        )
        .bind(ledger_key)
        .bind(notification_id)
        .bind(event_kind)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, ledger_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM processed_notifications WHERE ledger_key = $1")
            .bind(ledger_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists(&self, ledger_key: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_notifications WHERE ledger_key = $1)",
        )
        .bind(ledger_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
