//! 会员窗口仓储
//!
//! 延长操作在一条 UPSERT 中完成到期时间比较，迟到的续订不会覆盖更晚的到期时间。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::EntitlementRepositoryTrait;
use crate::error::Result;
use crate::models::{Entitlement, PlanType, VipStatus, WindowGrant};

/// 会员窗口仓储
pub struct EntitlementRepository {
    pool: PgPool,
}

impl EntitlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementRepositoryTrait for EntitlementRepository {
    async fn find(&self, user_id: &str) -> Result<Option<Entitlement>> {
        let entitlement = sqlx::query_as::<_, Entitlement>(
            r#"
            SELECT user_id, vip_status, vip_type, vip_start_time, vip_end_time, updated_at
            FROM user_vip
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entitlement)
    }

    async fn extend(
        &self,
        user_id: &str,
        grant: WindowGrant,
        now: DateTime<Utc>,
    ) -> Result<(Entitlement, bool)> {
        let updated = sqlx::query_as::<_, Entitlement>(
            r#"
            INSERT INTO user_vip (user_id, vip_status, vip_type, vip_start_time, vip_end_time, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE
            SET vip_status = EXCLUDED.vip_status,
                vip_type = EXCLUDED.vip_type,
                vip_start_time = EXCLUDED.vip_start_time,
                vip_end_time = EXCLUDED.vip_end_time,
                updated_at = EXCLUDED.updated_at
            WHERE user_vip.vip_end_time IS NULL
               OR user_vip.vip_end_time < EXCLUDED.vip_end_time
            RETURNING user_id, vip_status, vip_type, vip_start_time, vip_end_time, updated_at
            "#,
        )
        .bind(user_id)
        .bind(VipStatus::Open)
        .bind(grant.plan_type)
        .bind(grant.start)
        .bind(grant.end)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(entitlement) = updated {
            return Ok((entitlement, true));
        }

        // 未更新说明已存储的到期时间更晚，返回现状
        let current = self
            .find(user_id)
            .await?
            .unwrap_or_else(|| Entitlement::closed(user_id, now));
        Ok((current, false))
    }

    async fn close(&self, user_id: &str, now: DateTime<Utc>) -> Result<Entitlement> {
        let entitlement = sqlx::query_as::<_, Entitlement>(
            r#"
            INSERT INTO user_vip (user_id, vip_status, vip_type, vip_end_time, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET vip_status = EXCLUDED.vip_status,
                vip_type = EXCLUDED.vip_type,
                vip_end_time = EXCLUDED.vip_end_time,
                updated_at = EXCLUDED.updated_at
            RETURNING user_id, vip_status, vip_type, vip_start_time, vip_end_time, updated_at
            "#,
        )
        .bind(user_id)
        .bind(VipStatus::Closed)
        .bind(PlanType::None)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(entitlement)
    }
}
