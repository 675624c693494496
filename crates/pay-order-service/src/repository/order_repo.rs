//! 支付订单仓储
//!
//! 状态变更统一走条件更新（WHERE order_status = 读取时观察到的状态），
//! 同一订单的并发写入只有一个能成功，失败方收到冲突错误后重读重试。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::ensure_valid;
use super::traits::OrderRepositoryTrait;
use crate::error::{PayError, Result};
use crate::models::{NewOrder, OrderStatus, PayOrder, TransitionPatch};

/// 支付订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, order_id: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pay_orders WHERE order_id = $1)")
                .bind(order_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn create(&self, order: NewOrder) -> Result<PayOrder> {
        ensure_valid(&order)?;

        let order = order.into_order(Uuid::now_v7().to_string(), Utc::now());

        let created = sqlx::query_as::<_, PayOrder>(
            r#"
            INSERT INTO pay_orders (
                order_id, user_id, goods_key, goods_name, goods_type,
                order_amount, order_discount, order_status, pay_transaction_status,
                auto_renew, order_time, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11, $11)
            RETURNING order_id, user_id, goods_key, goods_name, goods_type,
                      order_amount, order_discount, order_status, pay_transaction_status,
                      pay_transaction_id, pay_transaction_time, pay_time, auto_renew, auto_renew_changed_at,
                      order_time, created_at, updated_at
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.user_id)
        .bind(&order.goods_key)
        .bind(&order.goods_name)
        .bind(order.goods_type)
        .bind(order.order_amount)
        .bind(order.order_discount)
        .bind(order.order_status)
        .bind(order.pay_transaction_status)
        .bind(order.auto_renew)
        .bind(order.order_time)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find_by_id(&self, order_id: &str) -> Result<Option<PayOrder>> {
        let order = sqlx::query_as::<_, PayOrder>(
            r#"
            SELECT order_id, user_id, goods_key, goods_name, goods_type,
                   order_amount, order_discount, order_status, pay_transaction_status,
                   pay_transaction_id, pay_transaction_time, pay_time, auto_renew, auto_renew_changed_at,
                   order_time, created_at, updated_at
            FROM pay_orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<PayOrder>> {
        let order = sqlx::query_as::<_, PayOrder>(
            r#"
            SELECT order_id, user_id, goods_key, goods_name, goods_type,
                   order_amount, order_discount, order_status, pay_transaction_status,
                   pay_transaction_id, pay_transaction_time, pay_time, auto_renew, auto_renew_changed_at,
                   order_time, created_at, updated_at
            FROM pay_orders
            WHERE pay_transaction_id = $1
            ORDER BY order_time DESC
            LIMIT 1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn apply_transition(
        &self,
        order_id: &str,
        expected: OrderStatus,
        patch: TransitionPatch,
    ) -> Result<PayOrder> {
        let bound_transaction = patch.pay_transaction_id.clone();
        let updated = sqlx::query_as::<_, PayOrder>(
            r#"
            UPDATE pay_orders
            SET order_status = $3,
                pay_transaction_status = $4,
                pay_transaction_id = COALESCE($5, pay_transaction_id),
                pay_transaction_time = COALESCE($6, pay_transaction_time),
                pay_time = COALESCE($7, pay_time),
                updated_at = NOW()
            WHERE order_id = $1 AND order_status = $2
            RETURNING order_id, user_id, goods_key, goods_name, goods_type,
                      order_amount, order_discount, order_status, pay_transaction_status,
                      pay_transaction_id, pay_transaction_time, pay_time, auto_renew, auto_renew_changed_at,
                      order_time, created_at, updated_at
            "#,
        )
        .bind(order_id)
        .bind(expected)
        .bind(patch.order_status)
        .bind(patch.pay_transaction_status)
        .bind(patch.pay_transaction_id)
        .bind(patch.pay_transaction_time)
        .bind(patch.pay_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            // uq_pay_orders_transaction：交易已绑定其他订单
            sqlx::Error::Database(db) if db.is_unique_violation() => PayError::Authentication(
                format!("交易已绑定其他订单: {}", bound_transaction.unwrap_or_default()),
            ),
            other => PayError::Database(other),
        })?;

        match updated {
            Some(order) => Ok(order),
            None if self.exists(order_id).await? => Err(PayError::Conflict(order_id.to_string())),
            None => Err(PayError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn set_auto_renew(
        &self,
        order_id: &str,
        enabled: bool,
        changed_at: DateTime<Utc>,
    ) -> Result<PayOrder> {
        let updated = sqlx::query_as::<_, PayOrder>(
            r#"
            UPDATE pay_orders
            SET auto_renew = $2, auto_renew_changed_at = $3, updated_at = NOW()
            WHERE order_id = $1
              AND (auto_renew_changed_at IS NULL OR auto_renew_changed_at <= $3)
            RETURNING order_id, user_id, goods_key, goods_name, goods_type,
                      order_amount, order_discount, order_status, pay_transaction_status,
                      pay_transaction_id, pay_transaction_time, pay_time, auto_renew, auto_renew_changed_at,
                      order_time, created_at, updated_at
            "#,
        )
        .bind(order_id)
        .bind(enabled)
        .bind(changed_at)
        .fetch_optional(&self.pool)
        .await?;

        // 没有写入：订单不存在，或已有更新的标记变更
        match updated {
            Some(order) => Ok(order),
            None => self
                .find_by_id(order_id)
                .await?
                .ok_or_else(|| PayError::OrderNotFound(order_id.to_string())),
        }
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<PayOrder>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pay_orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let offset = (page.max(1) - 1) * page_size;
        let orders = sqlx::query_as::<_, PayOrder>(
            r#"
            SELECT order_id, user_id, goods_key, goods_name, goods_type,
                   order_amount, order_discount, order_status, pay_transaction_status,
                   pay_transaction_id, pay_transaction_time, pay_time, auto_renew, auto_renew_changed_at,
                   order_time, created_at, updated_at
            FROM pay_orders
            WHERE user_id = $1
            ORDER BY order_time DESC, order_id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((orders, total))
    }

    async fn latest_by_user(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Option<PayOrder>> {
        let order = sqlx::query_as::<_, PayOrder>(
            r#"
            SELECT order_id, user_id, goods_key, goods_name, goods_type,
                   order_amount, order_discount, order_status, pay_transaction_status,
                   pay_transaction_id, pay_transaction_time, pay_time, auto_renew, auto_renew_changed_at,
                   order_time, created_at, updated_at
            FROM pay_orders
            WHERE user_id = $1 AND ($2::varchar IS NULL OR order_status = $2)
            ORDER BY order_time DESC, order_id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }
}
