//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现：生产环境使用 PostgreSQL 实现，测试使用内存实现或 mock。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Entitlement, NewOrder, OrderStatus, PayOrder, TransitionPatch, WindowGrant};

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 持久化新订单（UNPAID），返回带 ID 的订单
    async fn create(&self, order: NewOrder) -> Result<PayOrder>;

    async fn find_by_id(&self, order_id: &str) -> Result<Option<PayOrder>>;

    /// 按外部交易 ID 查询
    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<PayOrder>>;

    /// 条件更新
    ///
    /// 仅当订单当前状态仍为 `expected` 时写入补丁，否则返回 `PayError::Conflict`；
    /// 订单不存在返回 `PayError::OrderNotFound`；补丁中的交易 ID 已绑定其他订单时
    /// 返回 `PayError::Authentication`。
    async fn apply_transition(
        &self,
        order_id: &str,
        expected: OrderStatus,
        patch: TransitionPatch,
    ) -> Result<PayOrder>;

    /// 更新自动续订标记（唯一不经过状态迁移的写操作）
    ///
    /// 只有 `changed_at` 不早于已记录的变更时间才写入，否则原样返回订单。
    async fn set_auto_renew(
        &self,
        order_id: &str,
        enabled: bool,
        changed_at: DateTime<Utc>,
    ) -> Result<PayOrder>;

    /// 分页查询用户订单（按下单时间倒序），返回 (当页数据, 总数)
    async fn list_by_user(
        &self,
        user_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<PayOrder>, i64)>;

    /// 用户最近一笔订单，可按状态过滤
    async fn latest_by_user(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Option<PayOrder>>;
}

/// 会员窗口仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntitlementRepositoryTrait: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<Entitlement>>;

    /// 按续订窗口延长（到期时间单调不减），返回最新窗口和是否发生变化
    async fn extend(
        &self,
        user_id: &str,
        grant: WindowGrant,
        now: DateTime<Utc>,
    ) -> Result<(Entitlement, bool)>;

    /// 立即关闭窗口
    async fn close(&self, user_id: &str, now: DateTime<Utc>) -> Result<Entitlement>;
}

/// 通知幂等账本接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessedNotificationRepositoryTrait: Send + Sync {
    /// 插入账本记录，主键冲突返回 false（表示已处理过）
    async fn try_insert(&self, ledger_key: &str, notification_id: &str, event_kind: &str)
    -> Result<bool>;

    /// 释放账本记录，使后续重投可以再次处理
    async fn release(&self, ledger_key: &str) -> Result<()>;

    async fn exists(&self, ledger_key: &str) -> Result<bool>;
}
