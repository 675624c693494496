//! 内存仓储
//!
//! 使用 DashMap 实现，语义与 PostgreSQL 实现一致（条件更新、单调延长、唯一键去重），
//! 适用于测试和本地联调。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::ensure_valid;
use super::traits::{
    EntitlementRepositoryTrait, OrderRepositoryTrait, ProcessedNotificationRepositoryTrait,
};
use crate::error::{PayError, Result};
use crate::models::{Entitlement, NewOrder, OrderStatus, PayOrder, TransitionPatch, WindowGrant};

/// 内存订单仓储
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<DashMap<String, PayOrder>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入订单（测试构造任意状态时使用）
    pub fn insert(&self, order: PayOrder) {
        self.orders.insert(order.order_id.clone(), order);
    }

    pub fn count(&self) -> usize {
        self.orders.len()
    }

    /// 按下单时间倒序筛选
    fn newest_first<F>(&self, predicate: F) -> Vec<PayOrder>
    where
        F: Fn(&PayOrder) -> bool,
    {
        let mut orders: Vec<PayOrder> = self
            .orders
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| {
            b.order_time
                .cmp(&a.order_time)
                .then_with(|| b.order_id.cmp(&a.order_id))
        });
        orders
    }
}

#[async_trait]
impl OrderRepositoryTrait for InMemoryOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<PayOrder> {
        ensure_valid(&order)?;
        let order = order.into_order(Uuid::now_v7().to_string(), Utc::now());
        self.orders.insert(order.order_id.clone(), order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, order_id: &str) -> Result<Option<PayOrder>> {
        Ok(self.orders.get(order_id).map(|o| o.clone()))
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<PayOrder>> {
        Ok(self
            .newest_first(|o| o.pay_transaction_id.as_deref() == Some(transaction_id))
            .into_iter()
            .next())
    }

    async fn apply_transition(
        &self,
        order_id: &str,
        expected: OrderStatus,
        patch: TransitionPatch,
    ) -> Result<PayOrder> {
        // 遍历须在 get_mut 之前完成，持有分片写锁时遍历会死锁
        if let Some(tx) = patch.pay_transaction_id.as_deref() {
            let taken = self.orders.iter().any(|entry| {
                entry.order_id != order_id && entry.pay_transaction_id.as_deref() == Some(tx)
            });
            if taken {
                return Err(PayError::Authentication(format!("交易已绑定其他订单: {}", tx)));
            }
        }

        // get_mut 持有分片写锁，比较与写入在同一临界区内完成
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| PayError::OrderNotFound(order_id.to_string()))?;

        if order.order_status != expected {
            return Err(PayError::Conflict(order_id.to_string()));
        }

        patch.apply_to(&mut order, Utc::now());
        Ok(order.clone())
    }

    async fn set_auto_renew(
        &self,
        order_id: &str,
        enabled: bool,
        changed_at: DateTime<Utc>,
    ) -> Result<PayOrder> {
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| PayError::OrderNotFound(order_id.to_string()))?;
        if order.auto_renew_changed_at.is_some_and(|last| last > changed_at) {
            return Ok(order.clone());
        }
        order.auto_renew = enabled;
        order.auto_renew_changed_at = Some(changed_at);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<PayOrder>, i64)> {
        let orders = self.newest_first(|o| o.user_id == user_id);
        let total = orders.len() as i64;
        let offset = ((page.max(1) - 1) * page_size).max(0) as usize;
        let items = orders
            .into_iter()
            .skip(offset)
            .take(page_size.max(0) as usize)
            .collect();
        Ok((items, total))
    }

    async fn latest_by_user(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Option<PayOrder>> {
        Ok(self
            .newest_first(|o| o.user_id == user_id && status.is_none_or(|s| o.order_status == s))
            .into_iter()
            .next())
    }
}

/// 内存会员窗口仓储
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntitlementRepository {
    windows: Arc<DashMap<String, Entitlement>>,
}

impl InMemoryEntitlementRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entitlement: Entitlement) {
        self.windows.insert(entitlement.user_id.clone(), entitlement);
    }
}

#[async_trait]
impl EntitlementRepositoryTrait for InMemoryEntitlementRepository {
    async fn find(&self, user_id: &str) -> Result<Option<Entitlement>> {
        Ok(self.windows.get(user_id).map(|e| e.clone()))
    }

    async fn extend(
        &self,
        user_id: &str,
        grant: WindowGrant,
        now: DateTime<Utc>,
    ) -> Result<(Entitlement, bool)> {
        let mut current = self
            .windows
            .entry(user_id.to_string())
            .or_insert_with(|| Entitlement::closed(user_id, now));

        match current.extended(&grant, now) {
            Some(next) => {
                *current = next.clone();
                Ok((next, true))
            }
            None => Ok((current.clone(), false)),
        }
    }

    async fn close(&self, user_id: &str, now: DateTime<Utc>) -> Result<Entitlement> {
        let mut current = self
            .windows
            .entry(user_id.to_string())
            .or_insert_with(|| Entitlement::closed(user_id, now));
        *current = current.closed_at(now);
        Ok(current.clone())
    }
}

/// 内存幂等账本
#[derive(Debug, Clone, Default)]
pub struct InMemoryProcessedRepository {
    ledger: Arc<DashMap<String, (String, String)>>,
}

impl InMemoryProcessedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.ledger.len()
    }
}

#[async_trait]
impl ProcessedNotificationRepositoryTrait for InMemoryProcessedRepository {
    async fn try_insert(
        &self,
        ledger_key: &str,
        notification_id: &str,
        event_kind: &str,
    ) -> Result<bool> {
        match self.ledger.entry(ledger_key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert((notification_id.to_string(), event_kind.to_string()));
                Ok(true)
            }
        }
    }

    async fn release(&self, ledger_key: &str) -> Result<()> {
        self.ledger.remove(ledger_key);
        Ok(())
    }

    async fn exists(&self, ledger_key: &str) -> Result<bool> {
        Ok(self.ledger.contains_key(ledger_key))
    }
}
