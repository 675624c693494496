//! 订单对账服务
//!
//! 处理 App Store 通知和客户端主动校验，两条路径共用同一条流水线：
//!
//! 1. 验签解码 -> 2. 分类 -> 3. 幂等账本占位 -> 4. 读取订单并迁移状态
//!    -> 5. 同步会员窗口
//!
//! 第 4、5 步遇到并发冲突时按重试策略整体重跑（分类结果确定，直接复用）。
//! 瞬时错误会释放账本记录并向上返回，回调接口据此返回 5xx 让 App Store 重投；
//! 其余结果（验签失败、订单不存在、非法迁移）一律确认收到。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pay_shared::observability::metrics;
use pay_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{info, instrument, warn};

use crate::error::{PayError, Result};
use crate::models::{EventKind, PayOrder, TransactionInfo};
use crate::notification::{SignedPayloadVerifier, TransactionInfoClient, classify_notification};
use crate::repository::OrderRepositoryTrait;
use crate::service::dto::{NotificationOutcome, VerifyPaymentRequest, VerifyPaymentResponse};
use crate::service::entitlement_sync::EntitlementSync;
use crate::service::idempotency::{IdempotencyGuard, ledger_key, verify_ledger_key};
use crate::service::transition::TransitionEngine;

/// 事件对应订单的定位方式
#[derive(Debug, Clone)]
enum OrderLocator {
    /// 通知按原始交易 ID 定位
    TransactionId(String),
    /// 客户端校验按订单 ID 定位
    OrderId(String),
}

pub struct ReconcileService {
    verifier: Arc<dyn SignedPayloadVerifier>,
    transactions: Arc<dyn TransactionInfoClient>,
    orders: Arc<dyn OrderRepositoryTrait>,
    engine: Arc<TransitionEngine>,
    entitlement_sync: Arc<EntitlementSync>,
    guard: Arc<IdempotencyGuard>,
    retry_policy: RetryPolicy,
}

impl ReconcileService {
    pub fn new(
        verifier: Arc<dyn SignedPayloadVerifier>,
        transactions: Arc<dyn TransactionInfoClient>,
        orders: Arc<dyn OrderRepositoryTrait>,
        engine: Arc<TransitionEngine>,
        entitlement_sync: Arc<EntitlementSync>,
        guard: Arc<IdempotencyGuard>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            verifier,
            transactions,
            orders,
            engine,
            entitlement_sync,
            guard,
            retry_policy,
        }
    }

    /// 处理 App Store 服务端通知
    ///
    /// 返回 `Err` 只代表瞬时故障，调用方应返回非 2xx 触发重投。
    #[instrument(skip(self, signed_payload))]
    pub async fn handle_notification(&self, signed_payload: &str) -> Result<NotificationOutcome> {
        let outcome = self.process_notification(signed_payload).await;
        match &outcome {
            Ok(o) => metrics::record_notification(o.as_str()),
            Err(_) => metrics::record_notification("transient"),
        }
        outcome
    }

    async fn process_notification(&self, signed_payload: &str) -> Result<NotificationOutcome> {
        let verified = match self.verifier.verify_notification(signed_payload) {
            Ok(verified) => verified,
            Err(e @ PayError::Authentication(_)) => {
                warn!(security_event = true, error = %e, "通知验签失败，已拒绝");
                return Ok(NotificationOutcome::Rejected);
            }
            Err(e) => return Err(e),
        };

        let notification = &verified.notification;
        let event = classify_notification(notification);
        let notification_id = notification.notification_uuid.as_str();

        let transaction = match (event, verified.transaction.as_ref()) {
            (EventKind::Ignored, _) | (_, None) => {
                info!(
                    notification_id,
                    notification_type = %notification.notification_type,
                    subtype = ?notification.subtype,
                    "通知无需处理"
                );
                return Ok(NotificationOutcome::Ignored);
            }
            (_, Some(tx)) => tx,
        };

        let key = ledger_key(notification_id, event);
        if !self.guard.acquire(&key, notification_id, event).await? {
            return Ok(NotificationOutcome::Duplicate);
        }

        // 自动续订标记按通知签发时间排序，缺失时以接收时间为准
        let occurred_at = notification
            .signed_date
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        let locator = OrderLocator::TransactionId(transaction.original_transaction_id.clone());
        match self
            .apply_with_retry(&locator, event, transaction, occurred_at)
            .await
        {
            Ok(order) => {
                info!(
                    notification_id,
                    order_id = %order.order_id,
                    event_kind = %event,
                    "通知处理完成"
                );
                Ok(NotificationOutcome::Processed)
            }
            Err(e) if e.is_transient() => {
                self.guard.release(&key).await;
                Err(e)
            }
            Err(PayError::OrderNotFound(_)) => {
                warn!(
                    notification_id,
                    transaction_id = %transaction.original_transaction_id,
                    event_kind = %event,
                    "通知对应的订单不存在"
                );
                Ok(NotificationOutcome::NotFound)
            }
            Err(PayError::InvalidTransition { .. }) => Ok(NotificationOutcome::InvalidTransition),
            Err(e) => {
                warn!(notification_id, event_kind = %event, error = %e, "通知处理被拒绝");
                Ok(NotificationOutcome::Rejected)
            }
        }
    }

    /// 客户端主动校验支付
    ///
    /// 从 App Store Server API 拉取交易并验签，按订单 ID 应用续订事件，返回会员到期时间。
    #[instrument(skip(self, request), fields(user_id = %user_id, order_id = %request.order_id, transaction_id = %request.transaction_id))]
    pub async fn verify_payment(
        &self,
        user_id: &str,
        request: VerifyPaymentRequest,
    ) -> Result<VerifyPaymentResponse> {
        let order = self
            .orders
            .find_by_id(&request.order_id)
            .await?
            .ok_or_else(|| PayError::OrderNotFound(request.order_id.clone()))?;
        if !order.is_owned_by(user_id) {
            return Err(PayError::Forbidden("无权操作该订单".to_string()));
        }
        if request.sandbox && !self.verifier.accepts_sandbox() {
            warn!(security_event = true, "未开放沙盒环境，拒绝校验");
            return Err(PayError::Authentication("不接受沙盒环境的交易".to_string()));
        }

        let signed = self
            .transactions
            .get_transaction_info(&request.transaction_id, request.sandbox)
            .await?;
        let transaction = match self.verifier.verify_transaction(&signed) {
            Ok(tx) => tx,
            Err(e) => {
                warn!(security_event = true, error = %e, "交易验签失败");
                return Err(e);
            }
        };
        check_transaction(&order, &request, &transaction)?;
        self.ensure_not_bound_elsewhere(&order, &transaction).await?;

        let expires_date = transaction.expires_date.ok_or_else(|| {
            PayError::Validation(format!("交易缺少过期时间: {}", transaction.transaction_id))
        })?;
        let response = VerifyPaymentResponse {
            order_id: order.order_id.clone(),
            expires_date,
        };

        let key = verify_ledger_key(&order.order_id, &request.transaction_id);
        if !self
            .guard
            .acquire(&key, &request.transaction_id, EventKind::Renewed)
            .await?
        {
            return Ok(response);
        }

        let locator = OrderLocator::OrderId(order.order_id.clone());
        match self
            .apply_with_retry(&locator, EventKind::Renewed, &transaction, Utc::now())
            .await
        {
            Ok(_) => {
                info!(expires_date, "支付校验完成");
                Ok(response)
            }
            Err(e) => {
                // 失败的校验不占用账本，客户端可以重试
                self.guard.release(&key).await;
                Err(e)
            }
        }
    }

    /// 原始交易已绑定到其他订单时拒绝，一笔订阅只能为一个订单付款
    async fn ensure_not_bound_elsewhere(
        &self,
        order: &PayOrder,
        transaction: &TransactionInfo,
    ) -> Result<()> {
        let original = &transaction.original_transaction_id;
        let bound = self.orders.find_by_transaction_id(original).await?;
        if let Some(other) = bound.filter(|b| b.order_id != order.order_id) {
            warn!(
                security_event = true,
                bound_order_id = %other.order_id,
                bound_user_id = %other.user_id,
                original_transaction_id = %original,
                "交易已绑定其他订单"
            );
            return Err(PayError::Authentication(format!(
                "交易已绑定其他订单: {}",
                original
            )));
        }
        Ok(())
    }

    /// 带冲突重试的读取 -> 迁移 -> 同步
    ///
    /// 重试耗尽后的冲突转为瞬时错误。
    async fn apply_with_retry(
        &self,
        locator: &OrderLocator,
        event: EventKind,
        transaction: &TransactionInfo,
        occurred_at: DateTime<Utc>,
    ) -> Result<PayOrder> {
        let is_retryable = |e: &PayError| {
            let conflict = e.is_conflict();
            if conflict {
                metrics::record_conflict_retry();
            }
            conflict
        };

        retry_with_policy(&self.retry_policy, "apply_event", is_retryable, || {
            self.apply_event(locator, event, transaction, occurred_at)
        })
        .await
        .map_err(|e| match e {
            PayError::Conflict(order_id) => {
                PayError::Transient(format!("订单并发冲突，重试已耗尽: {}", order_id))
            }
            other => other,
        })
    }

    #[instrument(skip(self, transaction), fields(event_kind = %event))]
    async fn apply_event(
        &self,
        locator: &OrderLocator,
        event: EventKind,
        transaction: &TransactionInfo,
        occurred_at: DateTime<Utc>,
    ) -> Result<PayOrder> {
        let order = match locator {
            OrderLocator::TransactionId(id) => self
                .orders
                .find_by_transaction_id(id)
                .await?
                .ok_or_else(|| PayError::OrderNotFound(id.clone()))?,
            OrderLocator::OrderId(id) => self
                .orders
                .find_by_id(id)
                .await?
                .ok_or_else(|| PayError::OrderNotFound(id.clone()))?,
        };

        let updated = self
            .engine
            .apply_at(&order, event, Some(transaction), occurred_at)
            .await?;
        self.entitlement_sync
            .sync(&updated, event, Some(transaction), Utc::now())
            .await?;

        Ok(updated)
    }
}

/// 交易必须属于请求的交易 ID，订单已绑定交易时必须是同一原始交易，且未被撤销
fn check_transaction(
    order: &PayOrder,
    request: &VerifyPaymentRequest,
    transaction: &TransactionInfo,
) -> Result<()> {
    if transaction.transaction_id != request.transaction_id {
        return Err(PayError::Authentication(format!(
            "交易 ID 不一致: {}",
            transaction.transaction_id
        )));
    }
    if transaction.is_revoked() {
        return Err(PayError::Authentication(format!(
            "交易已被撤销: {}",
            transaction.transaction_id
        )));
    }
    if order
        .pay_transaction_id
        .as_deref()
        .is_some_and(|bound| bound != transaction.original_transaction_id)
    {
        return Err(PayError::Authentication(format!(
            "交易与订单不匹配: {}",
            transaction.original_transaction_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecodedNotification, GoodsType, NewOrder, OrderStatus, VerifiedNotification};
    use crate::notification::app_store_client::MockTransactionInfoClient;
    use crate::notification::verifier::MockSignedPayloadVerifier;
    use crate::repository::{
        InMemoryEntitlementRepository, InMemoryOrderRepository, InMemoryProcessedRepository,
        MockEntitlementRepositoryTrait, MockOrderRepositoryTrait,
    };
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn paid_order() -> PayOrder {
        let mut order = NewOrder {
            user_id: "u1".to_string(),
            goods_key: "MONTHLY_FIRST".to_string(),
            goods_name: "月度会员首充优惠".to_string(),
            goods_type: GoodsType::Monthly,
            order_amount: 2900,
            order_discount: 1000,
        }
        .into_order("o1".to_string(), Utc::now());
        order.order_status = OrderStatus::Paid;
        order.pay_transaction_status = OrderStatus::Paid;
        order.pay_transaction_id = Some("otx-1".to_string());
        order
    }

    fn transaction() -> TransactionInfo {
        let now = Utc::now();
        TransactionInfo {
            transaction_id: "tx-2".to_string(),
            original_transaction_id: "otx-1".to_string(),
            bundle_id: "com.example.app".to_string(),
            product_id: "vip.monthly".to_string(),
            purchase_date: now.timestamp_millis(),
            expires_date: Some((now + ChronoDuration::days(30)).timestamp_millis()),
            revocation_date: None,
            environment: Some("Production".to_string()),
        }
    }

    fn notification(notification_type: &str) -> VerifiedNotification {
        VerifiedNotification {
            notification: DecodedNotification {
                notification_type: notification_type.to_string(),
                subtype: None,
                notification_uuid: "n-1".to_string(),
                version: Some("2.0".to_string()),
                signed_date: None,
                data: None,
                summary: None,
            },
            transaction: Some(transaction()),
        }
    }

    fn verifier_returning(verified: VerifiedNotification) -> MockSignedPayloadVerifier {
        let mut verifier = MockSignedPayloadVerifier::new();
        verifier
            .expect_verify_notification()
            .returning(move |_| Ok(verified.clone()));
        verifier
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::from_attempts(3, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn service(
        verifier: MockSignedPayloadVerifier,
        orders: Arc<dyn OrderRepositoryTrait>,
        entitlements: Arc<dyn crate::repository::EntitlementRepositoryTrait>,
        ledger: Arc<InMemoryProcessedRepository>,
    ) -> ReconcileService {
        ReconcileService::new(
            Arc::new(verifier),
            Arc::new(MockTransactionInfoClient::new()),
            orders.clone(),
            Arc::new(TransitionEngine::new(orders)),
            Arc::new(EntitlementSync::new(entitlements)),
            Arc::new(IdempotencyGuard::new(ledger)),
            policy(),
        )
    }

    #[tokio::test]
    async fn test_authentication_failure_is_acknowledged_without_side_effects() {
        let mut verifier = MockSignedPayloadVerifier::new();
        verifier
            .expect_verify_notification()
            .returning(|_| Err(PayError::Authentication("bad signature".to_string())));
        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_find_by_transaction_id().never();
        orders.expect_apply_transition().never();
        let ledger = Arc::new(InMemoryProcessedRepository::new());

        let svc = service(
            verifier,
            Arc::new(orders),
            Arc::new(InMemoryEntitlementRepository::new()),
            ledger.clone(),
        );
        let outcome = svc.handle_notification("forged").await.unwrap();

        assert_eq!(outcome, NotificationOutcome::Rejected);
        assert_eq!(ledger.count(), 0);
    }

    #[tokio::test]
    async fn test_transient_store_failure_releases_ledger() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_find_by_transaction_id()
            .returning(|_| Err(PayError::Transient("db down".to_string())));
        let ledger = Arc::new(InMemoryProcessedRepository::new());

        let svc = service(
            verifier_returning(notification("DID_RENEW")),
            Arc::new(orders),
            Arc::new(InMemoryEntitlementRepository::new()),
            ledger.clone(),
        );
        let result = svc.handle_notification("payload").await;

        assert!(matches!(result, Err(PayError::Transient(_))));
        assert_eq!(ledger.count(), 0, "瞬时失败后账本应释放，允许重投");
    }

    #[tokio::test]
    async fn test_conflict_is_retried_from_read() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_find_by_transaction_id()
            .times(2)
            .returning(|_| Ok(Some(paid_order())));
        let mut seq = mockall::Sequence::new();
        orders
            .expect_apply_transition()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|id, _, _| Err(PayError::Conflict(id.to_string())));
        orders
            .expect_apply_transition()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, patch| {
                let mut order = paid_order();
                patch.apply_to(&mut order, Utc::now());
                Ok(order)
            });

        let ledger = Arc::new(InMemoryProcessedRepository::new());
        let svc = service(
            verifier_returning(notification("DID_RENEW")),
            Arc::new(orders),
            Arc::new(InMemoryEntitlementRepository::new()),
            ledger.clone(),
        );

        let outcome = svc.handle_notification("payload").await.unwrap();
        assert_eq!(outcome, NotificationOutcome::Processed);
        assert_eq!(ledger.count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_conflict_becomes_transient() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_find_by_transaction_id()
            .times(3)
            .returning(|_| Ok(Some(paid_order())));
        orders
            .expect_apply_transition()
            .times(3)
            .returning(|id, _, _| Err(PayError::Conflict(id.to_string())));
        let mut entitlements = MockEntitlementRepositoryTrait::new();
        entitlements.expect_close().never();

        let ledger = Arc::new(InMemoryProcessedRepository::new());
        let svc = service(
            verifier_returning(notification("EXPIRED")),
            Arc::new(orders),
            Arc::new(entitlements),
            ledger.clone(),
        );

        let result = svc.handle_notification("payload").await;
        assert!(matches!(result, Err(PayError::Transient(_))));
        assert_eq!(ledger.count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_order_is_acknowledged() {
        let ledger = Arc::new(InMemoryProcessedRepository::new());
        let svc = service(
            verifier_returning(notification("REFUND")),
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(InMemoryEntitlementRepository::new()),
            ledger.clone(),
        );

        let outcome = svc.handle_notification("payload").await.unwrap();
        assert_eq!(outcome, NotificationOutcome::NotFound);
        assert_eq!(ledger.count(), 1);
    }

    #[tokio::test]
    async fn test_ignored_notification_skips_ledger() {
        let ledger = Arc::new(InMemoryProcessedRepository::new());
        let svc = service(
            verifier_returning(notification("PRICE_INCREASE")),
            Arc::new(MockOrderRepositoryTrait::new()),
            Arc::new(MockEntitlementRepositoryTrait::new()),
            ledger.clone(),
        );

        let outcome = svc.handle_notification("payload").await.unwrap();
        assert_eq!(outcome, NotificationOutcome::Ignored);
        assert_eq!(ledger.count(), 0);
    }

    #[tokio::test]
    async fn test_sandbox_request_rejected_before_lookup() {
        let mut verifier = MockSignedPayloadVerifier::new();
        verifier.expect_accepts_sandbox().return_const(false);
        verifier.expect_verify_transaction().never();

        let orders = Arc::new(InMemoryOrderRepository::new());
        let mut unpaid = paid_order();
        unpaid.order_status = OrderStatus::Unpaid;
        unpaid.pay_transaction_status = OrderStatus::Unpaid;
        unpaid.pay_transaction_id = None;
        orders.insert(unpaid);
        let ledger = Arc::new(InMemoryProcessedRepository::new());

        // 交易查询客户端没有设置期望，被调用即失败
        let svc = service(
            verifier,
            orders.clone(),
            Arc::new(InMemoryEntitlementRepository::new()),
            ledger.clone(),
        );
        let result = svc
            .verify_payment(
                "u1",
                VerifyPaymentRequest {
                    order_id: "o1".to_string(),
                    transaction_id: "tx-2".to_string(),
                    sandbox: true,
                },
            )
            .await;

        assert!(matches!(result, Err(PayError::Authentication(_))));
        let stored = orders.find_by_id("o1").await.unwrap().unwrap();
        assert_eq!(stored.order_status, OrderStatus::Unpaid);
        assert_eq!(ledger.count(), 0);
    }

    #[test]
    fn test_check_transaction_rules() {
        let order = paid_order();
        let request = VerifyPaymentRequest {
            order_id: "o1".to_string(),
            transaction_id: "tx-2".to_string(),
            sandbox: false,
        };
        assert!(check_transaction(&order, &request, &transaction()).is_ok());

        let mut revoked = transaction();
        revoked.revocation_date = Some(1);
        assert!(matches!(
            check_transaction(&order, &request, &revoked),
            Err(PayError::Authentication(_))
        ));

        let mut foreign = transaction();
        foreign.original_transaction_id = "otx-other".to_string();
        assert!(matches!(
            check_transaction(&order, &request, &foreign),
            Err(PayError::Authentication(_))
        ));

        let mut other_id = transaction();
        other_id.transaction_id = "tx-3".to_string();
        assert!(check_transaction(&order, &request, &other_id).is_err());
    }
}
