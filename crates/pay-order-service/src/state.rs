//! 应用状态定义
//!
//! 所有组件在进程启动时构建一次，通过 Arc 注入路由。

use std::sync::Arc;

use pay_shared::retry::RetryPolicy;

use crate::auth::SessionValidator;
use crate::catalog::GoodsCatalog;
use crate::notification::{SignedPayloadVerifier, TransactionInfoClient};
use crate::repository::{
    EntitlementRepositoryTrait, OrderRepositoryTrait, ProcessedNotificationRepositoryTrait,
};
use crate::service::{
    EntitlementSync, IdempotencyGuard, OrderService, ReconcileService, TransitionEngine,
};

/// 组装服务所需的外部依赖
pub struct Components {
    pub catalog: Arc<GoodsCatalog>,
    pub orders: Arc<dyn OrderRepositoryTrait>,
    pub entitlements: Arc<dyn EntitlementRepositoryTrait>,
    pub ledger: Arc<dyn ProcessedNotificationRepositoryTrait>,
    pub verifier: Arc<dyn SignedPayloadVerifier>,
    pub transactions: Arc<dyn TransactionInfoClient>,
    pub session_validator: Arc<dyn SessionValidator>,
    pub retry_policy: RetryPolicy,
}

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub order_service: Arc<OrderService>,
    pub reconcile_service: Arc<ReconcileService>,
    pub session_validator: Arc<dyn SessionValidator>,
}

impl AppState {
    pub fn new(
        order_service: Arc<OrderService>,
        reconcile_service: Arc<ReconcileService>,
        session_validator: Arc<dyn SessionValidator>,
    ) -> Self {
        Self {
            order_service,
            reconcile_service,
            session_validator,
        }
    }

    /// 由依赖构建服务层，迁移引擎在下单侧和对账侧共享
    pub fn build(components: Components) -> Self {
        let engine = Arc::new(TransitionEngine::new(components.orders.clone()));

        let order_service = Arc::new(OrderService::new(
            components.catalog,
            components.orders.clone(),
            components.entitlements.clone(),
            engine.clone(),
        ));

        let reconcile_service = Arc::new(ReconcileService::new(
            components.verifier,
            components.transactions,
            components.orders,
            engine,
            Arc::new(EntitlementSync::new(components.entitlements)),
            Arc::new(IdempotencyGuard::new(components.ledger)),
            components.retry_policy,
        ));

        Self::new(order_service, reconcile_service, components.session_validator)
    }
}
