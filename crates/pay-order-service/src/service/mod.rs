//! 服务层
//!
//! ## 模块结构
//!
//! - `dto`: 请求与响应
//! - `transition`: 订单状态迁移引擎
//! - `entitlement_sync`: 会员窗口同步
//! - `idempotency`: 通知幂等守卫
//! - `order_service`: 下单、取消、查询
//! - `reconcile_service`: 通知对账与客户端支付校验

pub mod dto;
pub mod entitlement_sync;
pub mod idempotency;
pub mod order_service;
pub mod reconcile_service;
pub mod transition;

pub use dto::*;
pub use entitlement_sync::EntitlementSync;
pub use idempotency::IdempotencyGuard;
pub use order_service::OrderService;
pub use reconcile_service::ReconcileService;
pub use transition::TransitionEngine;
