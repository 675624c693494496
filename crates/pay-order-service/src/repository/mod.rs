//! 数据访问层

pub mod entitlement_repo;
pub mod memory;
pub mod order_repo;
pub mod processed_repo;
pub mod traits;

pub use entitlement_repo::EntitlementRepository;
pub use memory::{InMemoryEntitlementRepository, InMemoryOrderRepository, InMemoryProcessedRepository};
pub use order_repo::OrderRepository;
pub use processed_repo::ProcessedNotificationRepository;
pub use traits::{
    EntitlementRepositoryTrait, OrderRepositoryTrait, ProcessedNotificationRepositoryTrait,
};
#[cfg(test)]
pub use traits::{
    MockEntitlementRepositoryTrait, MockOrderRepositoryTrait,
    MockProcessedNotificationRepositoryTrait,
};

use crate::error::{PayError, Result};
use crate::models::{NewOrder, validate_new_order};

/// 落库前的不变量检查，非法订单一律不写入
pub(crate) fn ensure_valid(order: &NewOrder) -> Result<()> {
    let result = validate_new_order(order);
    if result.valid {
        Ok(())
    } else {
        Err(PayError::Validation(result.message()))
    }
}
