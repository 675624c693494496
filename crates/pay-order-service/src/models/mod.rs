//! 领域模型

pub mod entitlement;
pub mod enums;
pub mod notification;
pub mod order;
pub mod validation;

pub use entitlement::{Entitlement, WindowGrant};
pub use enums::{EventKind, GoodsType, OrderStatus, PlanType, VipStatus};
pub use notification::{DecodedNotification, NotificationData, TransactionInfo, VerifiedNotification};
pub use order::{NewOrder, PayOrder, TransitionPatch, validate_new_order};
pub use validation::ValidationResult;
