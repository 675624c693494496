//! App Store 通知处理
//!
//! - `verifier`: 签名载荷验证与解码
//! - `classifier`: 通知到内部事件的映射
//! - `app_store_client`: App Store Server API 交易查询

pub mod app_store_client;
pub mod classifier;
pub mod verifier;

pub use app_store_client::{AppStoreServerClient, TransactionInfoClient};
pub use classifier::{classify, classify_notification};
pub use verifier::{AppStoreJwsVerifier, SignedPayloadVerifier};
