//! App Store 通知载荷模型
//!
//! 字段命名与 App Store Server Notifications V2 的 JSON 保持一致，时间均为毫秒时间戳。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知外层载荷（responseBodyV2DecodedPayload）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedNotification {
    pub notification_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(rename = "notificationUUID")]
    pub notification_uuid: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub signed_date: Option<i64>,
    #[serde(default)]
    pub data: Option<NotificationData>,
    /// 摘要通知（批量续订延期结果）才有该字段
    #[serde(default)]
    pub summary: Option<serde_json::Value>,
}

impl DecodedNotification {
    pub fn is_summary(&self) -> bool {
        self.summary.is_some() && self.data.is_none()
    }
}

/// 通知数据部分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub bundle_id: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub signed_transaction_info: Option<String>,
    #[serde(default)]
    pub signed_renewal_info: Option<String>,
}

/// 交易信息（JWSTransactionDecodedPayload）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub bundle_id: String,
    pub product_id: String,
    pub purchase_date: i64,
    #[serde(default)]
    pub expires_date: Option<i64>,
    #[serde(default)]
    pub revocation_date: Option<i64>,
    #[serde(default)]
    pub environment: Option<String>,
}

impl TransactionInfo {
    pub fn purchased_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.purchase_date)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_date.and_then(DateTime::from_timestamp_millis)
    }

    pub fn is_revoked(&self) -> bool {
        self.revocation_date.is_some()
    }
}

/// 通过验签的通知
///
/// 摘要通知和不携带交易的通知 `transaction` 为空。
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedNotification {
    pub notification: DecodedNotification,
    pub transaction: Option<TransactionInfo>,
}
