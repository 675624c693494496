//! App Store Server API 客户端
//!
//! 客户端主动校验支付时，按交易 ID 拉取签名交易信息。请求使用 ES256 签名的
//! 短期 Bearer Token，Token 在有效期内复用。

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use parking_lot::Mutex;
use pay_shared::config::AppStoreConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{PayError, Result};

const AUDIENCE: &str = "appstoreconnect-v1";
/// Token 有效期（App Store 要求不超过 60 分钟）
const TOKEN_TTL_SECS: i64 = 20 * 60;
/// 距过期不足该时长时重新签发
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// 交易信息查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionInfoClient: Send + Sync {
    /// 查询交易，返回签名交易信息（JWS）
    async fn get_transaction_info(&self, transaction_id: &str, sandbox: bool) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ApiClaims<'a> {
    iss: &'a str,
    iat: i64,
    exp: i64,
    aud: &'a str,
    bid: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionInfoResponse {
    signed_transaction_info: String,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

/// 基于 reqwest 的 App Store Server API 客户端
pub struct AppStoreServerClient {
    http: reqwest::Client,
    issuer_id: String,
    key_id: String,
    bundle_id: String,
    /// 未配置私钥时为空，查询交易直接失败
    signing_key: Option<EncodingKey>,
    production_base_url: String,
    sandbox_base_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl AppStoreServerClient {
    pub fn from_config(config: &AppStoreConfig) -> Result<Self> {
        let signing_key = if config.private_key.trim().is_empty() {
            None
        } else {
            Some(
                EncodingKey::from_ec_pem(config.private_key.as_bytes())
                    .map_err(|e| PayError::Internal(format!("App Store API 私钥无效: {}", e)))?,
            )
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| PayError::Internal(format!("HTTP 客户端初始化失败: {}", e)))?;

        Ok(Self {
            http,
            issuer_id: config.issuer_id.clone(),
            key_id: config.key_id.clone(),
            bundle_id: config.bundle_id.clone(),
            signing_key,
            production_base_url: config.production_base_url.trim_end_matches('/').to_string(),
            sandbox_base_url: config.sandbox_base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    fn base_url(&self, sandbox: bool) -> &str {
        if sandbox {
            &self.sandbox_base_url
        } else {
            &self.production_base_url
        }
    }

    /// 获取 Bearer Token，缓存未过期时直接复用
    fn bearer_token(&self) -> Result<String> {
        let signing_key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| PayError::Internal("未配置 App Store API 私钥".to_string()))?;
        let now = Utc::now().timestamp();
        let mut cached = self.token.lock();

        if let Some(token) = cached
            .as_ref()
            .filter(|t| t.expires_at - TOKEN_REFRESH_MARGIN_SECS > now)
        {
            return Ok(token.token.clone());
        }

        let claims = ApiClaims {
            iss: &self.issuer_id,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
            aud: AUDIENCE,
            bid: &self.bundle_id,
        };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        let token = encode(&header, &claims, signing_key)
            .map_err(|e| PayError::Internal(format!("App Store API Token 签发失败: {}", e)))?;

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: claims.exp,
        });
        debug!("App Store API Token 已刷新");
        Ok(token)
    }
}

#[async_trait]
impl TransactionInfoClient for AppStoreServerClient {
    #[instrument(skip(self))]
    async fn get_transaction_info(&self, transaction_id: &str, sandbox: bool) -> Result<String> {
        let url = format!(
            "{}/inApps/v1/transactions/{}",
            self.base_url(sandbox),
            transaction_id
        );
        let token = self.bearer_token()?;

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PayError::Transient(format!("App Store API 请求失败: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PayError::Authentication(format!(
                "交易不存在: {}",
                transaction_id
            )));
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(status = %status, "App Store API 暂不可用");
            return Err(PayError::Transient(format!("App Store API 返回 {}", status)));
        }
        if !status.is_success() {
            return Err(PayError::Authentication(format!(
                "App Store API 拒绝请求: {}",
                status
            )));
        }

        let body: TransactionInfoResponse = response
            .json()
            .await
            .map_err(|e| PayError::Transient(format!("App Store API 响应解析失败: {}", e)))?;

        Ok(body.signed_transaction_info)
    }
}
