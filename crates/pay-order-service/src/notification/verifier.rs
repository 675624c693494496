//! App Store 签名载荷验证
//!
//! 通知和交易信息都是 ES256 紧凑 JWS，头部 `x5c` 携带证书链 [叶子, 中间, 根]。
//! 验证步骤：
//! 1. 根证书必须与配置的信任根逐字节一致；
//! 2. 每张证书由下一张签发且在有效期内，中间证书和叶子证书带有 Apple 标记扩展；
//! 3. 用叶子证书公钥校验 JWS 签名；
//! 4. bundleId（以及通知环境）必须与配置一致。
//!
//! 任何一步失败都返回 `PayError::Authentication`，验证是纯函数，不读写存储。

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use pay_shared::config::AppStoreConfig;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use x509_parser::prelude::*;

use crate::error::{PayError, Result};
use crate::models::{DecodedNotification, TransactionInfo, VerifiedNotification};

/// 中间证书标记扩展（Apple Worldwide Developer Relations）
const INTERMEDIATE_MARKER_OID: &str = "1.2.840.113635.100.6.2.1";
/// 叶子证书标记扩展（App Store 收据签名）
const LEAF_MARKER_OID: &str = "1.2.840.113635.100.6.11.1";

const SANDBOX_ENVIRONMENT: &str = "Sandbox";

/// 签名载荷验证接口
#[cfg_attr(test, mockall::automock)]
pub trait SignedPayloadVerifier: Send + Sync {
    /// 验证并解码通知，非摘要通知同时解码其中的交易信息
    fn verify_notification(&self, signed_payload: &str) -> Result<VerifiedNotification>;

    /// 验证并解码交易信息，交易所属环境必须被接受
    fn verify_transaction(&self, signed_transaction: &str) -> Result<TransactionInfo>;

    /// 是否接受沙盒环境的交易
    fn accepts_sandbox(&self) -> bool;
}

/// 基于 x5c 证书链的 JWS 验证器
#[derive(Clone)]
pub struct AppStoreJwsVerifier {
    bundle_id: String,
    environment: String,
    accept_sandbox: bool,
    trusted_roots: Vec<Vec<u8>>,
}

impl AppStoreJwsVerifier {
    pub fn new(
        bundle_id: impl Into<String>,
        environment: impl Into<String>,
        accept_sandbox: bool,
        trusted_roots: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            environment: environment.into(),
            accept_sandbox,
            trusted_roots,
        }
    }

    /// 由配置构建，信任根为 base64 编码的 DER
    pub fn from_config(config: &AppStoreConfig) -> Result<Self> {
        let trusted_roots = config
            .trusted_roots
            .iter()
            .map(|root| {
                STANDARD
                    .decode(root.trim())
                    .map_err(|e| PayError::Internal(format!("信任根证书不是合法的 base64: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(
            config.bundle_id.clone(),
            config.environment.clone(),
            config.accept_sandbox,
            trusted_roots,
        ))
    }

    /// 校验 JWS 并反序列化载荷
    fn verify_jws<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let header = decode_header(token).map_err(|e| auth_error(format!("JWS 头部无效: {}", e)))?;
        if header.alg != Algorithm::ES256 {
            return Err(auth_error(format!("不支持的签名算法: {:?}", header.alg)));
        }

        let chain = header
            .x5c
            .ok_or_else(|| auth_error("缺少 x5c 证书链"))?;
        let leaf_key = self.verify_chain(&chain)?;

        let mut validation = Validation::new(Algorithm::ES256);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = decode::<T>(token, &leaf_key, &validation)
            .map_err(|e| auth_error(format!("JWS 签名校验失败: {}", e)))?;

        Ok(data.claims)
    }

    /// 校验证书链，返回叶子证书公钥
    fn verify_chain(&self, chain: &[String]) -> Result<DecodingKey> {
        if chain.len() != 3 {
            return Err(auth_error(format!("证书链长度应为 3，实际 {}", chain.len())));
        }

        let ders = chain
            .iter()
            .map(|c| {
                STANDARD
                    .decode(c)
                    .map_err(|e| auth_error(format!("证书不是合法的 base64: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        if !self.trusted_roots.iter().any(|root| root == &ders[2]) {
            return Err(auth_error("根证书不受信任"));
        }

        let certs = ders
            .iter()
            .map(|der| {
                X509Certificate::from_der(der)
                    .map(|(_, cert)| cert)
                    .map_err(|e| auth_error(format!("证书解析失败: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let (leaf, intermediate, root) = (&certs[0], &certs[1], &certs[2]);

        for cert in &certs {
            if !cert.validity().is_valid() {
                return Err(auth_error(format!("证书不在有效期内: {}", cert.subject())));
            }
        }

        leaf.verify_signature(Some(intermediate.public_key()))
            .map_err(|e| auth_error(format!("叶子证书签名无效: {}", e)))?;
        intermediate
            .verify_signature(Some(root.public_key()))
            .map_err(|e| auth_error(format!("中间证书签名无效: {}", e)))?;

        if !has_extension(intermediate, INTERMEDIATE_MARKER_OID) {
            return Err(auth_error("中间证书缺少标记扩展"));
        }
        if !has_extension(leaf, LEAF_MARKER_OID) {
            return Err(auth_error("叶子证书缺少标记扩展"));
        }

        Ok(DecodingKey::from_ec_der(
            leaf.public_key().subject_public_key.data.as_ref(),
        ))
    }

    fn check_bundle_id(&self, bundle_id: &str) -> Result<()> {
        if bundle_id != self.bundle_id {
            return Err(auth_error(format!("bundleId 不匹配: {}", bundle_id)));
        }
        Ok(())
    }

    fn check_environment(&self, environment: Option<&str>) -> Result<()> {
        match environment {
            None => Ok(()),
            Some(env) if env == self.environment => Ok(()),
            Some(SANDBOX_ENVIRONMENT) if self.accept_sandbox => Ok(()),
            Some(env) => Err(auth_error(format!("环境不匹配: {}", env))),
        }
    }
}

impl SignedPayloadVerifier for AppStoreJwsVerifier {
    fn verify_notification(&self, signed_payload: &str) -> Result<VerifiedNotification> {
        let notification: DecodedNotification = self.verify_jws(signed_payload)?;

        // 摘要通知不携带交易，不做嵌套解码
        if notification.is_summary() {
            return Ok(VerifiedNotification {
                notification,
                transaction: None,
            });
        }

        let transaction = match &notification.data {
            Some(data) => {
                self.check_bundle_id(&data.bundle_id)?;
                self.check_environment(data.environment.as_deref())?;
                match &data.signed_transaction_info {
                    Some(signed) => Some(self.verify_transaction(signed)?),
                    None => None,
                }
            }
            None => None,
        };

        Ok(VerifiedNotification {
            notification,
            transaction,
        })
    }

    fn verify_transaction(&self, signed_transaction: &str) -> Result<TransactionInfo> {
        let transaction: TransactionInfo = self.verify_jws(signed_transaction)?;
        self.check_bundle_id(&transaction.bundle_id)?;
        self.check_environment(transaction.environment.as_deref())?;
        Ok(transaction)
    }

    fn accepts_sandbox(&self) -> bool {
        self.accept_sandbox
    }
}

fn has_extension(cert: &X509Certificate<'_>, oid: &str) -> bool {
    cert.extensions()
        .iter()
        .any(|ext| ext.oid.to_id_string() == oid)
}

fn auth_error(message: impl Into<String>) -> PayError {
    PayError::Authentication(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};

    const ROOT: &str = include_str!("../../tests/fixtures/root.b64");
    const INTERMEDIATE: &str = include_str!("../../tests/fixtures/intermediate.b64");
    const LEAF: &str = include_str!("../../tests/fixtures/leaf.b64");
    const LEAF_KEY: &str = include_str!("../../tests/fixtures/leaf.key.pem");
    const ROGUE_ROOT: &str = include_str!("../../tests/fixtures/rogue_root.b64");
    const ROGUE_LEAF: &str = include_str!("../../tests/fixtures/rogue_leaf.b64");
    const ROGUE_LEAF_KEY: &str = include_str!("../../tests/fixtures/rogue_leaf.key.pem");

    const BUNDLE_ID: &str = "com.example.app";

    fn verifier() -> AppStoreJwsVerifier {
        AppStoreJwsVerifier::new(
            BUNDLE_ID,
            "Production",
            false,
            vec![STANDARD.decode(ROOT.trim()).unwrap()],
        )
    }

    fn sign(claims: &Value, chain: &[&str], key_pem: &str) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.x5c = Some(chain.iter().map(|c| c.trim().to_string()).collect());
        let key = EncodingKey::from_ec_pem(key_pem.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    fn transaction_claims(bundle_id: &str) -> Value {
        transaction_claims_in(bundle_id, "Production")
    }

    fn transaction_claims_in(bundle_id: &str, environment: &str) -> Value {
        json!({
            "transactionId": "2000000002",
            "originalTransactionId": "2000000001",
            "bundleId": bundle_id,
            "productId": "vip.monthly",
            "purchaseDate": 1_760_000_000_000_i64,
            "expiresDate": 1_762_592_000_000_i64,
            "environment": environment
        })
    }

    fn valid_chain() -> [&'static str; 3] {
        [LEAF, INTERMEDIATE, ROOT]
    }

    #[test]
    fn test_verify_transaction_ok() {
        let token = sign(&transaction_claims(BUNDLE_ID), &valid_chain(), LEAF_KEY);
        let tx = verifier().verify_transaction(&token).unwrap();
        assert_eq!(tx.original_transaction_id, "2000000001");
        assert_eq!(tx.expires_date, Some(1_762_592_000_000));
    }

    #[test]
    fn test_verify_notification_with_nested_transaction() {
        let signed_tx = sign(&transaction_claims(BUNDLE_ID), &valid_chain(), LEAF_KEY);
        let claims = json!({
            "notificationType": "DID_RENEW",
            "notificationUUID": "n-1",
            "data": {
                "bundleId": BUNDLE_ID,
                "environment": "Production",
                "signedTransactionInfo": signed_tx
            }
        });
        let token = sign(&claims, &valid_chain(), LEAF_KEY);

        let verified = verifier().verify_notification(&token).unwrap();
        assert_eq!(verified.notification.notification_type, "DID_RENEW");
        assert_eq!(
            verified.transaction.unwrap().transaction_id,
            "2000000002"
        );
    }

    #[test]
    fn test_summary_notification_skips_nested_decode() {
        let claims = json!({
            "notificationType": "RENEWAL_EXTENSION",
            "subtype": "SUMMARY",
            "notificationUUID": "n-2",
            "summary": { "succeededCount": 3 }
        });
        let token = sign(&claims, &valid_chain(), LEAF_KEY);
        let verified = verifier().verify_notification(&token).unwrap();
        assert!(verified.transaction.is_none());
    }

    #[test]
    fn test_untrusted_root_rejected() {
        let token = sign(
            &transaction_claims(BUNDLE_ID),
            &[ROGUE_LEAF, INTERMEDIATE, ROGUE_ROOT],
            ROGUE_LEAF_KEY,
        );
        let result = verifier().verify_transaction(&token);
        assert!(matches!(result, Err(PayError::Authentication(m)) if m.contains("根证书")));
    }

    #[test]
    fn test_forged_leaf_in_trusted_chain_rejected() {
        // 自签叶子冒充链中的叶子：中间证书不是它的签发者
        let token = sign(
            &transaction_claims(BUNDLE_ID),
            &[ROGUE_LEAF, INTERMEDIATE, ROOT],
            ROGUE_LEAF_KEY,
        );
        let result = verifier().verify_transaction(&token);
        assert!(matches!(result, Err(PayError::Authentication(m)) if m.contains("叶子证书签名")));
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        // 证书链合法，但 JWS 由另一把私钥签名
        let token = sign(&transaction_claims(BUNDLE_ID), &valid_chain(), ROGUE_LEAF_KEY);
        let result = verifier().verify_transaction(&token);
        assert!(matches!(result, Err(PayError::Authentication(m)) if m.contains("JWS 签名")));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = sign(&transaction_claims(BUNDLE_ID), &valid_chain(), LEAF_KEY);
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let forged = transaction_claims(BUNDLE_ID)
            .as_object()
            .cloned()
            .map(|mut m| {
                m.insert("expiresDate".into(), json!(4_102_444_800_000_i64));
                Value::Object(m)
            })
            .unwrap();
        parts[1] = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::to_vec(&forged).unwrap());

        let result = verifier().verify_transaction(&parts.join("."));
        assert!(matches!(result, Err(PayError::Authentication(_))));
    }

    #[test]
    fn test_short_chain_rejected() {
        let token = sign(&transaction_claims(BUNDLE_ID), &[LEAF, ROOT], LEAF_KEY);
        let result = verifier().verify_transaction(&token);
        assert!(matches!(result, Err(PayError::Authentication(m)) if m.contains("证书链长度")));
    }

    #[test]
    fn test_bundle_id_mismatch_rejected() {
        let token = sign(&transaction_claims("com.other.app"), &valid_chain(), LEAF_KEY);
        let result = verifier().verify_transaction(&token);
        assert!(matches!(result, Err(PayError::Authentication(m)) if m.contains("bundleId")));
    }

    #[test]
    fn test_malformed_token_rejected() {
        let result = verifier().verify_notification("not-a-jws");
        assert!(matches!(result, Err(PayError::Authentication(_))));
    }

    #[test]
    fn test_sandbox_environment_policy() {
        let strict = verifier();
        assert!(strict.check_environment(Some("Sandbox")).is_err());
        assert!(strict.check_environment(Some("Production")).is_ok());
        assert!(strict.check_environment(None).is_ok());

        let lenient = AppStoreJwsVerifier::new(BUNDLE_ID, "Production", true, vec![]);
        assert!(lenient.check_environment(Some("Sandbox")).is_ok());
    }

    #[test]
    fn test_sandbox_transaction_rejected_in_production() {
        let token = sign(
            &transaction_claims_in(BUNDLE_ID, "Sandbox"),
            &valid_chain(),
            LEAF_KEY,
        );

        let strict = verifier();
        assert!(!strict.accepts_sandbox());
        assert!(matches!(
            strict.verify_transaction(&token),
            Err(PayError::Authentication(_))
        ));

        let lenient = AppStoreJwsVerifier::new(
            BUNDLE_ID,
            "Production",
            true,
            vec![STANDARD.decode(ROOT.trim()).unwrap()],
        );
        assert!(lenient.accepts_sandbox());
        let tx = lenient.verify_transaction(&token).unwrap();
        assert_eq!(tx.environment.as_deref(), Some("Sandbox"));
    }

    #[test]
    fn test_nested_sandbox_transaction_rejected() {
        // 通知外层声明生产环境，内层交易来自沙盒
        let signed_tx = sign(
            &transaction_claims_in(BUNDLE_ID, "Sandbox"),
            &valid_chain(),
            LEAF_KEY,
        );
        let claims = json!({
            "notificationType": "DID_RENEW",
            "notificationUUID": "n-sandbox",
            "data": {
                "bundleId": BUNDLE_ID,
                "environment": "Production",
                "signedTransactionInfo": signed_tx
            }
        });
        let token = sign(&claims, &valid_chain(), LEAF_KEY);

        assert!(matches!(
            verifier().verify_notification(&token),
            Err(PayError::Authentication(_))
        ));
    }

    #[test]
    fn test_from_config_rejects_bad_root() {
        let config = AppStoreConfig {
            trusted_roots: vec!["***".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            AppStoreJwsVerifier::from_config(&config),
            Err(PayError::Internal(_))
        ));
    }
}
