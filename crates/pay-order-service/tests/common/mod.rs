//! 集成测试公共设施
//!
//! 使用内存仓储、真实的 JWS 验签器（测试证书链）和可编程的交易查询客户端组装完整应用。

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use pay_order::{
    AppState, Components, GoodsCatalog, PayError, Result,
    auth::{JwtSessionValidator, SessionClaims},
    models::{NewOrder, OrderStatus, PayOrder, TransitionPatch},
    notification::{AppStoreJwsVerifier, TransactionInfoClient},
    repository::{
        InMemoryEntitlementRepository, InMemoryOrderRepository, InMemoryProcessedRepository,
        OrderRepositoryTrait,
    },
};
use pay_shared::retry::RetryPolicy;
use serde_json::{Value, json};

pub const ROOT: &str = include_str!("../fixtures/root.b64");
pub const INTERMEDIATE: &str = include_str!("../fixtures/intermediate.b64");
pub const LEAF: &str = include_str!("../fixtures/leaf.b64");
pub const LEAF_KEY: &str = include_str!("../fixtures/leaf.key.pem");
pub const ROGUE_ROOT: &str = include_str!("../fixtures/rogue_root.b64");
pub const ROGUE_LEAF: &str = include_str!("../fixtures/rogue_leaf.b64");
pub const ROGUE_LEAF_KEY: &str = include_str!("../fixtures/rogue_leaf.key.pem");

pub const BUNDLE_ID: &str = "com.example.app";
pub const SESSION_SECRET: &str = "integration-test-secret";
pub const SESSION_ISSUER: &str = "auth-service";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

// ============================================================================
// 签名
// ============================================================================

/// 用测试证书链签名任意载荷
pub fn sign(claims: &Value) -> String {
    sign_with_chain(claims, &[LEAF, INTERMEDIATE, ROOT], LEAF_KEY)
}

pub fn sign_with_chain(claims: &Value, chain: &[&str], key_pem: &str) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.x5c = Some(chain.iter().map(|c| c.trim().to_string()).collect());
    let key = EncodingKey::from_ec_pem(key_pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

/// 测试用交易
#[derive(Debug, Clone)]
pub struct TestTransaction {
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub purchase_date: i64,
    pub expires_date: Option<i64>,
    pub revocation_date: Option<i64>,
    pub environment: &'static str,
}

impl TestTransaction {
    /// 以 `purchase` 为购买时间、有效期 `days` 天的交易
    pub fn renewal(transaction_id: &str, original: &str, purchase: DateTime<Utc>, days: i64) -> Self {
        let purchase_date = purchase.timestamp_millis();
        Self {
            transaction_id: transaction_id.to_string(),
            original_transaction_id: original.to_string(),
            purchase_date,
            expires_date: Some(purchase_date + days * DAY_MS),
            revocation_date: None,
            environment: "Production",
        }
    }

    /// 同一交易改为沙盒环境签发
    pub fn in_sandbox(mut self) -> Self {
        self.environment = "Sandbox";
        self
    }

    pub fn claims(&self) -> Value {
        json!({
            "transactionId": self.transaction_id,
            "originalTransactionId": self.original_transaction_id,
            "bundleId": BUNDLE_ID,
            "productId": "vip.monthly",
            "purchaseDate": self.purchase_date,
            "expiresDate": self.expires_date,
            "revocationDate": self.revocation_date,
            "environment": self.environment
        })
    }

    pub fn signed(&self) -> String {
        sign(&self.claims())
    }
}

/// 构造签名通知
pub fn signed_notification(
    notification_uuid: &str,
    notification_type: &str,
    subtype: Option<&str>,
    transaction: &TestTransaction,
) -> String {
    sign(&notification_claims(
        notification_uuid,
        notification_type,
        subtype,
        transaction.signed(),
    ))
}

/// 指定签发时间的签名通知
pub fn signed_notification_at(
    notification_uuid: &str,
    notification_type: &str,
    subtype: Option<&str>,
    transaction: &TestTransaction,
    signed_at: DateTime<Utc>,
) -> String {
    let mut claims = notification_claims(
        notification_uuid,
        notification_type,
        subtype,
        transaction.signed(),
    );
    claims["signedDate"] = json!(signed_at.timestamp_millis());
    sign(&claims)
}

pub fn notification_claims(
    notification_uuid: &str,
    notification_type: &str,
    subtype: Option<&str>,
    signed_transaction: String,
) -> Value {
    json!({
        "notificationType": notification_type,
        "subtype": subtype,
        "notificationUUID": notification_uuid,
        "version": "2.0",
        "signedDate": Utc::now().timestamp_millis(),
        "data": {
            "bundleId": BUNDLE_ID,
            "environment": "Production",
            "signedTransactionInfo": signed_transaction
        }
    })
}

/// 签发会话令牌
pub fn session_token(user_id: &str) -> String {
    let claims = SessionClaims {
        sub: user_id.to_string(),
        iss: SESSION_ISSUER.to_string(),
        exp: Utc::now().timestamp() + 3600,
        iat: Some(Utc::now().timestamp()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SESSION_SECRET.as_bytes()),
    )
    .unwrap()
}

// ============================================================================
// 替身
// ============================================================================

/// 可编程的交易查询客户端
#[derive(Default)]
pub struct FakeTransactionClient {
    signed: DashMap<String, String>,
    unavailable: AtomicBool,
}

impl FakeTransactionClient {
    pub fn put(&self, transaction: &TestTransaction) {
        self.signed
            .insert(transaction.transaction_id.clone(), transaction.signed());
    }

    pub fn put_raw(&self, transaction_id: &str, signed: String) {
        self.signed.insert(transaction_id.to_string(), signed);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionInfoClient for FakeTransactionClient {
    async fn get_transaction_info(&self, transaction_id: &str, _sandbox: bool) -> Result<String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PayError::Transient("App Store API 返回 503".to_string()));
        }
        self.signed
            .get(transaction_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| PayError::Authentication(format!("交易不存在: {}", transaction_id)))
    }
}

/// 可注入故障的订单仓储，其余行为委托给内存实现
#[derive(Default)]
pub struct FlakyOrderRepository {
    inner: InMemoryOrderRepository,
    failing: AtomicBool,
}

impl FlakyOrderRepository {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PayError::Transient("数据库连接超时".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OrderRepositoryTrait for FlakyOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<PayOrder> {
        self.check()?;
        self.inner.create(order).await
    }

    async fn find_by_id(&self, order_id: &str) -> Result<Option<PayOrder>> {
        self.check()?;
        self.inner.find_by_id(order_id).await
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<PayOrder>> {
        self.check()?;
        self.inner.find_by_transaction_id(transaction_id).await
    }

    async fn apply_transition(
        &self,
        order_id: &str,
        expected: OrderStatus,
        patch: TransitionPatch,
    ) -> Result<PayOrder> {
        self.check()?;
        self.inner.apply_transition(order_id, expected, patch).await
    }

    async fn set_auto_renew(
        &self,
        order_id: &str,
        enabled: bool,
        changed_at: DateTime<Utc>,
    ) -> Result<PayOrder> {
        self.check()?;
        self.inner.set_auto_renew(order_id, enabled, changed_at).await
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<PayOrder>, i64)> {
        self.check()?;
        self.inner.list_by_user(user_id, page, page_size).await
    }

    async fn latest_by_user(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<Option<PayOrder>> {
        self.check()?;
        self.inner.latest_by_user(user_id, status).await
    }
}

// ============================================================================
// 应用组装
// ============================================================================

/// 测试应用：暴露底层仓储便于断言
pub struct TestApp {
    pub state: AppState,
    pub orders: Arc<FlakyOrderRepository>,
    pub entitlements: Arc<InMemoryEntitlementRepository>,
    pub ledger: Arc<InMemoryProcessedRepository>,
    pub transactions: Arc<FakeTransactionClient>,
}

impl TestApp {
    pub fn new() -> Self {
        let orders = Arc::new(FlakyOrderRepository::default());
        let entitlements = Arc::new(InMemoryEntitlementRepository::new());
        let ledger = Arc::new(InMemoryProcessedRepository::new());
        let transactions = Arc::new(FakeTransactionClient::default());

        let verifier = AppStoreJwsVerifier::new(
            BUNDLE_ID,
            "Production",
            false,
            vec![STANDARD.decode(ROOT.trim()).unwrap()],
        );

        let state = AppState::build(Components {
            catalog: Arc::new(GoodsCatalog::with_defaults().unwrap()),
            orders: orders.clone(),
            entitlements: entitlements.clone(),
            ledger: ledger.clone(),
            verifier: Arc::new(verifier),
            transactions: transactions.clone(),
            session_validator: Arc::new(JwtSessionValidator::new(SESSION_SECRET, SESSION_ISSUER)),
            retry_policy: RetryPolicy::from_attempts(
                3,
                Duration::from_millis(1),
                Duration::from_millis(5),
            ),
        });

        Self {
            state,
            orders,
            entitlements,
            ledger,
            transactions,
        }
    }

    pub fn orders_created(&self) -> usize {
        self.orders.inner.count()
    }

    /// 直接写入订单
    pub fn insert_order(&self, order: PayOrder) {
        self.orders.inner.insert(order);
    }

    /// 已支付订单，绑定原始交易
    pub fn paid_order(&self, order_id: &str, user_id: &str, original_transaction_id: &str) -> PayOrder {
        let mut order = new_order(user_id).into_order(order_id.to_string(), Utc::now());
        order.order_status = OrderStatus::Paid;
        order.pay_transaction_status = OrderStatus::Paid;
        order.pay_transaction_id = Some(original_transaction_id.to_string());
        self.insert_order(order.clone());
        order
    }
}

/// MONTHLY_FIRST 订单（原价 2900，优惠 1000）
pub fn new_order(user_id: &str) -> NewOrder {
    NewOrder {
        user_id: user_id.to_string(),
        goods_key: "MONTHLY_FIRST".to_string(),
        goods_name: "月度会员首充优惠".to_string(),
        goods_type: pay_order::models::GoodsType::Monthly,
        order_amount: 2900,
        order_discount: 1000,
    }
}
