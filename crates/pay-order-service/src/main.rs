//! 订阅订单服务
//!
//! 提供下单、App Store 通知回调、客户端支付校验等 REST API。

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, http::HeaderValue, http::StatusCode, middleware, routing::get};
use pay_order::{
    AppState, Components, GoodsCatalog,
    auth::JwtSessionValidator,
    notification::{AppStoreJwsVerifier, AppStoreServerClient},
    repository::{EntitlementRepository, OrderRepository, ProcessedNotificationRepository},
    routes,
};
use pay_shared::{
    config::AppConfig,
    database::Database,
    observability::{self, middleware as obs_middleware},
    retry::RetryPolicy,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

const SERVICE_NAME: &str = "pay-order-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        "Starting {} on {} ({})",
        config.service_name,
        config.server_addr(),
        config.environment
    );

    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;

    if config.app_store.trusted_roots.is_empty() {
        warn!("未配置受信任的根证书，所有 App Store 通知都将被拒绝");
    }

    let pool = db.pool().clone();
    let state = AppState::build(Components {
        catalog: Arc::new(GoodsCatalog::with_defaults()?),
        orders: Arc::new(OrderRepository::new(pool.clone())),
        entitlements: Arc::new(EntitlementRepository::new(pool.clone())),
        ledger: Arc::new(ProcessedNotificationRepository::new(pool)),
        verifier: Arc::new(AppStoreJwsVerifier::from_config(&config.app_store)?),
        transactions: Arc::new(AppStoreServerClient::from_config(&config.app_store)?),
        session_validator: Arc::new(JwtSessionValidator::from_config(&config.session)),
        retry_policy: RetryPolicy::from_attempts(
            config.reconcile.max_attempts,
            config.reconcile.retry_initial_delay(),
            config.reconcile.retry_max_delay(),
        ),
    });

    // CORS：通过 PAY_CORS_ORIGINS 控制允许的来源，默认只放行本地开发地址
    let allowed_origins = std::env::var("PAY_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());
    let cors = if allowed_origins == "*" {
        if config.is_production() {
            warn!("PAY_CORS_ORIGINS=\"*\" 在生产环境中不安全，请设置为具体域名");
        }
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = Router::new()
        .merge(routes::app_router(state))
        .route("/health", get(health_check))
        .route(
            "/ready",
            get({
                let db_for_ready = db.clone();
                move || readiness_check(db_for_ready.clone())
            }),
        )
        // 超时视为瞬时故障，回调返回 503 由 App Store 重投
        .layer(TimeoutLayer::with_status_code(
            StatusCode::SERVICE_UNAVAILABLE,
            Duration::from_secs(config.server.request_timeout_seconds),
        ))
        .layer(cors)
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 监听关闭信号（SIGTERM 或 Ctrl+C）
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 存活探针
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME
    }))
}

/// 就绪探针：检查数据库连接
async fn readiness_check(db: Database) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = db.health_check().await.is_ok();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "service": SERVICE_NAME,
            "checks": {
                "database": if db_ok { "ok" } else { "fail" }
            }
        })),
    )
}
