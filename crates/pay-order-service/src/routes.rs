//! 路由配置

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::{handlers, middleware::auth_middleware, state::AppState};

/// 支付相关路由
pub fn pay_routes() -> Router<AppState> {
    Router::new()
        .route("/pay/create-order", post(handlers::pay::create_order))
        .route("/pay/apple-notify", post(handlers::pay::apple_notify))
        .route(
            "/pay/verify-apple-payment",
            post(handlers::pay::verify_apple_payment),
        )
        .route("/pay/cancel-order", post(handlers::pay::cancel_order))
        .route("/pay/orders", get(handlers::pay::list_orders))
        .route("/pay/vip", get(handlers::pay::vip_status))
}

/// 带会话认证的完整业务路由
pub fn app_router(state: AppState) -> Router {
    pay_routes()
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
