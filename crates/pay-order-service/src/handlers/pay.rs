//! 支付 API 处理器

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use tracing::{info, warn};
use validator::Validate;

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, PageResponse, PaginationParams},
    error::PayError,
    service::{
        CancelOrderRequest, CreateOrderRequest, CreateOrderResponse, NotificationOutcome,
        NotifyRequest, NotifyResponse, OrderDto, VerifyPaymentRequest, VerifyPaymentResponse,
        VipStatusResponse,
    },
    state::AppState,
};

/// 创建订单
///
/// POST /pay/create-order
pub async fn create_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<ApiResponse<CreateOrderResponse>>, PayError> {
    req.validate()?;
    let resp = state.order_service.create_order(&user.user_id, req).await?;
    Ok(Json(ApiResponse::success(resp)))
}

/// App Store 服务端通知回调
///
/// POST /pay/apple-notify
///
/// 只有瞬时故障返回非 2xx（App Store 会重投），其余结果一律 200，避免重投风暴。
pub async fn apple_notify(
    State(state): State<AppState>,
    body: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<NotifyResponse>>, PayError> {
    let outcome = match body {
        Ok(Json(req)) => {
            state
                .reconcile_service
                .handle_notification(&req.signed_payload)
                .await?
        }
        Err(rejection) => {
            warn!(security_event = true, error = %rejection, "通知请求体无法解析");
            NotificationOutcome::Rejected
        }
    };

    info!(outcome = outcome.as_str(), "App Store 通知已确认");
    Ok(Json(ApiResponse::success(NotifyResponse { outcome })))
}

/// 客户端主动校验支付
///
/// POST /pay/verify-apple-payment
pub async fn verify_apple_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<ApiResponse<VerifyPaymentResponse>>, PayError> {
    req.validate()?;
    let resp = state
        .reconcile_service
        .verify_payment(&user.user_id, req)
        .await?;
    Ok(Json(ApiResponse::success(resp)))
}

/// 取消未支付订单
///
/// POST /pay/cancel-order
pub async fn cancel_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<ApiResponse<OrderDto>>, PayError> {
    req.validate()?;
    let order = state
        .order_service
        .cancel_order(&user.user_id, &req.order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// 当前用户订单列表
///
/// GET /pay/orders?page=&pageSize=
pub async fn list_orders(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<OrderDto>>>, PayError> {
    let (page, page_size) = (params.page(), params.limit());
    let (items, total) = state
        .order_service
        .list_orders(&user.user_id, page, page_size)
        .await?;
    Ok(Json(ApiResponse::success(PageResponse::new(
        items, total, page, page_size,
    ))))
}

/// 当前用户会员状态
///
/// GET /pay/vip
pub async fn vip_status(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<VipStatusResponse>>, PayError> {
    let vip = state.order_service.vip_status(&user.user_id).await?;
    Ok(Json(ApiResponse::success(vip)))
}
