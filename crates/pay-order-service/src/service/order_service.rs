//! 订单服务
//!
//! 面向客户端的订单操作：下单、取消、分页查询和会员状态展示。

use std::sync::Arc;

use chrono::Utc;
use pay_shared::observability::metrics;
use tracing::{info, instrument};

use crate::catalog::GoodsCatalog;
use crate::error::{PayError, Result};
use crate::models::{Entitlement, EventKind, NewOrder, OrderStatus, PayOrder};
use crate::repository::{EntitlementRepositoryTrait, OrderRepositoryTrait};
use crate::service::dto::{CreateOrderRequest, CreateOrderResponse, OrderDto, VipStatusResponse};
use crate::service::transition::TransitionEngine;

pub struct OrderService {
    catalog: Arc<GoodsCatalog>,
    orders: Arc<dyn OrderRepositoryTrait>,
    entitlements: Arc<dyn EntitlementRepositoryTrait>,
    engine: Arc<TransitionEngine>,
}

impl OrderService {
    pub fn new(
        catalog: Arc<GoodsCatalog>,
        orders: Arc<dyn OrderRepositoryTrait>,
        entitlements: Arc<dyn EntitlementRepositoryTrait>,
        engine: Arc<TransitionEngine>,
    ) -> Self {
        Self {
            catalog,
            orders,
            entitlements,
            engine,
        }
    }

    /// 创建订单
    ///
    /// 按商品目录定价，订单以 UNPAID 状态落库；状态字段不接受客户端输入。
    #[instrument(skip(self, request), fields(user_id = %user_id, goods_name = %request.goods_name))]
    pub async fn create_order(
        &self,
        user_id: &str,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse> {
        let goods = self.catalog.lookup(&request.goods_name)?;

        let order = self
            .orders
            .create(NewOrder {
                user_id: user_id.to_string(),
                goods_key: goods.goods_name.clone(),
                goods_name: goods.description.clone(),
                goods_type: goods.goods_type,
                order_amount: goods.amount,
                order_discount: goods.discount,
            })
            .await?;

        metrics::record_order_created(order.goods_type.as_str());
        info!(order_id = %order.order_id, final_amount = order.final_amount(), "订单已创建");

        Ok(CreateOrderResponse::from(&order))
    }

    /// 取消未支付订单（仅订单所有者）
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn cancel_order(&self, user_id: &str, order_id: &str) -> Result<OrderDto> {
        let order = self.owned_order(user_id, order_id).await?;
        let cancelled = self.engine.apply(&order, EventKind::Cancelled, None).await?;
        Ok(OrderDto::from(cancelled))
    }

    /// 分页查询当前用户订单
    pub async fn list_orders(
        &self,
        user_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<OrderDto>, i64)> {
        let (orders, total) = self.orders.list_by_user(user_id, page, page_size).await?;
        Ok((orders.into_iter().map(OrderDto::from).collect(), total))
    }

    /// 会员状态，自动续订标记取自最近一笔已支付订单
    pub async fn vip_status(&self, user_id: &str) -> Result<VipStatusResponse> {
        let now = Utc::now();
        let entitlement = self
            .entitlements
            .find(user_id)
            .await?
            .unwrap_or_else(|| Entitlement::closed(user_id, now));
        let auto_renew = self
            .orders
            .latest_by_user(user_id, Some(OrderStatus::Paid))
            .await?
            .is_some_and(|order| order.auto_renew);

        Ok(VipStatusResponse::new(&entitlement, auto_renew, now))
    }

    async fn owned_order(&self, user_id: &str, order_id: &str) -> Result<PayOrder> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| PayError::OrderNotFound(order_id.to_string()))?;
        if !order.is_owned_by(user_id) {
            return Err(PayError::Forbidden("无权操作该订单".to_string()));
        }
        Ok(order)
    }
}
