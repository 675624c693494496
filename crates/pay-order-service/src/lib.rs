//! 订阅订单与会员对账服务
//!
//! 接收客户端下单请求和 App Store 异步通知，验签后把续订、退款、过期等事件
//! 对账到订单记录，并维护用户会员窗口。
//!
//! ## 模块结构
//!
//! - `catalog`: 商品目录
//! - `models`: 订单、会员窗口、通知载荷
//! - `repository`: 订单、会员窗口、幂等账本的存储（PostgreSQL 与内存实现）
//! - `notification`: 通知验签、分类与 App Store Server API 客户端
//! - `service`: 状态迁移、会员同步、幂等守卫与对账流程
//! - `auth` / `middleware`: 会话校验
//! - `handlers` / `routes`: HTTP 接口

pub mod auth;
pub mod catalog;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;

pub use catalog::{GoodsCatalog, GoodsDefinition};
pub use error::{PayError, Result};
pub use state::{AppState, Components};
