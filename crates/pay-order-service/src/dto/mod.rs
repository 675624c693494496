//! HTTP 通用 DTO
//!
//! - `request`: 分页参数
//! - `response`: 统一响应与分页响应

pub mod request;
pub mod response;

pub use request::PaginationParams;
pub use response::{ApiResponse, PageResponse};
