//! HTTP接口层
//!
//! axum 路由与处理器：注册、流水线触发与查询、Worker回调、
//! 心跳、tick驱动、队列状态、死信与维护控制。

pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};
