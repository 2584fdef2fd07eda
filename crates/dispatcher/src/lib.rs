//! 调度分发层
//!
//! 周期性的调度循环（continuous / tick-driven 两种驱动方式）、
//! HTTP Worker传输、存储凭证签发与启动时的滞留运行恢复。

pub mod dispatch_service;
pub mod recovery_service;
pub mod storage_token;
pub mod worker_client;

pub use dispatch_service::DispatchService;
pub use recovery_service::RecoveryService;
pub use storage_token::{StorageTokenClaims, StorageTokenIssuer};
pub use worker_client::HttpWorkerTransport;
