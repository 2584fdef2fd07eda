//! 基础设施层
//!
//! 领域仓储抽象的 PostgreSQL 实现与数据库连接管理。

pub mod database;

pub use database::manager::{create_database_pool, mask_database_url};
pub use database::postgres::{
    PostgresDlqRepository, PostgresIdempotencyRepository, PostgresMaintenanceRepository,
    PostgresPipelineRepository, PostgresPipelineRunRepository, PostgresServiceRepository,
    PostgresTaskRepository, PostgresTaskRunRepository,
};
