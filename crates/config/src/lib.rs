//! 应用配置
//!
//! TOML 配置文件 + `PIPEWEAVE_` 前缀环境变量覆盖。

mod models;

pub use models::*;
