//! 领域层
//!
//! 定义编排器的核心业务实体与数据访问抽象，不依赖具体技术实现。

pub mod entities;
pub mod ids;
pub mod repositories;

pub use entities::*;
pub use repositories::*;
