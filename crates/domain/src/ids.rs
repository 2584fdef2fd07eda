//! 不透明ID生成
//!
//! 所有ID都是不透明字符串，前缀仅为约定，便于在日志与数据库中辨认实体类型。

use uuid::Uuid;

/// 生成任务运行ID（`trun_` 前缀）
pub fn task_run_id() -> String {
    format!("trun_{}", Uuid::new_v4().simple())
}

/// 生成流水线运行ID（`prun_` 前缀）
pub fn pipeline_run_id() -> String {
    format!("prun_{}", Uuid::new_v4().simple())
}

/// 生成死信记录ID（`dlq_` 前缀）
pub fn dlq_entry_id() -> String {
    format!("dlq_{}", Uuid::new_v4().simple())
}
