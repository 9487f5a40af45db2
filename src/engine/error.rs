// ==========================================
// 工序排产引擎 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 无可用机台不是错误,对应 ScheduleOutcome::Queued
// ==========================================

use crate::domain::{StageStatus, TransitionEvent};
use crate::repository::RepositoryError;
use thiserror::Error;

/// 排产引擎错误类型
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("非法状态迁移: stage={stage_id}, {from} --{event}--> ? ({reason})")]
    InvalidTransition {
        stage_id: String,
        from: StageStatus,
        event: TransitionEvent,
        reason: String,
    },

    /// 前序工序未完工 (可恢复,稍后重试)
    #[error("前序工序未完工: stage={stage_id}, step_order={step_order}, 缺少 step_order={missing_step_order}")]
    DependencyNotSatisfied {
        stage_id: String,
        step_order: i32,
        missing_step_order: i32,
    },

    #[error("机型不匹配: stage={stage_id}, machine={machine_id}, 需要 {expected}, 实际 {actual}")]
    MachineTypeMismatch {
        stage_id: String,
        machine_id: String,
        expected: String,
        actual: String,
    },

    #[error("工序不在机台等待集合中: stage={stage_id}, machine={machine_id}")]
    NotQueued { stage_id: String, machine_id: String },

    #[error("机台并发占用: machine={machine_id}, stages={stage_ids:?}")]
    ConcurrencyConflict {
        machine_id: String,
        stage_ids: Vec<String>,
    },

    #[error("输入非法: {0}")]
    InvalidInput(String),

    #[error("时间超出可表示范围: {0}")]
    TimeOutOfRange(String),

    #[error("调度锁获取失败: {0}")]
    LockError(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl SchedulerError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        SchedulerError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// 是否可在稍后重试 (状态未被破坏,条件满足后可再次触发)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::DependencyNotSatisfied { .. } | SchedulerError::LockError(_)
        )
    }
}

/// Result 类型别名
pub type SchedulerResult<T> = Result<T, SchedulerError>;
