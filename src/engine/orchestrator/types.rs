use crate::domain::StageExecution;
use crate::engine::error::SchedulerError;
use crate::engine::setup_resolver::SetupResolution;
use serde::{Deserialize, Serialize};

// ==========================================
// ScheduleOutcome - 单道工序调度结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScheduleOutcome {
    /// 工序不需要调度 (非待分配或已分配)
    Skipped { reason: String },
    /// 无可用机台,进入机型等待队列
    Queued {
        machine_type_id: String,
        queue_position: i32,
    },
    /// 已分配机台
    Assigned {
        machine_id: String,
        score: Option<f64>,
        setup: SetupResolution,
    },
}

impl ScheduleOutcome {
    pub fn machine_id(&self) -> Option<&str> {
        match self {
            ScheduleOutcome::Assigned { machine_id, .. } => Some(machine_id),
            _ => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, ScheduleOutcome::Assigned { .. })
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, ScheduleOutcome::Queued { .. })
    }

    pub fn setup_stage_id(&self) -> Option<&str> {
        match self {
            ScheduleOutcome::Assigned { setup, .. } => setup.setup_stage_id(),
            _ => None,
        }
    }
}

/// 批量操作中单道工序的失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage_id: String,
    pub error: String,
    pub retryable: bool,
}

impl StageFailure {
    pub fn new(stage_id: &str, error: &SchedulerError) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            error: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// 某道工序及其调度结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage_id: String,
    pub outcome: ScheduleOutcome,
}

// ==========================================
// LotCreation - 建批结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotCreation {
    pub lot_id: String,
    pub sub_lot_ids: Vec<String>,
    pub stage_ids: Vec<String>,
    /// 首道工序调度结果 (未立即调度时为空)
    pub scheduled: Vec<StageOutcome>,
    pub failures: Vec<StageFailure>,
}

// ==========================================
// CompletionOutcome - 完工级联结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub stage: StageExecution,
    /// 换型完工后解除等待的主工序
    pub unblocked_main_id: Option<String>,
    /// 下一道工序的调度结果
    pub next_stage: Option<StageOutcome>,
    /// 下一道工序调度失败 (完工本身已生效)
    pub cascade_failure: Option<StageFailure>,
    pub sub_lot_completed: bool,
    pub lot_completed: bool,
    /// 机台空出后从等待队列提升的工序
    pub promoted: Option<StageOutcome>,
}

impl CompletionOutcome {
    pub(super) fn new(stage: StageExecution) -> Self {
        Self {
            stage,
            unblocked_main_id: None,
            next_stage: None,
            cascade_failure: None,
            sub_lot_completed: false,
            lot_completed: false,
            promoted: None,
        }
    }
}

// ==========================================
// ConflictReport - 并发占用修复报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRepair {
    pub machine_id: String,
    pub kept_stage_id: String,
    pub requeued_stage_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub repairs: Vec<ConflictRepair>,
    /// 退回后重新调度的生产工序
    pub rescheduled: Vec<StageOutcome>,
    pub failures: Vec<StageFailure>,
}

impl ConflictReport {
    pub fn is_clean(&self) -> bool {
        self.repairs.is_empty() && self.failures.is_empty()
    }
}

// ==========================================
// OptimizeReport - 队列优化报告
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueAssignment {
    pub stage_id: String,
    pub machine_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMove {
    pub stage_id: String,
    pub from_machine_id: String,
    pub to_machine_id: String,
    pub gain: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizeReport {
    /// 从机型等待队列分配出去的工序
    pub assigned: Vec<QueueAssignment>,
    /// 改派到更优机台的工序
    pub moves: Vec<QueueMove>,
    pub failures: Vec<StageFailure>,
}

impl OptimizeReport {
    /// 本次清扫改变的工序数量
    pub fn changed(&self) -> usize {
        self.assigned.len() + self.moves.len()
    }
}
