// ==========================================
// 工序排产引擎 - 工序执行领域模型
// ==========================================
// 职责: 可排产的最小单元 (工艺步骤 × 子批次)
// 红线: 状态只能经由状态机迁移修改
// 红线: 待分配工序不得持有机台
// ==========================================

use crate::domain::types::StageStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// StageExecution - 工序执行
// ==========================================
// 对齐: stage_execution 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecution {
    // ===== 主键与引用 =====
    pub stage_id: String,        // 工序ID (UUID)
    pub sub_lot_id: String,      // 所属子批次
    pub routing_step_id: String, // 实例化的工艺步骤 (换型工序借用主工序的步骤)
    pub machine_id: Option<String>, // 分配机台

    // ===== 状态 =====
    pub status: StageStatus,
    pub is_setup: bool, // true = 系统插入的换型工序

    // ===== 排产属性 =====
    pub priority: i32,               // 越大越紧急
    pub queue_position: Option<i32>, // 机型等待队列中的位置 (1 起)
    pub planned_minutes: f64,        // 计划工时 (分钟)

    // ===== 时间戳 =====
    pub created_at: NaiveDateTime,
    pub status_changed_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub paused_at: Option<NaiveDateTime>,
    pub resumed_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
    pub paused_minutes: f64, // 累计暂停时长

    // ===== 操作元数据 =====
    pub operator: Option<String>,
    pub device: Option<String>,
    pub reason: Option<String>,
    pub retry_count: i32,
    pub error_count: i32,
}

impl StageExecution {
    /// 创建生产工序 (待分配)
    pub fn new_productive(
        sub_lot_id: &str,
        routing_step_id: &str,
        priority: i32,
        planned_minutes: f64,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            stage_id: Uuid::new_v4().to_string(),
            sub_lot_id: sub_lot_id.to_string(),
            routing_step_id: routing_step_id.to_string(),
            machine_id: None,
            status: StageStatus::Pending,
            is_setup: false,
            priority,
            queue_position: None,
            planned_minutes,
            created_at: now,
            status_changed_at: now,
            started_at: None,
            paused_at: None,
            resumed_at: None,
            ended_at: None,
            paused_minutes: 0.0,
            operator: None,
            device: None,
            reason: None,
            retry_count: 0,
            error_count: 0,
        }
    }

    /// 为主工序合成换型工序
    ///
    /// 换型工序沿用主工序的子批次与工艺步骤,直接落在目标机台上,
    /// 优先级比主工序高 1,保证先于主工序开工。
    pub fn new_setup_for(
        main: &StageExecution,
        machine_id: &str,
        setup_minutes: f64,
        now: NaiveDateTime,
    ) -> Self {
        let mut setup = Self::new_productive(
            &main.sub_lot_id,
            &main.routing_step_id,
            main.priority.saturating_add(1),
            setup_minutes,
            now,
        );
        setup.is_setup = true;
        setup.machine_id = Some(machine_id.to_string());
        setup
    }

    /// 是否处于机型等待队列 (等待且未分配机台)
    pub fn is_type_queued(&self) -> bool {
        self.status == StageStatus::Waiting && self.machine_id.is_none()
    }

    /// 是否为机台积压 (已分配但未开工)
    pub fn is_backlog_of(&self, machine_id: &str) -> bool {
        matches!(self.status, StageStatus::Pending | StageStatus::Waiting)
            && self.machine_id.as_deref() == Some(machine_id)
    }

    /// 已净加工分钟数 (扣除暂停)
    pub fn elapsed_minutes(&self, now: NaiveDateTime) -> f64 {
        let Some(started_at) = self.started_at else {
            return 0.0;
        };
        let until = match self.status {
            StageStatus::Paused => self.paused_at.unwrap_or(now),
            StageStatus::Completed | StageStatus::Error => self.ended_at.unwrap_or(now),
            _ => now,
        };
        let gross = (until - started_at).num_seconds() as f64 / 60.0;
        (gross - self.paused_minutes).max(0.0)
    }

    /// 预计剩余分钟数 (下限 floor_minutes)
    pub fn remaining_minutes(&self, now: NaiveDateTime, floor_minutes: f64) -> f64 {
        (self.planned_minutes - self.elapsed_minutes(now)).max(floor_minutes)
    }
}
