// ==========================================
// 工序排产引擎 - 换型时间领域模型
// ==========================================
// 职责: 机台上 (来源零件 → 目标零件) 的有向换型时间
// 红线: 同一 (机台, 来源, 目标) 只允许一条记录
// ==========================================

use crate::domain::types::SetupTimeSource;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// SetupTimeRecord - 换型时间记录
// ==========================================
// 对齐: setup_time 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupTimeRecord {
    pub machine_id: String,
    pub from_part_id: String,
    pub to_part_id: String,
    pub duration_minutes: f64,
    pub source: SetupTimeSource,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl SetupTimeRecord {
    pub fn new(
        machine_id: &str,
        from_part_id: &str,
        to_part_id: &str,
        duration_minutes: f64,
        source: SetupTimeSource,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            from_part_id: from_part_id.to_string(),
            to_part_id: to_part_id.to_string(),
            duration_minutes,
            source,
            created_at: now,
            updated_at: now,
        }
    }
}
