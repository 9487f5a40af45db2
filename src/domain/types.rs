// ==========================================
// 工序排产引擎 - 领域类型定义
// ==========================================
// 职责: 工序状态、状态机事件、批次状态、换型时间来源
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工序状态 (Stage Status)
// ==========================================
// 红线: Completed / Error 为终态,不允许再迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,    // 待分配 / 已分配可开工
    Waiting,    // 阻塞 (排队等机台 或 等待换型工序)
    InProgress, // 加工中
    Paused,     // 暂停
    Completed,  // 完工
    Error,      // 取消 / 失败
}

impl StageStatus {
    /// 全部状态 (穷举测试用)
    pub const ALL: [StageStatus; 6] = [
        StageStatus::Pending,
        StageStatus::Waiting,
        StageStatus::InProgress,
        StageStatus::Paused,
        StageStatus::Completed,
        StageStatus::Error,
    ];

    /// 是否终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Error)
    }

    /// 是否占用机台 (加工中或暂停)
    pub fn holds_machine(&self) -> bool {
        matches!(self, StageStatus::InProgress | StageStatus::Paused)
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Waiting => "WAITING",
            StageStatus::InProgress => "IN_PROGRESS",
            StageStatus::Paused => "PAUSED",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Error => "ERROR",
        }
    }

    /// 从数据库字符串解析
    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(StageStatus::Pending),
            "WAITING" => Some(StageStatus::Waiting),
            "IN_PROGRESS" => Some(StageStatus::InProgress),
            "PAUSED" => Some(StageStatus::Paused),
            "COMPLETED" => Some(StageStatus::Completed),
            "ERROR" => Some(StageStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 状态机事件 (Transition Event)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionEvent {
    Assign,   // 分配机台且可立即开工
    Block,    // 分配后被阻塞 (换型 / 机台忙)
    Unblock,  // 阻塞解除
    Start,    // 开工
    Pause,    // 暂停
    Resume,   // 恢复
    Complete, // 完工
    Cancel,   // 取消 (必须给出原因)
    Reassign, // 人工改派
    Requeue,  // 冲突修复: 退回待分配
}

impl TransitionEvent {
    /// 全部事件 (穷举测试用)
    pub const ALL: [TransitionEvent; 10] = [
        TransitionEvent::Assign,
        TransitionEvent::Block,
        TransitionEvent::Unblock,
        TransitionEvent::Start,
        TransitionEvent::Pause,
        TransitionEvent::Resume,
        TransitionEvent::Complete,
        TransitionEvent::Cancel,
        TransitionEvent::Reassign,
        TransitionEvent::Requeue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionEvent::Assign => "ASSIGN",
            TransitionEvent::Block => "BLOCK",
            TransitionEvent::Unblock => "UNBLOCK",
            TransitionEvent::Start => "START",
            TransitionEvent::Pause => "PAUSE",
            TransitionEvent::Resume => "RESUME",
            TransitionEvent::Complete => "COMPLETE",
            TransitionEvent::Cancel => "CANCEL",
            TransitionEvent::Reassign => "REASSIGN",
            TransitionEvent::Requeue => "REQUEUE",
        }
    }
}

impl fmt::Display for TransitionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 批次状态 (Lot Status)
// ==========================================
// 批次与子批次共用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotStatus {
    Open,      // 生产中
    Completed, // 已完工
}

impl LotStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            LotStatus::Open => "OPEN",
            LotStatus::Completed => "COMPLETED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "OPEN" => Some(LotStatus::Open),
            "COMPLETED" => Some(LotStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for LotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 换型时间来源 (Setup Time Source)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetupTimeSource {
    Default,  // 首次换型时取工艺步骤默认换型时间
    Recorded, // 外部维护的实测值
}

impl SetupTimeSource {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            SetupTimeSource::Default => "DEFAULT",
            SetupTimeSource::Recorded => "RECORDED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEFAULT" => Some(SetupTimeSource::Default),
            "RECORDED" => Some(SetupTimeSource::Recorded),
            _ => None,
        }
    }
}

impl fmt::Display for SetupTimeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = StageStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![&StageStatus::Completed, &StageStatus::Error]);
    }

    #[test]
    fn test_stage_status_db_str_is_case_insensitive() {
        assert_eq!(
            StageStatus::from_db_str("in_progress"),
            Some(StageStatus::InProgress)
        );
        assert_eq!(StageStatus::from_db_str("RUNNING"), None);
    }

    #[test]
    fn test_stage_status_serde_matches_db_str() {
        let json = serde_json::to_string(&StageStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
    }
}
