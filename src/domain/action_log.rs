// ==========================================
// 工序排产引擎 - 操作日志领域模型
// ==========================================
// 职责: 工序事件的审计记录
// 红线: 只追加,不修改
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
// 对齐: action_log 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,        // 日志ID
    pub action_type: String,      // 操作类型 (存储为字符串)
    pub action_ts: NaiveDateTime, // 操作时间戳
    pub actor: String,            // 操作人 (系统触发时为 "system")

    // ===== 关联对象 =====
    pub stage_id: Option<String>,
    pub machine_id: Option<String>,
    pub sub_lot_id: Option<String>,
    pub lot_id: Option<String>,

    // ===== 负载 =====
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    StageCreated,
    StageAssigned,
    StageQueued,
    SetupCreated,
    StageStarted,
    StagePaused,
    StageResumed,
    StageCompleted,
    StageCancelled,
    StageReassigned,
    StageReprioritized,
    StageRequeued,
    StageUnblocked,
    SubLotCompleted,
    LotCompleted,
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::StageCreated => "StageCreated",
            ActionType::StageAssigned => "StageAssigned",
            ActionType::StageQueued => "StageQueued",
            ActionType::SetupCreated => "SetupCreated",
            ActionType::StageStarted => "StageStarted",
            ActionType::StagePaused => "StagePaused",
            ActionType::StageResumed => "StageResumed",
            ActionType::StageCompleted => "StageCompleted",
            ActionType::StageCancelled => "StageCancelled",
            ActionType::StageReassigned => "StageReassigned",
            ActionType::StageReprioritized => "StageReprioritized",
            ActionType::StageRequeued => "StageRequeued",
            ActionType::StageUnblocked => "StageUnblocked",
            ActionType::SubLotCompleted => "SubLotCompleted",
            ActionType::LotCompleted => "LotCompleted",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "StageCreated" => Some(ActionType::StageCreated),
            "StageAssigned" => Some(ActionType::StageAssigned),
            "StageQueued" => Some(ActionType::StageQueued),
            "SetupCreated" => Some(ActionType::SetupCreated),
            "StageStarted" => Some(ActionType::StageStarted),
            "StagePaused" => Some(ActionType::StagePaused),
            "StageResumed" => Some(ActionType::StageResumed),
            "StageCompleted" => Some(ActionType::StageCompleted),
            "StageCancelled" => Some(ActionType::StageCancelled),
            "StageReassigned" => Some(ActionType::StageReassigned),
            "StageReprioritized" => Some(ActionType::StageReprioritized),
            "StageRequeued" => Some(ActionType::StageRequeued),
            "StageUnblocked" => Some(ActionType::StageUnblocked),
            "SubLotCompleted" => Some(ActionType::SubLotCompleted),
            "LotCompleted" => Some(ActionType::LotCompleted),
            _ => None,
        }
    }
}

impl ActionLog {
    /// 创建新的操作日志
    pub fn new(action_id: String, action_type: ActionType, actor: String) -> Self {
        Self {
            action_id,
            action_type: action_type.as_str().to_string(),
            action_ts: chrono::Utc::now().naive_utc(),
            actor,
            stage_id: None,
            machine_id: None,
            sub_lot_id: None,
            lot_id: None,
            payload_json: None,
            detail: None,
        }
    }

    /// 设置操作负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}
