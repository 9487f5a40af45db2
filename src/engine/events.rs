// ==========================================
// 工序排产引擎 - 引擎层事件发布
// ==========================================
// 职责: 定义工序事件与发布 trait,实现依赖倒置
// 红线: 事件发布尽力而为,失败只记日志,不回滚状态迁移
// ==========================================

use crate::domain::{ActionLog, ActionType, StageExecution};
use crate::repository::ActionLogRepository;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::error::Error;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ==========================================
// 工序事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageEventType {
    Created,
    Assigned,
    Queued,
    SetupCreated,
    Unblocked,
    Started,
    Paused,
    Resumed,
    Completed,
    Cancelled,
    Reassigned,
    Reprioritized,
    Requeued,
    SubLotCompleted,
    LotCompleted,
}

impl StageEventType {
    pub fn as_str(&self) -> &'static str {
        self.action_type().as_str()
    }

    /// 对应的审计操作类型
    pub fn action_type(&self) -> ActionType {
        match self {
            StageEventType::Created => ActionType::StageCreated,
            StageEventType::Assigned => ActionType::StageAssigned,
            StageEventType::Queued => ActionType::StageQueued,
            StageEventType::SetupCreated => ActionType::SetupCreated,
            StageEventType::Unblocked => ActionType::StageUnblocked,
            StageEventType::Started => ActionType::StageStarted,
            StageEventType::Paused => ActionType::StagePaused,
            StageEventType::Resumed => ActionType::StageResumed,
            StageEventType::Completed => ActionType::StageCompleted,
            StageEventType::Cancelled => ActionType::StageCancelled,
            StageEventType::Reassigned => ActionType::StageReassigned,
            StageEventType::Reprioritized => ActionType::StageReprioritized,
            StageEventType::Requeued => ActionType::StageRequeued,
            StageEventType::SubLotCompleted => ActionType::SubLotCompleted,
            StageEventType::LotCompleted => ActionType::LotCompleted,
        }
    }
}

/// 工序事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEvent {
    pub event_type: StageEventType,
    pub occurred_at: NaiveDateTime,
    /// 触发人 (系统级联时为 "system")
    pub actor: String,
    pub stage_id: Option<String>,
    pub machine_id: Option<String>,
    pub sub_lot_id: Option<String>,
    pub lot_id: Option<String>,
    pub detail: Option<String>,
    pub payload: Option<JsonValue>,
}

impl StageEvent {
    pub const SYSTEM_ACTOR: &'static str = "system";

    /// 针对单个工序的事件
    pub fn for_stage(event_type: StageEventType, stage: &StageExecution, now: NaiveDateTime) -> Self {
        Self {
            event_type,
            occurred_at: now,
            actor: Self::SYSTEM_ACTOR.to_string(),
            stage_id: Some(stage.stage_id.clone()),
            machine_id: stage.machine_id.clone(),
            sub_lot_id: Some(stage.sub_lot_id.clone()),
            lot_id: None,
            detail: None,
            payload: None,
        }
    }

    /// 子批次完工事件
    pub fn sub_lot_completed(sub_lot_id: &str, lot_id: &str, now: NaiveDateTime) -> Self {
        Self {
            event_type: StageEventType::SubLotCompleted,
            occurred_at: now,
            actor: Self::SYSTEM_ACTOR.to_string(),
            stage_id: None,
            machine_id: None,
            sub_lot_id: Some(sub_lot_id.to_string()),
            lot_id: Some(lot_id.to_string()),
            detail: None,
            payload: None,
        }
    }

    /// 批次完工事件
    pub fn lot_completed(lot_id: &str, now: NaiveDateTime) -> Self {
        Self {
            event_type: StageEventType::LotCompleted,
            occurred_at: now,
            actor: Self::SYSTEM_ACTOR.to_string(),
            stage_id: None,
            machine_id: None,
            sub_lot_id: None,
            lot_id: Some(lot_id.to_string()),
            detail: None,
            payload: None,
        }
    }

    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        if let Some(actor) = actor.filter(|a| !a.trim().is_empty()) {
            self.actor = actor.to_string();
        }
        self
    }

    pub fn with_lot(mut self, lot_id: &str) -> Self {
        self.lot_id = Some(lot_id.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 工序事件发布者 Trait
///
/// # 返回
/// - `Ok(id)`: 发布记录 ID(如果支持)或空字符串
pub trait StageEventPublisher: Send + Sync {
    fn publish(&self, event: &StageEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl StageEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: &StageEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            event_type = event.event_type.as_str(),
            stage_id = ?event.stage_id,
            "NoOpEventPublisher: 跳过事件发布"
        );
        Ok(String::new())
    }
}

/// 内存收集发布者 (测试与嵌入方轮询用)
#[derive(Debug, Default)]
pub struct CollectingEventPublisher {
    events: Mutex<Vec<StageEvent>>,
}

impl CollectingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出已收集的事件并清空
    pub fn drain(&self) -> Vec<StageEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    /// 统计某类事件数量
    pub fn count(&self, event_type: StageEventType) -> usize {
        match self.events.lock() {
            Ok(events) => events.iter().filter(|e| e.event_type == event_type).count(),
            Err(_) => 0,
        }
    }
}

impl StageEventPublisher for CollectingEventPublisher {
    fn publish(&self, event: &StageEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| format!("事件缓冲锁获取失败: {}", e))?;
        events.push(event.clone());
        Ok(String::new())
    }
}

/// 审计发布者: 将每个事件写入 action_log
pub struct ActionLogEventPublisher {
    repo: Arc<ActionLogRepository>,
}

impl ActionLogEventPublisher {
    pub fn new(repo: Arc<ActionLogRepository>) -> Self {
        Self { repo }
    }
}

impl StageEventPublisher for ActionLogEventPublisher {
    fn publish(&self, event: &StageEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut log = ActionLog::new(
            Uuid::new_v4().to_string(),
            event.event_type.action_type(),
            event.actor.clone(),
        );
        log.action_ts = event.occurred_at;
        log.stage_id = event.stage_id.clone();
        log.machine_id = event.machine_id.clone();
        log.sub_lot_id = event.sub_lot_id.clone();
        log.lot_id = event.lot_id.clone();
        log.payload_json = event.payload.clone();
        log.detail = event.detail.clone();

        let id = self.repo.insert(&log)?;
        Ok(id)
    }
}

/// 组合发布者: 依次投递给多个发布者,任一失败即返回错误
pub struct FanOutEventPublisher {
    publishers: Vec<Arc<dyn StageEventPublisher>>,
}

impl FanOutEventPublisher {
    pub fn new(publishers: Vec<Arc<dyn StageEventPublisher>>) -> Self {
        Self { publishers }
    }
}

impl StageEventPublisher for FanOutEventPublisher {
    fn publish(&self, event: &StageEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut last_id = String::new();
        for publisher in &self.publishers {
            last_id = publisher.publish(event)?;
        }
        Ok(last_id)
    }
}

/// 可选的事件发布者包装
///
/// 简化 Option<Arc<dyn StageEventPublisher>> 的使用
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn StageEventPublisher>>,
}

impl OptionalEventPublisher {
    /// 创建带发布者的实例
    pub fn with_publisher(publisher: Arc<dyn StageEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    /// 创建空实例（不发布事件）
    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 发布事件,失败时记录警告并吞掉错误
    pub fn publish_best_effort(&self, event: &StageEvent) {
        let Some(publisher) = &self.inner else {
            tracing::debug!(
                event_type = event.event_type.as_str(),
                "OptionalEventPublisher: 未配置发布者，跳过事件"
            );
            return;
        };
        if let Err(e) = publisher.publish(event) {
            tracing::warn!(
                event_type = event.event_type.as_str(),
                stage_id = ?event.stage_id,
                error = %e,
                "工序事件发布失败(已忽略)"
            );
        }
    }

    /// 检查是否配置了发布者
    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct FailingPublisher;

    impl StageEventPublisher for FailingPublisher {
        fn publish(&self, _event: &StageEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
            Err("下游不可用".into())
        }
    }

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_optional_publisher_swallows_failures() {
        let publisher = OptionalEventPublisher::with_publisher(Arc::new(FailingPublisher));
        assert!(publisher.is_configured());
        publisher.publish_best_effort(&StageEvent::lot_completed("L1", t0()));

        let none = OptionalEventPublisher::default();
        assert!(!none.is_configured());
        none.publish_best_effort(&StageEvent::lot_completed("L1", t0()));
    }

    #[test]
    fn test_action_log_publisher_persists_event() {
        let conn = Arc::new(Mutex::new(crate::db::open_in_memory_with_schema().unwrap()));
        let repo = Arc::new(ActionLogRepository::new(conn));
        let publisher = ActionLogEventPublisher::new(repo.clone());

        let stage = StageExecution::new_productive("SL1", "STEP1", 0, 10.0, t0());
        let event = StageEvent::for_stage(StageEventType::Started, &stage, t0())
            .with_actor(Some("alice"))
            .with_detail("开工");
        let id = publisher.publish(&event).unwrap();

        let log = repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(log.action_type, "StageStarted");
        assert_eq!(log.actor, "alice");
        assert_eq!(log.stage_id.as_deref(), Some(stage.stage_id.as_str()));
        assert_eq!(log.action_ts, t0());
    }

    #[test]
    fn test_fan_out_reaches_every_publisher() {
        let a = Arc::new(CollectingEventPublisher::new());
        let b = Arc::new(CollectingEventPublisher::new());
        let fan_out = FanOutEventPublisher::new(vec![
            a.clone() as Arc<dyn StageEventPublisher>,
            Arc::new(NoOpEventPublisher),
            b.clone(),
        ]);

        fan_out.publish(&StageEvent::lot_completed("L1", t0())).unwrap();
        assert_eq!(a.count(StageEventType::LotCompleted), 1);
        assert_eq!(b.drain().len(), 1);
        assert!(b.drain().is_empty());
    }
}
