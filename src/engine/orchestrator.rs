// ==========================================
// 工序排产引擎 - 调度编排器
// ==========================================
// 职责: 响应外部触发,协调状态机、机台选择、换型判定、顺序控制与等待队列
// 并发: 所有写操作串行化 (单写锁),评分与分配整体原子
// 红线: 只读操作 (队列预测) 不持写锁
// 红线: 事件发布尽力而为,失败不回滚状态迁移
// ==========================================

mod lifecycle;
mod maintenance;
mod scheduling;
mod types;

#[cfg(test)]
mod tests;

pub use types::{
    CompletionOutcome, ConflictRepair, ConflictReport, LotCreation, OptimizeReport,
    QueueAssignment, QueueMove, ScheduleOutcome, StageFailure, StageOutcome,
};

use crate::config::SchedulerConfig;
use crate::domain::{Machine, StageExecution, StageStatus, TransitionEvent};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::events::{OptionalEventPublisher, StageEvent, StageEventPublisher};
use crate::engine::forecast::QueueForecaster;
use crate::engine::machine_selector::MachineSelector;
use crate::engine::queue_manager::QueueManager;
use crate::engine::repositories::SchedulerRepositories;
use crate::engine::sequencer::Sequencer;
use crate::engine::setup_resolver::SetupResolver;
use crate::engine::stage_generator::StageGenerator;
use crate::engine::state_machine;
use chrono::NaiveDateTime;
use std::sync::{Arc, Mutex, MutexGuard};

/// 时间源 (默认取 UTC 当前时间)
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// 系统时间源
pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().naive_utc())
}

// ==========================================
// SchedulerOrchestrator - 调度编排器
// ==========================================
pub struct SchedulerOrchestrator {
    repos: SchedulerRepositories,
    config: SchedulerConfig,
    selector: MachineSelector,
    setup_resolver: SetupResolver,
    sequencer: Sequencer,
    queue_manager: QueueManager,
    generator: StageGenerator,
    forecaster: QueueForecaster,
    events: OptionalEventPublisher,
    clock: Clock,
    write_lock: Mutex<()>,
}

impl SchedulerOrchestrator {
    /// 创建编排器实例
    ///
    /// # 参数
    /// - repos: 存储接口集合
    /// - config: 排产参数
    pub fn new(repos: SchedulerRepositories, config: SchedulerConfig) -> Self {
        Self {
            selector: MachineSelector::new(repos.clone(), config.clone()),
            setup_resolver: SetupResolver::new(repos.clone()),
            sequencer: Sequencer::new(repos.clone()),
            queue_manager: QueueManager::new(repos.clone()),
            generator: StageGenerator::new(repos.clone()),
            forecaster: QueueForecaster::new(repos.clone(), config.clone()),
            events: OptionalEventPublisher::none(),
            clock: system_clock(),
            write_lock: Mutex::new(()),
            repos,
            config,
        }
    }

    /// 挂接事件发布者
    pub fn with_event_publisher(mut self, publisher: Arc<dyn StageEventPublisher>) -> Self {
        self.events = OptionalEventPublisher::with_publisher(publisher);
        self
    }

    /// 替换时间源
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn repositories(&self) -> &SchedulerRepositories {
        &self.repos
    }

    /// 查询工序 (缺失即 NotFound)
    pub fn get_stage(&self, stage_id: &str) -> SchedulerResult<StageExecution> {
        self.repos.require_stage(stage_id)
    }

    /// 机台等待集合 (积压 + 同机型等待队列,按队列规则排序)
    pub fn machine_wait_set(&self, machine_id: &str) -> SchedulerResult<Vec<StageExecution>> {
        let machine = self.repos.require_machine(machine_id)?;
        self.queue_manager.wait_set(&machine)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    fn lock_writer(&self) -> SchedulerResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|e| SchedulerError::LockError(e.to_string()))
    }

    fn emit(&self, event: StageEvent) {
        self.events.publish_best_effort(&event);
    }

    /// 机台上除自身外是否有加工中工序
    fn ensure_machine_free(
        &self,
        stage: &StageExecution,
        machine_id: &str,
        event: TransitionEvent,
    ) -> SchedulerResult<()> {
        let others: Vec<String> = self
            .repos
            .stage_repo
            .find_by_machine_and_status(machine_id, &[StageStatus::InProgress])?
            .into_iter()
            .filter(|s| s.stage_id != stage.stage_id)
            .map(|s| s.stage_id)
            .collect();
        if others.is_empty() {
            Ok(())
        } else {
            Err(state_machine::invalid_transition(
                stage,
                event,
                format!("机台 {} 已有加工中工序 {}", machine_id, others.join(",")),
            ))
        }
    }

    /// 所有机台
    fn all_machines(&self) -> SchedulerResult<Vec<Machine>> {
        Ok(self.repos.machine_repo.list_all()?)
    }
}
