// ==========================================
// 工序排产引擎 - 队列预测
// ==========================================
// 职责: 只读推演各机台在制、积压与机型等待队列的预计开始/结束时间
// 口径:
// - 在制工序: 预计结束 = now + 剩余分钟 (下限 min_remaining_minutes)
// - 积压工序: 按队列规则依次排在机台释放之后
// - 机型等待队列: 依次派给同机型中最早释放的机台 (同时释放取 machine_id 小者)
// 红线: 不修改任何数据
// ==========================================

use crate::config::SchedulerConfig;
use crate::domain::{StageExecution, StageStatus};
use crate::engine::error::SchedulerResult;
use crate::engine::machine_selector::add_minutes;
use crate::engine::queue_manager::QueueManager;
use crate::engine::repositories::SchedulerRepositories;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 预测条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub stage_id: String,
    pub sub_lot_id: String,
    pub is_setup: bool,
    pub status: StageStatus,
    pub priority: i32,
    pub queue_position: Option<i32>,
    pub planned_minutes: f64,
    /// 实际或推演的机台
    pub machine_id: Option<String>,
    pub estimated_start: Option<NaiveDateTime>,
    pub estimated_end: Option<NaiveDateTime>,
}

impl ForecastEntry {
    fn from_stage(stage: &StageExecution) -> Self {
        Self {
            stage_id: stage.stage_id.clone(),
            sub_lot_id: stage.sub_lot_id.clone(),
            is_setup: stage.is_setup,
            status: stage.status,
            priority: stage.priority,
            queue_position: stage.queue_position,
            planned_minutes: stage.planned_minutes,
            machine_id: stage.machine_id.clone(),
            estimated_start: None,
            estimated_end: None,
        }
    }
}

/// 单机台预测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineForecast {
    pub machine_id: String,
    pub machine_type_id: String,
    pub current: Vec<ForecastEntry>,
    pub backlog: Vec<ForecastEntry>,
    /// 积压全部完成后的空闲时间
    pub available_at: NaiveDateTime,
}

/// 机型等待队列预测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeQueueForecast {
    pub machine_type_id: String,
    pub entries: Vec<ForecastEntry>,
}

/// 全局队列预测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueForecast {
    pub generated_at: NaiveDateTime,
    pub machines: Vec<MachineForecast>,
    pub type_queues: Vec<TypeQueueForecast>,
}

impl QueueForecast {
    pub fn machine(&self, machine_id: &str) -> Option<&MachineForecast> {
        self.machines.iter().find(|m| m.machine_id == machine_id)
    }

    pub fn type_queue(&self, machine_type_id: &str) -> Option<&TypeQueueForecast> {
        self.type_queues
            .iter()
            .find(|q| q.machine_type_id == machine_type_id)
    }
}

// ==========================================
// QueueForecaster - 队列预测器
// ==========================================
pub struct QueueForecaster {
    repos: SchedulerRepositories,
    queue_manager: QueueManager,
    config: SchedulerConfig,
}

impl QueueForecaster {
    pub fn new(repos: SchedulerRepositories, config: SchedulerConfig) -> Self {
        Self {
            queue_manager: QueueManager::new(repos.clone()),
            repos,
            config,
        }
    }

    pub fn forecast(&self, now: NaiveDateTime) -> SchedulerResult<QueueForecast> {
        let mut machines = Vec::new();
        for machine in self.repos.machine_repo.list_all()? {
            machines.push(self.forecast_machine(&machine.machine_id, &machine.machine_type_id, now)?);
        }

        // 机型等待队列按机型分组
        let mut grouped: BTreeMap<String, Vec<StageExecution>> = BTreeMap::new();
        for stage in self.repos.stage_repo.find_all_in_queue()? {
            if stage.is_type_queued() {
                let machine_type_id = self.repos.machine_type_of(&stage)?;
                grouped.entry(machine_type_id).or_default().push(stage);
            }
        }

        let mut type_queues = Vec::with_capacity(grouped.len());
        for (machine_type_id, stages) in grouped {
            let ordered = self.queue_manager.sort_by_queue_order(stages)?;
            let entries = project_type_queue(&machine_type_id, &ordered, &machines)?;
            type_queues.push(TypeQueueForecast {
                machine_type_id,
                entries,
            });
        }

        tracing::debug!(
            machine_count = machines.len(),
            type_queue_count = type_queues.len(),
            "队列预测完成"
        );

        Ok(QueueForecast {
            generated_at: now,
            machines,
            type_queues,
        })
    }

    fn forecast_machine(
        &self,
        machine_id: &str,
        machine_type_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<MachineForecast> {
        let holding = self.repos.stage_repo.find_by_machine_and_status(
            machine_id,
            &[StageStatus::InProgress, StageStatus::Paused],
        )?;
        let backlog = self.repos.stage_repo.find_by_machine_and_status(
            machine_id,
            &[StageStatus::Pending, StageStatus::Waiting],
        )?;
        let backlog = self.queue_manager.sort_by_queue_order(backlog)?;

        let mut cursor = now;
        let mut current = Vec::with_capacity(holding.len());
        for stage in &holding {
            let mut entry = ForecastEntry::from_stage(stage);
            entry.estimated_start = Some(stage.started_at.unwrap_or(now));
            cursor = add_minutes(
                cursor,
                stage.remaining_minutes(now, self.config.min_remaining_minutes),
            )?;
            entry.estimated_end = Some(cursor);
            current.push(entry);
        }

        let mut projected = Vec::with_capacity(backlog.len());
        for stage in &backlog {
            let mut entry = ForecastEntry::from_stage(stage);
            entry.estimated_start = Some(cursor);
            cursor = add_minutes(cursor, stage.planned_minutes)?;
            entry.estimated_end = Some(cursor);
            projected.push(entry);
        }

        Ok(MachineForecast {
            machine_id: machine_id.to_string(),
            machine_type_id: machine_type_id.to_string(),
            current,
            backlog: projected,
            available_at: cursor,
        })
    }
}

/// 将机型等待队列依次派给最早释放的同机型机台
fn project_type_queue(
    machine_type_id: &str,
    ordered: &[StageExecution],
    machines: &[MachineForecast],
) -> SchedulerResult<Vec<ForecastEntry>> {
    let mut available: Vec<(String, NaiveDateTime)> = machines
        .iter()
        .filter(|m| m.machine_type_id == machine_type_id)
        .map(|m| (m.machine_id.clone(), m.available_at))
        .collect();

    let mut entries = Vec::with_capacity(ordered.len());
    for stage in ordered {
        let mut entry = ForecastEntry::from_stage(stage);
        let slot = available
            .iter_mut()
            .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        if let Some((machine_id, free_at)) = slot {
            entry.machine_id = Some(machine_id.clone());
            entry.estimated_start = Some(*free_at);
            *free_at = add_minutes(*free_at, stage.planned_minutes)?;
            entry.estimated_end = Some(*free_at);
        }
        entries.push(entry);
    }
    Ok(entries)
}
