// ==========================================
// 工序排产引擎 - 等待队列管理
// ==========================================
// 职责: 机型等待队列的入队、出队、位置压缩与优先级排序
// 排序: 优先级降序 → 批次创建升序 → 工序创建升序 → 工序ID升序
// 红线: queue_position 在同机型等待工序中连续 (1..n)
// ==========================================

use crate::domain::{Machine, StageExecution, StageStatus, TransitionEvent};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::repositories::SchedulerRepositories;
use crate::engine::state_machine;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::HashMap;

/// 队列排序键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKey {
    pub priority: i32,
    pub lot_created_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
    pub stage_id: String,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.lot_created_at.cmp(&other.lot_created_at))
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.stage_id.cmp(&other.stage_id))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ==========================================
// QueueManager - 等待队列管理器
// ==========================================
pub struct QueueManager {
    repos: SchedulerRepositories,
}

impl QueueManager {
    pub fn new(repos: SchedulerRepositories) -> Self {
        Self { repos }
    }

    /// 入队: 工序进入机型等待队列 (内存修改,由调用方落库)
    ///
    /// # 返回
    /// - 分配的 queue_position
    pub fn enqueue(
        &self,
        stage: &mut StageExecution,
        machine_type_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<i32> {
        let waiting = self
            .repos
            .stage_repo
            .find_queued_for_machine_type(machine_type_id)?;
        let position = waiting
            .iter()
            .filter(|s| s.stage_id != stage.stage_id)
            .count() as i32
            + 1;

        state_machine::apply(stage, TransitionEvent::Block, now)?;
        stage.machine_id = None;
        stage.queue_position = Some(position);

        tracing::info!(
            stage_id = %stage.stage_id,
            machine_type_id,
            queue_position = position,
            "无可用机台,工序进入等待队列"
        );
        Ok(position)
    }

    /// 出队: 清除队列位置并压缩其余工序 (内存修改当前工序,其余工序直接落库)
    pub fn dequeue(&self, stage: &mut StageExecution, machine_type_id: &str) -> SchedulerResult<()> {
        stage.queue_position = None;
        self.compact(machine_type_id, Some(&stage.stage_id))
    }

    /// 按现有位置重新编号 1..n
    pub fn compact(&self, machine_type_id: &str, exclude_stage_id: Option<&str>) -> SchedulerResult<()> {
        let waiting = self
            .repos
            .stage_repo
            .find_queued_for_machine_type(machine_type_id)?;

        let mut position = 0;
        for mut stage in waiting {
            if Some(stage.stage_id.as_str()) == exclude_stage_id {
                continue;
            }
            position += 1;
            if stage.queue_position != Some(position) {
                stage.queue_position = Some(position);
                self.repos.stage_repo.update(&stage)?;
            }
        }
        Ok(())
    }

    /// 计算队列排序键 (批次创建时间按子批次缓存)
    fn queue_key(
        &self,
        stage: &StageExecution,
        lot_created: &mut HashMap<String, NaiveDateTime>,
    ) -> SchedulerResult<QueueKey> {
        let lot_created_at = match lot_created.get(&stage.sub_lot_id) {
            Some(at) => *at,
            None => {
                let at = self.repos.lot_of_stage(stage)?.created_at;
                lot_created.insert(stage.sub_lot_id.clone(), at);
                at
            }
        };
        Ok(QueueKey {
            priority: stage.priority,
            lot_created_at,
            created_at: stage.created_at,
            stage_id: stage.stage_id.clone(),
        })
    }

    /// 按队列规则排序
    pub fn sort_by_queue_order(
        &self,
        stages: Vec<StageExecution>,
    ) -> SchedulerResult<Vec<StageExecution>> {
        let mut lot_created = HashMap::new();
        let mut keyed = Vec::with_capacity(stages.len());
        for stage in stages {
            let key = self.queue_key(&stage, &mut lot_created)?;
            keyed.push((key, stage));
        }

        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, s)| s).collect())
    }

    /// 机型等待队列中排在该工序之前的工序 (按队列规则排序)
    pub fn queued_ahead_of(
        &self,
        stage: &StageExecution,
        machine_type_id: &str,
    ) -> SchedulerResult<Vec<StageExecution>> {
        let mut lot_created = HashMap::new();
        let own_key = self.queue_key(stage, &mut lot_created)?;

        let mut ahead = Vec::new();
        for queued in self.ordered_type_queue(machine_type_id)? {
            if queued.stage_id == stage.stage_id {
                continue;
            }
            if self.queue_key(&queued, &mut lot_created)? >= own_key {
                break;
            }
            ahead.push(queued);
        }
        Ok(ahead)
    }

    /// 机型等待队列 (按队列规则排序)
    pub fn ordered_type_queue(&self, machine_type_id: &str) -> SchedulerResult<Vec<StageExecution>> {
        let waiting = self
            .repos
            .stage_repo
            .find_queued_for_machine_type(machine_type_id)?;
        self.sort_by_queue_order(waiting)
    }

    /// 机台空出时应提升的工序
    pub fn next_for_machine(&self, machine: &Machine) -> SchedulerResult<Option<StageExecution>> {
        Ok(self
            .ordered_type_queue(&machine.machine_type_id)?
            .into_iter()
            .next())
    }

    /// 机台等待集合: 已分配未开工的积压 + 同机型等待队列
    pub fn wait_set(&self, machine: &Machine) -> SchedulerResult<Vec<StageExecution>> {
        let mut set = self.repos.stage_repo.find_by_machine_and_status(
            &machine.machine_id,
            &[StageStatus::Pending, StageStatus::Waiting],
        )?;
        set.extend(
            self.repos
                .stage_repo
                .find_queued_for_machine_type(&machine.machine_type_id)?,
        );
        self.sort_by_queue_order(set)
    }

    /// 调整优先级: 提升 step,上限 max
    ///
    /// # 返回
    /// - (原优先级, 新优先级)
    pub fn bump_priority(
        &self,
        machine: &Machine,
        stage: &mut StageExecution,
        step: i32,
        max: i32,
    ) -> SchedulerResult<(i32, i32)> {
        let in_wait_set = stage.is_backlog_of(&machine.machine_id)
            || (stage.is_type_queued()
                && self.repos.machine_type_of(stage)? == machine.machine_type_id);
        if !in_wait_set {
            return Err(SchedulerError::NotQueued {
                stage_id: stage.stage_id.clone(),
                machine_id: machine.machine_id.clone(),
            });
        }

        let old = stage.priority;
        stage.priority = old.saturating_add(step).min(max);
        Ok((old, stage.priority))
    }
}
