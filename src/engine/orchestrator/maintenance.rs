use super::types::{
    ConflictRepair, ConflictReport, OptimizeReport, QueueAssignment, QueueMove, StageFailure,
    StageOutcome,
};
use super::SchedulerOrchestrator;
use crate::domain::{StageExecution, StageStatus, TransitionEvent};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::forecast::QueueForecast;
use crate::engine::machine_selector::pick_best;
use crate::engine::state_machine;
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// 冲突修复保留顺序: 最早开工者优先,未记录开工时间的排在最后
fn occupancy_order(a: &StageExecution, b: &StageExecution) -> std::cmp::Ordering {
    match (a.started_at, b.started_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
    .then_with(|| a.stage_id.cmp(&b.stage_id))
}

impl SchedulerOrchestrator {
    // ==========================================
    // 并发占用检查与修复
    // ==========================================

    /// 检查每台机台至多一道加工中工序
    pub fn verify_single_occupancy(&self) -> SchedulerResult<()> {
        for machine in self.all_machines()? {
            let running = self
                .repos
                .stage_repo
                .find_by_machine_and_status(&machine.machine_id, &[StageStatus::InProgress])?;
            if running.len() > 1 {
                return Err(SchedulerError::ConcurrencyConflict {
                    machine_id: machine.machine_id,
                    stage_ids: running.into_iter().map(|s| s.stage_id).collect(),
                });
            }
        }
        Ok(())
    }

    /// 修复同一机台上多道加工中工序
    ///
    /// 保留最早开工者;其余退回待分配,生产工序重新调度
    pub fn resolve_conflicts(&self) -> SchedulerResult<ConflictReport> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let mut report = ConflictReport::default();

        for machine in self.all_machines()? {
            let mut running = self
                .repos
                .stage_repo
                .find_by_machine_and_status(&machine.machine_id, &[StageStatus::InProgress])?;
            if running.len() <= 1 {
                continue;
            }
            running.sort_by(occupancy_order);

            let mut others = running.into_iter();
            let Some(kept) = others.next() else {
                continue;
            };
            warn!(
                machine_id = %machine.machine_id,
                kept_stage_id = %kept.stage_id,
                conflicting = others.len(),
                "检测到机台并发占用"
            );

            let mut repair = ConflictRepair {
                machine_id: machine.machine_id.clone(),
                kept_stage_id: kept.stage_id,
                requeued_stage_ids: Vec::new(),
            };

            for stage in others {
                let stage_id = stage.stage_id.clone();
                let requeued = match self.requeue_loaded(stage, now) {
                    Ok(requeued) => requeued,
                    Err(e) => {
                        report.failures.push(StageFailure::new(&stage_id, &e));
                        continue;
                    }
                };
                repair.requeued_stage_ids.push(stage_id.clone());

                if requeued.is_setup {
                    continue;
                }
                match self.schedule_loaded(requeued, now) {
                    Ok(outcome) => report.rescheduled.push(StageOutcome { stage_id, outcome }),
                    Err(e) => {
                        warn!(stage_id = %stage_id, error = %e, "退回工序重新调度失败");
                        report.failures.push(StageFailure::new(&stage_id, &e));
                    }
                }
            }
            report.repairs.push(repair);
        }

        info!(
            repairs = report.repairs.len(),
            rescheduled = report.rescheduled.len(),
            failures = report.failures.len(),
            "并发占用修复完成"
        );
        Ok(report)
    }

    // ==========================================
    // 队列优化清扫
    // ==========================================

    /// 重新评分清扫 (幂等)
    ///
    /// 1. 机型等待队列按队列顺序尝试分配
    /// 2. 已分配未开工且无换型的生产工序,若其他机台得分高出 reassign_min_gain 则改派
    pub fn optimize_queue(&self) -> SchedulerResult<OptimizeReport> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let mut report = OptimizeReport::default();

        let machines = self.all_machines()?;
        let machine_types: BTreeSet<String> =
            machines.iter().map(|m| m.machine_type_id.clone()).collect();

        for machine_type_id in &machine_types {
            for stage in self.queue_manager.ordered_type_queue(machine_type_id)? {
                let stage_id = stage.stage_id.clone();
                match self.try_assign_queued(stage, machine_type_id, now) {
                    Ok(Some(machine_id)) => {
                        report.assigned.push(QueueAssignment { stage_id, machine_id })
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(stage_id = %stage_id, error = %e, "等待队列工序分配失败");
                        report.failures.push(StageFailure::new(&stage_id, &e));
                    }
                }
            }
        }

        let mut moved: HashSet<String> = HashSet::new();
        for machine in &machines {
            let backlog = self
                .repos
                .stage_repo
                .find_by_machine_and_status(&machine.machine_id, &[StageStatus::Pending])?;
            for stage in backlog {
                if stage.is_setup || moved.contains(&stage.stage_id) {
                    continue;
                }
                let stage_id = stage.stage_id.clone();
                match self.try_move_assigned(stage, now) {
                    Ok(Some(queue_move)) => {
                        moved.insert(stage_id);
                        report.moves.push(queue_move);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(stage_id = %stage_id, error = %e, "积压工序改派评估失败");
                        report.failures.push(StageFailure::new(&stage_id, &e));
                    }
                }
            }
        }

        info!(
            assigned = report.assigned.len(),
            moves = report.moves.len(),
            failures = report.failures.len(),
            "队列优化清扫完成"
        );
        Ok(report)
    }

    /// 等待队列工序: 有可用机台时出队并分配
    fn try_assign_queued(
        &self,
        mut stage: StageExecution,
        machine_type_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<Option<String>> {
        let Some(candidate) = self.selector.select(&stage, now)? else {
            return Ok(None);
        };
        let machine_id = candidate.machine.machine_id;

        self.queue_manager.dequeue(&mut stage, machine_type_id)?;
        state_machine::apply(&mut stage, TransitionEvent::Unblock, now)?;
        self.assign_to_machine(stage, &machine_id, TransitionEvent::Assign, Some(candidate.score), now)?;
        Ok(Some(machine_id))
    }

    /// 已分配工序: 其他机台得分足够高时改派
    fn try_move_assigned(
        &self,
        stage: StageExecution,
        now: NaiveDateTime,
    ) -> SchedulerResult<Option<QueueMove>> {
        let Some(from_machine_id) = stage.machine_id.clone() else {
            return Ok(None);
        };
        if self.repos.stage_repo.find_setup_for(&stage.stage_id)?.is_some() {
            return Ok(None);
        }

        let part_id = self.repos.part_of_stage(&stage)?;
        let current_machine = self.repos.require_machine(&from_machine_id)?;
        let current = self.selector.evaluate(&stage, &part_id, &current_machine, now)?;

        let mut candidates = Vec::new();
        for machine in self.selector.eligible_machines(&current_machine.machine_type_id)? {
            if machine.machine_id == from_machine_id {
                continue;
            }
            candidates.push(self.selector.evaluate(&stage, &part_id, &machine, now)?);
        }
        let Some(best) = pick_best(candidates) else {
            return Ok(None);
        };

        let gain = best.score - current.score;
        if gain < self.config.reassign_min_gain {
            debug!(
                stage_id = %stage.stage_id,
                from_machine_id = %from_machine_id,
                best_machine_id = %best.machine.machine_id,
                gain,
                "得分提升不足,保持原机台"
            );
            return Ok(None);
        }

        let to_machine_id = best.machine.machine_id;
        let stage_id = stage.stage_id.clone();
        info!(
            stage_id = %stage_id,
            from_machine_id = %from_machine_id,
            to_machine_id = %to_machine_id,
            gain,
            "队列优化: 改派到更优机台"
        );
        self.assign_to_machine(stage, &to_machine_id, TransitionEvent::Reassign, Some(best.score), now)?;
        self.advance_queue(&from_machine_id, now)?;

        Ok(Some(QueueMove {
            stage_id,
            from_machine_id,
            to_machine_id,
            gain,
        }))
    }

    // ==========================================
    // 只读预测
    // ==========================================

    /// 队列预测 (不持写锁)
    pub fn queue_forecast(&self) -> SchedulerResult<QueueForecast> {
        self.forecaster.forecast(self.now())
    }
}
