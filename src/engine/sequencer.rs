// ==========================================
// 工序排产引擎 - 工序顺序控制
// ==========================================
// 职责: 子批次内按工艺顺序放行,完工后推进下一道工序
// 红线: 后道工序只能在全部前道生产工序完工后开工
// 红线: 子批次/批次完工信号只发出一次
// ==========================================

use crate::domain::{LotStatus, StageExecution, StageStatus};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::repositories::SchedulerRepositories;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 子批次完工检查结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubLotProgress {
    pub lot_id: String,
    /// 本次调用使子批次完工
    pub sub_lot_completed: bool,
    /// 本次调用使批次完工
    pub lot_completed: bool,
}

// ==========================================
// Sequencer - 工序顺序控制器
// ==========================================
pub struct Sequencer {
    repos: SchedulerRepositories,
}

impl Sequencer {
    pub fn new(repos: SchedulerRepositories) -> Self {
        Self { repos }
    }

    /// 依赖检查: 全部前道工序在子批次内有已完工的生产工序
    ///
    /// 换型工序不受工艺顺序约束
    pub fn check_dependencies(&self, stage: &StageExecution) -> SchedulerResult<()> {
        if stage.is_setup {
            return Ok(());
        }

        let step = self.repos.require_step(&stage.routing_step_id)?;
        let routing = self.repos.require_routing(&step.routing_id)?;
        let siblings = self.repos.stage_repo.find_by_sub_lot(&stage.sub_lot_id)?;

        for prior in routing.steps_before(step.step_order) {
            let done = siblings.iter().any(|s| {
                !s.is_setup && s.routing_step_id == prior.step_id && s.status == StageStatus::Completed
            });
            if !done {
                tracing::debug!(
                    stage_id = %stage.stage_id,
                    step_order = step.step_order,
                    missing_step_order = prior.step_order,
                    "前序工序未完工"
                );
                return Err(SchedulerError::DependencyNotSatisfied {
                    stage_id: stage.stage_id.clone(),
                    step_order: step.step_order,
                    missing_step_order: prior.step_order,
                });
            }
        }
        Ok(())
    }

    /// 下一道工序的在途生产工序
    ///
    /// # 返回
    /// - Some(stage): 下一道工序存在且未终结
    /// - None: 已是末道工序,或下一道工序已终结
    pub fn next_stage_after(
        &self,
        completed: &StageExecution,
    ) -> SchedulerResult<Option<StageExecution>> {
        let step = self.repos.require_step(&completed.routing_step_id)?;
        let routing = self.repos.require_routing(&step.routing_id)?;

        let Some(next_step) = routing.next_step_after(step.step_order) else {
            return Ok(None);
        };

        let next = self
            .repos
            .stage_repo
            .find_by_sub_lot(&completed.sub_lot_id)?
            .into_iter()
            .find(|s| {
                !s.is_setup && s.routing_step_id == next_step.step_id && !s.status.is_terminal()
            });
        Ok(next)
    }

    /// 子批次内每道工序都有已完工的生产工序
    pub fn is_sub_lot_finished(&self, sub_lot_id: &str) -> SchedulerResult<bool> {
        let sub_lot = self.repos.require_sub_lot(sub_lot_id)?;
        let lot = self.repos.require_lot(&sub_lot.lot_id)?;
        let routing = self.repos.require_routing(&lot.routing_id)?;
        let stages = self.repos.stage_repo.find_by_sub_lot(sub_lot_id)?;

        Ok(routing.steps.iter().all(|step| {
            stages.iter().any(|s| {
                !s.is_setup && s.routing_step_id == step.step_id && s.status == StageStatus::Completed
            })
        }))
    }

    /// 子批次完工后标记子批次与批次
    pub fn complete_sub_lot_if_finished(
        &self,
        sub_lot_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<SubLotProgress> {
        let sub_lot = self.repos.require_sub_lot(sub_lot_id)?;
        let mut progress = SubLotProgress {
            lot_id: sub_lot.lot_id.clone(),
            ..SubLotProgress::default()
        };

        if !self.is_sub_lot_finished(sub_lot_id)? {
            return Ok(progress);
        }

        progress.sub_lot_completed = self.repos.lot_repo.mark_sub_lot_completed(sub_lot_id, now)?;
        if !progress.sub_lot_completed {
            return Ok(progress);
        }
        tracing::info!(sub_lot_id, lot_id = %sub_lot.lot_id, "子批次完工");

        let all_done = self
            .repos
            .lot_repo
            .list_sub_lots(&sub_lot.lot_id)?
            .iter()
            .all(|s| s.status == LotStatus::Completed);
        if all_done {
            progress.lot_completed = self.repos.lot_repo.mark_lot_completed(&sub_lot.lot_id, now)?;
            if progress.lot_completed {
                tracing::info!(lot_id = %sub_lot.lot_id, "批次完工");
            }
        }
        Ok(progress)
    }
}
