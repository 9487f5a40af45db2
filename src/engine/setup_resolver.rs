// ==========================================
// 工序排产引擎 - 换型判定
// ==========================================
// 职责: 判定工序上机前是否需要换型,给出并记录换型时长
// 输入: (工序, 目标机台)
// 输出: SetupResolution { None | Created }
// 红线: 每个 (机台, 源零件, 目标零件) 只保留一条换型时间记录
// ==========================================

use crate::domain::{SetupTimeRecord, SetupTimeSource, StageExecution, StageStatus, TransitionEvent};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::repositories::SchedulerRepositories;
use crate::engine::state_machine;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// 换型判定结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SetupResolution {
    /// 无需换型
    None,
    /// 已合成换型工序,主工序进入等待
    Created {
        setup_stage_id: String,
        duration_minutes: f64,
    },
}

impl SetupResolution {
    pub fn setup_stage_id(&self) -> Option<&str> {
        match self {
            SetupResolution::None => None,
            SetupResolution::Created { setup_stage_id, .. } => Some(setup_stage_id),
        }
    }
}

// ==========================================
// SetupResolver - 换型判定器
// ==========================================
pub struct SetupResolver {
    repos: SchedulerRepositories,
}

impl SetupResolver {
    pub fn new(repos: SchedulerRepositories) -> Self {
        Self { repos }
    }

    /// 机台最近完工工序的零件
    pub fn last_part_on_machine(&self, machine_id: &str) -> SchedulerResult<Option<String>> {
        match self.repos.stage_repo.find_last_completed_on_machine(machine_id)? {
            Some(last) => Ok(Some(self.repos.part_of_stage(&last)?)),
            None => Ok(None),
        }
    }

    /// 已记录的换型分钟数 (评分用,只读)
    ///
    /// 无上件零件、同零件或尚无记录时返回 None
    pub fn known_setup_minutes(
        &self,
        machine_id: &str,
        to_part_id: &str,
    ) -> SchedulerResult<Option<f64>> {
        let Some(from_part_id) = self.last_part_on_machine(machine_id)? else {
            return Ok(None);
        };
        if from_part_id == to_part_id {
            return Ok(None);
        }
        Ok(self
            .repos
            .setup_time_repo
            .get(machine_id, &from_part_id, to_part_id)?
            .map(|r| r.duration_minutes))
    }

    /// 为即将上机的主工序判定换型
    ///
    /// # 前置条件
    /// - main 已写入目标机台 (machine_id) 且仍为 Pending
    ///
    /// # 副作用
    /// - 首次出现的换型组合写入换型时间记录 (来源 DEFAULT)
    /// - 合成并写入换型工序,建立换型关联
    /// - main 迁移为 Waiting (内存中,由调用方落库)
    pub fn resolve(
        &self,
        main: &mut StageExecution,
        machine_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<SetupResolution> {
        if main.is_setup {
            return Ok(SetupResolution::None);
        }

        // 既有换型关联: 同机台未完工则复用,终态则解除
        if let Some(existing_id) = self.repos.stage_repo.find_setup_for(&main.stage_id)? {
            match self.repos.stage_repo.get_by_id(&existing_id)? {
                Some(existing) if !existing.status.is_terminal() => {
                    if existing.machine_id.as_deref() != Some(machine_id) {
                        return Err(SchedulerError::InvalidInput(format!(
                            "工序 {} 的换型工序 {} 仍在机台 {:?} 上未完工",
                            main.stage_id, existing.stage_id, existing.machine_id
                        )));
                    }
                    if main.status == StageStatus::Pending {
                        state_machine::apply(main, TransitionEvent::Block, now)?;
                    }
                    return Ok(SetupResolution::Created {
                        setup_stage_id: existing.stage_id,
                        duration_minutes: existing.planned_minutes,
                    });
                }
                _ => self.repos.stage_repo.unlink_setup(&existing_id)?,
            }
        }

        let to_part_id = self.repos.part_of_stage(main)?;
        let Some(from_part_id) = self.last_part_on_machine(machine_id)? else {
            return Ok(SetupResolution::None);
        };
        if from_part_id == to_part_id {
            return Ok(SetupResolution::None);
        }

        let duration_minutes = match self
            .repos
            .setup_time_repo
            .get(machine_id, &from_part_id, &to_part_id)?
        {
            Some(record) => record.duration_minutes,
            None => {
                let step = self.repos.require_step(&main.routing_step_id)?;
                let record = SetupTimeRecord::new(
                    machine_id,
                    &from_part_id,
                    &to_part_id,
                    step.default_setup_minutes,
                    SetupTimeSource::Default,
                    now,
                );
                self.repos.setup_time_repo.upsert(&record)?;
                tracing::info!(
                    machine_id,
                    from_part_id = %from_part_id,
                    to_part_id = %to_part_id,
                    duration_minutes = record.duration_minutes,
                    "首次换型,按工艺默认值登记换型时间"
                );
                record.duration_minutes
            }
        };

        if duration_minutes <= 0.0 {
            return Ok(SetupResolution::None);
        }

        let setup = StageExecution::new_setup_for(main, machine_id, duration_minutes, now);
        self.repos.stage_repo.insert(&setup)?;
        self.repos
            .stage_repo
            .link_setup(&setup.stage_id, &main.stage_id, now)?;
        state_machine::apply(main, TransitionEvent::Block, now)?;

        tracing::info!(
            main_stage_id = %main.stage_id,
            setup_stage_id = %setup.stage_id,
            machine_id,
            duration_minutes,
            "已合成换型工序"
        );

        Ok(SetupResolution::Created {
            setup_stage_id: setup.stage_id,
            duration_minutes,
        })
    }
}
