use super::types::{CompletionOutcome, ScheduleOutcome, StageFailure, StageOutcome};
use super::SchedulerOrchestrator;
use crate::domain::{StageExecution, StageStatus, TransitionEvent};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::events::{StageEvent, StageEventType};
use crate::engine::state_machine;
use chrono::NaiveDateTime;
use serde_json::json;
use tracing::{info, warn};

/// 暂停时段计入累计暂停分钟
fn accumulate_pause(stage: &mut StageExecution, now: NaiveDateTime) {
    if let Some(paused_at) = stage.paused_at {
        let minutes = (now - paused_at).num_seconds() as f64 / 60.0;
        stage.paused_minutes += minutes.max(0.0);
    }
}

impl SchedulerOrchestrator {
    // ==========================================
    // 开工 / 暂停 / 恢复
    // ==========================================

    /// 开工
    ///
    /// 守卫顺序: 状态 → 前序工序 → 已分配机台 → 换型完工 → 机台无其他加工中工序
    pub fn start_stage(
        &self,
        stage_id: &str,
        operator: Option<&str>,
        device: Option<&str>,
    ) -> SchedulerResult<StageExecution> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let mut stage = self.repos.require_stage(stage_id)?;

        state_machine::ensure_allowed(&stage, TransitionEvent::Start)?;
        self.sequencer.check_dependencies(&stage)?;

        let Some(machine_id) = stage.machine_id.clone() else {
            return Err(state_machine::invalid_transition(
                &stage,
                TransitionEvent::Start,
                "未分配机台",
            ));
        };

        if !stage.is_setup {
            if let Some(setup_id) = self.repos.stage_repo.find_setup_for(&stage.stage_id)? {
                let setup = self.repos.require_stage(&setup_id)?;
                if setup.status != StageStatus::Completed {
                    return Err(state_machine::invalid_transition(
                        &stage,
                        TransitionEvent::Start,
                        format!("换型工序 {} 未完工 ({})", setup_id, setup.status),
                    ));
                }
            }
        }

        self.ensure_machine_free(&stage, &machine_id, TransitionEvent::Start)?;

        state_machine::apply(&mut stage, TransitionEvent::Start, now)?;
        stage.started_at = Some(now);
        if let Some(operator) = operator {
            stage.operator = Some(operator.to_string());
        }
        if let Some(device) = device {
            stage.device = Some(device.to_string());
        }
        self.repos.stage_repo.update(&stage)?;

        info!(stage_id, machine_id = %machine_id, operator = ?operator, "工序开工");
        self.emit(StageEvent::for_stage(StageEventType::Started, &stage, now).with_actor(operator));
        Ok(stage)
    }

    /// 暂停
    pub fn pause_stage(
        &self,
        stage_id: &str,
        operator: Option<&str>,
        reason: Option<&str>,
    ) -> SchedulerResult<StageExecution> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let mut stage = self.repos.require_stage(stage_id)?;

        state_machine::apply(&mut stage, TransitionEvent::Pause, now)?;
        stage.paused_at = Some(now);
        if let Some(operator) = operator {
            stage.operator = Some(operator.to_string());
        }
        if let Some(reason) = reason {
            stage.reason = Some(reason.to_string());
        }
        self.repos.stage_repo.update(&stage)?;

        info!(stage_id, reason = ?reason, "工序暂停");
        let mut event = StageEvent::for_stage(StageEventType::Paused, &stage, now).with_actor(operator);
        if let Some(reason) = reason {
            event = event.with_detail(reason);
        }
        self.emit(event);
        Ok(stage)
    }

    /// 恢复 (机台上不得已有其他加工中工序)
    pub fn resume_stage(
        &self,
        stage_id: &str,
        operator: Option<&str>,
    ) -> SchedulerResult<StageExecution> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let mut stage = self.repos.require_stage(stage_id)?;

        state_machine::ensure_allowed(&stage, TransitionEvent::Resume)?;
        if let Some(machine_id) = stage.machine_id.clone() {
            self.ensure_machine_free(&stage, &machine_id, TransitionEvent::Resume)?;
        }

        state_machine::apply(&mut stage, TransitionEvent::Resume, now)?;
        accumulate_pause(&mut stage, now);
        stage.resumed_at = Some(now);
        if let Some(operator) = operator {
            stage.operator = Some(operator.to_string());
        }
        self.repos.stage_repo.update(&stage)?;

        info!(stage_id, paused_minutes = stage.paused_minutes, "工序恢复");
        self.emit(StageEvent::for_stage(StageEventType::Resumed, &stage, now).with_actor(operator));
        Ok(stage)
    }

    // ==========================================
    // 完工级联
    // ==========================================

    /// 完工
    ///
    /// 级联:
    /// - 换型工序: 解除主工序等待
    /// - 生产工序: 调度下一道工序;末道工序完工时检查子批次/批次完工
    /// - 所有情况: 提升空出机台的等待队列
    pub fn complete_stage(&self, stage_id: &str) -> SchedulerResult<CompletionOutcome> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let mut stage = self.repos.require_stage(stage_id)?;

        let from = stage.status;
        state_machine::apply(&mut stage, TransitionEvent::Complete, now)?;
        if from == StageStatus::Paused {
            accumulate_pause(&mut stage, now);
        }
        stage.ended_at = Some(now);
        self.repos.stage_repo.update(&stage)?;

        info!(
            stage_id,
            machine_id = ?stage.machine_id,
            is_setup = stage.is_setup,
            elapsed_minutes = stage.elapsed_minutes(now),
            "工序完工"
        );
        self.emit(StageEvent::for_stage(StageEventType::Completed, &stage, now));

        let mut outcome = CompletionOutcome::new(stage.clone());

        if stage.is_setup {
            outcome.unblocked_main_id = self.unblock_main_of(&stage, now)?;
        } else {
            match self.sequencer.next_stage_after(&stage)? {
                Some(next) => {
                    let next_id = next.stage_id.clone();
                    match self.schedule_loaded(next, now) {
                        Ok(next_outcome) => {
                            outcome.next_stage = Some(StageOutcome {
                                stage_id: next_id,
                                outcome: next_outcome,
                            })
                        }
                        Err(e) => {
                            warn!(stage_id = %next_id, error = %e, "下一道工序调度失败");
                            outcome.cascade_failure = Some(StageFailure::new(&next_id, &e));
                        }
                    }
                }
                None => {
                    let progress = self
                        .sequencer
                        .complete_sub_lot_if_finished(&stage.sub_lot_id, now)?;
                    if progress.sub_lot_completed {
                        self.emit(StageEvent::sub_lot_completed(
                            &stage.sub_lot_id,
                            &progress.lot_id,
                            now,
                        ));
                    }
                    if progress.lot_completed {
                        self.emit(StageEvent::lot_completed(&progress.lot_id, now));
                    }
                    outcome.sub_lot_completed = progress.sub_lot_completed;
                    outcome.lot_completed = progress.lot_completed;
                }
            }
        }

        if let Some(machine_id) = &stage.machine_id {
            outcome.promoted = self.advance_queue(machine_id, now)?;
        }
        Ok(outcome)
    }

    // ==========================================
    // 取消
    // ==========================================

    /// 取消 (必须给出原因)
    ///
    /// 级联:
    /// - 主工序取消: 同时取消未开工的换型工序
    /// - 换型工序取消: 解除关联并解除主工序等待
    /// - 原在机型等待队列: 压缩队列位置
    /// - 原已分配机台: 尝试提升该机台的等待队列
    pub fn cancel_stage(
        &self,
        stage_id: &str,
        reason: &str,
        operator: Option<&str>,
    ) -> SchedulerResult<StageExecution> {
        if reason.trim().is_empty() {
            return Err(SchedulerError::InvalidInput("取消工序必须填写原因".to_string()));
        }

        let _guard = self.lock_writer()?;
        let now = self.now();
        let mut stage = self.repos.require_stage(stage_id)?;

        let was_type_queued = stage.is_type_queued();
        let machine_id = stage.machine_id.clone();

        self.cancel_loaded(&mut stage, reason, operator, now)?;

        if was_type_queued {
            let machine_type_id = self.repos.machine_type_of(&stage)?;
            self.queue_manager.compact(&machine_type_id, None)?;
        }

        if stage.is_setup {
            if let Some(main_id) = self.repos.stage_repo.find_main_for(&stage.stage_id)? {
                self.repos.stage_repo.unlink_setup(&stage.stage_id)?;
                info!(setup_stage_id = stage_id, main_stage_id = %main_id, "换型工序取消,解除关联");
                self.unblock_stage(&main_id, now)?;
            }
        } else if let Some(setup_id) = self.repos.stage_repo.find_setup_for(&stage.stage_id)? {
            let mut setup = self.repos.require_stage(&setup_id)?;
            if matches!(setup.status, StageStatus::Pending | StageStatus::Waiting) {
                let cascade_reason = format!("主工序已取消: {}", reason);
                self.cancel_loaded(&mut setup, &cascade_reason, operator, now)?;
            }
        }

        if let Some(machine_id) = machine_id {
            self.advance_queue(&machine_id, now)?;
        }
        Ok(stage)
    }

    // ==========================================
    // 人工干预: 改派 / 调整优先级
    // ==========================================

    /// 人工改派到指定机台
    ///
    /// # 错误
    /// - InvalidInput: 换型工序不允许改派
    /// - MachineTypeMismatch: 目标机台机型与工艺步骤不符
    /// - InvalidTransition: 工序非 Pending/Waiting,或其换型工序已开工
    pub fn reassign_stage(
        &self,
        stage_id: &str,
        machine_id: &str,
    ) -> SchedulerResult<ScheduleOutcome> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let mut stage = self.repos.require_stage(stage_id)?;

        if stage.is_setup {
            return Err(SchedulerError::InvalidInput(format!(
                "换型工序 {} 不允许改派",
                stage_id
            )));
        }
        state_machine::ensure_allowed(&stage, TransitionEvent::Reassign)?;

        let machine = self.repos.require_machine(machine_id)?;
        let expected = self.repos.machine_type_of(&stage)?;
        if machine.machine_type_id != expected {
            return Err(SchedulerError::MachineTypeMismatch {
                stage_id: stage_id.to_string(),
                machine_id: machine_id.to_string(),
                expected,
                actual: machine.machine_type_id,
            });
        }
        self.sequencer.check_dependencies(&stage)?;

        if stage.machine_id.as_deref() == Some(machine_id) {
            return Ok(ScheduleOutcome::Skipped {
                reason: format!("工序已在机台 {} 上", machine_id),
            });
        }

        let existing_setup = match self.repos.stage_repo.find_setup_for(stage_id)? {
            Some(setup_id) => Some(self.repos.require_stage(&setup_id)?),
            None => None,
        };
        if let Some(setup) = &existing_setup {
            if setup.status.holds_machine() {
                return Err(state_machine::invalid_transition(
                    &stage,
                    TransitionEvent::Reassign,
                    format!("换型工序 {} 已开工 ({})", setup.stage_id, setup.status),
                ));
            }
        }

        if let Some(mut setup) = existing_setup {
            if !setup.status.is_terminal() {
                self.cancel_loaded(&mut setup, "主工序改派", None, now)?;
            }
            self.repos.stage_repo.unlink_setup(&setup.stage_id)?;
        }

        if stage.is_type_queued() {
            self.queue_manager.dequeue(&mut stage, &expected)?;
        }

        let from_machine = stage.machine_id.clone();
        info!(
            stage_id,
            from_machine_id = ?from_machine,
            to_machine_id = machine_id,
            "人工改派工序"
        );
        let outcome = self.assign_to_machine(stage, machine_id, TransitionEvent::Reassign, None, now)?;

        if let Some(from_machine) = from_machine {
            self.advance_queue(&from_machine, now)?;
        }
        Ok(outcome)
    }

    /// 提升机台等待集合中某道工序的优先级
    ///
    /// 新优先级 = min(原优先级 + reprioritize_step, max_priority);
    /// 未开工的换型工序同步为新优先级 + 1
    ///
    /// # 错误
    /// - NotQueued: 工序不在该机台的等待集合中
    pub fn reprioritize(&self, machine_id: &str, stage_id: &str) -> SchedulerResult<StageExecution> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let machine = self.repos.require_machine(machine_id)?;
        let mut stage = self.repos.require_stage(stage_id)?;

        let (old, new) = self.queue_manager.bump_priority(
            &machine,
            &mut stage,
            self.config.reprioritize_step,
            self.config.max_priority,
        )?;
        self.repos.stage_repo.update(&stage)?;

        if let Some(setup_id) = self.repos.stage_repo.find_setup_for(stage_id)? {
            let mut setup = self.repos.require_stage(&setup_id)?;
            if matches!(setup.status, StageStatus::Pending | StageStatus::Waiting) {
                setup.priority = new.saturating_add(1);
                self.repos.stage_repo.update(&setup)?;
            }
        }

        info!(stage_id, machine_id, old_priority = old, new_priority = new, "调整工序优先级");
        self.emit(
            StageEvent::for_stage(StageEventType::Reprioritized, &stage, now)
                .with_payload(json!({ "old_priority": old, "new_priority": new })),
        );
        Ok(stage)
    }

    // ==========================================
    // 内部流程 (调用方已持有写锁)
    // ==========================================

    pub(super) fn cancel_loaded(
        &self,
        stage: &mut StageExecution,
        reason: &str,
        operator: Option<&str>,
        now: NaiveDateTime,
    ) -> SchedulerResult<()> {
        state_machine::apply(stage, TransitionEvent::Cancel, now)?;
        stage.ended_at = Some(now);
        stage.reason = Some(reason.to_string());
        stage.queue_position = None;
        stage.error_count += 1;
        if let Some(operator) = operator {
            stage.operator = Some(operator.to_string());
        }
        self.repos.stage_repo.update(stage)?;

        info!(stage_id = %stage.stage_id, reason, "工序取消");
        self.emit(
            StageEvent::for_stage(StageEventType::Cancelled, stage, now)
                .with_actor(operator)
                .with_detail(reason),
        );
        Ok(())
    }

    /// 换型工序完工后解除主工序等待
    fn unblock_main_of(
        &self,
        setup: &StageExecution,
        now: NaiveDateTime,
    ) -> SchedulerResult<Option<String>> {
        match self.repos.stage_repo.find_main_for(&setup.stage_id)? {
            Some(main_id) => self.unblock_stage(&main_id, now),
            None => Ok(None),
        }
    }

    /// 已分配且等待中的工序 → Pending
    fn unblock_stage(&self, stage_id: &str, now: NaiveDateTime) -> SchedulerResult<Option<String>> {
        let mut stage = self.repos.require_stage(stage_id)?;
        if stage.status != StageStatus::Waiting || stage.machine_id.is_none() {
            return Ok(None);
        }
        state_machine::apply(&mut stage, TransitionEvent::Unblock, now)?;
        self.repos.stage_repo.update(&stage)?;

        info!(stage_id, "主工序解除等待");
        self.emit(StageEvent::for_stage(StageEventType::Unblocked, &stage, now));
        Ok(Some(stage.stage_id))
    }

    /// 冲突修复: 退回待分配 (换型工序保留机台,生产工序清空机台)
    pub(super) fn requeue_loaded(
        &self,
        mut stage: StageExecution,
        now: NaiveDateTime,
    ) -> SchedulerResult<StageExecution> {
        state_machine::apply(&mut stage, TransitionEvent::Requeue, now)?;
        stage.started_at = None;
        stage.paused_at = None;
        stage.resumed_at = None;
        stage.paused_minutes = 0.0;
        stage.retry_count += 1;
        let from_machine = stage.machine_id.clone();
        if !stage.is_setup {
            stage.machine_id = None;
        }
        self.repos.stage_repo.update(&stage)?;

        warn!(
            stage_id = %stage.stage_id,
            machine_id = ?from_machine,
            retry_count = stage.retry_count,
            "冲突修复: 工序退回待分配"
        );
        self.emit(
            StageEvent::for_stage(StageEventType::Requeued, &stage, now)
                .with_payload(json!({ "from_machine_id": from_machine })),
        );
        Ok(stage)
    }
}
