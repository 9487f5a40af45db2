use super::types::{LotCreation, ScheduleOutcome, StageFailure, StageOutcome};
use super::SchedulerOrchestrator;
use crate::domain::{LotSpec, StageExecution, StageStatus, TransitionEvent};
use crate::engine::error::SchedulerResult;
use crate::engine::events::{StageEvent, StageEventType};
use crate::engine::setup_resolver::SetupResolution;
use crate::engine::state_machine;
use chrono::NaiveDateTime;
use serde_json::json;
use tracing::{debug, info, warn};

impl SchedulerOrchestrator {
    // ==========================================
    // 调度入口
    // ==========================================

    /// 为待分配工序选择机台
    ///
    /// # 返回
    /// - Skipped: 工序非待分配状态或已分配机台
    /// - Queued: 无可用机台,进入机型等待队列
    /// - Assigned: 已分配 (可能合成了换型工序)
    ///
    /// # 错误
    /// - DependencyNotSatisfied: 前序工序未完工
    pub fn schedule_stage(&self, stage_id: &str) -> SchedulerResult<ScheduleOutcome> {
        let _guard = self.lock_writer()?;
        let now = self.now();
        let stage = self.repos.require_stage(stage_id)?;
        info!(stage_id, "调度工序");
        self.schedule_loaded(stage, now)
    }

    /// 按零件工艺生成批次与工序,按需调度各子批次首道工序
    pub fn create_lot_and_schedule(&self, spec: &LotSpec) -> SchedulerResult<LotCreation> {
        let _guard = self.lock_writer()?;
        let now = self.now();

        let generated = self.generator.generate(spec, now)?;
        for stage in &generated.stages {
            self.emit(
                StageEvent::for_stage(StageEventType::Created, stage, now)
                    .with_lot(&generated.lot.lot_id),
            );
        }

        let mut creation = LotCreation {
            lot_id: generated.lot.lot_id.clone(),
            sub_lot_ids: generated.sub_lots.iter().map(|s| s.sub_lot_id.clone()).collect(),
            stage_ids: generated.stages.iter().map(|s| s.stage_id.clone()).collect(),
            scheduled: Vec::new(),
            failures: Vec::new(),
        };

        let schedule_now = spec
            .schedule_immediately
            .unwrap_or(self.config.auto_schedule_on_create);
        if !schedule_now {
            return Ok(creation);
        }

        for stage_id in &generated.first_stage_ids {
            let result = self
                .repos
                .require_stage(stage_id)
                .and_then(|stage| self.schedule_loaded(stage, now));
            match result {
                Ok(outcome) => creation.scheduled.push(StageOutcome {
                    stage_id: stage_id.clone(),
                    outcome,
                }),
                Err(e) => {
                    warn!(stage_id = %stage_id, error = %e, "首道工序调度失败");
                    creation.failures.push(StageFailure::new(stage_id, &e));
                }
            }
        }

        info!(
            lot_id = %creation.lot_id,
            scheduled = creation.scheduled.len(),
            failures = creation.failures.len(),
            "批次创建完成"
        );
        Ok(creation)
    }

    // ==========================================
    // 内部流程 (调用方已持有写锁)
    // ==========================================

    pub(super) fn schedule_loaded(
        &self,
        mut stage: StageExecution,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduleOutcome> {
        if stage.status != StageStatus::Pending {
            return Ok(ScheduleOutcome::Skipped {
                reason: format!("工序状态为 {}", stage.status),
            });
        }
        if let Some(machine_id) = &stage.machine_id {
            return Ok(ScheduleOutcome::Skipped {
                reason: format!("工序已分配机台 {}", machine_id),
            });
        }

        self.sequencer.check_dependencies(&stage)?;

        let machine_type_id = self.repos.machine_type_of(&stage)?;
        self.assign_queued_ahead(&stage, &machine_type_id, now)?;

        match self.selector.select(&stage, now)? {
            Some(candidate) => self.assign_to_machine(
                stage,
                &candidate.machine.machine_id,
                TransitionEvent::Assign,
                Some(candidate.score),
                now,
            ),
            None => {
                let queue_position = self.queue_manager.enqueue(&mut stage, &machine_type_id, now)?;
                self.repos.stage_repo.update(&stage)?;
                self.emit(
                    StageEvent::for_stage(StageEventType::Queued, &stage, now).with_payload(json!({
                        "machine_type_id": machine_type_id,
                        "queue_position": queue_position,
                    })),
                );
                Ok(ScheduleOutcome::Queued {
                    machine_type_id,
                    queue_position,
                })
            }
        }
    }

    /// 为机型等待队列中排在该工序之前的工序先行分配机台
    ///
    /// 无可用机台时停止,新工序随后排在它们之后入队
    fn assign_queued_ahead(
        &self,
        stage: &StageExecution,
        machine_type_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<()> {
        for mut queued in self.queue_manager.queued_ahead_of(stage, machine_type_id)? {
            let Some(candidate) = self.selector.select(&queued, now)? else {
                break;
            };
            self.queue_manager.dequeue(&mut queued, machine_type_id)?;
            state_machine::apply(&mut queued, TransitionEvent::Unblock, now)?;
            info!(
                stage_id = %queued.stage_id,
                ahead_of = %stage.stage_id,
                machine_id = %candidate.machine.machine_id,
                "等待队列工序优先分配"
            );
            self.assign_to_machine(
                queued,
                &candidate.machine.machine_id,
                TransitionEvent::Assign,
                Some(candidate.score),
                now,
            )?;
        }
        Ok(())
    }

    /// 分配机台并判定换型
    ///
    /// event 为 Assign (常规分配) 或 Reassign (改派/优化)
    pub(super) fn assign_to_machine(
        &self,
        mut stage: StageExecution,
        machine_id: &str,
        event: TransitionEvent,
        score: Option<f64>,
        now: NaiveDateTime,
    ) -> SchedulerResult<ScheduleOutcome> {
        state_machine::apply(&mut stage, event, now)?;
        stage.machine_id = Some(machine_id.to_string());
        stage.queue_position = None;

        let setup = self.setup_resolver.resolve(&mut stage, machine_id, now)?;
        self.repos.stage_repo.update(&stage)?;

        info!(
            stage_id = %stage.stage_id,
            machine_id,
            score = ?score,
            setup_stage_id = ?setup.setup_stage_id(),
            status = %stage.status,
            "工序已分配机台"
        );

        let event_type = if event == TransitionEvent::Reassign {
            StageEventType::Reassigned
        } else {
            StageEventType::Assigned
        };
        self.emit(StageEvent::for_stage(event_type, &stage, now).with_payload(json!({
            "score": score,
            "setup_stage_id": setup.setup_stage_id(),
        })));

        if let SetupResolution::Created {
            setup_stage_id,
            duration_minutes,
        } = &setup
        {
            let mut setup_event = StageEvent::for_stage(StageEventType::SetupCreated, &stage, now)
                .with_payload(json!({
                    "main_stage_id": stage.stage_id,
                    "duration_minutes": duration_minutes,
                }));
            setup_event.stage_id = Some(setup_stage_id.clone());
            self.emit(setup_event);
        }

        Ok(ScheduleOutcome::Assigned {
            machine_id: machine_id.to_string(),
            score,
            setup,
        })
    }

    /// 机台空出后提升等待队列
    ///
    /// 仅当机台无加工中工序且无未开工积压时提升机型等待队列的队首工序
    pub(super) fn advance_queue(
        &self,
        machine_id: &str,
        now: NaiveDateTime,
    ) -> SchedulerResult<Option<StageOutcome>> {
        let machine = self.repos.require_machine(machine_id)?;

        let busy = self
            .repos
            .stage_repo
            .find_by_machine_and_status(machine_id, &[StageStatus::InProgress])?;
        let backlog = self.repos.stage_repo.find_by_machine_and_status(
            machine_id,
            &[StageStatus::Pending, StageStatus::Waiting],
        )?;
        if !busy.is_empty() || !backlog.is_empty() {
            debug!(
                machine_id,
                busy = busy.len(),
                backlog = backlog.len(),
                "机台未空出,跳过队列提升"
            );
            return Ok(None);
        }

        let Some(mut next) = self.queue_manager.next_for_machine(&machine)? else {
            return Ok(None);
        };

        self.queue_manager.dequeue(&mut next, &machine.machine_type_id)?;
        state_machine::apply(&mut next, TransitionEvent::Unblock, now)?;
        info!(machine_id, stage_id = %next.stage_id, "机台空出,提升等待队列工序");

        let stage_id = next.stage_id.clone();
        let outcome = self.assign_to_machine(next, machine_id, TransitionEvent::Assign, None, now)?;
        Ok(Some(StageOutcome { stage_id, outcome }))
    }
}
