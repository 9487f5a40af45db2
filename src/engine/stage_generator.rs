// ==========================================
// 工序排产引擎 - 工序生成
// ==========================================
// 职责: 按零件工艺路线实例化批次、子批次与全部工序
// 规则: 每个子批次 × 每道工艺步骤生成一道待分配工序
// 计划工时 = 子批次数量 × 单件标准工时
// 红线: 批次、子批次与工序在同一事务内写入
// ==========================================

use crate::domain::{Lot, LotSpec, LotStatus, StageExecution, SubLot};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::repositories::SchedulerRepositories;
use chrono::NaiveDateTime;
use uuid::Uuid;

/// 单道工序计划工时上限 (分钟, 约 100 年)
pub const MAX_PLANNED_MINUTES: f64 = 100.0 * 365.0 * 24.0 * 60.0;

/// 生成结果
#[derive(Debug, Clone)]
pub struct GeneratedLot {
    pub lot: Lot,
    pub sub_lots: Vec<SubLot>,
    /// 全部工序 (按子批次、工艺顺序排列)
    pub stages: Vec<StageExecution>,
    /// 各子批次首道工序ID (与 sub_lots 同序)
    pub first_stage_ids: Vec<String>,
}

// ==========================================
// StageGenerator - 工序生成器
// ==========================================
pub struct StageGenerator {
    repos: SchedulerRepositories,
}

impl StageGenerator {
    pub fn new(repos: SchedulerRepositories) -> Self {
        Self { repos }
    }

    /// 生成并写入批次、子批次与工序
    ///
    /// 全部实体先在内存构建并校验,再一次性落库
    pub fn generate(&self, spec: &LotSpec, now: NaiveDateTime) -> SchedulerResult<GeneratedLot> {
        let routing = self
            .repos
            .routing_repo
            .get_by_part_id(&spec.part_id)?
            .ok_or_else(|| SchedulerError::not_found("Routing", &spec.part_id))?;
        if routing.steps.is_empty() {
            return Err(SchedulerError::InvalidInput(format!(
                "工艺路线无工序: routing={}",
                routing.routing_id
            )));
        }
        let sizes = spec.sub_lot_sizes().map_err(SchedulerError::InvalidInput)?;

        let mut steps = routing.steps.clone();
        steps.sort_by_key(|s| s.step_order);

        let lot = Lot {
            lot_id: Uuid::new_v4().to_string(),
            part_id: spec.part_id.clone(),
            routing_id: routing.routing_id.clone(),
            quantity: spec.quantity,
            priority: spec.priority,
            status: LotStatus::Open,
            created_at: now,
            completed_at: None,
        };

        let mut sub_lots = Vec::with_capacity(sizes.len());
        let mut stages = Vec::with_capacity(sizes.len() * steps.len());
        let mut first_stage_ids = Vec::with_capacity(sizes.len());

        for (idx, quantity) in sizes.into_iter().enumerate() {
            let sub_lot = SubLot {
                sub_lot_id: Uuid::new_v4().to_string(),
                lot_id: lot.lot_id.clone(),
                seq_no: idx as i32 + 1,
                quantity,
                status: LotStatus::Open,
                completed_at: None,
            };

            for (step_idx, step) in steps.iter().enumerate() {
                let planned_minutes = step.planned_minutes_for(quantity);
                if !planned_minutes.is_finite() || planned_minutes > MAX_PLANNED_MINUTES {
                    return Err(SchedulerError::InvalidInput(format!(
                        "计划工时超出上限: step={}, quantity={}, minutes={}",
                        step.step_id, quantity, planned_minutes
                    )));
                }
                let stage = StageExecution::new_productive(
                    &sub_lot.sub_lot_id,
                    &step.step_id,
                    spec.priority,
                    planned_minutes,
                    now,
                );
                if step_idx == 0 {
                    first_stage_ids.push(stage.stage_id.clone());
                }
                stages.push(stage);
            }
            sub_lots.push(sub_lot);
        }

        self.repos
            .lot_repo
            .insert_lot_with_stages(&lot, &sub_lots, &stages)?;

        tracing::info!(
            lot_id = %lot.lot_id,
            part_id = %lot.part_id,
            sub_lot_count = sub_lots.len(),
            stage_count = stages.len(),
            "批次工序已生成"
        );

        Ok(GeneratedLot {
            lot,
            sub_lots,
            stages,
            first_stage_ids,
        })
    }
}
