// ==========================================
// 工序排产引擎 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合排产引擎所需的所有存储接口
// 目标: 引擎只依赖 trait,便于替换存储实现
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::domain::{Lot, Machine, Routing, RoutingStep, StageExecution, SubLot};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::repository::{
    LotRepository, LotStore, MachineRepository, MachineStore, RoutingRepository, RoutingStore,
    SetupTimeRepository, SetupTimeStore, StageRepository, StageStore,
};

/// 排产引擎仓储集合
///
/// # 包含的存储
/// - `stage_repo`: 工序执行与换型关联
/// - `machine_repo`: 机台
/// - `routing_repo`: 工艺路线
/// - `setup_time_repo`: 换型时间
/// - `lot_repo`: 批次/子批次
#[derive(Clone)]
pub struct SchedulerRepositories {
    pub stage_repo: Arc<dyn StageStore>,
    pub machine_repo: Arc<dyn MachineStore>,
    pub routing_repo: Arc<dyn RoutingStore>,
    pub setup_time_repo: Arc<dyn SetupTimeStore>,
    pub lot_repo: Arc<dyn LotStore>,
}

impl SchedulerRepositories {
    pub fn new(
        stage_repo: Arc<dyn StageStore>,
        machine_repo: Arc<dyn MachineStore>,
        routing_repo: Arc<dyn RoutingStore>,
        setup_time_repo: Arc<dyn SetupTimeStore>,
        lot_repo: Arc<dyn LotStore>,
    ) -> Self {
        Self {
            stage_repo,
            machine_repo,
            routing_repo,
            setup_time_repo,
            lot_repo,
        }
    }

    /// 基于同一 SQLite 连接构建全部仓储
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            stage_repo: Arc::new(StageRepository::new(conn.clone())),
            machine_repo: Arc::new(MachineRepository::new(conn.clone())),
            routing_repo: Arc::new(RoutingRepository::new(conn.clone())),
            setup_time_repo: Arc::new(SetupTimeRepository::new(conn.clone())),
            lot_repo: Arc::new(LotRepository::new(conn)),
        }
    }

    // ==========================================
    // 必须存在的查找 (缺失即 NotFound)
    // ==========================================

    pub fn require_stage(&self, stage_id: &str) -> SchedulerResult<StageExecution> {
        self.stage_repo
            .get_by_id(stage_id)?
            .ok_or_else(|| SchedulerError::not_found("StageExecution", stage_id))
    }

    pub fn require_machine(&self, machine_id: &str) -> SchedulerResult<Machine> {
        self.machine_repo
            .get_by_id(machine_id)?
            .ok_or_else(|| SchedulerError::not_found("Machine", machine_id))
    }

    pub fn require_step(&self, step_id: &str) -> SchedulerResult<RoutingStep> {
        self.routing_repo
            .get_step(step_id)?
            .ok_or_else(|| SchedulerError::not_found("RoutingStep", step_id))
    }

    pub fn require_routing(&self, routing_id: &str) -> SchedulerResult<Routing> {
        self.routing_repo
            .get_by_id(routing_id)?
            .ok_or_else(|| SchedulerError::not_found("Routing", routing_id))
    }

    pub fn require_sub_lot(&self, sub_lot_id: &str) -> SchedulerResult<SubLot> {
        self.lot_repo
            .get_sub_lot(sub_lot_id)?
            .ok_or_else(|| SchedulerError::not_found("SubLot", sub_lot_id))
    }

    pub fn require_lot(&self, lot_id: &str) -> SchedulerResult<Lot> {
        self.lot_repo
            .get_lot(lot_id)?
            .ok_or_else(|| SchedulerError::not_found("Lot", lot_id))
    }

    // ==========================================
    // 派生查找
    // ==========================================

    /// 工序所属批次
    pub fn lot_of_stage(&self, stage: &StageExecution) -> SchedulerResult<Lot> {
        let sub_lot = self.require_sub_lot(&stage.sub_lot_id)?;
        self.require_lot(&sub_lot.lot_id)
    }

    /// 工序加工的零件 (批次零件)
    pub fn part_of_stage(&self, stage: &StageExecution) -> SchedulerResult<String> {
        Ok(self.lot_of_stage(stage)?.part_id)
    }

    /// 工序所需机型
    pub fn machine_type_of(&self, stage: &StageExecution) -> SchedulerResult<String> {
        Ok(self.require_step(&stage.routing_step_id)?.machine_type_id)
    }
}
