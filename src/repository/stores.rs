// ==========================================
// 工序排产引擎 - 仓储接口
// ==========================================
// 职责: 定义引擎所消费的存储接口 (不含实现)
// 实现者: 本模块同级的 SQLite 仓储
// 红线: 接口只做数据映射,不含排产规则
// ==========================================

use crate::domain::{
    Lot, Machine, Routing, RoutingStep, SetupTimeRecord, StageExecution, StageStatus, SubLot,
};
use crate::repository::error::RepositoryResult;
use chrono::NaiveDateTime;

// ==========================================
// StageStore - 工序执行存储
// ==========================================
pub trait StageStore: Send + Sync {
    fn get_by_id(&self, stage_id: &str) -> RepositoryResult<Option<StageExecution>>;

    fn insert(&self, stage: &StageExecution) -> RepositoryResult<()>;

    fn update(&self, stage: &StageExecution) -> RepositoryResult<()>;

    /// 查询机台上处于指定状态的工序 (按创建时间升序)
    fn find_by_machine_and_status(
        &self,
        machine_id: &str,
        statuses: &[StageStatus],
    ) -> RepositoryResult<Vec<StageExecution>>;

    /// 查询机型等待队列 (等待且未分配机台,按 queue_position 升序)
    fn find_queued_for_machine_type(
        &self,
        machine_type_id: &str,
    ) -> RepositoryResult<Vec<StageExecution>>;

    /// 查询全部排队工序 (机型等待队列 + 已分配未开工)
    fn find_all_in_queue(&self) -> RepositoryResult<Vec<StageExecution>>;

    /// 机台上最近完工的工序 (含换型工序)
    fn find_last_completed_on_machine(
        &self,
        machine_id: &str,
    ) -> RepositoryResult<Option<StageExecution>>;

    /// 子批次下的全部工序
    fn find_by_sub_lot(&self, sub_lot_id: &str) -> RepositoryResult<Vec<StageExecution>>;

    // ===== 换型关联 (单一关系,双向查找) =====

    fn link_setup(
        &self,
        setup_stage_id: &str,
        main_stage_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<()>;

    fn unlink_setup(&self, setup_stage_id: &str) -> RepositoryResult<()>;

    /// 主工序 → 换型工序
    fn find_setup_for(&self, main_stage_id: &str) -> RepositoryResult<Option<String>>;

    /// 换型工序 → 主工序
    fn find_main_for(&self, setup_stage_id: &str) -> RepositoryResult<Option<String>>;
}

// ==========================================
// MachineStore - 机台存储
// ==========================================
pub trait MachineStore: Send + Sync {
    fn get_by_id(&self, machine_id: &str) -> RepositoryResult<Option<Machine>>;

    /// 按机型查询 (按 machine_id 升序,保证评估顺序稳定)
    fn get_by_type(&self, machine_type_id: &str) -> RepositoryResult<Vec<Machine>>;

    fn list_all(&self) -> RepositoryResult<Vec<Machine>>;
}

// ==========================================
// RoutingStore - 工艺路线存储
// ==========================================
pub trait RoutingStore: Send + Sync {
    fn get_by_id(&self, routing_id: &str) -> RepositoryResult<Option<Routing>>;

    fn get_by_part_id(&self, part_id: &str) -> RepositoryResult<Option<Routing>>;

    fn get_step(&self, step_id: &str) -> RepositoryResult<Option<RoutingStep>>;
}

// ==========================================
// SetupTimeStore - 换型时间存储
// ==========================================
pub trait SetupTimeStore: Send + Sync {
    fn get(
        &self,
        machine_id: &str,
        from_part_id: &str,
        to_part_id: &str,
    ) -> RepositoryResult<Option<SetupTimeRecord>>;

    fn upsert(&self, record: &SetupTimeRecord) -> RepositoryResult<()>;
}

// ==========================================
// LotStore - 批次存储
// ==========================================
pub trait LotStore: Send + Sync {
    fn get_lot(&self, lot_id: &str) -> RepositoryResult<Option<Lot>>;

    fn get_sub_lot(&self, sub_lot_id: &str) -> RepositoryResult<Option<SubLot>>;

    fn insert_lot(&self, lot: &Lot) -> RepositoryResult<()>;

    fn insert_sub_lot(&self, sub_lot: &SubLot) -> RepositoryResult<()>;

    /// 单事务写入批次、子批次与初始工序,任一失败全部回滚
    fn insert_lot_with_stages(
        &self,
        lot: &Lot,
        sub_lots: &[SubLot],
        stages: &[StageExecution],
    ) -> RepositoryResult<()>;

    /// 批次下的子批次 (按 seq_no 升序)
    fn list_sub_lots(&self, lot_id: &str) -> RepositoryResult<Vec<SubLot>>;

    /// 标记子批次完工
    ///
    /// # 返回
    /// - Ok(true): 本次调用完成了状态变更
    /// - Ok(false): 子批次此前已完工
    fn mark_sub_lot_completed(&self, sub_lot_id: &str, at: NaiveDateTime)
        -> RepositoryResult<bool>;

    /// 标记批次完工 (语义同上)
    fn mark_lot_completed(&self, lot_id: &str, at: NaiveDateTime) -> RepositoryResult<bool>;
}
