// ==========================================
// 工序排产引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 实现引擎消费的存储接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod action_log_repo;
pub mod error;
pub mod lot_repo;
pub mod machine_repo;
pub mod routing_repo;
pub mod setup_time_repo;
pub mod stage_repo;
pub mod stores;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use lot_repo::LotRepository;
pub use machine_repo::MachineRepository;
pub use routing_repo::RoutingRepository;
pub use setup_time_repo::SetupTimeRepository;
pub use stage_repo::StageRepository;
pub use stores::{LotStore, MachineStore, RoutingStore, SetupTimeStore, StageStore};
