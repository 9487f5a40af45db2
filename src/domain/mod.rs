// ==========================================
// 工序排产引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod lot;
pub mod machine;
pub mod routing;
pub mod setup_time;
pub mod stage;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use lot::{Lot, LotSpec, SubLot, SubLotSplit};
pub use machine::Machine;
pub use routing::{Routing, RoutingStep};
pub use setup_time::SetupTimeRecord;
pub use stage::StageExecution;
pub use types::{LotStatus, SetupTimeSource, StageStatus, TransitionEvent};
