// ==========================================
// 工序排产引擎 - 引擎层
// ==========================================
// 职责: 状态机、机台选择、换型判定、顺序控制、等待队列与调度编排
// 红线: Engine 不拼 SQL,只经由存储 trait 读写
// ==========================================

pub mod error;
pub mod events;
pub mod forecast;
pub mod machine_selector;
pub mod orchestrator;
pub mod queue_manager;
pub mod repositories;
pub mod sequencer;
pub mod setup_resolver;
pub mod stage_generator;
pub mod state_machine;

// 重导出核心引擎
pub use error::{SchedulerError, SchedulerResult};
pub use events::{
    ActionLogEventPublisher, CollectingEventPublisher, FanOutEventPublisher, NoOpEventPublisher,
    OptionalEventPublisher, StageEvent, StageEventPublisher, StageEventType,
};
pub use forecast::{ForecastEntry, MachineForecast, QueueForecast, QueueForecaster, TypeQueueForecast};
pub use machine_selector::{compute_score, MachineCandidate, MachineSelector, ScoreInputs};
pub use orchestrator::{
    system_clock, Clock, CompletionOutcome, ConflictRepair, ConflictReport, LotCreation,
    OptimizeReport, QueueAssignment, QueueMove, ScheduleOutcome, SchedulerOrchestrator,
    StageFailure, StageOutcome,
};
pub use queue_manager::{QueueKey, QueueManager};
pub use repositories::SchedulerRepositories;
pub use sequencer::{Sequencer, SubLotProgress};
pub use setup_resolver::{SetupResolution, SetupResolver};
pub use stage_generator::{GeneratedLot, StageGenerator};
