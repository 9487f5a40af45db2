// ==========================================
// 工序排产引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite
// 系统定位: 车间工序调度与执行跟踪 (同步触发,单写锁)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 调度规则与编排
pub mod engine;

// 配置层 - 排产参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{LotStatus, SetupTimeSource, StageStatus, TransitionEvent};

// 领域实体
pub use domain::{
    ActionLog, ActionType, Lot, LotSpec, Machine, Routing, RoutingStep, SetupTimeRecord,
    StageExecution, SubLot, SubLotSplit,
};

// 引擎
pub use engine::{
    QueueForecast, ScheduleOutcome, SchedulerError, SchedulerOrchestrator, SchedulerRepositories,
    SchedulerResult, SetupResolution,
};

// 配置
pub use config::{ConfigManager, SchedulerConfig, ScoringWeights};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "工序排产引擎";
