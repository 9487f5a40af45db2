// ==========================================
// 工序排产引擎 - 配置层
// ==========================================
// 职责: 排产参数加载与覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod scheduler_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigError, ConfigManager};
pub use scheduler_config::{SchedulerConfig, ScoringWeights};
