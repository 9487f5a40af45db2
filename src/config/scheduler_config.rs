// ==========================================
// 工序排产引擎 - 排产参数
// ==========================================
// 职责: 机台评分权重与调度阈值的集中定义
// 来源: ConfigManager::load_scheduler_config (config_kv)
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// ScoringWeights - 机台评分权重
// ==========================================
// score = w_priority × 机台优先级
//       + bonus_same_part (上一件同零件)
//       − w_setup × 换型分钟 (有换型记录时)
//       − w_queue × 积压数量
//       − w_release × 释放等待小时
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub w_priority: f64,
    pub bonus_same_part: f64,
    pub w_setup: f64,
    pub w_queue: f64,
    pub w_release: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_priority: 10.0,
            bonus_same_part: 50.0,
            w_setup: 5.0,
            w_queue: 2.0,
            w_release: 3.0,
        }
    }
}

// ==========================================
// SchedulerConfig - 调度参数
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub weights: ScoringWeights,
    /// 在制工序剩余时长下限 (分钟),超时的工序按此值估算释放时间
    pub min_remaining_minutes: f64,
    pub max_priority: i32,
    pub reprioritize_step: i32,
    /// 队列优化时改派所需的最小评分增益
    pub reassign_min_gain: f64,
    /// 创建批次时是否立即排产各子批次的首道工序
    pub auto_schedule_on_create: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            min_remaining_minutes: 1.0,
            max_priority: 100,
            reprioritize_step: 10,
            reassign_min_gain: 1.0,
            auto_schedule_on_create: true,
        }
    }
}
