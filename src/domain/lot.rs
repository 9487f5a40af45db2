// ==========================================
// 工序排产引擎 - 批次领域模型
// ==========================================
// 职责: 生产批次 / 子批次,以及建批请求
// 红线: 子批次全部完工 ⇒ 批次完工
// ==========================================

use crate::domain::types::LotStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Lot - 生产批次
// ==========================================
// 对齐: lot 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub lot_id: String,
    pub part_id: String, // 零件 (决定换型判定的"零件类型")
    pub routing_id: String,
    pub quantity: i32,
    pub priority: i32,
    pub status: LotStatus,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

// ==========================================
// SubLot - 子批次
// ==========================================
// 对齐: sub_lot 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubLot {
    pub sub_lot_id: String,
    pub lot_id: String,
    pub seq_no: i32,
    pub quantity: i32,
    pub status: LotStatus,
    pub completed_at: Option<NaiveDateTime>,
}

// ==========================================
// LotSpec - 建批请求
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotSpec {
    pub part_id: String,
    pub quantity: i32,
    #[serde(default)]
    pub priority: i32,
    /// 子批次拆分方式
    pub split: SubLotSplit,
    /// 是否立即排产各子批次首道工序 (None 表示取配置默认值)
    #[serde(default)]
    pub schedule_immediately: Option<bool>,
}

/// 子批次拆分方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubLotSplit {
    /// 均分为 N 个子批次 (余数依次加到前面的子批次)
    Count(i32),
    /// 显式指定每个子批次数量 (合计必须等于批次数量)
    Sizes(Vec<i32>),
}

impl LotSpec {
    pub fn new(part_id: &str, quantity: i32) -> Self {
        Self {
            part_id: part_id.to_string(),
            quantity,
            priority: 0,
            split: SubLotSplit::Count(1),
            schedule_immediately: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_split(mut self, split: SubLotSplit) -> Self {
        self.split = split;
        self
    }

    pub fn with_schedule_immediately(mut self, flag: bool) -> Self {
        self.schedule_immediately = Some(flag);
        self
    }

    /// 计算子批次数量列表
    ///
    /// # 返回
    /// - Ok(Vec<i32>): 每个子批次的数量
    /// - Err(String): 拆分参数非法的原因
    pub fn sub_lot_sizes(&self) -> Result<Vec<i32>, String> {
        if self.quantity <= 0 {
            return Err(format!("批次数量必须为正: {}", self.quantity));
        }
        match &self.split {
            SubLotSplit::Count(n) => {
                let n = *n;
                if n <= 0 || n > self.quantity {
                    return Err(format!(
                        "子批次数量非法: count={}, quantity={}",
                        n, self.quantity
                    ));
                }
                let base = self.quantity / n;
                let remainder = self.quantity % n;
                Ok((0..n).map(|i| base + i32::from(i < remainder)).collect())
            }
            SubLotSplit::Sizes(sizes) => {
                if sizes.is_empty() || sizes.iter().any(|&q| q <= 0) {
                    return Err("子批次数量必须全部为正".to_string());
                }
                let total: i32 = sizes.iter().sum();
                if total != self.quantity {
                    return Err(format!(
                        "子批次合计 {} 与批次数量 {} 不一致",
                        total, self.quantity
                    ));
                }
                Ok(sizes.clone())
            }
        }
    }
}
