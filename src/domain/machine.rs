// ==========================================
// 工序排产引擎 - 机台领域模型
// ==========================================
// 职责: 机台参考数据 (只读为主)
// 红线: 占用状态不落库,由"加工中工序"推导
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// Machine - 机台
// ==========================================
// 对齐: machine 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: String,      // 机台ID
    pub name: String,            // 机台名称
    pub machine_type_id: String, // 机型
    pub priority: i32,           // 静态优先权重 (参与评分)
}

impl Machine {
    pub fn new(machine_id: &str, machine_type_id: &str, priority: i32) -> Self {
        Self {
            machine_id: machine_id.to_string(),
            name: machine_id.to_string(),
            machine_type_id: machine_type_id.to_string(),
            priority,
        }
    }

    /// 设置显示名称
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }
}
