// ==========================================
// 工序排产引擎 - 工艺路线领域模型
// ==========================================
// 职责: 零件工艺路线与工艺步骤模板 (只读)
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// RoutingStep - 工艺步骤模板
// ==========================================
// 对齐: routing_step 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingStep {
    pub step_id: String,
    pub routing_id: String,
    pub step_order: i32,               // 顺序号 (严格递增)
    pub machine_type_id: String,       // 所需机型
    pub standard_minutes_per_unit: f64, // 单件标准工时
    pub default_setup_minutes: f64,    // 默认换型时间
}

impl RoutingStep {
    /// 子批次在该步骤上的计划工时
    pub fn planned_minutes_for(&self, quantity: i32) -> f64 {
        self.standard_minutes_per_unit * quantity.max(0) as f64
    }
}

// ==========================================
// Routing - 工艺路线
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Routing {
    pub routing_id: String,
    pub part_id: String,
    pub steps: Vec<RoutingStep>, // 按 step_order 升序
}

impl Routing {
    /// 首道步骤
    pub fn first_step(&self) -> Option<&RoutingStep> {
        self.steps.iter().min_by_key(|s| s.step_order)
    }

    /// 指定顺序号之后的下一道步骤
    pub fn next_step_after(&self, step_order: i32) -> Option<&RoutingStep> {
        self.steps
            .iter()
            .filter(|s| s.step_order > step_order)
            .min_by_key(|s| s.step_order)
    }

    /// 顺序号小于指定值的全部步骤
    pub fn steps_before(&self, step_order: i32) -> impl Iterator<Item = &RoutingStep> {
        self.steps.iter().filter(move |s| s.step_order < step_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(order: i32) -> RoutingStep {
        RoutingStep {
            step_id: format!("S{}", order),
            routing_id: "R1".to_string(),
            step_order: order,
            machine_type_id: "LATHE".to_string(),
            standard_minutes_per_unit: 2.0,
            default_setup_minutes: 15.0,
        }
    }

    #[test]
    fn test_next_step_skips_gaps_in_order() {
        let routing = Routing {
            routing_id: "R1".to_string(),
            part_id: "P1".to_string(),
            steps: vec![step(10), step(30), step(20)],
        };

        assert_eq!(routing.first_step().unwrap().step_order, 10);
        assert_eq!(routing.next_step_after(10).unwrap().step_order, 20);
        assert_eq!(routing.next_step_after(20).unwrap().step_order, 30);
        assert!(routing.next_step_after(30).is_none());
        assert_eq!(routing.steps_before(30).count(), 2);
    }

    #[test]
    fn test_planned_minutes_scale_with_quantity() {
        assert!((step(1).planned_minutes_for(25) - 50.0).abs() < 1e-9);
        assert_eq!(step(1).planned_minutes_for(-3), 0.0);
    }
}
