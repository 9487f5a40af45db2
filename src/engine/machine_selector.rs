// ==========================================
// 工序排产引擎 - 机台选择
// ==========================================
// 职责: 为待分配工序评估同机型机台并选出最优者
// 评分: 见 ScoringWeights
// 红线: 评估顺序按 machine_id 升序,同分保留先评估者
// 红线: 只读,不修改任何数据
// ==========================================

use crate::config::{SchedulerConfig, ScoringWeights};
use crate::domain::{Machine, StageExecution, StageStatus};
use crate::engine::error::{SchedulerError, SchedulerResult};
use crate::engine::repositories::SchedulerRepositories;
use crate::engine::setup_resolver::SetupResolver;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// 评分输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreInputs {
    pub machine_priority: i32,
    pub same_part: bool,
    /// 已记录的换型分钟数 (无记录为 None,不扣分)
    pub setup_minutes: Option<f64>,
    pub backlog_count: usize,
    pub hours_until_release: f64,
}

/// 计算机台得分
pub fn compute_score(weights: &ScoringWeights, inputs: &ScoreInputs) -> f64 {
    let mut score = weights.w_priority * f64::from(inputs.machine_priority);
    if inputs.same_part {
        score += weights.bonus_same_part;
    }
    if let Some(minutes) = inputs.setup_minutes {
        score -= weights.w_setup * minutes;
    }
    score -= weights.w_queue * inputs.backlog_count as f64;
    score -= weights.w_release * inputs.hours_until_release.max(0.0);
    score
}

/// 候选机台评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineCandidate {
    pub machine: Machine,
    pub inputs: ScoreInputs,
    pub release_at: NaiveDateTime,
    pub score: f64,
}

/// 机台释放估算
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseEstimate {
    pub release_at: NaiveDateTime,
    pub backlog_count: usize,
}

/// 时间点加上分钟数 (精确到秒)
///
/// 超出 chrono 可表示范围时返回 TimeOutOfRange,不 panic
pub fn add_minutes(at: NaiveDateTime, minutes: f64) -> SchedulerResult<NaiveDateTime> {
    let seconds = (minutes * 60.0).round();
    let out_of_range = || SchedulerError::TimeOutOfRange(format!("{} + {} 分钟", at, minutes));
    if !seconds.is_finite() || seconds.abs() >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    Duration::try_seconds(seconds as i64)
        .and_then(|d| at.checked_add_signed(d))
        .ok_or_else(out_of_range)
}

// ==========================================
// MachineSelector - 机台选择器
// ==========================================
pub struct MachineSelector {
    repos: SchedulerRepositories,
    setup_resolver: SetupResolver,
    config: SchedulerConfig,
}

impl MachineSelector {
    pub fn new(repos: SchedulerRepositories, config: SchedulerConfig) -> Self {
        Self {
            setup_resolver: SetupResolver::new(repos.clone()),
            repos,
            config,
        }
    }

    /// 可用机台: 同机型且无加工中工序 (按 machine_id 升序)
    pub fn eligible_machines(&self, machine_type_id: &str) -> SchedulerResult<Vec<Machine>> {
        let mut eligible = Vec::new();
        for machine in self.repos.machine_repo.get_by_type(machine_type_id)? {
            let running = self
                .repos
                .stage_repo
                .find_by_machine_and_status(&machine.machine_id, &[StageStatus::InProgress])?;
            if running.is_empty() {
                eligible.push(machine);
            }
        }
        Ok(eligible)
    }

    /// 估算机台释放时间
    ///
    /// 释放时间 = now + 在制工序剩余分钟 (下限 min_remaining_minutes) + 积压工序计划分钟
    ///
    /// # 参数
    /// - exclude_stage_id: 从积压中排除的工序 (评估已在该机台积压中的工序自身时使用)
    pub fn estimate_release(
        &self,
        machine_id: &str,
        now: NaiveDateTime,
        exclude_stage_id: Option<&str>,
    ) -> SchedulerResult<ReleaseEstimate> {
        let holding = self.repos.stage_repo.find_by_machine_and_status(
            machine_id,
            &[StageStatus::InProgress, StageStatus::Paused],
        )?;
        let backlog = self.repos.stage_repo.find_by_machine_and_status(
            machine_id,
            &[StageStatus::Pending, StageStatus::Waiting],
        )?;

        let current_minutes: f64 = holding
            .iter()
            .map(|s| s.remaining_minutes(now, self.config.min_remaining_minutes))
            .sum();

        let backlog: Vec<&StageExecution> = backlog
            .iter()
            .filter(|s| Some(s.stage_id.as_str()) != exclude_stage_id)
            .collect();
        let backlog_minutes: f64 = backlog.iter().map(|s| s.planned_minutes).sum();

        Ok(ReleaseEstimate {
            release_at: add_minutes(now, current_minutes + backlog_minutes)?,
            backlog_count: backlog.len(),
        })
    }

    /// 对单台机台评分 (不检查可用性)
    pub fn evaluate(
        &self,
        stage: &StageExecution,
        part_id: &str,
        machine: &Machine,
        now: NaiveDateTime,
    ) -> SchedulerResult<MachineCandidate> {
        let release = self.estimate_release(&machine.machine_id, now, Some(&stage.stage_id))?;
        let last_part = self.setup_resolver.last_part_on_machine(&machine.machine_id)?;
        let setup_minutes = self
            .setup_resolver
            .known_setup_minutes(&machine.machine_id, part_id)?;

        let hours_until_release =
            ((release.release_at - now).num_seconds() as f64 / 3600.0).max(0.0);
        let inputs = ScoreInputs {
            machine_priority: machine.priority,
            same_part: last_part.as_deref() == Some(part_id),
            setup_minutes,
            backlog_count: release.backlog_count,
            hours_until_release,
        };
        let score = compute_score(&self.config.weights, &inputs);

        Ok(MachineCandidate {
            machine: machine.clone(),
            inputs,
            release_at: release.release_at,
            score,
        })
    }

    /// 对全部可用机台评分 (保持评估顺序)
    pub fn rank(
        &self,
        stage: &StageExecution,
        now: NaiveDateTime,
    ) -> SchedulerResult<Vec<MachineCandidate>> {
        let machine_type_id = self.repos.machine_type_of(stage)?;
        let part_id = self.repos.part_of_stage(stage)?;

        self.eligible_machines(&machine_type_id)?
            .iter()
            .map(|m| self.evaluate(stage, &part_id, m, now))
            .collect()
    }

    /// 选出最优机台
    ///
    /// # 返回
    /// - Some(candidate): 得分严格最高者,同分取先评估者
    /// - None: 无可用机台
    pub fn select(
        &self,
        stage: &StageExecution,
        now: NaiveDateTime,
    ) -> SchedulerResult<Option<MachineCandidate>> {
        let candidates = self.rank(stage, now)?;
        let best = pick_best(candidates);

        if let Some(best) = &best {
            tracing::debug!(
                stage_id = %stage.stage_id,
                machine_id = %best.machine.machine_id,
                score = best.score,
                "机台评分最优"
            );
        }
        Ok(best)
    }
}

/// 严格最高分胜出,同分保留先出现者
pub fn pick_best(candidates: Vec<MachineCandidate>) -> Option<MachineCandidate> {
    let mut best: Option<MachineCandidate> = None;
    for candidate in candidates {
        match &best {
            Some(current) if candidate.score <= current.score => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn inputs(priority: i32) -> ScoreInputs {
        ScoreInputs {
            machine_priority: priority,
            same_part: false,
            setup_minutes: None,
            backlog_count: 0,
            hours_until_release: 0.0,
        }
    }

    fn candidate(id: &str, score: f64) -> MachineCandidate {
        MachineCandidate {
            machine: Machine::new(id, "LATHE", 0),
            inputs: inputs(0),
            release_at: t0(),
            score,
        }
    }

    #[test]
    fn test_score_uses_every_weight() {
        let w = ScoringWeights::default();
        let full = ScoreInputs {
            machine_priority: 2,
            same_part: true,
            setup_minutes: Some(4.0),
            backlog_count: 3,
            hours_until_release: 1.5,
        };
        // 10×2 + 50 − 5×4 − 2×3 − 3×1.5
        assert!((compute_score(&w, &full) - 39.5).abs() < 1e-9);
    }

    #[test]
    fn test_unrecorded_setup_and_past_release_are_not_penalized() {
        let w = ScoringWeights::default();
        let mut i = inputs(1);
        i.hours_until_release = -2.0;
        assert!((compute_score(&w, &i) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_tie_keeps_first_evaluated() {
        let best = pick_best(vec![
            candidate("M1", 5.0),
            candidate("M2", 5.0),
            candidate("M3", 4.0),
        ])
        .unwrap();
        assert_eq!(best.machine.machine_id, "M1");

        let best = pick_best(vec![candidate("M1", 5.0), candidate("M2", 5.5)]).unwrap();
        assert_eq!(best.machine.machine_id, "M2");
        assert!(pick_best(Vec::new()).is_none());
    }

    #[test]
    fn test_add_minutes_rounds_to_seconds_and_rejects_overflow() {
        assert_eq!(add_minutes(t0(), 1.5).unwrap(), t0() + Duration::seconds(90));
        assert_eq!(add_minutes(t0(), 0.0).unwrap(), t0());
        assert!(matches!(
            add_minutes(t0(), 2.0e12),
            Err(SchedulerError::TimeOutOfRange(_))
        ));
        assert!(matches!(
            add_minutes(t0(), f64::INFINITY),
            Err(SchedulerError::TimeOutOfRange(_))
        ));
    }
}
