// ==========================================
// 工序排产引擎 - 工序状态机
// ==========================================
// 职责: 以迁移表的形式定义 (状态 × 事件) → 状态
// 红线: 表外的迁移一律拒绝,拒绝时不修改工序
// 红线: 业务守卫 (依赖、换型、机台占用) 由编排器在迁移前检查
// ==========================================

use crate::domain::{StageExecution, StageStatus, TransitionEvent};
use crate::engine::error::{SchedulerError, SchedulerResult};
use chrono::NaiveDateTime;

use StageStatus::*;

/// 迁移表中的一行
#[derive(Debug, Clone, Copy)]
pub struct TransitionRule {
    pub event: TransitionEvent,
    pub from: &'static [StageStatus],
    pub to: StageStatus,
}

/// 工序状态迁移表
pub const TRANSITION_TABLE: [TransitionRule; 10] = [
    TransitionRule {
        event: TransitionEvent::Assign,
        from: &[Pending],
        to: Pending,
    },
    TransitionRule {
        event: TransitionEvent::Block,
        from: &[Pending],
        to: Waiting,
    },
    TransitionRule {
        event: TransitionEvent::Unblock,
        from: &[Waiting],
        to: Pending,
    },
    TransitionRule {
        event: TransitionEvent::Start,
        from: &[Pending],
        to: InProgress,
    },
    TransitionRule {
        event: TransitionEvent::Pause,
        from: &[InProgress],
        to: Paused,
    },
    TransitionRule {
        event: TransitionEvent::Resume,
        from: &[Paused],
        to: InProgress,
    },
    TransitionRule {
        event: TransitionEvent::Complete,
        from: &[InProgress, Paused],
        to: Completed,
    },
    TransitionRule {
        event: TransitionEvent::Cancel,
        from: &[Pending, Waiting, InProgress, Paused],
        to: Error,
    },
    TransitionRule {
        event: TransitionEvent::Reassign,
        from: &[Pending, Waiting],
        to: Pending,
    },
    TransitionRule {
        event: TransitionEvent::Requeue,
        from: &[InProgress, Paused],
        to: Pending,
    },
];

/// 查询迁移目标状态
///
/// # 返回
/// - Some(to): 迁移合法
/// - None: 表中无此迁移
pub fn next_state(from: StageStatus, event: TransitionEvent) -> Option<StageStatus> {
    TRANSITION_TABLE
        .iter()
        .find(|rule| rule.event == event && rule.from.contains(&from))
        .map(|rule| rule.to)
}

/// 构造非法迁移错误
pub fn invalid_transition(
    stage: &StageExecution,
    event: TransitionEvent,
    reason: impl Into<String>,
) -> SchedulerError {
    SchedulerError::InvalidTransition {
        stage_id: stage.stage_id.clone(),
        from: stage.status,
        event,
        reason: reason.into(),
    }
}

/// 校验迁移是否合法 (不修改工序)
pub fn ensure_allowed(stage: &StageExecution, event: TransitionEvent) -> SchedulerResult<StageStatus> {
    next_state(stage.status, event).ok_or_else(|| {
        let reason = if stage.status.is_terminal() {
            "终态工序不可迁移".to_string()
        } else {
            format!("状态 {} 不接受事件 {}", stage.status, event)
        };
        invalid_transition(stage, event, reason)
    })
}

/// 执行迁移: 修改状态并记录状态变更时间
pub fn apply(
    stage: &mut StageExecution,
    event: TransitionEvent,
    now: NaiveDateTime,
) -> SchedulerResult<StageStatus> {
    let to = ensure_allowed(stage, event)?;
    tracing::debug!(
        stage_id = %stage.stage_id,
        from = %stage.status,
        to = %to,
        event = %event,
        "工序状态迁移"
    );
    stage.status = to;
    stage.status_changed_at = now;
    Ok(to)
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

    fn expected(from: StageStatus, event: TransitionEvent) -> Option<StageStatus> {
        use TransitionEvent as E;
        match (event, from) {
            (E::Assign, Pending) => Some(Pending),
            (E::Block, Pending) => Some(Waiting),
            (E::Unblock, Waiting) => Some(Pending),
            (E::Start, Pending) => Some(InProgress),
            (E::Pause, InProgress) => Some(Paused),
            (E::Resume, Paused) => Some(InProgress),
            (E::Complete, InProgress | Paused) => Some(Completed),
            (E::Cancel, Pending | Waiting | InProgress | Paused) => Some(Error),
            (E::Reassign, Pending | Waiting) => Some(Pending),
            (E::Requeue, InProgress | Paused) => Some(Pending),
            _ => None,
        }
    }

    #[test]
    fn test_transition_table_is_exhaustively_legal() {
        for from in StageStatus::ALL {
            for event in TransitionEvent::ALL {
                assert_eq!(
                    next_state(from, event),
                    expected(from, event),
                    "from={} event={}",
                    from,
                    event
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_reject_every_event() {
        for from in [Completed, Error] {
            for event in TransitionEvent::ALL {
                assert!(next_state(from, event).is_none());
            }
        }
    }

    #[test]
    fn test_rejected_apply_leaves_stage_untouched() {
        let mut stage = StageExecution::new_productive("SL1", "STEP1", 0, 10.0, t0());
        let before = stage.clone();
        let later = t0() + chrono::Duration::minutes(5);

        let err = apply(&mut stage, TransitionEvent::Complete, later).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidTransition {
                from: Pending,
                event: TransitionEvent::Complete,
                ..
            }
        ));
        assert_eq!(stage, before);
    }

    #[test]
    fn test_apply_records_status_change_time() {
        let mut stage = StageExecution::new_productive("SL1", "STEP1", 0, 10.0, t0());
        let later = t0() + chrono::Duration::minutes(5);

        assert_eq!(apply(&mut stage, TransitionEvent::Start, later).unwrap(), InProgress);
        assert_eq!(stage.status_changed_at, later);
    }
}
