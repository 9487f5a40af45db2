// ==========================================
// 级联测试
// ==========================================
// 测试范围:
// 1. 完工推进下一道工序,子批次/批次完工信号只发一次
// 2. 换型时间记录幂等 (每个机台/零件对只有一条)
// 3. 暂停/恢复累计暂停时长
// 4. 取消级联: 换型工序、等待队列压缩、机台空出提升
// ==========================================


use stage_scheduler::domain::{LotStatus, SetupTimeRecord, SetupTimeSource, StageStatus};
use stage_scheduler::engine::{SchedulerError, StageEventType};
use test_helpers::TestEnv;

/// 建批并返回合成的换型工序ID与主工序ID
fn create_with_setup(env: &TestEnv, part_id: &str) -> (String, String) {
    let lot = env.create_lot(part_id, 5, 0);
    let main_id = env.first_stage(&lot);
    let setup_id = lot.scheduled[0]
        .outcome
        .setup_stage_id()
        .expect("应合成换型工序")
        .to_string();
    (setup_id, main_id)
}

#[test]
fn test_completion_advances_routing_and_signals_once() {
    let env = TestEnv::new(&[("L1", "LATHE", 0), ("M1", "MILL", 0)]);
    let lot = env.create_split_lot("SHAFT", 4, 2);
    assert_eq!(lot.sub_lot_ids.len(), 2);
    assert_eq!(lot.stage_ids.len(), 4);
    assert_eq!(lot.scheduled.len(), 2);

    let sub1 = lot.sub_lot_ids[0].clone();
    let sub2 = lot.sub_lot_ids[1].clone();
    let turn1 = env.stage_for_step(&sub1, "SHAFT-10");

    env.orchestrator.start_stage(&turn1.stage_id, None, None).unwrap();
    env.advance(4);
    let completion = env.orchestrator.complete_stage(&turn1.stage_id).unwrap();

    let next = completion.next_stage.expect("应调度下一道工序");
    assert_eq!(next.stage_id, env.stage_for_step(&sub1, "SHAFT-20").stage_id);
    assert_eq!(next.outcome.machine_id(), Some("M1"));
    assert!(completion.cascade_failure.is_none());
    assert!(!completion.sub_lot_completed);
    // L1 上仍有第二个子批次的积压,不提升等待队列
    assert!(completion.promoted.is_none());

    env.advance(1);
    let mill1 = env.stage_for_step(&sub1, "SHAFT-20");
    env.orchestrator.start_stage(&mill1.stage_id, None, None).unwrap();
    env.advance(2);
    let completion = env.orchestrator.complete_stage(&mill1.stage_id).unwrap();
    assert!(completion.sub_lot_completed);
    assert!(!completion.lot_completed);

    env.advance(1);
    env.run_stage(&env.stage_for_step(&sub2, "SHAFT-10").stage_id, 4);
    let mill2 = env.stage_for_step(&sub2, "SHAFT-20");
    assert_eq!(mill2.machine_id.as_deref(), Some("M1"));
    // 同零件连续加工不换型
    assert!(env.repos.stage_repo.find_setup_for(&mill2.stage_id).unwrap().is_none());

    env.orchestrator.start_stage(&mill2.stage_id, None, None).unwrap();
    env.advance(2);
    let completion = env.orchestrator.complete_stage(&mill2.stage_id).unwrap();
    assert!(completion.sub_lot_completed);
    assert!(completion.lot_completed);

    let stored = env.repos.lot_repo.get_lot(&lot.lot_id).unwrap().unwrap();
    assert_eq!(stored.status, LotStatus::Completed);
    assert!(stored.completed_at.is_some());

    // 重复完工被拒绝,不会重复发出完工信号
    let err = env.orchestrator.complete_stage(&mill2.stage_id).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
    assert_eq!(env.events.count(StageEventType::SubLotCompleted), 2);
    assert_eq!(env.events.count(StageEventType::LotCompleted), 1);
}

#[test]
fn test_setup_time_recorded_once_per_part_pair() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    let bushing = env.create_lot("BUSHING", 5, 0);
    env.run_stage(&env.first_stage(&bushing), 5);

    // BUSHING → FLANGE
    let (setup, main) = create_with_setup(&env, "FLANGE");
    env.run_stage(&setup, 30);
    env.run_stage(&main, 5);

    // FLANGE → BUSHING
    let (setup, main) = create_with_setup(&env, "BUSHING");
    assert_eq!(env.stage(&setup).planned_minutes, 15.0);
    env.run_stage(&setup, 15);
    env.run_stage(&main, 5);

    // BUSHING → FLANGE 再次出现,沿用已有记录
    let (setup, main) = create_with_setup(&env, "FLANGE");
    assert_eq!(env.stage(&setup).planned_minutes, 30.0);
    assert_eq!(env.count_rows("setup_time"), 2);
    env.run_stage(&setup, 30);
    env.run_stage(&main, 5);

    // 外部维护的实测值覆盖默认值
    env.repos
        .setup_time_repo
        .upsert(&SetupTimeRecord::new(
            "L1",
            "FLANGE",
            "BUSHING",
            12.0,
            SetupTimeSource::Recorded,
            env.now(),
        ))
        .unwrap();
    let (setup, _main) = create_with_setup(&env, "BUSHING");
    assert_eq!(env.stage(&setup).planned_minutes, 12.0);
    assert_eq!(env.count_rows("setup_time"), 2);
}

#[test]
fn test_zero_setup_time_is_recorded_but_inserts_no_setup() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    let bushing = env.create_lot("BUSHING", 5, 0);
    env.run_stage(&env.first_stage(&bushing), 5);

    let pin = env.create_lot("PIN", 10, 0);
    let pin_id = env.first_stage(&pin);
    assert!(pin.scheduled[0].outcome.is_assigned());
    assert_eq!(pin.scheduled[0].outcome.setup_stage_id(), None);
    assert_eq!(env.stage(&pin_id).status, StageStatus::Pending);

    let record = env
        .repos
        .setup_time_repo
        .get("L1", "BUSHING", "PIN")
        .unwrap()
        .expect("零换型也应登记");
    assert_eq!(record.duration_minutes, 0.0);
}

#[test]
fn test_pause_time_is_accumulated_across_pauses() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    let lot = env.create_lot("PIN", 20, 0);
    let stage_id = env.first_stage(&lot);

    env.orchestrator.start_stage(&stage_id, Some("op1"), Some("HMI-3")).unwrap();
    env.advance(3);
    env.orchestrator.pause_stage(&stage_id, Some("op1"), Some("换刀")).unwrap();
    env.advance(10);
    let resumed = env.orchestrator.resume_stage(&stage_id, Some("op2")).unwrap();
    assert_eq!(resumed.paused_minutes, 10.0);
    assert_eq!(resumed.operator.as_deref(), Some("op2"));
    assert_eq!(resumed.device.as_deref(), Some("HMI-3"));

    env.advance(4);
    env.orchestrator.pause_stage(&stage_id, None, None).unwrap();
    env.advance(5);
    let completion = env.orchestrator.complete_stage(&stage_id).unwrap();

    let done = completion.stage;
    assert_eq!(done.status, StageStatus::Completed);
    assert_eq!(done.paused_minutes, 15.0);
    assert!((done.elapsed_minutes(env.now()) - 7.0).abs() < 1e-9);
}

#[test]
fn test_resume_is_rejected_while_machine_runs_another_stage() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    let a = env.first_stage(&env.create_lot("PIN", 10, 0));
    let b = env.first_stage(&env.create_lot("PIN", 10, 0));
    assert_eq!(env.stage(&b).machine_id.as_deref(), Some("L1"));

    env.orchestrator.start_stage(&a, None, None).unwrap();
    env.advance(2);
    env.orchestrator.pause_stage(&a, None, Some("等料")).unwrap();
    env.orchestrator.start_stage(&b, None, None).unwrap();

    let err = env.orchestrator.resume_stage(&a, None).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
    assert_eq!(env.stage(&a).status, StageStatus::Paused);
}

#[test]
fn test_cancel_main_cancels_unstarted_setup() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    env.run_stage(&env.first_stage(&env.create_lot("BUSHING", 5, 0)), 5);
    let (setup_id, main_id) = create_with_setup(&env, "FLANGE");

    let cancelled = env
        .orchestrator
        .cancel_stage(&main_id, "客户撤单", Some("planner"))
        .unwrap();
    assert_eq!(cancelled.status, StageStatus::Error);
    assert_eq!(cancelled.error_count, 1);
    assert_eq!(cancelled.reason.as_deref(), Some("客户撤单"));
    assert_eq!(cancelled.operator.as_deref(), Some("planner"));
    assert!(cancelled.ended_at.is_some());

    let setup = env.stage(&setup_id);
    assert_eq!(setup.status, StageStatus::Error);
    assert!(setup.reason.unwrap_or_default().contains("客户撤单"));
    assert_eq!(env.events.count(StageEventType::Cancelled), 2);
}

#[test]
fn test_cancel_setup_unlinks_and_unblocks_main() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    env.run_stage(&env.first_stage(&env.create_lot("BUSHING", 5, 0)), 5);
    let (setup_id, main_id) = create_with_setup(&env, "FLANGE");

    env.orchestrator.cancel_stage(&setup_id, "无需换型", None).unwrap();

    assert_eq!(env.stage(&main_id).status, StageStatus::Pending);
    assert!(env.repos.stage_repo.find_setup_for(&main_id).unwrap().is_none());
    let started = env.orchestrator.start_stage(&main_id, None, None).unwrap();
    assert_eq!(started.status, StageStatus::InProgress);
}

#[test]
fn test_cancel_queued_stage_compacts_positions() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    let running = env.first_stage(&env.create_lot("PIN", 10, 0));
    env.orchestrator.start_stage(&running, None, None).unwrap();

    let mut queued = Vec::new();
    for _ in 0..3 {
        env.advance(1);
        queued.push(env.first_stage(&env.create_lot("PIN", 10, 0)));
    }
    assert_eq!(env.stage(&queued[2]).queue_position, Some(3));

    env.orchestrator.cancel_stage(&queued[1], "重复下单", None).unwrap();

    assert_eq!(env.stage(&queued[1]).queue_position, None);
    assert_eq!(env.stage(&queued[0]).queue_position, Some(1));
    assert_eq!(env.stage(&queued[2]).queue_position, Some(2));
}

#[test]
fn test_cancel_running_stage_promotes_queue() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    let running = env.first_stage(&env.create_lot("PIN", 10, 0));
    env.orchestrator.start_stage(&running, None, None).unwrap();
    env.advance(1);
    let waiting = env.first_stage(&env.create_lot("PIN", 10, 0));
    assert!(env.stage(&waiting).is_type_queued());

    env.advance(2);
    env.orchestrator.cancel_stage(&running, "设备故障", None).unwrap();

    let promoted = env.stage(&waiting);
    assert_eq!(promoted.status, StageStatus::Pending);
    assert_eq!(promoted.machine_id.as_deref(), Some("L1"));
    assert_eq!(promoted.queue_position, None);
}
