// ==========================================
// 配置与审计测试
// ==========================================
// 测试范围:
// 1. config_kv 覆写排产参数,格式错误回退默认值
// 2. 建批时是否立即调度首道工序
// 3. 工序事件写入 action_log
// ==========================================


use stage_scheduler::config::{config_keys, ConfigManager};
use stage_scheduler::domain::{LotSpec, StageStatus};
use stage_scheduler::engine::{ActionLogEventPublisher, StageEventPublisher};
use stage_scheduler::repository::ActionLogRepository;
use std::sync::Arc;
use test_helpers::TestEnv;

#[test]
fn test_config_overrides_and_falls_back_on_malformed_values() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    let manager = ConfigManager::from_connection(env.conn.clone()).unwrap();
    manager.set_config_value(config_keys::MAX_PRIORITY, "50").unwrap();
    manager.set_config_value(config_keys::W_QUEUE, "4.5").unwrap();
    manager.set_config_value(config_keys::REPRIORITIZE_STEP, "abc").unwrap();
    manager
        .set_config_value(config_keys::AUTO_SCHEDULE_ON_CREATE, "false")
        .unwrap();

    let config = manager.load_scheduler_config().unwrap();
    assert_eq!(config.max_priority, 50);
    assert_eq!(config.weights.w_queue, 4.5);
    assert_eq!(config.reprioritize_step, 10);
    assert!(!config.auto_schedule_on_create);
    assert_eq!(config.weights.bonus_same_part, 50.0);

    let snapshot: serde_json::Value =
        serde_json::from_str(&manager.get_config_snapshot().unwrap()).unwrap();
    assert_eq!(snapshot[config_keys::MAX_PRIORITY], "50");
}

#[test]
fn test_lot_creation_respects_auto_schedule_flag() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);
    let manager = ConfigManager::from_connection(env.conn.clone()).unwrap();
    manager
        .set_config_value(config_keys::AUTO_SCHEDULE_ON_CREATE, "false")
        .unwrap();
    let env = TestEnv::with_config(&[("L1", "LATHE", 0)], manager.load_scheduler_config().unwrap());

    let creation = env
        .orchestrator
        .create_lot_and_schedule(&LotSpec::new("PIN", 10))
        .unwrap();
    assert!(creation.scheduled.is_empty());
    let stage_id = creation.stage_ids[0].clone();
    let stage = env.stage(&stage_id);
    assert_eq!(stage.status, StageStatus::Pending);
    assert_eq!(stage.machine_id, None);

    let outcome = env.orchestrator.schedule_stage(&stage_id).unwrap();
    assert_eq!(outcome.machine_id(), Some("L1"));

    // 单次建批可覆盖全局开关
    let creation = env
        .orchestrator
        .create_lot_and_schedule(&LotSpec::new("PIN", 10).with_schedule_immediately(true))
        .unwrap();
    assert_eq!(creation.scheduled.len(), 1);
}

#[test]
fn test_invalid_lot_spec_is_rejected() {
    let env = TestEnv::new(&[("L1", "LATHE", 0)]);

    let unknown = env
        .orchestrator
        .create_lot_and_schedule(&LotSpec::new("GEAR", 10))
        .unwrap_err();
    assert!(matches!(
        unknown,
        stage_scheduler::engine::SchedulerError::NotFound { .. }
    ));

    let empty = env
        .orchestrator
        .create_lot_and_schedule(&LotSpec::new("PIN", 0))
        .unwrap_err();
    assert!(matches!(
        empty,
        stage_scheduler::engine::SchedulerError::InvalidInput(_)
    ));
    assert_eq!(env.count_rows("lot"), 0);
}

#[test]
fn test_stage_events_are_written_to_action_log() {
    let env = TestEnv::with_publisher(&[("L1", "LATHE", 0)], |conn| {
        Arc::new(ActionLogEventPublisher::new(Arc::new(ActionLogRepository::new(conn))))
            as Arc<dyn StageEventPublisher>
    });

    let lot = env.create_lot("PIN", 10, 0);
    let stage_id = env.first_stage(&lot);
    env.orchestrator.start_stage(&stage_id, Some("op7"), None).unwrap();
    env.advance(5);
    env.orchestrator.complete_stage(&stage_id).unwrap();

    let audit = ActionLogRepository::new(env.conn.clone());
    let types: Vec<String> = audit
        .find_by_stage(&stage_id)
        .unwrap()
        .into_iter()
        .map(|log| log.action_type)
        .collect();
    assert_eq!(
        types,
        vec!["StageCreated", "StageAssigned", "StageStarted", "StageCompleted"]
    );

    let started = audit
        .find_by_stage(&stage_id)
        .unwrap()
        .into_iter()
        .find(|log| log.action_type == "StageStarted")
        .unwrap();
    assert_eq!(started.actor, "op7");
    assert_eq!(started.machine_id.as_deref(), Some("L1"));

    let lot_logs = audit.find_by_lot(&lot.lot_id).unwrap();
    assert!(lot_logs.iter().any(|log| log.action_type == "LotCompleted"));
    assert_eq!(audit.count_by_type("SubLotCompleted").unwrap(), 1);
}
