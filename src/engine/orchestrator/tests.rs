use super::*;
use crate::db::open_in_memory_with_schema;
use crate::domain::{LotSpec, Routing, RoutingStep, SubLotSplit};
use crate::engine::events::{CollectingEventPublisher, StageEventType};
use crate::repository::{MachineRepository, RoutingRepository};
use chrono::{Duration, NaiveDate};

struct Harness {
    orchestrator: SchedulerOrchestrator,
    repos: SchedulerRepositories,
    machines: MachineRepository,
    clock: Arc<Mutex<NaiveDateTime>>,
    events: Arc<CollectingEventPublisher>,
}

impl Harness {
    fn advance(&self, minutes: i64) {
        let mut now = self.clock.lock().unwrap();
        *now += Duration::minutes(minutes);
    }

    fn now(&self) -> NaiveDateTime {
        *self.clock.lock().unwrap()
    }
}

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

fn lathe_routing(part_id: &str) -> Routing {
    let routing_id = format!("R-{}", part_id);
    Routing {
        routing_id: routing_id.clone(),
        part_id: part_id.to_string(),
        steps: vec![RoutingStep {
            step_id: format!("{}-10", routing_id),
            routing_id,
            step_order: 10,
            machine_type_id: "LATHE".to_string(),
            standard_minutes_per_unit: 1.0,
            default_setup_minutes: 15.0,
        }],
    }
}

fn harness() -> Harness {
    let conn = Arc::new(Mutex::new(open_in_memory_with_schema().unwrap()));
    let machines = MachineRepository::new(conn.clone());
    machines.upsert(&Machine::new("M1", "LATHE", 0)).unwrap();
    machines.upsert(&Machine::new("MILL1", "MILL", 0)).unwrap();

    let routings = RoutingRepository::new(conn.clone());
    routings.insert(&lathe_routing("P1")).unwrap();

    let repos = SchedulerRepositories::from_connection(conn);
    let clock = Arc::new(Mutex::new(t0()));
    let clock_source = clock.clone();
    let events = Arc::new(CollectingEventPublisher::new());

    let orchestrator = SchedulerOrchestrator::new(repos.clone(), SchedulerConfig::default())
        .with_clock(Arc::new(move || *clock_source.lock().unwrap()))
        .with_event_publisher(events.clone());

    Harness {
        orchestrator,
        repos,
        machines,
        clock,
        events,
    }
}

/// 建批并返回各子批次首道工序ID
fn create_lot(h: &Harness, sub_lots: i32) -> Vec<String> {
    let spec = LotSpec::new("P1", 10 * sub_lots).with_split(SubLotSplit::Count(sub_lots));
    let creation = h.orchestrator.create_lot_and_schedule(&spec).unwrap();
    assert!(creation.failures.is_empty());
    creation.scheduled.into_iter().map(|s| s.stage_id).collect()
}

#[test]
fn test_second_start_on_busy_machine_is_rejected() {
    let h = harness();
    let stages = create_lot(&h, 2);

    h.orchestrator.start_stage(&stages[0], Some("op1"), None).unwrap();
    let err = h.orchestrator.start_stage(&stages[1], Some("op2"), None).unwrap_err();

    assert!(matches!(err, SchedulerError::InvalidTransition { .. }));
    assert_eq!(
        h.orchestrator.get_stage(&stages[1]).unwrap().status,
        StageStatus::Pending
    );
    assert!(h.orchestrator.verify_single_occupancy().is_ok());
}

#[test]
fn test_resolve_conflicts_keeps_earliest_and_requeues_the_rest() {
    let h = harness();
    let stages = create_lot(&h, 2);
    h.orchestrator.start_stage(&stages[0], None, None).unwrap();

    // 绕过守卫直接写入第二道加工中工序
    h.advance(5);
    let mut intruder = h.orchestrator.get_stage(&stages[1]).unwrap();
    intruder.status = StageStatus::InProgress;
    intruder.started_at = Some(h.now());
    h.repos.stage_repo.update(&intruder).unwrap();

    assert!(matches!(
        h.orchestrator.verify_single_occupancy(),
        Err(SchedulerError::ConcurrencyConflict { .. })
    ));

    let report = h.orchestrator.resolve_conflicts().unwrap();
    assert_eq!(report.repairs.len(), 1);
    assert_eq!(report.repairs[0].kept_stage_id, stages[0]);
    assert_eq!(report.repairs[0].requeued_stage_ids, vec![stages[1].clone()]);
    assert!(report.rescheduled[0].outcome.is_queued());

    let requeued = h.orchestrator.get_stage(&stages[1]).unwrap();
    assert_eq!(requeued.status, StageStatus::Waiting);
    assert_eq!(requeued.machine_id, None);
    assert_eq!(requeued.queue_position, Some(1));
    assert_eq!(requeued.retry_count, 1);
    assert_eq!(requeued.started_at, None);
    assert_eq!(h.events.count(StageEventType::Requeued), 1);
    assert!(h.orchestrator.verify_single_occupancy().is_ok());
}

#[test]
fn test_cancel_requires_reason() {
    let h = harness();
    let stages = create_lot(&h, 1);

    let err = h.orchestrator.cancel_stage(&stages[0], "  ", None).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidInput(_)));
    assert_eq!(
        h.orchestrator.get_stage(&stages[0]).unwrap().status,
        StageStatus::Pending
    );
}

#[test]
fn test_reassign_to_other_machine_type_is_rejected() {
    let h = harness();
    let stages = create_lot(&h, 1);

    let err = h.orchestrator.reassign_stage(&stages[0], "MILL1").unwrap_err();
    match err {
        SchedulerError::MachineTypeMismatch { expected, actual, .. } => {
            assert_eq!(expected, "LATHE");
            assert_eq!(actual, "MILL");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        h.orchestrator.get_stage(&stages[0]).unwrap().machine_id.as_deref(),
        Some("M1")
    );
}

#[test]
fn test_optimize_queue_drains_type_queue_onto_new_machine_once() {
    let h = harness();
    let first = create_lot(&h, 1);
    h.orchestrator.start_stage(&first[0], None, None).unwrap();

    let second = create_lot(&h, 1);
    assert!(h.orchestrator.get_stage(&second[0]).unwrap().is_type_queued());

    h.machines.upsert(&Machine::new("M2", "LATHE", 0)).unwrap();

    let report = h.orchestrator.optimize_queue().unwrap();
    assert_eq!(report.assigned.len(), 1);
    assert_eq!(report.assigned[0].machine_id, "M2");
    assert!(report.failures.is_empty());

    let assigned = h.orchestrator.get_stage(&second[0]).unwrap();
    assert_eq!(assigned.status, StageStatus::Pending);
    assert_eq!(assigned.queue_position, None);

    let again = h.orchestrator.optimize_queue().unwrap();
    assert_eq!(again.changed(), 0);
}

#[test]
fn test_reprioritize_requires_wait_set_membership() {
    let h = harness();
    let first = create_lot(&h, 1);
    h.orchestrator.start_stage(&first[0], None, None).unwrap();
    let second = create_lot(&h, 1);

    let bumped = h.orchestrator.reprioritize("M1", &second[0]).unwrap();
    assert_eq!(bumped.priority, 10);

    let err = h.orchestrator.reprioritize("M1", &first[0]).unwrap_err();
    assert!(matches!(err, SchedulerError::NotQueued { .. }));
    assert_eq!(h.events.count(StageEventType::Reprioritized), 1);
}

#[test]
fn test_oversized_lot_is_rejected_and_lock_stays_usable() {
    let h = harness();
    let spec = LotSpec::new("P1", 2_000_000_000);

    let err = h.orchestrator.create_lot_and_schedule(&spec).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidInput(_)));

    let stages = create_lot(&h, 1);
    assert_eq!(stages.len(), 1);
}

#[test]
fn test_release_overflow_is_reported_instead_of_panicking() {
    let h = harness();
    let first = create_lot(&h, 1);
    let mut stage = h.orchestrator.get_stage(&first[0]).unwrap();
    stage.planned_minutes = 1.0e13;
    h.repos.stage_repo.update(&stage).unwrap();

    let creation = h
        .orchestrator
        .create_lot_and_schedule(&LotSpec::new("P1", 10))
        .unwrap();
    assert_eq!(creation.failures.len(), 1);
    assert!(creation.scheduled.is_empty());

    h.orchestrator.start_stage(&first[0], None, None).unwrap();
}
