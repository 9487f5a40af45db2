use super::StageRepository;
use crate::domain::{StageExecution, StageStatus};
use crate::repository::stores::StageStore;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

fn setup_test_db() -> Arc<Mutex<Connection>> {
    let conn = crate::db::open_in_memory_with_schema().unwrap();

    conn.execute_batch(
        r#"
        INSERT INTO machine (machine_id, name, machine_type_id, priority) VALUES
            ('M1', 'M1', 'LATHE', 1), ('M2', 'M2', 'MILL', 1);
        INSERT INTO routing (routing_id, part_id) VALUES ('R1', 'P1');
        INSERT INTO routing_step VALUES
            ('S1', 'R1', 1, 'LATHE', 1.0, 10.0),
            ('S2', 'R1', 2, 'MILL', 1.0, 10.0);
        INSERT INTO lot (lot_id, part_id, routing_id, quantity, priority, status, created_at)
            VALUES ('L1', 'P1', 'R1', 10, 0, 'OPEN', '2026-03-02 07:00:00');
        INSERT INTO sub_lot (sub_lot_id, lot_id, seq_no, quantity, status)
            VALUES ('SL1', 'L1', 1, 10, 'OPEN');
        "#,
    )
    .unwrap();

    Arc::new(Mutex::new(conn))
}

fn make_stage(step: &str, offset_secs: i64) -> StageExecution {
    StageExecution::new_productive("SL1", step, 0, 10.0, t0() + Duration::seconds(offset_secs))
}

#[test]
fn test_insert_update_and_get_roundtrip() {
    let repo = StageRepository::new(setup_test_db());
    let mut stage = make_stage("S1", 0);
    repo.insert(&stage).unwrap();

    stage.machine_id = Some("M1".to_string());
    stage.status = StageStatus::InProgress;
    stage.started_at = Some(t0() + Duration::minutes(5));
    stage.operator = Some("op-7".to_string());
    repo.update(&stage).unwrap();

    let loaded = repo.get_by_id(&stage.stage_id).unwrap().unwrap();
    assert_eq!(loaded, stage);
}

#[test]
fn test_update_missing_stage_is_not_found() {
    let repo = StageRepository::new(setup_test_db());
    let stage = make_stage("S1", 0);
    assert!(repo.update(&stage).is_err());
    assert!(repo.get_by_id("missing").unwrap().is_none());
}

#[test]
fn test_type_queue_excludes_assigned_waiting_stages() {
    let repo = StageRepository::new(setup_test_db());

    let mut queued_late = make_stage("S1", 2);
    queued_late.status = StageStatus::Waiting;
    queued_late.queue_position = Some(2);
    let mut queued_early = make_stage("S1", 1);
    queued_early.status = StageStatus::Waiting;
    queued_early.queue_position = Some(1);
    let mut behind_setup = make_stage("S1", 0);
    behind_setup.status = StageStatus::Waiting;
    behind_setup.machine_id = Some("M1".to_string());
    let mut other_type = make_stage("S2", 3);
    other_type.status = StageStatus::Waiting;
    other_type.queue_position = Some(1);

    for s in [&queued_late, &queued_early, &behind_setup, &other_type] {
        repo.insert(s).unwrap();
    }

    let queue = repo.find_queued_for_machine_type("LATHE").unwrap();
    let ids: Vec<_> = queue.iter().map(|s| s.stage_id.as_str()).collect();
    assert_eq!(ids, vec![queued_early.stage_id.as_str(), queued_late.stage_id.as_str()]);

    let all = repo.find_all_in_queue().unwrap();
    assert_eq!(all.len(), 4);
}

#[test]
fn test_last_completed_uses_end_time() {
    let repo = StageRepository::new(setup_test_db());

    let mut first = make_stage("S1", 0);
    first.machine_id = Some("M1".to_string());
    first.status = StageStatus::Completed;
    first.ended_at = Some(t0() + Duration::hours(2));
    let mut second = make_stage("S1", 1);
    second.machine_id = Some("M1".to_string());
    second.status = StageStatus::Completed;
    second.ended_at = Some(t0() + Duration::hours(1));

    repo.insert(&first).unwrap();
    repo.insert(&second).unwrap();

    let last = repo.find_last_completed_on_machine("M1").unwrap().unwrap();
    assert_eq!(last.stage_id, first.stage_id);
    assert!(repo.find_last_completed_on_machine("M2").unwrap().is_none());
}

#[test]
fn test_setup_link_resolves_both_directions_and_is_unique() {
    let repo = StageRepository::new(setup_test_db());
    let main = make_stage("S1", 0);
    let setup = StageExecution::new_setup_for(&main, "M1", 15.0, t0());
    let other_setup = StageExecution::new_setup_for(&main, "M1", 15.0, t0());
    repo.insert(&main).unwrap();
    repo.insert(&setup).unwrap();
    repo.insert(&other_setup).unwrap();

    repo.link_setup(&setup.stage_id, &main.stage_id, t0()).unwrap();
    assert_eq!(
        repo.find_setup_for(&main.stage_id).unwrap().as_deref(),
        Some(setup.stage_id.as_str())
    );
    assert_eq!(
        repo.find_main_for(&setup.stage_id).unwrap().as_deref(),
        Some(main.stage_id.as_str())
    );

    // 一个主工序只能关联一个换型工序
    assert!(repo
        .link_setup(&other_setup.stage_id, &main.stage_id, t0())
        .is_err());

    repo.unlink_setup(&setup.stage_id).unwrap();
    assert!(repo.find_setup_for(&main.stage_id).unwrap().is_none());
}

#[test]
fn test_find_by_machine_and_status_filters() {
    let repo = StageRepository::new(setup_test_db());
    let mut running = make_stage("S1", 0);
    running.machine_id = Some("M1".to_string());
    running.status = StageStatus::InProgress;
    let mut backlog = make_stage("S1", 1);
    backlog.machine_id = Some("M1".to_string());
    repo.insert(&running).unwrap();
    repo.insert(&backlog).unwrap();

    let in_progress = repo
        .find_by_machine_and_status("M1", &[StageStatus::InProgress])
        .unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].stage_id, running.stage_id);

    let both = repo
        .find_by_machine_and_status("M1", &[StageStatus::InProgress, StageStatus::Pending])
        .unwrap();
    assert_eq!(both.len(), 2);

    let mut done = make_stage("S1", 2);
    done.machine_id = Some("M1".to_string());
    done.status = StageStatus::Completed;
    repo.insert(&done).unwrap();
    let completed = repo
        .find_by_machine_and_status("M1", &[StageStatus::Completed])
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].stage_id, done.stage_id);

    assert!(repo.find_by_machine_and_status("M1", &[]).unwrap().is_empty());
    assert!(repo
        .find_by_machine_and_status("M2", &[StageStatus::Pending])
        .unwrap()
        .is_empty());
}
