// ==========================================
// 工序排产引擎 - 批次数据仓储
// ==========================================
// 对齐: lot / sub_lot 表
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::{Lot, LotStatus, StageExecution, SubLot};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stage_repo::insert_stage_row;
use crate::repository::stores::LotStore;
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// LotRepository - 批次仓储
// ==========================================
pub struct LotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LotRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

fn parse_lot_status(raw: &str, idx: usize) -> SqliteResult<LotStatus> {
    LotStatus::from_db_str(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::new(RepositoryError::FieldValueError {
                field: "status".to_string(),
                message: format!("未知批次状态: {}", raw),
            }),
        )
    })
}

fn map_lot_row(row: &Row<'_>) -> SqliteResult<Lot> {
    let status_raw: String = row.get(5)?;
    Ok(Lot {
        lot_id: row.get(0)?,
        part_id: row.get(1)?,
        routing_id: row.get(2)?,
        quantity: row.get(3)?,
        priority: row.get(4)?,
        status: parse_lot_status(&status_raw, 5)?,
        created_at: row.get(6)?,
        completed_at: row.get(7)?,
    })
}

fn map_sub_lot_row(row: &Row<'_>) -> SqliteResult<SubLot> {
    let status_raw: String = row.get(4)?;
    Ok(SubLot {
        sub_lot_id: row.get(0)?,
        lot_id: row.get(1)?,
        seq_no: row.get(2)?,
        quantity: row.get(3)?,
        status: parse_lot_status(&status_raw, 4)?,
        completed_at: row.get(5)?,
    })
}

fn insert_lot_row(conn: &Connection, lot: &Lot) -> SqliteResult<()> {
    conn.execute(
        r#"
        INSERT INTO lot (lot_id, part_id, routing_id, quantity, priority, status, created_at, completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            lot.lot_id,
            lot.part_id,
            lot.routing_id,
            lot.quantity,
            lot.priority,
            lot.status.to_db_str(),
            lot.created_at,
            lot.completed_at,
        ],
    )?;
    Ok(())
}

fn insert_sub_lot_row(conn: &Connection, sub_lot: &SubLot) -> SqliteResult<()> {
    conn.execute(
        r#"
        INSERT INTO sub_lot (sub_lot_id, lot_id, seq_no, quantity, status, completed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            sub_lot.sub_lot_id,
            sub_lot.lot_id,
            sub_lot.seq_no,
            sub_lot.quantity,
            sub_lot.status.to_db_str(),
            sub_lot.completed_at,
        ],
    )?;
    Ok(())
}

impl LotStore for LotRepository {
    fn get_lot(&self, lot_id: &str) -> RepositoryResult<Option<Lot>> {
        let conn = self.get_conn()?;
        let lot = conn
            .query_row(
                r#"
                SELECT lot_id, part_id, routing_id, quantity, priority, status, created_at, completed_at
                FROM lot WHERE lot_id = ?1
                "#,
                params![lot_id],
                map_lot_row,
            )
            .optional()?;
        Ok(lot)
    }

    fn get_sub_lot(&self, sub_lot_id: &str) -> RepositoryResult<Option<SubLot>> {
        let conn = self.get_conn()?;
        let sub_lot = conn
            .query_row(
                r#"
                SELECT sub_lot_id, lot_id, seq_no, quantity, status, completed_at
                FROM sub_lot WHERE sub_lot_id = ?1
                "#,
                params![sub_lot_id],
                map_sub_lot_row,
            )
            .optional()?;
        Ok(sub_lot)
    }

    fn insert_lot(&self, lot: &Lot) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        insert_lot_row(&conn, lot)?;
        Ok(())
    }

    fn insert_sub_lot(&self, sub_lot: &SubLot) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        insert_sub_lot_row(&conn, sub_lot)?;
        Ok(())
    }

    fn insert_lot_with_stages(
        &self,
        lot: &Lot,
        sub_lots: &[SubLot],
        stages: &[StageExecution],
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        insert_lot_row(&tx, lot)?;
        for sub_lot in sub_lots {
            insert_sub_lot_row(&tx, sub_lot)?;
        }
        for stage in stages {
            insert_stage_row(&tx, stage)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn list_sub_lots(&self, lot_id: &str) -> RepositoryResult<Vec<SubLot>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT sub_lot_id, lot_id, seq_no, quantity, status, completed_at
            FROM sub_lot WHERE lot_id = ?1
            ORDER BY seq_no ASC
            "#,
        )?;
        let sub_lots = stmt
            .query_map(params![lot_id], map_sub_lot_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(sub_lots)
    }

    fn mark_sub_lot_completed(
        &self,
        sub_lot_id: &str,
        at: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE sub_lot SET status = 'COMPLETED', completed_at = ?2 WHERE sub_lot_id = ?1 AND status = 'OPEN'",
            params![sub_lot_id, at],
        )?;
        Ok(rows > 0)
    }

    fn mark_lot_completed(&self, lot_id: &str, at: NaiveDateTime) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE lot SET status = 'COMPLETED', completed_at = ?2 WHERE lot_id = ?1 AND status = 'OPEN'",
            params![lot_id, at],
        )?;
        Ok(rows > 0)
    }
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

    fn setup_repo() -> LotRepository {
        let conn = crate::db::open_in_memory_with_schema().unwrap();
        conn.execute("INSERT INTO routing (routing_id, part_id) VALUES ('R1', 'P1')", [])
            .unwrap();
        LotRepository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_mark_completed_reports_only_first_transition() {
        let repo = setup_repo();
        repo.insert_lot(&Lot {
            lot_id: "L1".to_string(),
            part_id: "P1".to_string(),
            routing_id: "R1".to_string(),
            quantity: 10,
            priority: 0,
            status: LotStatus::Open,
            created_at: t0(),
            completed_at: None,
        })
        .unwrap();
        for (seq, id) in [(2, "SL2"), (1, "SL1")] {
            repo.insert_sub_lot(&SubLot {
                sub_lot_id: id.to_string(),
                lot_id: "L1".to_string(),
                seq_no: seq,
                quantity: 5,
                status: LotStatus::Open,
                completed_at: None,
            })
            .unwrap();
        }

        let ids: Vec<_> = repo
            .list_sub_lots("L1")
            .unwrap()
            .into_iter()
            .map(|s| s.sub_lot_id)
            .collect();
        assert_eq!(ids, vec!["SL1", "SL2"]);

        assert!(repo.mark_sub_lot_completed("SL1", t0()).unwrap());
        assert!(!repo.mark_sub_lot_completed("SL1", t0()).unwrap());
        assert_eq!(
            repo.get_sub_lot("SL1").unwrap().unwrap().status,
            LotStatus::Completed
        );

        assert!(repo.mark_lot_completed("L1", t0()).unwrap());
        assert!(!repo.mark_lot_completed("L1", t0()).unwrap());
        assert_eq!(repo.get_lot("L1").unwrap().unwrap().completed_at, Some(t0()));
    }
}
