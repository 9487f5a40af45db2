// ==========================================
// 工序排产引擎 - 换型时间数据仓储
// ==========================================
// 对齐: setup_time 表 (单位: 分钟)
// 主键: (machine_id, from_part_id, to_part_id)
// ==========================================

use crate::domain::{SetupTimeRecord, SetupTimeSource};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::SetupTimeStore;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

// ==========================================
// SetupTimeRepository - 换型时间仓储
// ==========================================
pub struct SetupTimeRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SetupTimeRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl SetupTimeStore for SetupTimeRepository {
    fn get(
        &self,
        machine_id: &str,
        from_part_id: &str,
        to_part_id: &str,
    ) -> RepositoryResult<Option<SetupTimeRecord>> {
        let conn = self.get_conn()?;
        let record = conn
            .query_row(
                r#"
                SELECT machine_id, from_part_id, to_part_id, duration_minutes, source, created_at, updated_at
                FROM setup_time
                WHERE machine_id = ?1 AND from_part_id = ?2 AND to_part_id = ?3
                "#,
                params![machine_id, from_part_id, to_part_id],
                |row| {
                    let source_raw: String = row.get(4)?;
                    let source = SetupTimeSource::from_db_str(&source_raw).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            4,
                            Type::Text,
                            Box::new(RepositoryError::FieldValueError {
                                field: "source".to_string(),
                                message: format!("未知换型时间来源: {}", source_raw),
                            }),
                        )
                    })?;
                    Ok(SetupTimeRecord {
                        machine_id: row.get(0)?,
                        from_part_id: row.get(1)?,
                        to_part_id: row.get(2)?,
                        duration_minutes: row.get(3)?,
                        source,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// 写入换型时间 (已存在则覆盖时长与来源,保留 created_at)
    fn upsert(&self, record: &SetupTimeRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO setup_time (
                machine_id, from_part_id, to_part_id, duration_minutes, source, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(machine_id, from_part_id, to_part_id) DO UPDATE SET
                duration_minutes = excluded.duration_minutes,
                source = excluded.source,
                updated_at = excluded.updated_at
            "#,
            params![
                record.machine_id,
                record.from_part_id,
                record.to_part_id,
                record.duration_minutes,
                record.source.to_db_str(),
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_upsert_overwrites_duration_and_keeps_created_at() {
        let conn = crate::db::open_in_memory_with_schema().unwrap();
        conn.execute(
            "INSERT INTO machine (machine_id, name, machine_type_id, priority) VALUES ('M1', 'M1', 'LATHE', 0)",
            [],
        )
        .unwrap();
        let repo = SetupTimeRepository::new(Arc::new(Mutex::new(conn)));

        repo.upsert(&SetupTimeRecord::new("M1", "P1", "P2", 30.0, SetupTimeSource::Default, t0()))
            .unwrap();
        let mut recorded =
            SetupTimeRecord::new("M1", "P1", "P2", 12.5, SetupTimeSource::Recorded, t0());
        recorded.created_at = t0() + Duration::hours(1);
        recorded.updated_at = t0() + Duration::hours(1);
        repo.upsert(&recorded).unwrap();

        let loaded = repo.get("M1", "P1", "P2").unwrap().unwrap();
        assert_eq!(loaded.duration_minutes, 12.5);
        assert_eq!(loaded.source, SetupTimeSource::Recorded);
        assert_eq!(loaded.created_at, t0());
        assert!(repo.get("M1", "P2", "P1").unwrap().is_none());
    }
}
