// ==========================================
// 工序排产引擎 - 机台数据仓储
// ==========================================
// 对齐: machine 表
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::Machine;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::MachineStore;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// MachineRepository - 机台仓储
// ==========================================
pub struct MachineRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MachineRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增或更新机台 (参考数据维护)
    pub fn upsert(&self, machine: &Machine) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO machine (machine_id, name, machine_type_id, priority)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(machine_id) DO UPDATE SET
                name = excluded.name,
                machine_type_id = excluded.machine_type_id,
                priority = excluded.priority
            "#,
            params![
                machine.machine_id,
                machine.name,
                machine.machine_type_id,
                machine.priority
            ],
        )?;
        Ok(())
    }
}

fn map_machine_row(row: &Row<'_>) -> SqliteResult<Machine> {
    Ok(Machine {
        machine_id: row.get(0)?,
        name: row.get(1)?,
        machine_type_id: row.get(2)?,
        priority: row.get(3)?,
    })
}

impl MachineStore for MachineRepository {
    fn get_by_id(&self, machine_id: &str) -> RepositoryResult<Option<Machine>> {
        let conn = self.get_conn()?;
        let machine = conn
            .query_row(
                "SELECT machine_id, name, machine_type_id, priority FROM machine WHERE machine_id = ?1",
                params![machine_id],
                map_machine_row,
            )
            .optional()?;
        Ok(machine)
    }

    fn get_by_type(&self, machine_type_id: &str) -> RepositoryResult<Vec<Machine>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT machine_id, name, machine_type_id, priority
            FROM machine
            WHERE machine_type_id = ?1
            ORDER BY machine_id ASC
            "#,
        )?;
        let machines = stmt
            .query_map(params![machine_type_id], map_machine_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(machines)
    }

    fn list_all(&self) -> RepositoryResult<Vec<Machine>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT machine_id, name, machine_type_id, priority FROM machine ORDER BY machine_id ASC",
        )?;
        let machines = stmt
            .query_map([], map_machine_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(machines)
    }
}
