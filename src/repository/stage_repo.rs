// ==========================================
// 工序排产引擎 - 工序执行数据仓储
// ==========================================
// 对齐: stage_execution / stage_setup_link 表
// 红线: Repository 不含业务逻辑
// ==========================================

#[cfg(test)]
mod tests;

use crate::domain::{StageExecution, StageStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::StageStore;
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Result as SqliteResult, Row,
};
use std::sync::{Arc, Mutex};

const STAGE_COLUMNS: &str = r#"
    s.stage_id, s.sub_lot_id, s.routing_step_id, s.machine_id,
    s.status, s.is_setup, s.priority, s.queue_position, s.planned_minutes,
    s.created_at, s.status_changed_at, s.started_at, s.paused_at, s.resumed_at, s.ended_at,
    s.paused_minutes, s.operator, s.device, s.reason, s.retry_count, s.error_count
"#;

// ==========================================
// StageRepository - 工序执行仓储
// ==========================================
pub struct StageRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StageRepository {
    /// 从已有连接创建仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn query_stages<P: rusqlite::Params>(
        &self,
        where_clause: &str,
        params: P,
    ) -> RepositoryResult<Vec<StageExecution>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM stage_execution s {}", STAGE_COLUMNS, where_clause);
        let mut stmt = conn.prepare(&sql)?;
        let stages = stmt
            .query_map(params, map_stage_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(stages)
    }
}

/// 行映射
fn map_stage_row(row: &Row<'_>) -> SqliteResult<StageExecution> {
    let status_raw: String = row.get(4)?;
    let status = StageStatus::from_db_str(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            Type::Text,
            Box::new(RepositoryError::FieldValueError {
                field: "status".to_string(),
                message: format!("未知工序状态: {}", status_raw),
            }),
        )
    })?;

    Ok(StageExecution {
        stage_id: row.get(0)?,
        sub_lot_id: row.get(1)?,
        routing_step_id: row.get(2)?,
        machine_id: row.get(3)?,
        status,
        is_setup: row.get(5)?,
        priority: row.get(6)?,
        queue_position: row.get(7)?,
        planned_minutes: row.get(8)?,
        created_at: row.get(9)?,
        status_changed_at: row.get(10)?,
        started_at: row.get(11)?,
        paused_at: row.get(12)?,
        resumed_at: row.get(13)?,
        ended_at: row.get(14)?,
        paused_minutes: row.get(15)?,
        operator: row.get(16)?,
        device: row.get(17)?,
        reason: row.get(18)?,
        retry_count: row.get(19)?,
        error_count: row.get(20)?,
    })
}

/// 写入一行工序 (供事务内复用)
pub(crate) fn insert_stage_row(conn: &Connection, stage: &StageExecution) -> SqliteResult<()> {
    conn.execute(
        r#"
        INSERT INTO stage_execution (
            stage_id, sub_lot_id, routing_step_id, machine_id,
            status, is_setup, priority, queue_position, planned_minutes,
            created_at, status_changed_at, started_at, paused_at, resumed_at, ended_at,
            paused_minutes, operator, device, reason, retry_count, error_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                  ?16, ?17, ?18, ?19, ?20, ?21)
        "#,
        params![
            stage.stage_id,
            stage.sub_lot_id,
            stage.routing_step_id,
            stage.machine_id,
            stage.status.to_db_str(),
            stage.is_setup,
            stage.priority,
            stage.queue_position,
            stage.planned_minutes,
            stage.created_at,
            stage.status_changed_at,
            stage.started_at,
            stage.paused_at,
            stage.resumed_at,
            stage.ended_at,
            stage.paused_minutes,
            stage.operator,
            stage.device,
            stage.reason,
            stage.retry_count,
            stage.error_count,
        ],
    )?;
    Ok(())
}

impl StageStore for StageRepository {
    fn get_by_id(&self, stage_id: &str) -> RepositoryResult<Option<StageExecution>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM stage_execution s WHERE s.stage_id = ?1",
            STAGE_COLUMNS
        );
        let stage = conn
            .query_row(&sql, params![stage_id], map_stage_row)
            .optional()?;
        Ok(stage)
    }

    fn insert(&self, stage: &StageExecution) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        insert_stage_row(&conn, stage)?;
        Ok(())
    }

    fn update(&self, stage: &StageExecution) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE stage_execution SET
                machine_id = ?2, status = ?3, priority = ?4, queue_position = ?5,
                planned_minutes = ?6, status_changed_at = ?7, started_at = ?8,
                paused_at = ?9, resumed_at = ?10, ended_at = ?11, paused_minutes = ?12,
                operator = ?13, device = ?14, reason = ?15, retry_count = ?16, error_count = ?17
            WHERE stage_id = ?1
            "#,
            params![
                stage.stage_id,
                stage.machine_id,
                stage.status.to_db_str(),
                stage.priority,
                stage.queue_position,
                stage.planned_minutes,
                stage.status_changed_at,
                stage.started_at,
                stage.paused_at,
                stage.resumed_at,
                stage.ended_at,
                stage.paused_minutes,
                stage.operator,
                stage.device,
                stage.reason,
                stage.retry_count,
                stage.error_count,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "StageExecution".to_string(),
                id: stage.stage_id.clone(),
            });
        }
        Ok(())
    }

    fn find_by_machine_and_status(
        &self,
        machine_id: &str,
        statuses: &[StageStatus],
    ) -> RepositoryResult<Vec<StageExecution>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        // ?1 = machine_id, ?2.. = 状态
        let placeholders = (0..statuses.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = format!(
            "WHERE s.machine_id = ?1 AND s.status IN ({}) ORDER BY s.created_at ASC, s.stage_id ASC",
            placeholders
        );

        let mut values: Vec<&str> = Vec::with_capacity(statuses.len() + 1);
        values.push(machine_id);
        values.extend(statuses.iter().map(|status| status.to_db_str()));
        self.query_stages(&where_clause, params_from_iter(values))
    }

    fn find_queued_for_machine_type(
        &self,
        machine_type_id: &str,
    ) -> RepositoryResult<Vec<StageExecution>> {
        self.query_stages(
            r#"
            JOIN routing_step r ON r.step_id = s.routing_step_id
            WHERE s.status = 'WAITING' AND s.machine_id IS NULL AND r.machine_type_id = ?1
            ORDER BY s.queue_position ASC, s.created_at ASC
            "#,
            params![machine_type_id],
        )
    }

    fn find_all_in_queue(&self) -> RepositoryResult<Vec<StageExecution>> {
        self.query_stages(
            r#"
            WHERE s.status = 'WAITING'
               OR (s.status = 'PENDING' AND s.machine_id IS NOT NULL)
            ORDER BY s.priority DESC, s.created_at ASC, s.stage_id ASC
            "#,
            params![],
        )
    }

    fn find_last_completed_on_machine(
        &self,
        machine_id: &str,
    ) -> RepositoryResult<Option<StageExecution>> {
        let stages = self.query_stages(
            r#"
            WHERE s.machine_id = ?1 AND s.status = 'COMPLETED'
            ORDER BY s.ended_at DESC, s.status_changed_at DESC
            LIMIT 1
            "#,
            params![machine_id],
        )?;
        Ok(stages.into_iter().next())
    }

    fn find_by_sub_lot(&self, sub_lot_id: &str) -> RepositoryResult<Vec<StageExecution>> {
        self.query_stages(
            "WHERE s.sub_lot_id = ?1 ORDER BY s.created_at ASC, s.stage_id ASC",
            params![sub_lot_id],
        )
    }

    fn link_setup(
        &self,
        setup_stage_id: &str,
        main_stage_id: &str,
        now: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO stage_setup_link (setup_stage_id, main_stage_id, created_at) VALUES (?1, ?2, ?3)",
            params![setup_stage_id, main_stage_id, now],
        )?;
        Ok(())
    }

    fn unlink_setup(&self, setup_stage_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "DELETE FROM stage_setup_link WHERE setup_stage_id = ?1",
            params![setup_stage_id],
        )?;
        Ok(())
    }

    fn find_setup_for(&self, main_stage_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT setup_stage_id FROM stage_setup_link WHERE main_stage_id = ?1",
                params![main_stage_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn find_main_for(&self, setup_stage_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT main_stage_id FROM stage_setup_link WHERE setup_stage_id = ?1",
                params![setup_stage_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}
