// ==========================================
// 工序排产引擎 - 工艺路线数据仓储
// ==========================================
// 对齐: routing / routing_step 表
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::{Routing, RoutingStep};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::RoutingStore;
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

const STEP_COLUMNS: &str = "step_id, routing_id, step_order, machine_type_id, standard_minutes_per_unit, default_setup_minutes";

// ==========================================
// RoutingRepository - 工艺路线仓储
// ==========================================
pub struct RoutingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RoutingRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入工艺路线及其步骤 (单事务)
    pub fn insert(&self, routing: &Routing) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO routing (routing_id, part_id) VALUES (?1, ?2)",
            params![routing.routing_id, routing.part_id],
        )?;
        for step in &routing.steps {
            tx.execute(
                r#"
                INSERT INTO routing_step (
                    step_id, routing_id, step_order, machine_type_id,
                    standard_minutes_per_unit, default_setup_minutes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    step.step_id,
                    routing.routing_id,
                    step.step_order,
                    step.machine_type_id,
                    step.standard_minutes_per_unit,
                    step.default_setup_minutes,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn load_steps(conn: &Connection, routing_id: &str) -> RepositoryResult<Vec<RoutingStep>> {
        let sql = format!(
            "SELECT {} FROM routing_step WHERE routing_id = ?1 ORDER BY step_order ASC",
            STEP_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let steps = stmt
            .query_map(params![routing_id], map_step_row)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(steps)
    }

    fn load_routing(
        &self,
        where_clause: &str,
        key: &str,
    ) -> RepositoryResult<Option<Routing>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT routing_id, part_id FROM routing WHERE {}", where_clause);
        let head: Option<(String, String)> = conn
            .query_row(&sql, params![key], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        match head {
            Some((routing_id, part_id)) => {
                let steps = Self::load_steps(&conn, &routing_id)?;
                Ok(Some(Routing {
                    routing_id,
                    part_id,
                    steps,
                }))
            }
            None => Ok(None),
        }
    }
}

fn map_step_row(row: &Row<'_>) -> SqliteResult<RoutingStep> {
    Ok(RoutingStep {
        step_id: row.get(0)?,
        routing_id: row.get(1)?,
        step_order: row.get(2)?,
        machine_type_id: row.get(3)?,
        standard_minutes_per_unit: row.get(4)?,
        default_setup_minutes: row.get(5)?,
    })
}

impl RoutingStore for RoutingRepository {
    fn get_by_id(&self, routing_id: &str) -> RepositoryResult<Option<Routing>> {
        self.load_routing("routing_id = ?1", routing_id)
    }

    fn get_by_part_id(&self, part_id: &str) -> RepositoryResult<Option<Routing>> {
        self.load_routing("part_id = ?1", part_id)
    }

    fn get_step(&self, step_id: &str) -> RepositoryResult<Option<RoutingStep>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM routing_step WHERE step_id = ?1", STEP_COLUMNS);
        let step = conn
            .query_row(&sql, params![step_id], map_step_row)
            .optional()?;
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, order: i32) -> RoutingStep {
        RoutingStep {
            step_id: id.to_string(),
            routing_id: "R1".to_string(),
            step_order: order,
            machine_type_id: "LATHE".to_string(),
            standard_minutes_per_unit: 1.5,
            default_setup_minutes: 20.0,
        }
    }

    #[test]
    fn test_routing_steps_come_back_in_order() {
        let conn = Arc::new(Mutex::new(crate::db::open_in_memory_with_schema().unwrap()));
        let repo = RoutingRepository::new(conn);
        repo.insert(&Routing {
            routing_id: "R1".to_string(),
            part_id: "P1".to_string(),
            steps: vec![step("B", 2), step("A", 1)],
        })
        .unwrap();

        let routing = repo.get_by_part_id("P1").unwrap().unwrap();
        let orders: Vec<_> = routing.steps.iter().map(|s| s.step_order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(repo.get_by_id("R1").unwrap().unwrap().part_id, "P1");
        assert_eq!(repo.get_step("B").unwrap().unwrap().step_order, 2);
        assert!(repo.get_by_part_id("P9").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_step_order_rolls_back_whole_routing() {
        let conn = Arc::new(Mutex::new(crate::db::open_in_memory_with_schema().unwrap()));
        let repo = RoutingRepository::new(conn);
        let result = repo.insert(&Routing {
            routing_id: "R1".to_string(),
            part_id: "P1".to_string(),
            steps: vec![step("A", 1), step("B", 1)],
        });

        assert!(result.is_err());
        assert!(repo.get_by_id("R1").unwrap().is_none());
    }
}
