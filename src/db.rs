// ==========================================
// 工序排产引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout,减少并发写入时的偶发 busy 错误
// - 提供建表脚本,测试与工具共用
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout(毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 建表脚本
///
/// 说明:
/// - stage_setup_link 是换型工序与主工序之间唯一的关联关系,两列分别唯一,
///   双向查找都落在这一张表上
/// - setup_time 以 (machine_id, from_part_id, to_part_id) 为主键
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS machine (
    machine_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    machine_type_id TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_machine_type ON machine(machine_type_id);

CREATE TABLE IF NOT EXISTS routing (
    routing_id TEXT PRIMARY KEY,
    part_id TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS routing_step (
    step_id TEXT PRIMARY KEY,
    routing_id TEXT NOT NULL REFERENCES routing(routing_id) ON DELETE CASCADE,
    step_order INTEGER NOT NULL,
    machine_type_id TEXT NOT NULL,
    standard_minutes_per_unit REAL NOT NULL,
    default_setup_minutes REAL NOT NULL DEFAULT 0,
    UNIQUE (routing_id, step_order)
);

CREATE TABLE IF NOT EXISTS lot (
    lot_id TEXT PRIMARY KEY,
    part_id TEXT NOT NULL,
    routing_id TEXT NOT NULL REFERENCES routing(routing_id),
    quantity INTEGER NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS sub_lot (
    sub_lot_id TEXT PRIMARY KEY,
    lot_id TEXT NOT NULL REFERENCES lot(lot_id) ON DELETE CASCADE,
    seq_no INTEGER NOT NULL,
    quantity INTEGER NOT NULL,
    status TEXT NOT NULL,
    completed_at TEXT,
    UNIQUE (lot_id, seq_no)
);

CREATE TABLE IF NOT EXISTS stage_execution (
    stage_id TEXT PRIMARY KEY,
    sub_lot_id TEXT NOT NULL REFERENCES sub_lot(sub_lot_id) ON DELETE CASCADE,
    routing_step_id TEXT NOT NULL REFERENCES routing_step(step_id),
    machine_id TEXT REFERENCES machine(machine_id),
    status TEXT NOT NULL,
    is_setup INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    queue_position INTEGER,
    planned_minutes REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    status_changed_at TEXT NOT NULL,
    started_at TEXT,
    paused_at TEXT,
    resumed_at TEXT,
    ended_at TEXT,
    paused_minutes REAL NOT NULL DEFAULT 0,
    operator TEXT,
    device TEXT,
    reason TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_stage_machine_status ON stage_execution(machine_id, status);
CREATE INDEX IF NOT EXISTS idx_stage_sub_lot ON stage_execution(sub_lot_id);
CREATE INDEX IF NOT EXISTS idx_stage_status ON stage_execution(status);

CREATE TABLE IF NOT EXISTS stage_setup_link (
    setup_stage_id TEXT PRIMARY KEY REFERENCES stage_execution(stage_id) ON DELETE CASCADE,
    main_stage_id TEXT NOT NULL UNIQUE REFERENCES stage_execution(stage_id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS setup_time (
    machine_id TEXT NOT NULL REFERENCES machine(machine_id) ON DELETE CASCADE,
    from_part_id TEXT NOT NULL,
    to_part_id TEXT NOT NULL,
    duration_minutes REAL NOT NULL,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (machine_id, from_part_id, to_part_id)
);

CREATE TABLE IF NOT EXISTS action_log (
    action_id TEXT PRIMARY KEY,
    action_type TEXT NOT NULL,
    action_ts TEXT NOT NULL,
    actor TEXT NOT NULL,
    stage_id TEXT,
    machine_id TEXT,
    sub_lot_id TEXT,
    lot_id TEXT,
    payload_json TEXT,
    detail TEXT
);
CREATE INDEX IF NOT EXISTS idx_action_log_stage ON action_log(stage_id);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库并建表 (测试/演示用)
pub fn open_in_memory_with_schema() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 建表 (幂等) 并登记 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version(若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = open_in_memory_with_schema().unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_version_absent_on_empty_db() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
