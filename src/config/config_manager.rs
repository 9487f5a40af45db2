// ==========================================
// 工序排产引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 红线: 配置缺失或格式错误时使用默认值,不阻断排产
// ==========================================

use crate::config::scheduler_config::SchedulerConfig;
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// 配置层错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置库锁获取失败: {0}")]
    LockError(String),

    #[error("配置库访问失败: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("配置序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| ConfigError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> ConfigResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值 (存在则覆盖)
    pub fn set_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析配置,缺失或格式错误时返回默认值
    fn parse_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Copy + std::fmt::Debug,
    {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %raw,
                    default = ?default,
                    "配置格式错误，使用默认值"
                );
                Ok(default)
            }
        }
    }

    /// 解析后再校验取值范围,越界同样告警并回退默认值
    fn parse_checked<T>(&self, key: &str, default: T, is_valid: fn(&T) -> bool) -> ConfigResult<T>
    where
        T: FromStr + Copy + std::fmt::Debug,
    {
        let value = self.parse_or_default(key, default)?;
        if is_valid(&value) {
            return Ok(value);
        }
        tracing::warn!(
            config_key = key,
            value = ?value,
            default = ?default,
            "配置值超出有效范围，使用默认值"
        );
        Ok(default)
    }

    /// 组装排产参数
    pub fn load_scheduler_config(&self) -> ConfigResult<SchedulerConfig> {
        let d = SchedulerConfig::default();
        let mut cfg = d.clone();

        let finite: fn(&f64) -> bool = |v| v.is_finite();
        cfg.weights.w_priority =
            self.parse_checked(config_keys::W_PRIORITY, d.weights.w_priority, finite)?;
        cfg.weights.bonus_same_part =
            self.parse_checked(config_keys::BONUS_SAME_PART, d.weights.bonus_same_part, finite)?;
        cfg.weights.w_setup = self.parse_checked(config_keys::W_SETUP, d.weights.w_setup, finite)?;
        cfg.weights.w_queue = self.parse_checked(config_keys::W_QUEUE, d.weights.w_queue, finite)?;
        cfg.weights.w_release =
            self.parse_checked(config_keys::W_RELEASE, d.weights.w_release, finite)?;

        cfg.min_remaining_minutes = self.parse_checked(
            config_keys::MIN_REMAINING_MINUTES,
            d.min_remaining_minutes,
            |v| v.is_finite() && *v > 0.0,
        )?;
        cfg.max_priority = self.parse_or_default(config_keys::MAX_PRIORITY, d.max_priority)?;
        cfg.reprioritize_step =
            self.parse_checked(config_keys::REPRIORITIZE_STEP, d.reprioritize_step, |v| *v > 0)?;
        cfg.reassign_min_gain = self.parse_checked(
            config_keys::REASSIGN_MIN_GAIN,
            d.reassign_min_gain,
            |v| v.is_finite() && *v >= 0.0,
        )?;
        cfg.auto_schedule_on_create =
            self.parse_or_default(config_keys::AUTO_SCHEDULE_ON_CREATE, d.auto_schedule_on_create)?;

        tracing::debug!(config = ?cfg, "排产参数已加载");
        Ok(cfg)
    }

    /// 获取所有配置的快照（JSON格式,键有序）
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 机台评分权重
    pub const W_PRIORITY: &str = "scoring.w_priority";
    pub const BONUS_SAME_PART: &str = "scoring.bonus_same_part";
    pub const W_SETUP: &str = "scoring.w_setup";
    pub const W_QUEUE: &str = "scoring.w_queue";
    pub const W_RELEASE: &str = "scoring.w_release";

    // 释放时间估算
    pub const MIN_REMAINING_MINUTES: &str = "min_remaining_minutes";

    // 优先级
    pub const MAX_PRIORITY: &str = "max_priority";
    pub const REPRIORITIZE_STEP: &str = "reprioritize_step";

    // 队列优化
    pub const REASSIGN_MIN_GAIN: &str = "reassign_min_gain";

    // 批次创建
    pub const AUTO_SCHEDULE_ON_CREATE: &str = "auto_schedule_on_create";
}
