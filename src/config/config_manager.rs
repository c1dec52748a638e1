// ==========================================
// 砂箱使用与维修跟踪系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::db::configure_sqlite_connection;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    /// 箱组规模（箱号 1..=fleet_size）
    pub const FLEET_SIZE: &str = "fleet_size";
    /// 磨损阈值（达到即触发维修）
    pub const WEAR_THRESHOLD: &str = "wear_threshold";
    /// 闲置窗口（允许的最大未使用天数）
    pub const IDLE_DAYS_THRESHOLD: &str = "idle_days_threshold";
}

// ==========================================
// TrackerConfig - 核心配置
// ==========================================
/// 核心接受的全部配置项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub fleet_size: i32,
    pub wear_threshold: i64,
    pub idle_days_threshold: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            fleet_size: 11,
            wear_threshold: 100,
            idle_days_threshold: 4,
        }
    }
}

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
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = crate::db::open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 写入配置值（scope_id='global'，存在则覆盖）
    pub fn set_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 加载核心配置（缺省项使用默认值）
    ///
    /// # 默认值
    /// - fleet_size: 11
    /// - wear_threshold: 100
    /// - idle_days_threshold: 4
    pub fn load_tracker_config(&self) -> Result<TrackerConfig, Box<dyn Error>> {
        let defaults = TrackerConfig::default();

        let fleet_size: i32 = self
            .get_config_or_default(config_keys::FLEET_SIZE, &defaults.fleet_size.to_string())?
            .parse()
            .map_err(|e| format!("fleet_size 配置值无效: {}", e))?;

        let wear_threshold: i64 = self
            .get_config_or_default(
                config_keys::WEAR_THRESHOLD,
                &defaults.wear_threshold.to_string(),
            )?
            .parse()
            .map_err(|e| format!("wear_threshold 配置值无效: {}", e))?;

        let idle_days_threshold: i64 = self
            .get_config_or_default(
                config_keys::IDLE_DAYS_THRESHOLD,
                &defaults.idle_days_threshold.to_string(),
            )?
            .parse()
            .map_err(|e| format!("idle_days_threshold 配置值无效: {}", e))?;

        Ok(TrackerConfig {
            fleet_size,
            wear_threshold,
            idle_days_threshold,
        })
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 记录一次对账重算使用的配置，便于事后排查
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }
}
