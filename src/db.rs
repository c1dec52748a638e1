// ==========================================
// 砂箱使用与维修跟踪系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为，避免“部分模块外键开启/部分不开启”
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 集中建表语句，保证测试与生产使用同一套 schema
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
///
/// 说明：
/// - 版本号用于**提示/告警**（不做自动迁移），避免静默在旧库上运行导致隐性错误。
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 默认数据库文件名
pub const DEFAULT_DB_FILE: &str = "mold_usage.db";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
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

/// 获取默认数据库路径
///
/// 优先使用系统数据目录（例如 Linux 下 ~/.local/share/mold-usage-tracker/），
/// 无法确定时回退到当前目录。
pub fn get_default_db_path() -> String {
    let dir = dirs::data_dir()
        .map(|d| d.join("mold-usage-tracker"))
        .unwrap_or_else(|| PathBuf::from("."));

    if !dir.exists() {
        let _ = std::fs::create_dir_all(&dir);
    }

    dir.join(DEFAULT_DB_FILE).to_string_lossy().to_string()
}

/// 读取 schema_version（若表不存在则返回 None）
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

/// 初始化数据库 schema（幂等）
///
/// 表结构:
/// - molds          砂箱计数快照（每箱一行）
/// - usage_records  使用事件日志（外部导入，只读输入）
/// - repair_history 维修历史（AUTO 为回放派生、MANUAL 为人工操作）
/// - config_kv      配置项 (key-value + scope)
/// - schema_version 库结构版本
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
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

        CREATE TABLE IF NOT EXISTS molds (
            mold_id INTEGER PRIMARY KEY,
            current_count INTEGER NOT NULL DEFAULT 0,
            total_count INTEGER NOT NULL DEFAULT 0,
            repair_count INTEGER NOT NULL DEFAULT 0,
            last_use_date TEXT,
            last_repair_date TEXT,
            in_repair INTEGER NOT NULL DEFAULT 0,
            idle_flag INTEGER NOT NULL DEFAULT 0,
            idle_days INTEGER
        );

        CREATE TABLE IF NOT EXISTS usage_records (
            record_id INTEGER PRIMARY KEY AUTOINCREMENT,
            mold_id INTEGER NOT NULL,
            use_date TEXT NOT NULL,
            slot TEXT NOT NULL,
            FOREIGN KEY (mold_id) REFERENCES molds(mold_id)
        );

        CREATE INDEX IF NOT EXISTS idx_usage_records_mold_date
            ON usage_records(mold_id, use_date);

        CREATE TABLE IF NOT EXISTS repair_history (
            repair_id INTEGER PRIMARY KEY AUTOINCREMENT,
            mold_id INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            uses_before_repair INTEGER NOT NULL DEFAULT 0,
            origin TEXT NOT NULL DEFAULT 'MANUAL',
            FOREIGN KEY (mold_id) REFERENCES molds(mold_id)
        );

        CREATE INDEX IF NOT EXISTS idx_repair_history_mold
            ON repair_history(mold_id, start_date);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}
