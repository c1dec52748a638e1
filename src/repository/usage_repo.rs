// ==========================================
// 砂箱使用与维修跟踪系统 - 使用事件仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: 同时充当 Engine 层 EventLogSource 的 SQLite 适配器
// ==========================================

use crate::domain::usage::UsageEvent;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::stores::EventLogSource;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::sync::{Arc, Mutex};

// ==========================================
// UsageRecordRepository - 使用事件仓储
// ==========================================
/// 使用事件仓储
/// 职责: 管理 usage_records 表的写入与读取
/// 红线: 事件只追加、只读回放，核心从不修改
pub struct UsageRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl UsageRecordRepository {
    /// 创建新的 UsageRecordRepository 实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)
            .map_err(RepositoryError::from)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量插入使用事件
    ///
    /// # 返回
    /// - Ok(usize): 成功插入的记录数
    /// - Err: 数据库错误
    pub fn batch_insert(&self, events: &[UsageEvent]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        for event in events {
            tx.execute(
                r#"
                INSERT INTO usage_records (mold_id, use_date, slot)
                VALUES (?1, ?2, ?3)
                "#,
                params![event.mold_id, event.date.to_string(), event.slot],
            )?;
            count += 1;
        }

        tx.commit()?;
        Ok(count)
    }

    /// 统计日期区间内的使用次数（闭区间）
    pub fn count_uses_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM usage_records WHERE use_date >= ?1 AND use_date <= ?2",
            params![start.to_string(), end.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 读取全部原始行（按插入顺序）
    ///
    /// 日期保持 TEXT 原样返回，解析与校验在 EventLogSource 适配层做。
    fn load_raw_rows(&self) -> RepositoryResult<Vec<(i32, String, String)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT mold_id, use_date, slot
            FROM usage_records
            ORDER BY record_id ASC
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(rows)
    }
}

// ==========================================
// EventLogSource 适配实现
// ==========================================
impl EventLogSource for UsageRecordRepository {
    /// 加载全部使用事件
    ///
    /// 日期严格解析: 无法解析的行返回 InvalidEventDate 整体拒绝，
    /// 绝不跳过（静默漏计磨损比报错更危险）。
    fn load_events(&self) -> EngineResult<Vec<UsageEvent>> {
        let rows = self.load_raw_rows()?;

        let mut events = Vec::with_capacity(rows.len());
        for (mold_id, raw_date, slot) in rows {
            let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|_| {
                EngineError::InvalidEventDate {
                    mold_id,
                    raw: raw_date.clone(),
                }
            })?;
            events.push(UsageEvent::new(mold_id, date, slot));
        }

        Ok(events)
    }
}
