// ==========================================
// 砂箱使用与维修跟踪系统 - 维修历史仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 约束: open 记录（end_date IS NULL）只可能是 MANUAL 来源
// ==========================================

use crate::domain::mold::Mold;
use crate::domain::repair::RepairRecord;
use crate::domain::types::RepairOrigin;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::mold_repo::idle_columns;
use chrono::NaiveDate;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::sync::{Arc, Mutex};

/// repair_history 表的统一查询列
const REPAIR_COLUMNS: &str = r#"
    repair_id, mold_id, start_date, end_date, uses_before_repair, origin
"#;

// ==========================================
// RepairHistoryRepository - 维修历史仓储
// ==========================================
/// 维修历史仓储
/// 职责: 管理 repair_history 表，以及人工转换的事务性落盘
pub struct RepairHistoryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RepairHistoryRepository {
    /// 创建新的 RepairHistoryRepository 实例
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

    /// 查询某箱当前 open 的人工维修记录
    ///
    /// # 返回
    /// - Ok(Some(RepairRecord)): 存在进行中的维修
    /// - Ok(None): 无进行中的维修
    pub fn find_open(&self, mold_id: i32) -> RepositoryResult<Option<RepairRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {REPAIR_COLUMNS}
            FROM repair_history
            WHERE mold_id = ?1 AND end_date IS NULL
            ORDER BY start_date DESC
            LIMIT 1
            "#
        ))?;

        let result = stmt.query_row(params![mold_id], map_repair_row);

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询某箱维修历史（开始日期降序）
    ///
    /// 无显式结束日期的记录，结束日期按维修开始后的第一次使用日期推断
    /// （仅用于展示，不改写存储行）。
    pub fn find_by_mold(&self, mold_id: i32) -> RepositoryResult<Vec<RepairRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT
                repair_id, mold_id, start_date,
                COALESCE(
                    end_date,
                    (SELECT MIN(use_date) FROM usage_records
                     WHERE usage_records.mold_id = repair_history.mold_id
                       AND usage_records.use_date > repair_history.start_date)
                ) AS end_date,
                uses_before_repair, origin
            FROM repair_history
            WHERE mold_id = ?1
            ORDER BY start_date DESC, repair_id DESC
            "#,
        )?;

        let records = stmt
            .query_map(params![mold_id], map_repair_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(records)
    }

    /// 加载全部人工维修记录（开始日期升序）
    pub fn load_manual(&self) -> RepositoryResult<Vec<RepairRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {REPAIR_COLUMNS}
            FROM repair_history
            WHERE origin = 'MANUAL'
            ORDER BY start_date ASC, repair_id ASC
            "#
        ))?;

        let records = stmt
            .query_map([], map_repair_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(records)
    }

    /// 统计日期区间内开始的维修次数（闭区间，AUTO + MANUAL）
    pub fn count_repairs_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM repair_history WHERE start_date >= ?1 AND start_date <= ?2",
            params![start.to_string(), end.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 落盘送修转换: 插入 open 记录 + 更新砂箱行，单事务
    ///
    /// 注意：Repository 不做业务判定，仅执行必要的表更新/插入。
    pub fn apply_send(&self, mold: &Mold, record: &RepairRecord) -> RepositoryResult<i64> {
        let (idle_flagged, idle_days) = idle_columns(mold);
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO repair_history (mold_id, start_date, end_date, uses_before_repair, origin)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.mold_id,
                record.start_date.to_string(),
                record.end_date.map(|d| d.to_string()),
                record.uses_before_repair,
                record.origin.to_db_str(),
            ],
        )?;
        let repair_id = tx.last_insert_rowid();

        update_mold_row(&tx, mold, idle_flagged, idle_days)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(repair_id)
    }

    /// 落盘返修转换: 闭合记录 + 更新砂箱行，单事务
    ///
    /// 注意：Repository 不做业务判定，仅执行必要的表更新。
    pub fn apply_return(
        &self,
        mold: &Mold,
        repair_id: i64,
        end_date: NaiveDate,
    ) -> RepositoryResult<()> {
        let (idle_flagged, idle_days) = idle_columns(mold);
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let closed = tx.execute(
            "UPDATE repair_history SET end_date = ?2 WHERE repair_id = ?1 AND end_date IS NULL",
            params![repair_id, end_date.to_string()],
        )?;
        if closed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "RepairRecord(open)".to_string(),
                id: repair_id.to_string(),
            });
        }

        update_mold_row(&tx, mold, idle_flagged, idle_days)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(())
    }
}

// ==========================================
// 辅助函数
// ==========================================

/// repair_history 表行 → RepairRecord
fn map_repair_row(row: &Row<'_>) -> SqliteResult<RepairRecord> {
    let start_raw: String = row.get(2)?;
    let start_date = NaiveDate::parse_from_str(&start_raw, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("start_date 日期解析失败: {start_raw} ({e})").into(),
        )
    })?;

    let end_date = match row.get::<_, Option<String>>(3)? {
        None => None,
        Some(raw) => Some(NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("end_date 日期解析失败: {raw} ({e})").into(),
            )
        })?),
    };

    Ok(RepairRecord {
        repair_id: row.get(0)?,
        mold_id: row.get(1)?,
        start_date,
        end_date,
        uses_before_repair: row.get(4)?,
        origin: RepairOrigin::from_db_str(&row.get::<_, String>(5)?),
    })
}

/// 事务内更新砂箱快照行（apply_send / apply_return 共用）
fn update_mold_row(
    tx: &rusqlite::Transaction<'_>,
    mold: &Mold,
    idle_flagged: bool,
    idle_days: Option<i64>,
) -> RepositoryResult<()> {
    let updated = tx.execute(
        r#"
        UPDATE molds
        SET current_count = ?2,
            total_count = ?3,
            repair_count = ?4,
            last_use_date = ?5,
            last_repair_date = ?6,
            in_repair = ?7,
            idle_flag = ?8,
            idle_days = ?9
        WHERE mold_id = ?1
        "#,
        params![
            mold.mold_id,
            mold.current_count,
            mold.total_count,
            mold.repair_count,
            mold.last_use_date.map(|d| d.to_string()),
            mold.last_repair_date.map(|d| d.to_string()),
            mold.in_repair,
            idle_flagged,
            idle_days,
        ],
    )?;

    if updated == 0 {
        return Err(RepositoryError::NotFound {
            entity: "Mold".to_string(),
            id: mold.mold_id.to_string(),
        });
    }
    Ok(())
}
