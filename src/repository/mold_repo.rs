// ==========================================
// 砂箱使用与维修跟踪系统 - 砂箱数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::mold::Mold;
use crate::domain::types::IdleFlag;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Result as SqliteResult, Row};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// molds 表的统一查询列
const MOLD_COLUMNS: &str = r#"
    mold_id, current_count, total_count, repair_count,
    last_use_date, last_repair_date,
    in_repair, idle_flag, idle_days
"#;

// ==========================================
// MoldRepository - 砂箱仓储
// ==========================================
/// 砂箱仓储
/// 职责: 管理 molds 表的 CRUD 操作
/// 红线: 不含业务逻辑，只负责数据访问
pub struct MoldRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MoldRepository {
    /// 创建新的 MoldRepository 实例
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

    /// 初始化箱组（建箱一次，已存在的行不动）
    ///
    /// # 参数
    /// - `fleet_size`: 箱组规模，建出箱号 1..=fleet_size
    ///
    /// # 返回
    /// 实际新建的行数
    pub fn seed_fleet(&self, fleet_size: i32) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut created = 0;
        for mold_id in 1..=fleet_size {
            created += tx.execute(
                "INSERT OR IGNORE INTO molds (mold_id) VALUES (?1)",
                params![mold_id],
            )?;
        }

        tx.commit()?;
        Ok(created)
    }

    /// 按箱号查询
    ///
    /// # 返回
    /// - Ok(Some(Mold)): 找到砂箱
    /// - Ok(None): 未找到
    /// - Err: 数据库错误
    pub fn find_by_id(&self, mold_id: i32) -> RepositoryResult<Option<Mold>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOLD_COLUMNS} FROM molds WHERE mold_id = ?1"
        ))?;

        let result = stmt.query_row(params![mold_id], map_mold_row);

        match result {
            Ok(mold) => Ok(Some(mold)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 加载全部砂箱（箱号升序）
    pub fn load_all(&self) -> RepositoryResult<BTreeMap<i32, Mold>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOLD_COLUMNS} FROM molds ORDER BY mold_id ASC"
        ))?;

        let molds = stmt
            .query_map([], map_mold_row)?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(molds.into_iter().map(|m| (m.mold_id, m)).collect())
    }

    /// 更新单箱快照行
    pub fn update(&self, mold: &Mold) -> RepositoryResult<()> {
        let (idle_flagged, idle_days) = idle_columns(mold);
        let conn = self.get_conn()?;
        let updated = conn.execute(
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
}

// ==========================================
// 行映射辅助函数
// ==========================================

/// molds 表行 → Mold
///
/// 日期列解析失败按字段值错误处理，不回退默认值（避免静默吞掉脏数据）。
pub(crate) fn map_mold_row(row: &Row<'_>) -> SqliteResult<Mold> {
    let last_use_date = parse_optional_date(row, 4, "last_use_date")?;
    let last_repair_date = parse_optional_date(row, 5, "last_repair_date")?;

    let idle_flagged: bool = row.get(7)?;
    let idle_days: Option<i64> = row.get(8)?;
    let idle_flag = if idle_flagged {
        Some(match idle_days {
            Some(days_idle) => IdleFlag::Stale { days_idle },
            None => IdleFlag::NeverUsed,
        })
    } else {
        None
    };

    Ok(Mold {
        mold_id: row.get(0)?,
        current_count: row.get(1)?,
        total_count: row.get(2)?,
        repair_count: row.get(3)?,
        last_use_date,
        last_repair_date,
        in_repair: row.get(6)?,
        idle_flag,
    })
}

/// 解析可空日期列（%Y-%m-%d）
fn parse_optional_date(
    row: &Row<'_>,
    idx: usize,
    column: &'static str,
) -> SqliteResult<Option<NaiveDate>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    format!("{column} 日期解析失败: {raw} ({e})").into(),
                )
            }),
    }
}

/// idle_flag 枚举 → (idle_flag, idle_days) 两列
pub(crate) fn idle_columns(mold: &Mold) -> (bool, Option<i64>) {
    match mold.idle_flag {
        None => (false, None),
        Some(IdleFlag::NeverUsed) => (true, None),
        Some(IdleFlag::Stale { days_idle }) => (true, Some(days_idle)),
    }
}
