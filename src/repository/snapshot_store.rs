// ==========================================
// 砂箱使用与维修跟踪系统 - SQLite 快照存储适配器
// ==========================================
// 职责: 实现 Engine 层 SnapshotStore trait
// 红线: save 为单事务: molds 全量更新 + AUTO 维修周期整体替换，
//       要么全部提交要么全部不提交，失败时上一份快照保持为系统记录
// ==========================================

use crate::domain::mold::Mold;
use crate::domain::repair::RepairRecord;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::stores::{FleetSnapshot, SnapshotStore};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::mold_repo::{idle_columns, map_mold_row};
use crate::repository::repair_repo::RepairHistoryRepository;
use rusqlite::{params, Connection, Result as SqliteResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ==========================================
// SqliteSnapshotStore - SQLite 快照存储
// ==========================================
pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    /// 创建新的 SqliteSnapshotStore 实例
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)
            .map_err(RepositoryError::from)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建存储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

// ==========================================
// SnapshotStore 适配实现
// ==========================================
impl SnapshotStore for SqliteSnapshotStore {
    /// 加载当前快照
    fn load(&self) -> EngineResult<BTreeMap<i32, Mold>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT
                    mold_id, current_count, total_count, repair_count,
                    last_use_date, last_repair_date,
                    in_repair, idle_flag, idle_days
                FROM molds
                ORDER BY mold_id ASC
                "#,
            )
            .map_err(RepositoryError::from)?;

        let molds = stmt
            .query_map([], map_mold_row)
            .map_err(RepositoryError::from)?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(RepositoryError::from)?;

        Ok(molds.into_iter().map(|m| (m.mold_id, m)).collect())
    }

    /// 加载全部人工维修记录
    fn load_manual_repairs(&self) -> EngineResult<Vec<RepairRecord>> {
        let repo = RepairHistoryRepository::from_connection(self.conn.clone());
        Ok(repo.load_manual()?)
    }

    /// 原子化写入新快照
    ///
    /// 单事务三步:
    /// 1. molds 逐箱 INSERT OR REPLACE（不存在的箱号一并建行）
    /// 2. 删除全部 AUTO 维修行
    /// 3. 插入本次回放派生的 AUTO 维修行
    /// 任一步失败整体回滚，映射为 SnapshotWriteFailed。
    fn save(&self, snapshot: &FleetSnapshot) -> EngineResult<()> {
        let conn = self
            .get_conn()
            .map_err(|e| EngineError::SnapshotWriteFailed(e.to_string()))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| EngineError::SnapshotWriteFailed(e.to_string()))?;

        let write = || -> rusqlite::Result<()> {
            for mold in snapshot.molds.values() {
                let (idle_flagged, idle_days) = idle_columns(mold);
                tx.execute(
                    r#"
                    INSERT OR REPLACE INTO molds (
                        mold_id, current_count, total_count, repair_count,
                        last_use_date, last_repair_date,
                        in_repair, idle_flag, idle_days
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
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
            }

            // AUTO 行整体替换: 派生数据确定性重建，重跑不产生重复记录
            tx.execute("DELETE FROM repair_history WHERE origin = 'AUTO'", [])?;
            for record in &snapshot.auto_repairs {
                tx.execute(
                    r#"
                    INSERT INTO repair_history (
                        mold_id, start_date, end_date, uses_before_repair, origin
                    ) VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        record.mold_id,
                        record.start_date.to_string(),
                        record.end_date.map(|d| d.to_string()),
                        record.uses_before_repair,
                        record.origin.to_db_str(),
                    ],
                )?;
            }
            Ok(())
        };

        write().map_err(|e| EngineError::SnapshotWriteFailed(e.to_string()))?;

        tx.commit()
            .map_err(|e| EngineError::SnapshotWriteFailed(e.to_string()))?;
        Ok(())
    }
}
