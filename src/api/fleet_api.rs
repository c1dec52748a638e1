// ==========================================
// 砂箱使用与维修跟踪系统 - 箱组业务接口
// ==========================================
// 职责: 面向操作员的业务入口（送修/返修/对账重算/状态查询）
// 红线: 人工转换与对账重算互斥: 单个箱组级咨询锁，
//       绝不按箱加锁（对账重算整体读写全部箱）
// ==========================================

use crate::config::{ConfigManager, TrackerConfig};
use crate::domain::mold::Mold;
use crate::domain::repair::RepairRecord;
use crate::domain::usage::UsageEvent;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::lifecycle::LifecycleEngine;
use crate::engine::reconcile::{ReconcileEngine, ReconcileResult};
use crate::repository::error::RepositoryError;
use crate::repository::{
    MoldRepository, RepairHistoryRepository, SqliteSnapshotStore, UsageRecordRepository,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

// ==========================================
// MonthlyStats - 月度统计
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthlyStats {
    pub total_uses: i64,    // 当月使用次数
    pub repairs_count: i64, // 当月开始的维修次数
}

// ==========================================
// FleetApi - 箱组业务接口
// ==========================================
pub struct FleetApi {
    config: TrackerConfig,
    mold_repo: MoldRepository,
    usage_repo: UsageRecordRepository,
    repair_repo: RepairHistoryRepository,
    snapshot_store: SqliteSnapshotStore,
    reconcile_engine: ReconcileEngine,
    lifecycle: LifecycleEngine,
    // 箱组级咨询锁: 人工转换与对账重算互斥
    fleet_lock: Mutex<()>,
}

impl FleetApi {
    /// 打开数据库并构建完整业务接口
    ///
    /// # 流程
    /// 1. 打开连接 + 统一 PRAGMA + 初始化 schema（幂等）
    /// 2. 加载配置（缺省项取默认值）
    /// 3. 建箱（箱号 1..=fleet_size，已有行不动）
    pub fn new(db_path: &str) -> EngineResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)
            .map_err(RepositoryError::from)?;
        crate::db::init_schema(&conn).map_err(RepositoryError::from)?;

        // schema 版本仅提示/告警，不做自动迁移
        if let Ok(Some(version)) = crate::db::read_schema_version(&conn) {
            if version != crate::db::CURRENT_SCHEMA_VERSION {
                tracing::warn!(
                    "数据库 schema 版本不匹配: 库为 v{}, 代码期望 v{}",
                    version,
                    crate::db::CURRENT_SCHEMA_VERSION
                );
            }
        }

        let conn = Arc::new(Mutex::new(conn));

        Self::from_connection(conn)
    }

    /// 从已有连接构建（调用方负责 schema 已初始化）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> EngineResult<Self> {
        let config_manager = ConfigManager::from_connection(conn.clone())
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;
        let config = config_manager
            .load_tracker_config()
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        let mold_repo = MoldRepository::from_connection(conn.clone());
        mold_repo.seed_fleet(config.fleet_size)?;

        info!(
            "箱组接口就绪: fleet_size={}, wear_threshold={}, idle_days_threshold={}",
            config.fleet_size, config.wear_threshold, config.idle_days_threshold
        );

        Ok(Self {
            config,
            mold_repo,
            usage_repo: UsageRecordRepository::from_connection(conn.clone()),
            repair_repo: RepairHistoryRepository::from_connection(conn.clone()),
            snapshot_store: SqliteSnapshotStore::from_connection(conn),
            reconcile_engine: ReconcileEngine::new(config),
            lifecycle: LifecycleEngine::new(),
            fleet_lock: Mutex::new(()),
        })
    }

    /// 当前生效的核心配置
    pub fn config(&self) -> TrackerConfig {
        self.config
    }

    /// 获取箱组级咨询锁（锁中毒时恢复继续）
    fn lock_fleet(&self) -> MutexGuard<'_, ()> {
        self.fleet_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 校验箱号是否在箱组范围内
    fn validate_mold_id(&self, mold_id: i32) -> EngineResult<()> {
        if mold_id < 1 || mold_id > self.config.fleet_size {
            return Err(EngineError::InvalidUnitId {
                mold_id,
                fleet_size: self.config.fleet_size,
            });
        }
        Ok(())
    }

    /// 加载单箱（箱组已建箱，缺行视为仓储错误）
    fn load_mold(&self, mold_id: i32) -> EngineResult<Mold> {
        self.validate_mold_id(mold_id)?;
        self.mold_repo
            .find_by_id(mold_id)?
            .ok_or_else(|| {
                EngineError::Repository(RepositoryError::NotFound {
                    entity: "Mold".to_string(),
                    id: mold_id.to_string(),
                })
            })
    }

    // ==========================================
    // 事件导入
    // ==========================================

    /// 追加使用事件（外部日志源导入）
    ///
    /// 箱号越界整体拒绝（InvalidUnitId），不做部分写入。
    pub fn append_usage_events(&self, events: &[UsageEvent]) -> EngineResult<usize> {
        for event in events {
            self.validate_mold_id(event.mold_id)?;
        }
        let count = self.usage_repo.batch_insert(events)?;
        info!("追加 {} 条使用事件", count);
        Ok(count)
    }

    // ==========================================
    // 人工维修转换
    // ==========================================

    /// 送修 (Ready → InRepair)
    ///
    /// # 返回
    /// 更新后的砂箱。已在维修中时为幂等无操作，原样返回。
    pub fn send_to_repair(&self, mold_id: i32, date: NaiveDate) -> EngineResult<Mold> {
        let _guard = self.lock_fleet();

        let mut mold = self.load_mold(mold_id)?;
        if let Some(record) = self.lifecycle.send_to_repair(&mut mold, date) {
            self.repair_repo.apply_send(&mold, &record)?;
        }
        Ok(mold)
    }

    /// 返修 (InRepair → Ready)
    ///
    /// # 错误
    /// - `NoActiveRepair`: 无 open 维修记录，拒绝且无副作用
    pub fn return_from_repair(&self, mold_id: i32, date: NaiveDate) -> EngineResult<Mold> {
        let _guard = self.lock_fleet();

        let mut mold = self.load_mold(mold_id)?;
        let open_record = self.repair_repo.find_open(mold_id)?;
        let closed = self
            .lifecycle
            .return_from_repair(&mut mold, open_record, date)?;

        let repair_id = closed.repair_id.ok_or_else(|| {
            EngineError::Repository(RepositoryError::InternalError(
                "open 维修记录缺少行号".to_string(),
            ))
        })?;
        self.repair_repo.apply_return(&mold, repair_id, date)?;
        Ok(mold)
    }

    // ==========================================
    // 对账重算
    // ==========================================

    /// 执行一次完整的对账重算并原子化写回快照
    pub fn reconcile(&self, now: NaiveDate) -> EngineResult<ReconcileResult> {
        let _guard = self.lock_fleet();

        self.reconcile_engine
            .reconcile(&self.usage_repo, &self.snapshot_store, now)
    }

    // ==========================================
    // 状态查询
    // ==========================================

    /// 全箱状态（箱号升序）
    pub fn fleet_status(&self) -> EngineResult<Vec<Mold>> {
        Ok(self.mold_repo.load_all()?.into_values().collect())
    }

    /// 单箱维修历史（开始日期降序，缺失结束日期按下次使用推断）
    pub fn repair_history(&self, mold_id: i32) -> EngineResult<Vec<RepairRecord>> {
        self.validate_mold_id(mold_id)?;
        Ok(self.repair_repo.find_by_mold(mold_id)?)
    }

    /// 月度统计: 当月使用次数 + 当月开始的维修次数
    pub fn monthly_stats(&self, year: i32, month: u32) -> EngineResult<MonthlyStats> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            EngineError::Repository(RepositoryError::FieldValueError {
                field: "month".to_string(),
                message: format!("非法年月: {year}-{month}"),
            })
        })?;
        // 下月首日前一天 = 当月末日
        let end = match month {
            12 => NaiveDate::from_ymd_opt(year + 1, 1, 1),
            _ => NaiveDate::from_ymd_opt(year, month + 1, 1),
        }
        .map(|d| d.pred_opt().unwrap_or(d))
        .unwrap_or(start);

        Ok(MonthlyStats {
            total_uses: self.usage_repo.count_uses_between(start, end)?,
            repairs_count: self.repair_repo.count_repairs_between(start, end)?,
        })
    }
}
