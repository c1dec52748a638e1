// ==========================================
// 砂箱使用与维修跟踪系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod error;
pub mod mold_repo;
pub mod repair_repo;
pub mod snapshot_store;
pub mod usage_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use mold_repo::MoldRepository;
pub use repair_repo::RepairHistoryRepository;
pub use snapshot_store::SqliteSnapshotStore;
pub use usage_repo::UsageRecordRepository;
