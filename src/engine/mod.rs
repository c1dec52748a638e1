// ==========================================
// 砂箱使用与维修跟踪系统 - 引擎层
// ==========================================
// 职责: 实现业务规则引擎,不拼 SQL
// 红线: Engine 不拼 SQL, 存储一律通过 trait 访问
// ==========================================

pub mod accumulator;
pub mod error;
pub mod idle;
pub mod lifecycle;
pub mod reconcile;
pub mod stores;

// 重导出核心引擎
pub use accumulator::{RepairTrigger, UsageAccumulator, UsageTally};
pub use error::{EngineError, EngineResult};
pub use idle::IdleDetector;
pub use lifecycle::LifecycleEngine;
pub use reconcile::{ReconcileEngine, ReconcileResult};
pub use stores::{
    EventLogSource, FleetSnapshot, MemoryEventLog, MemorySnapshotStore, SnapshotStore,
};
