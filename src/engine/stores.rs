// ==========================================
// 砂箱使用与维修跟踪系统 - 引擎层存储接口
// ==========================================
// 职责: 定义事件日志源与快照存储 trait，实现依赖倒置
// 说明: Engine 层定义 trait，Repository 层实现 SQLite 适配器
// 优势: 核心不依赖具体持久化机制，仅依赖接口
// ==========================================

use crate::domain::mold::Mold;
use crate::domain::repair::RepairRecord;
use crate::domain::usage::UsageEvent;
use crate::engine::error::{EngineError, EngineResult};
use std::collections::BTreeMap;
use std::sync::Mutex;

// ==========================================
// FleetSnapshot - 一次对账重算的持久化输出
// ==========================================
/// 箱组快照
///
/// molds 为每箱一条的计数记录；auto_repairs 为本次回放派生的全部
/// AUTO 维修周期（持久化时整体替换旧的 AUTO 行，保证重跑不产生重复记录）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSnapshot {
    pub molds: BTreeMap<i32, Mold>,
    pub auto_repairs: Vec<RepairRecord>,
}

// ==========================================
// 事件日志源 Trait
// ==========================================
/// 使用事件日志源
///
/// Engine 层定义，外部协作方实现。
/// 日志源不保证顺序稳定，核心统一重排；
/// 日期无法解析的记录必须以 InvalidEventDate 拒绝，不得静默跳过。
pub trait EventLogSource {
    /// 加载全部使用事件
    fn load_events(&self) -> EngineResult<Vec<UsageEvent>>;
}

// ==========================================
// 快照存储 Trait
// ==========================================
/// 箱组快照存储
///
/// # 约束
/// - `save` 必须是事务性的: 要么整个箱组更新全部提交，要么全部不提交，
///   失败时上一份快照保持为系统记录 (SnapshotWriteFailed)
pub trait SnapshotStore {
    /// 加载当前快照（每箱一条记录）
    fn load(&self) -> EngineResult<BTreeMap<i32, Mold>>;

    /// 加载全部人工维修记录（含 open 记录）
    fn load_manual_repairs(&self) -> EngineResult<Vec<RepairRecord>>;

    /// 原子化写入新快照
    fn save(&self, snapshot: &FleetSnapshot) -> EngineResult<()>;
}

// ==========================================
// 内存实现（测试与嵌入方自备存储时使用）
// ==========================================

/// 内存事件日志源
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Vec<UsageEvent>,
}

impl MemoryEventLog {
    pub fn new(events: Vec<UsageEvent>) -> Self {
        Self { events }
    }
}

impl EventLogSource for MemoryEventLog {
    fn load_events(&self) -> EngineResult<Vec<UsageEvent>> {
        Ok(self.events.clone())
    }
}

/// 内存快照存储
///
/// 人工维修记录在构造时注入；save 覆盖内部快照。
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<BTreeMap<i32, Mold>>,
    manual_repairs: Vec<RepairRecord>,
    /// 置为 true 可模拟提交失败（用于验证 SnapshotWriteFailed 语义）
    pub fail_on_save: bool,
}

impl MemorySnapshotStore {
    pub fn new(molds: BTreeMap<i32, Mold>, manual_repairs: Vec<RepairRecord>) -> Self {
        Self {
            snapshot: Mutex::new(molds),
            manual_repairs,
            fail_on_save: false,
        }
    }

    /// 读取当前内存快照的副本
    pub fn current(&self) -> BTreeMap<i32, Mold> {
        // 锁中毒时恢复内部数据继续使用
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> EngineResult<BTreeMap<i32, Mold>> {
        Ok(self.current())
    }

    fn load_manual_repairs(&self) -> EngineResult<Vec<RepairRecord>> {
        Ok(self.manual_repairs.clone())
    }

    fn save(&self, snapshot: &FleetSnapshot) -> EngineResult<()> {
        if self.fail_on_save {
            return Err(EngineError::SnapshotWriteFailed(
                "内存存储模拟提交失败".to_string(),
            ));
        }
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = snapshot.molds.clone();
        Ok(())
    }
}
