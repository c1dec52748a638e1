// ==========================================
// 砂箱使用与维修跟踪系统 - 对账重算引擎
// ==========================================
// 职责: 顶层编排: 合并回放计数、生命周期状态、闲置标志，产出权威快照
// 输入: 事件日志源 + 快照存储 + 配置 + 当前日期
// 输出: 新快照（原子化写回），失败时上一份快照保持为系统记录
// 红线: 幂等: 日志与 now 不变时重跑输出逐字节一致，
//       不重复计数、不产生重复维修记录
// ==========================================
// 人工维修把单箱时间轴切成段: 送修日之前为一段，返修日之后为下一段；
// 维修窗口内的事件计入全寿命计数但不累计磨损（物理上箱不在线）。
// 每段用同一个使用计数引擎独立回放，全系统只有这一份回放算法。
// ==========================================

use crate::config::TrackerConfig;
use crate::domain::mold::Mold;
use crate::domain::repair::RepairRecord;
use crate::domain::usage::UsageEvent;
use crate::engine::accumulator::{UsageAccumulator, UsageTally};
use crate::engine::error::EngineResult;
use crate::engine::idle::IdleDetector;
use crate::engine::stores::{EventLogSource, FleetSnapshot, SnapshotStore};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, info};

// ==========================================
// ReconcileResult - 一次对账重算的结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    /// 已写回存储的快照（含派生 AUTO 维修周期）
    pub snapshot: FleetSnapshot,
    /// 本次回放的事件条数
    pub events_replayed: usize,
    /// 本次派生的 AUTO 维修触发总数
    pub auto_triggers: usize,
}

// ==========================================
// ReconcileEngine - 对账重算引擎
// ==========================================
/// 对账重算引擎
/// 职责: 全量重算 + 状态合并 + 原子化持久化
pub struct ReconcileEngine {
    config: TrackerConfig,
}

impl ReconcileEngine {
    /// 构造函数
    pub fn new(config: TrackerConfig) -> Self {
        Self { config }
    }

    /// 执行一次完整的对账重算
    ///
    /// # 参数
    /// - `event_source`: 使用事件日志源
    /// - `store`: 快照存储
    /// - `now`: 当前日期（日粒度，用于闲置判定）
    ///
    /// # 流程
    /// 1. 全量回放使用事件 → 每箱计数与触发
    /// 2. 按人工维修记录分段重放磨损计数
    /// 3. 合并 in_repair 连续性（open 记录或既有快照），维修中强制 current=0
    /// 4. 闲置检测
    /// 5. 一个事务写回（molds + AUTO 维修周期整体替换）
    pub fn reconcile(
        &self,
        event_source: &dyn EventLogSource,
        store: &dyn SnapshotStore,
        now: NaiveDate,
    ) -> EngineResult<ReconcileResult> {
        info!(
            "开始对账重算: fleet_size={}, wear_threshold={}, idle_days_threshold={}, now={}",
            self.config.fleet_size, self.config.wear_threshold, self.config.idle_days_threshold, now
        );

        let events = event_source.load_events()?;
        let accumulator = UsageAccumulator::new(self.config.fleet_size, self.config.wear_threshold);
        let full_tallies = accumulator.replay(&events)?;

        let manual_repairs = store.load_manual_repairs()?;
        let prior = store.load()?;

        // 人工维修记录分箱
        let mut manual_by_mold: BTreeMap<i32, Vec<RepairRecord>> = BTreeMap::new();
        for record in manual_repairs {
            manual_by_mold.entry(record.mold_id).or_default().push(record);
        }

        let idle_detector = IdleDetector::new(self.config.idle_days_threshold);
        let mut molds = BTreeMap::new();
        let mut auto_repairs = Vec::new();
        let mut auto_triggers = 0usize;

        for (mold_id, full_tally) in &full_tallies {
            let unit_manual = manual_by_mold.get(mold_id).map(Vec::as_slice).unwrap_or(&[]);
            let unit_events: Vec<UsageEvent> = events
                .iter()
                .filter(|e| e.mold_id == *mold_id)
                .cloned()
                .collect();

            // 磨损计数: 按人工维修分段重放
            let wear = self.wear_tally(&accumulator, *mold_id, &unit_events, unit_manual)?;

            // in_repair 连续性: open 人工记录，或既有快照中无记录支撑的维修状态
            let has_open_manual = unit_manual.iter().any(RepairRecord::is_open);
            let prior_in_repair = prior.get(mold_id).map(|m| m.in_repair).unwrap_or(false);
            let in_repair = has_open_manual || prior_in_repair;

            let last_auto_date = wear.triggers.last().map(|t| t.date);
            let last_manual_date = unit_manual.iter().map(|r| r.start_date).max();
            let last_repair_date = match (last_auto_date, last_manual_date) {
                (Some(a), Some(m)) => Some(a.max(m)),
                (a, m) => a.or(m),
            };

            let mut mold = Mold {
                mold_id: *mold_id,
                // 维修中强制归零: 标记维修期间引擎不重新累计磨损
                current_count: if in_repair { 0 } else { wear.current_count },
                total_count: full_tally.total_count,
                repair_count: wear.triggers.len() as i64 + unit_manual.len() as i64,
                last_use_date: full_tally.last_use_date,
                last_repair_date,
                in_repair,
                idle_flag: None,
            };

            idle_detector.apply(&mut mold, now);
            debug_assert!(mold.invariants_hold());

            auto_triggers += wear.triggers.len();
            for trigger in &wear.triggers {
                auto_repairs.push(RepairRecord::auto_cycle(
                    *mold_id,
                    trigger.date,
                    trigger.uses_at_trigger,
                ));
            }

            debug!(
                "箱 {}: total={}, current={}, repairs={}, status={}",
                mold.mold_id,
                mold.total_count,
                mold.current_count,
                mold.repair_count,
                mold.status_text()
            );
            molds.insert(*mold_id, mold);
        }

        let snapshot = FleetSnapshot {
            molds,
            auto_repairs,
        };

        // 原子化写回: 失败时上一份快照保持不变
        store.save(&snapshot)?;

        info!(
            "对账重算完成: 回放 {} 条事件, {} 次自动维修触发",
            events.len(),
            auto_triggers
        );

        Ok(ReconcileResult {
            snapshot,
            events_replayed: events.len(),
            auto_triggers,
        })
    }

    /// 按人工维修分段计算磨损计数
    ///
    /// # 规则
    /// - 维修窗口 (start, end] 内的事件不计磨损（open 记录视为窗口无限延伸）
    /// - 每个送修日是一个归零点，之后的事件从零起算
    /// - 每段独立调用使用计数引擎，阈值语义与全量回放一致
    fn wear_tally(
        &self,
        accumulator: &UsageAccumulator,
        mold_id: i32,
        unit_events: &[UsageEvent],
        unit_manual: &[RepairRecord],
    ) -> EngineResult<UsageTally> {
        if unit_manual.is_empty() {
            return accumulator.replay_unit(mold_id, unit_events);
        }

        // 剔除维修窗口内的事件
        let in_repair_window = |date: NaiveDate| {
            unit_manual.iter().any(|r| {
                date > r.start_date && r.end_date.map_or(true, |end| date <= end)
            })
        };
        let wear_events: Vec<UsageEvent> = unit_events
            .iter()
            .filter(|e| !in_repair_window(e.date))
            .cloned()
            .collect();

        // 归零点: 各送修日（升序去重）
        let mut reset_dates: Vec<NaiveDate> = unit_manual.iter().map(|r| r.start_date).collect();
        reset_dates.sort();
        reset_dates.dedup();

        // 分段重放并拼接
        let mut combined = UsageTally::default();
        let mut remaining: Vec<UsageEvent> = wear_events;
        for reset in &reset_dates {
            let (segment, rest): (Vec<UsageEvent>, Vec<UsageEvent>) =
                remaining.into_iter().partition(|e| e.date <= *reset);
            remaining = rest;

            let tally = accumulator.replay_unit(mold_id, &segment)?;
            combined.triggers.extend(tally.triggers);
        }
        // 最后一个归零点之后的尾段决定 current_count
        let tail = accumulator.replay_unit(mold_id, &remaining)?;
        combined.triggers.extend(tail.triggers);
        combined.current_count = tail.current_count;

        Ok(combined)
    }
}

// ==========================================
// 单元测试
// ==========================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::IdleFlag;
    use crate::engine::stores::{MemoryEventLog, MemorySnapshotStore};
    use crate::engine::error::EngineError;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ev(mold_id: i32, date: NaiveDate) -> UsageEvent {
        UsageEvent::new(mold_id, date, "A")
    }

    fn config(fleet_size: i32, wear_threshold: i64, idle_days_threshold: i64) -> TrackerConfig {
        TrackerConfig {
            fleet_size,
            wear_threshold,
            idle_days_threshold,
        }
    }

    fn empty_store() -> MemorySnapshotStore {
        MemorySnapshotStore::new(BTreeMap::new(), Vec::new())
    }

    #[test]
    fn test_threshold_five_full_cycle() {
        // 箱组 3、阈值 5、箱 1 连续 5 天使用
        let engine = ReconcileEngine::new(config(3, 5, 4));
        let log = MemoryEventLog::new((1..=5).map(|day| ev(1, d(2025, 1, day))).collect());
        let store = empty_store();

        let result = engine.reconcile(&log, &store, d(2025, 1, 5)).unwrap();
        let mold1 = &result.snapshot.molds[&1];

        assert_eq!(mold1.total_count, 5);
        assert_eq!(mold1.current_count, 0);
        assert_eq!(mold1.repair_count, 1);
        assert_eq!(mold1.last_repair_date, Some(d(2025, 1, 5)));
        assert!(!mold1.in_repair);

        // AUTO 维修周期当日闭合，记录触发时计数
        assert_eq!(result.snapshot.auto_repairs.len(), 1);
        let auto = &result.snapshot.auto_repairs[0];
        assert_eq!(auto.mold_id, 1);
        assert_eq!(auto.start_date, d(2025, 1, 5));
        assert_eq!(auto.end_date, Some(d(2025, 1, 5)));
        assert_eq!(auto.uses_before_repair, 5);
    }

    #[test]
    fn test_idempotent_on_unchanged_inputs() {
        let engine = ReconcileEngine::new(config(3, 5, 4));
        let log = MemoryEventLog::new(
            (1..=12).map(|day| ev((day % 3) + 1, d(2025, 1, day as u32))).collect(),
        );
        let store = empty_store();

        let first = engine.reconcile(&log, &store, d(2025, 1, 20)).unwrap();
        let second = engine.reconcile(&log, &store, d(2025, 1, 20)).unwrap();

        assert_eq!(first.snapshot, second.snapshot);
        assert_eq!(store.current(), first.snapshot.molds);
    }

    #[test]
    fn test_open_manual_repair_forces_zero_current() {
        // 送修后继续有事件: total 照常累计，current 强制为 0
        let engine = ReconcileEngine::new(config(2, 100, 4));
        let log = MemoryEventLog::new(vec![
            ev(1, d(2025, 1, 1)),
            ev(1, d(2025, 1, 2)),
            ev(1, d(2025, 1, 10)), // 维修期间仍被记入日志
        ]);
        let store = MemorySnapshotStore::new(
            BTreeMap::new(),
            vec![RepairRecord::manual_open(1, d(2025, 1, 5), 2)],
        );

        let result = engine.reconcile(&log, &store, d(2025, 1, 10)).unwrap();
        let mold1 = &result.snapshot.molds[&1];

        assert!(mold1.in_repair);
        assert_eq!(mold1.current_count, 0);
        assert_eq!(mold1.total_count, 3); // 全寿命计数包含维修期间事件
        assert_eq!(mold1.repair_count, 1); // 人工维修周期
        assert!(mold1.idle_flag.is_none()); // 维修中不判闲置
    }

    #[test]
    fn test_closed_manual_repair_resets_then_reaccumulates() {
        // 送修 1/5、返修 1/8: 1/6-1/8 的事件不计磨损，1/9 之后重新累计
        let engine = ReconcileEngine::new(config(1, 100, 40));
        let log = MemoryEventLog::new(vec![
            ev(1, d(2025, 1, 1)),
            ev(1, d(2025, 1, 4)),
            ev(1, d(2025, 1, 7)), // 维修窗口内
            ev(1, d(2025, 1, 9)),
            ev(1, d(2025, 1, 10)),
        ]);
        let mut record = RepairRecord::manual_open(1, d(2025, 1, 5), 2);
        record.close(d(2025, 1, 8));
        let store = MemorySnapshotStore::new(BTreeMap::new(), vec![record]);

        let result = engine.reconcile(&log, &store, d(2025, 1, 10)).unwrap();
        let mold1 = &result.snapshot.molds[&1];

        assert!(!mold1.in_repair);
        assert_eq!(mold1.total_count, 5);
        assert_eq!(mold1.current_count, 2); // 仅 1/9、1/10
        assert_eq!(mold1.last_repair_date, Some(d(2025, 1, 5)));
    }

    #[test]
    fn test_threshold_can_trigger_after_manual_reset() {
        // 返修后的尾段同样应用阈值语义
        let engine = ReconcileEngine::new(config(1, 3, 40));
        let mut events = vec![ev(1, d(2025, 1, 1))];
        events.extend((10..=13).map(|day| ev(1, d(2025, 1, day))));
        let log = MemoryEventLog::new(events);

        let mut record = RepairRecord::manual_open(1, d(2025, 1, 2), 1);
        record.close(d(2025, 1, 3));
        let store = MemorySnapshotStore::new(BTreeMap::new(), vec![record]);

        let result = engine.reconcile(&log, &store, d(2025, 1, 13)).unwrap();
        let mold1 = &result.snapshot.molds[&1];

        // 尾段 1/10-1/13: 第 3 次 (1/12) 触发，剩 1 次
        assert_eq!(result.snapshot.auto_repairs.len(), 1);
        assert_eq!(result.snapshot.auto_repairs[0].start_date, d(2025, 1, 12));
        assert_eq!(mold1.current_count, 1);
        assert_eq!(mold1.repair_count, 2); // 1 AUTO + 1 MANUAL
    }

    #[test]
    fn test_prior_in_repair_without_record_is_carried() {
        // 既有快照标记维修中但无 open 记录（历史引导数据）: 连续性保留
        let engine = ReconcileEngine::new(config(1, 100, 4));
        let log = MemoryEventLog::new(vec![ev(1, d(2025, 1, 1))]);
        let mut prior_mold = Mold::new(1);
        prior_mold.in_repair = true;
        let mut prior = BTreeMap::new();
        prior.insert(1, prior_mold);
        let store = MemorySnapshotStore::new(prior, Vec::new());

        let result = engine.reconcile(&log, &store, d(2025, 1, 10)).unwrap();
        assert!(result.snapshot.molds[&1].in_repair);
        assert_eq!(result.snapshot.molds[&1].current_count, 0);
    }

    #[test]
    fn test_idle_flag_set_and_mutually_exclusive() {
        let engine = ReconcileEngine::new(config(2, 100, 4));
        let log = MemoryEventLog::new(vec![ev(1, d(2025, 1, 1)), ev(2, d(2025, 1, 1))]);
        let store = MemorySnapshotStore::new(
            BTreeMap::new(),
            vec![RepairRecord::manual_open(2, d(2025, 1, 2), 1)],
        );

        let result = engine.reconcile(&log, &store, d(2025, 1, 10)).unwrap();

        // 箱 1: 闲置 9 天
        assert_eq!(
            result.snapshot.molds[&1].idle_flag,
            Some(IdleFlag::Stale { days_idle: 9 })
        );
        // 箱 2: 维修中，永不闲置
        for mold in result.snapshot.molds.values() {
            assert!(mold.invariants_hold());
        }
        assert!(result.snapshot.molds[&2].idle_flag.is_none());
    }

    #[test]
    fn test_save_failure_leaves_prior_snapshot() {
        let engine = ReconcileEngine::new(config(1, 5, 4));
        let log = MemoryEventLog::new(vec![ev(1, d(2025, 1, 1))]);
        let mut store = empty_store();
        store.fail_on_save = true;

        let err = engine.reconcile(&log, &store, d(2025, 1, 2)).unwrap_err();
        assert!(matches!(err, EngineError::SnapshotWriteFailed(_)));
        assert!(store.current().is_empty());
    }

    #[test]
    fn test_invalid_unit_id_propagates() {
        let engine = ReconcileEngine::new(config(2, 5, 4));
        let log = MemoryEventLog::new(vec![ev(9, d(2025, 1, 1))]);
        let store = empty_store();

        let err = engine.reconcile(&log, &store, d(2025, 1, 2)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidUnitId { mold_id: 9, .. }));
    }
}
