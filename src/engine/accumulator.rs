// ==========================================
// 砂箱使用与维修跟踪系统 - 使用计数引擎
// ==========================================
// 职责: 按时间顺序回放使用事件，计算每箱计数与维修触发
// 输入: 全量使用事件 + 磨损阈值
// 输出: 每箱 UsageTally (全寿命计数/当前计数/触发列表/最近使用日期)
// 红线: 回放必须确定性: 同一份日志重跑输出逐字节一致
// ==========================================
// 阈值判定按“日”为粒度: 处理完同一日期的全部事件后再检查越界，
// 同日溢出仍在当日触发并归零（维修按日粒度原子化建模）。
// ==========================================

use crate::domain::usage::{sort_events_chronologically, UsageEvent};
use crate::engine::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use std::collections::BTreeMap;

// ==========================================
// RepairTrigger - 一次阈值触发
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairTrigger {
    pub date: NaiveDate,      // 触发日期
    pub uses_at_trigger: i64, // 触发时的累计使用次数 (>= 阈值，同日溢出时更大)
}

// ==========================================
// UsageTally - 单箱回放结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsageTally {
    pub total_count: i64,                 // 全寿命使用次数
    pub current_count: i64,               // 最后一次归零后的使用次数
    pub last_use_date: Option<NaiveDate>, // 最近一次使用日期
    pub triggers: Vec<RepairTrigger>,     // 按日期升序的触发列表
}

// ==========================================
// UsageAccumulator - 使用计数引擎
// ==========================================
/// 使用计数引擎
/// 职责: 事件分箱、按日期稳定排序、逐日累计并检测阈值越界
/// 红线: 箱号越界必须报错拒绝，从不静默丢弃、从不隐式建箱
pub struct UsageAccumulator {
    fleet_size: i32,
    wear_threshold: i64,
}

impl UsageAccumulator {
    /// 构造函数
    ///
    /// # 参数
    /// - `fleet_size`: 箱组规模（合法箱号为 1..=fleet_size）
    /// - `wear_threshold`: 磨损阈值（达到即触发维修）
    pub fn new(fleet_size: i32, wear_threshold: i64) -> Self {
        Self {
            fleet_size,
            wear_threshold,
        }
    }

    /// 校验箱号是否在箱组范围内
    pub fn validate_mold_id(&self, mold_id: i32) -> EngineResult<()> {
        if mold_id < 1 || mold_id > self.fleet_size {
            return Err(EngineError::InvalidUnitId {
                mold_id,
                fleet_size: self.fleet_size,
            });
        }
        Ok(())
    }

    /// 全量回放
    ///
    /// # 参数
    /// - `events`: 全部使用事件（顺序任意，内部统一重排）
    ///
    /// # 返回
    /// 每箱一条 UsageTally，无事件的箱返回零计数（空日志 → 全部为零）
    ///
    /// # 错误
    /// - `InvalidUnitId`: 任一事件箱号越界，整体拒绝
    pub fn replay(&self, events: &[UsageEvent]) -> EngineResult<BTreeMap<i32, UsageTally>> {
        // 1. 先整体校验箱号，坏事件导致全量拒绝而不是部分计数
        for event in events {
            self.validate_mold_id(event.mold_id)?;
        }

        // 2. 分箱（保持原始日志顺序，稳定排序的前提）
        let mut partitioned: BTreeMap<i32, Vec<UsageEvent>> = BTreeMap::new();
        for mold_id in 1..=self.fleet_size {
            partitioned.insert(mold_id, Vec::new());
        }
        for event in events {
            if let Some(bucket) = partitioned.get_mut(&event.mold_id) {
                bucket.push(event.clone());
            }
        }

        // 3. 逐箱回放
        let mut tallies = BTreeMap::new();
        for (mold_id, mut bucket) in partitioned {
            sort_events_chronologically(&mut bucket);
            tallies.insert(mold_id, self.replay_sorted(&bucket));
        }

        Ok(tallies)
    }

    /// 回放单箱事件（调用方负责箱号校验）
    ///
    /// 用于对账引擎的分段重放: 人工维修把时间轴切成段，
    /// 每段独立从零起算，算法与全量回放完全一致。
    pub fn replay_unit(&self, mold_id: i32, events: &[UsageEvent]) -> EngineResult<UsageTally> {
        self.validate_mold_id(mold_id)?;
        let mut sorted: Vec<UsageEvent> = events.to_vec();
        sort_events_chronologically(&mut sorted);
        Ok(self.replay_sorted(&sorted))
    }

    /// 核心累计循环（事件已按日期升序稳定排序）
    fn replay_sorted(&self, events: &[UsageEvent]) -> UsageTally {
        let mut tally = UsageTally::default();
        let mut running: i64 = 0;

        for (idx, event) in events.iter().enumerate() {
            running += 1;
            tally.total_count += 1;
            tally.last_use_date = Some(event.date);

            // 同一日期的事件全部处理完后才检查阈值
            let day_finished = events
                .get(idx + 1)
                .map_or(true, |next| next.date != event.date);

            if day_finished && running >= self.wear_threshold {
                tally.triggers.push(RepairTrigger {
                    date: event.date,
                    uses_at_trigger: running,
                });
                running = 0;
            }
        }

        tally.current_count = running;
        tally
    }
}
