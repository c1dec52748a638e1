// ==========================================
// 砂箱使用与维修跟踪系统 - 维修生命周期引擎
// ==========================================
// 状态机: Ready <-> InRepair (初始状态: 建箱即 Ready)
// 职责: 在领域值上应用送修/返修转换，持久化由调用方处理
// 红线: 返修没有 open 记录时必须拒绝 (NoActiveRepair)，从不凭空补造闭合记录
// ==========================================

use crate::domain::mold::Mold;
use crate::domain::repair::RepairRecord;
use crate::engine::error::{EngineError, EngineResult};
use chrono::NaiveDate;
use tracing::info;

// ==========================================
// LifecycleEngine - 维修生命周期引擎
// ==========================================
/// 维修生命周期引擎
/// 职责: 应用 Ready→InRepair / InRepair→Ready 的转换效果
pub struct LifecycleEngine {
    // 无状态引擎,不需要注入依赖
    // Repository 操作由调用方处理
}

impl LifecycleEngine {
    /// 构造函数
    pub fn new() -> Self {
        Self {}
    }

    /// 送修 (Ready → InRepair)
    ///
    /// # 参数
    /// - `mold`: 砂箱（原地修改）
    /// - `date`: 转换日期
    ///
    /// # 返回
    /// - `Some(RepairRecord)`: 新建的 open 人工维修记录，调用方负责持久化
    /// - `None`: 已在维修中，幂等无操作（repair_count 不重复累加）
    ///
    /// # 效果
    /// - 追加 open 记录，uses_before_repair = 当前计数
    /// - repair_count + 1，current_count 归零
    /// - last_repair_date = 转换日期；last_use_date 作为历史事实保留
    /// - 清除闲置标志（维修优先）
    pub fn send_to_repair(&self, mold: &mut Mold, date: NaiveDate) -> Option<RepairRecord> {
        if mold.in_repair {
            info!("箱 {} 已在维修中，送修为无操作", mold.mold_id);
            return None;
        }

        let record = RepairRecord::manual_open(mold.mold_id, date, mold.current_count);

        mold.in_repair = true;
        mold.repair_count += 1;
        mold.current_count = 0;
        mold.last_repair_date = Some(date);
        mold.idle_flag = None;

        info!(
            "箱 {} 送修: date={}, uses_before_repair={}",
            mold.mold_id, date, record.uses_before_repair
        );
        Some(record)
    }

    /// 返修 (InRepair → Ready)
    ///
    /// # 参数
    /// - `mold`: 砂箱（原地修改）
    /// - `open_record`: 当前 open 的维修记录（无则拒绝）
    /// - `date`: 返修日期（操作员给定；周边系统也可用下一次使用日期推断闭合）
    ///
    /// # 返回
    /// - `Ok(RepairRecord)`: 已闭合的维修记录，调用方负责持久化
    /// - `Err(NoActiveRepair)`: 没有 open 记录，拒绝且无任何副作用
    ///
    /// # 效果
    /// - 闭合 open 记录 (end_date = date)
    /// - current_count 归零，清除闲置标志
    pub fn return_from_repair(
        &self,
        mold: &mut Mold,
        open_record: Option<RepairRecord>,
        date: NaiveDate,
    ) -> EngineResult<RepairRecord> {
        let mut record = open_record.ok_or(EngineError::NoActiveRepair {
            mold_id: mold.mold_id,
        })?;

        record.close(date);

        mold.in_repair = false;
        mold.current_count = 0;
        mold.idle_flag = None;

        info!("箱 {} 返修: end_date={}", mold.mold_id, date);
        Ok(record)
    }
}

// ==========================================
// Default trait 实现
// ==========================================
impl Default for LifecycleEngine {
    fn default() -> Self {
        Self::new()
    }
}
