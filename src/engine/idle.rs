// ==========================================
// 砂箱使用与维修跟踪系统 - 闲置检测引擎
// ==========================================
// 职责: 根据“当前日期”与最近使用日期计算闲置天数并打闲置标志
// 红线: 纯派生读取: 不得修改 total_count/repair_count/维修历史
// 红线: 维修中的箱一律不打闲置标志（维修状态优先）
// ==========================================

use crate::domain::mold::Mold;
use crate::domain::types::IdleFlag;
use chrono::NaiveDate;
use serde_json::json;

// ==========================================
// IdleDetector - 闲置检测引擎
// ==========================================
/// 闲置检测引擎
/// 职责: 计算闲置天数、判定是否超过闲置窗口
pub struct IdleDetector {
    idle_days_threshold: i64,
}

impl IdleDetector {
    /// 构造函数
    ///
    /// # 参数
    /// - `idle_days_threshold`: 闲置窗口（允许的最大未使用天数，默认 4）
    pub fn new(idle_days_threshold: i64) -> Self {
        Self {
            idle_days_threshold,
        }
    }

    /// 评估单箱闲置状态
    ///
    /// # 参数
    /// - `mold`: 砂箱
    /// - `now`: 当前日期（已归一化到日粒度）
    ///
    /// # 返回
    /// - `Some(IdleFlag)`: 需要打闲置标志
    /// - `None`: 不闲置（或维修中）
    ///
    /// # 规则
    /// - 维修中 → 永不标记
    /// - 无 last_use_date → 视为自建箱以来闲置，总是标记
    /// - now - last_use_date > 阈值 → Stale(天数)，否则清除
    pub fn evaluate(&self, mold: &Mold, now: NaiveDate) -> Option<IdleFlag> {
        if mold.in_repair {
            return None;
        }

        match mold.last_use_date {
            None => Some(IdleFlag::NeverUsed),
            Some(last_use) => {
                let days_idle = (now - last_use).num_days();
                if days_idle > self.idle_days_threshold {
                    Some(IdleFlag::Stale { days_idle })
                } else {
                    None
                }
            }
        }
    }

    /// 将评估结果写回砂箱（只触碰 idle_flag 字段）
    pub fn apply(&self, mold: &mut Mold, now: NaiveDate) {
        mold.idle_flag = self.evaluate(mold, now);
    }

    /// 生成闲置原因 (可解释性)
    ///
    /// # 返回
    /// JSON 格式的原因说明
    pub fn generate_idle_reason(&self, mold: &Mold, now: NaiveDate) -> String {
        match self.evaluate(mold, now) {
            Some(IdleFlag::NeverUsed) => json!({
                "status": "IDLE",
                "reason": "自建箱以来从未使用",
                "mold_id": mold.mold_id,
                "idle_days_threshold": self.idle_days_threshold,
            })
            .to_string(),
            Some(IdleFlag::Stale { days_idle }) => json!({
                "status": "IDLE",
                "reason": "超过闲置窗口未使用",
                "mold_id": mold.mold_id,
                "days_idle": days_idle,
                "last_use_date": mold.last_use_date.map(|d| d.to_string()),
                "idle_days_threshold": self.idle_days_threshold,
            })
            .to_string(),
            None => json!({
                "status": "ACTIVE",
                "reason": if mold.in_repair { "维修中，闲置判定不适用" } else { "在闲置窗口内有使用" },
                "mold_id": mold.mold_id,
                "idle_days_threshold": self.idle_days_threshold,
            })
            .to_string(),
        }
    }
}
