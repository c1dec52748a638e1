// ==========================================
// 砂箱使用与维修跟踪系统 - 砂箱领域模型
// ==========================================
// 对齐: db.rs molds 表
// 不变式:
// - current_count 仅在维修触发/送修/返修时归零
// - total_count 单调不减，只随事件回放增长
// - idle_flag 与 in_repair 互斥
// ==========================================

use crate::domain::types::{IdleFlag, MoldStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// Mold - 砂箱计数快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mold {
    // ===== 主键 =====
    pub mold_id: i32, // 箱号 (1..=箱组规模，建箱后终身不变)

    // ===== 磨损计数 =====
    pub current_count: i64, // 上次维修以来的使用次数
    pub total_count: i64,   // 全寿命使用次数
    pub repair_count: i64,  // 已完成或已启动的维修周期数

    // ===== 日期 =====
    pub last_use_date: Option<NaiveDate>,    // 最近一次使用日期
    pub last_repair_date: Option<NaiveDate>, // 最近一次维修开始日期

    // ===== 状态 =====
    pub in_repair: bool,            // 维修中 (停用)
    pub idle_flag: Option<IdleFlag>, // 闲置标志 (派生值)
}

// ==========================================
// Trait: WearMonitor
// ==========================================
// 用途: 磨损监控逻辑接口
pub trait WearMonitor {
    /// 判断是否达到磨损阈值需要维修
    fn needs_repair(&self, wear_threshold: i64) -> bool;

    /// 计算距离阈值的剩余可用次数（最小为 0）
    fn remaining_uses(&self, wear_threshold: i64) -> i64;

    /// 计算磨损率 (0.0 - 1.0+)，相对于磨损阈值
    fn wear_ratio(&self, wear_threshold: i64) -> f64;
}

impl WearMonitor for Mold {
    fn needs_repair(&self, wear_threshold: i64) -> bool {
        self.current_count >= wear_threshold
    }

    fn remaining_uses(&self, wear_threshold: i64) -> i64 {
        (wear_threshold - self.current_count).max(0)
    }

    fn wear_ratio(&self, wear_threshold: i64) -> f64 {
        if wear_threshold <= 0 {
            return 0.0;
        }
        self.current_count as f64 / wear_threshold as f64
    }
}

// ==========================================
// 辅助方法
// ==========================================
impl Mold {
    /// 创建新砂箱（建箱初始状态: 就绪、零计数）
    pub fn new(mold_id: i32) -> Self {
        Self {
            mold_id,
            current_count: 0,
            total_count: 0,
            repair_count: 0,
            last_use_date: None,
            last_repair_date: None,
            in_repair: false,
            idle_flag: None,
        }
    }

    /// 当前运行状态
    pub fn status(&self) -> MoldStatus {
        if self.in_repair {
            MoldStatus::InRepair
        } else {
            MoldStatus::Ready
        }
    }

    /// 状态文本（供展示层使用）
    pub fn status_text(&self) -> String {
        if self.in_repair {
            return "维修中".to_string();
        }
        match self.idle_flag {
            Some(IdleFlag::NeverUsed) => "闲置 (从未使用)".to_string(),
            Some(IdleFlag::Stale { days_idle }) => format!("闲置 ({} 天)", days_idle),
            None => "就绪".to_string(),
        }
    }

    /// 校验互斥不变式: 维修中不得同时带闲置标志
    pub fn invariants_hold(&self) -> bool {
        !(self.in_repair && self.idle_flag.is_some())
    }
}
