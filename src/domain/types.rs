// ==========================================
// 砂箱使用与维修跟踪系统 - 领域类型定义
// ==========================================
// 红线: 状态机只有两个状态 (就绪/维修中)，闲置是派生标志而非状态
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 运行状态 (Mold Status)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoldStatus {
    Ready,    // 就绪，可投入使用
    InRepair, // 维修中，不可用
}

impl fmt::Display for MoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoldStatus::Ready => write!(f, "READY"),
            MoldStatus::InRepair => write!(f, "IN_REPAIR"),
        }
    }
}

// ==========================================
// 维修来源 (Repair Origin)
// ==========================================
// AUTO: 磨损阈值触发，由回放派生，当日闭合
// MANUAL: 操作员手工送修，保持 open 直到返回
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairOrigin {
    Auto,
    Manual,
}

impl RepairOrigin {
    /// 转换为数据库存储字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            RepairOrigin::Auto => "AUTO",
            RepairOrigin::Manual => "MANUAL",
        }
    }

    /// 从数据库存储字符串解析（未知值按 MANUAL 处理，保守保留人工语义）
    pub fn from_db_str(s: &str) -> Self {
        match s {
            "AUTO" => RepairOrigin::Auto,
            _ => RepairOrigin::Manual,
        }
    }
}

impl fmt::Display for RepairOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 闲置标志 (Idle Flag)
// ==========================================
// 派生值: 每次对账重算全量重新计算，不做增量修补
// 约束: 与维修中状态互斥（维修优先）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdleFlag {
    /// 自建箱以来从未使用
    NeverUsed,
    /// 超过闲置窗口未使用
    Stale { days_idle: i64 },
}

impl IdleFlag {
    /// 闲置天数（从未使用时无确定天数，返回 None）
    pub fn days_idle(&self) -> Option<i64> {
        match self {
            IdleFlag::NeverUsed => None,
            IdleFlag::Stale { days_idle } => Some(*days_idle),
        }
    }
}

impl fmt::Display for IdleFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdleFlag::NeverUsed => write!(f, "NEVER_USED"),
            IdleFlag::Stale { days_idle } => write!(f, "STALE({})", days_idle),
        }
    }
}
