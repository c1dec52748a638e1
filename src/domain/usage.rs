// ==========================================
// 砂箱使用与维修跟踪系统 - 使用事件模型
// ==========================================
// 使用事件是外部日志源提供的只读输入，核心从不修改
// 同一日期可有多条事件（同日多次浇注）
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// UsageEvent - 单次使用事件
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub mold_id: i32,     // 箱号
    pub date: NaiveDate,  // 使用日期（日粒度）
    pub slot: String,     // 浇注工位标签（不透明，如 A/B/C/D）
}

impl UsageEvent {
    pub fn new(mold_id: i32, date: NaiveDate, slot: impl Into<String>) -> Self {
        Self {
            mold_id,
            date,
            slot: slot.into(),
        }
    }
}

/// 按日期升序稳定排序
///
/// 外部日志源不保证顺序，核心统一重排。
/// 稳定排序: 同日多条事件保持原始日志顺序（同日次数影响阈值越界，次序不影响）。
pub fn sort_events_chronologically(events: &mut [UsageEvent]) {
    events.sort_by_key(|e| e.date);
}
