// ==========================================
// 砂箱使用与维修跟踪系统 - 维修记录模型
// ==========================================
// 对齐: db.rs repair_history 表
// 约束:
// - 每箱最多一条 open 记录（end_date 为 NULL），且只能是 MANUAL
// - AUTO 记录为回放派生的当日闭合周期 (end_date = start_date)
// - 记录只追加、只由返修动作闭合，其余字段不做原地修改
// ==========================================

use crate::domain::types::RepairOrigin;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// RepairRecord - 一次维修周期
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub repair_id: Option<i64>,      // 数据库行号（未持久化时为 None）
    pub mold_id: i32,                // 箱号
    pub start_date: NaiveDate,       // 维修开始日期
    pub end_date: Option<NaiveDate>, // 维修结束日期 (None 表示进行中)
    pub uses_before_repair: i64,     // 送修前累计使用次数
    pub origin: RepairOrigin,        // 维修来源 (AUTO/MANUAL)
}

impl RepairRecord {
    /// 创建 open 的人工维修记录（送修动作）
    pub fn manual_open(mold_id: i32, start_date: NaiveDate, uses_before_repair: i64) -> Self {
        Self {
            repair_id: None,
            mold_id,
            start_date,
            end_date: None,
            uses_before_repair,
            origin: RepairOrigin::Manual,
        }
    }

    /// 创建闭合的自动维修周期（阈值触发，按日粒度当日完成）
    pub fn auto_cycle(mold_id: i32, date: NaiveDate, uses_before_repair: i64) -> Self {
        Self {
            repair_id: None,
            mold_id,
            start_date: date,
            end_date: Some(date),
            uses_before_repair,
            origin: RepairOrigin::Auto,
        }
    }

    /// 判断是否进行中
    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }

    /// 闭合维修记录
    pub fn close(&mut self, end_date: NaiveDate) {
        self.end_date = Some(end_date);
    }
}

// ==========================================
// 单元测试
// ==========================================
#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_manual_open_then_close() {
        let mut record = RepairRecord::manual_open(2, d(2025, 1, 28), 87);
        assert!(record.is_open());
        assert_eq!(record.origin, RepairOrigin::Manual);
        assert_eq!(record.uses_before_repair, 87);

        record.close(d(2025, 2, 3));
        assert!(!record.is_open());
        assert_eq!(record.end_date, Some(d(2025, 2, 3)));
    }

    #[test]
    fn test_auto_cycle_is_closed_same_day() {
        let record = RepairRecord::auto_cycle(1, d(2025, 1, 5), 100);
        assert!(!record.is_open());
        assert_eq!(record.start_date, record.end_date.unwrap());
        assert_eq!(record.origin, RepairOrigin::Auto);
    }
}
