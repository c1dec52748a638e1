// ==========================================
// 砂箱使用与维修跟踪系统 - 引擎层错误类型
// ==========================================
// 传播策略: 所有核心错误作为显式 Result 返回，不用于正常控制流
// 红线: 核心从不静默裁剪或丢弃非法输入，是否跳过坏记录由调用方决定
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    // ===== 输入校验错误 =====
    #[error("箱号超出箱组范围: mold_id={mold_id}, fleet_size={fleet_size}")]
    InvalidUnitId { mold_id: i32, fleet_size: i32 },

    #[error("使用事件日期无效: mold_id={mold_id}, raw={raw}")]
    InvalidEventDate { mold_id: i32, raw: String },

    // ===== 生命周期错误 =====
    #[error("砂箱没有进行中的维修记录: mold_id={mold_id}")]
    NoActiveRepair { mold_id: i32 },

    // ===== 持久化错误 =====
    #[error("快照写入失败: {0}")]
    SnapshotWriteFailed(String),

    // ===== 透传仓储层错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
