//! 全局基础类型与错误定义

use thiserror::Error;

use crate::types::{DType, TimeUnit};

// ── 索引类型 ──────────────────────────────────────────────────────────────────

/// 行号 / 行数在设备侧的宽度（与 gather map、join 输出索引同宽）
pub type SizeType = i32;

/// join 结果中表示"无匹配"的哨兵索引
pub const NOT_MATCHED: SizeType = -1;

/// ARGMAX / ARGMIN 在窗口内没有有效值时的输出
pub const ARG_SENTINEL: SizeType = -1;

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    // ── 输入格式错误 ──
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("invalid stripe index {index} for source {source_idx} ({num_stripes} stripes)")]
    InvalidStripe { source_idx: usize, index: usize, num_stripes: usize },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("decimal precision {precision} does not fit a 64-bit decimal")]
    DecimalOverflow { precision: u32 },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── 资源 / 一致性 ──
    #[error("column {0} is non-empty but has no data")]
    NullData(String),
    #[error("dtype mismatch: {left:?} vs {right:?}")]
    DtypeMismatch { left: DType, right: DType },
    #[error("timestamp resolution mismatch: {left:?} vs {right:?}")]
    TimeUnitMismatch { left: TimeUnit, right: TimeUnit },
    #[error("no decompressible data in stripe")]
    NoDecompressibleData,
    #[error("compression error: {0}")]
    Compression(String),

    // ── 调用方用法错误 ──
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("join output of {0} rows exceeds the index width")]
    JoinSizeOverflow(usize),

    // ── 设备执行失败 ──
    #[error("device error: {0}")]
    Device(String),
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// `cond` 不成立时返回 `InvalidArgument`
macro_rules! expects {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err($crate::common::EngineError::InvalidArgument(format!($($msg)+)));
        }
    };
}
pub(crate) use expects;

/// 数据损坏类校验（返回 `Decode`）
macro_rules! verify_data {
    ($cond:expr, $($msg:tt)+) => {
        if !$cond {
            return Err($crate::common::EngineError::Decode(format!($($msg)+)));
        }
    };
}
pub(crate) use verify_data;
