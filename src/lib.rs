//! # olap-gpu-engine
//!
//! 列存数据处理引擎：列以列主序存放在（模拟的）设备内存中，
//! 在设备流上执行 ORC 解码、等值 join 与滚动窗口聚合。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         OrcReader                            │
//! │   AggregateMetadata ── select_columns / select_stripes       │
//! │        │                                                     │
//! │   per level:  assemble_stripe ─► decompress_streams          │
//! │        │        (流目录 / 合并读)     (两遍块解压)             │
//! │        ▼                                                     │
//! │   ColumnBuilder: presence ─► values ─► finalize              │
//! │        │                                                     │
//! │   aggregate_child_rows ─► 下一层                             │
//! └────────┬─────────────────────────────────────────────────────┘
//!          ▼
//!   Table / Column ──► join (hash | sort) ──► gather
//!                 └──► rolling (fixed | per-row windows)
//!
//!   device::Stream   — kernel 按提交顺序执行，数据并行部分由 rayon 承担
//!   MemoryResource   — 调用方提供的分配器
//! ```

// ── 数据模型 ──────────────────────────────────────────────────────────────────
pub mod common;
pub mod types;
pub mod bitmask;
pub mod column;
pub mod device;
pub mod gather;

// ── ORC 读取 ──────────────────────────────────────────────────────────────────
pub mod compression;
pub mod orc;

// ── 关系 / 分析算子 ───────────────────────────────────────────────────────────
pub mod join;
pub mod rolling;

pub use column::{Buffer, Column, Table};
pub use common::{EngineError, Result, SizeType, NOT_MATCHED};
pub use device::{DefaultMemoryResource, MemoryResource, Stream};
pub use types::{DType, TimeUnit, Value};
