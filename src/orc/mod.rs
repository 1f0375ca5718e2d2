//! ORC stripe 读取器
//!
//! 自底向上：
//! - `proto`    — 文件尾与 stripe footer 的 protobuf 消息
//! - `source`   — 数据源协作者（内存 / 文件）
//! - `metadata` — schema 树、按层选列、stripe 选择、多数据源聚合
//! - `rle`      — 字节 / 布尔 / 整数 RLE 与 varint
//! - `timezone` — TZif 与 POSIX 规则 → 本地时间转 UTC 表
//! - `stream`   — 流目录遍历、合并读、解压后的流区间
//! - `decode`   — 两遍列解码与子行统计
//! - `reader`   — 逐层驱动与嵌套输出组装

pub mod proto;
pub mod source;
pub mod metadata;
pub mod rle;
pub mod timezone;
pub mod stream;
pub mod decode;
pub mod reader;

pub use metadata::{AggregateMetadata, OrcMetadata, SchemaMatching};
pub use reader::{ColumnNameInfo, OrcReader, ReadResult, ReaderOptions};
pub use source::{BufferSource, DataSource, FileSource};
