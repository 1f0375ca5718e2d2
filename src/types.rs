//! 列的逻辑数据类型与运行时标量

use std::fmt;

// ── 时间精度 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    Second,
    Millisecond,
    Microsecond,
    #[default]
    Nanosecond,
}

impl TimeUnit {
    /// 每秒的 tick 数
    pub fn ticks_per_second(self) -> i64 {
        match self {
            Self::Second      => 1,
            Self::Millisecond => 1_000,
            Self::Microsecond => 1_000_000,
            Self::Nanosecond  => 1_000_000_000,
        }
    }
}

// ── DType ─────────────────────────────────────────────────────────────────────

/// 设备列的元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 0 / 1，每行一个字节
    Bool8,
    Int8, Int16, Int32, Int64,
    Float32, Float64,
    /// 距 1970-01-01 的天数
    Date32,
    /// 距 epoch 的 tick 数（i64）
    Timestamp(TimeUnit),
    /// 定点小数，`value × 10^scale`；scale 取负数表示小数位
    Decimal64 { scale: i32 },
    /// 变长字符串（offsets + chars）
    String,
    /// 字典编码字符串：i32 code + 列级字典
    Category,
    /// children = [offsets(Int32), elements]
    List,
    /// children = 每个字段一列
    Struct,
}

impl DType {
    /// 固定字节宽度；变长 / 嵌套类型返回 None
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Bool8 | Self::Int8                       => Some(1),
            Self::Int16                                    => Some(2),
            Self::Int32 | Self::Float32 | Self::Date32
            | Self::Category                               => Some(4),
            Self::Int64 | Self::Float64 | Self::Timestamp(_)
            | Self::Decimal64 { .. }                       => Some(8),
            Self::String | Self::List | Self::Struct       => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }
    pub fn is_floating(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
    pub fn is_timestamp(self) -> bool {
        matches!(self, Self::Timestamp(_) | Self::Date32)
    }
    pub fn is_nested(self) -> bool {
        matches!(self, Self::List | Self::Struct)
    }
    /// 可参与算术聚合（sum / mean）
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_floating() || matches!(self, Self::Bool8 | Self::Decimal64 { .. })
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// 单个元素的运行时表示（逐元素访问、测试断言、UDF 输出）
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Date32(i32),
    Timestamp(i64, TimeUnit),
    Decimal64(i64, i32),
    Str(String),
    List(Vec<Value>),
    Struct(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(v)         => Some(*v as i64),
            Self::Int8(v)         => Some(*v as i64),
            Self::Int16(v)        => Some(*v as i64),
            Self::Int32(v)        => Some(*v as i64),
            Self::Int64(v)        => Some(*v),
            Self::Date32(v)       => Some(*v as i64),
            Self::Timestamp(v, _) => Some(*v),
            Self::Decimal64(v, _) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float32(v)          => Some(*v as f64),
            Self::Float64(v)          => Some(*v),
            Self::Decimal64(v, scale) if *scale < 0 => Some(*v as f64 / 10f64.powi(-*scale)),
            Self::Decimal64(v, scale) => Some(*v as f64 * 10f64.powi(*scale)),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Self::Str(s) => Some(s), _ => None }
    }

    pub fn str(s: &str) -> Self { Self::Str(s.to_string()) }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null                => write!(f, "NULL"),
            Self::Bool(v)             => write!(f, "{v}"),
            Self::Int8(v)             => write!(f, "{v}"),
            Self::Int16(v)            => write!(f, "{v}"),
            Self::Int32(v)            => write!(f, "{v}"),
            Self::Int64(v)            => write!(f, "{v}"),
            Self::Float32(v)          => write!(f, "{v}"),
            Self::Float64(v)          => write!(f, "{v}"),
            Self::Date32(v)           => write!(f, "{v}d"),
            Self::Timestamp(v, unit)  => write!(f, "{v}{unit:?}"),
            Self::Decimal64(v, scale) => write!(f, "{v}e{scale}"),
            Self::Str(s)              => write!(f, "{s}"),
            Self::List(items) | Self::Struct(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}
