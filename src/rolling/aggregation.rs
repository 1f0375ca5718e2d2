//! 聚合描述符与目标类型规则

use std::fmt;
use std::sync::Arc;

use crate::common::{EngineError, Result};
use crate::types::DType;

/// 分位数落在两个元素之间时的取值方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Linear,
    Lower,
    Higher,
    Midpoint,
    Nearest,
}

impl Interpolation {
    /// `sorted` 非空且升序
    pub fn quantile(self, sorted: &[f64], q: f64) -> f64 {
        let pos = q * (sorted.len() - 1) as f64;
        let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
        match self {
            Self::Linear   => sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo]),
            Self::Lower    => sorted[lo],
            Self::Higher   => sorted[hi],
            Self::Midpoint => (sorted[lo] + sorted[hi]) / 2.0,
            Self::Nearest  => sorted[pos.round_ties_even() as usize],
        }
    }
}

/// 用户函数的源码形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdfKind {
    Ptx,
    Cuda,
}

/// 编译后的窗口函数句柄；输入为窗口内的值（已转成 f64）
pub trait WindowKernel: Send + Sync {
    fn call(&self, window: &[f64]) -> f64;
}

impl<F> WindowKernel for F
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn call(&self, window: &[f64]) -> f64 { self(window) }
}

#[derive(Clone)]
pub struct UdfAggregation {
    pub kind:        UdfKind,
    pub source:      String,
    pub output_type: DType,
    pub kernel:      Arc<dyn WindowKernel>,
}

impl fmt::Debug for UdfAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdfAggregation")
            .field("kind", &self.kind)
            .field("source_len", &self.source.len())
            .field("output_type", &self.output_type)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Aggregation {
    Sum,
    Min,
    Max,
    Count,
    Mean,
    Median,
    Quantile { quantiles: Vec<f64>, interpolation: Interpolation },
    ArgMax,
    ArgMin,
    Udf(UdfAggregation),
}

impl Aggregation {
    pub fn quantile(q: f64, interpolation: Interpolation) -> Self {
        Self::Quantile { quantiles: vec![q], interpolation }
    }

    pub fn ptx(source: impl Into<String>, output_type: DType, kernel: Arc<dyn WindowKernel>) -> Self {
        Self::Udf(UdfAggregation { kind: UdfKind::Ptx, source: source.into(), output_type, kernel })
    }

    pub fn cuda(source: impl Into<String>, output_type: DType, kernel: Arc<dyn WindowKernel>) -> Self {
        Self::Udf(UdfAggregation { kind: UdfKind::Cuda, source: source.into(), output_type, kernel })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum              => "sum",
            Self::Min              => "min",
            Self::Max              => "max",
            Self::Count            => "count",
            Self::Mean             => "mean",
            Self::Median           => "median",
            Self::Quantile { .. }  => "quantile",
            Self::ArgMax           => "argmax",
            Self::ArgMin           => "argmin",
            Self::Udf(u) if u.kind == UdfKind::Ptx => "ptx",
            Self::Udf(_)           => "cuda",
        }
    }

    /// 对 `source` 做本聚合的输出类型；不支持的组合返回 `Unsupported`
    pub fn target_type(&self, source: DType) -> Result<DType> {
        let unsupported = || EngineError::Unsupported(format!("{} over {source:?}", self.name()));
        let integral = source.is_integer() || source == DType::Bool8;
        let ordered = integral || source.is_floating() || source.is_timestamp()
            || matches!(source, DType::Date32 | DType::Decimal64 { .. });
        match self {
            Self::Count => Ok(DType::Int32),
            Self::ArgMax | Self::ArgMin if ordered => Ok(DType::Int32),
            Self::Min | Self::Max if ordered => Ok(source),
            Self::Sum if integral => Ok(DType::Int64),
            Self::Sum if source.is_floating() || source.is_timestamp() => Ok(source),
            Self::Mean | Self::Median | Self::Quantile { .. } if integral || source.is_floating() || source.is_timestamp() => {
                Ok(DType::Float64)
            }
            Self::Udf(u) if u.output_type.is_numeric() && (integral || source.is_floating()) => Ok(u.output_type),
            _ => Err(unsupported()),
        }
    }
}
