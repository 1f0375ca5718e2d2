//! 滚动窗口聚合
//!
//! 第 i 行的窗口为 `[i - preceding + 1, i + following]`（preceding 包含当前行），
//! 截断到列边界。窗口内有效值个数不少于 `min_periods` 时输出有效。
//!
//! ```text
//!   validate ─► center 重分配 ─► 全零窗口？──是──► count/sum 全 0，其余全 null
//!                                   │否
//!                               逐行聚合（rayon）─► pack 成目标类型
//! ```

pub mod aggregation;

use rayon::prelude::*;
use tracing::debug;

use crate::column::{Buffer, Column};
use crate::common::{expects, EngineError, Result, SizeType, ARG_SENTINEL};
use crate::device::Stream;
use crate::types::DType;

pub use aggregation::{Aggregation, Interpolation, UdfAggregation, UdfKind, WindowKernel};

// ── 窗口 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSpec {
    Fixed { preceding: usize, following: usize },
    /// 逐行窗口（基于偏移的窗口，例如按时间）；两个数组长度等于列长
    PerRow { preceding: Vec<SizeType>, following: Vec<SizeType> },
}

impl WindowSpec {
    /// 大小为 `size`、以当前行结尾的固定窗口
    pub fn window(size: usize) -> Self { Self::Fixed { preceding: size, following: 0 } }

    pub fn per_row(preceding: Vec<SizeType>) -> Self {
        let following = vec![0; preceding.len()];
        Self::PerRow { preceding, following }
    }

    pub fn is_fixed(&self) -> bool { matches!(self, Self::Fixed { .. }) }

    fn bounds(&self, row: usize) -> (i64, i64) {
        match self {
            Self::Fixed { preceding, following } => (*preceding as i64, *following as i64),
            Self::PerRow { preceding, following } => (i64::from(preceding[row]), i64::from(following[row])),
        }
    }

    /// 所有行的窗口都是 0 行
    fn is_empty_everywhere(&self) -> bool {
        match self {
            Self::Fixed { preceding, following } => *preceding == 0 && *following == 0,
            Self::PerRow { preceding, following } => {
                preceding.iter().zip(following).all(|(&p, &f)| p <= 0 && f <= 0)
            }
        }
    }

    /// 窗口总大小 w 重分配为 preceding = w/2 + 1, following = w - preceding
    fn centered(&self) -> Result<Self> {
        match self {
            Self::Fixed { preceding, following } => {
                let w = preceding + following;
                if w == 0 {
                    return Ok(self.clone());
                }
                let p = w / 2 + 1;
                Ok(Self::Fixed { preceding: p, following: w.saturating_sub(p) })
            }
            Self::PerRow { .. } => Err(EngineError::InvalidArgument(
                "center is not supported for per-row window arrays".into(),
            )),
        }
    }
}

// ── 入口 ──────────────────────────────────────────────────────────────────────

/// 一行聚合结果
#[derive(Debug, Clone, Copy, PartialEq)]
enum Out {
    Null,
    I(i64),
    F(f64),
}

/// 窗口计算用的数值视图，借用输入列的缓冲区
#[derive(Clone, Copy)]
enum Values<'a> {
    U8(&'a [u8]),
    I8(&'a [i8]),
    I16(&'a [i16]),
    I32(&'a [i32]),
    I64(&'a [i64]),
    F32(&'a [f32]),
    F64(&'a [f64]),
    /// count 不读取值
    Opaque,
}

impl Values<'_> {
    fn is_int(&self) -> bool {
        matches!(self, Self::U8(_) | Self::I8(_) | Self::I16(_) | Self::I32(_) | Self::I64(_))
    }

    fn int_at(&self, i: usize) -> Option<i64> {
        match self {
            Self::U8(v)  => Some(i64::from(v[i])),
            Self::I8(v)  => Some(i64::from(v[i])),
            Self::I16(v) => Some(i64::from(v[i])),
            Self::I32(v) => Some(i64::from(v[i])),
            Self::I64(v) => Some(v[i]),
            Self::F32(_) | Self::F64(_) | Self::Opaque => None,
        }
    }

    fn f64_at(&self, i: usize) -> f64 {
        match self {
            Self::F32(v) => f64::from(v[i]),
            Self::F64(v) => v[i],
            _ => self.int_at(i).map_or(0.0, |x| x as f64),
        }
    }
}

/// 第 i 行的窗口：`[lo, hi)` 中的有效行
#[derive(Clone, Copy)]
struct Frame<'a> {
    input: &'a Column,
    lo:    usize,
    hi:    usize,
}

impl Frame<'_> {
    fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        (self.lo..self.hi).filter(move |&r| self.input.is_valid(r))
    }
}

pub fn rolling(
    input:       &Column,
    window:      &WindowSpec,
    min_periods: usize,
    center:      bool,
    agg:         &Aggregation,
    stream:      &Stream,
) -> Result<Column> {
    if input.is_missing_data() {
        return Err(EngineError::NullData(format!("{:?}", input.dtype())));
    }
    if let WindowSpec::PerRow { preceding, following } = window {
        expects!(
            preceding.len() == input.len() && following.len() == input.len(),
            "window arrays of {} / {} rows for a {}-row column", preceding.len(), following.len(), input.len()
        );
    }
    let window = if center { window.centered()? } else { window.clone() };
    let target = agg.target_type(input.dtype())?;
    // 固定窗口上的 count 永不为 null；逐行窗口照常按 min_periods 判定
    let min_periods = if matches!(agg, Aggregation::Count) && window.is_fixed() { 0 } else { min_periods };
    if let Aggregation::Quantile { quantiles, .. } = agg {
        expects!(quantiles.len() == 1, "rolling quantile takes exactly one quantile, got {}", quantiles.len());
        expects!((0.0..=1.0).contains(&quantiles[0]), "quantile {} outside [0, 1]", quantiles[0]);
    }
    if let Aggregation::Udf(u) = agg {
        expects!(!input.has_nulls(), "{:?} window function over a column with {} nulls", u.kind, input.null_count());
    }

    let n = input.len();
    debug!(agg = agg.name(), rows = n, ?target, min_periods, fixed = window.is_fixed(), "rolling window");
    if window.is_empty_everywhere() {
        let fill = match agg {
            Aggregation::Count | Aggregation::Sum => zero_of(target),
            _ => Out::Null,
        };
        return pack(target, agg, vec![fill; n]);
    }

    let values = numeric_view(input);
    let outs: Vec<Out> = stream.launch("rolling_window", || {
        (0..n).into_par_iter()
            .map(|i| {
                let (p, f) = window.bounds(i);
                let lo = (i as i64 - p + 1).max(0);
                let hi = (i as i64 + f + 1).clamp(lo, (n as i64).max(lo));
                let frame = Frame { input, lo: lo as usize, hi: hi as usize };
                let count = frame.rows().count();
                if count < min_periods {
                    return Ok(Out::Null);
                }
                aggregate(agg, values, frame, count, target)
            })
            .collect()
    })?;

    pack(target, agg, outs)
}

fn numeric_view(input: &Column) -> Values<'_> {
    match input.data() {
        Buffer::U8(v)  => Values::U8(v),
        Buffer::I8(v)  => Values::I8(v),
        Buffer::I16(v) => Values::I16(v),
        Buffer::I32(v) => Values::I32(v),
        Buffer::I64(v) => Values::I64(v),
        Buffer::F32(v) => Values::F32(v),
        Buffer::F64(v) => Values::F64(v),
        Buffer::Str { .. } | Buffer::Empty => Values::Opaque,
    }
}

fn zero_of(dtype: DType) -> Out {
    if dtype.is_floating() { Out::F(0.0) } else { Out::I(0) }
}

fn aggregate(agg: &Aggregation, values: Values<'_>, frame: Frame<'_>, count: usize, target: DType) -> Result<Out> {
    if count == 0 && !matches!(agg, Aggregation::Count | Aggregation::Sum) {
        return Ok(Out::Null);
    }
    let ints = || frame.rows().filter_map(move |r| values.int_at(r));
    let floats = || frame.rows().map(move |r| values.f64_at(r));
    let sorted = || {
        let mut v: Vec<f64> = floats().collect();
        v.sort_by(f64::total_cmp);
        v
    };
    let out = match (agg, values) {
        (Aggregation::Count, _) => Out::I(count as i64),
        (Aggregation::Sum, v) if v.is_int() => Out::I(ints().fold(0i64, i64::wrapping_add)),
        (Aggregation::Sum, _) => Out::F(floats().sum()),
        (Aggregation::Min | Aggregation::Max, v) if v.is_int() => {
            let m = if matches!(agg, Aggregation::Min) { ints().min() } else { ints().max() };
            m.map_or(Out::Null, Out::I)
        }
        (Aggregation::Min, _) => Out::F(floats().fold(f64::INFINITY, f64::min)),
        (Aggregation::Max, _) => Out::F(floats().fold(f64::NEG_INFINITY, f64::max)),
        (Aggregation::Mean, _) => Out::F(floats().sum::<f64>() / count as f64),
        (Aggregation::Median, _) => Out::F(Interpolation::Linear.quantile(&sorted(), 0.5)),
        (Aggregation::Quantile { quantiles, interpolation }, _) => Out::F(interpolation.quantile(&sorted(), quantiles[0])),
        (Aggregation::ArgMax | Aggregation::ArgMin, _) => {
            let want_max = matches!(agg, Aggregation::ArgMax);
            let mut rows = frame.rows();
            let Some(mut best) = rows.next() else { return Ok(Out::Null) };
            for r in rows {
                let (a, b) = (values.f64_at(r), values.f64_at(best));
                if (want_max && a > b) || (!want_max && a < b) {
                    best = r;
                }
            }
            Out::I(best as i64)
        }
        (Aggregation::Udf(u), _) => {
            let window: Vec<f64> = floats().collect();
            let v = u.kernel.call(&window);
            if target.is_floating() { Out::F(v) } else { Out::I(v as i64) }
        }
    };
    Ok(out)
}

/// 把逐行结果写成 `target` 类型的列
fn pack(target: DType, agg: &Aggregation, outs: Vec<Out>) -> Result<Column> {
    let n = outs.len();
    let arg = matches!(agg, Aggregation::ArgMax | Aggregation::ArgMin);
    let mut data = Buffer::with_capacity(target, n);
    let mut valid = Vec::with_capacity(n);
    for o in outs {
        valid.push(o != Out::Null);
        let (i, f) = match o {
            Out::Null if arg => (i64::from(ARG_SENTINEL), f64::from(ARG_SENTINEL)),
            Out::Null => (0, 0.0),
            Out::I(v) => (v, v as f64),
            Out::F(v) => (v as i64, v),
        };
        match &mut data {
            Buffer::U8(b)  => b.push(u8::from(i != 0)),
            Buffer::I8(b)  => b.push(i as i8),
            Buffer::I16(b) => b.push(i as i16),
            Buffer::I32(b) => b.push(i as i32),
            Buffer::I64(b) => b.push(i),
            Buffer::F32(b) => b.push(f as f32),
            Buffer::F64(b) => b.push(f),
            Buffer::Str { .. } | Buffer::Empty => {
                return Err(EngineError::Unsupported(format!("rolling output of type {target:?}")));
            }
        }
    }
    let mask = crate::bitmask::Bitmask::from_bools(valid);
    let col = Column::from_parts(target, n, data, Some(mask), Vec::new())?;
    Ok(col.without_nulls())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn run(input: &Column, window: WindowSpec, min_periods: usize, center: bool, agg: Aggregation) -> Column {
        rolling(input, &window, min_periods, center, &agg, &Stream::default()).unwrap()
    }

    #[test]
    fn trailing_sum() {
        let col = Column::from_vec(vec![1i32, 2, 3, 4, 5]);
        let out = run(&col, WindowSpec::window(3), 1, false, Aggregation::Sum);
        assert_eq!(out.dtype(), DType::Int64);
        assert_eq!(out.as_slice::<i64>().unwrap(), &[1, 3, 6, 9, 12]);
        assert!(out.null_mask().is_none());
    }

    #[test]
    fn centered_mean_and_min_periods() {
        let col = Column::from_options(vec![Some(1.0f64), None, Some(3.0), Some(5.0)]);
        let out = run(&col, WindowSpec::window(3), 2, true, Aggregation::Mean);
        assert_eq!(out.to_values(), vec![Value::Null, Value::Float64(2.0), Value::Float64(4.0), Value::Float64(4.0)]);
    }

    #[test]
    fn windows_clip_at_both_ends() {
        let col = Column::from_vec(vec![1i8, 2, 3]);
        let wide = run(&col, WindowSpec::Fixed { preceding: 5, following: 5 }, 1, false, Aggregation::Sum);
        assert_eq!(wide.as_slice::<i64>().unwrap(), &[6, 6, 6]);

        // 第 0 行窗口为空：sum 取 0，max 为 null
        let per_row = WindowSpec::per_row(vec![0, 3, 1]);
        let sum = run(&col, per_row.clone(), 0, false, Aggregation::Sum);
        assert_eq!(sum.as_slice::<i64>().unwrap(), &[0, 3, 3]);
        let max = run(&col, per_row, 0, false, Aggregation::Max);
        assert_eq!(max.to_values(), vec![Value::Null, Value::Int8(2), Value::Int8(3)]);
    }

    #[test]
    fn center_rejects_per_row_windows() {
        let col = Column::from_vec(vec![1i32, 2]);
        let err = rolling(&col, &WindowSpec::per_row(vec![1, 2]), 1, true, &Aggregation::Sum, &Stream::default());
        assert!(matches!(err, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn arg_extrema_report_row_numbers() {
        let col = Column::from_vec(vec![4i64, 9, 1, 7]);
        let max = run(&col, WindowSpec::window(2), 1, false, Aggregation::ArgMax);
        assert_eq!(max.as_slice::<i32>().unwrap(), &[0, 1, 1, 3]);
        let min = run(&col, WindowSpec::window(2), 1, false, Aggregation::ArgMin);
        assert_eq!(min.as_slice::<i32>().unwrap(), &[0, 0, 2, 2]);
    }

    #[test]
    fn udf_runs_compiled_kernel() {
        let col = Column::from_vec(vec![1.0f64, 2.0, 3.0]);
        let agg = Aggregation::ptx("range", DType::Float64, std::sync::Arc::new(|w: &[f64]| {
            w.iter().cloned().fold(f64::MIN, f64::max) - w.iter().cloned().fold(f64::MAX, f64::min)
        }));
        let out = run(&col, WindowSpec::window(2), 1, false, agg);
        assert_eq!(out.as_slice::<f64>().unwrap(), &[0.0, 1.0, 1.0]);

        let with_nulls = Column::from_options(vec![Some(1.0f64), None]);
        let agg = Aggregation::cuda("id", DType::Float64, std::sync::Arc::new(|w: &[f64]| w[0]));
        assert!(rolling(&with_nulls, &WindowSpec::window(1), 1, false, &agg, &Stream::default()).is_err());
    }
}
