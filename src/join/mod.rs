//! 等值 join
//!
//! ```text
//!   validate ─► 空输入快速路径 ─► Category 键字典同步
//!                                     │
//!                       ┌─────────────┴─────────────┐
//!                   JoinStrategy::Hash        JoinStrategy::Sort（单键）
//!                       └─────────────┬─────────────┘
//!                          JoinIndices (left[i], right[i])
//!                                     │
//!                       gather 左列 / 右列 / 公共键列
//! ```
//!
//! 输出列：左表全部列，随后是右表中不属于公共键对的列。
//! 公共键列按左索引取值；OUTER join 再把左侧无匹配行的右键值补进同一列。

mod hash;
mod sort;

use std::borrow::Cow;

use tracing::{debug, info};

use crate::column::{compact_dictionary, synchronize_dictionaries, Column, Table};
use crate::common::{expects, EngineError, Result, SizeType, NOT_MATCHED};
use crate::device::Stream;
use crate::gather::{gather_column, gather_into, OutOfBounds};
use crate::types::DType;

pub use hash::hash_join;
pub use sort::sort_join;

// ── 配置 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
    Outer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinStrategy {
    #[default]
    Hash,
    /// 仅支持单键
    Sort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOptions {
    pub kind:              JoinKind,
    pub strategy:          JoinStrategy,
    /// 共享一个输出列的 (左键列, 右键列)；None 为全部键对
    pub columns_in_common: Option<Vec<(usize, usize)>>,
    /// null 键之间是否相等
    pub nulls_equal:       bool,
}

impl JoinOptions {
    pub fn new(kind: JoinKind) -> Self {
        Self { kind, strategy: JoinStrategy::Hash, columns_in_common: None, nulls_equal: false }
    }

    pub fn with_strategy(mut self, strategy: JoinStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_columns_in_common(mut self, pairs: Vec<(usize, usize)>) -> Self {
        self.columns_in_common = Some(pairs);
        self
    }

    pub fn with_nulls_equal(mut self, on: bool) -> Self {
        self.nulls_equal = on;
        self
    }
}

/// 匹配的行号对；无匹配一侧为 [`NOT_MATCHED`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinIndices {
    pub left:  Vec<SizeType>,
    pub right: Vec<SizeType>,
}

impl JoinIndices {
    pub fn len(&self) -> usize { self.left.len() }
    pub fn is_empty(&self) -> bool { self.left.is_empty() }

    /// 一侧全部行、另一侧全部无匹配
    fn trivial(rows: usize, left_side: bool) -> Result<Self> {
        let all = (0..checked_size(rows)?).collect::<Vec<_>>();
        let none = vec![NOT_MATCHED; rows];
        Ok(if left_side { Self { left: all, right: none } } else { Self { left: none, right: all } })
    }
}

/// 输出行数必须能用 `SizeType` 表示
pub(crate) fn checked_size(n: usize) -> Result<SizeType> {
    SizeType::try_from(n).map_err(|_| EngineError::JoinSizeOverflow(n))
}

// ── 入口 ──────────────────────────────────────────────────────────────────────

/// join 两张表，返回物化后的结果表
pub fn join(
    left:     &Table,
    right:    &Table,
    left_on:  &[usize],
    right_on: &[usize],
    options:  &JoinOptions,
    stream:   &Stream,
) -> Result<Table> {
    let common = validate(left, right, left_on, right_on, options)?;
    let (left_keys, right_keys) = synchronized_keys(left, right, left_on, right_on)?;
    let indices = compute_indices(left, right, &left_keys, &right_keys, options, stream)?;
    info!(
        kind = ?options.kind,
        strategy = ?options.strategy,
        left_rows = left.num_rows(),
        right_rows = right.num_rows(),
        output_rows = indices.len(),
        "join"
    );
    materialize(left, right, left_on, right_on, &left_keys, &right_keys, &common, &indices, options.kind, stream)
}

/// 只计算匹配行号对
pub fn join_indices(
    left:     &Table,
    right:    &Table,
    left_on:  &[usize],
    right_on: &[usize],
    options:  &JoinOptions,
    stream:   &Stream,
) -> Result<JoinIndices> {
    validate(left, right, left_on, right_on, options)?;
    let (left_keys, right_keys) = synchronized_keys(left, right, left_on, right_on)?;
    compute_indices(left, right, &left_keys, &right_keys, options, stream)
}

fn compute_indices(
    left:       &Table,
    right:      &Table,
    left_keys:  &[Cow<'_, Column>],
    right_keys: &[Cow<'_, Column>],
    options:    &JoinOptions,
    stream:     &Stream,
) -> Result<JoinIndices> {
    let (nl, nr) = (left.num_rows(), right.num_rows());
    let fast = match options.kind {
        _ if nl == 0 && nr == 0 => Some(JoinIndices::default()),
        JoinKind::Left if nl == 0 => Some(JoinIndices::default()),
        JoinKind::Inner if nl == 0 || nr == 0 => Some(JoinIndices::default()),
        JoinKind::Outer if nr == 0 => Some(JoinIndices::trivial(nl, true)?),
        JoinKind::Outer if nl == 0 => Some(JoinIndices::trivial(nr, false)?),
        _ => None,
    };
    if let Some(indices) = fast {
        debug!(kind = ?options.kind, left_rows = nl, right_rows = nr, "join empty-input fast path");
        return Ok(indices);
    }
    let lk: Vec<&Column> = left_keys.iter().map(|c| &**c).collect();
    let rk: Vec<&Column> = right_keys.iter().map(|c| &**c).collect();
    match options.strategy {
        JoinStrategy::Hash => hash_join(&lk, &rk, options.kind, options.nulls_equal, stream),
        JoinStrategy::Sort => sort_join(lk[0], rk[0], options.kind, options.nulls_equal, stream),
    }
}

// ── 校验 ──────────────────────────────────────────────────────────────────────

/// 返回公共键对在 `left_on` / `right_on` 中的位置
fn validate(
    left:     &Table,
    right:    &Table,
    left_on:  &[usize],
    right_on: &[usize],
    options:  &JoinOptions,
) -> Result<Vec<usize>> {
    expects!(left.num_columns() > 0 && right.num_columns() > 0, "join inputs must have at least one column");
    expects!(!left_on.is_empty(), "join needs at least one key column");
    expects!(
        left_on.len() == right_on.len(),
        "{} left key columns vs {} right key columns", left_on.len(), right_on.len()
    );
    expects!(
        options.strategy != JoinStrategy::Sort || left_on.len() == 1,
        "sort join supports a single key column, got {}", left_on.len()
    );
    for (&l, &r) in left_on.iter().zip(right_on) {
        expects!(l < left.num_columns(), "left key column {l} out of range");
        expects!(r < right.num_columns(), "right key column {r} out of range");
        let (a, b) = (left.column(l).dtype(), right.column(r).dtype());
        if let (DType::Timestamp(ua), DType::Timestamp(ub)) = (a, b) {
            if ua != ub {
                return Err(EngineError::TimeUnitMismatch { left: ua, right: ub });
            }
        }
        if a != b {
            return Err(EngineError::DtypeMismatch { left: a, right: b });
        }
        if a.is_nested() {
            return Err(EngineError::Unsupported(format!("{a:?} join keys")));
        }
    }
    for (name, table) in [("left", left), ("right", right)] {
        if let Some(i) = table.columns().iter().position(Column::is_missing_data) {
            return Err(EngineError::NullData(format!("{name} column {i}")));
        }
    }

    let pairs: Vec<(usize, usize)> = left_on.iter().copied().zip(right_on.iter().copied()).collect();
    match &options.columns_in_common {
        None => Ok((0..pairs.len()).collect()),
        Some(common) => common.iter()
            .map(|p| pairs.iter().position(|q| q == p).ok_or_else(|| {
                EngineError::InvalidArgument(format!("columns_in_common pair {p:?} is not a key pair"))
            }))
            .collect(),
    }
}

/// Category 键对映射到共享字典；其余键按原样借用
fn synchronized_keys<'a>(
    left:     &'a Table,
    right:    &'a Table,
    left_on:  &[usize],
    right_on: &[usize],
) -> Result<(Vec<Cow<'a, Column>>, Vec<Cow<'a, Column>>)> {
    let mut lk = Vec::with_capacity(left_on.len());
    let mut rk = Vec::with_capacity(right_on.len());
    for (&l, &r) in left_on.iter().zip(right_on) {
        let (a, b) = (left.column(l), right.column(r));
        if a.dtype() == DType::Category {
            let (a, b) = synchronize_dictionaries(a, b)?;
            lk.push(Cow::Owned(a));
            rk.push(Cow::Owned(b));
        } else {
            lk.push(Cow::Borrowed(a));
            rk.push(Cow::Borrowed(b));
        }
    }
    Ok((lk, rk))
}

// ── 物化 ──────────────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn materialize(
    left:       &Table,
    right:      &Table,
    left_on:    &[usize],
    right_on:   &[usize],
    left_keys:  &[Cow<'_, Column>],
    right_keys: &[Cow<'_, Column>],
    common:     &[usize],
    indices:    &JoinIndices,
    kind:       JoinKind,
    stream:     &Stream,
) -> Result<Table> {
    // INNER 的索引都在范围内，不需要越界检查
    let policy = if kind == JoinKind::Inner { OutOfBounds::Unchecked } else { OutOfBounds::Nullify };
    let key_pos = |on: &[usize], c: usize| on.iter().position(|&k| k == c);

    // 右侧无匹配、左侧有匹配的行才从右键补值
    let right_only_map: Vec<SizeType> = indices.left.iter().zip(&indices.right)
        .map(|(&l, &r)| if l == NOT_MATCHED { r } else { NOT_MATCHED })
        .collect();

    let mut out = Vec::with_capacity(left.num_columns() + right.num_columns());
    for c in 0..left.num_columns() {
        let col = match key_pos(left_on, c) {
            Some(k) if common.contains(&k) => {
                let dest = gather_column(&left_keys[k], &indices.left, OutOfBounds::Nullify, stream)?;
                if kind == JoinKind::Outer {
                    gather_into(&right_keys[k], &right_only_map, &dest, stream)?
                } else {
                    dest
                }
            }
            Some(k) => gather_column(&left_keys[k], &indices.left, policy, stream)?,
            None => gather_column(left.column(c), &indices.left, policy, stream)?,
        };
        out.push(compact_dictionary(col)?);
    }
    for c in 0..right.num_columns() {
        let col = match key_pos(right_on, c) {
            Some(k) if common.contains(&k) => continue,
            Some(k) => gather_column(&right_keys[k], &indices.right, policy, stream)?,
            None => gather_column(right.column(c), &indices.right, policy, stream)?,
        };
        out.push(compact_dictionary(col)?);
    }
    debug!(columns = out.len(), rows = indices.len(), "materialized join output");
    Table::new(out)
}
