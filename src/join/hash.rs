//! 哈希 join：右表建表，左表并行探测

use ahash::AHashMap;
use rayon::prelude::*;
use tracing::debug;

use super::{checked_size, JoinIndices, JoinKind};
use crate::column::{Buffer, Column};
use crate::common::{Result, SizeType, NOT_MATCHED};
use crate::device::Stream;

/// 一行中一个键列的可比较表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(super) enum KeyPart<'a> {
    Null,
    Int(i64),
    /// 浮点按位比较：-0.0 归一到 0.0，NaN 归一到同一个位模式
    Bits(u64),
    Str(&'a [u8]),
}

fn float_bits(v: f64) -> u64 {
    if v == 0.0 {
        0
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

pub(super) fn key_part(col: &Column, row: usize) -> KeyPart<'_> {
    if !col.is_valid(row) {
        return KeyPart::Null;
    }
    match col.data() {
        Buffer::U8(v)  => KeyPart::Int(i64::from(v[row])),
        Buffer::I8(v)  => KeyPart::Int(i64::from(v[row])),
        Buffer::I16(v) => KeyPart::Int(i64::from(v[row])),
        Buffer::I32(v) => KeyPart::Int(i64::from(v[row])),
        Buffer::I64(v) => KeyPart::Int(v[row]),
        Buffer::F32(v) => KeyPart::Bits(float_bits(f64::from(v[row]))),
        Buffer::F64(v) => KeyPart::Bits(float_bits(v[row])),
        Buffer::Str { offsets, chars } => KeyPart::Str(&chars[offsets[row] as usize..offsets[row + 1] as usize]),
        Buffer::Empty => KeyPart::Null,
    }
}

/// 一行的复合键；含 null 且 null 不相等时为 None（永不匹配）
fn row_key<'a>(cols: &[&'a Column], row: usize, nulls_equal: bool) -> Option<Vec<KeyPart<'a>>> {
    let key: Vec<KeyPart<'a>> = cols.iter().map(|c| key_part(c, row)).collect();
    (nulls_equal || !key.contains(&KeyPart::Null)).then_some(key)
}

/// 输出顺序：按左表行序，每行的匹配按右表行序；OUTER 再按右表行序追加右侧无匹配行
pub fn hash_join(
    left:        &[&Column],
    right:       &[&Column],
    kind:        JoinKind,
    nulls_equal: bool,
    stream:      &Stream,
) -> Result<JoinIndices> {
    let nl = left.first().map_or(0, |c| c.len());
    let nr = right.first().map_or(0, |c| c.len());
    checked_size(nl.max(nr))?;

    let table = stream.launch("hash_join_build", || {
        let mut table: AHashMap<Vec<KeyPart<'_>>, Vec<SizeType>> = AHashMap::with_capacity(nr);
        for r in 0..nr {
            if let Some(key) = row_key(right, r, nulls_equal) {
                table.entry(key).or_default().push(r as SizeType);
            }
        }
        Ok(table)
    })?;

    let matches: Vec<Vec<SizeType>> = stream.launch("hash_join_probe", || {
        Ok((0..nl).into_par_iter()
            .map(|l| row_key(left, l, nulls_equal)
                .and_then(|k| table.get(&k).cloned())
                .unwrap_or_default())
            .collect())
    })?;

    let keep_unmatched_left = kind != JoinKind::Inner;
    let total: usize = matches.iter()
        .map(|m| if m.is_empty() { usize::from(keep_unmatched_left) } else { m.len() })
        .sum();
    let mut right_hit = vec![false; if kind == JoinKind::Outer { nr } else { 0 }];
    let mut out = JoinIndices { left: Vec::with_capacity(total), right: Vec::with_capacity(total) };
    for (l, m) in matches.iter().enumerate() {
        if m.is_empty() {
            if keep_unmatched_left {
                out.left.push(l as SizeType);
                out.right.push(NOT_MATCHED);
            }
            continue;
        }
        for &r in m {
            out.left.push(l as SizeType);
            out.right.push(r);
            if let Some(hit) = right_hit.get_mut(r as usize) {
                *hit = true;
            }
        }
    }
    if kind == JoinKind::Outer {
        for (r, _) in right_hit.iter().enumerate().filter(|(_, hit)| !**hit) {
            out.left.push(NOT_MATCHED);
            out.right.push(r as SizeType);
        }
    }
    checked_size(out.len())?;
    debug!(?kind, build_rows = nr, probe_rows = nl, output_rows = out.len(), distinct_keys = table.len(), "hash join");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_join_keeps_probe_order() {
        let s = Stream::default();
        let l = Column::from_vec(vec![3i32, 1, 2, 1]);
        let r = Column::from_vec(vec![1i32, 1, 3]);
        let out = hash_join(&[&l], &[&r], JoinKind::Left, false, &s).unwrap();
        assert_eq!(out.left, vec![0, 1, 1, 2, 3, 3]);
        assert_eq!(out.right, vec![2, 0, 1, NOT_MATCHED, 0, 1]);
    }

    #[test]
    fn null_keys_match_only_when_equal_nulls_requested() {
        let s = Stream::default();
        let l = Column::from_options(vec![None, Some(1i64)]);
        let r = Column::from_options(vec![Some(1i64), None]);
        let strict = hash_join(&[&l], &[&r], JoinKind::Inner, false, &s).unwrap();
        assert_eq!((strict.left, strict.right), (vec![1], vec![0]));
        let loose = hash_join(&[&l], &[&r], JoinKind::Inner, true, &s).unwrap();
        assert_eq!((loose.left, loose.right), (vec![0, 1], vec![1, 0]));
    }

    #[test]
    fn multi_key_and_float_normalization() {
        let s = Stream::default();
        let la = Column::from_vec(vec![0.0f64, 1.5]);
        let lb = Column::from_strs(&["a", "b"]);
        let ra = Column::from_vec(vec![-0.0f64, 1.5]);
        let rb = Column::from_strs(&["a", "c"]);
        let out = hash_join(&[&la, &lb], &[&ra, &rb], JoinKind::Outer, false, &s).unwrap();
        assert_eq!(out.left, vec![0, 1, NOT_MATCHED]);
        assert_eq!(out.right, vec![0, NOT_MATCHED, 1]);
    }
}
