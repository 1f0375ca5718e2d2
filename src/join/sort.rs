//! 排序合并 join（单键）

use rayon::prelude::*;
use tracing::debug;

use super::hash::{key_part, KeyPart};
use super::{checked_size, JoinIndices, JoinKind};
use crate::column::Column;
use crate::common::{Result, SizeType, NOT_MATCHED};
use crate::device::Stream;

/// 按键排序后的 (键, 行号)；null 键在 null 不相等时剔除
fn sorted_keys(col: &Column, nulls_equal: bool) -> Vec<(KeyPart<'_>, SizeType)> {
    let mut keys: Vec<(KeyPart<'_>, SizeType)> = (0..col.len())
        .map(|r| (key_part(col, r), r as SizeType))
        .filter(|(k, _)| nulls_equal || *k != KeyPart::Null)
        .collect();
    keys.par_sort_unstable();
    keys
}

/// 与 [`super::hash_join`] 的输出顺序一致
pub fn sort_join(
    left:        &Column,
    right:       &Column,
    kind:        JoinKind,
    nulls_equal: bool,
    stream:      &Stream,
) -> Result<JoinIndices> {
    let (nl, nr) = (left.len(), right.len());
    checked_size(nl.max(nr))?;

    let (lk, rk) = stream.launch("sort_join_sort", || {
        Ok(rayon::join(|| sorted_keys(left, nulls_equal), || sorted_keys(right, nulls_equal)))
    })?;

    let mut pairs: Vec<(SizeType, SizeType)> = stream.launch("sort_join_merge", || {
        let mut pairs = Vec::new();
        let (mut i, mut j) = (0usize, 0usize);
        while i < lk.len() && j < rk.len() {
            match lk[i].0.cmp(&rk[j].0) {
                std::cmp::Ordering::Less    => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal   => {
                    let key = lk[i].0;
                    let i_end = i + lk[i..].iter().take_while(|(k, _)| *k == key).count();
                    let j_end = j + rk[j..].iter().take_while(|(k, _)| *k == key).count();
                    for &(_, l) in &lk[i..i_end] {
                        for &(_, r) in &rk[j..j_end] {
                            pairs.push((l, r));
                        }
                    }
                    checked_size(pairs.len())?;
                    i = i_end;
                    j = j_end;
                }
            }
        }
        Ok(pairs)
    })?;

    let mut left_hit = vec![false; nl];
    let mut right_hit = vec![false; nr];
    for &(l, r) in &pairs {
        left_hit[l as usize] = true;
        right_hit[r as usize] = true;
    }
    if kind != JoinKind::Inner {
        pairs.extend(left_hit.iter().enumerate().filter(|(_, h)| !**h).map(|(l, _)| (l as SizeType, NOT_MATCHED)));
    }
    // 恢复左表行序；同一左行内按右行序
    pairs.par_sort_unstable_by_key(|&(l, r)| (l, r));
    if kind == JoinKind::Outer {
        pairs.extend(right_hit.iter().enumerate().filter(|(_, h)| !**h).map(|(r, _)| (NOT_MATCHED, r as SizeType)));
    }
    checked_size(pairs.len())?;
    debug!(?kind, left_rows = nl, right_rows = nr, output_rows = pairs.len(), "sort join");
    let (left, right) = pairs.into_iter().unzip();
    Ok(JoinIndices { left, right })
}
