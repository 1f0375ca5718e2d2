//! stripe 流目录遍历与流装配
//!
//! 每个 stripe 的 footer 按文件顺序列出所有流。遍历时累计字节偏移：
//! - 未选中列的流只跳过
//! - 选中列的流按物理类型归入固定的几种逻辑角色（每列每种角色至多一个）
//! - 同层 STRUCT 祖先的 PRESENT 流挂到每个后代列上，使 null 信息向下传递
//!
//! 映射到的字节区间合并成尽量少的读请求（按数据源提示选择设备直读或主机读再拷贝），
//! 压缩 stripe 再交给 [`crate::compression`] 两遍解压。

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use prost::Message;
use tracing::{debug, trace};

use crate::common::{verify_data, EngineError, Result};
use crate::compression::{decompress_streams, BlockMap};
use crate::device::Stream;
use crate::orc::metadata::{OrcMetadata, SelectedColumn, SelectedStripe};
use crate::orc::proto::{ColumnEncoding, RowIndex, RowIndexEntry, StreamKind, TypeKind};

// ── 流角色 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    Present   = 0,
    Data      = 1,
    /// LENGTH 或 SECONDARY
    Secondary = 2,
    DictData  = 3,
    RowIndex  = 4,
}

pub const NUM_ROLES: usize = 5;

impl StreamRole {
    pub fn of(kind: StreamKind) -> Option<Self> {
        match kind {
            StreamKind::Present                       => Some(Self::Present),
            StreamKind::Data                          => Some(Self::Data),
            StreamKind::Length | StreamKind::Secondary => Some(Self::Secondary),
            StreamKind::DictionaryData                => Some(Self::DictData),
            StreamKind::RowIndex                      => Some(Self::RowIndex),
            StreamKind::DictionaryCount
            | StreamKind::BloomFilter
            | StreamKind::BloomFilterUtf8             => None,
        }
    }
}

// ── 装配结果 ──────────────────────────────────────────────────────────────────

/// 一列在一个 stripe 内的流（区间指向 [`StripeData::data`]）
#[derive(Debug, Clone, Default)]
pub struct ColumnStreams {
    pub id:             usize,
    pub ranges:         [Option<Range<usize>>; NUM_ROLES],
    pub block_maps:     [Option<BlockMap>; NUM_ROLES],
    /// 同层 STRUCT 祖先的 PRESENT 流，最外层在前
    pub parent_present: Vec<Range<usize>>,
    pub encoding:       ColumnEncoding,
    pub dict_size:      usize,
}

impl ColumnStreams {
    pub fn range(&self, role: StreamRole) -> Option<&Range<usize>> { self.ranges[role as usize].as_ref() }

    pub fn has_present(&self) -> bool {
        self.range(StreamRole::Present).is_some_and(|r| !r.is_empty())
    }
}

#[derive(Debug, Default)]
pub struct StripeData {
    /// 解压后（或原始）的流字节
    pub data:       Vec<u8>,
    pub columns:    Vec<ColumnStreams>,
    pub row_index:  Vec<Option<RowIndex>>,
    pub compressed: bool,
}

impl StripeData {
    pub fn bytes(&self, col: usize, role: StreamRole) -> &[u8] {
        self.columns[col].range(role).map_or(&[][..], |r| &self.data[r.clone()])
    }

    /// 行索引位置 → 流内字节偏移
    pub fn seek_offset(&self, col: usize, role: StreamRole, pos: &StreamPosition) -> Result<usize> {
        if !self.compressed {
            return Ok(pos.offset);
        }
        let map = self.columns[col].block_maps[role as usize].as_ref()
            .ok_or_else(|| EngineError::Decode(format!("no block map for {role:?} stream")))?;
        let (_, start) = map.iter().find(|(header, _)| *header == pos.block)
            .ok_or_else(|| EngineError::Decode(format!("row index points inside a block at {}", pos.block)))?;
        Ok(start + pos.offset)
    }
}

enum Target {
    Column { pos: usize, role: StreamRole },
    Ancestor { id: usize },
}

struct Mapped {
    target: Target,
    file:   Range<u64>,
}

/// 读出并解压一个 stripe 中属于 `columns` 的所有流
pub fn assemble_stripe(
    meta:          &OrcMetadata,
    stripe:        &SelectedStripe,
    columns:       &[SelectedColumn],
    with_row_index: bool,
    stream:        &Stream,
) -> Result<StripeData> {
    let positions: HashMap<usize, usize> = columns.iter().enumerate().map(|(p, c)| (c.id, p)).collect();
    let ancestors: Vec<Vec<usize>> = columns.iter().map(|c| meta.struct_ancestors(c.id)).collect();
    let ancestor_set: HashSet<usize> = ancestors.iter().flatten().copied().collect();

    // 遍历流目录
    let mut mapped = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = stripe.info.start();
    for s in &stripe.footer.streams {
        let len = s.byte_len();
        let file = offset..offset + len;
        offset += len;
        let (Some(kind), col) = (s.stream_kind(), s.column_id() as usize) else { continue };
        let Some(role) = StreamRole::of(kind) else { continue };
        if let Some(&pos) = positions.get(&col) {
            if role == StreamRole::RowIndex && !with_row_index {
                continue;
            }
            verify_data!(seen.insert((pos, role)), "column {col} has two {role:?} streams");
            mapped.push(Mapped { target: Target::Column { pos, role }, file });
        } else if role == StreamRole::Present && ancestor_set.contains(&col) {
            mapped.push(Mapped { target: Target::Ancestor { id: col }, file });
        }
    }
    let stripe_end = stripe.info.start() + stripe.info.index_len() + stripe.info.data_len();
    verify_data!(offset <= stripe_end, "stream directory runs past the stripe ({offset} > {stripe_end})");

    let source = meta.source();
    let (raw, raw_ranges) = read_coalesced(source.as_ref(), &mapped, stream)?;

    let compression = meta.compression();
    let (data, ranges, block_maps) = if compression.is_compressed() {
        let out = decompress_streams(&raw, &raw_ranges, compression, stream)?;
        (out.data, out.ranges, out.block_maps.into_iter().map(Some).collect::<Vec<_>>())
    } else {
        let n = raw_ranges.len();
        (raw, raw_ranges, vec![None; n])
    };

    let mut out_cols: Vec<ColumnStreams> = columns.iter()
        .map(|c| {
            let encoding = stripe.footer.columns.get(c.id).cloned()
                .ok_or_else(|| EngineError::Decode(format!("stripe footer has no encoding for column {}", c.id)))?;
            let dict_size = encoding.dictionary_size() as usize;
            Ok(ColumnStreams { id: c.id, encoding, dict_size, ..Default::default() })
        })
        .collect::<Result<_>>()?;
    let mut ancestor_present: HashMap<usize, Range<usize>> = HashMap::new();
    for ((m, range), map) in mapped.iter().zip(ranges).zip(block_maps) {
        match m.target {
            Target::Column { pos, role } => {
                // 被选中的 STRUCT 的 PRESENT 同时是其字段的祖先掩码
                let id = out_cols[pos].id;
                if role == StreamRole::Present && ancestor_set.contains(&id) {
                    ancestor_present.insert(id, range.clone());
                }
                out_cols[pos].ranges[role as usize] = Some(range);
                out_cols[pos].block_maps[role as usize] = map;
            }
            Target::Ancestor { id } => { ancestor_present.insert(id, range); }
        }
    }
    for (col, chain) in out_cols.iter_mut().zip(&ancestors) {
        col.parent_present = chain.iter().filter_map(|a| ancestor_present.get(a).cloned()).collect();
    }

    let row_index = if with_row_index {
        out_cols.iter()
            .map(|c| c.range(StreamRole::RowIndex)
                .map(|r| RowIndex::decode(&data[r.clone()]))
                .transpose()
                .map_err(EngineError::from))
            .collect::<Result<_>>()?
    } else {
        vec![None; out_cols.len()]
    };

    trace!(
        stripe = stripe.stripe_idx,
        source = stripe.source_idx,
        streams = mapped.len(),
        bytes = data.len(),
        "assembled stripe streams"
    );
    Ok(StripeData { data, columns: out_cols, row_index, compressed: compression.is_compressed() })
}

/// 把相邻的字节区间合并成读请求；返回拼接后的缓冲区和每个流在其中的区间
fn read_coalesced(
    source: &dyn crate::orc::source::DataSource,
    mapped: &[Mapped],
    stream: &Stream,
) -> Result<(Vec<u8>, Vec<Range<usize>>)> {
    let mut requests: Vec<Range<u64>> = Vec::new();
    for m in mapped {
        match requests.last_mut() {
            Some(last) if last.end == m.file.start => last.end = m.file.end,
            _ => requests.push(m.file.clone()),
        }
    }

    let total: usize = requests.iter().map(|r| (r.end - r.start) as usize).sum();
    let mut raw = stream.alloc::<u8>(total)?;
    let mut request_starts = Vec::with_capacity(requests.len());
    let mut cursor = 0usize;
    let mut direct = 0usize;
    for r in &requests {
        let len = (r.end - r.start) as usize;
        request_starts.push(cursor);
        let dest = &mut raw[cursor..cursor + len];
        if source.is_device_read_preferred(len) {
            let n = source.device_read(r.start, dest, stream)?;
            verify_data!(n == len, "short device read: {n} of {len} bytes");
            direct += 1;
        } else {
            let host = source.host_read(r.start, len)?;
            verify_data!(host.len() == len, "short host read: {} of {len} bytes", host.len());
            let staged = stream.upload(&host)?;
            dest.copy_from_slice(&staged);
        }
        cursor += len;
    }
    debug!(streams = mapped.len(), requests = requests.len(), direct, bytes = total, "coalesced stripe reads");

    // 每个流落在某个请求内部
    let mut ranges = Vec::with_capacity(mapped.len());
    let mut req = 0usize;
    for m in mapped {
        while requests[req].end < m.file.end || requests[req].start > m.file.start {
            req += 1;
        }
        let start = request_starts[req] + (m.file.start - requests[req].start) as usize;
        ranges.push(start..start + (m.file.end - m.file.start) as usize);
    }
    Ok((raw.into_vec(), ranges))
}

// ── 行索引位置 ────────────────────────────────────────────────────────────────

/// 行组起点在一个流中的位置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPosition {
    /// 压缩块头在流内的偏移（未压缩时为 0）
    pub block:  usize,
    /// 块内（或流内）的字节偏移
    pub offset: usize,
    /// 当前 run 内已消费的值个数
    pub values: usize,
    /// 布尔流：当前字节内已消费的位数
    pub bits:   usize,
}

/// 各流在一个行索引条目中占用的位置个数（不含压缩块偏移），按记录顺序
pub fn index_plan(kind: TypeKind, dictionary: bool) -> Vec<(StreamRole, usize)> {
    use StreamRole::{Data, Secondary};
    match kind {
        TypeKind::Boolean => vec![(Data, 3)],
        TypeKind::Byte | TypeKind::Short | TypeKind::Int | TypeKind::Long | TypeKind::Date => vec![(Data, 2)],
        TypeKind::Float | TypeKind::Double => vec![(Data, 1)],
        TypeKind::String | TypeKind::Varchar | TypeKind::Char | TypeKind::Binary => {
            if dictionary { vec![(Data, 2)] } else { vec![(Data, 1), (Secondary, 2)] }
        }
        TypeKind::Timestamp | TypeKind::TimestampInstant => vec![(Data, 2), (Secondary, 2)],
        TypeKind::Decimal => vec![(Data, 1), (Secondary, 2)],
        TypeKind::List => vec![(Secondary, 2)],
        TypeKind::Struct | TypeKind::Map | TypeKind::Union => Vec::new(),
    }
}

/// 按 `plan` 切分一个行索引条目
pub fn row_group_positions(
    entry:       &RowIndexEntry,
    has_present: bool,
    plan:        &[(StreamRole, usize)],
    compressed:  bool,
) -> Result<Vec<(StreamRole, StreamPosition)>> {
    let lead = usize::from(compressed);
    let mut out = Vec::with_capacity(plan.len() + 1);
    let mut p = entry.positions.iter().map(|&v| v as usize);
    let present = has_present.then_some((StreamRole::Present, 3));
    for (role, n) in present.into_iter().chain(plan.iter().copied()) {
        let vals: Vec<usize> = p.by_ref().take(lead + n).collect();
        verify_data!(vals.len() == lead + n, "row index entry too short for {role:?}");
        let at = |i: usize| vals.get(lead + i).copied().unwrap_or(0);
        out.push((role, StreamPosition {
            block:  if compressed { vals[0] } else { 0 },
            offset: at(0),
            values: if n > 1 { at(1) } else { 0 },
            bits:   if n > 2 { at(2) } else { 0 },
        }));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kinds_have_no_role() {
        assert_eq!(StreamRole::of(StreamKind::Length), Some(StreamRole::Secondary));
        assert_eq!(StreamRole::of(StreamKind::BloomFilterUtf8), None);
    }

    #[test]
    fn positions_split_per_stream() {
        // 压缩：PRESENT(块, 偏移, run, 位) + DATA(块, 偏移, run)
        let entry = RowIndexEntry { positions: vec![0, 10, 2, 3, 17, 40, 5] };
        let plan = index_plan(TypeKind::Int, false);
        let pos = row_group_positions(&entry, true, &plan, true).unwrap();
        assert_eq!(pos[0], (StreamRole::Present, StreamPosition { block: 0, offset: 10, values: 2, bits: 3 }));
        assert_eq!(pos[1], (StreamRole::Data, StreamPosition { block: 17, offset: 40, values: 5, bits: 0 }));

        let short = RowIndexEntry { positions: vec![1] };
        assert!(row_group_positions(&short, false, &plan, false).is_err());
    }

    #[test]
    fn direct_strings_index_data_then_lengths() {
        let plan = index_plan(TypeKind::String, false);
        assert_eq!(plan, vec![(StreamRole::Data, 1), (StreamRole::Secondary, 2)]);
        let entry = RowIndexEntry { positions: vec![100, 7, 1] };
        let pos = row_group_positions(&entry, false, &plan, false).unwrap();
        assert_eq!(pos[0].1.offset, 100);
        assert_eq!(pos[1].1, StreamPosition { block: 0, offset: 7, values: 1, bits: 0 });
    }
}
