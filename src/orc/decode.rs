//! 单层列解码
//!
//! 同一嵌套层的每一列对应一个 [`ColumnBuilder`]，按 stripe 顺序消费描述符：
//! ```text
//!   pass 1  decode_presence  — 祖先 PRESENT + 自身 PRESENT → 有效位；字典串
//!   pass 2  decode_values    — 按类型解码有效行的值，散布到输出缓冲区
//!   finalize                 — LIST 行内子数 → 偏移（前缀和）；子行统计
//! ```
//! 描述符的 `skip` 行在 stripe 开头（或行组起点）解码后丢弃。

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::bitmask::Bitmask;
use crate::column::Buffer;
use crate::common::{verify_data, EngineError, Result};
use crate::orc::metadata::{OrcMetadata, SchemaNode, SelectedColumn};
use crate::orc::proto::TypeKind;
use crate::orc::reader::ReaderOptions;
use crate::orc::rle::{BooleanRleDecoder, ByteCursor, ByteRleDecoder, IntRleDecoder, RleVersion, read_varint_i128};
use crate::orc::stream::{ColumnStreams, StreamPosition, StreamRole, StripeData};
use crate::orc::timezone::TimezoneTable;
use crate::types::{DType, TimeUnit};

/// ORC 时间戳基准 2015-01-01 00:00:00 相对 Unix 纪元的秒数
pub const ORC_UTC_EPOCH: i64 = 1_420_070_400;

const MAX_DECIMAL64_PRECISION: u32 = 18;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

// ── 列规格 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub id:           usize,
    pub kind:         TypeKind,
    pub dtype:        DType,
    /// DECIMAL 的 schema scale
    pub scale:        u32,
    pub num_children: usize,
}

pub fn column_spec(meta: &OrcMetadata, col: &SelectedColumn, opts: &ReaderOptions) -> Result<ColumnSpec> {
    let (kind, dtype, scale) = match meta.node(col.id) {
        SchemaNode::List { .. } => (TypeKind::List, DType::List, 0),
        SchemaNode::Struct { .. } => (TypeKind::Struct, DType::Struct, 0),
        SchemaNode::Unsupported { kind } => {
            return Err(EngineError::Unsupported(format!("ORC {kind:?} column {}", meta.field_name(col.id))));
        }
        &SchemaNode::Primitive { kind, precision, scale } => {
            let dtype = match kind {
                TypeKind::Boolean => DType::Bool8,
                TypeKind::Byte    => DType::Int8,
                TypeKind::Short   => DType::Int16,
                TypeKind::Int     => DType::Int32,
                TypeKind::Long    => DType::Int64,
                TypeKind::Float   => DType::Float32,
                TypeKind::Double  => DType::Float64,
                TypeKind::String | TypeKind::Varchar | TypeKind::Char | TypeKind::Binary => DType::String,
                TypeKind::Timestamp | TypeKind::TimestampInstant => DType::Timestamp(opts.timestamp_unit),
                TypeKind::Date if opts.use_np_dtypes => DType::Timestamp(TimeUnit::Millisecond),
                TypeKind::Date    => DType::Date32,
                TypeKind::Decimal if opts.decimals_as_float64 => DType::Float64,
                TypeKind::Decimal => {
                    if precision > MAX_DECIMAL64_PRECISION {
                        return Err(EngineError::DecimalOverflow { precision });
                    }
                    DType::Decimal64 { scale: -(scale as i32) }
                }
                TypeKind::List | TypeKind::Struct | TypeKind::Map | TypeKind::Union => {
                    return Err(EngineError::Decode(format!("column {} is nested but stored as primitive", col.id)));
                }
            };
            (kind, dtype, scale)
        }
    };
    Ok(ColumnSpec { id: col.id, kind, dtype, scale, num_children: col.num_children })
}

// ── 描述符 ────────────────────────────────────────────────────────────────────

/// 一列在一个 stripe 中的行区间
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowRange {
    /// stripe 内先解码再丢弃的行数
    pub skip:  usize,
    pub num:   usize,
    /// 输出中的起始行
    pub start: usize,
}

/// 行索引定位：各流的起点 + 行组起点之后还要丢弃的行数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowGroupSeek {
    pub positions: Vec<(StreamRole, StreamPosition)>,
    pub residual:  usize,
}

/// (stripe, 列) 描述符
#[derive(Debug, Clone, Copy)]
pub struct ColumnDesc<'a> {
    pub stripe:    &'a StripeData,
    /// 列在本层选择中的位置
    pub col:       usize,
    pub rows:      RowRange,
    pub seek:      Option<&'a RowGroupSeek>,
    /// 本 stripe 字典在列级全局字典中的起点
    pub dict_base: usize,
    pub timezone:  Option<&'a TimezoneTable>,
}

impl<'a> ColumnDesc<'a> {
    fn streams(&self) -> &'a ColumnStreams { &self.stripe.columns[self.col] }

    /// 解码后要丢弃的前导行数
    fn lead(&self) -> usize { self.seek.map_or(self.rows.skip, |s| s.residual) }

    fn rows_to_decode(&self) -> usize { self.lead() + self.rows.num }

    fn version(&self) -> RleVersion {
        if self.streams().encoding.is_v2() { RleVersion::V2 } else { RleVersion::V1 }
    }

    /// 流字节（已按行索引定位）+ run 内要跳过的值个数 + 位数
    fn stream(&self, role: StreamRole) -> Result<(&'a [u8], usize, usize)> {
        let data = self.stripe.bytes(self.col, role);
        let pos = self.seek.and_then(|s| s.positions.iter().find(|(r, _)| *r == role).map(|(_, p)| p));
        match pos {
            Some(p) => {
                let start = self.stripe.seek_offset(self.col, role, p)?;
                verify_data!(start <= data.len(), "row index offset {start} past a {}-byte stream", data.len());
                Ok((&data[start..], p.values, p.bits))
            }
            None => Ok((data, 0, 0)),
        }
    }

    fn ints(&self, role: StreamRole, signed: bool, n: usize) -> Result<Vec<i64>> {
        let (bytes, values, _) = self.stream(role)?;
        let mut dec = IntRleDecoder::new(bytes, self.version(), signed);
        dec.skip(values)?;
        let mut out = Vec::with_capacity(n);
        dec.decode(&mut out, n)?;
        Ok(out)
    }

    fn bools(&self, role: StreamRole) -> Result<BooleanRleDecoder<'a>> {
        let (bytes, values, bits) = self.stream(role)?;
        let mut dec = BooleanRleDecoder::new(bytes);
        dec.skip(values * 8 + bits)?;
        Ok(dec)
    }

    fn raw(&self, role: StreamRole) -> Result<&'a [u8]> { self.stream(role).map(|(b, _, _)| b) }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// 一层内一列的两遍解码状态
#[derive(Debug)]
pub struct ColumnBuilder {
    spec:         ColumnSpec,
    rows:         usize,
    nullable:     bool,
    valid:        Bitmask,
    data:         Buffer,
    dict_offsets: Vec<usize>,
    dict_chars:   Vec<u8>,
    list_counts:  Vec<i64>,
    child_rows:   Vec<usize>,
    child_skips:  Vec<usize>,
    decoded:      usize,
    /// pass 1 的逐描述符有效位（None = 全部有效）
    presence:     Vec<Option<Vec<bool>>>,
}

/// 一列解码完成后的结果
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedColumn {
    pub spec:         ColumnSpec,
    pub rows:         usize,
    pub data:         Buffer,
    pub null_mask:    Option<Bitmask>,
    /// LIST：长度 rows + 1 的偏移
    pub list_offsets: Option<Vec<i32>>,
    /// LIST：每个 stripe 输出的子行数
    pub child_rows:   Vec<usize>,
    /// LIST：每个 stripe 因跳行而跳过的子行数
    pub child_skips:  Vec<usize>,
}

impl ColumnBuilder {
    /// `nullable`：任一 stripe 中该列（或其同层祖先）有非空 PRESENT 流
    pub fn new(spec: ColumnSpec, rows: usize, nullable: bool) -> Self {
        let data = Buffer::with_capacity(spec.dtype, rows);
        let list_counts = if spec.kind == TypeKind::List { Vec::with_capacity(rows + 1) } else { Vec::new() };
        Self {
            spec, rows, nullable,
            valid: Bitmask::with_capacity(if nullable { rows } else { 0 }),
            data,
            dict_offsets: vec![0],
            dict_chars: Vec::new(),
            list_counts,
            child_rows: Vec::new(),
            child_skips: Vec::new(),
            decoded: 0,
            presence: Vec::new(),
        }
    }

    pub fn spec(&self) -> &ColumnSpec { &self.spec }

    /// pass 1：有效位与字典
    pub fn decode_presence(&mut self, descs: &[ColumnDesc<'_>]) -> Result<()> {
        self.presence.clear();
        for d in descs {
            let validity = decode_validity(d)?;
            if self.nullable {
                let lead = d.lead();
                match &validity {
                    Some(v) => v[lead..].iter().for_each(|&b| self.valid.push(b)),
                    None => (0..d.rows.num).for_each(|_| self.valid.push(true)),
                }
            }
            self.presence.push(validity);
            if is_string(self.spec.kind) && d.streams().encoding.is_dictionary() {
                self.load_dictionary(d)?;
            }
        }
        Ok(())
    }

    fn load_dictionary(&mut self, d: &ColumnDesc<'_>) -> Result<()> {
        let entries = self.dict_offsets.len() - 1;
        verify_data!(entries == d.dict_base, "dictionary base {} but {entries} entries loaded", d.dict_base);
        let size = d.streams().dict_size;
        let mut lengths = Vec::with_capacity(size);
        IntRleDecoder::new(d.stripe.bytes(d.col, StreamRole::Secondary), d.version(), false)
            .decode(&mut lengths, size)?;
        let chars = d.stripe.bytes(d.col, StreamRole::DictData);
        let mut at = 0usize;
        for len in lengths {
            let end = string_end(at, len, chars.len())?;
            self.dict_chars.extend_from_slice(&chars[at..end]);
            self.dict_offsets.push(self.dict_chars.len());
            at = end;
        }
        Ok(())
    }

    fn dictionary_entry(&self, idx: usize) -> Result<Range<usize>> {
        verify_data!(idx + 1 < self.dict_offsets.len(), "dictionary code {idx} out of range");
        Ok(self.dict_offsets[idx]..self.dict_offsets[idx + 1])
    }

    /// pass 2：值
    pub fn decode_values(&mut self, descs: &[ColumnDesc<'_>]) -> Result<()> {
        verify_data!(self.presence.len() == descs.len(), "value pass before presence pass");
        let presence = std::mem::take(&mut self.presence);
        for (d, valid) in descs.iter().zip(&presence) {
            verify_data!(
                d.rows.start == self.decoded,
                "stripe rows start at {} but {} rows decoded", d.rows.start, self.decoded
            );
            let valid = valid.as_deref();
            let n = d.rows_to_decode();
            let n_valid = valid.map_or(n, |v| v.iter().filter(|&&b| b).count());
            match self.spec.kind {
                TypeKind::List   => self.decode_list(d, valid, n_valid)?,
                TypeKind::Struct => {}
                _ => {
                    let values = self.decode_primitive(d, n_valid)?;
                    verify_data!(values.len() == n_valid, "decoded {} of {n_valid} values", values.len());
                    scatter(&mut self.data, &values, valid, d.lead(), n)?;
                }
            }
            self.decoded += d.rows.num;
        }
        trace!(column = self.spec.id, rows = self.decoded, "decoded column values");
        Ok(())
    }

    fn decode_list(&mut self, d: &ColumnDesc<'_>, valid: Option<&[bool]>, n_valid: usize) -> Result<()> {
        let lengths = d.ints(StreamRole::Secondary, false, n_valid)?;
        let mut it = lengths.into_iter();
        let (mut skipped, mut kept) = (0usize, 0usize);
        for row in 0..d.rows_to_decode() {
            let count = match valid {
                Some(v) if !v[row] => 0,
                _ => it.next().ok_or_else(|| EngineError::Decode("list lengths exhausted".into()))?,
            };
            verify_data!(count >= 0, "negative list length {count}");
            if row < d.lead() {
                skipped += count as usize;
            } else {
                kept += count as usize;
                self.list_counts.push(count);
            }
        }
        self.child_rows.push(kept);
        self.child_skips.push(skipped);
        Ok(())
    }

    fn decode_primitive(&self, d: &ColumnDesc<'_>, n: usize) -> Result<Buffer> {
        Ok(match self.spec.kind {
            TypeKind::Boolean => {
                let mut dec = d.bools(StreamRole::Data)?;
                Buffer::U8((0..n).map(|_| dec.next().map(u8::from)).collect::<Result<_>>()?)
            }
            TypeKind::Byte => {
                let (bytes, values, _) = d.stream(StreamRole::Data)?;
                let mut dec = ByteRleDecoder::new(bytes);
                dec.skip(values)?;
                let mut out = Vec::with_capacity(n);
                dec.decode(&mut out, n)?;
                Buffer::I8(out.into_iter().map(|b| b as i8).collect())
            }
            TypeKind::Short => Buffer::I16(d.ints(StreamRole::Data, true, n)?.into_iter().map(|v| v as i16).collect()),
            TypeKind::Int   => Buffer::I32(d.ints(StreamRole::Data, true, n)?.into_iter().map(|v| v as i32).collect()),
            TypeKind::Long  => Buffer::I64(d.ints(StreamRole::Data, true, n)?),
            TypeKind::Date  => {
                let days = d.ints(StreamRole::Data, true, n)?;
                match self.spec.dtype {
                    DType::Timestamp(unit) => {
                        let per_day = 86_400 * unit.ticks_per_second();
                        let ticks = days.into_iter()
                            .map(|v| v.checked_mul(per_day)
                                .ok_or_else(|| EngineError::Decode(format!("date {v} overflows {unit:?} ticks"))))
                            .collect::<Result<_>>()?;
                        Buffer::I64(ticks)
                    }
                    _ => Buffer::I32(days.into_iter().map(|v| v as i32).collect()),
                }
            }
            TypeKind::Float => {
                let raw = d.raw(StreamRole::Data)?;
                verify_data!(raw.len() >= n * 4, "float stream holds {} bytes for {n} values", raw.len());
                Buffer::F32(raw.chunks_exact(4).take(n).map(LittleEndian::read_f32).collect())
            }
            TypeKind::Double => {
                let raw = d.raw(StreamRole::Data)?;
                verify_data!(raw.len() >= n * 8, "double stream holds {} bytes for {n} values", raw.len());
                Buffer::F64(raw.chunks_exact(8).take(n).map(LittleEndian::read_f64).collect())
            }
            TypeKind::String | TypeKind::Varchar | TypeKind::Char | TypeKind::Binary => self.decode_strings(d, n)?,
            TypeKind::Timestamp | TypeKind::TimestampInstant => self.decode_timestamps(d, n)?,
            TypeKind::Decimal => self.decode_decimals(d, n)?,
            TypeKind::List | TypeKind::Struct | TypeKind::Map | TypeKind::Union => Buffer::Empty,
        })
    }

    fn decode_strings(&self, d: &ColumnDesc<'_>, n: usize) -> Result<Buffer> {
        let mut offsets = Vec::with_capacity(n + 1);
        let mut chars = Vec::new();
        offsets.push(0i32);
        if d.streams().encoding.is_dictionary() {
            let size = d.streams().dict_size;
            for code in d.ints(StreamRole::Data, false, n)? {
                let code = code as usize;
                verify_data!(code < size, "dictionary code {code} >= dictionary size {size}");
                let r = self.dictionary_entry(d.dict_base + code)?;
                chars.extend_from_slice(&self.dict_chars[r]);
                offsets.push(chars.len() as i32);
            }
        } else {
            let lengths = d.ints(StreamRole::Secondary, false, n)?;
            let data = d.raw(StreamRole::Data)?;
            let mut at = 0usize;
            for len in lengths {
                let end = string_end(at, len, data.len())?;
                chars.extend_from_slice(&data[at..end]);
                offsets.push(chars.len() as i32);
                at = end;
            }
        }
        verify_data!(chars.len() <= i32::MAX as usize, "string column exceeds the offset width");
        Ok(Buffer::Str { offsets, chars })
    }

    fn decode_timestamps(&self, d: &ColumnDesc<'_>, n: usize) -> Result<Buffer> {
        let DType::Timestamp(unit) = self.spec.dtype else {
            return Err(EngineError::Decode("timestamp column with non-timestamp output".into()));
        };
        let seconds = d.ints(StreamRole::Data, true, n)?;
        let nanos = d.ints(StreamRole::Secondary, false, n)?;
        let tz = if self.spec.kind == TypeKind::Timestamp { d.timezone } else { None };
        let ticks = unit.ticks_per_second();
        let out = seconds.into_iter().zip(nanos)
            .map(|(s, ns)| {
                let nanos = decode_nanos(ns as u64)
                    .ok_or_else(|| EngineError::Decode(format!("timestamp nanos {ns:#x} out of range")))?;
                timestamp_ticks(s, nanos, tz, ticks)
                    .ok_or_else(|| EngineError::Decode(format!("timestamp {s}s overflows {unit:?} ticks")))
            })
            .collect::<Result<_>>()?;
        Ok(Buffer::I64(out))
    }

    fn decode_decimals(&self, d: &ColumnDesc<'_>, n: usize) -> Result<Buffer> {
        let mut cur = ByteCursor::new(d.raw(StreamRole::Data)?);
        let scales = d.ints(StreamRole::Secondary, true, n)?;
        let as_float = self.spec.dtype == DType::Float64;
        let target = i64::from(self.spec.scale);
        if as_float {
            let mut out = Vec::with_capacity(n);
            for s in scales {
                let v = read_varint_i128(&mut cur)?;
                out.push(v as f64 / 10f64.powi(s as i32));
            }
            return Ok(Buffer::F64(out));
        }
        let mut out = Vec::with_capacity(n);
        for s in scales {
            let v = read_varint_i128(&mut cur)?;
            let rescaled = rescale_decimal(v, s, target)
                .ok_or_else(|| EngineError::Decode(format!("decimal {v}e-{s} overflows 64 bits at scale {target}")))?;
            out.push(rescaled);
        }
        Ok(Buffer::I64(out))
    }

    pub fn finalize(self) -> Result<DecodedColumn> {
        let rows = match self.spec.kind {
            TypeKind::List => self.list_counts.len(),
            TypeKind::Struct => self.decoded,
            _ => self.data.len(),
        };
        verify_data!(rows == self.rows, "column {} decoded {rows} of {} rows", self.spec.id, self.rows);
        let null_mask = self.nullable.then_some(self.valid);
        if let Some(m) = &null_mask {
            verify_data!(m.len() == rows, "validity covers {} of {rows} rows", m.len());
        }
        let list_offsets = if self.spec.kind == TypeKind::List {
            let mut offsets = Vec::with_capacity(rows + 1);
            let mut acc = 0i64;
            offsets.push(0i32);
            for c in &self.list_counts {
                acc += c;
                offsets.push(i32::try_from(acc).map_err(|_| EngineError::Decode("list offsets exceed i32".into()))?);
            }
            Some(offsets)
        } else {
            None
        };
        Ok(DecodedColumn {
            spec: self.spec,
            rows,
            data: self.data,
            null_mask,
            list_offsets,
            child_rows: self.child_rows,
            child_skips: self.child_skips,
        })
    }
}

fn is_string(kind: TypeKind) -> bool {
    matches!(kind, TypeKind::String | TypeKind::Varchar | TypeKind::Char | TypeKind::Binary)
}

/// 祖先 PRESENT 逐层展开，再叠加自身 PRESENT；全部有效时返回 None
fn decode_validity(d: &ColumnDesc<'_>) -> Result<Option<Vec<bool>>> {
    let streams = d.streams();
    if streams.parent_present.is_empty() && !streams.has_present() {
        return Ok(None);
    }
    let mut live = vec![true; d.rows_to_decode()];
    for r in &streams.parent_present {
        let mut dec = BooleanRleDecoder::new(&d.stripe.data[r.clone()]);
        for v in live.iter_mut().filter(|v| **v) {
            *v = dec.next()?;
        }
    }
    if streams.has_present() {
        let mut dec = d.bools(StreamRole::Present)?;
        for v in live.iter_mut().filter(|v| **v) {
            *v = dec.next()?;
        }
    }
    Ok(Some(live))
}

/// 把 `values`（仅有效行）散布成 `n` 行，丢弃前 `lead` 行
fn scatter(dst: &mut Buffer, values: &Buffer, valid: Option<&[bool]>, lead: usize, n: usize) -> Result<()> {
    let mut next = 0usize;
    for row in 0..n {
        let is_valid = valid.map_or(true, |v| v[row]);
        if row < lead {
            next += usize::from(is_valid);
            continue;
        }
        if is_valid {
            dst.push_from(values, next)?;
            next += 1;
        } else {
            dst.push_default();
        }
    }
    Ok(())
}

/// SECONDARY 流中的纳秒：低 3 位是被压缩掉的末尾零个数（z ≠ 0 时为 z + 1 个）
///
/// 结果不在 `[0, 10^9)` 内时返回 `None`。
pub fn decode_nanos(v: u64) -> Option<i64> {
    let zeros = (v & 7) as u32;
    let n = i64::try_from(v >> 3).ok()?;
    let nanos = if zeros == 0 { n } else { n.checked_mul(10i64.pow(zeros + 1))? };
    (nanos < NANOS_PER_SECOND).then_some(nanos)
}

/// ORC 时间戳（相对 2015 纪元的秒 + 纳秒）转换为目标单位的 UTC tick 数
pub fn timestamp_ticks(orc_secs: i64, nanos: i64, tz: Option<&TimezoneTable>, ticks: i64) -> Option<i64> {
    let mut secs = orc_secs.checked_add(ORC_UTC_EPOCH)?;
    if secs < 0 && nanos != 0 {
        secs = secs.checked_sub(1)?;
    }
    if let Some(tz) = tz {
        secs = tz.to_utc(secs)?;
    }
    secs.checked_mul(ticks)?.checked_add(nanos / (NANOS_PER_SECOND / ticks))
}

/// 长度流中的一项：返回字符区间终点，越界时报错
fn string_end(at: usize, len: i64, limit: usize) -> Result<usize> {
    usize::try_from(len).ok()
        .and_then(|l| at.checked_add(l))
        .filter(|&end| end <= limit)
        .ok_or_else(|| EngineError::Decode(format!("string of {len} bytes at {at} overruns {limit} bytes")))
}

/// 把 `v × 10^-from` 调整到 `to` 位小数
pub fn rescale_decimal(v: i128, from: i64, to: i64) -> Option<i64> {
    let diff = to - from;
    let scaled = if diff >= 0 {
        v.checked_mul(10i128.checked_pow(u32::try_from(diff).ok()?)?)?
    } else {
        v / 10i128.checked_pow(u32::try_from(-diff).ok()?)?
    };
    i64::try_from(scaled).ok()
}

// ── 子行聚合 ──────────────────────────────────────────────────────────────────

/// 下一层一列的行参数（来自其父 LIST）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildRows {
    pub total:            usize,
    pub per_stripe:       Vec<usize>,
    pub start_per_stripe: Vec<usize>,
    pub skipped_per_stripe: Vec<usize>,
}

impl ChildRows {
    pub fn row_range(&self, stripe: usize) -> RowRange {
        RowRange {
            skip:  self.skipped_per_stripe[stripe],
            num:   self.per_stripe[stripe],
            start: self.start_per_stripe[stripe],
        }
    }
}

/// 把每个 LIST 列的逐 stripe 子行数分发给它在下一层的 `num_children` 列
pub fn aggregate_child_rows(parents: &[DecodedColumn], num_stripes: usize) -> Result<Vec<ChildRows>> {
    let mut out = Vec::new();
    for col in parents.iter().filter(|c| c.spec.num_children > 0) {
        verify_data!(
            col.child_rows.len() == num_stripes,
            "list column {} has child counts for {} of {num_stripes} stripes", col.spec.id, col.child_rows.len()
        );
        let mut start = 0usize;
        let mut starts = Vec::with_capacity(num_stripes);
        for &n in &col.child_rows {
            starts.push(start);
            start += n;
        }
        let rows = ChildRows {
            total: start,
            per_stripe: col.child_rows.clone(),
            start_per_stripe: starts,
            skipped_per_stripe: col.child_skips.clone(),
        };
        out.extend(std::iter::repeat(rows).take(col.spec.num_children));
    }
    Ok(out)
}
