//! 块压缩 / 解压（ZLIB / SNAPPY / LZ4 / ZSTD / None）
//!
//! ORC 的压缩流由若干 chunk 组成，每个 chunk 前有 3 字节小端头：
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ header = len << 1 | original │ payload (len bytes)      │
//! └──────────────────────────────┴──────────────────────────┘
//!   original = 1 → 未压缩（stored）块，原样拷贝
//! ```
//!
//! 解压分两遍：
//! 1. `scan_stream`   — 统计压缩块 / stored 块数与最大解压长度（结果回传主机）
//! 2. `decompress_streams` — 按总上界分配一块平坦输出缓冲区，填充逐块描述符，
//!    并行解压 + stored 拷贝，最后把各流的块输出压紧成连续区间

use std::ops::Range;

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::common::{EngineError, Result};
use crate::device::Stream;
use crate::orc::proto::CompressionKind;

/// chunk 头字节数
pub const BLOCK_HEADER_SIZE: usize = 3;

// ── Codec ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Zlib,
    Snappy,
    Lz4,
    Zstd,
}

impl TryFrom<CompressionKind> for Codec {
    type Error = EngineError;

    fn try_from(kind: CompressionKind) -> Result<Self> {
        match kind {
            CompressionKind::None   => Ok(Self::None),
            CompressionKind::Zlib   => Ok(Self::Zlib),
            CompressionKind::Snappy => Ok(Self::Snappy),
            CompressionKind::Lz4    => Ok(Self::Lz4),
            CompressionKind::Zstd   => Ok(Self::Zstd),
            CompressionKind::Lzo    => Err(EngineError::Unsupported("LZO compression".into())),
        }
    }
}

/// 文件级压缩描述：算法 + 块大小
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionInfo {
    pub codec:      Codec,
    pub block_size: usize,
}

impl CompressionInfo {
    pub fn none() -> Self { Self { codec: Codec::None, block_size: 0 } }

    pub fn is_compressed(&self) -> bool { self.codec != Codec::None }

    /// 单块最大压缩比，用于估算解压缓冲区
    pub fn max_ratio(&self) -> usize {
        match self.codec {
            Codec::Zlib => 1032,
            Codec::Lz4  => 255,
            Codec::None | Codec::Snappy | Codec::Zstd => usize::MAX,
        }
    }

    /// 压缩块解压后的长度上界
    fn block_bound(&self, payload: &[u8]) -> usize {
        if self.codec == Codec::Snappy {
            if let Ok(n) = snap::raw::decompress_len(payload) {
                return n.min(self.block_size);
            }
        }
        payload.len().saturating_mul(self.max_ratio()).min(self.block_size)
    }
}

// ── 单块解压原语 ──────────────────────────────────────────────────────────────

/// 解压一个块到 `dst`，返回实际写入字节数；`dst` 不足或数据损坏均报错
pub fn decompress_block(codec: Codec, src: &[u8], dst: &mut [u8]) -> Result<usize> {
    let fail = |e: &dyn std::fmt::Display| EngineError::Compression(format!("{codec:?}: {e}"));
    match codec {
        Codec::None => {
            if dst.len() < src.len() {
                return Err(fail(&"output too small"));
            }
            dst[..src.len()].copy_from_slice(src);
            Ok(src.len())
        }
        Codec::Zlib => {
            let mut inflater = flate2::Decompress::new(false);
            let status = inflater
                .decompress(src, dst, flate2::FlushDecompress::Finish)
                .map_err(|e| fail(&e))?;
            if status != flate2::Status::StreamEnd {
                return Err(fail(&"truncated deflate block or output bound exceeded"));
            }
            Ok(inflater.total_out() as usize)
        }
        Codec::Snappy => snap::raw::Decoder::new().decompress(src, dst).map_err(|e| fail(&e)),
        Codec::Lz4 => {
            let cap = i32::try_from(dst.len()).map_err(|e| fail(&e))?;
            lz4::block::decompress_to_buffer(src, Some(cap), dst).map_err(|e| fail(&e))
        }
        Codec::Zstd => zstd::bulk::decompress_to_buffer(src, dst).map_err(|e| fail(&e)),
    }
}

// ── 第一遍：扫描块头 ──────────────────────────────────────────────────────────

/// 压缩流中的一个块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDesc {
    /// 块头在流内的偏移（行索引中的"压缩位置"）
    pub header_pos: usize,
    /// payload 在流内的范围
    pub payload:    Range<usize>,
    pub stored:     bool,
    /// 解压后长度上界（stored 块即 payload 长度）
    pub max_output: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamScan {
    pub blocks:         Vec<BlockDesc>,
    pub num_compressed: usize,
    pub num_stored:     usize,
    pub max_size:       usize,
}

pub fn scan_stream(data: &[u8], info: &CompressionInfo) -> Result<StreamScan> {
    let mut scan = StreamScan::default();
    let mut pos = 0usize;
    while pos < data.len() {
        if pos + BLOCK_HEADER_SIZE > data.len() {
            return Err(EngineError::Compression(format!("truncated block header at {pos}")));
        }
        let header = u32::from(data[pos]) | u32::from(data[pos + 1]) << 8 | u32::from(data[pos + 2]) << 16;
        let len    = (header >> 1) as usize;
        let stored = header & 1 == 1;
        let start  = pos + BLOCK_HEADER_SIZE;
        if start + len > data.len() {
            return Err(EngineError::Compression(format!(
                "block of {len} bytes at {pos} overruns a {}-byte stream", data.len()
            )));
        }
        let payload = start..start + len;
        let max_output = if stored {
            scan.num_stored += 1;
            len
        } else {
            scan.num_compressed += 1;
            info.block_bound(&data[payload.clone()])
        };
        scan.max_size += max_output;
        scan.blocks.push(BlockDesc { header_pos: pos, payload, stored, max_output });
        pos = start + len;
    }
    Ok(scan)
}

// ── 第二遍：解压并重组 ────────────────────────────────────────────────────────

/// 解压后流内块的位置映射：(块头在压缩流内的偏移, 块输出在解压流内的偏移)
pub type BlockMap = Vec<(usize, usize)>;

#[derive(Debug, Default)]
pub struct DecompressedStreams {
    /// 所有流的解压数据（各流区间互不重叠、连续）
    pub data:       Vec<u8>,
    /// 与输入流一一对应的输出区间
    pub ranges:     Vec<Range<usize>>,
    pub block_maps: Vec<BlockMap>,
}

/// 每块的输入 / 输出描述（上传给解压 kernel）
#[derive(Debug, Clone)]
struct BlockJob {
    input:       Range<usize>,
    output:      Range<usize>,
    stored:      bool,
}

/// 解压 `raw` 中的若干压缩流
pub fn decompress_streams(
    raw:     &[u8],
    streams: &[Range<usize>],
    info:    &CompressionInfo,
    stream:  &Stream,
) -> Result<DecompressedStreams> {
    // 第一遍：块统计回传主机
    let scans = stream.launch("scan_compressed_blocks", || {
        streams.par_iter()
            .map(|r| scan_stream(&raw[r.clone()], info))
            .collect::<Result<Vec<_>>>()
    })?;
    let total: usize = scans.iter().map(|s| s.max_size).sum();
    let num_compressed: usize = scans.iter().map(|s| s.num_compressed).sum();
    let num_stored: usize = scans.iter().map(|s| s.num_stored).sum();
    debug!(streams = streams.len(), num_compressed, num_stored, total, "decompression pass 1");

    if streams.iter().all(|r| r.is_empty()) {
        return Ok(DecompressedStreams {
            ranges: vec![0..0; streams.len()],
            block_maps: vec![Vec::new(); streams.len()],
            ..Default::default()
        });
    }
    if total == 0 {
        return Err(EngineError::NoDecompressibleData);
    }

    // 逐块描述符：输出槽按流、按块顺序紧挨
    let mut jobs = Vec::with_capacity(num_compressed + num_stored);
    let mut cursor = 0usize;
    for (scan, r) in scans.iter().zip(streams) {
        for b in &scan.blocks {
            jobs.push(BlockJob {
                input:  r.start + b.payload.start..r.start + b.payload.end,
                output: cursor..cursor + b.max_output,
                stored: b.stored,
            });
            cursor += b.max_output;
        }
    }
    let mut out = stream.alloc::<u8>(total)?;

    let lengths = stream.launch("decompress_blocks", || {
        let mut slots: Vec<&mut [u8]> = Vec::with_capacity(jobs.len());
        let mut rest: &mut [u8] = &mut out;
        for job in &jobs {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(job.output.len());
            slots.push(head);
            rest = tail;
        }
        jobs.par_iter()
            .zip(slots.into_par_iter())
            .map(|(job, dst)| {
                let src = &raw[job.input.clone()];
                if job.stored {
                    dst.copy_from_slice(src);
                    Ok(src.len())
                } else {
                    decompress_block(info.codec, src, dst)
                }
            })
            .collect::<Result<Vec<usize>>>()
    })?;

    // 重组：把每块实际输出向前压紧，得到各流的连续区间
    let mut data = out.into_vec();
    let mut ranges = Vec::with_capacity(streams.len());
    let mut block_maps = Vec::with_capacity(streams.len());
    let mut write = 0usize;
    let mut job_idx = 0usize;
    for scan in &scans {
        let start = write;
        let mut map = Vec::with_capacity(scan.blocks.len());
        for b in &scan.blocks {
            let job = &jobs[job_idx];
            let len = lengths[job_idx];
            map.push((b.header_pos, write - start));
            data.copy_within(job.output.start..job.output.start + len, write);
            write += len;
            job_idx += 1;
        }
        ranges.push(start..write);
        block_maps.push(map);
    }
    data.truncate(write);
    trace!(decompressed = write, bound = total, "decompression pass 2");
    Ok(DecompressedStreams { data, ranges, block_maps })
}

/// 主机路径：解压一段完整的压缩数据（文件尾 / stripe footer）
pub fn decompress_host(data: &[u8], info: &CompressionInfo) -> Result<Vec<u8>> {
    if !info.is_compressed() {
        return Ok(data.to_vec());
    }
    let scan = scan_stream(data, info)?;
    let mut out = Vec::with_capacity(scan.max_size);
    for b in &scan.blocks {
        let src = &data[b.payload.clone()];
        if b.stored {
            out.extend_from_slice(src);
        } else {
            let start = out.len();
            out.resize(start + b.max_output, 0);
            let n = decompress_block(info.codec, src, &mut out[start..])?;
            out.truncate(start + n);
        }
    }
    Ok(out)
}
