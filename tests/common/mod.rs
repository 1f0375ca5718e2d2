//! 测试用 ORC 文件构造器：RLE v1 编码、可选块压缩、prost 编码的文件尾

#![allow(dead_code)]

use std::io::Write;

use olap_gpu_engine::orc::proto::{
    ColumnEncoding, CompressionKind, EncodingKind, Footer, PostScript, RowIndex, RowIndexEntry, Stream,
    StreamKind, StripeFooter, StripeInformation, Type, TypeKind, UserMetadataItem,
};
use prost::Message;

// ── 编码原语 ──────────────────────────────────────────────────────────────────

pub fn uvarint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push(v as u8 | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn zigzag(v: i64) -> u64 { ((v << 1) ^ (v >> 63)) as u64 }

/// 整数 RLE v1，只用 literal 组
pub fn int_rle(values: &[i64], signed: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in values.chunks(128) {
        out.push((-(chunk.len() as i32)) as u8);
        for &v in chunk {
            uvarint(&mut out, if signed { zigzag(v) } else { v as u64 });
        }
    }
    out
}

pub fn byte_rle(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in bytes.chunks(128) {
        out.push((256 - chunk.len()) as u8);
        out.extend_from_slice(chunk);
    }
    out
}

/// 按字节高位在前打包，再做字节 RLE
pub fn bool_rle(bits: &[bool]) -> Vec<u8> {
    let packed: Vec<u8> = bits.chunks(8)
        .map(|c| c.iter().enumerate().fold(0u8, |acc, (i, &b)| acc | (u8::from(b) << (7 - i))))
        .collect();
    byte_rle(&packed)
}

pub fn decimal_varint(out: &mut Vec<u8>, v: i128) {
    let mut z = ((v << 1) ^ (v >> 127)) as u128;
    while z >= 0x80 {
        out.push(z as u8 | 0x80);
        z >>= 7;
    }
    out.push(z as u8);
}

// ── 压缩 ──────────────────────────────────────────────────────────────────────

fn block_header(len: usize, stored: bool) -> [u8; 3] {
    let v = (len as u32) << 1 | u32::from(stored);
    [v as u8, (v >> 8) as u8, (v >> 16) as u8]
}

fn compress_block(kind: CompressionKind, data: &[u8]) -> Vec<u8> {
    match kind {
        CompressionKind::Zlib => {
            let mut enc = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        }
        CompressionKind::Snappy => snap::raw::Encoder::new().compress_vec(data).unwrap(),
        CompressionKind::Lz4 => lz4::block::compress(data, None, false).unwrap(),
        CompressionKind::Zstd => zstd::bulk::compress(data, 0).unwrap(),
        CompressionKind::None | CompressionKind::Lzo => data.to_vec(),
    }
}

/// 按块切分并加 3 字节块头；压缩无收益的块存为 stored
pub fn compress_stream(kind: CompressionKind, block_size: usize, data: &[u8], force_stored: bool) -> Vec<u8> {
    if kind == CompressionKind::None {
        return data.to_vec();
    }
    let mut out = Vec::new();
    for chunk in data.chunks(block_size) {
        let packed = compress_block(kind, chunk);
        if force_stored || packed.len() >= chunk.len() {
            out.extend_from_slice(&block_header(chunk.len(), true));
            out.extend_from_slice(chunk);
        } else {
            out.extend_from_slice(&block_header(packed.len(), false));
            out.extend_from_slice(&packed);
        }
    }
    out
}

// ── Schema ────────────────────────────────────────────────────────────────────

pub fn primitive(kind: TypeKind) -> Type {
    Type { kind: Some(kind as i32), ..Default::default() }
}

pub fn decimal(precision: u32, scale: u32) -> Type {
    Type { kind: Some(TypeKind::Decimal as i32), precision: Some(precision), scale: Some(scale), ..Default::default() }
}

pub fn list(element: u32) -> Type {
    Type { kind: Some(TypeKind::List as i32), subtypes: vec![element], ..Default::default() }
}

pub fn structure(fields: &[(u32, &str)]) -> Type {
    Type {
        kind: Some(TypeKind::Struct as i32),
        subtypes: fields.iter().map(|(id, _)| *id).collect(),
        field_names: fields.iter().map(|(_, n)| n.to_string()).collect(),
        ..Default::default()
    }
}

// ── Stripe ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct StripeBuilder {
    rows:      u64,
    index:     Vec<(u32, Vec<u8>)>,
    streams:   Vec<(StreamKind, u32, Vec<u8>)>,
    encodings: Vec<(u32, EncodingKind, u32)>,
    timezone:  Option<String>,
}

impl StripeBuilder {
    pub fn new(rows: usize) -> Self { Self { rows: rows as u64, ..Default::default() } }

    pub fn stream(mut self, kind: StreamKind, col: u32, bytes: Vec<u8>) -> Self {
        self.streams.push((kind, col, bytes));
        self
    }

    pub fn encoding(mut self, col: u32, kind: EncodingKind, dict_size: u32) -> Self {
        self.encodings.push((col, kind, dict_size));
        self
    }

    pub fn row_index(mut self, col: u32, entries: Vec<Vec<u64>>) -> Self {
        let index = RowIndex { entry: entries.into_iter().map(|positions| RowIndexEntry { positions }).collect() };
        self.index.push((col, index.encode_to_vec()));
        self
    }

    pub fn writer_timezone(mut self, name: &str) -> Self {
        self.timezone = Some(name.to_string());
        self
    }

    fn present(self, col: u32, valid: &[bool]) -> Self {
        if valid.iter().all(|&v| v) { self } else { self.stream(StreamKind::Present, col, bool_rle(valid)) }
    }

    pub fn ints(self, col: u32, values: &[Option<i64>]) -> Self {
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        let data: Vec<i64> = values.iter().flatten().copied().collect();
        self.present(col, &valid).stream(StreamKind::Data, col, int_rle(&data, true))
    }

    pub fn bytes(self, col: u32, values: &[Option<i8>]) -> Self {
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        let data: Vec<u8> = values.iter().flatten().map(|&v| v as u8).collect();
        self.present(col, &valid).stream(StreamKind::Data, col, byte_rle(&data))
    }

    pub fn bools(self, col: u32, values: &[Option<bool>]) -> Self {
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        let data: Vec<bool> = values.iter().flatten().copied().collect();
        self.present(col, &valid).stream(StreamKind::Data, col, bool_rle(&data))
    }

    pub fn doubles(self, col: u32, values: &[Option<f64>]) -> Self {
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        let data: Vec<u8> = values.iter().flatten().flat_map(|v| v.to_le_bytes()).collect();
        self.present(col, &valid).stream(StreamKind::Data, col, data)
    }

    pub fn strings(self, col: u32, values: &[Option<&str>]) -> Self {
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        let data: Vec<u8> = values.iter().flatten().flat_map(|s| s.bytes()).collect();
        let lengths: Vec<i64> = values.iter().flatten().map(|s| s.len() as i64).collect();
        self.present(col, &valid)
            .stream(StreamKind::Data, col, data)
            .stream(StreamKind::Length, col, int_rle(&lengths, false))
    }

    /// 字典编码：`dict` 为本 stripe 的字典，`codes` 为每行的字典下标
    pub fn dictionary_strings(self, col: u32, dict: &[&str], codes: &[Option<u32>]) -> Self {
        let valid: Vec<bool> = codes.iter().map(Option::is_some).collect();
        let data: Vec<i64> = codes.iter().flatten().map(|&c| i64::from(c)).collect();
        let chars: Vec<u8> = dict.iter().flat_map(|s| s.bytes()).collect();
        let lengths: Vec<i64> = dict.iter().map(|s| s.len() as i64).collect();
        self.present(col, &valid)
            .stream(StreamKind::Data, col, int_rle(&data, false))
            .stream(StreamKind::DictionaryData, col, chars)
            .stream(StreamKind::Length, col, int_rle(&lengths, false))
            .encoding(col, EncodingKind::Dictionary, dict.len() as u32)
    }

    /// (未缩放值, scale)
    pub fn decimals(self, col: u32, values: &[Option<(i128, i64)>]) -> Self {
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        let mut data = Vec::new();
        for (v, _) in values.iter().flatten() {
            decimal_varint(&mut data, *v);
        }
        let scales: Vec<i64> = values.iter().flatten().map(|(_, s)| *s).collect();
        self.present(col, &valid)
            .stream(StreamKind::Data, col, data)
            .stream(StreamKind::Secondary, col, int_rle(&scales, true))
    }

    /// (相对 2015-01-01 的秒, 纳秒)
    pub fn timestamps(self, col: u32, values: &[Option<(i64, u64)>]) -> Self {
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        let secs: Vec<i64> = values.iter().flatten().map(|(s, _)| *s).collect();
        let nanos: Vec<i64> = values.iter().flatten().map(|(_, n)| (*n << 3) as i64).collect();
        self.present(col, &valid)
            .stream(StreamKind::Data, col, int_rle(&secs, true))
            .stream(StreamKind::Secondary, col, int_rle(&nanos, false))
    }

    pub fn lists(self, col: u32, lengths: &[Option<usize>]) -> Self {
        let valid: Vec<bool> = lengths.iter().map(Option::is_some).collect();
        let data: Vec<i64> = lengths.iter().flatten().map(|&n| n as i64).collect();
        self.present(col, &valid).stream(StreamKind::Length, col, int_rle(&data, false))
    }

    pub fn structs(self, col: u32, valid: &[bool]) -> Self { self.present(col, valid) }
}

// ── 文件 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OrcFileBuilder {
    types:        Vec<Type>,
    stripes:      Vec<StripeBuilder>,
    compression:  CompressionKind,
    block_size:   usize,
    force_stored: bool,
    stride:       u32,
    metadata:     Vec<(String, String)>,
}

impl OrcFileBuilder {
    pub fn new(types: Vec<Type>) -> Self {
        Self {
            types,
            stripes: Vec::new(),
            compression: CompressionKind::None,
            block_size: 64 * 1024,
            force_stored: false,
            stride: 0,
            metadata: Vec::new(),
        }
    }

    pub fn compression(mut self, kind: CompressionKind, block_size: usize) -> Self {
        self.compression = kind;
        self.block_size = block_size;
        self
    }

    /// 所有块都写成 stored
    pub fn stored_blocks(mut self) -> Self {
        self.force_stored = true;
        self
    }

    pub fn row_index_stride(mut self, stride: u32) -> Self {
        self.stride = stride;
        self
    }

    pub fn user_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }

    pub fn stripe(mut self, stripe: StripeBuilder) -> Self {
        self.stripes.push(stripe);
        self
    }

    fn pack(&self, data: &[u8]) -> Vec<u8> {
        compress_stream(self.compression, self.block_size, data, self.force_stored)
    }

    pub fn build(self) -> Vec<u8> {
        let mut file = b"ORC".to_vec();
        let mut infos = Vec::with_capacity(self.stripes.len());
        let mut total_rows = 0u64;
        for s in &self.stripes {
            let offset = file.len() as u64;
            let mut streams = Vec::new();
            let mut index_len = 0u64;
            for (col, bytes) in &s.index {
                let packed = self.pack(bytes);
                index_len += packed.len() as u64;
                streams.push(Stream {
                    kind: Some(StreamKind::RowIndex as i32),
                    column: Some(*col),
                    length: Some(packed.len() as u64),
                });
                file.extend_from_slice(&packed);
            }
            let data_start = file.len();
            for (kind, col, bytes) in &s.streams {
                let packed = self.pack(bytes);
                streams.push(Stream { kind: Some(*kind as i32), column: Some(*col), length: Some(packed.len() as u64) });
                file.extend_from_slice(&packed);
            }
            let data_len = (file.len() - data_start) as u64;

            let mut columns = vec![ColumnEncoding { kind: Some(EncodingKind::Direct as i32), dictionary_size: None }; self.types.len()];
            for &(col, kind, dict_size) in &s.encodings {
                columns[col as usize] = ColumnEncoding { kind: Some(kind as i32), dictionary_size: Some(dict_size) };
            }
            let footer = StripeFooter { streams, columns, writer_timezone: s.timezone.clone() };
            let packed = self.pack(&footer.encode_to_vec());
            file.extend_from_slice(&packed);
            infos.push(StripeInformation {
                offset:         Some(offset),
                index_length:   Some(index_len),
                data_length:    Some(data_len),
                footer_length:  Some(packed.len() as u64),
                number_of_rows: Some(s.rows),
            });
            total_rows += s.rows;
        }

        let footer = Footer {
            header_length:    Some(3),
            content_length:   Some(file.len() as u64 - 3),
            stripes:          infos,
            types:            self.types.clone(),
            metadata:         self.metadata.iter()
                .map(|(k, v)| UserMetadataItem { name: Some(k.clone()), value: Some(v.clone().into_bytes()) })
                .collect(),
            number_of_rows:   Some(total_rows),
            row_index_stride: Some(self.stride),
            writer:           Some(1),
        };
        let packed_footer = self.pack(&footer.encode_to_vec());
        file.extend_from_slice(&packed_footer);

        let postscript = PostScript {
            footer_length:          Some(packed_footer.len() as u64),
            compression:            Some(self.compression as i32),
            compression_block_size: Some(self.block_size as u64),
            version:                vec![0, 12],
            metadata_length:        Some(0),
            writer_version:         Some(9),
            magic:                  Some("ORC".to_string()),
        };
        let ps = postscript.encode_to_vec();
        file.extend_from_slice(&ps);
        file.push(ps.len() as u8);
        file
    }
}
