//! ORC 行程编码解码
//!
//! - **Byte RLE**    — PRESENT 之外的字节流（BYTE 列）
//! - **Boolean RLE** — Byte RLE 之上按位展开（MSB 在前），用于 PRESENT / BOOLEAN
//! - **Integer RLE v1** — run（h+3 个，带 i8 步长）/ literal（−h 个 varint）
//! - **Integer RLE v2** — SHORT_REPEAT / DIRECT / PATCHED_BASE / DELTA
//!
//! 所有解码器都支持 `skip(n)`：行索引定位到字节偏移后，再跳过 run 内的 n 个值。

use byteorder::{BigEndian, ByteOrder};

use crate::common::{verify_data, EngineError, Result};

// ── 字节游标 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos:  usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self { Self { data, pos: 0 } }

    pub fn position(&self)  -> usize { self.pos }
    pub fn remaining(&self) -> usize { self.data.len() - self.pos }
    pub fn is_empty(&self)  -> bool  { self.pos >= self.data.len() }

    pub fn next_byte(&mut self) -> Result<u8> {
        let b = *self.data.get(self.pos).ok_or_else(|| eof(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        verify_data!(self.remaining() >= n, "need {n} bytes at {}, {} left", self.pos, self.remaining());
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
}

fn eof(pos: usize) -> EngineError {
    EngineError::Decode(format!("unexpected end of stream at byte {pos}"))
}

// ── varint ────────────────────────────────────────────────────────────────────

pub fn read_uvarint(cur: &mut ByteCursor<'_>) -> Result<u64> {
    let mut v = 0u64;
    let mut shift = 0u32;
    loop {
        let b = cur.next_byte()?;
        verify_data!(shift < 64, "varint longer than 64 bits");
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(v);
        }
        shift += 7;
    }
}

#[inline]
pub fn zigzag(v: u64) -> i64 { (v >> 1) as i64 ^ -((v & 1) as i64) }

pub fn read_svarint(cur: &mut ByteCursor<'_>) -> Result<i64> { read_uvarint(cur).map(zigzag) }

/// 不定长 zigzag varint，DECIMAL 的 DATA 流
pub fn read_varint_i128(cur: &mut ByteCursor<'_>) -> Result<i128> {
    let mut v = 0u128;
    let mut shift = 0u32;
    loop {
        let b = cur.next_byte()?;
        verify_data!(shift < 128, "decimal varint longer than 128 bits");
        v |= u128::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok((v >> 1) as i128 ^ -((v & 1) as i128));
        }
        shift += 7;
    }
}

// ── Byte RLE ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ByteRleDecoder<'a> {
    cur:       ByteCursor<'a>,
    remaining: usize,
    repeat:    bool,
    value:     u8,
}

impl<'a> ByteRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { cur: ByteCursor::new(data), remaining: 0, repeat: false, value: 0 }
    }

    fn read_header(&mut self) -> Result<()> {
        let h = self.cur.next_byte()?;
        if h < 0x80 {
            self.remaining = h as usize + 3;
            self.repeat = true;
            self.value = self.cur.next_byte()?;
        } else {
            self.remaining = 256 - h as usize;
            self.repeat = false;
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<u8> {
        if self.remaining == 0 {
            self.read_header()?;
        }
        self.remaining -= 1;
        if self.repeat { Ok(self.value) } else { self.cur.next_byte() }
    }

    pub fn decode(&mut self, out: &mut Vec<u8>, n: usize) -> Result<()> {
        out.reserve(n);
        for _ in 0..n {
            out.push(self.next()?);
        }
        Ok(())
    }

    pub fn skip(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            if self.remaining == 0 {
                self.read_header()?;
            }
            let step = n.min(self.remaining);
            if !self.repeat {
                self.cur.take(step)?;
            }
            self.remaining -= step;
            n -= step;
        }
        Ok(())
    }
}

// ── Boolean RLE ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BooleanRleDecoder<'a> {
    bytes:     ByteRleDecoder<'a>,
    current:   u8,
    bits_left: u8,
}

impl<'a> BooleanRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { bytes: ByteRleDecoder::new(data), current: 0, bits_left: 0 }
    }

    pub fn next(&mut self) -> Result<bool> {
        if self.bits_left == 0 {
            self.current = self.bytes.next()?;
            self.bits_left = 8;
        }
        self.bits_left -= 1;
        Ok((self.current >> self.bits_left) & 1 == 1)
    }

    pub fn decode(&mut self, out: &mut Vec<bool>, n: usize) -> Result<()> {
        out.reserve(n);
        for _ in 0..n {
            out.push(self.next()?);
        }
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        let in_current = n.min(self.bits_left as usize);
        self.bits_left -= in_current as u8;
        let rest = n - in_current;
        self.bytes.skip(rest / 8)?;
        for _ in 0..rest % 8 {
            self.next()?;
        }
        Ok(())
    }
}

// ── Integer RLE ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RleVersion {
    V1,
    V2,
}

/// 整数 RLE 解码器；无符号值也以 `i64` 位模式返回
#[derive(Debug, Clone)]
pub struct IntRleDecoder<'a> {
    cur:     ByteCursor<'a>,
    version: RleVersion,
    signed:  bool,
    run:     Vec<i64>,
    idx:     usize,
}

impl<'a> IntRleDecoder<'a> {
    pub fn new(data: &'a [u8], version: RleVersion, signed: bool) -> Self {
        Self { cur: ByteCursor::new(data), version, signed, run: Vec::new(), idx: 0 }
    }

    pub fn next(&mut self) -> Result<i64> {
        if self.idx == self.run.len() {
            self.fill()?;
        }
        let v = self.run[self.idx];
        self.idx += 1;
        Ok(v)
    }

    pub fn decode(&mut self, out: &mut Vec<i64>, n: usize) -> Result<()> {
        out.reserve(n);
        let mut left = n;
        while left > 0 {
            if self.idx == self.run.len() {
                self.fill()?;
            }
            let step = left.min(self.run.len() - self.idx);
            out.extend_from_slice(&self.run[self.idx..self.idx + step]);
            self.idx += step;
            left -= step;
        }
        Ok(())
    }

    pub fn skip(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            if self.idx == self.run.len() {
                self.fill()?;
            }
            let step = n.min(self.run.len() - self.idx);
            self.idx += step;
            n -= step;
        }
        Ok(())
    }

    fn fill(&mut self) -> Result<()> {
        if self.cur.is_empty() {
            return Err(eof(self.cur.position()));
        }
        self.run.clear();
        self.idx = 0;
        match self.version {
            RleVersion::V1 => self.fill_v1(),
            RleVersion::V2 => self.fill_v2(),
        }?;
        verify_data!(!self.run.is_empty(), "empty RLE run");
        Ok(())
    }

    fn read_base(&mut self) -> Result<i64> {
        if self.signed { read_svarint(&mut self.cur) } else { read_uvarint(&mut self.cur).map(|v| v as i64) }
    }

    fn fill_v1(&mut self) -> Result<()> {
        let h = self.cur.next_byte()? as i8;
        if h >= 0 {
            let count = h as usize + 3;
            let delta = self.cur.next_byte()? as i8 as i64;
            let base = self.read_base()?;
            self.run.extend((0..count as i64).map(|i| base.wrapping_add(i.wrapping_mul(delta))));
        } else {
            for _ in 0..(-(h as i32)) {
                let v = self.read_base()?;
                self.run.push(v);
            }
        }
        Ok(())
    }

    fn fill_v2(&mut self) -> Result<()> {
        let h = self.cur.next_byte()?;
        match h >> 6 {
            0 => self.short_repeat(h),
            1 => self.direct(h),
            2 => self.patched_base(h),
            _ => self.delta(h),
        }
    }

    fn unzigzag(&self, v: u64) -> i64 { if self.signed { zigzag(v) } else { v as i64 } }

    fn short_repeat(&mut self, h: u8) -> Result<()> {
        let width = ((h >> 3) & 0x07) as usize + 1;
        let count = (h & 0x07) as usize + 3;
        let raw = BigEndian::read_uint(self.cur.take(width)?, width);
        let v = self.unzigzag(raw);
        self.run.resize(count, v);
        Ok(())
    }

    fn run_length(&mut self, h: u8) -> Result<usize> {
        Ok((((h & 0x01) as usize) << 8 | self.cur.next_byte()? as usize) + 1)
    }

    fn direct(&mut self, h: u8) -> Result<()> {
        let width = decode_width(((h >> 1) & 0x1f) as u32);
        let len = self.run_length(h)?;
        let mut raw = Vec::with_capacity(len);
        unpack_bits(&mut self.cur, width, len, &mut raw)?;
        let signed = self.signed;
        self.run.extend(raw.into_iter().map(|v| if signed { zigzag(v) } else { v as i64 }));
        Ok(())
    }

    fn patched_base(&mut self, h: u8) -> Result<()> {
        let width = decode_width(((h >> 1) & 0x1f) as u32);
        let len = self.run_length(h)?;
        let b3 = self.cur.next_byte()?;
        let base_bytes = ((b3 >> 5) & 0x07) as usize + 1;
        let patch_width = decode_width((b3 & 0x1f) as u32);
        let b4 = self.cur.next_byte()?;
        let gap_width = ((b4 >> 5) & 0x07) as u32 + 1;
        let patch_len = (b4 & 0x1f) as usize;

        // base：大端，最高位是符号位
        let raw_base = BigEndian::read_uint(self.cur.take(base_bytes)?, base_bytes);
        let sign_bit = 1u64 << (base_bytes * 8 - 1);
        let base = if raw_base & sign_bit != 0 { -((raw_base & !sign_bit) as i64) } else { raw_base as i64 };

        let mut data = Vec::with_capacity(len);
        unpack_bits(&mut self.cur, width, len, &mut data)?;
        let mut patches = Vec::with_capacity(patch_len);
        unpack_bits(&mut self.cur, closest_fixed_bits(gap_width + patch_width), patch_len, &mut patches)?;
        verify_data!(patch_len > 0, "patched base run without patches");
        verify_data!(width + patch_width <= 64, "patched value wider than 64 bits");

        let patch_mask = if patch_width >= 64 { u64::MAX } else { (1u64 << patch_width) - 1 };
        let mut pi = 0usize;
        let next_patch = |pi: &mut usize| -> Result<(usize, u64)> {
            let mut gap = 0usize;
            loop {
                let e = *patches.get(*pi).ok_or_else(|| EngineError::Decode("patch list exhausted".into()))?;
                let g = (e >> patch_width) as usize;
                let p = e & patch_mask;
                if g == 255 && p == 0 {
                    gap += 255;
                    *pi += 1;
                    continue;
                }
                return Ok((gap + g, p));
            }
        };
        let (gap, mut patch) = next_patch(&mut pi)?;
        let mut at = gap;
        for (i, v) in data.into_iter().enumerate() {
            if i == at {
                self.run.push(base.wrapping_add((v | patch << width) as i64));
                pi += 1;
                if pi < patch_len {
                    let (gap, p) = next_patch(&mut pi)?;
                    patch = p;
                    at = i + gap;
                }
            } else {
                self.run.push(base.wrapping_add(v as i64));
            }
        }
        Ok(())
    }

    fn delta(&mut self, h: u8) -> Result<()> {
        let code = ((h >> 1) & 0x1f) as u32;
        let width = if code == 0 { 0 } else { decode_width(code) };
        let len = self.run_length(h)?;
        let base = self.read_base()?;
        let delta_base = read_svarint(&mut self.cur)?;
        self.run.push(base);
        if width == 0 {
            let mut v = base;
            for _ in 1..len {
                v = v.wrapping_add(delta_base);
                self.run.push(v);
            }
            return Ok(());
        }
        verify_data!(len >= 2, "delta run of {len} values with varying deltas");
        let mut v = base.wrapping_add(delta_base);
        self.run.push(v);
        let mut deltas = Vec::with_capacity(len - 2);
        unpack_bits(&mut self.cur, width, len - 2, &mut deltas)?;
        for d in deltas {
            v = if delta_base < 0 { v.wrapping_sub(d as i64) } else { v.wrapping_add(d as i64) };
            self.run.push(v);
        }
        Ok(())
    }
}

// ── 位宽 / 位解包 ─────────────────────────────────────────────────────────────

/// 5 位宽度码 → 位宽
pub fn decode_width(code: u32) -> u32 {
    match code {
        0..=23 => code + 1,
        24 => 26,
        25 => 28,
        26 => 30,
        27 => 32,
        28 => 40,
        29 => 48,
        30 => 56,
        _  => 64,
    }
}

pub fn closest_fixed_bits(n: u32) -> u32 {
    match n {
        0 => 1,
        1..=24 => n,
        25..=26 => 26,
        27..=28 => 28,
        29..=30 => 30,
        31..=32 => 32,
        33..=40 => 40,
        41..=48 => 48,
        49..=56 => 56,
        _ => 64,
    }
}

/// 读 `count` 个 `width` 位大端打包值；组末不足一字节的位丢弃
fn unpack_bits(cur: &mut ByteCursor<'_>, width: u32, count: usize, out: &mut Vec<u64>) -> Result<()> {
    let total_bytes = (width as usize * count).div_ceil(8);
    let bytes = cur.take(total_bytes)?;
    let mut byte_idx = 0usize;
    let mut bits_left = 0u32;
    let mut current = 0u64;
    for _ in 0..count {
        let mut v = 0u64;
        let mut need = width;
        while need > 0 {
            if bits_left == 0 {
                current = u64::from(bytes[byte_idx]);
                byte_idx += 1;
                bits_left = 8;
            }
            let take = need.min(bits_left);
            let chunk = (current >> (bits_left - take)) & ((1u64 << take) - 1);
            v = v << take | chunk;
            bits_left -= take;
            need -= take;
        }
        out.push(v);
    }
    Ok(())
}

/// 解码 `n` 位 PRESENT 流
pub fn decode_booleans(data: &[u8], n: usize) -> Result<Vec<bool>> {
    let mut out = Vec::with_capacity(n);
    BooleanRleDecoder::new(data).decode(&mut out, n)?;
    Ok(out)
}
