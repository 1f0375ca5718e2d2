//! 写入端时区 → 本地时间到 UTC 的转换表
//!
//! ORC 时间戳以写入端本地时间记录。stripe footer 带有 `writerTimezone` 时，
//! 从 TZif 文件（`$TZDIR/<name>`）构建跃迁表；TZif v2+ 尾部的 POSIX 规则串
//! 用来把跃迁延伸到 2200 年。
//!
//! ```text
//! local_transitions[i] = utc_transitions[i] + offsets[i]
//! utc = local − offset(local)
//! ```

use std::io::{Cursor, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};
use tracing::debug;

use crate::common::{verify_data, EngineError, Result};

const SECS_PER_DAY: i64 = 86_400;
const EXTEND_UNTIL_YEAR: i64 = 2200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimezoneTable {
    /// 跃迁生效时刻的本地时间（秒），升序
    local_transitions: Vec<i64>,
    /// 每次跃迁之后的 UTC 偏移（秒）
    offsets:           Vec<i64>,
    initial_offset:    i64,
}

impl TimezoneTable {
    /// 固定偏移的时区
    pub fn fixed(offset: i64) -> Self {
        Self { local_transitions: Vec::new(), offsets: Vec::new(), initial_offset: offset }
    }

    /// 按名字加载；空名 / UTC / GMT 不需要转换，返回 `None`
    pub fn load(name: &str, dir: &Path) -> Result<Option<Self>> {
        if is_utc(name) {
            return Ok(None);
        }
        let path = dir.join(name);
        let data = std::fs::read(&path).map_err(|e| {
            EngineError::Io(std::io::Error::new(e.kind(), format!("timezone {}: {e}", path.display())))
        })?;
        let table = Self::from_tzif(&data)?;
        debug!(timezone = name, transitions = table.local_transitions.len(), "loaded writer timezone");
        Ok(Some(table))
    }

    pub fn from_tzif(data: &[u8]) -> Result<Self> {
        let tzif = parse_tzif(data)?;
        let rule = tzif.footer.as_deref().map(PosixRule::parse).transpose()?;

        let mut utc: Vec<i64> = tzif.transitions;
        let mut offsets: Vec<i64> = tzif.type_indices.iter()
            .map(|&i| tzif.type_offsets.get(i as usize).copied()
                .ok_or_else(|| EngineError::Decode(format!("TZif type index {i} out of range"))))
            .collect::<Result<_>>()?;
        let initial_offset = match (tzif.type_offsets.first(), &rule) {
            (Some(&o), _) if !utc.is_empty() => o,
            (_, Some(r)) => r.std_offset,
            (Some(&o), None) => o,
            (None, None) => 0,
        };

        if let Some(rule) = rule.as_ref().filter(|r| r.dst.is_some()) {
            let from_year = utc.last().map_or(1970, |&t| civil_from_days(t.div_euclid(SECS_PER_DAY)).0);
            let last = utc.last().copied().unwrap_or(i64::MIN);
            for year in from_year..=EXTEND_UNTIL_YEAR {
                for (at, off) in rule.transitions_in(year) {
                    if at > last {
                        utc.push(at);
                        offsets.push(off);
                    }
                }
            }
        }

        let local_transitions = utc.iter().zip(&offsets).map(|(t, o)| t + o).collect();
        Ok(Self { local_transitions, offsets, initial_offset })
    }

    pub fn offset_at_local(&self, local: i64) -> i64 {
        match self.local_transitions.partition_point(|&t| t <= local) {
            0 => self.initial_offset,
            n => self.offsets[n - 1],
        }
    }

    pub fn to_utc(&self, local: i64) -> Option<i64> { local.checked_sub(self.offset_at_local(local)) }

    pub fn num_transitions(&self) -> usize { self.local_transitions.len() }
}

fn is_utc(name: &str) -> bool {
    matches!(name, "" | "UTC" | "GMT" | "Etc/UTC" | "Etc/GMT" | "Z")
}

// ── TZif ──────────────────────────────────────────────────────────────────────

struct Tzif {
    transitions:  Vec<i64>,
    type_indices: Vec<u8>,
    type_offsets: Vec<i64>,
    footer:       Option<String>,
}

struct TzifHeader {
    version:  u8,
    isutcnt:  usize,
    isstdcnt: usize,
    leapcnt:  usize,
    timecnt:  usize,
    typecnt:  usize,
    charcnt:  usize,
}

fn read_header(cur: &mut Cursor<&[u8]>) -> Result<TzifHeader> {
    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic)?;
    verify_data!(&magic == b"TZif", "not a TZif file");
    let version = cur.read_u8()?;
    let mut reserved = [0u8; 15];
    cur.read_exact(&mut reserved)?;
    let mut counts = [0usize; 6];
    for c in &mut counts {
        *c = cur.read_u32::<BigEndian>()? as usize;
    }
    let [isutcnt, isstdcnt, leapcnt, timecnt, typecnt, charcnt] = counts;
    verify_data!(typecnt > 0, "TZif without local time types");
    Ok(TzifHeader { version, isutcnt, isstdcnt, leapcnt, timecnt, typecnt, charcnt })
}

fn parse_tzif(data: &[u8]) -> Result<Tzif> {
    let mut cur = Cursor::new(data);
    let mut h = read_header(&mut cur)?;
    let mut time_size = 4usize;
    if h.version >= b'2' {
        // 跳过 v1 数据块，改读 64 位时间的 v2 数据块
        let v1_len = h.timecnt * 5 + h.typecnt * 6 + h.charcnt + h.leapcnt * 8 + h.isstdcnt + h.isutcnt;
        cur.set_position(cur.position() + v1_len as u64);
        h = read_header(&mut cur)?;
        time_size = 8;
    }

    let mut transitions = Vec::with_capacity(h.timecnt);
    for _ in 0..h.timecnt {
        transitions.push(if time_size == 8 { cur.read_i64::<BigEndian>()? } else { cur.read_i32::<BigEndian>()? as i64 });
    }
    let mut type_indices = vec![0u8; h.timecnt];
    cur.read_exact(&mut type_indices)?;
    let mut type_offsets = Vec::with_capacity(h.typecnt);
    for _ in 0..h.typecnt {
        type_offsets.push(cur.read_i32::<BigEndian>()? as i64);
        let _is_dst = cur.read_u8()?;
        let _abbr_idx = cur.read_u8()?;
    }
    let skip = h.charcnt + h.leapcnt * (time_size + 4) + h.isstdcnt + h.isutcnt;
    cur.set_position(cur.position() + skip as u64);

    let footer = if h.version >= b'2' {
        let rest = &data[(cur.position() as usize).min(data.len())..];
        let text = std::str::from_utf8(rest).map_err(|e| EngineError::Decode(format!("TZif footer: {e}")))?;
        let rule = text.trim_matches('\n');
        (!rule.is_empty()).then(|| rule.to_owned())
    } else {
        None
    };
    Ok(Tzif { transitions, type_indices, type_offsets, footer })
}

// ── POSIX TZ 规则 ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateRule {
    /// Jn：1..=365，不计 2 月 29 日
    Julian1(u32),
    /// n：0..=365，计闰日
    Julian0(u32),
    /// Mm.w.d
    MonthWeekDay { month: u32, week: u32, weekday: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DstRule {
    offset:     i64,
    start:      DateRule,
    start_time: i64,
    end:        DateRule,
    end_time:   i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PosixRule {
    std_offset: i64,
    dst:        Option<DstRule>,
}

struct RuleParser<'a> {
    s:   &'a [u8],
    pos: usize,
}

impl<'a> RuleParser<'a> {
    fn peek(&self) -> Option<u8> { self.s.get(self.pos).copied() }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) { self.pos += 1; true } else { false }
    }

    fn err(&self) -> EngineError {
        EngineError::Decode(format!("bad POSIX TZ rule at {}: {}", self.pos, String::from_utf8_lossy(self.s)))
    }

    fn name(&mut self) -> Result<()> {
        if self.eat(b'<') {
            while let Some(c) = self.peek() {
                self.pos += 1;
                if c == b'>' {
                    return Ok(());
                }
            }
            return Err(self.err());
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        if self.pos - start < 3 { Err(self.err()) } else { Ok(()) }
    }

    fn number(&mut self) -> Result<i64> {
        let start = self.pos;
        let mut v = 0i64;
        while let Some(c) = self.peek().filter(u8::is_ascii_digit) {
            v = v * 10 + i64::from(c - b'0');
            self.pos += 1;
        }
        if self.pos == start { Err(self.err()) } else { Ok(v) }
    }

    /// [+-]hh[:mm[:ss]] → 秒
    fn time(&mut self) -> Result<i64> {
        let sign = if self.eat(b'-') { -1 } else { self.eat(b'+'); 1 };
        let mut secs = self.number()? * 3600;
        if self.eat(b':') {
            secs += self.number()? * 60;
            if self.eat(b':') {
                secs += self.number()?;
            }
        }
        Ok(sign * secs)
    }

    fn date(&mut self) -> Result<DateRule> {
        if self.eat(b'J') {
            return Ok(DateRule::Julian1(self.number()? as u32));
        }
        if self.eat(b'M') {
            let month = self.number()? as u32;
            if !self.eat(b'.') { return Err(self.err()); }
            let week = self.number()? as u32;
            if !self.eat(b'.') { return Err(self.err()); }
            let weekday = self.number()? as u32;
            if !(1..=12).contains(&month) || !(1..=5).contains(&week) || weekday > 6 {
                return Err(self.err());
            }
            return Ok(DateRule::MonthWeekDay { month, week, weekday });
        }
        Ok(DateRule::Julian0(self.number()? as u32))
    }

    fn date_time(&mut self) -> Result<(DateRule, i64)> {
        let date = self.date()?;
        let time = if self.eat(b'/') { self.time()? } else { 2 * 3600 };
        Ok((date, time))
    }
}

impl PosixRule {
    fn parse(rule: &str) -> Result<Self> {
        let mut p = RuleParser { s: rule.as_bytes(), pos: 0 };
        p.name()?;
        // POSIX 偏移以西为正
        let std_offset = -p.time()?;
        if p.peek().is_none() {
            return Ok(Self { std_offset, dst: None });
        }
        p.name()?;
        let offset = match p.peek() {
            Some(b',') | None => std_offset + 3600,
            _ => -p.time()?,
        };
        if !p.eat(b',') {
            return Err(p.err());
        }
        let (start, start_time) = p.date_time()?;
        if !p.eat(b',') {
            return Err(p.err());
        }
        let (end, end_time) = p.date_time()?;
        Ok(Self { std_offset, dst: Some(DstRule { offset, start, start_time, end, end_time }) })
    }

    /// `year` 年内的两次跃迁（UTC 时刻, 跃迁后偏移），按时间排序
    fn transitions_in(&self, year: i64) -> Vec<(i64, i64)> {
        let Some(dst) = &self.dst else { return Vec::new() };
        let start = day_of_year_rule(year, dst.start) * SECS_PER_DAY + dst.start_time - self.std_offset;
        let end = day_of_year_rule(year, dst.end) * SECS_PER_DAY + dst.end_time - dst.offset;
        let mut v = vec![(start, dst.offset), (end, self.std_offset)];
        v.sort_unstable();
        v
    }
}

// ── 日历 ──────────────────────────────────────────────────────────────────────

fn is_leap(y: i64) -> bool { (y % 4 == 0 && y % 100 != 0) || y % 400 == 0 }

fn month_len(y: i64, m: u32) -> u32 {
    match m {
        2 if is_leap(y) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// 公历日期 → 1970-01-01 起的天数
pub fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (i64::from(m) + 9) % 12;
    let doy = (153 * mp + 2) / 5 + i64::from(d) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

pub fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

/// 规则日期 → 1970 起的天数
fn day_of_year_rule(year: i64, rule: DateRule) -> i64 {
    let jan1 = days_from_civil(year, 1, 1);
    match rule {
        DateRule::Julian0(n) => jan1 + i64::from(n),
        DateRule::Julian1(n) => {
            let n = i64::from(n) - 1;
            jan1 + if is_leap(year) && n >= 59 { n + 1 } else { n }
        }
        DateRule::MonthWeekDay { month, week, weekday } => {
            let first = days_from_civil(year, month, 1);
            // 1970-01-01 是周四
            let first_dow = (first + 4).rem_euclid(7) as u32;
            let mut day = 1 + (weekday + 7 - first_dow) % 7 + (week - 1) * 7;
            while day > month_len(year, month) {
                day -= 7;
            }
            first + i64::from(day) - 1
        }
    }
}
