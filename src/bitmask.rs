//! 有效位图：每行一位，1 = 有效，0 = null
//!
//! 以 32 位字存储；超出 `len` 的尾部位恒为 0，保证 popcount 即有效行数。

const WORD_BITS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmask {
    words: Vec<u32>,
    len:   usize,
}

impl Bitmask {
    fn num_words(len: usize) -> usize { (len + WORD_BITS - 1) / WORD_BITS }

    /// 全部有效
    pub fn all_valid(len: usize) -> Self {
        let mut words = vec![u32::MAX; Self::num_words(len)];
        let tail = len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = words.last_mut() {
                *last = (1u32 << tail) - 1;
            }
        }
        Self { words, len }
    }

    /// 全部为 null
    pub fn all_null(len: usize) -> Self {
        Self { words: vec![0; Self::num_words(len)], len }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { words: Vec::with_capacity(Self::num_words(capacity)), len: 0 }
    }

    pub fn from_bools<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut mask = Self::default();
        for b in bits { mask.push(b); }
        mask
    }

    pub fn len(&self)      -> usize { self.len }
    pub fn is_empty(&self) -> bool  { self.len == 0 }
    pub fn words(&self)    -> &[u32] { &self.words }

    #[inline]
    pub fn get(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        (self.words[i / WORD_BITS] >> (i % WORD_BITS)) & 1 == 1
    }

    #[inline]
    pub fn set(&mut self, i: usize, valid: bool) {
        debug_assert!(i < self.len);
        let bit = 1u32 << (i % WORD_BITS);
        if valid {
            self.words[i / WORD_BITS] |= bit;
        } else {
            self.words[i / WORD_BITS] &= !bit;
        }
    }

    pub fn push(&mut self, valid: bool) {
        if self.len % WORD_BITS == 0 {
            self.words.push(0);
        }
        self.len += 1;
        if valid {
            self.set(self.len - 1, true);
        }
    }

    pub fn extend_from(&mut self, other: &Bitmask) {
        for i in 0..other.len {
            self.push(other.get(i));
        }
    }

    pub fn count_valid(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn count_nulls(&self) -> usize { self.len - self.count_valid() }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(move |i| self.get(i))
    }
}
