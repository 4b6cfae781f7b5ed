use std::fmt;

/// Number of bytes needed to hold `num_bits` bits.
#[inline]
pub const fn byte_len(num_bits: usize) -> usize {
    num_bits.div_ceil(8)
}

/// Read-only view over a caller-owned exclusion bitmap.
///
/// Bit `i` lives at `bytes[i >> 3]`, position `i & 7` (LSB first). A set bit
/// marks candidate `i` as excluded. Ids at or past `bit_count()` are never
/// excluded.
///
/// The view borrows the buffer for `'a` and never allocates or frees it; the
/// caller keeps ownership and must not mutate the bytes while a view is alive.
/// An empty view (`bit_count() == 0`) means "no filter".
///
/// Bits of the last byte beyond `bit_count()` are padding. They are ignored by
/// every query here, so callers need not zero them.
#[derive(Clone, Copy, Default)]
pub struct BitsetView<'a> {
    bits: &'a [u8],
    num_bits: usize,
    excluded: usize,
}

impl<'a> BitsetView<'a> {
    /// Creates a view over the first `num_bits` bits of `bits`.
    ///
    /// `excluded` is cached as-is; it is the caller's job to keep it in sync
    /// with the bit content (see [`count_excluded_bits`](Self::count_excluded_bits)).
    ///
    /// # Panics
    ///
    /// Panics if `bits` is shorter than `ceil(num_bits / 8)` bytes.
    pub fn new(bits: &'a [u8], num_bits: usize, excluded: usize) -> Self {
        let len = byte_len(num_bits);
        assert!(
            bits.len() >= len,
            "bitset of {num_bits} bits needs {len} bytes, got {}",
            bits.len()
        );
        Self {
            bits: &bits[..len],
            num_bits,
            excluded,
        }
    }

    /// Like [`new`](Self::new), but returns `None` instead of panicking when
    /// `bits` is too short for `num_bits`.
    pub fn try_new(bits: &'a [u8], num_bits: usize, excluded: usize) -> Option<Self> {
        let bits = bits.get(..byte_len(num_bits))?;
        Some(Self {
            bits,
            num_bits,
            excluded,
        })
    }

    /// Same as [`new`](Self::new), with `None` standing for "no filter".
    pub fn from_option(bits: Option<&'a [u8]>, num_bits: usize, excluded: usize) -> Self {
        match bits {
            Some(bits) => Self::new(bits, num_bits, excluded),
            None => Self::empty(),
        }
    }

    /// Creates a view whose cached count is computed from the bits.
    pub fn with_counted_exclusions(bits: &'a [u8], num_bits: usize) -> Self {
        let mut view = Self::new(bits, num_bits, 0);
        view.excluded = view.count_excluded_bits();
        view
    }

    pub const fn empty() -> Self {
        Self {
            bits: &[],
            num_bits: 0,
            excluded: 0,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    #[inline]
    pub fn bit_count(&self) -> usize {
        self.num_bits
    }

    #[inline]
    pub fn byte_length(&self) -> usize {
        byte_len(self.num_bits)
    }

    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bits
    }

    /// Whether candidate `index` is filtered out.
    #[inline]
    pub fn is_excluded(&self, index: usize) -> bool {
        index < self.num_bits && self.bits[index >> 3] & (1 << (index & 7)) != 0
    }

    /// Cached number of excluded ids supplied at construction.
    #[inline]
    pub fn excluded_count(&self) -> usize {
        self.excluded
    }

    /// Fraction of ids reported as excluded, `0.0` for an empty view.
    pub fn excluded_fraction(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.excluded as f32 / self.num_bits as f32
        }
    }

    /// Counts the set bits in `[0, bit_count())` by scanning the buffer.
    pub fn count_excluded_bits(&self) -> usize {
        let full = &self.bits[..self.num_bits >> 3];
        let (words, tail) = full.as_chunks::<8>();

        let mut count: usize = words
            .iter()
            .map(|word| u64::from_le_bytes(*word).count_ones() as usize)
            .sum();
        count += tail.iter().map(|&byte| popcount8(byte) as usize).sum::<usize>();

        if let Some(last) = self.last_partial_byte() {
            count += popcount8(last) as usize;
        }
        count
    }

    /// Position of the first id that is not excluded, or `bit_count()` if
    /// every id in range is excluded.
    pub fn first_included_index(&self) -> usize {
        let full = &self.bits[..self.num_bits >> 3];
        let (words, tail) = full.as_chunks::<8>();

        for (i, word) in words.iter().enumerate() {
            let included = !u64::from_le_bytes(*word);
            if included != 0 {
                return i * 64 + included.trailing_zeros() as usize;
            }
        }

        let tail_start = words.len() * 64;
        for (i, &byte) in tail.iter().enumerate() {
            let included = !byte;
            if included != 0 {
                return tail_start + i * 8 + included.trailing_zeros() as usize;
            }
        }

        if let Some(last) = self.last_partial_byte() {
            let included = !last & partial_mask(self.num_bits);
            if included != 0 {
                return (self.num_bits & !7) + included.trailing_zeros() as usize;
            }
        }
        self.num_bits
    }

    /// Ids in `[0, bit_count())` that are not excluded, ascending.
    pub fn iter_included(self) -> impl Iterator<Item = usize> + 'a {
        (self.first_included_index()..self.num_bits).filter(move |&i| !self.is_excluded(i))
    }

    /// Renders bits `[from, min(to, bit_count()))` as `'0'`/`'1'`, `'1'`
    /// meaning excluded.
    pub fn to_bit_string(&self, from: usize, to: usize) -> String {
        if self.is_empty() {
            return String::new();
        }
        let to = to.min(self.num_bits);
        (from..to)
            .map(|i| if self.is_excluded(i) { '1' } else { '0' })
            .collect()
    }

    /// The last byte with its padding bits cleared, if `bit_count()` is not a
    /// multiple of 8.
    #[inline]
    fn last_partial_byte(&self) -> Option<u8> {
        if self.num_bits & 7 == 0 {
            None
        } else {
            Some(self.bits[self.num_bits >> 3] & partial_mask(self.num_bits))
        }
    }
}

#[inline]
fn partial_mask(num_bits: usize) -> u8 {
    (1u8 << (num_bits & 7)).wrapping_sub(1)
}

/// Branchless byte popcount: add bit pairs, then nibbles, then the two nibbles.
#[inline]
const fn popcount8(mut x: u8) -> u32 {
    x = (x & 0x55) + ((x >> 1) & 0x55);
    x = (x & 0x33) + ((x >> 2) & 0x33);
    x = (x & 0x0f) + ((x >> 4) & 0x0f);
    x as u32
}

const PREVIEW_BITS: usize = 64;

impl BitsetView<'_> {
    fn preview(&self) -> String {
        let mut bits = self.to_bit_string(0, PREVIEW_BITS);
        if self.num_bits > PREVIEW_BITS {
            bits.push_str("...");
        }
        bits
    }
}

impl fmt::Display for BitsetView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} excluded [{}]", self.excluded, self.num_bits, self.preview())
    }
}

impl fmt::Debug for BitsetView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = self.preview();
        f.debug_struct("BitsetView")
            .field("num_bits", &self.num_bits)
            .field("excluded", &self.excluded)
            .field("bits", &bits)
            .finish()
    }
}
