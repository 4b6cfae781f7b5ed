use bitvec::prelude::*;

use crate::view::BitsetView;

/// Owned exclusion bitmap, byte-compatible with [`BitsetView`].
///
/// Keeps the excluded count in sync with the bits so views handed out by
/// [`view`](Self::view) always carry an exact cached count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterBitmap {
    bitmap: BitVec<u8, Lsb0>,
    excluded: usize,
}

impl FilterBitmap {
    /// A bitmap over `num_bits` ids with nothing excluded.
    pub fn new(num_bits: usize) -> Self {
        Self {
            bitmap: bitvec![u8, Lsb0; 0; num_bits],
            excluded: 0,
        }
    }

    /// Marks `excluded` ids; ids outside `[0, num_bits)` and duplicates are
    /// ignored.
    pub fn from_excluded(excluded: impl IntoIterator<Item = usize>, num_bits: usize) -> Self {
        let mut bitmap = Self::new(num_bits);
        for id in excluded {
            bitmap.exclude(id);
        }
        bitmap
    }

    /// Excludes every id except `candidates`.
    pub fn from_included(candidates: impl IntoIterator<Item = usize>, num_bits: usize) -> Self {
        let mut bitmap = Self {
            bitmap: bitvec![u8, Lsb0; 1; num_bits],
            excluded: num_bits,
        };
        for id in candidates {
            bitmap.include(id);
        }
        bitmap
    }

    /// Sets the bit of `id`. Returns `true` if it was newly excluded.
    pub fn exclude(&mut self, id: usize) -> bool {
        match self.bitmap.get_mut(id) {
            Some(mut bit) if !*bit => {
                bit.set(true);
                self.excluded += 1;
                true
            }
            _ => false,
        }
    }

    /// Clears the bit of `id`. Returns `true` if it was excluded before.
    pub fn include(&mut self, id: usize) -> bool {
        match self.bitmap.get_mut(id) {
            Some(mut bit) if *bit => {
                bit.set(false);
                self.excluded -= 1;
                true
            }
            _ => false,
        }
    }

    /// Grows or shrinks the bitmap; new ids are not excluded.
    pub fn resize(&mut self, num_bits: usize) {
        self.bitmap.resize(num_bits, false);
        self.excluded = self.bitmap.count_ones();
    }

    pub fn is_excluded(&self, id: usize) -> bool {
        self.bitmap.get(id).map(|bit| *bit).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.bitmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded
    }

    pub fn iter_excluded(&self) -> impl Iterator<Item = usize> + '_ {
        self.bitmap.iter_ones()
    }

    /// Borrows the bitmap as a view for one query batch.
    pub fn view(&self) -> BitsetView<'_> {
        BitsetView::new(self.bitmap.as_raw_slice(), self.bitmap.len(), self.excluded)
    }
}
