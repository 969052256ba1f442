use bitvec::prelude::*;
use std::ops::Range;

/// One bit per arena byte, set while the byte belongs to a tracked object.
pub struct OccupancyBitmap {
    bits: BitVec<usize, Lsb0>,
}

impl OccupancyBitmap {
    pub fn new(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, len),
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn occupy(&mut self, offset: usize, size: usize) {
        let span = &mut self.bits[offset..offset + size];
        if span.any() {
            fatal!(
                "occupancy bitmap corrupt: span +{} of {} bytes overlaps a live object",
                offset,
                size
            );
        }
        span.fill(true);
    }

    pub fn vacate(&mut self, offset: usize, size: usize) {
        let span = &mut self.bits[offset..offset + size];
        if !span.all() {
            fatal!(
                "occupancy bitmap corrupt: span +{} of {} bytes is not fully occupied",
                offset,
                size
            );
        }
        span.fill(false);
    }

    #[inline]
    pub fn is_occupied(&self, offset: usize) -> bool {
        self.bits[offset]
    }

    pub fn is_free(&self, offset: usize, size: usize) -> bool {
        self.bits[offset..offset + size].not_any()
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn count_in(&self, range: Range<usize>) -> usize {
        self.bits[range].count_ones()
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
    }

    pub fn set_range(&mut self, range: Range<usize>, value: bool) {
        self.bits[range].fill(value);
    }

    /// Maximal runs of occupied bytes inside `range`, in ascending order.
    pub fn occupied_runs(&self, range: Range<usize>) -> Vec<Range<usize>> {
        self.runs(range, true)
    }

    /// Maximal runs of free bytes inside `range`, in ascending order.
    pub fn free_runs(&self, range: Range<usize>) -> Vec<Range<usize>> {
        self.runs(range, false)
    }

    fn runs(&self, range: Range<usize>, value: bool) -> Vec<Range<usize>> {
        let base = range.start;
        let slice = &self.bits[range];
        let mut runs = Vec::new();
        let mut cursor = 0;
        while cursor < slice.len() {
            let rest = &slice[cursor..];
            let found = if value {
                rest.first_one()
            } else {
                rest.first_zero()
            };
            let start = match found {
                Some(index) => cursor + index,
                None => break,
            };
            let rest = &slice[start..];
            let end = if value {
                rest.first_zero()
            } else {
                rest.first_one()
            };
            let len = end.unwrap_or_else(|| rest.len());
            runs.push(base + start..base + start + len);
            cursor = start + len;
        }
        runs
    }
}
