use crate::error::GcError;
use crate::heap::CollectorKind;
use crate::util::mem::align_to_page;

pub const DEFAULT_HEAP_SIZE: usize = 50000 * 1024;

// once this share of the heap is occupied an allocation asks the engine for
// a collection at its next safepoint
pub const USED_SPACE_RATIO: f64 = 0.7;

#[derive(Clone, Debug)]
pub struct GcConfig {
    /// Heap size in bytes. `0` selects [`DEFAULT_HEAP_SIZE`].
    pub heap_size: usize,
    pub collector: CollectorKind,
    /// Record allocation and collection times.
    pub profile: bool,
    /// Log the start and end of every collection.
    pub verbose: bool,
    pub collection_threshold: f64,
    /// Round the heap size up to a multiple of the OS page size.
    pub page_aligned: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_SIZE,
            collector: CollectorKind::default(),
            profile: false,
            verbose: false,
            collection_threshold: USED_SPACE_RATIO,
            page_aligned: true,
        }
    }
}

impl GcConfig {
    pub fn with_heap_size(heap_size: usize) -> Self {
        Self {
            heap_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), GcError> {
        if !(self.collection_threshold > 0.0 && self.collection_threshold <= 1.0) {
            return Err(GcError::InvalidConfig(format!(
                "collection threshold {} is outside (0, 1]",
                self.collection_threshold
            )));
        }
        Ok(())
    }

    /// Arena size actually requested from the OS.
    pub fn effective_heap_size(&self) -> usize {
        let size = if self.heap_size == 0 {
            DEFAULT_HEAP_SIZE
        } else {
            self.heap_size
        };
        if self.page_aligned {
            align_to_page(size)
        } else {
            size
        }
    }
}
