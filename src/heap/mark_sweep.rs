use super::free_list::{MemoryBlock, MemoryBlockList};
use super::mark;
use super::memory::Memory;
use super::model::ObjectModel;
use super::{CollectionStats, GarbageCollector};
use crate::error::GcError;
use crate::runtime::roots::RootSlot;
use crate::util::mem::Address;

/// Non-moving collector backed by a best-fit block list.
pub struct MarkAndSweep {
    memory: Memory,
    blocks: MemoryBlockList,
}

impl MarkAndSweep {
    pub fn new(heap_size: usize) -> Result<Self, GcError> {
        let memory = Memory::new(heap_size)?;
        let blocks = MemoryBlockList::with_block(memory.arena.bottom(), memory.arena.size());
        Ok(Self { memory, blocks })
    }

    pub fn blocks(&self) -> &MemoryBlockList {
        &self.blocks
    }

    /// Rebuilds the block list from the free runs of the bitmap, which merges
    /// every pair of adjacent free blocks.
    fn sweep_free_blocks(&mut self) {
        let arena = &self.memory.arena;
        let runs = self.memory.occupancy.free_runs(0..arena.size());
        self.blocks.rebuild(runs.into_iter().map(|run| MemoryBlock {
            start: arena.address_of(run.start),
            size: run.end - run.start,
        }));
    }
}

impl GarbageCollector for MarkAndSweep {
    fn name(&self) -> &'static str {
        "MarkAndSweep"
    }

    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn fetch_free_memory(&mut self, size: usize) -> Option<Address> {
        self.blocks.fetch_best_fit(size)
    }

    fn grow_in_place(&mut self, object: Address, size: usize, new_size: usize) -> bool {
        self.blocks.take(object.offset(size), new_size - size)
    }

    fn release(&mut self, address: Address, size: usize) {
        self.memory.release(address, size);
        self.blocks.release(address, size);
    }

    fn collect(&mut self, roots: &[RootSlot], model: &dyn ObjectModel) -> CollectionStats {
        let marks = mark::mark(&mut self.memory, model, roots);
        let (reclaimed_objects, reclaimed_bytes) = mark::finalize_unmarked(&self.memory, &marks, model);
        self.memory.objects.retain_live(|id, entry| {
            if marks.is_marked(id) {
                Some(entry.address)
            } else {
                None
            }
        });
        self.sweep_free_blocks();
        debug!(
            "GC: {} free block(s), largest {} bytes",
            self.blocks.len(),
            self.blocks.largest()
        );
        CollectionStats {
            live_objects: marks.live_objects,
            live_bytes: marks.live_bytes,
            reclaimed_objects,
            reclaimed_bytes,
            objects_moved: 0,
            bytes_moved: 0,
        }
    }

    fn free_size(&self) -> usize {
        self.blocks.free_bytes()
    }
}
