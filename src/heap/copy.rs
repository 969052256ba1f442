//! Semi-space copying collector.
//!
//! The arena is split in two equal spaces and allocation bumps through the
//! active one. A cycle evacuates every reachable object into the other space.
//! The first word of an evacuated object is overwritten with its new address
//! and its offset is recorded in the forwarded bitmap, so later references to
//! it are redirected instead of copied again. Objects are therefore at least
//! one word long.
use super::memory::{Arena, Memory};
use super::model::ObjectModel;
use super::object_table::{ObjectReference, ObjectTable};
use super::{CollectionStats, GarbageCollector};
use crate::error::GcError;
use crate::runtime::roots::RootSlot;
use crate::util::mem::*;
use bitvec::prelude::*;

pub struct SemiSpace {
    memory: Memory,
    from_space: Region,
    to_space: Region,
    heap: Address,
    forwarded: BitVec<usize, Lsb0>,
}

impl SemiSpace {
    pub fn new(heap_size: usize) -> Result<Self, GcError> {
        let half = heap_size / 2 / WORD_SIZE * WORD_SIZE;
        if half < WORD_SIZE {
            return Err(GcError::InvalidConfig(format!(
                "heap of {} bytes is too small for two semi-spaces",
                heap_size
            )));
        }
        let memory = Memory::new(2 * half)?;
        let bottom = memory.arena.bottom();
        let from_space = Region::new(bottom, bottom.offset(half));
        let to_space = Region::new(bottom.offset(half), bottom.offset(2 * half));
        Ok(Self {
            forwarded: BitVec::repeat(false, memory.arena.size()),
            memory,
            from_space,
            to_space,
            heap: bottom,
        })
    }

    pub fn from_space(&self) -> Region {
        self.from_space
    }

    pub fn to_space(&self) -> Region {
        self.to_space
    }

    fn flip(&mut self) {
        std::mem::swap(&mut self.from_space, &mut self.to_space);
    }
}

/// State of one evacuation pass.
struct Evacuation<'a> {
    arena: &'a mut Arena,
    objects: &'a ObjectTable,
    forwarded: &'a mut BitVec<usize, Lsb0>,
    free: Address,
    limit: Address,
    copies: Vec<ObjectReference>,
    grey: Vec<usize>,
    offsets: Vec<usize>,
}

impl<'a> Evacuation<'a> {
    /// Returns the to-space address of the object at `value`, copying it on
    /// first visit. Values that are not tracked objects are returned as is.
    fn evacuate(&mut self, value: Address) -> Address {
        let id = match self.objects.is_an_object_allocated(value) {
            Some(id) => id,
            None => return value,
        };
        let offset = self.arena.offset_of(value);
        if self.forwarded[offset] {
            return self.arena.read_word(value);
        }
        let entry = self.objects.get(id);
        let target = self.free;
        if target.offset(entry.size) > self.limit {
            fatal!("to-space overflow while copying {} ({} bytes)", value, entry.size);
        }
        self.free = target.offset(entry.size);
        self.arena.copy(value, target, entry.size);
        self.arena.write_word(value, target);
        self.forwarded.set(offset, true);
        trace!("GC: Copy {} -> {} ({} bytes)", value, target, entry.size);
        self.copies.push(ObjectReference {
            address: target,
            size: entry.size,
        });
        self.grey.push(self.copies.len() - 1);
        target
    }

    fn process_grey(&mut self, model: &dyn ObjectModel) {
        while let Some(index) = self.grey.pop() {
            let object = self.copies[index];
            self.offsets.clear();
            model.reference_offsets(self.arena.bytes(object.address, object.size), &mut self.offsets);
            for i in 0..self.offsets.len() {
                let field = object.address.offset(self.offsets[i]);
                let value = self.arena.read_word(field);
                let forwarded = self.evacuate(value);
                if forwarded != value {
                    self.arena.write_word(field, forwarded);
                }
            }
        }
    }
}

impl GarbageCollector for SemiSpace {
    fn name(&self) -> &'static str {
        "Copy"
    }

    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn object_size(&self, size: usize) -> usize {
        std::cmp::max(size, WORD_SIZE)
    }

    fn fetch_free_memory(&mut self, size: usize) -> Option<Address> {
        if size > self.free_size() {
            return None;
        }
        let address = self.heap;
        self.heap = self.heap.offset(size);
        Some(address)
    }

    fn grow_in_place(&mut self, object: Address, size: usize, new_size: usize) -> bool {
        if object.offset(size) != self.heap || object.offset(new_size) > self.from_space.end {
            return false;
        }
        self.heap = object.offset(new_size);
        true
    }

    fn release(&mut self, address: Address, size: usize) {
        self.memory.release(address, size);
        if address.offset(size) == self.heap {
            self.heap = address;
        }
    }

    fn collect(&mut self, roots: &[RootSlot], model: &dyn ObjectModel) -> CollectionStats {
        let Memory {
            arena,
            objects,
            occupancy,
        } = &mut self.memory;

        let pinned: Vec<Address> = objects
            .entries()
            .iter()
            .filter(|entry| !model.is_collectable(arena.bytes(entry.address, entry.size)))
            .map(|entry| entry.address)
            .collect();

        let mut evacuation = Evacuation {
            free: self.to_space.start,
            limit: self.to_space.end,
            arena: &mut *arena,
            objects: &*objects,
            forwarded: &mut self.forwarded,
            copies: Vec::new(),
            grey: Vec::new(),
            offsets: Vec::new(),
        };
        for address in pinned {
            evacuation.evacuate(address);
        }
        for slot in roots {
            let value = slot.get();
            let forwarded = evacuation.evacuate(value);
            if forwarded != value {
                slot.set(forwarded);
            }
        }
        evacuation.process_grey(model);
        let Evacuation { free, copies, .. } = evacuation;

        let mut stats = CollectionStats::default();
        for entry in objects.entries() {
            let offset = arena.offset_of(entry.address);
            if self.forwarded[offset] {
                continue;
            }
            trace!("GC: Sweep {} ({} bytes)", entry.address, entry.size);
            model.finalize(entry.address, arena.bytes(entry.address, entry.size));
            stats.reclaimed_objects += 1;
            stats.reclaimed_bytes += entry.size;
        }
        stats.live_objects = copies.len();
        stats.live_bytes = free.offset_from(self.to_space.start);
        stats.objects_moved = stats.live_objects;
        stats.bytes_moved = stats.live_bytes;

        let from = arena.offset_of(self.from_space.start)..arena.offset_of(self.from_space.end);
        let to_start = arena.offset_of(self.to_space.start);
        occupancy.set_range(from.clone(), false);
        occupancy.set_range(to_start..to_start + stats.live_bytes, true);
        self.forwarded[from].fill(false);
        objects.replace(copies);

        self.flip();
        self.heap = free;
        stats
    }

    fn free_size(&self) -> usize {
        self.from_space.end.offset_from(self.heap)
    }

    fn heap_size(&self) -> usize {
        self.from_space.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::model::{Layout, LayoutTable, Opaque};

    fn allocate(collector: &mut SemiSpace, size: usize) -> Address {
        let size = collector.object_size(size);
        let address = collector.fetch_free_memory(size).unwrap();
        collector.memory_mut().claim(address, size);
        address
    }

    #[test]
    fn spaces_flip_after_collection() {
        let mut collector = SemiSpace::new(512).unwrap();
        assert_eq!(collector.heap_size(), 256);
        let from = collector.from_space();
        let _dead = allocate(&mut collector, 64);
        let live = allocate(&mut collector, 32);
        collector
            .memory_mut()
            .arena
            .bytes_mut(live, 32)
            .copy_from_slice(&[5u8; 32]);

        let roots = [RootSlot::new(live)];
        let stats = collector.collect(&roots, &Opaque);
        assert_eq!(stats.live_objects, 1);
        assert_eq!(stats.reclaimed_objects, 1);
        assert_eq!(collector.to_space(), from);
        assert_eq!(roots[0].get(), collector.from_space().start);
        assert!(collector.memory().arena.bytes(roots[0].get(), 32).iter().all(|b| *b == 5));
        assert_eq!(collector.free_size(), 256 - 32);
        assert_eq!(collector.memory().occupied_bytes(), 32);
    }

    #[test]
    fn shared_objects_are_copied_once() {
        let model = LayoutTable::new();
        let pair = model.register(Layout::new("pair", vec![WORD_SIZE, 2 * WORD_SIZE]));
        let mut collector = SemiSpace::new(1024).unwrap();
        let shared = allocate(&mut collector, 2 * WORD_SIZE);
        let parent = allocate(&mut collector, 3 * WORD_SIZE);
        {
            let arena = &mut collector.memory_mut().arena;
            arena.write_word(parent, Address(pair));
            arena.write_word(parent.offset(WORD_SIZE), shared);
            arena.write_word(parent.offset(2 * WORD_SIZE), shared);
        }
        let roots = [
            RootSlot::new(shared),
            RootSlot::new(parent),
            RootSlot::new(shared),
        ];
        let stats = collector.collect(&roots, &model);
        assert_eq!(stats.objects_moved, 2);
        assert_eq!(stats.bytes_moved, 5 * WORD_SIZE);
        assert_eq!(roots[0].get(), roots[2].get());
        let arena = &collector.memory().arena;
        let parent = roots[1].get();
        assert_eq!(arena.read_word(parent.offset(WORD_SIZE)), roots[0].get());
        assert_eq!(arena.read_word(parent.offset(2 * WORD_SIZE)), roots[0].get());
    }

    #[test]
    fn tiny_objects_hold_a_forwarding_word() {
        let mut collector = SemiSpace::new(256).unwrap();
        assert_eq!(collector.object_size(1), WORD_SIZE);
        let tiny = allocate(&mut collector, 1);
        let roots = [RootSlot::new(tiny)];
        collector.collect(&roots, &Opaque);
        assert_eq!(collector.memory().objects.lookup(roots[0].get()).map(|e| e.size), Some(WORD_SIZE));
    }
}
