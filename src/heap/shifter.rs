//! Sliding collector.
//!
//! Allocation bumps a frontier. A cycle marks live objects into the occupancy
//! bitmap, then slides every live run toward the bottom of the heap:
//!
//! 1. `sweep_the_heap_from_top_to_bottom` walks the live runs from the
//!    frontier downward and assigns each one its destination, so that the
//!    runs end up packed in `[bottom, bottom + live_bytes)`.
//! 2. `sweep_the_heap_from_bottom_to_top` moves the runs in ascending order.
//!    A destination is never above its source, so no live byte is
//!    overwritten before it has been moved.
//! 3. `sweep_the_objects_references` forwards the fields of live objects,
//!    the root slots and finally the object table.
//!
//! Relative order of the survivors is preserved and the heap below the new
//! frontier has no gaps.
use super::bitmap::OccupancyBitmap;
use super::mark::{self, Marks};
use super::memory::{Arena, Memory};
use super::model::ObjectModel;
use super::{CollectionStats, GarbageCollector};
use crate::error::GcError;
use crate::runtime::roots::RootSlot;
use crate::util::mem::Address;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slide {
    pub from: usize,
    pub to: usize,
    pub len: usize,
}

/// Destinations of every live run, ordered by source offset.
pub struct SlidePlan {
    slides: Vec<Slide>,
    live_bytes: usize,
}

impl SlidePlan {
    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// New offset of the live byte at `offset`.
    pub fn forward(&self, offset: usize) -> Option<usize> {
        let index = match self.slides.binary_search_by(|slide| slide.from.cmp(&offset)) {
            Ok(index) => index,
            Err(0) => return None,
            Err(index) => index - 1,
        };
        let slide = self.slides[index];
        if offset < slide.from + slide.len {
            Some(slide.to + (offset - slide.from))
        } else {
            None
        }
    }

    fn forward_address(&self, arena: &Arena, address: Address) -> Address {
        match self.forward(arena.offset_of(address)) {
            Some(offset) => arena.address_of(offset),
            None => fatal!("no slide destination for live object {}", address),
        }
    }
}

pub fn sweep_the_heap_from_top_to_bottom(
    occupancy: &OccupancyBitmap,
    frontier: usize,
    live_bytes: usize,
) -> SlidePlan {
    let runs = occupancy.occupied_runs(0..frontier);
    let mut slides = Vec::with_capacity(runs.len());
    let mut above = 0;
    for run in runs.iter().rev() {
        let len = run.end - run.start;
        above += len;
        if above > live_bytes {
            fatal!(
                "occupancy bitmap holds more than the {} marked byte(s)",
                live_bytes
            );
        }
        slides.push(Slide {
            from: run.start,
            to: live_bytes - above,
            len,
        });
    }
    if above != live_bytes {
        fatal!(
            "occupancy bitmap holds {} byte(s), marking found {}",
            above,
            live_bytes
        );
    }
    slides.reverse();
    SlidePlan { slides, live_bytes }
}

/// Moves every run to its destination. Returns the number of bytes moved.
pub fn sweep_the_heap_from_bottom_to_top(
    memory: &mut Memory,
    plan: &SlidePlan,
    frontier: usize,
) -> usize {
    let mut moved = 0;
    for slide in plan.slides.iter() {
        debug_assert!(slide.to <= slide.from);
        if slide.to == slide.from {
            continue;
        }
        let from = memory.arena.address_of(slide.from);
        let to = memory.arena.address_of(slide.to);
        trace!("GC: Slide {} -> {} ({} bytes)", from, to, slide.len);
        memory.arena.copy(from, to, slide.len);
        moved += slide.len;
    }
    let live = plan.live_bytes;
    if frontier > live {
        let start = memory.arena.address_of(live);
        memory.arena.zero(start, frontier - live);
    }
    memory.occupancy.set_range(0..frontier, false);
    memory.occupancy.set_range(0..live, true);
    moved
}

/// Rewrites every reference to a live object: fields of the moved objects,
/// root slots and object table entries. Dead entries leave the table.
///
/// Must run after the data has been moved; it reads fields at the new
/// locations and uses the not yet compacted table to recognise references.
/// Returns the number of objects whose address changed.
pub fn sweep_the_objects_references(
    memory: &mut Memory,
    marks: &Marks,
    plan: &SlidePlan,
    roots: &[RootSlot],
    model: &dyn ObjectModel,
) -> usize {
    let Memory { arena, objects, .. } = memory;
    let mut offsets = Vec::new();
    let mut moved = 0;
    for (id, entry) in objects.entries().iter().enumerate() {
        if !marks.is_marked(id) {
            continue;
        }
        let address = plan.forward_address(arena, entry.address);
        if address != entry.address {
            moved += 1;
        }
        offsets.clear();
        model.reference_offsets(arena.bytes(address, entry.size), &mut offsets);
        for offset in offsets.iter() {
            let field = address.offset(*offset);
            let value = arena.read_word(field);
            match objects.is_an_object_allocated(value) {
                Some(target) if marks.is_marked(target) => {
                    let forwarded = plan.forward_address(arena, value);
                    arena.write_word(field, forwarded);
                }
                _ => {}
            }
        }
    }

    // a slot may be listed twice; forward the values read before any write
    let values: Vec<Address> = roots.iter().map(|slot| slot.get()).collect();
    for (slot, value) in roots.iter().zip(values) {
        match objects.is_an_object_allocated(value) {
            Some(target) if marks.is_marked(target) => {
                slot.set(plan.forward_address(arena, value));
            }
            _ => {}
        }
    }

    let arena: &Arena = arena;
    objects.retain_live(|id, entry| {
        if marks.is_marked(id) {
            Some(plan.forward_address(arena, entry.address))
        } else {
            None
        }
    });
    moved
}

pub struct Shifter {
    memory: Memory,
    heap: Address,
}

impl Shifter {
    pub fn new(heap_size: usize) -> Result<Self, GcError> {
        let memory = Memory::new(heap_size)?;
        Ok(Self {
            heap: memory.arena.bottom(),
            memory,
        })
    }

    /// Current allocation frontier.
    pub fn frontier(&self) -> Address {
        self.heap
    }
}

impl GarbageCollector for Shifter {
    fn name(&self) -> &'static str {
        "Shifter"
    }

    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
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
        let end = object.offset(size);
        if end != self.heap || object.offset(new_size) > self.memory.arena.top() {
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
        let frontier = self.memory.arena.offset_of(self.heap);
        let marks = mark::mark(&mut self.memory, model, roots);
        let (reclaimed_objects, reclaimed_bytes) = mark::finalize_unmarked(&self.memory, &marks, model);

        let plan = sweep_the_heap_from_top_to_bottom(&self.memory.occupancy, frontier, marks.live_bytes);
        let bytes_moved = sweep_the_heap_from_bottom_to_top(&mut self.memory, &plan, frontier);
        let objects_moved =
            sweep_the_objects_references(&mut self.memory, &marks, &plan, roots, model);
        self.heap = self.memory.arena.address_of(plan.live_bytes());

        CollectionStats {
            live_objects: marks.live_objects,
            live_bytes: marks.live_bytes,
            reclaimed_objects,
            reclaimed_bytes,
            objects_moved,
            bytes_moved,
        }
    }

    fn free_size(&self) -> usize {
        self.memory.arena.top().offset_from(self.heap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::model::{Layout, LayoutTable, Opaque};
    use crate::util::mem::WORD_SIZE;

    fn allocate(shifter: &mut Shifter, size: usize) -> Address {
        let address = shifter.fetch_free_memory(size).unwrap();
        shifter.memory_mut().claim(address, size);
        address
    }

    #[test]
    fn plan_packs_runs_toward_bottom() {
        let mut occupancy = OccupancyBitmap::new(64);
        occupancy.occupy(4, 4);
        occupancy.occupy(16, 8);
        occupancy.occupy(40, 2);
        let plan = sweep_the_heap_from_top_to_bottom(&occupancy, 48, 14);
        assert_eq!(
            plan.slides(),
            &[
                Slide { from: 4, to: 0, len: 4 },
                Slide { from: 16, to: 4, len: 8 },
                Slide { from: 40, to: 12, len: 2 },
            ]
        );
        assert_eq!(plan.forward(17), Some(5));
        assert_eq!(plan.forward(41), Some(13));
        assert_eq!(plan.forward(10), None);
        assert_eq!(plan.forward(0), None);
    }

    #[test]
    fn slides_survivors_in_order() {
        let mut shifter = Shifter::new(256).unwrap();
        let a = allocate(&mut shifter, 16);
        let dead = allocate(&mut shifter, 32);
        let b = allocate(&mut shifter, 24);
        shifter.memory_mut().arena.bytes_mut(b, 24).copy_from_slice(&[9u8; 24]);
        let roots = [RootSlot::new(b), RootSlot::new(a)];

        let stats = shifter.collect(&roots, &Opaque);
        assert_eq!(stats.live_objects, 2);
        assert_eq!(stats.reclaimed_objects, 1);
        assert_eq!(stats.reclaimed_bytes, 32);
        assert_eq!(stats.objects_moved, 1);
        assert_eq!(roots[1].get(), a);
        assert_eq!(roots[0].get(), a.offset(16));
        assert_eq!(roots[0].get(), dead);
        assert_eq!(shifter.memory().objects.top(), 2);
        assert_eq!(shifter.memory().objects.lookup(dead).map(|e| e.size), Some(24));
        assert_eq!(shifter.frontier(), a.offset(40));
        assert_eq!(shifter.memory().occupied_bytes(), 40);
        assert!(shifter.memory().arena.bytes(roots[0].get(), 24).iter().all(|b| *b == 9));
    }

    #[test]
    fn forwards_fields_of_moved_objects() {
        let model = LayoutTable::new();
        let node = model.register(Layout::new("node", vec![WORD_SIZE]));
        let mut shifter = Shifter::new(512).unwrap();
        let garbage = allocate(&mut shifter, 64);
        let head = allocate(&mut shifter, 2 * WORD_SIZE);
        let tail = allocate(&mut shifter, 2 * WORD_SIZE);
        {
            let arena = &mut shifter.memory_mut().arena;
            arena.write_word(head, Address(node));
            arena.write_word(head.offset(WORD_SIZE), tail);
            arena.write_word(tail, Address(node));
        }
        let roots = [RootSlot::new(head)];
        shifter.collect(&roots, &model);

        let bottom = shifter.memory().arena.bottom();
        assert_eq!(roots[0].get(), bottom);
        let arena = &shifter.memory().arena;
        assert_eq!(arena.read_word(bottom.offset(WORD_SIZE)), bottom.offset(2 * WORD_SIZE));
        assert_eq!(garbage, bottom);
        assert_eq!(shifter.memory().objects.top(), 2);
        assert_eq!(shifter.memory().occupied_bytes(), 4 * WORD_SIZE);
    }

    #[test]
    fn shared_root_slot_moves_once() {
        let mut shifter = Shifter::new(256).unwrap();
        let x = allocate(&mut shifter, 16);
        let _dead = allocate(&mut shifter, 16);
        let a = allocate(&mut shifter, 16);
        let b = allocate(&mut shifter, 16);
        shifter.memory_mut().arena.bytes_mut(a, 16).copy_from_slice(&[2u8; 16]);
        shifter.memory_mut().arena.bytes_mut(b, 16).copy_from_slice(&[3u8; 16]);
        let shared = RootSlot::new(b);
        let roots = [RootSlot::new(x), RootSlot::new(a), shared.clone(), shared.clone()];

        shifter.collect(&roots, &Opaque);
        assert_eq!(roots[1].get(), x.offset(16));
        assert_eq!(shared.get(), x.offset(32));
        assert!(shifter.memory().arena.bytes(shared.get(), 16).iter().all(|b| *b == 3));
    }

    #[test]
    fn release_at_frontier_retracts_it() {
        let mut shifter = Shifter::new(128).unwrap();
        let a = allocate(&mut shifter, 16);
        let b = allocate(&mut shifter, 16);
        shifter.release(b, 16);
        assert_eq!(shifter.frontier(), b);
        assert!(shifter.grow_in_place(a, 16, 64));
        assert_eq!(shifter.frontier(), a.offset(64));
        assert!(!shifter.grow_in_place(a, 64, 256));
    }
}
