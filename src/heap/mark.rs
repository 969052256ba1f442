//! Marking phase shared by the non-moving tracer of mark-and-sweep and the
//! shifter.
//!
//! The occupancy bitmap is rebuilt while marking: it is cleared first and
//! every reached object sets its bytes again. Objects are looked up through
//! the object table, so a word that is not a tracked base address is never
//! followed.
use super::memory::{Arena, Memory};
use super::model::ObjectModel;
use super::object_table::ObjectTable;
use super::bitmap::OccupancyBitmap;
use crate::runtime::roots::RootSlot;
use bitvec::prelude::*;

/// Result of a marking phase, indexed by object table id.
pub struct Marks {
    pub marks: BitVec<usize, Lsb0>,
    pub live_objects: usize,
    pub live_bytes: usize,
}

impl Marks {
    #[inline]
    pub fn is_marked(&self, id: usize) -> bool {
        self.marks[id]
    }
}

pub struct Marker<'a> {
    arena: &'a Arena,
    objects: &'a ObjectTable,
    occupancy: &'a mut OccupancyBitmap,
    model: &'a dyn ObjectModel,
    marks: BitVec<usize, Lsb0>,
    grey: Vec<usize>,
    offsets: Vec<usize>,
    live_objects: usize,
    live_bytes: usize,
}

impl<'a> Marker<'a> {
    pub fn new(memory: &'a mut Memory, model: &'a dyn ObjectModel) -> Self {
        let Memory {
            arena,
            objects,
            occupancy,
        } = memory;
        occupancy.clear();
        Self {
            marks: BitVec::repeat(false, objects.top()),
            arena,
            objects,
            occupancy,
            model,
            grey: Vec::new(),
            offsets: Vec::new(),
            live_objects: 0,
            live_bytes: 0,
        }
    }

    pub fn mark_roots(&mut self, roots: &[RootSlot]) {
        for slot in roots {
            let value = slot.get();
            if value.is_null() {
                continue;
            }
            match self.objects.is_an_object_allocated(value) {
                Some(id) => self.mark(id),
                None => trace!("GC: Ignoring root {} (not an object)", value),
            }
        }
    }

    pub fn mark_uncollectable(&mut self) {
        for id in 0..self.objects.top() {
            let entry = self.objects.get(id);
            if !self.model.is_collectable(self.arena.bytes(entry.address, entry.size)) {
                self.mark(id);
            }
        }
    }

    fn mark(&mut self, id: usize) {
        if self.marks[id] {
            return;
        }
        self.marks.set(id, true);
        let entry = self.objects.get(id);
        let offset = self.arena.offset_of(entry.address);
        self.occupancy.occupy(offset, entry.size);
        self.live_objects += 1;
        self.live_bytes += entry.size;
        self.grey.push(id);
    }

    pub fn process_grey(&mut self) {
        while let Some(id) = self.grey.pop() {
            let entry = self.objects.get(id);
            self.offsets.clear();
            self.model
                .reference_offsets(self.arena.bytes(entry.address, entry.size), &mut self.offsets);
            for index in 0..self.offsets.len() {
                let child = self.arena.read_word(entry.address.offset(self.offsets[index]));
                if let Some(child) = self.objects.is_an_object_allocated(child) {
                    self.mark(child);
                }
            }
        }
    }

    pub fn finish(self) -> Marks {
        Marks {
            marks: self.marks,
            live_objects: self.live_objects,
            live_bytes: self.live_bytes,
        }
    }
}

/// Marks everything reachable from `roots` and from non-collectable objects.
pub fn mark(memory: &mut Memory, model: &dyn ObjectModel, roots: &[RootSlot]) -> Marks {
    let mut marker = Marker::new(memory, model);
    marker.mark_uncollectable();
    marker.mark_roots(roots);
    marker.process_grey();
    let marks = marker.finish();
    debug!(
        "GC: Marked {} object(s), {} byte(s)",
        marks.live_objects, marks.live_bytes
    );
    marks
}

/// Runs the finalizer hook of every unmarked object while its bytes are
/// still intact. Returns the count and total size of those objects.
pub fn finalize_unmarked(memory: &Memory, marks: &Marks, model: &dyn ObjectModel) -> (usize, usize) {
    let mut objects = 0;
    let mut bytes = 0;
    for (id, entry) in memory.objects.entries().iter().enumerate() {
        if marks.is_marked(id) {
            continue;
        }
        trace!("GC: Sweep {} ({} bytes)", entry.address, entry.size);
        model.finalize(entry.address, memory.object_bytes(entry));
        objects += 1;
        bytes += entry.size;
    }
    (objects, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::model::{Layout, LayoutTable};
    use crate::util::mem::{Address, WORD_SIZE};

    #[test]
    fn marks_transitively_and_handles_cycles() {
        let model = LayoutTable::new();
        let node = model.register(Layout::new("node", vec![WORD_SIZE]));
        let mut memory = Memory::new(1024).unwrap();
        let bottom = memory.arena.bottom();
        let a = bottom;
        let b = bottom.offset(32);
        let garbage = bottom.offset(64);
        for object in [a, b, garbage].iter() {
            memory.claim(*object, 2 * WORD_SIZE);
            memory.arena.write_word(*object, Address(node));
        }
        memory.arena.write_word(a.offset(WORD_SIZE), b);
        memory.arena.write_word(b.offset(WORD_SIZE), a);
        // a dangling value that is not an object base
        memory.arena.write_word(garbage.offset(WORD_SIZE), bottom.offset(3));

        let marks = mark(&mut memory, &model, &[RootSlot::new(a)]);
        assert_eq!(marks.live_objects, 2);
        assert!(marks.is_marked(0));
        assert!(marks.is_marked(1));
        assert!(!marks.is_marked(2));
        assert_eq!(memory.occupied_bytes(), 4 * WORD_SIZE);
    }

    #[test]
    fn stale_roots_are_ignored() {
        let mut memory = Memory::new(256).unwrap();
        let bottom = memory.arena.bottom();
        memory.claim(bottom, 16);
        let marks = mark(
            &mut memory,
            &crate::heap::model::Opaque,
            &[RootSlot::new(bottom.offset(4)), RootSlot::null()],
        );
        assert_eq!(marks.live_objects, 0);
        assert_eq!(memory.occupied_bytes(), 0);
    }
}
