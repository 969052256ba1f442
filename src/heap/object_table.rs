//! Object reference table.
//!
//! Every allocation is registered here under the collector's lock. The table
//! is the authority on which addresses denote objects: tracing only follows
//! words whose value is a registered base address, so stale or foreign values
//! found in object fields are ignored instead of being dereferenced.
use crate::util::mem::Address;
use ahash::AHashMap;

const INITIAL_CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ObjectReference {
    pub address: Address,
    pub size: usize,
}

impl ObjectReference {
    pub fn end(&self) -> Address {
        self.address.offset(self.size)
    }
}

pub struct ObjectTable {
    entries: Vec<ObjectReference>,
    index: AHashMap<Address, usize>,
    max: usize,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
            index: AHashMap::with_capacity(INITIAL_CAPACITY),
            max: 0,
        }
    }

    pub fn add_object_reference(&mut self, address: Address, size: usize) -> usize {
        if self.entries.len() == self.entries.capacity() {
            let grow = std::cmp::max(self.entries.len(), INITIAL_CAPACITY);
            self.entries.reserve_exact(grow);
        }
        let id = self.entries.len();
        if self.index.insert(address, id).is_some() {
            fatal!("object {} registered twice", address);
        }
        self.entries.push(ObjectReference { address, size });
        self.max = std::cmp::max(self.max, self.entries.len());
        id
    }

    /// Returns the table id of the object based at `address`, if any.
    #[inline]
    pub fn is_an_object_allocated(&self, address: Address) -> Option<usize> {
        self.index.get(&address).copied()
    }

    #[inline]
    pub fn get(&self, id: usize) -> ObjectReference {
        self.entries[id]
    }

    pub fn lookup(&self, address: Address) -> Option<ObjectReference> {
        self.is_an_object_allocated(address).map(|id| self.entries[id])
    }

    /// Logical length.
    pub fn top(&self) -> usize {
        self.entries.len()
    }

    pub fn allocated(&self) -> usize {
        self.entries.capacity()
    }

    /// High-water mark of `top`.
    pub fn max(&self) -> usize {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ObjectReference] {
        &self.entries
    }

    pub fn total_size(&self) -> usize {
        self.entries.iter().map(|entry| entry.size).sum()
    }

    pub fn overhead(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<ObjectReference>()
    }

    pub fn relocate(&mut self, id: usize, address: Address, size: usize) {
        let old = self.entries[id].address;
        self.index.remove(&old);
        if self.index.insert(address, id).is_some() {
            fatal!("object {} registered twice", address);
        }
        self.entries[id] = ObjectReference { address, size };
    }

    pub fn remove(&mut self, address: Address) -> Option<ObjectReference> {
        let id = self.index.remove(&address)?;
        let entry = self.entries.remove(id);
        for (index, moved) in self.entries.iter().enumerate().skip(id) {
            self.index.insert(moved.address, index);
        }
        Some(entry)
    }

    /// Compacts the table after a collection.
    ///
    /// `forward` sees each entry with its current id and returns the address
    /// the object lives at after the cycle, or `None` when it died. Survivors
    /// keep their relative order. Returns the number of dropped entries.
    pub fn retain_live<F>(&mut self, mut forward: F) -> usize
    where
        F: FnMut(usize, &ObjectReference) -> Option<Address>,
    {
        let before = self.entries.len();
        let mut survivors = Vec::with_capacity(self.entries.capacity());
        for (id, entry) in self.entries.iter().enumerate() {
            if let Some(address) = forward(id, entry) {
                survivors.push(ObjectReference {
                    address,
                    size: entry.size,
                });
            }
        }
        self.entries = survivors;
        self.reindex();
        before - self.entries.len()
    }

    /// Replaces the whole table, used when a copying cycle rebuilds it.
    pub fn replace(&mut self, entries: Vec<ObjectReference>) {
        self.entries = entries;
        self.max = std::cmp::max(self.max, self.entries.len());
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (id, entry) in self.entries.iter().enumerate() {
            if self.index.insert(entry.address, id).is_some() {
                fatal!("object {} registered twice", entry.address);
            }
        }
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_tracks_high_water_mark() {
        let mut table = ObjectTable::new();
        for i in 0..200 {
            table.add_object_reference(Address(0x1000 + i * 16), 16);
        }
        assert_eq!(table.top(), 200);
        assert!(table.allocated() >= 200);
        assert_eq!(table.max(), 200);
        assert_eq!(table.is_an_object_allocated(Address(0x1000 + 16 * 7)), Some(7));
        assert_eq!(table.is_an_object_allocated(Address(0x1008)), None);

        table.retain_live(|id, _| if id % 2 == 0 { None } else { Some(Address(0x9000 + id)) });
        assert_eq!(table.top(), 100);
        assert_eq!(table.max(), 200);
        assert_eq!(table.get(0).address, Address(0x9001));
        assert_eq!(table.is_an_object_allocated(Address(0x9003)), Some(1));
        assert_eq!(table.is_an_object_allocated(Address(0x1000 + 16)), None);
    }

    #[test]
    fn remove_keeps_index_consistent() {
        let mut table = ObjectTable::new();
        table.add_object_reference(Address(0x100), 8);
        table.add_object_reference(Address(0x200), 8);
        table.add_object_reference(Address(0x300), 8);
        assert_eq!(table.remove(Address(0x200)).map(|e| e.size), Some(8));
        assert_eq!(table.is_an_object_allocated(Address(0x300)), Some(1));
        assert_eq!(table.remove(Address(0x200)), None);
    }

    #[test]
    fn relocate_updates_index() {
        let mut table = ObjectTable::new();
        let id = table.add_object_reference(Address(0x100), 8);
        table.relocate(id, Address(0x800), 32);
        assert_eq!(table.lookup(Address(0x800)).map(|e| e.size), Some(32));
        assert_eq!(table.is_an_object_allocated(Address(0x100)), None);
    }

    #[test]
    #[should_panic]
    fn duplicate_registration_is_fatal() {
        let mut table = ObjectTable::new();
        table.add_object_reference(Address(0x100), 8);
        table.add_object_reference(Address(0x100), 8);
    }
}
