use super::bitmap::OccupancyBitmap;
use super::object_table::{ObjectReference, ObjectTable};
use crate::error::GcError;
use crate::util::mem::*;

/// First arena address. Keeps the null address outside every heap.
pub const ARENA_BASE: usize = 0x10000;

/// A single owned byte buffer addressed through [`Address`] values.
pub struct Arena {
    bytes: Vec<u8>,
    region: Region,
}

impl Arena {
    pub fn new(size: usize) -> Result<Self, GcError> {
        if size == 0 {
            return Err(GcError::InvalidConfig("heap size must be positive".to_owned()));
        }
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| GcError::ArenaUnavailable { size })?;
        bytes.resize(size, 0);
        let start = Address::from(ARENA_BASE);
        Ok(Self {
            bytes,
            region: Region::new(start, start.offset(size)),
        })
    }

    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    #[inline]
    pub fn bottom(&self) -> Address {
        self.region.start
    }

    #[inline]
    pub fn top(&self) -> Address {
        self.region.end
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn offset_of(&self, address: Address) -> usize {
        if address < self.region.start || address > self.region.end {
            fatal!("address {} outside heap {}", address, self.region);
        }
        address.offset_from(self.region.start)
    }

    #[inline]
    pub fn address_of(&self, offset: usize) -> Address {
        self.region.start.offset(offset)
    }

    fn span(&self, address: Address, size: usize) -> std::ops::Range<usize> {
        if !self.region.contains_span(address, size) {
            fatal!(
                "span {} of {} bytes outside heap {}",
                address,
                size,
                self.region
            );
        }
        let offset = address.offset_from(self.region.start);
        offset..offset + size
    }

    pub fn bytes(&self, address: Address, size: usize) -> &[u8] {
        let span = self.span(address, size);
        &self.bytes[span]
    }

    pub fn bytes_mut(&mut self, address: Address, size: usize) -> &mut [u8] {
        let span = self.span(address, size);
        &mut self.bytes[span]
    }

    pub fn read_word(&self, address: Address) -> Address {
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(self.bytes(address, WORD_SIZE));
        Address(usize::from_le_bytes(word))
    }

    pub fn write_word(&mut self, address: Address, value: Address) {
        self.bytes_mut(address, WORD_SIZE)
            .copy_from_slice(&value.0.to_le_bytes());
    }

    /// Moves `size` bytes from `from` to `to`. The spans may overlap.
    pub fn copy(&mut self, from: Address, to: Address, size: usize) {
        let source = self.span(from, size);
        let target = self.span(to, size);
        self.bytes.copy_within(source, target.start);
    }

    pub fn zero(&mut self, address: Address, size: usize) {
        for byte in self.bytes_mut(address, size) {
            *byte = 0;
        }
    }
}

/// Heap state shared by every collector: arena, occupancy bitmap and the
/// object reference table.
pub struct Memory {
    pub arena: Arena,
    pub occupancy: OccupancyBitmap,
    pub objects: ObjectTable,
}

impl Memory {
    pub fn new(size: usize) -> Result<Self, GcError> {
        let arena = Arena::new(size)?;
        Ok(Self {
            occupancy: OccupancyBitmap::new(arena.size()),
            objects: ObjectTable::new(),
            arena,
        })
    }

    /// Registers a freshly found span as an object. The span is zeroed.
    pub fn claim(&mut self, address: Address, size: usize) -> usize {
        let offset = self.arena.offset_of(address);
        self.arena.zero(address, size);
        self.occupancy.occupy(offset, size);
        trace!("GC: Claim {} ({} bytes)", address, size);
        self.objects.add_object_reference(address, size)
    }

    pub fn release(&mut self, address: Address, size: usize) {
        let offset = self.arena.offset_of(address);
        self.occupancy.vacate(offset, size);
    }

    pub fn object(&self, address: Address) -> Option<ObjectReference> {
        self.objects.lookup(address)
    }

    pub fn object_bytes(&self, object: &ObjectReference) -> &[u8] {
        self.arena.bytes(object.address, object.size)
    }

    pub fn occupied_bytes(&self) -> usize {
        self.occupancy.count()
    }
}
