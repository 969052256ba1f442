pub mod bitmap;
pub mod copy;
pub mod free_list;
pub mod mark;
pub mod mark_sweep;
pub mod memory;
pub mod model;
pub mod object_table;
pub mod shifter;

use crate::error::GcError;
use crate::runtime::roots::RootSlot;
use crate::util::mem::Address;
use memory::Memory;
use model::ObjectModel;
use std::fmt;
use std::str::FromStr;

/// Counters of a single collection cycle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub live_objects: usize,
    pub live_bytes: usize,
    pub reclaimed_objects: usize,
    pub reclaimed_bytes: usize,
    pub objects_moved: usize,
    pub bytes_moved: usize,
}

/// A collection algorithm together with the allocation policy it needs.
///
/// All methods run under the collector lock held by
/// [`GcState`](crate::runtime::state::GcState); implementations never lock.
pub trait GarbageCollector: Send {
    fn name(&self) -> &'static str;

    fn memory(&self) -> &Memory;
    fn memory_mut(&mut self) -> &mut Memory;

    /// Smallest span the collector hands out for a request of `size` bytes.
    fn object_size(&self, size: usize) -> usize {
        size
    }

    /// Finds `size` free bytes without collecting. The span is not claimed.
    fn fetch_free_memory(&mut self, size: usize) -> Option<Address>;

    /// Extends the object at `object` from `size` to `new_size` bytes without
    /// moving it, if the bytes right after it are available.
    fn grow_in_place(&mut self, object: Address, size: usize, new_size: usize) -> bool;

    /// Gives back a span that no longer belongs to an object.
    fn release(&mut self, address: Address, size: usize);

    /// Runs a full cycle. Every root slot that refers to a moved object is
    /// updated before this returns.
    fn collect(&mut self, roots: &[RootSlot], model: &dyn ObjectModel) -> CollectionStats;

    /// Bytes still available for allocation without collecting.
    fn free_size(&self) -> usize;

    /// Bytes usable for objects. Less than the arena when part of it is
    /// reserved for copying.
    fn heap_size(&self) -> usize {
        self.memory().arena.size()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectorKind {
    Shifter,
    MarkAndSweep,
    Copy,
}

impl CollectorKind {
    pub fn build(self, heap_size: usize) -> Result<Box<dyn GarbageCollector>, GcError> {
        Ok(match self {
            CollectorKind::Shifter => Box::new(shifter::Shifter::new(heap_size)?),
            CollectorKind::MarkAndSweep => Box::new(mark_sweep::MarkAndSweep::new(heap_size)?),
            CollectorKind::Copy => Box::new(copy::SemiSpace::new(heap_size)?),
        })
    }

    pub fn all() -> [CollectorKind; 3] {
        [
            CollectorKind::Shifter,
            CollectorKind::MarkAndSweep,
            CollectorKind::Copy,
        ]
    }
}

impl Default for CollectorKind {
    fn default() -> Self {
        CollectorKind::Shifter
    }
}

impl FromStr for CollectorKind {
    type Err = GcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shifter" | "slide" | "sliding" => Ok(CollectorKind::Shifter),
            "markandsweep" | "mark-and-sweep" | "marksweep" | "ms" => Ok(CollectorKind::MarkAndSweep),
            "copy" | "copying" | "semispace" => Ok(CollectorKind::Copy),
            _ => Err(GcError::InvalidConfig(format!("unknown collector '{}'", s))),
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CollectorKind::Shifter => "shifter",
            CollectorKind::MarkAndSweep => "mark-and-sweep",
            CollectorKind::Copy => "copy",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_collector_names() {
        assert_eq!("Shifter".parse::<CollectorKind>().unwrap(), CollectorKind::Shifter);
        assert_eq!("ms".parse::<CollectorKind>().unwrap(), CollectorKind::MarkAndSweep);
        assert_eq!("copy".parse::<CollectorKind>().unwrap(), CollectorKind::Copy);
        assert!("boehm".parse::<CollectorKind>().is_err());
        for kind in CollectorKind::all().iter() {
            assert_eq!(kind.to_string().parse::<CollectorKind>().unwrap(), *kind);
        }
    }
}
