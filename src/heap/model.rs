//! Object shape metadata supplied by the embedding engine.
use crate::util::mem::{Address, WORD_SIZE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Describes where an object keeps its references.
///
/// The collector only hands out byte slices of tracked objects; it never
/// interprets object contents except through this trait.
pub trait ObjectModel: Send + Sync {
    /// Pushes the byte offsets of every reference-holding word of `object`.
    fn reference_offsets(&self, object: &[u8], offsets: &mut Vec<usize>);

    /// Objects that are not collectable stay alive without being rooted.
    fn is_collectable(&self, _object: &[u8]) -> bool {
        true
    }

    /// Called once for an object right before its memory is reclaimed.
    fn finalize(&self, _address: Address, _object: &[u8]) {}
}

/// Model for heaps holding raw data only.
pub struct Opaque;

impl ObjectModel for Opaque {
    fn reference_offsets(&self, _object: &[u8], _offsets: &mut Vec<usize>) {}
}

pub type TypeTag = usize;

/// Tag of the built-in layout without references. Zeroed memory carries it.
pub const LEAF: TypeTag = 0;

#[derive(Clone, Debug)]
pub struct Layout {
    pub name: String,
    pub reference_offsets: Vec<usize>,
    pub collectable: bool,
}

impl Layout {
    pub fn new(name: &str, reference_offsets: Vec<usize>) -> Self {
        for offset in reference_offsets.iter() {
            if *offset < WORD_SIZE {
                fatal!("layout {}: offset {} overlaps the type tag", name, offset);
            }
        }
        Self {
            name: name.to_owned(),
            reference_offsets,
            collectable: true,
        }
    }

    pub fn leaf(name: &str) -> Self {
        Self::new(name, vec![])
    }

    pub fn pinned(mut self) -> Self {
        self.collectable = false;
        self
    }
}

/// An [`ObjectModel`] where the first word of every object is a [`TypeTag`]
/// naming one of the registered layouts.
pub struct LayoutTable {
    layouts: RwLock<Vec<Layout>>,
    finalized: AtomicUsize,
}

impl LayoutTable {
    pub fn new() -> Self {
        Self {
            layouts: RwLock::new(vec![Layout::leaf("leaf")]),
            finalized: AtomicUsize::new(0),
        }
    }

    pub fn register(&self, layout: Layout) -> TypeTag {
        let mut layouts = self.layouts.write();
        layouts.push(layout);
        layouts.len() - 1
    }

    pub fn layout(&self, tag: TypeTag) -> Option<Layout> {
        self.layouts.read().get(tag).cloned()
    }

    pub fn tag_of(object: &[u8]) -> TypeTag {
        if object.len() < WORD_SIZE {
            return LEAF;
        }
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(&object[..WORD_SIZE]);
        usize::from_le_bytes(word)
    }

    /// Number of objects finalized so far.
    pub fn finalized(&self) -> usize {
        self.finalized.load(Ordering::Relaxed)
    }
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectModel for LayoutTable {
    fn reference_offsets(&self, object: &[u8], offsets: &mut Vec<usize>) {
        let tag = Self::tag_of(object);
        let layouts = self.layouts.read();
        match layouts.get(tag) {
            Some(layout) => offsets.extend(
                layout
                    .reference_offsets
                    .iter()
                    .copied()
                    .filter(|offset| offset + WORD_SIZE <= object.len()),
            ),
            None => fatal!("unknown type tag {} in object header", tag),
        }
    }

    fn is_collectable(&self, object: &[u8]) -> bool {
        let tag = Self::tag_of(object);
        self.layouts
            .read()
            .get(tag)
            .map(|layout| layout.collectable)
            .unwrap_or(true)
    }

    fn finalize(&self, address: Address, _object: &[u8]) {
        trace!("GC: Finalize {}", address);
        self.finalized.fetch_add(1, Ordering::Relaxed);
    }
}
