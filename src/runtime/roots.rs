use crate::util::mem::Address;
use ahash::AHashMap;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A variable holding an object reference.
///
/// The collector reads the slot when it scans roots and writes the new
/// address back when the object moves, so engines must re-read a slot after
/// any call that may collect.
#[derive(Clone)]
pub struct RootSlot(Arc<AtomicUsize>);

impl RootSlot {
    pub fn new(value: Address) -> Self {
        RootSlot(Arc::new(AtomicUsize::new(value.to_usize())))
    }

    pub fn null() -> Self {
        Self::new(Address::null())
    }

    #[inline]
    pub fn get(&self) -> Address {
        Address(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, value: Address) {
        self.0.store(value.to_usize(), Ordering::Release)
    }

    pub fn ptr_eq(&self, other: &RootSlot) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity of the underlying variable, shared by every clone.
    #[inline]
    fn id(&self) -> usize {
        &*self.0 as *const AtomicUsize as usize
    }
}

impl fmt::Debug for RootSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RootSlot({})", self.get())
    }
}

type Frames = Vec<Vec<RootSlot>>;

/// Root set frames of one thread, pushed on method entry and popped on exit.
pub struct RootSetStack {
    id: usize,
    frames: Mutex<Frames>,
}

impl RootSetStack {
    fn new(id: usize) -> Self {
        Self {
            id,
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn add_new_root_set(&self) {
        self.frames.lock().push(Vec::new());
    }

    pub fn add_new_root_set_slot(&self, slot: RootSlot) {
        let mut frames = self.frames.lock();
        match frames.last_mut() {
            Some(frame) => frame.push(slot),
            None => fatal!("root slot added to thread #{} with no root set", self.id),
        }
    }

    /// Creates a slot holding `value` in the top frame.
    pub fn new_slot(&self, value: Address) -> RootSlot {
        let slot = RootSlot::new(value);
        self.add_new_root_set_slot(slot.clone());
        slot
    }

    pub fn pop_last_root_set(&self) {
        if self.frames.lock().pop().is_none() {
            fatal!("root set stack of thread #{} underflow", self.id);
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_in_root_sets(&self, object: Address) -> bool {
        let frames = self.frames.lock();
        contains(&frames, object)
    }
}

fn contains(frames: &Frames, object: Address) -> bool {
    frames
        .iter()
        .flat_map(|frame| frame.iter())
        .any(|slot| slot.get() == object)
}

/// Registry of every attached thread's root set stack plus static roots.
pub struct RootSets {
    stacks: Mutex<Vec<Arc<RootSetStack>>>,
    statics: Mutex<Vec<RootSlot>>,
    next_id: AtomicUsize,
}

impl RootSets {
    pub fn new() -> Self {
        Self {
            stacks: Mutex::new(Vec::new()),
            statics: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn attach(&self) -> Arc<RootSetStack> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stack = Arc::new(RootSetStack::new(id));
        self.stacks.lock().push(stack.clone());
        trace!("GC: Attached root set stack #{}", id);
        stack
    }

    pub fn detach(&self, stack: &Arc<RootSetStack>) -> bool {
        let mut stacks = self.stacks.lock();
        let before = stacks.len();
        stacks.retain(|attached| !Arc::ptr_eq(attached, stack));
        trace!("GC: Detached root set stack #{}", stack.id());
        stacks.len() != before
    }

    pub fn attached(&self) -> usize {
        self.stacks.lock().len()
    }

    pub fn add_static_root(&self, slot: RootSlot) {
        self.statics.lock().push(slot);
    }

    pub fn remove_static_root(&self, slot: &RootSlot) {
        self.statics.lock().retain(|root| !root.ptr_eq(slot));
    }

    pub fn is_in_root_sets(&self, object: Address) -> bool {
        let stacks = self.stacks.lock();
        let in_frames = stacks
            .iter()
            .any(|stack| contains(&stack.frames.lock(), object));
        in_frames || self.statics.lock().iter().any(|slot| slot.get() == object)
    }

    /// Runs `f` over every root slot while holding all root set locks, so no
    /// thread can push or pop a frame until `f` returns. A slot registered
    /// more than once is handed out once.
    pub fn with_locked<R, F: FnOnce(&[RootSlot]) -> R>(&self, f: F) -> R {
        let stacks = self.stacks.lock();
        let guards: Vec<MutexGuard<Frames>> = stacks.iter().map(|stack| stack.frames.lock()).collect();
        let statics = self.statics.lock();
        let mut slots = Vec::new();
        for frames in guards.iter() {
            for frame in frames.iter() {
                slots.extend(frame.iter().cloned());
            }
        }
        slots.extend(statics.iter().cloned());
        let mut seen: AHashMap<_, ()> = AHashMap::with_capacity(slots.len());
        slots.retain(|slot| seen.insert(slot.id(), ()).is_none());
        f(&slots)
    }
}

impl Default for RootSets {
    fn default() -> Self {
        Self::new()
    }
}
