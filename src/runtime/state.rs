use super::config::GcConfig;
use super::roots::{RootSetStack, RootSets, RootSlot};
use crate::error::GcError;
use crate::heap::memory::Memory;
use crate::heap::model::ObjectModel;
use crate::heap::object_table::ObjectReference;
use crate::heap::{CollectionStats, GarbageCollector};
use crate::util::mem::{Address, Region, WORD_SIZE};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type RcGcState = Arc<GcState>;

/// Profiling counters and heap figures.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct GcInformation {
    /// Total time spent collecting. Only recorded with `profile` set.
    pub collect_time: Duration,
    /// Total time spent in allocation and resize calls, collections they
    /// trigger included. Only recorded with `profile` set.
    pub alloc_time: Duration,
    pub collections: usize,
    /// Bytes usable for objects.
    pub heap_memory_allocated: usize,
    /// Bytes currently held by objects.
    pub actual_heap_memory: usize,
    /// High-water mark of `actual_heap_memory`.
    pub max_heap_memory: usize,
    /// Bookkeeping bytes: object table and occupancy bitmap.
    pub over_head: usize,
    pub last_cycle: CollectionStats,
}

struct Heap {
    collector: Box<dyn GarbageCollector>,
    info: GcInformation,
}

/// The collector context owned by the embedding engine.
///
/// One mutex guards the heap and the collector: allocation, resize and
/// collection run to completion while holding it. Root set stacks have their
/// own locks; a collection takes all of them for its whole duration.
pub struct GcState {
    heap: Mutex<Heap>,
    roots: Arc<RootSets>,
    model: Arc<dyn ObjectModel>,
    config: GcConfig,
    collection_requested: AtomicBool,
}

impl GcState {
    pub fn init(config: GcConfig, model: Arc<dyn ObjectModel>) -> Result<Self, GcError> {
        config.validate()?;
        let heap_size = config.effective_heap_size();
        let collector = config.collector.build(heap_size)?;
        debug!(
            "GC: {} initialized, {} byte(s) of heap",
            collector.name(),
            collector.heap_size()
        );
        Ok(Self {
            heap: Mutex::new(Heap {
                collector,
                info: GcInformation::default(),
            }),
            roots: Arc::new(RootSets::new()),
            model,
            config,
            collection_requested: AtomicBool::new(false),
        })
    }

    /// Finalizes every remaining object and releases the heap.
    pub fn shutdown(self) -> Result<(), GcError> {
        let attached = self.roots.attached();
        if attached != 0 {
            return Err(GcError::ThreadsAttached(attached));
        }
        let heap = self.heap.into_inner();
        let memory = heap.collector.memory();
        for entry in memory.objects.entries() {
            self.model.finalize(entry.address, memory.object_bytes(entry));
        }
        debug!(
            "GC: {} shut down after {} collection(s)",
            heap.collector.name(),
            heap.info.collections
        );
        Ok(())
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<dyn ObjectModel> {
        &self.model
    }

    pub fn roots(&self) -> &Arc<RootSets> {
        &self.roots
    }

    pub fn attach_current_thread(&self) -> Arc<RootSetStack> {
        self.roots.attach()
    }

    pub fn detach_thread(&self, stack: &Arc<RootSetStack>) {
        self.roots.detach(stack);
    }

    pub fn add_static_root(&self, slot: RootSlot) {
        self.roots.add_static_root(slot);
    }

    pub fn is_in_root_sets(&self, object: Address) -> bool {
        self.roots.is_in_root_sets(object)
    }

    pub fn name(&self) -> &'static str {
        self.heap.lock().collector.name()
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn author(&self) -> &'static str {
        env!("CARGO_PKG_AUTHORS")
    }

    fn stopwatch(&self) -> Option<Instant> {
        if self.config.profile {
            Some(Instant::now())
        } else {
            None
        }
    }

    /// Allocates `size` zeroed bytes, collecting once if the heap is full.
    /// Exhaustion after that collection aborts.
    pub fn allocate(&self, size: usize) -> Address {
        match self.try_allocate(size) {
            Ok(address) => address,
            Err(error) => fatal!("allocate: {}", error),
        }
    }

    pub fn try_allocate(&self, size: usize) -> Result<Address, GcError> {
        self.allocate_locked(size, |_, _| {})
    }

    /// Allocates `size` bytes, runs `init` over them and stores the address
    /// in `slot`, all under the collector lock. Slots read by `init` are
    /// current, since no collection can run before it returns.
    pub fn allocate_with<F: FnOnce(&mut [u8])>(&self, slot: &RootSlot, size: usize, init: F) -> Address {
        let result = self.allocate_locked(size, |memory, address| {
            init(memory.arena.bytes_mut(address, size));
            slot.set(address);
        });
        match result {
            Ok(address) => address,
            Err(error) => fatal!("allocate: {}", error),
        }
    }

    fn allocate_locked<F>(&self, size: usize, init: F) -> Result<Address, GcError>
    where
        F: FnOnce(&mut Memory, Address),
    {
        if size == 0 {
            fatal!("allocate: object size must be positive");
        }
        let stopwatch = self.stopwatch();
        let mut heap = self.heap.lock();
        let size = heap.collector.object_size(size);
        let address = match heap.collector.fetch_free_memory(size) {
            Some(address) => address,
            None => {
                trace!("GC: No room for {} bytes, collecting", size);
                self.collect_locked(&mut heap, &[]);
                match heap.collector.fetch_free_memory(size) {
                    Some(address) => address,
                    None => {
                        return Err(GcError::OutOfMemory {
                            requested: size,
                            free: heap.collector.free_size(),
                        })
                    }
                }
            }
        };
        let memory = heap.collector.memory_mut();
        memory.claim(address, size);
        init(memory, address);
        self.account(&mut heap, stopwatch);
        Ok(address)
    }

    /// Resizes a live object and returns its address, which differs from
    /// `object` when the contents had to be moved.
    pub fn resize(&self, object: Address, new_size: usize) -> Address {
        if new_size == 0 {
            fatal!("resize: object size must be positive");
        }
        let stopwatch = self.stopwatch();
        let mut heap = self.heap.lock();
        let (id, size) = match heap.collector.memory().objects.is_an_object_allocated(object) {
            Some(id) => (id, heap.collector.memory().objects.get(id).size),
            None => fatal!("resize: {} is not an allocated object", object),
        };
        if new_size > heap.collector.heap_size() {
            fatal!(
                "resize: {} bytes requested for {}, heap holds {} bytes",
                new_size,
                object,
                heap.collector.heap_size()
            );
        }
        let new_size = heap.collector.object_size(new_size);

        if new_size <= size {
            if new_size < size {
                heap.collector.release(object.offset(new_size), size - new_size);
                heap.collector.memory_mut().objects.relocate(id, object, new_size);
            }
            self.account(&mut heap, stopwatch);
            return object;
        }

        if heap.collector.grow_in_place(object, size, new_size) {
            trace!("GC: Grow {} in place to {} bytes", object, new_size);
            let memory = heap.collector.memory_mut();
            let extension = object.offset(size);
            let offset = memory.arena.offset_of(extension);
            memory.arena.zero(extension, new_size - size);
            memory.occupancy.occupy(offset, new_size - size);
            memory.objects.relocate(id, object, new_size);
            self.account(&mut heap, stopwatch);
            return object;
        }

        let (object, target) = match heap.collector.fetch_free_memory(new_size) {
            Some(target) => (object, target),
            None => {
                let pinned = RootSlot::new(object);
                self.collect_locked(&mut heap, &[pinned.clone()]);
                match heap.collector.fetch_free_memory(new_size) {
                    Some(target) => (pinned.get(), target),
                    None => fatal!(
                        "resize: out of memory moving {} from {} to {} bytes",
                        pinned.get(),
                        size,
                        new_size
                    ),
                }
            }
        };

        let memory = heap.collector.memory_mut();
        let id = match memory.objects.is_an_object_allocated(object) {
            Some(id) => id,
            None => fatal!("resize: {} vanished during collection", object),
        };
        let offset = memory.arena.offset_of(target);
        memory.arena.zero(target, new_size);
        memory.occupancy.occupy(offset, new_size);
        memory.arena.copy(object, target, size);
        memory.objects.relocate(id, target, new_size);
        heap.collector.release(object, size);
        trace!("GC: Moved {} -> {} ({} bytes)", object, target, new_size);
        self.account(&mut heap, stopwatch);
        target
    }

    fn account(&self, heap: &mut Heap, stopwatch: Option<Instant>) {
        let occupied = heap.collector.memory().occupied_bytes();
        if occupied > heap.info.max_heap_memory {
            heap.info.max_heap_memory = occupied;
        }
        if occupied as f64 > heap.collector.heap_size() as f64 * self.config.collection_threshold {
            self.collection_requested.store(true, Ordering::Release);
        }
        if let Some(start) = stopwatch {
            heap.info.alloc_time += start.elapsed();
        }
    }

    pub fn collect(&self) -> CollectionStats {
        let mut heap = self.heap.lock();
        self.collect_locked(&mut heap, &[])
    }

    /// Whether an allocation crossed the occupancy threshold since the last
    /// collection.
    pub fn should_collect(&self) -> bool {
        self.collection_requested.load(Ordering::Acquire)
    }

    /// Collects if a collection was requested. Returns whether it did.
    pub fn safepoint(&self) -> bool {
        if self.should_collect() {
            trace!("Safepoint reached, triggering collection");
            self.collect();
            true
        } else {
            false
        }
    }

    fn collect_locked(&self, heap: &mut Heap, extra_roots: &[RootSlot]) -> CollectionStats {
        let start = Instant::now();
        let cycle = heap.info.collections + 1;
        if self.config.verbose {
            info!(
                "GC: {} collection #{} started, {} byte(s) occupied",
                heap.collector.name(),
                cycle,
                heap.collector.memory().occupied_bytes()
            );
        }

        let model = &*self.model;
        let collector = &mut heap.collector;
        let stats = self.roots.with_locked(|roots| {
            if extra_roots.is_empty() {
                collector.collect(roots, model)
            } else {
                let mut all = roots.to_vec();
                all.extend(extra_roots.iter().cloned());
                collector.collect(&all, model)
            }
        });
        self.collection_requested.store(false, Ordering::Release);

        let elapsed = start.elapsed();
        heap.info.collections = cycle;
        heap.info.last_cycle = stats;
        if self.config.profile {
            heap.info.collect_time += elapsed;
        }
        if self.config.verbose {
            info!(
                "GC: {} collection #{} finished in {:?}: {} live object(s), {} reclaimed ({} bytes), {} moved",
                heap.collector.name(),
                cycle,
                elapsed,
                stats.live_objects,
                stats.reclaimed_objects,
                stats.reclaimed_bytes,
                stats.objects_moved
            );
        } else {
            debug!(
                "GC: Collection #{}: {} live, {} reclaimed",
                cycle, stats.live_objects, stats.reclaimed_objects
            );
        }
        stats
    }

    pub fn free_size(&self) -> usize {
        self.heap.lock().collector.free_size()
    }

    pub fn information(&self) -> GcInformation {
        let heap = self.heap.lock();
        let memory = heap.collector.memory();
        GcInformation {
            heap_memory_allocated: heap.collector.heap_size(),
            actual_heap_memory: memory.occupied_bytes(),
            over_head: memory.objects.overhead() + memory.arena.size() / 8,
            ..heap.info
        }
    }

    fn lock_heap(&self) -> MutexGuard<Heap> {
        self.heap.lock()
    }

    fn object_entry(memory: &Memory, object: Address) -> ObjectReference {
        match memory.object(object) {
            Some(entry) => entry,
            None => fatal!("{} is not an allocated object", object),
        }
    }

    fn field(memory: &Memory, object: Address, offset: usize, len: usize) -> Address {
        let entry = Self::object_entry(memory, object);
        if offset + len > entry.size {
            fatal!(
                "access to +{}..+{} of {} outside its {} bytes",
                offset,
                offset + len,
                object,
                entry.size
            );
        }
        object.offset(offset)
    }

    /// Reads a reference field. Addresses go stale when a moving collector
    /// runs, so with several mutating threads use the slot based
    /// [`load_reference`](Self::load_reference) instead.
    pub fn read_reference(&self, object: Address, offset: usize) -> Address {
        let heap = self.lock_heap();
        let memory = heap.collector.memory();
        let field = Self::field(memory, object, offset, WORD_SIZE);
        memory.arena.read_word(field)
    }

    pub fn write_reference(&self, object: Address, offset: usize, value: Address) {
        let mut heap = self.lock_heap();
        let memory = heap.collector.memory_mut();
        let field = Self::field(memory, object, offset, WORD_SIZE);
        memory.arena.write_word(field, value);
    }

    /// Stores the object held by `value` into a field of the object held
    /// by `object`. Both slots are read under the collector lock.
    pub fn store_reference(&self, object: &RootSlot, offset: usize, value: &RootSlot) {
        let mut heap = self.lock_heap();
        let memory = heap.collector.memory_mut();
        let field = Self::field(memory, object.get(), offset, WORD_SIZE);
        memory.arena.write_word(field, value.get());
    }

    /// Loads a field of the object held by `object` into `into`.
    pub fn load_reference(&self, object: &RootSlot, offset: usize, into: &RootSlot) {
        let heap = self.lock_heap();
        let memory = heap.collector.memory();
        let field = Self::field(memory, object.get(), offset, WORD_SIZE);
        into.set(memory.arena.read_word(field));
    }

    /// The table entry of the object a slot currently holds.
    pub fn resolve(&self, slot: &RootSlot) -> Option<ObjectReference> {
        self.lock_heap().collector.memory().object(slot.get())
    }

    pub fn read_bytes(&self, object: Address) -> Vec<u8> {
        let heap = self.lock_heap();
        let memory = heap.collector.memory();
        let entry = Self::object_entry(memory, object);
        memory.object_bytes(&entry).to_vec()
    }

    pub fn write_bytes(&self, object: Address, offset: usize, bytes: &[u8]) {
        let mut heap = self.lock_heap();
        let memory = heap.collector.memory_mut();
        let field = Self::field(memory, object, offset, bytes.len());
        memory.arena.bytes_mut(field, bytes.len()).copy_from_slice(bytes);
    }

    pub fn object_size(&self, object: Address) -> Option<usize> {
        self.lock_heap().collector.memory().object(object).map(|entry| entry.size)
    }

    pub fn is_an_object_allocated(&self, object: Address) -> bool {
        self.lock_heap()
            .collector
            .memory()
            .objects
            .is_an_object_allocated(object)
            .is_some()
    }

    /// Snapshot of the object table in table order.
    pub fn objects(&self) -> Vec<ObjectReference> {
        self.lock_heap().collector.memory().objects.entries().to_vec()
    }

    pub fn object_count(&self) -> usize {
        self.lock_heap().collector.memory().objects.top()
    }

    /// Bytes set in the occupancy bitmap.
    pub fn occupied_bytes(&self) -> usize {
        self.lock_heap().collector.memory().occupied_bytes()
    }

    /// `[bottom, top)` of the arena.
    pub fn heap_region(&self) -> Region {
        self.lock_heap().collector.memory().arena.region()
    }
}
