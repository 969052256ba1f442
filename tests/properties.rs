use cilgc::heap::model::Opaque;
use cilgc::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;

const LEFT: usize = WORD_SIZE;
const RIGHT: usize = 2 * WORD_SIZE;

struct Graph {
    gc: GcState,
    model: Arc<LayoutTable>,
    node: TypeTag,
}

impl Graph {
    fn new(kind: CollectorKind, heap_size: usize) -> Self {
        let model = Arc::new(LayoutTable::new());
        let node = model.register(Layout::new("node", vec![LEFT, RIGHT]));
        let config = GcConfig {
            collector: kind,
            page_aligned: false,
            ..GcConfig::with_heap_size(heap_size)
        };
        let gc = GcState::init(config, model.clone()).unwrap();
        Graph { gc, model, node }
    }

    fn node(&self, slot: &RootSlot, size: usize) -> Option<Address> {
        let tag = self.node;
        match self.gc.try_allocate(size) {
            Ok(address) => {
                self.gc.write_reference(address, 0, Address(tag));
                slot.set(address);
                Some(address)
            }
            Err(GcError::OutOfMemory { .. }) => None,
            Err(error) => panic!("unexpected {}", error),
        }
    }

    /// Addresses reachable from `roots`, walking the node layout.
    fn reachable(&self, roots: &[RootSlot]) -> HashSet<Address> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Address> = roots
            .iter()
            .map(|slot| slot.get())
            .filter(|address| address.is_non_null())
            .collect();
        let mut offsets = Vec::new();
        while let Some(address) = stack.pop() {
            if !seen.insert(address) {
                continue;
            }
            assert!(
                self.gc.is_an_object_allocated(address),
                "reachable {} missing from the object table",
                address
            );
            offsets.clear();
            self.model
                .reference_offsets(&self.gc.read_bytes(address), &mut offsets);
            for offset in offsets.iter() {
                let child = self.gc.read_reference(address, *offset);
                if child.is_non_null() {
                    stack.push(child);
                }
            }
        }
        seen
    }

    fn check_bitmap(&self) {
        let total: usize = self.gc.objects().iter().map(|entry| entry.size).sum();
        assert_eq!(self.gc.occupied_bytes(), total);
    }
}

fn random_mutation(kind: CollectorKind, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let graph = Graph::new(kind, 16 * 1024);
    let gc = &graph.gc;
    let stack = gc.attach_current_thread();
    stack.add_new_root_set();
    let roots: Vec<RootSlot> = (0..8).map(|_| stack.new_slot(Address::null())).collect();

    for step in 0..600 {
        match rng.gen_range(0, 10) {
            0..=4 => {
                let size = rng.gen_range(3 * WORD_SIZE, 40 * WORD_SIZE);
                let temp = RootSlot::null();
                if graph.node(&temp, size).is_none() {
                    roots[rng.gen_range(0, roots.len())].set(Address::null());
                    continue;
                }
                if rng.gen_bool(0.4) {
                    roots[rng.gen_range(0, roots.len())].set(temp.get());
                } else {
                    let objects = gc.objects();
                    let parent = objects[rng.gen_range(0, objects.len())].address;
                    let field = if rng.gen_bool(0.5) { LEFT } else { RIGHT };
                    gc.write_reference(parent, field, temp.get());
                }
            }
            5..=6 => {
                let objects = gc.objects();
                if objects.len() >= 2 {
                    let from = objects[rng.gen_range(0, objects.len())].address;
                    let to = objects[rng.gen_range(0, objects.len())].address;
                    gc.write_reference(from, LEFT, to);
                }
            }
            7 => roots[rng.gen_range(0, roots.len())].set(Address::null()),
            8 => {
                // resized objects must not be referenced from other objects
                let temp = RootSlot::null();
                let size = rng.gen_range(3 * WORD_SIZE, 40 * WORD_SIZE);
                if graph.node(&temp, size).is_none() {
                    continue;
                }
                let new_size = if kind == CollectorKind::MarkAndSweep || gc.free_size() <= 60 * WORD_SIZE {
                    rng.gen_range(3 * WORD_SIZE, size + 1)
                } else {
                    rng.gen_range(3 * WORD_SIZE, 60 * WORD_SIZE)
                };
                let address = gc.resize(temp.get(), new_size);
                assert_eq!(gc.object_size(address), Some(new_size));
                assert_eq!(gc.read_reference(address, 0), Address(graph.node));
                roots[rng.gen_range(0, roots.len())].set(address);
            }
            _ => {
                let before = graph.reachable(&roots);
                gc.collect();
                let after = graph.reachable(&roots);
                assert_eq!(before.len(), after.len(), "{} step {}", kind, step);
                let tracked: HashSet<Address> =
                    gc.objects().iter().map(|entry| entry.address).collect();
                assert_eq!(tracked, after, "{} step {}", kind, step);
            }
        }
        graph.check_bitmap();
    }
    gc.detach_thread(&stack);
}

#[test]
fn random_mutation_keeps_heap_consistent() {
    for kind in CollectorKind::all().iter() {
        for seed in 0..4 {
            random_mutation(*kind, seed);
        }
    }
}

#[test]
fn sliding_packs_survivors_in_order() {
    let mut rng = StdRng::seed_from_u64(7);
    let gc = GcState::init(
        GcConfig {
            page_aligned: false,
            ..GcConfig::with_heap_size(64 * 1024)
        },
        Arc::new(Opaque),
    )
    .unwrap();
    let stack = gc.attach_current_thread();
    stack.add_new_root_set();
    let mut survivors = Vec::new();
    for i in 0..200 {
        let size = rng.gen_range(1, 200);
        if rng.gen_bool(0.5) {
            let slot = stack.new_slot(Address::null());
            gc.allocate_with(&slot, size, |bytes| {
                for byte in bytes.iter_mut() {
                    *byte = i as u8;
                }
            });
            survivors.push((slot, size, i as u8));
        } else {
            gc.allocate(size);
        }
    }
    survivors.sort_by_key(|(slot, _, _)| slot.get());

    gc.collect();
    let bottom = gc.heap_region().start;
    let mut expected = bottom;
    for (slot, size, fill) in survivors.iter() {
        assert_eq!(slot.get(), expected);
        assert_eq!(gc.read_bytes(slot.get()), vec![*fill; *size]);
        expected = expected.offset(*size);
    }
    let live: usize = survivors.iter().map(|(_, size, _)| size).sum();
    assert_eq!(expected, bottom.offset(live));
    assert_eq!(gc.occupied_bytes(), live);
    assert_eq!(gc.free_size(), 64 * 1024 - live);

    let mut objects = gc.objects();
    objects.sort_by_key(|entry| entry.address);
    for pair in objects.windows(2) {
        assert_eq!(pair[0].end(), pair[1].address);
    }
    gc.detach_thread(&stack);
}

#[test]
fn copying_moves_each_survivor_once() {
    let mut rng = StdRng::seed_from_u64(11);
    let graph = Graph::new(CollectorKind::Copy, 64 * 1024);
    let gc = &graph.gc;
    let stack = gc.attach_current_thread();
    stack.add_new_root_set();
    let roots: Vec<RootSlot> = (0..4).map(|_| stack.new_slot(Address::null())).collect();
    for root in roots.iter() {
        graph.node(root, 3 * WORD_SIZE).unwrap();
    }
    // a dense graph with shared children and cycles
    for _ in 0..150 {
        let temp = RootSlot::null();
        graph.node(&temp, 3 * WORD_SIZE).unwrap();
        let objects = gc.objects();
        for field in [LEFT, RIGHT].iter() {
            let parent = objects[rng.gen_range(0, objects.len())].address;
            gc.write_reference(parent, *field, temp.get());
        }
        let target = objects[rng.gen_range(0, objects.len())].address;
        gc.write_reference(temp.get(), LEFT, target);
    }
    let live = graph.reachable(&roots);
    let stats = gc.collect();
    assert_eq!(stats.live_objects, live.len());
    assert_eq!(stats.objects_moved, live.len());
    assert_eq!(stats.bytes_moved, live.len() * 3 * WORD_SIZE);
    assert_eq!(gc.object_count(), live.len());

    let after = graph.reachable(&roots);
    assert_eq!(after.len(), live.len());
    assert!(after.iter().all(|address| !live.contains(address)));
    gc.detach_thread(&stack);
}
