/*
*   Copyright (c) 2020 Adel Prokurov
*   All rights reserved.

*   Licensed under the Apache License, Version 2.0 (the "License");
*   you may not use this file except in compliance with the License.
*   You may obtain a copy of the License at

*   http://www.apache.org/licenses/LICENSE-2.0

*   Unless required by applicable law or agreed to in writing, software
*   distributed under the License is distributed on an "AS IS" BASIS,
*   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
*   See the License for the specific language governing permissions and
*   limitations under the License.
*/

#[macro_use]
extern crate log;

use cilgc::*;
use std::sync::Arc;
use std::time::Instant;
use structopt::StructOpt;

const LEFT: usize = WORD_SIZE;
const RIGHT: usize = 2 * WORD_SIZE;
// header, two children and two 32-bit counters
const NODE_SIZE: usize = 4 * WORD_SIZE;

#[derive(StructOpt, Debug)]
#[structopt(name = "gcbench", about = "Binary tree allocation benchmark")]
struct Options {
    /// shifter, mark-and-sweep or copy
    #[structopt(short, long, default_value = "shifter")]
    collector: CollectorKind,
    /// Heap size in bytes
    #[structopt(long, default_value = "51200000")]
    heap_size: usize,
    #[structopt(long, default_value = "18")]
    stretch_depth: usize,
    #[structopt(long, default_value = "16")]
    long_lived_depth: usize,
    #[structopt(long, default_value = "500000")]
    array_size: usize,
    #[structopt(long, default_value = "4")]
    min_depth: usize,
    #[structopt(long, default_value = "16")]
    max_depth: usize,
    /// Threads running the temporary tree phase, 0 for one per CPU
    #[structopt(short, long, default_value = "1")]
    threads: usize,
    #[structopt(long)]
    profile: bool,
    #[structopt(short, long)]
    verbose: bool,
}

#[derive(Clone)]
struct Bench {
    gc: RcGcState,
    node: TypeTag,
}

fn tree_size(depth: usize) -> usize {
    (1 << (depth + 1)) - 1
}

impl Bench {
    fn new_node(&self, into: &RootSlot, left: Option<&RootSlot>, right: Option<&RootSlot>) {
        let node = self.node;
        self.gc.allocate_with(into, NODE_SIZE, |bytes| {
            bytes[..WORD_SIZE].copy_from_slice(&node.to_le_bytes());
            if let Some(left) = left {
                bytes[LEFT..LEFT + WORD_SIZE].copy_from_slice(&left.get().to_usize().to_le_bytes());
            }
            if let Some(right) = right {
                bytes[RIGHT..RIGHT + WORD_SIZE]
                    .copy_from_slice(&right.get().to_usize().to_le_bytes());
            }
        });
    }

    /// Top down construction.
    fn populate(&self, stack: &RootSetStack, depth: usize, this: &RootSlot) {
        if depth == 0 {
            return;
        }
        stack.add_new_root_set();
        let left = stack.new_slot(Address::null());
        let right = stack.new_slot(Address::null());
        self.new_node(&left, None, None);
        self.gc.store_reference(this, LEFT, &left);
        self.new_node(&right, None, None);
        self.gc.store_reference(this, RIGHT, &right);
        self.populate(stack, depth - 1, &left);
        self.populate(stack, depth - 1, &right);
        stack.pop_last_root_set();
    }

    /// Bottom up construction.
    fn make_tree(&self, stack: &RootSetStack, depth: usize, into: &RootSlot) {
        if depth == 0 {
            self.new_node(into, None, None);
            return;
        }
        stack.add_new_root_set();
        let left = stack.new_slot(Address::null());
        let right = stack.new_slot(Address::null());
        self.make_tree(stack, depth - 1, &left);
        self.make_tree(stack, depth - 1, &right);
        self.new_node(into, Some(&left), Some(&right));
        stack.pop_last_root_set();
    }

    fn time_construction(&self, stack: &RootSetStack, stretch_depth: usize, depth: usize) {
        let iterations = 2 * tree_size(stretch_depth) / tree_size(depth);
        stack.add_new_root_set();
        let temp = stack.new_slot(Address::null());

        let start = Instant::now();
        for _ in 0..iterations {
            self.new_node(&temp, None, None);
            self.populate(stack, depth, &temp);
            temp.set(Address::null());
        }
        println!(
            "Creating {} trees of depth {}: top down construction took {:?}",
            iterations,
            depth,
            start.elapsed()
        );

        let start = Instant::now();
        for _ in 0..iterations {
            self.make_tree(stack, depth, &temp);
            temp.set(Address::null());
        }
        println!(
            "Creating {} trees of depth {}: bottom up construction took {:?}",
            iterations,
            depth,
            start.elapsed()
        );
        stack.pop_last_root_set();
    }
}

fn run(options: Options) -> Result<(), GcError> {
    let model = Arc::new(LayoutTable::new());
    let node = model.register(Layout::new("Node", vec![LEFT, RIGHT]));
    let config = GcConfig {
        heap_size: options.heap_size,
        collector: options.collector,
        profile: options.profile,
        verbose: options.verbose,
        ..GcConfig::default()
    };
    let gc: RcGcState = Arc::new(GcState::init(config, model)?);
    let bench = Bench { gc: gc.clone(), node };
    println!(
        "{} {} by {}, {} bytes of heap",
        gc.name(),
        gc.version(),
        gc.author(),
        gc.information().heap_memory_allocated
    );

    let stack = gc.attach_current_thread();
    stack.add_new_root_set();
    let start = Instant::now();

    println!(
        "Stretching memory with a binary tree of depth {}",
        options.stretch_depth
    );
    let temp = stack.new_slot(Address::null());
    bench.make_tree(&stack, options.stretch_depth, &temp);
    temp.set(Address::null());

    println!(
        "Creating a long-lived binary tree of depth {}",
        options.long_lived_depth
    );
    let long_lived = stack.new_slot(Address::null());
    bench.new_node(&long_lived, None, None);
    bench.populate(&stack, options.long_lived_depth, &long_lived);

    println!("Creating a long-lived array of {} doubles", options.array_size);
    let array = stack.new_slot(Address::null());
    let array_bytes = std::cmp::max(options.array_size, 1) * 8;
    gc.allocate_with(&array, array_bytes, |bytes| {
        for (i, double) in bytes.chunks_mut(8).enumerate().skip(1).take(options.array_size / 2) {
            double.copy_from_slice(&(1.0f64 / i as f64).to_le_bytes());
        }
    });

    let threads = if options.threads == 0 {
        num_cpus::get()
    } else {
        options.threads
    };
    let depths: Vec<usize> = (options.min_depth..=options.max_depth).step_by(2).collect();
    let mut handles = Vec::with_capacity(threads);
    for n in 0..threads {
        let bench = bench.clone();
        let depths = depths.clone();
        let stretch_depth = options.stretch_depth;
        let attributes = ThreadAttributes::named(&format!("gcbench-{}", n));
        handles.push(gc.thread_create(attributes, move |stack| {
            for depth in depths {
                bench.time_construction(&stack, stretch_depth, depth);
            }
        })?);
    }
    for handle in handles {
        if handle.join().is_err() {
            error!("gcbench: worker thread panicked");
        }
    }

    let resolved = gc.resolve(&long_lived);
    let check = gc.resolve(&array).map(|_| gc.read_bytes(array.get()));
    let intact = match (resolved, check) {
        (Some(_), Some(bytes)) if bytes.len() >= 1001 * 8 => {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[1000 * 8..1001 * 8]);
            (f64::from_le_bytes(word) - 1.0 / 1000.0).abs() < std::f64::EPSILON
        }
        (Some(_), Some(_)) => true,
        _ => false,
    };
    if !intact {
        println!("Failed");
    }

    println!("Completed in {:?}", start.elapsed());
    let info = gc.information();
    println!(
        "{} collection(s), collect time {:?}, alloc time {:?}",
        info.collections, info.collect_time, info.alloc_time
    );
    println!(
        "heap {} bytes, in use {} bytes, peak {} bytes, overhead {} bytes",
        info.heap_memory_allocated, info.actual_heap_memory, info.max_heap_memory, info.over_head
    );

    stack.pop_last_root_set();
    gc.detach_thread(&stack);
    drop(bench);
    match Arc::try_unwrap(gc) {
        Ok(gc) => gc.shutdown(),
        Err(_) => Ok(()),
    }
}

fn main() {
    let options = Options::from_args();
    let level = if options.verbose {
        log::Level::Info
    } else {
        log::Level::Warn
    };
    if let Err(error) = simple_logger::init_with_level(level) {
        eprintln!("gcbench: cannot install logger: {}", error);
    }
    if let Err(error) = run(options) {
        error!("gcbench: {}", error);
        std::process::exit(1);
    }
}
