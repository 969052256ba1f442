use super::roots::{RootSetStack, RootSets};
use super::state::GcState;
use crate::error::GcError;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

#[derive(Clone, Debug, Default)]
pub struct ThreadAttributes {
    pub name: Option<String>,
    pub stack_size: Option<usize>,
}

impl ThreadAttributes {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_owned()),
            stack_size: None,
        }
    }
}

/// Keeps a thread's root set stack attached until it is dropped.
struct Registration {
    roots: Arc<RootSets>,
    stack: Arc<RootSetStack>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.roots.detach(&self.stack);
    }
}

impl GcState {
    /// Spawns a thread whose root set stack is attached, with an initial
    /// frame pushed, before `start` runs. The stack is passed to `start` and
    /// detached when it returns or unwinds.
    pub fn thread_create<F, T>(
        &self,
        attributes: ThreadAttributes,
        start: F,
    ) -> Result<JoinHandle<T>, GcError>
    where
        F: FnOnce(Arc<RootSetStack>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let stack = self.roots().attach();
        stack.add_new_root_set();
        let registration = Registration {
            roots: self.roots().clone(),
            stack,
        };

        let mut builder = Builder::new();
        if let Some(name) = attributes.name {
            builder = builder.name(name);
        }
        if let Some(size) = attributes.stack_size {
            builder = builder.stack_size(size);
        }
        trace!("GC: Spawning thread #{}", registration.stack.id());
        let handle = builder.spawn(move || {
            let registration = registration;
            start(registration.stack.clone())
        })?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::model::Opaque;
    use crate::runtime::config::GcConfig;
    use crate::util::mem::Address;

    #[test]
    fn new_threads_start_with_a_frame() {
        let gc = Arc::new(
            GcState::init(
                GcConfig {
                    page_aligned: false,
                    ..GcConfig::with_heap_size(4096)
                },
                Arc::new(Opaque),
            )
            .unwrap(),
        );
        let worker = gc.clone();
        let handle = gc
            .thread_create(ThreadAttributes::named("mutator"), move |stack| {
                assert_eq!(std::thread::current().name(), Some("mutator"));
                assert_eq!(stack.depth(), 1);
                let slot = stack.new_slot(worker.allocate(64));
                worker.collect();
                slot.get()
            })
            .unwrap();
        let object: Address = handle.join().unwrap();
        assert_eq!(gc.roots().attached(), 0);
        // the thread's frame went away with it
        gc.collect();
        assert!(!gc.is_an_object_allocated(object));
    }

    #[test]
    fn panicking_threads_detach() {
        let gc = GcState::init(
            GcConfig {
                page_aligned: false,
                ..GcConfig::with_heap_size(4096)
            },
            Arc::new(Opaque),
        )
        .unwrap();
        let handle = gc
            .thread_create(ThreadAttributes::default(), |_stack| -> () {
                panic!("mutator failed");
            })
            .unwrap();
        assert!(handle.join().is_err());
        assert_eq!(gc.roots().attached(), 0);
    }
}
