#[macro_use]
extern crate log;

#[macro_use]
pub mod util;
pub mod error;
pub mod heap;
pub mod runtime;

pub use error::GcError;
pub use heap::model::{Layout, LayoutTable, ObjectModel, TypeTag};
pub use heap::{CollectionStats, CollectorKind, GarbageCollector};
pub use runtime::config::GcConfig;
pub use runtime::roots::{RootSetStack, RootSets, RootSlot};
pub use runtime::state::{GcInformation, GcState, RcGcState};
pub use runtime::threads::ThreadAttributes;
pub use util::mem::{Address, Region, WORD_SIZE};
