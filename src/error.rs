use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcError {
    #[error("cannot obtain a heap arena of {size} bytes")]
    ArenaUnavailable { size: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("out of memory: requested {requested} bytes, {free} bytes free after collection")]
    OutOfMemory { requested: usize, free: usize },

    #[error("{0} thread(s) still attached to the collector")]
    ThreadsAttached(usize),

    #[error("thread creation failed: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}
