pub mod mem;

/// Logs the message as an error and aborts the current operation.
///
/// Used for invariant violations and heap exhaustion, which the embedding
/// engine cannot recover from. With `panic = "abort"` this ends the process.
#[macro_export]
macro_rules! fatal {
    ($($arg: tt)*) => {
        {
            let message = format!($($arg)*);
            error!("GC: {}", message);
            panic!("GC: {}", message)
        }
    };
}
