// Concurrency substrate shared by the control, protocol and poll tasks:
// a starvation-aware mutex and the periodic-trigger coalescing queue.
pub mod diag_mutex;
pub mod trigger_queue;

pub use diag_mutex::{DiagGuard, DiagMutex, FatalHandler, StarvationReport};
pub use trigger_queue::TriggerQueue;
