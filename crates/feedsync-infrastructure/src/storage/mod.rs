//! Storage primitives for atomic file operations.

mod atomic_file;

pub use atomic_file::{AtomicJsonFile, StoreLock, write_atomic};
