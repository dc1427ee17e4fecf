//! Infrastructure layer for feedsync.
//!
//! Concrete [`ContentStore`](feedsync_core::store::ContentStore)
//! implementations and configuration file loading.

pub mod config_storage;
pub mod file_store;
pub mod in_memory_store;
pub mod storage;

pub use crate::config_storage::{ConfigStorage, load_config, save_config};
pub use crate::file_store::FileContentStore;
pub use crate::in_memory_store::InMemoryContentStore;
