pub mod binlog;
pub mod config;
pub mod mark;
pub mod persistence;
pub mod server;
pub mod store;
pub mod sync;
pub mod trunk_binlog;
pub mod trunk_container;
pub mod trunk_index;
pub mod trunk_sync;

pub use config::StorageConfig;
pub use server::{run, StorageState};
pub use store::FileStore;
pub use trunk_index::{ConfirmStatus, TrunkIndex};
