pub mod db;
pub mod memory;
pub mod storage;
pub mod thumbnail;

pub use db::DbAdapter;
pub use memory::MemoryAdapter;
pub use storage::LocalStorageAdapter;
