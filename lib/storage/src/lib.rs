pub mod lmdb_storage;
pub mod manager;
pub mod memory;
pub mod store;

pub use lmdb_storage::LmdbStore;
pub use manager::StorageManager;
pub use memory::InMemoryStore;
pub use store::{KnnSearchParams, NodeResultStore, SearchHit, ORIGIN_ID_FIELD};
