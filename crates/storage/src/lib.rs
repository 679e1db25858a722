pub mod memory;
pub mod migrations;
pub mod sqlite;
pub mod store;

pub use memory::MemoryTorrentStore;
pub use sqlite::SqliteTorrentStore;
pub use store::TorrentStore;
