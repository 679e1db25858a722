use async_trait::async_trait;
use grapefruit_models::{GrapefruitError, InfoHash, TorrentMetadata};

/// Persistence for crawled torrents. Implementations keep at most one
/// record per info hash.
#[async_trait]
pub trait TorrentStore: Send + Sync + 'static {
    /// Creates the schema if needed. Safe to call more than once.
    async fn init(&self) -> Result<(), GrapefruitError>;

    async fn exists(&self, info_hash: &InfoHash) -> Result<bool, GrapefruitError>;

    /// Returns `false` when a record for the same info hash already exists.
    async fn insert(&self, torrent: &TorrentMetadata) -> Result<bool, GrapefruitError>;

    async fn get(&self, info_hash: &InfoHash) -> Result<Option<TorrentMetadata>, GrapefruitError>;

    async fn count(&self) -> Result<u64, GrapefruitError>;
}
