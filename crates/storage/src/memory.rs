use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use grapefruit_models::{GrapefruitError, InfoHash, TorrentMetadata};

use crate::store::TorrentStore;

/// Keeps torrents in memory, keyed by hex info hash. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryTorrentStore {
    torrents: DashMap<String, TorrentMetadata>,
}

impl MemoryTorrentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TorrentStore for MemoryTorrentStore {
    async fn init(&self) -> Result<(), GrapefruitError> {
        Ok(())
    }

    async fn exists(&self, info_hash: &InfoHash) -> Result<bool, GrapefruitError> {
        Ok(self.torrents.contains_key(&info_hash.to_hex()))
    }

    async fn insert(&self, torrent: &TorrentMetadata) -> Result<bool, GrapefruitError> {
        match self.torrents.entry(torrent.info_hash.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(torrent.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, info_hash: &InfoHash) -> Result<Option<TorrentMetadata>, GrapefruitError> {
        Ok(self.torrents.get(&info_hash.to_hex()).map(|t| t.clone()))
    }

    async fn count(&self) -> Result<u64, GrapefruitError> {
        Ok(self.torrents.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapefruit_models::Id20;

    #[tokio::test]
    async fn test_first_insert_wins() {
        let store = MemoryTorrentStore::new();
        let hash = Id20::new([9; 20]);
        let first = TorrentMetadata::new(&hash, "first".to_string(), vec![]);
        let second = TorrentMetadata::new(&hash, "second".to_string(), vec![]);

        assert!(store.insert(&first).await.unwrap());
        assert!(!store.insert(&second).await.unwrap());
        assert_eq!(store.get(&hash).await.unwrap().unwrap().name, "first");
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
