use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::InfoHash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub length: u64,
    pub path: Vec<String>,
}

/// A torrent record as persisted by the crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentMetadata {
    pub info_hash: String,
    pub name: String,
    pub files: Vec<TorrentFile>,
    pub timestamp: DateTime<Utc>,
}

impl TorrentMetadata {
    pub fn new(info_hash: &InfoHash, name: String, files: Vec<TorrentFile>) -> Self {
        Self {
            info_hash: info_hash.to_hex(),
            name,
            files,
            timestamp: Utc::now(),
        }
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }
}
