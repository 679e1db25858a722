//! Fetching torrent metadata from peers over the BitTorrent wire protocol.

pub mod extension;
pub mod fetcher;
pub mod info;
pub mod wire;

pub use extension::{MetadataMessage, PeerExtensions};
pub use fetcher::{exchange, fetch_metadata};
pub use info::TorrentInfo;
pub use wire::{Handshake, PeerCodec, PeerMessage};
