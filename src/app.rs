//! The crawler application: harvest info hashes from DHT traffic, find
//! peers for each, fetch the metadata and store it.

use std::net::SocketAddrV4;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use grapefruit_dht::{CrawlerHandle, DhtHandler};
use grapefruit_metrics::{MetricsService, TracingService};
use grapefruit_models::{GrapefruitError, InfoHash, MetadataConfig, Node};
use grapefruit_peer::{fetch_metadata, TorrentInfo};
use grapefruit_storage::TorrentStore;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub struct GrapefruitCrawler<S: TorrentStore> {
    store: Arc<S>,
    dht: CrawlerHandle,
    metrics: Arc<MetricsService>,
    config: Arc<MetadataConfig>,
    in_progress: Arc<DashSet<InfoHash>>,
    fetches: Arc<Semaphore>,
}

impl<S: TorrentStore> Clone for GrapefruitCrawler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dht: self.dht.clone(),
            metrics: self.metrics.clone(),
            config: self.config.clone(),
            in_progress: self.in_progress.clone(),
            fetches: self.fetches.clone(),
        }
    }
}

impl<S: TorrentStore> GrapefruitCrawler<S> {
    pub fn new(store: Arc<S>, dht: CrawlerHandle, metrics: Arc<MetricsService>, config: MetadataConfig) -> Self {
        let permits = config.max_concurrent_fetches.max(1);
        Self {
            store,
            dht,
            metrics,
            config: Arc::new(config),
            in_progress: Arc::new(DashSet::new()),
            fetches: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn is_in_progress(&self, info_hash: &InfoHash) -> bool {
        self.in_progress.contains(info_hash)
    }

    /// Starts a peer search for `info_hash` unless one is running or the
    /// torrent is already stored. Returns whether a search was started.
    pub async fn enqueue_torrent(&self, info_hash: InfoHash) -> Result<bool, GrapefruitError> {
        if !self.in_progress.insert(info_hash) {
            return Ok(false);
        }

        let started = match self.store.exists(&info_hash).await {
            Ok(true) => Ok(false),
            Ok(false) => self.dht.search_peers(info_hash).await.map(|_| true),
            Err(e) => Err(e),
        };
        if !matches!(started, Ok(true)) {
            self.in_progress.remove(&info_hash);
        }
        started
    }

    /// Tries `peers` in order until one hands over valid metadata, then
    /// stores it. Always clears the in-progress mark.
    pub async fn load_torrent(&self, info_hash: InfoHash, peers: Vec<SocketAddrV4>) {
        match self.fetches.acquire().await {
            Ok(_permit) => {
                self.metrics.fetch_started();
                TracingService::log_fetch_started(&info_hash, &peers);

                match self.fetch_from_peers(info_hash, &peers).await {
                    Some(info) => {
                        self.metrics.record_metadata_fetched();
                        self.save(info_hash, info).await;
                    }
                    None => {
                        self.metrics.record_metadata_failed();
                        debug!(info_hash = %info_hash, peers = peers.len(), "No peer provided metadata");
                    }
                }
                self.metrics.fetch_finished();
            }
            Err(e) => warn!(info_hash = %info_hash, error = %e, "Fetch limiter closed"),
        }

        self.in_progress.remove(&info_hash);
    }

    async fn fetch_from_peers(&self, info_hash: InfoHash, peers: &[SocketAddrV4]) -> Option<TorrentInfo> {
        for peer in peers {
            match fetch_metadata(*peer, info_hash, &self.config).await {
                Ok(info) => return Some(info),
                Err(e) => TracingService::log_fetch_failed(&info_hash, peer, &e),
            }
        }
        None
    }

    async fn save(&self, info_hash: InfoHash, info: TorrentInfo) {
        let metadata = info.into_metadata(&info_hash);
        match self.store.exists(&info_hash).await {
            Ok(true) => {
                debug!(info_hash = %info_hash, "Torrent stored meanwhile, skipping");
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(info_hash = %info_hash, error = %e, "Failed to check torrent store");
                return;
            }
        }

        match self.store.insert(&metadata).await {
            Ok(true) => {
                self.metrics.record_torrent_stored();
                TracingService::log_torrent_stored(&metadata);
            }
            Ok(false) => debug!(info_hash = %info_hash, "Torrent already stored"),
            Err(e) => warn!(info_hash = %info_hash, error = %e, "Failed to store torrent"),
        }
    }
}

#[async_trait]
impl<S: TorrentStore> DhtHandler for GrapefruitCrawler<S> {
    async fn get_peers_received(&self, _node: Node, info_hash: InfoHash) -> Result<(), GrapefruitError> {
        self.enqueue_torrent(info_hash).await.map(|_| ())
    }

    async fn announce_peer_received(
        &self,
        node: Node,
        info_hash: InfoHash,
        port: Option<u16>,
    ) -> Result<(), GrapefruitError> {
        debug!(from = %node.addr, info_hash = %info_hash, port = ?port, "announce_peer");
        self.enqueue_torrent(info_hash).await.map(|_| ())
    }

    async fn peers_found(&self, info_hash: InfoHash, peers: Vec<SocketAddrV4>) -> Result<(), GrapefruitError> {
        let crawler = self.clone();
        tokio::spawn(async move {
            crawler.load_torrent(info_hash, peers).await;
        });
        Ok(())
    }
}

/// Logs store contents at startup.
pub async fn log_store_summary<S: TorrentStore>(store: &S) {
    match store.count().await {
        Ok(count) => info!(torrents = count, "Torrent store ready"),
        Err(e) => warn!(error = %e, "Failed to count stored torrents"),
    }
}
