use grapefruit_models::{GrapefruitError, InfoHash, LoggingConfig, TorrentMetadata};
use std::net::SocketAddrV4;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

pub struct TracingService;

impl TracingService {
    /// Installs the global subscriber. `RUST_LOG` wins over the configured level.
    pub fn init(config: &LoggingConfig) -> Result<(), GrapefruitError> {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .map_err(|e| GrapefruitError::ConfigError { reason: format!("invalid log level: {}", e) })?;

        let result = if config.json {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .try_init()
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).try_init()
        };

        result.map_err(|e| GrapefruitError::InternalError { reason: e.to_string() })
    }

    pub fn log_search_started(info_hash: &InfoHash, queried: usize) {
        debug!(
            info_hash = %info_hash,
            queried = queried,
            "Enqueue search peers for torrent"
        );
    }

    pub fn log_peers_found(info_hash: &InfoHash, peers: usize) {
        debug!(
            info_hash = %info_hash,
            peers = peers,
            "Peer search finished"
        );
    }

    pub fn log_fetch_started(info_hash: &InfoHash, peers: &[SocketAddrV4]) {
        debug!(
            info_hash = %info_hash,
            peers = ?peers,
            "Start loading torrent"
        );
    }

    pub fn log_fetch_failed(info_hash: &InfoHash, peer: &SocketAddrV4, error: &GrapefruitError) {
        debug!(
            info_hash = %info_hash,
            peer = %peer,
            error_type = error.error_type(),
            error = %error,
            "Metadata fetch from peer failed"
        );
    }

    pub fn log_torrent_stored(metadata: &TorrentMetadata) {
        info!(
            info_hash = %metadata.info_hash,
            name = %metadata.name,
            files = metadata.files.len(),
            total_length = metadata.total_length(),
            "Torrent stored"
        );
    }

    pub fn log_handler_error(method: &str, from: &SocketAddrV4, error: &GrapefruitError) {
        warn!(
            method = method,
            from = %from,
            error = %error,
            "Query handler failed"
        );
    }
}
