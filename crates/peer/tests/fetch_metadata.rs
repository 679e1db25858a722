use grapefruit_models::{GrapefruitError, MetadataConfig};
use grapefruit_peer::fetch_metadata;
use grapefruit_testsupport::{multi_file_torrent, single_file_torrent, FakePeer, PeerBehavior};

fn fast_config() -> MetadataConfig {
    MetadataConfig { connect_timeout_ms: 500, fetch_timeout_ms: 2000, ..MetadataConfig::default() }
}

#[tokio::test]
async fn fetches_single_piece_metadata() {
    let torrent = single_file_torrent("debian.iso", 4096);
    let peer = FakePeer::spawn(&torrent, PeerBehavior::Honest).await.unwrap();

    let info = fetch_metadata(peer.addr, torrent.info_hash, &fast_config()).await.unwrap();
    assert_eq!(info.name, "debian.iso");
    assert_eq!(info.files.len(), 1);
    assert_eq!(info.files[0].length, 4096);
    assert_eq!(peer.connections(), 1);
}

#[tokio::test]
async fn fetches_metadata_spanning_several_pieces() {
    let torrent = multi_file_torrent("album", &[("cd1/01.flac", 100), ("cd2/01.flac", 200)], 40_000);
    assert!(torrent.info.len() > 2 * 16 * 1024);
    let peer = FakePeer::spawn(&torrent, PeerBehavior::Honest).await.unwrap();

    let info = fetch_metadata(peer.addr, torrent.info_hash, &fast_config()).await.unwrap();
    let metadata = info.into_metadata(&torrent.info_hash);
    assert_eq!(metadata.name, "album");
    assert_eq!(metadata.total_length(), 300);
    assert_eq!(metadata.files[1].path, vec!["cd2", "01.flac"]);
}

#[tokio::test]
async fn corrupt_metadata_fails_hash_check() {
    let torrent = single_file_torrent("bad.iso", 1);
    let peer = FakePeer::spawn(&torrent, PeerBehavior::Corrupt).await.unwrap();

    let err = fetch_metadata(peer.addr, torrent.info_hash, &fast_config()).await.unwrap_err();
    assert!(matches!(err, GrapefruitError::MetadataInvalid { .. }), "got {:?}", err);
}

#[tokio::test]
async fn rejected_request_is_a_protocol_error() {
    let torrent = single_file_torrent("private.iso", 1);
    let peer = FakePeer::spawn(&torrent, PeerBehavior::Reject).await.unwrap();

    let err = fetch_metadata(peer.addr, torrent.info_hash, &fast_config()).await.unwrap_err();
    assert!(err.to_string().contains("rejected"), "got {}", err);
}

#[tokio::test]
async fn peer_without_extensions_is_refused() {
    let torrent = single_file_torrent("old.iso", 1);
    let peer = FakePeer::spawn(&torrent, PeerBehavior::NoExtensions).await.unwrap();

    let err = fetch_metadata(peer.addr, torrent.info_hash, &fast_config()).await.unwrap_err();
    assert!(matches!(err, GrapefruitError::Protocol { .. }), "got {:?}", err);
}

#[tokio::test]
async fn silent_peer_times_out() {
    let torrent = single_file_torrent("slow.iso", 1);
    let peer = FakePeer::spawn(&torrent, PeerBehavior::Silent).await.unwrap();
    let config = MetadataConfig { fetch_timeout_ms: 200, ..fast_config() };

    let err = fetch_metadata(peer.addr, torrent.info_hash, &config).await.unwrap_err();
    assert!(err.is_timeout(), "got {:?}", err);
}
