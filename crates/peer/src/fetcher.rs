//! Downloads and verifies an info dictionary from a single peer.

use std::net::SocketAddrV4;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use grapefruit_krpc::bencode;
use grapefruit_models::{GrapefruitError, InfoHash, MetadataConfig};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

use crate::extension::{
    extended_handshake, parse_extended_handshake, piece_count, piece_len, MetadataMessage, HANDSHAKE_EXT_ID,
    METADATA_PIECE_SIZE, UT_METADATA_LOCAL_ID,
};
use crate::info::TorrentInfo;
use crate::wire::{generate_peer_id, Handshake, PeerCodec, PeerMessage, HANDSHAKE_LEN};

/// Connects to `addr` and fetches the metadata for `info_hash`.
///
/// The connect is bounded by `connect_timeout_ms` and the whole exchange
/// after it by `fetch_timeout_ms`.
#[instrument(skip(config), fields(info_hash = %info_hash))]
pub async fn fetch_metadata(
    addr: SocketAddrV4,
    info_hash: InfoHash,
    config: &MetadataConfig,
) -> Result<TorrentInfo, GrapefruitError> {
    let stream = timeout(Duration::from_millis(config.connect_timeout_ms), TcpStream::connect(addr))
        .await
        .map_err(|_| GrapefruitError::Timeout {
            operation: format!("connect to {}", addr),
            timeout_ms: config.connect_timeout_ms,
        })??;
    stream.set_nodelay(true)?;

    timeout(
        Duration::from_millis(config.fetch_timeout_ms),
        exchange(stream, info_hash, config.max_metadata_bytes),
    )
    .await
    .map_err(|_| GrapefruitError::Timeout {
        operation: format!("metadata exchange with {}", addr),
        timeout_ms: config.fetch_timeout_ms,
    })?
}

/// Runs the metadata exchange over an already connected stream.
pub async fn exchange<S>(mut stream: S, info_hash: InfoHash, max_metadata_bytes: usize) -> Result<TorrentInfo, GrapefruitError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ours = Handshake::new(info_hash, generate_peer_id());
    stream.write_all(&ours.to_bytes()).await?;

    let mut reply = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut reply).await?;
    let theirs = Handshake::parse(&reply)?;
    if theirs.info_hash != info_hash {
        return Err(protocol("peer answered for a different info hash"));
    }
    if !theirs.supports_extensions() {
        return Err(protocol("peer does not support the extension protocol"));
    }

    let mut framed = Framed::new(stream, PeerCodec::default());
    framed
        .send(PeerMessage::Extended { id: HANDSHAKE_EXT_ID, payload: extended_handshake() })
        .await?;

    let extensions = loop {
        match next_message(&mut framed).await? {
            PeerMessage::Extended { id: HANDSHAKE_EXT_ID, payload } => {
                break parse_extended_handshake(&payload, max_metadata_bytes)?;
            }
            _ => continue,
        }
    };

    let metadata_size = extensions.metadata_size;
    let pieces = piece_count(metadata_size);
    debug!(metadata_size, pieces, "Requesting metadata");
    for piece in 0..pieces {
        let request = MetadataMessage::Request { piece }.to_bytes();
        framed.feed(PeerMessage::Extended { id: extensions.ut_metadata, payload: request }).await?;
    }
    framed.flush().await?;

    let mut buffer = vec![0u8; metadata_size];
    let mut received = vec![false; pieces];
    let mut remaining = pieces;
    while remaining > 0 {
        let payload = match next_message(&mut framed).await? {
            PeerMessage::Extended { id: UT_METADATA_LOCAL_ID, payload } => payload,
            _ => continue,
        };
        match MetadataMessage::parse(&payload)? {
            MetadataMessage::Data { piece, data, .. } => {
                if piece >= pieces {
                    return Err(protocol(&format!("piece index {} out of range", piece)));
                }
                if data.len() != piece_len(metadata_size, piece) {
                    return Err(protocol(&format!("piece {} has wrong length {}", piece, data.len())));
                }
                if !received[piece] {
                    let start = piece * METADATA_PIECE_SIZE;
                    buffer[start..start + data.len()].copy_from_slice(&data);
                    received[piece] = true;
                    remaining -= 1;
                }
            }
            MetadataMessage::Reject { piece } => {
                return Err(protocol(&format!("peer rejected piece {}", piece)));
            }
            MetadataMessage::Request { piece } => {
                let reject = MetadataMessage::Reject { piece }.to_bytes();
                framed.send(PeerMessage::Extended { id: extensions.ut_metadata, payload: reject }).await?;
            }
        }
    }

    let digest = Sha1::digest(&buffer);
    if digest.as_slice() != info_hash.as_bytes() {
        return Err(GrapefruitError::MetadataInvalid { reason: "SHA-1 of metadata does not match info hash".to_string() });
    }

    let info = bencode::decode(&buffer)?;
    TorrentInfo::from_info_dict(&info)
}

async fn next_message<S>(framed: &mut Framed<S, PeerCodec>) -> Result<PeerMessage, GrapefruitError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(message) => message,
        None => Err(protocol("peer closed the connection")),
    }
}

fn protocol(reason: &str) -> GrapefruitError {
    GrapefruitError::Protocol { reason: reason.to_string() }
}
