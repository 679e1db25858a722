//! A scripted BitTorrent peer that serves one info dictionary over ut_metadata.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use grapefruit_krpc::{decode, decode_prefix, Value};
use grapefruit_models::InfoHash;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::fixtures::SampleTorrent;

const PIECE_SIZE: usize = 16 * 1024;
/// Extension id this peer asks ut_metadata requests to be sent to.
const PEER_UT_METADATA_ID: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    /// Serves the metadata as requested.
    Honest,
    /// Answers every request with a reject.
    Reject,
    /// Serves bytes that do not hash to the info hash.
    Corrupt,
    /// Clears the extension bit in its handshake.
    NoExtensions,
    /// Completes the handshakes, then never answers requests.
    Silent,
}

pub struct FakePeer {
    pub addr: SocketAddrV4,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakePeer {
    pub async fn spawn(torrent: &SampleTorrent, behavior: PeerBehavior) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = match listener.local_addr()? {
            std::net::SocketAddr::V4(v4) => v4,
            other => anyhow::bail!("fake peer bound to non-IPv4 address {}", other),
        };
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let info_hash = torrent.info_hash;
        let metadata = Arc::new(torrent.info.clone());

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let metadata = metadata.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, info_hash, &metadata, behavior).await;
                });
            }
        });

        Ok(Self { addr, connections, task })
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakePeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, info_hash: InfoHash, metadata: &[u8], behavior: PeerBehavior) -> anyhow::Result<()> {
    let mut handshake = [0u8; 68];
    stream.read_exact(&mut handshake).await?;

    let mut reply = handshake;
    reply[20..28].fill(0);
    if behavior != PeerBehavior::NoExtensions {
        reply[25] |= 0x10;
    }
    reply[28..48].copy_from_slice(info_hash.as_bytes());
    reply[48..68].copy_from_slice(b"-FK0001-fakepeer0000");
    stream.write_all(&reply).await?;

    // A bitfield-style message the client has to skip over.
    write_frame(&mut stream, 5, &[0xff]).await?;

    let mut client_ut_metadata = None;
    loop {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await?;
        let len = u32::from_be_bytes(len) as usize;
        if len == 0 {
            continue;
        }
        let mut frame = vec![0u8; len];
        stream.read_exact(&mut frame).await?;
        if frame.len() < 2 || frame[0] != 20 {
            continue;
        }

        let payload = &frame[2..];
        match frame[1] {
            0 => {
                let hs = decode(payload)?;
                client_ut_metadata = hs.get("m").and_then(|m| m.get_int("ut_metadata")).map(|id| id as u8);
                let ours = Value::dict()
                    .insert("m", Value::dict().insert("ut_metadata", Value::Int(PEER_UT_METADATA_ID as i64)).build())
                    .insert("metadata_size", Value::Int(metadata.len() as i64))
                    .build();
                write_extended(&mut stream, 0, &ours.to_bytes()).await?;
            }
            PEER_UT_METADATA_ID => {
                let (request, _) = decode_prefix(payload)?;
                let piece = request.get_int("piece").unwrap_or(0) as usize;
                let Some(reply_id) = client_ut_metadata else { continue };
                let message = match behavior {
                    PeerBehavior::Silent => continue,
                    PeerBehavior::Reject => piece_header(2, piece, None),
                    PeerBehavior::Honest | PeerBehavior::NoExtensions | PeerBehavior::Corrupt => {
                        let start = piece * PIECE_SIZE;
                        let end = (start + PIECE_SIZE).min(metadata.len());
                        let mut out = piece_header(1, piece, Some(metadata.len()));
                        let mut data = metadata[start.min(end)..end].to_vec();
                        if behavior == PeerBehavior::Corrupt {
                            if let Some(first) = data.first_mut() {
                                *first ^= 0xff;
                            }
                        }
                        out.extend_from_slice(&data);
                        out
                    }
                };
                write_extended(&mut stream, reply_id, &message).await?;
            }
            _ => {}
        }
    }
}

fn piece_header(msg_type: i64, piece: usize, total_size: Option<usize>) -> Vec<u8> {
    Value::dict()
        .insert("msg_type", Value::Int(msg_type))
        .insert("piece", Value::Int(piece as i64))
        .insert_opt("total_size", total_size.map(|t| Value::Int(t as i64)))
        .build()
        .to_bytes()
}

async fn write_extended(stream: &mut TcpStream, ext_id: u8, payload: &[u8]) -> anyhow::Result<()> {
    let mut body = Vec::with_capacity(payload.len() + 1);
    body.push(ext_id);
    body.extend_from_slice(payload);
    write_frame(stream, 20, &body).await
}

async fn write_frame(stream: &mut TcpStream, id: u8, payload: &[u8]) -> anyhow::Result<()> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.extend_from_slice(&((payload.len() + 1) as u32).to_be_bytes());
    out.push(id);
    out.extend_from_slice(payload);
    stream.write_all(&out).await?;
    Ok(())
}
