//! A UDP KRPC responder with canned answers.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use grapefruit_krpc::{Body, Message, Query, Response};
use grapefruit_models::{InfoHash, Node, NodeId};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub const FAKE_TOKEN: &[u8] = b"tk";

pub struct FakeDhtNode {
    pub id: NodeId,
    pub addr: SocketAddrV4,
    socket: Arc<UdpSocket>,
    received: Arc<Mutex<Vec<(SocketAddrV4, Query)>>>,
    task: JoinHandle<()>,
}

impl FakeDhtNode {
    /// Answers `find_node` with `nodes`, and `get_peers` with the peers in
    /// `peers` for known info hashes or `nodes` otherwise.
    pub async fn spawn(nodes: Vec<Node>, peers: HashMap<InfoHash, Vec<SocketAddrV4>>) -> anyhow::Result<Self> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
        let addr = match socket.local_addr()? {
            SocketAddr::V4(v4) => v4,
            other => anyhow::bail!("fake node bound to non-IPv4 address {}", other),
        };
        let id = NodeId::random();
        let received = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let socket = socket.clone();
            let received = received.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 65536];
                while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                    let SocketAddr::V4(from) = from else { continue };
                    let Ok(message) = Message::from_bytes(&buf[..n]) else { continue };
                    let Body::Query(query) = message.body else { continue };

                    let response = match &query {
                        Query::Ping { .. } | Query::AnnouncePeer { .. } => Response::new(id),
                        Query::FindNode { .. } => Response::new(id).with_nodes(nodes.clone()),
                        Query::GetPeers { info_hash, .. } => match peers.get(info_hash) {
                            Some(values) => Response::new(id).with_values(values.clone()),
                            None => Response::new(id).with_nodes(nodes.clone()),
                        }
                        .with_token(FAKE_TOKEN.to_vec()),
                    };
                    if let Ok(mut log) = received.lock() {
                        log.push((from, query));
                    }
                    let reply = Message::response(message.transaction_id, response);
                    let _ = socket.send_to(&reply.to_bytes(), from).await;
                }
            })
        };

        Ok(Self { id, addr, socket, received, task })
    }

    pub fn node(&self) -> Node {
        Node::new(self.id, self.addr)
    }

    /// Queries received so far, oldest first.
    pub fn received(&self) -> Vec<(SocketAddrV4, Query)> {
        self.received.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Sends an unsolicited query to `to`, as a remote node would.
    pub async fn send_query(&self, to: SocketAddrV4, transaction_id: &[u8], query: Query) -> anyhow::Result<()> {
        let message = Message::query(transaction_id.to_vec(), query);
        self.socket.send_to(&message.to_bytes(), to).await?;
        Ok(())
    }
}

impl Drop for FakeDhtNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}
