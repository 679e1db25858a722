use std::net::{Ipv4Addr, SocketAddrV4};

use serde::{Deserialize, Serialize};

use crate::id::{Id20, NodeId};

/// Length of a compact node info record: id, IPv4 address, port.
pub const COMPACT_NODE_LEN: usize = 26;
/// Length of a compact peer info record: IPv4 address, port.
pub const COMPACT_PEER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddrV4,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddrV4) -> Self {
        Self { id, addr }
    }
}

pub fn encode_peer(addr: &SocketAddrV4, out: &mut Vec<u8>) {
    out.extend_from_slice(&addr.ip().octets());
    out.extend_from_slice(&addr.port().to_be_bytes());
}

pub fn decode_peer(bytes: &[u8]) -> Option<SocketAddrV4> {
    if bytes.len() != COMPACT_PEER_LEN {
        return None;
    }
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Some(SocketAddrV4::new(ip, port))
}

pub fn encode_nodes<'a, I>(nodes: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Node>,
{
    let mut out = Vec::new();
    for node in nodes {
        out.extend_from_slice(node.id.as_bytes());
        encode_peer(&node.addr, &mut out);
    }
    out
}

/// Decodes concatenated compact node records. A trailing partial record is ignored.
pub fn decode_nodes(bytes: &[u8]) -> Vec<Node> {
    bytes
        .chunks_exact(COMPACT_NODE_LEN)
        .filter_map(|chunk| {
            let id = Id20::from_bytes(&chunk[..20]).ok()?;
            let addr = decode_peer(&chunk[20..])?;
            Some(Node::new(id, addr))
        })
        .collect()
}

/// Decodes the `values` list of a get_peers response, skipping malformed entries.
pub fn decode_peers<'a, I>(values: I) -> Vec<SocketAddrV4>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    values.into_iter().filter_map(decode_peer).collect()
}
