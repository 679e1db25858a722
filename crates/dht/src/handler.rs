use std::net::SocketAddrV4;

use async_trait::async_trait;
use grapefruit_models::{GrapefruitError, InfoHash, Node, NodeId};

/// Hooks the crawler calls as it hears from the network.
///
/// Every hook has a no-op default. Query hooks run after the reply has been
/// sent; an error from one of them is answered with a KRPC server error.
#[async_trait]
pub trait DhtHandler: Send + Sync + 'static {
    async fn ping_received(&self, _node: Node) -> Result<(), GrapefruitError> {
        Ok(())
    }

    async fn find_node_received(&self, _node: Node, _target: NodeId) -> Result<(), GrapefruitError> {
        Ok(())
    }

    async fn get_peers_received(&self, _node: Node, _info_hash: InfoHash) -> Result<(), GrapefruitError> {
        Ok(())
    }

    async fn announce_peer_received(
        &self,
        _node: Node,
        _info_hash: InfoHash,
        _port: Option<u16>,
    ) -> Result<(), GrapefruitError> {
        Ok(())
    }

    /// A peer search finished, converged or timed out. `peers` may be empty.
    async fn peers_found(&self, _info_hash: InfoHash, _peers: Vec<SocketAddrV4>) -> Result<(), GrapefruitError> {
        Ok(())
    }
}

/// Handler that ignores everything. Useful for running a bare node.
pub struct NoopHandler;

#[async_trait]
impl DhtHandler for NoopHandler {}
