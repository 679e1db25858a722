use std::net::SocketAddrV4;
use std::time::Instant;

use grapefruit_krpc::{decode, random_transaction_id, Body, Message, Query, Response, Value};
use grapefruit_models::{krpc_code, GrapefruitError, Id20, InfoHash, Node, NodeId};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, trace};

use crate::candidates::CandidatePool;
use crate::routing::{AddOutcome, RoutingTable};
use crate::searcher::{SearchUpdate, Searchers, SEARCH_MAX_AGE, SEARCH_WIDTH};

/// Nodes returned for find_node and get_peers queries, and queried per maintenance tick.
pub const K: usize = 8;
/// Candidate groups drained per maintenance tick.
pub const CANDIDATE_GROUPS_PER_TICK: usize = 7;

pub type Outgoing = (SocketAddrV4, Message);

/// Where a query came from, so a failing handler can still be answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub node: Node,
    pub transaction_id: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ping { ctx: QueryContext },
    FindNode { ctx: QueryContext, target: NodeId },
    GetPeers { ctx: QueryContext, info_hash: InfoHash },
    AnnouncePeer { ctx: QueryContext, info_hash: InfoHash, port: Option<u16> },
    PeersFound { info_hash: InfoHash, peers: Vec<SocketAddrV4> },
}

#[derive(Debug, Default)]
pub struct Step {
    pub outgoing: Vec<Outgoing>,
    pub events: Vec<Event>,
    pub malformed: bool,
}

/// Everything the crawler knows, with no I/O attached.
///
/// Each input (datagram, tick, search request) returns the datagrams to send
/// and the handler events to raise, so the socket loop stays thin.
pub struct DhtState {
    node_id: NodeId,
    routing: RoutingTable,
    candidates: CandidatePool,
    searchers: Searchers,
    rng: StdRng,
}

impl DhtState {
    pub fn new(node_id: NodeId) -> Self {
        Self::with_rng(node_id, StdRng::from_entropy())
    }

    pub fn with_rng(node_id: NodeId, rng: StdRng) -> Self {
        Self {
            node_id,
            routing: RoutingTable::new(node_id),
            candidates: CandidatePool::new(),
            searchers: Searchers::new(),
            rng,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn candidates(&self) -> &CandidatePool {
        &self.candidates
    }

    pub fn searches_in_flight(&self) -> usize {
        self.searchers.len()
    }

    /// A find_node query. Crawler queries carry a throwaway sender id.
    pub fn find_node(&self, addr: SocketAddrV4, target: NodeId) -> Outgoing {
        let query = Query::FindNode { id: Id20::random(), target };
        (addr, Message::query(random_transaction_id(), query))
    }

    pub fn get_peers(&self, addr: SocketAddrV4, info_hash: InfoHash, transaction_id: Vec<u8>) -> Outgoing {
        let query = Query::GetPeers { id: Id20::random(), info_hash };
        (addr, Message::query(transaction_id, query))
    }

    pub fn bootstrap(&self, addrs: &[SocketAddrV4]) -> Vec<Outgoing> {
        addrs.iter().map(|addr| self.find_node(*addr, self.node_id)).collect()
    }

    pub fn search_peers(&mut self, info_hash: InfoHash, now: Instant) -> Vec<Outgoing> {
        let initial = self.routing.closest(&info_hash, SEARCH_WIDTH);
        let (id, query) = self.searchers.start(info_hash, initial, now);
        query
            .into_iter()
            .map(|node| self.get_peers(node.addr, info_hash, id.to_vec()))
            .collect()
    }

    pub fn add_node(&mut self, node: Node, step: &mut Step) {
        if let AddOutcome::Full = self.routing.add_node(node, &mut self.rng) {
            step.outgoing.push(self.find_node(node.addr, Id20::random()));
        }
    }

    pub fn handle_datagram(&mut self, data: &[u8], from: SocketAddrV4, now: Instant) -> Step {
        let mut step = Step::default();

        let value = match decode(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(from = %from, error = %e, "Dropping undecodable datagram");
                step.malformed = true;
                return step;
            }
        };

        let msg = match Message::from_value(&value) {
            Ok(msg) => msg,
            Err(e) => {
                step.malformed = true;
                if let Some(reply) = error_reply(&value, &e) {
                    step.outgoing.push((from, reply));
                }
                debug!(from = %from, error = %e, "Malformed KRPC message");
                return step;
            }
        };

        match msg.body {
            Body::Response(r) => self.handle_response(msg.transaction_id, r, from, now, &mut step),
            Body::Query(q) => self.handle_query(msg.transaction_id, q, from, &mut step),
            Body::Error { code, message } => {
                trace!(from = %from, code = code, message = %message, "Remote node returned error");
            }
        }

        step
    }

    fn handle_response(&mut self, t: Vec<u8>, r: Response, from: SocketAddrV4, _now: Instant, step: &mut Step) {
        if self.searchers.contains(&t) {
            match self.searchers.update(&t, r.nodes, r.values) {
                SearchUpdate::Continue { info_hash, query } => {
                    for node in query {
                        step.outgoing.push(self.get_peers(node.addr, info_hash, t.clone()));
                    }
                }
                SearchUpdate::Finished { info_hash, peers } => {
                    step.events.push(Event::PeersFound { info_hash, peers });
                }
                SearchUpdate::Unknown => {}
            }
        } else {
            self.candidates.push_sample(&r.nodes, &mut self.rng);
        }

        if let Some(id) = r.id {
            self.add_node(Node::new(id, from), step);
        }
    }

    fn handle_query(&mut self, t: Vec<u8>, q: Query, from: SocketAddrV4, step: &mut Step) {
        let node = Node::new(*q.sender_id(), from);
        let ctx = QueryContext { node, transaction_id: t.clone() };

        let (response, event) = match q {
            Query::Ping { .. } => (Response::new(self.node_id), Event::Ping { ctx }),
            Query::FindNode { target, .. } => (
                Response::new(self.node_id).with_nodes(self.routing.closest(&target, K)),
                Event::FindNode { ctx, target },
            ),
            Query::GetPeers { info_hash, .. } => {
                let mut token = vec![0u8; 20];
                self.rng.fill_bytes(&mut token);
                (
                    Response::new(self.node_id)
                        .with_nodes(self.routing.closest(&info_hash, K))
                        .with_token(token),
                    Event::GetPeers { ctx, info_hash },
                )
            }
            Query::AnnouncePeer { info_hash, port, .. } => {
                (Response::new(self.node_id), Event::AnnouncePeer { ctx, info_hash, port })
            }
        };

        step.outgoing.push((from, Message::response(t, response)));
        step.events.push(event);
        self.add_node(node, step);
    }

    /// One maintenance round: crawl towards a random target and expire stale searches.
    pub fn tick(&mut self, now: Instant) -> Step {
        let mut step = Step::default();
        let target = Id20::random();

        let mut nodes = self.routing.closest(&target, K);
        nodes.extend(self.candidates.take_random(CANDIDATE_GROUPS_PER_TICK, &mut self.rng));
        for node in nodes {
            step.outgoing.push(self.find_node(node.addr, target));
        }

        for (info_hash, peers) in self.searchers.expire(now, SEARCH_MAX_AGE) {
            step.events.push(Event::PeersFound { info_hash, peers });
        }

        step
    }
}

/// Error reply for a message that decoded as bencode but not as KRPC.
/// Only queries get one; broken responses are dropped.
fn error_reply(value: &Value, e: &GrapefruitError) -> Option<Message> {
    let t = value.get_bytes("t")?.to_vec();
    match e {
        GrapefruitError::MethodUnknown { .. } => Some(Message::error_for(t, e)),
        _ if value.get_bytes("y") == Some(&b"q"[..]) => {
            Some(Message::error(t, krpc_code::PROTOCOL, "Protocol Error"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 1, 1, last), 6881)
    }

    fn state() -> DhtState {
        DhtState::with_rng(Id20::new([0u8; 20]), StdRng::seed_from_u64(99))
    }

    #[test]
    fn test_ping_is_answered_with_own_id_and_node_added() {
        let mut state = state();
        let remote = Id20::new([0x42; 20]);
        let ping = Message::query(b"pp".to_vec(), Query::Ping { id: remote }).to_bytes();

        let step = state.handle_datagram(&ping, addr(1), Instant::now());
        assert_eq!(step.outgoing.len(), 1);
        let (to, reply) = &step.outgoing[0];
        assert_eq!(*to, addr(1));
        assert_eq!(reply.transaction_id, b"pp".to_vec());
        match &reply.body {
            Body::Response(r) => assert_eq!(r.id, Some(Id20::new([0u8; 20]))),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(step.events[0], Event::Ping { .. }));
        assert!(state.routing().contains(&Node::new(remote, addr(1))));
    }

    #[test]
    fn test_get_peers_query_gets_token_and_event() {
        let mut state = state();
        let info_hash = Id20::new([0x77; 20]);
        let query = Message::query(b"gp".to_vec(), Query::GetPeers { id: Id20::new([1; 20]), info_hash });

        let step = state.handle_datagram(&query.to_bytes(), addr(2), Instant::now());
        match &step.outgoing[0].1.body {
            Body::Response(r) => assert_eq!(r.token.as_ref().map(Vec::len), Some(20)),
            other => panic!("unexpected {:?}", other),
        }
        match &step.events[0] {
            Event::GetPeers { ctx, info_hash: h } => {
                assert_eq!(*h, info_hash);
                assert_eq!(ctx.transaction_id, b"gp".to_vec());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_dropped_silently() {
        let mut state = state();
        let step = state.handle_datagram(b"\x00\x01garbage", addr(3), Instant::now());
        assert!(step.malformed);
        assert!(step.outgoing.is_empty());
        assert!(step.events.is_empty());
    }

    #[test]
    fn test_unknown_method_gets_204() {
        let mut state = state();
        let raw = b"d1:ad2:id20:aaaaaaaaaaaaaaaaaaaae1:q4:vote1:t2:zz1:y1:qe";
        let step = state.handle_datagram(raw, addr(4), Instant::now());
        assert_eq!(step.outgoing.len(), 1);
        assert_eq!(
            step.outgoing[0].1.body,
            Body::Error { code: krpc_code::METHOD_UNKNOWN, message: "Method Unknown".into() }
        );
    }

    #[test]
    fn test_plain_response_feeds_candidate_pool() {
        let mut state = state();
        let nodes: Vec<Node> = (1..=3u8).map(|i| Node::new(Id20::new([i; 20]), addr(i))).collect();
        let resp = Message::response(b"xx".to_vec(), Response::new(Id20::new([9; 20])).with_nodes(nodes));

        state.handle_datagram(&resp.to_bytes(), addr(9), Instant::now());
        assert_eq!(state.candidates().len(), 1);
        assert_eq!(state.routing().len(), 1);

        let step = state.tick(Instant::now());
        // One routing table node plus the three candidates.
        assert_eq!(step.outgoing.len(), 4);
        assert!(state.candidates().is_empty());
    }

    #[test]
    fn test_search_flow_reports_peers() {
        let mut state = state();
        let responder = Node::new(Id20::new([5; 20]), addr(5));
        let mut step = Step::default();
        state.add_node(responder, &mut step);

        let info_hash = Id20::new([6; 20]);
        let queries = state.search_peers(info_hash, Instant::now());
        assert_eq!(queries.len(), 1);
        let t = queries[0].1.transaction_id.clone();
        assert_eq!(t.len(), 4);

        let peer = SocketAddrV4::new(Ipv4Addr::new(8, 8, 8, 8), 4000);
        let mut finished = None;
        for _ in 0..20 {
            let resp = Message::response(t.clone(), Response::new(responder.id).with_values(vec![peer]));
            let step = state.handle_datagram(&resp.to_bytes(), responder.addr, Instant::now());
            if let Some(Event::PeersFound { peers, .. }) = step.events.into_iter().next() {
                finished = Some(peers);
                break;
            }
        }
        assert_eq!(finished, Some(vec![peer]));
        assert_eq!(state.searches_in_flight(), 0);
    }

    #[test]
    fn test_full_bucket_queries_the_rejected_node() {
        let own = Id20::new([0u8; 20]);
        let mut state = DhtState {
            node_id: own,
            routing: RoutingTable::with_capacity(own, 1),
            candidates: CandidatePool::new(),
            searchers: Searchers::new(),
            rng: StdRng::seed_from_u64(7),
        };

        let mut rejected = 0;
        for i in 1..=16u8 {
            let mut id = [0u8; 20];
            id[0] = 0x80;
            id[19] = i;
            let node = Node::new(Id20::new(id), addr(i));
            let mut step = Step::default();
            state.add_node(node, &mut step);

            if i == 1 || state.routing().contains(&node) {
                assert!(step.outgoing.is_empty());
                continue;
            }
            rejected += 1;
            assert_eq!(step.outgoing.len(), 1);
            let (to, msg) = &step.outgoing[0];
            assert_eq!(*to, node.addr);
            assert!(matches!(msg.body, Body::Query(Query::FindNode { .. })));
        }
        assert!(rejected > 0);
        assert_eq!(state.routing().len(), 1);
    }

    #[test]
    fn test_tick_expires_search_with_collected_peers() {
        let mut state = state();
        let responder = Node::new(Id20::new([5; 20]), addr(5));
        let mut step = Step::default();
        state.add_node(responder, &mut step);

        let start = Instant::now();
        let info_hash = Id20::new([6; 20]);
        let queries = state.search_peers(info_hash, start);
        let t = queries[0].1.transaction_id.clone();

        // A new node keeps the search alive after the first answer.
        let peer = SocketAddrV4::new(Ipv4Addr::new(8, 8, 4, 4), 51413);
        let next = Node::new(Id20::new([7; 20]), addr(7));
        let resp = Message::response(t, Response::new(responder.id).with_nodes(vec![next]).with_values(vec![peer]));
        let step = state.handle_datagram(&resp.to_bytes(), responder.addr, start);
        assert!(step.events.is_empty());
        assert!(step.outgoing.iter().any(|(to, _)| *to == next.addr));

        let early = state.tick(start + SEARCH_MAX_AGE / 2);
        assert!(!early.events.iter().any(|e| matches!(e, Event::PeersFound { .. })));
        assert_eq!(state.searches_in_flight(), 1);

        let late = state.tick(start + SEARCH_MAX_AGE);
        let found: Vec<&Event> = late.events.iter().filter(|e| matches!(e, Event::PeersFound { .. })).collect();
        assert_eq!(found, vec![&Event::PeersFound { info_hash, peers: vec![peer] }]);
        assert_eq!(state.searches_in_flight(), 0);
    }
}
