use std::collections::{HashMap, HashSet};
use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

use grapefruit_models::{InfoHash, Node};

use crate::routing::k_closest;

/// Nodes queried per round of a peer search.
pub const SEARCH_WIDTH: usize = 16;
/// Rounds without progress before a search is considered converged.
pub const SEARCH_ATTEMPTS: u32 = 8;
/// Searches older than this are finished with whatever they collected.
pub const SEARCH_MAX_AGE: Duration = Duration::from_secs(60);

pub type SearchId = [u8; 4];

#[derive(Debug, Clone)]
pub struct Searcher {
    pub info_hash: InfoHash,
    pub nodes: HashSet<Node>,
    pub values: HashSet<SocketAddrV4>,
    pub queried: HashSet<Node>,
    /// Queries sent and not yet answered.
    pub pending: usize,
    pub attempts: u32,
    pub started_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchUpdate {
    /// The transaction id does not belong to a live search.
    Unknown,
    Continue { info_hash: InfoHash, query: Vec<Node> },
    Finished { info_hash: InfoHash, peers: Vec<SocketAddrV4> },
}

/// Iterative get_peers searches keyed by the transaction id used in their queries.
#[derive(Debug, Default)]
pub struct Searchers {
    active: HashMap<SearchId, Searcher>,
    seq: u32,
}

impl Searchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn contains(&self, id: &[u8]) -> bool {
        <SearchId>::try_from(id).map(|k| self.active.contains_key(&k)).unwrap_or(false)
    }

    fn next_id(&mut self) -> SearchId {
        self.seq = if self.seq == u32::MAX { 0 } else { self.seq + 1 };
        self.seq.to_be_bytes()
    }

    /// Registers a search seeded with `initial` and returns its id and the nodes to query.
    pub fn start(&mut self, info_hash: InfoHash, initial: Vec<Node>, now: Instant) -> (SearchId, Vec<Node>) {
        let id = self.next_id();
        let query: Vec<Node> = initial.into_iter().take(SEARCH_WIDTH).collect();
        self.active.insert(
            id,
            Searcher {
                info_hash,
                nodes: HashSet::new(),
                values: HashSet::new(),
                queried: query.iter().copied().collect(),
                pending: query.len(),
                attempts: SEARCH_ATTEMPTS,
                started_at: now,
            },
        );
        (id, query)
    }

    /// Folds one get_peers response into its search.
    ///
    /// Each response whose nodes leave the current closest set unchanged costs
    /// one attempt; once attempts run out, or no query is outstanding and
    /// there is nobody new to ask, the search finishes with the peers
    /// collected so far.
    pub fn update(&mut self, id: &[u8], nodes: Vec<Node>, values: Vec<SocketAddrV4>) -> SearchUpdate {
        let Ok(key) = <SearchId>::try_from(id) else {
            return SearchUpdate::Unknown;
        };
        let Some(mut searcher) = self.active.remove(&key) else {
            return SearchUpdate::Unknown;
        };

        let old_closest: HashSet<Node> =
            k_closest(searcher.nodes.iter().copied(), &searcher.info_hash, SEARCH_WIDTH)
                .into_iter()
                .collect();
        searcher.pending = searcher.pending.saturating_sub(1);
        searcher.nodes.extend(nodes);
        searcher.values.extend(values);
        let new_closest = k_closest(searcher.nodes.iter().copied(), &searcher.info_hash, SEARCH_WIDTH);

        if new_closest.iter().copied().collect::<HashSet<_>>() == old_closest {
            searcher.attempts = searcher.attempts.saturating_sub(1);
        }

        let query: Vec<Node> = new_closest
            .into_iter()
            .filter(|n| !searcher.queried.contains(n))
            .collect();
        let exhausted = query.is_empty() && searcher.pending == 0;

        if searcher.attempts > 0 && !exhausted {
            searcher.queried.extend(query.iter().copied());
            searcher.pending += query.len();
            let info_hash = searcher.info_hash;
            self.active.insert(key, searcher);
            SearchUpdate::Continue { info_hash, query }
        } else {
            SearchUpdate::Finished {
                info_hash: searcher.info_hash,
                peers: searcher.values.into_iter().collect(),
            }
        }
    }

    /// Removes searches older than `max_age`, returning what each one collected.
    pub fn expire(&mut self, now: Instant, max_age: Duration) -> Vec<(InfoHash, Vec<SocketAddrV4>)> {
        let expired: Vec<SearchId> = self
            .active
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.started_at) >= max_age)
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.active.remove(&id))
            .map(|s| (s.info_hash, s.values.into_iter().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grapefruit_models::Id20;
    use std::net::Ipv4Addr;

    fn node(i: u8) -> Node {
        let mut id = [0u8; 20];
        id[19] = i;
        Node::new(Id20::new(id), SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, i), 6881))
    }

    fn peer(i: u8) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(1, 1, 1, i), 51413)
    }

    #[test]
    fn test_ids_are_sequential_and_wrap() {
        let mut searchers = Searchers::new();
        let now = Instant::now();
        let (a, _) = searchers.start(Id20::random(), vec![], now);
        let (b, _) = searchers.start(Id20::random(), vec![], now);
        assert_eq!(a, 1u32.to_be_bytes());
        assert_eq!(b, 2u32.to_be_bytes());

        searchers.seq = u32::MAX;
        let (c, _) = searchers.start(Id20::random(), vec![], now);
        assert_eq!(c, 0u32.to_be_bytes());
    }

    #[test]
    fn test_unknown_transaction() {
        let mut searchers = Searchers::new();
        assert_eq!(searchers.update(b"zz", vec![], vec![]), SearchUpdate::Unknown);
        assert_eq!(searchers.update(&[0, 0, 0, 9], vec![], vec![]), SearchUpdate::Unknown);
    }

    #[test]
    fn test_only_unqueried_nodes_are_asked() {
        let mut searchers = Searchers::new();
        let (id, first) = searchers.start(Id20::new([0u8; 20]), vec![node(1)], Instant::now());
        assert_eq!(first, vec![node(1)]);

        match searchers.update(&id, vec![node(1), node(2), node(3)], vec![peer(1)]) {
            SearchUpdate::Continue { query, .. } => {
                assert_eq!(query.len(), 2);
                assert!(!query.contains(&node(1)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_converges_after_attempts_without_progress() {
        let mut searchers = Searchers::new();
        let info_hash = Id20::new([0u8; 20]);
        let initial: Vec<Node> = (1..=16).map(node).collect();
        let (id, first) = searchers.start(info_hash, initial, Instant::now());
        assert_eq!(first.len(), SEARCH_WIDTH);

        // The first sighting of node 1 changes the closest set.
        match searchers.update(&id, vec![node(1)], vec![peer(1)]) {
            SearchUpdate::Continue { query, .. } => assert!(query.is_empty()),
            other => panic!("unexpected {:?}", other),
        }

        // No new nodes: each response burns an attempt until the search finishes.
        for _ in 0..SEARCH_ATTEMPTS - 1 {
            match searchers.update(&id, vec![node(1)], vec![peer(2)]) {
                SearchUpdate::Continue { query, .. } => assert!(query.is_empty()),
                other => panic!("unexpected {:?}", other),
            }
        }
        match searchers.update(&id, vec![], vec![peer(3)]) {
            SearchUpdate::Finished { info_hash: h, mut peers } => {
                assert_eq!(h, info_hash);
                peers.sort();
                assert_eq!(peers, vec![peer(1), peer(2), peer(3)]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(searchers.is_empty());
    }

    #[test]
    fn test_finishes_when_nothing_is_left_to_ask() {
        let mut searchers = Searchers::new();
        let (id, _) = searchers.start(Id20::new([0u8; 20]), vec![node(1)], Instant::now());

        match searchers.update(&id, vec![], vec![peer(1)]) {
            SearchUpdate::Finished { peers, .. } => assert_eq!(peers, vec![peer(1)]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_expire_old_searches() {
        let mut searchers = Searchers::new();
        let start = Instant::now();
        let (old, _) = searchers.start(Id20::new([1; 20]), vec![], start);
        searchers.update(&old, vec![node(4)], vec![peer(9)]);
        searchers.start(Id20::new([2; 20]), vec![], start + Duration::from_secs(30));

        let expired = searchers.expire(start + SEARCH_MAX_AGE, SEARCH_MAX_AGE);
        assert_eq!(expired, vec![(Id20::new([1; 20]), vec![peer(9)])]);
        assert_eq!(searchers.len(), 1);
    }
}
