use std::collections::HashSet;

use grapefruit_models::{Id20, Node, NodeId, ID_BITS};
use rand::Rng;

/// Nodes kept per bucket before replacement kicks in.
pub const BUCKET_CAPACITY: usize = 1600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    AlreadyPresent,
    /// The bucket was full and a random member made room for the node.
    Replaced(Node),
    /// The bucket was full and kept as is; the caller should ping the node with find_node.
    Full,
    Ignored,
}

/// A 160-bucket table indexed by the bit length of the XOR distance to our own id.
///
/// Buckets are unordered sets sized for crawling rather than for a well-behaved
/// Kademlia node: the goal is to know as many nodes as possible, not to keep
/// the freshest ones.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    own_id: NodeId,
    buckets: Vec<HashSet<Node>>,
    capacity: usize,
}

impl RoutingTable {
    pub fn new(own_id: NodeId) -> Self {
        Self::with_capacity(own_id, BUCKET_CAPACITY)
    }

    pub fn with_capacity(own_id: NodeId, capacity: usize) -> Self {
        Self {
            own_id,
            buckets: (0..ID_BITS).map(|_| HashSet::new()).collect(),
            capacity,
        }
    }

    pub fn own_id(&self) -> &NodeId {
        &self.own_id
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(HashSet::is_empty)
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.buckets[self.bucket_for(&node.id)].contains(node)
    }

    fn bucket_for(&self, id: &Id20) -> usize {
        self.own_id.xor(id).bucket_index()
    }

    pub fn add_node<R: Rng>(&mut self, node: Node, rng: &mut R) -> AddOutcome {
        if node.id == self.own_id || node.addr.port() == 0 {
            return AddOutcome::Ignored;
        }

        let capacity = self.capacity;
        let idx = self.bucket_for(&node.id);
        let bucket = &mut self.buckets[idx];

        if bucket.len() < capacity {
            return if bucket.insert(node) {
                AddOutcome::Inserted
            } else {
                AddOutcome::AlreadyPresent
            };
        }

        if rng.gen_bool(0.5) && !bucket.contains(&node) {
            let victim_idx = rng.gen_range(0..bucket.len());
            if let Some(victim) = bucket.iter().nth(victim_idx).copied() {
                bucket.remove(&victim);
                bucket.insert(node);
                return AddOutcome::Replaced(victim);
            }
        }

        AddOutcome::Full
    }

    /// The `k` known nodes closest to `target` by XOR distance.
    ///
    /// Collection starts at the bucket `target` falls into, walks towards
    /// bucket 0 until at least `k` nodes are gathered, then walks upwards from
    /// the next bucket until `k` more are gathered.
    pub fn closest(&self, target: &Id20, k: usize) -> Vec<Node> {
        let start = self.bucket_for(target);
        let mut collected: Vec<Node> = Vec::new();

        let mut lower = 0;
        for idx in (0..=start).rev() {
            if lower >= k {
                break;
            }
            let picked = k_closest(self.buckets[idx].iter().copied(), target, k);
            lower += picked.len();
            collected.extend(picked);
        }

        let mut upper = 0;
        for idx in start + 1..ID_BITS {
            if upper >= k {
                break;
            }
            let picked = k_closest(self.buckets[idx].iter().copied(), target, k);
            upper += picked.len();
            collected.extend(picked);
        }

        k_closest(collected, target, k)
    }
}

/// Picks the `k` nodes with the smallest XOR distance to `target`, closest first.
pub fn k_closest<I>(nodes: I, target: &Id20, k: usize) -> Vec<Node>
where
    I: IntoIterator<Item = Node>,
{
    let mut keyed: Vec<(Id20, Node)> = nodes.into_iter().map(|n| (n.id.xor(target), n)).collect();
    keyed.sort_unstable();
    keyed.dedup();
    keyed.into_iter().take(k).map(|(_, n)| n).collect()
}
