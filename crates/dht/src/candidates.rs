use grapefruit_models::Node;
use rand::seq::SliceRandom;
use rand::Rng;

pub const CANDIDATE_POOL_CAPACITY: usize = 16_000;
pub const CANDIDATE_GROUP_SIZE: usize = 8;

/// Nodes learned from responses that were not part of a peer search, kept
/// around so the maintenance loop can branch out into unknown parts of the
/// keyspace.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    groups: Vec<Vec<Node>>,
    capacity: usize,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::with_capacity(CANDIDATE_POOL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { groups: Vec::new(), capacity }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Stores a random sample of at most eight of `nodes` as one group.
    pub fn push_sample<R: Rng>(&mut self, nodes: &[Node], rng: &mut R) {
        if nodes.is_empty() {
            return;
        }
        if self.groups.len() >= self.capacity {
            let victim = rng.gen_range(0..self.groups.len());
            self.groups.swap_remove(victim);
        }
        let sample: Vec<Node> = nodes
            .choose_multiple(rng, CANDIDATE_GROUP_SIZE.min(nodes.len()))
            .copied()
            .collect();
        self.groups.push(sample);
    }

    /// Removes up to `groups` random groups and returns their nodes.
    pub fn take_random<R: Rng>(&mut self, groups: usize, rng: &mut R) -> Vec<Node> {
        let mut out = Vec::new();
        for _ in 0..groups.min(self.groups.len()) {
            let idx = rng.gen_range(0..self.groups.len());
            out.extend(self.groups.swap_remove(idx));
        }
        out
    }
}

impl Default for CandidatePool {
    fn default() -> Self {
        Self::new()
    }
}
