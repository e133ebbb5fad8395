//! Kademlia routing table split into buckets by shared prefix with our own [Id].

use std::net::SocketAddrV4;
use std::slice::{Iter, IterMut};
use std::time::{Duration, Instant};

use crate::common::{approximately, Id, Node, MAX_DISTANCE};

/// K = the maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 8;
/// Nodes that ignored this many pings in a row are expired.
pub const MAX_UNANSWERED_PINGS: u8 = 2;

const PING_INTERVAL: Duration = Duration::from_secs(5 * 60);
const PING_RETRY_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
/// Routing table with buckets that evolve by splitting the bucket closest to us.
///
/// Bucket `i` holds the nodes sharing exactly `i` leading bits with [Self::id],
/// and the last bucket holds every node sharing at least as many.
pub struct RoutingTable {
    id: Id,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            buckets: vec![KBucket::new()],
        }
    }

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn buckets(&self) -> Iter<'_, KBucket> {
        self.buckets.iter()
    }

    pub fn buckets_mut(&mut self) -> IterMut<'_, KBucket> {
        self.buckets.iter_mut()
    }

    // === Public Methods ===

    /// Remember a node. Known nodes are left untouched, including their address,
    /// and nodes are dropped if their bucket is full.
    ///
    /// Returns `true` if the node was inserted.
    pub fn put(&mut self, id: Id, address: SocketAddrV4, now: Instant) -> bool {
        if id == self.id {
            return false;
        }

        let index = self.bucket_index(&id);
        let bucket = &mut self.buckets[index];

        if bucket.contains(&id) || bucket.nodes.len() >= MAX_BUCKET_SIZE_K {
            return false;
        }

        bucket.nodes.push(RoutingNode {
            id,
            address,
            next_ping: now + approximately(PING_INTERVAL),
            next_find: now,
            unanswered_pings: 0,
        });

        true
    }

    /// A node answered a ping: trust its current address and reset its liveness.
    pub fn ponged(&mut self, id: &Id, address: SocketAddrV4, now: Instant) {
        match self.get_mut(id) {
            Some(node) => {
                node.address = address;
                node.unanswered_pings = 0;
                node.next_ping = now + approximately(PING_INTERVAL);
            }
            None => {
                self.put(*id, address, now);
            }
        }
    }

    /// A ping was sent (or skipped) for this node.
    pub fn pinged(&mut self, id: &Id, now: Instant) {
        if let Some(node) = self.get_mut(id) {
            node.pinged(now);
        }
    }

    /// Drop nodes that stopped answering pings.
    pub fn expire(&mut self) {
        for bucket in &mut self.buckets {
            bucket
                .nodes
                .retain(|node| node.unanswered_pings < MAX_UNANSWERED_PINGS);
        }
    }

    /// Split the last bucket while it is full, so the neighbourhood closest to our
    /// own [Id] can hold more nodes.
    pub fn split(&mut self) {
        while self.buckets.len() < MAX_DISTANCE as usize {
            let depth = self.buckets.len();

            let last = match self.buckets.last_mut() {
                Some(last) if last.nodes.len() >= MAX_BUCKET_SIZE_K => last,
                _ => return,
            };

            let id = self.id;
            let (deeper, stay): (Vec<_>, Vec<_>) = last
                .nodes
                .drain(..)
                .partition(|node| id.common_prefix(&node.id) as usize >= depth);

            last.nodes = stay;
            self.buckets.push(KBucket { nodes: deeper });
        }
    }

    /// Returns the bucket covering `target`.
    pub fn find_any_match(&mut self, target: &Id) -> &mut KBucket {
        let index = self.bucket_index(target);
        &mut self.buckets[index]
    }

    /// Return up to [MAX_BUCKET_SIZE_K] nodes closest to the target.
    pub fn closest(&self, target: &Id) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .buckets
            .iter()
            .flat_map(|bucket| bucket.iter())
            .map(|node| Node::new(node.id, node.address))
            .collect();

        nodes.sort_by(|a, b| Id::compare_distance(&a.id, &b.id, target));
        nodes.truncate(MAX_BUCKET_SIZE_K);

        nodes
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.is_empty())
    }

    /// Return the number of nodes in this routing table.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.nodes.len()).sum()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.buckets[self.bucket_index(id)].contains(id)
    }

    pub fn get(&self, id: &Id) -> Option<&RoutingNode> {
        self.buckets[self.bucket_index(id)]
            .nodes
            .iter()
            .find(|node| &node.id == id)
    }

    // === Private Methods ===

    fn get_mut(&mut self, id: &Id) -> Option<&mut RoutingNode> {
        let index = self.bucket_index(id);
        self.buckets[index]
            .nodes
            .iter_mut()
            .find(|node| &node.id == id)
    }

    fn bucket_index(&self, id: &Id) -> usize {
        (self.id.common_prefix(id) as usize).min(self.buckets.len() - 1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct KBucket {
    nodes: Vec<RoutingNode>,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            nodes: Vec::with_capacity(MAX_BUCKET_SIZE_K),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> Iter<'_, RoutingNode> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, RoutingNode> {
        self.nodes.iter_mut()
    }

    fn contains(&self, id: &Id) -> bool {
        self.nodes.iter().any(|node| &node.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Node entry in the routing table, with its maintenance timers.
pub struct RoutingNode {
    pub id: Id,
    pub address: SocketAddrV4,
    /// Next time this node should be pinged.
    pub next_ping: Instant,
    /// Next time this node may be asked a find_node during table maintenance.
    pub next_find: Instant,
    pub unanswered_pings: u8,
}

impl RoutingNode {
    pub fn pinged(&mut self, now: Instant) {
        self.unanswered_pings = self.unanswered_pings.saturating_add(1);
        self.next_ping = now + approximately(PING_RETRY_INTERVAL);
    }
}
