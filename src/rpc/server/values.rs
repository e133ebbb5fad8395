//! Manage announced peers for info_hashes

use std::{
    net::SocketAddrV4,
    num::NonZeroUsize,
    time::{Duration, Instant},
};

use lru::LruCache;
use rand::{seq::SliceRandom, thread_rng};

use crate::common::{encode_peer, Id, MAX_BUCKET_SIZE_K, PEER_SIZE};

pub const MAX_INFO_HASHES: usize = 2000;
pub const MAX_PEERS_PER_INFO_HASH: usize = 100;
/// Announced peers are forgotten unless re-announced within this period.
pub const PEER_LIFETIME: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy)]
struct StoredPeer {
    address: SocketAddrV4,
    announced_at: Instant,
}

#[derive(Debug)]
/// An LRU cache of announced peers per info hash, keyed by the announcing node's [Id].
pub struct ValueStore {
    info_hashes: LruCache<Id, LruCache<Id, StoredPeer>>,
    max_peers: NonZeroUsize,
}

impl ValueStore {
    pub fn new(max_info_hashes: NonZeroUsize, max_peers: NonZeroUsize) -> Self {
        Self {
            info_hashes: LruCache::new(max_info_hashes),
            max_peers,
        }
    }

    /// Record that `node_id`, reachable at `address`, serves `info_hash` on `port`.
    pub fn put(
        &mut self,
        info_hash: Id,
        node_id: Id,
        port: u16,
        address: &SocketAddrV4,
        now: Instant,
    ) {
        let peer = StoredPeer {
            address: SocketAddrV4::new(*address.ip(), port),
            announced_at: now,
        };

        if let Some(peers) = self.info_hashes.get_mut(&info_hash) {
            peers.put(node_id, peer);
        } else {
            let mut peers = LruCache::new(self.max_peers);
            peers.put(node_id, peer);
            self.info_hashes.put(info_hash, peers);
        }
    }

    /// Up to [MAX_BUCKET_SIZE_K] randomly chosen peers as a compact list.
    pub fn compact_list(&self, info_hash: &Id) -> Vec<u8> {
        let peers: Vec<SocketAddrV4> = match self.info_hashes.peek(info_hash) {
            Some(peers) => peers.iter().map(|(_, peer)| peer.address).collect(),
            None => return Vec::new(),
        };

        let mut bytes = Vec::with_capacity(MAX_BUCKET_SIZE_K * PEER_SIZE);
        for address in peers.choose_multiple(&mut thread_rng(), MAX_BUCKET_SIZE_K) {
            bytes.extend_from_slice(&encode_peer(address));
        }

        bytes
    }

    /// Drop peers that were not announced again within [PEER_LIFETIME].
    pub fn expire(&mut self, now: Instant) {
        let mut empty = Vec::new();

        for (info_hash, peers) in self.info_hashes.iter_mut() {
            let stale: Vec<Id> = peers
                .iter()
                .filter(|(_, peer)| now.saturating_duration_since(peer.announced_at) > PEER_LIFETIME)
                .map(|(id, _)| *id)
                .collect();

            for id in stale {
                peers.pop(&id);
            }

            if peers.is_empty() {
                empty.push(*info_hash);
            }
        }

        for info_hash in empty {
            self.info_hashes.pop(&info_hash);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.info_hashes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.info_hashes.is_empty()
    }
}

impl Default for ValueStore {
    fn default() -> Self {
        Self::new(
            NonZeroUsize::new(MAX_INFO_HASHES).unwrap_or(NonZeroUsize::MIN),
            NonZeroUsize::new(MAX_PEERS_PER_INFO_HASH).unwrap_or(NonZeroUsize::MIN),
        )
    }
}
