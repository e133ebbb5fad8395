//! Outstanding queries, correlated with their replies by transaction id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::common::TID_SIZE;

use super::lookup::Lookup;

/// How long a transaction waits for replies before the expiry sweep drops it.
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

pub type TransactionId = [u8; TID_SIZE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The query a transaction was created for, which decides how replies are read.
pub enum QueryKind {
    Ping,
    /// Ping sent to the multicast group. Any number of nodes may answer it.
    PingMulticast,
    FindNode,
    /// Lookup on behalf of a client, or to refresh the response cache.
    GetPeers,
    /// Lookup collecting tokens before announcing a local hostname.
    AnnounceStart,
    AnnounceEngage,
}

impl QueryKind {
    /// One-shot transactions are deleted as soon as their reply is handled.
    pub fn is_one_shot(&self) -> bool {
        matches!(
            self,
            QueryKind::Ping | QueryKind::FindNode | QueryKind::AnnounceEngage
        )
    }
}

#[derive(Debug)]
pub struct Transaction {
    pub kind: QueryKind,
    pub lookup: Option<Lookup>,
    pub created_at: Instant,
}

#[derive(Debug)]
pub struct Transactions {
    next_tid: u32,
    timeout: Duration,
    transactions: HashMap<TransactionId, Transaction>,
}

impl Transactions {
    pub fn new(timeout: Duration) -> Self {
        Transactions {
            next_tid: rand::random(),
            timeout,
            transactions: HashMap::new(),
        }
    }

    // === Getters ===

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    // === Public Methods ===

    /// Register a new outstanding query and return its transaction id.
    pub fn create(&mut self, kind: QueryKind, now: Instant) -> TransactionId {
        let tid = loop {
            let tid = self.next_tid.to_be_bytes();
            self.next_tid = self.next_tid.wrapping_add(1);

            if !self.transactions.contains_key(&tid) {
                break tid;
            }
        };

        self.transactions.insert(
            tid,
            Transaction {
                kind,
                lookup: None,
                created_at: now,
            },
        );

        tid
    }

    pub fn kind(&self, tid: &TransactionId) -> Option<QueryKind> {
        self.transactions.get(tid).map(|transaction| transaction.kind)
    }

    /// Hand ownership of a lookup to a transaction.
    pub fn link_lookup(&mut self, tid: &TransactionId, lookup: Lookup) {
        if let Some(transaction) = self.transactions.get_mut(tid) {
            transaction.lookup = Some(lookup);
        }
    }

    pub fn lookup_mut(&mut self, tid: &TransactionId) -> Option<&mut Lookup> {
        self.transactions
            .get_mut(tid)
            .and_then(|transaction| transaction.lookup.as_mut())
    }

    /// Drop the lookup of a transaction, ending it. Later replies find nothing to update.
    pub fn unlink_lookup(&mut self, tid: &TransactionId) -> Option<Lookup> {
        self.transactions
            .get_mut(tid)
            .and_then(|transaction| transaction.lookup.take())
    }

    pub fn delete(&mut self, tid: &TransactionId) {
        self.transactions.remove(tid);
    }

    /// Remove timed out transactions.
    ///
    /// Returns the lookups of expired [QueryKind::AnnounceStart] transactions,
    /// which have converged and are ready to announce.
    pub fn expire(&mut self, now: Instant) -> Vec<Lookup> {
        let timeout = self.timeout;
        let mut converged = Vec::new();

        self.transactions.retain(|tid, transaction| {
            if now.saturating_duration_since(transaction.created_at) < timeout {
                return true;
            }

            trace!(?tid, kind = ?transaction.kind, "Transaction expired");

            if transaction.kind == QueryKind::AnnounceStart {
                if let Some(lookup) = transaction.lookup.take() {
                    converged.push(lookup);
                }
            }

            false
        });

        converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Id;

    #[test]
    fn unique_ids() {
        let mut transactions = Transactions::new(TRANSACTION_TIMEOUT);
        let now = Instant::now();

        transactions.next_tid = u32::MAX;
        let a = transactions.create(QueryKind::Ping, now);
        let b = transactions.create(QueryKind::FindNode, now);

        assert_ne!(a, b);
        assert_eq!(a, [0xff; 4]);
        assert_eq!(b, [0; 4]);

        // Wrapping around skips ids still in use.
        transactions.next_tid = u32::MAX;
        let c = transactions.create(QueryKind::Ping, now);
        assert_eq!(c, [0, 0, 0, 1]);

        assert_eq!(transactions.kind(&a), Some(QueryKind::Ping));
        assert_eq!(transactions.kind(&b), Some(QueryKind::FindNode));
    }

    #[test]
    fn expire_returns_converged_announces() {
        let mut transactions = Transactions::new(TRANSACTION_TIMEOUT);
        let now = Instant::now();

        let announce = transactions.create(QueryKind::AnnounceStart, now);
        transactions.link_lookup(&announce, Lookup::new(Id::random(), None));

        let get_peers = transactions.create(QueryKind::GetPeers, now);
        transactions.link_lookup(&get_peers, Lookup::new(Id::random(), None));

        assert!(transactions.expire(now + Duration::from_secs(1)).is_empty());
        assert_eq!(transactions.len(), 2);

        let converged = transactions.expire(now + TRANSACTION_TIMEOUT);
        assert_eq!(converged.len(), 1);
        assert!(transactions.is_empty());
    }

    #[test]
    fn one_shot_kinds() {
        assert!(QueryKind::Ping.is_one_shot());
        assert!(QueryKind::FindNode.is_one_shot());
        assert!(QueryKind::AnnounceEngage.is_one_shot());

        assert!(!QueryKind::PingMulticast.is_one_shot());
        assert!(!QueryKind::GetPeers.is_one_shot());
        assert!(!QueryKind::AnnounceStart.is_one_shot());
    }
}
