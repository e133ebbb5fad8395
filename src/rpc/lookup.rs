//! Candidate table of an iterative lookup, sorted by distance to its target.

use std::collections::HashMap;
use std::net::SocketAddrV4;

use bytes::Bytes;

use crate::common::{Id, TOKEN_SIZE_MAX};

/// Candidates a single lookup may accumulate before it is considered runaway.
pub const MAX_CANDIDATES: usize = 32767;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Lookup exceeded {MAX_CANDIDATES} candidates and was aborted")]
/// The candidate table hit [MAX_CANDIDATES]; the lookup is over.
pub struct LookupOverflow;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of [Lookup::insert].
pub enum Insertion {
    /// Inserted at this 0-based rank, 0 being the closest to the target.
    Ranked(usize),
    /// Already a candidate. Nothing changed.
    Known,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: Id,
    pub address: SocketAddrV4,
    token: [u8; TOKEN_SIZE_MAX],
    token_len: usize,
}

impl Candidate {
    fn new(id: Id, address: SocketAddrV4) -> Self {
        Candidate {
            id,
            address,
            token: [0; TOKEN_SIZE_MAX],
            token_len: 0,
        }
    }

    /// Token returned by this candidate, empty until it replied to a get_peers.
    pub fn token(&self) -> &[u8] {
        &self.token[..self.token_len]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Client waiting for the outcome of a lookup.
pub struct Originator {
    pub address: std::net::SocketAddr,
    /// Opaque request context handed back to the [crate::Responder].
    pub context: Bytes,
}

#[derive(Debug)]
/// Candidates of one lookup, kept sorted by XOR distance to the target.
pub struct Lookup {
    target: Id,
    order: Vec<Id>,
    candidates: HashMap<Id, Candidate>,
    originator: Option<Originator>,
    responded: bool,
    aborted: bool,
}

impl Lookup {
    pub fn new(target: Id, originator: Option<Originator>) -> Self {
        Lookup {
            target,
            order: Vec::new(),
            candidates: HashMap::new(),
            originator,
            responded: false,
            aborted: false,
        }
    }

    // === Getters ===

    pub fn target(&self) -> &Id {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Client expecting a direct answer, `None` for internal lookups.
    pub fn originator(&self) -> Option<&Originator> {
        self.originator.as_ref()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Candidates from the closest to the furthest.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.order.iter().filter_map(|id| self.candidates.get(id))
    }

    // === Public Methods ===

    /// Add a candidate in distance order.
    ///
    /// Reaching [MAX_CANDIDATES] releases every candidate and aborts the
    /// lookup; all later operations are no-ops.
    pub fn insert(&mut self, id: Id, address: SocketAddrV4) -> Result<Insertion, LookupOverflow> {
        if self.aborted {
            return Err(LookupOverflow);
        }
        if self.candidates.contains_key(&id) {
            return Ok(Insertion::Known);
        }
        if self.order.len() >= MAX_CANDIDATES {
            self.abort();
            return Err(LookupOverflow);
        }

        let target = self.target;
        // Before the first candidate that is not closer than the new one.
        let rank = self
            .order
            .partition_point(|existing| Id::compare_distance(&id, existing, &target).is_ge());

        self.order.insert(rank, id);
        self.candidates.insert(id, Candidate::new(id, address));

        Ok(Insertion::Ranked(rank))
    }

    pub fn find(&self, id: &Id) -> Option<&Candidate> {
        self.candidates.get(id)
    }

    /// Store the token and current address of a candidate that replied.
    /// Unknown candidates are ignored, and the rank never changes.
    pub fn update(&mut self, id: &Id, token: &[u8], address: SocketAddrV4) {
        if token.len() > TOKEN_SIZE_MAX {
            return;
        }

        if let Some(candidate) = self.candidates.get_mut(id) {
            candidate.address = address;
            candidate.token[..token.len()].copy_from_slice(token);
            candidate.token_len = token.len();
        }
    }

    /// Up to `limit` closest candidates that handed us a token.
    pub fn token_holders(&self, limit: usize) -> Vec<&Candidate> {
        self.iter()
            .filter(|candidate| candidate.token_len > 0)
            .take(limit)
            .collect()
    }

    /// Marks the originator as answered. Returns `false` if it already was.
    pub fn take_response(&mut self) -> bool {
        if self.originator.is_none() || self.responded {
            return false;
        }

        self.responded = true;
        true
    }

    // === Private Methods ===

    fn abort(&mut self) {
        self.aborted = true;
        self.order = Vec::new();
        self.candidates = HashMap::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> SocketAddrV4 {
        SocketAddrV4::new([10, 0, 0, 1].into(), 6881)
    }

    fn with_first_byte(byte: u8) -> Id {
        let mut bytes = [0; 20];
        bytes[0] = byte;
        Id(bytes)
    }

    #[test]
    fn closer_candidate_goes_first() {
        let mut lookup = Lookup::new(Id([0; 20]), None);

        let a = with_first_byte(0x01);
        let b = with_first_byte(0x02);

        assert_eq!(lookup.insert(b, address()), Ok(Insertion::Ranked(0)));
        assert_eq!(lookup.insert(a, address()), Ok(Insertion::Ranked(0)));

        let order: Vec<Id> = lookup.iter().map(|c| c.id).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn stays_sorted_and_unique() {
        let target = Id::random();
        let mut lookup = Lookup::new(target, None);
        let ids: Vec<Id> = (0..200).map(|_| Id::random()).collect();

        for id in &ids {
            assert!(matches!(lookup.insert(*id, address()), Ok(Insertion::Ranked(_))));
        }
        for id in &ids {
            assert_eq!(lookup.insert(*id, address()), Ok(Insertion::Known));
        }

        assert_eq!(lookup.len(), ids.len());

        let order: Vec<Id> = lookup.iter().map(|c| c.id).collect();
        assert!(order
            .windows(2)
            .all(|pair| Id::compare_distance(&pair[0], &pair[1], &target).is_lt()));
    }

    #[test]
    fn update_keeps_rank() {
        let mut lookup = Lookup::new(Id([0; 20]), None);
        let a = with_first_byte(0x01);
        let b = with_first_byte(0x02);

        lookup.insert(a, address()).unwrap();
        lookup.insert(b, address()).unwrap();

        let moved = SocketAddrV4::new([10, 0, 0, 2].into(), 1);
        lookup.update(&b, b"token", moved);
        lookup.update(&Id::random(), b"ignored", moved);

        let order: Vec<&Candidate> = lookup.iter().collect();
        assert_eq!(order[0].id, a);
        assert_eq!(order[1].id, b);
        assert_eq!(order[1].token(), b"token");
        assert_eq!(order[1].address, moved);
        assert_eq!(lookup.token_holders(8).len(), 1);
    }

    #[test]
    fn overflow_aborts_lookup() {
        let mut lookup = Lookup::new(Id([0; 20]), None);

        // Increasingly distant ids, so every insert appends.
        for i in 0..MAX_CANDIDATES as u32 {
            let mut bytes = [0; 20];
            bytes[16..].copy_from_slice(&(i + 1).to_be_bytes());
            lookup.insert(Id(bytes), address()).unwrap();
        }
        assert_eq!(lookup.len(), MAX_CANDIDATES);

        assert_eq!(lookup.insert(Id::random(), address()), Err(LookupOverflow));
        assert!(lookup.is_aborted());
        assert!(lookup.is_empty());

        // Everything afterwards is a no-op.
        assert_eq!(lookup.insert(Id::random(), address()), Err(LookupOverflow));
        lookup.update(&Id::random(), b"token", address());
        assert!(lookup.is_empty());
    }

    #[test]
    fn single_response_for_originator() {
        let mut internal = Lookup::new(Id::random(), None);
        assert!(!internal.take_response());

        let mut client = Lookup::new(
            Id::random(),
            Some(Originator {
                address: "127.0.0.1:5353".parse().unwrap(),
                context: Bytes::from_static(b"query"),
            }),
        );
        assert!(client.take_response());
        assert!(!client.take_response());
    }
}
