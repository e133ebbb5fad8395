//! Nodes and peers in their compact wire encoding.
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::common::{Id, ID_SIZE};
use crate::{Error, Result};

/// Size of a compact peer: IPv4 address followed by a big-endian port.
pub const PEER_SIZE: usize = 6;
/// Size of a compact node: [Id] followed by a compact peer.
pub const NODE_SIZE: usize = ID_SIZE + PEER_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A node as exchanged in `nodes` lists.
pub struct Node {
    pub id: Id,
    pub address: SocketAddrV4,
}

impl Node {
    /// Creates a new Node from an id and socket address.
    pub fn new(id: Id, address: SocketAddrV4) -> Node {
        Node { id, address }
    }

    #[cfg(test)]
    pub fn random() -> Node {
        let octets: [u8; 4] = rand::random();
        Node::new(
            Id::random(),
            SocketAddrV4::new(Ipv4Addr::from(octets), rand::random::<u16>().max(1)),
        )
    }

    pub fn to_bytes(&self) -> [u8; NODE_SIZE] {
        let mut bytes = [0_u8; NODE_SIZE];
        bytes[..ID_SIZE].copy_from_slice(self.id.as_bytes());
        bytes[ID_SIZE..].copy_from_slice(&encode_peer(&self.address));
        bytes
    }
}

pub fn encode_peer(address: &SocketAddrV4) -> [u8; PEER_SIZE] {
    let mut bytes = [0_u8; PEER_SIZE];
    bytes[..4].copy_from_slice(&address.ip().octets());
    bytes[4..].copy_from_slice(&address.port().to_be_bytes());
    bytes
}

pub fn decode_peer(bytes: &[u8]) -> Result<SocketAddrV4> {
    if bytes.len() != PEER_SIZE {
        return Err(Error::InvalidCompactSize(bytes.len()));
    }

    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);

    Ok(SocketAddrV4::new(ip, port))
}

/// Decodes a compact node list. Fails unless the length is an exact multiple of [NODE_SIZE].
pub fn decode_nodes(bytes: &[u8]) -> Result<Vec<Node>> {
    if bytes.len() % NODE_SIZE != 0 {
        return Err(Error::InvalidCompactSize(bytes.len()));
    }

    bytes
        .chunks_exact(NODE_SIZE)
        .map(|chunk| {
            Ok(Node::new(
                Id::from_bytes(&chunk[..ID_SIZE])?,
                decode_peer(&chunk[ID_SIZE..])?,
            ))
        })
        .collect()
}

pub fn encode_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Vec<u8> {
    let mut bytes = Vec::new();
    for node in nodes {
        bytes.extend_from_slice(&node.to_bytes());
    }
    bytes
}

/// Decodes a concatenation of compact peers.
pub fn decode_peers(bytes: &[u8]) -> Result<Vec<SocketAddrV4>> {
    if bytes.len() % PEER_SIZE != 0 {
        return Err(Error::InvalidCompactSize(bytes.len()));
    }

    bytes.chunks_exact(PEER_SIZE).map(decode_peer).collect()
}

pub fn is_link_local(address: &SocketAddr) -> bool {
    match address {
        SocketAddr::V4(v4) => v4.ip().is_link_local(),
        // fe80::/10
        SocketAddr::V6(v6) => (v6.ip().segments()[0] & 0xffc0) == 0xfe80,
    }
}

pub fn is_loopback(address: &SocketAddr) -> bool {
    address.ip().is_loopback()
}
