#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;

mod dht;
pub mod encryption;
mod error;
pub mod node;
pub mod rpc;
pub mod socket;

pub use crate::common::{Id, Node};
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder};
pub use rpc::{Answer, ChannelResponder, Config, Responder};

pub use error::{Error, Result};

/// Wire-level types: message decoding, compact encodings and the routing table.
pub mod protocol {
    pub use crate::common::{
        decode_nodes, decode_peers, encode_nodes, encode_peer, validate, Arguments, ErrorMessage,
        KBucket, Message, MessageError, Reply, Request, RoutingNode, RoutingTable, Verb,
        MAX_BUCKET_SIZE_K, NODE_SIZE, PEER_SIZE, TID_SIZE, TID_SIZE_MAX, TOKEN_SIZE_MAX,
    };
}
