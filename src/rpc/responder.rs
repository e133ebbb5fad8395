//! Delivery of resolved values to the clients that asked for them.

use std::fmt::Debug;
use std::net::{SocketAddr, SocketAddrV4};

use bytes::Bytes;
use flume::{Receiver, Sender};

use crate::common::decode_peers;

/// Answers clients waiting on a hostname lookup, for example over DNS.
pub trait Responder: Debug + Send + Sync {
    /// `values` is a compact list of peers, never empty.
    fn success(&self, to: SocketAddr, context: &Bytes, values: &[u8]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Values resolved for one client request.
pub struct Answer {
    /// The client that asked.
    pub to: SocketAddr,
    /// The opaque context it was asked with.
    pub context: Bytes,
    pub values: Vec<u8>,
}

impl Answer {
    /// The resolved peers, skipping trailing bytes.
    pub fn peers(&self) -> Vec<SocketAddrV4> {
        let whole = self.values.len() - self.values.len() % crate::common::PEER_SIZE;
        decode_peers(&self.values[..whole]).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
/// [Responder] forwarding every [Answer] into a channel.
pub struct ChannelResponder {
    sender: Sender<Answer>,
}

impl ChannelResponder {
    /// Returns the responder and the receiving end of its channel.
    pub fn new() -> (Self, Receiver<Answer>) {
        let (sender, receiver) = flume::unbounded();

        (ChannelResponder { sender }, receiver)
    }
}

impl Responder for ChannelResponder {
    fn success(&self, to: SocketAddr, context: &Bytes, values: &[u8]) {
        let _ = self.sender.send(Answer {
            to,
            context: context.clone(),
            values: values.to_vec(),
        });
    }
}
