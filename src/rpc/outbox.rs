//! Outbound messages queued while the shared state is locked.
//!
//! Handlers only encode; the queue is flushed to the transport and the
//! responder after the lock is released.

use std::net::{SocketAddr, SocketAddrV4};

use bytes::Bytes;
use serde::Serialize;
use serde_bytes::{ByteBuf, Bytes as ByteSlice};
use tracing::{debug, trace};

use crate::common::messages::internal::{
    DHTAnnouncePeerRequestArguments, DHTFindNodeRequestArguments, DHTGetPeersRequestArguments,
    DHTIdArguments, DHTNodesResponseArguments, DHTQuery, DHTReply, DHTValuesResponseArguments,
};
use crate::common::{Id, PEER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Encoded KRPC message for another node.
    Packet { to: SocketAddrV4, bytes: Vec<u8> },
    /// Resolved values for a waiting client.
    Answer {
        to: SocketAddr,
        context: Bytes,
        values: Vec<u8>,
    },
}

#[derive(Debug)]
pub struct Outbox {
    id: Id,
    queue: Vec<Outgoing>,
}

impl Outbox {
    pub fn new(id: Id) -> Self {
        Outbox {
            id,
            queue: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take everything queued so far.
    pub fn drain(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.queue)
    }

    // === Requests ===

    pub fn send_ping(&mut self, to: SocketAddrV4, tid: &[u8]) {
        let id = self.id;
        let arguments = DHTIdArguments {
            id: ByteSlice::new(id.as_bytes()),
        };
        self.query(to, "ping", tid, arguments);
    }

    pub fn send_find_node_request(&mut self, to: SocketAddrV4, target: &Id, tid: &[u8]) {
        let id = self.id;
        let arguments = DHTFindNodeRequestArguments {
            id: ByteSlice::new(id.as_bytes()),
            target: ByteSlice::new(target.as_bytes()),
        };
        self.query(to, "find_node", tid, arguments);
    }

    pub fn send_get_peers_request(&mut self, to: SocketAddrV4, info_hash: &Id, tid: &[u8]) {
        let id = self.id;
        let arguments = DHTGetPeersRequestArguments {
            id: ByteSlice::new(id.as_bytes()),
            info_hash: ByteSlice::new(info_hash.as_bytes()),
        };
        self.query(to, "get_peers", tid, arguments);
    }

    pub fn send_announce_request(
        &mut self,
        to: SocketAddrV4,
        info_hash: &Id,
        port: u16,
        token: &[u8],
        tid: &[u8],
    ) {
        let id = self.id;
        let arguments = DHTAnnouncePeerRequestArguments {
            id: ByteSlice::new(id.as_bytes()),
            info_hash: ByteSlice::new(info_hash.as_bytes()),
            port,
            token: ByteSlice::new(token),
        };
        self.query(to, "announce_peer", tid, arguments);
    }

    // === Replies ===

    pub fn send_pong(&mut self, to: SocketAddrV4, tid: &[u8]) {
        let id = self.id;
        let arguments = DHTIdArguments {
            id: ByteSlice::new(id.as_bytes()),
        };
        self.reply(to, tid, arguments);
    }

    pub fn send_find_node_reply(&mut self, to: SocketAddrV4, nodes: &[u8], tid: &[u8]) {
        let id = self.id;
        let arguments = DHTNodesResponseArguments {
            id: ByteSlice::new(id.as_bytes()),
            nodes: ByteSlice::new(nodes),
            token: None,
        };
        self.reply(to, tid, arguments);
    }

    /// `values` is a compact list of peers, sent as a list of compact peers.
    pub fn send_get_peers_values(
        &mut self,
        to: SocketAddrV4,
        values: &[u8],
        token: &[u8],
        tid: &[u8],
    ) {
        let id = self.id;
        let arguments = DHTValuesResponseArguments {
            id: ByteSlice::new(id.as_bytes()),
            token: ByteSlice::new(token),
            values: values
                .chunks_exact(PEER_SIZE)
                .map(|peer| ByteBuf::from(peer.to_vec()))
                .collect(),
        };
        self.reply(to, tid, arguments);
    }

    pub fn send_get_peers_nodes(&mut self, to: SocketAddrV4, nodes: &[u8], token: &[u8], tid: &[u8]) {
        let id = self.id;
        let arguments = DHTNodesResponseArguments {
            id: ByteSlice::new(id.as_bytes()),
            nodes: ByteSlice::new(nodes),
            token: Some(ByteSlice::new(token)),
        };
        self.reply(to, tid, arguments);
    }

    pub fn send_announce_reply(&mut self, to: SocketAddrV4, tid: &[u8]) {
        let id = self.id;
        let arguments = DHTIdArguments {
            id: ByteSlice::new(id.as_bytes()),
        };
        self.reply(to, tid, arguments);
    }

    // === Clients ===

    pub fn answer(&mut self, to: SocketAddr, context: Bytes, values: Vec<u8>) {
        trace!(context = "answer_queued", ?to, size = values.len());

        self.queue.push(Outgoing::Answer {
            to,
            context,
            values,
        });
    }

    // === Private Methods ===

    fn query<A: Serialize>(&mut self, to: SocketAddrV4, verb: &str, tid: &[u8], arguments: A) {
        let message = DHTQuery {
            arguments,
            verb,
            transaction_id: ByteSlice::new(tid),
            kind: "q",
        };

        match serde_bencode::to_bytes(&message) {
            Ok(bytes) => {
                trace!(context = "socket_message_sending", ?to, verb, "Queued request");
                self.queue.push(Outgoing::Packet { to, bytes });
            }
            Err(error) => debug!(?error, verb, "Failed to encode request"),
        }
    }

    fn reply<R: Serialize>(&mut self, to: SocketAddrV4, tid: &[u8], arguments: R) {
        let message = DHTReply {
            arguments,
            transaction_id: ByteSlice::new(tid),
            kind: "r",
        };

        match serde_bencode::to_bytes(&message) {
            Ok(bytes) => {
                trace!(context = "socket_message_sending", ?to, "Queued reply");
                self.queue.push(Outgoing::Packet { to, bytes });
            }
            Err(error) => debug!(?error, "Failed to encode reply"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{Message, Verb};

    fn address() -> SocketAddrV4 {
        SocketAddrV4::new([10, 0, 0, 1].into(), 6881)
    }

    fn only_packet(outbox: &mut Outbox) -> Vec<u8> {
        match outbox.drain().as_slice() {
            [Outgoing::Packet { bytes, .. }] => bytes.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ping_wire_format() {
        let mut outbox = Outbox::new(Id(*b"abcdefghij0123456789"));
        outbox.send_ping(address(), b"aaaa");

        assert_eq!(
            only_packet(&mut outbox),
            b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t4:aaaa1:y1:qe".to_vec()
        );
    }

    #[test]
    fn pong_wire_format() {
        let mut outbox = Outbox::new(Id(*b"mnopqrstuvwxyz123456"));
        outbox.send_pong(address(), b"aa");

        assert_eq!(
            only_packet(&mut outbox),
            b"d1:rd2:id20:mnopqrstuvwxyz123456e1:t2:aa1:y1:re".to_vec()
        );
    }

    #[test]
    fn values_are_split_into_peers() {
        let mut outbox = Outbox::new(Id::random());
        let values = [10, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe1];
        outbox.send_get_peers_values(address(), &values, b"tok", b"aa");

        let bytes = only_packet(&mut outbox);
        match Message::from_bytes(&bytes).unwrap() {
            Message::Reply(reply) => {
                assert_eq!(reply.arguments.list("values").unwrap().len(), 2);
                assert_eq!(reply.arguments.bytes("token").unwrap(), b"tok");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn announce_request_decodes() {
        let mut outbox = Outbox::new(Id::random());
        let info_hash = Id::random();
        outbox.send_announce_request(address(), &info_hash, 8080, b"token", b"abcd");

        let bytes = only_packet(&mut outbox);
        match Message::from_bytes(&bytes).unwrap() {
            Message::Request(request) => {
                assert_eq!(request.verb, Verb::AnnouncePeer);
                assert_eq!(request.arguments.id("info_hash").unwrap(), info_hash);
                assert_eq!(request.arguments.int("port").unwrap(), 8080);
                assert_eq!(request.arguments.bytes("token").unwrap(), b"token");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn answers_are_queued_in_order() {
        let mut outbox = Outbox::new(Id::random());
        let client: SocketAddr = "127.0.0.1:5353".parse().unwrap();

        outbox.send_ping(address(), b"aaaa");
        outbox.answer(client, Bytes::from_static(b"ctx"), vec![1, 2, 3, 4, 5, 6]);

        let queued = outbox.drain();
        assert_eq!(queued.len(), 2);
        assert!(matches!(queued[1], Outgoing::Answer { .. }));
        assert!(outbox.is_empty());
    }
}
