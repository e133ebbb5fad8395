use std::net::SocketAddrV4;
use std::time::Instant;

use tracing::trace;

use crate::common::{encode_nodes, Request, Verb, TOKEN_SIZE_MAX};

use super::Rpc;

impl Rpc {
    /// Handle an inbound request: remember the requester and answer it.
    ///
    /// Nothing is ever answered with an error message, broken requests are
    /// silently dropped.
    pub(super) fn handle_request(&mut self, request: Request, from: SocketAddrV4, now: Instant) {
        if self.is_from_myself(&request.requester_id, &from) {
            return;
        }

        if let Err(error) = request.check_transaction_id() {
            trace!(?from, ?error, "Dropped request");
            return;
        }

        // Existence only, the address of a known node is not updated.
        self.routing_table.put(request.requester_id, from, now);

        match &request.verb {
            Verb::Ping => self.outbox.send_pong(from, &request.transaction_id),
            Verb::FindNode => self.answer_find_node(&request, from),
            Verb::GetPeers => self.answer_get_peers(&request, from),
            Verb::AnnouncePeer => self.answer_announce_peer(&request, from, now),
            Verb::Vote => trace!(?from, "Dropped vote request"),
            Verb::Unknown(verb) => {
                trace!(?from, verb = %String::from_utf8_lossy(verb), "Dropped unknown request");
            }
        }
    }

    fn answer_find_node(&mut self, request: &Request, from: SocketAddrV4) {
        let target = match request.arguments.id("target") {
            Ok(target) => target,
            Err(error) => {
                trace!(?from, ?error, "Dropped find_node request");
                return;
            }
        };

        let nodes = encode_nodes(&self.routing_table.closest(&target));

        if !nodes.is_empty() {
            self.outbox
                .send_find_node_reply(from, &nodes, &request.transaction_id);
        }
    }

    fn answer_get_peers(&mut self, request: &Request, from: SocketAddrV4) {
        let info_hash = match request.arguments.id("info_hash") {
            Ok(info_hash) => info_hash,
            Err(error) => {
                trace!(?from, ?error, "Dropped get_peers request");
                return;
            }
        };

        let token = self.tokens.generate_token(&from);

        let values = self.values.compact_list(&info_hash);
        if !values.is_empty() {
            self.outbox
                .send_get_peers_values(from, &values, &token, &request.transaction_id);
            return;
        }

        let nodes = encode_nodes(&self.routing_table.closest(&info_hash));
        if !nodes.is_empty() {
            self.outbox
                .send_get_peers_nodes(from, &nodes, &token, &request.transaction_id);
        }
    }

    fn answer_announce_peer(&mut self, request: &Request, from: SocketAddrV4, now: Instant) {
        let arguments = &request.arguments;

        let info_hash = match arguments.id("info_hash") {
            Ok(info_hash) => info_hash,
            Err(error) => {
                trace!(?from, ?error, "Dropped announce_peer request");
                return;
            }
        };

        let token = match arguments.bytes("token") {
            Ok(token) if token.len() <= TOKEN_SIZE_MAX => token,
            _ => {
                trace!(?from, "Missing or broken token");
                return;
            }
        };

        if !self.tokens.validate(&from, token) {
            trace!(?from, "Invalid token");
            return;
        }

        let port = match arguments.int("port") {
            Ok(port) => port,
            Err(error) => {
                trace!(?from, ?error, "Dropped announce_peer request");
                return;
            }
        };

        let port = match u16::try_from(port) {
            Ok(port) if port > 0 => port,
            _ => {
                trace!(?from, port, "Invalid port");
                return;
            }
        };

        self.values
            .put(info_hash, request.requester_id, port, &from, now);

        self.outbox
            .send_announce_reply(from, &request.transaction_id);
    }
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use crate::common::{decode_nodes, Id, Message, Reply, Verb};
    use crate::rpc::{Config, Outgoing, Rpc};

    use super::*;
    use crate::common::Arguments;

    fn requester() -> SocketAddrV4 {
        SocketAddrV4::new([10, 0, 0, 9].into(), 6881)
    }

    fn request(verb: Verb, arguments: &[(&str, serde_bencode::value::Value)]) -> Request {
        let mut dict = std::collections::HashMap::new();
        dict.insert(
            b"id".to_vec(),
            serde_bencode::value::Value::Bytes(Id::random().to_vec()),
        );
        for (key, value) in arguments {
            dict.insert(key.as_bytes().to_vec(), value.clone());
        }
        let arguments = Arguments::from(dict);

        Request {
            transaction_id: b"aa".to_vec(),
            requester_id: arguments.id("id").unwrap(),
            verb,
            arguments,
        }
    }

    fn replies(rpc: &mut Rpc) -> Vec<Reply> {
        rpc.drain_outbox()
            .into_iter()
            .filter_map(|outgoing| match outgoing {
                Outgoing::Packet { bytes, .. } => match Message::from_bytes(&bytes) {
                    Ok(Message::Reply(reply)) => Some(reply),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn bytes(bytes: &[u8]) -> serde_bencode::value::Value {
        serde_bencode::value::Value::Bytes(bytes.to_vec())
    }

    #[test]
    fn ping_is_answered_with_our_id() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&Config::default(), now);

        let ping = request(Verb::Ping, &[]);
        let requester_id = ping.requester_id;
        rpc.handle_request(ping, requester(), now);

        let replies = replies(&mut rpc);
        assert_eq!(replies.len(), 1);
        assert_eq!(&replies[0].responder_id, rpc.id());
        assert_eq!(replies[0].transaction_id, b"aa".to_vec());

        assert!(rpc.routing_table().contains(&requester_id));
    }

    #[test]
    fn requests_from_myself_are_dropped() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&Config::default(), now);

        let mut ping = request(Verb::Ping, &[]);
        ping.requester_id = *rpc.id();
        rpc.handle_request(ping, requester(), now);

        assert!(rpc.drain_outbox().is_empty());
        assert!(rpc.routing_table().is_empty());
    }

    #[test]
    fn oversized_transaction_id_is_dropped() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&Config::default(), now);

        let mut ping = request(Verb::Ping, &[]);
        ping.transaction_id = vec![0; 21];
        rpc.handle_request(ping, requester(), now);

        assert!(rpc.drain_outbox().is_empty());
    }

    #[test]
    fn find_node_needs_known_nodes() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&Config::default(), now);
        let target = Id::random();

        // The requester itself is the only node we know.
        let find_node = request(Verb::FindNode, &[("target", bytes(target.as_bytes()))]);
        let requester_id = find_node.requester_id;
        rpc.handle_request(find_node, requester(), now);

        let replies = replies(&mut rpc);
        let nodes = decode_nodes(replies[0].arguments.bytes("nodes").unwrap()).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, requester_id);
    }

    #[test]
    fn get_peers_hands_out_tokens() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&Config::default(), now);
        let info_hash = Id::random();

        let get_peers = request(Verb::GetPeers, &[("info_hash", bytes(info_hash.as_bytes()))]);
        rpc.handle_request(get_peers, requester(), now);

        let replies = replies(&mut rpc);
        assert_eq!(replies.len(), 1);
        assert!(replies[0].arguments.contains("nodes"));

        let token = replies[0].arguments.bytes("token").unwrap();
        assert!(rpc.tokens.validate(&requester(), token));
    }

    #[test]
    fn announce_then_get_peers_returns_values() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&Config::default(), now);
        let info_hash = Id::random();
        let token = rpc.tokens.generate_token(&requester());

        let announce = request(
            Verb::AnnouncePeer,
            &[
                ("info_hash", bytes(info_hash.as_bytes())),
                ("token", bytes(&token)),
                ("port", serde_bencode::value::Value::Int(8080)),
            ],
        );
        rpc.handle_request(announce, requester(), now);

        let acks = replies(&mut rpc);
        assert_eq!(acks.len(), 1);
        assert!(!acks[0].arguments.contains("values"));

        let get_peers = request(Verb::GetPeers, &[("info_hash", bytes(info_hash.as_bytes()))]);
        rpc.handle_request(get_peers, SocketAddrV4::new([10, 0, 0, 10].into(), 1), now);

        let replies = replies(&mut rpc);
        let values = replies[0].arguments.list("values").unwrap();
        assert_eq!(
            values,
            &[bytes(&[10, 0, 0, 9, 0x1f, 0x90])]
        );
    }

    #[test]
    fn announce_with_bad_token_or_port_is_dropped() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&Config::default(), now);
        let info_hash = Id::random();
        let token = rpc.tokens.generate_token(&requester());

        let cases = [
            (b"forged".to_vec(), 8080),
            (token.to_vec(), 0),
            (token.to_vec(), 65536),
            (vec![0; 21], 8080),
        ];

        for (token, port) in cases {
            let announce = request(
                Verb::AnnouncePeer,
                &[
                    ("info_hash", bytes(info_hash.as_bytes())),
                    ("token", bytes(&token)),
                    ("port", serde_bencode::value::Value::Int(port)),
                ],
            );
            rpc.handle_request(announce, requester(), now);
        }

        assert!(replies(&mut rpc).is_empty());
        assert!(rpc.values.compact_list(&info_hash).is_empty());
    }

    #[test]
    fn unknown_verbs_are_never_answered() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&Config::default(), now);

        rpc.handle_request(request(Verb::Vote, &[]), requester(), now);
        rpc.handle_request(
            request(Verb::Unknown(b"sample_infohashes".to_vec()), &[]),
            requester(),
            now,
        );

        assert!(rpc.drain_outbox().is_empty());
    }
}
