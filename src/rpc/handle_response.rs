use std::net::{SocketAddr, SocketAddrV4};
use std::time::Instant;

use serde_bencode::value::Value;
use tracing::{debug, info, trace, warn};

use crate::common::{
    decode_nodes, is_link_local, Id, Node, Reply, MAX_BUCKET_SIZE_K, PEER_SIZE, TOKEN_SIZE_MAX,
};

use super::lookup::Insertion;
use super::{QueryKind, Rpc, TransactionId};

impl Rpc {
    /// Handle an inbound reply, correlated with the query we sent through its
    /// transaction id.
    pub(super) fn handle_reply(&mut self, reply: Reply, from: SocketAddrV4, now: Instant) {
        if self.is_from_myself(&reply.responder_id, &from) {
            return;
        }

        let tid = match reply.check_transaction_id() {
            Ok(tid) => tid,
            Err(error) => {
                trace!(?from, ?error, "Dropped reply");
                return;
            }
        };

        self.routing_table.put(reply.responder_id, from, now);

        let kind = match self.transactions.kind(&tid) {
            Some(kind) => kind,
            None => {
                trace!(?from, ?tid, "Reply for unknown transaction");
                return;
            }
        };

        match kind {
            QueryKind::Ping | QueryKind::PingMulticast => {
                trace!(?from, id = %reply.responder_id, "Pong");
                self.routing_table.ponged(&reply.responder_id, from, now);
            }
            QueryKind::FindNode => self.apply_find_node_reply(&reply, from, now),
            QueryKind::GetPeers | QueryKind::AnnounceStart => {
                self.apply_get_peers_reply(&tid, &reply, from, now)
            }
            QueryKind::AnnounceEngage => {}
        }

        if kind.is_one_shot() {
            self.transactions.delete(&tid);
        }
    }

    /// Learn the nodes of a find_node reply. They only feed the routing table.
    fn apply_find_node_reply(&mut self, reply: &Reply, from: SocketAddrV4, now: Instant) {
        let nodes = match reply
            .arguments
            .bytes("nodes")
            .map_err(crate::Error::from)
            .and_then(decode_nodes)
        {
            Ok(nodes) => nodes,
            Err(error) => {
                trace!(?from, ?error, "Dropped find_node reply");
                return;
            }
        };

        for node in self.routable(nodes) {
            self.routing_table.put(node.id, node.address, now);
        }
    }

    fn apply_get_peers_reply(
        &mut self,
        tid: &TransactionId,
        reply: &Reply,
        from: SocketAddrV4,
        now: Instant,
    ) {
        let token = match reply.arguments.bytes("token") {
            Ok(token) if !token.is_empty() && token.len() <= TOKEN_SIZE_MAX => token,
            _ => {
                trace!(?from, "Missing or broken token");
                return;
            }
        };

        if reply.arguments.contains("values") {
            match reply.arguments.list("values") {
                Ok(values) => {
                    self.apply_values(tid, &reply.responder_id, token, values, from, now)
                }
                Err(error) => trace!(?from, ?error, "Dropped get_peers reply"),
            }
            return;
        }

        if reply.arguments.contains("nodes") {
            match reply
                .arguments
                .bytes("nodes")
                .map_err(crate::Error::from)
                .and_then(decode_nodes)
            {
                Ok(nodes) => self.apply_nodes(tid, &reply.responder_id, token, nodes, from, now),
                Err(error) => trace!(?from, ?error, "Dropped get_peers reply"),
            }
        }
    }

    /// Values found: merge them into the cache, and answer a waiting client once.
    fn apply_values(
        &mut self,
        tid: &TransactionId,
        responder_id: &Id,
        token: &[u8],
        values: &[Value],
        from: SocketAddrV4,
        now: Instant,
    ) {
        let lookup = match self.transactions.lookup_mut(tid) {
            Some(lookup) => lookup,
            None => return,
        };

        lookup.update(responder_id, token, from);

        let mut compact = Vec::with_capacity(MAX_BUCKET_SIZE_K * PEER_SIZE);
        for value in values.iter().take(MAX_BUCKET_SIZE_K) {
            match value {
                Value::Bytes(peer) if peer.len() == PEER_SIZE => compact.extend_from_slice(peer),
                _ => {
                    trace!(?from, "Values list broken");
                    return;
                }
            }
        }

        if compact.is_empty() {
            return;
        }

        let target = *lookup.target();
        info!("Found {} at {}", target, from);

        self.cache.merge(target, &compact, now);

        // Internal lookups never answer anyone, and a client is answered once.
        let originator = match self.transactions.lookup_mut(tid) {
            Some(lookup) => {
                if lookup.take_response() {
                    lookup.originator().cloned()
                } else {
                    None
                }
            }
            None => None,
        };

        if let Some(originator) = originator {
            let merged = self.cache.compact_list(&target);

            if !merged.is_empty() {
                debug!(%target, to = ?originator.address, "Answering client");
                self.outbox
                    .answer(originator.address, originator.context, merged);
            }
        }
    }

    /// Closer nodes found: query the ones ranking among the closest candidates.
    fn apply_nodes(
        &mut self,
        tid: &TransactionId,
        responder_id: &Id,
        token: &[u8],
        nodes: Vec<Node>,
        from: SocketAddrV4,
        now: Instant,
    ) {
        let nodes = self.routable(nodes);

        let lookup = match self.transactions.lookup_mut(tid) {
            Some(lookup) => lookup,
            None => return,
        };

        lookup.update(responder_id, token, from);

        let target = *lookup.target();
        let mut overflow = false;

        for node in nodes {
            self.routing_table.put(node.id, node.address, now);

            match lookup.insert(node.id, node.address) {
                Ok(Insertion::Ranked(rank)) if rank < MAX_BUCKET_SIZE_K => {
                    self.outbox
                        .send_get_peers_request(node.address, &target, tid);
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%target, %error, "Dropping lookup");
                    overflow = true;
                    break;
                }
            }
        }

        if overflow {
            self.transactions.unlink_lookup(tid);
        }
    }

    /// Drop our own id and link-local addresses from a node list.
    fn routable(&self, nodes: Vec<Node>) -> Vec<Node> {
        nodes
            .into_iter()
            .filter(|node| node.id != self.id)
            .filter(|node| !is_link_local(&SocketAddr::V4(node.address)))
            .collect()
    }
}
