//! K-RPC protocol engine: routing table, transactions, lookups and maintenance.

pub mod config;
mod handle_request;
mod handle_response;
pub mod lookup;
mod outbox;
mod responder;
mod scheduler;
mod server;
mod transactions;

use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::common::{approximately, Id, Message, RoutingTable, MAX_BUCKET_SIZE_K};

pub use config::Config;
pub use lookup::{Lookup, LookupOverflow, Originator};
pub use outbox::Outgoing;
pub use responder::{Answer, ChannelResponder, Responder};
pub use scheduler::{Task, ANNOUNCE_HOST_PERIOD};
pub use transactions::{QueryKind, TransactionId, TRANSACTION_TIMEOUT};

use outbox::Outbox;
use scheduler::Scheduler;
use server::{ResponseCache, Tokens, ValueStore};
use transactions::Transactions;

/// Resolved bootstrap targets pinged at most once per attempt.
pub const MAX_BOOTSTRAP_NODES: usize = 20;
/// Nodes of one bucket asked for a target during table maintenance.
const FIND_FANOUT: usize = 8;
/// Nodes of one bucket pinged per sweep. Further due nodes are only marked pinged.
const PING_FANOUT: usize = 8;
const FIND_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Maintenance needing I/O, performed by the caller outside the lock.
pub struct Maintenance {
    /// The routing table is empty: resolve the bootstrap targets and pass them
    /// to [Rpc::bootstrap].
    pub bootstrap: bool,
    /// Try to join the multicast group and report with [Rpc::set_multicast_joined].
    pub join_multicast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A resolved bootstrap address.
pub struct BootstrapTarget {
    pub address: SocketAddrV4,
    /// Multicast groups may answer any number of times.
    pub multicast: bool,
}

#[derive(Debug, Clone)]
struct Identity {
    hostname: String,
    target: Id,
    next_announce: Instant,
}

#[derive(Debug)]
/// All the shared state of a node.
///
/// Nothing here does I/O: outbound packets and client answers are queued and
/// must be taken with [Rpc::drain_outbox] after every call.
pub struct Rpc {
    id: Id,
    routing_table: RoutingTable,
    transactions: Transactions,
    tokens: Tokens,
    values: ValueStore,
    cache: ResponseCache,
    scheduler: Scheduler,
    outbox: Outbox,

    identities: Vec<Identity>,
    announce_port: u16,
    realm: Option<String>,
    multicast_joined: bool,
}

impl Rpc {
    pub fn new(config: &Config, now: Instant) -> Self {
        let id = config.id.unwrap_or_else(Id::random);
        let realm = config.realm.clone();

        let identities = config
            .hostnames
            .iter()
            .map(|hostname| Identity {
                hostname: hostname.clone(),
                target: Id::from_hostname(hostname, realm.as_deref()),
                next_announce: now,
            })
            .collect();

        Rpc {
            id,
            routing_table: RoutingTable::new(id),
            transactions: Transactions::new(TRANSACTION_TIMEOUT),
            tokens: Tokens::new(now),
            values: ValueStore::default(),
            cache: ResponseCache::default(),
            scheduler: Scheduler::new(now),
            outbox: Outbox::new(id),

            identities,
            announce_port: config.announce_port,
            realm,
            multicast_joined: false,
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    pub fn transactions_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn multicast_joined(&self) -> bool {
        self.multicast_joined
    }

    /// The lookup target of a hostname, taking the configured realm into account.
    pub fn target(&self, hostname: &str) -> Id {
        Id::from_hostname(hostname, self.realm.as_deref())
    }

    // === Public Methods ===

    /// Take every packet and answer queued since the last call.
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        self.outbox.drain()
    }

    /// Handle a decoded message received from `from`.
    pub fn handle_message_at(&mut self, message: Message, from: SocketAddrV4, now: Instant) {
        match message {
            Message::Request(request) => self.handle_request(request, from, now),
            Message::Reply(reply) => self.handle_reply(reply, from, now),
            Message::Error(error) => {
                debug!(?from, code = error.code, description = %error.description, "Error message");
            }
        }
    }

    /// Run every maintenance task that is due.
    ///
    /// Returns the maintenance the caller has to perform, since it needs I/O.
    pub fn tick_at(&mut self, now: Instant) -> Maintenance {
        let mut maintenance = Maintenance::default();

        if self.routing_table.is_empty() {
            maintenance.bootstrap = self.scheduler.due(Task::Bootstrap, now);
        } else {
            if self.scheduler.due(Task::RotateToken, now) {
                self.tokens.rotate(now);
            }

            if self.scheduler.due(Task::Expire, now) {
                let converged = self.transactions.expire(now);
                self.routing_table.expire();
                self.values.expire(now);
                self.tokens.expire(now);
                self.cache.expire(now);

                for lookup in converged {
                    self.announce(&lookup, now);
                }
            }

            if self.scheduler.due(Task::Split, now) {
                self.routing_table.split();
            }

            if self.scheduler.due(Task::FindSelf, now) {
                let id = self.id;
                self.find_nodes(&id, now);
            }

            if self.scheduler.due(Task::FindRandom, now) {
                self.find_nodes(&Id::random(), now);
            }

            if self.scheduler.due(Task::AnnounceHost, now) {
                self.announce_hostnames(now);
            }

            if self.scheduler.due(Task::Ping, now) {
                self.ping_due_nodes(now);
            }

            if self.scheduler.due(Task::RenewCache, now) {
                for target in self.cache.renew(now) {
                    trace!(%target, "Renewing cached response");
                    self.start_lookup(target, QueryKind::GetPeers, None, now);
                }
            }
        }

        if !self.multicast_joined {
            maintenance.join_multicast = self.scheduler.due(Task::Multicast, now);
        }

        maintenance
    }

    /// Ping resolved bootstrap targets.
    pub fn bootstrap(&mut self, targets: &[BootstrapTarget], now: Instant) {
        debug!(count = targets.len(), "Bootstrapping");

        for target in targets.iter().take(MAX_BOOTSTRAP_NODES) {
            let kind = if target.multicast {
                QueryKind::PingMulticast
            } else {
                QueryKind::Ping
            };

            let tid = self.transactions.create(kind, now);
            self.outbox.send_ping(target.address, &tid);
        }
    }

    pub fn set_multicast_joined(&mut self, joined: bool) {
        self.multicast_joined = joined;
    }

    /// Resolve `hostname` for a client at `originator`.
    ///
    /// A cached result is answered right away. Otherwise a lookup starts and
    /// the client is answered once, when the first values arrive.
    pub fn resolve(
        &mut self,
        hostname: &str,
        originator: SocketAddr,
        context: Bytes,
        now: Instant,
    ) -> Id {
        let target = self.target(hostname);

        let cached = self.cache.compact_list(&target);
        if !cached.is_empty() {
            debug!(%target, hostname, "Answering from cache");
            self.outbox.answer(originator, context, cached);

            return target;
        }

        self.start_lookup(
            target,
            QueryKind::GetPeers,
            Some(Originator {
                address: originator,
                context,
            }),
            now,
        );

        target
    }

    /// Start an iterative get_peers lookup, seeded with the closest nodes we know.
    pub fn start_lookup(
        &mut self,
        target: Id,
        kind: QueryKind,
        originator: Option<Originator>,
        now: Instant,
    ) -> TransactionId {
        let seeds = self.routing_table.closest(&target);

        let tid = self.transactions.create(kind, now);
        let mut lookup = Lookup::new(target, originator);

        for node in &seeds {
            if lookup.insert(node.id, node.address).is_err() {
                break;
            }
            self.outbox
                .send_get_peers_request(node.address, &target, &tid);
        }

        debug!(%target, ?kind, seeds = seeds.len(), "Lookup started");

        self.transactions.link_lookup(&tid, lookup);

        tid
    }

    /// Announce ourselves to the closest nodes of a converged lookup that
    /// handed us a token.
    pub fn announce(&mut self, lookup: &Lookup, now: Instant) {
        let holders = lookup.token_holders(MAX_BUCKET_SIZE_K);

        debug!(
            target = %lookup.target(),
            queried = lookup.len(),
            announcing = holders.len(),
            "Announcing"
        );

        for candidate in holders {
            let tid = self.transactions.create(QueryKind::AnnounceEngage, now);
            self.outbox.send_announce_request(
                candidate.address,
                lookup.target(),
                self.announce_port,
                candidate.token(),
                &tid,
            );
        }
    }

    // === Private Methods ===

    /// Returns `true` if the packet claims our own [Id].
    fn is_from_myself(&self, id: &Id, from: &SocketAddrV4) -> bool {
        if id != &self.id {
            return false;
        }

        // Multicast loops our own bootstrap pings back while the table is empty.
        if !self.routing_table.is_empty() {
            warn!(?from, "Received a packet from myself");
        }

        true
    }

    /// Ask up to [FIND_FANOUT] nodes of the bucket covering `target` for it.
    fn find_nodes(&mut self, target: &Id, now: Instant) {
        let bucket = self.routing_table.find_any_match(target);

        for node in bucket.iter_mut().take(FIND_FANOUT) {
            if now < node.next_find {
                continue;
            }

            let tid = self.transactions.create(QueryKind::FindNode, now);
            self.outbox
                .send_find_node_request(node.address, target, &tid);
            node.next_find = now + approximately(FIND_INTERVAL);
        }
    }

    fn ping_due_nodes(&mut self, now: Instant) {
        for bucket in self.routing_table.buckets_mut() {
            let mut pinged = 0;

            for node in bucket.iter_mut() {
                if now < node.next_ping {
                    continue;
                }

                if pinged < PING_FANOUT {
                    let tid = self.transactions.create(QueryKind::Ping, now);
                    self.outbox.send_ping(node.address, &tid);
                    pinged += 1;
                }

                node.pinged(now);
            }
        }
    }

    fn announce_hostnames(&mut self, now: Instant) {
        let mut due = Vec::new();

        for identity in &mut self.identities {
            if now < identity.next_announce {
                continue;
            }

            trace!(hostname = %identity.hostname, "Looking up hostname to announce");
            due.push(identity.target);
            identity.next_announce = now + approximately(ANNOUNCE_HOST_PERIOD);
        }

        for target in due {
            self.start_lookup(target, QueryKind::AnnounceStart, None, now);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{Message, Verb};

    fn config() -> Config {
        Config {
            id: Some(Id::random()),
            hostnames: vec!["kinodht.p2p".to_string()],
            ..Default::default()
        }
    }

    fn address(i: u8) -> SocketAddrV4 {
        SocketAddrV4::new([10, 0, 0, i].into(), 6881)
    }

    fn requests(outgoing: &[Outgoing]) -> Vec<(SocketAddrV4, Verb)> {
        outgoing
            .iter()
            .filter_map(|outgoing| match outgoing {
                Outgoing::Packet { to, bytes } => match Message::from_bytes(bytes) {
                    Ok(Message::Request(request)) => Some((*to, request.verb)),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_table_bootstraps() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&config(), now);

        let maintenance = rpc.tick_at(now);
        assert!(maintenance.bootstrap);
        assert!(maintenance.join_multicast);

        // Nothing else runs while the table is empty.
        assert!(rpc.drain_outbox().is_empty());

        // Backoff.
        let maintenance = rpc.tick_at(now + Duration::from_secs(1));
        assert!(!maintenance.bootstrap);
        assert!(!maintenance.join_multicast);

        let targets = [
            BootstrapTarget {
                address: SocketAddrV4::new([239, 192, 202, 7].into(), 6881),
                multicast: true,
            },
            BootstrapTarget {
                address: address(1),
                multicast: false,
            },
        ];
        rpc.bootstrap(&targets, now);

        let sent = requests(&rpc.drain_outbox());
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, verb)| verb == &Verb::Ping));
        assert_eq!(rpc.transactions_count(), 2);
    }

    #[test]
    fn multicast_retried_until_joined() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&config(), now);

        assert!(rpc.tick_at(now).join_multicast);
        rpc.set_multicast_joined(false);

        let later = now + Duration::from_secs(6 * 60);
        assert!(rpc.tick_at(later).join_multicast);
        rpc.set_multicast_joined(true);

        assert!(!rpc.tick_at(later + Duration::from_secs(6 * 60)).join_multicast);
    }

    #[test]
    fn populated_table_runs_maintenance() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&config(), now);

        for i in 1..=4 {
            rpc.routing_table.put(Id::random(), address(i), now);
        }

        let maintenance = rpc.tick_at(now);
        assert!(!maintenance.bootstrap);

        let sent = requests(&rpc.drain_outbox());

        // Announce lookup for the hostname reaches every known node.
        let get_peers = sent
            .iter()
            .filter(|(_, verb)| verb == &Verb::GetPeers)
            .count();
        assert_eq!(get_peers, 4);

        // New nodes are due for find_node right away.
        assert!(sent.iter().any(|(_, verb)| verb == &Verb::FindNode));
    }

    #[test]
    fn ping_sweep_throttles_per_bucket() {
        let now = Instant::now();
        let mut rpc = Rpc::new(&config(), now);

        for i in 1..=8 {
            rpc.routing_table.put(Id::random(), address(i), now);
        }

        // Far enough that every node is due for a ping.
        let later = now + Duration::from_secs(10 * 60);
        rpc.ping_due_nodes(later);

        let sent = requests(&rpc.drain_outbox());
        assert!(sent.iter().all(|(_, verb)| verb == &Verb::Ping));
        assert!(sent.len() <= PING_FANOUT * rpc.routing_table.buckets().count());
        assert!(rpc
            .routing_table
            .buckets()
            .flat_map(|bucket| bucket.iter())
            .all(|node| node.unanswered_pings == 1));
    }
}
