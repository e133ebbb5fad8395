//! Packet pipeline around the shared [Rpc] state.

use std::borrow::Cow;
use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use tracing::trace;

use crate::common::{is_link_local, is_loopback, validate, Id, Message};
use crate::encryption::{self, Cipher};
use crate::rpc::{BootstrapTarget, Config, Outgoing, Responder, Rpc, MAX_BOOTSTRAP_NODES};
use crate::socket::Transport;

#[derive(Debug)]
/// A DHT node: one coarse lock around the protocol state, with every I/O
/// happening outside of it.
pub struct KrpcNode {
    rpc: Mutex<Rpc>,
    transport: Arc<dyn Transport>,
    responder: Arc<dyn Responder>,
    cipher: Option<Arc<dyn Cipher>>,
    bootstrap: Vec<String>,
}

impl KrpcNode {
    pub fn new(
        config: &Config,
        transport: Arc<dyn Transport>,
        responder: Arc<dyn Responder>,
        now: Instant,
    ) -> Self {
        KrpcNode {
            rpc: Mutex::new(Rpc::new(config, now)),
            transport,
            responder,
            cipher: config.cipher.clone(),
            bootstrap: config.bootstrap.clone(),
        }
    }

    // === Getters ===

    pub fn id(&self) -> Id {
        *self.lock().id()
    }

    /// Run `f` with the protocol state locked.
    pub fn with_rpc<T>(&self, f: impl FnOnce(&Rpc) -> T) -> T {
        f(&self.lock())
    }

    // === Public Methods ===

    pub fn handle_packet(&self, bytes: &[u8], from: SocketAddr) {
        self.handle_packet_at(bytes, from, Instant::now())
    }

    /// Validate, decrypt and decode a packet, then let the [Rpc] handle it.
    ///
    /// Every stage but the last runs without the lock.
    pub fn handle_packet_at(&self, bytes: &[u8], from: SocketAddr, now: Instant) {
        if bytes.is_empty() {
            trace!(?from, "Zero size packet");
            return;
        }

        if is_link_local(&from) {
            trace!(?from, "Dropped link-local packet");
            return;
        }

        let from_v4 = match from {
            SocketAddr::V4(from) => from,
            SocketAddr::V6(_) => {
                trace!(?from, "Dropped IPv6 packet");
                return;
            }
        };

        if !validate(bytes) {
            trace!(?from, "Received broken bencode");
            return;
        }

        let plaintext = match &self.cipher {
            Some(cipher) if !is_loopback(&from) => match encryption::open(cipher.as_ref(), bytes) {
                Ok(plaintext) => Cow::Owned(plaintext),
                Err(error) => {
                    trace!(?from, ?error, "Dropped encrypted packet");
                    return;
                }
            },
            _ => Cow::Borrowed(bytes),
        };

        let message = match Message::from_bytes(&plaintext) {
            Ok(message) => message,
            Err(error) => {
                trace!(?from, ?error, "Dropped packet");
                return;
            }
        };

        let outgoing = {
            let mut rpc = self.lock();
            rpc.handle_message_at(message, from_v4, now);
            rpc.drain_outbox()
        };

        self.flush(outgoing);
    }

    pub fn tick(&self) {
        self.tick_at(Instant::now())
    }

    /// Run the due maintenance tasks. Bootstrap resolution and multicast
    /// registration happen between two critical sections.
    pub fn tick_at(&self, now: Instant) {
        let (maintenance, outgoing) = {
            let mut rpc = self.lock();
            let maintenance = rpc.tick_at(now);
            (maintenance, rpc.drain_outbox())
        };

        self.flush(outgoing);

        if maintenance.bootstrap {
            let targets = self.resolve_bootstrap();

            let outgoing = {
                let mut rpc = self.lock();
                rpc.bootstrap(&targets, now);
                rpc.drain_outbox()
            };

            self.flush(outgoing);
        }

        if maintenance.join_multicast {
            let joined = self.transport.join_multicast();
            self.lock().set_multicast_joined(joined);
        }
    }

    pub fn resolve(&self, hostname: &str, originator: SocketAddr, context: Bytes) -> Id {
        self.resolve_at(hostname, originator, context, Instant::now())
    }

    /// Resolve `hostname` on behalf of a client. The [Responder] is called
    /// at most once with the result.
    pub fn resolve_at(
        &self,
        hostname: &str,
        originator: SocketAddr,
        context: Bytes,
        now: Instant,
    ) -> Id {
        let (target, outgoing) = {
            let mut rpc = self.lock();
            let target = rpc.resolve(hostname, originator, context, now);
            (target, rpc.drain_outbox())
        };

        self.flush(outgoing);

        target
    }

    // === Private Methods ===

    fn lock(&self) -> MutexGuard<'_, Rpc> {
        // A panicking handler leaves the state consistent enough to go on.
        self.rpc
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resolve_bootstrap(&self) -> Vec<BootstrapTarget> {
        let mut targets = Vec::new();

        for entry in &self.bootstrap {
            let addresses = match entry.to_socket_addrs() {
                Ok(addresses) => addresses,
                Err(error) => {
                    trace!(%entry, ?error, "Failed to resolve bootstrap node");
                    continue;
                }
            };

            for address in addresses {
                if let SocketAddr::V4(address) = address {
                    targets.push(BootstrapTarget {
                        address,
                        multicast: address.ip().is_multicast(),
                    });
                }
            }
        }

        targets.truncate(MAX_BOOTSTRAP_NODES);
        targets
    }

    fn flush(&self, outgoing: Vec<Outgoing>) {
        for outgoing in outgoing {
            match outgoing {
                Outgoing::Packet { to, bytes } => self.send(to, &bytes),
                Outgoing::Answer {
                    to,
                    context,
                    values,
                } => self.responder.success(to, &context, &values),
            }
        }
    }

    fn send(&self, to: SocketAddrV4, bytes: &[u8]) {
        let to = SocketAddr::V4(to);

        let sealed;
        let bytes = match &self.cipher {
            Some(cipher) if !is_loopback(&to) => match encryption::seal(cipher.as_ref(), bytes) {
                Some(envelope) => {
                    sealed = envelope;
                    sealed.as_slice()
                }
                None => {
                    trace!(?to, "Failed to encrypt packet");
                    return;
                }
            },
            _ => bytes,
        };

        if let Err(error) = self.transport.send_to(bytes, to) {
            trace!(?to, ?error, "Failed to send packet");
        }
    }
}
