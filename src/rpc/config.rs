use std::{fmt::Debug, sync::Arc, time::Duration};

use crate::{common::Id, encryption::Cipher};

/// Default UDP port of the node.
pub const DEFAULT_PORT: u16 = 6881;
/// Multicast group used to find nodes on the local network.
pub const MULTICAST_GROUP: &str = "239.192.202.7";
/// Port announced for local hostnames unless configured.
pub const DEFAULT_ANNOUNCE_PORT: u16 = 8080;
/// Number of threads receiving packets.
pub const DEFAULT_WORKERS: usize = 2;
/// Cadence of the maintenance tick.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
/// Dht Configurations
pub struct Config {
    /// Node Id of this node.
    ///
    /// Defaults to None, where a random Id is generated.
    pub id: Option<Id>,
    /// Port to listen on.
    ///
    /// Defaults to [DEFAULT_PORT]
    pub port: u16,
    /// Bootstrap targets as `host:port` strings.
    ///
    /// Targets in the [MULTICAST_GROUP] are pinged as a multicast group, and
    /// any number of nodes may answer them.
    ///
    /// Defaults to the [MULTICAST_GROUP] on [DEFAULT_PORT]
    pub bootstrap: Vec<String>,
    /// Port announced along with [Config::hostnames].
    ///
    /// Defaults to [DEFAULT_ANNOUNCE_PORT]
    pub announce_port: u16,
    /// Hostnames this node announces, each resolving to this node on
    /// [Config::announce_port].
    ///
    /// Defaults to none.
    pub hostnames: Vec<String>,
    /// Realm mixed into every hostname target, separating private swarms
    /// sharing the same network.
    ///
    /// Defaults to None
    pub realm: Option<String>,
    /// Number of threads receiving and handling packets.
    ///
    /// Defaults to [DEFAULT_WORKERS]
    pub workers: usize,
    /// Interval between two maintenance ticks.
    ///
    /// Defaults to [DEFAULT_TICK_INTERVAL]
    pub tick_interval: Duration,
    /// Encrypts every packet exchanged with non-loopback addresses.
    ///
    /// Defaults to None
    pub cipher: Option<Arc<dyn Cipher>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            port: DEFAULT_PORT,
            bootstrap: vec![format!("{MULTICAST_GROUP}:{DEFAULT_PORT}")],
            announce_port: DEFAULT_ANNOUNCE_PORT,
            hostnames: Vec::new(),
            realm: None,
            workers: DEFAULT_WORKERS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            cipher: None,
        }
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("bootstrap", &self.bootstrap)
            .field("announce_port", &self.announce_port)
            .field("hostnames", &self.hostnames)
            .field("realm", &self.realm)
            .field("workers", &self.workers)
            .field("tick_interval", &self.tick_interval)
            .field("encrypted", &self.cipher.is_some())
            .finish()
    }
}
