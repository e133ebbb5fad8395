//! Dht node.

use std::{
    io::ErrorKind,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info};

use crate::{
    common::Id,
    encryption::Cipher,
    node::KrpcNode,
    rpc::{Answer, ChannelResponder, Config, Responder},
    socket::{Transport, UdpTransport, MTU},
    Error, Result,
};

/// How long a receiving thread blocks before checking for a shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
/// Create a [Dht] node.
pub struct DhtBuilder {
    config: Config,
    responder: Option<Arc<dyn Responder>>,
}

impl DhtBuilder {
    /// Set this node's Id instead of a random one.
    pub fn id(mut self, id: Id) -> Self {
        self.config.id = Some(id);

        self
    }

    /// Set the UDP port to listen on, `0` for a random one.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;

        self
    }

    /// Set bootstrapping nodes, replacing the multicast group.
    pub fn bootstrap(mut self, bootstrap: &[String]) -> Self {
        self.config.bootstrap = bootstrap.to_vec();

        self
    }

    /// Add a hostname to announce on [Config::announce_port].
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.config.hostnames.push(hostname.to_string());

        self
    }

    pub fn announce_port(mut self, port: u16) -> Self {
        self.config.announce_port = port;

        self
    }

    pub fn realm(mut self, realm: &str) -> Self {
        self.config.realm = Some(realm.to_string());

        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;

        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;

        self
    }

    /// Encrypt every packet exchanged with non-loopback addresses.
    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.config.cipher = Some(cipher);

        self
    }

    /// Deliver answers to `responder` instead of [Dht::answers].
    pub fn responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);

        self
    }

    /// Create a Dht node.
    pub fn build(self) -> Result<Dht> {
        match self.responder {
            Some(responder) => Dht::start(self.config, responder, None),
            None => Dht::new(self.config),
        }
    }
}

#[derive(Debug)]
/// A running node: receiving threads and a maintenance thread sharing one
/// [KrpcNode].
pub struct Dht {
    node: Arc<KrpcNode>,
    local_addr: SocketAddr,
    answers: Option<Receiver<Answer>>,

    running: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl Dht {
    /// Create a new Dht node, delivering answers through [Dht::answers].
    pub fn new(config: Config) -> Result<Self> {
        let (responder, answers) = ChannelResponder::new();

        Dht::start(config, Arc::new(responder), Some(answers))
    }

    /// Returns a builder to edit config before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    fn start(
        config: Config,
        responder: Arc<dyn Responder>,
        answers: Option<Receiver<Answer>>,
    ) -> Result<Self> {
        let transport: Arc<dyn Transport> =
            Arc::new(UdpTransport::bind(config.port, READ_TIMEOUT)?);
        let local_addr = transport.local_addr()?;

        let node = Arc::new(KrpcNode::new(
            &config,
            transport.clone(),
            responder,
            std::time::Instant::now(),
        ));

        info!(id = %node.id(), ?local_addr, "Starting node");

        let running = Arc::new(AtomicBool::new(true));
        let (shutdown, shutdown_receiver) = flume::bounded::<()>(1);

        let mut dht = Dht {
            node: node.clone(),
            local_addr,
            answers,
            running: running.clone(),
            shutdown: Some(shutdown),
            handles: Vec::new(),
        };

        for i in 0..config.workers.max(1) {
            let node = node.clone();
            let transport = transport.clone();
            let running = running.clone();

            let handle = thread::Builder::new()
                .name(format!("kinodht-worker-{i}"))
                .spawn(move || receive(&node, transport.as_ref(), &running))
                .map_err(|error| Error::Spawn(error.to_string()))?;

            dht.handles.push(handle);
        }

        let tick_interval = config.tick_interval;
        let handle = thread::Builder::new()
            .name("kinodht-cron".to_string())
            .spawn(move || cron(&node, &shutdown_receiver, tick_interval))
            .map_err(|error| Error::Spawn(error.to_string()))?;
        dht.handles.push(handle);

        Ok(dht)
    }

    // === Getters ===

    pub fn id(&self) -> Id {
        self.node.id()
    }

    /// Returns the address the node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Answers to [Dht::resolve], unless a [DhtBuilder::responder] was set.
    pub fn answers(&self) -> Option<&Receiver<Answer>> {
        self.answers.as_ref()
    }

    /// Number of nodes in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.node.with_rpc(|rpc| rpc.routing_table().size())
    }

    // === Public Methods ===

    /// Resolve `hostname` for the client at `originator`.
    ///
    /// The answer is delivered at most once, carrying `context` back.
    pub fn resolve(&self, hostname: &str, originator: SocketAddr, context: Bytes) -> Id {
        self.node.resolve(hostname, originator, context)
    }

    /// Stop every thread and wait for them to exit.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        // Disconnects the cron thread.
        self.shutdown.take();

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }

        debug!(local_addr = ?self.local_addr, "Node shut down");
    }
}

impl Drop for Dht {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn receive(node: &KrpcNode, transport: &dyn Transport, running: &AtomicBool) {
    let mut buf = [0; MTU];

    while running.load(Ordering::Relaxed) {
        match transport.recv_from(&mut buf) {
            Ok((size, from)) => node.handle_packet(&buf[..size], from),
            Err(error) if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(error) => debug!(?error, "Failed to receive packet"),
        }
    }
}

fn cron(node: &KrpcNode, shutdown: &Receiver<()>, tick_interval: Duration) {
    loop {
        node.tick();

        match shutdown.recv_timeout(tick_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => break,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use super::*;

    fn node() -> Dht {
        Dht::builder()
            .port(0)
            .bootstrap(&[])
            .workers(1)
            .tick_interval(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    #[test]
    fn shutdown() {
        let mut dht = node();

        let start = Instant::now();
        dht.shutdown();

        assert!(start.elapsed() < READ_TIMEOUT * 4);
        assert!(dht.handles.is_empty());
    }

    #[test]
    fn two_nodes_find_each_other() {
        let a = node();
        let b = Dht::builder()
            .port(0)
            .bootstrap(&[format!("127.0.0.1:{}", a.local_addr().port())])
            .workers(1)
            .tick_interval(Duration::from_millis(10))
            .build()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while b.routing_table_size() == 0 || a.routing_table_size() == 0 {
            assert!(Instant::now() < deadline, "nodes never met");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn unknown_hostname_is_never_answered() {
        let a = node();
        let b = Dht::builder()
            .port(0)
            .bootstrap(&[format!("127.0.0.1:{}", a.local_addr().port())])
            .workers(1)
            .tick_interval(Duration::from_millis(10))
            .build()
            .unwrap();

        let client: SocketAddr = "127.0.0.1:5353".parse().unwrap();
        let target = b.resolve("kinodht.p2p", client, Bytes::from_static(b"query"));
        assert_eq!(target, Id::from_hostname("kinodht.p2p", None));

        thread::sleep(Duration::from_millis(200));
        assert!(b.answers().unwrap().try_recv().is_err());
    }
}
