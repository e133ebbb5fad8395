use std::{
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    thread,
    time::Duration,
};

use kinodht::{Bytes, Dht};

use clap::Parser;

use tracing::{info, Level};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// UDP port to listen on
    #[arg(short, long, default_value_t = 6881)]
    port: u16,
    /// Bootstrap nodes as host:port, instead of the multicast group
    #[arg(short, long)]
    bootstrap: Vec<String>,
    /// Hostnames to announce
    #[arg(long)]
    hostname: Vec<String>,
    /// Port announced along with the hostnames
    #[arg(long, default_value_t = 8080)]
    announce_port: u16,
    /// Realm separating private swarms
    #[arg(short, long)]
    realm: Option<String>,
    /// Hostname to resolve once the node is up
    #[arg(long)]
    resolve: Option<String>,
    /// Passphrase encrypting every packet
    #[cfg(feature = "encryption")]
    #[arg(long)]
    passphrase: Option<String>,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let mut builder = Dht::builder()
        .port(cli.port)
        .announce_port(cli.announce_port);

    if !cli.bootstrap.is_empty() {
        builder = builder.bootstrap(&cli.bootstrap);
    }
    for hostname in &cli.hostname {
        builder = builder.hostname(hostname);
    }
    if let Some(realm) = &cli.realm {
        builder = builder.realm(realm);
    }
    #[cfg(feature = "encryption")]
    if let Some(passphrase) = &cli.passphrase {
        builder = builder.cipher(Arc::new(kinodht::encryption::AesGcmCipher::new(passphrase)));
    }

    let mut dht = builder.build().expect("Failed to start node");

    info!(id = %dht.id(), local_addr = ?dht.local_addr(), "Node is running! Press Ctrl+C to stop.");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::SeqCst))
        .expect("Error setting Ctrl-C handler");

    let mut resolve = cli.resolve;

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_secs(1));

        if dht.routing_table_size() > 0 {
            if let Some(hostname) = resolve.take() {
                let client: SocketAddr = ([127, 0, 0, 1], 0).into();
                dht.resolve(&hostname, client, Bytes::from(hostname.clone()));
            }
        }

        if let Some(answers) = dht.answers() {
            for answer in answers.try_iter() {
                info!(
                    hostname = %String::from_utf8_lossy(&answer.context),
                    peers = ?answer.peers(),
                    "Resolved"
                );
            }
        }
    }

    info!(nodes = dht.routing_table_size(), "Shutting down");
    dht.shutdown();
}
