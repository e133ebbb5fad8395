//! Manage announce tokens for remote IPs.

use crc::{Crc, CRC_32_ISCSI};
use rand::{thread_rng, Rng};
use std::{
    fmt::{self, Debug, Formatter},
    net::SocketAddrV4,
    time::{Duration, Instant},
};

use tracing::trace;

const SECRET_SIZE: usize = 20;
const TOKEN_SIZE: usize = 4;
const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// A previous secret stays valid for this long after it was replaced.
const PREVIOUS_SECRET_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Tokens generator.
///
/// A token is bound to the IP it was handed to, and stays valid across one
/// rotation of the secret.
pub struct Tokens {
    prev_secret: Option<[u8; SECRET_SIZE]>,
    curr_secret: [u8; SECRET_SIZE],
    rotated_at: Instant,
}

impl Debug for Tokens {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Tokens (_)")
    }
}

impl Tokens {
    pub fn new(now: Instant) -> Self {
        Tokens {
            prev_secret: None,
            curr_secret: thread_rng().gen(),
            rotated_at: now,
        }
    }

    // === Public Methods ===

    /// Returns `true` if the token was generated for this address with the
    /// current secret or the previous one.
    pub fn validate(&self, address: &SocketAddrV4, token: &[u8]) -> bool {
        if token == generate(address, &self.curr_secret) {
            return true;
        }

        match &self.prev_secret {
            Some(prev) => token == generate(address, prev),
            None => false,
        }
    }

    /// Rotate the secret, keeping the current one as the previous.
    pub fn rotate(&mut self, now: Instant) {
        trace!("Rotating secrets");

        self.prev_secret = Some(self.curr_secret);
        self.curr_secret = thread_rng().gen();
        self.rotated_at = now;
    }

    /// Forget the previous secret once it outlived its grace period.
    pub fn expire(&mut self, now: Instant) {
        if now.saturating_duration_since(self.rotated_at) > PREVIOUS_SECRET_LIFETIME {
            self.prev_secret = None;
        }
    }

    /// Generates a new token for a remote node.
    pub fn generate_token(&self, address: &SocketAddrV4) -> [u8; TOKEN_SIZE] {
        generate(address, &self.curr_secret)
    }
}

fn generate(address: &SocketAddrV4, secret: &[u8; SECRET_SIZE]) -> [u8; TOKEN_SIZE] {
    let mut digest = CASTAGNOLI.digest();

    digest.update(&address.ip().octets());
    digest.update(secret);

    digest.finalize().to_be_bytes()
}
