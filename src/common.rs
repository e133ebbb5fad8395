//! Miscellaneous common structs used throughout the library.

mod id;
pub mod messages;
mod node;
mod routing_table;

use std::time::Duration;

use rand::Rng;

pub use id::*;
pub use messages::*;
pub use node::*;
pub use routing_table::*;

/// `base` with ±10% jitter, so that timers across a swarm drift apart.
pub fn approximately(base: Duration) -> Duration {
    let spread = base / 10;
    if spread.is_zero() {
        return base;
    }

    let offset = rand::thread_rng().gen_range(Duration::ZERO..=spread * 2);

    base - spread + offset
}
