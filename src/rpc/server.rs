//! State kept for answering other nodes and for answering clients.

mod cache;
mod tokens;
mod values;

pub use cache::*;
pub use tokens::*;
pub use values::*;
