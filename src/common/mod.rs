//! Common types shared throughout the library.

mod bucket;
mod contact;
mod introset;
mod key;
mod node;

pub use bucket::*;
pub use contact::*;
pub use introset::*;
pub use key::*;
pub use node::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, the timestamp unit used in signed
/// records.
pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
