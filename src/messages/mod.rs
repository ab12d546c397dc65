//! The bencoded wire messages: an immediate envelope carrying a list of
//! tagged DHT sub-messages.

pub(crate) mod internal;
mod public;

pub use public::*;
