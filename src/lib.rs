#![doc = include_str!("../README.md")]

// Public modules
mod common;
mod error;

pub mod context;
pub mod dht;
pub mod link;
pub mod messages;

pub use crate::common::{
    now_unix_ms, Bucket, Introduction, IntroSet, Key, Node, RouterContact, ServiceAddress, Tag,
    KEY_SIZE, TAG_SIZE,
};
pub use crate::context::{Config, Context, IntroSetLookupHook, RouterLookupHook, TxOwner};
pub use crate::dht::{Dht, LookupResponse};
pub use crate::error::Error;
pub use crate::link::Link;
pub use crate::messages::{Envelope, Message, PROTO_VERSION};

// Alias Result to be the crate Result.
pub type Result<T, E = error::Error> = std::result::Result<T, E>;
