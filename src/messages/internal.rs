//! Serde structs pinning the exact bencoded wire layout. Conversions to the
//! ergonomic public types live in [super::public].

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::{Error, Result};

/// The immediate envelope: `{a: "m", m: [sub-msg...], V: proto}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct WireEnvelope {
    #[serde(rename = "a")]
    pub kind: ByteBuf,

    #[serde(rename = "m")]
    pub messages: Vec<WireMessage>,

    #[serde(rename = "V")]
    pub version: u64,
}

impl WireEnvelope {
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<WireEnvelope> {
        Ok(serde_bencode::from_bytes(bytes.as_ref())?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_bencode::to_bytes(self).map_err(Error::Bencode)
    }
}

/// DHT sub-messages, dispatched on the one-byte `A` type tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "A")]
pub(crate) enum WireMessage {
    #[serde(rename = "R")]
    FindRouter {
        #[serde(rename = "I")]
        iterative: u64,
        #[serde(rename = "K")]
        key: ByteBuf,
        #[serde(rename = "T")]
        txid: u64,
        #[serde(rename = "V")]
        version: u64,
    },

    #[serde(rename = "S")]
    GotRouter {
        #[serde(rename = "R")]
        contacts: Vec<WireRouterContact>,
        #[serde(rename = "T")]
        txid: u64,
        #[serde(rename = "V")]
        version: u64,
    },

    #[serde(rename = "F")]
    FindIntro {
        /// Topic tag; exactly one of `tag` and `address` is present.
        #[serde(rename = "N", default, skip_serializing_if = "Option::is_none")]
        tag: Option<ByteBuf>,
        /// Remaining recursion depth.
        #[serde(rename = "R")]
        depth: u64,
        #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
        address: Option<ByteBuf>,
        #[serde(rename = "T")]
        txid: u64,
        #[serde(rename = "V")]
        version: u64,
    },

    #[serde(rename = "G")]
    GotIntro {
        #[serde(rename = "I")]
        introsets: Vec<WireIntroSet>,
        #[serde(rename = "T")]
        txid: u64,
        #[serde(rename = "V")]
        version: u64,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct WireRouterContact {
    #[serde(rename = "a")]
    pub addrs: Vec<String>,
    #[serde(rename = "k")]
    pub public_key: ByteBuf,
    #[serde(rename = "u")]
    pub last_updated: u64,
    #[serde(rename = "z")]
    pub signature: ByteBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct WireIntroSet {
    #[serde(rename = "a")]
    pub service_key: ByteBuf,
    #[serde(rename = "i")]
    pub intros: Vec<WireIntroduction>,
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<ByteBuf>,
    #[serde(rename = "t")]
    pub published_at: u64,
    #[serde(rename = "z")]
    pub signature: ByteBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct WireIntroduction {
    #[serde(rename = "k")]
    pub router: ByteBuf,
    #[serde(rename = "x")]
    pub expires_at: u64,
}
