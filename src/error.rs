//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// veilnet-dht crate error enum.
pub enum Error {
    /// Catch-all for malformed input that has no richer variant.
    #[error("{0}")]
    Static(&'static str),

    #[error("Failed to parse dht message bytes: {0}")]
    Bencode(#[from] serde_bencode::Error),

    /// A key on the wire was not exactly [KEY_SIZE](crate::KEY_SIZE) bytes.
    #[error("Invalid key size: {0}")]
    InvalidKeySize(usize),

    /// A signature on the wire was not exactly 64 bytes.
    #[error("Invalid signature size: {0}")]
    InvalidSignatureSize(usize),

    /// A topic tag was longer than [TAG_SIZE](crate::TAG_SIZE) bytes.
    #[error("Invalid topic tag size: {0}")]
    InvalidTagSize(usize),

    /// The outer envelope was structurally wrong (bad message type, etc).
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(&'static str),

    /// A peer spoke a protocol version other than
    /// [PROTO_VERSION](crate::PROTO_VERSION).
    #[error("Protocol version mismatch: {0}")]
    VersionMismatch(u64),
}
