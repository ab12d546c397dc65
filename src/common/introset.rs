//! Hidden-service introduction sets and their addressing.

use std::fmt::{self, Debug, Display, Formatter};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;
use serde_bytes::Bytes;

use crate::common::{Key, KEY_SIZE};
use crate::{Error, Result};

/// The size of topic tags in bytes.
pub const TAG_SIZE: usize = 16;

/// A hidden service's address: the blake3 hash of its identity key. This is
/// what gets looked up, and what introset lookups route toward.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceAddress(pub [u8; KEY_SIZE]);

impl ServiceAddress {
    /// Derive the address advertised for a service identity key.
    pub fn from_service_key(public_key: &[u8; KEY_SIZE]) -> Self {
        ServiceAddress(*blake3::hash(public_key).as_bytes())
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Self> {
        Ok(ServiceAddress(Key::from_bytes(bytes)?.0))
    }

    /// The key this address lives at in the DHT keyspace.
    pub fn to_key(&self) -> Key {
        Key(self.0)
    }
}

impl Display for ServiceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&Key(self.0), f)
    }
}

impl Debug for ServiceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceAddress({self})")
    }
}

/// A topic name services can advertise under, NUL-padded to [TAG_SIZE].
/// The zero tag means "no topic".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Tag(pub [u8; TAG_SIZE]);

impl Tag {
    pub fn new(name: &str) -> Result<Tag> {
        Tag::from_bytes(name.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Tag> {
        if bytes.len() > TAG_SIZE {
            return Err(Error::InvalidTagSize(bytes.len()));
        }

        let mut tag = [0; TAG_SIZE];
        tag[..bytes.len()].copy_from_slice(bytes);
        Ok(Tag(tag))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// The tag bytes without the NUL padding, as written to the wire.
    pub fn as_trimmed(&self) -> &[u8] {
        let end = self
            .0
            .iter()
            .rposition(|b| *b != 0)
            .map(|pos| pos + 1)
            .unwrap_or(0);
        &self.0[..end]
    }

    /// The key a tag lookup routes toward.
    pub fn routing_key(&self) -> Key {
        Key(*blake3::hash(&self.0).as_bytes())
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_trimmed()))
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

/// One introduction point: a router relaying traffic for the service, valid
/// until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Introduction {
    /// Identity key of the introducing router.
    pub router: Key,
    /// Expiry, milliseconds since the unix epoch.
    pub expires_at: u64,
}

/// A hidden service's signed advertisement: where it can be introduced,
/// under which topic, and when it said so.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntroSet {
    /// ed25519 identity key of the service.
    pub(crate) service_key: [u8; KEY_SIZE],
    /// Optional topic; zero when the service advertises no topic.
    pub(crate) topic: Tag,
    pub(crate) intros: Vec<Introduction>,
    /// Publication time, milliseconds since the unix epoch.
    pub(crate) published_at: u64,
    pub(crate) signature: [u8; 64],
}

impl IntroSet {
    /// Create and sign an advertisement for the service owning `signer`.
    pub fn new(
        signer: &SigningKey,
        topic: Tag,
        intros: Vec<Introduction>,
        published_at: u64,
    ) -> Result<Self> {
        let mut introset = Self {
            service_key: signer.verifying_key().to_bytes(),
            topic,
            intros,
            published_at,
            signature: [0; 64],
        };

        introset.signature = signer.sign(&introset.signable_bytes()?).to_bytes();

        Ok(introset)
    }

    /// Assemble an introset from already-signed parts (wire decoding).
    pub fn new_signed_unchecked(
        service_key: [u8; KEY_SIZE],
        topic: Tag,
        intros: Vec<Introduction>,
        published_at: u64,
        signature: [u8; 64],
    ) -> Self {
        Self {
            service_key,
            topic,
            intros,
            published_at,
            signature,
        }
    }

    // === Getters ===

    pub fn address(&self) -> ServiceAddress {
        ServiceAddress::from_service_key(&self.service_key)
    }

    pub fn service_key(&self) -> &[u8; KEY_SIZE] {
        &self.service_key
    }

    pub fn topic(&self) -> &Tag {
        &self.topic
    }

    pub fn intros(&self) -> &[Introduction] {
        &self.intros
    }

    pub fn published_at(&self) -> u64 {
        self.published_at
    }

    // === Public Methods ===

    /// An introset is good iff its signature checks out and it still carries
    /// at least one unexpired introduction.
    pub fn verify(&self, now: u64) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.service_key) else {
            return false;
        };
        let Ok(signable) = self.signable_bytes() else {
            return false;
        };
        if key
            .verify(&signable, &Signature::from_bytes(&self.signature))
            .is_err()
        {
            return false;
        }

        self.intros.iter().any(|intro| intro.expires_at > now)
    }

    /// Whether `other` is a more recent advertisement of the same service.
    pub fn other_is_newer(&self, other: &IntroSet) -> bool {
        self.published_at < other.published_at
    }

    fn signable_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct SignableIntro<'a> {
            #[serde(rename = "k", with = "serde_bytes")]
            router: &'a [u8],
            #[serde(rename = "x")]
            expires_at: u64,
        }

        #[derive(Serialize)]
        struct Signable<'a> {
            #[serde(rename = "a", with = "serde_bytes")]
            service_key: &'a [u8],
            #[serde(rename = "i")]
            intros: Vec<SignableIntro<'a>>,
            #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
            topic: Option<&'a Bytes>,
            #[serde(rename = "t")]
            published_at: u64,
            #[serde(rename = "z", with = "serde_bytes")]
            signature: &'a [u8],
        }

        Ok(serde_bencode::to_bytes(&Signable {
            service_key: &self.service_key,
            intros: self
                .intros
                .iter()
                .map(|intro| SignableIntro {
                    router: intro.router.as_bytes(),
                    expires_at: intro.expires_at,
                })
                .collect(),
            topic: (!self.topic.is_zero()).then(|| Bytes::new(self.topic.as_trimmed())),
            published_at: self.published_at,
            signature: &[],
        })?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::OsRng;

    const NOW: u64 = 1_700_000_000_000;

    fn signed_introset(topic: Tag) -> IntroSet {
        let signer = SigningKey::generate(&mut OsRng);
        IntroSet::new(
            &signer,
            topic,
            vec![Introduction {
                router: Key::random(),
                expires_at: NOW + 60_000,
            }],
            NOW,
        )
        .unwrap()
    }

    #[test]
    fn sign_and_verify() {
        let introset = signed_introset(Tag::default());
        assert!(introset.verify(NOW));
    }

    #[test]
    fn tampered_introset_fails() {
        let mut introset = signed_introset(Tag::default());
        introset.published_at += 1;
        assert!(!introset.verify(NOW));
    }

    #[test]
    fn all_intros_expired_fails() {
        let introset = signed_introset(Tag::default());
        assert!(!introset.verify(NOW + 120_000));
    }

    #[test]
    fn topic_is_covered_by_signature() {
        let mut introset = signed_introset(Tag::new("chat").unwrap());
        assert!(introset.verify(NOW));

        introset.topic = Tag::new("mail").unwrap();
        assert!(!introset.verify(NOW));
    }

    #[test]
    fn newer_wins() {
        let signer = SigningKey::generate(&mut OsRng);
        let intros = vec![Introduction {
            router: Key::random(),
            expires_at: NOW + 60_000,
        }];

        let old = IntroSet::new(&signer, Tag::default(), intros.clone(), NOW).unwrap();
        let new = IntroSet::new(&signer, Tag::default(), intros, NOW + 1).unwrap();

        assert!(old.other_is_newer(&new));
        assert!(!new.other_is_newer(&old));
        assert_eq!(old.address(), new.address());
    }

    #[test]
    fn address_is_hash_of_service_key() {
        let introset = signed_introset(Tag::default());
        assert_eq!(
            introset.address(),
            ServiceAddress::from_service_key(introset.service_key())
        );
        assert_ne!(introset.address().0, *introset.service_key());
    }

    #[test]
    fn tag_padding_round_trip() {
        let tag = Tag::new("veil-chat").unwrap();
        assert_eq!(Tag::from_bytes(tag.as_trimmed()).unwrap(), tag);
        assert_eq!(tag.to_string(), "veil-chat");

        assert!(Tag::new("seventeen-bytes!!").is_err());
        assert!(Tag::default().is_zero());
        assert_eq!(Tag::default().as_trimmed(), &[] as &[u8]);
    }

    #[test]
    fn distinct_tags_route_to_distinct_keys() {
        let a = Tag::new("a").unwrap().routing_key();
        let b = Tag::new("b").unwrap().routing_key();
        assert_ne!(a, b);
        assert_eq!(a, Tag::new("a").unwrap().routing_key());
    }
}
