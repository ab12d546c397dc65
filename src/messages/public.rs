use serde_bytes::ByteBuf;

use super::internal;
use crate::common::{Introduction, IntroSet, Key, RouterContact, ServiceAddress, Tag, KEY_SIZE};
use crate::{Error, Result};

/// Protocol version spoken on the wire. Peers announcing any other version
/// are rejected at envelope decode.
pub const PROTO_VERSION: u64 = 0;

/// Ask a peer for a router's contact record.
#[derive(Debug, Clone, PartialEq)]
pub struct FindRouter {
    pub target: Key,
    pub txid: u64,
    /// When set, the queried peer must answer from its own knowledge and
    /// never forward on our behalf.
    pub iterative: bool,
}

/// Answer to [FindRouter]; an empty contact list means "not found here".
#[derive(Debug, Clone, PartialEq)]
pub struct GotRouter {
    pub contacts: Vec<RouterContact>,
    pub txid: u64,
}

/// What an introset lookup is after: a concrete service, or a topic.
#[derive(Debug, Clone, PartialEq)]
pub enum IntroTarget {
    Address(ServiceAddress),
    Topic(Tag),
}

/// Ask a peer for introsets.
#[derive(Debug, Clone, PartialEq)]
pub struct FindIntro {
    pub target: IntroTarget,
    pub txid: u64,
    /// Remaining recursion depth; at 0 the queried peer answers from local
    /// knowledge only.
    pub depth: u64,
}

/// Answer to [FindIntro].
#[derive(Debug, Clone, PartialEq)]
pub struct GotIntro {
    pub introsets: Vec<IntroSet>,
    pub txid: u64,
}

/// One DHT sub-message, as carried in an [Envelope].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    FindRouter(FindRouter),
    GotRouter(GotRouter),
    FindIntro(FindIntro),
    GotIntro(GotIntro),
}

/// The immediate envelope the link layer delivers: an ordered list of
/// sub-messages. Exactly one envelope per delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub messages: Vec<Message>,
}

impl Envelope {
    pub fn new(messages: Vec<Message>) -> Self {
        Envelope { messages }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_wire().to_bytes()
    }

    /// Decode and validate an envelope. Any malformed sub-message, unknown
    /// type tag, or version mismatch fails the whole envelope.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Envelope> {
        Envelope::from_wire(internal::WireEnvelope::from_bytes(bytes)?)
    }

    fn to_wire(&self) -> internal::WireEnvelope {
        internal::WireEnvelope {
            kind: ByteBuf::from(*b"m"),
            messages: self.messages.iter().map(Message::to_wire).collect(),
            version: PROTO_VERSION,
        }
    }

    fn from_wire(wire: internal::WireEnvelope) -> Result<Envelope> {
        if wire.kind.as_ref() != b"m" {
            return Err(Error::InvalidEnvelope("unknown envelope message type"));
        }
        if wire.version != PROTO_VERSION {
            return Err(Error::VersionMismatch(wire.version));
        }

        Ok(Envelope {
            messages: wire
                .messages
                .into_iter()
                .map(Message::from_wire)
                .collect::<Result<_>>()?,
        })
    }
}

impl Message {
    fn to_wire(&self) -> internal::WireMessage {
        match self {
            Message::FindRouter(msg) => internal::WireMessage::FindRouter {
                iterative: msg.iterative as u64,
                key: ByteBuf::from(msg.target.to_vec()),
                txid: msg.txid,
                version: PROTO_VERSION,
            },
            Message::GotRouter(msg) => internal::WireMessage::GotRouter {
                contacts: msg.contacts.iter().map(contact_to_wire).collect(),
                txid: msg.txid,
                version: PROTO_VERSION,
            },
            Message::FindIntro(msg) => {
                let (tag, address) = match &msg.target {
                    IntroTarget::Topic(tag) => {
                        (Some(ByteBuf::from(tag.as_trimmed().to_vec())), None)
                    }
                    IntroTarget::Address(addr) => {
                        (None, Some(ByteBuf::from(addr.0.to_vec())))
                    }
                };
                internal::WireMessage::FindIntro {
                    tag,
                    depth: msg.depth,
                    address,
                    txid: msg.txid,
                    version: PROTO_VERSION,
                }
            }
            Message::GotIntro(msg) => internal::WireMessage::GotIntro {
                introsets: msg.introsets.iter().map(introset_to_wire).collect(),
                txid: msg.txid,
                version: PROTO_VERSION,
            },
        }
    }

    fn from_wire(wire: internal::WireMessage) -> Result<Message> {
        Ok(match wire {
            internal::WireMessage::FindRouter {
                iterative,
                key,
                txid,
                version,
            } => {
                check_version(version)?;
                Message::FindRouter(FindRouter {
                    target: Key::from_bytes(&key)?,
                    txid,
                    iterative: iterative != 0,
                })
            }
            internal::WireMessage::GotRouter {
                contacts,
                txid,
                version,
            } => {
                check_version(version)?;
                Message::GotRouter(GotRouter {
                    contacts: contacts
                        .into_iter()
                        .map(contact_from_wire)
                        .collect::<Result<_>>()?,
                    txid,
                })
            }
            internal::WireMessage::FindIntro {
                tag,
                depth,
                address,
                txid,
                version,
            } => {
                check_version(version)?;
                let target = match (tag, address) {
                    (Some(tag), None) => IntroTarget::Topic(Tag::from_bytes(&tag)?),
                    (None, Some(addr)) => IntroTarget::Address(ServiceAddress::from_bytes(&addr)?),
                    _ => {
                        return Err(Error::Static(
                            "find intro carries exactly one of tag and address",
                        ))
                    }
                };
                Message::FindIntro(FindIntro {
                    target,
                    txid,
                    depth,
                })
            }
            internal::WireMessage::GotIntro {
                introsets,
                txid,
                version,
            } => {
                check_version(version)?;
                Message::GotIntro(GotIntro {
                    introsets: introsets
                        .into_iter()
                        .map(introset_from_wire)
                        .collect::<Result<_>>()?,
                    txid,
                })
            }
        })
    }
}

fn check_version(version: u64) -> Result<()> {
    if version != PROTO_VERSION {
        return Err(Error::VersionMismatch(version));
    }
    Ok(())
}

fn key_array(buf: &[u8]) -> Result<[u8; KEY_SIZE]> {
    buf.try_into().map_err(|_| Error::InvalidKeySize(buf.len()))
}

fn signature_array(buf: &[u8]) -> Result<[u8; 64]> {
    buf.try_into()
        .map_err(|_| Error::InvalidSignatureSize(buf.len()))
}

fn contact_to_wire(rc: &RouterContact) -> internal::WireRouterContact {
    internal::WireRouterContact {
        addrs: rc.addrs().to_vec(),
        public_key: ByteBuf::from(rc.key().to_vec()),
        last_updated: rc.last_updated(),
        signature: ByteBuf::from(rc.signature.to_vec()),
    }
}

fn contact_from_wire(wire: internal::WireRouterContact) -> Result<RouterContact> {
    Ok(RouterContact::new_signed_unchecked(
        key_array(&wire.public_key)?,
        wire.addrs,
        wire.last_updated,
        signature_array(&wire.signature)?,
    ))
}

fn introset_to_wire(introset: &IntroSet) -> internal::WireIntroSet {
    internal::WireIntroSet {
        service_key: ByteBuf::from(introset.service_key().to_vec()),
        intros: introset
            .intros()
            .iter()
            .map(|intro| internal::WireIntroduction {
                router: ByteBuf::from(intro.router.to_vec()),
                expires_at: intro.expires_at,
            })
            .collect(),
        topic: (!introset.topic().is_zero())
            .then(|| ByteBuf::from(introset.topic().as_trimmed().to_vec())),
        published_at: introset.published_at(),
        signature: ByteBuf::from(introset.signature.to_vec()),
    }
}

fn introset_from_wire(wire: internal::WireIntroSet) -> Result<IntroSet> {
    Ok(IntroSet::new_signed_unchecked(
        key_array(&wire.service_key)?,
        match wire.topic {
            Some(topic) => Tag::from_bytes(&topic)?,
            None => Tag::default(),
        },
        wire.intros
            .into_iter()
            .map(|intro| {
                Ok(Introduction {
                    router: Key::from_bytes(&intro.router)?,
                    expires_at: intro.expires_at,
                })
            })
            .collect::<Result<_>>()?,
        wire.published_at,
        signature_array(&wire.signature)?,
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn signed_rc() -> RouterContact {
        let signer = SigningKey::generate(&mut OsRng);
        RouterContact::new(&signer, vec!["192.0.2.9:1090".to_string()], 17).unwrap()
    }

    fn signed_introset(topic: Tag) -> IntroSet {
        let signer = SigningKey::generate(&mut OsRng);
        IntroSet::new(
            &signer,
            topic,
            vec![Introduction {
                router: Key::random(),
                expires_at: 99,
            }],
            42,
        )
        .unwrap()
    }

    fn round_trip(envelope: &Envelope) -> Envelope {
        Envelope::from_bytes(envelope.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn find_router_round_trip() {
        let envelope = Envelope::new(vec![Message::FindRouter(FindRouter {
            target: Key::random(),
            txid: 42,
            iterative: true,
        })]);

        assert_eq!(round_trip(&envelope), envelope);
    }

    #[test]
    fn got_router_round_trip() {
        let envelope = Envelope::new(vec![
            Message::GotRouter(GotRouter {
                contacts: vec![signed_rc()],
                txid: 7,
            }),
            Message::GotRouter(GotRouter {
                contacts: vec![],
                txid: 8,
            }),
        ]);

        assert_eq!(round_trip(&envelope), envelope);
    }

    #[test]
    fn contact_signature_survives_the_wire() {
        let envelope = Envelope::new(vec![Message::GotRouter(GotRouter {
            contacts: vec![signed_rc()],
            txid: 1,
        })]);

        let Message::GotRouter(got) = &round_trip(&envelope).messages[0] else {
            panic!("wrong message type");
        };
        assert!(got.contacts[0].verify());
    }

    #[test]
    fn find_intro_round_trips_both_shapes() {
        let envelope = Envelope::new(vec![
            Message::FindIntro(FindIntro {
                target: IntroTarget::Address(ServiceAddress::from_service_key(&[9; KEY_SIZE])),
                txid: 3,
                depth: 4,
            }),
            Message::FindIntro(FindIntro {
                target: IntroTarget::Topic(Tag::new("chat").unwrap()),
                txid: 4,
                depth: 0,
            }),
        ]);

        assert_eq!(round_trip(&envelope), envelope);
    }

    #[test]
    fn got_intro_round_trip_preserves_signature() {
        let envelope = Envelope::new(vec![Message::GotIntro(GotIntro {
            introsets: vec![
                signed_introset(Tag::default()),
                signed_introset(Tag::new("mail").unwrap()),
            ],
            txid: 11,
        })]);

        let decoded = round_trip(&envelope);
        assert_eq!(decoded, envelope);

        let Message::GotIntro(got) = &decoded.messages[0] else {
            panic!("wrong message type");
        };
        assert!(got.introsets[0].verify(50));
        assert!(got.introsets[1].verify(50));
    }

    #[test]
    fn envelope_preserves_sub_message_order() {
        let messages: Vec<Message> = (0..5)
            .map(|i| {
                Message::FindRouter(FindRouter {
                    target: Key::random(),
                    txid: i,
                    iterative: false,
                })
            })
            .collect();

        let decoded = round_trip(&Envelope::new(messages.clone()));
        assert_eq!(decoded.messages, messages);
    }

    #[test]
    fn rejects_wrong_envelope_kind() {
        let wire = internal::WireEnvelope {
            kind: ByteBuf::from(*b"x"),
            messages: vec![],
            version: PROTO_VERSION,
        };

        assert!(matches!(
            Envelope::from_bytes(wire.to_bytes().unwrap()),
            Err(Error::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn rejects_envelope_version_mismatch() {
        let wire = internal::WireEnvelope {
            kind: ByteBuf::from(*b"m"),
            messages: vec![],
            version: PROTO_VERSION + 1,
        };

        assert!(matches!(
            Envelope::from_bytes(wire.to_bytes().unwrap()),
            Err(Error::VersionMismatch(_))
        ));
    }

    #[test]
    fn rejects_sub_message_version_mismatch() {
        let wire = internal::WireEnvelope {
            kind: ByteBuf::from(*b"m"),
            messages: vec![internal::WireMessage::FindRouter {
                iterative: 0,
                key: ByteBuf::from(vec![0; KEY_SIZE]),
                txid: 1,
                version: PROTO_VERSION + 3,
            }],
            version: PROTO_VERSION,
        };

        assert!(matches!(
            Envelope::from_bytes(wire.to_bytes().unwrap()),
            Err(Error::VersionMismatch(_))
        ));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        // d1:a1:m1:mld1:A1:X1:Ti1e1:Vi0eee1:Vi0ee
        let bytes = b"d1:Vi0e1:a1:m1:mld1:A1:X1:Ti1e1:Vi0eee";
        assert!(Envelope::from_bytes(bytes.as_slice()).is_err());
    }

    #[test]
    fn rejects_malformed_bytes() {
        assert!(Envelope::from_bytes(b"not bencode".as_slice()).is_err());
        assert!(Envelope::from_bytes(b"".as_slice()).is_err());
    }

    #[test]
    fn rejects_wrong_key_size() {
        let wire = internal::WireEnvelope {
            kind: ByteBuf::from(*b"m"),
            messages: vec![internal::WireMessage::FindRouter {
                iterative: 0,
                key: ByteBuf::from(vec![0; 16]),
                txid: 1,
                version: PROTO_VERSION,
            }],
            version: PROTO_VERSION,
        };

        assert!(matches!(
            Envelope::from_bytes(wire.to_bytes().unwrap()),
            Err(Error::InvalidKeySize(16))
        ));
    }

    #[test]
    fn rejects_find_intro_with_both_targets() {
        let wire = internal::WireEnvelope {
            kind: ByteBuf::from(*b"m"),
            messages: vec![internal::WireMessage::FindIntro {
                tag: Some(ByteBuf::from(*b"chat")),
                depth: 1,
                address: Some(ByteBuf::from(vec![0; KEY_SIZE])),
                txid: 1,
                version: PROTO_VERSION,
            }],
            version: PROTO_VERSION,
        };

        assert!(Envelope::from_bytes(wire.to_bytes().unwrap()).is_err());
    }
}
