//! Signed router contact records.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::Serialize;

use crate::common::{Key, KEY_SIZE};
use crate::Result;

/// A router's signed descriptor: its identity key, how to dial it, and when
/// it was last updated.
///
/// The identity key doubles as the router's DHT [Key]. The signature covers
/// the bencoded record with the signature field left empty, so a contact that
/// round-trips the wire still verifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterContact {
    /// ed25519 identity key.
    pub(crate) public_key: [u8; KEY_SIZE],
    /// Dialable addresses, in preference order.
    pub(crate) addrs: Vec<String>,
    /// Last update, milliseconds since the unix epoch.
    pub(crate) last_updated: u64,
    /// ed25519 signature by the identity key.
    pub(crate) signature: [u8; 64],
}

impl RouterContact {
    /// Create and sign a contact record for the router owning `signer`.
    pub fn new(signer: &SigningKey, addrs: Vec<String>, last_updated: u64) -> Result<Self> {
        let mut rc = Self {
            public_key: signer.verifying_key().to_bytes(),
            addrs,
            last_updated,
            signature: [0; 64],
        };

        rc.signature = signer.sign(&rc.signable_bytes()?).to_bytes();

        Ok(rc)
    }

    /// Assemble a contact from already-signed parts, without checking the
    /// signature. Used when decoding the wire; verification is the admitting
    /// layer's call.
    pub fn new_signed_unchecked(
        public_key: [u8; KEY_SIZE],
        addrs: Vec<String>,
        last_updated: u64,
        signature: [u8; 64],
    ) -> Self {
        Self {
            public_key,
            addrs,
            last_updated,
            signature,
        }
    }

    // === Getters ===

    /// The router's DHT key (its identity key).
    pub fn key(&self) -> Key {
        Key(self.public_key)
    }

    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }

    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    // === Public Methods ===

    /// Check the record's signature against its identity key.
    pub fn verify(&self) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.public_key) else {
            return false;
        };
        let Ok(signable) = self.signable_bytes() else {
            return false;
        };

        key.verify(&signable, &Signature::from_bytes(&self.signature))
            .is_ok()
    }

    fn signable_bytes(&self) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Signable<'a> {
            #[serde(rename = "a")]
            addrs: &'a [String],
            #[serde(rename = "k", with = "serde_bytes")]
            public_key: &'a [u8],
            #[serde(rename = "u")]
            last_updated: u64,
            #[serde(rename = "z", with = "serde_bytes")]
            signature: &'a [u8],
        }

        Ok(serde_bencode::to_bytes(&Signable {
            addrs: &self.addrs,
            public_key: &self.public_key,
            last_updated: self.last_updated,
            signature: &[],
        })?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::OsRng;

    fn signed_contact() -> (SigningKey, RouterContact) {
        let signer = SigningKey::generate(&mut OsRng);
        let rc = RouterContact::new(
            &signer,
            vec!["198.51.100.7:1090".to_string()],
            1_700_000_000_000,
        )
        .unwrap();

        (signer, rc)
    }

    #[test]
    fn sign_and_verify() {
        let (signer, rc) = signed_contact();

        assert!(rc.verify());
        assert_eq!(rc.key(), Key(signer.verifying_key().to_bytes()));
    }

    #[test]
    fn tampered_body_fails() {
        let (_, mut rc) = signed_contact();

        rc.addrs.push("203.0.113.1:1090".to_string());
        assert!(!rc.verify());
    }

    #[test]
    fn tampered_signature_fails() {
        let (_, mut rc) = signed_contact();

        rc.signature[0] ^= 1;
        assert!(!rc.verify());
    }

    #[test]
    fn unsigned_contact_does_not_verify() {
        let rc = RouterContact::new_signed_unchecked([7; KEY_SIZE], vec![], 0, [0; 64]);
        assert!(!rc.verify());
    }
}
