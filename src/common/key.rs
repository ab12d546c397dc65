//! DHT node key or a lookup target
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::BitXor;
use std::str::FromStr;

use rand::Rng;

use crate::{Error, Result};

/// The size of DHT keys in bytes.
pub const KEY_SIZE: usize = 32;

/// A 256-bit identifier: a router's identity key, a record address, or the
/// XOR distance between two of those.
///
/// Ordering is lexicographic over the big-endian bytes, i.e. the order of the
/// keys interpreted as 256-bit unsigned integers, which is what makes XOR
/// results comparable as distances.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Key(pub [u8; KEY_SIZE]);

impl Key {
    /// The all-zero key. Never valid as a node identity or lookup target.
    pub const ZERO: Key = Key([0; KEY_SIZE]);

    /// The maximum possible XOR distance.
    pub const MAX: Key = Key([0xff; KEY_SIZE]);

    /// Fill a new key from the thread-local CSPRNG.
    pub fn random() -> Key {
        let mut rng = rand::thread_rng();
        Key(rng.gen())
    }

    /// Create a new Key from some bytes. Returns Err if `bytes` is not of
    /// length [KEY_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Key> {
        let bytes = bytes.as_ref();
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeySize(bytes.len()));
        }

        let mut tmp = [0; KEY_SIZE];
        tmp.copy_from_slice(bytes);

        Ok(Key(tmp))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// XOR distance between this key and a target.
    pub fn distance(&self, other: &Key) -> Key {
        *self ^ *other
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl BitXor for Key {
    type Output = Key;

    fn bitxor(self, other: Key) -> Key {
        let mut out = [0; KEY_SIZE];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Key(out)
    }
}

impl From<[u8; KEY_SIZE]> for Key {
    fn from(bytes: [u8; KEY_SIZE]) -> Key {
        Key(bytes)
    }
}

impl Display for Key {
    /// Lowercase hex of all bytes, in order.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Key> {
        if s.len() != KEY_SIZE * 2 {
            return Err(Error::InvalidKeySize(s.len() / 2));
        }

        let mut out = [0; KEY_SIZE];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            out[i] = (hex_nibble(pair[0])? << 4) | hex_nibble(pair[1])?;
        }
        Ok(Key(out))
    }
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Static("invalid hex character in key")),
    }
}
