//! Seam between the DHT core and the link layer that delivers envelopes.

use crate::common::Key;
use crate::messages::Envelope;

/// The one capability the DHT needs from the surrounding router: handing an
/// envelope to the link layer for delivery.
///
/// Implementations take ownership of the envelope and must not block; they
/// may queue internally while the peer is unreachable. Returning `false`
/// means no routing to the peer exists at all, in which case the pending
/// transaction is left in place and expires on its own.
pub trait Link {
    fn send_to_or_queue(&mut self, peer: &Key, envelope: Envelope) -> bool;
}
