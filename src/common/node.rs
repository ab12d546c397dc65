//! Struct and implementation of the Node entry in the routing table.

use crate::common::{Key, RouterContact};

/// Node entry in the routing table: a peer's key and its contact record.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) id: Key,
    pub(crate) rc: RouterContact,
}

impl Node {
    pub fn new(rc: RouterContact) -> Node {
        Node { id: rc.key(), rc }
    }

    // === Getters ===

    pub fn id(&self) -> &Key {
        &self.id
    }

    pub fn rc(&self) -> &RouterContact {
        &self.rc
    }
}
