//! Dht node: a [Context] running on a dedicated actor thread behind a
//! cloneable, channel-backed handle.

use std::thread::{self, JoinHandle};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::common::{IntroSet, Key, RouterContact, ServiceAddress, Tag};
use crate::context::{Config, Context};
use crate::link::Link;

/// Handle to a running DHT node. Cheap to clone; all clones drive the same
/// actor thread.
#[derive(Debug)]
pub struct Dht {
    handle: Option<JoinHandle<()>>,
    sender: Sender<ActorMessage>,
}

impl Clone for Dht {
    fn clone(&self) -> Self {
        Dht {
            handle: None,
            sender: self.sender.clone(),
        }
    }
}

impl Dht {
    /// Spawn the actor thread for the router described by `contact`,
    /// delivering outbound envelopes through `link`.
    pub fn new<L: Link + Send + 'static>(contact: RouterContact, link: L, config: Config) -> Dht {
        let (sender, receiver) = flume::unbounded();

        let handle = thread::spawn(move || run(Context::new(contact, link, config), receiver));

        Dht {
            handle: Some(handle),
            sender,
        }
    }

    // === Public Methods ===

    pub fn shutdown(&self) {
        let _ = self.sender.send(ActorMessage::Shutdown);
    }

    pub fn put_peer(&self, rc: RouterContact) {
        let _ = self.sender.send(ActorMessage::PutPeer(rc));
    }

    pub fn remove_peer(&self, id: Key) {
        let _ = self.sender.send(ActorMessage::RemovePeer(id));
    }

    pub fn set_allow_transit(&self, allow: bool) {
        let _ = self.sender.send(ActorMessage::AllowTransit(allow));
    }

    pub fn put_introset(&self, introset: IntroSet) {
        let _ = self.sender.send(ActorMessage::PutIntroSet(introset));
    }

    /// Feed one inbound link delivery into the DHT.
    pub fn handle_packet(&self, from: Key, bytes: Vec<u8>) {
        let _ = self.sender.send(ActorMessage::Incoming(from, bytes));
    }

    /// Enqueue a router lookup. The response yields the contact when found.
    pub fn lookup_router(&self, target: Key) -> LookupResponse<Option<RouterContact>> {
        let (sender, receiver) = flume::bounded(1);
        let _ = self
            .sender
            .send(ActorMessage::LookupRouter(target, sender));
        LookupResponse { receiver }
    }

    /// Enqueue an introset lookup by service address.
    pub fn lookup_introset(&self, addr: ServiceAddress) -> LookupResponse<Vec<IntroSet>> {
        let (sender, receiver) = flume::bounded(1);
        let _ = self
            .sender
            .send(ActorMessage::LookupIntroSet(addr, sender));
        LookupResponse { receiver }
    }

    /// Enqueue an introset lookup by topic tag.
    pub fn lookup_tag(&self, tag: Tag) -> LookupResponse<Vec<IntroSet>> {
        let (sender, receiver) = flume::bounded(1);
        let _ = self.sender.send(ActorMessage::LookupTag(tag, sender));
        LookupResponse { receiver }
    }

    // === Private Methods ===

    #[cfg(test)]
    fn block_until_shutdown(self) {
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

/// Receiver half of one enqueued lookup. The channel carries exactly one
/// completion value.
#[derive(Debug)]
pub struct LookupResponse<T> {
    receiver: Receiver<T>,
}

impl LookupResponse<Option<RouterContact>> {
    /// Block until the lookup completes. `None` when the router was not
    /// found, the lookup timed out, or the node shut down.
    pub fn recv(self) -> Option<RouterContact> {
        self.receiver.recv().ok().flatten()
    }
}

impl LookupResponse<Vec<IntroSet>> {
    /// Block until the lookup completes. Empty when nothing was found, the
    /// lookup timed out, or the node shut down.
    pub fn recv(self) -> Vec<IntroSet> {
        self.receiver.recv().unwrap_or_default()
    }
}

enum ActorMessage {
    Shutdown,
    PutPeer(RouterContact),
    RemovePeer(Key),
    AllowTransit(bool),
    PutIntroSet(IntroSet),
    Incoming(Key, Vec<u8>),
    LookupRouter(Key, Sender<Option<RouterContact>>),
    LookupIntroSet(ServiceAddress, Sender<Vec<IntroSet>>),
    LookupTag(Tag, Sender<Vec<IntroSet>>),
}

fn run<L: Link>(mut context: Context<L>, receiver: Receiver<ActorMessage>) {
    let tick = context.config().cleanup_interval;

    loop {
        match receiver.recv_timeout(tick) {
            Ok(ActorMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(message) => dispatch(&mut context, message),
            Err(RecvTimeoutError::Timeout) => {}
        }

        context.tick();
    }

    debug!(our_key = %context.our_key(), "dht actor stopped");
}

fn dispatch<L: Link>(context: &mut Context<L>, message: ActorMessage) {
    match message {
        ActorMessage::Shutdown => {}
        ActorMessage::PutPeer(rc) => context.put_peer(rc),
        ActorMessage::RemovePeer(id) => context.remove_peer(&id),
        ActorMessage::AllowTransit(allow) => context.set_allow_transit(allow),
        ActorMessage::PutIntroSet(introset) => context.put_introset(introset),
        ActorMessage::Incoming(from, bytes) => {
            context.handle_packet(&from, &bytes);
        }
        ActorMessage::LookupRouter(target, sender) => context.lookup_router(
            target,
            Box::new(move |found| {
                let _ = sender.send(found);
            }),
        ),
        ActorMessage::LookupIntroSet(addr, sender) => context.lookup_introset(
            addr,
            Box::new(move |found| {
                let _ = sender.send(found);
            }),
        ),
        ActorMessage::LookupTag(tag, sender) => context.lookup_tag(
            tag,
            Box::new(move |found| {
                let _ = sender.send(found);
            }),
        ),
    }
}
