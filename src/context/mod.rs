//! The DHT context: per-transaction state, the message dispatcher, and the
//! recursive/iterative lookup logic.

mod config;
mod search;

pub use config::*;
pub use search::{IntroSetLookupHook, RouterLookupHook, TxOwner};

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{self, Debug, Formatter};
use std::num::NonZeroUsize;
use std::time::Instant;

use lru::LruCache;
use rand::Rng;
use tracing::{debug, info, trace, warn};

use search::{SearchJob, SearchKind};

use crate::common::{now_unix_ms, Bucket, IntroSet, Key, Node, RouterContact, ServiceAddress, Tag};
use crate::link::Link;
use crate::messages::{Envelope, FindIntro, FindRouter, GotIntro, GotRouter, IntroTarget, Message};

/// Process-wide DHT state, owned by one logical executor.
///
/// Everything mutable lives here: the routing table, the pending-transaction
/// map, and the local introset store. Handlers run to completion and either
/// append replies or hand envelopes to the [Link]; there is no internal
/// locking. Embedders either drive a `Context` from their own single-threaded
/// loop or use [Dht](crate::Dht), which owns one on a dedicated thread.
pub struct Context<L: Link> {
    our_key: Key,
    our_contact: RouterContact,
    nodes: Bucket,
    /// In-flight transactions we initiated, keyed by the peer we asked and
    /// the TXID we allocated.
    pending: HashMap<TxOwner, SearchJob>,
    /// Strictly monotonic TXID counter, seeded from the CSPRNG.
    ids: u64,
    allow_transit: bool,
    /// Introsets published to us, by service address.
    services: LruCache<ServiceAddress, IntroSet>,
    link: L,
    config: Config,
    last_cleanup: Instant,
}

impl<L: Link> Context<L> {
    /// Initialize the context for the router described by `contact`.
    pub fn new(contact: RouterContact, link: L, config: Config) -> Self {
        let our_key = contact.key();
        debug!(%our_key, "initializing dht context");

        Self {
            our_key,
            nodes: Bucket::new(our_key),
            pending: HashMap::new(),
            ids: rand::thread_rng().gen(),
            allow_transit: false,
            services: LruCache::new(
                NonZeroUsize::new(config.max_stored_introsets.max(1)).unwrap_or(NonZeroUsize::MIN),
            ),
            our_contact: contact,
            link,
            config,
            last_cleanup: Instant::now(),
        }
    }

    // === Getters ===

    pub fn our_key(&self) -> &Key {
        &self.our_key
    }

    pub fn our_contact(&self) -> &RouterContact {
        &self.our_contact
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn allow_transit(&self) -> bool {
        self.allow_transit
    }

    pub fn routing_table_size(&self) -> usize {
        self.nodes.len()
    }

    pub fn pending_transactions(&self) -> usize {
        self.pending.len()
    }

    // === Public Methods ===

    /// Switch serving queries on behalf of other peers on or off.
    pub fn set_allow_transit(&mut self, allow: bool) {
        self.allow_transit = allow;
    }

    /// Admit a peer into the routing table, overwriting any entry with the
    /// same key. Typically driven by link-layer session events.
    pub fn put_peer(&mut self, rc: RouterContact) {
        self.nodes.put(Node::new(rc));
    }

    pub fn remove_peer(&mut self, id: &Key) {
        self.nodes.del(id);
    }

    /// Store an introset we agreed to host, keyed by its service address.
    /// Inserting the same address overwrites.
    pub fn put_introset(&mut self, introset: IntroSet) {
        self.services.put(introset.address(), introset);
    }

    /// Resolve a router's contact record. The hook fires exactly once, with
    /// `None` when the lookup fails or times out.
    pub fn lookup_router(&mut self, target: Key, hook: RouterLookupHook) {
        match self.nodes.find_closest(&target) {
            Some(peer) => self.start_router_lookup(
                target,
                self.our_key,
                0,
                peer,
                Some(hook),
                false,
                HashSet::new(),
            ),
            None => {
                debug!(%target, "no peers to ask for router");
                hook(None);
            }
        }
    }

    /// Resolve a hidden service's introset by address. The hook fires exactly
    /// once with the newest validated introset, or empty.
    pub fn lookup_introset(&mut self, addr: ServiceAddress, hook: IntroSetLookupHook) {
        let target = addr.to_key();
        match self.nodes.find_closest(&target) {
            Some(peer) => self.start_intro_lookup(
                IntroTarget::Address(addr),
                self.our_key,
                0,
                peer,
                Some(hook),
                self.config.intro_recursion_depth,
                HashSet::new(),
                Vec::new(),
            ),
            None => {
                debug!(address = %addr, "no peers to ask, answering introset lookup from our own store");
                hook(self.services.get(&addr).cloned().into_iter().collect());
            }
        }
    }

    /// Resolve introsets advertised under a topic tag. The hook fires exactly
    /// once with deduplicated results, local store included.
    pub fn lookup_tag(&mut self, tag: Tag, hook: IntroSetLookupHook) {
        let target = tag.routing_key();
        match self.nodes.find_closest(&target) {
            Some(peer) => self.start_intro_lookup(
                IntroTarget::Topic(tag),
                self.our_key,
                0,
                peer,
                Some(hook),
                self.config.intro_recursion_depth,
                HashSet::new(),
                Vec::new(),
            ),
            None => {
                debug!(%tag, "no peers to ask, answering tag lookup from our own store");
                hook(self.local_tag_results(&tag, &[]));
            }
        }
    }

    /// Decode and handle one link delivery. Returns false when the envelope
    /// was malformed or any sub-message handler failed.
    pub fn handle_packet(&mut self, from: &Key, bytes: &[u8]) -> bool {
        match Envelope::from_bytes(bytes) {
            Ok(envelope) => self.handle_envelope(from, envelope),
            Err(error) => {
                warn!(peer = %from, %error, "dropping malformed dht envelope");
                false
            }
        }
    }

    /// Handle a decoded envelope: dispatch each sub-message in order, then
    /// send the accumulated replies back to `from` as a single envelope, if
    /// there are any.
    pub fn handle_envelope(&mut self, from: &Key, envelope: Envelope) -> bool {
        let mut replies = Vec::new();
        let mut result = true;
        for message in envelope.messages {
            result &= self.handle_message(from, message, &mut replies);
        }

        if !replies.is_empty() {
            self.send_envelope(from, Envelope::new(replies));
        }

        result
    }

    /// Advance time-based state. Runs the expiration sweep once per
    /// [cleanup interval](Config::cleanup_interval).
    pub fn tick(&mut self) {
        if self.last_cleanup.elapsed() >= self.config.cleanup_interval {
            self.last_cleanup = Instant::now();
            self.cleanup_expired();
        }
    }

    // === Private Methods ===

    fn handle_message(&mut self, from: &Key, message: Message, replies: &mut Vec<Message>) -> bool {
        match message {
            Message::FindRouter(msg) => self.handle_find_router(from, msg, replies),
            Message::GotRouter(msg) => self.handle_got_router(from, msg),
            Message::FindIntro(msg) => self.handle_find_intro(from, msg, replies),
            Message::GotIntro(msg) => self.handle_got_intro(from, msg),
        }
    }

    fn handle_find_router(
        &mut self,
        from: &Key,
        msg: FindRouter,
        replies: &mut Vec<Message>,
    ) -> bool {
        if !self.allow_transit {
            warn!(peer = %from, "got dht lookup when we are not allowing transit");
            return false;
        }

        let owner = TxOwner {
            node: *from,
            txid: msg.txid,
        };
        if self.pending.contains_key(&owner) {
            warn!(peer = %from, txid = msg.txid, "got duplicate dht lookup");
            return false;
        }

        self.lookup_router_relayed(*from, msg.txid, msg.target, !msg.iterative, replies);
        true
    }

    /// Serve a FindRouter on behalf of `requester`. Always appends exactly
    /// one GotRouter reply per call, except when forwarding recursively.
    fn lookup_router_relayed(
        &mut self,
        requester: Key,
        txid: u64,
        target: Key,
        recursive: bool,
        replies: &mut Vec<Message>,
    ) {
        if target == self.our_key {
            // We are the target, give them our RC.
            replies.push(Message::GotRouter(GotRouter {
                contacts: vec![self.our_contact.clone()],
                txid,
            }));
            return;
        }

        let excluding = HashSet::from([requester, self.our_key]);
        let Some(next) = self.nodes.find_close_excluding(&target, &excluding) else {
            info!(%target, %requester, "no closer peers, telling requester we don't have it");
            replies.push(Message::GotRouter(GotRouter {
                contacts: vec![],
                txid,
            }));
            return;
        };

        if next == target {
            // We know it.
            let contacts = self
                .nodes
                .get(&target)
                .map(|node| vec![node.rc().clone()])
                .unwrap_or_default();
            replies.push(Message::GotRouter(GotRouter { contacts, txid }));
        } else if recursive {
            if (requester ^ target) < (self.our_key ^ target) {
                // The requester is closer to the target than we are;
                // forwarding would loop backward, so we end it here.
                info!(%target, %next, "we aren't closer to the target than the requester, ending here");
                replies.push(Message::GotRouter(GotRouter {
                    contacts: vec![],
                    txid,
                }));
            } else {
                self.start_router_lookup(target, requester, txid, next, None, false, HashSet::new());
            }
        } else {
            info!(%target, %requester, "iterative request and we don't have it, telling requester");
            replies.push(Message::GotRouter(GotRouter {
                contacts: vec![],
                txid,
            }));
        }
    }

    fn handle_got_router(&mut self, from: &Key, msg: GotRouter) -> bool {
        let owner = TxOwner {
            node: *from,
            txid: msg.txid,
        };
        let entry = match self.pending.entry(owner) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(_) => {
                warn!(peer = %from, txid = msg.txid, "got response for dht transaction we are not tracking");
                return false;
            }
        };
        if !matches!(entry.get().kind, SearchKind::Router { .. }) {
            warn!(peer = %from, txid = msg.txid, "response type does not match pending transaction");
            return false;
        }

        let job = entry.remove();
        let SearchKind::Router { hook } = job.kind else {
            return false;
        };
        let mut exclude = job.exclude;

        if let Some(rc) = msg.contacts.into_iter().next() {
            self.finish_router(job.requester, job.requester_tx, hook, Some(rc));
            return true;
        }

        // Empty reply: iterate to the next closest peer.
        exclude.insert(*from);
        let asked = exclude.len().saturating_sub(1);
        if asked < self.config.router_hop_limit {
            if let Some(next) = self.nodes.find_close_excluding(&job.target, &exclude) {
                info!(
                    target = %job.target,
                    %from,
                    %next,
                    asked,
                    "router was not found, iterating to next peer"
                );
                self.start_router_lookup(
                    job.target,
                    job.requester,
                    job.requester_tx,
                    next,
                    hook,
                    true,
                    exclude,
                );
                return true;
            }
        }

        info!(target = %job.target, %from, "router was not found and we won't look it up further");
        self.finish_router(job.requester, job.requester_tx, hook, None);
        true
    }

    fn handle_find_intro(
        &mut self,
        from: &Key,
        msg: FindIntro,
        replies: &mut Vec<Message>,
    ) -> bool {
        if !self.allow_transit {
            warn!(peer = %from, "got intro lookup when we are not allowing transit");
            return false;
        }

        let owner = TxOwner {
            node: *from,
            txid: msg.txid,
        };
        if self.pending.contains_key(&owner) {
            warn!(peer = %from, txid = msg.txid, "got duplicate intro lookup");
            return false;
        }

        match msg.target {
            IntroTarget::Topic(tag) => {
                // Topic queries are answered from the local store only.
                let found = self.local_tag_results(&tag, &[]);
                trace!(%tag, found = found.len(), "serving tag lookup from local store");
                replies.push(Message::GotIntro(GotIntro {
                    introsets: found,
                    txid: msg.txid,
                }));
            }
            IntroTarget::Address(addr) => {
                if let Some(introset) = self.services.get(&addr) {
                    replies.push(Message::GotIntro(GotIntro {
                        introsets: vec![introset.clone()],
                        txid: msg.txid,
                    }));
                    return true;
                }

                let target = addr.to_key();
                let excluding = HashSet::from([*from, self.our_key]);
                let Some(next) = self.nodes.find_close_excluding(&target, &excluding) else {
                    replies.push(Message::GotIntro(GotIntro {
                        introsets: vec![],
                        txid: msg.txid,
                    }));
                    return true;
                };

                if msg.depth == 0 {
                    // Iterative: the asker drives the next hop themselves.
                    replies.push(Message::GotIntro(GotIntro {
                        introsets: vec![],
                        txid: msg.txid,
                    }));
                } else if (*from ^ target) < (self.our_key ^ target) {
                    info!(address = %addr, "requester is closer to the service than us, ending here");
                    replies.push(Message::GotIntro(GotIntro {
                        introsets: vec![],
                        txid: msg.txid,
                    }));
                } else {
                    self.start_intro_lookup(
                        IntroTarget::Address(addr),
                        *from,
                        msg.txid,
                        next,
                        None,
                        msg.depth - 1,
                        HashSet::new(),
                        Vec::new(),
                    );
                }
            }
        }

        true
    }

    fn handle_got_intro(&mut self, from: &Key, msg: GotIntro) -> bool {
        let owner = TxOwner {
            node: *from,
            txid: msg.txid,
        };
        let entry = match self.pending.entry(owner) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(_) => {
                warn!(peer = %from, txid = msg.txid, "got introsets for a transaction we are not tracking");
                return false;
            }
        };
        if matches!(entry.get().kind, SearchKind::Router { .. }) {
            warn!(peer = %from, txid = msg.txid, "response type does not match pending transaction");
            return false;
        }

        let job = entry.remove();
        let mut exclude = job.exclude;
        let now = now_unix_ms();

        match job.kind {
            SearchKind::Address {
                addr,
                depth,
                hook,
                mut values,
            } => {
                for introset in msg.introsets {
                    if !introset.verify(now) {
                        warn!(address = %addr, "got invalid introset from service lookup");
                        continue;
                    }
                    if introset.address() != addr {
                        warn!(address = %addr, "got introset with wrong target from service lookup");
                        continue;
                    }
                    values.push(introset);
                }

                if !values.is_empty() {
                    // Keep only the newest advertisement.
                    let mut newest: Option<IntroSet> = None;
                    for introset in values {
                        match &newest {
                            Some(best) if !best.other_is_newer(&introset) => {}
                            _ => newest = Some(introset),
                        }
                    }
                    self.finish_intro(
                        job.requester,
                        job.requester_tx,
                        hook,
                        newest.into_iter().collect(),
                    );
                    return true;
                }

                exclude.insert(*from);
                if let Some(next) = self.nodes.find_close_excluding(&job.target, &exclude) {
                    debug!(address = %addr, %from, %next, "introset not found, iterating to next peer");
                    self.start_intro_lookup(
                        IntroTarget::Address(addr),
                        job.requester,
                        job.requester_tx,
                        next,
                        hook,
                        depth.saturating_sub(1),
                        exclude,
                        values,
                    );
                    return true;
                }

                debug!(address = %addr, "introset not found and no peers left to ask");
                self.finish_intro(job.requester, job.requester_tx, hook, Vec::new());
                true
            }
            SearchKind::Topic {
                tag,
                depth,
                hook,
                mut values,
            } => {
                for introset in msg.introsets {
                    if !introset.verify(now) {
                        warn!(%tag, "got invalid introset from tag lookup");
                        continue;
                    }
                    if *introset.topic() != tag {
                        warn!(%tag, "got introset with mismatched topic in tag lookup");
                        continue;
                    }
                    values.push(introset);
                }

                if !values.is_empty() {
                    let found = self.merge_tag_results(&tag, values);
                    self.finish_intro(job.requester, job.requester_tx, hook, found);
                    return true;
                }

                exclude.insert(*from);
                if let Some(next) = self.nodes.find_close_excluding(&job.target, &exclude) {
                    debug!(%tag, %from, %next, "no introsets for tag yet, iterating to next peer");
                    self.start_intro_lookup(
                        IntroTarget::Topic(tag),
                        job.requester,
                        job.requester_tx,
                        next,
                        hook,
                        depth.saturating_sub(1),
                        exclude,
                        values,
                    );
                    return true;
                }

                let found = self.merge_tag_results(&tag, Vec::new());
                self.finish_intro(job.requester, job.requester_tx, hook, found);
                true
            }
            SearchKind::Router { .. } => false,
        }
    }

    /// Start an outbound router lookup transaction toward `ask_peer`.
    fn start_router_lookup(
        &mut self,
        target: Key,
        requester: Key,
        requester_tx: u64,
        ask_peer: Key,
        hook: Option<RouterLookupHook>,
        iterative: bool,
        mut exclude: HashSet<Key>,
    ) {
        if target.is_zero() || requester.is_zero() || ask_peer.is_zero() {
            warn!("refusing router lookup involving a zero key");
            return;
        }

        let id = self.next_txid();
        let requester_tx = if requester_tx == 0 { id } else { requester_tx };

        exclude.insert(self.our_key);
        exclude.insert(ask_peer);

        let owner = TxOwner {
            node: ask_peer,
            txid: id,
        };
        debug_assert!(
            !self.pending.contains_key(&owner),
            "transaction id reused while pending"
        );

        info!(peer = %ask_peer, %target, %requester, "asking peer for router");
        self.pending.insert(
            owner,
            SearchJob::new(
                requester,
                requester_tx,
                target,
                exclude,
                SearchKind::Router { hook },
            ),
        );
        self.send_single(
            &ask_peer,
            Message::FindRouter(FindRouter {
                target,
                txid: id,
                iterative,
            }),
        );
    }

    /// Start an outbound introset lookup transaction toward `ask_peer`,
    /// carrying forward accumulators from any previous hop.
    #[allow(clippy::too_many_arguments)]
    fn start_intro_lookup(
        &mut self,
        lookup: IntroTarget,
        requester: Key,
        requester_tx: u64,
        ask_peer: Key,
        hook: Option<IntroSetLookupHook>,
        depth: u64,
        mut exclude: HashSet<Key>,
        values: Vec<IntroSet>,
    ) {
        if requester.is_zero() || ask_peer.is_zero() {
            warn!("refusing introset lookup involving a zero key");
            return;
        }

        let id = self.next_txid();
        let requester_tx = if requester_tx == 0 { id } else { requester_tx };

        let (target, kind) = match lookup.clone() {
            IntroTarget::Address(addr) => (
                addr.to_key(),
                SearchKind::Address {
                    addr,
                    depth,
                    hook,
                    values,
                },
            ),
            IntroTarget::Topic(tag) => (
                tag.routing_key(),
                SearchKind::Topic {
                    tag,
                    depth,
                    hook,
                    values,
                },
            ),
        };

        exclude.insert(self.our_key);
        exclude.insert(ask_peer);

        let owner = TxOwner {
            node: ask_peer,
            txid: id,
        };
        debug_assert!(
            !self.pending.contains_key(&owner),
            "transaction id reused while pending"
        );

        debug!(peer = %ask_peer, %target, depth, "asking peer for introsets");
        self.pending.insert(
            owner,
            SearchJob::new(requester, requester_tx, target, exclude, kind),
        );
        self.send_single(
            &ask_peer,
            Message::FindIntro(FindIntro {
                target: lookup,
                txid: id,
                depth,
            }),
        );
    }

    /// Finish a router search: answer a remote requester, then fire the hook.
    fn finish_router(
        &mut self,
        requester: Key,
        requester_tx: u64,
        hook: Option<RouterLookupHook>,
        found: Option<RouterContact>,
    ) {
        if requester != self.our_key {
            self.send_single(
                &requester,
                Message::GotRouter(GotRouter {
                    contacts: found.clone().into_iter().collect(),
                    txid: requester_tx,
                }),
            );
        }
        if let Some(hook) = hook {
            hook(found);
        }
    }

    /// Finish an introset search: answer a remote requester, then fire the
    /// hook.
    fn finish_intro(
        &mut self,
        requester: Key,
        requester_tx: u64,
        hook: Option<IntroSetLookupHook>,
        found: Vec<IntroSet>,
    ) {
        if requester != self.our_key {
            self.send_single(
                &requester,
                Message::GotIntro(GotIntro {
                    introsets: found.clone(),
                    txid: requester_tx,
                }),
            );
        }
        if let Some(hook) = hook {
            hook(found);
        }
    }

    /// Expire pending transactions that waited longer than the job timeout.
    fn cleanup_expired(&mut self) {
        trace!("dht cleanup tick");
        let timeout = self.config.job_timeout;
        let expired: Vec<TxOwner> = self
            .pending
            .iter()
            .filter(|(_, job)| job.is_expired(timeout))
            .map(|(owner, _)| *owner)
            .collect();

        for owner in expired {
            let Some(job) = self.pending.remove(&owner) else {
                continue;
            };
            debug!(peer = %owner.node, txid = owner.txid, target = %job.target, "expiring stale dht transaction");
            match job.kind {
                SearchKind::Router { hook } => {
                    self.finish_router(job.requester, job.requester_tx, hook, None)
                }
                SearchKind::Address { hook, .. } | SearchKind::Topic { hook, .. } => {
                    self.finish_intro(job.requester, job.requester_tx, hook, Vec::new())
                }
            }
        }
    }

    /// Dedup results by service (newest advertisement wins) and, while fewer
    /// than 2 distinct services were found over the network, merge matching
    /// entries from the local store.
    fn merge_tag_results(&mut self, tag: &Tag, values: Vec<IntroSet>) -> Vec<IntroSet> {
        let mut by_service: BTreeMap<ServiceAddress, IntroSet> = BTreeMap::new();
        for introset in values {
            let addr = introset.address();
            match by_service.get(&addr) {
                Some(existing) if !existing.other_is_newer(&introset) => {}
                _ => {
                    by_service.insert(addr, introset);
                }
            }
        }

        if by_service.len() < 2 {
            let exclude: Vec<ServiceAddress> = by_service.keys().copied().collect();
            for introset in self.local_tag_results(tag, &exclude) {
                by_service.entry(introset.address()).or_insert(introset);
            }
        }

        by_service.into_values().collect()
    }

    fn local_tag_results(&self, tag: &Tag, exclude: &[ServiceAddress]) -> Vec<IntroSet> {
        self.services
            .iter()
            .filter(|&(addr, introset)| introset.topic() == tag && !exclude.contains(addr))
            .map(|(_, introset)| introset.clone())
            .take(self.config.max_local_tag_results)
            .collect()
    }

    fn next_txid(&mut self) -> u64 {
        self.ids += 1;
        self.ids
    }

    fn send_single(&mut self, peer: &Key, message: Message) -> bool {
        self.send_envelope(peer, Envelope::new(vec![message]))
    }

    fn send_envelope(&mut self, peer: &Key, envelope: Envelope) -> bool {
        let sent = self.link.send_to_or_queue(peer, envelope);
        if !sent {
            // The transaction stays pending and will expire on its own.
            debug!(%peer, "link has no route to peer");
        }
        sent
    }
}

impl<L: Link> Debug for Context<L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("our_key", &self.our_key)
            .field("nodes", &self.nodes.len())
            .field("pending", &self.pending.len())
            .field("allow_transit", &self.allow_transit)
            .finish()
    }
}
