//! Topic prefix filters for PUB/SUB.
//!
//! A message matches a filter when its first frame begins with the filter's
//! prefix, so the empty prefix matches everything and no prefixes match
//! nothing. [`SubscriptionSet`] is what a SUB socket has asked for;
//! [`SubscriptionIndex`] is a publisher's view of who asked for what.
//!
//! Both keep prefixes in a `BTreeMap`/`BTreeSet`. Every prefix of a topic
//! sorts at or before the topic itself, so lookups only walk `..=topic`.

use bytes::Bytes;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Identifies one subscriber connection inside a publisher.
pub type PeerKey = u64;

/// Matching peers for one topic, sorted and without duplicates.
pub type Matches = SmallVec<[PeerKey; 16]>;

fn candidates<'a, V>(
    map: &'a BTreeMap<Bytes, V>,
    topic: &'a [u8],
) -> impl Iterator<Item = (&'a Bytes, &'a V)> + 'a {
    map.range::<[u8], _>((Bound::Unbounded, Bound::Included(topic)))
        .filter(move |(prefix, _)| topic.starts_with(prefix))
}

#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    prefixes: BTreeSet<Bytes>,
}

impl SubscriptionSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prefixes: BTreeSet::new(),
        }
    }

    /// `false` when `prefix` was already subscribed.
    pub fn subscribe(&mut self, prefix: Bytes) -> bool {
        self.prefixes.insert(prefix)
    }

    /// `false` when `prefix` was not subscribed.
    pub fn unsubscribe(&mut self, prefix: &[u8]) -> bool {
        self.prefixes.remove(prefix)
    }

    #[must_use]
    pub fn matches(&self, topic: &[u8]) -> bool {
        self.prefixes
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(topic)))
            .any(|prefix| topic.starts_with(prefix))
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.prefixes.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }
}

/// Prefix to subscriber table kept by a publisher.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_prefix: BTreeMap<Bytes, SmallVec<[PeerKey; 4]>>,
}

impl SubscriptionIndex {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            by_prefix: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_prefix.is_empty()
    }

    pub fn subscribe(&mut self, peer: PeerKey, prefix: Bytes) {
        let peers = self.by_prefix.entry(prefix).or_default();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    pub fn unsubscribe(&mut self, peer: PeerKey, prefix: &[u8]) {
        let Some(peers) = self.by_prefix.get_mut(prefix) else {
            return;
        };
        peers.retain(|p| *p != peer);
        if peers.is_empty() {
            self.by_prefix.remove(prefix);
        }
    }

    /// Drops every subscription `peer` holds; called when its connection goes.
    pub fn remove_peer_everywhere(&mut self, peer: PeerKey) {
        self.by_prefix.retain(|_, peers| {
            peers.retain(|p| *p != peer);
            !peers.is_empty()
        });
    }

    #[must_use]
    pub fn match_topic(&self, topic: &[u8]) -> Matches {
        let mut found: Matches = candidates(&self.by_prefix, topic)
            .flat_map(|(_, peers)| peers.iter().copied())
            .collect();
        // A peer holding nested prefixes ("a", "ab") shows up once per prefix.
        found.sort_unstable();
        found.dedup();
        found
    }
}
