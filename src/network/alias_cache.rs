use std::collections::BTreeMap;
use std::time::Instant;

use tracing::trace;

use crate::types::{NodeAlias, NodeId, Timestamp, NODE_ID_MASK};

#[derive(Debug, Clone, Copy)]
struct Metadata {
    id: NodeId,
    alias: NodeAlias,
    timestamp: Timestamp,
}

/// Bounded, bidirectional mapping between node ids and aliases.
///
/// Entries live in a fixed arena allocated at construction and are indexed
/// by node id, by alias and by last-touch time. When full, adding evicts the
/// least recently touched entry. Lookups refresh recency; the `peek_*`
/// variants do not.
///
/// The cache has no internal locking. It belongs to exactly one interface
/// task, which is enforced by the `&mut self` receivers.
#[derive(Debug)]
pub struct AliasCache {
    pool: Vec<Metadata>,
    free: Vec<usize>,
    id_map: BTreeMap<NodeId, usize>,
    alias_map: BTreeMap<NodeAlias, usize>,
    time_map: BTreeMap<Timestamp, usize>,
    seed: u64,
    epoch: Instant,
    last_timestamp: Timestamp,
}

impl AliasCache {
    /// Creates a cache with room for `entries` mappings, generating aliases
    /// from `seed`.
    ///
    /// # Panics
    ///
    /// If `entries` is zero.
    pub fn new(seed: u64, entries: usize) -> Self {
        assert!(entries > 0, "alias cache needs at least one entry");
        let empty = Metadata {
            id: NodeId::UNKNOWN,
            alias: NodeAlias::UNKNOWN,
            timestamp: 0,
        };
        Self {
            pool: vec![empty; entries],
            free: (0..entries).rev().collect(),
            id_map: BTreeMap::new(),
            alias_map: BTreeMap::new(),
            time_map: BTreeMap::new(),
            seed: seed & NODE_ID_MASK,
            epoch: Instant::now(),
            last_timestamp: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    /// Number of active mappings.
    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }

    /// Strictly increasing timestamp, so the time index never collides.
    fn now(&mut self) -> Timestamp {
        let elapsed = self.epoch.elapsed().as_nanos() as Timestamp;
        self.last_timestamp = elapsed.max(self.last_timestamp + 1);
        self.last_timestamp
    }

    /// Adds a mapping, evicting the least recently touched one if full.
    ///
    /// # Panics
    ///
    /// If `alias` is zero, or if `id` or `alias` is already mapped. Stale
    /// mappings have to be removed first.
    pub fn add(&mut self, id: NodeId, alias: NodeAlias) {
        assert!(!alias.is_unknown(), "alias 0 cannot be mapped");
        assert!(!self.id_map.contains_key(&id), "node {id} is already mapped");
        assert!(
            !self.alias_map.contains_key(&alias),
            "alias {alias} is already mapped"
        );

        let index = match self.free.pop() {
            Some(index) => index,
            None => self.evict_oldest(),
        };
        let timestamp = self.now();
        self.pool[index] = Metadata {
            id,
            alias,
            timestamp,
        };
        self.id_map.insert(id, index);
        self.alias_map.insert(alias, index);
        self.time_map.insert(timestamp, index);
    }

    fn evict_oldest(&mut self) -> usize {
        // Only called with an empty free list, so the time index is full.
        let (_, index) = self
            .time_map
            .pop_first()
            .unwrap_or_else(|| unreachable!("full alias cache with empty time index"));
        let entry = self.pool[index];
        self.id_map.remove(&entry.id);
        self.alias_map.remove(&entry.alias);
        trace!(node = %entry.id, alias = %entry.alias, "Alias cache eviction");
        index
    }

    /// Removes the mapping of `alias`. Returns the node id it mapped to.
    pub fn remove(&mut self, alias: NodeAlias) -> Option<NodeId> {
        let index = self.alias_map.remove(&alias)?;
        let entry = self.pool[index];
        self.id_map.remove(&entry.id);
        self.time_map.remove(&entry.timestamp);
        self.free.push(index);
        Some(entry.id)
    }

    /// Alias of `id`, refreshing the entry's recency.
    pub fn lookup_id(&mut self, id: NodeId) -> Option<NodeAlias> {
        let index = *self.id_map.get(&id)?;
        self.touch(index);
        Some(self.pool[index].alias)
    }

    /// Node id of `alias`, refreshing the entry's recency.
    pub fn lookup_alias(&mut self, alias: NodeAlias) -> Option<NodeId> {
        let index = *self.alias_map.get(&alias)?;
        self.touch(index);
        Some(self.pool[index].id)
    }

    /// Alias of `id` without touching the entry.
    pub fn peek_id(&self, id: NodeId) -> Option<NodeAlias> {
        self.id_map.get(&id).map(|&index| self.pool[index].alias)
    }

    /// Node id of `alias` without touching the entry.
    pub fn peek_alias(&self, alias: NodeAlias) -> Option<NodeId> {
        self.alias_map.get(&alias).map(|&index| self.pool[index].id)
    }

    fn touch(&mut self, index: usize) {
        let old = self.pool[index].timestamp;
        self.time_map.remove(&old);
        let timestamp = self.now();
        self.pool[index].timestamp = timestamp;
        self.time_map.insert(timestamp, index);
    }

    /// Calls `f` once per active mapping, in node id order.
    pub fn for_each<F: FnMut(NodeId, NodeAlias)>(&self, mut f: F) {
        for (id, &index) in &self.id_map {
            f(*id, self.pool[index].alias);
        }
    }

    /// Snapshot of the active mappings, in node id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeAlias)> + '_ {
        self.id_map
            .iter()
            .map(move |(id, &index)| (*id, self.pool[index].alias))
    }

    /// Next alias candidate from the pseudo-random sequence. Never zero.
    ///
    /// The candidate is not checked against active mappings; callers probe
    /// with a lookup and retry on collision.
    pub fn generate(&mut self) -> NodeAlias {
        loop {
            let s = self.seed;
            let alias = (s ^ (s >> 12) ^ (s >> 24) ^ (s >> 36)) & 0xFFF;
            self.seed = ((1u64 << 9) + 1)
                .wrapping_mul(s)
                .wrapping_add(0x1B0C_A37A_4BA9)
                & NODE_ID_MASK;
            if alias != 0 {
                return NodeAlias::new(alias as u16);
            }
        }
    }
}
