use super::hasher::{FoldHasher, MapHasher};
use super::sizes::{HASH_SIZES, TableSize};
use rand::Rng;

/// An occupied slot of an [OpenMap].
#[derive(Debug, Clone)]
pub struct Entry<K, V> {
    hash: u32,
    key: K,
    value: V,
}

impl<K, V> Entry<K, V> {
    /// The cached hash of the key.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// The key of the entry.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The value of the entry.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// The value of the entry, mutably.
    pub fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }
}

#[derive(Debug, Clone)]
enum Slot<K, V> {
    Empty,
    Deleted,
    Occupied(Entry<K, V>),
}

impl<K, V> Slot<K, V> {
    fn entry(&self) -> Option<&Entry<K, V>> {
        match self {
            Slot::Occupied(entry) => Some(entry),
            _ => None,
        }
    }

    fn entry_mut(&mut self) -> Option<&mut Entry<K, V>> {
        match self {
            Slot::Occupied(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Open-addressing hash map with double hashing and tombstone deletion.
///
/// The hash of every key is cached in its slot and compared before calling [Eq], so
/// expensive key comparisons only happen on real hash collisions. Removal leaves a
/// tombstone and never shrinks the table; tombstones are reclaimed by a same-size
/// rehash once `entries + tombstones` reaches the threshold of the current size.
///
/// Iteration walks the whole backing table and is therefore O(capacity), not
/// O(len). The order is unspecified and only stable between mutations.
pub struct OpenMap<K, V, H = FoldHasher> {
    table: Vec<Slot<K, V>>,
    size_index: usize,
    entries: usize,
    deleted: usize,
    hasher: H,
}

impl<K: Eq, V, H: MapHasher<K> + Default> OpenMap<K, V, H> {
    /// Create an empty map with the smallest table size.
    pub fn new() -> Self {
        Self::with_hasher(H::default())
    }
}

impl<K: Eq, V, H: MapHasher<K> + Default> Default for OpenMap<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq, V, H: MapHasher<K>> OpenMap<K, V, H> {
    /// Create an empty map using the given hasher.
    pub fn with_hasher(hasher: H) -> Self {
        Self {
            table: empty_table(HASH_SIZES[0].size),
            size_index: 0,
            entries: 0,
            deleted: 0,
            hasher,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries
    }

    /// Whether the map holds no live entry.
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of slots in the backing table.
    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Number of tombstoned slots waiting for the next rehash.
    pub fn tombstones(&self) -> usize {
        self.deleted
    }

    /// Insert a value, replacing and returning the previous value of an equal key.
    ///
    /// Insertion may grow or rehash the table, so slot positions observed before the
    /// call are not preserved.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.hasher.hash(&key);
        self.insert_pre_hashed(hash, key, value)
    }

    /// Insert a value whose key hash is already known.
    ///
    /// The hash must be the one the map's hasher would produce for the key.
    pub fn insert_pre_hashed(&mut self, hash: u32, key: K, value: V) -> Option<V> {
        let max_entries = self.table_size().max_entries as usize;

        if self.entries >= max_entries {
            self.rehash(self.size_index + 1);
        } else if self.entries + self.deleted >= max_entries {
            self.rehash(self.size_index);
        }

        let mut available = None;

        for index in self.probe(hash) {
            match &mut self.table[index] {
                Slot::Empty => {
                    available.get_or_insert(index);
                    break;
                }
                Slot::Deleted => {
                    available.get_or_insert(index);
                }
                Slot::Occupied(entry) => {
                    if entry.hash == hash && entry.key == key {
                        return Some(core::mem::replace(&mut entry.value, value));
                    }
                }
            }
        }

        let Some(index) = available else {
            panic!(
                "OpenMap has no free slot among {} slots with {} entries",
                self.table.len(),
                self.entries
            );
        };

        if let Slot::Deleted = self.table[index] {
            self.deleted -= 1;
        }
        self.table[index] = Slot::Occupied(Entry { hash, key, value });
        self.entries += 1;

        None
    }

    /// Get the value stored for the key.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_entry(key).map(|entry| &entry.value)
    }

    /// Get the value stored for the key, mutably.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let index = self.find(key)?;
        self.table[index].entry_mut().map(|entry| &mut entry.value)
    }

    /// Get the whole entry stored for the key.
    pub fn get_entry(&self, key: &K) -> Option<&Entry<K, V>> {
        let index = self.find(key)?;
        self.table[index].entry()
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Remove the key, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, value)| value)
    }

    /// Remove the key, returning the stored key and value.
    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        let index = self.find(key)?;
        self.take_slot(index)
    }

    /// Remove the key and hand the removed entry to `on_delete`.
    ///
    /// Returns whether an entry was removed.
    pub fn remove_with<F: FnOnce(K, V)>(&mut self, key: &K, on_delete: F) -> bool {
        match self.remove_entry(key) {
            Some((key, value)) => {
                on_delete(key, value);
                true
            }
            None => false,
        }
    }

    /// Keep only the entries for which `keep` returns true.
    ///
    /// Removed entries become tombstones, so the scan is never disturbed by a resize.
    pub fn retain<F: FnMut(&K, &mut V) -> bool>(&mut self, mut keep: F) {
        for index in 0..self.table.len() {
            let drop_it = match &mut self.table[index] {
                Slot::Occupied(entry) => !keep(&entry.key, &mut entry.value),
                _ => false,
            };
            if drop_it {
                self.take_slot(index);
            }
        }
    }

    /// Iterate over the live entries.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.table
            .iter()
            .filter_map(Slot::entry)
            .map(|entry| (&entry.key, &entry.value))
    }

    /// Iterate over the live entries with mutable values.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.table
            .iter_mut()
            .filter_map(Slot::entry_mut)
            .map(|entry| (&entry.key, &mut entry.value))
    }

    /// Iterate over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Iterate over the values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Remove every entry, handing them out in table order, and shrink back to the
    /// smallest size.
    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + use<K, V, H> {
        let table = core::mem::replace(&mut self.table, empty_table(HASH_SIZES[0].size));
        self.size_index = 0;
        self.entries = 0;
        self.deleted = 0;

        table.into_iter().filter_map(|slot| match slot {
            Slot::Occupied(entry) => Some((entry.key, entry.value)),
            _ => None,
        })
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.drain().for_each(drop);
    }

    /// Pick an arbitrary live entry, starting the scan at a random slot.
    pub fn random_entry(&self) -> Option<&Entry<K, V>> {
        self.random_entry_matching(|_| true)
    }

    /// Pick an arbitrary live entry accepted by `predicate`.
    ///
    /// Useful for random replacement policies. Returns `None` when no entry matches.
    pub fn random_entry_matching<P>(&self, predicate: P) -> Option<&Entry<K, V>>
    where
        P: FnMut(&Entry<K, V>) -> bool,
    {
        self.random_entry_with(&mut rand::rng(), predicate)
    }

    /// Same as [random_entry_matching](Self::random_entry_matching) with a caller
    /// supplied random number generator.
    pub fn random_entry_with<R, P>(&self, rng: &mut R, mut predicate: P) -> Option<&Entry<K, V>>
    where
        R: Rng,
        P: FnMut(&Entry<K, V>) -> bool,
    {
        if self.entries == 0 {
            return None;
        }

        let start = rng.random_range(0..self.table.len());
        let (before, after) = self.table.split_at(start);

        after
            .iter()
            .chain(before.iter())
            .filter_map(Slot::entry)
            .find(|entry| predicate(entry))
    }

    fn table_size(&self) -> TableSize {
        HASH_SIZES[self.size_index]
    }

    fn probe(&self, hash: u32) -> Probe {
        let size = self.table_size();
        let start = hash as u64 % size.size;

        Probe {
            start,
            current: Some(start),
            step: 1 + hash as u64 % size.rehash,
            size: size.size,
        }
    }

    fn find(&self, key: &K) -> Option<usize> {
        let hash = self.hasher.hash(key);

        for index in self.probe(hash) {
            match &self.table[index] {
                // Nothing was ever stored past an empty slot on this probe path.
                Slot::Empty => return None,
                Slot::Occupied(entry) if entry.hash == hash && entry.key == *key => {
                    return Some(index);
                }
                _ => {}
            }
        }

        None
    }

    fn take_slot(&mut self, index: usize) -> Option<(K, V)> {
        match core::mem::replace(&mut self.table[index], Slot::Deleted) {
            Slot::Occupied(entry) => {
                self.entries -= 1;
                self.deleted += 1;
                Some((entry.key, entry.value))
            }
            other => {
                self.table[index] = other;
                None
            }
        }
    }

    fn rehash(&mut self, size_index: usize) {
        assert!(
            size_index < HASH_SIZES.len(),
            "OpenMap cannot grow past {} entries",
            HASH_SIZES[HASH_SIZES.len() - 1].max_entries
        );

        let size = HASH_SIZES[size_index];
        log::trace!(
            "Rehashing map from {} to {} slots ({} entries, {} tombstones)",
            self.table.len(),
            size.size,
            self.entries,
            self.deleted
        );

        let old = core::mem::replace(&mut self.table, empty_table(size.size));
        self.size_index = size_index;
        self.entries = 0;
        self.deleted = 0;

        for slot in old {
            if let Slot::Occupied(entry) = slot {
                self.place(entry);
            }
        }
    }

    // Fresh tables have neither tombstones nor duplicate keys, the first empty slot wins.
    fn place(&mut self, entry: Entry<K, V>) {
        let index = self
            .probe(entry.hash)
            .find(|index| matches!(self.table[*index], Slot::Empty));

        match index {
            Some(index) => {
                self.table[index] = Slot::Occupied(entry);
                self.entries += 1;
            }
            None => panic!("OpenMap rehash found no empty slot"),
        }
    }
}

impl<K: Eq + core::fmt::Debug, V: core::fmt::Debug, H: MapHasher<K>> core::fmt::Debug
    for OpenMap<K, V, H>
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

fn empty_table<K, V>(size: u64) -> Vec<Slot<K, V>> {
    (0..size).map(|_| Slot::Empty).collect()
}

/// Double hashing probe sequence; visits every slot exactly once since both the
/// table size and the step modulus are prime.
struct Probe {
    start: u64,
    current: Option<u64>,
    step: u64,
    size: u64,
}

impl Iterator for Probe {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let current = self.current?;
        let next = (current + self.step) % self.size;
        self.current = (next != self.start).then_some(next);

        Some(current as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{GoldenRatio32, GoldenRatio64};
    use crate::rand::get_fixed_rng;

    #[test]
    fn search_after_insert_returns_value() {
        let mut map = OpenMap::<u32, &str, GoldenRatio32>::new();

        assert_eq!(map.insert(1, "one"), None);
        assert_eq!(map.insert(2, "two"), None);

        assert_eq!(map.get(&1), Some(&"one"));
        assert_eq!(map.get(&2), Some(&"two"));
        assert_eq!(map.get(&3), None);
    }

    #[test]
    fn insert_replaces_value_in_place() {
        let mut map = OpenMap::<u32, u64, GoldenRatio32>::new();

        map.insert(7, 1);
        assert_eq!(map.insert(7, 2), Some(1));

        assert_eq!(map.get(&7), Some(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_leaves_tombstone() {
        let mut map = OpenMap::<u64, u64, GoldenRatio64>::new();
        map.insert(0x1000, 1);
        map.insert(0x2000, 2);

        assert_eq!(map.remove(&0x1000), Some(1));
        assert_eq!(map.remove(&0x1000), None);

        assert_eq!(map.get(&0x1000), None);
        assert_eq!(map.get(&0x2000), Some(&2));
        assert_eq!(map.tombstones(), 1);
        assert_eq!(map.capacity(), 5);
    }

    #[test]
    fn remove_with_calls_on_delete() {
        let mut map = OpenMap::<u32, String, GoldenRatio32>::new();
        map.insert(3, "three".to_string());

        let mut removed = None;
        assert!(map.remove_with(&3, |key, value| removed = Some((key, value))));
        assert!(!map.remove_with(&3, |_, _| panic!("nothing left to delete")));

        assert_eq!(removed, Some((3, "three".to_string())));
    }

    #[test]
    fn grows_through_size_table() {
        let mut map = OpenMap::<u32, u32, GoldenRatio32>::new();

        for i in 1..=1000 {
            map.insert(i, i * 2);
        }

        assert_eq!(map.len(), 1000);
        assert_eq!(map.capacity(), 1153);
        for i in 1..=1000 {
            assert_eq!(map.get(&i), Some(&(i * 2)));
        }
    }

    #[test]
    fn tombstones_trigger_same_size_rehash() {
        let mut map = OpenMap::<u32, u32, GoldenRatio32>::new();

        // Churn a single live entry; the table must never grow.
        for i in 1..100 {
            map.insert(i, i);
            map.remove(&i);
        }
        map.insert(1000, 1000);

        assert_eq!(map.capacity(), 5);
        assert_eq!(map.len(), 1);
        assert!(map.tombstones() < 2);
    }

    #[test]
    fn foreach_visits_live_entries_only() {
        let mut map = OpenMap::<u32, u32, GoldenRatio32>::new();
        for i in 1..=20 {
            map.insert(i, i);
        }
        for i in 1..=5 {
            map.remove(&i);
        }

        let mut keys: Vec<u32> = map.keys().copied().collect();
        keys.sort();

        assert_eq!(keys, (6..=20).collect::<Vec<_>>());
        assert_eq!(map.iter().count(), 15);
    }

    #[test]
    fn retain_tombstones_while_scanning() {
        let mut map = OpenMap::<u32, u32, GoldenRatio32>::new();
        for i in 1..=30 {
            map.insert(i, i);
        }
        let capacity = map.capacity();

        map.retain(|key, _| key % 3 == 0);

        assert_eq!(map.len(), 10);
        assert_eq!(map.capacity(), capacity);
        assert!(map.keys().all(|key| key % 3 == 0));
    }

    #[test]
    fn random_entry_respects_predicate() {
        let mut rng = get_fixed_rng(42);
        let mut map = OpenMap::<u32, u32, GoldenRatio32>::new();

        assert!(map.random_entry().is_none());

        for i in 1..=50 {
            map.insert(i, i);
        }

        for _ in 0..20 {
            let entry = map
                .random_entry_with(&mut rng, |entry| entry.value() % 10 == 0)
                .unwrap();
            assert_eq!(entry.value() % 10, 0);
        }
        assert!(map.random_entry_with(&mut rng, |entry| *entry.value() > 50).is_none());
    }

    #[test]
    fn drain_empties_and_shrinks() {
        let mut map = OpenMap::<u32, u32, GoldenRatio32>::new();
        for i in 1..=100 {
            map.insert(i, i);
        }

        let mut drained: Vec<_> = map.drain().map(|(key, _)| key).collect();
        drained.sort();

        assert_eq!(drained, (1..=100).collect::<Vec<_>>());
        assert!(map.is_empty());
        assert_eq!(map.capacity(), 5);
    }

    #[test]
    fn colliding_hashes_use_equality() {
        #[derive(Default)]
        struct Constant;
        impl MapHasher<u32> for Constant {
            fn hash(&self, _key: &u32) -> u32 {
                7
            }
        }

        let mut map = OpenMap::<u32, u32, Constant>::new();
        for i in 0..40 {
            map.insert(i, i + 100);
        }
        map.remove(&10);

        assert_eq!(map.get(&39), Some(&139));
        assert_eq!(map.get(&10), None);
        assert_eq!(map.len(), 39);
    }

    #[test]
    fn matches_reference_map_under_random_operations() {
        let mut rng = get_fixed_rng(7);
        let mut map = OpenMap::<u64, u64, GoldenRatio64>::new();
        let mut reference = hashbrown::HashMap::new();

        for step in 0..20_000u64 {
            let key = rng.random_range(0..512u64) * 0x1000;
            match rng.random_range(0..3) {
                0 | 1 => assert_eq!(map.insert(key, step), reference.insert(key, step)),
                _ => assert_eq!(map.remove(&key), reference.remove(&key)),
            }
        }

        assert_eq!(map.len(), reference.len());
        for (key, value) in reference.iter() {
            assert_eq!(map.get(key), Some(value));
        }
    }
}
