use core::fmt::Debug;
use core::hash::BuildHasher;
use core::mem;
use std::io::Read;
use std::io::Write;

use crate::config::TrieConfig;
use crate::error::Error;
use crate::hash::BytesEqual;
use crate::hash::Fnv1aBuildHasher;
use crate::hash::KeyEqual;
use crate::serialize::SerializeValue;
use crate::trie_hash::MapValues;
use crate::trie_hash::RawIter;
use crate::trie_hash::RawPrefixIter;
use crate::trie_hash::TrieHash;

/// A map from byte-string keys to values, implemented as a HAT-trie.
///
/// `TrieMap<V, S, E>` stores values of type `V` under keys that are raw
/// byte strings: any `&str`, `&[u8]`, `String` or `Vec<u8>` works as a
/// key argument. Compared to a plain hash map it keeps keys with shared
/// prefixes close together, which buys prefix queries
/// ([`iter_prefix`](Self::iter_prefix), [`longest_prefix`](Self::longest_prefix),
/// [`remove_prefix`](Self::remove_prefix)) and a much smaller per-key
/// memory footprint; compared to an ordered tree it trades global
/// ordering for hash-table speed inside each leaf.
///
/// Iteration visits keys grouped by prefix in byte order of the trie
/// edges; entries inside one leaf come back in table order, which is
/// stable for a given sequence of mutations but not sorted.
///
/// The hasher `S` is any [`BuildHasher`] fed the raw key bytes, FNV-1a
/// by default. The comparator `E` pairs with it for normalized-key
/// tries (for example case-insensitive ones, see [`KeyEqual`]).
///
/// # Examples
///
/// ```rust
/// use hat_trie::TrieMap;
///
/// let mut map: TrieMap<i32> = TrieMap::new();
/// map.insert("apple", 1)?;
/// map.insert("applet", 2)?;
/// map.insert("banana", 3)?;
///
/// assert_eq!(map.get("apple"), Some(&1));
/// assert_eq!(map.iter_prefix("app").count(), 2);
///
/// let (key, value) = map.longest_prefix("applets").unwrap();
/// assert_eq!((key.as_slice(), value), (b"applet".as_slice(), &2));
/// # Ok::<(), hat_trie::Error>(())
/// ```
pub struct TrieMap<V, S = Fnv1aBuildHasher, E = BytesEqual> {
    ht: TrieHash<MapValues<V>, S, E>,
}

impl<V> TrieMap<V> {
    /// Creates an empty map with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TrieConfig::new())
    }

    /// Creates an empty map with the given configuration.
    pub fn with_config(config: TrieConfig) -> Self {
        Self::with_config_hasher_and_eq(config, Fnv1aBuildHasher, BytesEqual)
    }
}

impl<V, S> TrieMap<V, S>
where
    S: BuildHasher,
{
    /// Creates an empty map with the default configuration and the
    /// given hasher.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_config_and_hasher(TrieConfig::new(), hasher)
    }

    /// Creates an empty map with the given configuration and hasher and
    /// the default comparator.
    pub fn with_config_and_hasher(config: TrieConfig, hasher: S) -> Self {
        Self::with_config_hasher_and_eq(config, hasher, BytesEqual)
    }
}

impl<V, S, E> TrieMap<V, S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    /// Creates an empty map with the given configuration, hasher and
    /// key comparator.
    ///
    /// The comparator must be consistent with the hasher: keys that
    /// compare equal must hash identically.
    pub fn with_config_hasher_and_eq(config: TrieConfig, hasher: S, key_eq: E) -> Self {
        TrieMap {
            ht: TrieHash::new(hasher, key_eq, config),
        }
    }

    /// Number of keys in the map.
    #[inline]
    pub fn len(&self) -> usize {
        self.ht.len()
    }

    /// Returns `true` if the map holds no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ht.is_empty()
    }

    /// Upper bound on the number of keys the map can hold.
    #[inline]
    pub fn max_size(&self) -> usize {
        usize::MAX
    }

    /// Longest accepted key, in bytes. Determined by the configured
    /// key-size width (65 534 with the default 16-bit width); inserting
    /// a longer key fails with [`Error::KeyTooLong`].
    #[inline]
    pub fn max_key_size(&self) -> usize {
        self.ht.max_key_size()
    }

    /// The hasher this map was built with.
    #[inline]
    pub fn hasher(&self) -> &S {
        self.ht.hasher()
    }

    /// Number of elements past which a leaf bursts into a trie node.
    #[inline]
    pub fn burst_threshold(&self) -> usize {
        self.ht.burst_threshold()
    }

    /// Changes the burst threshold for subsequent insertions. Values
    /// below [`TrieConfig::MIN_BURST_THRESHOLD`] are clamped up.
    #[inline]
    pub fn set_burst_threshold(&mut self, threshold: usize) {
        self.ht.set_burst_threshold(threshold);
    }

    /// Load factor past which a leaf hash table grows.
    #[inline]
    pub fn max_load_factor(&self) -> f32 {
        self.ht.max_load_factor()
    }

    /// Changes the maximum load factor for leaves created afterwards.
    #[inline]
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        self.ht.set_max_load_factor(max_load_factor);
    }

    /// Removes every key. Invalidates all iterators.
    pub fn clear(&mut self) {
        self.ht.clear();
    }

    /// Inserts `key` with `value` unless the key is already present.
    ///
    /// Returns `Ok(true)` when the key was inserted and `Ok(false)` when
    /// it was already there; an existing value is left untouched (use
    /// [`insert_or_assign`](Self::insert_or_assign) to overwrite).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hat_trie::TrieMap;
    ///
    /// let mut map: TrieMap<i32> = TrieMap::new();
    /// assert!(map.insert("key", 1)?);
    /// assert!(!map.insert("key", 2)?);
    /// assert_eq!(map.get("key"), Some(&1));
    /// # Ok::<(), hat_trie::Error>(())
    /// ```
    pub fn insert(&mut self, key: impl AsRef<[u8]>, value: V) -> Result<bool, Error> {
        self.ht.insert(key.as_ref(), value)
    }

    /// Inserts `key` with `value`, overwriting any existing value.
    /// Returns the previous value if there was one.
    pub fn insert_or_assign(
        &mut self,
        key: impl AsRef<[u8]>,
        value: V,
    ) -> Result<Option<V>, Error> {
        let key = key.as_ref();
        if let Some(slot) = self.ht.get_mut(key) {
            return Ok(Some(mem::replace(slot, value)));
        }
        self.ht.insert(key, value)?;
        Ok(None)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Option<V> {
        self.ht.erase(key.as_ref())
    }

    /// Removes every key starting with `prefix`; returns how many were
    /// removed. `remove_prefix("")` clears the map.
    pub fn remove_prefix(&mut self, prefix: impl AsRef<[u8]>) -> usize {
        self.ht.erase_prefix(prefix.as_ref())
    }

    /// Compacts every leaf: tombstoned value slots are dropped and
    /// bucket arrays are shrunk to what the load factor requires.
    pub fn shrink_to_fit(&mut self) {
        self.ht.shrink_to_fit();
    }

    /// Reference to the value stored under `key`.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<&V> {
        self.ht.get(key.as_ref())
    }

    /// Mutable reference to the value stored under `key`.
    pub fn get_mut(&mut self, key: impl AsRef<[u8]>) -> Option<&mut V> {
        self.ht.get_mut(key.as_ref())
    }

    /// Returns `true` if `key` is in the map.
    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> bool {
        self.ht.contains(key.as_ref())
    }

    /// The longest stored key that is a prefix of `key`, with its
    /// value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hat_trie::TrieMap;
    ///
    /// let mut map: TrieMap<i32> = TrieMap::new();
    /// map.insert("/foo", 1)?;
    /// map.insert("/foo/bar", 2)?;
    ///
    /// let (key, value) = map.longest_prefix("/foo/baz").unwrap();
    /// assert_eq!((key.as_slice(), value), (b"/foo".as_slice(), &1));
    /// assert!(map.longest_prefix("/bar").is_none());
    /// # Ok::<(), hat_trie::Error>(())
    /// ```
    pub fn longest_prefix(&self, key: impl AsRef<[u8]>) -> Option<(Vec<u8>, &V)> {
        let key = key.as_ref();
        let (len, value) = self.ht.longest_prefix(key)?;
        Some((key[..len].to_vec(), value))
    }

    /// Iterator over all `(key, value)` pairs.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            raw: self.ht.iter(),
        }
    }

    /// Iterator over all pairs with mutable value references.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut {
            raw: self.ht.iter(),
        }
    }

    /// Iterator over the keys.
    pub fn keys(&self) -> Keys<'_, V> {
        Keys {
            raw: self.ht.iter(),
        }
    }

    /// Iterator over the values. Cheaper than [`iter`](Self::iter)
    /// since keys are not reconstructed.
    pub fn values(&self) -> Values<'_, V> {
        Values {
            raw: self.ht.iter(),
        }
    }

    /// Iterator over mutable value references.
    pub fn values_mut(&mut self) -> ValuesMut<'_, V> {
        ValuesMut {
            raw: self.ht.iter(),
        }
    }

    /// Iterator over every `(key, value)` pair whose key starts with
    /// `prefix`. The matching keys form one contiguous range of the
    /// map's iteration order.
    pub fn iter_prefix(&self, prefix: impl AsRef<[u8]>) -> PrefixIter<'_, V> {
        PrefixIter {
            raw: self.ht.prefix_iter(prefix.as_ref()),
        }
    }

    /// Like [`iter_prefix`](Self::iter_prefix) with mutable value
    /// references.
    pub fn iter_prefix_mut(&mut self, prefix: impl AsRef<[u8]>) -> PrefixIterMut<'_, V> {
        PrefixIterMut {
            raw: self.ht.prefix_iter(prefix.as_ref()),
        }
    }

    /// In-place view of the entry for `key`, occupied or vacant.
    ///
    /// Fails with [`Error::KeyTooLong`] when `key` exceeds
    /// [`max_key_size`](Self::max_key_size).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hat_trie::TrieMap;
    ///
    /// let mut counts: TrieMap<u64> = TrieMap::new();
    /// for word in ["the", "quick", "the"] {
    ///     *counts.entry(word)?.or_insert(0) += 1;
    /// }
    /// assert_eq!(counts.get("the"), Some(&2));
    /// # Ok::<(), hat_trie::Error>(())
    /// ```
    pub fn entry(&mut self, key: impl AsRef<[u8]>) -> Result<Entry<'_, V, S, E>, Error> {
        let key = key.as_ref();
        if key.len() > self.max_key_size() {
            return Err(Error::KeyTooLong {
                len: key.len(),
                max_len: self.max_key_size(),
            });
        }
        let key = key.to_vec();
        if self.ht.contains(&key) {
            Ok(Entry::Occupied(OccupiedEntry { map: self, key }))
        } else {
            Ok(Entry::Vacant(VacantEntry { map: self, key }))
        }
    }
}

impl<V, S, E> TrieMap<V, S, E>
where
    V: SerializeValue,
    S: BuildHasher,
    E: KeyEqual,
{
    /// Writes the map, configuration included, to `writer` in a stable
    /// little-endian format.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        self.ht.serialize(writer)
    }

    /// Reads a map previously written by [`serialize`](Self::serialize).
    ///
    /// Pass `hash_compatible = true` only when the deserializing hasher
    /// is interchangeable with the serializing one: the leaf tables are
    /// then rebuilt bucket-for-bucket without rehashing. With
    /// `hash_compatible = false` every key is re-inserted under this
    /// instance's hasher, which is always correct.
    pub fn deserialize<R: Read>(reader: &mut R, hash_compatible: bool) -> Result<Self, Error>
    where
        S: Default,
        E: Default,
    {
        Self::deserialize_with_hasher(reader, S::default(), hash_compatible)
    }

    /// [`deserialize`](Self::deserialize) with an explicit hasher.
    pub fn deserialize_with_hasher<R: Read>(
        reader: &mut R,
        hasher: S,
        hash_compatible: bool,
    ) -> Result<Self, Error>
    where
        E: Default,
    {
        Ok(TrieMap {
            ht: TrieHash::deserialize(reader, hasher, E::default(), hash_compatible)?,
        })
    }

    /// [`deserialize`](Self::deserialize) with an explicit hasher and
    /// key comparator.
    pub fn deserialize_with_hasher_and_eq<R: Read>(
        reader: &mut R,
        hasher: S,
        key_eq: E,
        hash_compatible: bool,
    ) -> Result<Self, Error> {
        Ok(TrieMap {
            ht: TrieHash::deserialize(reader, hasher, key_eq, hash_compatible)?,
        })
    }
}

impl<V, S, E> Default for TrieMap<V, S, E>
where
    S: BuildHasher + Default,
    E: KeyEqual + Default,
{
    fn default() -> Self {
        Self::with_config_hasher_and_eq(TrieConfig::new(), S::default(), E::default())
    }
}

impl<V, S, E> Clone for TrieMap<V, S, E>
where
    V: Clone,
    S: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        TrieMap {
            ht: self.ht.clone(),
        }
    }
}

impl<V, S, E> Debug for TrieMap<V, S, E>
where
    V: Debug,
    S: BuildHasher,
    E: KeyEqual,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.iter() {
            map.entry(&String::from_utf8_lossy(&key), value);
        }
        map.finish()
    }
}

/// Content equality: same size and every key maps to an equal value.
/// Burst structure and iteration order are irrelevant.
impl<V, S, E> PartialEq for TrieMap<V, S, E>
where
    V: PartialEq,
    S: BuildHasher,
    E: KeyEqual,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(key, value)| other.get(&key) == Some(value))
    }
}

impl<V, S, E> Eq for TrieMap<V, S, E>
where
    V: Eq,
    S: BuildHasher,
    E: KeyEqual,
{
}

impl<K, V, S, E> FromIterator<(K, V)> for TrieMap<V, S, E>
where
    K: AsRef<[u8]>,
    S: BuildHasher + Default,
    E: KeyEqual + Default,
{
    /// # Panics
    ///
    /// Panics if a key exceeds [`max_key_size`](TrieMap::max_key_size).
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = TrieMap::default();
        map.extend(iter);
        map
    }
}

impl<K, V, S, E> Extend<(K, V)> for TrieMap<V, S, E>
where
    K: AsRef<[u8]>,
    S: BuildHasher,
    E: KeyEqual,
{
    /// Inserts every pair, overwriting existing keys.
    ///
    /// # Panics
    ///
    /// Panics if a key exceeds [`max_key_size`](TrieMap::max_key_size).
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            if let Err(err) = self.insert_or_assign(key.as_ref(), value) {
                panic!("failed to insert key: {}", err);
            }
        }
    }
}

impl<'a, V, S, E> IntoIterator for &'a TrieMap<V, S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    type Item = (Vec<u8>, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Iter<'a, V> {
        self.iter()
    }
}

/// A view into a single map entry, returned by [`TrieMap::entry`].
pub enum Entry<'a, V, S = Fnv1aBuildHasher, E = BytesEqual> {
    /// The key is present.
    Occupied(OccupiedEntry<'a, V, S, E>),
    /// The key is absent.
    Vacant(VacantEntry<'a, V, S, E>),
}

impl<'a, V, S, E> Entry<'a, V, S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    /// The key this entry addresses.
    pub fn key(&self) -> &[u8] {
        match self {
            Entry::Occupied(entry) => entry.key(),
            Entry::Vacant(entry) => entry.key(),
        }
    }

    /// Inserts `default` if vacant; returns the value either way.
    ///
    /// # Panics
    ///
    /// Panics if the insertion hits the configured index-size capacity
    /// ([`Error::CapacityExceeded`]), which requires a burst threshold
    /// raised past the index width's range.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts the result of `default` if vacant; returns the value
    /// either way.
    ///
    /// # Panics
    ///
    /// As [`or_insert`](Self::or_insert).
    pub fn or_insert_with<F: FnOnce() -> V>(self, default: F) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Inserts `V::default()` if vacant; returns the value either way.
    ///
    /// # Panics
    ///
    /// As [`or_insert`](Self::or_insert).
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(V::default)
    }

    /// Applies `f` to the value if occupied.
    pub fn and_modify<F: FnOnce(&mut V)>(mut self, f: F) -> Self {
        if let Entry::Occupied(entry) = &mut self {
            f(entry.get_mut());
        }
        self
    }
}

/// A view into an occupied map entry.
pub struct OccupiedEntry<'a, V, S = Fnv1aBuildHasher, E = BytesEqual> {
    map: &'a mut TrieMap<V, S, E>,
    key: Vec<u8>,
}

impl<'a, V, S, E> OccupiedEntry<'a, V, S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    /// The entry's key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Reference to the stored value.
    pub fn get(&self) -> &V {
        self.map
            .ht
            .get(&self.key)
            .expect("occupied entry without a value")
    }

    /// Mutable reference to the stored value.
    pub fn get_mut(&mut self) -> &mut V {
        self.map
            .ht
            .get_mut(&self.key)
            .expect("occupied entry without a value")
    }

    /// Consumes the entry, returning a reference bound to the map.
    pub fn into_mut(self) -> &'a mut V {
        self.map
            .ht
            .get_mut(&self.key)
            .expect("occupied entry without a value")
    }

    /// Replaces the stored value, returning the old one.
    pub fn insert(&mut self, value: V) -> V {
        mem::replace(self.get_mut(), value)
    }

    /// Removes the entry, returning its value. Empty leaves left behind
    /// are collapsed exactly as with [`TrieMap::remove`].
    pub fn remove(self) -> V {
        self.map
            .ht
            .erase(&self.key)
            .expect("occupied entry without a value")
    }
}

/// A view into a vacant map entry.
pub struct VacantEntry<'a, V, S = Fnv1aBuildHasher, E = BytesEqual> {
    map: &'a mut TrieMap<V, S, E>,
    key: Vec<u8>,
}

impl<'a, V, S, E> VacantEntry<'a, V, S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    /// The key that would be inserted.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Consumes the entry, returning its key.
    pub fn into_key(self) -> Vec<u8> {
        self.key
    }

    /// Inserts `value`, returning a reference to it.
    ///
    /// # Panics
    ///
    /// Panics on [`Error::CapacityExceeded`]; see
    /// [`Entry::or_insert`].
    pub fn insert(self, value: V) -> &'a mut V {
        let VacantEntry { map, key } = self;
        if let Err(err) = map.ht.insert(&key, value) {
            panic!("failed to insert into vacant entry: {}", err);
        }
        map.ht.get_mut(&key).expect("value was just inserted")
    }
}

/// Iterator over the `(key, value)` pairs of a [`TrieMap`].
pub struct Iter<'a, V> {
    raw: RawIter<'a, V>,
}

impl<'a, V: 'a> Iterator for Iter<'a, V> {
    type Item = (Vec<u8>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: the cursor is live under the `'a` borrow this
        // iterator holds on the map.
        unsafe { Some((cursor.key_bytes(), cursor.value_ref())) }
    }
}

/// Iterator over the pairs of a [`TrieMap`] with mutable values.
pub struct IterMut<'a, V> {
    raw: RawIter<'a, V>,
}

impl<'a, V: 'a> Iterator for IterMut<'a, V> {
    type Item = (Vec<u8>, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: the cursor is live under the exclusive `'a` borrow
        // this iterator holds on the map, and each position is visited
        // once, so the yielded references never alias.
        unsafe { Some((cursor.key_bytes(), cursor.value_mut())) }
    }
}

/// Iterator over the keys of a [`TrieMap`].
pub struct Keys<'a, V> {
    raw: RawIter<'a, V>,
}

impl<'a, V> Iterator for Keys<'a, V> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: live cursor under the iterator's borrow.
        unsafe { Some(cursor.key_bytes()) }
    }
}

/// Iterator over the values of a [`TrieMap`]. Skips key
/// reconstruction.
pub struct Values<'a, V> {
    raw: RawIter<'a, V>,
}

impl<'a, V: 'a> Iterator for Values<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: live cursor under the iterator's borrow.
        unsafe { Some(cursor.value_ref()) }
    }
}

/// Iterator over mutable values of a [`TrieMap`].
pub struct ValuesMut<'a, V> {
    raw: RawIter<'a, V>,
}

impl<'a, V: 'a> Iterator for ValuesMut<'a, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<&'a mut V> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: as for `IterMut`.
        unsafe { Some(cursor.value_mut()) }
    }
}

/// Iterator over the pairs of a [`TrieMap`] whose keys start with a
/// prefix.
pub struct PrefixIter<'a, V> {
    raw: RawPrefixIter<'a, V>,
}

impl<'a, V: 'a> Iterator for PrefixIter<'a, V> {
    type Item = (Vec<u8>, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: live cursor under the iterator's borrow.
        unsafe { Some((cursor.key_bytes(), cursor.value_ref())) }
    }
}

/// Mutable-value variant of [`PrefixIter`].
pub struct PrefixIterMut<'a, V> {
    raw: RawPrefixIter<'a, V>,
}

impl<'a, V: 'a> Iterator for PrefixIterMut<'a, V> {
    type Item = (Vec<u8>, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: as for `IterMut`.
        unsafe { Some((cursor.key_bytes(), cursor.value_mut())) }
    }
}
