use core::fmt::Debug;
use core::hash::BuildHasher;
use std::io::Read;
use std::io::Write;

use crate::config::TrieConfig;
use crate::error::Error;
use crate::hash::BytesEqual;
use crate::hash::Fnv1aBuildHasher;
use crate::hash::KeyEqual;
use crate::trie_hash::RawIter;
use crate::trie_hash::RawPrefixIter;
use crate::trie_hash::SetValues;
use crate::trie_hash::TrieHash;

/// A set of byte-string keys, implemented as a HAT-trie.
///
/// The set interface over the same engine as [`TrieMap`]: bucket
/// entries carry no value index and no value vector is kept, so the
/// per-key overhead is the length field alone (two bytes by default)
/// plus the key bytes themselves.
///
/// # Examples
///
/// ```rust
/// use hat_trie::TrieSet;
///
/// let mut set = TrieSet::new();
/// set.insert("/usr/bin")?;
/// set.insert("/usr/lib")?;
/// set.insert("/var/log")?;
///
/// assert!(set.contains("/usr/bin"));
/// assert_eq!(set.iter_prefix("/usr").count(), 2);
/// assert_eq!(set.remove_prefix("/usr"), 2);
/// # Ok::<(), hat_trie::Error>(())
/// ```
///
/// [`TrieMap`]: crate::TrieMap
pub struct TrieSet<S = Fnv1aBuildHasher, E = BytesEqual> {
    ht: TrieHash<SetValues, S, E>,
}

impl TrieSet {
    /// Creates an empty set with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TrieConfig::new())
    }

    /// Creates an empty set with the given configuration.
    pub fn with_config(config: TrieConfig) -> Self {
        Self::with_config_hasher_and_eq(config, Fnv1aBuildHasher, BytesEqual)
    }
}

impl<S> TrieSet<S>
where
    S: BuildHasher,
{
    /// Creates an empty set with the default configuration and the
    /// given hasher.
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_config_and_hasher(TrieConfig::new(), hasher)
    }

    /// Creates an empty set with the given configuration and hasher and
    /// the default comparator.
    pub fn with_config_and_hasher(config: TrieConfig, hasher: S) -> Self {
        Self::with_config_hasher_and_eq(config, hasher, BytesEqual)
    }
}

impl<S, E> TrieSet<S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    /// Creates an empty set with the given configuration, hasher and
    /// key comparator.
    pub fn with_config_hasher_and_eq(config: TrieConfig, hasher: S, key_eq: E) -> Self {
        TrieSet {
            ht: TrieHash::new(hasher, key_eq, config),
        }
    }

    /// Number of keys in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.ht.len()
    }

    /// Returns `true` if the set holds no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ht.is_empty()
    }

    /// Upper bound on the number of keys the set can hold.
    #[inline]
    pub fn max_size(&self) -> usize {
        usize::MAX
    }

    /// Longest accepted key, in bytes.
    #[inline]
    pub fn max_key_size(&self) -> usize {
        self.ht.max_key_size()
    }

    /// The hasher this set was built with.
    #[inline]
    pub fn hasher(&self) -> &S {
        self.ht.hasher()
    }

    /// Number of elements past which a leaf bursts into a trie node.
    #[inline]
    pub fn burst_threshold(&self) -> usize {
        self.ht.burst_threshold()
    }

    /// Changes the burst threshold for subsequent insertions.
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

    /// Inserts `key`. Returns `Ok(true)` when the key was absent.
    pub fn insert(&mut self, key: impl AsRef<[u8]>) -> Result<bool, Error> {
        self.ht.insert(key.as_ref(), ())
    }

    /// Inserts `prefix` concatenated with each of `keys`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hat_trie::TrieSet;
    ///
    /// let mut set = TrieSet::new();
    /// set.insert_with_prefix("/etc/", ["hosts", "passwd"])?;
    /// assert!(set.contains("/etc/hosts"));
    /// assert!(set.contains("/etc/passwd"));
    /// # Ok::<(), hat_trie::Error>(())
    /// ```
    pub fn insert_with_prefix<I>(&mut self, prefix: impl AsRef<[u8]>, keys: I) -> Result<(), Error>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let prefix = prefix.as_ref();
        let mut buffer = Vec::with_capacity(prefix.len() + 16);
        for key in keys {
            buffer.clear();
            buffer.extend_from_slice(prefix);
            buffer.extend_from_slice(key.as_ref());
            self.ht.insert(&buffer, ())?;
        }
        Ok(())
    }

    /// Removes `key`. Returns `true` when the key was present.
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> bool {
        self.ht.erase(key.as_ref()).is_some()
    }

    /// Removes every key starting with `prefix`; returns how many.
    pub fn remove_prefix(&mut self, prefix: impl AsRef<[u8]>) -> usize {
        self.ht.erase_prefix(prefix.as_ref())
    }

    /// Compacts every leaf table.
    pub fn shrink_to_fit(&mut self) {
        self.ht.shrink_to_fit();
    }

    /// Returns `true` if `key` is in the set.
    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        self.ht.contains(key.as_ref())
    }

    /// The longest stored key that is a prefix of `key`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hat_trie::TrieSet;
    ///
    /// let mut set = TrieSet::new();
    /// set.insert("/foo")?;
    /// set.insert("/foo/bar")?;
    ///
    /// assert_eq!(set.longest_prefix("/foo/baz"), Some(b"/foo".to_vec()));
    /// assert_eq!(set.longest_prefix("/bar"), None);
    /// # Ok::<(), hat_trie::Error>(())
    /// ```
    pub fn longest_prefix(&self, key: impl AsRef<[u8]>) -> Option<Vec<u8>> {
        let key = key.as_ref();
        let (len, _) = self.ht.longest_prefix(key)?;
        Some(key[..len].to_vec())
    }

    /// Iterator over all keys.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            raw: self.ht.iter(),
        }
    }

    /// Iterator over the keys starting with `prefix`.
    pub fn iter_prefix(&self, prefix: impl AsRef<[u8]>) -> PrefixIter<'_> {
        PrefixIter {
            raw: self.ht.prefix_iter(prefix.as_ref()),
        }
    }

    /// Writes the set, configuration included, to `writer`.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        self.ht.serialize(writer)
    }

    /// Reads a set previously written by [`serialize`](Self::serialize);
    /// see [`TrieMap::deserialize`](crate::TrieMap::deserialize) for the
    /// `hash_compatible` contract.
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
        Ok(TrieSet {
            ht: TrieHash::deserialize(reader, hasher, E::default(), hash_compatible)?,
        })
    }
}

impl<S, E> Default for TrieSet<S, E>
where
    S: BuildHasher + Default,
    E: KeyEqual + Default,
{
    fn default() -> Self {
        Self::with_config_hasher_and_eq(TrieConfig::new(), S::default(), E::default())
    }
}

impl<S, E> Clone for TrieSet<S, E>
where
    S: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        TrieSet {
            ht: self.ht.clone(),
        }
    }
}

impl<S, E> Debug for TrieSet<S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut set = f.debug_set();
        for key in self.iter() {
            set.entry(&String::from_utf8_lossy(&key));
        }
        set.finish()
    }
}

/// Content equality: same size and every key of one present in the
/// other.
impl<S, E> PartialEq for TrieSet<S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|key| other.contains(&key))
    }
}

impl<S, E> Eq for TrieSet<S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
}

impl<K, S, E> FromIterator<K> for TrieSet<S, E>
where
    K: AsRef<[u8]>,
    S: BuildHasher + Default,
    E: KeyEqual + Default,
{
    /// # Panics
    ///
    /// Panics if a key exceeds [`max_key_size`](TrieSet::max_key_size).
    fn from_iter<T: IntoIterator<Item = K>>(iter: T) -> Self {
        let mut set = TrieSet::default();
        set.extend(iter);
        set
    }
}

impl<K, S, E> Extend<K> for TrieSet<S, E>
where
    K: AsRef<[u8]>,
    S: BuildHasher,
    E: KeyEqual,
{
    /// # Panics
    ///
    /// Panics if a key exceeds [`max_key_size`](TrieSet::max_key_size).
    fn extend<T: IntoIterator<Item = K>>(&mut self, iter: T) {
        for key in iter {
            if let Err(err) = self.insert(key.as_ref()) {
                panic!("failed to insert key: {}", err);
            }
        }
    }
}

impl<'a, S, E> IntoIterator for &'a TrieSet<S, E>
where
    S: BuildHasher,
    E: KeyEqual,
{
    type Item = Vec<u8>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Iterator over the keys of a [`TrieSet`].
pub struct Iter<'a> {
    raw: RawIter<'a, ()>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: live cursor under the iterator's borrow of the set.
        unsafe { Some(cursor.key_bytes()) }
    }
}

/// Iterator over the keys of a [`TrieSet`] that start with a prefix.
pub struct PrefixIter<'a> {
    raw: RawPrefixIter<'a, ()>,
}

impl<'a> Iterator for PrefixIter<'a> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let cursor = self.raw.next_cursor()?;
        // SAFETY: live cursor under the iterator's borrow of the set.
        unsafe { Some(cursor.key_bytes()) }
    }
}
