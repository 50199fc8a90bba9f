//! The HAT-trie engine shared by [`TrieMap`] and [`TrieSet`].
//!
//! A HAT-trie is a burst trie whose leaves are array-hash tables: the
//! upper part of the structure is a 256-way trie branching on one key
//! byte per level, and each leaf stores the remaining key suffixes in a
//! packed string hash table (see [`crate::array_hash`]). Lookups descend
//! one byte at a time until they either run out of key at a trie node
//! (the node's value slot is the answer) or reach a hash node (the
//! table is probed with the remaining suffix).
//!
//! ## Bursting
//!
//! Fresh tries start as a single hash node. When an insertion finds a
//! leaf holding `burst_threshold` elements, the leaf is *burst*: a new
//! trie node is allocated, every stored suffix is redistributed into a
//! child hash node selected by its first byte (the zero-length suffix
//! moves into the trie node's value slot), and the new node replaces the
//! leaf. Children are sized from a first-byte histogram so the
//! redistribution does not immediately rehash, and any child that still
//! exceeds the threshold — all suffixes can share a first byte — is
//! burst again before the insertion resumes. In Rust moving the values
//! cannot fail, so a burst is a pure build-then-swap: the old leaf is
//! dropped only once the replacement subtree is complete.
//!
//! ## Collapsing
//!
//! Erasure reverses the density: a hash node left empty is unlinked, and
//! if that leaves a chain of valueless single-child trie nodes, the
//! survivor is re-parented upward until the tree is minimal again. The
//! matching rule for trie nodes keeps a node alive only while it holds a
//! value or a child.
//!
//! ## Cursors
//!
//! Iteration has to walk two structurally different node kinds while
//! remembering enough to rebuild keys. A [`RawCursor`] is a small state
//! machine with two live states — reading a trie node's value slot, or
//! reading one entry of a hash node's table — plus the end state. The
//! key of the current position is reconstructed by walking the parent
//! links to the root and reversing the collected edge bytes. Parent
//! links are weak: the tree owns its nodes through the child slots and
//! the back-pointers are only followed under a borrow of the whole trie.
//!
//! All mutation invalidates all cursors; the public iterator types tie
//! themselves to a borrow of the container so the compiler enforces it.
//!
//! [`TrieMap`]: crate::TrieMap
//! [`TrieSet`]: crate::TrieSet

use core::hash::BuildHasher;
use core::marker::PhantomData;
use core::ptr;
use std::io::Read;
use std::io::Write;

use crate::array_hash::ArrayCursor;
use crate::array_hash::ArrayHash;
use crate::array_hash::EntryLayout;
use crate::config::GrowthPolicy;
use crate::config::TrieConfig;
use crate::error::Error;
use crate::hash::KeyEqual;
use crate::serialize::read_len_prefixed;
use crate::serialize::read_length;
use crate::serialize::write_len_prefixed;
use crate::serialize::SerializeValue;

const ALPHABET_SIZE: usize = 256;

/// Bucket count for a hash node created outside a burst.
const HASH_NODE_DEFAULT_BUCKET_COUNT: usize = 32;

/// Serialization format version.
const SERIAL_VERSION: u32 = 1;

const NODE_TAG_NONE: u8 = 0;
const NODE_TAG_HASH: u8 = 1;
const NODE_TAG_TRIE: u8 = 2;

/// Compile-time bridge between map mode (entries carry values) and set
/// mode (entries are bare keys, `Value` is `()`).
pub(crate) trait ValuePolicy {
    /// The stored value type.
    type Value;

    /// Whether bucket entries carry a value index and the tables keep a
    /// value vector.
    const STORED: bool;

    /// Converts an owned value into what the array-hash stores.
    fn store(value: Self::Value) -> Option<Self::Value>;

    /// Reconstitutes a value from what the array-hash handed back.
    fn materialize(taken: Option<Self::Value>) -> Self::Value;
}

/// Map mode: every entry owns a `V`.
pub(crate) struct MapValues<V>(PhantomData<V>);

impl<V> ValuePolicy for MapValues<V> {
    type Value = V;

    const STORED: bool = true;

    #[inline]
    fn store(value: V) -> Option<V> {
        Some(value)
    }

    #[inline]
    fn materialize(taken: Option<V>) -> V {
        taken.expect("map entry without a stored value")
    }
}

/// Set mode: membership only.
pub(crate) struct SetValues;

impl ValuePolicy for SetValues {
    type Value = ();

    const STORED: bool = false;

    #[inline]
    fn store(_value: ()) -> Option<()> {
        None
    }

    #[inline]
    fn materialize(_taken: Option<()>) {}
}

/// A child is either an internal trie node or a leaf hash node. The tag
/// is matched explicitly everywhere; the two layouts stay independent.
pub(crate) enum Node<V> {
    Trie(Box<TrieNode<V>>),
    Hash(Box<HashNode<V>>),
}

impl<V> Node<V> {
    #[inline]
    fn child_of_byte(&self) -> u8 {
        match self {
            Node::Trie(node) => node.child_of_byte,
            Node::Hash(node) => node.child_of_byte,
        }
    }

    #[inline]
    fn set_child_of_byte(&mut self, byte: u8) {
        match self {
            Node::Trie(node) => node.child_of_byte = byte,
            Node::Hash(node) => node.child_of_byte = byte,
        }
    }
}

/// Internal 256-way branching node.
///
/// `parent` is a non-owning back-pointer used only for iterator ascent
/// and collapse; ownership always flows root-to-leaf through `children`.
/// Box addresses are stable, so the pointer survives the owning slot
/// moving around.
pub(crate) struct TrieNode<V> {
    parent: *mut TrieNode<V>,
    child_of_byte: u8,
    value: Option<V>,
    children: [Option<Node<V>>; ALPHABET_SIZE],
}

impl<V> TrieNode<V> {
    fn new(parent: *mut TrieNode<V>, child_of_byte: u8) -> TrieNode<V> {
        TrieNode {
            parent,
            child_of_byte,
            value: None,
            children: core::array::from_fn(|_| None),
        }
    }

    #[inline]
    fn first_child(&self) -> Option<&Node<V>> {
        self.children.iter().flatten().next()
    }

    /// First child at or after slot `start`, in slot order. Slot order is
    /// the only ordering the trie exposes.
    #[inline]
    fn next_child_from(&self, start: usize) -> Option<&Node<V>> {
        self.children[start..].iter().flatten().next()
    }

    #[inline]
    fn has_children(&self) -> bool {
        self.children.iter().any(Option::is_some)
    }

    #[inline]
    fn nb_children(&self) -> usize {
        self.children.iter().flatten().count()
    }
}

/// Leaf node: a wrapper around an array-hash of key suffixes.
pub(crate) struct HashNode<V> {
    child_of_byte: u8,
    table: ArrayHash<V>,
}

impl<V> HashNode<V> {
    fn new(
        child_of_byte: u8,
        min_bucket_count: usize,
        layout: EntryLayout,
        growth_policy: GrowthPolicy,
        max_load_factor: f32,
    ) -> HashNode<V> {
        HashNode {
            child_of_byte,
            table: ArrayHash::with_bucket_count(
                min_bucket_count,
                layout,
                growth_policy,
                max_load_factor,
            ),
        }
    }
}

/// Drops a subtree without recursing through the ownership chain.
fn drop_node<V>(node: Node<V>) {
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if let Node::Trie(mut trie) = node {
            for child in trie.children.iter_mut() {
                if let Some(child) = child.take() {
                    stack.push(child);
                }
            }
        }
    }
}

/// Number of keys stored in a subtree.
fn node_len<V>(node: &Node<V>) -> usize {
    let mut count = 0;
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        match node {
            Node::Hash(hash) => count += hash.table.len(),
            Node::Trie(trie) => {
                if trie.value.is_some() {
                    count += 1;
                }
                stack.extend(trie.children.iter().flatten());
            }
        }
    }
    count
}

/// Deep copy of a subtree with parent links rebuilt, iteratively.
fn clone_node<V: Clone>(node: &Node<V>) -> Node<V> {
    match node {
        Node::Hash(hash) => Node::Hash(Box::new(HashNode {
            child_of_byte: hash.child_of_byte,
            table: hash.table.clone(),
        })),
        Node::Trie(src_root) => {
            let mut dst_root = Box::new(TrieNode::new(ptr::null_mut(), src_root.child_of_byte));
            dst_root.value = src_root.value.clone();

            let src: &TrieNode<V> = src_root;
            let dst: *mut TrieNode<V> = &mut *dst_root;
            let mut stack: Vec<(&TrieNode<V>, *mut TrieNode<V>)> = vec![(src, dst)];
            while let Some((src, dst_ptr)) = stack.pop() {
                for (slot, child) in src.children.iter().enumerate() {
                    let Some(child) = child else { continue };
                    match child {
                        Node::Hash(hash) => {
                            let copy = Node::Hash(Box::new(HashNode {
                                child_of_byte: hash.child_of_byte,
                                table: hash.table.clone(),
                            }));
                            // SAFETY: `dst_ptr` points at a live node of
                            // the tree under construction; nothing else
                            // aliases it while the stack is drained.
                            unsafe {
                                (*dst_ptr).children[slot] = Some(copy);
                            }
                        }
                        Node::Trie(trie) => {
                            let mut copy = Box::new(TrieNode::new(dst_ptr, trie.child_of_byte));
                            copy.value = trie.value.clone();
                            let copy_ptr: *mut TrieNode<V> = &mut *copy;
                            // SAFETY: as above.
                            unsafe {
                                (*dst_ptr).children[slot] = Some(Node::Trie(copy));
                            }
                            stack.push((trie, copy_ptr));
                        }
                    }
                }
            }

            Node::Trie(dst_root)
        }
    }
}

/// Position inside the trie: reading a trie node's value slot, reading
/// one hash-table entry, or the end state (all fields null).
///
/// Cursors hold raw pointers and are only dereferenced under a borrow of
/// the owning trie; every mutation invalidates them.
pub(crate) struct RawCursor<V> {
    /// Current trie node: the value holder when `read_trie_value`, the
    /// hash node's parent otherwise (null for a root hash node).
    trie_node: *const TrieNode<V>,
    hash_node: *const HashNode<V>,
    array_cursor: ArrayCursor,
    read_trie_value: bool,
}

impl<V> Clone for RawCursor<V> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for RawCursor<V> {}

impl<V> PartialEq for RawCursor<V> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        // Constructors normalize unused fields, so field-wise equality
        // matches positional equality.
        self.trie_node == other.trie_node
            && self.hash_node == other.hash_node
            && self.array_cursor == other.array_cursor
            && self.read_trie_value == other.read_trie_value
    }
}

impl<V> RawCursor<V> {
    #[inline]
    fn end() -> RawCursor<V> {
        RawCursor {
            trie_node: ptr::null(),
            hash_node: ptr::null(),
            array_cursor: ArrayCursor { bucket: 0, offset: 0 },
            read_trie_value: false,
        }
    }

    #[inline]
    fn at_trie_value(node: &TrieNode<V>) -> RawCursor<V> {
        debug_assert!(node.value.is_some());
        RawCursor {
            trie_node: node,
            hash_node: ptr::null(),
            array_cursor: ArrayCursor { bucket: 0, offset: 0 },
            read_trie_value: true,
        }
    }

    #[inline]
    fn in_hash_node(
        parent: *const TrieNode<V>,
        node: &HashNode<V>,
        array_cursor: ArrayCursor,
    ) -> RawCursor<V> {
        RawCursor {
            trie_node: parent,
            hash_node: node,
            array_cursor,
            read_trie_value: false,
        }
    }

    #[inline]
    pub(crate) fn is_end(&self) -> bool {
        self.trie_node.is_null() && self.hash_node.is_null()
    }

    /// First position of the subtree `node`, whose parent trie node is
    /// `parent`. Descends to the most-left value: a trie value slot wins
    /// over any deeper entry.
    fn descend_first(node: &Node<V>, parent: *const TrieNode<V>) -> RawCursor<V> {
        let mut parent = parent;
        let mut node = node;
        loop {
            match node {
                Node::Hash(hash) => {
                    let first = hash
                        .table
                        .first_cursor()
                        .expect("reachable hash node with an empty table");
                    return RawCursor::in_hash_node(parent, hash, first);
                }
                Node::Trie(trie) => {
                    if trie.value.is_some() {
                        return RawCursor::at_trie_value(trie);
                    }
                    parent = &**trie;
                    node = trie
                        .first_child()
                        .expect("trie node without value or children");
                }
            }
        }
    }

    /// Next position after the child `after` of the trie node chain
    /// starting at `trie_node`: scans the remaining siblings, ascending
    /// on exhaustion.
    ///
    /// # Safety
    ///
    /// `trie_node` must point into a tree that is alive and unaliased
    /// for writes for the duration of the call.
    unsafe fn next_sibling(trie_node: *const TrieNode<V>, after: u8) -> RawCursor<V> {
        let mut trie_node = trie_node;
        let mut after = after;
        loop {
            if trie_node.is_null() {
                return RawCursor::end();
            }
            // SAFETY: guaranteed by the caller; parent links stay valid
            // while the tree is borrowed.
            let node = unsafe { &*trie_node };
            if let Some(child) = node.next_child_from(after as usize + 1) {
                return RawCursor::descend_first(child, node);
            }
            after = node.child_of_byte;
            trie_node = node.parent;
        }
    }

    /// The position after `self` in iteration order.
    ///
    /// # Safety
    ///
    /// `self` must be a live, non-end cursor into a tree that is not
    /// mutated for the duration of the call.
    pub(crate) unsafe fn advance(self) -> RawCursor<V> {
        debug_assert!(!self.is_end());
        if self.read_trie_value {
            // SAFETY: live cursor per the caller's contract.
            let node = unsafe { &*self.trie_node };
            if let Some(child) = node.first_child() {
                RawCursor::descend_first(child, node)
            } else {
                // SAFETY: parent links are valid while the tree lives.
                unsafe { RawCursor::next_sibling(node.parent, node.child_of_byte) }
            }
        } else {
            // SAFETY: live cursor per the caller's contract.
            let hash = unsafe { &*self.hash_node };
            if let Some(next) = hash.table.next_cursor(self.array_cursor) {
                RawCursor::in_hash_node(self.trie_node, hash, next)
            } else if self.trie_node.is_null() {
                RawCursor::end()
            } else {
                // SAFETY: as above.
                unsafe { RawCursor::next_sibling(self.trie_node, hash.child_of_byte) }
            }
        }
    }

    /// Rebuilds the key of the current position: edge bytes from the
    /// root down to the current trie node, then the hash node's own edge
    /// and the entry's stored suffix.
    ///
    /// # Safety
    ///
    /// Same contract as [`advance`](Self::advance).
    pub(crate) unsafe fn key_bytes(&self) -> Vec<u8> {
        debug_assert!(!self.is_end());
        let mut key = Vec::new();

        let mut trie_node = self.trie_node;
        // SAFETY: live cursor; parent links valid under the borrow.
        while let Some(node) = unsafe { trie_node.as_ref() } {
            if node.parent.is_null() {
                break;
            }
            key.push(node.child_of_byte);
            trie_node = node.parent;
        }
        key.reverse();

        if !self.read_trie_value {
            // SAFETY: non-trie-value cursors always carry a hash node.
            let hash = unsafe { &*self.hash_node };
            if !self.trie_node.is_null() {
                key.push(hash.child_of_byte);
            }
            key.extend_from_slice(hash.table.key_at(self.array_cursor));
        }

        key
    }

    /// Stored suffix bytes of the current hash-table entry.
    ///
    /// # Safety
    ///
    /// Same contract as [`advance`](Self::advance); the cursor must be in
    /// the hash-entry state.
    pub(crate) unsafe fn entry_suffix<'a>(&self) -> &'a [u8]
    where
        V: 'a,
    {
        debug_assert!(!self.read_trie_value && !self.hash_node.is_null());
        // SAFETY: per the contract; the lifetime is constrained by the
        // iterator that owns this cursor.
        unsafe { (*self.hash_node).table.key_at(self.array_cursor) }
    }

    /// Reference to the value at the current position. The unbounded
    /// lifetime is constrained by the borrowing iterator wrappers.
    ///
    /// # Safety
    ///
    /// Same contract as [`advance`](Self::advance).
    pub(crate) unsafe fn value_ref<'a>(&self) -> &'a V {
        debug_assert!(!self.is_end());
        if self.read_trie_value {
            // SAFETY: live cursor in the trie-value state.
            unsafe { &*self.trie_node }
                .value
                .as_ref()
                .expect("cursor reads a trie node without a value")
        } else {
            // SAFETY: live cursor in the hash-entry state.
            unsafe { (*self.hash_node).table.value_at(self.array_cursor) }
        }
    }

    /// Mutable reference to the value at the current position.
    ///
    /// # Safety
    ///
    /// Same contract as [`value_ref`](Self::value_ref), and the caller
    /// must hold the exclusive borrow of the trie that the pointers were
    /// created under.
    pub(crate) unsafe fn value_mut<'a>(&self) -> &'a mut V {
        debug_assert!(!self.is_end());
        if self.read_trie_value {
            // SAFETY: exclusivity is guaranteed by the `&mut` borrow the
            // owning iterator holds on the whole trie.
            unsafe { &mut *(self.trie_node as *mut TrieNode<V>) }
                .value
                .as_mut()
                .expect("cursor reads a trie node without a value")
        } else {
            // SAFETY: as above.
            unsafe { (*(self.hash_node as *mut HashNode<V>)).table.value_at_mut(self.array_cursor) }
        }
    }
}

/// Forward iterator over every position of a trie.
pub(crate) struct RawIter<'a, V> {
    current: RawCursor<V>,
    _marker: PhantomData<&'a ()>,
}

impl<'a, V> RawIter<'a, V> {
    #[inline]
    pub(crate) fn next_cursor(&mut self) -> Option<RawCursor<V>> {
        if self.current.is_end() {
            return None;
        }
        let cursor = self.current;
        // SAFETY: the iterator borrows the trie, so the cursor is live
        // and the tree cannot be mutated.
        self.current = unsafe { cursor.advance() };
        Some(cursor)
    }
}

/// Forward iterator over the positions whose keys start with a prefix.
///
/// The range is `[begin, end)` in iteration order. When the prefix ends
/// inside a hash node, `filter` holds the unconsumed prefix bytes and
/// entries of that node are skipped unless their suffix starts with it.
pub(crate) struct RawPrefixIter<'a, V> {
    current: RawCursor<V>,
    end: RawCursor<V>,
    filter: Vec<u8>,
    _marker: PhantomData<&'a ()>,
}

impl<'a, V> RawPrefixIter<'a, V> {
    pub(crate) fn next_cursor(&mut self) -> Option<RawCursor<V>> {
        loop {
            if self.current.is_end() || self.current == self.end {
                return None;
            }
            let cursor = self.current;
            // SAFETY: the iterator borrows the trie, so the cursor is
            // live and the tree cannot be mutated.
            self.current = unsafe { cursor.advance() };

            if !self.filter.is_empty() {
                // A non-empty filter means the whole range lies inside
                // one hash node, so every cursor is an entry cursor.
                // SAFETY: as above.
                let suffix = unsafe { cursor.entry_suffix() };
                if !suffix.starts_with(&self.filter) {
                    continue;
                }
            }
            return Some(cursor);
        }
    }
}

/// Borrow-splitting context threaded through mutation helpers.
struct Ctx<'a, S, E> {
    hasher: &'a S,
    key_eq: &'a E,
    layout: EntryLayout,
    growth_policy: GrowthPolicy,
    max_load_factor: f32,
    burst_threshold: usize,
}

impl<'a, S, E> Ctx<'a, S, E> {
    fn new_hash_node<V>(&self, child_of_byte: u8, min_bucket_count: usize) -> Box<HashNode<V>> {
        Box::new(HashNode::new(
            child_of_byte,
            min_bucket_count,
            self.layout,
            self.growth_policy,
            self.max_load_factor,
        ))
    }
}

/// What an erase walk found, captured as raw pointers so the collapse
/// can run after the descent borrows end.
enum EraseOutcome<V> {
    FromHashNode {
        value: Option<V>,
        emptied: bool,
        child_of_byte: u8,
        parent: *mut TrieNode<V>,
    },
    FromTrieValue {
        value: V,
        node: *mut TrieNode<V>,
    },
}

/// The HAT-trie engine. `P` selects map or set mode, `S` hashes keys
/// inside the leaf tables, `E` compares them.
pub(crate) struct TrieHash<P: ValuePolicy, S, E> {
    root: Option<Node<P::Value>>,
    nb_elements: usize,
    hasher: S,
    key_eq: E,
    config: TrieConfig,
    layout: EntryLayout,
}

impl<P, S, E> TrieHash<P, S, E>
where
    P: ValuePolicy,
    S: BuildHasher,
    E: KeyEqual,
{
    pub(crate) fn new(hasher: S, key_eq: E, config: TrieConfig) -> Self {
        let layout = EntryLayout::new(
            config.key_size,
            if P::STORED { Some(config.index_size) } else { None },
            config.store_null_terminator,
        );
        TrieHash {
            root: None,
            nb_elements: 0,
            hasher,
            key_eq,
            config,
            layout,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nb_elements
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.nb_elements == 0
    }

    #[inline]
    pub(crate) fn max_key_size(&self) -> usize {
        self.layout.max_key_size()
    }

    #[inline]
    pub(crate) fn hasher(&self) -> &S {
        &self.hasher
    }

    #[inline]
    pub(crate) fn burst_threshold(&self) -> usize {
        self.config.burst_threshold
    }

    /// Values below the minimum are clamped up. Applies to subsequent
    /// insertions; existing nodes are not re-examined.
    #[inline]
    pub(crate) fn set_burst_threshold(&mut self, threshold: usize) {
        self.config.burst_threshold = threshold.max(TrieConfig::MIN_BURST_THRESHOLD);
    }

    #[inline]
    pub(crate) fn max_load_factor(&self) -> f32 {
        self.config.max_load_factor
    }

    /// Applies to hash nodes created afterwards; existing leaves keep
    /// their current load factor until they are rebuilt.
    #[inline]
    pub(crate) fn set_max_load_factor(&mut self, max_load_factor: f32) {
        assert!(max_load_factor > 0.0, "max_load_factor must be positive");
        self.config.max_load_factor = max_load_factor;
    }

    pub(crate) fn clear(&mut self) {
        if let Some(root) = self.root.take() {
            drop_node(root);
        }
        self.nb_elements = 0;
    }

    /// Splits the borrow of `self` into the node tree, the element
    /// count, and the read-only context the mutation helpers need, so
    /// descent can hold the tree mutably while hashing keys.
    fn split_build(&mut self) -> (&mut Option<Node<P::Value>>, &mut usize, Ctx<'_, S, E>) {
        let TrieHash {
            ref mut root,
            ref mut nb_elements,
            ref hasher,
            ref key_eq,
            config,
            layout,
        } = *self;
        (
            root,
            nb_elements,
            Ctx {
                hasher,
                key_eq,
                layout,
                growth_policy: config.growth_policy,
                max_load_factor: config.max_load_factor,
                burst_threshold: config.burst_threshold,
            },
        )
    }

    /// Inserts `key` unless present. Returns whether an insertion
    /// happened; an already-present key is left untouched.
    pub(crate) fn insert(&mut self, key: &[u8], value: P::Value) -> Result<bool, Error> {
        if key.len() > self.layout.max_key_size() {
            return Err(Error::KeyTooLong {
                len: key.len(),
                max_len: self.layout.max_key_size(),
            });
        }

        let (root, nb_elements, ctx) = self.split_build();

        if root.is_none() {
            *root = Some(Node::Hash(
                ctx.new_hash_node(0, HASH_NODE_DEFAULT_BUCKET_COUNT),
            ));
        }

        let mut slot: &mut Option<Node<P::Value>> = root;
        let mut parent: *mut TrieNode<P::Value> = ptr::null_mut();
        let mut depth = 0;
        loop {
            if matches!(slot.as_ref(), Some(Node::Hash(_))) {
                let needs_burst = match slot.as_ref() {
                    Some(Node::Hash(hash)) => hash.table.len() >= ctx.burst_threshold,
                    _ => unreachable!(),
                };
                if needs_burst {
                    let Some(Node::Hash(hash)) = slot.take() else {
                        unreachable!()
                    };
                    let child_of_byte = hash.child_of_byte;
                    let mut burst_node = Self::burst(&ctx, *hash);
                    burst_node.parent = parent;
                    burst_node.child_of_byte = child_of_byte;
                    *slot = Some(Node::Trie(burst_node));
                    // Restart this step: the slot now holds a trie node.
                    continue;
                }

                let Some(Node::Hash(hash)) = slot.as_mut() else {
                    unreachable!()
                };
                let (_, inserted) =
                    hash.table
                        .insert(ctx.hasher, ctx.key_eq, &key[depth..], P::store(value))?;
                if inserted {
                    *nb_elements += 1;
                }
                return Ok(inserted);
            }

            // Move the borrow forward through the trie node.
            let node = slot;
            let Some(Node::Trie(trie)) = node.as_mut() else {
                unreachable!()
            };

            if depth == key.len() {
                if trie.value.is_some() {
                    return Ok(false);
                }
                trie.value = Some(value);
                *nb_elements += 1;
                return Ok(true);
            }

            let trie_ptr: *mut TrieNode<P::Value> = &mut **trie;
            let byte = key[depth] as usize;
            if trie.children[byte].is_none() {
                let mut hash = ctx.new_hash_node(key[depth], HASH_NODE_DEFAULT_BUCKET_COUNT);
                hash.table
                    .insert(ctx.hasher, ctx.key_eq, &key[depth + 1..], P::store(value))?;
                trie.children[byte] = Some(Node::Hash(hash));
                *nb_elements += 1;
                return Ok(true);
            }

            parent = trie_ptr;
            slot = &mut trie.children[byte];
            depth += 1;
        }
    }

    /// Converts an overfull hash node into a trie node whose children
    /// partition the suffixes by first byte, bursting children that end
    /// up overfull themselves.
    fn burst(ctx: &Ctx<'_, S, E>, node: HashNode<P::Value>) -> Box<TrieNode<P::Value>> {
        let mut new_node = Self::burst_once(ctx, node);
        let root_ptr: *mut TrieNode<P::Value> = &mut *new_node;

        // The histogram can concentrate everything under one byte, so
        // keep bursting with a worklist rather than recursion.
        let mut work = vec![root_ptr];
        while let Some(trie_ptr) = work.pop() {
            // SAFETY: the pointers come from boxes owned by `new_node`'s
            // subtree, which we exclusively own here.
            let trie = unsafe { &mut *trie_ptr };
            for slot in 0..ALPHABET_SIZE {
                let overfull = matches!(
                    &trie.children[slot],
                    Some(Node::Hash(hash)) if hash.table.len() >= ctx.burst_threshold
                );
                if !overfull {
                    continue;
                }
                let Some(Node::Hash(hash)) = trie.children[slot].take() else {
                    unreachable!()
                };
                let mut child = Self::burst_once(ctx, *hash);
                child.parent = trie_ptr;
                child.child_of_byte = slot as u8;
                let child_ptr: *mut TrieNode<P::Value> = &mut *child;
                trie.children[slot] = Some(Node::Trie(child));
                work.push(child_ptr);
            }
        }

        new_node
    }

    /// One level of bursting: distributes every suffix of `node` into a
    /// fresh trie node. Values are moved; the emptied table is dropped
    /// with `node` on return.
    fn burst_once(ctx: &Ctx<'_, S, E>, mut node: HashNode<P::Value>) -> Box<TrieNode<P::Value>> {
        // Size the children ahead of time so redistribution does not
        // rehash halfway through.
        let mut first_byte_counts = [0usize; ALPHABET_SIZE];
        {
            let table = &node.table;
            let mut cursor = table.first_cursor();
            while let Some(current) = cursor {
                let key = table.key_at(current);
                if let Some(&byte) = key.first() {
                    first_byte_counts[byte as usize] += 1;
                }
                cursor = table.next_cursor(current);
            }
        }

        let mut new_node = Box::new(TrieNode::new(ptr::null_mut(), 0));

        let (buckets, values, layout) = node.table.parts_mut();
        for bucket in buckets {
            let mut offset = bucket.first_entry_offset(layout);
            while let Some(current) = offset {
                let suffix = bucket.key_at(layout, current);
                let taken = if layout.has_values() {
                    values[bucket.value_index_at(layout, current)].take()
                } else {
                    None
                };

                if suffix.is_empty() {
                    // At most one zero-length suffix can exist.
                    debug_assert!(new_node.value.is_none());
                    new_node.value = Some(P::materialize(taken));
                } else {
                    let byte = suffix[0];
                    let count = first_byte_counts[byte as usize];
                    let child = Self::child_hash_node_for_burst(ctx, &mut new_node, byte, count);
                    child
                        .table
                        .insert(ctx.hasher, ctx.key_eq, &suffix[1..], taken)
                        .expect("burst re-inserts suffixes shorter than the original keys");
                }

                offset = bucket.next_entry_offset(layout, current);
            }
        }

        debug_assert!(new_node.value.is_some() || new_node.has_children());
        new_node
    }

    /// Child hash node of `trie` at `byte`, created sized for `count`
    /// suffixes if missing.
    fn child_hash_node_for_burst<'t>(
        ctx: &Ctx<'_, S, E>,
        trie: &'t mut TrieNode<P::Value>,
        byte: u8,
        count: usize,
    ) -> &'t mut HashNode<P::Value> {
        let slot = &mut trie.children[byte as usize];
        if slot.is_none() {
            let min_buckets = ((count + HASH_NODE_DEFAULT_BUCKET_COUNT / 2) as f32
                / ctx.max_load_factor)
                .ceil() as usize;
            *slot = Some(Node::Hash(ctx.new_hash_node(byte, min_buckets)));
        }
        match slot.as_mut() {
            Some(Node::Hash(hash)) => hash,
            _ => unreachable!("burst children are hash nodes"),
        }
    }

    /// Cursor to the entry for `key`, or the end cursor.
    pub(crate) fn find_cursor(&self, key: &[u8]) -> RawCursor<P::Value> {
        let Some(root) = &self.root else {
            return RawCursor::end();
        };

        let mut parent: *const TrieNode<P::Value> = ptr::null();
        let mut node = root;
        let mut depth = 0;
        loop {
            match node {
                Node::Trie(trie) => {
                    if depth == key.len() {
                        return if trie.value.is_some() {
                            RawCursor::at_trie_value(trie)
                        } else {
                            RawCursor::end()
                        };
                    }
                    match &trie.children[key[depth] as usize] {
                        None => return RawCursor::end(),
                        Some(child) => {
                            parent = &**trie;
                            node = child;
                            depth += 1;
                        }
                    }
                }
                Node::Hash(hash) => {
                    return match hash.table.find(&self.hasher, &self.key_eq, &key[depth..]) {
                        Some(cursor) => RawCursor::in_hash_node(parent, hash, cursor),
                        None => RawCursor::end(),
                    };
                }
            }
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<&P::Value> {
        let cursor = self.find_cursor(key);
        if cursor.is_end() {
            None
        } else {
            // SAFETY: the cursor was just built under this borrow.
            Some(unsafe { cursor.value_ref() })
        }
    }

    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        !self.find_cursor(key).is_end()
    }

    pub(crate) fn get_mut(&mut self, key: &[u8]) -> Option<&mut P::Value> {
        let TrieHash {
            ref mut root,
            ref hasher,
            ref key_eq,
            ..
        } = *self;

        let mut node = root.as_mut()?;
        let mut depth = 0;
        loop {
            match node {
                Node::Trie(trie) => {
                    if depth == key.len() {
                        return trie.value.as_mut();
                    }
                    match trie.children[key[depth] as usize].as_mut() {
                        None => return None,
                        Some(child) => {
                            node = child;
                            depth += 1;
                        }
                    }
                }
                Node::Hash(hash) => {
                    let cursor = hash.table.find(hasher, key_eq, &key[depth..])?;
                    return Some(hash.table.value_at_mut(cursor));
                }
            }
        }
    }

    /// Erases `key`, returning its value.
    pub(crate) fn erase(&mut self, key: &[u8]) -> Option<P::Value> {
        let outcome = {
            let TrieHash {
                ref mut root,
                ref hasher,
                ref key_eq,
                ..
            } = *self;

            root.as_ref()?;

            let mut slot: &mut Option<Node<P::Value>> = root;
            let mut parent: *mut TrieNode<P::Value> = ptr::null_mut();
            let mut depth = 0;
            loop {
                let node = slot;
                match node.as_mut() {
                    Some(Node::Hash(hash)) => {
                        let taken = hash.table.erase_key(hasher, key_eq, &key[depth..])?;
                        break EraseOutcome::FromHashNode {
                            value: taken,
                            emptied: hash.table.is_empty(),
                            child_of_byte: hash.child_of_byte,
                            parent,
                        };
                    }
                    Some(Node::Trie(trie)) => {
                        if depth == key.len() {
                            let value = trie.value.take()?;
                            break EraseOutcome::FromTrieValue {
                                value,
                                node: &mut **trie,
                            };
                        }
                        let trie_ptr: *mut TrieNode<P::Value> = &mut **trie;
                        let byte = key[depth] as usize;
                        if trie.children[byte].is_none() {
                            return None;
                        }
                        parent = trie_ptr;
                        slot = &mut trie.children[byte];
                        depth += 1;
                    }
                    None => unreachable!("descent slots always hold a node"),
                }
            }
        };

        self.nb_elements -= 1;
        match outcome {
            EraseOutcome::FromHashNode {
                value,
                emptied,
                child_of_byte,
                parent,
            } => {
                if emptied {
                    // SAFETY: the pointers were captured under the
                    // exclusive borrow we still hold.
                    unsafe { self.collapse_empty_hash_node(child_of_byte, parent) };
                }
                Some(P::materialize(value))
            }
            EraseOutcome::FromTrieValue { value, node } => {
                // SAFETY: as above.
                unsafe { self.prune_empty_trie_nodes(node) };
                Some(value)
            }
        }
    }

    /// Unlinks an emptied hash node and re-parents a surviving branch
    /// upward while its ancestors would be left empty.
    ///
    /// # Safety
    ///
    /// `parent` must be the empty hash node's parent inside this trie
    /// (or null when the hash node is the root), and no other borrow of
    /// the tree may be live.
    unsafe fn collapse_empty_hash_node(
        &mut self,
        child_of_byte: u8,
        parent: *mut TrieNode<P::Value>,
    ) {
        let mut child_of_byte = child_of_byte;
        let mut parent = parent;
        loop {
            if parent.is_null() {
                // The empty hash node is the root.
                debug_assert_eq!(self.nb_elements, 0);
                self.root = None;
                return;
            }

            // SAFETY: `parent` is a live node per the caller's contract.
            let parent_node = unsafe { &mut *parent };
            if parent_node.value.is_some() || parent_node.nb_children() > 1 {
                parent_node.children[child_of_byte as usize] = None;
                return;
            }

            if parent_node.parent.is_null() {
                // The parent is the root and this was its only content.
                debug_assert_eq!(self.nb_elements, 0);
                self.root = None;
                return;
            }

            // The parent would be left empty: move the hash node up to
            // the grandparent in the parent's place and keep going.
            let grandparent = parent_node.parent;
            let new_child_of_byte = parent_node.child_of_byte;
            let mut hash_node = parent_node.children[child_of_byte as usize].take();
            if let Some(node) = hash_node.as_mut() {
                node.set_child_of_byte(new_child_of_byte);
            }
            // SAFETY: the grandparent outlives the parent; assigning the
            // slot drops the parent node, whose pointer is not used
            // afterwards.
            unsafe {
                (*grandparent).children[new_child_of_byte as usize] = hash_node;
            }

            child_of_byte = new_child_of_byte;
            parent = grandparent;
        }
    }

    /// Removes `node` and its ancestors while they hold neither a value
    /// nor children.
    ///
    /// # Safety
    ///
    /// `node` must point into this trie and no other borrow of the tree
    /// may be live.
    unsafe fn prune_empty_trie_nodes(&mut self, node: *mut TrieNode<P::Value>) {
        let mut node = node;
        loop {
            // SAFETY: live node per the caller's contract.
            let current = unsafe { &*node };
            if current.value.is_some() || current.has_children() {
                return;
            }
            let parent = current.parent;
            if parent.is_null() {
                self.root = None;
                return;
            }
            let byte = current.child_of_byte as usize;
            // SAFETY: as above; dropping the child invalidates `node`,
            // which is immediately replaced by `parent`.
            unsafe {
                (*parent).children[byte] = None;
            }
            node = parent;
        }
    }

    /// Erases every key starting with `prefix`; returns how many.
    pub(crate) fn erase_prefix(&mut self, prefix: &[u8]) -> usize {
        if self.root.is_none() {
            return 0;
        }
        if prefix.is_empty() {
            let erased = self.nb_elements;
            self.clear();
            return erased;
        }

        enum Cleanup<V> {
            None,
            CollapseHash { child_of_byte: u8, parent: *mut TrieNode<V> },
            PruneParent { parent: *mut TrieNode<V> },
        }

        let (erased, cleanup) = {
            let TrieHash { ref mut root, .. } = *self;

            let mut slot: &mut Option<Node<P::Value>> = root;
            let mut parent: *mut TrieNode<P::Value> = ptr::null_mut();
            let mut depth = 0;
            loop {
                let node = slot;

                if depth == prefix.len() && matches!(node.as_ref(), Some(Node::Trie(_))) {
                    // The prefix lands exactly on this trie node: the
                    // whole subtree goes, value slot included.
                    let count = node_len(node.as_ref().expect("descent slot holds a node"));
                    let taken = node.take().expect("descent slot holds a node");
                    drop_node(taken);
                    break (count, Cleanup::PruneParent { parent });
                }

                match node.as_mut() {
                    Some(Node::Hash(hash)) => {
                        let count = hash.table.erase_prefix(&prefix[depth..]);
                        let cleanup = if count > 0 && hash.table.is_empty() {
                            Cleanup::CollapseHash {
                                child_of_byte: hash.child_of_byte,
                                parent,
                            }
                        } else {
                            Cleanup::None
                        };
                        break (count, cleanup);
                    }
                    Some(Node::Trie(trie)) => {
                        let trie_ptr: *mut TrieNode<P::Value> = &mut **trie;
                        let byte = prefix[depth] as usize;
                        if trie.children[byte].is_none() {
                            break (0, Cleanup::None);
                        }
                        parent = trie_ptr;
                        slot = &mut trie.children[byte];
                        depth += 1;
                    }
                    None => unreachable!("descent slots always hold a node"),
                }
            }
        };

        self.nb_elements -= erased;
        match cleanup {
            Cleanup::None => {}
            Cleanup::CollapseHash { child_of_byte, parent } => {
                // SAFETY: pointers captured under the exclusive borrow.
                unsafe { self.collapse_empty_hash_node(child_of_byte, parent) };
            }
            Cleanup::PruneParent { parent } => {
                if !parent.is_null() {
                    // SAFETY: as above.
                    unsafe { self.prune_empty_trie_nodes(parent) };
                }
            }
        }
        erased
    }

    /// Longest stored key that is a prefix of `key`: its length (the
    /// match is always `key[..len]`) and its value.
    pub(crate) fn longest_prefix(&self, key: &[u8]) -> Option<(usize, &P::Value)> {
        let mut best: Option<(usize, &P::Value)> = None;

        let mut node = self.root.as_ref()?;
        let mut depth = 0;
        loop {
            match node {
                Node::Trie(trie) => {
                    if let Some(value) = trie.value.as_ref() {
                        // The path so far is a prefix of `key` and longer
                        // than any previous trie-level match.
                        best = Some((depth, value));
                    }
                    if depth == key.len() {
                        break;
                    }
                    match &trie.children[key[depth] as usize] {
                        None => break,
                        Some(child) => {
                            node = child;
                            depth += 1;
                        }
                    }
                }
                Node::Hash(hash) => {
                    let rest = &key[depth..];
                    let mut cursor = hash.table.first_cursor();
                    while let Some(current) = cursor {
                        let suffix = hash.table.key_at(current);
                        if rest.starts_with(suffix) {
                            let len = depth + suffix.len();
                            if best.map_or(true, |(best_len, _)| len > best_len) {
                                best = Some((len, hash.table.value_at(current)));
                            }
                        }
                        cursor = hash.table.next_cursor(current);
                    }
                    break;
                }
            }
        }

        best
    }

    pub(crate) fn iter(&self) -> RawIter<'_, P::Value> {
        let current = match &self.root {
            None => RawCursor::end(),
            Some(root) => RawCursor::descend_first(root, ptr::null()),
        };
        RawIter {
            current,
            _marker: PhantomData,
        }
    }

    /// Iterator over the keys starting with `prefix`, as the in-order
    /// range `[begin, end)` with an optional in-leaf filter.
    pub(crate) fn prefix_iter(&self, prefix: &[u8]) -> RawPrefixIter<'_, P::Value> {
        let empty = RawPrefixIter {
            current: RawCursor::end(),
            end: RawCursor::end(),
            filter: Vec::new(),
            _marker: PhantomData,
        };

        let Some(root) = &self.root else {
            return empty;
        };

        let mut parent: *const TrieNode<P::Value> = ptr::null();
        let mut node = root;
        let mut depth = 0;
        loop {
            if depth == prefix.len() {
                // The prefix ends on a node boundary: the range is the
                // whole subtree, no filtering needed.
                let begin = RawCursor::descend_first(node, parent);
                let end = if parent.is_null() {
                    RawCursor::end()
                } else {
                    // SAFETY: `parent` was derived from this borrow.
                    unsafe { RawCursor::next_sibling(parent, node.child_of_byte()) }
                };
                return RawPrefixIter {
                    current: begin,
                    end,
                    filter: Vec::new(),
                    _marker: PhantomData,
                };
            }

            match node {
                Node::Trie(trie) => match &trie.children[prefix[depth] as usize] {
                    None => return empty,
                    Some(child) => {
                        parent = &**trie;
                        node = child;
                        depth += 1;
                    }
                },
                Node::Hash(hash) => {
                    // The prefix ends inside this leaf: iterate the leaf
                    // and filter entries by the unconsumed bytes.
                    let Some(first) = hash.table.first_cursor() else {
                        return empty;
                    };
                    let begin = RawCursor::in_hash_node(parent, hash, first);
                    let end = if parent.is_null() {
                        RawCursor::end()
                    } else {
                        // SAFETY: `parent` was derived from this borrow.
                        unsafe { RawCursor::next_sibling(parent, hash.child_of_byte) }
                    };
                    return RawPrefixIter {
                        current: begin,
                        end,
                        filter: prefix[depth..].to_vec(),
                        _marker: PhantomData,
                    };
                }
            }
        }
    }

    /// Shrinks every leaf table: value vectors are compacted and bucket
    /// arrays are resized down to what the load factor requires.
    pub(crate) fn shrink_to_fit(&mut self) {
        let TrieHash {
            ref mut root,
            ref hasher,
            ..
        } = *self;

        let mut stack: Vec<&mut Node<P::Value>> = root.as_mut().into_iter().collect();
        while let Some(node) = stack.pop() {
            match node {
                Node::Hash(hash) => hash.table.shrink_to_fit(hasher),
                Node::Trie(trie) => {
                    stack.extend(trie.children.iter_mut().flatten());
                }
            }
        }
    }
}

impl<P: ValuePolicy, S, E> Drop for TrieHash<P, S, E> {
    fn drop(&mut self) {
        if let Some(root) = self.root.take() {
            drop_node(root);
        }
    }
}

// The node graph is an exclusively-owned acyclic tree; the raw parent
// links never escape a borrow of the whole trie, so the usual container
// bounds apply.
unsafe impl<P: ValuePolicy, S, E> Send for TrieHash<P, S, E>
where
    P::Value: Send,
    S: Send,
    E: Send,
{
}

unsafe impl<P: ValuePolicy, S, E> Sync for TrieHash<P, S, E>
where
    P::Value: Sync,
    S: Sync,
    E: Sync,
{
}

impl<P, S, E> Clone for TrieHash<P, S, E>
where
    P: ValuePolicy,
    P::Value: Clone,
    S: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        TrieHash {
            root: self.root.as_ref().map(clone_node),
            nb_elements: self.nb_elements,
            hasher: self.hasher.clone(),
            key_eq: self.key_eq.clone(),
            config: self.config,
            layout: self.layout,
        }
    }
}

// Serialization.
impl<P, S, E> TrieHash<P, S, E>
where
    P: ValuePolicy,
    P::Value: SerializeValue,
    S: BuildHasher,
    E: KeyEqual,
{
    /// Writes the whole trie, configuration included, to `writer`.
    pub(crate) fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), Error> {
        SERIAL_VERSION.serialize(writer)?;
        self.config.key_size.to_tag().serialize(writer)?;
        self.config.index_size.to_tag().serialize(writer)?;
        u8::from(self.config.store_null_terminator).serialize(writer)?;
        let (growth_tag, growth_factor_log2) = self.config.growth_policy.to_tag();
        growth_tag.serialize(writer)?;
        growth_factor_log2.serialize(writer)?;
        (self.config.burst_threshold as u64).serialize(writer)?;
        self.config.max_load_factor.serialize(writer)?;
        (self.nb_elements as u64).serialize(writer)?;

        match &self.root {
            None => NODE_TAG_NONE.serialize(writer),
            Some(root) => Self::serialize_node(root, writer),
        }
    }

    fn serialize_node<W: Write>(node: &Node<P::Value>, writer: &mut W) -> Result<(), Error> {
        match node {
            Node::Hash(hash) => {
                NODE_TAG_HASH.serialize(writer)?;
                Self::serialize_hash_node(hash, writer)
            }
            Node::Trie(trie) => {
                NODE_TAG_TRIE.serialize(writer)?;
                match &trie.value {
                    None => 0u8.serialize(writer)?,
                    Some(value) => {
                        1u8.serialize(writer)?;
                        value.serialize(writer)?;
                    }
                }
                let child_count = trie.nb_children() as u16;
                child_count.serialize(writer)?;
                for (slot, child) in trie.children.iter().enumerate() {
                    let Some(child) = child else { continue };
                    (slot as u8).serialize(writer)?;
                    Self::serialize_node(child, writer)?;
                }
                Ok(())
            }
        }
    }

    fn serialize_hash_node<W: Write>(
        hash: &HashNode<P::Value>,
        writer: &mut W,
    ) -> Result<(), Error> {
        let layout = hash.table.layout();
        (hash.table.bucket_count() as u64).serialize(writer)?;
        for (bucket_index, bucket) in hash.table.buckets().iter().enumerate() {
            let mut count = 0u64;
            let mut offset = bucket.first_entry_offset(layout);
            while let Some(current) = offset {
                count += 1;
                offset = bucket.next_entry_offset(layout, current);
            }
            count.serialize(writer)?;

            let mut offset = bucket.first_entry_offset(layout);
            while let Some(current) = offset {
                write_len_prefixed(writer, bucket.key_at(layout, current))?;
                if P::STORED {
                    let cursor = ArrayCursor {
                        bucket: bucket_index,
                        offset: current,
                    };
                    hash.table.value_at(cursor).serialize(writer)?;
                }
                offset = bucket.next_entry_offset(layout, current);
            }
        }
        Ok(())
    }

    /// Reads a trie previously written by [`serialize`](Self::serialize).
    ///
    /// With `hash_compatible` set, the serialized bucket layout is
    /// reproduced verbatim; the caller asserts that `hasher` behaves
    /// identically to the serializing instance's. Without it, every key
    /// is re-inserted under `hasher`.
    pub(crate) fn deserialize<R: Read>(
        reader: &mut R,
        hasher: S,
        key_eq: E,
        hash_compatible: bool,
    ) -> Result<Self, Error> {
        let version = u32::deserialize(reader)?;
        if version != SERIAL_VERSION {
            return Err(Error::Corrupted("unsupported format version"));
        }

        let key_size = crate::config::SizeWidth::from_tag(u8::deserialize(reader)?)
            .ok_or(Error::Corrupted("invalid key-size width"))?;
        let index_size = crate::config::SizeWidth::from_tag(u8::deserialize(reader)?)
            .ok_or(Error::Corrupted("invalid index-size width"))?;
        let store_null_terminator = match u8::deserialize(reader)? {
            0 => false,
            1 => true,
            _ => return Err(Error::Corrupted("invalid null-terminator flag")),
        };
        let growth_tag = u8::deserialize(reader)?;
        let growth_factor_log2 = u8::deserialize(reader)?;
        let growth_policy = GrowthPolicy::from_tag(growth_tag, growth_factor_log2)
            .ok_or(Error::Corrupted("invalid growth policy"))?;
        let burst_threshold = read_length(reader)?;
        let max_load_factor = f32::deserialize(reader)?;
        if !(max_load_factor > 0.0) {
            return Err(Error::Corrupted("invalid max load factor"));
        }
        let nb_elements = read_length(reader)?;

        let config = TrieConfig {
            burst_threshold: burst_threshold.max(TrieConfig::MIN_BURST_THRESHOLD),
            max_load_factor,
            store_null_terminator,
            key_size,
            index_size,
            growth_policy,
        };
        let mut trie = TrieHash::new(hasher, key_eq, config);

        {
            let (root, _, ctx) = trie.split_build();
            match u8::deserialize(reader)? {
                NODE_TAG_NONE => {}
                NODE_TAG_HASH => {
                    let hash = Self::read_hash_node(&ctx, reader, 0, hash_compatible)?;
                    *root = Some(Node::Hash(hash));
                }
                NODE_TAG_TRIE => {
                    let (mut node, child_count) = Self::read_trie_header(reader)?;
                    node.parent = ptr::null_mut();
                    *root = Some(Node::Trie(node));
                    let root_ptr = match root.as_mut() {
                        Some(Node::Trie(node)) => &mut **node as *mut TrieNode<P::Value>,
                        _ => unreachable!(),
                    };
                    Self::read_trie_children(&ctx, reader, root_ptr, child_count, hash_compatible)?;
                }
                _ => return Err(Error::Corrupted("invalid node tag")),
            }
        }

        let actual = trie.root.as_ref().map_or(0, node_len);
        if actual != nb_elements {
            return Err(Error::Corrupted("element count mismatch"));
        }
        trie.nb_elements = nb_elements;

        Ok(trie)
    }

    fn read_trie_header<R: Read>(reader: &mut R) -> Result<(Box<TrieNode<P::Value>>, u16), Error> {
        let mut node = Box::new(TrieNode::new(ptr::null_mut(), 0));
        match u8::deserialize(reader)? {
            0 => {}
            1 => node.value = Some(P::Value::deserialize(reader)?),
            _ => return Err(Error::Corrupted("invalid value flag")),
        }
        let child_count = u16::deserialize(reader)?;
        if child_count as usize > ALPHABET_SIZE {
            return Err(Error::Corrupted("invalid child count"));
        }
        Ok((node, child_count))
    }

    /// Iteratively attaches serialized children below `root_ptr`,
    /// keeping an explicit stack so adversarially deep input cannot
    /// overflow the call stack.
    fn read_trie_children<R: Read>(
        ctx: &Ctx<'_, S, E>,
        reader: &mut R,
        root_ptr: *mut TrieNode<P::Value>,
        root_child_count: u16,
        hash_compatible: bool,
    ) -> Result<(), Error> {
        let mut stack: Vec<(*mut TrieNode<P::Value>, u16)> = vec![(root_ptr, root_child_count)];

        while let Some(top) = stack.last_mut() {
            if top.1 == 0 {
                stack.pop();
                continue;
            }
            top.1 -= 1;
            let parent_ptr = top.0;

            let byte = u8::deserialize(reader)?;
            let tag = u8::deserialize(reader)?;
            // SAFETY: the stack only holds pointers to live nodes
            // attached to the tree under construction, which nothing
            // else borrows during this loop.
            let parent = unsafe { &mut *parent_ptr };
            if parent.children[byte as usize].is_some() {
                return Err(Error::Corrupted("duplicate child slot"));
            }

            match tag {
                NODE_TAG_HASH => {
                    let hash = Self::read_hash_node(ctx, reader, byte, hash_compatible)?;
                    parent.children[byte as usize] = Some(Node::Hash(hash));
                }
                NODE_TAG_TRIE => {
                    let (mut child, child_count) = Self::read_trie_header(reader)?;
                    child.parent = parent_ptr;
                    child.child_of_byte = byte;
                    parent.children[byte as usize] = Some(Node::Trie(child));
                    let child_ptr = match parent.children[byte as usize].as_mut() {
                        Some(Node::Trie(node)) => &mut **node as *mut TrieNode<P::Value>,
                        _ => unreachable!(),
                    };
                    stack.push((child_ptr, child_count));
                }
                _ => return Err(Error::Corrupted("invalid node tag")),
            }
        }

        Ok(())
    }

    fn read_hash_node<R: Read>(
        ctx: &Ctx<'_, S, E>,
        reader: &mut R,
        child_of_byte: u8,
        hash_compatible: bool,
    ) -> Result<Box<HashNode<P::Value>>, Error> {
        let bucket_count = read_length(reader)?;
        if bucket_count == 0 || bucket_count > (1 << 48) {
            return Err(Error::Corrupted("invalid bucket count"));
        }

        if hash_compatible {
            let mut node: Box<HashNode<P::Value>> = ctx.new_hash_node(child_of_byte, bucket_count);
            if node.table.bucket_count() != bucket_count {
                return Err(Error::Corrupted("bucket count does not fit the growth policy"));
            }
            for bucket in 0..bucket_count {
                let entries = Self::read_bucket_entries(ctx, reader)?;
                if entries.is_empty() {
                    continue;
                }
                let bytes: usize = entries
                    .iter()
                    .map(|(key, _)| ctx.layout.entry_size(key.len()))
                    .sum();
                node.table.reserve_bucket(bucket, bytes);
                for (key, value) in entries {
                    node.table.append_reserved(bucket, &key, value);
                }
            }
            Ok(node)
        } else {
            let mut all_entries = Vec::new();
            for _ in 0..bucket_count {
                all_entries.extend(Self::read_bucket_entries(ctx, reader)?);
            }
            let min_buckets = (all_entries.len() as f32 / ctx.max_load_factor).ceil() as usize;
            let mut node: Box<HashNode<P::Value>> =
                ctx.new_hash_node(child_of_byte, min_buckets.max(1));
            for (key, value) in all_entries {
                let (_, inserted) = node.table.insert(ctx.hasher, ctx.key_eq, &key, value)?;
                if !inserted {
                    return Err(Error::Corrupted("duplicate key"));
                }
            }
            Ok(node)
        }
    }

    #[allow(clippy::type_complexity)]
    fn read_bucket_entries<R: Read>(
        ctx: &Ctx<'_, S, E>,
        reader: &mut R,
    ) -> Result<Vec<(Vec<u8>, Option<P::Value>)>, Error> {
        let count = read_length(reader)?;
        if P::STORED && count as u64 > ctx.layout.index_capacity() {
            return Err(Error::Corrupted("invalid bucket entry count"));
        }

        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = read_len_prefixed(reader)?;
            if key.len() > ctx.layout.max_key_size() {
                return Err(Error::Corrupted("key longer than the configured maximum"));
            }
            let value = if P::STORED {
                Some(P::Value::deserialize(reader)?)
            } else {
                None
            };
            entries.push((key, value));
        }
        Ok(entries)
    }
}
