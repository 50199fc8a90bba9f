#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod array_hash;
mod config;
mod error;
mod hash;
mod serialize;
mod trie_hash;

/// A map from byte-string keys to values backed by a HAT-trie.
///
/// This module provides [`TrieMap`] together with its iterator types
/// and the [`Entry`] API.
pub mod trie_map;

/// A set of byte-string keys backed by a HAT-trie.
///
/// This module provides [`TrieSet`] together with its iterator types.
pub mod trie_set;

#[cfg(test)]
mod proptests;

pub use config::GrowthPolicy;
pub use config::SizeWidth;
pub use config::TrieConfig;
pub use error::Error;
pub use hash::BytesEqual;
pub use hash::Fnv1aBuildHasher;
pub use hash::Fnv1aHasher;
pub use hash::KeyEqual;
pub use serialize::SerializeValue;
pub use trie_map::Entry;
pub use trie_map::TrieMap;
pub use trie_set::TrieSet;
