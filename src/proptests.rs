//! Model-based property tests: random mutation sequences must leave the
//! trie agreeing with a `BTreeMap` reference on membership, size,
//! content, prefix filtering and longest-prefix.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use proptest::prelude::*;

use crate::TrieConfig;
use crate::TrieMap;

#[derive(Debug, Clone)]
enum Action {
    Insert(Vec<u8>, u64),
    InsertOrAssign(Vec<u8>, u64),
    Remove(Vec<u8>),
    RemovePrefix(Vec<u8>),
}

/// Keys drawn from a small alphabet with a handful of length classes,
/// so that shared prefixes, bursts and collapses all actually happen.
fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(Vec::new()),
        proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b'), Just(b'c')], 1..4),
        proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b'), Just(b'c')], 4..12),
        "[ab]{12,20}".prop_map(String::into_bytes),
    ]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (key_strategy(), any::<u64>()).prop_map(|(k, v)| Action::Insert(k, v)),
        2 => (key_strategy(), any::<u64>()).prop_map(|(k, v)| Action::InsertOrAssign(k, v)),
        2 => key_strategy().prop_map(Action::Remove),
        1 => key_strategy().prop_map(Action::RemovePrefix),
    ]
}

fn check_against_model(burst_threshold: usize, actions: &[Action]) {
    let mut trie: TrieMap<u64> =
        TrieMap::with_config(TrieConfig::new().burst_threshold(burst_threshold));
    let mut model: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

    for action in actions {
        match action {
            Action::Insert(key, value) => {
                let inserted = trie.insert(key, *value).unwrap();
                let model_inserted = !model.contains_key(key);
                if model_inserted {
                    model.insert(key.clone(), *value);
                }
                assert_eq!(inserted, model_inserted);
            }
            Action::InsertOrAssign(key, value) => {
                let old = trie.insert_or_assign(key, *value).unwrap();
                assert_eq!(old, model.insert(key.clone(), *value));
            }
            Action::Remove(key) => {
                assert_eq!(trie.remove(key), model.remove(key));
            }
            Action::RemovePrefix(prefix) => {
                let expected: Vec<Vec<u8>> = model
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect();
                for key in &expected {
                    model.remove(key);
                }
                assert_eq!(trie.remove_prefix(prefix), expected.len());
            }
        }

        assert_eq!(trie.len(), model.len());
    }

    // Full-content agreement.
    let trie_content: BTreeMap<Vec<u8>, u64> =
        trie.iter().map(|(k, v)| (k, *v)).collect();
    assert_eq!(trie_content, model);

    for (key, value) in &model {
        assert_eq!(trie.get(key), Some(value));
    }

    // Prefix queries agree with filtering the model.
    for prefix in [b"".as_slice(), b"a", b"ab", b"abc", b"ba", b"zz"] {
        let expected: BTreeSet<Vec<u8>> = model
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        let found: BTreeSet<Vec<u8>> = trie.iter_prefix(prefix).map(|(k, _)| k).collect();
        assert_eq!(found, expected, "prefix {:?}", prefix);
    }

    // Longest-prefix agrees with scanning the model.
    for query in [b"".as_slice(), b"a", b"abcabc", b"bbbbbbbbbbbbbbb", b"cacaca"] {
        let expected = model
            .keys()
            .filter(|k| query.starts_with(k.as_slice()))
            .max_by_key(|k| k.len())
            .cloned();
        let found = trie.longest_prefix(query).map(|(k, _)| k);
        assert_eq!(found, expected, "query {:?}", query);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn model_agreement_default_threshold(actions in proptest::collection::vec(action_strategy(), 0..120)) {
        check_against_model(TrieConfig::DEFAULT_BURST_THRESHOLD, &actions);
    }

    #[test]
    fn model_agreement_aggressive_bursting(actions in proptest::collection::vec(action_strategy(), 0..120)) {
        // The minimum threshold forces deep tries and constant bursts
        // and collapses.
        check_against_model(TrieConfig::MIN_BURST_THRESHOLD, &actions);
    }

    #[test]
    fn serialization_round_trip(actions in proptest::collection::vec(action_strategy(), 0..60)) {
        let mut trie: TrieMap<u64> =
            TrieMap::with_config(TrieConfig::new().burst_threshold(4));
        for action in &actions {
            match action {
                Action::Insert(key, value) => {
                    trie.insert(key, *value).unwrap();
                }
                Action::InsertOrAssign(key, value) => {
                    trie.insert_or_assign(key, *value).unwrap();
                }
                Action::Remove(key) => {
                    trie.remove(key);
                }
                Action::RemovePrefix(prefix) => {
                    trie.remove_prefix(prefix);
                }
            }
        }

        let mut buffer = Vec::new();
        trie.serialize(&mut buffer).unwrap();

        let compatible = TrieMap::<u64>::deserialize(&mut buffer.as_slice(), true).unwrap();
        prop_assert!(compatible == trie);

        let rebuilt = TrieMap::<u64>::deserialize(&mut buffer.as_slice(), false).unwrap();
        prop_assert!(rebuilt == trie);
    }
}
