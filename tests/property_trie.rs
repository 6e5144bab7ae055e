//! Property-based tests for trie depths and archive lookups
//!
//! Hashes are drawn from a narrow alphabet in their leading bytes so that
//! prefixes collide often and the trie grows deep branches.

use hashpack::{
    Archive, ArchiveBuilder, ArchiveError, ContentHash, HashTrie, HASH_LEN, MIN_HASH_LEN,
};
use proptest::prelude::*;
use std::collections::HashSet;

/// Hashes whose first `narrow` bytes come from `0..4`
fn narrow_hash(narrow: usize) -> impl Strategy<Value = ContentHash> {
    (
        prop::array::uniform32(0u8..4),
        prop::array::uniform32(any::<u8>()),
    )
        .prop_map(move |(head, tail)| {
            let mut bytes = tail;
            bytes[..narrow].copy_from_slice(&head[..narrow]);
            ContentHash::new(bytes)
        })
}

fn distinct_hashes(narrow: usize, max: usize) -> impl Strategy<Value = Vec<ContentHash>> {
    prop::collection::hash_set(narrow_hash(narrow), 1..max)
        .prop_map(|set| set.into_iter().collect())
}

fn max_shared_prefix(hash: &ContentHash, others: &[ContentHash]) -> usize {
    others
        .iter()
        .map(|other| hash.common_prefix_len(other))
        .max()
        .unwrap_or(0)
}

proptest! {
    #[test]
    fn prop_insert_depth_is_one_past_longest_shared_prefix(
        hashes in distinct_hashes(6, 80)
    ) {
        let mut trie = HashTrie::new();

        for (i, hash) in hashes.iter().enumerate() {
            let depth = trie.insert(*hash).unwrap();
            let expected = max_shared_prefix(hash, &hashes[..i]) + 1;
            prop_assert_eq!(depth, expected, "hash {}", hash);
            prop_assert!(depth <= HASH_LEN);
        }

        let global = hashes
            .iter()
            .enumerate()
            .map(|(i, h)| max_shared_prefix(h, &hashes[..i]) + 1)
            .max()
            .unwrap_or(0);
        prop_assert_eq!(trie.max_depth(), global);
        prop_assert_eq!(trie.len(), hashes.len());
    }

    #[test]
    fn prop_reinsert_is_duplicate(
        hashes in distinct_hashes(4, 40),
        pick in any::<prop::sample::Index>()
    ) {
        let mut trie = HashTrie::new();
        for hash in &hashes {
            trie.insert(*hash).unwrap();
        }
        let max_depth = trie.max_depth();

        let again = hashes[pick.index(hashes.len())];
        prop_assert!(matches!(
            trie.insert(again),
            Err(ArchiveError::DuplicateHash(h)) if h == again
        ));
        prop_assert_eq!(trie.len(), hashes.len());
        prop_assert_eq!(trie.max_depth(), max_depth);
    }

    #[test]
    fn prop_iteration_yields_every_hash_once(hashes in distinct_hashes(5, 60)) {
        let mut trie = HashTrie::new();
        for hash in &hashes {
            trie.insert(*hash).unwrap();
        }

        let seen: HashSet<ContentHash> = trie.iter().map(|(hash, _)| hash).collect();
        let expected: HashSet<ContentHash> = hashes.iter().copied().collect();
        prop_assert_eq!(trie.iter().count(), hashes.len());
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn prop_prefix_depths_bound_group_sharing(hashes in distinct_hashes(5, 60)) {
        let mut trie = HashTrie::new();
        for hash in &hashes {
            trie.insert(*hash).unwrap();
        }
        let depths = trie.prefix_depths();

        for (i, a) in hashes.iter().enumerate() {
            for b in &hashes[i + 1..] {
                if a.prefix() == b.prefix() {
                    prop_assert!(a.common_prefix_len(b) < depths[a.prefix() as usize] as usize);
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_archive_round_trip(
        files in prop::collection::hash_map(
            narrow_hash(3),
            prop::collection::vec(any::<u8>(), 0..6000),
            1..40
        )
    ) {
        let mut builder = ArchiveBuilder::new();
        for (hash, payload) in &files {
            builder.add(*hash, payload.clone()).unwrap();
        }
        let archive = Archive::from_bytes(builder.build().unwrap()).unwrap();

        prop_assert_eq!(archive.len(), files.len());
        for (hash, payload) in &files {
            prop_assert_eq!(archive.read(hash).unwrap(), &payload[..]);
        }
    }

    #[test]
    fn prop_absent_hashes_not_found(
        stored in distinct_hashes(3, 40),
        probes in prop::collection::vec(narrow_hash(2), 1..40)
    ) {
        let mut builder = ArchiveBuilder::new();
        for hash in &stored {
            builder.add(*hash, hash.as_bytes().to_vec()).unwrap();
        }
        let archive = Archive::from_bytes(builder.build().unwrap()).unwrap();

        // Lookups compare retained bytes only; absence is decidable when those differ
        let absent = probes.iter().filter(|probe| {
            let len = archive.header().unique_len(probe.prefix());
            stored
                .iter()
                .all(|hash| hash.as_bytes()[..len] != probe.as_bytes()[..len])
        });
        for probe in absent {
            prop_assert!(archive.find_file(probe).is_none(), "unexpected hit for {}", probe);
            prop_assert!(matches!(
                archive.read(probe),
                Err(ArchiveError::NotFound(h)) if h == *probe
            ));
        }
        for hash in &stored {
            prop_assert_eq!(archive.read(hash).unwrap(), &hash.as_bytes()[..]);
        }
    }

    #[test]
    fn prop_retained_bytes_discriminate(stored in distinct_hashes(4, 60)) {
        let mut builder = ArchiveBuilder::new();
        for hash in &stored {
            builder.add(*hash, Vec::new()).unwrap();
        }
        let archive = Archive::from_bytes(builder.build().unwrap()).unwrap();
        let header = archive.header();

        for (i, a) in stored.iter().enumerate() {
            let len = header.unique_len(a.prefix());
            prop_assert!(len >= MIN_HASH_LEN);
            for b in &stored[i + 1..] {
                if a.prefix() == b.prefix() {
                    prop_assert_ne!(&a.as_bytes()[..len], &b.as_bytes()[..len]);
                }
            }
        }

        let retained: HashSet<Vec<u8>> =
            archive.entries().map(|entry| entry.retained_hash).collect();
        prop_assert_eq!(retained.len(), stored.len());
    }
}
