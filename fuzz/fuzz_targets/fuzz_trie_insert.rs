#![no_main]
use hashpack::{Archive, ArchiveBuilder, ContentHash, HashTrie, HASH_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut trie = HashTrie::new();
    let mut builder = ArchiveBuilder::new();

    for chunk in data.chunks_exact(HASH_LEN) {
        let hash = match ContentHash::from_slice(chunk) {
            Ok(hash) => hash,
            Err(_) => return,
        };
        let expected = trie.insert(hash);
        let added = builder.add(hash, Vec::new());
        assert_eq!(expected.is_ok(), added.is_ok());
        if let Ok(depth) = expected {
            assert!(depth >= 1 && depth <= HASH_LEN);
        }
    }

    assert_eq!(trie.len(), builder.len());
    if let Ok(image) = builder.build() {
        assert!(Archive::from_bytes(image).is_ok());
    }
});
