#![no_main]
use hashpack::{Archive, ContentHash, HASH_LEN};
use libfuzzer_sys::fuzz_target;

// Arbitrary images must be rejected or served without panicking.
fuzz_target!(|data: &[u8]| {
    let archive = match Archive::from_bytes(data.to_vec()) {
        Ok(archive) => archive,
        Err(_) => return,
    };

    let _ = archive.stats();
    for entry in archive.entries() {
        let mut bytes = [0u8; HASH_LEN];
        bytes[..entry.retained_hash.len()].copy_from_slice(&entry.retained_hash);
        let hash = ContentHash::new(bytes);
        if let Some(found) = archive.get(&hash) {
            assert!(found.len() <= data.len());
        }
    }
});
