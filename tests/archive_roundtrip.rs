//! End-to-end build and lookup tests against archives on disk

use hashpack::{Archive, ArchiveBuilder, ArchiveError, BuildConfig, ContentHash, HASH_LEN};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tempfile::TempDir;

/// Helper: random, distinct hashes with payloads of varying size
fn random_files(count: usize, seed: u64) -> HashMap<ContentHash, Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut files = HashMap::new();
    while files.len() < count {
        let mut bytes = [0u8; HASH_LEN];
        rng.fill(&mut bytes[..]);
        let size = rng.gen_range(0..9000);
        let payload: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
        files.insert(ContentHash::new(bytes), payload);
    }
    files
}

fn hash_with(prefix: &[u8]) -> ContentHash {
    let mut bytes = [0u8; HASH_LEN];
    bytes[..prefix.len()].copy_from_slice(prefix);
    ContentHash::new(bytes)
}

#[test]
fn test_write_open_and_lookup_all() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("random.hpk");

    let files = random_files(2000, 7);
    let mut builder = ArchiveBuilder::new();
    for (hash, payload) in &files {
        builder.add(*hash, payload.clone()).unwrap();
    }
    let summary = builder.write_to(&path).unwrap();
    assert_eq!(summary.file_count, 2000);
    assert_eq!(
        summary.image_bytes,
        std::fs::metadata(&path).unwrap().len()
    );

    for archive in [
        Archive::open(&path).unwrap(),
        Archive::open_buffered(&path).unwrap(),
    ] {
        assert_eq!(archive.len(), 2000);
        for (hash, payload) in &files {
            assert_eq!(archive.read(hash).unwrap(), &payload[..], "hash {}", hash);
        }
    }
}

#[test]
fn test_absent_hashes_not_found() {
    let files = random_files(500, 11);
    let mut builder = ArchiveBuilder::new();
    for (hash, payload) in &files {
        builder.add(*hash, payload.clone()).unwrap();
    }
    let archive = Archive::from_bytes(builder.build().unwrap()).unwrap();

    for (probe, _) in random_files(500, 12) {
        let len = archive.header().unique_len(probe.prefix());
        if files
            .keys()
            .any(|hash| hash.as_bytes()[..len] == probe.as_bytes()[..len])
        {
            continue;
        }
        assert!(archive.find_file(&probe).is_none());
        assert!(matches!(archive.read(&probe), Err(ArchiveError::NotFound(h)) if h == probe));
    }
}

#[test]
fn test_two_file_scenario_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("two.hpk");

    let h1 = hash_with(&[0x01, 0x02, 0x03]);
    let h2 = hash_with(&[0x01, 0x02, 0x04]);
    let mut builder = ArchiveBuilder::new();
    builder.add(h1, b"A".to_vec()).unwrap();
    builder.add(h2, b"BB".to_vec()).unwrap();
    builder.write_to(&path).unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(archive.is_mapped());
    assert_eq!(archive.header().unique_len(0x01), hashpack::MIN_HASH_LEN);
    assert_eq!(archive.read(&h1).unwrap(), b"A");
    assert_eq!(archive.read(&h2).unwrap(), b"BB");
    assert!(archive.get(&hash_with(&[0x01, 0x02, 0x05])).is_none());
}

#[test]
fn test_failed_build_leaves_no_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("overflow.hpk");

    let mut builder = ArchiveBuilder::new();
    for i in 0..300u16 {
        let [hi, lo] = i.to_be_bytes();
        builder.add(hash_with(&[0xAA, hi, lo]), vec![i as u8]).unwrap();
    }

    assert!(matches!(
        builder.write_to(&path),
        Err(ArchiveError::PrefixOverflow { prefix: 0xAA, .. })
    ));
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_failed_build_keeps_previous_archive() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stable.hpk");

    let mut first = ArchiveBuilder::new();
    let kept = first.add_content(b"first generation".to_vec()).unwrap();
    first.write_to(&path).unwrap();

    // Source file vanishes before the image is written
    let missing = temp_dir.path().join("gone.bin");
    std::fs::write(&missing, b"soon deleted").unwrap();
    let mut second = ArchiveBuilder::new();
    second.add_file(hash_with(&[0x42]), &missing).unwrap();
    std::fs::remove_file(&missing).unwrap();
    assert!(matches!(second.write_to(&path), Err(ArchiveError::Io(_))));

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.read(&kept).unwrap(), b"first generation");
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
}

#[test]
fn test_rebuild_replaces_archive() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("replace.hpk");

    let mut first = ArchiveBuilder::new();
    let old = first.add_content(b"old".to_vec()).unwrap();
    first.write_to(&path).unwrap();

    let mut second = ArchiveBuilder::new();
    let new = second.add_content(b"new".to_vec()).unwrap();
    second.write_to(&path).unwrap();

    let archive = Archive::open(&path).unwrap();
    assert!(!archive.contains(&old));
    assert_eq!(archive.read(&new).unwrap(), b"new");
}

#[test]
fn test_files_streamed_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("large.bin");
    let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&source, &content).unwrap();

    let hash = ContentHash::digest(&content);
    let mut builder = ArchiveBuilder::new();
    builder.add_file(hash, &source).unwrap();
    let small = builder.add_content(b"tiny".to_vec()).unwrap();

    let path = temp_dir.path().join("streamed.hpk");
    let summary = builder.write_to(&path).unwrap();
    assert_eq!(summary.data_extents, 25 + 1);

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.read(&hash).unwrap(), &content[..]);
    assert_eq!(archive.read(&small).unwrap(), b"tiny");

    let location = archive.find_file(&small).unwrap();
    assert_eq!(location.extent, 26);
}

#[test]
fn test_deep_prefixes_use_remainders() {
    // Hashes sharing the first 8 bytes need 9 retained bytes
    let mut builder = ArchiveBuilder::new();
    let mut hashes = Vec::new();
    for i in 0..20u8 {
        let mut bytes = [0x5Au8; HASH_LEN];
        bytes[8] = i;
        let hash = ContentHash::new(bytes);
        builder.add(hash, vec![i; i as usize + 1]).unwrap();
        hashes.push(hash);
    }
    let archive = Archive::from_bytes(builder.build().unwrap()).unwrap();

    assert_eq!(archive.header().unique_len(0x5A), 9);
    for (i, hash) in hashes.iter().enumerate() {
        assert_eq!(archive.read(hash).unwrap(), &vec![i as u8; i + 1][..]);
    }

    let mut miss = [0x5Au8; HASH_LEN];
    miss[8] = 200;
    assert!(archive.get(&ContentHash::new(miss)).is_none());
}

#[test]
fn test_prefix_at_capacity() {
    let mut builder = ArchiveBuilder::new();
    for i in 0..255u8 {
        builder.add(hash_with(&[0x00, i, 0x10]), vec![i]).unwrap();
    }
    let archive = Archive::from_bytes(builder.build().unwrap()).unwrap();

    assert_eq!(archive.header().prefix_count(0x00), 255);
    for i in 0..255u8 {
        assert_eq!(archive.read(&hash_with(&[0x00, i, 0x10])).unwrap(), &[i]);
    }
    assert!(archive.get(&hash_with(&[0x00, 0xFF, 0x10])).is_none());
}

#[test]
fn test_config_file_drives_build() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("build.toml");
    std::fs::write(
        &config_path,
        "build_no = 99\ncreated = \"2020-01-01T00:00:00Z\"\nsync = false\n",
    )
    .unwrap();

    let config = BuildConfig::from_toml_file(&config_path).unwrap();
    let mut builder = ArchiveBuilder::with_config(config).unwrap();
    builder.add_content(b"configured".to_vec()).unwrap();
    let path = temp_dir.path().join("configured.hpk");
    builder.write_to(&path).unwrap();

    let stats = Archive::open(&path).unwrap().stats();
    assert_eq!(stats.build_no, 99);
    assert_eq!(stats.created.unwrap().timestamp(), 1_577_836_800);
    assert!(stats.mapped);
}

#[test]
fn test_concurrent_readers() {
    let files = random_files(1000, 21);
    let mut builder = ArchiveBuilder::new();
    for (hash, payload) in &files {
        builder.add(*hash, payload.clone()).unwrap();
    }
    let archive = Archive::from_bytes(builder.build().unwrap()).unwrap();
    let entries: Vec<_> = files.iter().collect();

    std::thread::scope(|scope| {
        for chunk in entries.chunks(250) {
            let archive = &archive;
            scope.spawn(move || {
                for (hash, payload) in chunk {
                    assert_eq!(archive.read(hash).unwrap(), &payload[..]);
                }
            });
        }
    });
}
