//! End-to-end behaviour of the engine on a real directory-backed store.

use cowfs_config::testing::TestEnvironment;
use cowfs_core::{BlockStore, CowEngine, CowError, EngineOptions, BLOCK_SIZE};

fn engine(env: &TestEnvironment) -> CowEngine {
    CowEngine::open_dir(&env.root, EngineOptions::default()).unwrap()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[test]
fn test_scenario_5000_then_100_then_undo() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);

    engine.create("f", false).unwrap();
    let first = pattern(5000, 1);
    assert_eq!(engine.write("f", &first).unwrap(), 5000);

    let v1 = engine.metadata("f").unwrap().current().clone();
    assert_eq!(v1.version, 1);
    assert_eq!(v1.size, 5000);
    assert_eq!(v1.blocks.len(), 2);
    assert_eq!(engine.block_size(&v1.blocks[0]).unwrap(), 4096);
    assert_eq!(engine.block_size(&v1.blocks[1]).unwrap(), 904);

    let second = pattern(100, 2);
    engine.write("f", &second).unwrap();
    let v2 = engine.metadata("f").unwrap().current().clone();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.size, 5100);
    assert_eq!(v2.blocks.len(), 2);
    assert_eq!(v2.blocks[0], v1.blocks[0], "full block must be reused");
    assert_ne!(v2.blocks[1], v1.blocks[1], "tail block must be fresh");
    assert_eq!(engine.block_size(&v2.blocks[1]).unwrap(), 1004);
    // Old tail survives untouched for version 1
    assert_eq!(engine.block_size(&v1.blocks[1]).unwrap(), 904);

    assert_eq!(engine.undo("f").unwrap(), 1);
    let meta = engine.metadata("f").unwrap();
    assert_eq!(meta.current_version(), 1);
    assert_eq!(meta.size(), 5000);
    assert_eq!(meta.blocks(), v1.blocks.as_slice());
    assert_eq!(engine.read("f", None).unwrap(), first);
}

#[test]
fn test_round_trip_many_writes() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("log", false).unwrap();

    let mut expected = Vec::new();
    for (i, len) in [1usize, 4095, 1, 4096, 10_000, 0, 3].into_iter().enumerate() {
        let chunk = pattern(len, i as u8);
        engine.write("log", &chunk).unwrap();
        expected.extend_from_slice(&chunk);
    }

    assert_eq!(engine.read("log", None).unwrap(), expected);
    assert_eq!(engine.metadata("log").unwrap().size(), expected.len() as u64);
}

#[test]
fn test_unchanged_prefix_not_duplicated() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();

    engine.write("f", &pattern(3 * BLOCK_SIZE + 10, 0)).unwrap();
    let blocks_after_first = env.block_file_count();
    engine.write("f", &pattern(20, 9)).unwrap();

    let versions = engine.list_versions("f").unwrap();
    assert_eq!(versions[2].blocks[..3], versions[1].blocks[..3]);
    // Only the re-chunked tail was allocated
    assert_eq!(env.block_file_count(), blocks_after_first + 1);
}

#[test]
fn test_undo_walks_back_to_zero() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();

    let mut snapshots = vec![Vec::new()];
    for i in 0..4u8 {
        engine.write("f", &pattern(3000, i)).unwrap();
        snapshots.push(engine.read("f", None).unwrap());
    }

    for k in (0..4).rev() {
        assert_eq!(engine.undo("f").unwrap(), k);
        assert_eq!(engine.read("f", None).unwrap(), snapshots[k]);
    }

    assert!(matches!(engine.undo("f"), Err(CowError::NoPreviousVersion(_))));
    assert!(engine.read("f", None).unwrap().is_empty());
    // Nothing was deleted by undo
    assert_eq!(engine.list_versions("f").unwrap().len(), 5);
}

#[test]
fn test_committed_versions_are_immutable() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();

    engine.write("f", &pattern(4100, 5)).unwrap();
    let v1_before = engine.read("f", Some(1)).unwrap();
    engine.write("f", &pattern(7000, 6)).unwrap();
    engine.write("f", b"end").unwrap();

    assert_eq!(engine.read_version("f", 1).unwrap(), v1_before);
}

#[test]
fn test_exact_block_size_write() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();

    engine.write("f", &pattern(BLOCK_SIZE, 0)).unwrap();
    let v = engine.metadata("f").unwrap().current().clone();
    assert_eq!(v.blocks.len(), 1);
    assert_eq!(engine.block_size(&v.blocks[0]).unwrap(), BLOCK_SIZE as u64);

    // A full last block is reused as-is by the next append
    engine.write("f", b"x").unwrap();
    let next = engine.metadata("f").unwrap().current().clone();
    assert_eq!(next.blocks[0], v.blocks[0]);
    assert_eq!(next.blocks.len(), 2);
}

#[test]
fn test_block_size_plus_one_write() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();

    let data = pattern(BLOCK_SIZE + 1, 4);
    engine.write("f", &data).unwrap();
    let v = engine.metadata("f").unwrap().current().clone();
    assert_eq!(v.blocks.len(), 2);
    assert_eq!(v.size, BLOCK_SIZE as u64 + 1);
    assert_eq!(engine.block_size(&v.blocks[1]).unwrap(), 1);
    assert_eq!(engine.read("f", None).unwrap(), data);
}

#[test]
fn test_explicit_version_out_of_range() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();

    let err = engine.read("f", Some(7)).unwrap_err();
    assert!(matches!(err, CowError::VersionNotFound { version: 7, .. }));
    assert!(err.is_not_found());
}

#[test]
fn test_read_missing_file() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    assert!(matches!(engine.read("nope", None), Err(CowError::FileNotFound(_))));
    assert!(matches!(engine.list_versions("nope"), Err(CowError::FileNotFound(_))));
}

#[test]
fn test_read_requires_session_by_default() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();
    engine.write("f", b"data").unwrap();
    engine.close("f").unwrap();

    assert!(matches!(engine.read("f", None), Err(CowError::NotOpen(_))));
    engine.open("f", None).unwrap();
    assert_eq!(engine.read("f", None).unwrap(), b"data");
}

#[test]
fn test_read_without_session_when_relaxed() {
    let env = TestEnvironment::new().unwrap();
    let options = EngineOptions {
        read_requires_session: false,
    };
    let engine = CowEngine::open_dir(&env.root, options).unwrap();
    engine.create("f", false).unwrap();
    engine.write("f", b"data").unwrap();
    engine.close("f").unwrap();

    assert_eq!(engine.read("f", None).unwrap(), b"data");
    // Writes still need the session
    assert!(matches!(engine.write("f", b"more"), Err(CowError::NotOpen(_))));
}

#[test]
fn test_sessions_do_not_survive_restart() {
    let env = TestEnvironment::new().unwrap();
    {
        let engine = engine(&env);
        engine.create("f", false).unwrap();
        engine.write("f", b"persisted").unwrap();
    }

    let engine = engine(&env);
    assert!(!engine.is_open("f"));
    assert!(matches!(engine.write("f", b"x"), Err(CowError::NotOpen(_))));
    engine.open("f", None).unwrap();
    assert_eq!(engine.read("f", None).unwrap(), b"persisted");
}

#[test]
fn test_delete_blocks_breaks_reads() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();
    engine.write("f", &pattern(6000, 3)).unwrap();

    assert_eq!(engine.delete_blocks().unwrap(), 2);
    assert!(engine.list_blocks().unwrap().is_empty());
    assert!(matches!(engine.read("f", None), Err(CowError::BlockNotFound(_))));
    // Metadata is independent of block storage
    assert_eq!(engine.metadata("f").unwrap().size(), 6000);
    // The empty version 0 needs no blocks
    assert!(engine.read("f", Some(0)).unwrap().is_empty());
}

#[test]
fn test_delete_metadata_leaves_blocks() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();
    engine.write("f", b"abc").unwrap();

    assert_eq!(engine.delete_metadata().unwrap(), 1);
    assert_eq!(engine.list_blocks().unwrap().len(), 1);
    assert!(matches!(engine.read("f", None), Err(CowError::FileNotFound(_))));
    assert!(matches!(engine.write("f", b"x"), Err(CowError::FileNotFound(_))));
    assert!(engine.list_files().unwrap().is_empty());
}

#[test]
fn test_import_external_file() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    let content = pattern(9000, 8);
    let source = env.create_external("doc.bin", &content).unwrap();

    engine.open("doc", Some(&source)).unwrap();
    let meta = engine.metadata("doc").unwrap();
    assert_eq!(meta.current_version(), 0);
    assert_eq!(meta.size(), 9000);
    assert_eq!(meta.blocks().len(), 3);
    assert_eq!(
        engine.sessions().get("doc").unwrap().source_path,
        Some(source.clone())
    );

    engine.write("doc", b"!").unwrap();
    engine.undo("doc").unwrap();
    assert_eq!(engine.read("doc", None).unwrap(), content);
    assert!(matches!(engine.undo("doc"), Err(CowError::NoPreviousVersion(_))));
}

#[test]
fn test_import_replaces_existing_file() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("doc", false).unwrap();
    engine.write("doc", b"old").unwrap();

    let source = env.create_external("new.txt", b"fresh").unwrap();
    engine.open("doc", Some(&source)).unwrap();
    assert_eq!(engine.read("doc", None).unwrap(), b"fresh");
    assert_eq!(engine.list_versions("doc").unwrap().len(), 1);
}

#[test]
fn test_import_unreadable_source() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    let missing = env.external_dir.join("missing.txt");

    assert!(matches!(
        engine.open("doc", Some(&missing)),
        Err(CowError::Import { .. })
    ));
    assert!(!engine.is_open("doc"));

    // With stored metadata the file is opened as-is
    engine.create("doc", false).unwrap();
    engine.write("doc", b"kept").unwrap();
    engine.close("doc").unwrap();
    engine.open("doc", Some(&missing)).unwrap();
    assert_eq!(engine.read("doc", None).unwrap(), b"kept");
}

#[test]
fn test_import_empty_file() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    let source = env.create_external("empty", b"").unwrap();

    engine.open("e", Some(&source)).unwrap();
    let meta = engine.metadata("e").unwrap();
    assert!(meta.blocks().is_empty());
    assert_eq!(meta.size(), 0);
}

#[test]
fn test_export_current_version() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();
    engine.write("f", b"line one\n").unwrap();
    engine.write("f", b"line two\n").unwrap();
    engine.undo("f").unwrap();

    let out = env.external_dir.join("out.txt");
    assert_eq!(engine.export("f", &out).unwrap(), 9);
    assert_eq!(std::fs::read(&out).unwrap(), b"line one\n");
}

#[test]
fn test_metadata_json_on_disk() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();
    engine.write("f", &pattern(5000, 0)).unwrap();

    let raw = std::fs::read_to_string(env.metadata_dir.join("f.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(doc["filename"], "f");
    assert_eq!(doc["current_version"], 1);
    assert_eq!(doc["size"], 5000);
    assert_eq!(doc["blocks"], doc["versions"][1]["blocks"]);
    assert_eq!(doc["versions"][1]["start"], 0);
    assert_eq!(doc["versions"][1]["end"], 5000);

    for id in doc["blocks"].as_array().unwrap() {
        let name = format!("{}.block", id.as_str().unwrap());
        assert!(env.blocks_dir.join(name).exists());
    }
}

#[test]
fn test_block_store_is_reachable() {
    let env = TestEnvironment::new().unwrap();
    let engine = engine(&env);
    engine.create("f", false).unwrap();
    engine.write("f", b"abc").unwrap();

    let ids = engine.list_blocks().unwrap();
    assert_eq!(ids.len(), 1);
    let id = ids.iter().next().unwrap();
    assert_eq!(engine.blocks().get(id).unwrap(), b"abc");
}
