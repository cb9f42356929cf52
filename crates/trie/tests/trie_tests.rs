use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use canopy_trie::{
    BatchCommitter, Committer, EMPTY_TRIE_HASH, InMemoryTrieDB, Node, NodeCache, NodeRef,
    NullCommitter, PassThroughCommitter, Trie, TrieConfig, TrieDB, TrieError,
};
use ethereum_types::H256;
use parking_lot::Mutex;
use proptest::{
    collection::{btree_map, vec},
    prelude::any,
    prop_assert_eq, proptest,
};

/// In-memory store that also keeps a snapshot of everything ever written,
/// to assert on persisted (hash -> bytes) sets and on write counts.
#[derive(Default)]
struct RecordingDb {
    inner: InMemoryTrieDB,
    writes: Mutex<BTreeMap<H256, Vec<u8>>>,
}

impl RecordingDb {
    fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    fn snapshot(&self) -> BTreeMap<H256, Vec<u8>> {
        self.writes.lock().clone()
    }
}

impl TrieDB for RecordingDb {
    fn get(&self, key: H256) -> Result<Option<Vec<u8>>, TrieError> {
        self.inner.get(key)
    }

    fn put(&self, key: H256, value: Vec<u8>) -> Result<(), TrieError> {
        self.writes.lock().insert(key, value.clone());
        self.inner.put(key, value)
    }
}

fn recording_trie(config: TrieConfig) -> (Arc<RecordingDb>, Trie) {
    let db = Arc::new(RecordingDb::default());
    let committer = Arc::new(PassThroughCommitter::new(db.clone() as Arc<dyn TrieDB>));
    let cache = Arc::new(NodeCache::new(512 * 1024));
    let trie = Trie::with_parts(db.clone(), committer, cache, config);
    (db, trie)
}

#[test]
fn s1_empty_trie_root() {
    let mut trie = Trie::new_temp();
    assert_eq!(
        hex::encode(trie.root_hash().as_bytes()),
        "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
    );
    assert_eq!(trie.commit(0).unwrap(), *EMPTY_TRIE_HASH);
}

#[test]
fn s2_single_binding() {
    let mut trie = Trie::new_temp();
    trie.insert(&[0xab, 0xcd], b"hello".to_vec()).unwrap();
    trie.commit(0).unwrap();

    assert_eq!(trie.get(&[0xab, 0xcd]).unwrap(), Some(b"hello".to_vec()));
    assert_eq!(trie.get(&[0xab, 0xce]).unwrap(), None);
}

#[test]
fn s3_split_produces_extension_branch_leaves() {
    let mut trie = Trie::new_temp();
    trie.insert(&[0xab], b"x".to_vec()).unwrap();
    let singleton_root = trie.root_hash();
    trie.insert(&[0xaf], b"y".to_vec()).unwrap();

    // one extension of path [a] over a branch with children at b and f
    let NodeRef::Node(root, _) = &trie.root else {
        panic!("root should be materialized");
    };
    let Node::Extension(extension) = root.as_ref() else {
        panic!("expected an extension at the root");
    };
    assert_eq!(extension.prefix.as_ref(), &[0xa]);

    let NodeRef::Node(child, _) = &extension.child else {
        panic!("branch should be materialized");
    };
    let Node::Branch(branch) = child.as_ref() else {
        panic!("expected a branch under the extension");
    };
    for (choice, slot) in branch.choices.iter().enumerate() {
        assert_eq!(slot.is_valid(), choice == 0xb || choice == 0xf);
    }
    for choice in [0xb, 0xf] {
        let NodeRef::Node(leaf, _) = &branch.choices[choice] else {
            panic!("leaves should be materialized");
        };
        assert!(matches!(leaf.as_ref(), Node::Leaf(_)));
    }

    assert_ne!(trie.root_hash(), singleton_root);
}

#[test]
fn s4_delete_collapses_back_to_leaf() {
    let mut trie = Trie::new_temp();
    trie.insert(&[0xab], b"x".to_vec()).unwrap();
    trie.insert(&[0xaf], b"y".to_vec()).unwrap();
    trie.remove(&[0xaf]).unwrap();

    let NodeRef::Node(root, _) = &trie.root else {
        panic!("root should be materialized");
    };
    assert!(matches!(root.as_ref(), Node::Leaf(_)));

    let mut singleton = Trie::new_temp();
    singleton.insert(&[0xab], b"x".to_vec()).unwrap();
    assert_eq!(trie.root_hash(), singleton.root_hash());
}

#[test]
fn s5_overwrite_is_commit_idempotent() {
    let (db, mut trie) = recording_trie(TrieConfig::default());
    trie.insert(b"key", b"v1".to_vec()).unwrap();
    trie.insert(b"key", b"v2".to_vec()).unwrap();

    let root = trie.commit(1).unwrap();
    let writes = db.write_count();
    assert_eq!(trie.get(b"key").unwrap(), Some(b"v2".to_vec()));

    // a second commit with no mutations writes nothing and keeps the root
    assert_eq!(trie.commit(2).unwrap(), root);
    assert_eq!(db.write_count(), writes);
}

#[test]
fn s6_historical_roots_stay_readable() {
    let (db, mut trie) = recording_trie(TrieConfig::default());
    trie.insert(b"alpha", b"1".to_vec()).unwrap();
    trie.insert(b"beta", b"2".to_vec()).unwrap();
    let r1 = trie.commit(1).unwrap();

    trie.insert(b"alpha", b"changed".to_vec()).unwrap();
    trie.insert(b"gamma", b"3".to_vec()).unwrap();
    let r2 = trie.commit(2).unwrap();
    assert_ne!(r1, r2);

    let writes = db.write_count();
    assert_eq!(trie.get_at(r1, b"alpha").unwrap(), Some(b"1".to_vec()));
    let reader = trie.read_only_at(r1);
    assert_eq!(reader.get(b"alpha").unwrap(), Some(b"1".to_vec()));
    assert_eq!(reader.get(b"beta").unwrap(), Some(b"2".to_vec()));
    assert_eq!(reader.get(b"gamma").unwrap(), None);

    assert_eq!(trie.get(b"alpha").unwrap(), Some(b"changed".to_vec()));
    assert_eq!(trie.get(b"gamma").unwrap(), Some(b"3".to_vec()));

    // historical reads require no new writes
    assert_eq!(db.write_count(), writes);
}

#[test]
fn order_independence_of_root() {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0u8..50)
        .map(|i| (vec![i % 7, i, i / 3], vec![i + 1, i]))
        .collect();

    let mut forward = Trie::new_temp();
    for (key, value) in &entries {
        forward.insert(key, value.clone()).unwrap();
    }
    let mut reverse = Trie::new_temp();
    for (key, value) in entries.iter().rev() {
        reverse.insert(key, value.clone()).unwrap();
    }
    assert_eq!(forward.root_hash(), reverse.root_hash());
}

#[test]
fn delete_everything_returns_to_empty() {
    let mut trie = Trie::new_temp();
    let keys: Vec<Vec<u8>> = (0u8..40).map(|i| vec![i, 0xff - i]).collect();
    for key in &keys {
        trie.insert(key, key.clone()).unwrap();
    }
    trie.commit(0).unwrap();
    for key in &keys {
        assert!(trie.remove(key).unwrap().is_some());
    }
    assert_eq!(trie.root_hash(), *EMPTY_TRIE_HASH);
    assert_eq!(trie.commit(1).unwrap(), *EMPTY_TRIE_HASH);
}

#[test]
fn parallel_commit_matches_sequential() {
    // keys spread across all 16 root-branch slots so the parallel path kicks in
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0u8..=255)
        .map(|b| (vec![b, b ^ 0x5a], vec![b; 40]))
        .collect();

    let (sequential_db, mut sequential) = recording_trie(TrieConfig::default());
    let (parallel_db, mut parallel) = recording_trie(TrieConfig {
        parallel_branches: true,
        ..TrieConfig::default()
    });

    for (key, value) in &entries {
        sequential.insert(key, value.clone()).unwrap();
        parallel.insert(key, value.clone()).unwrap();
    }

    let sequential_root = sequential.commit(7).unwrap();
    let parallel_root = parallel.commit(7).unwrap();

    assert_eq!(sequential_root, parallel_root);
    assert_eq!(sequential_db.snapshot(), parallel_db.snapshot());

    for (key, value) in &entries {
        assert_eq!(parallel.get(key).unwrap(), Some(value.clone()));
    }
}

#[test]
fn parallel_commit_falls_back_below_fan_out_threshold() {
    let (_, mut trie) = recording_trie(TrieConfig {
        parallel_branches: true,
        ..TrieConfig::default()
    });
    trie.insert(b"one", b"1".to_vec()).unwrap();
    trie.insert(b"two", b"2".to_vec()).unwrap();
    trie.commit(0).unwrap();
    assert_eq!(trie.get(b"one").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn read_only_views_reject_mutation_and_commit() {
    let mut trie = Trie::new_temp();
    trie.insert(b"key", b"value".to_vec()).unwrap();
    let root = trie.commit(0).unwrap();

    let mut reader = trie.read_only_at(root);
    assert!(matches!(
        reader.insert(b"other", b"x".to_vec()),
        Err(TrieError::SealedMutation(_))
    ));
    assert!(matches!(
        reader.remove(b"key"),
        Err(TrieError::SealedMutation(_))
    ));
    assert!(matches!(reader.commit(1), Err(TrieError::CommitsDisabled)));
}

#[test]
fn commits_disabled_by_configuration() {
    let db = Arc::new(InMemoryTrieDB::default());
    let mut trie = Trie::with_config(
        db.clone(),
        Arc::new(PassThroughCommitter::new(db)),
        TrieConfig {
            allow_commits: false,
            ..TrieConfig::default()
        },
    );
    trie.insert(b"key", b"value".to_vec()).unwrap();
    assert!(matches!(trie.commit(0), Err(TrieError::CommitsDisabled)));
    // in-memory state is untouched by the failed commit
    assert_eq!(trie.get(b"key").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn null_committer_rejects_commits() {
    let db = Arc::new(InMemoryTrieDB::default());
    let mut trie = Trie::with_config(db, Arc::new(NullCommitter), TrieConfig::default());
    trie.insert(b"key", b"value".to_vec()).unwrap();
    assert!(matches!(trie.commit(0), Err(TrieError::CommitsDisabled)));
}

#[test]
fn missing_node_surfaces_on_reads() {
    let mut trie = Trie::with_parts(
        Arc::new(InMemoryTrieDB::default()),
        Arc::new(NullCommitter),
        Arc::new(NodeCache::new(1024)),
        TrieConfig::default(),
    );
    trie.set_root_hash(H256::repeat_byte(0x13));
    assert!(matches!(
        trie.get(b"anything"),
        Err(TrieError::NodeMissing(_))
    ));
}

#[test]
fn batched_commits_stay_readable_before_flush() {
    let db = Arc::new(InMemoryTrieDB::default());
    let committer = Arc::new(BatchCommitter::new(db.clone() as Arc<dyn TrieDB>));
    // an isolated cache, so reads can only come from the committer batch
    let mut trie = Trie::with_parts(
        db.clone(),
        committer.clone(),
        Arc::new(NodeCache::new(1024)),
        TrieConfig::default(),
    );

    for i in 0u8..8 {
        trie.insert(&[i, i], vec![i; 40]).unwrap();
    }
    let root = trie.commit(3).unwrap();
    assert!(committer.pending_len() > 0);
    assert!(db.is_empty());

    // the sealed batch is the only tier holding these nodes
    let reader = trie.read_only_at(root);
    assert_eq!(reader.get(&[2, 2]).unwrap(), Some(vec![2; 40]));

    committer.flush().unwrap();
    assert!(!db.is_empty());
    assert_eq!(Trie::open(db, root).get(&[5, 5]).unwrap(), Some(vec![5; 40]));
}

#[test]
fn set_root_hash_discards_pending_mutations() {
    let db = Arc::new(InMemoryTrieDB::default());
    let mut trie = Trie::new(db);
    trie.insert(b"committed", b"yes".to_vec()).unwrap();
    let root = trie.commit(0).unwrap();

    trie.insert(b"pending", b"lost".to_vec()).unwrap();
    trie.set_root_hash(root);

    assert_eq!(trie.get(b"committed").unwrap(), Some(b"yes".to_vec()));
    assert_eq!(trie.get(b"pending").unwrap(), None);
}

#[test]
fn proofs_cover_present_and_absent_keys() {
    let mut trie = Trie::new_temp();
    for i in 0u8..16 {
        trie.insert(&[i, i], vec![i; 40]).unwrap();
    }
    trie.commit(0).unwrap();

    let proof = trie.get_proof(&[3, 3]).unwrap();
    assert!(!proof.is_empty());
    // the first proof element is the root node
    assert_eq!(
        keccak_root(&proof[0]),
        trie.root_hash(),
    );

    // absence proofs stop at the diverging node but are still produced
    let absent = trie.get_proof(&[3, 4]).unwrap();
    assert!(!absent.is_empty());
}

fn keccak_root(encoded: &[u8]) -> H256 {
    keccak_hash::keccak(encoded)
}

/// Committer that probes reader views mid-commit: a reader bound to the root
/// being rewritten must fail with `ConcurrentMutation`, while a reader at any
/// other committed root keeps working.
#[derive(Default)]
struct ProbingCommitter {
    inner: InMemoryTrieDB,
    same_root_probe: Mutex<Option<Trie>>,
    other_root_probe: Mutex<Option<Trie>>,
    saw_conflict: AtomicBool,
    other_read_ok: AtomicBool,
}

impl Committer for ProbingCommitter {
    fn commit(&self, _block_number: u64, hash: H256, encoded: Vec<u8>) -> Result<(), TrieError> {
        if let Some(reader) = self.same_root_probe.lock().as_ref() {
            if matches!(reader.get(b"first"), Err(TrieError::ConcurrentMutation(_))) {
                self.saw_conflict.store(true, Ordering::SeqCst);
            }
        }
        if let Some(reader) = self.other_root_probe.lock().as_ref() {
            if reader.get(b"first").is_ok() {
                self.other_read_ok.store(true, Ordering::SeqCst);
            }
        }
        self.inner.put(hash, encoded)
    }
}

#[test]
fn same_root_reads_conflict_with_an_active_commit() {
    let db = Arc::new(InMemoryTrieDB::default());
    let committer = Arc::new(ProbingCommitter::default());
    let mut trie = Trie::with_parts(
        db,
        committer.clone(),
        Arc::new(NodeCache::new(512 * 1024)),
        TrieConfig::default(),
    );

    trie.insert(b"first", b"1".to_vec()).unwrap();
    let r1 = trie.commit(1).unwrap();

    // watch the root about to be rewritten, and the empty root as a control
    *committer.same_root_probe.lock() = Some(trie.read_only_at(r1));
    *committer.other_root_probe.lock() = Some(trie.read_only_at(*EMPTY_TRIE_HASH));

    trie.insert(b"second", b"2".to_vec()).unwrap();
    trie.commit(2).unwrap();

    assert!(committer.saw_conflict.load(Ordering::SeqCst));
    assert!(committer.other_read_ok.load(Ordering::SeqCst));

    // once the writer is done the same-root reader works again
    let reader = committer.same_root_probe.lock().take().unwrap();
    assert_eq!(reader.get(b"first").unwrap(), Some(b"1".to_vec()));
}

proptest! {

    #[test]
    fn proptest_round_trip(data in btree_map(vec(any::<u8>(), 1..32), vec(any::<u8>(), 1..64), 1..64)) {
        let mut trie = Trie::new_temp();
        for (key, value) in &data {
            trie.insert(key, value.clone()).unwrap();
        }
        trie.commit(0).unwrap();

        for (key, value) in &data {
            prop_assert_eq!(trie.get(key).unwrap(), Some(value.clone()));
        }
        // no generated key reaches this length
        prop_assert_eq!(trie.get(&[0xfe; 33]).unwrap(), None);
    }

    #[test]
    fn proptest_insertion_order_is_irrelevant(data in btree_map(vec(any::<u8>(), 1..32), vec(any::<u8>(), 1..32), 1..32)) {
        let mut forward = Trie::new_temp();
        for (key, value) in data.iter() {
            forward.insert(key, value.clone()).unwrap();
        }
        let mut reverse = Trie::new_temp();
        for (key, value) in data.iter().rev() {
            reverse.insert(key, value.clone()).unwrap();
        }
        prop_assert_eq!(forward.root_hash(), reverse.root_hash());
    }

    #[test]
    fn proptest_delete_all_yields_empty_root(data in btree_map(vec(any::<u8>(), 1..32), vec(any::<u8>(), 1..32), 1..32)) {
        let mut trie = Trie::new_temp();
        for (key, value) in &data {
            trie.insert(key, value.clone()).unwrap();
        }
        trie.commit(0).unwrap();
        for key in data.keys() {
            prop_assert_eq!(trie.remove(key).unwrap(), Some(data[key].clone()));
        }
        prop_assert_eq!(trie.root_hash(), *EMPTY_TRIE_HASH);
    }

    #[test]
    fn proptest_reads_after_reopen(data in btree_map(vec(any::<u8>(), 1..16), vec(any::<u8>(), 1..48), 1..32)) {
        let db = Arc::new(InMemoryTrieDB::default());
        let mut trie = Trie::new(db.clone());
        for (key, value) in &data {
            trie.insert(key, value.clone()).unwrap();
        }
        let root = trie.commit(0).unwrap();

        let reopened = Trie::open(db, root);
        for (key, value) in &data {
            prop_assert_eq!(reopened.get(key).unwrap(), Some(value.clone()));
        }
    }
}
