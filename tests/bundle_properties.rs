//! Property suites for bundle identity and the install guard.

use proptest::prelude::*;

use modforge::artifact::{
    Attestation, AttestationError, ArtifactBundle, ArtifactStore, FileEntry, verify_attested,
};
use modforge::types::JobId;

/// Safe relative path segments: lowercase names under the module root.
fn path_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,8}(/[a-z][a-z0-9_]{0,8}){0,2}\\.py").unwrap()
}

fn file_map_strategy() -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(path_strategy(), prop::collection::vec(any::<u8>(), 0..64), 1..12)
        .prop_map(|m| {
            m.into_iter()
                .map(|(path, bytes)| (format!("modules/w/o/{path}"), bytes))
                .collect()
        })
}

fn build(files: &[(String, Vec<u8>)]) -> ArtifactBundle {
    ArtifactBundle::from_entries(
        files
            .iter()
            .map(|(path, bytes)| FileEntry::new(path.clone(), bytes.clone()).unwrap()),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn digest_is_deterministic(files in file_map_strategy()) {
        let a = build(&files);
        let b = build(&files);
        prop_assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_is_permutation_invariant(files in file_map_strategy(), seed in any::<u64>()) {
        let forward = build(&files);
        // Deterministic permutation driven by the seed.
        let mut shuffled = files.clone();
        let len = shuffled.len();
        let mut state = seed;
        for i in (1..len).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }
        let backward = build(&shuffled);
        prop_assert_eq!(forward.digest(), backward.digest());
    }

    #[test]
    fn content_change_changes_digest(files in file_map_strategy()) {
        let original = build(&files);
        let mut mutated_files = files.clone();
        mutated_files[0].1.push(0xAB);
        let mutated = build(&mutated_files);
        prop_assert_ne!(original.digest(), mutated.digest());
    }

    #[test]
    fn store_round_trip_preserves_identity(files in file_map_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let bundle = build(&files);
        let attempt = modforge::types::AttemptId::new();
        let index = store
            .write_attempt(JobId::new(), attempt, None, None, &bundle)
            .unwrap();
        let (loaded_index, loaded) = store.load_attempt(attempt).unwrap();
        prop_assert_eq!(index.bundle_digest, bundle.digest());
        prop_assert_eq!(loaded_index.bundle_digest, loaded.digest());
        prop_assert_eq!(loaded.digest(), bundle.digest());
    }
}

#[test]
fn diff_is_exhaustive_over_edits() {
    let before = build(&[
        ("modules/w/o/keep.py".to_string(), b"same".to_vec()),
        ("modules/w/o/edit.py".to_string(), b"v1".to_vec()),
        ("modules/w/o/drop.py".to_string(), b"gone".to_vec()),
    ]);
    let after = build(&[
        ("modules/w/o/keep.py".to_string(), b"same".to_vec()),
        ("modules/w/o/edit.py".to_string(), b"v2".to_vec()),
        ("modules/w/o/new.py".to_string(), b"hi".to_vec()),
    ]);
    let diff = ArtifactBundle::diff(&before, &after);
    assert_eq!(diff.added, vec!["modules/w/o/new.py"]);
    assert_eq!(diff.deleted, vec!["modules/w/o/drop.py"]);
    assert_eq!(diff.changed, vec!["modules/w/o/edit.py"]);
}

/// The install guard: a bundle whose recomputed digest disagrees with
/// its attestation must be rejected; the verifying call is the only
/// acceptance path.
#[test]
fn install_guard_rejects_divergent_bundle() {
    let bundle = build(&[("modules/w/o/adapter.py".to_string(), b"x = 1".to_vec())]);
    let attestation = Attestation::new(
        JobId::new(),
        "weather/openweather".parse().unwrap(),
        "0.1.0",
        bundle.digest(),
        "attempts/a/report.json",
    );
    verify_attested(&bundle, &attestation).unwrap();

    let tampered = build(&[("modules/w/o/adapter.py".to_string(), b"x = 2".to_vec())]);
    assert!(matches!(
        verify_attested(&tampered, &attestation),
        Err(AttestationError::DigestMismatch { .. })
    ));
}
