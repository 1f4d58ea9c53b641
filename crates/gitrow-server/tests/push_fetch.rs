//! Push persistence and fetch behaviour against a real data directory

mod common;

use std::sync::Arc;

use chrono::Utc;
use common::{update, Fixture};
use gitrow_server::{FetchPackService, PushPersistenceService};
use libgitrow_core::config::{RetentionConfig, ServerConfig};
use libgitrow_core::types::ids::id_to_hex;
use libgitrow_core::{RefStatus, StoredPack};
use libgitrow_git::decode_pack;
use libgitrow_wire::Notification;

fn services(backend: &Arc<gitrow_server::Backend>) -> (PushPersistenceService, FetchPackService) {
    (
        PushPersistenceService::new(backend.clone()),
        FetchPackService::new(backend.clone()),
    )
}

#[test]
fn test_push_then_fetch_round_trip() {
    let fx = Fixture::new();
    let a = fx.commit("README", "hello", &[]);
    let pack = fx.pack(&[a], &[]);

    let backend = fx.backend();
    let (push, fetch) = services(&backend);
    let outcome = push
        .persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &pack)
        .unwrap();
    assert!(outcome.ok);
    assert_eq!(outcome.results["refs/heads/main"].status, RefStatus::Ok);

    let fetched = fetch.fetch_pack("acme", "widgets", None).unwrap().unwrap();
    assert_eq!(fetched.record.bytes, pack);
    assert!(fetched.stored);

    let refs = backend.store().list_refs("acme", "widgets").unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].name, "refs/heads/main");
    assert_eq!(refs[0].target_oid, a.to_string());
}

#[test]
fn test_repush_is_idempotent() {
    let fx = Fixture::new();
    let a = fx.commit("README", "hello", &[]);
    let pack = fx.pack(&[a], &[]);
    let backend = fx.backend();
    let (push, _) = services(&backend);

    let updates = [update(a, "refs/heads/main", false)];
    let first = push.persist_push("acme", "widgets", &updates, &pack).unwrap();
    let second = push.persist_push("acme", "widgets", &updates, &pack).unwrap();
    assert!(first.ok);
    assert!(second.ok);
    assert_eq!(second.results["refs/heads/main"].message.as_deref(), Some("up to date"));
    assert_eq!(backend.store().pack_count("acme", "widgets"), 1);
    assert_eq!(backend.store().list_audit("acme", "widgets").unwrap().len(), 2);
}

#[test]
fn test_fast_forward_enforcement_and_force() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let b = fx.commit("f", "b", &[a]);
    let side = fx.commit("f", "side", &[a]);
    let backend = fx.backend();
    let (push, _) = services(&backend);

    let pack = fx.pack(&[b, side], &[]);
    assert!(push
        .persist_push("acme", "widgets", &[update(b, "refs/heads/main", false)], &pack)
        .unwrap()
        .ok);

    let rejected = push
        .persist_push("acme", "widgets", &[update(side, "refs/heads/main", false)], &[])
        .unwrap();
    assert!(!rejected.ok);
    let result = &rejected.results["refs/heads/main"];
    assert_eq!(result.status, RefStatus::Error);
    assert!(result.message.as_deref().unwrap().contains("non-fast-forward"));

    let forced = push
        .persist_push("acme", "widgets", &[update(side, "refs/heads/main", true)], &[])
        .unwrap();
    assert!(forced.ok);
    let row = backend.store().get_ref("acme", "widgets", "refs/heads/main").unwrap().unwrap();
    assert_eq!(row.value.target_oid, side.to_string());
}

#[test]
fn test_partial_batch_applies_valid_refs() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let b = fx.commit("f", "b", &[a]);
    let side = fx.commit("f", "side", &[a]);
    let backend = fx.backend();
    let (push, _) = services(&backend);

    let pack = fx.pack(&[a, b], &[]);
    push.persist_push(
        "acme",
        "widgets",
        &[update(a, "refs/heads/main", false), update(b, "refs/heads/other", false)],
        &pack,
    )
    .unwrap();

    let outcome = push
        .persist_push(
            "acme",
            "widgets",
            &[update(b, "refs/heads/main", false), update(side, "refs/heads/other", false)],
            &fx.pack(&[side], &[b]),
        )
        .unwrap();
    assert!(!outcome.ok);
    assert_eq!(outcome.results["refs/heads/main"].status, RefStatus::Ok);
    assert_eq!(outcome.results["refs/heads/other"].status, RefStatus::Error);

    let main = backend.store().get_ref("acme", "widgets", "refs/heads/main").unwrap().unwrap();
    assert_eq!(main.value.target_oid, b.to_string());
    let other = backend.store().get_ref("acme", "widgets", "refs/heads/other").unwrap().unwrap();
    assert_eq!(other.value.target_oid, b.to_string());
}

#[test]
fn test_per_ref_validation_errors() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let pack = fx.pack(&[a], &[]);
    let backend = fx.backend();
    let (push, _) = services(&backend);

    let unknown = "1".repeat(40);
    let outcome = push
        .persist_push(
            "acme",
            "widgets",
            &[
                update(a, "HEAD", false),
                libgitrow_core::PushUpdate::new(unknown.clone(), "refs/heads/ghost", false),
                libgitrow_core::PushUpdate::new("not-an-oid", "refs/heads/bad", false),
                libgitrow_core::PushUpdate::new("0".repeat(40), "refs/heads/old", true),
                update(a, "refs/heads/main", false),
            ],
            &pack,
        )
        .unwrap();
    assert!(!outcome.ok);
    assert_eq!(outcome.results.len(), 5);
    assert_eq!(
        outcome.results["refs/heads/old"].message.as_deref(),
        Some("deleting refs/heads/old is not supported")
    );
    assert!(outcome.results["HEAD"].message.as_deref().unwrap().contains("invalid ref name"));
    assert_eq!(
        outcome.results["refs/heads/ghost"].message.as_deref(),
        Some(format!("object {} not found in any stored pack", unknown).as_str())
    );
    assert_eq!(outcome.results["refs/heads/bad"].status, RefStatus::Error);
    assert_eq!(outcome.results["refs/heads/main"].status, RefStatus::Ok);
    assert!(backend.store().get_ref("acme", "widgets", "refs/heads/ghost").unwrap().is_none());
}

#[test]
fn test_malformed_pack_fails_whole_push() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let mut pack = fx.pack(&[a], &[]);
    let last = pack.len() - 1;
    pack[last] ^= 0xff;

    let backend = fx.backend();
    let (push, _) = services(&backend);
    let err = push
        .persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &pack)
        .unwrap_err();
    assert_eq!(err.status().as_u16(), 422);
    assert_eq!(backend.store().pack_count("acme", "widgets"), 0);
    assert!(backend.store().list_refs("acme", "widgets").unwrap().is_empty());
}

#[test]
fn test_empty_pack_for_known_objects() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let backend = fx.backend();
    let (push, _) = services(&backend);

    push.persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &fx.pack(&[a], &[]))
        .unwrap();
    let outcome = push
        .persist_push("acme", "widgets", &[update(a, "refs/tags/v1", false)], &[])
        .unwrap();
    assert!(outcome.ok);
    assert_eq!(backend.store().pack_count("acme", "widgets"), 1);
}

#[test]
fn test_oversized_pack_is_refused() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let pack = fx.pack(&[a], &[]);
    let config = ServerConfig {
        max_pack_bytes: 16,
        ..fx.config()
    };
    let (backend, _) = fx.backend_with(config);
    let (push, _) = services(&backend);

    let err = push
        .persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &pack)
        .unwrap_err();
    assert_eq!(err.status().as_u16(), 413);
}

#[test]
fn test_ancestry_walk_limit_rejects() {
    let fx = Fixture::new();
    let root = fx.commit("f", "0", &[]);
    let mut tip = root;
    for i in 1..6 {
        tip = fx.commit("f", &i.to_string(), &[tip]);
    }
    let config = ServerConfig {
        ancestry_walk_limit: 2,
        ..fx.config()
    };
    let (backend, _) = fx.backend_with(config);
    let (push, _) = services(&backend);

    push.persist_push("acme", "widgets", &[update(root, "refs/heads/main", false)], &fx.pack(&[tip], &[]))
        .unwrap();
    let outcome = push
        .persist_push("acme", "widgets", &[update(tip, "refs/heads/main", false)], &[])
        .unwrap();
    let message = outcome.results["refs/heads/main"].message.clone().unwrap();
    assert!(message.contains("non-fast-forward"), "{}", message);
}

#[test]
fn test_notifications_follow_push() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let (backend, sink) = fx.backend_with(fx.config());
    let mut rx = sink.subscribe();
    let (push, _) = services(&backend);

    push.persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &fx.pack(&[a], &[]))
        .unwrap();

    match rx.try_recv().unwrap() {
        Notification::PackStored { repo, size, .. } => {
            assert_eq!(repo, "widgets");
            assert!(size > 0);
        }
        other => panic!("unexpected {:?}", other),
    }
    match rx.try_recv().unwrap() {
        Notification::RefUpdated {
            ref_name,
            old_target,
            new_target,
            forced,
            ..
        } => {
            assert_eq!(ref_name, "refs/heads/main");
            assert_eq!(old_target, None);
            assert_eq!(new_target, a.to_string());
            assert!(!forced);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_fetch_with_wants_returns_full_closure() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let b = fx.commit("f", "b", &[a]);
    let backend = fx.backend();
    let (push, fetch) = services(&backend);

    push.persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &fx.pack(&[a], &[]))
        .unwrap();
    let incremental = fx.pack(&[b], &[a]);
    push.persist_push("acme", "widgets", &[update(b, "refs/heads/main", false)], &incremental)
        .unwrap();

    let latest = fetch.fetch_pack("acme", "widgets", None).unwrap().unwrap();
    assert_eq!(latest.record.bytes, incremental);

    let wanted = fetch
        .fetch_pack("acme", "widgets", Some(&[b.to_string()]))
        .unwrap()
        .unwrap();
    assert!(!wanted.stored);
    assert_eq!(decode_pack(&wanted.record.bytes).unwrap().objects.len(), 6);

    let missing = fetch
        .fetch_pack("acme", "widgets", Some(&[b.to_string(), "3".repeat(40)]))
        .unwrap();
    assert!(missing.is_none());
    assert!(fetch.fetch_pack("acme", "nothing-here", None).unwrap().is_none());
}

#[test]
fn test_malformed_stored_pack_reads_as_missing() {
    let fx = Fixture::new();
    let backend = fx.backend();
    let (_, fetch) = services(&backend);

    let broken = StoredPack {
        pack_oid: "f".repeat(40),
        encoding: "base64".to_string(),
        data: "%%% not base64 %%%".to_string(),
        size: 10,
        created_at: Utc::now(),
    };
    backend.store().insert_stored("acme", "widgets", &broken).unwrap();
    assert!(fetch.fetch_pack("acme", "widgets", None).unwrap().is_none());
}

#[test]
fn test_mirror_is_rebuilt_from_rows() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let b = fx.commit("f", "b", &[a]);

    {
        let backend = fx.backend();
        let (push, _) = services(&backend);
        push.persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &fx.pack(&[a], &[]))
            .unwrap();
    }
    std::fs::remove_dir_all(fx.data.path().join("mirrors")).unwrap();

    let backend = fx.backend();
    let (push, _) = services(&backend);
    let outcome = push
        .persist_push("acme", "widgets", &[update(b, "refs/heads/main", false)], &fx.pack(&[b], &[a]))
        .unwrap();
    assert!(outcome.ok, "{:?}", outcome);
}

#[test]
fn test_retention_consolidates_history() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let b = fx.commit("f", "b", &[a]);
    let config = ServerConfig {
        retention: RetentionConfig {
            keep_recent: Some(1),
        },
        ..fx.config()
    };
    let (backend, sink) = fx.backend_with(config);
    let mut rx = sink.subscribe();
    let (push, fetch) = services(&backend);

    push.persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &fx.pack(&[a], &[]))
        .unwrap();
    assert_eq!(backend.store().pack_count("acme", "widgets"), 1);
    push.persist_push("acme", "widgets", &[update(b, "refs/heads/main", false)], &fx.pack(&[b], &[a]))
        .unwrap();
    assert_eq!(backend.store().pack_count("acme", "widgets"), 1);

    let latest = fetch.fetch_pack("acme", "widgets", None).unwrap().unwrap();
    assert_eq!(decode_pack(&latest.record.bytes).unwrap().objects.len(), 6);

    let mut pruned = false;
    while let Ok(n) = rx.try_recv() {
        if let Notification::PacksPruned { removed, .. } = n {
            assert_eq!(removed.len(), 2);
            pruned = true;
        }
    }
    assert!(pruned);
}

#[test]
fn test_pruned_objects_cannot_back_a_ref() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let unrelated = fx.commit("g", "unrelated", &[]);
    let config = ServerConfig {
        retention: RetentionConfig {
            keep_recent: Some(1),
        },
        ..fx.config()
    };
    let (backend, _sink) = fx.backend_with(config);
    let (push, _) = services(&backend);

    push.persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &fx.pack(&[a], &[]))
        .unwrap();
    let rejected = push
        .persist_push(
            "acme",
            "widgets",
            &[update(unrelated, "refs/heads/main", false)],
            &fx.pack(&[unrelated], &[]),
        )
        .unwrap();
    assert_eq!(rejected.results["refs/heads/main"].status, RefStatus::Error);

    // retention dropped the only row holding `unrelated`
    let rows = backend.store().list_packs("acme", "widgets").unwrap();
    let held = rows.iter().any(|stored| {
        let record = stored.decode("acme", "widgets").unwrap();
        decode_pack(&record.bytes)
            .unwrap()
            .objects
            .iter()
            .any(|o| id_to_hex(&o.oid) == unrelated.to_string())
    });
    assert!(!held);

    let outcome = push
        .persist_push("acme", "widgets", &[update(unrelated, "refs/heads/other", false)], &[])
        .unwrap();
    assert_eq!(outcome.results["refs/heads/other"].status, RefStatus::Error);
    assert!(backend.store().get_ref("acme", "widgets", "refs/heads/other").unwrap().is_none());

    // history reachable from refs survives the rebuild
    let outcome = push
        .persist_push("acme", "widgets", &[update(a, "refs/tags/v1", false)], &[])
        .unwrap();
    assert!(outcome.ok);
}

#[test]
fn test_pack_the_mirror_refuses_leaves_no_row() {
    use sha1::{Digest, Sha1};

    let fx = Fixture::new();
    let backend = fx.backend();
    let (push, _) = services(&backend);

    // sealed header and trailer around an entry that is not zlib
    let mut pack = b"PACK".to_vec();
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&1u32.to_be_bytes());
    pack.extend_from_slice(&[0x35, 0xde, 0xad, 0xbe, 0xef]);
    let digest = Sha1::digest(&pack);
    pack.extend_from_slice(&digest);

    let a = fx.commit("f", "a", &[]);
    assert!(push
        .persist_push("acme", "widgets", &[update(a, "refs/heads/main", false)], &pack)
        .is_err());
    assert_eq!(backend.store().pack_count("acme", "widgets"), 0);
}
