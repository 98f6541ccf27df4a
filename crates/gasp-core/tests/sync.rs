//! End-to-end sync scenarios, run with two `GaspEngine`s wired as each
//! other's remote (spec §9's in-process test setup).

use std::collections::HashMap;
use std::sync::{Arc, Once};

use gasp_core::{compute_txid, EngineConfig, GaspEngine, GaspError, MemoryStorage, Outpoint};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gasp_core=debug")),
            )
            .with_target(true)
            .try_init();
    });
}

fn txid(byte: u8) -> bitcoin::Txid {
    compute_txid(&[byte; 4])
}

async fn wire(a: &Arc<GaspEngine>, b: &Arc<GaspEngine>) {
    a.set_remote(b.clone()).await;
    b.set_remote(a.clone()).await;
}

#[tokio::test]
async fn single_tip_pull_only() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let tip = Outpoint::new(txid(1), 0);
    b_storage.seed_utxo(tip, vec![1, 1, 1], None, Some(1)).await;
    // The proof travels with the node when B serves it; A (the validator)
    // never needs its own trust/proof entry.
    b_storage.mark_chain_proven(tip, vec![1]).await;

    let a = Arc::new(GaspEngine::new(
        a_storage.clone(),
        EngineConfig {
            unidirectional: true,
            ..Default::default()
        },
    ));
    let b = Arc::new(GaspEngine::new(b_storage.clone(), EngineConfig::default()));
    wire(&a, &b).await;

    let report = a.sync().await.expect("sync succeeds");
    assert_eq!(report.pulled_finalized, vec![tip]);
    assert!(report.pulled_discarded.is_empty());
    assert_eq!(a_storage.known_utxo_count().await, 1);
    // Unidirectional: B never learns anything from A.
    assert_eq!(b_storage.known_utxo_count().await, 1);

    let (appends, validates, finalizes, discards) = a_storage.call_counts();
    assert_eq!((appends, validates, finalizes, discards), (1, 1, 1, 0));
}

#[tokio::test]
async fn already_synced_peers_perform_no_storage_mutations() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let tip = Outpoint::new(txid(42), 0);
    a_storage.seed_utxo(tip, vec![42], None, Some(1)).await;
    a_storage.mark_trusted_anchor(tip).await;
    b_storage.seed_utxo(tip, vec![42], None, Some(1)).await;
    b_storage.mark_trusted_anchor(tip).await;

    let a = Arc::new(GaspEngine::new(a_storage.clone(), EngineConfig::default()));
    let b = Arc::new(GaspEngine::new(b_storage.clone(), EngineConfig::default()));
    wire(&a, &b).await;

    let report = a.sync().await.expect("sync succeeds");
    assert!(report.pulled_finalized.is_empty());
    assert!(report.pushed_finalized.is_empty());
    assert!(!report.had_failures());

    let (appends, validates, finalizes, discards) = a_storage.call_counts();
    assert_eq!((appends, validates, finalizes, discards), (0, 0, 0, 0));
    let (appends, validates, finalizes, discards) = b_storage.call_counts();
    assert_eq!((appends, validates, finalizes, discards), (0, 0, 0, 0));
}

#[tokio::test]
async fn symmetric_exchange_reaches_both_peers() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    // a_tip is pushed by A and validated by B; b_tip is pulled by A and
    // validated by A. Proof is registered on whichever side serves the node,
    // since that's what travels across `hydrateGASPNode`.
    let a_tip = Outpoint::new(txid(1), 0);
    a_storage.seed_utxo(a_tip, vec![1], None, Some(1)).await;
    a_storage.mark_chain_proven(a_tip, vec![1]).await;

    let b_tip = Outpoint::new(txid(2), 0);
    b_storage.seed_utxo(b_tip, vec![2], None, Some(1)).await;
    b_storage.mark_chain_proven(b_tip, vec![2]).await;

    let a = Arc::new(GaspEngine::new(a_storage.clone(), EngineConfig::default()));
    let b = Arc::new(GaspEngine::new(b_storage.clone(), EngineConfig::default()));
    wire(&a, &b).await;

    // Only A initiates. B is entirely passive.
    let report = a.sync().await.expect("sync succeeds");

    assert_eq!(report.pulled_finalized, vec![b_tip]);
    assert_eq!(report.pushed_finalized, vec![a_tip]);
    assert_eq!(a_storage.known_utxo_count().await, 2);
    assert_eq!(b_storage.known_utxo_count().await, 2);
}

#[tokio::test]
async fn untrusted_unproven_tip_is_discarded() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let tip = Outpoint::new(txid(3), 0);
    // B offers the tip, but A never marks it chain-proven or trusted.
    b_storage.seed_utxo(tip, vec![3], None, Some(1)).await;

    let a = Arc::new(GaspEngine::new(
        a_storage.clone(),
        EngineConfig {
            unidirectional: true,
            ..Default::default()
        },
    ));
    let b = Arc::new(GaspEngine::new(b_storage.clone(), EngineConfig::default()));
    wire(&a, &b).await;

    let report = a.sync().await.expect("sync itself still completes");
    assert!(report.pulled_finalized.is_empty());
    assert_eq!(report.pulled_discarded.len(), 1);
    assert_eq!(report.pulled_discarded[0].0, tip);
    assert_eq!(a_storage.known_utxo_count().await, 0);
}

#[tokio::test]
async fn deep_graph_pulls_its_ancestor() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let ancestor = Outpoint::new(txid(5), 0);
    let tip = Outpoint::new(txid(6), 0);

    // Time 0 keeps `ancestor` out of B's own top-level known-UTXO listing
    // (A's initial `since` is 0), so it only reaches A as `tip`'s ancestor,
    // not as a second independently-offered tip. It's still chain-proven:
    // the real frontier leaf here, while `tip` (interior, its only input is
    // in-graph) needs no anchor of its own.
    b_storage
        .seed_utxo(ancestor, vec![5], None, Some(0))
        .await;
    b_storage.mark_chain_proven(ancestor, vec![5]).await;

    let mut tip_inputs = HashMap::new();
    tip_inputs.insert(ancestor, "ancestor-hash".to_string());
    b_storage
        .seed_utxo(tip, vec![6], Some(tip_inputs), Some(2))
        .await;

    let a = Arc::new(GaspEngine::new(
        a_storage.clone(),
        EngineConfig {
            unidirectional: true,
            ..Default::default()
        },
    ));
    let b = Arc::new(GaspEngine::new(b_storage.clone(), EngineConfig::default()));
    wire(&a, &b).await;

    let report = a.sync().await.expect("sync succeeds");
    assert_eq!(report.pulled_finalized, vec![tip]);
    assert_eq!(a_storage.known_utxo_count().await, 2);
}

#[tokio::test]
async fn deep_graph_push_finalizes_once_the_whole_graph_resolves() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let ancestor = Outpoint::new(txid(11), 0);
    let tip = Outpoint::new(txid(12), 0);

    // A pushes the tip first and the ancestor afterward (spec push order).
    // `ancestor` stays out of A's own top-level listing so only `tip` is
    // offered as a push target; the ancestor arrives at B purely as a
    // dependency of the tip submission.
    a_storage
        .seed_utxo(ancestor, vec![11], None, Some(0))
        .await;
    a_storage.mark_chain_proven(ancestor, vec![11]).await;

    let mut tip_inputs = HashMap::new();
    tip_inputs.insert(ancestor, "ancestor-hash".to_string());
    a_storage
        .seed_utxo(tip, vec![12], Some(tip_inputs), Some(1))
        .await;

    let a = Arc::new(GaspEngine::new(a_storage.clone(), EngineConfig::default()));
    let b = Arc::new(GaspEngine::new(b_storage.clone(), EngineConfig::default()));
    wire(&a, &b).await;

    let report = a.sync().await.expect("sync succeeds");

    assert_eq!(report.pushed_finalized, vec![tip]);
    assert!(report.pushed_discarded.is_empty());
    assert_eq!(b_storage.known_utxo_count().await, 2);

    let (appends, validates, finalizes, discards) = b_storage.call_counts();
    assert_eq!(appends, 2);
    assert_eq!(validates, 1);
    assert_eq!(finalizes, 1);
    assert_eq!(discards, 0);
}

#[tokio::test]
async fn mutually_referencing_nodes_do_not_hang() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let tip = Outpoint::new(txid(7), 0);
    let other = Outpoint::new(txid(8), 0);

    let mut tip_inputs = HashMap::new();
    tip_inputs.insert(other, "other-hash".to_string());
    b_storage
        .seed_utxo(tip, vec![7], Some(tip_inputs), Some(1))
        .await;

    // `other` is excluded from B's top-level listing (time 0 <= since 0) so
    // it only reaches A as `tip`'s ancestor, not as its own independent pull
    // target. Neither node is a frontier leaf of the resulting graph — each
    // one's single input is the other, materialized in-graph — so the
    // mutual cycle validates its anchor vacuously; this test is purely about
    // the recursive walk terminating, not about anchor trust.
    let mut other_inputs = HashMap::new();
    other_inputs.insert(tip, "tip-hash".to_string());
    b_storage
        .seed_utxo(other, vec![8], Some(other_inputs), Some(0))
        .await;

    let a = Arc::new(GaspEngine::new(
        a_storage.clone(),
        EngineConfig {
            unidirectional: true,
            ..Default::default()
        },
    ));
    let b = Arc::new(GaspEngine::new(b_storage.clone(), EngineConfig::default()));
    wire(&a, &b).await;

    let report = tokio::time::timeout(std::time::Duration::from_secs(5), a.sync())
        .await
        .expect("sync terminates despite the cycle")
        .expect("sync succeeds");

    assert_eq!(report.pulled_finalized, vec![tip]);
    assert_eq!(a_storage.known_utxo_count().await, 2);
}

#[tokio::test]
async fn since_filters_out_previously_seen_tips() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let tip1 = Outpoint::new(txid(9), 0);
    b_storage.seed_utxo(tip1, vec![9], None, Some(1)).await;
    b_storage.mark_chain_proven(tip1, vec![9]).await;
    b_storage.advance_clock(10).await;

    let a = Arc::new(GaspEngine::new(
        a_storage.clone(),
        EngineConfig {
            unidirectional: true,
            ..Default::default()
        },
    ));
    let b = Arc::new(GaspEngine::new(b_storage.clone(), EngineConfig::default()));
    wire(&a, &b).await;

    a.sync().await.expect("first sync succeeds");
    assert_eq!(a_storage.known_utxo_count().await, 1);

    let tip2 = Outpoint::new(txid(10), 0);
    b_storage.seed_utxo(tip2, vec![10], None, Some(15)).await;
    b_storage.mark_chain_proven(tip2, vec![10]).await;
    b_storage.advance_clock(20).await;

    let report = a.sync().await.expect("second sync succeeds");
    assert_eq!(report.pulled_finalized, vec![tip2]);
    assert_eq!(a_storage.known_utxo_count().await, 2);
}

#[tokio::test]
async fn version_mismatch_is_session_fatal() {
    init_tracing();
    let a_storage = Arc::new(MemoryStorage::new());
    let b_storage = Arc::new(MemoryStorage::new());

    let a = Arc::new(GaspEngine::new(
        a_storage,
        EngineConfig {
            version: 2,
            ..Default::default()
        },
    ));
    let b = Arc::new(GaspEngine::new(
        b_storage,
        EngineConfig {
            version: 1,
            ..Default::default()
        },
    ));
    wire(&a, &b).await;

    let err = a.sync().await.unwrap_err();
    match err {
        GaspError::VersionMismatch { current, foreign } => {
            assert_eq!(current, 2);
            assert_eq!(foreign, 1);
        }
        other => panic!("expected VersionMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn sync_without_a_remote_fails_cleanly() {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let engine = GaspEngine::new(storage, EngineConfig::default());
    let err = engine.sync().await.unwrap_err();
    assert!(matches!(err, GaspError::NoRemote));
}
