mod cli;

use std::sync::Arc;

use clap::Parser;
use eyre::WrapErr;
use rand::Rng;

use gasp_core::{EngineConfig, GaspEngine, MemoryStorage, Outpoint};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let local_storage = Arc::new(MemoryStorage::new().with_max_graph_nodes(args.max_graph_nodes));
    let remote_storage = Arc::new(MemoryStorage::new().with_max_graph_nodes(args.max_graph_nodes));

    seed_synthetic_tips(&local_storage, args.local_tips).await;
    seed_synthetic_tips(&remote_storage, args.remote_tips).await;

    let local = Arc::new(GaspEngine::new(
        local_storage.clone(),
        EngineConfig {
            version: args.version,
            unidirectional: args.unidirectional,
            log_prefix: "local".into(),
            ..Default::default()
        },
    ));
    let remote = Arc::new(GaspEngine::new(
        remote_storage.clone(),
        EngineConfig {
            version: args.version,
            log_prefix: "remote".into(),
            ..Default::default()
        },
    ));

    local.set_remote(remote.clone()).await;
    remote.set_remote(local.clone()).await;

    tracing::info!(
        local_tips = args.local_tips,
        remote_tips = args.remote_tips,
        unidirectional = args.unidirectional,
        "starting sync session"
    );

    let report = local.sync().await.wrap_err("sync session failed")?;

    println!();
    println!("  GASP sync complete:");
    println!("    pulled finalized:  {}", report.pulled_finalized.len());
    println!("    pulled discarded:  {}", report.pulled_discarded.len());
    println!("    pushed finalized:  {}", report.pushed_finalized.len());
    println!("    pushed discarded:  {}", report.pushed_discarded.len());
    println!();
    println!(
        "    local now knows {} UTXOs, remote now knows {} UTXOs",
        local_storage.known_utxo_count().await,
        remote_storage.known_utxo_count().await,
    );

    if report.had_failures() {
        for (graph_id, reason) in report.pulled_discarded.iter().chain(&report.pushed_discarded) {
            tracing::warn!(%graph_id, %reason, "graph discarded during sync");
        }
    }

    Ok(())
}

/// Seed `count` synthetic root UTXOs (no ancestors) into `storage`, each
/// chain-proven so they pass anchor validation on the receiving side.
async fn seed_synthetic_tips(storage: &MemoryStorage, count: usize) {
    let mut rng = rand::thread_rng();
    for _ in 0..count {
        let mut raw_tx = vec![0u8; 32];
        rng.fill(&mut raw_tx[..]);
        let txid = gasp_core::compute_txid(&raw_tx);
        let outpoint = Outpoint::new(txid, 0);
        storage.seed_utxo(outpoint, raw_tx, None, Some(1)).await;
        storage.mark_chain_proven(outpoint, vec![1]).await;
    }
}
