//! Reference [`Storage`] implementation backed by in-process maps.
//!
//! Mirrors the teacher's `cache.rs`: shared, mutable state behind a single
//! `tokio::sync::Mutex`, wrapped in `Arc` so multiple engines (and, in the
//! demo binary, both ends of a sync session) can share one instance when
//! useful, or each get their own.
//!
//! `MemoryStorage` does not parse transactions — callers register a UTXO's
//! input outpoints and hash hints explicitly (via [`MemoryStorage::seed_utxo`])
//! the way a host's real transaction index would already know them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bitcoin::Txid;
use tokio::sync::Mutex;

use crate::error::GaspError;
use crate::types::{compute_txid, InputHash, Node, NodeResponse, Outpoint, RequestedInputMetadata};
use crate::storage::Storage;

/// One UTXO the store already fully knows about: either finalized into the
/// known set, or the seed data a test/demo hands in up front.
#[derive(Debug, Clone)]
struct KnownUtxo {
    raw_tx: Vec<u8>,
    proof: Option<Vec<u8>>,
    tx_metadata: Option<String>,
    output_metadata: Option<String>,
    /// Input outpoint (36-byte form) -> hash hint. `None` if this output is
    /// a coinbase-like root with no ancestors to chase.
    inputs: Option<HashMap<String, InputHash>>,
    /// `None` means "unconfirmed", always included regardless of `since`.
    time: Option<u64>,
}

struct TemporaryGraph {
    nodes: HashMap<(Txid, u32), Node>,
}

struct Inner {
    known: HashMap<Outpoint, KnownUtxo>,
    graphs: HashMap<Outpoint, TemporaryGraph>,
    trusted_anchors: HashSet<Outpoint>,
    wanted_graphs: Option<HashSet<Outpoint>>,
    clock: u64,
}

/// Per-method call counters, exposed for tests that assert on the exact
/// shape of a sync session (spec scenarios "records exactly one
/// appendToGraph", etc.) rather than just its outcome.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub append_to_graph: AtomicU64,
    pub validate_graph_anchor: AtomicU64,
    pub finalize_graph: AtomicU64,
    pub discard_graph: AtomicU64,
}

impl CallCounts {
    fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.append_to_graph.load(Ordering::SeqCst),
            self.validate_graph_anchor.load(Ordering::SeqCst),
            self.finalize_graph.load(Ordering::SeqCst),
            self.discard_graph.load(Ordering::SeqCst),
        )
    }
}

pub struct MemoryStorage {
    inner: Mutex<Inner>,
    max_graph_nodes: usize,
    pub calls: CallCounts,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                known: HashMap::new(),
                graphs: HashMap::new(),
                trusted_anchors: HashSet::new(),
                wanted_graphs: None,
                clock: 0,
            }),
            max_graph_nodes: 10_000,
            calls: CallCounts::default(),
        }
    }

    /// Snapshot of `(appendToGraph, validateGraphAnchor, finalizeGraph,
    /// discardGraph)` call counts so far.
    pub fn call_counts(&self) -> (u64, u64, u64, u64) {
        self.calls.snapshot()
    }

    pub fn with_max_graph_nodes(mut self, max: usize) -> Self {
        self.max_graph_nodes = max;
        self
    }

    /// Register a UTXO as already known, with its input ancestry (if any).
    /// `time` follows `find_known_utxos`'s convention: `None` for
    /// unconfirmed (always returned regardless of `since`).
    pub async fn seed_utxo(
        &self,
        outpoint: Outpoint,
        raw_tx: Vec<u8>,
        inputs: Option<HashMap<Outpoint, String>>,
        time: Option<u64>,
    ) {
        let inputs = inputs.map(|map| {
            map.into_iter()
                .map(|(o, hash)| (o.encode36(), InputHash { hash }))
                .collect()
        });
        let mut inner = self.inner.lock().await;
        inner.known.insert(
            outpoint,
            KnownUtxo {
                raw_tx,
                proof: None,
                tx_metadata: None,
                output_metadata: None,
                inputs,
                time,
            },
        );
    }

    pub async fn mark_chain_proven(&self, outpoint: Outpoint, proof: Vec<u8>) {
        let mut inner = self.inner.lock().await;
        if let Some(utxo) = inner.known.get_mut(&outpoint) {
            utxo.proof = Some(proof);
        }
    }

    pub async fn mark_trusted_anchor(&self, outpoint: Outpoint) {
        self.inner.lock().await.trusted_anchors.insert(outpoint);
    }

    /// Restrict `append_to_graph` to only accept graphs whose tip is in
    /// `tips`. Unset (the default) accepts every graph.
    pub async fn restrict_wanted_graphs(&self, tips: HashSet<Outpoint>) {
        self.inner.lock().await.wanted_graphs = Some(tips);
    }

    pub async fn advance_clock(&self, to: u64) {
        self.inner.lock().await.clock = to;
    }

    pub async fn known_utxo_count(&self) -> usize {
        self.inner.lock().await.known.len()
    }

    /// A node is a frontier leaf of `graph_id` if none of its listed inputs
    /// were materialized as further nodes within this same temporary graph —
    /// either because it has no inputs at all, or because its ancestry
    /// bottoms out in data the host already trusted before this sync (the
    /// known set), rather than continuing deeper into the graph. Nodes whose
    /// inputs *are* present in-graph are interior nodes: their validity is
    /// carried by whatever lies beneath them, so anchor validation skips them
    /// and checks the leaves instead.
    fn is_frontier_leaf(inner: &Inner, node: &Node, graph_id: &Outpoint) -> bool {
        match &node.inputs {
            None => true,
            Some(inputs) => inputs.keys().all(|key| match Outpoint::decode36(key) {
                Some(o) => !inner
                    .graphs
                    .get(graph_id)
                    .is_some_and(|g| g.nodes.contains_key(&(o.txid, o.output_index))),
                None => true,
            }),
        }
    }

    /// Whether every listed input of `node` is already resolved, i.e. sitting
    /// in the known set or materialized elsewhere in `graph_id` — unlike
    /// `is_frontier_leaf`, this doesn't care whether the input lies inside or
    /// outside the graph, only whether it is satisfied *somewhere*. Used to
    /// tell whether a temporary graph has any outstanding fetch left at all.
    fn node_inputs_resolved(inner: &Inner, node: &Node, graph_id: &Outpoint) -> bool {
        match &node.inputs {
            None => true,
            Some(inputs) => inputs.keys().all(|key| {
                Outpoint::decode36(key).is_some_and(|o| {
                    inner.known.contains_key(&o)
                        || inner
                            .graphs
                            .get(graph_id)
                            .is_some_and(|g| g.nodes.contains_key(&(o.txid, o.output_index)))
                })
            }),
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_known_utxos(&self, since: u64) -> Result<Vec<Outpoint>, GaspError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .known
            .iter()
            .filter(|(_, utxo)| utxo.time.map_or(true, |t| t > since))
            .map(|(outpoint, _)| *outpoint)
            .collect())
    }

    async fn hydrate_gasp_node(
        &self,
        graph_id: &Outpoint,
        txid: &Txid,
        output_index: u32,
        metadata: bool,
    ) -> Result<Node, GaspError> {
        let inner = self.inner.lock().await;
        let outpoint = Outpoint::new(*txid, output_index);
        let utxo = inner.known.get(&outpoint).ok_or(GaspError::NotFound)?;
        Ok(Node {
            graph_id: *graph_id,
            raw_tx: utxo.raw_tx.clone(),
            output_index,
            proof: utxo.proof.clone(),
            tx_metadata: metadata.then(|| utxo.tx_metadata.clone()).flatten(),
            output_metadata: metadata.then(|| utxo.output_metadata.clone()).flatten(),
            inputs: metadata.then(|| utxo.inputs.clone()).flatten(),
            spent_by: None,
        })
    }

    async fn find_needed_inputs(&self, node: &Node) -> Result<Option<NodeResponse>, GaspError> {
        let inner = self.inner.lock().await;
        let Some(inputs) = &node.inputs else {
            return Ok(None);
        };
        let mut requested_inputs = HashMap::new();
        for key in inputs.keys() {
            let Some(outpoint) = Outpoint::decode36(key) else {
                continue;
            };
            let have = inner.known.contains_key(&outpoint)
                || inner
                    .graphs
                    .get(&node.graph_id)
                    .is_some_and(|g| g.nodes.contains_key(&(outpoint.txid, outpoint.output_index)));
            if !have {
                requested_inputs.insert(key.clone(), RequestedInputMetadata { metadata: true });
            }
        }
        Ok(Some(NodeResponse { requested_inputs }))
    }

    async fn append_to_graph(&self, node: &Node, spent_by: Option<&str>) -> Result<(), GaspError> {
        self.calls.append_to_graph.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;

        if let Some(wanted) = &inner.wanted_graphs {
            if !wanted.contains(&node.graph_id) {
                return Err(GaspError::Unwanted);
            }
        }

        let graph = inner
            .graphs
            .entry(node.graph_id)
            .or_insert_with(|| TemporaryGraph {
                nodes: HashMap::new(),
            });

        if graph.nodes.len() >= self.max_graph_nodes
            && !graph.nodes.contains_key(&(compute_txid(&node.raw_tx), node.output_index))
        {
            return Err(GaspError::TooLarge);
        }

        let mut stored = node.clone();
        stored.spent_by = spent_by.map(str::to_owned);
        graph
            .nodes
            .insert((compute_txid(&node.raw_tx), node.output_index), stored);
        Ok(())
    }

    async fn validate_graph_anchor(&self, graph_id: &Outpoint) -> Result<(), GaspError> {
        self.calls
            .validate_graph_anchor
            .fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().await;
        let graph = inner.graphs.get(graph_id).ok_or(GaspError::NotFound)?;

        for node in graph.nodes.values() {
            if !Self::is_frontier_leaf(&inner, node, graph_id) {
                continue; // interior node; its ancestors carry the anchor
            }
            let outpoint = Outpoint::new(compute_txid(&node.raw_tx), node.output_index);
            let chain_proven = node.proof.is_some();
            let pretrusted = inner.trusted_anchors.contains(&outpoint);
            if !chain_proven && !pretrusted {
                return Err(GaspError::AnchorInvalid(outpoint));
            }
        }
        Ok(())
    }

    async fn discard_graph(&self, graph_id: &Outpoint) -> Result<(), GaspError> {
        self.calls.discard_graph.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().await.graphs.remove(graph_id);
        Ok(())
    }

    async fn finalize_graph(&self, graph_id: &Outpoint) -> Result<(), GaspError> {
        self.calls.finalize_graph.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        let graph = inner.graphs.remove(graph_id).ok_or(GaspError::NotFound)?;
        let clock = inner.clock;
        for node in graph.nodes.into_values() {
            let outpoint = Outpoint::new(compute_txid(&node.raw_tx), node.output_index);
            inner.known.insert(
                outpoint,
                KnownUtxo {
                    raw_tx: node.raw_tx,
                    proof: node.proof,
                    tx_metadata: node.tx_metadata,
                    output_metadata: node.output_metadata,
                    inputs: node.inputs,
                    time: Some(clock),
                },
            );
        }
        Ok(())
    }

    async fn graph_is_resolved(&self, graph_id: &Outpoint) -> Result<bool, GaspError> {
        let inner = self.inner.lock().await;
        let Some(graph) = inner.graphs.get(graph_id) else {
            return Ok(false);
        };
        Ok(graph
            .nodes
            .values()
            .all(|node| Self::node_inputs_resolved(&inner, node, graph_id)))
    }
}
