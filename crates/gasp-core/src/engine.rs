//! `GaspEngine` — the session driver (spec §4.1).
//!
//! Drives one sync session: builds the handshake, walks incoming graphs
//! recursively to fetch needed ancestors (pull), and pushes outgoing
//! graphs while satisfying the peer's follow-up ancestor requests (push).
//! `GaspEngine` also implements [`Remote`] itself, so two engines can be
//! wired as each other's peer in the same process (spec §9).

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;
use tokio::sync::{Mutex, RwLock};

use crate::error::{GaspError, GraphError};
use crate::remote::Remote;
use crate::storage::Storage;
use crate::types::{
    compute_txid, InitialReply, InitialRequest, InitialResponse, Node, Outpoint,
};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A seen-set keyed by `(txid(rawTx), outputIndex)`, scoped to one
/// top-level graph recursion (spec §5: "the seen-set is scoped to one
/// root recursion; each top-level graph gets its own").
type SeenSet = Mutex<HashSet<(Txid, u32)>>;

// ==============================================================================
// Configuration
// ==============================================================================

/// Engine configuration (spec §4.1): `storage` and `remote` are supplied
/// separately (`remote` is late-bound via [`GaspEngine::set_remote`], see
/// the module doc and DESIGN.md).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The peer's clock as of the last completed session, used as `since`
    /// on the next `InitialRequest`. Defaults to 0 (full sync).
    pub last_interaction: u64,
    /// Prefix attached to every log line this engine emits.
    pub log_prefix: String,
    /// Whether to emit log lines at all.
    pub log: bool,
    /// Pull-only mode: skip the push phase entirely.
    pub unidirectional: bool,
    /// Protocol version this engine speaks.
    pub version: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            last_interaction: 0,
            log_prefix: String::new(),
            log: true,
            unidirectional: false,
            version: 1,
        }
    }
}

// ==============================================================================
// Sync Report
// ==============================================================================

/// Summary of one `sync()` call: which top-level graphs were finalized or
/// discarded, on each side. Not part of the wire protocol — purely for
/// callers (tests, the demo binary) to observe what happened.
#[derive(Debug, Default, Clone)]
pub struct SyncReport {
    pub pulled_finalized: Vec<Outpoint>,
    pub pulled_discarded: Vec<(Outpoint, String)>,
    pub pushed_finalized: Vec<Outpoint>,
    pub pushed_discarded: Vec<(Outpoint, String)>,
}

impl SyncReport {
    pub fn had_failures(&self) -> bool {
        !self.pulled_discarded.is_empty() || !self.pushed_discarded.is_empty()
    }
}

enum GraphOutcome {
    Finalized(Outpoint),
    Discarded(Outpoint, String),
}

// ==============================================================================
// Engine
// ==============================================================================

pub struct GaspEngine {
    storage: Arc<dyn Storage>,
    remote: RwLock<Option<Arc<dyn Remote>>>,
    config: EngineConfig,
    last_interaction: AtomicU64,
}

impl GaspEngine {
    /// Construct an engine with no remote wired in yet. Per spec §9's
    /// design note on bidirectional peer wiring, call [`Self::set_remote`]
    /// once the peer is available (two-phase construction — necessary
    /// when two engines must each hold the other).
    pub fn new(storage: Arc<dyn Storage>, config: EngineConfig) -> Self {
        let last_interaction = AtomicU64::new(config.last_interaction);
        Self {
            storage,
            remote: RwLock::new(None),
            config,
            last_interaction,
        }
    }

    pub async fn set_remote(&self, remote: Arc<dyn Remote>) {
        *self.remote.write().await = Some(remote);
    }

    async fn remote(&self) -> Result<Arc<dyn Remote>, GaspError> {
        self.remote.read().await.clone().ok_or(GaspError::NoRemote)
    }

    fn log_warn(&self, message: impl std::fmt::Display) {
        if self.config.log {
            tracing::warn!(prefix = %self.config.log_prefix, "{message}");
        }
    }

    fn log_info(&self, message: impl std::fmt::Display) {
        if self.config.log {
            tracing::info!(prefix = %self.config.log_prefix, "{message}");
        }
    }

    // ==========================================================================
    // Operations exposed to a peer (spec §4.1.1)
    // ==========================================================================

    /// Responder side of the handshake. Fails with [`GaspError::VersionMismatch`]
    /// before touching `Storage` at all if the caller's version disagrees
    /// with ours (spec §8, "Version fatality").
    pub async fn get_initial_response(
        &self,
        req: InitialRequest,
    ) -> Result<InitialResponse, GaspError> {
        if req.version != self.config.version {
            return Err(GaspError::VersionMismatch {
                current: self.config.version,
                foreign: req.version,
            });
        }
        let utxo_list = self.storage.find_known_utxos(req.since).await?;
        Ok(InitialResponse {
            utxo_list,
            since: self.last_interaction.load(Ordering::SeqCst),
            version: Some(self.config.version),
        })
    }

    /// Compute which of our own known tips are absent from `resp.utxo_list`.
    /// Per the Open Question resolution in DESIGN.md, `sync()`'s push phase
    /// calls this on `self` using its own `Storage` — it is exposed on
    /// [`Remote`] too only so a peer could query it symmetrically.
    pub async fn get_initial_reply(
        &self,
        resp: &InitialResponse,
    ) -> Result<InitialReply, GaspError> {
        let mine = self.storage.find_known_utxos(resp.since).await?;
        let known: HashSet<Outpoint> = resp.utxo_list.iter().copied().collect();
        let utxo_list = mine.into_iter().filter(|o| !known.contains(o)).collect();
        Ok(InitialReply { utxo_list })
    }

    /// Materialize a node we already have, for a peer that is pulling it.
    pub async fn request_node(
        &self,
        graph_id: Outpoint,
        txid: Txid,
        output_index: u32,
        metadata: bool,
    ) -> Result<Node, GaspError> {
        self.storage
            .hydrate_gasp_node(&graph_id, &txid, output_index, metadata)
            .await
    }

    /// Inbound handler for a node pushed to us. Appends it, reports what we
    /// still need, and — if this completes the graph — validates and
    /// finalizes. On failure, discards the graph and propagates the error
    /// so the pusher can abandon that branch (spec §4.1.1, §4.1.3, §7).
    pub async fn submit_node(
        &self,
        node: Node,
    ) -> Result<Option<crate::types::NodeResponse>, GaspError> {
        let graph_id = node.graph_id;
        match self.accept_pushed_node(&node).await {
            Ok(response) => Ok(response),
            Err(err) => {
                self.log_warn(format!(
                    "discarding graph {graph_id} after submitNode failure: {err}"
                ));
                if let Err(discard_err) = self.storage.discard_graph(&graph_id).await {
                    self.log_warn(format!(
                        "discardGraph also failed for {graph_id}: {discard_err}"
                    ));
                }
                Err(err)
            }
        }
    }

    async fn accept_pushed_node(
        &self,
        node: &Node,
    ) -> Result<Option<crate::types::NodeResponse>, GaspError> {
        self.storage
            .append_to_graph(node, node.spent_by.as_deref())
            .await?;
        let needed = self.storage.find_needed_inputs(node).await?;
        let needs_more = needed.as_ref().is_some_and(|n| !n.is_empty());
        if needs_more {
            return Ok(needed);
        }
        // The pusher submits the tip first, so the node that closes out the
        // graph is usually an ancestor, not the tip itself — check the whole
        // graph's resolution rather than gating on `node.is_tip()`.
        if self.storage.graph_is_resolved(&node.graph_id).await? {
            self.storage.validate_graph_anchor(&node.graph_id).await?;
            self.storage.finalize_graph(&node.graph_id).await?;
        }
        Ok(None)
    }

    // ==========================================================================
    // sync() — session orchestrator (spec §4.1.2)
    // ==========================================================================

    pub async fn sync(&self) -> Result<SyncReport, GaspError> {
        let remote = self.remote().await?;

        let since = self.last_interaction.load(Ordering::SeqCst);
        let req = InitialRequest {
            version: self.config.version,
            since,
        };

        let resp = match remote.get_initial_response(req).await {
            Ok(resp) => resp,
            // The responder raises VersionMismatch from its own perspective
            // (current = its version). Re-raise from ours: its `current`
            // is our `foreign`, and we already know our own `current`.
            Err(GaspError::VersionMismatch { current: foreign, .. }) => {
                return Err(GaspError::VersionMismatch {
                    current: self.config.version,
                    foreign,
                })
            }
            Err(other) => return Err(other),
        };

        // Some implementations piggy-back their version directly on the
        // response instead of rejecting the request outright.
        if let Some(foreign) = resp.version {
            if foreign != self.config.version {
                return Err(GaspError::VersionMismatch {
                    current: self.config.version,
                    foreign,
                });
            }
        }

        self.last_interaction.store(resp.since, Ordering::SeqCst);

        let mut report = SyncReport::default();

        // Pull phase: fetch every tip we don't already know about.
        let locally_known: HashSet<Outpoint> =
            self.storage.find_known_utxos(0).await?.into_iter().collect();
        let pulls: Vec<Outpoint> = resp
            .utxo_list
            .iter()
            .filter(|o| !locally_known.contains(o))
            .copied()
            .collect();

        let outcomes =
            futures::future::join_all(pulls.into_iter().map(|tip| self.pull_tip(&remote, tip)))
                .await;
        for outcome in outcomes {
            match outcome {
                GraphOutcome::Finalized(tip) => report.pulled_finalized.push(tip),
                GraphOutcome::Discarded(tip, reason) => {
                    report.pulled_discarded.push((tip, reason))
                }
            }
        }

        // Push phase.
        if !self.config.unidirectional {
            let reply = self.get_initial_reply(&resp).await?;
            let outcomes = futures::future::join_all(
                reply
                    .utxo_list
                    .into_iter()
                    .map(|tip| self.push_tip(&remote, tip)),
            )
            .await;
            for outcome in outcomes {
                match outcome {
                    GraphOutcome::Finalized(tip) => report.pushed_finalized.push(tip),
                    GraphOutcome::Discarded(tip, reason) => {
                        report.pushed_discarded.push((tip, reason))
                    }
                }
            }
        }

        Ok(report)
    }

    // ==========================================================================
    // Pull: incoming-node processing (spec §4.1.3)
    // ==========================================================================

    async fn pull_tip(&self, remote: &Arc<dyn Remote>, tip: Outpoint) -> GraphOutcome {
        let seen: SeenSet = Mutex::new(HashSet::new());
        let result = async {
            let mut node = remote
                .request_node(tip, tip.txid, tip.output_index, true)
                .await
                .map_err(|e| GraphError::new(tip, e))?;
            node.spent_by = None;
            self.pull_node(remote, node, &seen).await
        }
        .await;

        match result {
            Ok(()) => GraphOutcome::Finalized(tip),
            Err(err) => {
                self.log_warn(format!(
                    "discarding graph {} after pull failure: {}",
                    err.graph_id, err.source
                ));
                if let Err(discard_err) = self.storage.discard_graph(&err.graph_id).await {
                    self.log_warn(format!(
                        "discardGraph also failed for {}: {discard_err}",
                        err.graph_id
                    ));
                }
                GraphOutcome::Discarded(err.graph_id, err.source.to_string())
            }
        }
    }

    /// Recursive per-node pull: append, ask Storage what's still needed,
    /// fetch and recurse into each requested ancestor, and — once back at
    /// the tip (`spent_by == None`) — validate and finalize.
    fn pull_node<'a>(
        &'a self,
        remote: &'a Arc<dyn Remote>,
        node: Node,
        seen: &'a SeenSet,
    ) -> BoxFuture<'a, Result<(), GraphError>> {
        Box::pin(async move {
            let id = node.identity();
            {
                let mut seen_guard = seen.lock().await;
                if !seen_guard.insert(id) {
                    // Cycle guard: already walked this (txid, outputIndex).
                    return Ok(());
                }
            }

            let graph_id = node.graph_id;
            self.storage
                .append_to_graph(&node, node.spent_by.as_deref())
                .await
                .map_err(|e| GraphError::new(graph_id, e))?;

            let needed = self
                .storage
                .find_needed_inputs(&node)
                .await
                .map_err(|e| GraphError::new(graph_id, e))?;

            if let Some(needed) = needed {
                if !needed.is_empty() {
                    let parent_id =
                        Outpoint::new(compute_txid(&node.raw_tx), node.output_index).encode36();

                    // Sibling ancestor fetches fan out in parallel; we
                    // collect every outcome before deciding the graph
                    // failed, rather than cancelling in-flight siblings on
                    // the first error (spec §9, "partial-failure fan-out").
                    let fetches = needed.requested_inputs.into_iter().map(|(key, meta)| {
                        let remote = remote.clone();
                        let parent_id = parent_id.clone();
                        async move {
                            let outpoint = Outpoint::decode36(&key).ok_or_else(|| {
                                GraphError::new(
                                    graph_id,
                                    GaspError::Transport(format!(
                                        "malformed requested-input outpoint: {key}"
                                    )),
                                )
                            })?;
                            let mut child = remote
                                .request_node(
                                    graph_id,
                                    outpoint.txid,
                                    outpoint.output_index,
                                    meta.metadata,
                                )
                                .await
                                .map_err(|e| GraphError::new(graph_id, e))?;
                            child.spent_by = Some(parent_id);
                            Ok::<Node, GraphError>(child)
                        }
                    });
                    let children = futures::future::join_all(fetches).await;

                    let mut recursions = Vec::with_capacity(children.len());
                    for child in children {
                        recursions.push(self.pull_node(remote, child?, seen));
                    }
                    for result in futures::future::join_all(recursions).await {
                        result?;
                    }
                }
            }

            if node.is_tip() {
                self.storage
                    .validate_graph_anchor(&graph_id)
                    .await
                    .map_err(|e| GraphError::new(graph_id, e))?;
                self.storage
                    .finalize_graph(&graph_id)
                    .await
                    .map_err(|e| GraphError::new(graph_id, e))?;
                self.log_info(format!("finalized graph {graph_id}"));
            }

            Ok(())
        })
    }

    // ==========================================================================
    // Push: outgoing-node processing (spec §4.1.4)
    // ==========================================================================

    async fn push_tip(&self, remote: &Arc<dyn Remote>, tip: Outpoint) -> GraphOutcome {
        let seen: SeenSet = Mutex::new(HashSet::new());
        let result = async {
            let mut node = self
                .storage
                .hydrate_gasp_node(&tip, &tip.txid, tip.output_index, true)
                .await
                .map_err(|e| GraphError::new(tip, e))?;
            node.spent_by = None;
            self.push_node(remote, node, &seen).await
        }
        .await;

        match result {
            Ok(()) => GraphOutcome::Finalized(tip),
            Err(err) => {
                // Outgoing failures never touch our own storage (we never
                // appended anything locally); just log and abandon the
                // branch (spec §7).
                self.log_warn(format!(
                    "abandoning push of graph {} after failure: {}",
                    err.graph_id, err.source
                ));
                GraphOutcome::Discarded(err.graph_id, err.source.to_string())
            }
        }
    }

    /// Recursive per-node push: submit, and for each ancestor the peer
    /// still wants, hydrate it locally and recurse. Never appends or
    /// finalizes locally — it only answers the peer's follow-up requests.
    fn push_node<'a>(
        &'a self,
        remote: &'a Arc<dyn Remote>,
        node: Node,
        seen: &'a SeenSet,
    ) -> BoxFuture<'a, Result<(), GraphError>> {
        Box::pin(async move {
            let id = node.identity();
            {
                let mut seen_guard = seen.lock().await;
                if !seen_guard.insert(id) {
                    return Ok(());
                }
            }

            let graph_id = node.graph_id;
            let parent_id =
                Outpoint::new(compute_txid(&node.raw_tx), node.output_index).encode36();

            let response = remote
                .submit_node(node)
                .await
                .map_err(|e| GraphError::new(graph_id, e))?;

            let Some(response) = response else {
                return Ok(());
            };
            if response.is_empty() {
                return Ok(());
            }

            let fetches = response.requested_inputs.into_iter().map(|(key, meta)| {
                let parent_id = parent_id.clone();
                async move {
                    let outpoint = Outpoint::decode36(&key).ok_or_else(|| {
                        GraphError::new(
                            graph_id,
                            GaspError::Transport(format!(
                                "malformed requested-input outpoint: {key}"
                            )),
                        )
                    })?;
                    let mut child = self
                        .storage
                        .hydrate_gasp_node(&graph_id, &outpoint.txid, outpoint.output_index, meta.metadata)
                        .await
                        .map_err(|e| GraphError::new(graph_id, e))?;
                    child.spent_by = Some(parent_id);
                    Ok::<Node, GraphError>(child)
                }
            });
            let children = futures::future::join_all(fetches).await;

            let mut recursions = Vec::with_capacity(children.len());
            for child in children {
                recursions.push(self.push_node(remote, child?, seen));
            }
            for result in futures::future::join_all(recursions).await {
                result?;
            }

            Ok(())
        })
    }
}

// ==============================================================================
// Remote impl — lets two engines sync against each other in-process
// ==============================================================================

#[async_trait]
impl Remote for GaspEngine {
    async fn get_initial_response(
        &self,
        req: InitialRequest,
    ) -> Result<InitialResponse, GaspError> {
        GaspEngine::get_initial_response(self, req).await
    }

    async fn get_initial_reply(&self, resp: InitialResponse) -> Result<InitialReply, GaspError> {
        GaspEngine::get_initial_reply(self, &resp).await
    }

    async fn request_node(
        &self,
        graph_id: Outpoint,
        txid: Txid,
        output_index: u32,
        metadata: bool,
    ) -> Result<Node, GaspError> {
        GaspEngine::request_node(self, graph_id, txid, output_index, metadata).await
    }

    async fn submit_node(&self, node: Node) -> Result<Option<crate::types::NodeResponse>, GaspError> {
        GaspEngine::submit_node(self, node).await
    }
}
