//! The `Storage` collaborator contract (spec §4.2).
//!
//! `Storage` owns the authoritative known-UTXO set and the transient
//! per-graph scratch space used while a sync session is in flight. The
//! engine never touches persistent state directly; every mutation goes
//! through one of these methods, so a host can swap in a real database
//! without the engine changing at all — exactly the role `BitcoinRpc`
//! plays for the teacher's ancestry-graph builder.

use async_trait::async_trait;
use bitcoin::Txid;

use crate::error::GaspError;
use crate::types::{Node, NodeResponse, Outpoint};

#[async_trait]
pub trait Storage: Send + Sync {
    /// All known UTXOs with `time > since`, plus every UTXO with no
    /// timestamp (unconfirmed UTXOs are always included regardless of
    /// `since`).
    async fn find_known_utxos(&self, since: u64) -> Result<Vec<Outpoint>, GaspError>;

    /// Materialize a node the host already has, for serving to a peer (push
    /// phase) or for answering `requestNode` (pull phase, inbound side).
    /// Fails with [`GaspError::NotFound`] if the node is not known.
    async fn hydrate_gasp_node(
        &self,
        graph_id: &Outpoint,
        txid: &Txid,
        output_index: u32,
        metadata: bool,
    ) -> Result<Node, GaspError>;

    /// Decide what, if anything, is still needed before `node` can be
    /// considered fully resolved. `None` means nothing further is needed.
    /// The decision belongs to the host: it may already have the ancestor,
    /// or may want a metadata refresh even if it does.
    async fn find_needed_inputs(&self, node: &Node) -> Result<Option<NodeResponse>, GaspError>;

    /// Append `node` to the temporary graph named by `node.graph_id`,
    /// creating it if this is the first append. `spent_by` is the 36-byte
    /// form of the already-appended node this one is spent by, or `None`
    /// at the tip. Idempotent per `(graphID, txid(node.rawTx),
    /// outputIndex)`. Fails with [`GaspError::Unwanted`] if the graph is
    /// not desired, or [`GaspError::TooLarge`] if it would exceed a
    /// host-configured size bound.
    async fn append_to_graph(
        &self,
        node: &Node,
        spent_by: Option<&str>,
    ) -> Result<(), GaspError>;

    /// Validate that every frontier leaf of the named temporary graph is
    /// either chain-proven or pre-trusted. Fails with
    /// [`GaspError::AnchorInvalid`] otherwise.
    async fn validate_graph_anchor(&self, graph_id: &Outpoint) -> Result<(), GaspError>;

    /// Best-effort cleanup: remove the temporary graph, if any. Must
    /// succeed even if the graph does not exist. The engine swallows any
    /// error this returns, after logging it (spec §7).
    async fn discard_graph(&self, graph_id: &Outpoint) -> Result<(), GaspError>;

    /// Atomically promote every node of the named temporary graph into the
    /// known set. Only ever called after a successful
    /// `validate_graph_anchor` for the same graph.
    async fn finalize_graph(&self, graph_id: &Outpoint) -> Result<(), GaspError>;

    /// Whether every node appended so far under `graph_id` has every one of
    /// its listed inputs already resolved (present in the graph or in the
    /// known set) — i.e. there is no outstanding `requestedInputs` anywhere
    /// in the graph, not just on the node most recently appended. A push
    /// recipient calls this after each `appendToGraph` to decide whether the
    /// graph as a whole has become closed and is ready for
    /// `validateGraphAnchor`/`finalizeGraph`, since the node that completes
    /// the graph is not necessarily the tip (the pusher submits the tip
    /// first and its ancestors afterward).
    async fn graph_is_resolved(&self, graph_id: &Outpoint) -> Result<bool, GaspError>;
}
