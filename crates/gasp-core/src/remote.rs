//! The `Remote` collaborator contract (spec §4.3).
//!
//! A `Remote` is the symmetric peer endpoint exposing the four protocol
//! operations from spec §4.1.1. In production this would be backed by a
//! network transport; the only implementation this crate ships is
//! [`crate::engine::GaspEngine`] itself, so two engines in the same
//! process can be wired as each other's remote (spec §9's "bidirectional
//! peer wiring" note, and the canonical test setup).

use async_trait::async_trait;
use bitcoin::Txid;

use crate::error::GaspError;
use crate::types::{InitialReply, InitialRequest, InitialResponse, Node, NodeResponse, Outpoint};

#[async_trait]
pub trait Remote: Send + Sync {
    /// Peer responds to our initial handshake with its known tips.
    async fn get_initial_response(
        &self,
        req: InitialRequest,
    ) -> Result<InitialResponse, GaspError>;

    /// Peer reports which of its tips are absent from `resp.utxo_list`.
    /// Exposed for symmetry with the other three operations (spec
    /// §4.1.1); `GaspEngine::sync` itself invokes the equivalent logic
    /// locally rather than through this trait — see DESIGN.md.
    async fn get_initial_reply(&self, resp: InitialResponse) -> Result<InitialReply, GaspError>;

    /// Ask the peer to materialize one node of a graph we are pulling.
    async fn request_node(
        &self,
        graph_id: Outpoint,
        txid: Txid,
        output_index: u32,
        metadata: bool,
    ) -> Result<Node, GaspError>;

    /// Push a node to the peer. Returns the set of additional inputs the
    /// peer still needs (possibly empty).
    async fn submit_node(&self, node: Node) -> Result<Option<NodeResponse>, GaspError>;
}
