//! Wire types for the GASP reconciliation protocol.
//!
//! Contains the outpoint identity and its 36-byte canonical encoding, the
//! `Node`/`NodeResponse` graph-walk messages, and the three handshake
//! messages (`InitialRequest`, `InitialResponse`, `InitialReply`).

use std::collections::HashMap;
use std::fmt;

use bitcoin::hashes::{sha256d, Hash};
use bitcoin::Txid;
use serde::{Deserialize, Serialize};

// ==============================================================================
// Outpoint
// ==============================================================================

/// A UTXO identity: the transaction id and output index it names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: Txid,
    pub output_index: u32,
}

impl Outpoint {
    pub fn new(txid: Txid, output_index: u32) -> Self {
        Self { txid, output_index }
    }

    /// Encode as the canonical 36-byte form: 32-byte txid followed by the
    /// 4-byte little-endian output index, hex-encoded so it can be used as
    /// a map key and round-trip through JSON.
    ///
    /// The exact byte layout is implementation-defined (spec §6); this
    /// crate's choice only needs to be stable within a deployment.
    pub fn encode36(&self) -> String {
        let mut bytes = [0u8; 36];
        bytes[..32].copy_from_slice(self.txid.as_ref());
        bytes[32..].copy_from_slice(&self.output_index.to_le_bytes());
        hex::encode(bytes)
    }

    /// Decode a string produced by [`Outpoint::encode36`].
    pub fn decode36(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 36 {
            return None;
        }
        let txid = Txid::from_slice(&bytes[..32]).ok()?;
        let output_index = u32::from_le_bytes(bytes[32..36].try_into().ok()?);
        Some(Self { txid, output_index })
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.output_index)
    }
}

/// Compute the identity hash of an opaque transaction: double-SHA256 over
/// the raw bytes, the standard Bitcoin txid derivation. This is the only
/// thing the engine needs to know about `rawTx` — it never parses the
/// transaction itself (tx parsing/validation is out of scope, spec §1).
pub fn compute_txid(raw_tx: &[u8]) -> Txid {
    let hash = sha256d::Hash::hash(raw_tx);
    Txid::from_raw_hash(hash)
}

// ==============================================================================
// Node — an ancestor-or-tip record
// ==============================================================================

/// One node of a graph under construction: either the tip itself or one of
/// its ancestors, as exchanged by `requestNode`/`submitNode`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Outpoint of the tip whose graph this node belongs to.
    pub graph_id: Outpoint,
    /// Opaque transaction bytes. Never parsed by the engine.
    pub raw_tx: Vec<u8>,
    /// Which output of `raw_tx` this node represents.
    pub output_index: u32,
    /// Optional chain-inclusion proof (opaque; validated by Storage).
    pub proof: Option<Vec<u8>>,
    /// Opaque transaction-level metadata, present only if requested.
    pub tx_metadata: Option<String>,
    /// Opaque output-level metadata, present only if requested.
    pub output_metadata: Option<String>,
    /// Map from input outpoint (36-byte form) to a hash hint, present only
    /// if metadata was requested. Lets the recipient decide whether it
    /// needs a fresher copy of that ancestor.
    pub inputs: Option<HashMap<String, InputHash>>,
    /// 36-byte form of the already-appended node this one is spent by, or
    /// `None` at the graph tip. Carried on the wire (beyond spec §6's
    /// minimal table) so a push recipient — who has no other way to learn
    /// the causal parent, since push order is driven entirely by the
    /// pusher's own recursion — can reconstruct the edge. See SPEC_FULL.md
    /// §3 / DESIGN.md for the rationale.
    pub spent_by: Option<String>,
}

impl Node {
    /// Identity used for the per-session seen-set / cycle guard:
    /// `(txid(rawTx), outputIndex)`.
    pub fn identity(&self) -> (Txid, u32) {
        (compute_txid(&self.raw_tx), self.output_index)
    }

    pub fn is_tip(&self) -> bool {
        self.spent_by.is_none()
    }
}

/// Hash hint for an ancestor outpoint, carried in `Node::inputs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputHash {
    pub hash: String,
}

// ==============================================================================
// NodeResponse
// ==============================================================================

/// What the recipient of a `Node` still needs before it can finish
/// materializing the graph. An empty/absent map means nothing further is
/// needed for this branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeResponse {
    pub requested_inputs: HashMap<String, RequestedInputMetadata>,
}

impl NodeResponse {
    pub fn is_empty(&self) -> bool {
        self.requested_inputs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestedInputMetadata {
    pub metadata: bool,
}

// ==============================================================================
// Handshake Messages
// ==============================================================================

/// Kicks off a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialRequest {
    pub version: u32,
    pub since: u64,
}

/// The responder's tips as of its clock, filtered by the request's `since`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialResponse {
    pub utxo_list: Vec<Outpoint>,
    /// The responder's own current time; the initiator stores this as its
    /// `lastInteraction` for the next session (spec §6).
    pub since: u64,
    /// Some implementations piggy-back their protocol version on the
    /// response so a mismatch can be caught symmetrically (spec §4.1.2
    /// step 2). `None` when the peer does not report it.
    pub version: Option<u32>,
}

/// Tips the initiator has that the responder did not list. Only produced
/// (and only meaningful) in bidirectional mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialReply {
    pub utxo_list: Vec<Outpoint>,
}
