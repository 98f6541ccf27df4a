//! Error types for gasp-core.

use crate::types::Outpoint;

// ==============================================================================
// Protocol Errors
// ==============================================================================

/// Top-level error type for the GASP reconciliation engine.
///
/// Each variant captures a specific failure mode from spec §7 rather than
/// collapsing everything into a single `String`, so callers can tell a
/// fatal version mismatch apart from a per-graph failure that should not
/// abort the session.
#[derive(Debug, thiserror::Error)]
pub enum GaspError {
    /// Session-fatal: the peer's protocol version does not match ours.
    #[error("version mismatch: local version {current}, peer version {foreign}")]
    VersionMismatch { current: u32, foreign: u32 },

    /// `hydrateGASPNode` was asked for a node Storage does not have.
    #[error("node not found")]
    NotFound,

    /// `appendToGraph` rejected the node: the graph is not desired.
    #[error("graph not wanted")]
    Unwanted,

    /// `appendToGraph` rejected the node: the graph exceeds a host-configured
    /// size limit (spec §9: the bound itself is host policy, not fixed here).
    #[error("graph exceeds configured size limit")]
    TooLarge,

    /// `validateGraphAnchor` found a frontier leaf that is neither
    /// chain-proven nor pre-trusted.
    #[error("anchor validation failed for graph {0}")]
    AnchorInvalid(Outpoint),

    /// A `Remote` call failed (network error, peer returned malformed data,
    /// or any transport-level cancellation).
    #[error("remote transport error: {0}")]
    Transport(String),

    /// Caller tried to run a session before a remote peer was wired in via
    /// `set_remote` (see the two-phase construction note in spec §9).
    #[error("no remote peer configured for this engine")]
    NoRemote,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ==============================================================================
// Graph-scoped Errors
// ==============================================================================

/// Wraps a [`GaspError`] with the `graphID` it occurred under.
///
/// Per spec §9 ("transient error context"): errors captured mid-recursion
/// must preserve the offending graph id so the outer handler can call
/// `discardGraph` on exactly that graph without disturbing sibling graphs.
#[derive(Debug, thiserror::Error)]
#[error("graph {graph_id} failed: {source}")]
pub struct GraphError {
    pub graph_id: Outpoint,
    #[source]
    pub source: GaspError,
}

impl GraphError {
    pub fn new(graph_id: Outpoint, source: GaspError) -> Self {
        Self { graph_id, source }
    }
}
