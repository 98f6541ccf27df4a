//! GASP — Graph Aware Sync Protocol.
//!
//! A UTXO ancestry-graph reconciliation engine for blockchain peers. Two
//! collaborators are expected from the host: [`Storage`], for authoritative
//! and scratch graph state, and [`Remote`], for talking to a peer. Wire
//! this crate's own [`GaspEngine`] in as a [`Remote`] for in-process
//! testing, or back it with a real transport.
//!
//! Transaction parsing, proof-of-work validation, block/header sync, and
//! peer discovery are all out of scope — see SPEC_FULL.md.

pub mod engine;
pub mod error;
pub mod memory;
pub mod remote;
pub mod storage;
pub mod types;

pub use engine::{EngineConfig, GaspEngine, SyncReport};
pub use error::{GaspError, GraphError};
pub use memory::MemoryStorage;
pub use remote::Remote;
pub use storage::Storage;
pub use types::{
    compute_txid, InitialReply, InitialRequest, InitialResponse, InputHash, Node, NodeResponse,
    Outpoint, RequestedInputMetadata,
};
