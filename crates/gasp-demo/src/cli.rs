use clap::Parser;

/// GASP demo — runs one sync session between two in-memory peers and
/// reports which graphs were finalized or discarded on each side.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Protocol version both peers speak.
    #[arg(long, default_value = "1", env = "GASP_VERSION")]
    pub version: u32,

    /// Run the initiator in pull-only mode (no push phase).
    #[arg(long)]
    pub unidirectional: bool,

    /// Number of synthetic root UTXOs to seed on the initiator side.
    #[arg(long, default_value = "1")]
    pub local_tips: usize,

    /// Number of synthetic root UTXOs to seed on the peer side.
    #[arg(long, default_value = "2")]
    pub remote_tips: usize,

    /// Maximum nodes accepted into a single temporary graph before
    /// `appendToGraph` fails with `TooLarge`.
    #[arg(long, default_value = "10000")]
    pub max_graph_nodes: usize,
}
