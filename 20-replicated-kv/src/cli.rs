use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::topology::Role;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a replica, either the leader or a secondary.
    Server(ServerArgs),
    /// Send PUT/GET commands typed on stdin to random servers.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address to bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Role of this replica for the lifetime of the process.
    #[arg(long, value_enum)]
    pub role: Role,

    /// Address of the leader. Required for secondaries.
    #[arg(long)]
    pub leader: Option<String>,

    /// Address of a secondary to replicate to. Leader only; repeat or comma-separate.
    #[arg(long = "secondary", value_delimiter = ',')]
    pub secondaries: Vec<String>,

    /// Timeout for opening outbound connections.
    #[arg(long, default_value_t = 1000)]
    pub connect_timeout_ms: u64,

    /// Timeout for each read or write on a connection.
    #[arg(long, default_value_t = 2000)]
    pub io_timeout_ms: u64,

    /// Lower bound of the artificial delay before replicating a write.
    #[arg(long, default_value_t = 0)]
    pub replication_delay_min_ms: u64,

    /// Upper bound of the artificial delay before replicating a write. 0 disables it.
    #[arg(long, default_value_t = 0)]
    pub replication_delay_max_ms: u64,

    /// Ignore REPLICATION messages older than the stored entry instead of applying them.
    #[arg(long)]
    pub reject_stale_replication: bool,

    /// How long a secondary waits for the leader to answer a forwarded PUT.
    /// Defaults to the longest a leader with the same timeouts and delay can take.
    #[arg(long)]
    pub forward_timeout_ms: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Server to send requests to. Repeat or comma-separate for several.
    #[arg(long = "server", value_delimiter = ',', required = true)]
    pub servers: Vec<String>,

    /// Timeout for connecting and for each read or write.
    #[arg(long, default_value_t = 2000)]
    pub timeout_ms: u64,

    /// How long to wait for a PUT reply, which may include forwarding and replication.
    #[arg(long, default_value_t = 15000)]
    pub put_timeout_ms: u64,
}
