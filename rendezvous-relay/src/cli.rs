use std::net::SocketAddr;

use clap::Parser;

use crate::relay::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct RelayArgs {
    /// Port to listen on. The relay binds 0.0.0.0; use 0 for an ephemeral port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Interactive client for the rendezvous relay",
    long_about = None
)]
pub struct ClientArgs {
    /// Identity announced to the relay on connect.
    #[arg(long)]
    pub identity: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:10000")]
    pub server: SocketAddr,
}
