use std::path::PathBuf;

use clap::Args;

#[derive(Args)]
pub struct Run {
    /// Path to the server's TOML configuration file.
    #[clap(long, short)]
    pub config: PathBuf,

    /// Override the stream (login/chat/control) listen port from the config file.
    #[clap(long)]
    pub stream_port: Option<u16>,

    /// Override the datagram (voice) listen port from the config file.
    #[clap(long)]
    pub datagram_port: Option<u16>,

    /// Override the number of worker reactors from the config file.
    #[clap(long)]
    pub workers: Option<usize>,
}
