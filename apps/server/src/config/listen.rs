use std::net::{SocketAddr, ToSocketAddrs};

use eyre::{Context, OptionExt};
use serde::{Deserialize, Serialize};

/// Default number of worker reactors the stream server starts, one per
/// connection shard.
pub const DEFAULT_WORKER_COUNT: usize = 4;

#[derive(Serialize, Deserialize, Clone)]
pub struct ListenConfig {
    /// Address to accept stream (login/chat/control) connections on.
    pub stream_address: String,
    /// Address to bind the UDP voice relay socket on.
    pub datagram_address: String,
    /// Number of worker reactors connections are sharded across.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

impl ListenConfig {
    pub fn to_server_config(&self) -> eyre::Result<echomesh_core::StreamServerConfig> {
        let stream_addr = resolve(&self.stream_address).wrap_err("failed to resolve stream_address")?;
        let datagram_addr = resolve(&self.datagram_address).wrap_err("failed to resolve datagram_address")?;

        Ok(echomesh_core::StreamServerConfig {
            stream_addr,
            datagram_addr,
            worker_count: self.worker_count,
        })
    }

    /// Apply the CLI's `--stream-port`/`--datagram-port`/`--workers` overrides
    /// on top of whatever the config file set, replacing only the port of
    /// each address so a configured bind host (e.g. a specific interface) is
    /// preserved.
    pub fn apply_overrides(
        &mut self,
        stream_port: Option<u16>,
        datagram_port: Option<u16>,
        workers: Option<usize>,
    ) -> eyre::Result<()> {
        if let Some(port) = stream_port {
            self.stream_address = replace_port(&self.stream_address, port)?;
        }
        if let Some(port) = datagram_port {
            self.datagram_address = replace_port(&self.datagram_address, port)?;
        }
        if let Some(workers) = workers {
            self.worker_count = workers;
        }
        Ok(())
    }
}

fn replace_port(addr: &str, port: u16) -> eyre::Result<String> {
    let resolved = resolve(addr).wrap_err_with(|| format!("failed to resolve address {addr:?}"))?;
    Ok(SocketAddr::new(resolved.ip(), port).to_string())
}

fn resolve(addr: &str) -> eyre::Result<SocketAddr> {
    addr.to_socket_addrs()
        .wrap_err_with(|| format!("failed to resolve address {addr:?}"))?
        .next()
        .ok_or_eyre("no address found for the given host")
}
