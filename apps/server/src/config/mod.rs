use std::path::PathBuf;

use config::Config;
use serde::Deserialize;

mod listen;
pub use listen::ListenConfig;

mod logger;
pub use logger::LoggerConfig;

#[derive(Deserialize)]
pub struct ServerConfig {
    pub listen: ListenConfig,

    #[serde(default)]
    pub shutdown_timeout: Option<u64>,

    #[serde(default)]
    pub logger: LoggerConfig,
}

impl ServerConfig {
    pub fn from_path(path: PathBuf) -> eyre::Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
