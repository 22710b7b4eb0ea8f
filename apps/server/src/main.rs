use eyre::Result;

mod cli;
pub(crate) mod config;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
