use tokio::select;
use tokio::signal::unix;
use tokio::signal::unix::SignalKind;

use crate::{
    cli::{arguments, server::Relay},
    config::ServerConfig,
};
use tracing::{level_filters::LevelFilter, Event, Level, Subscriber};
use tracing_subscriber::{
    filter::Targets,
    fmt::format::{DefaultVisitor, Writer},
    layer::Layer,
    prelude::*,
    util::SubscriberInitExt,
    EnvFilter,
};

pub async fn run(args: arguments::Run) -> eyre::Result<()> {
    let mut config = ServerConfig::from_path(args.config)?;
    config
        .listen
        .apply_overrides(args.stream_port, args.datagram_port, args.workers)?;

    let level_filter = config.logger.level;

    let filter = Targets::new()
        .with_target("echomesh_core", level_filter)
        .with_target("echomesh_server", level_filter)
        .with_default(level_filter);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    tracing_subscriber::registry()
        .with(EchoTracer.with_filter(filter))
        .with(env_filter)
        .try_init()?;

    let relay = Relay::start(config)?;

    let mut sigterm =
        unix::signal(SignalKind::terminate()).expect("Failed to create SIGTERM signal handler");
    let mut sigint =
        unix::signal(SignalKind::interrupt()).expect("Failed to create SIGINT signal handler");

    select! {
        _ = relay.cancelled() => {
            tracing::warn!("relay asked for its own shutdown");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM signal");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT signal");
        }
    }

    relay.shutdown().await;

    Ok(())
}

struct EchoTracer;

impl<S> Layer<S> for EchoTracer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let target = match event.metadata().level() {
            &Level::INFO | &Level::WARN | &Level::ERROR => event
                .metadata()
                .target()
                .split("::")
                .last()
                .unwrap_or_default(),
            _ => event.metadata().target(),
        };

        print!(
            "[{}] {} {}: ",
            chrono::offset::Local::now().format("%Y-%m-%d %H:%M:%S"),
            event.metadata().level(),
            target,
        );

        let mut message = String::new();

        event.record(&mut DefaultVisitor::new(Writer::new(&mut message), true));

        println!("{}", message);
    }
}
