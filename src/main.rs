use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use squadron::agent::{AgentAdapter, StdioDownstream, TokenStore};
use squadron::bus::MessageBus;
use squadron::comms::CommsService;
use squadron::config::SquadronConfig;
use squadron::dispatch::Dispatcher;
use squadron::error::Result;
use squadron::mission::{MissionEngine, MissionRegistry};
use squadron::ops::Operations;
use squadron::server::{OperatorContext, OperatorServer};
use squadron::state::TeamStore;
use squadron::steering::Steering;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("squadron: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Stdout carries the operator protocol; logs go to stderr.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("squadron=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

async fn run() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config = SquadronConfig::load(&cwd).await?;

    let store = Arc::new(TeamStore::new(cwd));
    let bus = Arc::new(MessageBus::new());
    let tokens = Arc::new(TokenStore::new());

    let downstream = Arc::new(StdioDownstream::new(
        config.adapter.program.clone(),
        config.adapter.args.clone(),
    ));
    let adapter = Arc::new(AgentAdapter::new(
        downstream,
        Arc::clone(&store),
        Arc::clone(&tokens),
        Duration::from_secs(config.adapter.call_deadline_secs),
    ));

    let comms = CommsService::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&tokens),
        config.comms.clone(),
    );
    let (comms_addr, comms_handle) = comms.serve().await?;
    adapter.set_comms_url(format!("http://{}", comms_addr));

    let registry = Arc::new(MissionRegistry::new());
    let engine = MissionEngine::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&tokens),
        Arc::clone(&adapter),
        Arc::clone(&registry),
        config.mission.clone(),
    );

    let ctx = OperatorContext {
        ops: Operations::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&tokens),
            Arc::clone(&adapter),
        ),
        dispatcher: Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&tokens),
            Arc::clone(&adapter),
            &config.dispatch,
        ),
        engine,
        steering: Steering::new(Arc::clone(&store), Arc::clone(&bus), Arc::clone(&adapter)),
    };

    let server = OperatorServer::new(ctx);
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = server.run(stdin, stdout) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received; shutting down");
        }
    }

    comms.drain();
    adapter.shutdown().await;
    comms_handle.abort();
    Ok(())
}
