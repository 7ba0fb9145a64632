use std::sync::Arc;

use clap::{CommandFactory, Parser};
use sandplane::{
    audit::TracingAuditSink,
    cli::{SandplaneArgs, SandplaneSubcommand, ServeArgs},
    config::{API_KEY_LENGTH, API_KEY_PREFIX},
    server::{SandplaneServer, ServerState},
    store::Store,
    utils, SandplaneResult,
};
use tokio::signal::unix::{signal, SignalKind};

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> SandplaneResult<()> {
    // A missing .env file is not an error
    let _ = dotenvy::dotenv();

    let args = SandplaneArgs::parse();
    match args.subcommand {
        Some(SandplaneSubcommand::Serve(serve_args)) => serve(serve_args, args.verbose).await?,
        Some(SandplaneSubcommand::Keygen) => {
            println!("{API_KEY_PREFIX}{}", utils::generate_token(API_KEY_LENGTH));
        }
        None => {
            SandplaneArgs::command().print_help()?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: *
//--------------------------------------------------------------------------------------------------

async fn serve(args: ServeArgs, verbose: bool) -> SandplaneResult<()> {
    let config = args.resolve_config().await?;
    let _guard = sandplane::init_logging(verbose, config.get_log_dir().as_deref())?;

    let store = match config.get_state_file() {
        Some(path) => {
            let store = Store::load(path).await?;
            tracing::info!(path = %path.display(), "loaded state snapshot");
            store
        }
        None => Store::new(),
    };

    let state = ServerState::new(store.clone(), &config, Arc::new(TracingAuditSink));
    let sweeper = state.sweeper().clone().spawn();

    SandplaneServer::new(config.socket_addr(), state)
        .serve(shutdown_signal())
        .await?;

    sweeper.stop().await?;

    if let Some(path) = config.get_state_file() {
        store.save(path).await?;
        tracing::info!(path = %path.display(), "saved state snapshot");
    }

    Ok(())
}

async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "failed to install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM signal"),
        _ = sigint.recv() => tracing::info!("received SIGINT signal"),
    }
}
