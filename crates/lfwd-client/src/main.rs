//! lfwd binary entry point.
//!
//! Runs local forwards over an in-process session whose peer connects to
//! the targets.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use lfwd_client::{Cli, ForwardRegistry, LocalForwarder};
use lfwd_core::protocol::ChannelSide;
use lfwd_core::transport::MemoryLink;
use lfwd_core::{Result, Session};
use lfwd_server::ForwardHandler;

fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    let log_format = cli.log_format.into();
    if let Err(e) = lfwd_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "lfwd starting");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("lfwd: failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(&cli)) {
        error!(error = %e, "lfwd failed");
        eprintln!("lfwd: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let session_config = cli.session_config();
    session_config.validate()?;

    let (client_link, server_link) = MemoryLink::pair();
    let client = Session::new(client_link, ChannelSide::Client, session_config.clone())?;
    let server = Session::new(server_link, ChannelSide::Server, session_config)?;
    let handler_task = ForwardHandler::new(server, cli.server_config()).spawn();

    let registry = Arc::new(ForwardRegistry::new());
    {
        let registry = Arc::clone(&registry);
        client.on_disconnect(move || registry.close_all());
    }

    for spec in &cli.local_forward {
        let handle = LocalForwarder::start(spec.clone(), client.clone()).await?;
        let bind = handle.local_addr();
        let id = registry.register_forward(handle);
        info!(id = %id, bind = %bind, target = %spec.target(), "Forwarding");
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping forwards");

    registry.stop_all().await;
    client.close().await;
    if let Err(e) = handler_task.await {
        error!(error = %e, "Forward handler task failed");
    }

    info!("lfwd stopped");
    Ok(())
}
