//! Service entry point.
//!
//! `screencontrol [-c|--config PATH] [-v|--verbose] [-d|--console]` — runs
//! the agent: loopback HTTP API, control-server connection (when configured
//! to connect on startup), reconnect supervisor, update pipeline. Exits 0 on
//! clean shutdown.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use screencontrol::agent::{Agent, AGENT_VERSION};
use screencontrol::config::Config;
use screencontrol::server;

/// Remote-control agent service.
#[derive(Parser)]
#[command(name = "screencontrol", version)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Verbose logging (debug level).
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Run in the foreground without the service control manager
    /// (meaningful on Windows only).
    #[arg(short = 'd', long)]
    console: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "debug".to_string()
        } else {
            config.logging.level.clone()
        }
    });
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("screencontrol v{AGENT_VERSION} starting");
    let _ = cli.console; // no SCM on this platform; the flag is accepted for parity

    let bind = format!("{}:{}", config.server.host, config.server.http_port);
    let agent = Agent::new(config);
    info!("Machine id: {}", agent.machine_id);

    agent.start();

    let listener = TcpListener::bind(&bind).await.expect("Failed to bind");

    // Graceful shutdown on SIGINT/SIGTERM.
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    server::serve(agent.clone(), listener, shutdown)
        .await
        .expect("Server error");

    info!("Shutting down...");
    agent.shutdown().await;
    info!("Goodbye");
}
