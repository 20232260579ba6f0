//! Callwire RPC Server - JSON-RPC backend exposing registered callables.
//!
//! Serves the demo callable set over `POST /rpc` and prints the bound port as
//! `RPC_PORT=<port>` so a parent process can find it.

mod handlers;
mod server;
mod services;

use anyhow::Result;
use callwire::config::{RpcConfig, ServerConfig};
use callwire::{ExecutorBuilder, JsonRpcHandler};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "callwire-rpc")]
#[command(about = "JSON-RPC server for registered callables")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
    host: String,

    /// JSON-RPC method name calls are accepted under
    #[arg(long, default_value = RpcConfig::EXECUTE_METHOD)]
    method: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    info!("Starting Callwire RPC Server");

    let executor = ExecutorBuilder::new()
        .module(services::math())
        .module(services::counter())
        .build()?;
    info!("Registered {} callables", executor.callables().len());

    let state = server::AppState {
        executor: Arc::new(executor),
        handlers: vec![Arc::new(JsonRpcHandler::with_method(args.method))],
    };
    let addr = server::start_server(state, &args.host, args.port).await?;

    // Port line on stdout is read by the parent process
    println!("RPC_PORT={}", addr.port());

    info!("RPC server running on {}", addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
