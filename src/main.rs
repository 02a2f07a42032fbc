use std::process;
use std::sync::Arc;

use clap::Parser;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kube_mcp::cli::Args;
use kube_mcp::server::{create_router, AppState};
use kube_mcp::session::SessionManager;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    // Build the session manager and acquire the cluster session
    let manager = Arc::new(
        SessionManager::new(&args.namespace)
            .with_kube_options(args.kube_options())
            .with_timing(args.poll_interval(), args.max_wait()),
    );

    if let Err(e) = manager.enter().await {
        error!("Failed to enter namespace '{}': {}", args.namespace, e);
        process::exit(1);
    }

    let state = AppState::new(manager.clone());
    let app = create_router(state).layer(TimeoutLayer::new(args.request_timeout()));

    let addr = format!("{}:{}", args.bind_addr, args.port);
    info!("Starting kube-mcp on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            process::exit(1);
        }
    };

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET  /health                        - Health check");
    info!("  GET  /list_mcp_servers              - List running MCP servers");
    info!("  POST /create_mcp_server             - Create an MCP server");
    info!("  POST /delete_mcp_server             - Delete an MCP server");
    info!("  GET  /get_mcp_server_status/{{name}}  - Job status");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await;

    // Release every server the session still tracks before exiting
    manager.exit().await;

    if let Err(e) = serve_result {
        error!("Server error: {}", e);
        process::exit(1);
    }
}
