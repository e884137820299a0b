//! Gridscale Router CLI
//!
//! Starts the HTTP server for the city registry.

use gridscale_router::{config::RouterConfig, start_server, RouterError};
use std::env;
use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), RouterError> {
    let args: Vec<String> = env::args().collect();

    let config = if args.len() > 2 && args[1] == "--config" {
        RouterConfig::from_file(&args[2])?
    } else if args.len() > 1 && args[1] == "--help" {
        print_help();
        process::exit(0);
    } else {
        eprintln!("Warning: No config file specified, using in-memory test configuration");
        eprintln!("Usage: gridscale-router --config <path-to-config.toml>");
        eprintln!();
        RouterConfig::default_test_config()
    };

    start_server(config).await?;

    Ok(())
}

fn print_help() {
    println!("Gridscale Router - City registry with symmetric alliances");
    println!();
    println!("USAGE:");
    println!("    gridscale-router --config <path-to-config.toml>");
    println!();
    println!("OPTIONS:");
    println!("    --config <file>    Load configuration from TOML file");
    println!("    --help             Print this help message");
    println!();
    println!("CONFIGURATION:");
    println!("    The TOML config file should contain:");
    println!("    - bind_address: IP address to bind (e.g., '127.0.0.1')");
    println!("    - bind_port: Port number (e.g., 8080)");
    println!("    - database_path: SQLite file (default: 'gridscale.db')");
    println!("    - log_filter: Default log filter (default: 'info', RUST_LOG overrides)");
    println!();
}
