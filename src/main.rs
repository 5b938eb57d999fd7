// src/main.rs

//! Command-line entry point: runs one search over the shared connection and
//! prints the normalized records.

use anyhow::{Context, Result};
use dirconn::config::Config;
use dirconn::core::SearchOptions;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str = "Usage: dirconn [--config /path/to/dirconn.toml] <base> <filter> [attribute...]";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|arg| arg == "--version") {
        println!("dirconn version {VERSION}");
        return Ok(());
    }

    // Everything except `--config <path>` is positional.
    let mut config_path = "dirconn.toml".to_string();
    let mut positional = Vec::new();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            match iter.next() {
                Some(path) => config_path = path,
                None => {
                    eprintln!("--config flag requires a value");
                    std::process::exit(1);
                }
            }
        } else {
            positional.push(arg);
        }
    }

    if positional.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let base = positional.remove(0);
    let filter = positional.remove(0);
    let attributes = positional;

    let config = match Config::from_file(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    dirconn::configure(config).context("Failed to apply configuration")?;

    let result = dirconn::search(&base, &filter, &attributes, SearchOptions::default()).await;
    dirconn::shutdown().await;

    let records = match result {
        Ok(records) => records,
        Err(e) => {
            error!("Search failed: {}", e);
            return Err(e.into());
        }
    };

    info!("{} record(s) returned", records.len());
    for record in &records {
        println!("dn: {}", record.dn);
        for (name, values) in &record.attrs {
            for value in values {
                println!("{name}: {value}");
            }
        }
        println!();
    }

    Ok(())
}
