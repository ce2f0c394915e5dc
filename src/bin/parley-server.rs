// ABOUTME: Parley gateway server binary
// ABOUTME: Loads configuration, initializes shared resources and serves the HTTP API until shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Parley Server Binary
//!
//! Starts the generation gateway with the stores, counter backend and model
//! providers selected by environment variables.

use anyhow::Result;
use clap::Parser;
use parley_server::{
    config::environment::ServerConfig, logging, resources::ServerResources, server,
};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "parley-server")]
#[command(about = "Parley - LLM chat generation gateway with quotas, streaming and a usage ledger")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database.url = database_url;
    }
    config.validate()?;
    config.log_summary();

    let port = config.http_port;
    let resources = ServerResources::initialize(config).await?;
    info!("Server resources initialized");

    let result = server::run_server(Arc::clone(&resources), port).await;
    if let Err(ref e) = result {
        error!("Server error: {e:#}");
    }

    resources.shutdown().await;
    info!("Parley server stopped");
    result
}
