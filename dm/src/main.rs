//! Datamover - transfer coordinator
//!
//! CLI entry point for inspecting binding identifiers, printing the
//! effective configuration, and running an in-process demo.

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use tracing::info;

use datamover::binding::BindingObjectDescriptor;
use datamover::cli::{Cli, Command, DescriptorCommand};
use datamover::config::Config;
use datamover::domain::{DataLocation, DataSource, TransferRequest};
use datamover::node::TransferNode;
use datamover::store::{FsDataStore, RelocatedPathFallback};
use datamover::transport::LocalNetwork;

fn setup_logging(level: &str) -> Result<()> {
    let level: tracing::Level = level.parse().map_err(|_| eyre!("Invalid log level: {}", level))?;

    // Logs go to stderr so command output stays clean on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // CLI level wins over the config file, INFO otherwise
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    setup_logging(&level).context("Failed to setup logging")?;

    match cli.command {
        Command::Descriptor { command } => match command {
            DescriptorCommand::Decode { identifier, persistent } => cmd_decode(&identifier, persistent),
            DescriptorCommand::Encode {
                name,
                backing_type,
                count,
            } => cmd_encode(name, backing_type, count),
        },
        Command::Config => cmd_config(&config),
        Command::Demo { sources, fan_out } => cmd_demo(&config, sources, fan_out).await,
    }
}

fn cmd_decode(identifier: &str, persistent: bool) -> Result<()> {
    let descriptor = BindingObjectDescriptor::decode(identifier)?;
    println!("name: {}", descriptor.name);
    println!("backing-type: {}", descriptor.backing_type);
    println!("element-count: {}", descriptor.element_count);
    println!("transfer-path: {:?}", descriptor.transfer_path(persistent));
    Ok(())
}

fn cmd_encode(name: String, backing_type: i32, count: i64) -> Result<()> {
    println!("{}", BindingObjectDescriptor::new(name, backing_type, count).encode());
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

/// Two nodes on an in-process network: `holder` owns the values, `requester`
/// asks for each one under several target names
async fn cmd_demo(config: &Config, sources: usize, fan_out: usize) -> Result<()> {
    let root = std::env::temp_dir().join(format!("datamover-demo-{}", uuid::Uuid::now_v7()));
    let result = run_demo(config, &root, sources, fan_out.max(1)).await;
    if let Err(e) = std::fs::remove_dir_all(&root) {
        tracing::warn!("Failed to remove demo directory {}: {}", root.display(), e);
    }
    result
}

async fn run_demo(config: &Config, root: &Path, sources: usize, fan_out: usize) -> Result<()> {
    let network = LocalNetwork::new(config.network.chunk_size);

    let holder_store = Arc::new(FsDataStore::new(root.join("holder")));
    for i in 0..sources {
        holder_store
            .put_file(&format!("src-{}", i), format!("value {}\n", i).as_bytes())
            .await?;
    }
    holder_store.put_binding("matrix", vec![7; 32]).await;

    let fallback = Arc::new(RelocatedPathFallback::new(config.storage.fallback_paths()));
    let holder = TransferNode::spawn_local_with_fallback(
        &network,
        "holder",
        config.coordinator(),
        holder_store,
        fallback,
    )?;
    let requester = TransferNode::spawn_local(
        &network,
        "requester",
        config.coordinator(),
        Arc::new(FsDataStore::new(root.join("requester"))),
    )?;

    let mut tickets = Vec::new();
    for i in 0..sources {
        let source_id = format!("src-{}", i);
        for j in 0..fan_out {
            let target = if j == 0 {
                source_id.clone()
            } else {
                format!("{}_copy{}", source_id, j)
            };
            let request = TransferRequest::file(DataSource::at(&source_id, holder.name()), target);
            tickets.push(requester.coordinator().add_transfer_request(request).await);
        }
    }
    let binding = TransferRequest::binding(DataSource::at("matrix#1#32", holder.name()), "matrix#1#32");
    tickets.push(requester.coordinator().add_transfer_request(binding).await);

    for outcome in futures::future::join_all(tickets.into_iter().map(|t| t.wait())).await {
        match outcome {
            Ok(delivery) => {
                let how = if delivery.local_copy { "local copy" } else { "network" };
                println!(
                    "{} {} -> {} ({})",
                    "✓".green(),
                    delivery.source_id,
                    delivery.target.cyan(),
                    how
                );
            }
            Err(failure) => println!("{} {}", "✗".red(), failure),
        }
    }

    requester
        .coordinator()
        .request_shutdown(&DataLocation::new(holder.name()))
        .await
        .context("Holder did not acknowledge shutdown")?;
    println!("{} holder drained and shut down", "✓".green());

    let metrics = requester.coordinator().metrics();
    println!(
        "demands issued: {}, coalesced: {}, deliveries: {}, local copies: {}",
        metrics.demands_issued, metrics.coalesced_requests, metrics.deliveries, metrics.local_copies
    );
    Ok(())
}
