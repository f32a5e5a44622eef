//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Datamover - transfer coordinator for compute nodes
#[derive(Parser)]
#[command(
    name = "dm",
    about = "Move named values between compute nodes with bounded concurrency",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(short, long, global = true, help = "Log level: error, warn, info, debug, trace")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Work with binding object identifiers
    Descriptor {
        #[command(subcommand)]
        command: DescriptorCommand,
    },

    /// Print the effective configuration as YAML
    Config,

    /// Run two in-process nodes and fan out requests between them
    Demo {
        /// Number of distinct source values
        #[arg(short, long, default_value = "3")]
        sources: usize,

        /// Requests per source, each under its own target name
        #[arg(short, long, default_value = "2")]
        fan_out: usize,
    },
}

/// Binding identifier subcommands
#[derive(Subcommand)]
pub enum DescriptorCommand {
    /// Decode `name#type#elementCount`
    Decode {
        /// Encoded identifier
        #[arg(value_name = "ID")]
        identifier: String,

        /// Report the transfer path for a persistent-binding peer
        #[arg(short, long)]
        persistent: bool,
    },

    /// Encode the fields of a binding identifier
    Encode {
        /// Object name
        #[arg(long)]
        name: String,

        /// Backing type code
        #[arg(long)]
        backing_type: i32,

        /// Element count; 0 for unsized objects
        #[arg(long)]
        count: i64,
    },
}
