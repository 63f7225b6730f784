//! CLI Module
//!
//! Command-line interface for the Layerdeck timeline engine.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Layerdeck - arrange, preview and render multi-layer audio timelines
#[derive(Parser, Debug)]
#[command(name = "layerdeck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine config file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a project offline to a WAV file
    #[command(name = "render")]
    Render {
        /// Project document
        project: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Export sample rate (overrides the config)
        #[arg(long)]
        sample_rate: Option<u32>,

        /// Master volume in [0, 2] (overrides the project)
        #[arg(long)]
        master_volume: Option<f32>,
    },

    /// List a project's layers and timeline length
    #[command(name = "inspect")]
    Inspect {
        /// Project document
        project: PathBuf,
    },

    /// Play a project through the software device and capture the output
    #[command(name = "preview")]
    Preview {
        /// Project document
        project: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Seconds to capture (default: until the timeline ends)
        #[arg(short, long)]
        seconds: Option<f64>,

        /// Start position (S, M:SS or H:MM:SS)
        #[arg(long, default_value = "0")]
        from: String,
    },

    /// Add a WAV file as a new layer, creating the project if needed
    #[command(name = "add")]
    Add {
        /// Project document
        project: PathBuf,

        /// Audio file to add
        wav: PathBuf,

        /// Timeline position (S, M:SS or H:MM:SS)
        #[arg(long, default_value = "0")]
        at: String,

        /// Loop the clip for this long (S, M:SS or H:MM:SS)
        #[arg(long = "loop", value_name = "TIME")]
        loop_for: Option<String>,

        /// Layer name (default: file stem)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Parse a time string and print it in seconds
    #[command(name = "parse-time")]
    ParseTime {
        /// Time string (S, M:SS or H:MM:SS)
        input: String,
    },
}
