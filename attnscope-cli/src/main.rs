//! attnscope CLI — Terminal interface for exploring attention over music.
//!
//! Loads a chorale, dual chorale or performance document and answers the
//! same questions the visualizer asks: what to draw for a layer, head and step.

mod commands;

use attnscope_core::{DataKind, HeadSelector, LoadSource};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// attnscope: attention weights over symbolic music
#[derive(Parser, Debug)]
#[command(name = "attnscope", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.attnscope/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

/// A dataset document and how to read it.
#[derive(clap::Args, Debug, Clone)]
struct InputArgs {
    /// Path or http(s) URL of the JSON document
    source: LoadSource,

    /// Force the document kind: chorale, performance or dual
    #[arg(short, long)]
    kind: Option<DataKind>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Summarize a dataset
    Info {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Print the attentions drawn for one step as JSON
    Select {
        #[command(flatten)]
        input: InputArgs,
        /// Layer index (defaults to the last layer)
        #[arg(short, long)]
        layer: Option<usize>,
        /// Head index, or `all`
        #[arg(long, default_value = "all")]
        head: HeadSelector,
        /// Target step
        #[arg(short, long)]
        step: usize,
        /// Leave a head out of all-heads mode (repeatable)
        #[arg(long = "disable-head")]
        disable_head: Vec<usize>,
        /// Keep only the strongest attentions across heads
        #[arg(long)]
        top: bool,
        /// How many attentions top mode keeps
        #[arg(long)]
        top_n: Option<usize>,
        /// Scaled weight a step must exceed in cutoff mode
        #[arg(long)]
        cutoff: Option<f32>,
        /// Weights at or below this are ignored
        #[arg(long)]
        epsilon: Option<f32>,
    },
    /// Print per-note heat for a single head as JSON
    Heat {
        #[command(flatten)]
        input: InputArgs,
        #[arg(short, long)]
        layer: Option<usize>,
        #[arg(long)]
        head: usize,
        #[arg(short, long)]
        step: usize,
    },
    /// Print note spans (performance) or grid notes (chorale) as JSON
    Spans {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Export a quantized note sequence as JSON
    Export {
        #[command(flatten)]
        input: InputArgs,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Step through the sequence, printing one line per tick
    Play {
        #[command(flatten)]
        input: InputArgs,
        /// Delay between ticks in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        #[arg(short, long)]
        layer: Option<usize>,
        #[arg(long, default_value = "all")]
        head: HeadSelector,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "attnscope", "attnscope")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "attnscope.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
