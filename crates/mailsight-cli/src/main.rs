use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod commands;
mod loopback;
mod navigator;
mod ui;

#[derive(Parser)]
#[command(name = "mailsight")]
#[command(about = "Connect a mailbox or upload an archive, then watch it ingest.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect a Microsoft mailbox through the browser
    Connect {
        /// Print the login URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,

        /// Don't listen for the redirect; finish with `mailsight callback`
        #[arg(long)]
        manual: bool,

        /// Keep watching ingestion once connected
        #[arg(long, short)]
        watch: bool,

        /// Emit machine-readable progress lines
        #[arg(long)]
        json: bool,
    },

    /// Finish a login from the redirect URL the browser landed on
    Callback {
        /// Full redirect URL (or its path and query).
        /// If omitted, prompts for it.
        #[arg(value_name = "URL")]
        url: Option<String>,

        /// Keep watching ingestion once connected
        #[arg(long, short)]
        watch: bool,

        /// Emit machine-readable progress lines
        #[arg(long)]
        json: bool,
    },

    /// Upload a .pst or .mbox archive
    Upload {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Keep watching ingestion after the upload
        #[arg(long, short)]
        watch: bool,

        /// Emit machine-readable progress lines
        #[arg(long)]
        json: bool,
    },

    /// Follow ingestion progress until it completes
    Watch {
        /// What is being ingested
        #[arg(long, value_enum, default_value_t = SourceArg::Mailbox)]
        source: SourceArg,

        /// Emit machine-readable progress lines
        #[arg(long)]
        json: bool,
    },

    /// Show backend health and current ingestion counters
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Mailbox,
    Archive,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Debug logs stay hidden unless RUST_LOG asks for them
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Connect {
            no_browser,
            manual,
            watch,
            json,
        } => commands::connect::run(no_browser, manual, watch, json).await,
        Commands::Callback { url, watch, json } => commands::callback::run(url, watch, json).await,
        Commands::Upload { file, watch, json } => commands::upload::run(&file, watch, json).await,
        Commands::Watch { source, json } => {
            let kind = match source {
                SourceArg::Mailbox => mailsight_core::SourceKind::ConnectedMailbox,
                SourceArg::Archive => mailsight_core::SourceKind::UploadedArchive,
            };
            commands::watch::run(kind, json).await
        }
        Commands::Status { json } => commands::status::run(json).await,
    }
}
