//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat [--config docchat.toml] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat ingest [PDF]` | Load, split, embed and upload a PDF |
//! | `docchat chat` | Interactive question answering in the terminal |
//! | `docchat serve` | HTTP server with streamed (SSE) answers |
//! | `docchat check` | Print effective settings and missing credentials |
//!
//! Credentials always come from the environment (`AZURE_OPENAI_*`,
//! `QDRANT_*`). Tunables may be set in the config file or overridden by
//! environment variables of the same name in upper case.
//!
//! ## Exit Codes
//!
//! `ingest` exits 1 when any batch failed, on any setup error, and when
//! interrupted with Ctrl-C.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docchat::config::Config;
use docchat::progress::ProgressMode;
use docchat::{chat, ingest, server};

/// docchat: ask questions about a PDF.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "PDF ingestion and retrieval-augmented chat over Qdrant and Azure OpenAI",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./docchat.toml` when present. Environment variables
    /// override file values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a PDF into the vector collection.
    ///
    /// Loads every page, splits it into overlapping chunks, embeds them and
    /// uploads them in batches. Exits non-zero if any batch failed.
    Ingest {
        /// PDF to ingest. Defaults to `pdf_path` from the configuration.
        pdf: Option<PathBuf>,

        /// Upload progress on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Ask questions in the terminal; answers stream as they are generated.
    Chat,

    /// Serve `POST /chat` (SSE) and `GET /health`.
    Serve {
        /// Address to bind, overriding `bind` from the configuration.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the effective settings and list missing credentials.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { pdf, progress } => {
            let path = pdf.unwrap_or_else(|| cfg.pdf_path.clone());
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();

            let result = tokio::select! {
                result = ingest::ingest_documents(&cfg, &path, reporter.as_ref()) => result?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("interrupted");
                    std::process::exit(1);
                }
            };
            if !result.is_success() {
                eprintln!(
                    "{} of {} chunks failed to upload",
                    result.failed, result.chunks
                );
                std::process::exit(1);
            }
        }
        Commands::Chat => {
            chat::run_chat(&cfg).await?;
        }
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.bind = bind;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Check => {
            print!("{}", toml::to_string(&cfg)?);
            let missing = cfg.missing_credentials();
            if missing.is_empty() {
                println!("credentials: ok");
            } else {
                println!("credentials: missing");
                for name in &missing {
                    println!("  {}", name);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
