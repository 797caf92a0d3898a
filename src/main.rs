//! # VeriLex CLI (`verilex`)
//!
//! ## Usage
//!
//! ```bash
//! verilex --config ./config/verilex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `verilex serve` | Start the HTTP server |
//! | `verilex analyze <FILE>` | Analyze a local PDF and print the result as JSON |
//! | `verilex history` | Print retained history entries |
//! | `verilex check` | Validate configuration and the API credential |
//!
//! Without `--config` every setting takes its default. A `.env` file in the
//! working directory is loaded first, so `GEMINI_API_KEY` may live there.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verilex::analysis;
use verilex::config::{self, Config};
use verilex::extract::MIME_PDF;
use verilex::history::{self, MemoryHistory};
use verilex::models::{extension_of, UploadedDocument};
use verilex::pipeline::Pipeline;
use verilex::server;

/// VeriLex: informational contract analysis for PDF documents.
#[derive(Parser)]
#[command(name = "verilex", version)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Run the full pipeline on a local PDF and print the response body.
    Analyze {
        /// Path to the PDF.
        file: PathBuf,

        /// Append the result to history.
        #[arg(long)]
        save: bool,
    },

    /// Print stored history entries, newest first.
    History {
        /// Maximum number of entries to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Verify configuration and that the API credential is present.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "verilex=debug,tower_http=debug"
    } else {
        "verilex=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await,
        Commands::Analyze { file, save } => analyze(&cfg, &file, save).await,
        Commands::History { limit } => print_history(&cfg, limit).await,
        Commands::Check => check(&cfg),
    }
}

async fn analyze(cfg: &Config, path: &Path, save: bool) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime = if extension_of(&name) == cfg.upload.allowed_extension {
        MIME_PDF
    } else {
        "application/octet-stream"
    };
    let doc = UploadedDocument::new(name, mime, bytes);

    let service = analysis::create_service(&cfg.analysis)?;
    let pipeline = if save {
        Pipeline::new(cfg, service, history::create_store(&cfg.history).await?)
    } else {
        Pipeline::new(cfg, service, Arc::new(MemoryHistory::new(1)))
    };

    match pipeline.analyze(doc).await {
        Ok(mut outcome) => {
            if save {
                outcome.history_warning = pipeline.record(&outcome).await;
            }
            let mut body = json!({
                "success": true,
                "file": outcome.file,
                "extractedText": outcome.extracted_text,
                "analysis": outcome.analysis,
            });
            if let Some(warning) = outcome.history_warning {
                body["historyWarning"] = json!(warning);
            }
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(e) => {
            let body = json!({ "success": false, "error": e.client_message() });
            println!("{}", serde_json::to_string_pretty(&body)?);
            anyhow::bail!("analysis failed with status {}: {}", e.status().as_u16(), e)
        }
    }
}

async fn print_history(cfg: &Config, limit: Option<usize>) -> Result<()> {
    let store = history::create_store(&cfg.history).await?;
    let mut entries = store.list_all().await?;
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "success": true, "history": entries }))?
    );
    Ok(())
}

fn check(cfg: &Config) -> Result<()> {
    cfg.analysis.api_key()?;
    println!("Configuration OK");
    println!(
        "  analysis: {} ({}) via {}",
        cfg.analysis.provider,
        cfg.analysis.model_name(),
        cfg.analysis.endpoint_url()
    );
    println!(
        "  upload:   max {} bytes, field \"{}\"",
        cfg.upload.max_file_bytes, cfg.upload.field_name
    );
    println!(
        "  history:  {} ({} entries) at {}",
        cfg.history.backend,
        cfg.history.capacity,
        cfg.history.path.display()
    );
    println!("  server:   {}", cfg.server.effective_bind());
    Ok(())
}
