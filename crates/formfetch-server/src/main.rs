//! Formfetch server: entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use formfetch::renderer::chromium::ChromiumRenderer;
use formfetch::renderer::{NoopRenderer, Renderer};
use formfetch::{FetchConfig, FetchRequest, Fetcher};
use formfetch_server::{config, doctor, http, logging};

#[derive(Parser)]
#[command(
    name = "formfetch",
    about = "Fetch documents published behind legacy web search forms",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default).
    Serve {
        /// Listen address (host:port). Defaults to 0.0.0.0:$PORT.
        #[arg(long)]
        addr: Option<String>,
    },

    /// Fetch one document and write it to disk.
    Fetch {
        /// Search key, e.g. a process number.
        key: String,

        /// 1-based index of the document on the result page.
        #[arg(long)]
        ordinal: Option<i64>,

        /// Output path. Defaults to the derived filename in the current directory.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Check that the environment can run a browser session.
    Doctor,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   formfetch completions bash > ~/.local/share/bash-completion/completions/formfetch
    ///   formfetch completions zsh > ~/.zfunc/_formfetch
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.json_logs);

    let fetch_config = FetchConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve { addr: None }) {
        Commands::Serve { addr } => {
            let addr = config::resolve_addr(addr.as_deref())?;
            let renderer = build_renderer(&fetch_config, true)?;
            tracing::info!("starting formfetch v{}", formfetch::VERSION);
            tracing::info!("Entry URL: {}", fetch_config.entry_url);
            if let Some(cap) = fetch_config.max_sessions {
                tracing::info!("Session cap: {cap}");
            }

            let fetcher = Fetcher::new(renderer, fetch_config)?;
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("received shutdown signal");
            };
            http::serve(addr, http::AppState::new(fetcher), shutdown).await?;
        }

        Commands::Fetch { key, ordinal, out } => {
            let renderer = build_renderer(&fetch_config, false)?;
            let fetcher = Fetcher::new(renderer, fetch_config)?;
            let request = FetchRequest {
                search_key: key.clone(),
                ordinal,
            };

            match fetcher.fetch(request).await {
                Ok(doc) => {
                    let path = out.unwrap_or_else(|| PathBuf::from(&doc.artifact.filename));
                    tokio::fs::write(&path, &doc.artifact.bytes).await?;
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                    eprintln!("Saved {} bytes to {}", doc.artifact.size_bytes, path.display());
                }
                Err(e) => {
                    println!("{}", serde_json::to_string_pretty(&e.report(&key))?);
                    std::process::exit(1);
                }
            }
        }

        Commands::Doctor => {
            if !doctor::run(&fetch_config) {
                std::process::exit(1);
            }
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "formfetch", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Chromium when available. The server keeps running without a browser so
/// health checks still answer; one-shot fetches fail instead.
fn build_renderer(config: &FetchConfig, allow_missing: bool) -> anyhow::Result<Arc<dyn Renderer>> {
    match ChromiumRenderer::new(config.browser.clone()) {
        Ok(renderer) => {
            tracing::info!("Chromium: {}", renderer.chrome_path().display());
            Ok(Arc::new(renderer))
        }
        Err(e) if allow_missing => {
            tracing::warn!("{e:#}; every request will fail until a browser is installed");
            Ok(Arc::new(NoopRenderer))
        }
        Err(e) => Err(e),
    }
}
