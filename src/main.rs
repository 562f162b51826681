//! # Image Guard CLI (`guard`)
//!
//! The `guard` binary screens images for copyright risk against a corpus of
//! reference images, either as a long-running HTTP service or as a one-shot
//! command.
//!
//! ## Usage
//!
//! ```bash
//! guard --config ./config/guard.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `guard serve` | Start the background indexer and the HTTP API |
//! | `guard scan <query>` | Index a corpus directory and screen one image |
//! | `guard fingerprint <file>...` | Print perceptual fingerprints |
//! | `guard compare <a> <b>` | Print the fingerprint distance between two images |
//!
//! ## Examples
//!
//! ```bash
//! # Serve the API, seeding the corpus from [corpus].root
//! guard serve --config ./config/guard.toml
//!
//! # Screen one image against a local folder of references
//! guard scan ./candidate.png --corpus ./reference --json
//!
//! # Check whether two files are near-duplicates
//! guard compare ./a.jpg ./b.jpg
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use image_guard::config::{self, Config, CorpusConfig};
use image_guard::corpus::{scan_directory, Corpus};
use image_guard::gemini::create_collaborators;
use image_guard::indexer::TickOutcome;
use image_guard::progress::{forward_run_status, ProgressEvent, ProgressMode};
use image_guard::resolve::{mime_from_path, HttpResolver};
use image_guard::server::run_server;
use image_guard::session::{RunOutcome, Session, SessionSettings};
use image_guard_core::fingerprint::{compute_fingerprint, fingerprints_match};
use image_guard_core::models::ImageRef;

/// Image Guard CLI: copyright-risk screening of images against a
/// reference corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "guard",
    about = "Image Guard: copyright-risk screening of images against a reference corpus",
    version,
    long_about = "Image Guard fingerprints and captions a corpus of reference images in the \
    background, selects likely matches for a query image with perceptual hashes and caption \
    embeddings, and scores each candidate with a vision model."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/guard.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the background indexer and the HTTP API.
    ///
    /// Seeds the corpus from `[corpus]` when configured and serves on
    /// `[server].bind`.
    Serve,

    /// Screen one image against a corpus directory.
    ///
    /// Indexes every image under the corpus root (ticking until nothing is
    /// pending), runs one screening, and prints the ranked report.
    Scan {
        /// Image to screen.
        query: PathBuf,

        /// Corpus directory. Overrides `[corpus].root`.
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Print the perceptual fingerprint of each file.
    Fingerprint {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Compare two images by fingerprint distance.
    Compare {
        a: PathBuf,
        b: PathBuf,

        /// Maximum distance still counted as a match. Defaults to
        /// `[retrieval].match_threshold`.
        #[arg(long)]
        threshold: Option<u32>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let session = build_session(&cfg, cfg.corpus.as_ref())?;
            run_server(&cfg, session).await?;
        }
        Commands::Scan {
            query,
            corpus,
            json,
            progress,
        } => {
            let corpus_config = match (corpus, cfg.corpus.as_ref()) {
                (Some(root), Some(base)) => CorpusConfig {
                    root,
                    ..base.clone()
                },
                (Some(root), None) => CorpusConfig::for_root(root),
                (None, Some(base)) => base.clone(),
                (None, None) => bail!("No corpus given: pass --corpus DIR or configure [corpus]"),
            };
            let mode = progress.map(ProgressMode::from).unwrap_or_else(ProgressMode::default_for_tty);
            let (outcome, names) = run_scan(&cfg, &corpus_config, &query, mode).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_report(&outcome, &names);
            }
        }
        Commands::Fingerprint { files } => {
            let mut failed = 0;
            for file in &files {
                match fingerprint_file(file) {
                    Ok(hex) => println!("{}  {}", hex, file.display()),
                    Err(e) => {
                        eprintln!("error: {}: {:#}", file.display(), e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} files could not be fingerprinted", failed, files.len());
            }
        }
        Commands::Compare { a, b, threshold } => {
            let threshold = threshold.unwrap_or(cfg.retrieval.match_threshold);
            let fa = compute_fingerprint(&read(&a)?)
                .with_context(|| format!("Failed to fingerprint {}", a.display()))?;
            let fb = compute_fingerprint(&read(&b)?)
                .with_context(|| format!("Failed to fingerprint {}", b.display()))?;
            let matched = fingerprints_match(Some(&fa), Some(&fb), threshold);
            println!("{}  {}", fa, a.display());
            println!("{}  {}", fb, b.display());
            println!("distance: {}", fa.distance(&fb));
            println!(
                "match: {} (threshold {})",
                if matched { "yes" } else { "no" },
                threshold
            );
        }
    }

    Ok(())
}

/// Load the config file, or fall back to defaults when it does not exist.
fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

fn build_session(cfg: &Config, corpus: Option<&CorpusConfig>) -> anyhow::Result<Arc<Session>> {
    let items = match corpus {
        Some(c) => scan_directory(c)?,
        None => Vec::new(),
    };
    tracing::info!(items = items.len(), "corpus seeded");

    let collaborators = create_collaborators(cfg)?;
    let resolver = Arc::new(HttpResolver::new(std::time::Duration::from_secs(
        cfg.model.timeout_secs,
    ))?);
    Ok(Arc::new(Session::new(
        Arc::new(Corpus::from_items(items)),
        collaborators,
        resolver,
        SessionSettings::from(cfg),
    )))
}

async fn run_scan(
    cfg: &Config,
    corpus: &CorpusConfig,
    query: &Path,
    mode: ProgressMode,
) -> anyhow::Result<(RunOutcome, HashMap<String, String>)> {
    let session = build_session(cfg, Some(corpus))?;
    let reporter = mode.reporter();

    let total = session.corpus().len() as u64;
    if total == 0 {
        bail!("No images found under {}", corpus.root.display());
    }
    let indexer = session.indexer();
    let mut n = 0;
    reporter.report(ProgressEvent::Indexing { n, total });
    while indexer.tick().await != TickOutcome::Idle {
        n += 1;
        reporter.report(ProgressEvent::Indexing { n: n.min(total), total });
    }

    let name = query
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| query.display().to_string());
    let image = ImageRef::inline(mime_from_path(query), read(query)?);
    session.set_query(&name, image).await?;

    let forwarder = forward_run_status(session.subscribe(), reporter);
    let outcome = session.start_run().await?;
    let _ = forwarder.await;

    let names = session
        .list_corpus()
        .into_iter()
        .map(|item| (item.id, item.name))
        .collect();
    Ok((outcome, names))
}

fn print_report(outcome: &RunOutcome, names: &HashMap<String, String>) {
    let report = &outcome.report;
    println!(
        "{} (max score {:.0}, {} of {} candidates flagged, {:?})",
        report.summary.label(),
        report.max_score,
        report.results.len(),
        outcome.candidates,
        outcome.strategy
    );
    for (i, r) in report.results.iter().enumerate() {
        let marker = if r.fingerprint_match { " [fingerprint match]" } else { "" };
        let name = names
            .get(&r.reference_id)
            .map(String::as_str)
            .unwrap_or(r.reference_id.as_str());
        println!("{:>2}. {:>5.1}  {}{}", i + 1, r.scores.total, name, marker);
        if !r.analysis_text.is_empty() {
            println!("      {}", r.analysis_text);
        }
    }
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn fingerprint_file(path: &Path) -> anyhow::Result<String> {
    Ok(compute_fingerprint(&read(path)?)?.to_hex())
}
