//! # M3 CLI (`m3`)
//!
//! ## Usage
//!
//! ```bash
//! m3 --config ./config/m3.toml [--project NAME] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `m3 project create\|list\|use\|delete` | Manage projects |
//! | `m3 add <paths…> --doc-type T` | Add or update files and enrich them |
//! | `m3 remove <file>` | Remove a file and its chunks |
//! | `m3 list` | List files in the project |
//! | `m3 rebuild` | Clear the index and re-enrich every file |
//! | `m3 status` | Counts and index consistency |
//! | `m3 topk "<query>"` | K most similar chunks |
//! | `m3 search "<query>" --min-score S` | Every chunk above a similarity score |
//! | `m3 exact "<text>"` | Case-sensitive substring match |
//! | `m3 framework build\|show` | Corpus-wide thematic framework |
//!
//! ## Examples
//!
//! ```bash
//! m3 project create fieldwork
//! m3 add ./transcripts --doc-type interview
//! m3 add "notes/**/*.md" --doc-type fieldnotes
//! m3 topk "experiences of precarious work" -k 10 --summary
//! m3 exact "zero-hours"
//! ```

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use m3::config::{self, Config};
use m3::framework;
use m3::ingest::{AddReport, FileWarning};
use m3::progress::ProgressMode;
use m3::project::ProjectRegistry;
use m3::search;
use m3::session::{self, Session};
use m3::stats;

/// M3: project-scoped document enrichment and semantic retrieval.
///
/// All commands accept `--config` pointing to a TOML configuration file
/// and `--project` to override the active project.
#[derive(Parser)]
#[command(name = "m3", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/m3.toml")]
    config: PathBuf,

    /// Project to operate on. Defaults to the active project.
    #[arg(long, global = true)]
    project: Option<String>,

    /// Progress output on stderr. Defaults to `human` on a terminal, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, list, select and delete projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Add files, directories or glob patterns to the project.
    ///
    /// New files are stored at version 1; changed files get a new version
    /// and are re-enriched; unchanged files are skipped unless they have
    /// no chunks in the index.
    Add {
        /// Files, directories or glob patterns.
        #[arg(required = true)]
        paths: Vec<String>,

        /// Document type. `interview` enables question/answer splitting.
        #[arg(long, default_value = "document")]
        doc_type: String,
    },

    /// Remove a file (by original filename or internal id) and its chunks.
    Remove {
        identifier: String,
    },

    /// List files in the project.
    List,

    /// Clear the index and re-enrich every file in the manifest.
    ///
    /// The supported recovery after changing the embedding model or when
    /// `status` reports an inconsistent index.
    #[command(alias = "ingest")]
    Rebuild {
        /// Do not ask for confirmation.
        #[arg(long)]
        yes: bool,
    },

    /// Show file and chunk counts and check the index against the manifest.
    Status,

    /// Return the K chunks most similar to the query.
    Topk {
        query: String,

        /// Number of results. Defaults to `retrieval.top_k`.
        #[arg(short, long)]
        k: Option<usize>,

        /// Include the file-level summary in the results.
        #[arg(long)]
        summary: bool,
    },

    /// Return every chunk scoring strictly above `--min-score`.
    Search {
        query: String,

        #[arg(long)]
        min_score: f64,

        #[arg(long)]
        summary: bool,
    },

    /// Case-sensitive substring search over chunk text.
    Exact {
        query: String,

        /// Also match inside the file-level summary.
        #[arg(long)]
        summary: bool,
    },

    /// Build or show the corpus-wide thematic framework.
    Framework {
        #[command(subcommand)]
        action: FrameworkAction,
    },

    /// Print a shell completion script.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project. The first project becomes active.
    Create { name: String },
    /// List projects; the active one is marked with `*`.
    List,
    /// Select the active project.
    Use { name: String },
    /// Delete a project and everything in it.
    Delete {
        name: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum FrameworkAction {
    /// Cluster every thematic label in the index into core themes.
    Build,
    /// Print the saved framework.
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "m3", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let project = cli.project.as_deref();

    match cli.command {
        Commands::Project { action } => run_project(&cfg, action).await?,
        Commands::Add { paths, doc_type } => {
            cfg.check_doc_type(&doc_type)?;
            let session = Session::new(cfg);
            let (paths_info, corpus) = session.open(project).await?;
            session.require_embedder().await?;
            session.require_llm().await?;
            let mut corpus = corpus
                .with_progress(progress.reporter())
                .with_interrupt(interrupt_flag());
            let report = corpus.add(&paths, &doc_type).await?;
            print_add_report(&paths_info.name, &report);
        }
        Commands::Remove { identifier } => {
            let session = Session::new(cfg);
            let (_, mut corpus) = session.open(project).await?;
            let removed = corpus.remove(&identifier).await?;
            println!("removed {}", removed.entry.original_filename);
            println!("  id: {}", removed.entry.internal_id);
            println!("  chunks deleted: {}", removed.chunks_deleted);
        }
        Commands::List => {
            let session = Session::new(cfg);
            let (_, corpus) = session.open(project).await?;
            stats::run_list(&corpus).await?;
        }
        Commands::Rebuild { yes } => {
            let session = Session::new(cfg);
            let (paths_info, corpus) = session.open(project).await?;
            let prompt = format!(
                "This clears the index of '{}' and re-enriches {} file(s). Continue? [y/N] ",
                paths_info.name,
                corpus.content().manifest().len()
            );
            if !yes && !confirm(&prompt)? {
                println!("Aborted.");
                return Ok(());
            }
            session.require_embedder().await?;
            session.require_llm().await?;
            let mut corpus = corpus
                .with_progress(progress.reporter())
                .with_interrupt(interrupt_flag());
            let report = corpus.rebuild().await?;
            println!("rebuild {}", paths_info.name);
            println!("  files: {}", report.files);
            println!("  chunks written: {}", report.chunks_written);
            print_warnings(&report.warnings);
            if report.interrupted {
                println!("interrupted");
            } else {
                println!("ok");
            }
        }
        Commands::Status => {
            let session = Session::new(cfg);
            let (paths_info, corpus) = session.open(project).await?;
            stats::run_status(&paths_info, &corpus).await?;
        }
        Commands::Topk { query, k, summary } => {
            let k = k.unwrap_or(cfg.retrieval.top_k);
            let session = Session::new(cfg);
            let (_, corpus) = session.open(project).await?;
            session.require_embedder().await?;
            search::run_topk(&corpus, &query, k, summary).await?;
        }
        Commands::Search {
            query,
            min_score,
            summary,
        } => {
            let session = Session::new(cfg);
            let (_, corpus) = session.open(project).await?;
            session.require_embedder().await?;
            search::run_threshold(&corpus, &query, min_score, summary).await?;
        }
        Commands::Exact { query, summary } => {
            let session = Session::new(cfg);
            let (_, corpus) = session.open(project).await?;
            search::run_exact(&corpus, &query, summary).await?;
        }
        Commands::Framework { action } => {
            let session = Session::new(cfg);
            let (paths_info, corpus) = session.open(project).await?;
            match action {
                FrameworkAction::Build => {
                    session.require_llm().await?;
                    let llm = session.llm();
                    let built =
                        framework::build_and_save(&corpus, llm.as_ref(), &paths_info.framework_json())
                            .await?;
                    framework::print_framework(&built);
                }
                FrameworkAction::Show => match framework::load(&paths_info.framework_json())? {
                    Some(saved) => framework::print_framework(&saved),
                    None => println!("No framework yet; run `m3 framework build`."),
                },
            }
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn run_project(cfg: &Config, action: ProjectAction) -> Result<()> {
    let registry = ProjectRegistry::new(&cfg.storage.root);
    match action {
        ProjectAction::Create { name } => {
            let paths = registry.create(&name)?;
            let store = session::open_store(&paths).await?;
            store.close().await;
            println!("created project {}", name);
            println!("  directory: {}", paths.dir.display());
            if registry.active()?.as_deref() == Some(name.as_str()) {
                println!("  active: yes");
            }
        }
        ProjectAction::List => {
            let active = registry.active()?;
            let names = registry.list()?;
            if names.is_empty() {
                println!("No projects.");
            }
            for name in names {
                let marker = if active.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}", marker, name);
            }
        }
        ProjectAction::Use { name } => {
            registry.select(&name)?;
            println!("active project: {}", name);
        }
        ProjectAction::Delete { name, yes } => {
            let prompt = format!("Delete project '{}' and all its files? [y/N] ", name);
            if !yes && !confirm(&prompt)? {
                println!("Aborted.");
                return Ok(());
            }
            registry.delete(&name)?;
            println!("deleted project {}", name);
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

/// Flag set by the first Ctrl-C; a second one exits immediately.
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if handler_flag.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            eprintln!("interrupt: finishing the current file, press Ctrl-C again to abort");
        }
    });
    flag
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{}", prompt);
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_add_report(project: &str, report: &AddReport) {
    println!("add {}", project);
    println!("  added: {}", report.added.len());
    println!("  updated: {}", report.updated.len());
    println!("  unchanged: {}", report.unchanged.len());
    if !report.repaired.is_empty() {
        println!("  repaired: {}", report.repaired.len());
    }
    println!("  chunks written: {}", report.chunks_written);
    print_warnings(&report.warnings);
    if report.interrupted {
        println!("interrupted");
    } else {
        println!("ok");
    }
}

fn print_warnings(warnings: &[FileWarning]) {
    for warning in warnings {
        println!("  warning: {}", warning);
    }
}
