//! # knowba CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `knowba list` | List stores with entry counts and indexed files |
//! | `knowba upload --db <name> [--create] <paths...>` | Index files or directories |
//! | `knowba ask [--db <name>] "<question>"` | One streamed answer |
//! | `knowba chat [--db <name>]` | Interactive session over stdin |
//! | `knowba completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! knowba upload --db contracts --create ./contracts/*.pdf
//! knowba upload --db contracts ./amendments
//! knowba ask --db contracts "When does the lease end?"
//! RUST_LOG=knowba=debug knowba chat --db contracts
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use knowba::config::{self, Config};
use knowba::embedding::create_provider;
use knowba::ingest::{ingest, read_uploads, UploadIntent, UploadRequest};
use knowba::llm::create_chat_model;
use knowba::qa::{QaEngine, SessionContext, GREETING};
use knowba::store::VectorStores;
use knowba_core::chunk::TextSplitter;

/// knowba: ask questions about your own documents.
///
/// Settings are read from a TOML file (see `config/knowba.example.toml`).
/// A missing file means defaults: local stores under `./vectorstores` and
/// the offline hashing embedder.
#[derive(Parser)]
#[command(name = "knowba", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/knowba.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the stores under the storage root.
    List,

    /// Normalize, chunk, and index documents into a store.
    ///
    /// Supported formats: pdf, docx, txt, csv. Directories are walked
    /// recursively. Files that fail to parse are reported and skipped.
    Upload {
        /// Target store name.
        #[arg(long)]
        db: String,

        /// Create a new store; fails if the name is taken.
        /// Without this flag files are appended, creating the store if needed.
        #[arg(long)]
        create: bool,

        /// Files or directories to upload.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer one question, streaming the reply to stdout.
    Ask {
        /// Store to ground the answer in. Omit for plain conversation.
        #[arg(long)]
        db: Option<String>,

        question: String,
    },

    /// Interactive question loop. Ctrl-D exits.
    Chat {
        #[arg(long)]
        db: Option<String>,
    },

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("knowba=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "knowba", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config_or_default(&cli.config)?;
    let stores = VectorStores::from_config(&cfg);

    match cli.command {
        Commands::List => list(&stores).await?,
        Commands::Upload { db, create, paths } => upload(&cfg, &stores, db, create, &paths).await?,
        Commands::Ask { db, question } => {
            let (engine, mut ctx) = open_session(&cfg, &stores, db.as_deref(), false).await?;
            ask(&engine, &mut ctx, &question).await?;
        }
        Commands::Chat { db } => {
            let (engine, mut ctx) = open_session(&cfg, &stores, db.as_deref(), true).await?;
            chat(&engine, &mut ctx).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn list(stores: &VectorStores) -> Result<()> {
    let names = stores.list().await?;
    if names.is_empty() {
        println!("No stores under {}", stores.root().display());
        return Ok(());
    }
    for name in names {
        match stores.load(&name).await {
            Ok(handle) => {
                let info = handle.info().await?;
                println!(
                    "{}  {} entries  {} ({} dims)  updated {}",
                    info.name,
                    info.entries,
                    info.embedding.model,
                    info.embedding.dims,
                    info.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
                for source in info.sources {
                    println!("    {}", source);
                }
            }
            Err(e) => println!("{}  (unreadable: {})", name, e),
        }
    }
    Ok(())
}

/// Expand directories into their files, keeping argument order.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

async fn upload(
    cfg: &Config,
    stores: &VectorStores,
    db: String,
    create: bool,
    paths: &[PathBuf],
) -> Result<()> {
    let (files, unreadable) = read_uploads(&collect_files(paths)?).await;

    let splitter = TextSplitter::new(cfg.chunking.max_chars, cfg.chunking.overlap_chars)?;
    let provider = create_provider(&cfg.embedding)?;
    let request = UploadRequest {
        files,
        store: db,
        intent: if create {
            UploadIntent::Create
        } else {
            UploadIntent::Append
        },
    };

    let mut report = ingest(stores, &splitter, provider.as_ref(), request).await?;
    report.failed.extend(unreadable);

    println!("{}", report.summary());
    for file in &report.succeeded {
        println!("  ok      {}  {} chunks  {}", file.name, file.chunks, &file.id[..12]);
    }
    for err in &report.failed {
        println!("  failed  {}", err);
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }

    if report.succeeded.is_empty() {
        bail!("No files could be indexed");
    }
    Ok(())
}

async fn open_session(
    cfg: &Config,
    stores: &VectorStores,
    db: Option<&str>,
    greeted: bool,
) -> Result<(QaEngine, SessionContext)> {
    let store = match db {
        Some(name) => Some(
            stores
                .load(name)
                .await
                .with_context(|| format!("Cannot open store '{}'", name))?,
        ),
        None => None,
    };

    let engine = QaEngine::new(
        Arc::from(create_chat_model(&cfg.llm)?),
        Arc::from(create_provider(&cfg.embedding)?),
        cfg.retrieval.clone(),
    );
    let ctx = if greeted {
        SessionContext::greeted(store)
    } else {
        SessionContext::new(store)
    };
    Ok((engine, ctx))
}

async fn ask(engine: &QaEngine, ctx: &mut SessionContext, question: &str) -> Result<()> {
    let mut answer = engine.answer(question, ctx).await?;
    let mut stdout = std::io::stdout();
    while let Some(delta) = answer.next().await {
        let delta = delta?;
        stdout.write_all(delta.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

async fn chat(engine: &QaEngine, ctx: &mut SessionContext) -> Result<()> {
    println!("{}", GREETING);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if let Err(e) = ask(engine, ctx, question).await {
            eprintln!("error: {:#}", e);
        }
    }
}
