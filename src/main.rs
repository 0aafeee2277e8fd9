//! # Docs Harness CLI (`dh`)
//!
//! Index a project's documentation and source code, search it, find
//! reusable code, and fill prompt templates with project context.
//!
//! ## Usage
//!
//! ```bash
//! dh --config ./config/harness.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dh init` | Create the database and load the default prompts |
//! | `dh index [--force]` | Incrementally reindex the project |
//! | `dh search "<query>"` | Search documents and code entities |
//! | `dh reuse "<functionality>"` | Find existing code to reuse |
//! | `dh arch` | Documents describing the architecture |
//! | `dh get <id>` | Print one indexed item |
//! | `dh parse <file>` | Show what a file parses into, without indexing it |
//! | `dh stats` | Index and prompt statistics |
//! | `dh prompt ...` | List, create, edit, suggest and apply prompt templates |
//! | `dh serve` | Start the HTTP tool server |
//!
//! Every command accepts `--json` to print machine-readable output on stdout.
//! Logs go to stderr and honor `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use docs_harness::config;
use docs_harness::context::{ArchitectureDoc, PromptSuggestion, ReuseCandidate};
use docs_harness::engine::{Engine, SearchRequest};
use docs_harness::get::{print_item, ItemResponse};
use docs_harness::models::{IndexedItem, ItemKind, NewPrompt, PromptChanges, PromptTemplate, SearchHit};
use docs_harness::progress::{format_number, ProgressMode};
use docs_harness::resolve::{GeneratedPrompt, Resolution, ValueSource};
use docs_harness::server;
use docs_harness::stats::print_stats;

/// Docs Harness: documentation and code indexing with ranked retrieval and
/// context-filled prompt templates.
#[derive(Parser)]
#[command(name = "dh", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harness.toml")]
    config: PathBuf,

    /// Print JSON on stdout instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and load the default prompt templates.
    ///
    /// Idempotent: running it again changes nothing.
    Init,

    /// Reindex the project.
    ///
    /// Files whose content hash is unchanged are skipped unless `--force`
    /// is given. Files that disappeared are removed from the index.
    Index {
        /// Reparse every file.
        #[arg(long)]
        force: bool,

        /// Progress output on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Search documents and code entities.
    Search {
        query: String,

        /// Restrict to documents or code entities.
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// Restrict to one file extension, e.g. `md`.
        #[arg(long)]
        doc_type: Option<String>,

        /// Restrict to paths under this prefix.
        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Find existing code implementing some functionality.
    Reuse {
        functionality: String,

        /// Service you are working in; its code ranks first.
        #[arg(long)]
        service: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Documents matching the configured architecture keywords.
    Arch {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one indexed item by id (e.g. `doc:docs/guide.md`).
    Get { id: String },

    /// Parse a file and print the items it would produce. Nothing is stored.
    Parse { file: PathBuf },

    /// Index and prompt statistics.
    Stats,

    /// Prompt templates.
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },

    /// Start the HTTP tool server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum PromptAction {
    /// List templates, optionally in one category.
    List {
        #[arg(long)]
        category: Option<String>,
    },

    /// Search templates by text, category and tags.
    Search {
        #[arg(default_value = "")]
        query: String,

        #[arg(long)]
        category: Option<String>,

        /// Required tag; repeat for several.
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one template.
    Get { id: String },

    /// Create a template. Placeholders are written `{name}`.
    Create {
        #[arg(long)]
        name: String,

        #[arg(long)]
        template: String,

        #[arg(long)]
        id: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        category: Option<String>,

        /// Declared placeholder; inferred from the template when omitted.
        #[arg(long = "var")]
        variables: Vec<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Change fields of a template. Its version goes up by one.
    Edit {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        template: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// Fail unless the stored version matches.
        #[arg(long)]
        expected_version: Option<i64>,
    },

    /// Suggest templates for a task description.
    Suggest {
        task: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Render a template from explicit values and project context.
    Resolve {
        id: String,

        /// Placeholder value as `name=value`; repeat for several.
        #[arg(long = "set", value_parser = parse_key_val)]
        values: Vec<(String, String)>,

        /// Added to every context-fill query.
        #[arg(long)]
        task: Option<String>,

        /// Fail on any placeholder without an explicit value.
        #[arg(long)]
        no_auto_fill: bool,
    },

    /// Apply a template to the contents of a file.
    Apply {
        id: String,

        /// File whose contents fill the content placeholders.
        file: PathBuf,

        #[arg(long)]
        no_auto_fill: bool,
    },

    /// Build a one-off prompt around the documents matching a query.
    Generate {
        /// What to do, e.g. `review`.
        task: String,

        /// Query selecting the context documents.
        docs_query: String,
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

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Doc,
    Code,
}

impl From<KindArg> for ItemKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Doc => ItemKind::Document,
            KindArg::Code => ItemKind::CodeEntity,
        }
    }
}

/// Parse a `key=value` pair for `--set` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let engine = Engine::open(cfg)
        .await
        .context("failed to open the index")?;
    let json = cli.json;

    match cli.command {
        Commands::Init => {
            let stats = engine.stats().await?;
            if json {
                emit(&stats)?;
            } else {
                println!("Database initialized at {}", stats.db_path);
                println!("{} prompt templates available.", stats.prompts);
            }
        }
        Commands::Index { force, progress } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let summary = engine
                .reindex_with_progress(force, &cancel, mode.reporter())
                .await?;
            if json {
                emit(&summary)?;
            } else {
                println!(
                    "Indexed {} files: {} added, {} updated, {} removed, {} unchanged, {} failed.",
                    format_number(summary.files_scanned),
                    format_number(summary.added),
                    format_number(summary.updated),
                    format_number(summary.removed),
                    format_number(summary.skipped),
                    format_number(summary.failed)
                );
            }
        }
        Commands::Search {
            query,
            kind,
            doc_type,
            path,
            limit,
        } => {
            let request = SearchRequest {
                kind: kind.map(ItemKind::from),
                doc_type,
                path_prefix: path,
                limit,
            };
            let hits = engine.search_docs(&query, &request)?;
            if json {
                emit(&hits)?;
            } else {
                print_hits(&query, &hits);
            }
        }
        Commands::Reuse {
            functionality,
            service,
            limit,
        } => {
            let candidates = engine.find_code_reuse(&functionality, service.as_deref(), limit)?;
            if json {
                emit(&candidates)?;
            } else {
                print_candidates(&candidates);
            }
        }
        Commands::Arch { limit } => {
            let docs = engine.architecture_info(limit)?;
            if json {
                emit(&docs)?;
            } else {
                print_architecture(&docs);
            }
        }
        Commands::Get { id } => {
            let item = engine.get_item(&id).await?;
            if json {
                emit(&item)?;
            } else {
                print_item(&item);
            }
        }
        Commands::Parse { file } => {
            let items = engine.parse_file(&file).await?;
            if json {
                emit(&items)?;
            } else {
                print_parsed(&items);
            }
        }
        Commands::Stats => {
            let stats = engine.stats().await?;
            if json {
                emit(&stats)?;
            } else {
                print_stats(&stats);
            }
        }
        Commands::Prompt { action } => run_prompt(&engine, action, json).await?,
        Commands::Serve => {
            server::run_server(Arc::new(engine)).await?;
            return Ok(());
        }
    }

    engine.close().await;
    Ok(())
}

async fn run_prompt(engine: &Engine, action: PromptAction, json: bool) -> anyhow::Result<()> {
    match action {
        PromptAction::List { category } => {
            let prompts = engine.list_prompts(category.as_deref()).await?;
            if json {
                emit(&prompts)?;
            } else {
                print_prompt_list(&prompts);
            }
        }
        PromptAction::Search {
            query,
            category,
            tags,
            limit,
        } => {
            let prompts = engine
                .search_prompts(&query, category.as_deref(), &tags, limit)
                .await?;
            if json {
                emit(&prompts)?;
            } else {
                print_prompt_list(&prompts);
            }
        }
        PromptAction::Get { id } => {
            let prompt = engine.get_prompt(&id).await?;
            if json {
                emit(&prompt)?;
            } else {
                print_prompt(&prompt);
            }
        }
        PromptAction::Create {
            name,
            template,
            id,
            description,
            category,
            variables,
            tags,
        } => {
            let prompt = engine
                .create_prompt(NewPrompt {
                    id,
                    name,
                    description,
                    category,
                    template_text: template,
                    variables,
                    tags,
                })
                .await?;
            if json {
                emit(&prompt)?;
            } else {
                println!("Created prompt {} (version {})", prompt.id, prompt.version);
            }
        }
        PromptAction::Edit {
            id,
            name,
            template,
            description,
            category,
            expected_version,
        } => {
            let changes = PromptChanges {
                name,
                description,
                category,
                template_text: template,
                ..PromptChanges::default()
            };
            let prompt = engine.edit_prompt(&id, changes, expected_version).await?;
            if json {
                emit(&prompt)?;
            } else {
                println!("Updated prompt {} (version {})", prompt.id, prompt.version);
            }
        }
        PromptAction::Suggest { task, limit } => {
            let suggestions = engine.suggest_prompts(&task, limit).await?;
            if json {
                emit(&suggestions)?;
            } else {
                print_suggestions(&suggestions);
            }
        }
        PromptAction::Resolve {
            id,
            values,
            task,
            no_auto_fill,
        } => {
            let values: HashMap<String, String> = values.into_iter().collect();
            let resolution = engine
                .resolve_prompt(&id, &values, !no_auto_fill, task.as_deref())
                .await?;
            if json {
                emit(&resolution)?;
            } else {
                print_resolution(&resolution);
            }
        }
        PromptAction::Apply {
            id,
            file,
            no_auto_fill,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let resolution = engine
                .apply_prompt_with_context(&id, &content, !no_auto_fill)
                .await?;
            if json {
                emit(&resolution)?;
            } else {
                print_resolution(&resolution);
            }
        }
        PromptAction::Generate { task, docs_query } => {
            let generated = engine.generate_contextual_prompt(&task, &docs_query)?;
            if json {
                emit(&generated)?;
            } else {
                print_generated(&generated);
            }
        }
    }
    Ok(())
}

// ============ Output ============

fn emit<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_hits(query: &str, hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results for \"{}\".", query);
        return;
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, hit.score, hit.title);
        println!("    id: {}", hit.id);
        match &hit.section {
            Some(section) => println!("    path: {} > {}", hit.path, section),
            None => println!("    path: {}", hit.path),
        }
        println!("    {}", hit.snippet.replace('\n', " "));
        println!();
    }
}

fn print_candidates(candidates: &[ReuseCandidate]) {
    if candidates.is_empty() {
        println!("No reusable code found.");
        return;
    }
    for (i, c) in candidates.iter().enumerate() {
        println!("{}. [{:.2}] {} ({})", i + 1, c.hit.score, c.hit.title, c.code_type);
        println!("    service: {}", c.service);
        println!("    import:  {}", c.import_path);
        println!("    {}", c.reuse_suggestion);
        println!();
    }
}

fn print_architecture(docs: &[ArchitectureDoc]) {
    if docs.is_empty() {
        println!("No architecture documents found.");
        return;
    }
    for (i, doc) in docs.iter().enumerate() {
        println!("{}. {} ({})", i + 1, doc.hit.title, doc.hit.path);
        println!("    keywords: {}", doc.keywords.join(", "));
    }
}

fn print_parsed(items: &[IndexedItem]) {
    println!("{} item{}", items.len(), if items.len() == 1 { "" } else { "s" });
    for item in items {
        let response = ItemResponse::from(item);
        println!("  {:<12} {}", response.kind, response.id);
    }
}

fn print_prompt_list(prompts: &[PromptTemplate]) {
    if prompts.is_empty() {
        println!("No prompt templates.");
        return;
    }
    println!("{:<28} {:<16} {:>3}  NAME", "ID", "CATEGORY", "V");
    for p in prompts {
        println!(
            "{:<28} {:<16} {:>3}  {}",
            p.id,
            p.category.as_str(),
            p.version,
            p.name
        );
    }
}

fn print_prompt(p: &PromptTemplate) {
    println!("--- Prompt ---");
    println!("id:          {}", p.id);
    println!("name:        {}", p.name);
    println!("category:    {}", p.category.as_str());
    println!("version:     {}", p.version);
    println!("variables:   {}", p.variables.join(", "));
    if !p.tags.is_empty() {
        println!("tags:        {}", p.tags.join(", "));
    }
    if !p.description.is_empty() {
        println!("description: {}", p.description);
    }
    println!();
    println!("--- Template ---");
    println!("{}", p.template_text);
}

fn print_suggestions(suggestions: &[PromptSuggestion]) {
    for (i, s) in suggestions.iter().enumerate() {
        println!(
            "{}. {} ({}, used {}x)",
            i + 1,
            s.name,
            s.category.as_str(),
            s.usage_count
        );
        println!("    id: {}", s.id);
        if !s.description.is_empty() {
            println!("    {}", s.description);
        }
    }
}

fn print_resolution(resolution: &Resolution) {
    println!("{}", resolution.text);
    let filled: Vec<String> = resolution
        .sources
        .iter()
        .filter_map(|(name, source)| match source {
            ValueSource::Context { item_id, .. } => Some(format!("{} <- {}", name, item_id)),
            ValueSource::Explicit => None,
        })
        .collect();
    if !filled.is_empty() {
        eprintln!();
        eprintln!("Context used:");
        for line in filled {
            eprintln!("  {}", line);
        }
    }
}

fn print_generated(generated: &GeneratedPrompt) {
    println!("{}", generated.template_text);
    if !generated.sources.is_empty() {
        eprintln!();
        eprintln!("Sources:");
        for s in &generated.sources {
            eprintln!("  {} ({})", s.title, s.path);
        }
    }
}
