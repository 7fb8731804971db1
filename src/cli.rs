//! CLI command definitions and handlers (§6).
//!
//! Every subcommand is a thin wrapper over [`crate::core::MemoryCore`] or
//! [`crate::config::Config`] — no command does anything the Core itself
//! doesn't already expose. `--json` switches output from a human table to
//! a single JSON document on stdout; both forms go to stdout, errors go to
//! stderr.

use std::io::{self, Write as _};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use crate::config::Config;
use crate::core::{AddOptions, MemoryCore, SearchOptions};
use crate::extractor::ConversationMessage;
use crate::filter::{ColumnField, Filter, FilterField, FilterOp};
use crate::memory::{Category, MemoryType};
use crate::storage::{SortField, SortOrder};
use crate::types::{AgentId, MemoryId, Owner, RunId, Scope, UserId};

#[derive(Parser)]
#[command(name = "agentmem")]
#[command(about = "Long-term memory store for conversational agents")]
#[command(version)]
pub struct Cli {
    /// Path to the database file.
    #[arg(long, global = true, default_value = "agentmem.db")]
    pub db: PathBuf,

    /// Path to a JSON configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Scope identity to a user.
    #[arg(long, global = true)]
    pub user_id: Option<String>,

    /// Scope identity to an agent.
    #[arg(long, global = true)]
    pub agent_id: Option<String>,

    /// Scope identity to a run.
    #[arg(long, global = true)]
    pub run_id: Option<String>,

    /// Emit machine-readable JSON instead of a human table.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Adds a memory.
    Add {
        /// Memory content.
        content: String,
        /// Run the Fact Extractor + Reconciler instead of inserting verbatim.
        #[arg(long)]
        infer: bool,
        /// Arbitrary JSON metadata.
        #[arg(long)]
        metadata: Option<String>,
        /// Visibility scope (`private`, `agent_group`, `user_group`, `public`).
        #[arg(long)]
        scope: Option<String>,
        /// Free-form category tag.
        #[arg(long)]
        category: Option<String>,
        /// Free-form memory-type tag.
        #[arg(long = "type")]
        memory_type: Option<String>,
    },
    /// Searches memories by semantic similarity.
    Search {
        /// Query text.
        query: String,
        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Minimum score threshold.
        #[arg(long)]
        threshold: Option<f32>,
        /// Rerank candidates before truncating to `limit`.
        #[arg(long)]
        rerank: bool,
    },
    /// Retrieves a single memory by id.
    Get {
        /// Memory id.
        id: u64,
    },
    /// Updates a memory's content and/or metadata.
    Update {
        /// Memory id.
        id: u64,
        /// New content.
        #[arg(long)]
        content: Option<String>,
        /// New metadata (replaces existing metadata entirely).
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Deletes a single memory.
    Delete {
        /// Memory id.
        id: u64,
    },
    /// Lists memories for the given identity.
    List {
        /// Maximum number of results.
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Result offset.
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Sort field (`id`, `created_at`, `updated_at`).
        #[arg(long, default_value = "id")]
        sort_by: String,
        /// Sort order (`asc`, `desc`).
        #[arg(long, default_value = "asc")]
        order: String,
    },
    /// Deletes every memory owned by the given identity.
    ///
    /// Requires at least one of `--user-id`/`--agent-id`/`--run-id` and a
    /// `--yes` confirmation; exits 2 if the caller declines.
    DeleteAll {
        /// Skip the interactive confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Prints aggregate statistics, optionally scoped to an identity.
    Stats,
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Administrative operations on the database file.
    Manage {
        #[command(subcommand)]
        action: ManageAction,
    },
    /// Runs a REPL over add/search/get/list until `exit` or EOF.
    Interactive,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Prints the effective configuration.
    Show,
    /// Validates the configuration without opening the database.
    Validate,
    /// Validates configuration, then opens and immediately closes the
    /// database to confirm storage and providers are reachable.
    Test,
}

#[derive(Subcommand)]
pub enum ManageAction {
    /// Copies the database file (and its HNSW sidecar directory) to `dest`.
    Backup {
        /// Destination path.
        dest: PathBuf,
    },
    /// Restores the database file (and HNSW sidecar directory) from `src`.
    ///
    /// Refuses to overwrite an existing database unless `--force` is given.
    Restore {
        /// Source path previously produced by `manage backup`.
        src: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Deletes memories older than `--older-than-days`, scoped to the
    /// identity flags.
    Cleanup {
        #[arg(long, default_value_t = 90)]
        older_than_days: u64,
    },
    /// Re-validates the on-disk schema by opening and closing the database.
    Migrate,
}

/// Exit code conventions (§6): 0 success, 1 error, 2 confirmation refused.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_CONFIRMATION_REFUSED: i32 = 2;

fn owner_from_cli(cli: &Cli) -> Owner {
    Owner {
        user_id: cli.user_id.clone().map(UserId::new),
        agent_id: cli.agent_id.clone().map(AgentId::new),
        run_id: cli.run_id.clone().map(RunId::new),
        actor_id: None,
    }
}

fn parse_scope(s: &str) -> crate::error::Result<Scope> {
    match s {
        "private" => Ok(Scope::Private),
        "agent_group" => Ok(Scope::AgentGroup),
        "user_group" => Ok(Scope::UserGroup),
        "public" => Ok(Scope::Public),
        other => Err(crate::error::ValidationError::invalid_field("scope", format!("unknown scope '{other}'")).into()),
    }
}

fn parse_sort_field(s: &str) -> SortField {
    match s {
        "created_at" => SortField::CreatedAt,
        "updated_at" => SortField::UpdatedAt,
        _ => SortField::Id,
    }
}

fn parse_sort_order(s: &str) -> SortOrder {
    match s {
        "desc" => SortOrder::Desc,
        _ => SortOrder::Asc,
    }
}

fn load_config(cli: &Cli) -> crate::error::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.vector_store.path = cli.db.clone();
    Ok(config)
}

fn open_core(cli: &Cli) -> crate::error::Result<MemoryCore> {
    let config = load_config(cli)?;
    let handles = crate::registry::build_handles(&config)?;
    MemoryCore::open(&cli.db, config, handles)
}

fn print_json(value: impl serde::Serialize) {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    let _ = serde_json::to_writer_pretty(&mut lock, &value);
    let _ = writeln!(lock);
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N]: ");
    let _ = io::stdout().flush();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Runs the parsed CLI to completion, returning the process exit code.
pub fn run(cli: Cli) -> i32 {
    match run_inner(&cli) {
        Ok(code) => code,
        Err(err) => {
            if cli.json {
                print_json(json!({"error": err.to_string()}));
            } else {
                eprintln!("error: {err}");
            }
            EXIT_ERROR
        }
    }
}

fn run_inner(cli: &Cli) -> crate::error::Result<i32> {
    match &cli.command {
        Command::Add {
            content,
            infer,
            metadata,
            scope,
            category,
            memory_type,
        } => cmd_add(cli, content, *infer, metadata.as_deref(), scope.as_deref(), category.as_deref(), memory_type.as_deref()),
        Command::Search { query, limit, threshold, rerank } => cmd_search(cli, query, *limit, *threshold, *rerank),
        Command::Get { id } => cmd_get(cli, *id),
        Command::Update { id, content, metadata } => cmd_update(cli, *id, content.clone(), metadata.as_deref()),
        Command::Delete { id } => cmd_delete(cli, *id),
        Command::List { limit, offset, sort_by, order } => cmd_list(cli, *limit, *offset, sort_by, order),
        Command::DeleteAll { yes } => cmd_delete_all(cli, *yes),
        Command::Stats => cmd_stats(cli),
        Command::Config { action } => cmd_config(cli, action),
        Command::Manage { action } => cmd_manage(cli, action),
        Command::Interactive => cmd_interactive(cli),
    }
}

fn cmd_add(
    cli: &Cli,
    content: &str,
    infer: bool,
    metadata: Option<&str>,
    scope: Option<&str>,
    category: Option<&str>,
    memory_type: Option<&str>,
) -> crate::error::Result<i32> {
    let core = open_core(cli)?;
    let owner = owner_from_cli(cli);
    let metadata = metadata
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| crate::error::ValidationError::invalid_field("metadata", e.to_string()))?;
    let scope = scope.map(parse_scope).transpose()?;

    let options = AddOptions {
        metadata,
        scope,
        memory_type: memory_type.map(MemoryType::new),
        category: category.map(Category::new),
        extract_options: Default::default(),
    };
    let messages = vec![ConversationMessage::new("user", content)];
    let events = core.add(&messages, &owner, infer, options)?;
    core.close()?;

    if cli.json {
        let rendered: Vec<_> = events
            .iter()
            .map(|e| json!({"id": e.id.as_u64(), "event": e.event, "memory_text": e.memory_text}))
            .collect();
        print_json(rendered);
    } else {
        for event in &events {
            println!("{} {} \"{}\"", event.event, event.id.as_u64(), event.memory_text);
        }
    }
    Ok(EXIT_SUCCESS)
}

fn cmd_search(cli: &Cli, query: &str, limit: usize, threshold: Option<f32>, rerank: bool) -> crate::error::Result<i32> {
    let core = open_core(cli)?;
    let owner = owner_from_cli(cli);
    let records = core.search(
        query,
        &owner,
        SearchOptions {
            filters: None,
            limit: Some(limit),
            threshold,
            rerank,
        },
    )?;
    core.close()?;
    render_records(cli, &records);
    Ok(EXIT_SUCCESS)
}

fn cmd_get(cli: &Cli, id: u64) -> crate::error::Result<i32> {
    let core = open_core(cli)?;
    let owner = owner_from_cli(cli);
    let record = core.get(MemoryId::from_raw(id), &owner)?;
    core.close()?;

    match record {
        Some(record) => {
            render_records(cli, &[record]);
            Ok(EXIT_SUCCESS)
        }
        None => {
            if cli.json {
                print_json(json!({"error": "not found"}));
            } else {
                eprintln!("not found: {id}");
            }
            Ok(EXIT_ERROR)
        }
    }
}

fn cmd_update(cli: &Cli, id: u64, content: Option<String>, metadata: Option<&str>) -> crate::error::Result<i32> {
    let core = open_core(cli)?;
    let owner = owner_from_cli(cli);
    let metadata = metadata
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| crate::error::ValidationError::invalid_field("metadata", e.to_string()))?;
    let updated = core.update(MemoryId::from_raw(id), &owner, content, metadata)?;
    core.close()?;

    if cli.json {
        print_json(json!({"updated": updated}));
    } else {
        println!("{}", if updated { "updated" } else { "not found" });
    }
    Ok(if updated { EXIT_SUCCESS } else { EXIT_ERROR })
}

fn cmd_delete(cli: &Cli, id: u64) -> crate::error::Result<i32> {
    let core = open_core(cli)?;
    let owner = owner_from_cli(cli);
    let deleted = core.delete(MemoryId::from_raw(id), &owner)?;
    core.close()?;

    if cli.json {
        print_json(json!({"deleted": deleted}));
    } else {
        println!("{}", if deleted { "deleted" } else { "not found" });
    }
    Ok(if deleted { EXIT_SUCCESS } else { EXIT_ERROR })
}

fn cmd_list(cli: &Cli, limit: usize, offset: usize, sort_by: &str, order: &str) -> crate::error::Result<i32> {
    let core = open_core(cli)?;
    let owner = owner_from_cli(cli);
    let records = core.get_all(
        &owner,
        None,
        limit,
        offset,
        parse_sort_field(sort_by),
        parse_sort_order(order),
    )?;
    core.close()?;
    render_records(cli, &records);
    Ok(EXIT_SUCCESS)
}

fn cmd_delete_all(cli: &Cli, yes: bool) -> crate::error::Result<i32> {
    let owner = owner_from_cli(cli);
    if owner.is_empty() {
        return Err(crate::error::ValidationError::required_field(
            "at least one of --user-id/--agent-id/--run-id is required for delete-all",
        )
        .into());
    }

    if !yes && !confirm("Delete all memories for this identity?") {
        return Ok(EXIT_CONFIRMATION_REFUSED);
    }

    let core = open_core(cli)?;
    let count = core.delete_all(&owner)?;
    core.close()?;

    if cli.json {
        print_json(json!({"deleted": count}));
    } else {
        println!("deleted {count} memories");
    }
    Ok(EXIT_SUCCESS)
}

fn cmd_stats(cli: &Cli) -> crate::error::Result<i32> {
    let core = open_core(cli)?;
    let owner = owner_from_cli(cli);
    let scope = if owner.is_empty() { None } else { Some(&owner) };
    let stats = core.get_statistics(scope)?;
    core.close()?;

    if cli.json {
        print_json(json!({
            "total_count": stats.total_count,
            "by_memory_type": stats.by_memory_type,
        }));
    } else {
        println!("total memories: {}", stats.total_count);
        for (memory_type, count) in &stats.by_memory_type {
            println!("  {memory_type}: {count}");
        }
    }
    Ok(EXIT_SUCCESS)
}

fn cmd_config(cli: &Cli, action: &ConfigAction) -> crate::error::Result<i32> {
    match action {
        ConfigAction::Show => {
            let config = load_config(cli)?;
            if cli.json {
                print_json(&config);
            } else {
                println!("{}", serde_json::to_string_pretty(&config).unwrap_or_default());
            }
            Ok(EXIT_SUCCESS)
        }
        ConfigAction::Validate => {
            let config = load_config(cli)?;
            config.validate()?;
            if cli.json {
                print_json(json!({"valid": true}));
            } else {
                println!("configuration is valid");
            }
            Ok(EXIT_SUCCESS)
        }
        ConfigAction::Test => {
            let core = open_core(cli)?;
            core.close()?;
            if cli.json {
                print_json(json!({"valid": true, "opened": true}));
            } else {
                println!("configuration valid, database and providers reachable");
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

fn cmd_manage(cli: &Cli, action: &ManageAction) -> crate::error::Result<i32> {
    match action {
        ManageAction::Backup { dest } => {
            std::fs::copy(&cli.db, dest)?;
            let hnsw_src = hnsw_sidecar(&cli.db);
            if hnsw_src.exists() {
                copy_dir_all(&hnsw_src, &hnsw_sidecar(dest))?;
            }
            if cli.json {
                print_json(json!({"backed_up_to": dest}));
            } else {
                println!("backed up to {}", dest.display());
            }
            Ok(EXIT_SUCCESS)
        }
        ManageAction::Restore { src, force } => {
            if cli.db.exists() && !force {
                return Err(crate::error::ValidationError::invalid_field(
                    "dest",
                    "database already exists, pass --force to overwrite",
                )
                .into());
            }
            std::fs::copy(src, &cli.db)?;
            let hnsw_src = hnsw_sidecar(src);
            if hnsw_src.exists() {
                copy_dir_all(&hnsw_src, &hnsw_sidecar(&cli.db))?;
            }
            if cli.json {
                print_json(json!({"restored_from": src}));
            } else {
                println!("restored from {}", src.display());
            }
            Ok(EXIT_SUCCESS)
        }
        ManageAction::Cleanup { older_than_days } => {
            let core = open_core(cli)?;
            let owner = owner_from_cli(cli);
            let cutoff = crate::types::Timestamp::now().as_millis() - (*older_than_days as i64) * 86_400_000;
            let age_filter = Filter::Leaf {
                field: FilterField::Column(ColumnField::CreatedAt),
                op: FilterOp::Lt(cutoff.into()),
            };
            let stale = core.get_all(&owner, Some(&age_filter), usize::MAX, 0, SortField::Id, SortOrder::Asc)?;
            let mut deleted = 0u64;
            for record in &stale {
                if core.delete(record.id, &owner)? {
                    deleted += 1;
                }
            }
            core.close()?;
            if cli.json {
                print_json(json!({"deleted": deleted}));
            } else {
                println!("cleaned up {deleted} memories older than {older_than_days} days");
            }
            Ok(EXIT_SUCCESS)
        }
        ManageAction::Migrate => {
            let core = open_core(cli)?;
            core.close()?;
            if cli.json {
                print_json(json!({"migrated": true}));
            } else {
                println!("schema is current");
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

fn hnsw_sidecar(db_path: &std::path::Path) -> PathBuf {
    let mut hnsw_path = db_path.as_os_str().to_owned();
    hnsw_path.push(".hnsw");
    PathBuf::from(hnsw_path)
}

fn copy_dir_all(src: &std::path::Path, dst: &std::path::Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}

fn cmd_interactive(cli: &Cli) -> crate::error::Result<i32> {
    let core = open_core(cli)?;
    let owner = owner_from_cli(cli);

    println!("agentmem interactive shell. Commands: add <text>, search <query>, get <id>, list, exit");
    let stdin = io::stdin();
    loop {
        print!("agentmem> ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let result = match cmd {
            "add" => core
                .add(
                    &[ConversationMessage::new("user", rest)],
                    &owner,
                    false,
                    AddOptions::default(),
                )
                .map(|events| render_records_owned(&[], Some(&events))),
            "search" => core
                .search(rest, &owner, SearchOptions { limit: Some(10), ..Default::default() })
                .map(|records| render_records_owned(&records, None)),
            "list" => core
                .get_all(&owner, None, 50, 0, SortField::Id, SortOrder::Asc)
                .map(|records| render_records_owned(&records, None)),
            "get" => {
                let parsed = rest.trim().parse::<u64>();
                match parsed {
                    Ok(id) => core.get(MemoryId::from_raw(id), &owner).map(|record| match record {
                        Some(record) => render_records_owned(std::slice::from_ref(&record), None),
                        None => println!("not found"),
                    }),
                    Err(_) => {
                        eprintln!("usage: get <id>");
                        continue;
                    }
                }
            }
            other => {
                eprintln!("unknown command: {other}");
                continue;
            }
        };

        if let Err(err) = result {
            eprintln!("error: {err}");
        }
    }

    core.close()
        .map(|_| EXIT_SUCCESS)
}

fn render_records_owned(records: &[crate::memory::MemoryRecord], events: Option<&[crate::core::AddEvent]>) {
    if let Some(events) = events {
        for event in events {
            println!("{} {}", event.event, event.id.as_u64());
        }
        return;
    }
    for record in records {
        println!("{} {}", record.id.as_u64(), record.content);
    }
}

fn render_records(cli: &Cli, records: &[crate::memory::MemoryRecord]) {
    if cli.json {
        let rendered: Vec<_> = records
            .iter()
            .map(|r| {
                json!({
                    "id": r.id.as_u64(),
                    "content": r.content,
                    "scope": r.scope.to_string(),
                    "category": r.category.as_ref().map(|c| c.as_str()),
                    "memory_type": r.memory_type.as_ref().map(|t| t.as_str()),
                    "metadata": r.metadata,
                    "created_at": r.created_at.as_millis(),
                    "updated_at": r.updated_at.as_millis(),
                })
            })
            .collect();
        print_json(rendered);
    } else {
        for record in records {
            println!("{}\t{}", record.id.as_u64(), record.content);
        }
    }
}
