//! ctxbudget CLI
//!
//! Inspect and maintain the context budget stored under `.ctxbudget/`.
//! Every command loads the budget, applies one operation, and saves.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ctxbudget::budget::{
    age_items, compact_budget, repair_budget, saturation_report, truncate_with_ellipsis,
    validate_budget, AddOptions, AgingThresholds, ContentType, ContextBudget, ContextItem, Tier,
    DEFAULT_PRIORITY,
};
use ctxbudget::{BudgetStore, Config, JsonStateStore, PhaseState, ToolCallTracker};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// ctxbudget - track and compact an agent's working context
#[derive(Parser, Debug)]
#[command(name = "ctxbudget")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project root holding the .ctxbudget directory
    #[arg(short = 'C', long, default_value = ".", global = true)]
    cwd: PathBuf,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Budget(BudgetCommand),
    /// Show the current workflow phase, or move to a new one
    Phase { name: Option<String> },
    /// Record a tool call
    Track {
        tool: String,
        #[arg(long)]
        summary: Option<String>,
    },
    /// Write a default config file for this project
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BudgetCommand {
    /// Show saturation, tier usage and recommendations
    Status,
    /// List items, hottest tier first
    List {
        #[arg(long, value_parser = parse_tier)]
        tier: Option<Tier>,
    },
    /// Add content to the budget (use `-` to read stdin)
    Add {
        content: String,
        #[arg(long = "type", value_parser = parse_content_type, default_value = "metadata")]
        content_type: ContentType,
        #[arg(long, value_parser = parse_tier, default_value = "hot")]
        tier: Tier,
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: u8,
    },
    /// Record an access to an item
    Access { id: String },
    /// Remove an item
    Remove { id: String },
    /// Move an item to another tier
    Move {
        id: String,
        #[arg(value_parser = parse_tier)]
        tier: Tier,
    },
    /// Demote items that have not been accessed recently
    Age {
        /// Ignore configured thresholds and age every eligible item
        #[arg(long)]
        now_all: bool,
    },
    /// Summarize and drop content until under the target saturation
    Compact {
        #[arg(long)]
        target: Option<f64>,
    },
    /// Check token accounting; exits with status 1 when inconsistent
    Validate,
    /// Re-estimate drifted items and fix token accounting
    Repair,
    /// Reset the budget to an empty state
    Clear,
}

fn parse_tier(value: &str) -> Result<Tier, String> {
    Tier::parse(value).ok_or_else(|| format!("unknown tier '{}' (hot, warm, cold, frozen)", value))
}

fn parse_content_type(value: &str) -> Result<ContentType, String> {
    ContentType::parse(value).ok_or_else(|| {
        let names: Vec<_> = ContentType::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown type '{}' ({})", value, names.join(", "))
    })
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = std::fs::canonicalize(&cli.cwd)
        .with_context(|| format!("project root {} not found", cli.cwd.display()))?;
    debug!("Project root: {}", root.display());

    match cli.command {
        Command::InitConfig { force } => init_config(&root, force),
        Command::Phase { name } => run_phase(&root, name, cli.json),
        Command::Track { tool, summary } => run_track(&root, tool, summary, cli.json),
        Command::Budget(command) => run_budget_command(&root, command, cli.json),
    }
}

fn run_budget_command(root: &Path, command: BudgetCommand, json: bool) -> anyhow::Result<ExitCode> {
    let config = Config::load(root)?;
    let store = BudgetStore::new(root);
    let mut budget = store.load();
    budget.max_tokens = config.ceiling();

    match command {
        BudgetCommand::Status => {
            let report = saturation_report(&budget, &config.report_config());
            if json {
                print_json(&report)?;
            } else {
                println!("{}", report.to_log_string());
                for (tier, usage) in &report.tier_breakdown {
                    println!("  {:<7} {:>4} items {:>8} tokens", tier, usage.items, usage.tokens);
                }
                if let Some(savings) = report.potential_savings {
                    println!("  summarizing warm items could save ~{} tokens", savings);
                }
                for rec in &report.recommendations {
                    println!("- {}", rec);
                }
            }
            let validation = validate_budget(&budget);
            if !validation.valid {
                warn!(
                    "Token accounting is off by {}; run `ctxbudget repair`",
                    validation.discrepancy
                );
            }
            return Ok(ExitCode::SUCCESS);
        }
        BudgetCommand::List { tier } => {
            let items: Vec<&ContextItem> = budget
                .items()
                .filter(|item| tier.map_or(true, |t| item.tier == t))
                .collect();
            if json {
                print_json(&items)?;
            } else if items.is_empty() {
                println!("No items");
            } else {
                for item in items {
                    print_item(item);
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
        BudgetCommand::Add {
            content,
            content_type,
            tier,
            priority,
        } => {
            let content = if content == "-" { read_stdin()? } else { content };
            let options = AddOptions::default().with_tier(tier).with_priority(priority);
            let item = budget.add_content(content, content_type, options).clone();
            if json {
                print_json(&item)?;
            } else {
                println!("{} ({} tokens, {})", item.id, item.tokens, item.tier);
            }
        }
        BudgetCommand::Access { id } => match budget.access_item(&id) {
            Some(item) => {
                if json {
                    print_json(item)?;
                } else {
                    println!("{} accessed {} times", item.id, item.access_count);
                }
            }
            None => bail!("item not found: {}", id),
        },
        BudgetCommand::Remove { id } => {
            if !budget.remove_item(&id) {
                bail!("item not found: {}", id);
            }
            if json {
                print_json(&serde_json::json!({ "removed": id }))?;
            } else {
                println!("Removed {}", id);
            }
        }
        BudgetCommand::Move { id, tier } => {
            if !budget.move_to_tier(&id, tier) {
                bail!("item not found: {}", id);
            }
            if json {
                print_json(&serde_json::json!({ "moved": id, "tier": tier }))?;
            } else {
                println!("Moved {} to {}", id, tier);
            }
        }
        BudgetCommand::Age { now_all } => {
            let thresholds = if now_all {
                AgingThresholds::immediate()
            } else {
                config.aging_thresholds()
            };
            let outcome = age_items(&mut budget, &thresholds);
            if json {
                print_json(&outcome)?;
            } else {
                println!("Aged {} item(s)", outcome.aged);
            }
        }
        BudgetCommand::Compact { target } => {
            let mut options = config.compaction_options();
            if let Some(target) = target {
                options = options.with_target(target);
            }
            let result = compact_budget(&mut budget, &options);
            if json {
                print_json(&result)?;
            } else {
                println!(
                    "{}: saved {} tokens ({} summarized, {} dropped), now {} tokens",
                    if result.success { "Compacted" } else { "Target not reached" },
                    result.tokens_saved,
                    result.items_compacted,
                    result.items_dropped,
                    result.tokens_after
                );
            }
        }
        BudgetCommand::Validate => {
            let validation = validate_budget(&budget);
            if json {
                print_json(&validation)?;
            } else if validation.valid {
                println!("OK: {} tokens", validation.expected_tokens);
            } else {
                println!(
                    "Inconsistent: stored {} tokens, items sum to {} (discrepancy {})",
                    budget.used_tokens, validation.expected_tokens, validation.discrepancy
                );
            }
            return Ok(if validation.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        BudgetCommand::Repair => {
            let report = repair_budget(&mut budget);
            if json {
                print_json(&report)?;
            } else if report.changed() {
                println!(
                    "Repaired: {} -> {} tokens ({} re-estimated, {} tier fields fixed)",
                    report.previous_used_tokens,
                    report.used_tokens,
                    report.items_reestimated,
                    report.tiers_corrected
                );
            } else {
                println!("Nothing to repair");
            }
        }
        BudgetCommand::Clear => {
            let fresh = store.clear();
            if json {
                print_json(&fresh)?;
            } else {
                println!("Cleared {}", store.path().display());
            }
            return Ok(ExitCode::SUCCESS);
        }
    }

    save_budget(&store, &budget)?;
    Ok(ExitCode::SUCCESS)
}

fn save_budget(store: &BudgetStore, budget: &ContextBudget) -> anyhow::Result<()> {
    store
        .try_save(budget)
        .with_context(|| format!("failed to save {}", store.path().display()))
}

fn run_phase(root: &Path, name: Option<String>, json: bool) -> anyhow::Result<ExitCode> {
    let store: JsonStateStore<PhaseState> = JsonStateStore::new(root);
    let mut state = store.load();

    if let Some(name) = name {
        state.advance(name);
        store
            .try_save(&state)
            .with_context(|| format!("failed to save {}", store.path().display()))?;
    }

    if json {
        print_json(&state)?;
    } else {
        println!("Phase: {}", state.current_phase.as_deref().unwrap_or("(none)"));
        for t in state.transitions.iter().take(5) {
            println!(
                "  {} {} -> {}",
                t.at.format("%Y-%m-%d %H:%M:%S"),
                t.from.as_deref().unwrap_or("(none)"),
                t.to
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_track(
    root: &Path,
    tool: String,
    summary: Option<String>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let store: JsonStateStore<ToolCallTracker> = JsonStateStore::new(root);
    let mut tracker = store.load();
    let call = tracker.record(tool, summary).clone();
    store
        .try_save(&tracker)
        .with_context(|| format!("failed to save {}", store.path().display()))?;

    if json {
        print_json(&call)?;
    } else {
        println!(
            "{} ({} call(s) to {} on record)",
            call.id,
            tracker.count_for(&call.tool),
            call.tool
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn init_config(root: &Path, force: bool) -> anyhow::Result<ExitCode> {
    let path = Config::project_path(root);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let text = toml::to_string_pretty(&Config::default())?;
    std::fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn print_item(item: &ContextItem) {
    let preview = truncate_with_ellipsis(&item.content.replace('\n', " "), 60);
    println!(
        "{}  {:<6} {:<9} {:>6} tok  p{:<3} {}",
        item.id, item.tier, item.content_type, item.tokens, item.priority, preview
    );
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_stdin() -> anyhow::Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read content from stdin")?;
    Ok(buf)
}
