//! AQT CLI
//!
//! Developer tools for the extension: URL classification, the element rule
//! catalog, time-limit files and tracker replays.

mod simulate;

use std::fs;
use std::path::Path;

use clap::{Parser, Subcommand};
use serde_json::Value;
use ts_rs::TS;

use aqt_core::catalog::default_rules;
use aqt_core::engine::relevant_rules;
use aqt_core::limits::{add_limit, remove_limit};
use aqt_core::storage::coerce_time_limits;
use aqt_core::{
    get_page_type, merge_with_defaults, BlockSignal, Config, ElementRule, PageType, RuleCategory, TimeLimit,
};

#[derive(Parser)]
#[command(name = "aqt-cli")]
#[command(about = "AQT extension developer tools")]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a URL and list the catalog rules relevant on it
    Classify {
        url: String,
    },

    /// Print the element rule catalog, optionally merged with stored rules
    Rules {
        /// Stored `youtube_elements` JSON to merge over the defaults
        #[arg(short, long)]
        stored: Option<String>,

        /// Only rules applicable on this page type (e.g. "video")
        #[arg(short, long)]
        page: Option<String>,

        /// Only rules in this category (e.g. "Sidebar")
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Replay a tab-activity trace through the time-limit tracker
    Simulate {
        /// JSON array of { "at_minute", "date", "url" } steps
        #[arg(short, long)]
        trace: String,

        /// Time limits JSON file
        #[arg(short, long)]
        limits: Option<String>,

        /// Config JSON file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Edit a time limits JSON file
    Limits {
        #[command(subcommand)]
        action: LimitsAction,
    },

    /// Write TypeScript declarations of the persisted shapes
    ExportTypes {
        #[arg(short, long, default_value = "bindings")]
        out: String,
    },
}

#[derive(Subcommand)]
enum LimitsAction {
    /// Add a limit; a pasted URL is reduced to its host
    Add {
        #[arg(short, long)]
        file: String,

        #[arg(short, long)]
        domain: String,

        #[arg(short, long)]
        minutes: String,
    },

    /// Remove the limit with the given id
    Remove {
        #[arg(short, long)]
        file: String,

        #[arg(long)]
        id: String,
    },

    /// List configured limits
    List {
        #[arg(short, long)]
        file: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Classify { url } => cmd_classify(&url),
        Commands::Rules {
            stored,
            page,
            category,
        } => cmd_rules(stored.as_deref(), page.as_deref(), category.as_deref()),
        Commands::Simulate { trace, limits, config } => cmd_simulate(&trace, limits.as_deref(), config.as_deref()),
        Commands::Limits { action } => match action {
            LimitsAction::Add { file, domain, minutes } => cmd_limits_add(&file, &domain, &minutes),
            LimitsAction::Remove { file, id } => cmd_limits_remove(&file, &id),
            LimitsAction::List { file } => cmd_limits_list(&file),
        },
        Commands::ExportTypes { out } => cmd_export_types(&out),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn read_json(path: &str) -> Result<Value, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid JSON in '{}': {}", path, e))
}

fn parse_page(tag: &str) -> Result<PageType, String> {
    PageType::from_tag(&tag.to_ascii_lowercase()).ok_or_else(|| {
        let known: Vec<&str> = PageType::ALL.iter().map(|p| p.as_str()).collect();
        format!("Unknown page type '{}' (expected one of: {})", tag, known.join(", "))
    })
}

fn parse_category(name: &str) -> Result<RuleCategory, String> {
    let wanted: String = name.chars().filter(|c| !c.is_whitespace()).collect();
    RuleCategory::ORDER
        .into_iter()
        .find(|c| c.label().replace(' ', "").eq_ignore_ascii_case(&wanted))
        .ok_or_else(|| format!("Unknown category '{}'", name))
}

fn print_rule(rule: &ElementRule) {
    let scope = if rule.is_global() {
        "global".to_string()
    } else {
        rule.page_types.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",")
    };
    println!(
        "  [{}] {:<32} {:<24} {}",
        if rule.checked { "x" } else { " " },
        rule.id,
        scope,
        rule.label
    );
}

fn cmd_classify(url: &str) -> Result<(), String> {
    let page = get_page_type(url);
    let rules = default_rules();
    let relevant = relevant_rules(&rules, page);

    match page {
        Some(page) => println!("Page type: {}", page.as_str()),
        None => println!("Page type: unknown (every rule applies)"),
    }
    println!("Relevant rules: {} of {}", relevant.len(), rules.len());
    for rule in relevant {
        print_rule(rule);
    }
    Ok(())
}

fn cmd_rules(stored: Option<&str>, page: Option<&str>, category: Option<&str>) -> Result<(), String> {
    let stored = stored.map(read_json).transpose()?;
    let page = page.map(parse_page).transpose()?;
    let category = category.map(parse_category).transpose()?;

    let merged = merge_with_defaults(&default_rules(), stored.as_ref());
    let visible: Vec<&ElementRule> = match page {
        Some(page) => relevant_rules(&merged, Some(page)),
        None => merged.iter().collect(),
    };

    let active = merged.iter().filter(|r| r.checked).count();
    println!("Rules: {} ({} active)", merged.len(), active);

    for group in RuleCategory::ORDER {
        if category.is_some_and(|c| c != group) {
            continue;
        }
        let rules: Vec<&&ElementRule> = visible.iter().filter(|r| r.category == group).collect();
        if rules.is_empty() {
            continue;
        }
        println!();
        println!("{}:", group.label());
        for rule in rules {
            print_rule(rule);
        }
    }
    Ok(())
}

fn cmd_simulate(trace: &str, limits: Option<&str>, config: Option<&str>) -> Result<(), String> {
    let steps = simulate::load_trace(trace)?;
    let limits = match limits {
        Some(path) => read_json(path)?,
        None => Value::Array(Vec::new()),
    };
    let config = match config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
            Config::from_json(&text).map_err(|e| format!("Invalid config '{}': {}", path, e))?
        }
        None => Config::default(),
    };

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))?;
    let (reports, usage) = runtime.block_on(simulate::replay(&steps, limits, config.tracker))?;

    println!("Replayed {} steps from '{}'", reports.len(), trace);
    for report in &reports {
        println!(
            "  {:>8.2} {}  {:<40} {}",
            report.step.at_minute,
            report.step.date,
            report.step.url.as_deref().unwrap_or("-"),
            simulate::describe(&report.outcome)
        );
    }

    println!();
    println!("Final usage:");
    if usage.is_empty() {
        println!("  (none)");
    }
    for (domain, minutes) in &usage {
        println!("  {:<32} {:.2} min", domain, minutes);
    }
    Ok(())
}

fn load_limits(path: &str) -> Result<Vec<TimeLimit>, String> {
    if !Path::new(path).exists() {
        return Ok(Vec::new());
    }
    Ok(coerce_time_limits(Some(&read_json(path)?)))
}

fn save_limits(path: &str, limits: &[TimeLimit]) -> Result<(), String> {
    let json = serde_json::to_string_pretty(limits).map_err(|e| format!("Failed to serialize limits: {}", e))?;
    fs::write(path, json).map_err(|e| format!("Failed to write '{}': {}", path, e))
}

fn cmd_limits_add(file: &str, domain: &str, minutes: &str) -> Result<(), String> {
    let mut limits = load_limits(file)?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    let added = add_limit(&mut limits, domain, minutes, now_ms)
        .map_err(|e| e.to_string())?
        .clone();
    save_limits(file, &limits)?;

    println!("Added {} ({} min/day) as id {}", added.domain, added.minutes, added.id);
    Ok(())
}

fn cmd_limits_remove(file: &str, id: &str) -> Result<(), String> {
    let mut limits = load_limits(file)?;
    let removed = remove_limit(&mut limits, id).map_err(|e| e.to_string())?;
    save_limits(file, &limits)?;

    println!("Removed {} ({} min/day)", removed.domain, removed.minutes);
    Ok(())
}

fn cmd_limits_list(file: &str) -> Result<(), String> {
    let limits = load_limits(file)?;
    println!("Time limits: {}", limits.len());
    for limit in &limits {
        println!("  {:<16} {:<32} {} min/day", limit.id, limit.domain, limit.minutes);
    }
    Ok(())
}

fn cmd_export_types(out: &str) -> Result<(), String> {
    fs::create_dir_all(out).map_err(|e| format!("Failed to create '{}': {}", out, e))?;
    let cfg = ts_rs::Config::new().with_out_dir(out);

    let export = |name: &str, result: Result<(), ts_rs::ExportError>| {
        result.map_err(|e| format!("Failed to export {}: {}", name, e))
    };
    export("ElementRule", ElementRule::export_all(&cfg))?;
    export("TimeLimit", TimeLimit::export_all(&cfg))?;
    export("PageType", PageType::export_all(&cfg))?;
    export("RuleCategory", RuleCategory::export_all(&cfg))?;
    export("BlockSignal", BlockSignal::export_all(&cfg))?;

    println!("Exported TypeScript declarations to '{}'", out);
    Ok(())
}
