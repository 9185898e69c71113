// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Stampvault: AI Stamp Scanner & Collection Appraiser
//!
//! Command line front end: scan photos, browse the archive, manage appraisals
//! and talk to the advisor.

use chrono::Local;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use stampvault::collection::{browse, portfolio_stats, with_status, CollectionQuery, SortKey, SortOrder};
use stampvault::config::AppConfig;
use stampvault::context::AppContext;
use stampvault::model::{ExpertStatus, KeyStatus, Stamp};
use stampvault::scanner::{ScanItem, ScanStatus};
use stampvault::{Result, StampvaultError};

/// Stampvault CLI - AI Stamp Scanner & Collection Appraiser
#[derive(Parser, Debug)]
#[command(name = "stampvault")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "AI-powered postage stamp scanner and collection manager", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for results
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Identify stamps from photos and add them to the archive
    Scan {
        /// Image files to analyze, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Hints for the model (country, catalog number, known details)
        #[arg(long)]
        hints: Option<String>,

        /// Album for the new records (default: scanner.default_album)
        #[arg(short, long)]
        album: Option<String>,

        /// Analyze only, do not save anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Browse and maintain the archive
    Collection {
        #[command(subcommand)]
        action: CollectionCommands,
    },

    /// Album management
    Album {
        #[command(subcommand)]
        action: AlbumCommands,
    },

    /// Expert appraisal workflow
    Appraisal {
        #[command(subcommand)]
        action: AppraisalCommands,
    },

    /// Ask the advisor about your collection (interactive without a question)
    Advise {
        /// Single question to ask
        question: Option<String>,
    },

    /// Current headlines from the stamp market
    News,

    /// Show API key, archive and configuration status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CollectionCommands {
    /// List stamps
    List {
        /// Case-insensitive search in name, origin and description
        #[arg(short, long, default_value = "")]
        search: String,

        /// Only this album ("all" for every album)
        #[arg(short, long)]
        album: Option<String>,

        /// Sort key: name, value, year, origin, date
        #[arg(long, default_value = "date_added")]
        sort: SortKey,

        /// Sort order: asc or desc
        #[arg(long, default_value = "desc")]
        order: SortOrder,
    },

    /// Show one stamp in detail
    Show {
        id: String,
    },

    /// Delete a stamp from the archive
    Remove {
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Export the archive to a dated JSON file
    Export {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Show portfolio statistics
    Stats,
}

#[derive(Subcommand, Debug)]
enum AlbumCommands {
    /// List albums with their stamp counts
    List,

    /// Create an album
    Add {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum AppraisalCommands {
    /// List pending and completed appraisals
    List,

    /// Request an expert review for a stamp
    Request {
        id: String,
    },

    /// Record the expert's verdict
    Approve {
        id: String,

        /// Expert valuation (defaults to the model estimate)
        #[arg(long)]
        value: Option<String>,

        /// Expert note
        #[arg(long)]
        note: Option<String>,
    },

    /// Reject or withdraw a review
    Reject {
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !cli.quiet {
        info!("Stampvault v{}", env!("CARGO_PKG_VERSION"));
    }

    let config = AppConfig::load(&cli.config)?;
    let json = cli.format == "json";

    match cli.command {
        Some(Commands::Scan { files, hints, album, dry_run }) => {
            run_scan(open_context(config)?, files, hints, album, dry_run, json, cli.quiet).await
        }
        Some(Commands::Collection { action }) => run_collection_command(open_context(config)?, action, json),
        Some(Commands::Album { action }) => run_album_command(open_context(config)?, action, json),
        Some(Commands::Appraisal { action }) => run_appraisal_command(open_context(config)?, action, json),
        Some(Commands::Advise { question }) => run_advise(open_context(config)?, question).await,
        Some(Commands::News) => run_news(open_context(config)?, json).await,
        Some(Commands::Status) => run_status(open_context(config)?).await,
        Some(Commands::Config { action }) => run_config_command(config, action, &cli.config),
        None => run_collection_command(open_context(config)?, CollectionCommands::Stats, json),
    }
}

fn open_context(config: AppConfig) -> Result<AppContext> {
    config.validate()?;
    AppContext::open(config)
}

/// Scan photos one after another and save the results
async fn run_scan(
    mut ctx: AppContext,
    files: Vec<PathBuf>,
    hints: Option<String>,
    album: Option<String>,
    dry_run: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    if !ctx.gemini.has_key() {
        warn!("No API key set; export API_KEY before scanning");
    }
    if dry_run {
        warn!("DRY RUN MODE - results will not be saved");
    }

    let mut queue = ctx.scan_queue();
    if let Some(hints) = hints {
        queue.set_hints(hints);
    }
    if !quiet && !json {
        queue.set_observer(progress_printer());
    }

    let ingest = queue.ingest(&files).await;
    for rejected in &ingest.rejected {
        eprintln!("Skipped {}: {}", rejected.path().display(), rejected);
    }
    if queue.is_empty() {
        return Err(StampvaultError::Config("No readable images to scan".to_string()));
    }

    // Ctrl+C stops the batch after the current image
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, finishing current image...");
            let _ = cancel_tx.send(true);
        }
    });

    let report = queue.analyze_all_until(&cancel_rx).await;

    if json {
        let items: Vec<serde_json::Value> = queue.items().iter().map(scan_item_json).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for item in queue.items() {
            match (&item.status, &item.result) {
                (ScanStatus::Done, Some(draft)) => println!(
                    "✓ {}: {} ({}, {}) - {}",
                    item.file_name,
                    draft.name.as_deref().unwrap_or("?"),
                    draft.origin.as_deref().unwrap_or("?"),
                    draft.year.as_deref().unwrap_or("?"),
                    draft.estimated_value.as_deref().unwrap_or("?"),
                ),
                (ScanStatus::Error, _) => println!(
                    "✗ {}: {}",
                    item.file_name,
                    item.error.map(|c| c.to_string()).unwrap_or_default()
                ),
                _ => println!("- {}: not analyzed", item.file_name),
            }
        }
        println!(
            "\nAnalyzed {}, failed {}, skipped {}",
            report.analyzed, report.failed, report.skipped
        );
    }

    if let Some(e) = &report.aborted {
        eprintln!("Batch stopped: {}. {}", e, e.hint());
    }
    if report.cancelled {
        eprintln!("Batch cancelled");
    }

    if dry_run {
        return Ok(());
    }

    let album = album.unwrap_or_else(|| ctx.default_album());
    if !ctx.store.albums().contains(&album) {
        ctx.store.add_album(&album)?;
    }
    let created = queue.promote_all(&mut ctx.store, &album)?;
    if !json {
        println!("Saved {} stamps to '{}'", created.len(), album);
    }

    Ok(())
}

/// Print a line whenever an item's status or progress text changes
fn progress_printer() -> impl FnMut(&[ScanItem]) + Send + 'static {
    let mut seen: HashMap<String, (ScanStatus, Option<String>)> = HashMap::new();
    move |items| {
        for item in items {
            let state = (item.status, item.progress.clone());
            if seen.get(&item.id) == Some(&state) {
                continue;
            }
            if item.status == ScanStatus::Analyzing {
                println!("  {} ... {}", item.file_name, item.progress.as_deref().unwrap_or(""));
            }
            seen.insert(item.id.clone(), state);
        }
    }
}

fn scan_item_json(item: &ScanItem) -> serde_json::Value {
    serde_json::json!({
        "id": item.id,
        "file": item.file_name,
        "status": item.status,
        "result": item.result,
        "error": item.error,
    })
}

/// Run collection commands
fn run_collection_command(mut ctx: AppContext, action: CollectionCommands, json: bool) -> Result<()> {
    match action {
        CollectionCommands::List { search, album, sort, order } => {
            let query = CollectionQuery { search, album, sort, order };
            let stamps = browse(ctx.store.stamps(), &query);
            if json {
                println!("{}", serde_json::to_string_pretty(&stamps)?);
            } else {
                for stamp in &stamps {
                    println!("{}", stamp_line(stamp));
                }
                println!("\n{} of {} stamps", stamps.len(), ctx.store.len());
            }
        }
        CollectionCommands::Show { id } => {
            let stamp = find_stamp(&ctx, &id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(stamp)?);
            } else {
                print_stamp(stamp);
            }
        }
        CollectionCommands::Remove { id, force } => {
            let stamp = find_stamp(&ctx, &id)?;
            if !force {
                eprintln!("Use --force to confirm removing '{}'", stamp.name);
                return Ok(());
            }
            let name = stamp.name.clone();
            ctx.store.remove(&id)?;
            println!("Removed '{}'", name);
        }
        CollectionCommands::Export { output } => {
            let path = ctx.store.export_to(&output, Local::now().date_naive())?;
            println!("Exported {} stamps to {:?}", ctx.store.len(), path);
        }
        CollectionCommands::Stats => {
            let stats = portfolio_stats(ctx.store.stamps());
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Portfolio Statistics:");
                println!("  Stamps: {}", stats.stamp_count);
                println!("  Total value: {}", stats.total_value_display);
                println!("  Appraised: {}", stats.appraised_count);
                println!("  Pending review: {}", stats.pending_count);
                for (album, count) in &stats.albums {
                    println!("  {}: {}", album, count);
                }
            }
        }
    }

    Ok(())
}

/// Run album commands
fn run_album_command(mut ctx: AppContext, action: AlbumCommands, json: bool) -> Result<()> {
    match action {
        AlbumCommands::List => {
            let stats = portfolio_stats(ctx.store.stamps());
            let counted: Vec<(String, usize)> = ctx
                .store
                .albums()
                .iter()
                .map(|a| {
                    let count = stats.albums.iter().find(|(name, _)| name == a).map_or(0, |(_, c)| *c);
                    (a.clone(), count)
                })
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&counted)?);
            } else {
                println!("Albums:");
                for (album, count) in counted {
                    println!("  {} ({})", album, count);
                }
            }
        }
        AlbumCommands::Add { name } => {
            if ctx.store.add_album(&name)? {
                println!("Created album '{}'", name.trim());
            } else {
                println!("Album '{}' already exists", name.trim());
            }
        }
    }

    Ok(())
}

/// Run appraisal commands
fn run_appraisal_command(mut ctx: AppContext, action: AppraisalCommands, json: bool) -> Result<()> {
    match action {
        AppraisalCommands::List => {
            let pending: Vec<&Stamp> = with_status(ctx.store.stamps(), ExpertStatus::Pending).collect();
            let appraised: Vec<&Stamp> = with_status(ctx.store.stamps(), ExpertStatus::Appraised).collect();
            if json {
                let out = serde_json::json!({ "pending": pending, "appraised": appraised });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Pending ({}):", pending.len());
                for stamp in pending {
                    println!("{}", stamp_line(stamp));
                }
                println!("\nAppraised ({}):", appraised.len());
                for stamp in appraised {
                    println!("{}", stamp_line(stamp));
                    if let Some(note) = &stamp.expert_note {
                        println!("      {}", note);
                    }
                }
            }
        }
        AppraisalCommands::Request { id } => {
            let stamp = ctx.store.request_appraisal(&id)?;
            println!("Appraisal requested for '{}'", stamp.name);
        }
        AppraisalCommands::Approve { id, value, note } => {
            let stamp = ctx.store.appraise(&id, value.as_deref(), note.as_deref())?;
            println!(
                "'{}' appraised at {}",
                stamp.name,
                stamp.expert_valuation.as_deref().unwrap_or(&stamp.estimated_value)
            );
        }
        AppraisalCommands::Reject { id, force } => {
            let stamp = find_stamp(&ctx, &id)?;
            if !force {
                eprintln!("Use --force to confirm rejecting the review of '{}'", stamp.name);
                return Ok(());
            }
            let stamp = ctx.store.reject(&id)?;
            println!("Review of '{}' rejected", stamp.name);
        }
    }

    Ok(())
}

/// One question, or an interactive session reading lines from stdin
async fn run_advise(ctx: AppContext, question: Option<String>) -> Result<()> {
    let mut advisor = ctx.advisor();

    if let Some(question) = question {
        if let Some(reply) = advisor.ask(&question).await {
            println!("{}", reply);
        }
        return Ok(());
    }

    if let Some(welcome) = advisor.transcript().first() {
        println!("{}\n", welcome.text);
    }
    println!("(empty line or Ctrl+D to quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match advisor.ask(&line).await {
            Some(reply) => println!("\n{}\n", reply),
            None => break,
        }
    }

    Ok(())
}

async fn run_news(ctx: AppContext, json: bool) -> Result<()> {
    let news = ctx.gemini.market_news().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&news)?);
        return Ok(());
    }
    if news.is_empty() {
        println!("No market news available");
    }
    for item in news {
        println!("[{:?}] {} ({})", item.kind, item.title, item.source);
        println!("    {}", item.summary);
        println!("    {}", item.url);
    }
    Ok(())
}

/// Run status check
async fn run_status(ctx: AppContext) -> Result<()> {
    println!("Stampvault v{} Status", env!("CARGO_PKG_VERSION"));
    println!("======================");

    match ctx.gemini.key_status().await {
        KeyStatus::Valid => println!("API key: valid"),
        KeyStatus::Invalid => println!("API key: ✗ rejected (check billing and entitlement)"),
        KeyStatus::Missing => println!("API key: ✗ not set (export API_KEY)"),
    }

    let stats = portfolio_stats(ctx.store.stamps());
    println!("\nArchive ({}):", ctx.config.storage.path);
    println!("  Stamps: {}", stats.stamp_count);
    println!("  Albums: {}", ctx.store.albums().len());
    println!("  Total value: {}", stats.total_value_display);
    if let Some(bytes) = ctx.store.stored_bytes()? {
        println!("  Stored: {} KiB", bytes / 1024);
    }

    println!("\nConfiguration:");
    println!("  Endpoint: {}", ctx.config.ai_engine.url);
    println!("  Vision model: {}", ctx.config.ai_engine.models.vision);
    println!("  Chat model: {}", ctx.config.ai_engine.models.chat);

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {:?} is valid", config_path);
            println!("  Vision model: {}", config.ai_engine.models.vision);
            println!("  Archive: {}", config.storage.path);
            println!("  Default album: {}", config.scanner.default_album);
        }
    }

    Ok(())
}

fn find_stamp<'a>(ctx: &'a AppContext, id: &str) -> Result<&'a Stamp> {
    ctx.store.get(id).ok_or_else(|| StampvaultError::NotFound(id.to_string()))
}

fn stamp_line(stamp: &Stamp) -> String {
    let marker = match stamp.expert_status {
        ExpertStatus::None => " ",
        ExpertStatus::Pending => "?",
        ExpertStatus::Appraised => "✓",
    };
    format!(
        "  {} {}  {} ({}, {}) - {} [{}]",
        marker,
        stamp.id,
        stamp.name,
        stamp.origin,
        stamp.year,
        stamp.effective_value(),
        stamp.album
    )
}

fn print_stamp(stamp: &Stamp) {
    println!("{}", stamp.name);
    println!("  Id: {}", stamp.id);
    println!("  Origin: {}", stamp.origin);
    println!("  Year: {}", stamp.year);
    println!("  Estimated value: {}", stamp.estimated_value);
    println!("  Rarity: {}", stamp.rarity);
    println!("  Condition: {}", stamp.condition);
    println!("  Album: {}", stamp.album);
    println!("  Added: {}", stamp.date_added.format("%Y-%m-%d %H:%M"));
    println!("  Review: {}", stamp.expert_status);
    let optional = [
        ("Expert valuation", &stamp.expert_valuation),
        ("Expert note", &stamp.expert_note),
        ("Catalog", &stamp.catalog_id),
        ("Price source", &stamp.price_source),
        ("Printing", &stamp.printing_method),
        ("Paper", &stamp.paper_type),
        ("Cancellation", &stamp.cancellation_type),
    ];
    for (label, value) in optional {
        if let Some(value) = value {
            println!("  {}: {}", label, value);
        }
    }
    println!("\n{}", stamp.description);
    if let Some(context) = &stamp.historical_context {
        println!("\n{}", context);
    }
    for r in stamp.web_refs.iter().flatten() {
        println!("  - {} <{}>", r.title, r.uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["stampvault"]).unwrap();
        assert!(!cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_scan_command() {
        let cli = Cli::try_parse_from([
            "stampvault", "scan", "a.jpg", "b.png", "--hints", "Bayern 1849", "--dry-run"
        ]).unwrap();

        match cli.command {
            Some(Commands::Scan { files, hints, dry_run, album }) => {
                assert!(dry_run);
                assert_eq!(files, vec![PathBuf::from("a.jpg"), PathBuf::from("b.png")]);
                assert_eq!(hints.as_deref(), Some("Bayern 1849"));
                assert!(album.is_none());
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_cli_scan_requires_files() {
        assert!(Cli::try_parse_from(["stampvault", "scan"]).is_err());
    }

    #[test]
    fn test_cli_collection_list_sorting() {
        let cli = Cli::try_parse_from([
            "stampvault", "collection", "list", "--sort", "value", "--order", "asc", "--album", "Seltenheiten"
        ]).unwrap();

        match cli.command {
            Some(Commands::Collection { action: CollectionCommands::List { sort, order, album, search } }) => {
                assert_eq!(sort, SortKey::EstimatedValue);
                assert_eq!(order, SortOrder::Asc);
                assert_eq!(album.as_deref(), Some("Seltenheiten"));
                assert!(search.is_empty());
            }
            _ => panic!("Expected Collection List command"),
        }

        assert!(Cli::try_parse_from(["stampvault", "collection", "list", "--sort", "weight"]).is_err());
    }

    #[test]
    fn test_cli_appraisal_approve() {
        let cli = Cli::try_parse_from([
            "stampvault", "--format", "json", "appraisal", "approve", "abc", "--value", "120,00 €"
        ]).unwrap();

        assert_eq!(cli.format, "json");
        match cli.command {
            Some(Commands::Appraisal { action: AppraisalCommands::Approve { id, value, note } }) => {
                assert_eq!(id, "abc");
                assert_eq!(value.as_deref(), Some("120,00 €"));
                assert!(note.is_none());
            }
            _ => panic!("Expected Appraisal Approve command"),
        }
    }
}
