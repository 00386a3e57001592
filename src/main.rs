/*!
 * Ballast - JBOD disk rebalancer
 *
 * Scans the array's data disks, builds a redistribution plan to balance
 * fill levels, and executes the plan with rsync one unit at a time.
 * Default behavior is a dry run; use --execute to move data.
 */

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};

use ballast::config::{ConfigFile, RebalanceConfig};
use ballast::disk::discover_disks;
use ballast::executor::{perform_plan, CancelToken, ExecutorOptions};
use ballast::logging::init_logging;
use ballast::metrics::store::RetentionPolicy;
use ballast::metrics::MetricsStore;
use ballast::modes::RsyncMode;
use ballast::monitor::{initial_eta, PerformanceMonitor};
use ballast::perf::detect_drive_class;
use ballast::plan::Plan;
use ballast::planner::{build_plan, SelectionStrategy, TargetMode};
use ballast::scan::{scan_disk, ScanOptions, Unit};
use ballast::scheduler::{
    templates, CronExpression, CrontabRegistry, ScheduleConfig, ScheduleManager,
};
use ballast::size::{format_bytes, format_duration_secs, parse_size};
use ballast::transfer_state::TransferTracker;

#[derive(Parser)]
#[command(
    name = "ballast",
    version,
    about = "Rebalance JBOD data disks by moving directory/file units between mounts"
)]
struct Cli {
    #[command(flatten)]
    rebalance: RebalanceArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct RebalanceArgs {
    /// Comma list of disk names to include (e.g. disk1,disk2)
    #[arg(long)]
    include_disks: Option<String>,

    /// Comma list of disk names to exclude
    #[arg(long)]
    exclude_disks: Option<String>,

    /// Comma list of shares to include (default: all)
    #[arg(long)]
    include_shares: Option<String>,

    /// Comma list of shares to exclude (e.g. appdata,System)
    #[arg(long)]
    exclude_shares: Option<String>,

    /// Comma list of globs relative to the share root to skip
    #[arg(long)]
    exclude_globs: Option<String>,

    /// Allocation unit depth under each share (0 = whole share)
    #[arg(long)]
    unit_depth: Option<u32>,

    /// Only move units at least this large (e.g. 1GiB)
    #[arg(long)]
    min_unit_size: Option<String>,

    /// Target maximum fill percent per disk; -1 auto-evens with headroom
    #[arg(long, allow_hyphen_values = true)]
    target_percent: Option<f64>,

    /// Headroom percent when auto-evening
    #[arg(long)]
    headroom_percent: Option<f64>,

    /// rsync performance mode
    #[arg(long, value_enum)]
    mode: Option<RsyncMode>,

    /// Unit selection strategy: size or fill
    #[arg(long, default_value = "size")]
    strategy: String,

    /// Comma list of extra args passed to rsync
    #[arg(long)]
    rsync_extra: Option<String>,

    /// Allow merging into existing destination directories
    #[arg(long)]
    allow_merge: bool,

    /// Execute moves (default is dry-run)
    #[arg(long)]
    execute: bool,

    /// Write the plan JSON to this path
    #[arg(long)]
    save_plan: Option<PathBuf>,

    /// Load a plan from JSON and skip planning
    #[arg(long)]
    load_plan: Option<PathBuf>,

    /// Root under which data disks are mounted
    #[arg(long)]
    disks_root: Option<PathBuf>,

    /// Metrics database path
    #[arg(long)]
    metrics_db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage rebalance schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Show recent operations from the metrics database
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Metrics database maintenance
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Create a schedule from a named template
    Create { template: String },
    /// List configured schedules
    List,
    /// Delete a schedule
    Delete { schedule_id: String },
    /// Enable a schedule
    Enable { schedule_id: String },
    /// Disable a schedule
    Disable { schedule_id: String },
    /// Reconcile configured schedules with the cron table
    Sync,
    /// List available templates
    Templates,
}

#[derive(Subcommand)]
enum DbAction {
    /// Show database size and row counts
    Stats,
    /// Reclaim space and refresh statistics
    Vacuum,
    /// Run integrity checks
    Integrity,
    /// Snapshot the database to a file
    Backup { target: PathBuf },
    /// Delete data older than the given number of days
    Retention {
        #[arg(long, default_value_t = 90)]
        operations_days: u32,
        #[arg(long, default_value_t = 30)]
        system_metrics_days: u32,
        #[arg(long, default_value_t = 90)]
        errors_days: u32,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = build_config(&cli.rebalance);
    init_logging(&config).context("failed to initialize logging")?;

    match cli.command {
        Some(Commands::Schedule { action }) => run_schedule(&config, action).map(|()| 0),
        Some(Commands::History { limit }) => run_history(&config, limit).map(|()| 0),
        Some(Commands::Db { action }) => run_db(&config, action).map(|()| 0),
        None => run_rebalance(&cli.rebalance, &config),
    }
}

/// Merge CLI flags over the config file over built-in defaults.
fn build_config(args: &RebalanceArgs) -> RebalanceConfig {
    let mut config = RebalanceConfig::default();
    ConfigFile::load_with_fallback().apply_to(&mut config);

    if let Some(ref root) = args.disks_root {
        config.disks_root = root.clone();
    }
    if let Some(pct) = args.target_percent {
        config.target_percent = if pct < 0.0 { None } else { Some(pct) };
    }
    if let Some(headroom) = args.headroom_percent {
        config.headroom_percent = headroom;
    }
    if let Some(depth) = args.unit_depth {
        config.unit_depth = depth;
    }
    if let Some(ref size) = args.min_unit_size {
        if let Ok(bytes) = parse_size(size) {
            config.min_unit_size = bytes;
        }
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(ref list) = args.include_disks {
        config.include_disks = Some(split_list(list));
    }
    if let Some(ref list) = args.exclude_disks {
        config.exclude_disks = Some(split_list(list));
    }
    if let Some(ref list) = args.include_shares {
        config.include_shares = Some(split_list(list));
    }
    if let Some(ref list) = args.exclude_shares {
        config.exclude_shares = Some(split_list(list));
    }
    if let Some(ref globs) = args.exclude_globs {
        config.exclude_globs.extend(split_list(globs));
    }
    if let Some(ref extra) = args.rsync_extra {
        config.extra_rsync_flags = split_list(extra);
    }
    if let Some(ref db) = args.metrics_db {
        config.metrics_db = Some(db.clone());
    }
    if let Some(ref log_file) = args.log_file {
        config.log_file = Some(log_file.clone());
    }
    config.allow_merge = args.allow_merge;
    config.execute = args.execute;
    config.verbose = args.verbose;
    config
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn metrics_db_path(config: &RebalanceConfig) -> PathBuf {
    config
        .metrics_db
        .clone()
        .unwrap_or_else(|| PathBuf::from("ballast_metrics.db"))
}

fn run_rebalance(args: &RebalanceArgs, config: &RebalanceConfig) -> Result<i32> {
    // Step 1: discover disks and their usage
    let disks = discover_disks(
        &config.disks_root,
        config.include_disks.as_deref(),
        config.exclude_disks.as_deref(),
    );
    if disks.is_empty() {
        eprintln!(
            "No {}/disk* data disks found.",
            config.disks_root.display()
        );
        return Ok(2);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["Disk", "Size", "Used", "Free", "Fill"]);
    for disk in &disks {
        table.add_row(vec![
            disk.name.clone(),
            format_bytes(disk.size_bytes),
            format_bytes(disk.used_bytes),
            format_bytes(disk.free_bytes),
            format!("{:.1}%", disk.used_percent()),
        ]);
    }
    println!("Discovered disks:\n{}", table);

    // Step 2 and 3: scan units and build the plan, or load one
    let plan = if let Some(ref path) = args.load_plan {
        let plan = Plan::load(path).context("failed to load plan")?;
        println!(
            "Loaded plan with {} moves totaling {}",
            plan.summary.total_moves,
            format_bytes(plan.summary.total_bytes)
        );
        plan
    } else {
        println!("\nScanning allocation units (this can take a while)...");
        let opts = ScanOptions {
            unit_depth: config.unit_depth,
            include_shares: config.include_shares.clone(),
            exclude_shares: config.exclude_shares.clone(),
            min_unit_size: config.min_unit_size,
            exclude_globs: ScanOptions::compile_globs(&config.exclude_globs)
                .context("invalid exclude glob")?,
        };
        let units: Vec<Unit> = disks.iter().flat_map(|d| scan_disk(d, &opts)).collect();
        let total_bytes: u64 = units.iter().map(|u| u.size_bytes).sum();
        println!(
            "Found {} units totaling {}",
            units.len(),
            format_bytes(total_bytes)
        );

        let mode = match config.target_percent {
            Some(pct) => TargetMode::FixedPercent(pct),
            None => TargetMode::AutoEven {
                headroom_percent: config.headroom_percent,
            },
        };
        let strategy = if args.strategy == "fill" {
            SelectionStrategy::ByFill
        } else {
            SelectionStrategy::BySize
        };
        build_plan(&disks, &units, mode, strategy)
    };

    preview_plan(&plan);
    if let Some(ref path) = args.save_plan {
        plan.save(path).context("failed to save plan")?;
        println!("Saved plan to {}", path.display());
    }
    if plan.is_empty() {
        println!("\nDisks are already balanced; nothing to do.");
        return Ok(0);
    }

    let eta_class = disks.iter().map(|d| detect_drive_class(d.size_bytes)).next();
    println!(
        "Estimated duration: {}",
        format_duration_secs(initial_eta(plan.summary.total_bytes, eta_class).as_secs())
    );

    // Step 4: execute (or dry-run)
    let operation_id = format!("rebalance_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    let store = if config.execute {
        Some(Arc::new(
            MetricsStore::open(&metrics_db_path(config)).context("failed to open metrics db")?,
        ))
    } else {
        None
    };

    let mut monitor = PerformanceMonitor::new(&operation_id, config.mode.as_str(), store.clone());
    monitor.set_totals(plan.summary.total_moves as u64, plan.summary.total_bytes);
    let tracker = match store {
        Some(ref store) => TransferTracker::with_store(&operation_id, store.clone()),
        None => TransferTracker::new(&operation_id),
    };

    let opts = ExecutorOptions {
        execute: config.execute,
        extra_flags: config.extra_rsync_flags.clone(),
        allow_merge: config.allow_merge,
        mode: config.mode,
        disks_root: config.disks_root.clone(),
        ..Default::default()
    };

    let label = if config.execute { "EXECUTE" } else { "DRY-RUN" };
    println!("\n=== {} {} planned move(s) ===", label, plan.summary.total_moves);

    if config.execute {
        monitor.start();
    }
    let cancel = CancelToken::new();
    let summary = perform_plan(&plan, &opts, &tracker, Some(&monitor), store.as_ref(), &cancel)?;
    if config.execute {
        monitor.stop();
    }

    println!(
        "\nSummary: {} attempted, {} succeeded, {} skipped (merge disallowed), {} failed",
        summary.attempted, summary.succeeded, summary.skipped, summary.failed
    );
    if summary.cancelled {
        println!("Operation was cancelled; source data is intact.");
        return Ok(130);
    }
    if summary.failed > 0 {
        println!("Completed with {} failure(s). Review the log above.", summary.failed);
        return Ok(1);
    }
    println!("Completed successfully.");
    Ok(0)
}

fn preview_plan(plan: &Plan) {
    println!(
        "\nPlan: {} moves, {} to re-distribute.",
        plan.summary.total_moves,
        format_bytes(plan.summary.total_bytes)
    );
    const PREVIEW_LIMIT: usize = 20;
    for (i, mv) in plan.moves.iter().take(PREVIEW_LIMIT).enumerate() {
        println!(
            "  {:>3}. {} | {} | {} -> {}",
            i + 1,
            mv.unit.unit_key(),
            format_bytes(mv.unit.size_bytes),
            mv.unit.src_disk,
            mv.dest_disk
        );
    }
    if plan.moves.len() > PREVIEW_LIMIT {
        println!("  ... and {} more", plan.moves.len() - PREVIEW_LIMIT);
    }
}

/// Next firing time of a schedule's cron expression, for display.
fn next_run_display(schedule: &ScheduleConfig) -> String {
    if !schedule.enabled {
        return "disabled".to_string();
    }
    let Some(expression) = schedule.cron_expression.as_deref() else {
        return "-".to_string();
    };
    match CronExpression::parse(expression) {
        Ok(cron) => cron
            .next_fire_after(Local::now().naive_local())
            .map(|next| next.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string()),
        Err(_) => "-".to_string(),
    }
}

fn schedule_manager(config: &RebalanceConfig) -> Result<ScheduleManager> {
    let command = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "ballast".to_string());
    let registry = CrontabRegistry::new(&command);
    ScheduleManager::new(&config.schedule_dir, registry)
        .context("failed to open schedule directory")
}

fn run_schedule(config: &RebalanceConfig, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::Templates => {
            for name in templates::TEMPLATE_NAMES {
                println!("{}", name);
            }
            Ok(())
        }
        ScheduleAction::Create { template } => {
            let manager = schedule_manager(config)?;
            let schedule = templates::by_name(&template)
                .ok_or_else(|| anyhow::anyhow!("unknown template: {}", template))??;
            let id = schedule.schedule_id.clone();
            let time_based = schedule.cron_expression.is_some();
            let next_run = next_run_display(&schedule);
            manager.create_schedule(schedule)?;
            if time_based {
                println!("Created schedule {} (next run: {})", id, next_run);
            } else {
                println!("Created schedule {}", id);
            }
            Ok(())
        }
        ScheduleAction::List => {
            let manager = schedule_manager(config)?;
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec!["Id", "Name", "Enabled", "Trigger", "Cron", "Next run"]);
            for schedule in manager.list_schedules() {
                table.add_row(vec![
                    schedule.schedule_id.clone(),
                    schedule.name.clone(),
                    schedule.enabled.to_string(),
                    format!("{:?}", schedule.trigger),
                    schedule.cron_expression.clone().unwrap_or_default(),
                    next_run_display(&schedule),
                ]);
            }
            println!("{}", table);
            Ok(())
        }
        ScheduleAction::Delete { schedule_id } => {
            schedule_manager(config)?.delete_schedule(&schedule_id)?;
            println!("Deleted schedule {}", schedule_id);
            Ok(())
        }
        ScheduleAction::Enable { schedule_id } => {
            schedule_manager(config)?.enable_schedule(&schedule_id)?;
            println!("Enabled schedule {}", schedule_id);
            Ok(())
        }
        ScheduleAction::Disable { schedule_id } => {
            schedule_manager(config)?.disable_schedule(&schedule_id)?;
            println!("Disabled schedule {}", schedule_id);
            Ok(())
        }
        ScheduleAction::Sync => {
            schedule_manager(config)?.sync_schedules()?;
            println!("Schedules synchronized with the cron table.");
            Ok(())
        }
    }
}

fn run_history(config: &RebalanceConfig, limit: usize) -> Result<()> {
    let store = MetricsStore::open(&metrics_db_path(config))?;
    let operations = store.get_operations(limit, 0)?;
    if operations.is_empty() {
        println!("No operations recorded yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec![
        "Operation",
        "Mode",
        "Moved",
        "Completed",
        "Failed",
        "Rate",
    ]);
    for op in operations {
        let rate = op
            .overall_rate_mbps()
            .map(|r| format!("{:.1} MB/s", r))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            op.operation_id.clone(),
            op.rsync_mode.clone(),
            format_bytes(op.transferred_bytes),
            op.completed_files.to_string(),
            op.failed_files.to_string(),
            rate,
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn run_db(config: &RebalanceConfig, action: DbAction) -> Result<()> {
    let store = MetricsStore::open(&metrics_db_path(config))?;
    match action {
        DbAction::Stats => {
            let stats = store.database_stats()?;
            println!("Database: {}", store.path().display());
            println!("  size: {}", format_bytes(stats.file_size_bytes));
            println!("  schema version: {}", stats.schema_version);
            println!("  operations: {}", stats.operations);
            println!("  transfers: {}", stats.transfers);
            println!("  system samples: {}", stats.system_metrics);
            println!("  errors: {}", stats.operation_errors);
        }
        DbAction::Vacuum => {
            store.vacuum()?;
            println!("Database vacuumed.");
        }
        DbAction::Integrity => {
            let report = store.verify_integrity()?;
            if report.healthy() {
                println!("Integrity check passed.");
            } else {
                println!("Integrity problems found:");
                for detail in &report.details {
                    println!("  - {}", detail);
                }
                let repaired = store.repair()?;
                println!(
                    "After repair: {}",
                    if repaired.healthy() { "healthy" } else { "still failing" }
                );
            }
        }
        DbAction::Backup { target } => {
            store.backup(&target)?;
            println!("Backup written to {}", target.display());
        }
        DbAction::Retention {
            operations_days,
            system_metrics_days,
            errors_days,
        } => {
            let outcome = store.apply_retention(&RetentionPolicy {
                operations_days,
                system_metrics_days,
                errors_days,
            })?;
            println!(
                "Removed {} operations, {} samples, {} errors.",
                outcome.operations_deleted,
                outcome.system_metrics_deleted,
                outcome.errors_deleted
            );
        }
    }
    Ok(())
}
