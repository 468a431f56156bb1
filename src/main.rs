//! logscope CLI
//!
//! Command-line interface over a set of JSON-lines log archives:
//! - List filtered entries
//! - Browse the activity tree
//! - Find text in messages
//! - Summarize counts
//! - Manage saved queries

use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use logscope::config::{generate_default_config, Config, LoggingConfig};
use logscope::ingest::{Database, LoadCallbacks};
use logscope::model::{Activity, DateRange, Entry};
use logscope::query::{parse_query, QueryStore, SavedQuery, SqliteQueryStore, Subquery};
use logscope::source::JsonlOpener;
use logscope::view::{FilteredView, Regeneration};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "logscope")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Explore large log archives")]
#[command(long_about = "logscope loads JSON-lines log archives, newest first, and filters them\nwith a boolean query language.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Archive files to load (JSON lines, one record per line)
    #[arg(short, long = "archive", global = true)]
    pub archives: Vec<PathBuf>,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json, csv)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List entries matching the filters
    Entries {
        #[command(flatten)]
        filter: FilterArgs,
        /// Only entries belonging to these activities or their descendants
        #[arg(long = "activity")]
        activities: Vec<u64>,
        /// Maximum rows to print
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },

    /// List activities owning matching entries
    Activities {
        #[command(flatten)]
        filter: FilterArgs,
        /// Only activities whose name contains this text
        #[arg(long)]
        name: Option<String>,
    },

    /// Find text in the messages of matching entries
    Find {
        /// Text to look for (case-insensitive)
        needle: String,
        #[command(flatten)]
        filter: FilterArgs,
        /// Maximum hits to print
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show counts over matching entries
    Stats {
        #[command(flatten)]
        filter: FilterArgs,
        /// Number of processes and subsystems to list
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Manage saved queries
    Saved {
        #[command(subcommand)]
        action: SavedAction,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum SavedAction {
    /// List saved queries
    List,
    /// Save a query under a name, replacing any with the same name
    Save { name: String, query: String },
    /// Delete a saved query
    Delete { name: String },
}

#[derive(clap::Args, Clone, Default)]
pub struct FilterArgs {
    /// Query text, e.g. `level:error AND message ~ timeout`
    #[arg(short, long, conflicts_with = "saved")]
    pub query: Option<String>,
    /// Use a saved query
    #[arg(long)]
    pub saved: Option<String>,
    /// Start of the date range (RFC 3339 or Unix seconds)
    #[arg(long, conflicts_with = "last")]
    pub since: Option<String>,
    /// End of the date range, exclusive (RFC 3339 or Unix seconds)
    #[arg(long, conflicts_with = "last")]
    pub until: Option<String>,
    /// Range reaching back from the newest entry (e.g. 30s, 5m, 2h, 1d)
    #[arg(short, long)]
    pub last: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging);

    match &cli.command {
        Commands::Entries {
            filter,
            activities,
            limit,
        } => {
            let view = open_view(&cli, &config, filter).await?;
            view.set_selected_activities(activities.iter().copied().collect::<HashSet<_>>());
            regenerate(view.regenerate_entries().await?)?;

            let entries = view.entries();
            let rows: Vec<&Entry> = entries.iter().take(*limit).map(|e| e.as_ref()).collect();
            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
                "csv" => print_entries_csv(&rows)?,
                _ => {
                    print_entries_table(&rows);
                    if entries.len() > rows.len() {
                        println!();
                        println!("({} of {} entries shown)", rows.len(), entries.len());
                    }
                }
            }
        }

        Commands::Activities { filter, name } => {
            let view = open_view(&cli, &config, filter).await?;
            if let Some(name) = name {
                view.set_activity_name_filter(name.clone());
            }
            regenerate(view.regenerate_activities().await?)?;

            let activities = view.activities();
            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(activities.as_ref())?),
                _ => {
                    if activities.is_empty() {
                        println!("No activities");
                    }
                    for activity in activities.iter() {
                        print_activity(activity, 0);
                    }
                }
            }
        }

        Commands::Find {
            needle,
            filter,
            limit,
        } => {
            let view = open_view(&cli, &config, filter).await?;
            regenerate(view.regenerate_entries().await?)?;

            let index = view.search_index();
            let mut hits = Vec::new();
            let mut from = 0;
            while hits.len() < *limit {
                match index.find_next(needle, from) {
                    // find_next wraps; stop once it comes back around
                    Some(hit) if hit.range.start >= from => {
                        from = hit.range.end;
                        hits.push(hit);
                    }
                    _ => break,
                }
            }

            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&hits)?),
                _ => {
                    if hits.is_empty() {
                        println!("No matches for {:?}", needle);
                    }
                    for hit in &hits {
                        let entry = &index.entries()[hit.row];
                        println!(
                            "{:>8}  {}  {}",
                            hit.row,
                            entry.date.format("%Y-%m-%d %H:%M:%S%.3f"),
                            entry.message
                        );
                    }
                }
            }
        }

        Commands::Stats { filter, top } => {
            let view = open_view(&cli, &config, filter).await?;
            regenerate(view.regenerate_entries().await?)?;

            let stats = view.stats();
            match cli.format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&stats)?),
                _ => {
                    println!("Entries:    {}", stats.total);
                    println!("Logs:       {}", stats.logs);
                    println!("Activities: {}", stats.activities);
                    if let Some(span) = stats.span {
                        println!("Span:       {}", span);
                    }

                    println!();
                    println!("{:<12} {:>10}", "Level", "Count");
                    println!("{}", "-".repeat(23));
                    for (level, count) in &stats.by_level {
                        println!("{:<12} {:>10}", level.to_string(), count);
                    }

                    print_counts("Process", &stats.top_processes(*top));
                    print_counts("Subsystem", &stats.top_subsystems(*top));
                }
            }
        }

        Commands::Saved { action } => {
            let store = open_saved_queries(&config)?;
            match action {
                SavedAction::List => {
                    let queries = store.load()?;
                    match cli.format.as_str() {
                        "json" => println!("{}", serde_json::to_string_pretty(&queries)?),
                        _ => {
                            if queries.is_empty() {
                                println!("No saved queries.");
                                println!();
                                println!("Save one with:");
                                println!("  logscope saved save errors 'level:error,fault'");
                            }
                            for saved in queries {
                                println!("{:<20} {}", saved.name, saved.query);
                            }
                        }
                    }
                }
                SavedAction::Save { name, query } => {
                    let parsed = parse_query(query)?;
                    store.upsert(SavedQuery::new(name.clone(), parsed))?;
                    println!("Saved {:?}", name);
                }
                SavedAction::Delete { name } => {
                    store.remove(name)?;
                    println!("Deleted {:?}", name);
                }
            }
        }

        Commands::Config { output } => {
            let content = generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, &content)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", content);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("logscope={}", config.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so JSON and CSV output stay clean
    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Load every archive and build a view with the filter applied
async fn open_view(cli: &Cli, config: &Config, filter: &FilterArgs) -> anyhow::Result<FilteredView> {
    if cli.archives.is_empty() {
        bail!("No archives given. Pass one or more with --archive <PATH>");
    }

    let database = Database::with_options(Arc::new(JsonlOpener::new()), config.ingest.to_options());
    for path in &cli.archives {
        database.add_source(path.to_string_lossy());
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let callbacks = LoadCallbacks::new()
        .with_windows(config.ingest.lookback_windows())
        .on_range(|range| tracing::info!(%range, "Archive range"))
        .on_progress(|progress| {
            for window in progress {
                tracing::debug!(
                    window = %window.name,
                    completed = window.completed,
                    total = window.total,
                    "Load progress"
                );
            }
        });

    let summary = database.load_if_necessary(&callbacks, &cancel).await?;
    tracing::info!(
        sources = summary.sources_loaded,
        entries = summary.entries,
        "Archives loaded"
    );

    let store = database.store();
    let view = FilteredView::with_options(Arc::clone(&store), config.view.to_options());
    view.set_query(resolve_query(config, filter)?);
    view.set_date_range(resolve_range(filter, store.span())?);
    Ok(view)
}

fn resolve_query(config: &Config, filter: &FilterArgs) -> anyhow::Result<Option<Subquery>> {
    if let Some(text) = &filter.query {
        return Ok(Some(parse_query(text)?));
    }
    if let Some(name) = &filter.saved {
        let store = open_saved_queries(config)?;
        return Ok(Some(store.get(name)?.query));
    }
    Ok(None)
}

fn resolve_range(filter: &FilterArgs, span: Option<DateRange>) -> anyhow::Result<Option<DateRange>> {
    // Nothing loaded: any range selects nothing
    let Some(span) = span else {
        return Ok(None);
    };

    if let Some(last) = &filter.last {
        let start = span
            .end
            .checked_sub_signed(parse_duration(last)?)
            .with_context(|| format!("--last {} reaches out of range", last))?;
        return DateRange::try_new(start, span.end)
            .map(Some)
            .with_context(|| format!("Invalid --last {}", last));
    }
    if filter.since.is_none() && filter.until.is_none() {
        return Ok(None);
    }

    let start = match &filter.since {
        Some(s) => parse_time(s)?,
        None => span.start,
    };
    let end = match &filter.until {
        Some(s) => parse_time(s)?,
        None => span.end,
    };
    DateRange::try_new(start, end)
        .map(Some)
        .with_context(|| format!("--since {} is after --until {}", start, end))
}

fn open_saved_queries(config: &Config) -> anyhow::Result<SqliteQueryStore> {
    let path = Path::new(&config.storage.saved_queries_path);
    SqliteQueryStore::open(path)
        .with_context(|| format!("Failed to open saved queries at {:?}", path))
}

fn regenerate(outcome: Regeneration) -> anyhow::Result<()> {
    match outcome {
        Regeneration::Applied => Ok(()),
        Regeneration::Superseded => bail!("Interrupted"),
    }
}

fn parse_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let secs: i64 = s
        .parse()
        .with_context(|| format!("Invalid time: {}. Use RFC 3339 or Unix seconds", s))?;
    DateTime::from_timestamp(secs, 0).with_context(|| format!("Time out of range: {}", s))
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim().to_lowercase();

    let duration = if let Some(secs) = s.strip_suffix('s') {
        Duration::try_seconds(secs.parse()?)
    } else if let Some(minutes) = s.strip_suffix('m') {
        Duration::try_minutes(minutes.parse()?)
    } else if let Some(hours) = s.strip_suffix('h') {
        Duration::try_hours(hours.parse()?)
    } else if let Some(days) = s.strip_suffix('d') {
        Duration::try_days(days.parse()?)
    } else {
        bail!("Invalid duration format: {}. Use: 30s, 5m, 2h, 1d", s)
    };
    match duration {
        Some(duration) => Ok(duration),
        None => bail!("Duration out of range: {}", s),
    }
}

fn print_entries_table(entries: &[&Entry]) {
    if entries.is_empty() {
        println!("No entries match");
        return;
    }

    println!(
        "{:<23} {:<8} {:<20} {:<28} {}",
        "Date", "Level", "Process", "Subsystem", "Message"
    );
    println!("{}", "-".repeat(100));

    for entry in entries {
        let level = match entry.level {
            Some(level) => level.to_string(),
            None => entry.entry_type.to_string(),
        };
        println!(
            "{:<23} {:<8} {:<20} {:<28} {}",
            entry.date.format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            truncate(&entry.process, 20),
            truncate(entry.subsystem.as_deref().unwrap_or("-"), 28),
            entry.message.lines().next().unwrap_or("")
        );
    }
}

fn print_entries_csv(entries: &[&Entry]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record([
        "date",
        "type",
        "level",
        "process",
        "pid",
        "subsystem",
        "category",
        "activity_id",
        "message",
    ])?;

    for entry in entries {
        writer.write_record([
            entry.date.to_rfc3339(),
            entry.entry_type.to_string(),
            entry.level.map(|l| l.to_string()).unwrap_or_default(),
            entry.process.clone(),
            entry.pid.to_string(),
            entry.subsystem.clone().unwrap_or_default(),
            entry.category.clone().unwrap_or_default(),
            entry.activity_id.to_string(),
            entry.message.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_activity(activity: &Activity, depth: usize) {
    println!(
        "{}{} [{}] {} ({})",
        "  ".repeat(depth),
        activity.name,
        activity.id,
        activity.process,
        activity.date.format("%H:%M:%S%.3f")
    );
    for child in activity.children() {
        print_activity(child, depth + 1);
    }
}

fn print_counts(label: &str, counts: &[(&str, usize)]) {
    if counts.is_empty() {
        return;
    }
    println!();
    println!("{:<40} {:>10}", label, "Count");
    println!("{}", "-".repeat(51));
    for (name, count) in counts {
        println!("{:<40} {:>10}", truncate(name, 40), count);
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut cut: String = s.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}
