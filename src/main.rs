use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use pd_diary::config::AppConfig;
use pd_diary::date_range::{dimension_key, DateRangeCalculator};
use pd_diary::logging::init_logging;
use pd_diary::metric::MetricDescriptor;
use pd_diary::repository::{load_records, InMemoryRepository};
use pd_diary::session::{DiarySession, RefreshResult};
use pd_diary::{Direction, MetricType, TrendDirection, ViewMode};

/// pd-diary - Peritoneal dialysis diary analytics
///
/// Groups diary records into day, week or month views, classifies them
/// against clinical reference ranges and reports statistics and trends.
#[derive(Parser)]
#[command(name = "pd-diary")]
#[command(version)]
#[command(about = "Peritoneal dialysis diary analytics", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a record file for one metric and view
    Analyze {
        /// Record file (JSON or CSV)
        #[arg(short, long)]
        file: PathBuf,

        /// Metric (blood_pressure, weight, water_intake, urine_output, ultrafiltration)
        #[arg(short, long)]
        metric: MetricType,

        /// View mode (day, week, month)
        #[arg(long, default_value = "day")]
        view: ViewMode,

        /// Anchor date (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<String>,

        /// Pin "today" (YYYY-MM-DD)
        #[arg(long)]
        today: Option<String>,

        /// User whose records are analysed
        #[arg(short, long)]
        user: Option<String>,

        /// Show empty buckets too
        #[arg(long)]
        all: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the date range for a view and anchor
    Range {
        /// View mode (day, week, month)
        #[arg(long, default_value = "week")]
        view: ViewMode,

        /// Anchor date (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<String>,

        /// Periods to step back
        #[arg(long, default_value = "0")]
        prev: u32,

        /// Periods to step forward
        #[arg(long, default_value = "0")]
        next: u32,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct BucketRow {
    #[tabled(rename = "Bucket")]
    label: String,
    #[tabled(rename = "N")]
    count: usize,
    #[tabled(rename = "Total")]
    total: String,
    #[tabled(rename = "Mean")]
    mean: String,
    #[tabled(rename = "Min")]
    min: String,
    #[tabled(rename = "Max")]
    max: String,
    #[tabled(rename = "Abnormal")]
    abnormal: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path)?,
        None => AppConfig::load_or_default(),
    };

    let mut log_config = config.logging.clone();
    log_config.level = log_config.level.raised_by(cli.verbose);
    init_logging(&log_config)?;

    match cli.command {
        Commands::Analyze {
            file,
            metric,
            view,
            date,
            today,
            user,
            all,
            json,
        } => {
            let user = user.unwrap_or_else(|| config.settings.default_user.clone());
            let records = load_records(&file, &user)
                .with_context(|| format!("Failed to load records from {}", file.display()))?;

            let calculator = match today {
                Some(value) => {
                    DateRangeCalculator::with_today(DateRangeCalculator::new().resolve_anchor(&value))
                }
                None => DateRangeCalculator::new(),
            };
            let anchor = date
                .map(|value| calculator.resolve_anchor(&value))
                .unwrap_or_else(|| calculator.today());

            let repository = Arc::new(InMemoryRepository::with_records(records));
            let mut session = DiarySession::new(
                user,
                metric,
                repository,
                config.analytics.clone(),
                calculator,
            );
            let result = session.refresh(view, anchor).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result, metric, all);
            }
        }

        Commands::Range {
            view,
            date,
            prev,
            next,
        } => {
            let calculator = DateRangeCalculator::new();
            let anchor = date
                .map(|value| calculator.resolve_anchor(&value))
                .unwrap_or_else(|| calculator.today());

            let mut range = calculator.compute_range(view, anchor);
            for _ in 0..prev {
                range = calculator.navigate(&range, Direction::Prev);
            }
            for _ in 0..next {
                range = calculator.navigate(&range, Direction::Next);
            }

            println!("{}", "Date range".cyan().bold());
            println!("  Start:         {}", range.start);
            println!("  End:           {}", range.end);
            println!("  Expected days: {}", range.expected_days());
            println!("  Key:           {}", dimension_key(&range));
            if range.is_clamped() {
                println!("  {}", format!("Clamped to today ({})", calculator.today()).dimmed());
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Init { force } => {
                let path = cli.config.unwrap_or_else(AppConfig::default_config_path);
                if path.exists() && !force {
                    anyhow::bail!(
                        "Config file already exists: {} (use --force to overwrite)",
                        path.display()
                    );
                }
                let mut fresh = AppConfig::default();
                fresh.save_to_file(&path)?;
                println!("{} {}", "✓ Wrote".green(), path.display());
            }
        },
    }

    Ok(())
}

fn print_result(result: &RefreshResult, metric: MetricType, show_empty: bool) {
    let range = &result.range;
    println!(
        "{} {} to {}",
        format!("{} ({:?})", metric, range.view_mode).cyan().bold(),
        range.start,
        range.end
    );

    if let Some(error) = &result.error {
        println!("{} {}", "✗".red(), error.red());
        return;
    }

    let rows: Vec<BucketRow> = result
        .buckets
        .iter()
        .filter(|b| show_empty || !b.aggregate.is_empty())
        .map(|b| {
            let agg = &b.aggregate;
            let figure = |value: f64| {
                if agg.is_empty() {
                    "-".to_string()
                } else {
                    format!("{:.1}", value)
                }
            };
            BucketRow {
                label: b.label.clone(),
                count: agg.count,
                total: figure(agg.total),
                mean: figure(agg.mean),
                min: figure(agg.min),
                max: figure(agg.max),
                abnormal: agg.abnormal_count,
            }
        })
        .collect();

    if rows.is_empty() {
        println!("{}", "No records in this period".dimmed());
    } else {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    let meta = &result.metadata;
    let unit = metric.unit();
    println!();
    println!("  Records:   {}", meta.count);
    println!("  Mean:      {:.1} {}", meta.mean, unit);
    println!("  Range:     {:.1} - {:.1} {}", meta.min, meta.max, unit);
    println!("  Total:     {:.1} {}", meta.total, unit);
    println!("  CV:        {:.3}", meta.coefficient_of_variation);
    println!(
        "  Coverage:  {:.0}% ({}/{} days)",
        meta.coverage * 100.0,
        meta.distinct_days,
        meta.expected_days
    );

    for field in MetricDescriptor::for_metric(metric).secondary_fields {
        if let Some(mean) = meta.secondary_means.get(*field) {
            println!("  {:<10} {:.1}", format!("{}:", field), mean);
        }
    }

    let abnormal = format!("{}", meta.abnormal_count);
    println!(
        "  Abnormal:  {}",
        if meta.abnormal_count > 0 {
            abnormal.red().bold()
        } else {
            abnormal.green()
        }
    );
    if meta.daily_abnormal_count > 0 {
        println!(
            "  Days out of range: {}",
            meta.daily_abnormal_count.to_string().yellow()
        );
    }

    let direction = format!("{:?}", meta.trend.direction).to_lowercase();
    let direction = match meta.trend.direction {
        TrendDirection::Increasing => direction.yellow(),
        TrendDirection::Decreasing => direction.blue(),
        TrendDirection::Stable => direction.green(),
        TrendDirection::Fluctuating => direction.magenta(),
    };
    println!("  Trend:     {} ({:+.1}%)", direction, meta.trend.percentage);

    if !meta.category_counts.is_empty() {
        let counts: Vec<String> = meta
            .category_counts
            .iter()
            .map(|(label, n)| format!("{}: {}", label, n))
            .collect();
        println!("  Categories: {}", counts.join(", "));
    }
    if meta.server_merged {
        println!("  {}", "Includes server statistics".dimmed());
    }
}
