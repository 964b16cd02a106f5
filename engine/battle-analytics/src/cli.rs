//! # Command Line Interface
//!
//! Offline inspection of environment snapshots stored in a JSON fixture.

use crate::battle::{CategoryFilter, Rule, Stage, WeaponId};
use crate::candle::DAY_MS;
use crate::config::AnalyticsConfig;
use crate::coverage::TimeRange;
use crate::environment_store::{EnvironmentStore, SeasonSelector};
use crate::history::History;
use crate::partition::PartitionKey;
use crate::source::JsonFileSource;
use crate::statistics::to_zero_hour;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Battle analytics CLI
#[derive(Parser)]
#[command(name = "battle-analytics-cli")]
#[command(about = "Inspect battle environment snapshots from a JSON fixture")]
pub struct Cli {
    /// Snapshot fixture (JSON)
    #[arg(short, long, default_value = "./snapshots.json")]
    pub data: PathBuf,

    /// Analytics configuration (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Rule/stage/weapon restriction shared by the history commands
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    #[arg(long)]
    pub rule: Option<Rule>,
    #[arg(long)]
    pub stage: Option<Stage>,
    #[arg(long)]
    pub weapon: Option<String>,
}

impl From<&FilterArgs> for CategoryFilter {
    fn from(args: &FilterArgs) -> Self {
        CategoryFilter {
            rule: args.rule,
            stage: args.stage,
            weapon: args.weapon.as_deref().map(WeaponId::from),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List season snapshots
    Seasons {
        #[arg(long, default_value = "all|all")]
        partition: PartitionKey,
        /// `all`, `latest` or a season name
        #[arg(long, default_value = "all")]
        season: SeasonSelector,
    },
    /// Daily and cumulative battle counts
    Battles {
        #[arg(long, default_value = "all|all")]
        partition: PartitionKey,
        /// First day (YYYY-MM-DD, UTC)
        #[arg(long, value_parser = parse_date)]
        from: i64,
        /// Last day, inclusive
        #[arg(long, value_parser = parse_date)]
        to: i64,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Daily and cumulative weapon usage
    Usage {
        #[arg(long, default_value = "all|all")]
        partition: PartitionKey,
        #[arg(long, value_parser = parse_date)]
        from: i64,
        #[arg(long, value_parser = parse_date)]
        to: i64,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Latest season minus its most recent days
    DaysBefore {
        #[arg(long, default_value = "all|all")]
        partition: PartitionKey,
        #[arg(long, default_value = "7")]
        days: u32,
        /// Last day of the window; defaults to the season's latest battle date
        #[arg(long, value_parser = parse_date)]
        reference: Option<i64>,
    },
    /// Write the default configuration
    InitConfig {
        #[arg(long, default_value = "./battle-analytics.toml")]
        output: PathBuf,
    },
}

/// `YYYY-MM-DD` to epoch milliseconds at UTC midnight
pub fn parse_date(s: &str) -> std::result::Result<i64, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
        .map_err(|e| format!("invalid date {s:?}: {e}"))
}

fn format_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
        .map(|time| time.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// CLI handler
pub struct CliHandler {
    store: EnvironmentStore<JsonFileSource>,
    json: bool,
}

impl CliHandler {
    /// Create new CLI handler
    pub async fn new(cli: &Cli) -> Result<Self> {
        let config = match &cli.config {
            Some(path) => AnalyticsConfig::load_from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => AnalyticsConfig::default(),
        };
        let source = JsonFileSource::open(&cli.data)
            .await
            .with_context(|| format!("opening fixture {}", cli.data.display()))?;
        Ok(Self { store: EnvironmentStore::with_config(source, &config)?, json: cli.json })
    }

    /// Handle CLI commands
    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Seasons { partition, season } => self.show_seasons(partition, &season).await,
            Commands::Battles { partition, from, to, filter } => {
                let range = TimeRange::new(from, to + DAY_MS);
                self.store.fetch_daily_environments(partition, range).await?;
                let history = self.store.battle_count_history(range, partition, &CategoryFilter::from(&filter));
                self.print_history(&format!("Battles in {partition}"), &history)
            }
            Commands::Usage { partition, from, to, filter } => {
                let range = TimeRange::new(from, to + DAY_MS);
                self.store.fetch_daily_environments(partition, range).await?;
                let history = self.store.usage_count_history(range, partition, &CategoryFilter::from(&filter));
                self.print_history(&format!("Usage in {partition}"), &history)
            }
            Commands::DaysBefore { partition, days, reference } => {
                self.show_days_before(partition, days, reference).await
            }
            Commands::InitConfig { output } => {
                AnalyticsConfig::default().save_to_file(&output)?;
                println!("Wrote default configuration to {}", output.display());
                Ok(())
            }
        }
    }

    async fn show_seasons(&self, partition: PartitionKey, season: &SeasonSelector) -> Result<()> {
        self.store.fetch_season_environments(partition).await?;
        let seasons = self.store.get_season_environments(season, partition, true);
        if self.json {
            println!("{}", serde_json::to_string_pretty(&seasons)?);
            return Ok(());
        }

        println!("Seasons in {} ({})", partition, season);
        println!("{}", "=".repeat(50));
        if seasons.is_empty() {
            println!("No data found");
        }
        for env in &seasons {
            println!(
                "{:<24} {} .. {}  battles: {:>8}  weapons: {}",
                env.season_name,
                format_date(env.start_timestamp),
                format_date(env.end_timestamp),
                env.result_count,
                env.weapons.len()
            );
        }
        Ok(())
    }

    async fn show_days_before(&self, partition: PartitionKey, days: u32, reference: Option<i64>) -> Result<()> {
        let seasons = self.store.fetch_season_environments(partition).await?;
        let Some(latest) = seasons.last() else {
            println!("No seasons found for {}", partition);
            return Ok(());
        };

        let end = to_zero_hour(reference.unwrap_or(latest.latest_battle_date)) + DAY_MS;
        let start = end - i64::from(days) * DAY_MS;
        self.store.fetch_daily_environments(partition, TimeRange::new(start, end)).await?;

        let Some(delta) = self.store.season_environment_days_before(days, reference, partition) else {
            return Ok(());
        };
        if self.json {
            println!("{}", serde_json::to_string_pretty(&delta)?);
            return Ok(());
        }

        println!("{} without its last {} days ({})", delta.season_name, days, partition);
        println!("{}", "=".repeat(50));
        println!("Battles: {}", delta.result_count);
        let mut usage: Vec<(&WeaponId, u64)> = delta
            .weapons
            .keys()
            .map(|id| (id, delta.usage_count(&CategoryFilter::any().with_weapon(id.clone()))))
            .collect();
        usage.sort_by(|a, b| b.1.cmp(&a.1));
        for (weapon, count) in usage.into_iter().take(10) {
            println!("{:<24} {:>8}", weapon, count);
        }
        Ok(())
    }

    fn print_history(&self, title: &str, history: &History) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(history)?);
            return Ok(());
        }

        println!("{}", title);
        println!("{}", "=".repeat(50));
        if history.is_empty() {
            println!("No data found");
        }
        for (daily, total) in history.daily.iter().zip(&history.total) {
            println!("{}  {:>10}  {:>12}", format_date(daily.x), daily.y, total.y);
        }
        Ok(())
    }
}
