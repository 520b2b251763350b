use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use urban_blue_zone::alerts::AlertProcessor;
use urban_blue_zone::cohorts::cohort_trends;
use urban_blue_zone::config::Settings;
use urban_blue_zone::db::{self, PgStore};
use urban_blue_zone::models::AggregationWindow;
use urban_blue_zone::notify::TracingSink;
use urban_blue_zone::pipeline::ScoringEngine;
use urban_blue_zone::report::{self, ReportInput};
use urban_blue_zone::store::{AlertStore, ResidentDirectory};

#[derive(Parser)]
#[command(name = "ubz")]
#[command(about = "Urban Blue Zone wellness scoring engine", long_about = None)]
struct Cli {
    /// TOML file with thresholds and scoring options
    #[arg(long, global = true, env = "UBZ_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import or update residents from a CSV file
    ImportResidents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import vital samples from a CSV file
    ImportVitals {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import habit check-ins from a CSV file
    ImportCheckIns {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Compute UBZI for every resident
    Score {
        #[arg(long, default_value = "daily")]
        window: String,
        #[arg(long)]
        cohort: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Evaluate recent samples and route alerts
    Alerts {
        #[arg(long, default_value_t = 60)]
        since_minutes: i64,
        #[arg(long)]
        cohort: Option<String>,
    },
    /// Show habit streaks for one resident
    Streaks {
        #[arg(long)]
        resident: String,
        #[arg(long)]
        days: Option<i64>,
    },
    /// Summarize cohorts and their trend against the previous window
    Cohorts {
        #[arg(long, default_value = "daily")]
        window: String,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value = "weekly")]
        window: String,
        #[arg(long)]
        cohort: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = Arc::new(PgStore::new(pool.clone()));
    let engine = ScoringEngine::new(store.clone(), store.clone(), settings.clone())?;
    let now = Utc::now();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::ImportResidents { csv } => {
            let upserted = db::import_residents(&pool, &csv).await?;
            println!("Upserted {upserted} residents from {}.", csv.display());
        }
        Commands::ImportVitals { csv } => {
            let inserted = db::import_vitals(&pool, &csv).await?;
            println!("Inserted {inserted} vital samples from {}.", csv.display());
        }
        Commands::ImportCheckIns { csv } => {
            let inserted = db::import_check_ins(&pool, &csv).await?;
            println!("Inserted {inserted} check-ins from {}.", csv.display());
        }
        Commands::Score {
            window,
            cohort,
            limit,
            json,
        } => {
            let window: AggregationWindow = window.parse()?;
            let roster = store.roster(cohort.as_deref()).await?;
            let population = engine.score_population(&roster, window, now).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&population.scores)?);
                return Ok(());
            }
            if population.scores.is_empty() {
                println!("No residents scored for this window.");
                return Ok(());
            }

            let mut ranked = population.scores.clone();
            ranked.sort_by(|a, b| b.ubzi.cmp(&a.ubzi));
            println!("Residents by UBZI ({} window):", window.as_str());
            for score in ranked.iter().take(limit) {
                println!(
                    "- {} UBZI {} ({} alerts, data quality {:.0}%)",
                    score.resident_id, score.ubzi, score.alert_count, score.data_quality
                );
            }
            if !population.skipped.is_empty() {
                println!("Skipped: {}", population.skipped.join(", "));
            }
        }
        Commands::Alerts {
            since_minutes,
            cohort,
        } => {
            let processor = AlertProcessor::new(
                store.clone(),
                store.clone(),
                Arc::new(TracingSink),
                settings.alerts.clone(),
            );
            let since = now - chrono::Duration::minutes(since_minutes.max(1));
            let roster = store.roster(cohort.as_deref()).await?;
            let sweep = engine.sweep_alerts(&processor, &roster, since, now).await;

            let emitted = sweep.emitted().count();
            println!(
                "Evaluated {} residents: {} alerts emitted, {} suppressed as duplicates.",
                sweep.evaluated,
                emitted,
                sweep.outcomes.len() - emitted
            );
            for outcome in sweep.emitted() {
                let channels: Vec<String> = outcome
                    .deliveries
                    .iter()
                    .map(|d| format!("{}={}", d.channel, if d.delivered { "ok" } else { "failed" }))
                    .collect();
                println!(
                    "- [{}] {}: {} [{}]",
                    outcome.alert.severity.as_str(),
                    outcome.alert.resident_id,
                    outcome.alert.details,
                    channels.join(", ")
                );
            }
            if !sweep.skipped.is_empty() {
                println!("Skipped: {}", sweep.skipped.join(", "));
            }
        }
        Commands::Streaks { resident, days } => {
            let Some(found) = store.resident(&resident).await? else {
                anyhow::bail!("unknown resident {resident}");
            };
            let streaks = engine.streaks(&found.resident_id, days, now).await?;
            println!("Streaks for {} ({}):", found.resident_id, found.name);
            for state in streaks.values() {
                println!(
                    "- {}: current {} days, best {} days",
                    state.habit,
                    state.current_as_of(now.date_naive()),
                    state.longest_streak
                );
            }
        }
        Commands::Cohorts { window, json } => {
            let window: AggregationWindow = window.parse()?;
            let roster = store.roster(None).await?;
            let (_, current) = engine.cohort_summaries(&roster, window, now).await;
            let previous_end = window.start_from(now);
            let (_, previous) = engine.cohort_summaries(&roster, window, previous_end).await;
            let trends = cohort_trends(&current, &previous, settings.cohorts.trend_threshold);

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "summaries": current,
                        "trends": trends,
                    }))?
                );
                return Ok(());
            }
            if current.is_empty() {
                println!("No cohorts with scored residents.");
                return Ok(());
            }
            for (summary, trend) in current.iter().zip(trends.iter()) {
                println!(
                    "- {}: {} residents, avg UBZI {} (min {}, max {}), {} alerts, data quality {}%, {:?}",
                    summary.cohort_id,
                    summary.resident_count,
                    summary.avg_ubzi,
                    summary.min_ubzi,
                    summary.max_ubzi,
                    summary.total_alerts,
                    summary.avg_data_quality,
                    trend.direction
                );
            }
        }
        Commands::Report {
            window,
            cohort,
            out,
        } => {
            let window: AggregationWindow = window.parse()?;
            let roster = store.roster(cohort.as_deref()).await?;
            let (population, summaries) = engine.cohort_summaries(&roster, window, now).await;
            let (_, previous) = engine
                .cohort_summaries(&roster, window, window.start_from(now))
                .await;
            let trends = cohort_trends(&summaries, &previous, settings.cohorts.trend_threshold);
            let alerts = store.alerts_since(None, window.start_from(now)).await?;

            let (streaks, streak_skipped) = engine.streak_board(&roster, now).await;
            let mut skipped = population.skipped.clone();
            skipped.extend(streak_skipped);
            skipped.sort();
            skipped.dedup();

            let report = report::build_report(&ReportInput {
                window,
                generated_at: now,
                summaries: &summaries,
                trends: &trends,
                scores: &population.scores,
                skipped: &skipped,
                alerts: &alerts,
                streaks: &streaks,
            });
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
