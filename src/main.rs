//! Football market model pipeline
//!
//! Command-line entry point for training, promoting, serving and backtesting
//! market probability models.

use anyhow::Context;
use clap::{Parser, Subcommand};
use football_models::{
    backtest::WalkForwardBacktester,
    config::PipelineConfig,
    data::{SyntheticConfig, SyntheticGenerator},
    pipeline::TrainingPipeline,
    registry::ModelRegistry,
    types::{Dataset, DatasetFile, Market, ModelVersion},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "football-models")]
#[command(about = "Train, version and backtest football market probability models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrain markets and promote candidates that pass the gate
    Train {
        /// Dataset files (JSON), one market each
        #[arg(long)]
        data: Vec<String>,
        /// Markets to train on generated data instead
        #[arg(long)]
        synthetic: Vec<String>,
        /// Rows per generated dataset
        #[arg(long, default_value = "1000")]
        rows: usize,
    },
    /// Walk-forward backtest of one dataset
    Backtest {
        /// Dataset file (JSON)
        #[arg(long, conflicts_with = "synthetic")]
        data: Option<String>,
        /// Market to backtest on generated data
        #[arg(long)]
        synthetic: Option<String>,
        #[arg(long, default_value = "1000")]
        rows: usize,
        /// Write the full report here as JSON
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Promote a registered version to serving
    Promote {
        market: String,
        version: String,
    },
    /// Show the serving artifact and registered versions
    Serving {
        /// Limit to one market
        market: Option<String>,
    },
    /// Score one feature vector with the serving model
    Predict {
        market: String,
        /// Comma-separated values in schema order
        #[arg(long, value_delimiter = ',')]
        features: Vec<f64>,
    },
    /// Write a generated dataset file
    Synthetic {
        market: String,
        #[arg(long, default_value = "1000")]
        rows: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
        #[arg(short, long)]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(PipelineConfig::load(&cli.config)?);

    match cli.command {
        Commands::Train { data, synthetic, rows } => train(config, data, synthetic, rows).await,
        Commands::Backtest {
            data,
            synthetic,
            rows,
            output,
        } => backtest(config, data, synthetic, rows, output).await,
        Commands::Promote { market, version } => promote(config, &market, &version).await,
        Commands::Serving { market } => serving(config, market.as_deref()).await,
        Commands::Predict { market, features } => predict(config, &market, &features).await,
        Commands::Synthetic {
            market,
            rows,
            seed,
            output,
        } => write_synthetic(&market, rows, seed, &output).await,
    }
}

async fn load_dataset(path: &str) -> anyhow::Result<Dataset> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading dataset {}", path))?;
    let file: DatasetFile = serde_json::from_slice(&raw).with_context(|| format!("parsing dataset {}", path))?;
    Ok(file.into_dataset()?)
}

fn synthetic_dataset(market: &str, rows: usize) -> anyhow::Result<Dataset> {
    let market: Market = market.parse()?;
    Ok(SyntheticGenerator::new(SyntheticConfig {
        rows,
        ..Default::default()
    })
    .generate(market)?)
}

async fn train(
    config: Arc<PipelineConfig>,
    data: Vec<String>,
    synthetic: Vec<String>,
    rows: usize,
) -> anyhow::Result<()> {
    let mut datasets = Vec::new();
    for path in &data {
        datasets.push(load_dataset(path).await?);
    }
    for market in &synthetic {
        datasets.push(synthetic_dataset(market, rows)?);
    }
    if datasets.is_empty() {
        anyhow::bail!("nothing to train: pass --data or --synthetic");
    }

    let registry = Arc::new(ModelRegistry::open(&config.storage).await?);
    let pipeline = TrainingPipeline::new(config);

    let mut failed = 0;
    for (market, result) in pipeline.retrain_markets(registry, datasets).await {
        match result {
            Ok(outcome) => {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
            Err(e) => {
                failed += 1;
                tracing::error!(%market, error = %e, "Retrain failed");
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} market(s) failed to retrain", failed);
    }
    Ok(())
}

async fn backtest(
    config: Arc<PipelineConfig>,
    data: Option<String>,
    synthetic: Option<String>,
    rows: usize,
    output: Option<String>,
) -> anyhow::Result<()> {
    let dataset = match (data, synthetic) {
        (Some(path), _) => load_dataset(&path).await?,
        (None, Some(market)) => synthetic_dataset(&market, rows)?,
        (None, None) => anyhow::bail!("pass --data or --synthetic"),
    };

    let report = tokio::task::spawn_blocking(move || WalkForwardBacktester::new(config).run(&dataset)).await??;

    println!("\n📈 Walk-forward backtest: {}\n", report.market.display_name());
    println!("{:<6} {:<12} {:<12} {:>7} {:>9} {:>8} {:>6} {:>10}", "Window", "Train end", "Test end", "Rows", "LogLoss", "Brier", "Bets", "ROI");
    println!("{}", "-".repeat(78));
    for w in &report.windows {
        println!(
            "{:<6} {:<12} {:<12} {:>7} {:>9.4} {:>8.4} {:>6} {:>10}",
            w.window.index,
            w.window.train_end.format("%Y-%m-%d"),
            w.window.test_end.format("%Y-%m-%d"),
            w.test_rows,
            w.metrics.log_loss,
            w.metrics.brier_score,
            w.staking.bets,
            w.staking.roi.map_or("-".to_string(), |r| r.to_string()),
        );
    }
    for s in &report.skipped {
        println!("{:<6} skipped: {}", s.window.index, s.reason);
    }

    let summary = &report.summary;
    println!();
    if let Some(mean) = &summary.mean_metrics {
        println!("Mean: {}", mean);
    }
    println!(
        "Bets: {}  Wins: {}  Staked: {}  Return: {}  ROI: {}  Promotions: {}",
        summary.staking.bets,
        summary.staking.wins,
        summary.staking.total_staked,
        summary.staking.total_return,
        summary.staking.roi.map_or("-".to_string(), |r| r.to_string()),
        summary.promotions,
    );

    if let Some(path) = output {
        tokio::fs::write(&path, serde_json::to_vec_pretty(&report)?).await?;
        tracing::info!(path = %path, "Backtest report written");
    }
    Ok(())
}

async fn promote(config: Arc<PipelineConfig>, market: &str, version: &str) -> anyhow::Result<()> {
    let market: Market = market.parse()?;
    let version: ModelVersion = version.parse()?;

    let registry = ModelRegistry::open(&config.storage).await?;
    let artifact = registry.promote(market, version).await?;
    println!(
        "✅ {} now serving {} (test: {})",
        market, artifact.version, artifact.test_metrics
    );
    Ok(())
}

async fn serving(config: Arc<PipelineConfig>, market: Option<&str>) -> anyhow::Result<()> {
    let markets = match market {
        Some(name) => vec![name.parse::<Market>()?],
        None => Market::ALL.to_vec(),
    };
    let registry = ModelRegistry::open(&config.storage).await?;

    println!("\n📊 Model registry ({})\n", config.storage.path);
    for market in markets {
        let versions = registry.versions(market).await?;
        match registry.get_serving(market).await {
            Ok(artifact) => {
                println!("{:<10} serving {}  {}", market, artifact.version, artifact.test_metrics);
                println!(
                    "           trained {} → {}, families {:?}",
                    artifact.training_window.start.format("%Y-%m-%d"),
                    artifact.training_window.end.format("%Y-%m-%d"),
                    artifact.families()
                );
            }
            Err(football_models::PipelineError::NoServingModel(_)) => {
                println!("{:<10} no serving model", market);
            }
            Err(e) => return Err(e.into()),
        }
        if !versions.is_empty() {
            let listed: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
            println!("           registered: {}", listed.join(", "));
        }
    }
    Ok(())
}

async fn predict(config: Arc<PipelineConfig>, market: &str, features: &[f64]) -> anyhow::Result<()> {
    let market: Market = market.parse()?;
    let registry = ModelRegistry::open(&config.storage).await?;
    let model = registry.serving_model(market).await?;

    let prediction = model.predict(&market.default_schema(), features)?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

async fn write_synthetic(market: &str, rows: usize, seed: u64, output: &str) -> anyhow::Result<()> {
    let market: Market = market.parse()?;
    let dataset = SyntheticGenerator::new(SyntheticConfig {
        rows,
        seed,
        ..Default::default()
    })
    .generate(market)?;

    let schema = dataset.schema().clone();
    let records = dataset
        .rows()
        .iter()
        .map(|row| football_models::types::MatchRecord {
            match_id: row.match_id.clone(),
            timestamp: row.timestamp,
            features: schema.columns.iter().cloned().zip(row.features.iter().copied()).collect(),
            label: row.label,
            odds: row.odds,
        })
        .collect();

    let file = DatasetFile {
        market,
        schema,
        records,
    };
    tokio::fs::write(output, serde_json::to_vec_pretty(&file)?).await?;
    println!("Wrote {} {} matches to {}", rows, market, output);
    Ok(())
}
