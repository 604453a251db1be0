//! Hockey game prediction CLI
//!
//! Builds leakage-free matchup datasets and trains chronologically
//! validated win-probability models.

use clap::{Parser, Subcommand};
use hockey::{Config, HockeyError, Result, SeasonId};

#[derive(Parser)]
#[command(name = "hockey")]
#[command(about = "Hockey game winner prediction with temporal-safe features", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, select, calibrate and evaluate a model
    Train {
        /// Team-game records (JSON array)
        #[arg(long)]
        data: String,
        /// Training season, e.g. 20212022 (repeatable)
        #[arg(long = "train-season", required = true)]
        train_seasons: Vec<SeasonId>,
        /// Validation season (defaults to the latest training season)
        #[arg(long = "val-season")]
        val_season: Option<SeasonId>,
        /// Held-out test season
        #[arg(long = "test-season")]
        test_season: SeasonId,
        /// Override the L2 penalty candidates (repeatable)
        #[arg(long = "l2")]
        l2: Vec<f64>,
        /// Override the season weight decay candidates (repeatable)
        #[arg(long = "decay")]
        decay: Vec<f64>,
        /// Directory for the model and report
        #[arg(long, default_value = "model")]
        output: String,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Build and save a matchup dataset
    Dataset {
        /// Team-game records (JSON array)
        #[arg(long)]
        data: String,
        /// Season to include (repeatable, all seasons if omitted)
        #[arg(long = "season")]
        seasons: Vec<SeasonId>,
        /// Output path
        #[arg(long)]
        output: String,
    },
    /// Generate a fabricated league in the ingestion format
    Synth {
        #[arg(long, default_value = "3")]
        seasons: usize,
        #[arg(long, default_value = "16")]
        teams: usize,
        /// Games per team per season
        #[arg(long, default_value = "60")]
        games: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
        #[arg(long)]
        output: String,
    },
    /// Write the default config
    Init,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use table or json.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Train {
            data,
            train_seasons,
            val_season,
            test_season,
            l2,
            decay,
            output,
            format,
        } => commands::train(
            config,
            &data,
            train_seasons,
            val_season,
            test_season,
            l2,
            decay,
            &output,
            format,
        ),
        Commands::Dataset {
            data,
            seasons,
            output,
        } => commands::dataset(&config, &data, &seasons, &output),
        Commands::Synth {
            seasons,
            teams,
            games,
            seed,
            output,
        } => commands::synth(seasons, teams, games, seed, &output),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &HockeyError) -> i32 {
    if error.is_data_integrity() {
        2
    } else {
        1
    }
}

mod commands {
    use super::*;
    use hockey::data::{load_records, DatasetBuilder, SyntheticLeague};
    use hockey::pipeline::PipelineContext;
    use hockey::training::EvaluationReport;
    use std::path::Path;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'hockey synth --output data/league.json' for a sample league");
        println!(
            "  3. Run 'hockey train --data data/league.json --train-season 20212022 \
             --train-season 20222023 --test-season 20232024'"
        );

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn train(
        mut config: Config,
        data: &str,
        train_seasons: Vec<SeasonId>,
        val_season: Option<SeasonId>,
        test_season: SeasonId,
        l2: Vec<f64>,
        decay: Vec<f64>,
        output: &str,
        format: OutputFormat,
    ) -> Result<()> {
        if !l2.is_empty() {
            config.training.regularization_candidates = l2;
        }
        if !decay.is_empty() {
            config.training.weight_decay_candidates = decay;
        }

        // Split is validated here, before anything is loaded or fitted
        let ctx = PipelineContext::from_seasons(config, train_seasons, val_season, test_season)?;
        let records = load_records(data)?;
        let run = ctx.run(&records)?;

        let dir = Path::new(output);
        std::fs::create_dir_all(dir)?;
        let model_path = dir.join("trained_model.json");
        let report_path = dir.join("evaluation_report.json");
        run.model.save(&model_path)?;
        std::fs::write(&report_path, serde_json::to_string_pretty(&run.report)?)?;
        log::info!(
            "Saved model {} to {} and report to {}",
            run.model.version,
            model_path.display(),
            report_path.display()
        );

        match format {
            OutputFormat::Table => print_report(&run.report, 15),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&run.report)?),
        }
        Ok(())
    }

    fn print_report(report: &EvaluationReport, top_features: usize) {
        println!("Model {} [{}]", report.model_version, report.candidate);
        for c in &report.candidates {
            match &c.validation {
                Some(v) => println!(
                    "  {:<40} val logloss {:.4} acc {:.2}%",
                    c.spec.to_string(),
                    v.log_loss,
                    v.accuracy * 100.0
                ),
                None => println!("  {:<40} {}", c.spec.to_string(), c.status),
            }
        }
        println!("\nValidation: {}", report.validation);
        println!("Test:       {}", report.test);
        println!("Test (raw): {}", report.test_uncalibrated);
        println!(
            "Threshold:  {:.2} (val {:.2}%, test {:.2}%)",
            report.threshold.threshold,
            report.threshold.validation_accuracy * 100.0,
            report.threshold.test_accuracy * 100.0
        );
        println!("Calibration: {}", report.calibration);

        println!("\nConfidence buckets (test):");
        for b in &report.confidence_buckets {
            let acc = b.accuracy.map_or("-".to_string(), |a| format!("{:.2}%", a * 100.0));
            println!("  {:.2}-{:.2}  n={:<5} acc {}", b.lower, b.upper, b.count, acc);
        }
        println!("\nTop {} features:", top_features);
        for f in report.feature_importance.iter().take(top_features) {
            println!("  {:<40} {:+.4}", f.feature, f.value);
        }
    }

    pub fn dataset(config: &Config, data: &str, seasons: &[SeasonId], output: &str) -> Result<()> {
        config.validate()?;
        let records = load_records(data)?;
        let dataset = DatasetBuilder::new(config).build(&records, seasons)?;
        dataset.save(output)?;
        println!(
            "Saved {} games x {} columns to {} (fingerprint {})",
            dataset.len(),
            dataset.n_features(),
            output,
            dataset.fingerprint
        );
        Ok(())
    }

    pub fn synth(seasons: usize, teams: usize, games: usize, seed: u64, output: &str) -> Result<()> {
        let league = SyntheticLeague::new(seasons, teams, games, seed);
        let records = league.generate()?;
        hockey::data::save_records(output, &records)?;
        println!("Wrote {} team-game records to {}", records.len(), output);
        Ok(())
    }
}
