//! Tessera CLI - dataset preprocessing for fine-tuning runs.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tessera_core::{ConfigOverride, PreprocessArgs, ProbeOutcome, RunConfig};
use tessera_data::{ChatTemplateType, LocalDatasetLoader, RaggedRows, TabularToJsonlConverter};
use tessera_hub::{HostEnvironment, HubWeightProbe};
use tessera_preprocess::{PreprocessOutcome, Preprocessor};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about = "Prepare datasets for fine-tuning runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the datasets named in a run configuration
    Preprocess {
        /// Path to the run configuration file (YAML)
        config: PathBuf,

        /// Also fetch the base model weights into the hub cache
        #[arg(long)]
        download: bool,

        /// Override a top-level config key, e.g. `--set rl=dpo`
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<ConfigOverride>,
    },

    /// Convert a CSV/TSV file to JSON Lines
    Convert {
        /// Tabular input file
        #[arg(short, long)]
        input: PathBuf,

        /// JSON Lines output file
        #[arg(short, long)]
        output: PathBuf,

        /// Pad short rows and truncate long ones instead of failing
        #[arg(long)]
        pad_ragged_rows: bool,
    },

    /// List the chat templates that can be registered
    Templates,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Preprocess {
            config,
            download,
            set,
        } => {
            run_preprocess(&config, download, &set).await?;
        }

        Commands::Convert {
            input,
            output,
            pad_ragged_rows,
        } => {
            let ragged_rows = if pad_ragged_rows {
                RaggedRows::Pad
            } else {
                RaggedRows::Reject
            };
            let report = TabularToJsonlConverter::new()
                .with_ragged_rows(ragged_rows)
                .convert(&input, &output)?;
            println!(
                "Wrote {} rows to {}",
                report.rows_written,
                report.target.display()
            );
        }

        Commands::Templates => {
            println!("Chat templates:");
            for kind in ChatTemplateType::ALL {
                println!("  {:<8} (eos: {})", kind.name(), kind.eos_token());
            }
        }
    }

    Ok(())
}

/// Run the preprocessing pipeline for a config file.
async fn run_preprocess(
    config_path: &Path,
    download: bool,
    overrides: &[ConfigOverride],
) -> anyhow::Result<()> {
    let mut config = RunConfig::from_yaml_file(config_path, overrides)?;
    tracing::info!(config = %config_path.display(), "Preprocessing datasets");

    let env = HostEnvironment::from_env();
    // A broken token source is reported by the environment check itself.
    let token = match config.hf_token.clone() {
        Some(token) => Some(token),
        None => env.discover_token().ok().flatten(),
    };

    let preprocessor = Preprocessor::new(
        LocalDatasetLoader::new(),
        HubWeightProbe::new().with_token(token),
        env,
    );
    let outcome = preprocessor
        .run(&mut config, &PreprocessArgs { download })
        .await?;

    print_summary(&outcome, &config);
    Ok(())
}

fn print_summary(outcome: &PreprocessOutcome, config: &RunConfig) {
    println!("Prepared dataset: {}", outcome.prepared.dir.display());
    println!(
        "  Records:  {} train, {} eval",
        outcome.prepared.num_train, outcome.prepared.num_eval
    );
    if let Some(report) = &outcome.converted {
        println!(
            "  Converted: {} ({} rows)",
            report.target.display(),
            report.rows_written
        );
    }
    if let Some(file) = config.active_dataset_file() {
        println!("  Active dataset file: {}", file.display());
    }
    match &outcome.probe {
        Some(ProbeOutcome::Resolved { path }) => println!("  Weights:  {}", path.display()),
        Some(ProbeOutcome::Unavailable { reason }) => {
            println!("  Weights:  unavailable ({})", reason)
        }
        None => {}
    }
    for warning in &outcome.warnings {
        println!("  Warning:  {}", warning);
    }
}
