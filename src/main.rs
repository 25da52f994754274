//! CLI entry point for chrysalis-rs.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chrysalis_rs::{ChrysalisConfig, Result, Trainer};

#[derive(Parser)]
#[command(name = "chrysalis")]
#[command(about = "Encoder evaluation loop for GAN-inversion image encoders")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config: String,
    },
    /// Generate a sample configuration file
    Init {
        /// Output path for config file
        #[arg(default_value = "config.yaml")]
        output: String,
        /// Configuration preset (butterfly-128, butterfly-128-adv)
        #[arg(long, default_value = "butterfly-128")]
        preset: String,
    },
    /// Render side-by-side reconstructions for the evaluation samples
    Eval {
        /// Path to configuration file
        config: String,
    },
    /// Run a bounded encoder training pass, then snapshot
    Train {
        /// Path to configuration file
        config: String,
        /// Snapshot directory to resume generator/discriminator weights from
        #[arg(long)]
        resume: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing::info!("validating configuration: {}", config);
            let config = ChrysalisConfig::from_file(&config)?;
            config.validate()?;
            println!("✓ Configuration is valid");
            println!("  Run dir: {}", config.run_dir);
            println!("  Dataset: {}", config.dataset.path);
            println!("  Encoder: {}", config.encoder.arch.name());
            println!("  Resolution: {}", config.resolution);
        }
        Commands::Init { output, preset } => {
            tracing::info!("generating config for preset: {}", preset);
            let config = ChrysalisConfig::from_preset(&preset)?;
            config.to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
        Commands::Eval { config } => {
            tracing::info!("starting evaluation with config: {}", config);
            let config = ChrysalisConfig::from_file(&config)?;
            let mut trainer = Trainer::new(config)?;
            let artifacts = trainer.eval()?;
            println!("✓ Wrote {} comparison artifacts", artifacts.len());
            for path in artifacts {
                println!("  {}", path.display());
            }
        }
        Commands::Train { config, resume } => {
            tracing::info!("starting training pass with config: {}", config);
            let mut config = ChrysalisConfig::from_file(&config)?;
            if let Some(snapshot) = resume {
                config.resume = Some(snapshot);
            }
            let mut trainer = Trainer::new(config)?;
            trainer.train()?;
            println!("✓ Training pass complete");
        }
    }

    Ok(())
}
