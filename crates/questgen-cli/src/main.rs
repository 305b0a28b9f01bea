//! questgen CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "questgen",
    version,
    about = "Blueprint-driven test question generator"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the questions a blueprint is still missing
    Generate {
        /// Path to a .toml blueprint or a directory of blueprints
        #[arg(long)]
        blueprint: PathBuf,

        /// Provider name from the config (default: config's default_provider)
        #[arg(long)]
        provider: Option<String>,

        /// Generation model override
        #[arg(long)]
        model: Option<String>,

        /// Max concurrent lanes
        #[arg(long)]
        parallelism: Option<usize>,

        /// Attempts per question, first try included
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Cap on attempts across the whole run
        #[arg(long)]
        budget: Option<u32>,

        /// Output directory for run reports
        #[arg(long)]
        output: Option<PathBuf>,

        /// Report format: json, html, all
        #[arg(long, default_value = "json")]
        format: String,

        /// Exit with an error if any target is still unmet after the run
        #[arg(long)]
        fail_on_gaps: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show target, stored and missing counts per cell
    Gaps {
        #[arg(long)]
        blueprint: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the generation plan without calling any model
    Plan {
        #[arg(long)]
        blueprint: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate blueprint TOML files
    Validate {
        /// Path to blueprint file or directory
        #[arg(long)]
        blueprint: PathBuf,
    },

    /// List available models
    ListModels {
        /// Filter to specific provider
        #[arg(long)]
        provider: Option<String>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and example blueprint
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("questgen=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Generate {
            blueprint,
            provider,
            model,
            parallelism,
            max_attempts,
            budget,
            output,
            format,
            fail_on_gaps,
            config,
        } => {
            commands::generate::execute(commands::generate::GenerateArgs {
                blueprint,
                provider,
                model,
                parallelism,
                max_attempts,
                budget,
                output,
                format,
                fail_on_gaps,
                config,
            })
            .await
        }
        Commands::Gaps { blueprint, config } => commands::gaps::execute(blueprint, config).await,
        Commands::Plan { blueprint, config } => commands::plan::execute(blueprint, config).await,
        Commands::Validate { blueprint } => commands::validate::execute(blueprint),
        Commands::ListModels { provider, config } => {
            commands::list_models::execute(provider, config)
        }
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
