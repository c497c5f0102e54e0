//! FinOps Insights CLI
//!
//! A command-line tool for reading efficiency scores, recommendations,
//! anomalies and forecasts from the insights API.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{insights, service};

/// FinOps Insights CLI
#[derive(Parser, Debug)]
#[command(name = "finops")]
#[command(author, version, about = "CLI for the FinOps Insights API", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via FINOPS_API_URL env var)
    #[arg(long, env = "FINOPS_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table", global = true)]
    pub output: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show efficiency, waste and utilization per namespace
    Efficiency {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Show optimization recommendations
    Recommendations {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,

        /// Filter by type (rightsizing, add_cpu_limits, add_memory_limits, idle_pvc, idle_load_balancer)
        #[arg(long = "type", short = 't')]
        recommendation_type: Option<String>,

        /// Only recommendations open past the pending threshold
        #[arg(long)]
        pending_only: bool,
    },

    /// Show cost anomaly scores
    Anomalies {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,

        /// Hide anomalies scoring below this value (0-100)
        #[arg(long)]
        min_score: Option<f64>,
    },

    /// Show 30-day cost forecasts
    Forecasts {
        /// Filter by namespace
        #[arg(long, short)]
        namespace: Option<String>,
    },

    /// Trigger an immediate refresh cycle
    Refresh,

    /// Show service and upstream health
    Health,

    /// Show or change CLI defaults
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Save defaults to the config file
    Set {
        /// API endpoint URL
        #[arg(long)]
        url: Option<String>,

        /// Default namespace filter
        #[arg(long, short)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let api_url = config.resolve_api_url(cli.api_url.as_deref());
    let format = cli.output;

    let default_ns = |namespace: Option<String>| namespace.or_else(|| config.default_namespace.clone());

    let client = || client::ApiClient::new(&api_url);

    match cli.command {
        Commands::Efficiency { namespace } => {
            insights::show_efficiency(&client()?, default_ns(namespace), format).await?;
        }
        Commands::Recommendations {
            namespace,
            recommendation_type,
            pending_only,
        } => {
            insights::show_recommendations(
                &client()?,
                default_ns(namespace),
                recommendation_type,
                pending_only,
                format,
            )
            .await?;
        }
        Commands::Anomalies {
            namespace,
            min_score,
        } => {
            insights::show_anomalies(&client()?, default_ns(namespace), min_score, format).await?;
        }
        Commands::Forecasts { namespace } => {
            insights::show_forecasts(&client()?, default_ns(namespace), format).await?;
        }
        Commands::Refresh => service::refresh(&client()?, format).await?,
        Commands::Health => service::show_health(&client()?, format).await?,
        Commands::Config(ConfigCommands::Show) => {
            service::show_config(&config, &api_url, format)?;
        }
        Commands::Config(ConfigCommands::Set { url, namespace }) => {
            service::set_config(config.clone(), url, namespace)?;
        }
    }

    Ok(())
}
