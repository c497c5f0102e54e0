//! Service health, refresh and local configuration commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, RefreshOutcome};
use crate::config::Config;
use crate::output::{
    color_status, format_age, print_error, print_info, print_json, print_rows, print_success,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show service and upstream health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_status, report) = client.health().await?;

    let rows: Vec<ComponentRow> = report
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(&component.status),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect();

    if format == OutputFormat::Table {
        println!("{} {}", "Service:".bold(), color_status(&report.status));
        if let Some(generation) = report.snapshot_generation {
            let age = report
                .snapshot_age_seconds
                .map(format_age)
                .unwrap_or_else(|| "never".to_string());
            println!("{} {} ({} old)", "Snapshot:".bold(), generation, age);
        }
    }
    print_rows(&rows, &report, format);

    Ok(())
}

/// Force a refresh cycle
pub async fn refresh(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let outcome = client.refresh().await?;

    if format == OutputFormat::Json {
        print_json(&outcome);
        return Ok(());
    }

    match &outcome {
        RefreshOutcome::Completed {
            generation,
            duration_ms,
            degraded_sources,
            ..
        } => {
            print_success(&format!(
                "Published generation {} in {}ms",
                generation, duration_ms
            ));
            if !degraded_sources.is_empty() {
                print_warning(&format!(
                    "Degraded sources: {}",
                    degraded_sources.join(", ")
                ));
            }
        }
        RefreshOutcome::Skipped => {
            print_info("A refresh is already running; nothing to do");
        }
        RefreshOutcome::Failed { reason } => {
            print_error(&format!("Refresh failed: {}", reason));
        }
    }

    Ok(())
}

/// Print the effective CLI configuration
pub fn show_config(config: &Config, api_url: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Table => {
            if let Ok(path) = Config::config_path() {
                println!("{} {}", "Config file:".bold(), path.display());
            }
            println!("{} {}", "API URL:".bold(), api_url.cyan());
            println!(
                "{} {}",
                "Default namespace:".bold(),
                config.default_namespace.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

/// Persist CLI defaults
pub fn set_config(
    mut config: Config,
    api_url: Option<String>,
    namespace: Option<String>,
) -> Result<()> {
    if api_url.is_none() && namespace.is_none() {
        print_warning("Nothing to change; pass --url or --namespace");
        return Ok(());
    }
    if let Some(url) = api_url {
        url::Url::parse(&url)?;
        config.api_url = Some(url);
    }
    if namespace.is_some() {
        config.default_namespace = namespace;
    }

    let path = config.save()?;
    print_success(&format!("Saved {}", path.display()));
    Ok(())
}
