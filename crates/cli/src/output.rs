//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or the raw response as JSON
pub fn print_rows<T: Tabled, R: Serialize>(rows: &[T], raw: &R, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(raw),
    }
}

pub fn print_json<R: Serialize>(raw: &R) {
    match serde_json::to_string_pretty(raw) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to encode JSON: {}", e)),
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format currency
pub fn format_currency(amount: f64) -> String {
    format!("${:.2}", amount)
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Signed percentage, e.g. `+12.5%`
pub fn format_trend(value: f64) -> String {
    format!("{:+.1}%", value)
}

/// Human readable duration from seconds, e.g. `3d 4h`
pub fn format_age(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Color by severity or health status
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "completed" | "stable" => status.green().to_string(),
        "degraded" | "warning" | "warming" | "skipped" => status.yellow().to_string(),
        "unhealthy" | "critical" | "failed" => status.red().to_string(),
        "none" | "cold" => status.dimmed().to_string(),
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(0), "0m");
        assert_eq!(format_age(59 * 60), "59m");
        assert_eq!(format_age(3 * 3600 + 120), "3h 2m");
        assert_eq!(format_age(15 * 86_400 + 7200), "15d 2h");
        assert_eq!(format_age(-5), "0m");
    }

    #[test]
    fn test_format_numbers() {
        assert_eq!(format_currency(216.08), "$216.08");
        assert_eq!(format_percent(80.0), "80.0%");
        assert_eq!(format_trend(12.34), "+12.3%");
        assert_eq!(format_trend(-4.0), "-4.0%");
    }
}
