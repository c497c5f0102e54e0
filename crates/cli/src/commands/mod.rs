//! CLI command implementations

pub mod insights;
pub mod service;

use crate::client::Envelope;
use crate::output::print_warning;
use colored::Colorize;

/// Print the generation header shared by every insight listing
fn print_envelope_header<T>(envelope: &Envelope<T>) {
    let generated = envelope.generated_at.as_deref().unwrap_or("never");
    println!(
        "{} {}  {} {}",
        "Generation:".bold(),
        envelope.generation,
        "Generated:".bold(),
        generated.dimmed()
    );
    if envelope.stale {
        print_warning("Insights are stale; the last refresh is older than expected");
    }
}
