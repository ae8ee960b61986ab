// Colored terminal output for extraction results.
//
// This module handles all terminal-specific formatting; main.rs display
// delegates here.

use colored::Colorize;

use super::truncate_chars;
use crate::pipeline::ExtractionResult;
use crate::strategy::StrategyOutput;

/// Display the final theme set with coherence scores and code previews.
pub fn display_result(result: &ExtractionResult) {
    if result.themes.is_empty() {
        println!("No themes extracted. See the skip records below for why.");
    } else {
        println!(
            "\n{}",
            format!("=== Themes ({}) ===", result.themes.len()).bold()
        );
        println!();

        for (i, theme) in result.themes.iter().enumerate() {
            let coherence = format!("coherence {:.2}", theme.coherence);
            let colored_coherence = if theme.coherence >= 0.7 {
                coherence.bright_green()
            } else if theme.coherence >= 0.5 {
                coherence.bright_yellow()
            } else {
                coherence.bright_blue()
            };

            println!(
                "  {:>2}. {:<44} {}  ({} codes, {} sources)",
                i + 1,
                theme.label.bold(),
                colored_coherence,
                theme.codes.len(),
                theme.source_ids.len(),
            );
            if !theme.description.is_empty() {
                println!("      {}", truncate_chars(&theme.description, 100).dimmed());
            }
            for code in theme.codes.iter().take(3) {
                println!(
                    "      - {}",
                    truncate_chars(&code.text, 90).dimmed()
                );
            }
            println!();
        }
    }

    let s = &result.summary;
    println!("{}", "=== Run summary ===".bold());
    println!(
        "  Sources: {} total, {} contributing",
        s.sources_total, s.sources_contributing
    );
    println!(
        "  Codes: {} extracted, {} skipped, coverage {:.0}%",
        s.codes_extracted,
        s.codes_skipped,
        s.coverage * 100.0
    );
    println!(
        "  Refinement: {} passes, {} merges, {} splits",
        s.refine_passes, s.refine_merges, s.refine_splits
    );
    println!("  Saturation: {:.0}%", s.saturation * 100.0);

    show_skipped(result);
}

/// Display per-theme selections derived by a pipeline strategy.
pub fn display_strategy(output: &StrategyOutput) {
    println!(
        "\n{}",
        format!("=== Strategy: {} ===", output.strategy).bold()
    );
    for selection in &output.selections {
        println!(
            "\n  {} ({} items)",
            selection.label.bold(),
            selection.items.len()
        );
        for item in &selection.items {
            println!(
                "    - {} {}",
                truncate_chars(&item.text, 80),
                format!("[{}]", item.source_id).dimmed()
            );
        }
    }
}

fn show_skipped(result: &ExtractionResult) {
    if !result.skipped.is_empty() {
        println!("\n{}", format!("=== Skipped ({}) ===", result.skipped.len()).bold());
        for skip in result.skipped.iter().take(10) {
            let detail = skip
                .code_text
                .as_deref()
                .map(|t| format!(" \"{}\"", truncate_chars(t, 60)))
                .unwrap_or_default();
            println!(
                "  {} {}{}: {}",
                "~".yellow(),
                skip.source_id,
                detail.dimmed(),
                skip.reason
            );
        }
        if result.skipped.len() > 10 {
            println!("  ... and {} more", result.skipped.len() - 10);
        }
    }
}
