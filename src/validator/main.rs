//! Standalone validator for automation rules files.
//!
//! Checks a rules file offline, before it is imported with
//! `tg_autopilot --import-rules`.

use std::process::ExitCode;

use clap::Parser;

use tg_autopilot::automation::{RuleDraft, RuleKind};
use tg_autopilot::config::RulesFile;

/// Automation rules validator.
#[derive(Parser, Debug)]
#[command(name = "validate_rules")]
#[command(about = "Validates automation rules files for the Telegram autopilot")]
#[command(version)]
struct Args {
    /// Path to the JSON rules file to validate.
    #[arg(short, long, default_value = "rules.json")]
    file: String,

    /// Generate an example rules file at the specified path.
    #[arg(long)]
    generate_example: Option<String>,

    /// Show detailed information for each rule.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(output_path) = args.generate_example {
        return generate_example(&output_path);
    }

    validate_rules(&args.file, args.verbose)
}

fn generate_example(output_path: &str) -> ExitCode {
    let example = RulesFile::example();

    match example.save_to_file(output_path) {
        Ok(()) => {
            println!("✓ Example rules written to: {output_path}");
            println!("\nThe file contains {} example rules.", example.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Failed to write example file: {e}");
            ExitCode::FAILURE
        }
    }
}

fn validate_rules(path: &str, verbose: bool) -> ExitCode {
    println!("Validating: {path}\n");

    let file = match RulesFile::load_from_file(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("✗ Failed to load rules: {e}");
            return ExitCode::FAILURE;
        }
    };

    if verbose {
        for rule in &file.rules {
            println!("{}", describe(rule));
        }
        println!();
    }

    let errors = file.validate_all();
    for e in &errors {
        println!("  ✗ Error: {e}");
    }

    let total = file.len();
    let disabled = file.rules.iter().filter(|r| !r.enabled).count();

    if errors.is_empty() {
        println!("✓ All {total} rules are valid!");
        if disabled > 0 {
            println!("  ({disabled} rule(s) start disabled)");
        }
        ExitCode::SUCCESS
    } else {
        println!("\n✗ Validation failed: {} error(s) in {total} rules", errors.len());
        ExitCode::FAILURE
    }
}

/// One-line summary of a rule.
fn describe(rule: &RuleDraft) -> String {
    let scope = rule.account.as_deref().unwrap_or("all accounts");
    let detail = match &rule.kind {
        RuleKind::AutoReply(c) => format!(
            "{} trigger(s), {} action(s)",
            c.triggers.len(),
            c.actions.len()
        ),
        RuleKind::AutoForward(c) => format!("to {}", c.destination_chats.join(", ")),
        RuleKind::AutoPost(c) => format!("to {}: \"{}\"", c.channel_id, truncate(c.template(), 40)),
    };
    let state = if rule.enabled { "" } else { " (disabled)" };
    format!("[{}] \"{}\" for {scope}: {detail}{state}", rule.kind, rule.name)
}

/// Truncates a string for display.
fn truncate(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", chars[..max_len].iter().collect::<String>())
    }
}
