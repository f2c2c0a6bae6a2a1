pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::commands::price::PriceArgs;

#[derive(Debug, Parser)]
#[command(
    name = "clearview",
    about = "Clearview operator CLI",
    long_about = "Operate the Clearview quote backend: migrations, catalog seeding, config inspection, readiness checks, follow-up sweeps and ad-hoc pricing.",
    after_help = "Examples:\n  clearview doctor --json\n  clearview seed\n  clearview price --sqft 2400 --service \"Exterior Only Cleaning\" --stories 2 --addon \"Screen Cleaning\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the default service catalog and business settings (idempotent)")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, email transport, schema and service catalog readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run the incomplete-quote follow-up sweep once")]
    Followup,
    #[command(about = "Price a hypothetical quote against the current catalog and settings")]
    Price {
        #[arg(long = "sqft", help = "Home square footage")]
        square_footage: u32,
        #[arg(long, help = "Main service name, e.g. \"Exterior Only Cleaning\"")]
        service: String,
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        stories: u32,
        #[arg(long = "addon", help = "Add-on service name; repeat for several")]
        addons: Vec<String>,
        #[arg(long, help = "Apply the post-construction markup")]
        post_construction: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Followup => commands::followup::run(),
        Command::Price { square_footage, service, stories, addons, post_construction } => {
            commands::price::run(PriceArgs {
                square_footage,
                service,
                stories,
                addons,
                post_construction,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn price_accepts_repeated_addons() {
        let cli = Cli::try_parse_from([
            "clearview",
            "price",
            "--sqft",
            "2400",
            "--service",
            "Exterior Only Cleaning",
            "--addon",
            "Screen Cleaning",
            "--addon",
            "Track Cleaning",
            "--post-construction",
        ])
        .expect("price args should parse");

        match cli.command {
            Command::Price { square_footage, stories, addons, post_construction, .. } => {
                assert_eq!(square_footage, 2400);
                assert_eq!(stories, 1);
                assert_eq!(addons, vec!["Screen Cleaning", "Track Cleaning"]);
                assert!(post_construction);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn zero_stories_is_rejected() {
        let result = Cli::try_parse_from([
            "clearview",
            "price",
            "--sqft",
            "2400",
            "--service",
            "Exterior Only Cleaning",
            "--stories",
            "0",
        ]);
        assert!(result.is_err());
    }
}
