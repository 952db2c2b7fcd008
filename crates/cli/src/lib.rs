pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use repairdesk_core::config::{AppConfig, LoadOptions, LogFormat};
use repairdesk_core::{RepairType, UrgencyLevel};

#[derive(Debug, Parser)]
#[command(
    name = "repairdesk",
    about = "Repairdesk operator CLI",
    long_about = "Operate the repair booking store: migrations, demo data, config \
                  inspection, pricing rules and price quotes.",
    after_help = "Examples:\n  repairdesk migrate\n  repairdesk seed\n  \
                  repairdesk rules --active\n  \
                  repairdesk quote --device iphone-13 --repair-type screen_repair --urgency urgent"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo devices, technicians, and pricing rules")]
    Seed,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "List stored pricing rules, newest first")]
    Rules {
        #[arg(long, help = "Only show rules that are switched on")]
        active: bool,
    },
    #[command(about = "Resolve a price quote against the stored pricing rules")]
    Quote {
        #[arg(long, help = "Device model id, e.g. iphone-13")]
        device: String,
        #[arg(long, value_parser = parse_repair_type, help = "Repair type, e.g. screen_repair")]
        repair_type: RepairType,
        #[arg(long, value_parser = parse_urgency, default_value = "standard")]
        urgency: UrgencyLevel,
        #[arg(long, help = "Quote a bulk order of this many units")]
        quantity: Option<u32>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        if let Err(error) = init_logging(&config) {
            eprintln!("logging disabled: {error}");
        }
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Rules { active } => commands::rules::run(active),
        Command::Quote { device, repair_type, urgency, quantity } => {
            commands::quote::run(commands::quote::QuoteArgs {
                device,
                repair_type,
                urgency,
                quantity,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber. Logs go to stderr so stdout stays
/// machine-readable.
pub fn init_logging(config: &AppConfig) -> anyhow::Result<()> {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow::anyhow!(error))
}

fn parse_repair_type(value: &str) -> Result<RepairType, String> {
    RepairType::parse(value).ok_or_else(|| {
        let known = RepairType::ALL.iter().map(|kind| kind.as_str()).collect::<Vec<_>>();
        format!("unknown repair type `{value}` (expected one of {})", known.join(", "))
    })
}

fn parse_urgency(value: &str) -> Result<UrgencyLevel, String> {
    UrgencyLevel::parse(value)
        .ok_or_else(|| format!("unknown urgency `{value}` (expected standard|urgent|emergency)"))
}
