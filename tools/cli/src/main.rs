//! # cake-cli
//!
//! Drives the scheduling engine on virtual time with synthetic traffic and
//! dumps structured stats, for exploring configurations without a kernel
//! or a network.

mod sim;

use clap::{Parser, Subcommand};
use cake_core::config::{CakeConfig, DiffservMode, FlowMode};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cake-cli", version, about = "CAKE scheduling engine simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a synthetic workload through the engine and print stats
    Run(RunArgs),
    /// Print the default configuration as TOML
    Defaults,
}

#[derive(clap::Args)]
struct RunArgs {
    /// TOML config file; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shaper rate in bytes per second (0 = unlimited)
    #[arg(long)]
    rate: Option<u64>,

    /// Classification mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Number of concurrent synthetic flows
    #[arg(long, default_value_t = 8)]
    flows: u16,

    /// Packets to push through the engine
    #[arg(long, default_value_t = 10_000)]
    packets: u64,

    /// Packet length in bytes
    #[arg(long, default_value_t = 1_500)]
    len: u32,

    /// Fraction of packets carrying a latency-sensitive codepoint, percent
    #[arg(long, default_value_t = 10)]
    priority_share: u8,

    /// Emit the final stats as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum ModeArg {
    Besteffort,
    Precedence,
    Diffserv8,
    Diffserv4,
}

impl From<ModeArg> for DiffservMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Besteffort => DiffservMode::BestEffort,
            ModeArg::Precedence => DiffservMode::Precedence,
            ModeArg::Diffserv8 => DiffservMode::Diffserv8,
            ModeArg::Diffserv4 => DiffservMode::Diffserv4,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    match Cli::parse().command {
        Command::Defaults => {
            let cfg = CakeConfig::default();
            match toml::to_string_pretty(&cfg) {
                Ok(s) => {
                    print!("{s}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("error: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Run(args) => match run(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        },
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = match &args.config {
        Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
        None => CakeConfig {
            diffserv_mode: DiffservMode::Diffserv4,
            flow_mode: FlowMode::Flows,
            ..Default::default()
        },
    };
    if let Some(rate) = args.rate {
        cfg.base_rate = rate;
    }
    if let Some(mode) = args.mode {
        cfg.diffserv_mode = mode.into();
    }

    let report = sim::run_workload(
        &cfg,
        sim::Workload {
            flows: args.flows.max(1),
            packets: args.packets,
            len: args.len,
            priority_share: args.priority_share.min(100),
        },
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.stats)?);
    } else {
        report.print_summary();
    }
    Ok(())
}
