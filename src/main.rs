mod checksum;
mod cli;
mod common;
mod config;
mod decision;
mod engine;
mod error;
mod preserve;
mod provision;
mod repartition;
mod report;
mod retry;
mod table;
mod tools;
mod ui;
mod validate;

use clap::{CommandFactory, Parser, Subcommand};

use crate::cli::TargetArgs;
use crate::error::classify;
use crate::ui::prelude::*;

/// Reconcile a device's partition table with a desired layout, preserving data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format for log events
    #[arg(long, value_enum, default_value = "text", global = true)]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Repartition, reformat or resize, and restore data as needed
    Apply {
        #[command(flatten)]
        target: TargetArgs,
        /// Print the commands that would change the device instead of running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Compare the current and desired layouts without changing anything
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Validate the desired table against the device capacity
    Check {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    ui::init(cli.output, !cli.no_color);
    ui::set_debug_mode(cli.debug);

    let result = match cli.command {
        Commands::Apply { target, dry_run } => cli::handle_apply(target, dry_run),
        Commands::Plan { target } => cli::handle_plan(target),
        Commands::Check { target } => cli::handle_check(target),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "partfit", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        let (code, category) = match classify(&e) {
            Some(category) => (category.exit_code(), category.as_str()),
            None => (1, "general"),
        };
        emit(
            Level::Error,
            &format!("error.{category}"),
            &format!("Error: {:#}", e),
            None,
        );
        std::process::exit(code);
    }
}
