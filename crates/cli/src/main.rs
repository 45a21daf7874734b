use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "warden")]
#[command(version, about = "Warden access-control CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a model file
    Check {
        /// Path to the model .conf file
        model: PathBuf,
    },
    /// Decide a request against a model and rule file
    Enforce {
        /// Path to the model .conf file
        model: PathBuf,
        /// Path to the CSV rule file
        rules: PathBuf,
        /// Request values, in request-definition order
        request: Vec<String>,
    },
    /// List the rules matching a request, effects ignored
    Filter {
        /// Path to the model .conf file
        model: PathBuf,
        /// Path to the CSV rule file
        rules: PathBuf,
        /// Request values, in request-definition order
        request: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { model } => commands::check::run(&model)?,
        Commands::Enforce {
            model,
            rules,
            request,
        } => commands::enforce::run(&model, &rules, &request)?,
        Commands::Filter {
            model,
            rules,
            request,
        } => commands::enforce::filter(&model, &rules, &request)?,
    }

    Ok(())
}
