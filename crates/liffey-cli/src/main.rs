#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "liffey")]
#[command(author, version, about = "An experimental npm package installer", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs on stderr
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install the packages pinned by <DIRECTORY>/package-lock.json
    InstallLockfile {
        /// Project directory containing package-lock.json
        directory: PathBuf,
    },

    /// Resolve <DIRECTORY>/package.json, write a lockfile, and install it
    Install {
        /// Project directory containing package.json
        directory: PathBuf,
    },

    /// Run an installed bin script with forwarded stdio
    Run {
        /// Project directory containing node_modules
        directory: PathBuf,

        /// Script name under node_modules/.bin
        script: String,

        /// Arguments passed through to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if e.use_stderr() {
                // Usage errors exit 1, not clap's default 2.
                let _ = e.print();
                std::process::exit(1);
            }
            // --help and --version exit 0.
            e.exit();
        }
    };

    if cfg!(windows) {
        println!("Windows is not supported. Please use Linux or macOS.");
        std::process::exit(1);
    }

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::InstallLockfile { directory } => {
            commands::install::install_from_lockfile(&directory)
        }
        Commands::Install { directory } => commands::install::resolve_and_install(&directory),
        Commands::Run {
            directory,
            script,
            args,
        } => commands::run::run(&directory, &script, &args),
    }
}
