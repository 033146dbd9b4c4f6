mod commands;

use clap::{Parser, Subcommand};
use commands::{doctor, routes, serve};

#[derive(Parser)]
#[command(name = "hangar", version, about = "Hangar — a self-hosted serverless function host")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the function host and serve it on `PORT`
    Serve,
    /// Check process configuration and the functions directory
    Doctor,
    /// List every loaded route and cron job
    Routes,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve => serve::run(),
        Commands::Doctor => doctor::run(),
        Commands::Routes => routes::run(),
    };

    if let Err(e) = result {
        eprintln!("{}", colored::Colorize::red(format!("Error: {e}").as_str()));
        std::process::exit(1);
    }
}
