//! CLI frontend for the Transvolve entity-component-system engine.

mod commands;

use std::process;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "transvolve",
    about = "Transvolve: run demo worlds on the entity-component-system engine",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn decaying entities that perish, crumble, and revive
    Decay {
        /// Number of engine ticks to run
        #[arg(short, long, default_value = "200")]
        ticks: u64,

        /// Milliseconds between engine ticks
        #[arg(short, long, default_value = "16")]
        interval: u64,

        /// RNG seed for the damage and fate rolls
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Also print every entity entering or leaving a system
        #[arg(short, long)]
        verbose: bool,
    },

    /// Spawn wanderers that roam a three-dimensional grid
    Wander {
        /// Names of the wanderers to spawn
        #[arg(default_values_t = vec!["Joe".to_string()])]
        names: Vec<String>,

        /// Number of engine ticks to run
        #[arg(short, long, default_value = "200")]
        ticks: u64,

        /// Milliseconds between engine ticks
        #[arg(short, long, default_value = "16")]
        interval: u64,

        /// Milliseconds between two steps of a wanderer
        #[arg(long, default_value = "3000")]
        step: u64,

        /// RNG seed for the direction rolls
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Also print every entity entering or leaving a system
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Decay {
            ticks,
            interval,
            seed,
            verbose,
        } => commands::decay::run(ticks, interval, seed, verbose),
        Commands::Wander {
            names,
            ticks,
            interval,
            step,
            seed,
            verbose,
        } => commands::wander::run(&names, ticks, interval, step, seed, verbose),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}
