use clap::{Parser, Subcommand};
use thiserror::Error;

use ferrite::{analyze::analyze, bench::bench, config, perft::perft, uci::run_uci};

#[derive(Error, Debug)]
enum FerriteError {
    #[error("Error during the perft command: {0}")]
    PerftError(#[from] ferrite::perft::PerftError),

    #[error("Error during the analyze command: {0}")]
    AnalyzeError(#[from] ferrite::analyze::AnalyzeError),

    #[error("Error reading the configuration: {0}")]
    ConfigError(#[from] ferrite::config::ConfigError),
}

/// Command-line interface of the ferrite chess engine. Without a subcommand the engine starts in
/// UCI mode, which is what a chess GUI expects when it launches the executable.
#[derive(Parser)]
#[command(
    name = "ferrite",
    version,
    about = "A UCI chess engine",
    subcommand_negates_reqs = true
)]
struct FerriteArgs {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Print precise numbers instead of human-readable approximations.
    #[arg(long, global = true)]
    precise: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Start the UCI protocol (the default command).
    Uci,

    /// Count the move-generation tree nodes of a position.
    Perft {
        /// The depth to count to.
        #[arg(short, long)]
        depth: u32,

        /// FEN string of the position to count from.
        #[arg(short, long, default_value = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1")]
        fen: String,

        /// The number of threads used for the count.
        #[arg(short, long)]
        threads: Option<u32>,
    },

    /// Search a position and print an analysis table.
    Analyze {
        /// The depth to search to, in plies.
        #[arg(short, long, default_value = "12")]
        depth: i16,

        /// FEN string of the position to analyze.
        #[arg(short, long, default_value = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1")]
        fen: String,
    },

    /// Run the fixed-position search benchmark.
    Bench,
}

fn run() -> Result<(), FerriteError> {
    ferrite::initialize();

    let args = FerriteArgs::parse();

    let perft_threads = match &args.command {
        Some(Commands::Perft { threads, .. }) => *threads,
        _ => None,
    };
    config::initialize(perft_threads, args.precise)?;

    match args.command.unwrap_or(Commands::Uci) {
        Commands::Uci => run_uci(),
        Commands::Perft { depth, fen, .. } => {
            perft(&fen, depth, config::get_config().perft_threads)?;
        }
        Commands::Analyze { depth, fen } => analyze(&fen, depth)?,
        Commands::Bench => bench(),
    }
    Ok(())
}

/// Main entry point of the ferrite chess engine.
fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
