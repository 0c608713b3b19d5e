//! Command-line driver for the search core: `search` runs a single
//! position to a node or time budget and prints the chosen move plus the
//! root's visit table; `bench` runs a fixed node budget and reports
//! throughput, matching the teacher's CLI's `run`/`bench` split.

use anyhow::{Context, Result};
use chess_position::Position;
use clap::{Parser, Subcommand};
use mcts_search::{Search, SearchConfig};
use nn_eval::MockEvaluator;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "search-cli", version, about = "NN-guided MCTS search core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search a FEN to a node and/or time budget and print the chosen move.
    Search {
        #[arg(long, default_value = "startpos")]
        fen: String,
        #[arg(long, default_value_t = 800)]
        nodes: u32,
        #[arg(long)]
        movetime_ms: Option<u64>,
        #[arg(long)]
        jitter_seed: Option<u64>,
    },
    /// Run a fixed node budget and report throughput.
    Bench {
        #[arg(long, default_value_t = 5_000)]
        nodes: u32,
    },
}

fn starting_or_fen(fen: &str) -> Result<Position> {
    if fen == "startpos" {
        Ok(Position::starting())
    } else {
        Position::from_fen(fen).context("parsing --fen")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Search {
            fen,
            nodes,
            movetime_ms,
            jitter_seed,
        } => {
            let position = starting_or_fen(&fen)?;
            let mut evaluator = MockEvaluator::deterministic_zero();
            if let Some(seed) = jitter_seed {
                evaluator = evaluator.with_jitter(seed);
            }
            let search = Search::new(SearchConfig::default(), position, Arc::new(evaluator))?;
            let budget = movetime_ms.map(Duration::from_millis);
            let outcome = search.run(nodes, budget).await?;

            tracing::info!(?outcome.stop_reason, nodes = outcome.nodes_evaluated, "search finished");
            match outcome.best_move {
                Some(mv) => println!("bestmove {mv:#06x}"),
                None => println!("bestmove none"),
            }
            for (slot, encoding, visits, q) in search.tree().root_child_stats() {
                println!("  slot={slot} move={encoding:#06x} visits={visits} q={q:.3}");
            }
        }
        Command::Bench { nodes } => {
            let search = Search::new(
                SearchConfig::default(),
                Position::starting(),
                Arc::new(MockEvaluator::deterministic_zero()),
            )?;
            let start = Instant::now();
            let outcome = search.run(nodes, None).await?;
            let elapsed = start.elapsed();
            let nps = outcome.nodes_evaluated as f64 / elapsed.as_secs_f64().max(1e-6);
            println!(
                "{} nodes in {:.3}s ({:.0} nodes/sec)",
                outcome.nodes_evaluated,
                elapsed.as_secs_f64(),
                nps
            );
        }
    }
    Ok(())
}
