use std::{sync::Mutex, time::Instant};

use thiserror::Error;

use crate::{
    move_gen::{generation::generate_all_moves, move_list::MoveList},
    position::{FenError, Position},
};

#[derive(Error, Debug)]
pub enum PerftError {
    #[error("Invalid FEN ({0}): {1}")]
    InvalidFen(String, FenError),
}

/// Runs a perft test on a position and prints a per-move node breakdown to the console. The root
/// moves can be distributed over several threads.
pub fn perft(fen: &str, depth: u32, threads: u32) -> Result<u64, PerftError> {
    let position = Position::new_from_fen(fen).map_err(|e| PerftError::InvalidFen(fen.to_string(), e))?;

    println!("Perft ({}) for position:\n\n{}\n", depth, position.to_compact_string());

    let start = Instant::now();
    let nodes = divide(&position, depth, threads.max(1));
    let duration = start.elapsed();

    println!("\nNodes: {}", nodes);
    println!("Time: {:.6}", duration.as_secs_f64());
    println!("Nodes per second: {:.0}", nodes as f64 / duration.as_secs_f64());

    Ok(nodes)
}

/// Counts the leaf nodes below each root move, printing every move with its count. The root
/// moves are handed out to worker threads from a shared queue.
fn divide(position: &Position, depth: u32, threads: u32) -> u64 {
    let mut moves = MoveList::new();
    generate_all_moves(position, &mut moves);
    let legal_moves: Vec<_> = moves.iter().filter(|mv| position.is_legal(*mv)).collect();

    let queue = Mutex::new(legal_moves.into_iter());
    let total = Mutex::new(0u64);

    std::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| loop {
                let Some(mv) = queue.lock().expect("The work queue is never poisoned").next() else {
                    break;
                };

                let mut position = position.clone();
                position.make(mv);
                let nodes = if depth <= 1 { 1 } else { recursive_perft(&mut position, depth - 1) };

                println!("{}\t{}", mv.to_uci_string(), nodes);
                *total.lock().expect("The total is never poisoned") += nodes;
            });
        }
    });

    total.into_inner().expect("The total is never poisoned")
}

/// Counts the leaf nodes of the move-generation tree at the given depth. Used by the tests to
/// validate the move generator against the known reference counts.
pub fn count_nodes(position: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    recursive_perft(position, depth)
}

fn recursive_perft(position: &mut Position, depth: u32) -> u64 {
    let mut moves = MoveList::new();
    generate_all_moves(position, &mut moves);

    if depth == 1 {
        return moves.iter().filter(|mv| position.is_legal(*mv)).count() as u64;
    }

    let mut nodes = 0;
    for mv in moves.iter() {
        if position.is_legal(mv) {
            position.make(mv);
            nodes += recursive_perft(position, depth - 1);
            position.unmake();
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctor::ctor;

    #[ctor]
    fn setup() {
        crate::initialize();
    }

    #[test]
    fn test_count_nodes_initial_position_shallow() {
        let mut position = Position::new();
        assert_eq!(count_nodes(&mut position, 1), 20);
        assert_eq!(count_nodes(&mut position, 2), 400);
        assert_eq!(count_nodes(&mut position, 3), 8_902);
    }

    #[test]
    fn test_divide_matches_count() {
        let position = Position::new();
        let mut counted = position.clone();
        assert_eq!(divide(&position, 3, 4), count_nodes(&mut counted, 3));
    }
}
