use std::{
    sync::{atomic::AtomicBool, Arc, Mutex},
    time::Duration,
};

use human_repr::{HumanCount, HumanDuration};
use terminal_size::{terminal_size, Height, Width};
use thiserror::Error;

use crate::{
    config::get_config,
    depth::Depth,
    position::{FenError, Position},
    r#move::Move,
    search::{ProgressCallback, ProgressType, Search, SearchStats},
    time::{TimeControl, TimeManager},
    tt::TranspositionTable,
};

/// Represents errors that can occur while analyzing a chess position.
#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Invalid FEN ({0}): {1}")]
    InvalidFen(String, FenError),
}

/// Analyzes a position to the given depth and prints a progress table to standard output.
pub fn analyze(fen: &str, depth: i16) -> Result<(), AnalyzeError> {
    let position = Position::new_from_fen(fen).map_err(|e| AnalyzeError::InvalidFen(fen.to_string(), e))?;

    println!("Analyzing position:\n\n{}\n\n{}\n", position.to_compact_string(), fen);
    print_header();

    let finished: Arc<Mutex<Option<(Duration, SearchStats)>>> = Arc::new(Mutex::new(None));
    let finished_clone = Arc::clone(&finished);

    let callback: ProgressCallback = Arc::new(move |progress| match progress {
        ProgressType::SearchFinished { elapsed, stats, .. } => {
            *finished_clone.lock().expect("The result slot is never poisoned") = Some((elapsed, stats));
        }
        progress => report_progress(progress),
    });

    let search = Search::new(
        position,
        Depth::from_plies(depth),
        TimeManager::new(TimeControl::Infinite),
        callback,
        Arc::new(TranspositionTable::new(TranspositionTable::DEFAULT_MB_SIZE)),
        Arc::new(AtomicBool::new(false)),
        false,
        None,
        None,
    );
    search.join();

    if let Some((elapsed, stats)) = finished.lock().expect("The result slot is never poisoned").take() {
        print_stats(elapsed, &stats);
    }

    Ok(())
}

//======================================================================================================================
// Table printing
//======================================================================================================================

const DEPTH_COLUMN_WIDTH: usize = 5;
const TIME_COLUMN_WIDTH: usize = 8;
const SCORE_COLUMN_WIDTH: usize = 6;
const NODES_COLUMN_WIDTH: usize = 6;
const EXTRA_SEPARATOR_CHAR_COUNT: usize = 16;

fn get_terminal_width() -> usize {
    if let Some((Width(width), Height(_))) = terminal_size() {
        width as usize
    } else {
        80
    }
}

fn get_pv_column_width(terminal_width: usize) -> usize {
    terminal_width
        .saturating_sub(DEPTH_COLUMN_WIDTH + TIME_COLUMN_WIDTH + SCORE_COLUMN_WIDTH + NODES_COLUMN_WIDTH)
        .saturating_sub(EXTRA_SEPARATOR_CHAR_COUNT)
        .max(20)
}

fn print_header() {
    let terminal_width = get_terminal_width();
    let pv_column_width = get_pv_column_width(terminal_width);

    println!(
        "┌─{:─<DEPTH_COLUMN_WIDTH$}─┬─{:─<TIME_COLUMN_WIDTH$}─┬─{:─<SCORE_COLUMN_WIDTH$}─┬─{:─<NODES_COLUMN_WIDTH$}─┬─{:─<pv_column_width$}─┐",
        "", "", "", "", ""
    );
    println!(
        "│ {:^DEPTH_COLUMN_WIDTH$} │ {:^TIME_COLUMN_WIDTH$} │ {:^SCORE_COLUMN_WIDTH$} │ {:^NODES_COLUMN_WIDTH$} │ {:<pv_column_width$} │",
        "Depth", "Time", "Score", "Nodes", "Principal Variation"
    );
    println!(
        "├─{:─<DEPTH_COLUMN_WIDTH$}─┼─{:─<TIME_COLUMN_WIDTH$}─┼─{:─<SCORE_COLUMN_WIDTH$}─┼─{:─<NODES_COLUMN_WIDTH$}─┼─{:─<pv_column_width$}─┤",
        "", "", "", "", ""
    );
}

/// Prints one table row per progress notification: completed iterations and late new best
/// moves each get a line; the current root move only updates the line in place.
fn report_progress(progress_type: ProgressType) {
    let terminal_width = get_terminal_width();
    let pv_column_width = get_pv_column_width(terminal_width);

    let (new_line, depth, depth_suffix, elapsed, score, nodes, pv_lines) = match progress_type {
        ProgressType::Iteration { depth, elapsed, score, nodes, pv, .. } => {
            (true, depth, "   ", elapsed, score.to_string(), nodes, get_pv_lines(&pv, pv_column_width))
        }

        ProgressType::NewBestMove { depth, elapsed, score, nodes, pv } => {
            (true, depth, "-> ", elapsed, score.to_string(), nodes, get_pv_lines(&pv, pv_column_width))
        }

        ProgressType::NewMoveAtRoot { depth, elapsed, nodes, move_number, move_count, mv } => (
            false,
            depth,
            "...",
            elapsed,
            format!("{}/{}", move_number, move_count),
            nodes,
            vec![format!("{} ({})", mv.to_uci_string(), (nodes as f64 / elapsed.as_secs_f64().max(0.001)).human_count("nps"))],
        ),

        ProgressType::SearchFinished { .. } => return,
    };

    print!("\r");
    print!(
        "│ {:>DEPTH_COLUMN_WIDTH$} │ {:>TIME_COLUMN_WIDTH$} │ {:>SCORE_COLUMN_WIDTH$} │ {:>NODES_COLUMN_WIDTH$} │ {:<pv_column_width$} │",
        depth.as_plies().to_string() + depth_suffix,
        elapsed.human_duration().to_string(),
        score,
        nodes.human_count_bare().to_string(),
        pv_lines.first().map_or("", String::as_str)
    );

    for line in pv_lines.iter().skip(1) {
        print!(
            "\n│ {:>DEPTH_COLUMN_WIDTH$} │ {:>TIME_COLUMN_WIDTH$} │ {:>SCORE_COLUMN_WIDTH$} │ {:>NODES_COLUMN_WIDTH$} │ {:<pv_column_width$} │",
            "", "", "", "", line
        );
    }

    if new_line {
        println!();
    }

    std::io::Write::flush(&mut std::io::stdout()).expect("Stdout is writable");
}

fn print_stats(elapsed: Duration, stats: &SearchStats) {
    let terminal_width = get_terminal_width();
    let pv_column_width = get_pv_column_width(terminal_width);

    println!(
        "├─{:─<DEPTH_COLUMN_WIDTH$}─┴─{:─<TIME_COLUMN_WIDTH$}─┴─{:─<SCORE_COLUMN_WIDTH$}─┴─{:─<NODES_COLUMN_WIDTH$}─┴─{:─<pv_column_width$}─┤",
        "", "", "", "", ""
    );

    let nps = stats.total_nodes() as f64 / elapsed.as_secs_f64().max(0.001);
    let stats_line = if get_config().precise {
        format!("time={} nodes={} qnodes={} nps={:.0}", elapsed.as_secs_f64(), stats.nodes, stats.qnodes, nps)
    } else {
        format!(
            "time={} nodes={} qnodes={} nps={}",
            elapsed.human_duration(),
            stats.nodes.human_count_bare(),
            stats.qnodes.human_count_bare(),
            nps.human_count_bare()
        )
    };

    for line in split_by_width(&stats_line, terminal_width.saturating_sub(4)) {
        println!("│ {:<width$} │", line, width = terminal_width.saturating_sub(4));
    }

    println!("└{:─<width$}┘", "", width = terminal_width.saturating_sub(2));
}

fn get_pv_lines(pv: &[Move], pv_column_width: usize) -> Vec<String> {
    let mut pv_str = String::new();
    for mv in pv {
        pv_str.push_str(&mv.to_uci_string());
        pv_str.push(' ');
    }
    split_by_width(pv_str.trim(), pv_column_width)
}

/// Splits text at word boundaries so no line exceeds the given width.
fn split_by_width(text: &str, max_width: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_line = String::new();
    let mut current_width = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if current_width > 0 && current_width + 1 + word_len > max_width {
            result.push(current_line);
            current_line = word.to_string();
            current_width = word_len;
        } else if current_width == 0 {
            current_line = word.to_string();
            current_width = word_len;
        } else {
            current_line.push(' ');
            current_line.push_str(word);
            current_width += 1 + word_len;
        }
    }

    if !current_line.is_empty() {
        result.push(current_line);
    }

    result
}
