use std::{
    io::{self, BufRead},
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use regex::Regex;
use thiserror::Error;

use crate::{
    book::{NullBook, OpeningBook},
    config::get_config,
    depth::Depth,
    eval::{Eval, KingSafetyCurve},
    notation::parse_coordinate_notation,
    options::{Options, ReadOnlyOptions},
    piece::Color,
    position::Position,
    r#move::Move,
    search::{ProgressCallback, ProgressType, Search},
    time::{TimeControl, TimeManager},
    tt::TranspositionTable,
};

/// Entry point of the UCI (Universal Chess Interface) protocol: processes commands from standard
/// input until a "quit" command is received.
pub fn run_uci() {
    let engine = UciEngine::new(TranspositionTable::DEFAULT_MB_SIZE);
    let uci = Uci::new(engine);
    uci.run();
}

/// Error types that can occur during UCI command handling. Each is reported to the GUI as an
/// info string; the engine keeps running with its previous state.
#[derive(Error, Debug)]
enum UciError {
    /// The "position" command has invalid syntax or arguments.
    #[error("Invalid position command: {0}")]
    InvalidPositionCommand(String),

    /// A provided FEN string does not represent a valid chess position.
    #[error("Invalid FEN string: {0}")]
    InvalidFenString(String),

    /// A move string cannot be parsed or is illegal in the current position.
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// An invalid value was provided for a UCI option.
    #[error("Invalid option value for {option_name}: {value}")]
    InvalidOptionValue { option_name: String, value: String },

    /// An unexpected token was encountered during command parsing.
    #[error("Invalid token: {token}, expected: {expected}")]
    InvalidToken { token: String, expected: &'static str },
}

/// The types of options a UCI engine can expose to the GUI.
enum UciOptionType {
    /// A boolean option; the value is the default.
    Check(bool),

    /// A numeric option with a default and an allowed range.
    Spin { default: i64, min: i64, max: i64 },

    /// A selection among a fixed list of values.
    Combo { default: String, values: Vec<String> },

    /// An action without a value.
    Button,

    /// A free-form text option; the value is the default.
    String(String),
}

/// Handles the UCI protocol communication between a chess GUI and the engine: translates
/// protocol commands into engine operations and formats the engine's responses.
struct Uci {
    engine: UciEngine,
}

impl Uci {
    fn new(engine: UciEngine) -> Self {
        Uci { engine }
    }

    /// The main command loop: reads lines from standard input, dispatches them, and reports any
    /// error through an info string. Unknown commands are reported and skipped, as the protocol
    /// requires.
    fn run(mut self) {
        let mut stdin = io::stdin().lock();

        let mut input = String::new();
        loop {
            input.clear();
            if stdin.read_line(&mut input).unwrap_or(0) == 0 {
                break;
            }
            let tokens: Vec<&str> = input.split_whitespace().collect();
            let result = match tokens.first() {
                Some(&"uci") => self.handle_uci(),
                Some(&"isready") => self.handle_isready(),
                Some(&"ucinewgame") => self.handle_ucinewgame(),
                Some(&"setoption") => self.handle_setoption(tokens.as_slice()),
                Some(&"position") => self.handle_position(tokens.as_slice()),
                Some(&"go") => self.handle_go(tokens.as_slice()),
                Some(&"stop") => self.handle_stop(),
                Some(&"ponderhit") => self.handle_ponderhit(),
                Some(&"quit") => break,
                Some(&command) => {
                    Self::send_unknown_command(command);
                    Ok(())
                }
                None => Ok(()),
            };

            if let Err(e) = result {
                Self::send_info_string(&e.to_string());
            }
        }

        self.engine.shutdown();
    }

    //==================================================================================================================
    // UCI commands from the GUI to the engine
    //==================================================================================================================

    fn handle_uci(&mut self) -> Result<(), UciError> {
        self.engine.handle_uci()
    }

    fn handle_isready(&mut self) -> Result<(), UciError> {
        self.engine.handle_isready()
    }

    fn handle_ucinewgame(&mut self) -> Result<(), UciError> {
        self.engine.handle_ucinewgame()
    }

    /// Parses "setoption name <name> [value <value>]". Both the name and the value can span
    /// several tokens.
    fn handle_setoption(&mut self, tokens: &[&str]) -> Result<(), UciError> {
        debug_assert!(tokens.first() == Some(&"setoption"));

        let mut name_tokens: Vec<&str> = Vec::new();
        let mut value_tokens: Vec<&str> = Vec::new();
        let mut in_value = false;
        for token in &tokens[1..] {
            match *token {
                "name" if !in_value => {}
                "value" => in_value = true,
                token if in_value => value_tokens.push(token),
                token => name_tokens.push(token),
            }
        }

        self.engine.handle_setoption(&name_tokens.join(" "), &value_tokens.join(" "))
    }

    /// Parses "position [startpos|fen <FEN>] [moves <m1> ...]" and hands the resulting position
    /// to the engine.
    fn handle_position(&mut self, tokens: &[&str]) -> Result<(), UciError> {
        debug_assert!(tokens.first() == Some(&"position"));

        let mut next_token_index = 1;

        if tokens.len() < 2 {
            return Err(UciError::InvalidPositionCommand("No arguments provided".to_string()));
        }

        let fen: String = match tokens[next_token_index] {
            "startpos" => {
                const DEFAULT_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
                next_token_index += 1;
                DEFAULT_FEN.to_string()
            }
            "fen" => {
                next_token_index += 1;
                let fen_end = tokens[next_token_index..]
                    .iter()
                    .position(|token| *token == "moves")
                    .map_or(tokens.len(), |position| next_token_index + position);
                let fen = tokens[next_token_index..fen_end].join(" ");
                next_token_index = fen_end;
                fen
            }
            _ => {
                return Err(UciError::InvalidPositionCommand(tokens[next_token_index].to_string()));
            }
        };

        let mut moves = Vec::new();
        if next_token_index < tokens.len() && tokens[next_token_index] == "moves" {
            moves = tokens[next_token_index + 1..].to_vec();
        }

        self.engine.handle_position(fen, &moves)
    }

    /// Extracts the move tokens following "searchmoves".
    fn read_search_moves(tokens: &[&str]) -> Vec<String> {
        let re = Regex::new(r"^([a-h][1-8]){2}[qrbn]?$").expect("The regex is valid");
        tokens.iter().take_while(|mv_str| re.is_match(mv_str)).map(|str| str.to_string()).collect()
    }

    fn parse_millis(tokens: &[&str], index: usize, expected: &'static str) -> Result<Duration, UciError> {
        let token = tokens.get(index).copied().unwrap_or("");
        token
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| UciError::InvalidToken { token: token.to_string(), expected })
    }

    fn parse_number<T: std::str::FromStr>(
        tokens: &[&str],
        index: usize,
        expected: &'static str,
    ) -> Result<T, UciError> {
        let token = tokens.get(index).copied().unwrap_or("");
        token.parse::<T>().map_err(|_| UciError::InvalidToken { token: token.to_string(), expected })
    }

    /// Parses the parameters of the "go" command and starts the search.
    fn handle_go(&mut self, tokens: &[&str]) -> Result<(), UciError> {
        debug_assert!(tokens.first() == Some(&"go"));

        let mut search_moves: Option<Vec<String>> = None;
        let mut ponder = false;
        let mut white_time: Option<Duration> = None;
        let mut black_time: Option<Duration> = None;
        let mut white_inc: Option<Duration> = None;
        let mut black_inc: Option<Duration> = None;
        let mut moves_to_go: Option<u16> = None;
        let mut depth: Option<i16> = None;
        let mut nodes: Option<u64> = None;
        let mut move_time: Option<Duration> = None;
        let mut infinite = false;

        let mut next_token_index = 1;
        while next_token_index < tokens.len() {
            match tokens[next_token_index] {
                "ponder" => {
                    ponder = true;
                    next_token_index += 1;
                }
                "infinite" => {
                    infinite = true;
                    next_token_index += 1;
                }
                "wtime" => {
                    white_time = Some(Self::parse_millis(tokens, next_token_index + 1, "wtime in milliseconds")?);
                    next_token_index += 2;
                }
                "btime" => {
                    black_time = Some(Self::parse_millis(tokens, next_token_index + 1, "btime in milliseconds")?);
                    next_token_index += 2;
                }
                "winc" => {
                    white_inc = Some(Self::parse_millis(tokens, next_token_index + 1, "winc in milliseconds")?);
                    next_token_index += 2;
                }
                "binc" => {
                    black_inc = Some(Self::parse_millis(tokens, next_token_index + 1, "binc in milliseconds")?);
                    next_token_index += 2;
                }
                "movetime" => {
                    move_time = Some(Self::parse_millis(tokens, next_token_index + 1, "movetime in milliseconds")?);
                    next_token_index += 2;
                }
                "movestogo" => {
                    moves_to_go = Some(Self::parse_number(tokens, next_token_index + 1, "movestogo as an integer")?);
                    next_token_index += 2;
                }
                "depth" => {
                    depth = Some(Self::parse_number(tokens, next_token_index + 1, "depth as an integer")?);
                    next_token_index += 2;
                }
                "nodes" => {
                    nodes = Some(Self::parse_number(tokens, next_token_index + 1, "nodes as an integer")?);
                    next_token_index += 2;
                }
                "mate" => {
                    // Accepted for protocol completeness; the regular mate-aware search applies.
                    let _: u16 = Self::parse_number(tokens, next_token_index + 1, "mate as an integer")?;
                    next_token_index += 2;
                }
                "searchmoves" => {
                    let moves = Self::read_search_moves(&tokens[next_token_index + 1..]);
                    next_token_index += moves.len() + 1;
                    search_moves = Some(moves);
                }
                _ => {
                    return Err(UciError::InvalidToken {
                        token: tokens[next_token_index].to_string(),
                        expected: "a go parameter",
                    });
                }
            }
        }

        self.engine.handle_go(
            search_moves,
            ponder,
            white_time,
            black_time,
            white_inc,
            black_inc,
            moves_to_go,
            depth,
            nodes,
            move_time,
            infinite,
        )
    }

    fn handle_stop(&mut self) -> Result<(), UciError> {
        self.engine.handle_stop()
    }

    fn handle_ponderhit(&mut self) -> Result<(), UciError> {
        self.engine.handle_ponderhit()
    }

    //==================================================================================================================
    // UCI messages from the engine to the GUI
    //==================================================================================================================

    fn send_id(id_type: &str, value: &str) {
        println!("id {} {}", id_type, value);
    }

    fn send_option(name: &str, option_type: UciOptionType) {
        match option_type {
            UciOptionType::Check(default) => println!("option name {name} type check default {default}"),
            UciOptionType::Spin { default, min, max } => {
                println!("option name {name} type spin default {default} min {min} max {max}")
            }
            UciOptionType::Combo { default, values } => {
                let values_str = values.join(" var ");
                println!("option name {name} type combo default {default} var {values_str}")
            }
            UciOptionType::Button => println!("option name {name} type button"),
            UciOptionType::String(default) => println!(
                "option name {name} type string default {}",
                if default.is_empty() { String::from("<empty>") } else { default }
            ),
        }
    }

    fn send_uciok() {
        println!("uciok");
    }

    fn send_readyok() {
        println!("readyok");
    }

    fn send_unknown_command(command: &str) {
        println!("Unknown command: {}", command);
    }

    fn send_info_string(info: &str) {
        println!("info string {}", info);
    }

    fn send_bestmove(best_move: &str, ponder: Option<&str>) {
        print!("bestmove {best_move}");
        if let Some(ponder) = ponder {
            print!(" ponder {ponder}");
        }
        println!();
    }

    /// Formats and sends an "info" line with the search progress: depth, seldepth, time, nodes,
    /// nps, hashfull, score (in centipawns or moves to mate) and the principal variation.
    #[allow(clippy::too_many_arguments)]
    fn send_info(
        depth: Depth,
        seldepth: Option<u16>,
        elapsed: Duration,
        nodes: u64,
        score: Eval,
        hashfull: Option<u16>,
        pv: &[Move],
    ) {
        let mut line = format!("info depth {}", depth.as_plies());
        if let Some(seldepth) = seldepth {
            line.push_str(&format!(" seldepth {}", seldepth));
        }
        line.push_str(&format!(" time {} nodes {}", elapsed.as_millis(), nodes));

        let elapsed_secs = elapsed.as_secs_f64();
        if elapsed_secs > 0.0 {
            line.push_str(&format!(" nps {:.0}", nodes as f64 / elapsed_secs));
        }

        if let Some(hashfull) = hashfull {
            line.push_str(&format!(" hashfull {}", hashfull));
        }

        if score.is_mate() {
            let plies = score.mate_distance() as i32;
            let moves = (plies + 1) / 2;
            line.push_str(&format!(" score mate {}", if score > Eval::ZERO { moves } else { -moves }));
        } else {
            line.push_str(&format!(" score cp {}", i16::from(score)));
        }

        if !pv.is_empty() {
            line.push_str(" pv");
            for mv in pv {
                line.push(' ');
                line.push_str(&mv.to_uci_string());
            }
        }

        println!("{}", line);
    }
}

/// The engine side of the protocol: the current position, the shared transposition table and
/// the running search, if any.
struct UciEngine {
    position: Position,
    search: Option<Search>,
    transposition_table: Arc<TranspositionTable>,
    book: Box<dyn OpeningBook>,
}

impl UciEngine {
    fn new(tt_size: usize) -> Self {
        UciEngine {
            position: Position::new(),
            search: None,
            transposition_table: Arc::new(TranspositionTable::new(tt_size)),
            book: Box::new(NullBook),
        }
    }

    /// Translates search progress notifications into UCI output. Periodic progress is throttled
    /// so fast shallow iterations do not flood the GUI.
    fn report_progress(transposition_table: &TranspositionTable, progress_type: ProgressType) {
        match progress_type {
            ProgressType::Iteration { depth, seldepth, elapsed, score, nodes, pv } => {
                Uci::send_info(depth, Some(seldepth), elapsed, nodes, score, Some(transposition_table.hashfull()), &pv);
            }
            ProgressType::NewBestMove { depth, elapsed, score, nodes, pv } => {
                if elapsed > Duration::from_millis(1000) {
                    Uci::send_info(depth, None, elapsed, nodes, score, None, &pv);
                }
            }
            ProgressType::SearchFinished { mv, ponder, .. } => {
                match mv {
                    Some(mv) => Uci::send_bestmove(
                        &mv.to_uci_string(),
                        ponder.map(|mv| mv.to_uci_string()).as_deref(),
                    ),
                    // No legal move: the protocol still demands a bestmove line.
                    None => Uci::send_bestmove("0000", None),
                }
            }
            _ => {}
        }
    }

    //==================================================================================================================
    // Command handlers
    //==================================================================================================================

    fn handle_uci(&self) -> Result<(), UciError> {
        let options = Options::get();

        Uci::send_id("name", &format!("{} {}", get_config().name, env!("CARGO_PKG_VERSION")));
        Uci::send_id("author", "the Ferrite developers");
        Uci::send_option(
            "Hash",
            UciOptionType::Spin { default: TranspositionTable::DEFAULT_MB_SIZE as i64, min: 1, max: 1 << 20 },
        );
        Uci::send_option("Clear Hash", UciOptionType::Button);
        Uci::send_option(
            "Threads",
            UciOptionType::Spin { default: options.threads() as i64, min: 1, max: Options::MAX_THREADS as i64 },
        );
        Uci::send_option(
            "MinSplitDepth",
            UciOptionType::Spin { default: options.min_split_depth() as i64, min: 2, max: 12 },
        );
        Uci::send_option("Ponder", UciOptionType::Check(options.ponder()));
        Uci::send_option("OwnBook", UciOptionType::Check(options.own_book()));
        Uci::send_option("BookFile", UciOptionType::String(options.book_file()));
        Uci::send_option("NullMove", UciOptionType::Check(options.null_move_pruning()));
        Uci::send_option(
            "KingSafetyCurve",
            UciOptionType::Combo {
                default: String::from("Quadratic"),
                values: vec![String::from("Quadratic"), String::from("Linear")],
            },
        );
        Uci::send_option(
            "MovesToGoEstimate",
            UciOptionType::Spin { default: options.moves_to_go_estimate() as i64, min: 5, max: 100 },
        );
        Uci::send_uciok();
        Ok(())
    }

    fn handle_isready(&self) -> Result<(), UciError> {
        Uci::send_readyok();
        Ok(())
    }

    /// Clears the state carried between games: the transposition table.
    fn handle_ucinewgame(&mut self) -> Result<(), UciError> {
        self.transposition_table.clear();
        Ok(())
    }

    fn set_option<T, F>(name: &str, text: &str, closure: F) -> Result<(), UciError>
    where
        T: std::str::FromStr,
        F: FnOnce(&mut Options, T),
    {
        let value = text
            .parse::<T>()
            .map_err(|_| UciError::InvalidOptionValue { option_name: name.to_string(), value: text.to_string() })?;
        Options::modify(|options| closure(options, value));
        Ok(())
    }

    fn handle_setoption(&mut self, name: &str, text: &str) -> Result<(), UciError> {
        match name {
            "Hash" => {
                let size = text
                    .parse::<usize>()
                    .map_err(|_| UciError::InvalidOptionValue { option_name: name.to_string(), value: text.to_string() })?;
                self.transposition_table = Arc::new(TranspositionTable::new(size));
            }
            "Clear Hash" => self.transposition_table.clear(),
            "Threads" => Self::set_option::<usize, _>(name, text, Options::set_threads)?,
            "MinSplitDepth" => Self::set_option::<i16, _>(name, text, Options::set_min_split_depth)?,
            "Ponder" => Self::set_option::<bool, _>(name, text, Options::set_ponder)?,
            "OwnBook" => Self::set_option::<bool, _>(name, text, Options::set_own_book)?,
            "BookFile" => Options::modify(|options| options.set_book_file(text.to_string())),
            "NullMove" => Self::set_option::<bool, _>(name, text, Options::set_null_move_pruning)?,
            "KingSafetyCurve" => {
                let curve = match text {
                    "Linear" => KingSafetyCurve::Linear,
                    "Quadratic" => KingSafetyCurve::Quadratic,
                    _ => {
                        return Err(UciError::InvalidOptionValue {
                            option_name: name.to_string(),
                            value: text.to_string(),
                        })
                    }
                };
                Options::modify(|options| options.set_king_safety_curve(curve));
            }
            "MovesToGoEstimate" => {
                Self::set_option::<u32, _>(name, text, Options::set_moves_to_go_estimate)?
            }
            // Unknown options are ignored, per protocol: the GUI may probe for options of other
            // engines.
            _ => {}
        }

        Ok(())
    }

    fn handle_position(&mut self, fen: String, moves: &[&str]) -> Result<(), UciError> {
        let mut position = Position::new_from_fen(&fen).map_err(|_| UciError::InvalidFenString(fen))?;
        for mv_str in moves {
            let mv =
                parse_coordinate_notation(&position, mv_str).map_err(|_| UciError::InvalidMove(mv_str.to_string()))?;
            if !position.is_pseudo_legal(mv) || !position.is_legal(mv) {
                return Err(UciError::InvalidMove(mv_str.to_string()));
            }
            position.make(mv);
        }
        self.position = position;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_go(
        &mut self,
        search_moves: Option<Vec<String>>,
        ponder: bool,
        white_time: Option<Duration>,
        black_time: Option<Duration>,
        white_inc: Option<Duration>,
        black_inc: Option<Duration>,
        moves_to_go: Option<u16>,
        depth: Option<i16>,
        nodes: Option<u64>,
        move_time: Option<Duration>,
        infinite: bool,
    ) -> Result<(), UciError> {
        // A well-behaved GUI stops the previous search first, but make sure anyway.
        self.handle_stop()?;

        // Play instantly from the book when enabled.
        if Options::get().own_book() && !ponder && !infinite {
            if let Some(mv) = self.book.probe(&self.position) {
                Uci::send_bestmove(&mv.to_uci_string(), None);
                return Ok(());
            }
        }

        let search_moves = match search_moves {
            Some(moves) => {
                let mut parsed = Vec::with_capacity(moves.len());
                for mv_str in &moves {
                    let mv = parse_coordinate_notation(&self.position, mv_str)
                        .map_err(|_| UciError::InvalidMove(mv_str.clone()))?;
                    parsed.push(mv);
                }
                Some(parsed)
            }
            None => None,
        };

        let (time, increment) = match self.position.side_to_move() {
            Color::White => (white_time, white_inc),
            Color::Black => (black_time, black_inc),
        };
        let time_manager = TimeManager::new(TimeControl::new(time, increment, moves_to_go, move_time, infinite));

        let max_plies = crate::search::MAX_PLY as i16;
        let max_depth = Depth::from_plies(depth.unwrap_or(max_plies).clamp(1, max_plies));

        let progress_table = Arc::clone(&self.transposition_table);
        let callback: ProgressCallback =
            Arc::new(move |progress| Self::report_progress(&progress_table, progress));
        self.search = Some(Search::new(
            self.position.clone(),
            max_depth,
            time_manager,
            callback,
            Arc::clone(&self.transposition_table),
            Arc::new(AtomicBool::new(false)),
            ponder,
            nodes,
            search_moves,
        ));
        Ok(())
    }

    fn handle_stop(&mut self) -> Result<(), UciError> {
        if let Some(search) = self.search.take() {
            search.stop();
            search.join();
        }
        Ok(())
    }

    fn handle_ponderhit(&mut self) -> Result<(), UciError> {
        if let Some(search) = &self.search {
            search.ponder_hit();
        }
        Ok(())
    }

    /// Stops any running search before the process exits.
    fn shutdown(&mut self) {
        let _ = self.handle_stop();
    }
}
