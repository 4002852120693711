use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    coordinates::Rank,
    depth::Depth,
    eval::{evaluate, non_pawn_material_value, piece_type_value, Eval},
    history::{HistoryTable, KillerMoves},
    material::MaterialTable,
    move_gen::{generation::generate_legal_moves, move_list::MoveList},
    move_picker::MovePicker,
    options::{Options, ReadOnlyOptions},
    pawns::PawnTable,
    piece::PieceType,
    position::Position,
    r#move::Move,
    threads::{SearchContext, SplitPoint, SplitPointInner, ThreadPool},
    time::TimeManager,
    tt::{EntryType, TranspositionTable},
};

/// The deepest ply the search can reach.
pub const MAX_PLY: u16 = 128;

const RAZOR_DEPTH: i16 = 3;
const FUTILITY_DEPTH: i16 = 3;
const FUTILITY_MARGINS: [i16; 4] = [0, 100, 160, 250];
const QSEARCH_FUTILITY_MARGIN: i16 = 150;
const LMR_FULL_DEPTH_MOVES: usize = 4;
const LMR_MIN_DEPTH: i16 = 3;
const ASPIRATION_WINDOW: i16 = 25;
const IID_MIN_DEPTH: i16 = 5;
const NODES_BETWEEN_POLLS: u64 = 1024;

fn razor_margin(depth: Depth) -> i16 {
    300 + 50 * depth.as_plies()
}

/// Counters accumulated during a search.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    /// Nodes visited by the main search.
    pub nodes: u64,

    /// Nodes visited by the quiescence search.
    pub qnodes: u64,
}

impl SearchStats {
    /// Returns the total number of nodes searched.
    pub fn total_nodes(&self) -> u64 {
        self.nodes + self.qnodes
    }
}

/// Progress notifications emitted by the search. The consumer decides what to print and how
/// often.
pub enum ProgressType {
    /// An iteration of the iterative deepening completed.
    Iteration { depth: Depth, seldepth: u16, elapsed: Duration, score: Eval, nodes: u64, pv: Vec<Move> },

    /// A new best move was found during an iteration.
    NewBestMove { depth: Depth, elapsed: Duration, score: Eval, nodes: u64, pv: Vec<Move> },

    /// The search started examining a new move at the root.
    NewMoveAtRoot {
        depth: Depth,
        elapsed: Duration,
        nodes: u64,
        move_number: usize,
        move_count: usize,
        mv: Move,
    },

    /// The search is over. `mv` is `None` only when the root position has no legal move.
    SearchFinished { mv: Option<Move>, ponder: Option<Move>, elapsed: Duration, stats: SearchStats },
}

/// The callback through which the search reports its progress.
pub type ProgressCallback = Arc<dyn Fn(ProgressType) + Send + Sync>;

struct RootMove {
    mv: Move,
    score: Eval,
    previous_score: Eval,
}

//======================================================================================================================
// Search handle
//======================================================================================================================

/// A running search.
///
/// `new` spawns the master search thread (and its helpers) and returns immediately; the search
/// reports through the progress callback and finishes with a `SearchFinished` notification.
pub struct Search {
    handle: JoinHandle<()>,
    context: Arc<SearchContext>,
}

impl Search {
    /// Starts a search of the given position.
    ///
    /// # Parameters
    /// * `position` - The root position.
    /// * `max_depth` - The depth at which the iterative deepening stops.
    /// * `time_manager` - The time budget; its clock is already running.
    /// * `callback` - Receives the progress notifications, including the final best move.
    /// * `transposition_table` - The shared transposition table.
    /// * `stop` - External abort flag; setting it makes the search finish with the best move
    ///   found so far.
    /// * `pondering` - When true, deadlines are ignored until `ponder_hit` is called.
    /// * `node_limit` - When present, the search stops after this many nodes.
    /// * `search_moves` - When present, restricts the root to these moves.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        position: Position,
        max_depth: Depth,
        time_manager: TimeManager,
        callback: ProgressCallback,
        transposition_table: Arc<TranspositionTable>,
        stop: Arc<AtomicBool>,
        pondering: bool,
        node_limit: Option<u64>,
        search_moves: Option<Vec<Move>>,
    ) -> Self {
        let context =
            Arc::new(SearchContext::new(transposition_table, stop, time_manager, pondering, node_limit));

        let master_context = Arc::clone(&context);
        let handle = thread::spawn(move || {
            run_master(master_context, position, max_depth, callback, search_moves);
        });

        Search { handle, context }
    }

    /// Asks the search to stop; it will emit its final best move shortly after.
    pub fn stop(&self) {
        self.context.stop.store(true, Ordering::Release);
    }

    /// Promotes a pondering search to a normal one: from this point on the time budget applies.
    pub fn ponder_hit(&self) {
        self.context.time.lock().expect("The time manager is never poisoned").restart();
        self.context.pondering.store(false, Ordering::Release);
    }

    /// Waits for the search to finish.
    pub fn join(self) {
        self.handle.join().expect("The search thread does not panic");
    }
}

//======================================================================================================================
// Master thread: iterative deepening and root moves
//======================================================================================================================

fn run_master(
    context: Arc<SearchContext>,
    mut position: Position,
    max_depth: Depth,
    callback: ProgressCallback,
    search_moves: Option<Vec<Move>>,
) {
    context.tt.new_search();

    let helper_count = Options::get().threads().saturating_sub(1);
    let pool = ThreadPool::spawn(Arc::clone(&context), helper_count);

    let mut worker = SearchWorker::new_master(Arc::clone(&context));

    // Collect and possibly filter the root moves.
    let mut moves = MoveList::new();
    generate_legal_moves(&position, &mut moves);
    let mut root_moves: Vec<RootMove> = moves
        .iter()
        .filter(|mv| search_moves.as_ref().map_or(true, |allowed| allowed.contains(mv)))
        .map(|mv| RootMove { mv, score: Eval::MIN, previous_score: Eval::MIN })
        .collect();

    let mut best_move = None;
    let mut best_score = Eval::ZERO;
    let mut pv: Vec<Move> = Vec::new();

    let mut depth = Depth::ONE_PLY;
    while !root_moves.is_empty() && depth <= max_depth {
        {
            let time = context.time.lock().expect("The time manager is never poisoned");
            if !time.can_start_iteration() || context.stop.load(Ordering::Acquire) {
                break;
            }
        }
        context.time.lock().expect("The time manager is never poisoned").iteration_started();

        // Keep the best move of the previous iteration first.
        for root_move in root_moves.iter_mut() {
            root_move.previous_score = root_move.score;
            root_move.score = Eval::MIN;
        }
        root_moves.sort_by(|a, b| b.previous_score.cmp(&a.previous_score));

        // Aspiration: open with a narrow window around the previous score, widen on failure.
        let previous = root_moves[0].previous_score;
        let (mut alpha, mut beta) =
            if depth >= Depth::from_plies(5) && previous != Eval::MIN && !previous.is_mate() {
                (previous - ASPIRATION_WINDOW, previous + ASPIRATION_WINDOW)
            } else {
                (Eval::MIN, Eval::MAX)
            };

        loop {
            let value = worker.search_root(&mut position, &mut root_moves, alpha, beta, depth, &callback);
            if context.stop.load(Ordering::Acquire) {
                break;
            }

            if value <= alpha {
                alpha = Eval::MIN;
            } else if value >= beta {
                beta = Eval::MAX;
            } else {
                break;
            }

            // Re-search with the widened window: reset the scores of this iteration.
            for root_move in root_moves.iter_mut() {
                root_move.score = Eval::MIN;
            }
        }

        let stopped = context.stop.load(Ordering::Acquire);

        // A partial iteration is still usable once its first root move completed with the full
        // window.
        root_moves.sort_by(|a, b| b.score.cmp(&a.score));
        if root_moves[0].score != Eval::MIN {
            best_move = Some(root_moves[0].mv);
            best_score = root_moves[0].score;
            pv = worker.extract_pv(&position, root_moves[0].mv, depth);
            context.tt.insert_pv(&position, &pv, best_score, depth);
        }

        worker.flush_node_counts();
        context.time.lock().expect("The time manager is never poisoned").iteration_finished();

        if stopped {
            break;
        }

        callback(ProgressType::Iteration {
            depth,
            seldepth: context.sel_depth.load(Ordering::Relaxed) as u16,
            elapsed: context.time.lock().expect("The time manager is never poisoned").elapsed(),
            score: best_score,
            nodes: context.total_nodes(),
            pv: pv.clone(),
        });

        // No point searching deeper once a forced mate is found.
        if best_score.is_mate() && depth.as_plies() as u16 > best_score.mate_distance() {
            break;
        }

        depth += Depth::ONE_PLY;
    }

    // Shut the helpers down before reporting, so the node counts are final.
    context.quit.store(true, Ordering::Release);
    pool.join();
    worker.flush_node_counts();

    let elapsed = context.time.lock().expect("The time manager is never poisoned").elapsed();
    let stats = SearchStats {
        nodes: context.nodes.load(Ordering::Relaxed),
        qnodes: context.qnodes.load(Ordering::Relaxed),
    };
    callback(ProgressType::SearchFinished {
        mv: best_move,
        ponder: pv.get(1).copied(),
        elapsed,
        stats,
    });
}

//======================================================================================================================
// Search worker
//======================================================================================================================

/// The per-thread search state: node counters and the thread-local heuristic and evaluation
/// tables. The master thread and every helper each own one.
pub struct SearchWorker {
    context: Arc<SearchContext>,
    pawn_table: PawnTable,
    material_table: MaterialTable,
    killers: KillerMoves,
    history: HistoryTable,
    nodes: u64,
    qnodes: u64,
    sel_depth: u16,
    master: bool,
    // Options snapshot, taken once per search: the hot path cannot afford the registry lock.
    null_move_pruning: bool,
    min_split_depth: i16,
}

impl SearchWorker {
    /// Creates the worker of the master thread.
    fn new_master(context: Arc<SearchContext>) -> Self {
        Self::new(context, true)
    }

    /// Creates the worker of a helper thread.
    pub fn new_helper(context: Arc<SearchContext>) -> Self {
        Self::new(context, false)
    }

    fn new(context: Arc<SearchContext>, master: bool) -> Self {
        let options = Options::get();
        Self {
            context,
            pawn_table: PawnTable::new(),
            material_table: MaterialTable::new(),
            killers: KillerMoves::new(),
            history: HistoryTable::new(),
            nodes: 0,
            qnodes: 0,
            sel_depth: 0,
            master,
            null_move_pruning: options.null_move_pruning(),
            min_split_depth: options.min_split_depth(),
        }
    }

    /// Adds this worker's node counts to the shared totals and resets them.
    pub fn flush_node_counts(&mut self) {
        self.context.nodes.fetch_add(self.nodes, Ordering::Relaxed);
        self.context.qnodes.fetch_add(self.qnodes, Ordering::Relaxed);
        self.context.sel_depth.fetch_max(self.sel_depth as usize, Ordering::Relaxed);
        self.nodes = 0;
        self.qnodes = 0;
    }

    /// Returns true if the search must unwind. The master additionally polls the time manager
    /// every `NODES_BETWEEN_POLLS` nodes and raises the shared stop flag on expiry.
    fn should_stop(&self) -> bool {
        if self.context.stop.load(Ordering::Relaxed) {
            return true;
        }

        if self.master && (self.nodes + self.qnodes) % NODES_BETWEEN_POLLS == 0 {
            if let Some(limit) = self.context.node_limit {
                if self.context.total_nodes() + self.nodes + self.qnodes >= limit {
                    self.context.stop.store(true, Ordering::Release);
                    return true;
                }
            }

            if !self.context.pondering.load(Ordering::Relaxed) {
                let expired =
                    !self.context.time.lock().expect("The time manager is never poisoned").can_continue();
                if expired {
                    self.context.stop.store(true, Ordering::Release);
                    return true;
                }
            }
        }

        false
    }

    fn evaluate_position(&mut self, position: &Position) -> Eval {
        evaluate(position, &mut self.pawn_table, &mut self.material_table)
    }

    //==================================================================================================================
    // Root search
    //==================================================================================================================

    fn search_root(
        &mut self,
        position: &mut Position,
        root_moves: &mut [RootMove],
        mut alpha: Eval,
        beta: Eval,
        depth: Depth,
        callback: &ProgressCallback,
    ) -> Eval {
        let move_count = root_moves.len();
        let mut best_value = Eval::MIN;

        for index in 0..move_count {
            let mv = root_moves[index].mv;

            callback(ProgressType::NewMoveAtRoot {
                depth,
                elapsed: self.context.time.lock().expect("The time manager is never poisoned").elapsed(),
                nodes: self.context.total_nodes() + self.nodes + self.qnodes,
                move_number: index + 1,
                move_count,
                mv,
            });

            position.make(mv);
            let value = if index == 0 {
                -self.search(position, -beta, -alpha, depth - Depth::ONE_PLY, 1, true, true)
            } else {
                // Null window first; a fail high gets the full window.
                let mut value =
                    -self.search(position, -(alpha + 1), -alpha, depth - Depth::ONE_PLY, 1, false, true);
                if value > alpha && value < beta && !self.context.stop.load(Ordering::Acquire) {
                    value = -self.search(position, -beta, -alpha, depth - Depth::ONE_PLY, 1, true, true);
                }
                value
            };
            position.unmake();

            if self.context.stop.load(Ordering::Acquire) {
                return best_value;
            }

            root_moves[index].score = value;

            if value > best_value {
                best_value = value;
                if value > alpha {
                    alpha = value;

                    if index > 0 {
                        callback(ProgressType::NewBestMove {
                            depth,
                            elapsed: self
                                .context
                                .time
                                .lock()
                                .expect("The time manager is never poisoned")
                                .elapsed(),
                            score: value,
                            nodes: self.context.total_nodes() + self.nodes + self.qnodes,
                            pv: vec![mv],
                        });
                    }

                    if value >= beta {
                        return value;
                    }
                }
            }

            // Once the first root move has a score, the soft deadline may end the iteration.
            let keep_going = self.context.pondering.load(Ordering::Relaxed)
                || self
                    .context
                    .time
                    .lock()
                    .expect("The time manager is never poisoned")
                    .soft_deadline_allows_continuing();
            if !keep_going {
                self.context.stop.store(true, Ordering::Release);
                return best_value;
            }
        }

        best_value
    }

    /// Rebuilds the principal variation by walking the transposition table from the root,
    /// guarding against cycles.
    fn extract_pv(&self, position: &Position, first: Move, depth: Depth) -> Vec<Move> {
        let mut pv = vec![first];
        let mut current = position.clone();
        current.make(first);
        let mut seen = vec![position.hash(), current.hash()];

        while (pv.len() as i16) < depth.as_plies().max(1) * 2 {
            let Some(entry) = self.context.tt.probe(current.hash()) else {
                break;
            };
            let Some(mv) = entry.mv() else {
                break;
            };
            if !current.is_pseudo_legal(mv) || !current.is_legal(mv) {
                break;
            }
            current.make(mv);
            pv.push(mv);
            if seen.contains(&current.hash()) {
                break;
            }
            seen.push(current.hash());
        }

        pv
    }

    //==================================================================================================================
    // Main alpha-beta search
    //==================================================================================================================

    #[allow(clippy::too_many_arguments)]
    fn search(
        &mut self,
        position: &mut Position,
        mut alpha: Eval,
        mut beta: Eval,
        depth: Depth,
        ply: u16,
        pv_node: bool,
        allow_null: bool,
    ) -> Eval {
        if depth <= Depth::ZERO {
            return self.qsearch(position, alpha, beta, 0, ply);
        }

        self.nodes += 1;
        if self.should_stop() {
            return Eval::ZERO;
        }

        if ply >= MAX_PLY {
            return self.evaluate_position(position);
        }

        if position.is_draw() {
            return Eval::DRAW;
        }

        // Mate distance pruning: the best achievable score from here is bounded by the ply.
        alpha = alpha.max(-Eval::new_mate(ply));
        beta = beta.min(Eval::new_mate(ply + 1));
        if alpha >= beta {
            return alpha;
        }

        // Transposition table probe: a deep enough entry with a usable bound cuts immediately
        // in non-PV nodes; the stored move seeds the move ordering either way.
        let mut tt_move = None;
        if let Some(entry) = self.context.tt.probe(position.hash()) {
            tt_move = entry.mv();
            if !pv_node && entry.depth() as i16 >= depth.as_plies() {
                let value = entry.get_eval(ply);
                match entry.entry_type() {
                    EntryType::Exact => return value,
                    EntryType::LowerBound if value >= beta => return value,
                    EntryType::UpperBound if value <= alpha => return value,
                    _ => {}
                }
            }
        }

        let in_check = position.is_check();
        let static_eval = if in_check { None } else { Some(self.evaluate_position(position)) };

        // Razoring: a shallow node so far below alpha that only the tactics matter.
        if let Some(static_eval) = static_eval {
            if !pv_node
                && tt_move.is_none()
                && depth.as_plies() <= RAZOR_DEPTH
                && static_eval + razor_margin(depth) <= alpha
            {
                let value = self.qsearch(position, alpha, beta, 0, ply);
                if value <= alpha {
                    return value;
                }
            }
        }

        // Null-move pruning: hand the opponent a free move; if the reduced search still fails
        // high, the position is good enough to cut. Unsound in pawn endgames (zugzwang), so it
        // requires non-pawn material on the board.
        if let Some(static_eval) = static_eval {
            if !pv_node
                && allow_null
                && !in_check
                && static_eval >= beta
                && position.non_pawn_material(position.side_to_move()) > 0
                && self.null_move_pruning
            {
                let reduction = Depth::from_plies(3) + depth / 4;
                position.make_null();
                let mut value = -self.search(
                    position,
                    -beta,
                    -(beta - 1),
                    depth - reduction - Depth::ONE_PLY,
                    ply + 1,
                    false,
                    false,
                );
                position.unmake_null();

                if self.context.stop.load(Ordering::Relaxed) {
                    return Eval::ZERO;
                }

                if value >= beta {
                    // Do not return an unproven mate from a null search.
                    if value.is_mate() {
                        value = beta;
                    }
                    return value;
                }
            }
        }

        // Internal iterative deepening: a PV node with no hash move is worth a shallower search
        // just to get one.
        if pv_node && tt_move.is_none() && depth.as_plies() >= IID_MIN_DEPTH {
            self.search(position, alpha, beta, depth - Depth::from_plies(2), ply, pv_node, false);
            if let Some(entry) = self.context.tt.probe(position.hash()) {
                tt_move = entry.mv();
            }
        }

        // Count the evasions when in check so the single-reply extension can fire.
        let single_reply = in_check && {
            let mut evasions = MoveList::new();
            generate_legal_moves(position, &mut evasions);
            evasions.len() == 1
        };

        let original_alpha = alpha;
        let mut best_value = Eval::MIN;
        let mut best_move: Option<Move> = None;
        let mut moves_searched = 0usize;

        let killers = [self.killers.get(ply, 0), self.killers.get(ply, 1)];
        let mut picker = MovePicker::new(position, tt_move, killers);

        while let Some(mv) = picker.next(position, &self.history) {
            if !position.is_legal(mv) {
                continue;
            }
            moves_searched += 1;

            let gives_check = position.gives_check(mv);

            // Extensions, capped at one ply in total.
            let mut extension = Depth::ZERO;
            if gives_check {
                extension += Depth::ONE_PLY;
            }
            if single_reply {
                extension += Depth::ONE_PLY;
            }
            if mv.piece().piece_type() == PieceType::Pawn
                && mv.to_square().rank().relative_to_color(mv.piece().color()) == Rank::R7
            {
                extension += Depth::from_sixteenths(8);
            }
            if let Some(capture) = mv.capture() {
                // Transition into a pawn endgame deserves a full-depth look.
                if capture.piece_type() != PieceType::Pawn
                    && position.non_pawn_material(!position.side_to_move())
                        == non_pawn_material_value(capture.piece_type())
                {
                    extension += Depth::ONE_PLY;
                }
            }
            let extension = extension.min(Depth::ONE_PLY);
            let new_depth = depth - Depth::ONE_PLY + extension;

            // Futility pruning of quiet moves at shallow depth.
            if let Some(static_eval) = static_eval {
                if !pv_node
                    && moves_searched > 1
                    && mv.is_quiet()
                    && !gives_check
                    && depth.as_plies() <= FUTILITY_DEPTH
                    && !best_value.is_mate()
                {
                    let margin = FUTILITY_MARGINS[depth.as_plies().clamp(0, 3) as usize];
                    if static_eval + margin <= alpha {
                        continue;
                    }
                }
            }

            // Late move reduction for quiet moves ordered far down the list.
            let mut reduction = Depth::ZERO;
            if !pv_node
                && mv.is_quiet()
                && !in_check
                && !gives_check
                && moves_searched > LMR_FULL_DEPTH_MOVES
                && depth.as_plies() >= LMR_MIN_DEPTH
            {
                reduction = Depth::ONE_PLY;
                if moves_searched > 3 * LMR_FULL_DEPTH_MOVES {
                    reduction += Depth::ONE_PLY;
                }
            }

            position.make(mv);
            let value = if moves_searched == 1 {
                -self.search(position, -beta, -alpha, new_depth, ply + 1, pv_node, true)
            } else {
                // Principal variation search: prove the move worse than alpha with a null
                // window, re-search on failure.
                let mut value = -self.search(
                    position,
                    -(alpha + 1),
                    -alpha,
                    new_depth - reduction,
                    ply + 1,
                    false,
                    true,
                );
                if value > alpha && reduction > Depth::ZERO {
                    value = -self.search(position, -(alpha + 1), -alpha, new_depth, ply + 1, false, true);
                }
                if value > alpha && value < beta && pv_node {
                    value = -self.search(position, -beta, -alpha, new_depth, ply + 1, true, true);
                }
                value
            };
            position.unmake();

            if self.context.stop.load(Ordering::Relaxed) {
                return Eval::ZERO;
            }

            if value > best_value {
                best_value = value;
                best_move = Some(mv);
                if value > alpha {
                    alpha = value;
                    if value >= beta {
                        break;
                    }
                }
            }

            // Young brothers wait: with the first move searched and an idle helper around,
            // share the remaining moves of this node.
            if best_value < beta && depth.as_plies() >= self.min_split_depth && self.context.can_split() {
                let (split_value, split_move, searched) = self.split(
                    position,
                    &mut picker,
                    alpha,
                    beta,
                    best_value,
                    best_move,
                    moves_searched,
                    depth,
                    ply,
                );
                moves_searched = searched;
                if split_value > best_value {
                    best_value = split_value;
                    best_move = split_move;
                }
                break;
            }
        }

        if self.context.stop.load(Ordering::Relaxed) {
            return Eval::ZERO;
        }

        // No legal move: mate or stalemate.
        if moves_searched == 0 {
            return if in_check { -Eval::new_mate(ply) } else { Eval::DRAW };
        }

        let entry_type = if best_value >= beta {
            EntryType::LowerBound
        } else if best_value > original_alpha {
            EntryType::Exact
        } else {
            EntryType::UpperBound
        };
        self.context.tt.store(position.hash(), best_move, entry_type, depth, ply, best_value);

        if best_value >= beta {
            if let Some(mv) = best_move {
                if mv.is_quiet() {
                    self.killers.update(ply, mv);
                    self.history.update(mv, depth);
                }
            }
        }

        best_value
    }

    //==================================================================================================================
    // Quiescence search
    //==================================================================================================================

    fn qsearch(&mut self, position: &mut Position, mut alpha: Eval, beta: Eval, qdepth: i16, ply: u16) -> Eval {
        self.qnodes += 1;
        self.sel_depth = self.sel_depth.max(ply);
        if self.should_stop() {
            return Eval::ZERO;
        }

        if position.is_draw() {
            return Eval::DRAW;
        }

        let in_check = position.is_check();
        let static_eval = if in_check { None } else { Some(self.evaluate_position(position)) };

        let mut best_value = Eval::MIN;
        if let Some(stand_pat) = static_eval {
            // Standing pat: the side to move is rarely forced to enter the captures.
            if stand_pat >= beta {
                return stand_pat;
            }
            if stand_pat > alpha {
                alpha = stand_pat;
            }
            best_value = stand_pat;
        }

        if ply >= MAX_PLY {
            return static_eval.unwrap_or(Eval::DRAW);
        }

        // Quiet checks are only tried during the first quiescence ply.
        let include_checks = qdepth >= 0;
        let mut picker = MovePicker::new_quiescence(position, None, include_checks);
        let mut moves_searched = 0usize;

        while let Some(mv) = picker.next(position, &self.history) {
            if !position.is_legal(mv) {
                continue;
            }
            moves_searched += 1;

            if let Some(static_eval) = static_eval {
                if mv.is_capture() && mv.promotion().is_none() {
                    // Losing captures cannot rescue a quiescence node.
                    if position.see(mv) < Eval::ZERO {
                        continue;
                    }

                    // Futility: even winning the piece leaves the score below alpha.
                    let captured_value = mv
                        .capture()
                        .map_or(0, |capture| i16::from(piece_type_value(capture.piece_type()).mg()));
                    if static_eval + captured_value + QSEARCH_FUTILITY_MARGIN < alpha {
                        continue;
                    }
                }
            }

            position.make(mv);
            let value = -self.qsearch(position, -beta, -alpha, qdepth - 1, ply + 1);
            position.unmake();

            if self.context.stop.load(Ordering::Relaxed) {
                return Eval::ZERO;
            }

            if value > best_value {
                best_value = value;
                if value > alpha {
                    alpha = value;
                    if value >= beta {
                        return value;
                    }
                }
            }
        }

        // In check with no legal evasion: mated.
        if in_check && moves_searched == 0 {
            return -Eval::new_mate(ply);
        }

        best_value
    }

    //==================================================================================================================
    // Split points
    //==================================================================================================================

    /// Shares the remaining moves of the current node with the idle helper threads. The calling
    /// thread becomes the master of the split point: it helps searching, then blocks until all
    /// attached slaves have detached. Returns the folded best value and move, and the total
    /// number of moves searched at this node.
    #[allow(clippy::too_many_arguments)]
    fn split(
        &mut self,
        position: &Position,
        picker: &mut MovePicker,
        alpha: Eval,
        beta: Eval,
        best_value: Eval,
        best_move: Option<Move>,
        moves_searched: usize,
        depth: Depth,
        ply: u16,
    ) -> (Eval, Option<Move>, usize) {
        let mut remaining = MoveList::new();
        while let Some(mv) = picker.next(position, &self.history) {
            remaining.push(mv);
        }
        if remaining.is_empty() {
            return (best_value, best_move, moves_searched);
        }

        let split_point = Arc::new(SplitPoint {
            position: position.clone(),
            depth,
            beta,
            ply,
            inner: Mutex::new(SplitPointInner {
                alpha,
                best_value,
                best_move,
                remaining,
                moves_searched,
            }),
            cutoff: AtomicBool::new(false),
            slaves: AtomicUsize::new(0),
        });

        self.context.register_split_point(Arc::clone(&split_point));

        // The master works on its own split point like any helper would.
        self.help(&split_point);

        // Withdraw the frame, then wait for the attached slaves to finish their moves. The
        // frame must not outlive this function.
        self.context.unregister_split_point(&split_point);
        while split_point.slaves.load(Ordering::Acquire) > 0 {
            thread::yield_now();
        }

        let inner = split_point.inner.lock().expect("The split point is never poisoned");
        (inner.best_value, inner.best_move, inner.moves_searched)
    }

    /// Searches moves pulled from a split point until none remain or a sibling raised the
    /// cutoff flag. Called both by the split's master and by attached helper threads.
    pub fn help(&mut self, split_point: &SplitPoint) {
        let mut position = split_point.position.clone();

        loop {
            if self.context.stop.load(Ordering::Relaxed) || split_point.cutoff.load(Ordering::Acquire) {
                break;
            }

            // Pick the next move under the lock, then search it without holding anything.
            let (mv, alpha) = {
                let mut inner = split_point.inner.lock().expect("The split point is never poisoned");
                if inner.best_value >= split_point.beta {
                    split_point.cutoff.store(true, Ordering::Release);
                    break;
                }
                match inner.remaining.pop_best() {
                    Some(mv) => {
                        inner.moves_searched += 1;
                        (mv, inner.alpha)
                    }
                    None => break,
                }
            };

            if !position.is_legal(mv) {
                let mut inner = split_point.inner.lock().expect("The split point is never poisoned");
                inner.moves_searched -= 1;
                continue;
            }

            let gives_check = position.gives_check(mv);
            let extension = if gives_check { Depth::ONE_PLY } else { Depth::ZERO };
            let new_depth = split_point.depth - Depth::ONE_PLY + extension;

            position.make(mv);
            let mut value = -self.search(
                &mut position,
                -(alpha + 1),
                -alpha,
                new_depth,
                split_point.ply + 1,
                false,
                true,
            );
            if value > alpha && !self.context.stop.load(Ordering::Relaxed) {
                value = -self.search(
                    &mut position,
                    -split_point.beta,
                    -alpha,
                    new_depth,
                    split_point.ply + 1,
                    false,
                    true,
                );
            }
            position.unmake();

            if self.context.stop.load(Ordering::Relaxed) {
                break;
            }

            // Fold the result back under the lock, in commit order.
            let mut inner = split_point.inner.lock().expect("The split point is never poisoned");
            if value > inner.best_value {
                inner.best_value = value;
                inner.best_move = Some(mv);
                if value > inner.alpha {
                    inner.alpha = value;
                }
                if value >= split_point.beta {
                    split_point.cutoff.store(true, Ordering::Release);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeControl;
    use ctor::ctor;

    #[ctor]
    fn setup() {
        crate::initialize();
    }

    #[derive(Default)]
    struct SearchResult {
        best_move: Option<Move>,
        score: Eval,
    }

    fn run_search(fen: &str, depth: i16) -> SearchResult {
        let position = Position::new_from_fen(fen).expect("The test FEN is valid");
        let result = Arc::new(Mutex::new(SearchResult::default()));

        let result_clone = Arc::clone(&result);
        let callback: ProgressCallback = Arc::new(move |progress| match progress {
            ProgressType::Iteration { score, .. } => {
                result_clone.lock().unwrap().score = score;
            }
            ProgressType::SearchFinished { mv, .. } => {
                result_clone.lock().unwrap().best_move = mv;
            }
            _ => {}
        });

        let search = Search::new(
            position,
            Depth::from_plies(depth),
            TimeManager::new(TimeControl::Infinite),
            callback,
            Arc::new(TranspositionTable::new(16)),
            Arc::new(AtomicBool::new(false)),
            false,
            None,
            None,
        );
        search.join();

        Arc::try_unwrap(result).ok().expect("The callback is gone with the search").into_inner().unwrap()
    }

    #[test]
    fn test_finds_mate_in_one() {
        // Back rank mate: Ra8#.
        let result = run_search("6k1/5ppp/8/8/8/8/8/R3K3 w - - 0 1", 4);
        assert_eq!(result.best_move.unwrap().to_uci_string(), "a1a8");
        assert!(result.score.is_mate());
        assert!(result.score > Eval::ZERO);
    }

    #[test]
    fn test_finds_mate_with_queen_and_rook() {
        let result = run_search("7k/8/8/8/8/8/1Q6/KR6 w - - 0 1", 6);
        assert!(result.score.is_mate());
        assert!(result.score > Eval::ZERO);
    }

    #[test]
    fn test_takes_the_hanging_queen() {
        let result = run_search("4k3/8/8/3q4/8/8/3R4/3K4 w - - 0 1", 4);
        assert_eq!(result.best_move.unwrap().to_uci_string(), "d2d5");
    }

    #[test]
    fn test_stalemate_position_returns_no_move() {
        let result = run_search("4k3/4P3/4K3/8/8/8/8/8 b - - 0 1", 4);
        assert!(result.best_move.is_none());
    }

    #[test]
    fn test_krk_reports_a_mate_score() {
        let result = run_search("8/8/8/3k4/8/8/3K3R/8 w - - 0 1", 12);
        assert!(result.score.is_mate(), "expected a mate score, got {}", result.score);
        assert!(result.score > Eval::ZERO);
    }

    #[test]
    fn test_kpk_rook_pawn_draw_scores_zero() {
        // Defending king reaches the corner: dead draw recognized by the bitbase.
        let result = run_search("k7/8/8/8/P7/8/8/5K2 w - - 0 1", 8);
        assert_eq!(result.score, Eval::DRAW);
    }

    #[test]
    fn test_central_kpk_scores_a_win() {
        let result = run_search("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1", 10);
        assert!(i16::from(result.score) > 500, "expected a winning score, got {}", result.score);
    }

    #[test]
    fn test_stop_flag_ends_the_search() {
        let position = Position::new();
        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        let finished_clone = Arc::clone(&finished);
        let callback: ProgressCallback = Arc::new(move |progress| {
            if let ProgressType::SearchFinished { .. } = progress {
                finished_clone.store(true, Ordering::Release);
            }
        });

        let search = Search::new(
            position,
            Depth::from_plies(64),
            TimeManager::new(TimeControl::Infinite),
            callback,
            Arc::new(TranspositionTable::new(16)),
            Arc::clone(&stop),
            false,
            None,
            None,
        );

        thread::sleep(Duration::from_millis(50));
        search.stop();
        search.join();
        assert!(finished.load(Ordering::Acquire));
    }

    #[test]
    fn test_search_moves_restricts_the_root() {
        let position = Position::new();
        let only = crate::notation::parse_coordinate_notation(&position, "a2a3").unwrap();

        let result = Arc::new(Mutex::new(None));
        let result_clone = Arc::clone(&result);
        let callback: ProgressCallback = Arc::new(move |progress| {
            if let ProgressType::SearchFinished { mv, .. } = progress {
                *result_clone.lock().unwrap() = mv;
            }
        });

        let search = Search::new(
            position,
            Depth::from_plies(4),
            TimeManager::new(TimeControl::Infinite),
            callback,
            Arc::new(TranspositionTable::new(16)),
            Arc::new(AtomicBool::new(false)),
            false,
            None,
            Some(vec![only]),
        );
        search.join();

        assert_eq!(*result.lock().unwrap(), Some(only));
    }

    #[test]
    fn test_two_threads_find_the_same_mate() {
        Options::modify(|options| options.set_threads(2));

        let result = run_search("6k1/5ppp/8/8/8/8/8/R3K3 w - - 0 1", 6);
        assert_eq!(result.best_move.unwrap().to_uci_string(), "a1a8");
        assert!(result.score.is_mate());

        Options::modify(|options| options.set_threads(1));
    }

    #[test]
    fn test_movetime_terminates_promptly() {
        let position = Position::new();
        let finished = Arc::new(Mutex::new(None));

        let finished_clone = Arc::clone(&finished);
        let callback: ProgressCallback = Arc::new(move |progress| {
            if let ProgressType::SearchFinished { mv, .. } = progress {
                *finished_clone.lock().unwrap() = Some(mv);
            }
        });

        let start = std::time::Instant::now();
        let search = Search::new(
            position,
            Depth::from_plies(64),
            TimeManager::new(TimeControl::MoveTime(Duration::from_millis(200))),
            callback,
            Arc::new(TranspositionTable::new(16)),
            Arc::new(AtomicBool::new(false)),
            false,
            None,
            None,
        );
        search.join();
        let elapsed = start.elapsed();

        assert!(elapsed < Duration::from_millis(600), "search took {:?}", elapsed);
        assert!(finished.lock().unwrap().expect("The search finished").is_some());
    }
}
