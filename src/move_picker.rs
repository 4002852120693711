use crate::{
    eval::{piece_type_value, Eval},
    history::HistoryTable,
    move_gen::{
        generation::{generate_moves, MoveGenerationType},
        move_list::MoveList,
    },
    position::Position,
    r#move::Move,
};

/// The internal states of the move picker, traversed in order. Each generation stage fills a
/// buffer that the following emission stage drains best-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    TtMove,
    GenCaptures,
    GoodCaptures,
    Killer1,
    Killer2,
    GenQuiets,
    Quiets,
    BadCaptures,
    GenEvasions,
    Evasions,
    GenQuietChecks,
    QuietChecks,
    Done,
}

/// Produces the moves of a node one at a time, in an order chosen to maximize early beta
/// cutoffs: the transposition table move first, then winning captures, killer moves, quiet moves
/// by history score and finally the losing captures.
///
/// Generation is staged: quiet moves are not generated at all if a capture already fails high.
/// The picker yields pseudo-legal moves; the caller is responsible for the final legality test.
/// The position and history are passed to `next` rather than stored, so the caller is free to
/// make and unmake moves between calls.
pub struct MovePicker {
    tt_move: Option<Move>,
    killers: [Option<Move>; 2],
    in_check: bool,
    stage: Stage,
    captures: MoveList,
    bad_captures: MoveList,
    quiets: MoveList,
    // None in the main search; in quiescence, whether quiet checks are produced.
    quiescence_checks: Option<bool>,
}

impl MovePicker {
    /// Creates a move picker for a main-search node. When the side to move is in check, the
    /// picker produces evasions only.
    pub fn new(position: &Position, tt_move: Option<Move>, killers: [Option<Move>; 2]) -> Self {
        let tt_move = tt_move.filter(|mv| position.is_pseudo_legal(*mv));
        Self {
            tt_move,
            killers,
            in_check: position.is_check(),
            stage: Stage::TtMove,
            captures: MoveList::new(),
            bad_captures: MoveList::new(),
            quiets: MoveList::new(),
            quiescence_checks: None,
        }
    }

    /// Creates a move picker for a quiescence node: captures and promotions only, plus the quiet
    /// checks when `include_checks` is set. When in check, produces evasions instead.
    pub fn new_quiescence(position: &Position, tt_move: Option<Move>, include_checks: bool) -> Self {
        let tt_move = tt_move
            .filter(|mv| position.is_pseudo_legal(*mv))
            .filter(|mv| position.is_check() || include_checks || !mv.is_quiet());
        let mut picker = Self::new(position, tt_move, [None; 2]);
        picker.quiescence_checks = Some(include_checks);
        picker
    }

    fn score_captures(&mut self) {
        for mv in self.captures.iter_mut() {
            // Most valuable victim first, least valuable attacker as the tie break; promotions
            // score as captures of the promoted piece.
            let victim = mv.capture().map_or(0, |capture| i32::from(piece_type_value(capture.piece_type()).mg()));
            let promotion =
                mv.promotion().map_or(0, |promotion| i32::from(piece_type_value(promotion.piece_type()).mg()));
            let attacker = i32::from(piece_type_value(mv.piece().piece_type()).mg());
            let score = 10 * (victim + promotion) - attacker;
            mv.set_eval(Eval::from(score.clamp(i16::MIN as i32, i16::MAX as i32)));
        }
    }

    fn score_quiets(&mut self, history: &HistoryTable) {
        for mv in self.quiets.iter_mut() {
            let score = history.value(*mv);
            mv.set_eval(Eval::from(score.clamp(i16::MIN as i32, i16::MAX as i32)));
        }
    }

    fn score_evasions(&mut self, history: &HistoryTable) {
        for mv in self.captures.iter_mut() {
            let score = if mv.is_capture() {
                let victim = mv.capture().map_or(0, |capture| i32::from(piece_type_value(capture.piece_type()).mg()));
                let attacker = i32::from(piece_type_value(mv.piece().piece_type()).mg());
                10_000 + 10 * victim - attacker
            } else {
                history.value(*mv)
            };
            mv.set_eval(Eval::from(score.clamp(i16::MIN as i32, i16::MAX as i32)));
        }
    }

    fn is_killer_or_tt(&self, mv: Move) -> bool {
        Some(mv) == self.tt_move || Some(mv) == self.killers[0] || Some(mv) == self.killers[1]
    }

    /// Returns the next move to search, or `None` when every move has been produced.
    pub fn next(&mut self, position: &Position, history: &HistoryTable) -> Option<Move> {
        loop {
            match self.stage {
                Stage::TtMove => {
                    self.stage = if self.in_check { Stage::GenEvasions } else { Stage::GenCaptures };
                    if let Some(mv) = self.tt_move {
                        return Some(mv);
                    }
                }

                Stage::GenCaptures => {
                    generate_moves::<{ MoveGenerationType::CAPTURES_VALUE }>(position, &mut self.captures);
                    self.score_captures();
                    self.stage = Stage::GoodCaptures;
                }

                Stage::GoodCaptures => match self.captures.pop_best() {
                    Some(mv) => {
                        if Some(mv) == self.tt_move {
                            continue;
                        }
                        // In the main search losing captures wait until the quiet moves have
                        // been tried; the quiescence search takes them in order and prunes them
                        // itself.
                        if self.quiescence_checks.is_none() && position.see(mv) < Eval::ZERO {
                            self.bad_captures.push(mv);
                            continue;
                        }
                        return Some(mv);
                    }
                    None => {
                        self.stage = match self.quiescence_checks {
                            Some(true) => Stage::GenQuietChecks,
                            Some(false) => Stage::Done,
                            None => Stage::Killer1,
                        };
                    }
                },

                Stage::Killer1 | Stage::Killer2 => {
                    let slot = if self.stage == Stage::Killer1 { 0 } else { 1 };
                    self.stage = if slot == 0 { Stage::Killer2 } else { Stage::GenQuiets };

                    if let Some(mv) = self.killers[slot] {
                        if Some(mv) != self.tt_move && mv.is_quiet() && position.is_pseudo_legal(mv) {
                            return Some(mv);
                        }
                    }
                }

                Stage::GenQuiets => {
                    generate_moves::<{ MoveGenerationType::QUIET_VALUE }>(position, &mut self.quiets);
                    self.score_quiets(history);
                    self.stage = Stage::Quiets;
                }

                Stage::Quiets => match self.quiets.pop_best() {
                    Some(mv) => {
                        if self.is_killer_or_tt(mv) {
                            continue;
                        }
                        return Some(mv);
                    }
                    None => self.stage = Stage::BadCaptures,
                },

                Stage::BadCaptures => match self.bad_captures.pop_best() {
                    Some(mv) => return Some(mv),
                    None => self.stage = Stage::Done,
                },

                Stage::GenEvasions => {
                    generate_moves::<{ MoveGenerationType::EVASIONS_VALUE }>(position, &mut self.captures);
                    self.score_evasions(history);
                    self.stage = Stage::Evasions;
                }

                Stage::Evasions => match self.captures.pop_best() {
                    Some(mv) => {
                        if Some(mv) == self.tt_move {
                            continue;
                        }
                        return Some(mv);
                    }
                    None => self.stage = Stage::Done,
                },

                Stage::GenQuietChecks => {
                    generate_moves::<{ MoveGenerationType::QUIET_CHECKS_VALUE }>(position, &mut self.quiets);
                    self.score_quiets(history);
                    self.stage = Stage::QuietChecks;
                }

                Stage::QuietChecks => match self.quiets.pop_best() {
                    Some(mv) => {
                        if Some(mv) == self.tt_move {
                            continue;
                        }
                        return Some(mv);
                    }
                    None => self.stage = Stage::Done,
                },

                Stage::Done => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coordinates::Square, piece::Piece};
    use ctor::ctor;

    #[ctor]
    fn setup() {
        crate::initialize();
    }

    fn collect(position: &Position, mut picker: MovePicker, history: &HistoryTable) -> Vec<Move> {
        let mut moves = Vec::new();
        while let Some(mv) = picker.next(position, history) {
            moves.push(mv);
        }
        moves
    }

    #[test]
    fn test_tt_move_comes_first_and_only_once() {
        let position = Position::new();
        let history = HistoryTable::new();
        let tt_move = Move::new(Square::G1, Square::F3, Piece::WHITE_KNIGHT);

        let picker = MovePicker::new(&position, Some(tt_move), [None; 2]);
        let moves = collect(&position, picker, &history);
        assert_eq!(moves[0], tt_move);
        assert_eq!(moves.iter().filter(|mv| **mv == tt_move).count(), 1);
        assert_eq!(moves.len(), 20);
    }

    #[test]
    fn test_bogus_tt_move_is_dropped() {
        let position = Position::new();
        let history = HistoryTable::new();
        // There is no white rook on a3 in the initial position.
        let tt_move = Move::new(Square::A3, Square::A6, Piece::WHITE_ROOK);

        let picker = MovePicker::new(&position, Some(tt_move), [None; 2]);
        let moves = collect(&position, picker, &history);
        assert!(!moves.contains(&tt_move));
        assert_eq!(moves.len(), 20);
    }

    #[test]
    fn test_winning_capture_before_quiets() {
        // Black just pushed d5; e4 takes is the best-ranked move.
        let position =
            Position::new_from_fen("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2").unwrap();
        let history = HistoryTable::new();

        let mut picker = MovePicker::new(&position, None, [None; 2]);
        let first = picker.next(&position, &history).unwrap();
        assert!(first.is_capture());
    }

    #[test]
    fn test_losing_captures_come_last() {
        // The only capture available loses the queen for a pawn.
        let position = Position::new_from_fen("4k3/8/3p4/2q5/3P4/4P3/8/4K3 b - - 0 1").unwrap();
        let history = HistoryTable::new();

        let picker = MovePicker::new(&position, None, [None; 2]);
        let moves = collect(&position, picker, &history);
        let losing = Move::new_capture(Square::C5, Square::D4, Piece::BLACK_QUEEN, Piece::WHITE_PAWN);
        assert_eq!(*moves.last().unwrap(), losing);
    }

    #[test]
    fn test_killers_come_before_other_quiets() {
        let position = Position::new();
        let history = HistoryTable::new();
        let killer = Move::new(Square::B1, Square::C3, Piece::WHITE_KNIGHT);

        let picker = MovePicker::new(&position, None, [Some(killer), None]);
        let moves = collect(&position, picker, &history);
        // No captures in the initial position, so the killer leads.
        assert_eq!(moves[0], killer);
        assert_eq!(moves.iter().filter(|mv| **mv == killer).count(), 1);
    }

    #[test]
    fn test_history_orders_quiet_moves() {
        let position = Position::new();
        let mut history = HistoryTable::new();
        let preferred = Move::new(Square::D2, Square::D4, Piece::WHITE_PAWN);
        history.update(preferred, crate::depth::Depth::from_plies(10));

        let mut picker = MovePicker::new(&position, None, [None; 2]);
        let first = picker.next(&position, &history).unwrap();
        assert_eq!(first, Move::new_two_square_pawn_push(Square::D2, Square::D4, Piece::WHITE_PAWN));
    }

    #[test]
    fn test_quiescence_picker_yields_captures_only() {
        let position =
            Position::new_from_fen("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2").unwrap();
        let history = HistoryTable::new();

        let picker = MovePicker::new_quiescence(&position, None, false);
        let moves = collect(&position, picker, &history);
        assert!(!moves.is_empty());
        assert!(moves.iter().all(|mv| mv.is_capture() || mv.promotion().is_some()));
    }

    #[test]
    fn test_quiescence_picker_includes_quiet_checks_when_asked() {
        let position = Position::new_from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 0 1").unwrap();
        let history = HistoryTable::new();

        let picker = MovePicker::new_quiescence(&position, None, true);
        let moves = collect(&position, picker, &history);
        assert!(moves.iter().any(|mv| position.gives_check(*mv)));

        let picker = MovePicker::new_quiescence(&position, None, false);
        let moves = collect(&position, picker, &history);
        assert!(moves.is_empty());
    }

    #[test]
    fn test_evasion_picker_when_in_check() {
        let position = Position::new_from_fen("4k3/8/8/1B6/8/8/8/4K3 b - - 0 1").unwrap();
        let history = HistoryTable::new();

        let picker = MovePicker::new(&position, None, [None; 2]);
        let moves = collect(&position, picker, &history);
        assert!(!moves.is_empty());
        for mv in moves {
            assert!(position.is_pseudo_legal(mv) || position.is_legal(mv));
        }
    }
}
