use crate::{
    bitboard::Bitboard,
    coordinates::{File, Rank, Square},
    piece::{Color, Piece, PieceType},
    position::{OccupancyFilter, Position},
    r#move::{CastlingSide, Move},
};

use super::{attacks::attacks_from, move_list::MoveList};

/// The stages of pseudo-legal move generation. Each stage writes only the corresponding subset
/// of moves, so the move picker can defer generating quiet moves until the captures are
/// exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveGenerationType {
    All = 0,
    Quiet = 1,
    Captures = 2,
    Evasions = 3,
    QuietChecks = 4,
}

impl MoveGenerationType {
    pub const ALL_VALUE: u8 = 0;
    pub const QUIET_VALUE: u8 = 1;
    pub const CAPTURES_VALUE: u8 = 2;
    pub const EVASIONS_VALUE: u8 = 3;
    pub const QUIET_CHECKS_VALUE: u8 = 4;
}

impl From<u8> for MoveGenerationType {
    fn from(value: u8) -> Self {
        match value {
            MoveGenerationType::ALL_VALUE => MoveGenerationType::All,
            MoveGenerationType::QUIET_VALUE => MoveGenerationType::Quiet,
            MoveGenerationType::CAPTURES_VALUE => MoveGenerationType::Captures,
            MoveGenerationType::EVASIONS_VALUE => MoveGenerationType::Evasions,
            MoveGenerationType::QUIET_CHECKS_VALUE => MoveGenerationType::QuietChecks,
            _ => panic!("Invalid MoveGenerationType value"),
        }
    }
}

fn collect_pawn_moves(bb_to: Bitboard, get_from: impl Fn(Square) -> Square, mut add_moves: impl FnMut(Square, Square)) {
    for to_sq in bb_to {
        let from_sq = get_from(to_sq);
        add_moves(from_sq, to_sq);
    }
}

fn forward_shift<const COLOR_VALUE: u8>(bb: Bitboard, shift: u32) -> Bitboard {
    match COLOR_VALUE {
        Color::WHITE_VALUE => bb << shift,
        Color::BLACK_VALUE => bb >> shift,
        _ => panic!("Invalid color value"),
    }
}

fn add_capture_promotions<const COLOR: u8>(
    from_sq: Square,
    to_sq: Square,
    piece: Piece,
    position: &Position,
    list: &mut MoveList,
) {
    let color: Color = COLOR.into();
    let capture = position[to_sq].expect("Capture promotions target an occupied square.");
    for promotion_type in [PieceType::Queen, PieceType::Rook, PieceType::Knight, PieceType::Bishop] {
        list.push(Move::new_capture_promotion(from_sq, to_sq, piece, capture, Piece::new(color, promotion_type)));
    }
}

fn generate_pawn_moves<const TYPE: u8, const COLOR: u8>(position: &Position, targets: Bitboard, list: &mut MoveList) {
    let generation_type: MoveGenerationType = TYPE.into();
    let color: Color = COLOR.into();

    let direction_factor = color.forward();
    let bb_rank_4: Bitboard = Bitboard::from(Rank::R4.relative_to_color(color));
    let bb_rank_8: Bitboard = Bitboard::from(Rank::R8.relative_to_color(color));
    let bb_file_a: Bitboard = Bitboard::from(File::A);
    let bb_file_h: Bitboard = Bitboard::from(File::H);
    let bb_occupied: Bitboard = position.occupied(OccupancyFilter::All);
    let bb_them: Bitboard = position.occupied(!color);
    let piece = Piece::new(color, PieceType::Pawn);
    let bb_from = position.occupied(piece);

    if matches!(generation_type, MoveGenerationType::All | MoveGenerationType::Evasions | MoveGenerationType::Quiet) {
        // Single pawn pushes (promotions are generated with the captures).
        let mut bb_to = forward_shift::<COLOR>(bb_from, 8) & !bb_occupied & !bb_rank_8;
        collect_pawn_moves(
            bb_to & targets,
            |sq| unsafe { sq.down_unchecked(direction_factor) },
            |from_sq, to_sq| {
                list.push(Move::new(from_sq, to_sq, piece));
            },
        );

        // Double pawn pushes.
        bb_to = forward_shift::<COLOR>(bb_to, 8) & !bb_occupied & bb_rank_4;
        collect_pawn_moves(
            bb_to & targets,
            |sq| unsafe { sq.down_unchecked(direction_factor * 2) },
            |from_sq, to_sq| {
                list.push(Move::new_two_square_pawn_push(from_sq, to_sq, piece));
            },
        );
    }

    if matches!(generation_type, MoveGenerationType::All | MoveGenerationType::Evasions | MoveGenerationType::Captures)
    {
        // Captures towards file A.
        let mut bb_to = bb_from & !bb_file_a;
        bb_to = match color {
            Color::White => bb_to << 7,
            Color::Black => bb_to >> 9,
        };
        bb_to &= bb_them;
        collect_pawn_moves(
            bb_to & !bb_rank_8 & targets,
            |sq| unsafe { sq.down_unchecked(direction_factor).right_unchecked(1) },
            |from_sq, to_sq| {
                list.push(Move::new_capture(from_sq, to_sq, piece, position[to_sq].expect("Capture target")));
            },
        );
        collect_pawn_moves(
            bb_to & bb_rank_8 & targets,
            |sq| unsafe { sq.down_unchecked(direction_factor).right_unchecked(1) },
            |from_sq, to_sq| {
                add_capture_promotions::<COLOR>(from_sq, to_sq, piece, position, list);
            },
        );

        // Captures towards file H.
        let mut bb_to = bb_from & !bb_file_h;
        bb_to = match color {
            Color::White => bb_to << 9,
            Color::Black => bb_to >> 7,
        };
        bb_to &= bb_them;
        collect_pawn_moves(
            bb_to & !bb_rank_8 & targets,
            |sq| unsafe { sq.down_unchecked(direction_factor).left_unchecked(1) },
            |from_sq, to_sq| {
                list.push(Move::new_capture(from_sq, to_sq, piece, position[to_sq].expect("Capture target")));
            },
        );
        collect_pawn_moves(
            bb_to & bb_rank_8 & targets,
            |sq| unsafe { sq.down_unchecked(direction_factor).left_unchecked(1) },
            |from_sq, to_sq| {
                add_capture_promotions::<COLOR>(from_sq, to_sq, piece, position, list);
            },
        );

        // Quiet promotions.
        let bb_to = forward_shift::<COLOR>(bb_from, 8) & !bb_occupied & bb_rank_8;
        collect_pawn_moves(
            bb_to & targets,
            |sq| unsafe { sq.down_unchecked(direction_factor) },
            |from_sq, to_sq| {
                for promotion_type in [PieceType::Queen, PieceType::Rook, PieceType::Knight, PieceType::Bishop] {
                    list.push(Move::new_promotion(from_sq, to_sq, piece, Piece::new(color, promotion_type)));
                }
            },
        );

        // En passant captures on a different square than the pawn lands on, so the targets
        // filter does not apply; when generating evasions this can produce moves that do not
        // resolve the check, which the legality test filters out.
        if let Some(sq) = position.en_passant_square() {
            if sq.file() != File::H {
                let from_sq = unsafe { sq.down_unchecked(direction_factor).right_unchecked(1) };
                if position[from_sq] == Some(piece) {
                    list.push(Move::new_en_passant(from_sq, sq, piece));
                }
            }
            if sq.file() != File::A {
                let from_sq = unsafe { sq.down_unchecked(direction_factor).left_unchecked(1) };
                if position[from_sq] == Some(piece) {
                    list.push(Move::new_en_passant(from_sq, sq, piece));
                }
            }
        }
    }
}

fn generate_piece_moves<const COLOR: u8, const PIECE_TYPE: u8>(
    position: &Position,
    targets: Bitboard,
    list: &mut MoveList,
) {
    let piece = Piece::new(COLOR.into(), PIECE_TYPE.into());
    let bb_from = position.occupied(piece);

    for from_sq in bb_from {
        let bb_to = attacks_from::<PIECE_TYPE>(position.occupied(OccupancyFilter::All), from_sq) & targets;
        for to_sq in bb_to {
            match position[to_sq] {
                Some(captured_piece) => list.push(Move::new_capture(from_sq, to_sq, piece, captured_piece)),
                None => list.push(Move::new(from_sq, to_sq, piece)),
            }
        }
    }
}

fn generate_castlings<const COLOR: u8, const SIDE: u8>(position: &Position, list: &mut MoveList) {
    let color = Color::from(COLOR);
    let side = CastlingSide::from(SIDE);

    if !position.can_castle(side) {
        return;
    }

    let rank = Rank::R1.relative_to_color(color);
    let king_final_file = match side {
        CastlingSide::Kingside => File::G,
        CastlingSide::Queenside => File::C,
    };
    let king = Piece::new(color, PieceType::King);
    list.push(Move::new_castling(position.king_square(color), Square::new(king_final_file, rank), king, side));
}

fn generate_moves_color<const TYPE: u8, const COLOR: u8>(position: &Position, list: &mut MoveList) {
    debug_assert!(TYPE != MoveGenerationType::EVASIONS_VALUE || position.is_check());
    debug_assert!(TYPE == MoveGenerationType::EVASIONS_VALUE || !position.is_check());

    let color = Color::from(COLOR);
    let mut targets = Bitboard::EMPTY;

    let checkers = position.checkers();

    // Non-king moves. With multiple checkers only the king can move.
    if TYPE != MoveGenerationType::EVASIONS_VALUE || !checkers.has_many() {
        targets = match TYPE {
            MoveGenerationType::ALL_VALUE => !position.occupied(color),
            MoveGenerationType::QUIET_VALUE => !position.occupied(OccupancyFilter::All),
            MoveGenerationType::CAPTURES_VALUE => position.occupied(!color),
            MoveGenerationType::EVASIONS_VALUE => Bitboard::between(
                position.king_square(color),
                checkers.lsb().expect("Evasions imply at least one checker."),
            ),
            _ => panic!("Invalid MoveGenerationType value"),
        };

        generate_piece_moves::<COLOR, { PieceType::KNIGHT_VALUE }>(position, targets, list);
        generate_piece_moves::<COLOR, { PieceType::BISHOP_VALUE }>(position, targets, list);
        generate_piece_moves::<COLOR, { PieceType::ROOK_VALUE }>(position, targets, list);
        generate_piece_moves::<COLOR, { PieceType::QUEEN_VALUE }>(position, targets, list);
        generate_pawn_moves::<TYPE, COLOR>(position, targets, list);
    }

    // King moves, including castlings.
    targets = if TYPE == MoveGenerationType::EVASIONS_VALUE { !position.occupied(color) } else { targets };
    generate_piece_moves::<COLOR, { PieceType::KING_VALUE }>(position, targets, list);
    if TYPE == MoveGenerationType::ALL_VALUE || TYPE == MoveGenerationType::QUIET_VALUE {
        generate_castlings::<COLOR, { CastlingSide::KINGSIDE_VALUE }>(position, list);
        generate_castlings::<COLOR, { CastlingSide::QUEENSIDE_VALUE }>(position, list);
    }
}

/// Generates pseudo-legal moves of the requested stage into the provided list.
pub fn generate_moves<const TYPE: u8>(position: &Position, list: &mut MoveList) {
    if TYPE == MoveGenerationType::QUIET_CHECKS_VALUE {
        generate_quiet_checks(position, list);
        return;
    }

    match position.side_to_move() {
        Color::White => generate_moves_color::<TYPE, { Color::WHITE_VALUE }>(position, list),
        Color::Black => generate_moves_color::<TYPE, { Color::BLACK_VALUE }>(position, list),
    }
}

/// Generates the quiet moves that give check. Used by the quiescence search during its first
/// plies.
fn generate_quiet_checks(position: &Position, list: &mut MoveList) {
    let mut quiets = MoveList::new();
    match position.side_to_move() {
        Color::White => {
            generate_moves_color::<{ MoveGenerationType::QUIET_VALUE }, { Color::WHITE_VALUE }>(position, &mut quiets)
        }
        Color::Black => {
            generate_moves_color::<{ MoveGenerationType::QUIET_VALUE }, { Color::BLACK_VALUE }>(position, &mut quiets)
        }
    }

    for mv in quiets.iter() {
        if position.gives_check(mv) {
            list.push(mv);
        }
    }
}

/// Generates all pseudo-legal moves for the position: evasions when in check, everything
/// otherwise.
pub fn generate_all_moves(position: &Position, list: &mut MoveList) {
    if position.is_check() {
        generate_moves::<{ MoveGenerationType::EVASIONS_VALUE }>(position, list);
    } else {
        generate_moves::<{ MoveGenerationType::ALL_VALUE }>(position, list);
    }
}

/// Generates all legal moves for the position. Slower than the staged generation; used at the
/// root of the search and by mate detection.
pub fn generate_legal_moves(position: &Position, list: &mut MoveList) {
    let mut pseudo_legal = MoveList::new();
    generate_all_moves(position, &mut pseudo_legal);
    for mv in pseudo_legal.iter() {
        if position.is_legal(mv) {
            list.push(mv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctor::ctor;

    #[ctor]
    fn setup() {
        crate::initialize();
    }

    fn legal_move_count(fen: &str) -> usize {
        let position = Position::new_from_fen(fen).unwrap();
        let mut moves = MoveList::new();
        generate_legal_moves(&position, &mut moves);
        moves.len()
    }

    #[test]
    fn test_initial_position_has_twenty_moves() {
        assert_eq!(legal_move_count("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"), 20);
    }

    #[test]
    fn test_stalemate_has_no_moves() {
        assert_eq!(legal_move_count("4k3/4P3/4K3/8/8/8/8/8 b - - 0 1"), 0);
    }

    #[test]
    fn test_checkmate_has_no_moves() {
        assert_eq!(legal_move_count("R3k3/6R1/8/8/8/8/8/4K3 b - - 0 1"), 0);
    }

    #[test]
    fn test_evasions_are_generated_when_in_check() {
        // Ke8 in check from Bb5: the king can move, the check can be blocked.
        let position = Position::new_from_fen("4k3/8/8/1B6/8/8/8/4K3 b - - 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::EVASIONS_VALUE }>(&position, &mut moves);
        assert!(moves.iter().all(|mv| {
            mv.piece().piece_type() == PieceType::King
                || Bitboard::between(Square::E8, Square::B5).get(mv.to_square())
        }));
    }

    #[test]
    fn test_double_check_only_king_moves() {
        // Rook e1 and bishop b5 both give check.
        let position = Position::new_from_fen("4k3/8/8/1B6/8/8/8/2K1R3 b - - 0 1").unwrap();
        assert!(position.checkers().has_many());

        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::EVASIONS_VALUE }>(&position, &mut moves);
        assert!(moves.iter().all(|mv| mv.piece().piece_type() == PieceType::King));
    }

    #[test]
    fn test_captures_stage_only_generates_captures() {
        let position =
            Position::new_from_fen("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2").unwrap();
        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::CAPTURES_VALUE }>(&position, &mut moves);
        assert!(!moves.is_empty());
        assert!(moves.iter().all(|mv| mv.is_capture()));
    }

    #[test]
    fn test_quiet_stage_only_generates_quiet_moves() {
        let position =
            Position::new_from_fen("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2").unwrap();
        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::QUIET_VALUE }>(&position, &mut moves);
        assert!(moves.iter().all(|mv| !mv.is_capture()));
    }

    #[test]
    fn test_quiet_checks_stage() {
        // The knight can check from f7-adjacent squares; quiet rook lifts to the e-file check as
        // well.
        let position = Position::new_from_fen("4k3/8/8/8/8/5N2/8/R3K3 w Q - 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::QUIET_CHECKS_VALUE }>(&position, &mut moves);
        assert!(!moves.is_empty());
        for mv in moves.iter() {
            assert!(!mv.is_capture());
            assert!(position.gives_check(mv));
        }
    }

    #[test]
    fn test_promotions_are_generated() {
        let position = Position::new_from_fen("4k3/P7/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::CAPTURES_VALUE }>(&position, &mut moves);
        let promotions: Vec<Move> = moves.iter().filter(|mv| mv.promotion().is_some()).collect();
        assert_eq!(promotions.len(), 4);
    }

    #[test]
    fn test_en_passant_is_generated() {
        let position =
            Position::new_from_fen("rnbqkbnr/1pp1pppp/p7/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3").unwrap();
        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::CAPTURES_VALUE }>(&position, &mut moves);
        assert!(moves.contains(Move::new_en_passant(Square::E5, Square::D6, Piece::WHITE_PAWN)));
    }

    #[test]
    fn test_castling_is_generated_and_blocked() {
        let position = Position::new_from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::QUIET_VALUE }>(&position, &mut moves);
        assert!(moves.contains(Move::new_castling(Square::E1, Square::G1, Piece::WHITE_KING, CastlingSide::Kingside)));
        assert!(moves.contains(Move::new_castling(Square::E1, Square::C1, Piece::WHITE_KING, CastlingSide::Queenside)));

        // A rook attacking a crossed square forbids castling on that side.
        let position = Position::new_from_fen("r3k2r/8/8/8/8/8/5r2/R3K2R w KQkq - 0 1").unwrap();
        let mut moves = MoveList::new();
        generate_moves::<{ MoveGenerationType::QUIET_VALUE }>(&position, &mut moves);
        assert!(!moves.contains(Move::new_castling(Square::E1, Square::G1, Piece::WHITE_KING, CastlingSide::Kingside)));
        assert!(moves.contains(Move::new_castling(Square::E1, Square::C1, Piece::WHITE_KING, CastlingSide::Queenside)));
    }
}
