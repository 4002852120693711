use thiserror::Error;

use crate::{
    coordinates::{CoordinatesError, File, Square},
    piece::{Piece, PieceError, PieceType},
    position::Position,
    r#move::{CastlingSide, Move},
};

/// Represents errors that can occur when parsing chess move notation.
#[derive(Error, Debug)]
pub enum NotationError {
    /// The source square of the notation is invalid.
    #[error("Invalid from square: {0}")]
    InvalidFromSquare(CoordinatesError),

    /// The destination square of the notation is invalid.
    #[error("Invalid to square: {0}")]
    InvalidToSquare(CoordinatesError),

    /// The promotion piece of the notation is invalid.
    #[error("Invalid promotion piece: {0}")]
    InvalidPromotion(PieceError),

    /// The overall notation format is incorrect.
    #[error("Invalid notation: {0}")]
    InvalidNotation(String),

    /// There is no piece on the source square.
    #[error("There is no piece on the from square: {0}")]
    NoPieceAtFromSquare(Square),
}

/// Parses a move in UCI coordinate notation ("e2e4", "e7e8q") against a position and builds the
/// corresponding `Move`.
///
/// The position provides the context the bare notation lacks: the moving piece, a possible
/// captured piece, en passant, and castling. Castling is recognized both as the standard king
/// two-file jump and as the king capturing its own rook (the Chess960 convention).
pub fn parse_coordinate_notation(position: &Position, notation: &str) -> Result<Move, NotationError> {
    if notation.len() < 4 || notation.len() > 5 {
        return Err(NotationError::InvalidNotation(notation.to_string()));
    }

    let from = Square::try_from(&notation[0..2]).map_err(NotationError::InvalidFromSquare)?;
    let mut to = Square::try_from(&notation[2..4]).map_err(NotationError::InvalidToSquare)?;

    let piece = position[from].ok_or(NotationError::NoPieceAtFromSquare(from))?;
    let mut maybe_capture = position[to];

    let maybe_promotion = match notation.chars().nth(4) {
        Some(c) => {
            let piece_type = PieceType::try_from(c).map_err(NotationError::InvalidPromotion)?;
            Some(Piece::new(piece.color(), piece_type))
        }
        None => None,
    };

    // A pawn moving diagonally to an empty square must be an en passant capture.
    let en_passant = piece.piece_type() == PieceType::Pawn && maybe_capture.is_none() && from.file() != to.file();

    let mut maybe_castling_side: Option<CastlingSide> = None;
    if piece.piece_type() == PieceType::King {
        // A king capturing its own rook is the Chess960 way of writing castling; the king lands
        // on the standard castling file.
        if let Some(capture) = maybe_capture {
            if capture.color() == piece.color() && capture.piece_type() == PieceType::Rook {
                let side = if to.file() == position.castling_file(CastlingSide::Kingside) {
                    CastlingSide::Kingside
                } else {
                    CastlingSide::Queenside
                };
                let king_file = match side {
                    CastlingSide::Kingside => File::G,
                    CastlingSide::Queenside => File::C,
                };
                maybe_castling_side = Some(side);
                to = Square::new(king_file, to.rank());
                maybe_capture = None;
            }
        }

        // The standard two-file king jump.
        if from.file() == File::E && maybe_castling_side.is_none() {
            if to.file() == File::G {
                maybe_castling_side = Some(CastlingSide::Kingside);
            } else if to.file() == File::C {
                maybe_castling_side = Some(CastlingSide::Queenside);
            }
        }
    }

    if let Some(promotion) = maybe_promotion {
        if let Some(capture) = maybe_capture {
            return Ok(Move::new_capture_promotion(from, to, piece, capture, promotion));
        }
        return Ok(Move::new_promotion(from, to, piece, promotion));
    }

    if let Some(side) = maybe_castling_side {
        return Ok(Move::new_castling(from, to, piece, side));
    }

    if en_passant {
        return Ok(Move::new_en_passant(from, to, piece));
    }

    if let Some(capture) = maybe_capture {
        return Ok(Move::new_capture(from, to, piece, capture));
    }

    if piece.piece_type() == PieceType::Pawn && (from.rank() - to.rank()).abs() == 2 {
        return Ok(Move::new_two_square_pawn_push(from, to, piece));
    }

    Ok(Move::new(from, to, piece))
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
    fn test_parse_basic_and_double_push() {
        let position = Position::new();
        let mv = parse_coordinate_notation(&position, "e2e4").unwrap();
        assert_eq!(mv, Move::new_two_square_pawn_push(Square::E2, Square::E4, Piece::WHITE_PAWN));

        let mv = parse_coordinate_notation(&position, "g1f3").unwrap();
        assert_eq!(mv, Move::new(Square::G1, Square::F3, Piece::WHITE_KNIGHT));
    }

    #[test]
    fn test_parse_capture() {
        let position =
            Position::new_from_fen("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2").unwrap();
        let mv = parse_coordinate_notation(&position, "e4d5").unwrap();
        assert_eq!(mv, Move::new_capture(Square::E4, Square::D5, Piece::WHITE_PAWN, Piece::BLACK_PAWN));
    }

    #[test]
    fn test_parse_promotion() {
        let position = Position::new_from_fen("4k3/P7/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let mv = parse_coordinate_notation(&position, "a7a8q").unwrap();
        assert_eq!(mv, Move::new_promotion(Square::A7, Square::A8, Piece::WHITE_PAWN, Piece::WHITE_QUEEN));

        let mv = parse_coordinate_notation(&position, "a7a8n").unwrap();
        assert_eq!(mv.promotion(), Some(Piece::WHITE_KNIGHT));
    }

    #[test]
    fn test_parse_en_passant() {
        let position =
            Position::new_from_fen("rnbqkbnr/1pp1pppp/p7/3pP3/8/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 3").unwrap();
        let mv = parse_coordinate_notation(&position, "e5d6").unwrap();
        assert_eq!(mv, Move::new_en_passant(Square::E5, Square::D6, Piece::WHITE_PAWN));
    }

    #[test]
    fn test_parse_standard_castling() {
        let position = Position::new_from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let mv = parse_coordinate_notation(&position, "e1g1").unwrap();
        assert_eq!(mv, Move::new_castling(Square::E1, Square::G1, Piece::WHITE_KING, CastlingSide::Kingside));

        let mv = parse_coordinate_notation(&position, "e1c1").unwrap();
        assert_eq!(mv, Move::new_castling(Square::E1, Square::C1, Piece::WHITE_KING, CastlingSide::Queenside));
    }

    #[test]
    fn test_parse_king_takes_rook_castling() {
        let position = Position::new_from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let mv = parse_coordinate_notation(&position, "e1h1").unwrap();
        assert_eq!(mv, Move::new_castling(Square::E1, Square::G1, Piece::WHITE_KING, CastlingSide::Kingside));

        let mv = parse_coordinate_notation(&position, "e1a1").unwrap();
        assert_eq!(mv, Move::new_castling(Square::E1, Square::C1, Piece::WHITE_KING, CastlingSide::Queenside));
    }

    #[test]
    fn test_parse_errors() {
        let position = Position::new();
        assert!(parse_coordinate_notation(&position, "e9e4").is_err());
        assert!(parse_coordinate_notation(&position, "e4").is_err());
        assert!(parse_coordinate_notation(&position, "e4e5x6").is_err());
        assert!(parse_coordinate_notation(&position, "e4e5").is_err()); // No piece on e4.
        assert!(parse_coordinate_notation(&position, "e7e8x").is_err());
    }
}
