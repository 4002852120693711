use rand::random;

use crate::{
    coordinates::{File, Square},
    piece::Piece,
    r#move::CastlingRight,
};

/// Type alias for the Zobrist hash value.
pub type Zobrist = u64;

/// The maximum number of identical pieces the material key can distinguish. Promotions can push a
/// piece count above its starting value, ten knights being the theoretical worst case.
pub const MAX_PIECE_COUNT: usize = 16;

static mut ZOBRIST_PIECE_SQUARE: [Zobrist; Piece::COUNT * Square::COUNT] = [0; Piece::COUNT * Square::COUNT];
static mut ZOBRIST_MATERIAL: [Zobrist; Piece::COUNT * MAX_PIECE_COUNT] = [0; Piece::COUNT * MAX_PIECE_COUNT];
static mut ZOBRIST_EN_PASSANT: [Zobrist; File::COUNT] = [0; File::COUNT];
static mut ZOBRIST_BLACK_TO_MOVE: Zobrist = 0;
static mut ZOBRIST_CASTLING: [Zobrist; CastlingRight::COUNT] = [0; CastlingRight::COUNT];

/// Initializes all Zobrist hash keys used throughout the engine. Must be called once before using
/// any other functions of this module.
pub fn initialize() {
    initialize_zobrist_piece_square();
    initialize_zobrist_material();
    initialize_zobrist_en_passant();
    initialize_zobrist_black_to_move();
    initialize_zobrist_castling();
}

fn initialize_zobrist_piece_square() {
    for piece in Piece::ALL {
        for sq in Square::ALL {
            unsafe {
                ZOBRIST_PIECE_SQUARE[usize::from(piece) * Square::COUNT + usize::from(sq)] = random();
            }
        }
    }
}

fn initialize_zobrist_material() {
    for piece in Piece::ALL {
        for index in 0..MAX_PIECE_COUNT {
            unsafe {
                ZOBRIST_MATERIAL[usize::from(piece) * MAX_PIECE_COUNT + index] = random();
            }
        }
    }
}

fn initialize_zobrist_en_passant() {
    for file in File::ALL {
        unsafe {
            ZOBRIST_EN_PASSANT[usize::from(file)] = random();
        }
    }
}

fn initialize_zobrist_black_to_move() {
    unsafe {
        ZOBRIST_BLACK_TO_MOVE = random();
    }
}

fn initialize_zobrist_castling() {
    // Index zero keeps the default value so the hash of an empty board with no rights is zero.
    for index in 1..CastlingRight::COUNT {
        unsafe {
            ZOBRIST_CASTLING[index] = random();
        }
    }
}

/// Returns the Zobrist hash value for a specific piece on a specific square. This hash is XORed
/// into the position key when pieces are added to or removed from the board.
pub fn zobrist_piece_square(piece: Piece, square: Square) -> Zobrist {
    unsafe { ZOBRIST_PIECE_SQUARE[usize::from(piece) * Square::COUNT + usize::from(square)] }
}

/// Returns the Zobrist hash value for owning the `index`-th copy of a piece. The material key of
/// a position is the XOR of these values for every piece on the board, so it depends only on
/// piece counts, never on squares.
pub fn zobrist_material(piece: Piece, index: usize) -> Zobrist {
    debug_assert!(index < MAX_PIECE_COUNT);
    unsafe { ZOBRIST_MATERIAL[usize::from(piece) * MAX_PIECE_COUNT + index] }
}

/// Returns the Zobrist hash value for an en passant opportunity on the file of the given square,
/// or zero when there is none.
pub fn zobrist_en_passant(square: Option<Square>) -> Zobrist {
    match square {
        Some(square) => unsafe { ZOBRIST_EN_PASSANT[usize::from(square.file())] },
        None => 0,
    }
}

/// Returns the Zobrist hash value that toggles the side to move.
pub fn zobrist_black_to_move() -> Zobrist {
    unsafe { ZOBRIST_BLACK_TO_MOVE }
}

/// Returns the Zobrist hash value for a castling-rights combination.
pub fn zobrist_castling(castling_right: CastlingRight) -> Zobrist {
    unsafe { ZOBRIST_CASTLING[usize::from(castling_right.bits())] }
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
    fn test_keys_are_distinct() {
        assert_ne!(zobrist_piece_square(Piece::WHITE_PAWN, Square::E2), 0);
        assert_ne!(
            zobrist_piece_square(Piece::WHITE_PAWN, Square::E2),
            zobrist_piece_square(Piece::WHITE_PAWN, Square::E4)
        );
        assert_ne!(zobrist_material(Piece::WHITE_QUEEN, 0), zobrist_material(Piece::WHITE_QUEEN, 1));
        assert_ne!(zobrist_black_to_move(), 0);
    }

    #[test]
    fn test_empty_values_are_zero() {
        assert_eq!(zobrist_en_passant(None), 0);
        assert_eq!(zobrist_castling(CastlingRight::empty()), 0);
    }
}
