use crate::{
    bitboard::Bitboard,
    coordinates::{File, Square},
    piece::{Color, PieceType},
};

/// Initializes the attack tables. This function must be called before using any other functions
/// in this module.
pub fn initialize() {
    pext_sliders::initialize();
    initialize_king_attacks();
    initialize_knight_attacks();
    initialize_empty_board_sliders();
    initialize_pawn_masks();
}

mod naive_sliders {
    use crate::{bitboard::Bitboard, coordinates::Square};

    /// Returns a bitboard with all squares attacked by a rook on a given square. Too slow for
    /// move generation, used only to seed the lookup tables.
    pub fn attacks_from_rook(occupied: Bitboard, from_sq: Square) -> Bitboard {
        let mut attacks = Bitboard::EMPTY;

        let directions = [Square::up, Square::down, Square::left, Square::right];
        for direction in directions.iter() {
            let mut to = from_sq;
            while let Ok(sq) = direction(to, 1) {
                to = sq;
                attacks |= to;
                if occupied.get(to) {
                    break;
                }
            }
        }

        attacks
    }

    /// Returns a bitboard with all squares attacked by a bishop on a given square. Too slow for
    /// move generation, used only to seed the lookup tables.
    pub fn attacks_from_bishop(occupied: Bitboard, from_sq: Square) -> Bitboard {
        let mut attacks = Bitboard::EMPTY;

        let directions = [
            |sq: Square| sq.up(1).and_then(|sq| sq.right(1)),
            |sq: Square| sq.up(1).and_then(|sq| sq.left(1)),
            |sq: Square| sq.down(1).and_then(|sq| sq.right(1)),
            |sq: Square| sq.down(1).and_then(|sq| sq.left(1)),
        ];

        for direction in directions.iter() {
            let mut to = from_sq;
            while let Ok(sq) = direction(to) {
                to = sq;
                attacks |= to;
                if occupied.get(to) {
                    break;
                }
            }
        }

        attacks
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::coordinates::{File, Rank};

        #[test]
        fn test_attacks_from_rook_with_obstructions() {
            let occupied = Square::E4 | Square::B4 | Square::G4 | Square::E2 | Square::E7;
            let expected = Square::E2
                | Square::E3
                | Square::E5
                | Square::E6
                | Square::E7
                | Square::B4
                | Square::C4
                | Square::D4
                | Square::F4
                | Square::G4;
            assert_eq!(attacks_from_rook(occupied, Square::E4), expected);
        }

        #[test]
        fn test_attacks_from_rook_in_corner() {
            let expected = Bitboard::from(File::A) ^ Bitboard::from(Rank::R1) ^ Bitboard::from(Square::A1);
            assert_eq!(attacks_from_rook(Bitboard::from(Square::A1), Square::A1), expected);
        }

        #[test]
        fn test_attacks_from_bishop_with_obstructions() {
            let occupied = Square::E4 | Square::C2 | Square::G2 | Square::B7 | Square::G6;
            let expected = Square::D3
                | Square::C2
                | Square::F3
                | Square::G2
                | Square::D5
                | Square::C6
                | Square::B7
                | Square::F5
                | Square::G6;
            assert_eq!(attacks_from_bishop(occupied, Square::E4), expected);
        }
    }
}

mod pext_sliders {
    use std::{array, mem::MaybeUninit};

    use crate::{
        bitboard::Bitboard,
        coordinates::{File, Rank, Square},
    };

    /// The data required to index the attack lookup table of one square.
    pub struct PextData {
        mask: Bitboard,
        lookup: Vec<Bitboard>,
    }

    static mut ROOK_PEXT_DATA: MaybeUninit<[PextData; Square::COUNT]> = MaybeUninit::uninit();
    static mut BISHOP_PEXT_DATA: MaybeUninit<[PextData; Square::COUNT]> = MaybeUninit::uninit();

    pub fn initialize() {
        let rooks = array::from_fn(|index| rook_pext_data_for_square(Square::from(index as u8)));
        let bishops = array::from_fn(|index| bishop_pext_data_for_square(Square::from(index as u8)));
        unsafe {
            ROOK_PEXT_DATA.write(rooks);
            BISHOP_PEXT_DATA.write(bishops);
        }
    }

    fn rook_pext_data_for_square(sq: Square) -> PextData {
        let first_and_last_rank: Bitboard = Rank::R1 | Rank::R8;
        let first_and_last_file: Bitboard = File::A | File::H;

        let mask = ((sq.file() & !first_and_last_rank) | (sq.rank() & !first_and_last_file)) & !Bitboard::from(sq);
        let lookup_size = 1u64 << mask.popcnt();
        let lookup: Vec<Bitboard> =
            (0..lookup_size).map(|index| super::naive_sliders::attacks_from_rook(mask.pdep(index), sq)).collect();

        PextData { mask, lookup }
    }

    fn bishop_pext_data_for_square(sq: Square) -> PextData {
        let border = Bitboard::from(Rank::R1) | Rank::R8 | File::A | File::H;
        let mask = (Bitboard::from(sq.diagonal()) ^ Bitboard::from(sq.antidiagonal())) & !border;
        let lookup_size = 1u64 << mask.popcnt();
        let lookup: Vec<Bitboard> =
            (0..lookup_size).map(|index| super::naive_sliders::attacks_from_bishop(mask.pdep(index), sq)).collect();

        PextData { mask, lookup }
    }

    /// Returns a bitboard with all squares attacked by a rook on a given square.
    pub fn attacks_from_rook(occupied: Bitboard, from_sq: Square) -> Bitboard {
        let pext_data = unsafe { &(*ROOK_PEXT_DATA.as_ptr())[usize::from(from_sq)] };
        pext_data.lookup[occupied.pext(pext_data.mask) as usize]
    }

    /// Returns a bitboard with all squares attacked by a bishop on a given square.
    pub fn attacks_from_bishop(occupied: Bitboard, from_sq: Square) -> Bitboard {
        let pext_data = unsafe { &(*BISHOP_PEXT_DATA.as_ptr())[usize::from(from_sq)] };
        pext_data.lookup[occupied.pext(pext_data.mask) as usize]
    }
}

//======================================================================================================================
// Step attacks (king, knight) and empty-board slider rays
//======================================================================================================================

static mut KING_ATTACKS: [Bitboard; Square::COUNT] = [Bitboard::EMPTY; Square::COUNT];
static mut KNIGHT_ATTACKS: [Bitboard; Square::COUNT] = [Bitboard::EMPTY; Square::COUNT];
static mut ROOK_RAYS: [Bitboard; Square::COUNT] = [Bitboard::EMPTY; Square::COUNT];
static mut BISHOP_RAYS: [Bitboard; Square::COUNT] = [Bitboard::EMPTY; Square::COUNT];

fn initialize_king_attacks() {
    let directions = [
        |sq: Square| sq.up(1),
        |sq: Square| sq.down(1),
        |sq: Square| sq.left(1),
        |sq: Square| sq.right(1),
        |sq: Square| sq.up(1).and_then(|sq| sq.left(1)),
        |sq: Square| sq.up(1).and_then(|sq| sq.right(1)),
        |sq: Square| sq.down(1).and_then(|sq| sq.left(1)),
        |sq: Square| sq.down(1).and_then(|sq| sq.right(1)),
    ];

    for square in Square::ALL {
        let mut sq_attacks = Bitboard::EMPTY;
        for direction in directions.iter() {
            if let Ok(to) = direction(square) {
                sq_attacks |= to;
            }
        }
        unsafe { KING_ATTACKS[usize::from(square)] = sq_attacks };
    }
}

fn initialize_knight_attacks() {
    let directions = [
        |sq: Square| sq.up(2).and_then(|sq| sq.left(1)),
        |sq: Square| sq.up(2).and_then(|sq| sq.right(1)),
        |sq: Square| sq.down(2).and_then(|sq| sq.left(1)),
        |sq: Square| sq.down(2).and_then(|sq| sq.right(1)),
        |sq: Square| sq.left(2).and_then(|sq| sq.up(1)),
        |sq: Square| sq.left(2).and_then(|sq| sq.down(1)),
        |sq: Square| sq.right(2).and_then(|sq| sq.up(1)),
        |sq: Square| sq.right(2).and_then(|sq| sq.down(1)),
    ];

    for square in Square::ALL {
        let mut sq_attacks = Bitboard::EMPTY;
        for direction in directions.iter() {
            if let Ok(to) = direction(square) {
                sq_attacks |= to;
            }
        }
        unsafe { KNIGHT_ATTACKS[usize::from(square)] = sq_attacks };
    }
}

fn initialize_empty_board_sliders() {
    for square in Square::ALL {
        unsafe {
            ROOK_RAYS[usize::from(square)] = attacks_from::<{ PieceType::ROOK_VALUE }>(Bitboard::EMPTY, square);
            BISHOP_RAYS[usize::from(square)] = attacks_from::<{ PieceType::BISHOP_VALUE }>(Bitboard::EMPTY, square);
        }
    }
}

/// Returns the squares a rook on the given square would attack on an empty board.
pub fn attacks_from_rooks(square: Square) -> Bitboard {
    unsafe { ROOK_RAYS[usize::from(square)] }
}

/// Returns the squares a bishop on the given square would attack on an empty board.
pub fn attacks_from_bishops(square: Square) -> Bitboard {
    unsafe { BISHOP_RAYS[usize::from(square)] }
}

fn attacks_from_kings(square: Square) -> Bitboard {
    unsafe { KING_ATTACKS[usize::from(square)] }
}

fn attacks_from_knights(square: Square) -> Bitboard {
    unsafe { KNIGHT_ATTACKS[usize::from(square)] }
}

/// Returns the squares attacked by a pawn of the given color from the given square.
pub fn attacks_from_pawns(color: Color, sq: Square) -> Bitboard {
    let sq_bb = Bitboard::from(sq);
    if color == Color::White {
        ((sq_bb & !Bitboard::from(File::A)) << 7) | ((sq_bb & !Bitboard::from(File::H)) << 9)
    } else {
        ((sq_bb & !Bitboard::from(File::A)) >> 9) | ((sq_bb & !Bitboard::from(File::H)) >> 7)
    }
}

/// Returns a bitboard with all squares attacked by a piece of the given type from a given square.
///
/// The type is a compile-time constant so the dispatch is optimized away. For sliding pieces the
/// occupied squares block the attack rays; for kings and knights `occupied` is ignored. Pawns
/// have color-dependent attacks and are handled by `attacks_from_pawns` instead.
pub fn attacks_from<const PIECE_TYPE_VALUE: u8>(occupied: Bitboard, sq: Square) -> Bitboard {
    match PIECE_TYPE_VALUE {
        PieceType::KING_VALUE => attacks_from_kings(sq),
        PieceType::KNIGHT_VALUE => attacks_from_knights(sq),
        PieceType::ROOK_VALUE => pext_sliders::attacks_from_rook(occupied, sq),
        PieceType::BISHOP_VALUE => pext_sliders::attacks_from_bishop(occupied, sq),
        PieceType::QUEEN_VALUE => {
            pext_sliders::attacks_from_rook(occupied, sq) | pext_sliders::attacks_from_bishop(occupied, sq)
        }
        _ => unimplemented!("Piece type not implemented"),
    }
}

/// Returns a bitboard with all squares attacked by a piece of the given runtime type.
pub fn attacks_from_piece_type(piece_type: PieceType, occupied: Bitboard, sq: Square) -> Bitboard {
    match piece_type {
        PieceType::King => attacks_from::<{ PieceType::KING_VALUE }>(occupied, sq),
        PieceType::Knight => attacks_from::<{ PieceType::KNIGHT_VALUE }>(occupied, sq),
        PieceType::Rook => attacks_from::<{ PieceType::ROOK_VALUE }>(occupied, sq),
        PieceType::Bishop => attacks_from::<{ PieceType::BISHOP_VALUE }>(occupied, sq),
        PieceType::Queen => attacks_from::<{ PieceType::QUEEN_VALUE }>(occupied, sq),
        PieceType::Pawn => unimplemented!("Pawn attacks depend on color"),
    }
}

//======================================================================================================================
// Pawn structure masks
//======================================================================================================================

static mut FORWARD_SPANS: [[Bitboard; Square::COUNT]; Color::COUNT] =
    [[Bitboard::EMPTY; Square::COUNT]; Color::COUNT];
static mut PASSED_PAWN_MASKS: [[Bitboard; Square::COUNT]; Color::COUNT] =
    [[Bitboard::EMPTY; Square::COUNT]; Color::COUNT];
static mut ATTACK_SPANS: [[Bitboard; Square::COUNT]; Color::COUNT] =
    [[Bitboard::EMPTY; Square::COUNT]; Color::COUNT];
static mut ADJACENT_FILES: [Bitboard; File::COUNT] = [Bitboard::EMPTY; File::COUNT];

fn initialize_pawn_masks() {
    for file in File::ALL {
        let mut adjacent = Bitboard::EMPTY;
        if let Ok(left) = file.left(1) {
            adjacent |= left;
        }
        if let Ok(right) = file.right(1) {
            adjacent |= right;
        }
        unsafe { ADJACENT_FILES[usize::from(file)] = adjacent };
    }

    for color in Color::ALL {
        for square in Square::ALL {
            let mut span = Bitboard::EMPTY;
            let mut next = square.up(color.forward());
            while let Ok(sq) = next {
                span |= sq;
                next = sq.up(color.forward());
            }

            let mut ranks_ahead = Bitboard::EMPTY;
            let mut next = square.rank().up(color.forward());
            while let Ok(rank) = next {
                ranks_ahead |= rank;
                next = rank.up(color.forward());
            }

            let adjacent = unsafe { ADJACENT_FILES[usize::from(square.file())] };
            let sides = adjacent & ranks_ahead;

            unsafe {
                FORWARD_SPANS[usize::from(color)][usize::from(square)] = span;
                PASSED_PAWN_MASKS[usize::from(color)][usize::from(square)] = span | sides;
                ATTACK_SPANS[usize::from(color)][usize::from(square)] = sides;
            }
        }
    }
}

/// Returns the squares in front of the given square on its own file, from the point of view of
/// the given color.
pub fn forward_span(color: Color, square: Square) -> Bitboard {
    unsafe { FORWARD_SPANS[usize::from(color)][usize::from(square)] }
}

/// Returns the squares a pawn of the given color on the given square must clear of enemy pawns
/// to be passed: the forward span of its own file and of both adjacent files.
pub fn passed_pawn_mask(color: Color, square: Square) -> Bitboard {
    unsafe { PASSED_PAWN_MASKS[usize::from(color)][usize::from(square)] }
}

/// Returns the squares a pawn of the given color on the given square could ever attack as it
/// advances (the forward spans of the adjacent files). Used for outpost and backward detection.
pub fn pawn_attack_span(color: Color, square: Square) -> Bitboard {
    unsafe { ATTACK_SPANS[usize::from(color)][usize::from(square)] }
}

/// Returns a bitboard of the files adjacent to the given file.
pub fn adjacent_files(file: File) -> Bitboard {
    unsafe { ADJACENT_FILES[usize::from(file)] }
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
    fn test_attacks_from_knight() {
        let expected = Square::D2 | Square::F2 | Square::C3 | Square::G3 | Square::C5 | Square::G5
            | Square::D6
            | Square::F6;
        assert_eq!(attacks_from::<{ PieceType::KNIGHT_VALUE }>(Bitboard::EMPTY, Square::E4), expected);

        let corner = Square::B3 | Square::C2;
        assert_eq!(attacks_from::<{ PieceType::KNIGHT_VALUE }>(Bitboard::EMPTY, Square::A1), corner);
    }

    #[test]
    fn test_attacks_from_king() {
        let expected = Square::A2 | Square::B1 | Square::B2;
        assert_eq!(attacks_from::<{ PieceType::KING_VALUE }>(Bitboard::EMPTY, Square::A1), expected);
    }

    #[test]
    fn test_attacks_from_sliders_respect_occupancy() {
        let occupied = Square::E4 | Square::E6 | Square::C4;
        let rook = attacks_from::<{ PieceType::ROOK_VALUE }>(occupied, Square::E4);
        assert!(rook.get(Square::E6));
        assert!(!rook.get(Square::E7));
        assert!(rook.get(Square::C4));
        assert!(!rook.get(Square::B4));
        assert!(rook.get(Square::H4));

        let queen = attacks_from::<{ PieceType::QUEEN_VALUE }>(occupied, Square::E4);
        assert_eq!(queen, rook | attacks_from::<{ PieceType::BISHOP_VALUE }>(occupied, Square::E4));
    }

    #[test]
    fn test_attacks_from_pawns() {
        assert_eq!(attacks_from_pawns(Color::White, Square::E4), Square::D5 | Square::F5);
        assert_eq!(attacks_from_pawns(Color::Black, Square::E4), Square::D3 | Square::F3);
        assert_eq!(attacks_from_pawns(Color::White, Square::A2), Bitboard::from(Square::B3));
        assert_eq!(attacks_from_pawns(Color::Black, Square::H7), Bitboard::from(Square::G6));
    }

    #[test]
    fn test_forward_span() {
        assert_eq!(forward_span(Color::White, Square::E6), Square::E7 | Square::E8);
        assert_eq!(forward_span(Color::Black, Square::E3), Square::E2 | Square::E1);
        assert_eq!(forward_span(Color::White, Square::A8), Bitboard::EMPTY);
    }

    #[test]
    fn test_passed_pawn_mask() {
        let mask = passed_pawn_mask(Color::White, Square::E6);
        assert_eq!(mask, Square::D7 | Square::E7 | Square::F7 | Square::D8 | Square::E8 | Square::F8);

        let edge = passed_pawn_mask(Color::White, Square::A6);
        assert_eq!(edge, Square::A7 | Square::B7 | Square::A8 | Square::B8);
    }

    #[test]
    fn test_adjacent_files() {
        assert_eq!(adjacent_files(File::A), Bitboard::from(File::B));
        assert_eq!(adjacent_files(File::E), Bitboard::from(File::D) | Bitboard::from(File::F));
    }
}
