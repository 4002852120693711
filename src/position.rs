use std::{mem::MaybeUninit, ops::Index};

use thiserror::Error;

use crate::{
    bitboard::Bitboard,
    coordinates::{File, Rank, Square},
    eval::{get_piece_square_value, non_pawn_material_value, piece_type_value, Eval, EvalPair},
    move_gen::attacks::{attacks_from, attacks_from_bishops, attacks_from_pawns, attacks_from_rooks},
    piece::{Color, Piece, PieceType},
    r#move::{CastlingRight, CastlingSide, Move, MoveType},
    zobrist::{
        zobrist_black_to_move, zobrist_castling, zobrist_en_passant, zobrist_material, zobrist_piece_square, Zobrist,
    },
};

/// Error type for parsing a FEN (Forsyth-Edwards Notation) string.
#[derive(Error, Debug, PartialEq)]
pub enum FenError {
    #[error("Invalid piece placement field")]
    InvalidPiecePlacement,

    #[error("Invalid active color field")]
    InvalidActiveColor,

    #[error("Invalid castling availability field")]
    InvalidCastlingAvailability,

    #[error("Invalid en passant field")]
    InvalidEnPassantSquare,

    #[error("Invalid halfmove clock field")]
    InvalidHalfmoveClock,

    #[error("Invalid fullmove number field")]
    InvalidFullmoveNumber,

    #[error("Missing field")]
    MissingField,
}

//======================================================================================================================
// OccupancyFilter implementation
//======================================================================================================================

/// Filtering criteria for retrieving occupied squares from a position.
///
/// The filter is usually built implicitly through the `From` conversions, so call sites read
/// `position.occupied(Color::White)` or `position.occupied((color, PieceType::Rook))`.
pub enum OccupancyFilter {
    All,
    ByColor(Color),
    ByType(PieceType),
    ByPiece(Piece),
    ByColorAndType(Color, PieceType),
    ByColorAndTwoTypes(Color, PieceType, PieceType),
}

impl From<Color> for OccupancyFilter {
    fn from(color: Color) -> Self {
        Self::ByColor(color)
    }
}

impl From<PieceType> for OccupancyFilter {
    fn from(piece_type: PieceType) -> Self {
        Self::ByType(piece_type)
    }
}

impl From<Piece> for OccupancyFilter {
    fn from(piece: Piece) -> Self {
        Self::ByPiece(piece)
    }
}

impl From<(Color, PieceType)> for OccupancyFilter {
    fn from((color, piece_type): (Color, PieceType)) -> Self {
        Self::ByColorAndType(color, piece_type)
    }
}

impl From<(Color, PieceType, PieceType)> for OccupancyFilter {
    fn from((color, type1, type2): (Color, PieceType, PieceType)) -> Self {
        Self::ByColorAndTwoTypes(color, type1, type2)
    }
}

//======================================================================================================================
// Game state implementation
//======================================================================================================================

/// The part of a position that cannot be recomputed when a move is unmade. A copy is pushed on
/// the history stack by `make` and restored by `unmake`.
#[derive(Clone, Copy)]
pub struct GameState {
    side_to_move: Color,
    castling_rights: CastlingRight,
    en_passant_square: Option<Square>,
    halfmove_clock: u16,
    fullmove_number: u16,
    last_move: Option<Move>,
    blockers: Bitboard,
    checkers: Bitboard,
    psqt_eval: EvalPair,
    non_pawn_material: [i32; Color::COUNT],
    zobrist: Zobrist,
    pawn_zobrist: Zobrist,
    material_zobrist: Zobrist,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            side_to_move: Color::White,
            castling_rights: CastlingRight::empty(),
            en_passant_square: None,
            halfmove_clock: 0,
            fullmove_number: 1,
            last_move: None,
            blockers: Bitboard::EMPTY,
            checkers: Bitboard::EMPTY,
            psqt_eval: EvalPair::default(),
            non_pawn_material: [0; Color::COUNT],
            zobrist: 0,
            pawn_zobrist: 0,
            material_zobrist: 0,
        }
    }
}

//======================================================================================================================
// History implementation
//======================================================================================================================

const MAX_HISTORY: usize = 2048;

/// A stack of previous game states, used to unmake moves and to detect repetitions.
///
/// The storage is a fixed-size array to avoid heap allocations during the search. The array is
/// left uninitialized; `len` guarantees only written entries are ever read.
pub struct History {
    states: [GameState; MAX_HISTORY],
    len: usize,
}

impl Default for History {
    fn default() -> Self {
        Self {
            states: unsafe {
                let block = MaybeUninit::uninit();
                block.assume_init()
            },
            len: 0,
        }
    }
}

impl Clone for History {
    /// Clones only the used prefix of the stack. A position is cloned at every split point, so
    /// copying the unused capacity would be wasted work.
    fn clone(&self) -> Self {
        let mut states: [GameState; MAX_HISTORY] = unsafe {
            let block = MaybeUninit::uninit();
            block.assume_init()
        };
        states[..self.len].copy_from_slice(&self.states[..self.len]);
        Self { states, len: self.len }
    }
}

impl History {
    /// Adds a game state to the history.
    pub fn push(&mut self, state: GameState) {
        debug_assert!(self.len < MAX_HISTORY);

        self.states[self.len] = state;
        self.len += 1;
    }

    /// Removes and returns the most recent game state.
    pub fn pop(&mut self) -> GameState {
        debug_assert!(self.len > 0);

        self.len -= 1;
        self.states[self.len]
    }

    /// Returns the number of states in the history.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the history is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Index<usize> for History {
    type Output = GameState;

    fn index(&self, index: usize) -> &Self::Output {
        debug_assert!(index < self.len);
        &self.states[index]
    }
}

//======================================================================================================================
// Position implementation
//======================================================================================================================

/// A chess position.
///
/// Besides the board itself the position maintains, incrementally on every make/unmake: the
/// Zobrist key, a pawn key (pawns and kings only), a material key (piece counts only), the
/// middle game / end game piece-square sums, the non-pawn material of both colors, the checkers
/// bitboard and the pieces blocking an attack on the friendly king.
#[derive(Clone)]
pub struct Position {
    board: [Option<Piece>; Square::COUNT],
    bb_color: [Bitboard; Color::COUNT],
    bb_piece: [Bitboard; Piece::COUNT],
    piece_counts: [u8; Piece::COUNT],
    castling_rook_file: [File; CastlingSide::COUNT],
    castling_path: [Bitboard; CastlingSide::COUNT],
    castling_rights_mask: [CastlingRight; Square::COUNT],
    state: GameState,
    history: History,
}

impl Position {
    //==================================================================================================================
    // FEN reading
    //==================================================================================================================

    fn read_piece_placement(&mut self, piece_placement: &str) -> Result<(), FenError> {
        let mut file = Some(File::A);
        let mut rank = Some(Rank::R8);
        for c in piece_placement.chars() {
            if let Ok(piece) = Piece::try_from(c) {
                let rank_value = rank.ok_or(FenError::InvalidPiecePlacement)?;
                let file_value = file.ok_or(FenError::InvalidPiecePlacement)?;
                let square = Square::new(file_value, rank_value);
                if self.board[usize::from(square)].is_some() {
                    return Err(FenError::InvalidPiecePlacement);
                }
                self.put_piece(piece, square);
                file = file_value.right(1).ok();
            } else if let Some(number) = c.to_digit(10) {
                file = match file {
                    Some(file) => file.right(number as i8).ok(),
                    None => return Err(FenError::InvalidPiecePlacement),
                };
            } else if c == '/' {
                rank = rank.ok_or(FenError::InvalidPiecePlacement)?.down(1).ok();
                file = Some(File::A);
            } else {
                return Err(FenError::InvalidPiecePlacement);
            }
        }

        // Both kings must be on the board for the rest of the engine to make sense of the
        // position.
        if !self.occupied((Color::White, PieceType::King)).has_one()
            || !self.occupied((Color::Black, PieceType::King)).has_one()
        {
            return Err(FenError::InvalidPiecePlacement);
        }
        Ok(())
    }

    fn read_active_color(&mut self, active_color: &str) -> Result<(), FenError> {
        self.set_side_to_move(match active_color {
            "w" => Color::White,
            "b" => Color::Black,
            _ => return Err(FenError::InvalidActiveColor),
        });
        Ok(())
    }

    fn read_castling(&mut self, castling_availability: &str) -> Result<(), FenError> {
        let mut file_set: [Option<File>; CastlingSide::COUNT] = [None; CastlingSide::COUNT];

        for c in castling_availability.chars() {
            let color;
            let king_file;

            match c {
                'K' | 'Q' | 'k' | 'q' | 'A'..='H' | 'a'..='h' => {
                    color = if c.is_uppercase() { Color::White } else { Color::Black };
                    king_file = self.king_square(color).file();
                }
                '-' => break,
                _ => return Err(FenError::InvalidCastlingAvailability),
            }

            let castling_file = match c {
                'K' | 'k' => (self.occupied((color, PieceType::Rook))
                    & Bitboard::from(Rank::R1.relative_to_color(color)))
                .msb()
                .ok_or(FenError::InvalidCastlingAvailability)?
                .file(),
                'Q' | 'q' => (self.occupied((color, PieceType::Rook))
                    & Bitboard::from(Rank::R1.relative_to_color(color)))
                .lsb()
                .ok_or(FenError::InvalidCastlingAvailability)?
                .file(),
                'A'..='H' | 'a'..='h' => File::try_from(c).map_err(|_| FenError::InvalidCastlingAvailability)?,
                _ => unreachable!(),
            };

            let (castling_side, king_to_file, rook_to_file) = if castling_file < king_file {
                (CastlingSide::Queenside, File::C, File::D)
            } else {
                (CastlingSide::Kingside, File::G, File::F)
            };

            // The same side cannot be registered with two different rook files.
            if let Some(file) = file_set[usize::from(castling_side)] {
                if file != castling_file {
                    return Err(FenError::InvalidCastlingAvailability);
                }
            }

            let right = CastlingRight::new(color, castling_side);
            self.state.castling_rights |= right;
            self.castling_rook_file[usize::from(castling_side)] = castling_file;

            // Compute the squares that must be empty for this castling, on both back ranks.
            let king_from = Square::new(king_file, Rank::R1);
            let king_to = Square::new(king_to_file, Rank::R1);
            let rook_from = Square::new(castling_file, Rank::R1);
            let rook_to = Square::new(rook_to_file, Rank::R1);
            let mut mask = Bitboard::between(king_from, king_to) | Bitboard::between(rook_from, rook_to);
            mask &= !(king_from | rook_from);
            mask |= mask << 56;
            self.castling_path[usize::from(castling_side)] = mask;

            // The right is lost as soon as the king or this rook moves.
            let rank = Rank::R1.relative_to_color(color);
            self.castling_rights_mask[usize::from(Square::new(king_file, rank))] |= right;
            self.castling_rights_mask[usize::from(Square::new(castling_file, rank))] |= right;

            file_set[usize::from(castling_side)] = Some(castling_file);
        }

        self.state.zobrist ^= zobrist_castling(self.state.castling_rights);

        Ok(())
    }

    fn read_en_passant_square(&mut self, en_passant_square: &str) -> Result<(), FenError> {
        if en_passant_square == "-" {
            return Ok(());
        }

        let square =
            Square::try_from(en_passant_square).map_err(|_| FenError::InvalidEnPassantSquare)?;

        // Only keep the square if an enemy pawn could actually capture en passant; this keeps
        // the key identical whether the position was reached by moves or set up from a FEN.
        let us = self.side_to_move();
        let capturers = attacks_from_pawns(!us, square) & self.occupied((us, PieceType::Pawn));
        if capturers.has_any() {
            self.set_en_passant(Some(square));
        }
        Ok(())
    }

    /// Creates a new chess position from a FEN (Forsyth-Edwards Notation) string.
    ///
    /// The six FEN fields are piece placement, active color, castling availability, en passant
    /// target square, halfmove clock and fullmove number. The last four fields are optional.
    /// Castling availability accepts both the standard `KQkq` letters and the file letters used
    /// for Chess960.
    pub fn new_from_fen(fen: &str) -> Result<Self, FenError> {
        let mut position = Position::default();

        let mut fields = fen.split_whitespace();
        position.read_piece_placement(fields.next().ok_or(FenError::MissingField)?)?;
        position.read_active_color(fields.next().ok_or(FenError::MissingField)?)?;
        position.read_castling(fields.next().unwrap_or("-"))?;
        position.read_en_passant_square(fields.next().unwrap_or("-"))?;

        position.state.halfmove_clock =
            fields.next().unwrap_or("0").parse().map_err(|_| FenError::InvalidHalfmoveClock)?;

        position.state.fullmove_number =
            fields.next().unwrap_or("1").parse().map_err(|_| FenError::InvalidFullmoveNumber)?;

        position.state.blockers = position.blockers(position.side_to_move());
        position.state.checkers = position.attacks_to(
            position.king_square(position.side_to_move()),
            position.occupied(OccupancyFilter::All),
            !position.side_to_move(),
        );

        Ok(position)
    }

    /// Creates a new chess position with the standard initial board setup.
    pub fn new() -> Self {
        const INITIAL_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
        Self::new_from_fen(INITIAL_POSITION)
            .expect("The initial position FEN is always parsed successfully.")
    }

    //==================================================================================================================
    // FEN writing
    //==================================================================================================================

    fn write_piece_placement(&self) -> String {
        let mut result = String::with_capacity(70);
        for rank in Rank::ALL.iter().rev() {
            let mut empty_count = 0;
            for file in File::ALL {
                let square = Square::new(file, *rank);
                if let Some(piece) = self[square] {
                    if empty_count > 0 {
                        result.push_str(&empty_count.to_string());
                        empty_count = 0;
                    }
                    result.push(piece.into());
                } else {
                    empty_count += 1;
                }
            }
            if empty_count > 0 {
                result.push_str(&empty_count.to_string());
            }
            if rank != &Rank::R1 {
                result.push('/');
            }
        }
        result
    }

    fn write_castling(&self) -> String {
        if self.castling_availability().is_empty() {
            return String::from("-");
        }

        let mut result = String::with_capacity(4);
        for color in Color::ALL {
            for side in CastlingSide::ALL {
                let right = CastlingRight::new(color, side);
                if !self.castling_availability().contains(right) {
                    continue;
                }

                let candidate_rooks =
                    self.occupied((color, PieceType::Rook)) & Bitboard::from(Rank::R1.relative_to_color(color));
                let outermost_rook =
                    if side == CastlingSide::Queenside { candidate_rooks.lsb() } else { candidate_rooks.msb() }
                        .expect("A registered castling right implies a rook on the back rank.");

                // Use the standard letter when the castling rook is the outermost one, the
                // Chess960 file letter otherwise.
                let castling_char = if self.castling_file(side) == outermost_rook.file() {
                    match side {
                        CastlingSide::Queenside => 'q',
                        CastlingSide::Kingside => 'k',
                    }
                } else {
                    self.castling_file(side).into()
                };

                result.push(if color == Color::White { castling_char.to_ascii_uppercase() } else { castling_char });
            }
        }
        result
    }

    fn write_en_passant(&self) -> String {
        match self.en_passant_square() {
            Some(square) => square.to_string(),
            None => String::from("-"),
        }
    }

    /// Returns the FEN (Forsyth-Edwards Notation) representation of the position.
    pub fn to_fen(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.write_piece_placement(),
            char::from(self.side_to_move()),
            self.write_castling(),
            self.write_en_passant(),
            self.state.halfmove_clock,
            self.state.fullmove_number
        )
    }

    /// Generates a compact text representation of the board, rank 8 on top, pieces as FEN
    /// letters and empty squares as dots.
    pub fn to_compact_string(&self) -> String {
        let mut board = String::with_capacity(171);
        for rank in Rank::ALL.iter().rev() {
            board.push_str(&format!("{}  ", rank));
            for file in File::ALL {
                match self[Square::new(file, *rank)] {
                    Some(piece) => board.push(piece.into()),
                    None => board.push('.'),
                }
                board.push(if file != File::H { ' ' } else { '\n' });
            }
        }
        board.push_str("   a b c d e f g h");
        board
    }

    //==================================================================================================================
    // Accessors
    //==================================================================================================================

    /// Returns a bitboard of squares occupied by pieces matching the specified filter.
    ///
    /// Always inlined so the match on the filter type is resolved at compile time.
    #[inline(always)]
    pub fn occupied<F: Into<OccupancyFilter>>(&self, filter: F) -> Bitboard {
        match filter.into() {
            OccupancyFilter::All => self.bb_color[usize::from(Color::White)] | self.bb_color[usize::from(Color::Black)],

            OccupancyFilter::ByColor(color) => self.bb_color[usize::from(color)],

            OccupancyFilter::ByType(piece_type) => {
                self.bb_piece[usize::from(Piece::new(Color::White, piece_type))]
                    | self.bb_piece[usize::from(Piece::new(Color::Black, piece_type))]
            }

            OccupancyFilter::ByPiece(piece) => self.bb_piece[usize::from(piece)],

            OccupancyFilter::ByColorAndType(color, piece_type) => {
                self.bb_piece[usize::from(Piece::new(color, piece_type))]
            }

            OccupancyFilter::ByColorAndTwoTypes(color, type1, type2) => {
                self.bb_piece[usize::from(Piece::new(color, type1))]
                    | self.bb_piece[usize::from(Piece::new(color, type2))]
            }
        }
    }

    /// Returns the color of the side to move.
    pub fn side_to_move(&self) -> Color {
        self.state.side_to_move
    }

    /// Returns the castling availability of the position.
    pub fn castling_availability(&self) -> CastlingRight {
        self.state.castling_rights
    }

    /// Returns the en passant square of the position, if any.
    pub fn en_passant_square(&self) -> Option<Square> {
        self.state.en_passant_square
    }

    /// Returns the halfmove clock used by the fifty-move rule.
    pub fn halfmove_clock(&self) -> u16 {
        self.state.halfmove_clock
    }

    /// Returns the fullmove number of the position.
    pub fn fullmove_number(&self) -> u16 {
        self.state.fullmove_number
    }

    /// Returns the file of the rook involved in castling on the given side.
    pub fn castling_file(&self, side: CastlingSide) -> File {
        self.castling_rook_file[usize::from(side)]
    }

    /// Returns the squares that must be empty for castling on the given side.
    pub fn castling_path(&self, side: CastlingSide) -> Bitboard {
        self.castling_path[usize::from(side)]
    }

    /// Returns the square occupied by the king of the specified color.
    pub fn king_square(&self, color: Color) -> Square {
        self.occupied((color, PieceType::King)).lsb().expect("There is always a king on the board.")
    }

    /// Returns the last move made on the board, if any. The value is `None` right after a null
    /// move or when the position was set up directly.
    pub fn last_move(&self) -> Option<Move> {
        self.state.last_move
    }

    /// Returns the number of pieces of the given color and type.
    pub fn piece_count(&self, color: Color, piece_type: PieceType) -> u8 {
        self.piece_counts[usize::from(Piece::new(color, piece_type))]
    }

    /// Returns the total value of the non-pawn, non-king material of the given color, in the
    /// units used by the game-phase ramp.
    pub fn non_pawn_material(&self, color: Color) -> i32 {
        self.state.non_pawn_material[usize::from(color)]
    }

    /// Returns the incrementally maintained piece-square evaluation, from White's point of view.
    pub fn psqt_eval(&self) -> EvalPair {
        self.state.psqt_eval
    }

    /// Returns the Zobrist hash of the position.
    pub fn hash(&self) -> Zobrist {
        self.state.zobrist
    }

    /// Returns the Zobrist hash of the pawns and kings of the position, used to key the pawn
    /// structure cache.
    pub fn pawn_hash(&self) -> Zobrist {
        self.state.pawn_zobrist
    }

    /// Returns the Zobrist hash of the piece counts of the position, used to key the material
    /// cache. Two positions with the same piece counts share this key regardless of where the
    /// pieces stand.
    pub fn material_hash(&self) -> Zobrist {
        self.state.material_zobrist
    }

    /// Returns a bitboard of the enemy pieces currently giving check to the side to move.
    pub fn checkers(&self) -> Bitboard {
        self.state.checkers
    }

    /// Returns true if the side to move is in check.
    pub fn is_check(&self) -> bool {
        self.state.checkers.has_any()
    }

    /// Returns the pieces currently shielding the king of the side to move from a sliding
    /// attack; moving one of these off its pin line is illegal.
    pub fn pinned(&self) -> Bitboard {
        self.state.blockers
    }

    //==================================================================================================================
    // Board mutation primitives
    //==================================================================================================================

    fn set_side_to_move(&mut self, color: Color) {
        if self.state.side_to_move != color {
            self.state.zobrist ^= zobrist_black_to_move();
            self.state.side_to_move = color;
        }
    }

    fn switch_side_to_move(&mut self) {
        self.state.zobrist ^= zobrist_black_to_move();
        self.state.side_to_move = !self.state.side_to_move;
    }

    /// Places a piece on a square and updates every incrementally maintained value.
    fn put_piece(&mut self, piece: Piece, square: Square) {
        let count_before = self.piece_counts[usize::from(piece)];
        self.put_piece_only(piece, square);

        self.state.psqt_eval += get_piece_square_value(piece, square);
        self.state.zobrist ^= zobrist_piece_square(piece, square);
        self.state.material_zobrist ^= zobrist_material(piece, count_before as usize);
        if matches!(piece.piece_type(), PieceType::Pawn | PieceType::King) {
            self.state.pawn_zobrist ^= zobrist_piece_square(piece, square);
        }
        self.state.non_pawn_material[usize::from(piece.color())] += non_pawn_material_value(piece.piece_type());
    }

    /// Places a piece on a square, updating only the board representation and the piece counts.
    /// Used when unmaking moves, where the rest of the state is restored from the history.
    fn put_piece_only(&mut self, piece: Piece, square: Square) {
        debug_assert_eq!(self.board[usize::from(square)], None);

        self.board[usize::from(square)] = Some(piece);
        self.bb_color[usize::from(piece.color())] |= square;
        self.bb_piece[usize::from(piece)] |= Bitboard::from(square);
        self.piece_counts[usize::from(piece)] += 1;
    }

    /// Removes the piece on a square and updates every incrementally maintained value.
    fn remove_piece(&mut self, square: Square) {
        let piece = self.board[usize::from(square)].expect("There is a piece to remove");
        self.remove_piece_only(piece, square);

        self.state.psqt_eval -= get_piece_square_value(piece, square);
        self.state.zobrist ^= zobrist_piece_square(piece, square);
        self.state.material_zobrist ^= zobrist_material(piece, self.piece_counts[usize::from(piece)] as usize);
        if matches!(piece.piece_type(), PieceType::Pawn | PieceType::King) {
            self.state.pawn_zobrist ^= zobrist_piece_square(piece, square);
        }
        self.state.non_pawn_material[usize::from(piece.color())] -= non_pawn_material_value(piece.piece_type());
    }

    /// Removes a piece from a square, updating only the board representation and the piece
    /// counts.
    fn remove_piece_only(&mut self, piece: Piece, square: Square) {
        debug_assert_eq!(self.board[usize::from(square)], Some(piece));

        self.board[usize::from(square)] = None;
        self.bb_color[usize::from(piece.color())] ^= Bitboard::from(square);
        self.bb_piece[usize::from(piece)] ^= Bitboard::from(square);
        self.piece_counts[usize::from(piece)] -= 1;
    }

    /// Moves a piece between two squares and updates every incrementally maintained value.
    fn move_piece(&mut self, piece: Piece, from: Square, to: Square) {
        self.move_piece_only(piece, from, to);

        self.state.psqt_eval += get_piece_square_value(piece, to) - get_piece_square_value(piece, from);
        self.state.zobrist ^= zobrist_piece_square(piece, from) ^ zobrist_piece_square(piece, to);
        if matches!(piece.piece_type(), PieceType::Pawn | PieceType::King) {
            self.state.pawn_zobrist ^= zobrist_piece_square(piece, from) ^ zobrist_piece_square(piece, to);
        }
    }

    /// Moves a piece between two squares, updating only the board representation.
    fn move_piece_only(&mut self, piece: Piece, from: Square, to: Square) {
        debug_assert_eq!(self.board[usize::from(from)], Some(piece));
        debug_assert_eq!(self.board[usize::from(to)], None);

        self.board[usize::from(from)] = None;
        self.board[usize::from(to)] = Some(piece);
        let bb = from | to;
        self.bb_color[usize::from(piece.color())] ^= bb;
        self.bb_piece[usize::from(piece)] ^= bb;
    }

    fn set_en_passant(&mut self, square: Option<Square>) {
        self.state.zobrist ^= zobrist_en_passant(self.state.en_passant_square);
        self.state.en_passant_square = square;
        self.state.zobrist ^= zobrist_en_passant(square);
    }

    //==================================================================================================================
    // Attack queries
    //==================================================================================================================

    /// Returns a bitboard of all pieces of the given color attacking the given square, computed
    /// over the supplied occupancy (which may differ from the actual board to analyze
    /// hypothetical positions).
    pub fn attacks_to(&self, sq: Square, occupied: Bitboard, color: Color) -> Bitboard {
        let queens_rooks = self.occupied((color, PieceType::Rook, PieceType::Queen));
        let queens_bishops = self.occupied((color, PieceType::Bishop, PieceType::Queen));
        let knights = self.occupied((color, PieceType::Knight));
        let king = self.occupied((color, PieceType::King));
        let pawns = self.occupied((color, PieceType::Pawn));

        attacks_from::<{ PieceType::ROOK_VALUE }>(occupied, sq) & queens_rooks
            | attacks_from::<{ PieceType::BISHOP_VALUE }>(occupied, sq) & queens_bishops
            | attacks_from::<{ PieceType::KNIGHT_VALUE }>(Bitboard::EMPTY, sq) & knights
            | attacks_from::<{ PieceType::KING_VALUE }>(Bitboard::EMPTY, sq) & king
            | attacks_from_pawns(!color, sq) & pawns
    }

    /// Returns a bitboard of the pieces of both colors attacking the given square.
    pub fn attackers_to(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.attacks_to(sq, occupied, Color::White) | self.attacks_to(sq, occupied, Color::Black)
    }

    /// Returns true if any piece of the specified color attacks the given square. Cheaper than
    /// `attacks_to` because it can stop at the first attacker found.
    pub fn is_attacked(&self, sq: Square, occupied: Bitboard, color: Color) -> bool {
        let queens_rooks = self.occupied((color, PieceType::Rook, PieceType::Queen));
        if (attacks_from_rooks(sq) & queens_rooks).has_any()
            && (attacks_from::<{ PieceType::ROOK_VALUE }>(occupied, sq) & queens_rooks).has_any()
        {
            return true;
        }

        let queens_bishops = self.occupied((color, PieceType::Bishop, PieceType::Queen));
        if (attacks_from_bishops(sq) & queens_bishops).has_any()
            && (attacks_from::<{ PieceType::BISHOP_VALUE }>(occupied, sq) & queens_bishops).has_any()
        {
            return true;
        }

        if (attacks_from::<{ PieceType::KNIGHT_VALUE }>(Bitboard::EMPTY, sq)
            & self.occupied((color, PieceType::Knight)))
        .has_any()
        {
            return true;
        }

        if (attacks_from::<{ PieceType::KING_VALUE }>(Bitboard::EMPTY, sq) & self.occupied((color, PieceType::King)))
            .has_any()
        {
            return true;
        }

        (attacks_from_pawns(!color, sq) & self.occupied((color, PieceType::Pawn))).has_any()
    }

    /// Returns a bitboard of the pieces blocking a sliding attack on the king of the given
    /// color. A piece is a blocker only when it is the single piece between the king and an
    /// enemy slider; such a piece is pinned if it belongs to the king's side.
    fn blockers(&self, color: Color) -> Bitboard {
        let king_sq = self.king_square(color);

        let rooks_queens =
            self.occupied((!color, PieceType::Rook, PieceType::Queen));
        let bishops_queens =
            self.occupied((!color, PieceType::Bishop, PieceType::Queen));

        let mut snipers = attacks_from_rooks(king_sq) & rooks_queens;
        snipers |= attacks_from_bishops(king_sq) & bishops_queens;

        let occupancy = self.occupied(OccupancyFilter::All) ^ snipers;

        let mut blockers = Bitboard::EMPTY;
        for sniper_sq in snipers {
            let potential_blockers = Bitboard::between(king_sq, sniper_sq) & occupancy & !Bitboard::from(sniper_sq);

            if potential_blockers.has_one() {
                blockers |= potential_blockers;
            }
        }

        blockers
    }

    //==================================================================================================================
    // Move legality and properties
    //==================================================================================================================

    /// Determines whether a pseudo-legal move is actually legal in the current position, which
    /// mostly means verifying it does not leave the friendly king in check. Handles pinned
    /// pieces and the two-square removal of en passant captures. Castling legality (king not
    /// crossing an attacked square) is verified during generation.
    pub fn is_legal(&self, mv: Move) -> bool {
        // A king move is legal if the destination is not attacked once the king has left its
        // square.
        if mv.piece().piece_type() == PieceType::King {
            let bb_king = self.occupied(mv.piece());
            return !self.is_attacked(
                mv.to_square(),
                self.occupied(OccupancyFilter::All) ^ bb_king,
                !mv.piece().color(),
            );
        }

        // En passant removes pieces from two squares, so the slider rays toward the king must be
        // recomputed explicitly.
        if mv.move_type() == MoveType::EnPassant {
            let en_passant_capture_sq = Square::new(mv.to_square().file(), mv.from_square().rank());
            let occupied =
                self.occupied(OccupancyFilter::All) ^ mv.to_square() ^ mv.from_square() ^ en_passant_capture_sq;
            let them = !self.side_to_move();
            let queens_rooks = self.occupied((them, PieceType::Rook, PieceType::Queen));
            let queens_bishops = self.occupied((them, PieceType::Bishop, PieceType::Queen));
            let king_sq = self.king_square(mv.piece().color());

            // Evasion generation emits en passant unconditionally, so a knight or pawn check
            // that the capture does not address must be rejected here as well.
            let knights = self.occupied((them, PieceType::Knight));
            let pawns = self.occupied((them, PieceType::Pawn)) & !Bitboard::from(en_passant_capture_sq);
            return (attacks_from::<{ PieceType::ROOK_VALUE }>(occupied, king_sq) & queens_rooks).has_none()
                && (attacks_from::<{ PieceType::BISHOP_VALUE }>(occupied, king_sq) & queens_bishops).has_none()
                && (attacks_from::<{ PieceType::KNIGHT_VALUE }>(Bitboard::EMPTY, king_sq) & knights).has_none()
                && (attacks_from_pawns(!them, king_sq) & pawns).has_none();
        }

        // Any other move is legal if the piece is not pinned, or moves along its pin line.
        (self.state.blockers & mv.from_square()).has_none()
            || Square::are_aligned(mv.from_square(), mv.to_square(), self.king_square(self.side_to_move()))
    }

    /// Verifies that a move (typically one read back from the transposition table, which may
    /// belong to a different position after a key collision) is pseudo-legal in this position.
    pub fn is_pseudo_legal(&self, mv: Move) -> bool {
        let us = self.side_to_move();
        let piece = mv.piece();

        if piece.color() != us || self[mv.from_square()] != Some(piece) {
            return false;
        }

        let occupied = self.occupied(OccupancyFilter::All);
        let from = mv.from_square();
        let to = mv.to_square();
        let forward = us.forward();

        let reachable = match mv.move_type() {
            MoveType::Basic => {
                self[to].is_none()
                    && match piece.piece_type() {
                        PieceType::Pawn => {
                            to.rank() != Rank::R8.relative_to_color(us)
                                && from.up(forward) == Ok(to)
                        }
                        piece_type => {
                            crate::move_gen::attacks::attacks_from_piece_type(piece_type, occupied, from).get(to)
                        }
                    }
            }
            MoveType::Capture(capture) => {
                self[to] == Some(capture)
                    && capture.color() != us
                    && match piece.piece_type() {
                        PieceType::Pawn => {
                            to.rank() != Rank::R8.relative_to_color(us)
                                && attacks_from_pawns(us, from).get(to)
                        }
                        piece_type => {
                            crate::move_gen::attacks::attacks_from_piece_type(piece_type, occupied, from).get(to)
                        }
                    }
            }
            MoveType::TwoSquarePawnPush => {
                piece.piece_type() == PieceType::Pawn
                    && from.rank() == Rank::R2.relative_to_color(us)
                    && self[to].is_none()
                    && from.up(forward).is_ok_and(|sq| self[sq].is_none() && sq.up(forward) == Ok(to))
            }
            MoveType::Promotion(promotion) => {
                piece.piece_type() == PieceType::Pawn
                    && promotion.color() == us
                    && to.rank() == Rank::R8.relative_to_color(us)
                    && self[to].is_none()
                    && from.up(forward) == Ok(to)
            }
            MoveType::CapturePromotion { capture, promotion } => {
                piece.piece_type() == PieceType::Pawn
                    && promotion.color() == us
                    && to.rank() == Rank::R8.relative_to_color(us)
                    && self[to] == Some(capture)
                    && capture.color() != us
                    && attacks_from_pawns(us, from).get(to)
            }
            MoveType::EnPassant => {
                piece.piece_type() == PieceType::Pawn
                    && self.en_passant_square() == Some(to)
                    && attacks_from_pawns(us, from).get(to)
            }
            MoveType::Castling(side) => self.can_castle(side),
        };

        if !reachable {
            return false;
        }

        // When in check the move must address the check: king moves are validated by
        // `is_legal`, any other move must capture the checker or block its ray.
        if self.is_check() && piece.piece_type() != PieceType::King {
            if self.state.checkers.has_many() {
                return false;
            }
            let checker_sq = self.state.checkers.lsb().expect("In check implies a checker.");
            let capture_sq = if mv.move_type() == MoveType::EnPassant {
                Square::new(to.file(), from.rank())
            } else {
                to
            };
            if capture_sq != checker_sq
                && (Bitboard::between(self.king_square(us), checker_sq) & to).has_none()
            {
                return false;
            }
        }

        true
    }

    /// Returns true if the side to move may castle on the given side: the right is available,
    /// no involved square is occupied and the king does not start on, cross or land on an
    /// attacked square.
    pub fn can_castle(&self, side: CastlingSide) -> bool {
        let color = self.side_to_move();
        if !self.castling_availability().contains(CastlingRight::new(color, side)) {
            return false;
        }

        let rank = Rank::R1.relative_to_color(color);
        let king_sq = self.king_square(color);
        let king_final_sq = Square::new(
            match side {
                CastlingSide::Kingside => File::G,
                CastlingSide::Queenside => File::C,
            },
            rank,
        );
        let rook_sq = Square::new(self.castling_file(side), rank);
        let rook_final_sq = Square::new(
            match side {
                CastlingSide::Kingside => File::F,
                CastlingSide::Queenside => File::D,
            },
            rank,
        );

        // No movement at all is possible in some Chess960 setups.
        if king_sq == king_final_sq && rook_sq == rook_final_sq {
            return false;
        }

        let king_bb = Bitboard::from(king_sq);
        let king_travel = Bitboard::between(king_sq, king_final_sq);
        let rook_travel = Bitboard::between(rook_sq, rook_final_sq);
        let occupied = self.occupied(OccupancyFilter::All) ^ (king_bb | rook_sq);

        if ((king_travel | rook_travel) & occupied).has_any() {
            return false;
        }

        for sq in king_travel | king_bb | king_final_sq {
            if self.is_attacked(sq, occupied, !color) {
                return false;
            }
        }

        true
    }

    /// Returns true if the move gives check, either directly or by discovering a sliding
    /// attacker.
    pub fn gives_check(&self, mv: Move) -> bool {
        let us = self.side_to_move();
        let them = !us;
        let king_sq = self.king_square(them);
        let occupied = self.occupied(OccupancyFilter::All);

        let from = mv.from_square();
        let to = mv.to_square();

        // Occupancy after the move; captures only matter on squares other than `to`.
        let mut occupied_after = occupied ^ from | to;
        if mv.move_type() == MoveType::EnPassant {
            occupied_after ^= Square::new(to.file(), from.rank());
        }

        // Direct check from the destination square.
        let moved_type = mv.promotion().map_or(mv.piece().piece_type(), |promotion| promotion.piece_type());
        let direct = match moved_type {
            PieceType::Pawn => attacks_from_pawns(us, to).get(king_sq),
            PieceType::King => false,
            piece_type => {
                crate::move_gen::attacks::attacks_from_piece_type(piece_type, occupied_after, to).get(king_sq)
            }
        };
        if direct {
            return true;
        }

        // Castling: the rook may deliver the check from its final square.
        if let MoveType::Castling(side) = mv.move_type() {
            let rank = from.rank();
            let rook_from = Square::new(self.castling_file(side), rank);
            let rook_to = Square::new(
                match side {
                    CastlingSide::Kingside => File::F,
                    CastlingSide::Queenside => File::D,
                },
                rank,
            );
            let castle_occupied = occupied ^ from ^ rook_from | to | rook_to;
            return attacks_from::<{ PieceType::ROOK_VALUE }>(castle_occupied, rook_to).get(king_sq);
        }

        // Discovered check: the moving piece leaves the ray between one of our sliders and the
        // enemy king. En passant can also discover through the captured pawn's square, which the
        // occupancy recomputation covers.
        if mv.move_type() == MoveType::EnPassant {
            let rooks_queens = self.occupied((us, PieceType::Rook, PieceType::Queen));
            let bishops_queens = self.occupied((us, PieceType::Bishop, PieceType::Queen));
            return (attacks_from::<{ PieceType::ROOK_VALUE }>(occupied_after, king_sq) & rooks_queens).has_any()
                || (attacks_from::<{ PieceType::BISHOP_VALUE }>(occupied_after, king_sq) & bishops_queens).has_any();
        }

        let discovered_candidates = self.blockers(them) & self.occupied(us);
        (discovered_candidates & from).has_any() && !Square::are_aligned(from, to, king_sq)
    }

    //==================================================================================================================
    // Static exchange evaluation
    //==================================================================================================================

    fn see_value(piece_type: PieceType) -> i32 {
        match piece_type {
            // The king has no exchange value; a huge one makes any capture of the capturer
            // terminal.
            PieceType::King => 10_000,
            piece_type => i32::from(piece_type_value(piece_type).mg()),
        }
    }

    fn least_valuable_attacker(&self, attackers: Bitboard, color: Color) -> Option<(Square, PieceType)> {
        for piece_type in PieceType::ALL {
            let subset = attackers & self.occupied((color, piece_type));
            if let Some(square) = subset.lsb() {
                return Some((square, piece_type));
            }
        }
        None
    }

    /// Statically evaluates the exchange sequence started by the given move on its destination
    /// square: both sides capture with their least valuable attacker as long as it is
    /// profitable, either side being free to stand pat. Returns the resulting material balance
    /// in centipawns from the mover's point of view.
    pub fn see(&self, mv: Move) -> Eval {
        let to = mv.to_square();
        let mut occupied = self.occupied(OccupancyFilter::All) ^ mv.from_square();
        if mv.move_type() == MoveType::EnPassant {
            occupied ^= Square::new(to.file(), mv.from_square().rank());
        }

        let mut gain = [0i32; 32];
        let mut depth = 0;
        gain[0] = mv.capture().map_or(0, |capture| Self::see_value(capture.piece_type()));

        let mut attackers = self.attackers_to(to, occupied) & occupied;
        let mut side = !mv.piece().color();
        let mut target_value = Self::see_value(mv.piece().piece_type());

        loop {
            let Some((attacker_sq, attacker_type)) = self.least_valuable_attacker(attackers, side) else {
                break;
            };

            depth += 1;
            gain[depth] = target_value - gain[depth - 1];

            // Neither side is forced to keep capturing at a loss.
            if gain[depth].max(-gain[depth - 1]) < 0 {
                break;
            }

            occupied ^= attacker_sq;
            target_value = Self::see_value(attacker_type);
            side = !side;

            // Removing the attacker may reveal a slider behind it.
            attackers |= attacks_from::<{ PieceType::ROOK_VALUE }>(occupied, to)
                & self.occupied(PieceType::Rook)
                | attacks_from::<{ PieceType::ROOK_VALUE }>(occupied, to) & self.occupied(PieceType::Queen)
                | attacks_from::<{ PieceType::BISHOP_VALUE }>(occupied, to) & self.occupied(PieceType::Bishop)
                | attacks_from::<{ PieceType::BISHOP_VALUE }>(occupied, to) & self.occupied(PieceType::Queen);
            attackers &= occupied;
        }

        while depth > 0 {
            gain[depth - 1] = -(-gain[depth - 1]).max(gain[depth]);
            depth -= 1;
        }

        Eval::from(gain[0])
    }

    //==================================================================================================================
    // Draw and mate detection
    //==================================================================================================================

    /// Returns true if the position cannot be won by either side because of the remaining
    /// material: KK, KBK, KNK, KNNK and KBKB with both bishops on the same square color.
    fn is_material_draw(&self) -> bool {
        if self.occupied(PieceType::Pawn).has_any()
            || self.occupied(PieceType::Rook).has_any()
            || self.occupied(PieceType::Queen).has_any()
        {
            return false;
        }

        let white_minors = self.piece_count(Color::White, PieceType::Knight) as u32
            + self.piece_count(Color::White, PieceType::Bishop) as u32;
        let black_minors = self.piece_count(Color::Black, PieceType::Knight) as u32
            + self.piece_count(Color::Black, PieceType::Bishop) as u32;

        match (white_minors, black_minors) {
            (0, 0) | (1, 0) | (0, 1) => true,
            (2, 0) => self.piece_count(Color::White, PieceType::Knight) == 2,
            (0, 2) => self.piece_count(Color::Black, PieceType::Knight) == 2,
            (1, 1) => {
                let white_bishops = self.occupied((Color::White, PieceType::Bishop));
                let black_bishops = self.occupied((Color::Black, PieceType::Bishop));
                match (white_bishops.lsb(), black_bishops.lsb()) {
                    (Some(white_sq), Some(black_sq)) => {
                        (u8::from(white_sq.file()) + u8::from(white_sq.rank())) % 2
                            == (u8::from(black_sq.file()) + u8::from(black_sq.rank())) % 2
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Determines if the current position is a draw by the fifty-move rule, insufficient
    /// material or repetition.
    ///
    /// A single repetition of an earlier position counts: there is no benefit during the search
    /// in waiting for the third occurrence. Only positions with the same side to move are
    /// compared, by stepping through the history two plies at a time, going back no further than
    /// the halfmove clock allows.
    pub fn is_draw(&self) -> bool {
        if self.state.halfmove_clock >= 100 {
            // Checkmate takes precedence over the fifty-move rule.
            return !self.is_mate();
        }

        if self.is_material_draw() {
            return true;
        }

        let last = self.history.len();
        let span = (self.state.halfmove_clock as usize & !1).min(last & !1);
        let first = last - span;
        for index in (first..last).step_by(2).rev() {
            if self.history[index].zobrist == self.state.zobrist {
                return true;
            }
        }

        false
    }

    /// Returns true if the side to move is checkmated: in check with no legal move.
    pub fn is_mate(&self) -> bool {
        if !self.is_check() {
            return false;
        }

        let mut moves = crate::move_gen::move_list::MoveList::new();
        crate::move_gen::generation::generate_moves::<
            { crate::move_gen::generation::MoveGenerationType::EVASIONS_VALUE },
        >(self, &mut moves);
        let result = !moves.iter().any(|mv| self.is_legal(mv));
        result
    }

    //==================================================================================================================
    // Making and unmaking moves
    //==================================================================================================================

    fn make_basic(&mut self, mv: Move) {
        self.move_piece(mv.piece(), mv.from_square(), mv.to_square());

        if mv.piece().piece_type() == PieceType::Pawn {
            self.state.halfmove_clock = 0;
        } else {
            self.state.halfmove_clock += 1;
        }
    }

    fn make_capture(&mut self, mv: Move, capture: Piece) {
        debug_assert!(self[mv.to_square()] == Some(capture));

        self.remove_piece(mv.to_square());
        self.move_piece(mv.piece(), mv.from_square(), mv.to_square());

        self.state.halfmove_clock = 0;
    }

    fn make_two_square_pawn_push(&mut self, mv: Move) {
        self.move_piece(mv.piece(), mv.from_square(), mv.to_square());

        // The en passant square is only set when an enemy pawn could actually capture there.
        let side_to_move = self.side_to_move();
        let en_passant_square = unsafe { mv.to_square().down_unchecked(side_to_move.forward()) };
        let other_pawns = self.occupied((!side_to_move, PieceType::Pawn));
        if (attacks_from_pawns(side_to_move, en_passant_square) & other_pawns).has_any() {
            self.set_en_passant(Some(en_passant_square));
        }

        self.state.halfmove_clock = 0;
    }

    fn make_promotion(&mut self, mv: Move, promotion: Piece) {
        debug_assert!(self[mv.from_square()] == Some(mv.piece()));
        debug_assert!(self[mv.to_square()].is_none());

        self.remove_piece(mv.from_square());
        self.put_piece(promotion, mv.to_square());

        self.state.halfmove_clock = 0;
    }

    fn make_capture_promotion(&mut self, mv: Move, capture: Piece, promotion: Piece) {
        debug_assert!(self[mv.to_square()] == Some(capture));

        self.remove_piece(mv.to_square());
        self.make_promotion(mv, promotion);
    }

    fn make_en_passant(&mut self, mv: Move) {
        // The captured pawn is never on an edge rank, so the unchecked step is safe.
        let capture_sq = unsafe { mv.to_square().down_unchecked(self.side_to_move().forward()) };
        debug_assert!(self[capture_sq] == Some(Piece::new(!self.side_to_move(), PieceType::Pawn)));

        self.remove_piece(capture_sq);
        self.move_piece(mv.piece(), mv.from_square(), mv.to_square());

        self.state.halfmove_clock = 0;
    }

    fn make_castling(&mut self, mv: Move, side: CastlingSide) {
        let rook = Piece::new(self.side_to_move(), PieceType::Rook);
        let rank = mv.from_square().rank();
        let rook_from = Square::new(self.castling_rook_file[usize::from(side)], rank);
        let rook_to = Square::new(
            match side {
                CastlingSide::Queenside => File::D,
                CastlingSide::Kingside => File::F,
            },
            rank,
        );

        // Remove both pieces first: in Chess960 the rook may stand on the king's destination.
        self.remove_piece(mv.from_square());
        self.remove_piece(rook_from);
        self.put_piece(mv.piece(), mv.to_square());
        self.put_piece(rook, rook_to);

        self.state.halfmove_clock += 1;
    }

    /// Makes a move on the board, updating the board representation, all the incremental keys
    /// and values, the castling rights, the en passant square and the checkers of the new side
    /// to move.
    ///
    /// The move must be legal; in debug builds this is asserted.
    pub fn make(&mut self, mv: Move) {
        debug_assert!(self.is_legal(mv), "Tried to make an illegal move: {:?}", mv);

        self.history.push(self.state);

        self.set_en_passant(None);

        match mv.move_type() {
            MoveType::Basic => self.make_basic(mv),
            MoveType::Capture(capture) => self.make_capture(mv, capture),
            MoveType::TwoSquarePawnPush => self.make_two_square_pawn_push(mv),
            MoveType::Promotion(promotion) => self.make_promotion(mv, promotion),
            MoveType::CapturePromotion { capture, promotion } => self.make_capture_promotion(mv, capture, promotion),
            MoveType::EnPassant => self.make_en_passant(mv),
            MoveType::Castling(side) => self.make_castling(mv, side),
        }

        // Update the castling rights when the king or a castling rook moves, or when a rook is
        // captured on its starting square.
        let rights = self.castling_rights_mask[usize::from(mv.from_square())]
            | self.castling_rights_mask[usize::from(mv.to_square())];
        if !(self.state.castling_rights & rights).is_empty() {
            self.state.zobrist ^= zobrist_castling(self.state.castling_rights);
            self.state.castling_rights &= !rights;
            self.state.zobrist ^= zobrist_castling(self.state.castling_rights);
        }

        if self.side_to_move() == Color::Black {
            self.state.fullmove_number += 1;
        }

        self.switch_side_to_move();

        self.state.last_move = Some(mv);
        self.state.checkers = self.attacks_to(
            self.king_square(self.side_to_move()),
            self.occupied(OccupancyFilter::All),
            !self.side_to_move(),
        );
        self.state.blockers = self.blockers(self.side_to_move());
    }

    fn unmake_basic(&mut self, mv: Move) {
        self.move_piece_only(mv.piece(), mv.to_square(), mv.from_square());
    }

    fn unmake_capture(&mut self, mv: Move, capture: Piece) {
        self.move_piece_only(mv.piece(), mv.to_square(), mv.from_square());
        self.put_piece_only(capture, mv.to_square());
    }

    fn unmake_promotion(&mut self, mv: Move, promotion: Piece) {
        self.remove_piece_only(promotion, mv.to_square());
        self.put_piece_only(mv.piece(), mv.from_square());
    }

    fn unmake_capture_promotion(&mut self, mv: Move, capture: Piece, promotion: Piece) {
        self.remove_piece_only(promotion, mv.to_square());
        self.put_piece_only(capture, mv.to_square());
        self.put_piece_only(mv.piece(), mv.from_square());
    }

    fn unmake_en_passant(&mut self, mv: Move) {
        self.move_piece_only(mv.piece(), mv.to_square(), mv.from_square());
        let capture_sq = unsafe { mv.to_square().down_unchecked(mv.piece().color().forward()) };
        self.put_piece_only(Piece::new(!mv.piece().color(), PieceType::Pawn), capture_sq);
    }

    fn unmake_castling(&mut self, mv: Move, side: CastlingSide) {
        let rook = Piece::new(mv.piece().color(), PieceType::Rook);
        let rank = mv.from_square().rank();
        let rook_from = Square::new(self.castling_rook_file[usize::from(side)], rank);
        let rook_to = Square::new(
            match side {
                CastlingSide::Queenside => File::D,
                CastlingSide::Kingside => File::F,
            },
            rank,
        );

        self.remove_piece_only(mv.piece(), mv.to_square());
        self.remove_piece_only(rook, rook_to);
        self.put_piece_only(mv.piece(), mv.from_square());
        self.put_piece_only(rook, rook_from);
    }

    /// Reverts the last move made on the board and restores the previous game state.
    ///
    /// # Panics
    /// Panics if no move was made (in particular, a null move must be reverted with
    /// `unmake_null` instead).
    pub fn unmake(&mut self) {
        let mv = self.state.last_move.expect("There is a last move to unmake.");

        match mv.move_type() {
            MoveType::Basic => self.unmake_basic(mv),
            MoveType::Capture(capture) => self.unmake_capture(mv, capture),
            MoveType::TwoSquarePawnPush => self.unmake_basic(mv),
            MoveType::Promotion(promotion) => self.unmake_promotion(mv, promotion),
            MoveType::CapturePromotion { capture, promotion } => self.unmake_capture_promotion(mv, capture, promotion),
            MoveType::EnPassant => self.unmake_en_passant(mv),
            MoveType::Castling(side) => self.unmake_castling(mv, side),
        }

        self.state = self.history.pop();
    }

    /// Makes a null move: only the side to move and the en passant square change. Used by the
    /// null-move pruning of the search; never made while in check.
    pub fn make_null(&mut self) {
        debug_assert!(!self.is_check());

        self.history.push(self.state);

        self.set_en_passant(None);
        self.state.halfmove_clock += 1;
        if self.side_to_move() == Color::Black {
            self.state.fullmove_number += 1;
        }
        self.switch_side_to_move();

        self.state.last_move = None;
        self.state.checkers = Bitboard::EMPTY;
        self.state.blockers = self.blockers(self.side_to_move());
    }

    /// Reverts a null move.
    pub fn unmake_null(&mut self) {
        debug_assert!(self.state.last_move.is_none());
        self.state = self.history.pop();
    }

    //==================================================================================================================
    // Consistency checking
    //==================================================================================================================

    /// Recomputes every incrementally maintained value from scratch and compares it with the
    /// maintained one. Used in debug assertions and by the tests; any mismatch means a bug in
    /// make/unmake.
    pub fn is_ok(&self) -> bool {
        // The board array and the bitboards must agree.
        let mut bb_color = [Bitboard::EMPTY; Color::COUNT];
        let mut bb_piece = [Bitboard::EMPTY; Piece::COUNT];
        let mut piece_counts = [0u8; Piece::COUNT];
        let mut zobrist: Zobrist = 0;
        let mut pawn_zobrist: Zobrist = 0;
        let mut material_zobrist: Zobrist = 0;
        let mut psqt_eval = EvalPair::default();
        let mut non_pawn_material = [0i32; Color::COUNT];

        for square in Square::ALL {
            if let Some(piece) = self[square] {
                bb_color[usize::from(piece.color())] |= square;
                bb_piece[usize::from(piece)] |= Bitboard::from(square);
                material_zobrist ^= zobrist_material(piece, piece_counts[usize::from(piece)] as usize);
                piece_counts[usize::from(piece)] += 1;
                zobrist ^= zobrist_piece_square(piece, square);
                if matches!(piece.piece_type(), PieceType::Pawn | PieceType::King) {
                    pawn_zobrist ^= zobrist_piece_square(piece, square);
                }
                psqt_eval += get_piece_square_value(piece, square);
                non_pawn_material[usize::from(piece.color())] += non_pawn_material_value(piece.piece_type());
            }
        }

        if self.side_to_move() == Color::Black {
            zobrist ^= zobrist_black_to_move();
        }
        zobrist ^= zobrist_castling(self.state.castling_rights);
        zobrist ^= zobrist_en_passant(self.state.en_passant_square);

        bb_color == self.bb_color
            && bb_piece == self.bb_piece
            && piece_counts == self.piece_counts
            && zobrist == self.state.zobrist
            && pawn_zobrist == self.state.pawn_zobrist
            && material_zobrist == self.state.material_zobrist
            && psqt_eval == self.state.psqt_eval
            && non_pawn_material == self.state.non_pawn_material
            && self.piece_count(Color::White, PieceType::King) == 1
            && self.piece_count(Color::Black, PieceType::King) == 1
            // The side that just moved must not have left its king in check.
            && !self.is_attacked(
                self.king_square(!self.side_to_move()),
                self.occupied(OccupancyFilter::All),
                self.side_to_move(),
            )
    }
}

impl Default for Position {
    fn default() -> Self {
        Self {
            board: [None; Square::COUNT],
            bb_color: [Bitboard::EMPTY; Color::COUNT],
            bb_piece: [Bitboard::EMPTY; Piece::COUNT],
            piece_counts: [0; Piece::COUNT],
            castling_rook_file: [File::H, File::A],
            castling_path: [Bitboard::EMPTY; CastlingSide::COUNT],
            castling_rights_mask: [CastlingRight::empty(); Square::COUNT],
            state: GameState::default(),
            history: History::default(),
        }
    }
}

impl Index<Square> for Position {
    type Output = Option<Piece>;
    fn index(&self, index: Square) -> &Self::Output {
        &self.board[usize::from(index)]
    }
}
