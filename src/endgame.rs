use std::{collections::HashMap, sync::OnceLock};

use crate::{
    bitboard::Bitboard,
    coordinates::{File, Rank, Square},
    eval::{piece_type_value, Eval},
    move_gen::attacks::forward_span,
    piece::{Color, PieceType},
    position::Position,
    zobrist::Zobrist,
};

/// A scaling factor applied to the end game score: `SCALE_FACTOR_NORMAL` leaves the score
/// unchanged, `SCALE_FACTOR_DRAW` turns it into a draw.
pub type ScaleFactor = u8;

pub const SCALE_FACTOR_DRAW: ScaleFactor = 0;
pub const SCALE_FACTOR_NORMAL: ScaleFactor = 64;

/// A score large enough to dominate any positional evaluation while staying clearly below the
/// mate range.
pub const VALUE_KNOWN_WIN: i32 = 15_000;

/// A specialized evaluation function, completely replacing the static evaluation for its
/// material configuration. Returns a score from White's point of view; the second element of a
/// registry entry tells which side is the stronger one.
pub type EndgameEvalFn = fn(&Position, Color) -> Eval;

/// A specialized scaling function for the end game score of the stronger side.
pub type EndgameScaleFn = fn(&Position, Color) -> ScaleFactor;

static EVAL_FNS: OnceLock<HashMap<Zobrist, (EndgameEvalFn, Color)>> = OnceLock::new();
static SCALE_FNS: OnceLock<HashMap<Zobrist, (EndgameScaleFn, Color)>> = OnceLock::new();

/// Initializes the endgame module: generates the KPK bitbase and registers the specialized
/// evaluation and scaling functions under their material keys. Must be called after the Zobrist
/// tables are initialized.
pub fn initialize() {
    kpk::initialize();

    let mut eval_fns: HashMap<Zobrist, (EndgameEvalFn, Color)> = HashMap::new();
    let mut add_eval = |code: &str, function: EndgameEvalFn| {
        eval_fns.insert(material_key_of_code(code), (function, strong_side_of_code(code)));
    };

    add_eval("KPK", evaluate_kpk);
    add_eval("KKP", evaluate_kpk);
    add_eval("KBNK", evaluate_kbnk);
    add_eval("KKBN", evaluate_kbnk);
    add_eval("KRKP", evaluate_krkp);
    add_eval("KPKR", evaluate_krkp);
    add_eval("KQKR", evaluate_kqkr);
    add_eval("KRKQ", evaluate_kqkr);
    add_eval("KBBKN", evaluate_kbbkn);
    add_eval("KNKBB", evaluate_kbbkn);

    EVAL_FNS.set(eval_fns).ok().expect("The endgame module is initialized once.");

    let mut scale_fns: HashMap<Zobrist, (EndgameScaleFn, Color)> = HashMap::new();
    let mut add_scale = |code: &str, function: EndgameScaleFn| {
        // Re-registering the same code is an idempotent overwrite.
        scale_fns.insert(material_key_of_code(code), (function, strong_side_of_code(code)));
    };

    add_scale("KRPKR", scale_krpkr);
    add_scale("KRKRP", scale_krpkr);
    add_scale("KBPKB", scale_kbpkb);
    add_scale("KBKBP", scale_kbpkb);
    add_scale("KRPPKRP", scale_krppkrp);
    add_scale("KRPKRPP", scale_krppkrp);
    add_scale("KRPPKRP", scale_krppkrp);
    add_scale("KRPKRPP", scale_krppkrp);

    SCALE_FNS.set(scale_fns).ok().expect("The endgame module is initialized once.");
}

/// Returns the specialized evaluation function registered for the material key, if any.
pub fn probe_evaluation(key: Zobrist) -> Option<(EndgameEvalFn, Color)> {
    EVAL_FNS.get().expect("The endgame module is initialized.").get(&key).copied()
}

/// Returns the specialized scaling function registered for the material key, if any.
pub fn probe_scaling(key: Zobrist) -> Option<(EndgameScaleFn, Color)> {
    SCALE_FNS.get().expect("The endgame module is initialized.").get(&key).copied()
}

/// Computes the material key of a piece-configuration code like "KRPKR". The code lists White's
/// pieces then Black's, each side introduced by its king. The pieces are placed on an arbitrary
/// rank of an otherwise empty board; the material key only depends on the counts, so any squares
/// do.
pub fn material_key_of_code(code: &str) -> Zobrist {
    debug_assert!(code.len() < 8 && code.starts_with('K'));

    let mut fen = String::new();
    let mut white = false;
    for c in code.chars() {
        if c == 'K' {
            white = !white;
        }
        fen.push(if white { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() });
    }
    fen.push_str(&(8 - code.len()).to_string());
    fen.push_str("/8/8/8/8/8/8/8 w - - 0 1");

    Position::new_from_fen(&fen).expect("Configuration codes build parsable FENs.").material_hash()
}

/// Returns the side with more material in a configuration code. The code lists White's pieces
/// before the second 'K' and Black's after it; the comparison is by piece value so "KPKR" puts
/// the rook side on top.
fn strong_side_of_code(code: &str) -> Color {
    fn value_of(c: char) -> i32 {
        match c {
            'Q' => 9,
            'R' => 5,
            'B' | 'N' => 3,
            'P' => 1,
            _ => 0,
        }
    }

    let second_king = code[1..].find('K').expect("A code names both kings.") + 1;
    let white_value: i32 = code[1..second_king].chars().map(value_of).sum();
    let black_value: i32 = code[second_king + 1..].chars().map(value_of).sum();
    if white_value >= black_value {
        Color::White
    } else {
        Color::Black
    }
}

//======================================================================================================================
// Helpers shared by the evaluation functions
//======================================================================================================================

fn push_to_edge(sq: Square) -> i32 {
    let file_distance = u8::from(sq.file()).min(7 - u8::from(sq.file())) as i32;
    let rank_distance = u8::from(sq.rank()).min(7 - u8::from(sq.rank())) as i32;
    90 - (file_distance + rank_distance) * 10
}

fn push_close(a: Square, b: Square) -> i32 {
    140 - 20 * a.distance(b) as i32
}

fn signed_for_white(strong_side: Color, value: i32) -> Eval {
    match strong_side {
        Color::White => Eval::from(value),
        Color::Black => Eval::from(-value),
    }
}

fn simple_material(position: &Position, color: Color) -> i32 {
    PieceType::ALL
        .into_iter()
        .map(|piece_type| {
            position.piece_count(color, piece_type) as i32 * i32::from(piece_type_value(piece_type).eg())
        })
        .sum()
}

//======================================================================================================================
// Evaluation functions
//======================================================================================================================

/// King and any winning material against a bare king: drive the weak king to the edge and bring
/// the strong king close.
pub fn evaluate_kxk(position: &Position, strong_side: Color) -> Eval {
    let weak_side = !strong_side;
    let strong_king = position.king_square(strong_side);
    let weak_king = position.king_square(weak_side);

    let mut result = VALUE_KNOWN_WIN
        + simple_material(position, strong_side)
        + push_to_edge(weak_king)
        + push_close(strong_king, weak_king);

    // A lone queen or rook always mates faster than minors.
    if position.piece_count(strong_side, PieceType::Queen) == 0
        && position.piece_count(strong_side, PieceType::Rook) == 0
    {
        result -= 500;
    }

    signed_for_white(strong_side, result)
}

/// King and pawn against king, decided exactly by the bitbase.
pub fn evaluate_kpk(position: &Position, strong_side: Color) -> Eval {
    let pawn_sq = position
        .occupied((strong_side, PieceType::Pawn))
        .lsb()
        .expect("The KPK configuration has a pawn.");

    let win = kpk::probe(
        position.king_square(strong_side),
        pawn_sq,
        position.king_square(!strong_side),
        position.side_to_move(),
        strong_side,
    );

    if !win {
        return Eval::DRAW;
    }

    let relative_rank = u8::from(pawn_sq.rank().relative_to_color(strong_side)) as i32;
    let result =
        VALUE_KNOWN_WIN + i32::from(piece_type_value(PieceType::Pawn).eg()) + relative_rank * 10;
    signed_for_white(strong_side, result)
}

/// King, bishop and knight against king: the mate only works in the corners of the bishop's
/// color, so push the weak king there.
pub fn evaluate_kbnk(position: &Position, strong_side: Color) -> Eval {
    let weak_king = position.king_square(!strong_side);
    let strong_king = position.king_square(strong_side);
    let bishop_sq = position
        .occupied((strong_side, PieceType::Bishop))
        .lsb()
        .expect("The KBNK configuration has a bishop.");

    let dark_bishop = (u8::from(bishop_sq.file()) + u8::from(bishop_sq.rank())) % 2 == 0;
    let (corner_a, corner_b) = if dark_bishop { (Square::A1, Square::H8) } else { (Square::A8, Square::H1) };
    let corner_distance = weak_king.distance(corner_a).min(weak_king.distance(corner_b)) as i32;

    let result =
        VALUE_KNOWN_WIN + push_close(strong_king, weak_king) + 50 * (7 - corner_distance) + push_to_edge(weak_king);
    signed_for_white(strong_side, result)
}

/// King and rook against king and pawn. Won for the rook unless the pawn is far advanced, well
/// supported by its king, and the strong king is cut off.
pub fn evaluate_krkp(position: &Position, strong_side: Color) -> Eval {
    let weak_side = !strong_side;
    let strong_king = position.king_square(strong_side);
    let weak_king = position.king_square(weak_side);
    let pawn_sq = position
        .occupied((weak_side, PieceType::Pawn))
        .lsb()
        .expect("The KRKP configuration has a pawn.");

    let queening_sq = Square::new(pawn_sq.file(), Rank::R8.relative_to_color(weak_side));
    let rook_value = i32::from(piece_type_value(PieceType::Rook).eg());
    let pawn_value = i32::from(piece_type_value(PieceType::Pawn).eg());
    let tempo = if position.side_to_move() == strong_side { 1 } else { 0 };

    let result = if (forward_span(weak_side, pawn_sq) & strong_king).has_any() {
        // The strong king stands on the pawn's path: an easy win.
        rook_value - strong_king.distance(pawn_sq) as i32
    } else if weak_king.distance(pawn_sq) as i32 - (1 - tempo) >= 3 && weak_king.distance(queening_sq) > 1 {
        // The weak king cannot support its pawn.
        rook_value - pawn_value - strong_king.distance(pawn_sq) as i32
    } else if strong_king.distance(queening_sq) as i32 - tempo
        > weak_king.distance(queening_sq).min(pawn_sq.distance(queening_sq)) as i32 + 1
    {
        // The pawn runs; only a small nuisance score for the rook side.
        40 - 4 * strong_king.distance(pawn_sq) as i32
    } else {
        // Won, but the advanced supported pawn costs time.
        rook_value - pawn_value - 6 * (7 - pawn_sq.distance(queening_sq) as i32)
    };

    signed_for_white(strong_side, result)
}

/// King and queen against king and rook: a known win, faster when the weak king is pushed to the
/// edge away from its rook.
pub fn evaluate_kqkr(position: &Position, strong_side: Color) -> Eval {
    let strong_king = position.king_square(strong_side);
    let weak_king = position.king_square(!strong_side);

    let result = i32::from(piece_type_value(PieceType::Queen).eg())
        - i32::from(piece_type_value(PieceType::Rook).eg())
        + push_to_edge(weak_king)
        + push_close(strong_king, weak_king);
    signed_for_white(strong_side, result)
}

/// Two bishops against a knight: a long but winning endgame when the defending pieces are
/// separated; scored well short of a known win.
pub fn evaluate_kbbkn(position: &Position, strong_side: Color) -> Eval {
    let weak_side = !strong_side;
    let strong_king = position.king_square(strong_side);
    let weak_king = position.king_square(weak_side);
    let knight_sq = position
        .occupied((weak_side, PieceType::Knight))
        .lsb()
        .expect("The KBBKN configuration has a knight.");

    let result = 150
        + push_to_edge(weak_king)
        + push_close(strong_king, weak_king)
        + 10 * weak_king.distance(knight_sq) as i32;
    signed_for_white(strong_side, result)
}

//======================================================================================================================
// Scaling functions
//======================================================================================================================

/// Bishop and pawns where every pawn is a rook pawn whose promotion corner the bishop cannot
/// cover: a fortress draw when the defending king reaches the corner.
pub fn scale_kbpk(position: &Position, strong_side: Color) -> ScaleFactor {
    let pawns = position.occupied((strong_side, PieceType::Pawn));

    let all_on_a = (pawns & !Bitboard::from(File::A)).has_none();
    let all_on_h = (pawns & !Bitboard::from(File::H)).has_none();
    if !all_on_a && !all_on_h {
        return SCALE_FACTOR_NORMAL;
    }

    let file = if all_on_a { File::A } else { File::H };
    let queening_sq = Square::new(file, Rank::R8.relative_to_color(strong_side));
    let bishop_sq = position
        .occupied((strong_side, PieceType::Bishop))
        .lsb()
        .expect("The configuration has a bishop.");

    let bishop_on_dark = (u8::from(bishop_sq.file()) + u8::from(bishop_sq.rank())) % 2 == 0;
    let queening_on_dark = (u8::from(queening_sq.file()) + u8::from(queening_sq.rank())) % 2 == 0;

    if bishop_on_dark != queening_on_dark && position.king_square(!strong_side).distance(queening_sq) <= 1 {
        return SCALE_FACTOR_DRAW;
    }
    SCALE_FACTOR_NORMAL
}

/// Rook and pawn against rook: very drawish when the defending king stands on the pawn's path
/// (the Philidor setup).
pub fn scale_krpkr(position: &Position, strong_side: Color) -> ScaleFactor {
    let pawn_sq = position
        .occupied((strong_side, PieceType::Pawn))
        .lsb()
        .expect("The KRPKR configuration has a pawn.");
    let weak_king = position.king_square(!strong_side);

    if (forward_span(strong_side, pawn_sq) & weak_king).has_any() {
        return 12;
    }
    SCALE_FACTOR_NORMAL
}

/// Rook and two pawns against rook and pawn: drawish when the extra pawn brings no outside
/// passer and the defending king blocks.
pub fn scale_krppkrp(position: &Position, strong_side: Color) -> ScaleFactor {
    let pawns = position.occupied((strong_side, PieceType::Pawn));
    let weak_king = position.king_square(!strong_side);

    // If the defending king is in front of both pawns the position is hard to win.
    let blocked = pawns
        .into_iter()
        .all(|pawn_sq| (forward_span(strong_side, pawn_sq) & weak_king).has_any() || weak_king.distance(pawn_sq) <= 1);
    if blocked {
        return 24;
    }
    SCALE_FACTOR_NORMAL
}

/// Bishop and pawn against bishop: drawish when the defending king blocks the pawn, especially
/// with opposite-colored bishops.
pub fn scale_kbpkb(position: &Position, strong_side: Color) -> ScaleFactor {
    let pawn_sq = position
        .occupied((strong_side, PieceType::Pawn))
        .lsb()
        .expect("The KBPKB configuration has a pawn.");
    let weak_king = position.king_square(!strong_side);

    if (forward_span(strong_side, pawn_sq) & weak_king).has_none() {
        return SCALE_FACTOR_NORMAL;
    }

    let strong_bishop = position.occupied((strong_side, PieceType::Bishop)).lsb().expect("A bishop");
    let weak_bishop = position.occupied((!strong_side, PieceType::Bishop)).lsb().expect("A bishop");
    let same_color = (u8::from(strong_bishop.file()) + u8::from(strong_bishop.rank())) % 2
        == (u8::from(weak_bishop.file()) + u8::from(weak_bishop.rank())) % 2;

    if same_color {
        16
    } else {
        8
    }
}

/// Queen against rook and pawn: the rook-and-pawn fortress holds when the rook is defended by
/// its pawn with the king nearby.
pub fn scale_kqkrp(position: &Position, strong_side: Color) -> ScaleFactor {
    let weak_side = !strong_side;
    let rook_sq = position
        .occupied((weak_side, PieceType::Rook))
        .lsb()
        .expect("The KQKRP configuration has a rook.");
    let weak_king = position.king_square(weak_side);
    let pawns = position.occupied((weak_side, PieceType::Pawn));

    let rook_defended_by_pawn =
        (crate::move_gen::attacks::attacks_from_pawns(!weak_side, rook_sq) & pawns).has_any();
    if rook_defended_by_pawn && weak_king.distance(rook_sq) <= 2 {
        return 16;
    }
    SCALE_FACTOR_NORMAL
}

/// King and pawns against a bare king: a draw when every pawn is a rook pawn and the defending
/// king controls the promotion corner.
pub fn scale_kpsk(position: &Position, strong_side: Color) -> ScaleFactor {
    let pawns = position.occupied((strong_side, PieceType::Pawn));

    let all_on_a = (pawns & !Bitboard::from(File::A)).has_none();
    let all_on_h = (pawns & !Bitboard::from(File::H)).has_none();
    if !all_on_a && !all_on_h {
        return SCALE_FACTOR_NORMAL;
    }

    let file = if all_on_a { File::A } else { File::H };
    let queening_sq = Square::new(file, Rank::R8.relative_to_color(strong_side));
    if position.king_square(!strong_side).distance(queening_sq) <= 1 {
        return SCALE_FACTOR_DRAW;
    }
    SCALE_FACTOR_NORMAL
}

/// Pawn against pawn: hard to win unless the strong pawn simply runs.
pub fn scale_kpkp(position: &Position, strong_side: Color) -> ScaleFactor {
    let pawn_sq = position
        .occupied((strong_side, PieceType::Pawn))
        .lsb()
        .expect("The KPKP configuration has pawns.");

    if crate::eval::unstoppable_passer(position, strong_side, pawn_sq) {
        return SCALE_FACTOR_NORMAL;
    }
    if (forward_span(strong_side, pawn_sq) & position.king_square(!strong_side)).has_any() {
        return 8;
    }
    SCALE_FACTOR_NORMAL
}

//======================================================================================================================
// KPK bitbase
//======================================================================================================================

mod kpk {
    use super::*;
    use crate::move_gen::attacks::{attacks_from, attacks_from_pawns};

    // Positions are indexed by side to move, white king square, black king square and the pawn
    // square, the pawn being normalized to files A-D. White is always the pawn owner.
    const MAX_INDEX: usize = 2 * 64 * 64 * 4 * 6;

    static mut BITBASE: [u8; MAX_INDEX / 8] = [0; MAX_INDEX / 8];

    #[derive(Clone, Copy, PartialEq)]
    struct Outcome(u8);

    impl Outcome {
        const INVALID: Outcome = Outcome(0);
        const UNKNOWN: Outcome = Outcome(1);
        const DRAW: Outcome = Outcome(2);
        const WIN: Outcome = Outcome(4);

        fn contains(self, other: Outcome) -> bool {
            self.0 & other.0 != 0
        }
    }

    impl std::ops::BitOrAssign for Outcome {
        fn bitor_assign(&mut self, rhs: Self) {
            self.0 |= rhs.0;
        }
    }

    fn index(us: Color, white_king: Square, black_king: Square, pawn: Square) -> usize {
        debug_assert!(u8::from(pawn.file()) <= u8::from(File::D));
        debug_assert!(pawn.rank() >= Rank::R2 && pawn.rank() <= Rank::R7);

        usize::from(white_king)
            | usize::from(black_king) << 6
            | usize::from(us) << 12
            | usize::from(pawn.file()) << 13
            | (usize::from(pawn.rank()) - 1) << 15
    }

    fn decode(index: usize) -> (Color, Square, Square, Square) {
        let white_king = Square::from((index & 0x3f) as u8);
        let black_king = Square::from(((index >> 6) & 0x3f) as u8);
        let us = Color::from(((index >> 12) & 1) as u8);
        let file = File::from(((index >> 13) & 0x3) as u8);
        let rank = Rank::from(((index >> 15) & 0x7) as u8 + 1);
        (us, white_king, black_king, Square::new(file, rank))
    }

    fn king_attacks(sq: Square) -> Bitboard {
        attacks_from::<{ PieceType::KING_VALUE }>(Bitboard::EMPTY, sq)
    }

    fn classify_leaf(index: usize) -> Outcome {
        let (us, white_king, black_king, pawn) = decode(index);

        // Overlapping pieces, adjacent kings, or the black king capturable with White to move.
        if white_king == pawn
            || white_king == black_king
            || black_king == pawn
            || white_king.distance(black_king) <= 1
            || (us == Color::White && attacks_from_pawns(Color::White, pawn).get(black_king))
        {
            return Outcome::INVALID;
        }

        if us == Color::White {
            // The pawn promotes without being captured.
            if pawn.rank() == Rank::R7 {
                let promotion_sq = unsafe { pawn.up_unchecked(1) };
                if white_king != promotion_sq
                    && (black_king.distance(promotion_sq) > 1 || king_attacks(white_king).get(promotion_sq))
                {
                    return Outcome::WIN;
                }
            }
        } else {
            // Stalemate, or the black king captures the undefended pawn.
            let escapes = king_attacks(black_king) & !(king_attacks(white_king) | attacks_from_pawns(Color::White, pawn));
            if escapes.has_none() {
                return Outcome::DRAW;
            }
            if king_attacks(black_king).get(pawn) && !king_attacks(white_king).get(pawn) {
                return Outcome::DRAW;
            }
        }

        Outcome::UNKNOWN
    }

    fn classify(index: usize, db: &[Outcome]) -> Outcome {
        let (us, white_king, black_king, pawn) = decode(index);

        let mut successors = Outcome::INVALID;

        if us == Color::White {
            for to in king_attacks(white_king) {
                successors |= db[self::index(Color::Black, to, black_king, pawn)];
            }
            if pawn.rank() < Rank::R7 {
                let push_sq = unsafe { pawn.up_unchecked(1) };
                successors |= db[self::index(Color::Black, white_king, black_king, push_sq)];
                if pawn.rank() == Rank::R2 && push_sq != white_king && push_sq != black_king {
                    let double_push_sq = unsafe { push_sq.up_unchecked(1) };
                    successors |= db[self::index(Color::Black, white_king, black_king, double_push_sq)];
                }
            }

            if successors.contains(Outcome::WIN) {
                Outcome::WIN
            } else if successors.contains(Outcome::UNKNOWN) {
                Outcome::UNKNOWN
            } else {
                Outcome::DRAW
            }
        } else {
            for to in king_attacks(black_king) {
                successors |= db[self::index(Color::White, white_king, to, pawn)];
            }

            if successors.contains(Outcome::DRAW) {
                Outcome::DRAW
            } else if successors.contains(Outcome::UNKNOWN) {
                Outcome::UNKNOWN
            } else {
                Outcome::WIN
            }
        }
    }

    /// Generates the bitbase by retrograde analysis: classify the terminal positions, then
    /// iterate over the unknown ones until a fixed point is reached.
    pub fn initialize() {
        let mut db: Vec<Outcome> = (0..MAX_INDEX).map(classify_leaf).collect();

        let mut changed = true;
        while changed {
            changed = false;
            for index in 0..MAX_INDEX {
                if db[index] == Outcome::UNKNOWN {
                    let outcome = classify(index, &db);
                    if outcome != Outcome::UNKNOWN {
                        db[index] = outcome;
                        changed = true;
                    }
                }
            }
        }

        for (index, outcome) in db.iter().enumerate() {
            if *outcome == Outcome::WIN {
                unsafe { BITBASE[index / 8] |= 1 << (index % 8) };
            }
        }
    }

    /// Probes the bitbase. The position is normalized so the pawn owner is White and the pawn
    /// stands on files A-D.
    pub fn probe(
        strong_king: Square,
        pawn: Square,
        weak_king: Square,
        side_to_move: Color,
        strong_side: Color,
    ) -> bool {
        // Flip the board vertically when the pawn owner is Black.
        let (mut white_king, mut pawn, mut black_king, us) = match strong_side {
            Color::White => (strong_king, pawn, weak_king, side_to_move),
            Color::Black => (strong_king.mirror(), pawn.mirror(), weak_king.mirror(), !side_to_move),
        };

        // Mirror horizontally onto files A-D.
        if u8::from(pawn.file()) > u8::from(File::D) {
            white_king = Square::new(white_king.file().mirror(), white_king.rank());
            black_king = Square::new(black_king.file().mirror(), black_king.rank());
            pawn = Square::new(pawn.file().mirror(), pawn.rank());
        }

        let index = index(us, white_king, black_king, pawn);
        unsafe { BITBASE[index / 8] & (1 << (index % 8)) != 0 }
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
        fn test_central_pawn_with_kings_behind_is_won() {
            // White: Ke1, Pe2 against Ke8. A win for White with either side to move.
            assert!(probe(Square::E1, Square::E2, Square::E8, Color::White, Color::White));
            assert!(probe(Square::E1, Square::E2, Square::E8, Color::Black, Color::White));
        }

        #[test]
        fn test_rook_pawn_with_defender_in_the_corner_is_drawn() {
            // White: Kf5, Pa4 against Kb8: the black king reaches a8 in time.
            assert!(!probe(Square::F5, Square::A4, Square::B8, Color::Black, Color::White));
        }

        #[test]
        fn test_defender_in_front_without_opposition_is_drawn() {
            // White: Ke4, Pe3 against Ke6 with White to move: Black keeps the opposition.
            assert!(!probe(Square::E4, Square::E3, Square::E6, Color::White, Color::White));
        }

        #[test]
        fn test_king_on_sixth_in_front_of_pawn_is_won() {
            // White: Ke6, Pe5 against Ke8: winning regardless of the side to move.
            assert!(probe(Square::E6, Square::E5, Square::E8, Color::White, Color::White));
            assert!(probe(Square::E6, Square::E5, Square::E8, Color::Black, Color::White));
        }

        #[test]
        fn test_black_strong_side_is_mirrored() {
            // The mirrored version of Ke1/Pe2 vs Ke8: Black owns the pawn.
            assert!(probe(Square::E8, Square::E7, Square::E1, Color::Black, Color::Black));
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

    #[test]
    fn test_material_key_of_code_matches_real_positions() {
        let position = Position::new_from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        assert_eq!(material_key_of_code("KPK"), position.material_hash());

        let position = Position::new_from_fen("4k3/4p3/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        assert_eq!(material_key_of_code("KKP"), position.material_hash());

        assert_ne!(material_key_of_code("KPK"), material_key_of_code("KKP"));
    }

    #[test]
    fn test_registry_lookup() {
        let (function, strong_side) = probe_evaluation(material_key_of_code("KPK")).unwrap();
        assert_eq!(strong_side, Color::White);
        let _ = function;

        let (_, strong_side) = probe_evaluation(material_key_of_code("KKBN")).unwrap();
        assert_eq!(strong_side, Color::Black);

        // The strong side follows the piece values, not the piece counts.
        let (_, strong_side) = probe_evaluation(material_key_of_code("KPKR")).unwrap();
        assert_eq!(strong_side, Color::Black);
        let (_, strong_side) = probe_evaluation(material_key_of_code("KRKQ")).unwrap();
        assert_eq!(strong_side, Color::Black);

        assert!(probe_evaluation(material_key_of_code("KRKR")).is_none());
        assert!(probe_scaling(material_key_of_code("KRPKR")).is_some());
    }

    #[test]
    fn test_evaluate_kpk_uses_the_bitbase() {
        let won = Position::new_from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        assert!(i16::from(evaluate_kpk(&won, Color::White)) > 500);

        // Rook pawn with the defending king in the corner.
        let drawn = Position::new_from_fen("k7/8/8/8/P7/8/8/5K2 b - - 0 1").unwrap();
        assert_eq!(evaluate_kpk(&drawn, Color::White), Eval::DRAW);
    }

    #[test]
    fn test_evaluate_kxk_prefers_cornered_king() {
        let cornered = Position::new_from_fen("k7/8/1K6/8/8/8/8/7R w - - 0 1").unwrap();
        let centered = Position::new_from_fen("8/8/3k4/8/3K4/8/8/7R w - - 0 1").unwrap();
        assert!(evaluate_kxk(&cornered, Color::White) > evaluate_kxk(&centered, Color::White));
        assert!(i16::from(evaluate_kxk(&centered, Color::White)) as i32 > VALUE_KNOWN_WIN / 2);
    }

    #[test]
    fn test_evaluate_kqkr_is_winning_for_the_queen() {
        let position = Position::new_from_fen("3k4/3r4/8/8/8/8/3Q4/3K4 w - - 0 1").unwrap();
        assert!(i16::from(evaluate_kqkr(&position, Color::White)) > 400);
    }

    #[test]
    fn test_scale_kbpk_wrong_bishop_draw() {
        // Light-squared bishop, a-pawn queening on a8 (dark... a8 is light), defender in the
        // corner: use the h-file where h8 is dark and the bishop is light-squared.
        let position = Position::new_from_fen("7k/8/8/8/7P/8/8/2B3K1 w - - 0 1").unwrap();
        // Bc1 is on a dark square and h8 is dark, so this bishop is the right one.
        assert_eq!(scale_kbpk(&position, Color::White), SCALE_FACTOR_NORMAL);

        // A light-squared bishop cannot cover h8.
        let position = Position::new_from_fen("7k/8/8/8/7P/8/8/3B2K1 w - - 0 1").unwrap();
        assert_eq!(scale_kbpk(&position, Color::White), SCALE_FACTOR_DRAW);
    }

    #[test]
    fn test_scale_krpkr_philidor_setup() {
        // The defending king stands on the pawn's queening path.
        let position = Position::new_from_fen("4k3/8/8/4P3/8/8/r7/4K2R w - - 0 1").unwrap();
        assert!(scale_krpkr(&position, Color::White) < SCALE_FACTOR_NORMAL);

        // The defending king is cut off.
        let position = Position::new_from_fen("k7/8/8/4P3/8/8/r7/4K2R w - - 0 1").unwrap();
        assert_eq!(scale_krpkr(&position, Color::White), SCALE_FACTOR_NORMAL);
    }

    #[test]
    fn test_scale_kpsk_corner_fortress() {
        let position = Position::new_from_fen("k7/8/8/8/P7/P7/8/4K3 w - - 0 1").unwrap();
        assert_eq!(scale_kpsk(&position, Color::White), SCALE_FACTOR_DRAW);

        let position = Position::new_from_fen("7k/8/8/8/P7/P7/8/4K3 w - - 0 1").unwrap();
        assert_eq!(scale_kpsk(&position, Color::White), SCALE_FACTOR_NORMAL);
    }
}
