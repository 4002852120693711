use std::sync::OnceLock;

use crate::{
    endgame::{
        self, material_key_of_code, scale_kbpk, scale_kpkp, scale_kpsk, scale_kqkrp, EndgameEvalFn, EndgameScaleFn,
        ScaleFactor, SCALE_FACTOR_DRAW, SCALE_FACTOR_NORMAL,
    },
    eval::{non_pawn_material_value, EvalPair},
    piece::{Color, PieceType},
    position::Position,
    zobrist::Zobrist,
};

const BISHOP_PAIR_BONUS: EvalPair = EvalPair::new(109, 97);

static KNNK_KEYS: OnceLock<(Zobrist, Zobrist)> = OnceLock::new();

/// Initializes the material module. Must be called after the endgame module.
pub fn initialize() {
    KNNK_KEYS
        .set((material_key_of_code("KNNK"), material_key_of_code("KKNN")))
        .ok()
        .expect("The material module is initialized once.");
}

/// The material information of one piece configuration, cached by material key.
pub struct MaterialEntry {
    key: Zobrist,
    imbalance: EvalPair,
    factor: [ScaleFactor; Color::COUNT],
    space_weight: i32,
    evaluation_function: Option<(EndgameEvalFn, Color)>,
    scaling_function: [Option<EndgameScaleFn>; Color::COUNT],
}

impl Default for MaterialEntry {
    fn default() -> Self {
        Self {
            key: 1, // Never a valid material key of a position with two kings.
            imbalance: EvalPair::default(),
            factor: [SCALE_FACTOR_NORMAL; Color::COUNT],
            space_weight: 0,
            evaluation_function: None,
            scaling_function: [None; Color::COUNT],
        }
    }
}

impl MaterialEntry {
    /// Returns the material imbalance score, from White's point of view.
    pub fn imbalance(&self) -> EvalPair {
        self.imbalance
    }

    /// Returns the scale factor of the given color: `SCALE_FACTOR_NORMAL` in most positions,
    /// lower when the configuration is known to be drawish for that side.
    pub fn factor(&self, color: Color) -> ScaleFactor {
        self.factor[usize::from(color)]
    }

    /// Returns the space-evaluation weight: non-zero only with lots of material on the board.
    pub fn space_weight(&self) -> i32 {
        self.space_weight
    }

    /// Returns the specialized evaluation function for this configuration, if one applies,
    /// together with the stronger side.
    pub fn evaluation_function(&self) -> Option<(EndgameEvalFn, Color)> {
        self.evaluation_function
    }

    /// Returns the specialized end game scaling function for the given color, if one applies.
    pub fn scaling_function(&self, color: Color) -> Option<EndgameScaleFn> {
        self.scaling_function[usize::from(color)]
    }
}

/// An open-addressed cache of material entries keyed by material key.
///
/// Each search thread owns one table; entries are overwritten on index collisions and validated
/// by key comparison on probe.
pub struct MaterialTable {
    entries: Box<[MaterialEntry]>,
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialTable {
    const SIZE: usize = 8192;

    /// Creates a new empty material table.
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(Self::SIZE);
        entries.resize_with(Self::SIZE, MaterialEntry::default);
        Self { entries: entries.into_boxed_slice() }
    }

    /// Returns the material entry for the position, computing and storing it on a miss.
    pub fn probe(&mut self, position: &Position) -> &MaterialEntry {
        let key = position.material_hash();
        let index = (key as usize) & (Self::SIZE - 1);
        let entry = &mut self.entries[index];

        if entry.key != key {
            *entry = Self::compute(position, key);
        }
        &self.entries[index]
    }

    fn compute(position: &Position, key: Zobrist) -> MaterialEntry {
        let mut entry = MaterialEntry { key, ..MaterialEntry::default() };

        // KNN against a bare king cannot win at all.
        let (knnk_key, kknn_key) = *KNNK_KEYS.get().expect("The material module is initialized.");
        if key == knnk_key || key == kknn_key {
            entry.factor = [SCALE_FACTOR_DRAW; Color::COUNT];
            return entry;
        }

        // A registered specialized evaluation replaces everything else.
        if let Some(function) = endgame::probe_evaluation(key) {
            entry.evaluation_function = Some(function);
            return entry;
        }

        // Generic "king and enough material against a bare king" evaluation.
        let rook_value = non_pawn_material_value(PieceType::Rook);
        let bishop_value = non_pawn_material_value(PieceType::Bishop);
        for color in Color::ALL {
            if position.non_pawn_material(!color) == 0
                && position.piece_count(!color, PieceType::Pawn) == 0
                && position.non_pawn_material(color) >= rook_value
            {
                entry.evaluation_function = Some((endgame::evaluate_kxk, color));
                return entry;
            }
        }

        // Registered specialized scaling function.
        if let Some((function, color)) = endgame::probe_scaling(key) {
            entry.scaling_function[usize::from(color)] = Some(function);
        }

        // Generic scaling functions selected by the material split.
        let queen_value = non_pawn_material_value(PieceType::Queen);
        for color in Color::ALL {
            if position.non_pawn_material(color) == bishop_value
                && position.piece_count(color, PieceType::Bishop) == 1
                && position.piece_count(color, PieceType::Pawn) >= 1
            {
                entry.scaling_function[usize::from(color)] = Some(scale_kbpk);
            }

            if position.piece_count(color, PieceType::Pawn) == 0
                && position.non_pawn_material(color) == queen_value
                && position.piece_count(color, PieceType::Queen) == 1
                && position.piece_count(!color, PieceType::Rook) == 1
                && position.piece_count(!color, PieceType::Pawn) >= 1
            {
                entry.scaling_function[usize::from(color)] = Some(scale_kqkrp);
            }
        }

        // Pawn endings.
        if position.non_pawn_material(Color::White) + position.non_pawn_material(Color::Black) == 0 {
            let white_pawns = position.piece_count(Color::White, PieceType::Pawn);
            let black_pawns = position.piece_count(Color::Black, PieceType::Pawn);
            if black_pawns == 0 && white_pawns >= 2 {
                entry.scaling_function[usize::from(Color::White)] = Some(scale_kpsk);
            } else if white_pawns == 0 && black_pawns >= 2 {
                entry.scaling_function[usize::from(Color::Black)] = Some(scale_kpsk);
            } else if white_pawns == 1 && black_pawns == 1 {
                entry.scaling_function[usize::from(Color::White)] = Some(scale_kpkp);
                entry.scaling_function[usize::from(Color::Black)] = Some(scale_kpkp);
            }
        }

        // Without pawns and without a clear material edge it is hard to win at all.
        for color in Color::ALL {
            if position.piece_count(color, PieceType::Pawn) == 0
                && position.non_pawn_material(color) - position.non_pawn_material(!color) <= bishop_value
            {
                if position.non_pawn_material(color) == position.non_pawn_material(!color)
                    || position.non_pawn_material(color) < rook_value
                {
                    entry.factor[usize::from(color)] = SCALE_FACTOR_DRAW;
                } else {
                    entry.factor[usize::from(color)] = match position.piece_count(color, PieceType::Bishop) {
                        2 => 32,
                        1 => 12,
                        _ => 6,
                    };
                }
            }
        }

        // The space term only matters while the board is full.
        let knight_value = non_pawn_material_value(PieceType::Knight);
        if position.non_pawn_material(Color::White) + position.non_pawn_material(Color::Black)
            >= 2 * queen_value + 4 * rook_value + 2 * knight_value
        {
            let minors = (position.piece_count(Color::White, PieceType::Knight)
                + position.piece_count(Color::White, PieceType::Bishop)
                + position.piece_count(Color::Black, PieceType::Knight)
                + position.piece_count(Color::Black, PieceType::Bishop)) as i32;
            entry.space_weight = minors * minors;
        }

        // Material imbalance: bishop pair, knights getting stronger with many pawns on the
        // board, and redundancy of the major pieces.
        let mut imbalance = EvalPair::default();
        for color in Color::ALL {
            let knights = position.piece_count(color, PieceType::Knight) as i16;
            let bishops = position.piece_count(color, PieceType::Bishop) as i16;
            let rooks = position.piece_count(color, PieceType::Rook) as i16;
            let queens = position.piece_count(color, PieceType::Queen) as i16;
            let pawns = position.piece_count(color, PieceType::Pawn) as i16;

            let mut side = EvalPair::default();
            if bishops >= 2 {
                side += BISHOP_PAIR_BONUS;
            }

            let knight_bonus = knights * (pawns - 5) * 16;
            side += EvalPair::new(knight_bonus, knight_bonus);

            if rooks >= 1 {
                let redundancy = (rooks - 1) * 32 + queens * 16;
                side -= EvalPair::new(redundancy, redundancy);
            }

            imbalance += match color {
                Color::White => side,
                Color::Black => -side,
            };
        }
        entry.imbalance = imbalance;

        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Eval;
    use ctor::ctor;

    #[ctor]
    fn setup() {
        crate::initialize();
    }

    #[test]
    fn test_knnk_is_drawish() {
        let position = Position::new_from_fen("4k3/8/8/8/8/8/8/1NN1K3 w - - 0 1").unwrap();
        let mut table = MaterialTable::new();
        let entry = table.probe(&position);
        assert_eq!(entry.factor(Color::White), SCALE_FACTOR_DRAW);
        assert!(entry.evaluation_function().is_none());
    }

    #[test]
    fn test_kpk_selects_the_specialized_evaluation() {
        let position = Position::new_from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        let mut table = MaterialTable::new();
        let entry = table.probe(&position);
        let (_, strong_side) = entry.evaluation_function().unwrap();
        assert_eq!(strong_side, Color::White);
    }

    #[test]
    fn test_kxk_generic_evaluation() {
        let position = Position::new_from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 0 1").unwrap();
        let mut table = MaterialTable::new();
        let entry = table.probe(&position);
        let (function, strong_side) = entry.evaluation_function().unwrap();
        assert_eq!(strong_side, Color::White);
        assert!(i16::from(function(&position, strong_side)) as i32 > endgame::VALUE_KNOWN_WIN / 2);
    }

    #[test]
    fn test_krpkr_selects_the_registered_scaler() {
        let position = Position::new_from_fen("4k3/8/8/4P3/8/8/r7/4K2R w - - 0 1").unwrap();
        let mut table = MaterialTable::new();
        let entry = table.probe(&position);
        assert!(entry.scaling_function(Color::White).is_some());
        assert!(entry.scaling_function(Color::Black).is_none());
    }

    #[test]
    fn test_bishop_pair_imbalance() {
        let with_pair = Position::new_from_fen("rn1qk1nr/pppppppp/8/8/8/8/PPPPPPPP/R1BQKB1R w KQkq - 0 1").unwrap();
        let mut table = MaterialTable::new();
        let imbalance = table.probe(&with_pair).imbalance();

        // White has the bishop pair, black has knights instead: white's imbalance includes the
        // pair bonus, black's the knight-with-pawns bonus.
        assert!(imbalance.mg() > Eval::ZERO);
    }

    #[test]
    fn test_no_pawn_equal_material_is_drawish() {
        let position = Position::new_from_fen("4kr2/8/8/8/8/8/8/4KR2 w - - 0 1").unwrap();
        let mut table = MaterialTable::new();
        let entry = table.probe(&position);
        assert_eq!(entry.factor(Color::White), SCALE_FACTOR_DRAW);
        assert_eq!(entry.factor(Color::Black), SCALE_FACTOR_DRAW);
    }

    #[test]
    fn test_space_weight_needs_a_full_board() {
        let mut table = MaterialTable::new();
        let full = Position::new();
        assert!(table.probe(&full).space_weight() > 0);

        let empty = Position::new_from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 0 1").unwrap();
        assert_eq!(table.probe(&empty).space_weight(), 0);
    }
}
