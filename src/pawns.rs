use crate::{
    bitboard::Bitboard,
    coordinates::{File, Rank, Square},
    eval::{Eval, EvalPair},
    move_gen::attacks::{adjacent_files, attacks_from_pawns, forward_span, passed_pawn_mask, pawn_attack_span},
    piece::{Color, PieceType},
    position::Position,
    zobrist::Zobrist,
};

const ISOLATED_PENALTY: EvalPair = EvalPair::new(15, 18);
const DOUBLED_PENALTY: EvalPair = EvalPair::new(8, 20);
const BACKWARD_PENALTY: EvalPair = EvalPair::new(9, 12);
const CONNECTED_BONUS_MG: [i16; Rank::COUNT] = [0, 2, 4, 7, 12, 20, 35, 0];
const CONNECTED_BONUS_EG: [i16; Rank::COUNT] = [0, 1, 2, 4, 8, 16, 30, 0];

// King shelter penalties indexed by the relative rank of the closest friendly pawn in front of
// the king on a file, and for files with no such pawn at all.
const SHELTER_PAWN_PENALTY: [i16; Rank::COUNT] = [0, 0, 10, 20, 27, 32, 32, 32];
const SHELTER_MISSING_PAWN_PENALTY: i16 = 26;
const SHELTER_OPEN_FILE_PENALTY: i16 = 16;

/// The pawn-structure information of one position, cached by pawn key.
///
/// Everything here depends only on the pawns and kings, so the entry is shared between all
/// positions with the same pawn key. King shelter depends on the king square and is computed
/// lazily, caching the last queried square per color.
pub struct PawnEntry {
    key: Zobrist,
    passed_pawns: [Bitboard; Color::COUNT],
    pawn_attacks: [Bitboard; Color::COUNT],
    pawn_files: [u8; Color::COUNT],
    scores: [EvalPair; Color::COUNT],
    king_squares: [Option<Square>; Color::COUNT],
    king_shelters: [Eval; Color::COUNT],
}

impl Default for PawnEntry {
    fn default() -> Self {
        Self {
            key: 1, // Never a valid pawn key of a position with two kings.
            passed_pawns: [Bitboard::EMPTY; Color::COUNT],
            pawn_attacks: [Bitboard::EMPTY; Color::COUNT],
            pawn_files: [0; Color::COUNT],
            scores: [EvalPair::default(); Color::COUNT],
            king_squares: [None; Color::COUNT],
            king_shelters: [Eval::ZERO; Color::COUNT],
        }
    }
}

impl PawnEntry {
    /// Returns the pawn-structure score of the given color, positive values favoring that
    /// color.
    pub fn score(&self, color: Color) -> EvalPair {
        self.scores[usize::from(color)]
    }

    /// Returns the passed pawns of the given color.
    pub fn passed_pawns(&self, color: Color) -> Bitboard {
        self.passed_pawns[usize::from(color)]
    }

    /// Returns the squares attacked by the pawns of the given color.
    pub fn pawn_attacks(&self, color: Color) -> Bitboard {
        self.pawn_attacks[usize::from(color)]
    }

    /// Returns true if the given color has no pawns on the file.
    pub fn file_is_half_open(&self, color: Color, file: File) -> bool {
        self.pawn_files[usize::from(color)] & (1 << u8::from(file)) == 0
    }

    /// Returns true if neither color has a pawn on the file.
    pub fn file_is_open(&self, file: File) -> bool {
        self.file_is_half_open(Color::White, file) && self.file_is_half_open(Color::Black, file)
    }

    /// Returns the shelter value of the given king square: zero or negative, worse the more
    /// exposed the king is. The value is cached per color until the king square changes.
    pub fn king_shelter(&mut self, position: &Position, color: Color, king_sq: Square) -> Eval {
        if self.king_squares[usize::from(color)] != Some(king_sq) {
            self.king_squares[usize::from(color)] = Some(king_sq);
            self.king_shelters[usize::from(color)] = self.compute_shelter(position, color, king_sq);
        }
        self.king_shelters[usize::from(color)]
    }

    fn compute_shelter(&self, position: &Position, color: Color, king_sq: Square) -> Eval {
        // A king past the middle of the board has no shelter to speak of.
        if usize::from(king_sq.rank().relative_to_color(color)) > usize::from(Rank::R4) {
            return Eval::new(-(SHELTER_MISSING_PAWN_PENALTY * 3));
        }

        let own_pawns = position.occupied((color, PieceType::Pawn));
        let mut penalty = 0i16;

        let king_file = king_sq.file();
        let files = [king_file.left(1).ok(), Some(king_file), king_file.right(1).ok()];
        for file in files.into_iter().flatten() {
            let shelter_sq = Square::new(file, king_sq.rank());
            let pawns_in_front =
                own_pawns & (forward_span(color, shelter_sq) | Bitboard::from(shelter_sq));

            let closest = match color {
                Color::White => pawns_in_front.lsb(),
                Color::Black => pawns_in_front.msb(),
            };

            match closest {
                Some(pawn_sq) => {
                    let relative_rank = usize::from(pawn_sq.rank().relative_to_color(color));
                    penalty += SHELTER_PAWN_PENALTY[relative_rank];
                }
                None => {
                    penalty += SHELTER_MISSING_PAWN_PENALTY;
                    if self.file_is_open(file) {
                        penalty += SHELTER_OPEN_FILE_PENALTY;
                    }
                }
            }
        }

        Eval::new(-penalty)
    }
}

/// An open-addressed cache of pawn-structure entries keyed by pawn key.
///
/// Each search thread owns one table, so no synchronization is needed. Entries are simply
/// overwritten on index collisions; the key comparison on probe decides whether the stored entry
/// matches.
pub struct PawnTable {
    entries: Box<[PawnEntry]>,
}

impl Default for PawnTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PawnTable {
    const SIZE: usize = 16384;

    /// Creates a new empty pawn table.
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(Self::SIZE);
        entries.resize_with(Self::SIZE, PawnEntry::default);
        Self { entries: entries.into_boxed_slice() }
    }

    /// Returns the pawn entry for the position, computing and storing it on a miss.
    pub fn probe(&mut self, position: &Position) -> &mut PawnEntry {
        let key = position.pawn_hash();
        let index = (key as usize) & (Self::SIZE - 1);
        let entry = &mut self.entries[index];

        if entry.key != key {
            *entry = Self::compute(position, key);
        }
        entry
    }

    fn compute(position: &Position, key: Zobrist) -> PawnEntry {
        let mut entry = PawnEntry { key, ..PawnEntry::default() };

        for color in Color::ALL {
            let own_pawns = position.occupied((color, PieceType::Pawn));
            let enemy_pawns = position.occupied((!color, PieceType::Pawn));

            let mut attacks = Bitboard::EMPTY;
            for pawn_sq in own_pawns {
                attacks |= attacks_from_pawns(color, pawn_sq);
            }
            entry.pawn_attacks[usize::from(color)] = attacks;

            let mut files = 0u8;
            for pawn_sq in own_pawns {
                files |= 1 << u8::from(pawn_sq.file());
            }
            entry.pawn_files[usize::from(color)] = files;

            let mut score = EvalPair::default();

            for pawn_sq in own_pawns {
                let file = pawn_sq.file();
                let relative_rank = usize::from(pawn_sq.rank().relative_to_color(color));

                let passed = (passed_pawn_mask(color, pawn_sq) & enemy_pawns).has_none()
                    && (forward_span(color, pawn_sq) & own_pawns).has_none();
                if passed {
                    entry.passed_pawns[usize::from(color)] |= pawn_sq;
                }

                let isolated = (adjacent_files(file) & own_pawns).has_none();
                if isolated {
                    score -= ISOLATED_PENALTY;
                }

                let doubled = (forward_span(color, pawn_sq) & own_pawns).has_any();
                if doubled {
                    score -= DOUBLED_PENALTY;
                }

                // A pawn is backward when no friendly pawn on an adjacent file is beside or
                // behind it, and its stop square is controlled by an enemy pawn.
                if !passed && !isolated {
                    let support_area = adjacent_files(file) & !pawn_attack_span(color, pawn_sq);
                    let supportless = (support_area & own_pawns).has_none();
                    let stop_attacked = pawn_sq
                        .up(color.forward())
                        .is_ok_and(|stop_sq| (attacks_from_pawns(color, stop_sq) & enemy_pawns).has_any());
                    if supportless && stop_attacked {
                        score -= BACKWARD_PENALTY;
                    }
                }

                // Connected: supported or part of a phalanx.
                let neighbors = adjacent_files(file) & own_pawns;
                let supported = (attacks_from_pawns(!color, pawn_sq) & own_pawns).has_any();
                let phalanx = (neighbors & Bitboard::from(pawn_sq.rank())).has_any();
                if supported || phalanx {
                    score += EvalPair::new(CONNECTED_BONUS_MG[relative_rank], CONNECTED_BONUS_EG[relative_rank]);
                }
            }

            entry.scores[usize::from(color)] = score;
        }

        entry
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
    fn test_probe_caches_by_key() {
        let position = Position::new();
        let mut table = PawnTable::new();

        let key = {
            let entry = table.probe(&position);
            entry.key
        };
        assert_eq!(key, position.pawn_hash());

        // Probing again returns the same entry without recomputation.
        let entry = table.probe(&position);
        assert_eq!(entry.key, position.pawn_hash());
    }

    #[test]
    fn test_start_position_has_no_passed_pawns() {
        let position = Position::new();
        let mut table = PawnTable::new();
        let entry = table.probe(&position);
        assert_eq!(entry.passed_pawns(Color::White), Bitboard::EMPTY);
        assert_eq!(entry.passed_pawns(Color::Black), Bitboard::EMPTY);
    }

    #[test]
    fn test_passed_pawn_detection() {
        let position = Position::new_from_fen("4k3/8/8/3P4/8/8/6p1/4K3 w - - 0 1").unwrap();
        let mut table = PawnTable::new();
        let entry = table.probe(&position);
        assert_eq!(entry.passed_pawns(Color::White), Bitboard::from(Square::D5));
        assert_eq!(entry.passed_pawns(Color::Black), Bitboard::from(Square::G2));
    }

    #[test]
    fn test_blocked_pawn_is_not_passed() {
        let position = Position::new_from_fen("4k3/8/3p4/3P4/8/8/8/4K3 w - - 0 1").unwrap();
        let mut table = PawnTable::new();
        let entry = table.probe(&position);
        assert_eq!(entry.passed_pawns(Color::White), Bitboard::EMPTY);
        assert_eq!(entry.passed_pawns(Color::Black), Bitboard::EMPTY);
    }

    #[test]
    fn test_isolated_pawns_score_worse() {
        let connected = Position::new_from_fen("4k3/8/8/8/8/8/4PP2/4K3 w - - 0 1").unwrap();
        let isolated = Position::new_from_fen("4k3/8/8/8/8/8/2P3P1/4K3 w - - 0 1").unwrap();
        let mut table = PawnTable::new();

        let connected_score = table.probe(&connected).score(Color::White);
        let isolated_score = table.probe(&isolated).score(Color::White);
        assert!(i16::from(connected_score.mg()) > i16::from(isolated_score.mg()));
        assert!(i16::from(connected_score.eg()) > i16::from(isolated_score.eg()));
    }

    #[test]
    fn test_open_and_half_open_files() {
        let position = Position::new_from_fen("4k3/2p5/8/8/8/8/2P1P3/4K3 w - - 0 1").unwrap();
        let mut table = PawnTable::new();
        let entry = table.probe(&position);

        // c-file has pawns of both colors, e-file only a white pawn, a-file none at all.
        assert!(!entry.file_is_half_open(Color::White, File::C));
        assert!(!entry.file_is_half_open(Color::Black, File::C));
        assert!(!entry.file_is_open(File::C));

        assert!(!entry.file_is_half_open(Color::White, File::E));
        assert!(entry.file_is_half_open(Color::Black, File::E));
        assert!(!entry.file_is_open(File::E));

        assert!(entry.file_is_open(File::A));
    }

    #[test]
    fn test_king_shelter_prefers_intact_pawns() {
        let sheltered = Position::new_from_fen("4k3/8/8/8/8/8/5PPP/6K1 w - - 0 1").unwrap();
        let exposed = Position::new_from_fen("4k3/8/8/8/8/8/8/6K1 w - - 0 1").unwrap();
        let mut table = PawnTable::new();

        let sheltered_value = {
            let entry = table.probe(&sheltered);
            entry.king_shelter(&sheltered, Color::White, Square::G1)
        };
        let exposed_value = {
            let entry = table.probe(&exposed);
            entry.king_shelter(&exposed, Color::White, Square::G1)
        };
        assert!(i16::from(sheltered_value) > i16::from(exposed_value));
        assert!(i16::from(exposed_value) < 0);
    }
}
