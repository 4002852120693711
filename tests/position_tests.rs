//! Position invariants exercised over whole games: every make/unmake pair must restore the
//! position bit-exactly, and every incrementally maintained value must match a from-scratch
//! recomputation at every step.

use ctor::ctor;
use ferrite::{
    move_gen::{generation::generate_legal_moves, move_list::MoveList},
    notation::parse_coordinate_notation,
    position::Position,
};

#[ctor]
fn setup() {
    ferrite::initialize();
}

// The Opera Game, promoted-pawn tactics and castling on both sides.
const OPERA_GAME: &[&str] = &[
    "e2e4", "e7e5", "g1f3", "d7d6", "d2d4", "c8g4", "d4e5", "g4f3", "d1f3", "d6e5", "f1c4", "g8f6",
    "f3b3", "d8e7", "b1c3", "c7c6", "c1g5", "b7b5", "c3b5", "c6b5", "c4b5", "b8d7", "e1c1", "a8d8",
    "d1d7", "d8d7", "h1d1", "e7e6", "b5d7", "f6d7", "b3b8", "d7b8", "d1d8",
];

#[test]
fn test_full_game_keeps_every_invariant() {
    let mut position = Position::new();

    for mv_str in OPERA_GAME {
        let mv = parse_coordinate_notation(&position, mv_str).expect("The game moves parse");
        assert!(position.is_pseudo_legal(mv), "{} is not pseudo-legal", mv_str);
        assert!(position.is_legal(mv), "{} is not legal", mv_str);
        position.make(mv);
        assert!(position.is_ok(), "invariants broken after {}", mv_str);
    }
}

#[test]
fn test_full_game_unwinds_to_the_start() {
    let mut position = Position::new();
    let initial_fen = position.to_fen();
    let initial_hash = position.hash();

    let mut fens = Vec::new();
    let mut hashes = Vec::new();
    for mv_str in OPERA_GAME {
        fens.push(position.to_fen());
        hashes.push((position.hash(), position.pawn_hash(), position.material_hash()));
        let mv = parse_coordinate_notation(&position, mv_str).expect("The game moves parse");
        position.make(mv);
    }

    for _ in 0..OPERA_GAME.len() {
        position.unmake();
        assert!(position.is_ok());
        let expected_fen = fens.pop().expect("One stored FEN per move");
        let (hash, pawn_hash, material_hash) = hashes.pop().expect("One stored hash per move");
        assert_eq!(position.to_fen(), expected_fen);
        assert_eq!(position.hash(), hash);
        assert_eq!(position.pawn_hash(), pawn_hash);
        assert_eq!(position.material_hash(), material_hash);
    }

    assert_eq!(position.to_fen(), initial_fen);
    assert_eq!(position.hash(), initial_hash);
}

#[test]
fn test_make_unmake_every_legal_move_of_tricky_positions() {
    let fens = [
        // Kiwipete: castlings, pins, en passant, promotions nearby.
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        // Promotions with captures on both wings.
        "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        // En passant with a discovered-check trap.
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 b - - 0 1",
        // Chess960 castling files.
        "1rrkrr2/8/8/8/8/8/8/1RRKRR2 w KQkq - 0 1",
    ];

    for fen in fens {
        let position = Position::new_from_fen(fen).expect("The test FEN is valid");
        let mut moves = MoveList::new();
        generate_legal_moves(&position, &mut moves);
        assert!(!moves.is_empty());

        for mv in moves.iter() {
            let mut copy = position.clone();
            copy.make(mv);
            assert!(copy.is_ok(), "invariants broken by {:?} in {}", mv, fen);
            copy.unmake();
            assert!(copy.is_ok());
            assert_eq!(copy.to_fen(), fen, "unmake of {:?} did not restore {}", mv, fen);
            assert_eq!(copy.hash(), position.hash());
        }
    }
}

#[test]
fn test_fen_round_trips() {
    let fens = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3",
        "8/6p1/5bk1/p4p1p/r5P1/5K1P/P1R2P2/2B5 w - - 0 37",
        "1rrkrr2/8/8/8/8/8/8/1RRKRR2 w KQkq - 0 1",
        "4k3/8/8/8/8/8/8/R3K3 w - - 99 80",
    ];

    for fen in fens {
        let position = Position::new_from_fen(fen).expect("The test FEN is valid");
        assert_eq!(position.to_fen(), fen);
        assert_eq!(Position::new_from_fen(&position.to_fen()).expect("round trip").hash(), position.hash());
    }
}

#[test]
fn test_keys_are_path_independent() {
    // The same position reached through different move orders has the same keys.
    let mut path_one = Position::new();
    for mv_str in ["g1f3", "g8f6", "b1c3", "b8c6"] {
        let mv = parse_coordinate_notation(&path_one, mv_str).unwrap();
        path_one.make(mv);
    }

    let mut path_two = Position::new();
    for mv_str in ["b1c3", "b8c6", "g1f3", "g8f6"] {
        let mv = parse_coordinate_notation(&path_two, mv_str).unwrap();
        path_two.make(mv);
    }

    assert_eq!(path_one.hash(), path_two.hash());
    assert_eq!(path_one.pawn_hash(), path_two.pawn_hash());
    assert_eq!(path_one.material_hash(), path_two.material_hash());
}

#[test]
fn test_different_castling_rights_have_different_keys() {
    let all = Position::new_from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
    let none = Position::new_from_fen("r3k2r/8/8/8/8/8/8/R3K2R w - - 0 1").unwrap();
    assert_ne!(all.hash(), none.hash());
}

#[test]
fn test_attacks_to_matches_a_scan_over_all_pieces() {
    use ferrite::bitboard::Bitboard;
    use ferrite::coordinates::Square;
    use ferrite::move_gen::generation::generate_moves;
    use ferrite::move_gen::generation::MoveGenerationType;
    use ferrite::piece::Color;
    use ferrite::position::OccupancyFilter;

    let position =
        Position::new_from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1").unwrap();
    let occupied = position.occupied(OccupancyFilter::All);

    // Every capture generated for a color lands on a square `attacks_to` reports as attacked by
    // that color.
    let mut captures = MoveList::new();
    generate_moves::<{ MoveGenerationType::CAPTURES_VALUE }>(&position, &mut captures);
    for mv in captures.iter() {
        let attackers = position.attacks_to(mv.to_square(), occupied, Color::White);
        assert!(attackers.get(mv.from_square()), "{:?} not reported by attacks_to", mv);
    }

    // The h4 square is reached only by the black rook down the open h-file.
    assert_eq!(position.attacks_to(Square::H4, occupied, Color::Black), Bitboard::from(Square::H8));
    assert_eq!(position.attackers_to(Square::H4, occupied) & position.occupied(Color::Black), Bitboard::from(Square::H8));
}
