//! Move-generator validation through perft: the number of leaf nodes of the move-generation
//! tree is compared against the published reference counts for a set of tricky positions
//! covering castling, en passant, promotions, pins and checks.

use ctor::ctor;
use ferrite::{perft::count_nodes, position::Position};

#[ctor]
fn setup() {
    ferrite::initialize();
}

fn assert_perft(fen: &str, expected: &[u64]) {
    let mut position = Position::new_from_fen(fen).expect("The test FEN is valid");
    for (index, expected_nodes) in expected.iter().enumerate() {
        let depth = index as u32 + 1;
        let nodes = count_nodes(&mut position, depth);
        assert_eq!(
            nodes, *expected_nodes,
            "perft({}) of {} returned {} instead of {}",
            depth, fen, nodes, expected_nodes
        );
    }
}

#[test]
fn test_perft_initial_position() {
    assert_perft(
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        &[20, 400, 8_902, 197_281, 4_865_609],
    );
}

#[test]
#[ignore = "slow: nineteen billion make/unmake calls in a debug build"]
fn test_perft_initial_position_depth_6() {
    assert_perft("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1", &[20, 400, 8_902, 197_281, 4_865_609, 119_060_324]);
}

#[test]
fn test_perft_kiwipete() {
    // The classic castling/en-passant/pin stress position.
    assert_perft(
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        &[48, 2_039, 97_862],
    );
}

#[test]
fn test_perft_discovered_checks() {
    assert_perft("8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1", &[14, 191, 2_812, 43_238, 674_624]);
}

#[test]
fn test_perft_promotions() {
    assert_perft(
        "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        &[6, 264, 9_467, 422_333],
    );
}

#[test]
fn test_perft_busy_middlegame() {
    assert_perft(
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        &[44, 1_486, 62_379, 2_103_487],
    );
}

#[test]
fn test_perft_symmetrical_position() {
    assert_perft(
        "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
        &[46, 2_079, 89_890, 3_894_594],
    );
}

#[test]
fn test_perft_is_color_symmetric() {
    // The mirrored position must produce the same counts.
    let mut white = Position::new_from_fen("r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1")
        .expect("valid fen");
    let mut black = Position::new_from_fen("r3k2r/pppbbppp/2n2q1P/1P2p3/3pn3/BN2PNP1/P1PPQPB1/R3K2R b KQkq - 0 1")
        .expect("valid fen");

    for depth in 1..=3 {
        assert_eq!(count_nodes(&mut white, depth), count_nodes(&mut black, depth));
    }
}
