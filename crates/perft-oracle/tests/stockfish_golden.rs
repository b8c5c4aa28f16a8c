//! 実際の Stockfish に対する既知の perft 値の確認
//!
//! `stockfish` が PATH に無い環境ではスキップする。

use std::process::{Command, Stdio};

use perft_oracle::{DatasetParams, EngineConfig, EngineSession, RunConfig, run};

const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

fn stockfish_available() -> bool {
    let found = Command::new("stockfish")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok();
    if !found {
        eprintln!("stockfish not found on PATH; skipping");
    }
    found
}

#[test]
fn startpos_depth_one_is_twenty_single_node_moves() {
    if !stockfish_available() {
        return;
    }
    let mut session = EngineSession::open(&EngineConfig::default()).unwrap();
    let table = session.perft(STARTPOS, 1).unwrap();
    assert_eq!(table.len(), 20);
    assert!(table.iter().all(|(_, n)| n == 1));
    session.close().unwrap();
}

#[test]
fn startpos_golden_totals_through_depth_five() {
    if !stockfish_available() {
        return;
    }
    let mut session = EngineSession::open(&EngineConfig::default()).unwrap();
    let totals: Vec<u64> = (1..=5)
        .map(|d| session.perft(STARTPOS, d).unwrap().total())
        .collect();
    assert_eq!(totals, vec![20, 400, 8_902, 197_281, 4_865_609]);
}

#[test]
#[ignore = "runs 60 engine queries up to depth 6"]
fn default_run_produces_ten_entries_with_six_depths() {
    if !stockfish_available() {
        return;
    }
    let cfg = RunConfig {
        engine: EngineConfig::default(),
        params: DatasetParams::default(),
        jobs: 1,
        seed: 2024,
        output: None,
    };
    let dataset = run(&cfg).unwrap();
    assert_eq!(dataset.len(), 10);
    for entry in dataset.iter() {
        assert_eq!(entry.depths.len(), 6);
        assert!(entry.depths.is_contiguous());
    }
}
