//! バイナリの end-to-end テスト
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use perft_oracle::common::io::{read_dataset, write_dataset_atomic};
use perft_oracle::{Dataset, ReferenceOracle, label_positions};

const STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

const FAKE_ENGINE: &str = r#"while IFS= read -r line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    "go perft "*) d=${line#go perft }; printf 'g1f3: %s\n\nNodes searched: %s\n\n' "$d" "$d" ;;
    quit) exit 0 ;;
  esac
done
"#;

fn perft_dataset() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_perft_dataset"));
    cmd.args(["--engine", "sh", "--engine-arg", "-c", "--engine-arg", FAKE_ENGINE]);
    cmd
}

fn verify(path: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_verify_perft_dataset"));
    cmd.arg(path);
    cmd
}

#[test]
fn generates_dataset_with_fake_engine() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("perft.json");
    perft_dataset()
        .args(["--count", "3", "--max-plies", "8", "--max-depth", "2", "--seed", "5"])
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    let dataset = read_dataset(&out).unwrap();
    assert_eq!(dataset.len(), 3);
    for entry in dataset.iter() {
        assert_eq!(entry.depths.len(), 2);
        assert_eq!(entry.depths.get(2).unwrap().get("g1f3"), Some(2));
    }
}

#[test]
fn single_fen_goes_to_stdout() {
    let output = perft_dataset()
        .args(["--fen", STARTPOS, "--max-depth", "3", "--out", "-"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let dataset: Dataset = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(dataset.len(), 1);
    assert_eq!(dataset.entries()[0].fen, STARTPOS);
    assert_eq!(dataset.entries()[0].depths.max_depth(), Some(3));
}

#[test]
fn missing_engine_fails_without_writing_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("perft.json");
    let output = Command::new(env!("CARGO_BIN_EXE_perft_dataset"))
        .args(["--engine", "/nonexistent/engine", "--count", "1"])
        .arg("--out")
        .arg(&out)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to spawn engine"));
    assert!(!out.exists());
}

fn reference_dataset(fens: &[String], depth: u32) -> Dataset {
    Dataset::from(label_positions(&mut ReferenceOracle, fens, depth).unwrap())
}

#[test]
fn verify_accepts_reference_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ok.json.gz");
    let fens = vec![
        STARTPOS.to_string(),
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1".to_string(),
    ];
    write_dataset_atomic(&path, &reference_dataset(&fens, 2)).unwrap();

    verify(&path).assert().success();
}

#[test]
fn verify_reports_mismatch_and_fails() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.json");
    write_dataset_atomic(&good, &reference_dataset(&[STARTPOS.to_string()], 2)).unwrap();

    let text = fs::read_to_string(&good).unwrap();
    assert!(text.contains("\"a2a3\": 1"));
    let bad = dir.path().join("bad.json");
    fs::write(&bad, text.replacen("\"a2a3\": 1", "\"a2a3\": 2", 1)).unwrap();

    let output = verify(&bad).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("a2a3"), "{stderr}");
    assert!(stderr.contains("1 of 2"), "{stderr}");
}
