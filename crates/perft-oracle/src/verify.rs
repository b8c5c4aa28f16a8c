//! 参照用の合法手生成器（shakmaty）による perft データの照合
//!
//! データセットの各深さについて手ごとの内訳を再計算し、
//! 余分な手・欠けている手・ノード数の不一致を報告する。

use std::fmt;

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Position};

use crate::engine::PerftOracle;
use crate::error::{OracleError, OracleResult};
use crate::types::{DatasetEntry, MoveNodeCount};

pub fn parse_fen(fen: &str) -> OracleResult<Chess> {
    let invalid = |message: String| OracleError::InvalidFen {
        fen: fen.to_string(),
        message,
    };
    let parsed: Fen = fen.parse().map_err(|e| invalid(format!("{e}")))?;
    parsed
        .into_position(CastlingMode::Standard)
        .map_err(|e| invalid(format!("{e}")))
}

/// 手ごとの perft 内訳（divide）
pub fn reference_divide(pos: &Chess, depth: u32) -> MoveNodeCount {
    if depth == 0 {
        return MoveNodeCount::root();
    }
    let moves = pos
        .legal_moves()
        .into_iter()
        .map(|m| {
            let uci = m.to_uci(CastlingMode::Standard).to_string();
            let mut child = pos.clone();
            child.play_unchecked(&m);
            (uci, shakmaty::perft(&child, depth - 1))
        })
        .collect();
    // 合法手リストに重複はない
    MoveNodeCount::from_unique_moves(moves)
}

/// プロセスを使わない参照オラクル
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceOracle;

impl PerftOracle for ReferenceOracle {
    fn perft(&mut self, fen: &str, depth: u32) -> OracleResult<MoveNodeCount> {
        let pos = parse_fen(fen)?;
        Ok(reference_divide(&pos, depth))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    /// 参照側にだけある手
    ExtraMove { mv: String, nodes: u64 },
    /// データセット側にだけある手
    MissingMove { mv: String, nodes: u64 },
    NodeMismatch {
        mv: String,
        expected: u64,
        actual: u64,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::ExtraMove { mv, nodes } => write!(f, "extra move {mv} ({nodes} nodes)"),
            Discrepancy::MissingMove { mv, nodes } => {
                write!(f, "missing move {mv} (oracle: {nodes} nodes)")
            }
            Discrepancy::NodeMismatch {
                mv,
                expected,
                actual,
            } => write!(f, "{mv}: oracle {expected} nodes, reference {actual} nodes"),
        }
    }
}

/// 1局面・1深さ分の照合結果
#[derive(Debug, Clone)]
pub struct DepthReport {
    pub fen: String,
    pub depth: u32,
    pub discrepancies: Vec<Discrepancy>,
}

impl DepthReport {
    pub fn is_ok(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// `expected`（オラクル）と `actual`（参照）を比較する。
pub fn compare_counts(expected: &MoveNodeCount, actual: &MoveNodeCount) -> Vec<Discrepancy> {
    let mut out = Vec::new();
    for (mv, nodes) in actual.iter() {
        match expected.get(mv) {
            None => out.push(Discrepancy::ExtraMove {
                mv: mv.to_string(),
                nodes,
            }),
            Some(e) if e != nodes => out.push(Discrepancy::NodeMismatch {
                mv: mv.to_string(),
                expected: e,
                actual: nodes,
            }),
            Some(_) => {}
        }
    }
    for (mv, nodes) in expected.iter() {
        if !actual.contains(mv) {
            out.push(Discrepancy::MissingMove {
                mv: mv.to_string(),
                nodes,
            });
        }
    }
    out
}

/// エントリの各深さ（`max_depth` 以下）を参照生成器で照合する。
pub fn verify_entry(
    entry: &DatasetEntry,
    max_depth: Option<u32>,
) -> OracleResult<Vec<DepthReport>> {
    if !entry.depths.is_contiguous() {
        return Err(OracleError::InvalidArgument(format!(
            "depth keys of '{}' are not contiguous from 1",
            entry.fen
        )));
    }
    let pos = parse_fen(&entry.fen)?;
    let reports = entry
        .depths
        .iter()
        .take_while(|(depth, _)| max_depth.is_none_or(|m| *depth <= m))
        .map(|(depth, expected)| DepthReport {
            fen: entry.fen.clone(),
            depth,
            discrepancies: compare_counts(expected, &reference_divide(&pos, depth)),
        })
        .collect();
    Ok(reports)
}
