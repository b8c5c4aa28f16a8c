//! チェスの合法手生成器を検証するための perft オラクルデータ生成
//!
//! ランダム自己対局で局面をサンプリングし、外部 UCI エンジン（既定は Stockfish）の
//! `go perft` で深さごとの手別ノード数を取得してデータセットにする。

pub mod common;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod sampler;
pub mod table;
pub mod types;
pub mod verify;

pub use dataset::{
    DatasetParams, RunConfig, assemble_dataset, assemble_dataset_parallel, label_positions, run,
};
pub use engine::{EngineConfig, EngineSession, PerftOracle, PerftParser, SessionState};
pub use error::{OracleError, OracleResult};
pub use sampler::{PositionSampler, SampledPosition, position_fen};
pub use table::build_perft_table;
pub use types::{Dataset, DatasetEntry, MoveCountError, MoveNodeCount, PerftTable};
pub use verify::{DepthReport, Discrepancy, ReferenceOracle, verify_entry};
