//! ハーネス全体のエラー型

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// perft オラクル処理で発生するエラー
///
/// エンジン関連のエラーはすべてセッションにとって致命的で、再試行はしない。
#[derive(thiserror::Error, Debug)]
pub enum OracleError {
    /// エンジンプロセスを起動できなかった
    #[error("failed to spawn engine at {}: {source}", .path.display())]
    EngineLaunch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// パイプの読み書きに失敗した
    #[error("{label}: engine I/O error: {source}")]
    EngineIo {
        label: String,
        #[source]
        source: std::io::Error,
    },

    /// 応答のフレーミングが想定と異なる
    #[error("{label}: protocol error: {message}")]
    EngineProtocol { label: String, message: String },

    /// 問い合わせ中にエンジンが終了した
    #[error("{label}: engine exited unexpectedly ({})", describe_status(.status))]
    EngineCrashed {
        label: String,
        status: Option<ExitStatus>,
    },

    /// 応答待ちが制限時間を超えた
    #[error("{label}: no response from engine within {timeout:?}")]
    EngineTimeout { label: String, timeout: Duration },

    /// Closed / Failed 状態のセッションに対する操作
    #[error("{label}: session is {state}")]
    EngineSessionClosed { label: String, state: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid FEN '{fen}': {message}")]
    InvalidFen { fen: String, message: String },

    #[error("invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl OracleError {
    /// エンジンプロセス起因のエラーかどうか
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            OracleError::EngineLaunch { .. }
                | OracleError::EngineIo { .. }
                | OracleError::EngineProtocol { .. }
                | OracleError::EngineCrashed { .. }
                | OracleError::EngineTimeout { .. }
                | OracleError::EngineSessionClosed { .. }
        )
    }
}

fn describe_status(status: &Option<ExitStatus>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => "exit status unknown".to_string(),
    }
}

pub type OracleResult<T> = Result<T, OracleError>;
