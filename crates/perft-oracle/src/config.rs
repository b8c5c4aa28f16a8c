//! TOML 設定ファイル
//!
//! ```toml
//! [engine]
//! path = "stockfish"
//! args = []
//! options = ["Threads=1", "Hash=16"]
//! timeout_ms = 600000
//!
//! [dataset]
//! count = 10
//! max_plies = 30
//! max_depth = 6
//! jobs = 1
//! seed = 42
//! out = "perft_dataset_depth_6.json"
//! ```
//!
//! すべての項目は省略可能で、コマンドライン引数が指定されていればそちらを優先する。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{OracleError, OracleResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub path: Option<PathBuf>,
    pub args: Option<Vec<String>>,
    pub options: Option<Vec<String>>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetSection {
    pub count: Option<usize>,
    pub max_plies: Option<u32>,
    pub max_depth: Option<u32>,
    pub jobs: Option<usize>,
    pub seed: Option<u64>,
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub dataset: DatasetSection,
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str, origin: &Path) -> OracleResult<Self> {
        toml::from_str(text).map_err(|e| OracleError::Config {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> OracleResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| OracleError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&text, path)
    }
}
