//! データセット生成のオーケストレーション

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::common::io::write_dataset_atomic;
use crate::engine::{EngineConfig, EngineSession, PerftOracle};
use crate::error::{OracleError, OracleResult};
use crate::sampler::PositionSampler;
use crate::table::build_perft_table;
use crate::types::{Dataset, DatasetEntry};

/// 1回の生成で使うパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetParams {
    pub count: usize,
    pub max_plies: u32,
    pub max_depth: u32,
}

impl Default for DatasetParams {
    fn default() -> Self {
        Self {
            count: 10,
            max_plies: 30,
            max_depth: 6,
        }
    }
}

impl DatasetParams {
    pub fn validate(&self) -> OracleResult<()> {
        if self.max_plies == 0 {
            return Err(OracleError::InvalidArgument("max plies must be >= 1".to_string()));
        }
        if self.max_depth == 0 {
            return Err(OracleError::InvalidArgument("max depth must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// 局面を1つずつサンプリングし、その場で perft 表を作って並べる。
///
/// どこかで失敗したら途中までの結果は捨ててエラーを返す。
pub fn assemble_dataset<O, R>(
    oracle: &mut O,
    sampler: &mut PositionSampler<R>,
    params: &DatasetParams,
) -> OracleResult<Dataset>
where
    O: PerftOracle + ?Sized,
    R: Rng,
{
    params.validate()?;
    let mut dataset = Dataset::new();
    for i in 0..params.count {
        let sampled = sampler.sample(params.max_plies)?;
        let fen = sampled.fen();
        let started = Instant::now();
        let depths = build_perft_table(oracle, &fen, params.max_depth)?;
        info!(
            "[{}/{}] plies={}{} nodes(d{})={} {:.2}s  {}",
            i + 1,
            params.count,
            sampled.plies(),
            if sampled.terminated_early { " (game over)" } else { "" },
            params.max_depth,
            depths.get(params.max_depth).map(|c| c.total()).unwrap_or(0),
            started.elapsed().as_secs_f64(),
            fen
        );
        dataset.push(DatasetEntry { fen, depths });
    }
    Ok(dataset)
}

/// 与えられた局面群の perft 表を作る（サンプリング済みの局面用）。
pub fn label_positions<O>(
    oracle: &mut O,
    fens: &[String],
    max_depth: u32,
) -> OracleResult<Vec<DatasetEntry>>
where
    O: PerftOracle + ?Sized,
{
    fens.iter()
        .map(|fen| {
            Ok(DatasetEntry {
                fen: fen.clone(),
                depths: build_perft_table(oracle, fen, max_depth)?,
            })
        })
        .collect()
}

/// 1ワーカー分の区間を処理する。`stop` が立ったら次の局面へ進まずに `Ok(None)`。
fn label_batch<O: PerftOracle>(
    mut oracle: O,
    worker: usize,
    batch: &[String],
    max_depth: u32,
    stop: &AtomicBool,
) -> OracleResult<Option<Vec<DatasetEntry>>> {
    let mut entries = Vec::with_capacity(batch.len());
    for fen in batch {
        if stop.load(Ordering::SeqCst) {
            info!("worker {worker}: stopping, another worker failed");
            return Ok(None);
        }
        entries.push(DatasetEntry {
            fen: fen.clone(),
            depths: build_perft_table(&mut oracle, fen, max_depth)?,
        });
    }
    oracle.close()?;
    info!("worker {worker}: labelled {} positions", entries.len());
    Ok(Some(entries))
}

/// 複数セッションで並列に生成する。
///
/// 局面は先に単一の乱数列から順番にサンプリングするので、結果は `jobs` に
/// 依存しない。各ワーカーは `open(worker_index)` で自分専用のオラクルを開き、
/// 連続した区間を担当する。全ワーカーの完了後に元の順序で結合する。
/// 1つでも失敗すれば他のワーカーは次の局面に進まずに止まり、全体が失敗する。
pub fn assemble_dataset_parallel<O, R, F>(
    open: F,
    sampler: &mut PositionSampler<R>,
    params: &DatasetParams,
    jobs: usize,
) -> OracleResult<Dataset>
where
    O: PerftOracle,
    R: Rng,
    F: Fn(usize) -> OracleResult<O> + Sync,
{
    params.validate()?;
    if jobs == 0 {
        return Err(OracleError::InvalidArgument("jobs must be >= 1".to_string()));
    }
    let fens = (0..params.count)
        .map(|_| sampler.sample(params.max_plies).map(|p| p.fen()))
        .collect::<OracleResult<Vec<_>>>()?;
    if fens.is_empty() {
        return Ok(Dataset::new());
    }
    let chunk = fens.len().div_ceil(jobs);
    let max_depth = params.max_depth;
    let open = &open;
    let stop = AtomicBool::new(false);
    let stop = &stop;

    let results: Vec<OracleResult<Option<Vec<DatasetEntry>>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = fens
            .chunks(chunk)
            .enumerate()
            .map(|(worker, batch)| {
                scope.spawn(move || {
                    let result = open(worker)
                        .and_then(|oracle| label_batch(oracle, worker, batch, max_depth, stop));
                    if result.is_err() {
                        stop.store(true, Ordering::SeqCst);
                    }
                    result
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });

    // 途中で止まったワーカーは Ok(None) なので、最初の Err が実際の失敗になる
    let mut batches = Vec::with_capacity(results.len());
    for result in results {
        batches.push(result?);
    }
    let mut dataset = Dataset::new();
    for entry in batches.into_iter().flatten().flatten() {
        dataset.push(entry);
    }
    Ok(dataset)
}

/// 実行全体の設定
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub params: DatasetParams,
    pub jobs: usize,
    pub seed: u64,
    /// `None` なら書き出さない
    pub output: Option<PathBuf>,
}

/// エンジンを開き、データセットを生成し、成功時のみ書き出す。
pub fn run(cfg: &RunConfig) -> OracleResult<Dataset> {
    cfg.params.validate()?;
    let mut sampler = PositionSampler::new(ChaCha8Rng::seed_from_u64(cfg.seed));
    let started = Instant::now();

    let dataset = if cfg.jobs <= 1 {
        let mut session = EngineSession::open(&cfg.engine)?;
        let dataset = assemble_dataset(&mut session, &mut sampler, &cfg.params)?;
        session.close()?;
        dataset
    } else {
        let open = |worker: usize| {
            let mut engine = cfg.engine.clone();
            engine.label = format!("{}#{worker}", cfg.engine.label);
            EngineSession::open(&engine)
        };
        assemble_dataset_parallel(open, &mut sampler, &cfg.params, cfg.jobs)?
    };

    if let Some(path) = &cfg.output {
        write_dataset_atomic(path, &dataset)?;
        info!(
            "wrote {} positions (depth 1..={}) to {} in {:.1}s",
            dataset.len(),
            cfg.params.max_depth,
            path.display(),
            started.elapsed().as_secs_f64()
        );
    }
    Ok(dataset)
}
