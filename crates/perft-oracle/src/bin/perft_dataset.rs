use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;
use perft_oracle::common::io::write_dataset_atomic;
use perft_oracle::config::HarnessConfig;
use perft_oracle::engine::DEFAULT_PERFT_TIMEOUT;
use perft_oracle::{
    Dataset, DatasetEntry, DatasetParams, EngineConfig, EngineSession, RunConfig,
    build_perft_table, run,
};

/// ランダム局面の perft オラクルデータを外部 UCI エンジンで生成する。
///
/// # よく使うコマンド例
///
/// - Stockfish で10局面・深さ6まで（既定値）:
///   `cargo run --release -p perft-oracle --bin perft_dataset`
///
/// - シード固定・4プロセス並列で100局面:
///   `cargo run --release -p perft-oracle --bin perft_dataset -- --count 100 --jobs 4 --seed 1 --out data/perft.json.gz`
///
/// - 特定局面だけ問い合わせる:
///   `cargo run --release -p perft-oracle --bin perft_dataset -- --fen "<FEN>" --max-depth 4 --out -`
#[derive(Parser, Debug)]
#[command(author, version, about = "Generate a perft oracle dataset from an external UCI engine")]
struct Cli {
    /// TOML config file ([engine] / [dataset] sections); flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of positions to sample
    #[arg(long)]
    count: Option<usize>,

    /// Maximum random plies from the start position
    #[arg(long)]
    max_plies: Option<u32>,

    /// Perft depths 1..=N are queried for each position
    #[arg(long)]
    max_depth: Option<u32>,

    /// RNG seed (random if omitted; the chosen seed is logged)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of engine processes to run in parallel
    #[arg(long)]
    jobs: Option<usize>,

    /// Output JSON path (.gz for gzip, "-" for stdout)
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Engine binary (looked up on PATH)
    #[arg(long, value_name = "FILE")]
    engine: Option<PathBuf>,

    /// Extra argument passed to the engine process (repeatable)
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Engine option sent as setoption (NAME=VALUE, repeatable)
    #[arg(long = "engine-option", value_name = "NAME=VALUE")]
    engine_options: Vec<String>,

    /// Per-query timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Query this position only instead of sampling
    #[arg(long)]
    fen: Option<String>,
}

struct Resolved {
    run: RunConfig,
    output: PathBuf,
}

fn resolve(cli: &Cli) -> Result<Resolved> {
    let file = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    let defaults = DatasetParams::default();
    let params = DatasetParams {
        count: cli.count.or(file.dataset.count).unwrap_or(defaults.count),
        max_plies: cli.max_plies.or(file.dataset.max_plies).unwrap_or(defaults.max_plies),
        max_depth: cli.max_depth.or(file.dataset.max_depth).unwrap_or(defaults.max_depth),
    };
    if params.max_plies == 0 {
        bail!("--max-plies must be >= 1");
    }
    if params.max_depth == 0 {
        bail!("--max-depth must be >= 1");
    }
    let jobs = cli.jobs.or(file.dataset.jobs).unwrap_or(1);
    if jobs == 0 {
        bail!("--jobs must be >= 1");
    }

    let engine_defaults = EngineConfig::default();
    let mut options = file.engine.options.clone().unwrap_or_default();
    options.extend(cli.engine_options.iter().cloned());
    let engine = EngineConfig {
        path: cli.engine.clone().or(file.engine.path.clone()).unwrap_or(engine_defaults.path),
        args: if cli.engine_args.is_empty() {
            file.engine.args.clone().unwrap_or_default()
        } else {
            cli.engine_args.clone()
        },
        options,
        perft_timeout: cli
            .timeout_ms
            .or(file.engine.timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PERFT_TIMEOUT),
        label: engine_defaults.label,
    };

    let seed = cli.seed.or(file.dataset.seed).unwrap_or_else(rand::random);
    let output = cli
        .out
        .clone()
        .or(file.dataset.out.clone())
        .unwrap_or_else(|| PathBuf::from(format!("perft_dataset_depth_{}.json", params.max_depth)));

    Ok(Resolved {
        run: RunConfig {
            engine,
            params,
            jobs,
            seed,
            output: Some(output.clone()),
        },
        output,
    })
}

fn label_single(cfg: &RunConfig, fen: &str, output: &Path) -> Result<()> {
    let mut session = EngineSession::open(&cfg.engine)?;
    let depths = build_perft_table(&mut session, fen, cfg.params.max_depth)
        .with_context(|| format!("perft failed for {fen}"))?;
    session.close()?;
    for (depth, counts) in depths.iter() {
        info!("depth {depth}: {} moves, {} nodes", counts.len(), counts.total());
    }
    let dataset = Dataset::from(vec![DatasetEntry {
        fen: fen.to_string(),
        depths,
    }]);
    write_dataset_atomic(output, &dataset)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let Resolved { run: cfg, output } = resolve(&cli)?;

    if let Some(fen) = &cli.fen {
        return label_single(&cfg, fen, &output);
    }

    info!(
        "sampling {} positions (max plies {}, depth 1..={}) with seed {} using {} ({} job(s))",
        cfg.params.count,
        cfg.params.max_plies,
        cfg.params.max_depth,
        cfg.seed,
        cfg.engine.path.display(),
        cfg.jobs
    );
    let dataset = run(&cfg).with_context(|| {
        format!("dataset generation failed; {} was not written", output.display())
    })?;
    info!("done: {} positions", dataset.len());
    Ok(())
}
