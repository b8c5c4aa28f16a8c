use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};
use perft_oracle::common::io::read_dataset;
use perft_oracle::verify_entry;

/// perft データセットを参照用の合法手生成器で照合する。
///
/// 不一致が1件でもあれば非ゼロで終了する。
#[derive(Parser, Debug)]
#[command(author, version, about = "Verify a perft dataset against a reference move generator")]
struct Cli {
    /// Dataset JSON (.gz supported, "-" for stdin)
    input: PathBuf,

    /// Only check depths up to N
    #[arg(long)]
    max_depth: Option<u32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let dataset = read_dataset(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;

    let mut checked = 0usize;
    let mut failures = 0usize;
    for (index, entry) in dataset.iter().enumerate() {
        let reports = verify_entry(entry, cli.max_depth)
            .with_context(|| format!("entry #{index} ({})", entry.fen))?;
        for report in reports {
            checked += 1;
            if report.is_ok() {
                continue;
            }
            failures += 1;
            error!(
                "entry #{index} depth {}: {} discrepancies (reproduce: fen=\"{}\" depth={})",
                report.depth,
                report.discrepancies.len(),
                report.fen,
                report.depth
            );
            for d in &report.discrepancies {
                error!("  {d}");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {checked} (position, depth) checks failed");
    }
    info!("{} positions, {checked} (position, depth) checks: all match", dataset.len());
    Ok(())
}
