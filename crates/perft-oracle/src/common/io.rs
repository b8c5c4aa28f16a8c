//! データセットのファイルI/O（gzip対応）
//!
//! 書き込みは同じディレクトリの一時ファイルに出力してから rename する。
//! 途中で失敗しても既存の出力ファイルは壊れない。

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::OracleResult;
use crate::types::Dataset;

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

fn is_stdio(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .eq_ignore_ascii_case("gz")
}

pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    if is_stdio(p) {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

pub fn read_dataset<P: AsRef<Path>>(path: P) -> OracleResult<Dataset> {
    let reader = open_reader(path)?;
    Ok(serde_json::from_reader(reader)?)
}

fn write_json<W: Write>(mut w: W, dataset: &Dataset) -> OracleResult<W> {
    serde_json::to_writer_pretty(&mut w, dataset)?;
    w.write_all(b"\n")?;
    Ok(w)
}

/// データセット全体を一度に書き出す。`-` は標準出力。
pub fn write_dataset_atomic<P: AsRef<Path>>(path: P, dataset: &Dataset) -> OracleResult<()> {
    let p = path.as_ref();
    if is_stdio(p) {
        let stdout = io::stdout();
        let mut lock = write_json(stdout.lock(), dataset)?;
        lock.flush()?;
        return Ok(());
    }

    let dir = match p.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;
    let file = tmp.as_file().try_clone()?;
    if is_gzip(p) {
        let enc =
            flate2::write::GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
        let enc = write_json(enc, dataset)?;
        let mut inner = enc.finish()?;
        inner.flush()?;
    } else {
        let mut w = write_json(BufWriter::new(file), dataset)?;
        w.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(p).map_err(|e| e.error)?;
    Ok(())
}
