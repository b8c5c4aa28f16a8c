//! 外部 UCI エンジンとの perft 問い合わせ
//!
//! エンジンの標準出力は専用スレッドで行単位に読み、チャネル経由で受け取る。
//! 読み取りはすべて期限付きで、エンジンが落ちた場合は切断として検出される。

use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use regex::Regex;

use crate::error::{OracleError, OracleResult};
use crate::types::MoveNodeCount;

pub const ENGINE_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const ENGINE_QUIT_TIMEOUT: Duration = Duration::from_millis(300);
pub const ENGINE_QUIT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_PERFT_TIMEOUT: Duration = Duration::from_secs(600);

/// `<move>: <count>` 形式の1行
static MOVE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-h][1-8][a-h][1-8][qrbn]?)\s*:\s*(\d+)$").expect("valid regex")
});

/// 合計ノード数の行（Stockfish は `Nodes searched: N`）
static SUMMARY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[^:]*nodes[^:]*:\s*(\d+)$").expect("valid regex"));

/// `perft(fen, depth)` を提供するもの。テストではスタブに差し替える。
pub trait PerftOracle {
    fn perft(&mut self, fen: &str, depth: u32) -> OracleResult<MoveNodeCount>;

    /// 後始末。既定では何もしない。
    fn close(&mut self) -> OracleResult<()> {
        Ok(())
    }
}

impl<T: PerftOracle + ?Sized> PerftOracle for &mut T {
    fn perft(&mut self, fen: &str, depth: u32) -> OracleResult<MoveNodeCount> {
        (**self).perft(fen, depth)
    }

    fn close(&mut self) -> OracleResult<()> {
        (**self).close()
    }
}

/// エンジンプロセス起動時の設定。
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub path: PathBuf,
    pub args: Vec<String>,
    /// `setoption` で送るオプション (Name=Value 形式)
    pub options: Vec<String>,
    /// 1回の perft 問い合わせに許す待ち時間
    pub perft_timeout: Duration,
    pub label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("stockfish"),
            args: Vec::new(),
            options: Vec::new(),
            perft_timeout: DEFAULT_PERFT_TIMEOUT,
            label: "engine".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Closed,
    Failed,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

type LineResult = io::Result<String>;

/// 1本のエンジンプロセスとの対話を所有する。
///
/// 値が存在する時点でハンドシェイクは完了している（Unopened 状態は型として持たない）。
/// `Drop` で必ずプロセスを終了・回収する。
pub struct EngineSession {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    rx: Receiver<LineResult>,
    state: SessionState,
    perft_timeout: Duration,
    label: String,
}

impl EngineSession {
    pub fn open(cfg: &EngineConfig) -> OracleResult<Self> {
        let mut cmd = Command::new(&cfg.path);
        if !cfg.args.is_empty() {
            cmd.args(&cfg.args);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| OracleError::EngineLaunch {
                path: cfg.path.clone(),
                source,
            })?;
        let missing_pipe = |name: &str| OracleError::EngineLaunch {
            path: cfg.path.clone(),
            source: io::Error::other(format!("no {name} pipe")),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let (tx, rx) = mpsc::channel::<LineResult>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });

        let mut session = Self {
            child,
            stdin: BufWriter::new(stdin),
            rx,
            state: SessionState::Ready,
            perft_timeout: cfg.perft_timeout,
            label: cfg.label.clone(),
        };
        if let Err(e) = session.handshake(cfg) {
            session.fail();
            return Err(e);
        }
        info!("{}: engine ready ({})", session.label, cfg.path.display());
        Ok(session)
    }

    fn handshake(&mut self, cfg: &EngineConfig) -> OracleResult<()> {
        self.write_line("uci")?;
        self.wait_for("uciok", ENGINE_READY_TIMEOUT)?;
        for opt in &cfg.options {
            let (name, value) = parse_option(opt)?;
            self.write_line(&format!("setoption name {name} value {value}"))?;
        }
        self.write_line("isready")?;
        self.wait_for("readyok", ENGINE_READY_TIMEOUT)
    }

    fn wait_for(&mut self, marker: &str, timeout: Duration) -> OracleResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let line = self.recv_line(deadline, timeout)?;
            if line.trim() == marker {
                return Ok(());
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 指定局面の perft 内訳をエンジンに計算させる。
    ///
    /// 失敗するとセッションは Failed になり、プロセスは即座に終了させる。
    pub fn perft(&mut self, fen: &str, depth: u32) -> OracleResult<MoveNodeCount> {
        self.ensure_ready()?;
        if depth == 0 {
            return Ok(MoveNodeCount::root());
        }
        if fen.contains(['\n', '\r']) {
            return Err(OracleError::InvalidArgument(format!(
                "FEN must be a single line: {fen:?}"
            )));
        }
        match self.query_perft(fen, depth) {
            Ok(counts) => Ok(counts),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn query_perft(&mut self, fen: &str, depth: u32) -> OracleResult<MoveNodeCount> {
        self.write_line(&format!("position fen {fen}"))?;
        self.write_line(&format!("go perft {depth}"))?;

        let deadline = Instant::now() + self.perft_timeout;
        let mut parser = PerftParser::new();
        loop {
            let line = self.recv_line(deadline, self.perft_timeout)?;
            match parser.feed(&line) {
                Ok(Some(counts)) => return Ok(counts),
                Ok(None) => {}
                Err(message) => {
                    return Err(OracleError::EngineProtocol {
                        label: self.label.clone(),
                        message: format!("{message} (fen={fen}, depth={depth})"),
                    });
                }
            }
        }
    }

    fn ensure_ready(&self) -> OracleResult<()> {
        if self.state == SessionState::Ready {
            Ok(())
        } else {
            Err(OracleError::EngineSessionClosed {
                label: self.label.clone(),
                state: self.state.label(),
            })
        }
    }

    /// `quit` を送ってプロセスを終了させる。既に Closed / Failed なら何もしない。
    pub fn close(&mut self) -> OracleResult<()> {
        if self.state != SessionState::Ready {
            return Ok(());
        }
        self.state = SessionState::Closed;
        // 既に終了していても quit の送信失敗は無視してよい
        let _ = self.write_line("quit");
        self.reap();
        info!("{}: engine closed", self.label);
        Ok(())
    }

    fn fail(&mut self) {
        self.state = SessionState::Failed;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn reap(&mut self) {
        let deadline = Instant::now() + ENGINE_QUIT_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
        warn!("{}: engine did not exit after quit, killing", self.label);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn recv_line(&mut self, deadline: Instant, timeout: Duration) -> OracleResult<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(Ok(line)) => {
                debug!("{} > {}", self.label, line);
                Ok(line)
            }
            Ok(Err(source)) => Err(OracleError::EngineIo {
                label: self.label.clone(),
                source,
            }),
            Err(RecvTimeoutError::Timeout) => Err(OracleError::EngineTimeout {
                label: self.label.clone(),
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(self.crashed()),
        }
    }

    fn crashed(&mut self) -> OracleError {
        // stdout の EOF 直後はまだ終了コードが取れないことがあるので少し待つ
        OracleError::EngineCrashed {
            label: self.label.clone(),
            status: self.exit_status_within(ENGINE_QUIT_TIMEOUT),
        }
    }

    fn exit_status_within(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(ENGINE_QUIT_POLL_INTERVAL);
        }
    }

    fn write_line(&mut self, msg: &str) -> OracleResult<()> {
        debug!("{} < {}", self.label, msg);
        let result = self
            .stdin
            .write_all(msg.as_bytes())
            .and_then(|_| self.stdin.write_all(b"\n"))
            .and_then(|_| self.stdin.flush());
        match result {
            Ok(()) => Ok(()),
            Err(source) => match self.exit_status_within(ENGINE_QUIT_TIMEOUT) {
                Some(status) => Err(OracleError::EngineCrashed {
                    label: self.label.clone(),
                    status: Some(status),
                }),
                None => Err(OracleError::EngineIo {
                    label: self.label.clone(),
                    source,
                }),
            },
        }
    }
}

impl PerftOracle for EngineSession {
    fn perft(&mut self, fen: &str, depth: u32) -> OracleResult<MoveNodeCount> {
        EngineSession::perft(self, fen, depth)
    }

    fn close(&mut self) -> OracleResult<()> {
        EngineSession::close(self)
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        match self.state {
            SessionState::Ready => {
                let _ = self.close();
            }
            SessionState::Closed | SessionState::Failed => {
                if let Ok(None) = self.child.try_wait() {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                }
            }
        }
    }
}

/// `Name=Value` を分解する。
pub fn parse_option(opt: &str) -> OracleResult<(&str, &str)> {
    match opt.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => Err(OracleError::InvalidArgument(format!(
            "engine option must be NAME=VALUE, got '{opt}'"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Moves,
    /// 空行の後、サマリ行を何行読んだか
    Summary(u8),
}

/// `go perft` 応答の行パーサ。
///
/// 指し手行 → 空行 → サマリ2行 の順に受け取り、最後の行で完成した表を返す。
pub struct PerftParser {
    moves: Vec<(String, u64)>,
    seen: HashSet<String>,
    phase: Phase,
}

impl Default for PerftParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PerftParser {
    pub fn new() -> Self {
        Self {
            moves: Vec::new(),
            seen: HashSet::new(),
            phase: Phase::Moves,
        }
    }

    /// 1行を処理する。応答が完結したら `Ok(Some(_))`、違反は `Err(理由)`。
    pub fn feed(&mut self, raw: &str) -> Result<Option<MoveNodeCount>, String> {
        let line = raw.trim();
        match self.phase {
            Phase::Moves => {
                if line.is_empty() {
                    self.phase = Phase::Summary(0);
                    return Ok(None);
                }
                if is_diagnostic(line) {
                    debug!("ignoring engine diagnostic: {line}");
                    return Ok(None);
                }
                let caps = MOVE_LINE
                    .captures(line)
                    .ok_or_else(|| format!("unexpected line in perft output: '{line}'"))?;
                let mv = caps[1].to_string();
                let count = caps[2]
                    .parse::<u64>()
                    .map_err(|e| format!("bad node count in '{line}': {e}"))?;
                if !self.seen.insert(mv.clone()) {
                    return Err(format!("duplicate move '{mv}' in perft output"));
                }
                self.moves.push((mv, count));
                Ok(None)
            }
            Phase::Summary(0) => {
                let caps = SUMMARY_LINE
                    .captures(line)
                    .ok_or_else(|| format!("expected node total after blank line, got '{line}'"))?;
                let total = caps[1]
                    .parse::<u64>()
                    .map_err(|e| format!("bad node total in '{line}': {e}"))?;
                let sum = self
                    .moves
                    .iter()
                    .try_fold(0u64, |acc, (_, n)| acc.checked_add(*n))
                    .ok_or_else(|| "node count overflow in perft output".to_string())?;
                if total != sum {
                    return Err(format!(
                        "engine reported {total} nodes but per-move counts sum to {sum}"
                    ));
                }
                self.phase = Phase::Summary(1);
                Ok(None)
            }
            Phase::Summary(_) => {
                let moves = std::mem::take(&mut self.moves);
                self.seen.clear();
                self.phase = Phase::Moves;
                MoveNodeCount::from_moves(moves)
                    .map(Some)
                    .map_err(|e| format!("{e} in perft output"))
            }
        }
    }
}

fn is_diagnostic(line: &str) -> bool {
    line == "info" || line.starts_with("info ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(lines: &[&str]) -> Result<Option<MoveNodeCount>, String> {
        let mut parser = PerftParser::new();
        let mut result = None;
        for line in lines {
            result = parser.feed(line)?;
        }
        Ok(result)
    }

    #[test]
    fn parses_stockfish_style_response() {
        let table = feed_all(&["a2a3: 20", "b2b3: 20", "e7e8q: 3", "", "Nodes searched: 43", ""])
            .unwrap()
            .unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.total(), 43);
        assert_eq!(table.get("e7e8q"), Some(3));
    }

    #[test]
    fn response_is_complete_only_after_second_summary_line() {
        let mut parser = PerftParser::new();
        assert_eq!(parser.feed("a2a3: 1").unwrap(), None);
        assert_eq!(parser.feed("").unwrap(), None);
        assert_eq!(parser.feed("Nodes searched: 1").unwrap(), None);
        let table = parser.feed("time 3ms").unwrap().unwrap();
        assert_eq!(table.total(), 1);

        // 次の問い合わせ用に状態はリセットされる
        assert_eq!(parser.feed("h2h4: 2").unwrap(), None);
    }

    #[test]
    fn info_lines_are_ignored() {
        let table = feed_all(&[
            "info string NNUE evaluation using nn-xxx.nnue",
            "g1f3: 1",
            "",
            "Nodes searched: 1",
            "",
        ])
        .unwrap()
        .unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn mated_position_yields_empty_table() {
        let table = feed_all(&["", "Nodes searched: 0", ""]).unwrap().unwrap();
        assert!(table.is_empty());
        assert_eq!(table.total(), 0);
    }

    #[test]
    fn garbage_line_is_a_protocol_violation() {
        let err = feed_all(&["a2a3: 1", "Unknown command: 'go perft x'"]).unwrap_err();
        assert!(err.contains("unexpected line"), "{err}");
        assert!(feed_all(&["a2a3 1"]).is_err());
        assert!(feed_all(&["a2a3: -1"]).is_err());
    }

    #[test]
    fn duplicate_move_is_a_protocol_violation() {
        let err = feed_all(&["a2a3: 1", "a2a3: 1"]).unwrap_err();
        assert!(err.contains("duplicate"), "{err}");
    }

    #[test]
    fn summary_total_must_match_sum() {
        let err = feed_all(&["a2a3: 1", "b2b3: 1", "", "Nodes searched: 3"]).unwrap_err();
        assert!(err.contains("sum to 2"), "{err}");
        assert!(feed_all(&["a2a3: 1", "", "bogus"]).is_err());
    }

    #[test]
    fn huge_counts_are_a_protocol_violation() {
        let err = feed_all(&["a2a3: 18446744073709551615", "b2b3: 1", "", "Nodes searched: 0"])
            .unwrap_err();
        assert!(err.contains("overflow"), "{err}");
        // u64 に収まらない数字も受け付けない
        assert!(feed_all(&["a2a3: 18446744073709551616"]).is_err());
    }

    #[test]
    fn parse_option_splits_name_and_value() {
        assert_eq!(parse_option("Hash=16").unwrap(), ("Hash", "16"));
        assert_eq!(parse_option(" Threads = 1 ").unwrap(), ("Threads", "1"));
        assert!(parse_option("Hash").is_err());
        assert!(parse_option("=1").is_err());
    }

    #[test]
    fn spawn_failure_is_a_launch_error() {
        let cfg = EngineConfig {
            path: PathBuf::from("/nonexistent/definitely-not-an-engine"),
            ..EngineConfig::default()
        };
        match EngineSession::open(&cfg) {
            Err(OracleError::EngineLaunch { path, .. }) => assert_eq!(path, cfg.path),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }
}
