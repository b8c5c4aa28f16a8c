use crate::engine::PerftOracle;
use crate::error::{OracleError, OracleResult};
use crate::types::PerftTable;

/// 深さ 1..=max_depth をそれぞれ独立に問い合わせて perft 表を作る。
///
/// 浅い深さの結果は再利用せず、毎回エンジンに最初から計算させる。
/// 途中で失敗した場合は部分的な表を返さずにエラーをそのまま返す。
pub fn build_perft_table<O>(oracle: &mut O, fen: &str, max_depth: u32) -> OracleResult<PerftTable>
where
    O: PerftOracle + ?Sized,
{
    if max_depth == 0 {
        return Err(OracleError::InvalidArgument("max depth must be >= 1".to_string()));
    }
    let mut table = PerftTable::new();
    for depth in 1..=max_depth {
        let counts = oracle.perft(fen, depth)?;
        table.insert(depth, counts);
    }
    Ok(table)
}
