use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `MoveNodeCount` を組み立てられなかった理由
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoveCountError {
    #[error("duplicate move '{0}'")]
    Duplicate(String),

    #[error("node count overflow")]
    Overflow,
}

/// 1手ごとのノード数内訳。
///
/// キーはエンジンが返した UCI 形式の指し手で、順序はエンジンの出力順を保持する。
/// 深さ 0（ルート局面のみ）の場合は内訳なし・合計 1 ノードを表す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveNodeCount {
    moves: Vec<(String, u64)>,
    nodes: u64,
}

impl MoveNodeCount {
    /// 深さ 0 の退化ケース。
    pub fn root() -> Self {
        Self {
            moves: Vec::new(),
            nodes: 1,
        }
    }

    /// 指し手ごとのノード数から構築する。
    ///
    /// キーの重複と合計の u64 オーバーフローはエラー。
    pub fn from_moves<I>(moves: I) -> Result<Self, MoveCountError>
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let mut table = Self {
            moves: Vec::new(),
            nodes: 0,
        };
        let mut seen = HashSet::new();
        for (mv, count) in moves {
            if !seen.insert(mv.clone()) {
                return Err(MoveCountError::Duplicate(mv));
            }
            table.nodes = table.nodes.checked_add(count).ok_or(MoveCountError::Overflow)?;
            table.moves.push((mv, count));
        }
        Ok(table)
    }

    /// 合法手から作った重複のない内訳用。
    pub(crate) fn from_unique_moves(moves: Vec<(String, u64)>) -> Self {
        // 参照 perft の値は u64 に収まる
        let nodes = moves.iter().fold(0u64, |acc, (_, n)| acc.saturating_add(*n));
        Self { moves, nodes }
    }

    /// 合計ノード数
    pub fn total(&self) -> u64 {
        self.nodes
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn get(&self, mv: &str) -> Option<u64> {
        self.moves.iter().find(|(m, _)| m == mv).map(|(_, n)| *n)
    }

    pub fn contains(&self, mv: &str) -> bool {
        self.get(mv).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.moves.iter().map(|(m, n)| (m.as_str(), *n))
    }
}

impl Serialize for MoveNodeCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.moves.len()))?;
        for (mv, count) in &self.moves {
            map.serialize_entry(mv, count)?;
        }
        map.end()
    }
}

struct MoveNodeCountVisitor;

impl<'de> Visitor<'de> for MoveNodeCountVisitor {
    type Value = MoveNodeCount;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map from move to node count")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((mv, count)) = access.next_entry::<String, u64>()? {
            entries.push((mv, count));
        }
        MoveNodeCount::from_moves(entries).map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for MoveNodeCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(MoveNodeCountVisitor)
    }
}

/// 深さ → 内訳。深さは昇順に並ぶ。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerftTable {
    depths: BTreeMap<u32, MoveNodeCount>,
}

impl PerftTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, depth: u32, counts: MoveNodeCount) {
        self.depths.insert(depth, counts);
    }

    pub fn get(&self, depth: u32) -> Option<&MoveNodeCount> {
        self.depths.get(&depth)
    }

    pub fn max_depth(&self) -> Option<u32> {
        self.depths.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.depths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &MoveNodeCount)> + '_ {
        self.depths.iter().map(|(d, c)| (*d, c))
    }

    /// 深さ 1..=max_depth が欠けなく揃っているか
    pub fn is_contiguous(&self) -> bool {
        self.depths.keys().copied().eq(1..=self.depths.len() as u32)
    }
}

/// 局面（FEN）と perft 表の組
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub fen: String,
    pub depths: PerftTable,
}

/// 出力データセット。JSON ではトップレベル配列になる。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    entries: Vec<DatasetEntry>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: DatasetEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DatasetEntry> {
        self.entries.iter()
    }
}

impl From<Vec<DatasetEntry>> for Dataset {
    fn from(entries: Vec<DatasetEntry>) -> Self {
        Self { entries }
    }
}

impl IntoIterator for Dataset {
    type Item = DatasetEntry;
    type IntoIter = std::vec::IntoIter<DatasetEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(&str, u64)]) -> MoveNodeCount {
        MoveNodeCount::from_moves(pairs.iter().map(|(m, n)| (m.to_string(), *n))).unwrap()
    }

    #[test]
    fn move_node_count_keeps_engine_order_and_sums_total() {
        let c = counts(&[("h2h3", 20), ("a2a3", 20), ("e2e4", 31)]);
        assert_eq!(c.total(), 71);
        let keys: Vec<&str> = c.iter().map(|(m, _)| m).collect();
        assert_eq!(keys, vec!["h2h3", "a2a3", "e2e4"]);
        assert_eq!(c.get("e2e4"), Some(31));
        assert!(!c.contains("d2d4"));
    }

    #[test]
    fn move_node_count_rejects_duplicate_keys() {
        let err =
            MoveNodeCount::from_moves(vec![("a2a3".to_string(), 1), ("a2a3".to_string(), 1)])
                .unwrap_err();
        assert_eq!(err, MoveCountError::Duplicate("a2a3".to_string()));

        let json = r#"{"a2a3": 1, "a2a3": 2}"#;
        assert!(serde_json::from_str::<MoveNodeCount>(json).is_err());
    }

    #[test]
    fn total_overflow_is_an_error_not_a_panic() {
        let err = MoveNodeCount::from_moves(vec![
            ("a2a3".to_string(), u64::MAX),
            ("b2b3".to_string(), 1),
        ])
        .unwrap_err();
        assert_eq!(err, MoveCountError::Overflow);

        let json = r#"{"a2a3":18446744073709551615,"b2b3":1}"#;
        let err = serde_json::from_str::<MoveNodeCount>(json).unwrap_err();
        assert!(err.to_string().contains("overflow"), "{err}");
    }

    #[test]
    fn root_table_has_one_node_and_no_moves() {
        let root = MoveNodeCount::root();
        assert_eq!(root.total(), 1);
        assert!(root.is_empty());
    }

    #[test]
    fn dataset_json_shape_and_round_trip() {
        let mut depths = PerftTable::new();
        depths.insert(1, counts(&[("e2e4", 1), ("a2a3", 1)]));
        depths.insert(2, counts(&[("e2e4", 20), ("a2a3", 20)]));
        let dataset = Dataset::from(vec![DatasetEntry {
            fen: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".to_string(),
            depths,
        }]);

        let json = serde_json::to_string(&dataset).unwrap();
        assert_eq!(
            json,
            r#"[{"fen":"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1","depths":{"1":{"e2e4":1,"a2a3":1},"2":{"e2e4":20,"a2a3":20}}}]"#
        );

        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dataset);
        assert!(back.entries()[0].depths.is_contiguous());
        assert_eq!(back.entries()[0].depths.max_depth(), Some(2));
    }

    #[test]
    fn contiguity_detects_gaps() {
        let mut t = PerftTable::new();
        t.insert(1, MoveNodeCount::root());
        t.insert(3, MoveNodeCount::root());
        assert!(!t.is_contiguous());
        assert!(PerftTable::new().is_contiguous());
    }
}
