//! ランダム自己対局による局面サンプリング

use std::collections::HashMap;

use rand::Rng;
use rand::seq::IndexedRandom;
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, EnPassantMode, Position};

use crate::error::{OracleError, OracleResult};

/// 75手ルール（150 plies）
const SEVENTY_FIVE_MOVE_HALFMOVES: u32 = 150;
const FIVEFOLD_REPETITION: u32 = 5;

/// サンプリング結果
#[derive(Debug, Clone)]
pub struct SampledPosition {
    pub position: Chess,
    /// 初期局面から指した UCI 指し手列
    pub moves: Vec<String>,
    /// 目標手数に届く前に終局した
    pub terminated_early: bool,
}

impl SampledPosition {
    pub fn fen(&self) -> String {
        position_fen(&self.position)
    }

    pub fn plies(&self) -> usize {
        self.moves.len()
    }
}

pub fn position_fen(pos: &Chess) -> String {
    Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string()
}

/// 千日手判定用のキー（手数カウンタを除いた FEN 先頭4フィールド）
fn repetition_key(pos: &Chess) -> String {
    let fen = position_fen(pos);
    fen.split(' ').take(4).collect::<Vec<_>>().join(" ")
}

/// 合法手がない、または引き分けが確定している局面か
fn is_terminal(pos: &Chess, repetitions: u32) -> bool {
    pos.is_game_over()
        || pos.halfmoves() >= SEVENTY_FIVE_MOVE_HALFMOVES
        || repetitions >= FIVEFOLD_REPETITION
}

/// 初期局面からランダムに合法手を指して局面を作る。
pub struct PositionSampler<R> {
    rng: R,
}

impl<R: Rng> PositionSampler<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// 1..=max_plies から目標手数を一様に選び、
    /// そこまで（または終局まで）一様ランダムに指す。
    pub fn sample(&mut self, max_plies: u32) -> OracleResult<SampledPosition> {
        if max_plies == 0 {
            return Err(OracleError::InvalidArgument("max plies must be >= 1".to_string()));
        }
        let target = self.rng.random_range(1..=max_plies);

        let mut pos = Chess::default();
        let mut moves = Vec::with_capacity(target as usize);
        let mut seen: HashMap<String, u32> = HashMap::new();
        seen.insert(repetition_key(&pos), 1);
        let mut repetitions = 1;
        let mut terminated_early = false;

        for _ in 0..target {
            if is_terminal(&pos, repetitions) {
                terminated_early = true;
                break;
            }
            // 毎手その時点の局面から合法手を列挙し直す
            let legal = pos.legal_moves();
            let Some(mv) = legal.choose(&mut self.rng) else {
                terminated_early = true;
                break;
            };
            moves.push(mv.to_uci(CastlingMode::Standard).to_string());
            pos.play_unchecked(mv);

            let count = seen.entry(repetition_key(&pos)).or_insert(0);
            *count += 1;
            repetitions = *count;
        }

        Ok(SampledPosition {
            position: pos,
            moves,
            terminated_early,
        })
    }
}
