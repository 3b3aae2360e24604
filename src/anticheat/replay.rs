//! Server-authoritative replay validation
//!
//! Rebuilds the puzzle board from the session seed, replays the client's move
//! log and compares the outcome with what the client claimed. Findings are
//! confidence-scored anomalies; punitive action is left to the caller.

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SimConfig;
use crate::game::constants::replay as defaults;
use crate::metrics::Metrics;
use crate::puzzle::{Board, BoardError};

/// One recorded swap of two grid cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMove {
    pub tick: u64,
    /// (x, y)
    pub from: (u8, u8),
    pub to: (u8, u8),
}

impl ReplayMove {
    pub fn new(tick: u64, from: (u8, u8), to: (u8, u8)) -> Self {
        Self { tick, from, to }
    }

    fn is_adjacent(&self) -> bool {
        let dx = (self.from.0 as i32 - self.to.0 as i32).abs();
        let dy = (self.from.1 as i32 - self.to.1 as i32).abs();
        dx + dy == 1
    }
}

/// A finished session as reported by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySubmission {
    pub session_id: Uuid,
    pub seed: u64,
    pub width: u8,
    pub height: u8,
    /// Moves in the order the client sent them
    pub moves: Vec<ReplayMove>,
    pub claimed_score: u32,
    pub claimed_checksum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    /// Move references a cell outside the board
    OutOfBounds,
    /// Move swaps cells that are not orthogonal neighbours
    NonAdjacent,
    /// Tick went backwards relative to an earlier move (speed hack)
    TickRegression,
    /// Claimed score exceeds the server score beyond tolerance
    ScoreMismatch,
    ChecksumMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    /// Index into the submitted move list, if the anomaly is about one move
    pub move_index: Option<usize>,
    pub tick: Option<u64>,
    /// 0.0..=1.0
    pub confidence: f32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub server_score: u32,
    pub server_checksum: u32,
    /// Moves that passed the bounds/adjacency checks and were replayed
    pub moves_applied: usize,
    pub anomalies: Vec<Anomaly>,
}

impl ValidationResult {
    pub fn has(&self, kind: AnomalyKind) -> bool {
        self.anomalies.iter().any(|a| a.kind == kind)
    }

    /// JSON form handed to the moderation layer
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("cannot build board: {0}")]
    Board(#[from] BoardError),
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Accepted excess of claimed over server score, as a fraction
    pub score_tolerance: f32,
    /// Settle ticks allowed after each move
    pub max_settle_ticks: u32,
    /// Anomalies at or above this confidence fail validation
    pub high_confidence: f32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            score_tolerance: defaults::SCORE_TOLERANCE,
            max_settle_ticks: defaults::MAX_SETTLE_TICKS,
            high_confidence: defaults::HIGH_CONFIDENCE,
        }
    }
}

impl From<&SimConfig> for ReplayConfig {
    fn from(config: &SimConfig) -> Self {
        Self {
            score_tolerance: config.score_tolerance,
            ..Self::default()
        }
    }
}

const CONFIDENCE_TICK_REGRESSION: f32 = 0.6;
const CONFIDENCE_INVALID_MOVE: f32 = 0.5;
const CONFIDENCE_SCORE: f32 = 0.95;
const CONFIDENCE_CHECKSUM: f32 = 0.99;

#[derive(Default)]
pub struct ReplayValidator {
    config: ReplayConfig,
    metrics: Option<Arc<Metrics>>,
}

impl ReplayValidator {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replay one submission. Fails only if the board cannot be built.
    pub fn validate(&self, submission: &ReplaySubmission) -> Result<ValidationResult, ReplayError> {
        let width = submission.width as usize;
        let height = submission.height as usize;
        let mut board = Board::new(width, height, submission.seed)?;
        let mut anomalies = Vec::new();

        // Regressions are judged in arrival order, before sorting hides them
        let mut latest_tick = 0u64;
        for (i, mv) in submission.moves.iter().enumerate() {
            if i > 0 && mv.tick < latest_tick {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::TickRegression,
                    move_index: Some(i),
                    tick: Some(mv.tick),
                    confidence: CONFIDENCE_TICK_REGRESSION,
                    detail: format!("tick {} after tick {}", mv.tick, latest_tick),
                });
            }
            latest_tick = latest_tick.max(mv.tick);
        }

        let mut order: Vec<usize> = (0..submission.moves.len()).collect();
        order.sort_by_key(|&i| submission.moves[i].tick);

        let mut moves_applied = 0;
        for i in order {
            let mv = submission.moves[i];
            let (from, to) = match (
                board.index_of(mv.from.0 as usize, mv.from.1 as usize),
                board.index_of(mv.to.0 as usize, mv.to.1 as usize),
            ) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    anomalies.push(Self::invalid_move(AnomalyKind::OutOfBounds, i, mv));
                    continue;
                }
            };
            if !mv.is_adjacent() {
                anomalies.push(Self::invalid_move(AnomalyKind::NonAdjacent, i, mv));
                continue;
            }

            moves_applied += 1;
            if board.try_swap(from, to) {
                board.run_until_stable(self.config.max_settle_ticks);
                board.clear_events();
            }
        }

        let server_score = board.score();
        let server_checksum = board.checksum();

        let allowed = server_score as f64 * (1.0 + self.config.score_tolerance as f64);
        if submission.claimed_score as f64 > allowed {
            anomalies.push(Anomaly {
                kind: AnomalyKind::ScoreMismatch,
                move_index: None,
                tick: None,
                confidence: CONFIDENCE_SCORE,
                detail: format!(
                    "claimed {} vs server {}",
                    submission.claimed_score, server_score
                ),
            });
        }
        if submission.claimed_checksum != server_checksum {
            anomalies.push(Anomaly {
                kind: AnomalyKind::ChecksumMismatch,
                move_index: None,
                tick: None,
                confidence: CONFIDENCE_CHECKSUM,
                detail: format!(
                    "claimed {:#010x} vs server {:#010x}",
                    submission.claimed_checksum, server_checksum
                ),
            });
        }

        let valid = !anomalies
            .iter()
            .any(|a| a.confidence >= self.config.high_confidence);

        if let Some(m) = &self.metrics {
            m.inc_replays_validated();
            if !valid {
                m.inc_replays_flagged();
            }
        }

        if valid {
            debug!(
                session = %submission.session_id,
                score = server_score,
                moves = moves_applied,
                "Replay accepted"
            );
        } else {
            info!(
                session = %submission.session_id,
                claimed_score = submission.claimed_score,
                server_score,
                anomalies = anomalies.len(),
                "Replay flagged"
            );
        }

        Ok(ValidationResult {
            valid,
            server_score,
            server_checksum,
            moves_applied,
            anomalies,
        })
    }

    /// Validate independent submissions in parallel; results keep input order
    pub fn validate_batch(
        &self,
        submissions: &[ReplaySubmission],
    ) -> Vec<Result<ValidationResult, ReplayError>> {
        submissions.par_iter().map(|s| self.validate(s)).collect()
    }

    fn invalid_move(kind: AnomalyKind, index: usize, mv: ReplayMove) -> Anomaly {
        Anomaly {
            kind,
            move_index: Some(index),
            tick: Some(mv.tick),
            confidence: CONFIDENCE_INVALID_MOVE,
            detail: format!("{:?} -> {:?}", mv.from, mv.to),
        }
    }
}
