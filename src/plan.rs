/*!
 * Rebalance plan records and JSON persistence
 */

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BallastError, Result};
use crate::scan::Unit;

/// One planned move of a unit to a destination disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub unit: Unit,
    pub dest_disk: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub total_moves: usize,
    pub total_bytes: u64,
}

/// An ordered sequence of moves plus its summary. Serializes losslessly to
/// and from the portable JSON plan form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plan {
    pub moves: Vec<Move>,
    pub summary: PlanSummary,
}

/// Flat serialized form of one move.
#[derive(Debug, Serialize, Deserialize)]
struct MoveRecord {
    share: String,
    rel_path: String,
    size_bytes: u64,
    src_disk: String,
    dest_disk: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlanRecord {
    moves: Vec<MoveRecord>,
    summary: PlanSummary,
}

impl Plan {
    pub fn new(moves: Vec<Move>) -> Self {
        let summary = PlanSummary {
            total_moves: moves.len(),
            total_bytes: moves.iter().map(|m| m.unit.size_bytes).sum(),
        };
        Self { moves, summary }
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Keys of all planned units as `(src_disk, share/rel_path)`, used for
    /// orphaned-transfer detection.
    pub fn unit_keys(&self) -> HashSet<(String, String)> {
        self.moves
            .iter()
            .map(|m| (m.unit.src_disk.clone(), m.unit.unit_key()))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        let record = PlanRecord {
            moves: self
                .moves
                .iter()
                .map(|m| MoveRecord {
                    share: m.unit.share.clone(),
                    rel_path: m.unit.rel_path.clone(),
                    size_bytes: m.unit.size_bytes,
                    src_disk: m.unit.src_disk.clone(),
                    dest_disk: m.dest_disk.clone(),
                })
                .collect(),
            summary: self.summary,
        };
        serde_json::to_string_pretty(&record).map_err(Into::into)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let record: PlanRecord = serde_json::from_str(s)?;
        let moves = record
            .moves
            .into_iter()
            .map(|m| Move {
                unit: Unit {
                    share: m.share,
                    rel_path: m.rel_path,
                    size_bytes: m.size_bytes,
                    src_disk: m.src_disk,
                },
                dest_disk: m.dest_disk,
            })
            .collect();
        Ok(Self {
            moves,
            summary: record.summary,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .map_err(|e| BallastError::Plan(format!("Failed to write plan: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BallastError::Plan(format!("Failed to read plan: {}", e)))?;
        Self::from_json(&content)
    }
}
