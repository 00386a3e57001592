/*!
 * Rebalance planner
 *
 * Classifies disks into donors and recipients against a target fill level,
 * then greedily assigns donor units to recipients under capacity and
 * safety-margin constraints. Output is deterministic for a given input.
 */

use std::collections::HashMap;

use tracing::debug;

use crate::disk::Disk;
use crate::plan::{Move, Plan};
use crate::scan::Unit;
use crate::size::GIB;

/// Free-space margin every placement must leave on the recipient.
pub const SAFETY_MARGIN_BYTES: u64 = GIB;

/// How per-disk target usage is computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetMode {
    /// Aim each disk at a fixed fill percentage of its capacity
    FixedPercent(f64),
    /// Even disks toward the average used, leaving headroom percent free
    AutoEven { headroom_percent: f64 },
}

/// Order in which donor units are considered for placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
    /// Largest units first: fewer, larger moves
    #[default]
    BySize,
    /// Units from the fullest disks first, ties broken by size descending
    ByFill,
}

struct Recipient {
    name: String,
    /// Bytes this disk can still take before reaching its target
    capacity: u64,
    /// Free bytes at snapshot time
    free_snapshot: u64,
    /// Bytes already assigned to this disk by the current plan
    assigned: u64,
}

/// Build a rebalance plan from a disk snapshot and scanned units.
pub fn build_plan(
    disks: &[Disk],
    units: &[Unit],
    mode: TargetMode,
    strategy: SelectionStrategy,
) -> Plan {
    if disks.len() < 2 {
        return Plan::default();
    }

    let targets = target_used_per_disk(disks, mode);

    let mut donors: HashMap<String, u64> = HashMap::new();
    let mut recipients: Vec<Recipient> = Vec::new();
    for (disk, target) in disks.iter().zip(&targets) {
        if disk.used_bytes > *target {
            donors.insert(disk.name.clone(), disk.used_bytes - target);
        } else if disk.used_bytes < *target {
            recipients.push(Recipient {
                name: disk.name.clone(),
                capacity: target - disk.used_bytes,
                free_snapshot: disk.free_bytes,
                assigned: 0,
            });
        }
    }

    if donors.is_empty() || recipients.is_empty() {
        return Plan::default();
    }

    let fill_by_disk: HashMap<&str, f64> = disks
        .iter()
        .map(|d| (d.name.as_str(), d.used_percent()))
        .collect();

    let mut donor_units: Vec<&Unit> = units
        .iter()
        .filter(|u| donors.contains_key(&u.src_disk))
        .collect();
    match strategy {
        SelectionStrategy::BySize => {
            donor_units.sort_by(|a, b| {
                b.size_bytes
                    .cmp(&a.size_bytes)
                    .then_with(|| a.unit_key().cmp(&b.unit_key()))
            });
        }
        SelectionStrategy::ByFill => {
            donor_units.sort_by(|a, b| {
                let fill_a = fill_by_disk.get(a.src_disk.as_str()).copied().unwrap_or(0.0);
                let fill_b = fill_by_disk.get(b.src_disk.as_str()).copied().unwrap_or(0.0);
                fill_b
                    .partial_cmp(&fill_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.size_bytes.cmp(&a.size_bytes))
                    .then_with(|| a.unit_key().cmp(&b.unit_key()))
            });
        }
    }

    let mut moves = Vec::new();
    for unit in donor_units {
        // Recipients with the most remaining capacity are tried first;
        // name ordering keeps the result deterministic on ties.
        recipients.sort_by(|a, b| b.capacity.cmp(&a.capacity).then_with(|| a.name.cmp(&b.name)));

        let placed = recipients.iter_mut().find(|r| {
            r.capacity > 0
                && r.name != unit.src_disk
                && unit.size_bytes.saturating_add(SAFETY_MARGIN_BYTES)
                    <= r.free_snapshot.saturating_sub(r.assigned)
        });

        let Some(recipient) = placed else {
            debug!(unit = %unit.unit_key(), size = unit.size_bytes, "no recipient fits; dropping unit from plan");
            continue;
        };

        recipient.capacity = recipient.capacity.saturating_sub(unit.size_bytes);
        recipient.assigned += unit.size_bytes;
        if let Some(deficit) = donors.get_mut(&unit.src_disk) {
            *deficit = deficit.saturating_sub(unit.size_bytes);
        }
        moves.push(Move {
            unit: unit.clone(),
            dest_disk: recipient.name.clone(),
        });
    }

    Plan::new(moves)
}

fn target_used_per_disk(disks: &[Disk], mode: TargetMode) -> Vec<u64> {
    match mode {
        TargetMode::FixedPercent(percent) => disks
            .iter()
            .map(|d| {
                let target = d.size_bytes as f64 * (percent / 100.0);
                (target.min(d.size_bytes as f64)) as u64
            })
            .collect(),
        TargetMode::AutoEven { headroom_percent } => {
            let total_used: u64 = disks.iter().map(|d| d.used_bytes).sum();
            let avg_used = if disks.is_empty() {
                0.0
            } else {
                total_used as f64 / disks.len() as f64
            };
            disks
                .iter()
                .map(|d| {
                    let ceiling = d.size_bytes as f64 * (1.0 - headroom_percent / 100.0);
                    avg_used.min(ceiling) as u64
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const TIB: u64 = 1024 * GIB;

    fn disk(name: &str, size: u64, used: u64) -> Disk {
        Disk::new(name, PathBuf::from(format!("/mnt/{}", name)), size, used)
    }

    fn unit(name: &str, size: u64, src: &str) -> Unit {
        Unit {
            share: "Media".to_string(),
            rel_path: name.to_string(),
            size_bytes: size,
            src_disk: src.to_string(),
        }
    }

    #[test]
    fn test_basic_redistribution() {
        let disks = vec![
            disk("disk1", TIB, 900 * GIB),
            disk("disk2", TIB, 300 * GIB),
        ];
        let units = vec![
            unit("A", 50 * GIB, "disk1"),
            unit("B", 30 * GIB, "disk1"),
            unit("C", 20 * GIB, "disk1"),
        ];

        let plan = build_plan(
            &disks,
            &units,
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::BySize,
        );

        assert_eq!(plan.summary.total_moves, 3);
        assert_eq!(plan.summary.total_bytes, 100 * GIB);
        let order: Vec<&str> = plan.moves.iter().map(|m| m.unit.rel_path.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        assert!(plan.moves.iter().all(|m| m.dest_disk == "disk2"));
    }

    #[test]
    fn test_balanced_disks_produce_empty_plan() {
        let disks = vec![
            disk("disk1", TIB, 400 * GIB),
            disk("disk2", TIB, 400 * GIB),
        ];
        let units = vec![
            unit("A", 50 * GIB, "disk1"),
            unit("B", 30 * GIB, "disk1"),
            unit("C", 20 * GIB, "disk1"),
        ];

        let plan = build_plan(
            &disks,
            &units,
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::BySize,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_capacity_constraint_drops_unit() {
        let disks = vec![
            disk("disk1", TIB, 900 * GIB),
            disk("disk2", TIB, 999 * GIB),
        ];
        let units = vec![unit("X", 50 * GIB, "disk1")];

        let plan = build_plan(
            &disks,
            &units,
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::BySize,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_never_places_on_source_disk() {
        let disks = vec![
            disk("disk1", TIB, 900 * GIB),
            disk("disk2", TIB, 850 * GIB),
            disk("disk3", TIB, 100 * GIB),
        ];
        let units = vec![
            unit("A", 40 * GIB, "disk1"),
            unit("B", 20 * GIB, "disk2"),
        ];

        let plan = build_plan(
            &disks,
            &units,
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::BySize,
        );
        for m in &plan.moves {
            assert_ne!(m.dest_disk, m.unit.src_disk);
        }
    }

    #[test]
    fn test_safety_margin_respected() {
        let disks = vec![
            disk("disk1", TIB, 900 * GIB),
            disk("disk2", TIB, 300 * GIB),
        ];
        let units = vec![unit("A", 100 * GIB, "disk1")];

        let plan = build_plan(
            &disks,
            &units,
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::BySize,
        );
        let mut assigned: HashMap<&str, u64> = HashMap::new();
        for m in &plan.moves {
            let entry = assigned.entry(m.dest_disk.as_str()).or_default();
            *entry += m.unit.size_bytes;
            let dest = disks.iter().find(|d| d.name == m.dest_disk).unwrap();
            assert!(*entry + SAFETY_MARGIN_BYTES <= dest.free_bytes);
        }
    }

    #[test]
    fn test_by_fill_strategy_orders_by_source_fill() {
        let disks = vec![
            disk("disk1", TIB, 950 * GIB), // fuller donor
            disk("disk2", TIB, 850 * GIB),
            disk("disk3", TIB, 100 * GIB),
        ];
        let units = vec![
            unit("big-on-d2", 60 * GIB, "disk2"),
            unit("small-on-d1", 10 * GIB, "disk1"),
            unit("big-on-d1", 40 * GIB, "disk1"),
        ];

        let plan = build_plan(
            &disks,
            &units,
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::ByFill,
        );
        let order: Vec<&str> = plan.moves.iter().map(|m| m.unit.rel_path.as_str()).collect();
        // disk1 units first (higher fill), larger before smaller
        assert_eq!(order, vec!["big-on-d1", "small-on-d1", "big-on-d2"]);
    }

    #[test]
    fn test_auto_even_mode() {
        let disks = vec![
            disk("disk1", TIB, 800 * GIB),
            disk("disk2", TIB, 200 * GIB),
        ];
        // Average used is 500 GiB; disk1 sheds toward it.
        let units = vec![
            unit("A", 200 * GIB, "disk1"),
            unit("B", 100 * GIB, "disk1"),
        ];

        let plan = build_plan(
            &disks,
            &units,
            TargetMode::AutoEven {
                headroom_percent: 5.0,
            },
            SelectionStrategy::BySize,
        );
        assert_eq!(plan.summary.total_moves, 2);
        assert!(plan.moves.iter().all(|m| m.dest_disk == "disk2"));
    }

    #[test]
    fn test_empty_inputs() {
        let plan = build_plan(
            &[],
            &[],
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::BySize,
        );
        assert!(plan.is_empty());

        let single = vec![disk("disk1", TIB, 900 * GIB)];
        let plan = build_plan(
            &single,
            &[unit("A", GIB, "disk1")],
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::BySize,
        );
        assert!(plan.is_empty());
    }

    #[test]
    fn test_deterministic_output() {
        let disks = vec![
            disk("disk1", TIB, 900 * GIB),
            disk("disk2", TIB, 300 * GIB),
            disk("disk3", TIB, 300 * GIB),
        ];
        let units = vec![
            unit("A", 50 * GIB, "disk1"),
            unit("B", 50 * GIB, "disk1"),
            unit("C", 20 * GIB, "disk1"),
        ];

        let first = build_plan(
            &disks,
            &units,
            TargetMode::FixedPercent(80.0),
            SelectionStrategy::BySize,
        );
        for _ in 0..5 {
            let again = build_plan(
                &disks,
                &units,
                TargetMode::FixedPercent(80.0),
                SelectionStrategy::BySize,
            );
            assert_eq!(first, again);
        }
    }
}
