//! The fixed objective vector over an allocator snapshot. All objectives are
//! minimized; the weight row exists for display and for tools that expect
//! DEAP-style signed weights.

use crate::unit::AllocatorUnit;

/// One objective vector: `(max_slot_num, total_flow_edges, routed_board_num)`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Fitness(pub [u64; 3]);

impl Fitness {
    pub fn values(&self) -> [u64; 3] {
        self.0
    }

    pub fn as_f64(&self) -> [f64; 3] {
        [self.0[0] as f64, self.0[1] as f64, self.0[2] as f64]
    }

    /// Pareto dominance under minimization: no objective worse, at least one
    /// strictly better.
    pub fn dominates(&self, other: &Fitness) -> bool {
        let mut strictly = false;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            if a > b {
                return false;
            }
            if a < b {
                strictly = true;
            }
        }
        strictly
    }
}

/// The closed objective set. Not a plugin surface: drivers and reports index
/// into this fixed list.
#[derive(Debug)]
pub struct Evaluator;

impl Evaluator {
    /// Objective names, in vector order.
    pub fn eval_list() -> [&'static str; 3] {
        ["# of slots", "# of flows' edges", "# of routed boards"]
    }

    /// Minimization weights, one per objective.
    pub fn weights() -> [f64; 3] {
        [-1.0, -1.0, -1.0]
    }

    pub fn evaluate(unit: &AllocatorUnit) -> Fitness {
        Fitness([
            unit.max_slot_num() as u64,
            unit.total_flow_edges() as u64,
            unit.routed_board_num() as u64,
        ])
    }
}
