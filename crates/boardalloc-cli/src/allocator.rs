//! The shell-facing allocator: wraps an [`AllocatorUnit`] with the
//! label-to-index view of the topology file, the ID generator, and the
//! optimization entry points.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use boardalloc_core::alns::{alns, two_opt, SearchOpts};
use boardalloc_core::ga::{ncga, nsga2, spea2, GaOpts, SortMethod};
use boardalloc_core::{
    AllocatorUnit, AppId, AppSpec, CommSpec, Evaluator, Fabric, Fitness, IdGen, Link, NodeId,
};
use rustc_hash::FxHashMap;

use crate::files::{self, ParseError};

/// The five optimization drivers reachable from the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Alns,
    TwoOpt,
    Nsga2,
    Ncga,
    Spea2,
}

#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid topology")]
    Topology(#[from] boardalloc_core::TopologyError),

    #[error(transparent)]
    Unit(#[from] boardalloc_core::Error),

    #[error("time budget must be greater than zero")]
    EmptyBudget,

    #[error("failed to build worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// One allocator session: the unit, the densified board labels, and the ID
/// generator feeding `add_app`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BoardAllocator {
    unit: AllocatorUnit,
    ids: IdGen,
    /// Board label from the topology file, indexed by dense node ID.
    index2label: Vec<u64>,
    label2index: FxHashMap<u64, usize>,
}

impl BoardAllocator {
    /// Reads a topology file and builds the fabric. Board labels are mapped
    /// onto dense IDs in first-appearance order.
    pub fn new(topo_file: &Path, multi_ejection: bool) -> Result<Self, AllocatorError> {
        let rows = files::parse_topology_file(topo_file)?;
        let mut index2label = Vec::new();
        let mut label2index = FxHashMap::default();
        let mut densify = |label: u64, index2label: &mut Vec<u64>| -> usize {
            *label2index.entry(label).or_insert_with(|| {
                index2label.push(label);
                index2label.len() - 1
            })
        };
        let links = rows
            .iter()
            .map(|row| {
                let a = densify(row.a, &mut index2label);
                let b = densify(row.b, &mut index2label);
                Link::new(NodeId::new(a), row.a_port, NodeId::new(b), row.b_port)
            })
            .collect::<Vec<_>>();
        let fabric = Fabric::new(&links, multi_ejection)?;
        Ok(Self {
            unit: AllocatorUnit::new(Arc::new(fabric)),
            ids: IdGen::new(),
            index2label,
            label2index,
        })
    }

    pub fn unit(&self) -> &AllocatorUnit {
        &self.unit
    }

    pub fn board_label(&self, id: NodeId) -> u64 {
        self.index2label[id.inner()]
    }

    /// Loads a communication file as a new application. Returns `false` when
    /// the application does not fit.
    pub fn load_app(&mut self, comm_file: &Path) -> Result<bool, AllocatorError> {
        let rows = files::parse_comm_file(comm_file)?;
        let spec = AppSpec::builder()
            .comms(
                rows.iter()
                    .map(|r| CommSpec::new(r.src, r.dst, r.flow))
                    .collect(),
            )
            .description(comm_file.display().to_string())
            .build();
        let bundle = spec.build(&mut self.ids);
        Ok(self.unit.add_app(bundle))
    }

    pub fn remove_app(&mut self, id: AppId) -> Result<(), AllocatorError> {
        self.unit.remove_app(id)?;
        Ok(())
    }

    pub fn app_ids(&self) -> Vec<AppId> {
        self.unit.apps().map(|a| a.id).collect()
    }

    /// Runs one driver inside a worker pool of `nr_workers` threads, adopts
    /// the best result, and freezes it with `apply`.
    pub fn optimize(
        &mut self,
        driver: Driver,
        budget: Duration,
        seed: u64,
        nr_workers: usize,
    ) -> Result<Fitness, AllocatorError> {
        if budget.is_zero() {
            return Err(AllocatorError::EmptyBudget);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(nr_workers)
            .build()?;
        let unit = &self.unit;
        let best = pool.install(|| match driver {
            Driver::Alns => {
                let opts = SearchOpts::builder().budget(budget).seed(seed).build();
                alns(unit, &opts)
            }
            Driver::TwoOpt => {
                let opts = SearchOpts::builder().budget(budget).seed(seed).build();
                two_opt(unit, &opts)
            }
            Driver::Nsga2 => {
                let opts = GaOpts::builder().budget(budget).seed(seed).build();
                best_of_front(nsga2(unit, &opts).items()).unwrap_or_else(|| unit.clone())
            }
            Driver::Ncga => {
                let opts = GaOpts::builder().budget(budget).seed(seed).build();
                best_of_front(ncga(unit, &opts, SortMethod::Cyclic).items())
                    .unwrap_or_else(|| unit.clone())
            }
            Driver::Spea2 => {
                let opts = GaOpts::builder()
                    .budget(budget)
                    .seed(seed)
                    .mutation_pb(0.3)
                    .build();
                best_of_front(spea2(unit, &opts).items()).unwrap_or_else(|| unit.clone())
            }
        });
        self.unit = best;
        self.apply();
        Ok(Evaluator::evaluate(&self.unit))
    }

    /// Freezes every fully-allocated item.
    pub fn apply(&mut self) {
        self.unit.apply();
    }
}

/// The lexicographically best member of a Pareto front under the fixed
/// objective order.
fn best_of_front(items: &[boardalloc_core::ga::Individual]) -> Option<AllocatorUnit> {
    items
        .iter()
        .min_by_key(|ind| ind.fitness.values())
        .map(|ind| ind.unit.clone())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn ring_topo_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0 0 1 1\n1 0 2 1\n2 0 3 1\n3 0 0 1\n")
            .unwrap();
        file
    }

    fn pair_comm_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"7 9 0\n").unwrap();
        file
    }

    #[test]
    fn init_densifies_board_labels() {
        let topo = ring_topo_file();
        let ba = BoardAllocator::new(topo.path(), false).unwrap();
        assert_eq!(ba.unit().fabric().nr_cores(), 4);
        assert_eq!(ba.board_label(NodeId::new(0)), 0);
    }

    #[test]
    fn load_app_and_optimize_round_trip() {
        let topo = ring_topo_file();
        let comm = pair_comm_file();
        let mut ba = BoardAllocator::new(topo.path(), false).unwrap();
        assert!(ba.load_app(comm.path()).unwrap());
        let fitness = ba
            .optimize(Driver::Alns, Duration::from_millis(200), 0, 2)
            .unwrap();
        assert_eq!(fitness.values()[0], 1);
        assert_eq!(ba.unit().nr_allocating_vnodes(), 0);
    }

    #[test]
    fn zero_budget_is_rejected_before_any_mutation() {
        let topo = ring_topo_file();
        let comm = pair_comm_file();
        let mut ba = BoardAllocator::new(topo.path(), false).unwrap();
        assert!(ba.load_app(comm.path()).unwrap());
        let before = ba.unit().clone();
        assert!(matches!(
            ba.optimize(Driver::Alns, Duration::ZERO, 0, 1),
            Err(AllocatorError::EmptyBudget)
        ));
        assert_eq!(*ba.unit(), before);
    }

    #[test]
    fn save_and_load_preserve_the_allocator() {
        let topo = ring_topo_file();
        let comm = pair_comm_file();
        let mut ba = BoardAllocator::new(topo.path(), false).unwrap();
        assert!(ba.load_app(comm.path()).unwrap());
        let bytes = rmp_serde::to_vec(&ba).unwrap();
        let restored: BoardAllocator = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(*restored.unit(), *ba.unit());
        assert_eq!(restored.index2label, ba.index2label);
    }
}
