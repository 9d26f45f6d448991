//! This module defines the physical side of the allocator: the cluster
//! [topology](Topology) and its immutable [shortest-path table](PathTable),
//! bundled as a [`Fabric`].

pub mod routing;
pub mod topology;
pub mod types;

pub use routing::{Path, PathTable};
pub use topology::{Topology, TopologyError};
pub use types::{Channel, Link, Node, NodeId, NodeKind};

/// The physical cluster: topology plus its all-shortest-paths table. Both are
/// read-only after construction and shared by reference across workers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Fabric {
    topology: Topology,
    paths: PathTable,
}

impl Fabric {
    /// Builds the topology and enumerates the path table in one step.
    pub fn new(links: &[Link], multi_ejection: bool) -> Result<Self, TopologyError> {
        let topology = Topology::new(links, multi_ejection)?;
        let paths = PathTable::new(&topology);
        Ok(Self { topology, paths })
    }

    /// The cluster topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The all-shortest-paths table.
    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    delegate::delegate! {
        to self.topology {
            /// The number of cores (boards) in the cluster.
            pub fn nr_cores(&self) -> usize;

            /// The total number of nodes, cores and switches together.
            pub fn nr_nodes(&self) -> usize;

            /// Returns an iterator over all core IDs.
            pub fn core_ids(&self) -> impl Iterator<Item = NodeId>;

            /// The switch attached to a given core.
            pub fn switch_of(&self, core: NodeId) -> NodeId;

            /// Whether a node ID names a switch.
            pub fn is_switch(&self, id: NodeId) -> bool;
        }
    }
}

impl PartialEq for Fabric {
    fn eq(&self, other: &Self) -> bool {
        self.topology == other.topology
    }
}

impl Eq for Fabric {}
