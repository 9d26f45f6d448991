//! The physical cluster graph: `N` cores, `N` switches, and directed channels.

use std::collections::BTreeMap;

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::network::types::{Channel, Link, Node, NodeId, NodeKind};

/// The cluster topology.
///
/// Cores take IDs `0..N` and switches `N..2N`, with `sw(c) = c + N`. Every
/// core is connected to exactly its own switch; inter-switch links come from
/// the construction input. The switch-to-core channels uniformly carry the
/// `multi_ejection` construction flag.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Topology {
    pub(crate) graph: DiGraph<Node, Channel>,
    pub(crate) id2idx: FxHashMap<NodeId, NodeIndex>,
    pub(crate) links: Vec<Link>,
    nr_cores: usize,
    multi_ejection: bool,
    // Per-switch port bookkeeping, keyed by neighboring switch. Opaque to the
    // allocator; read back by firmware config-table generators.
    input_ports: FxHashMap<NodeId, BTreeMap<NodeId, u16>>,
    output_ports: FxHashMap<NodeId, BTreeMap<NodeId, u16>>,
}

impl Topology {
    /// Creates a topology from a list of undirected inter-switch links. This
    /// function returns an error if the given links fail to produce a valid
    /// topology.
    ///
    /// Correctness properties:
    ///
    /// - Every link must have distinct endpoints.
    /// - Core IDs referenced by links must be contiguous from zero.
    /// - For any two boards, there must be at most one link between them.
    pub fn new(links: &[Link], multi_ejection: bool) -> Result<Self, TopologyError> {
        let mut core_ids = FxHashSet::default();
        for link in links {
            // CORRECTNESS: Every link must have distinct endpoints.
            if link.a == link.b {
                return Err(TopologyError::NodeAdjacentSelf(link.a));
            }
            core_ids.insert(link.a);
            core_ids.insert(link.b);
        }
        let nr_cores = core_ids.len();
        for i in 0..nr_cores {
            // CORRECTNESS: Core IDs must be contiguous.
            if !core_ids.contains(&NodeId::new(i)) {
                return Err(TopologyError::HoleBeforeId(NodeId::new(i)));
            }
        }

        let mut g = DiGraph::new();
        let mut id2idx = FxHashMap::default();
        for i in 0..nr_cores {
            let id = NodeId::new(i);
            id2idx.insert(id, g.add_node(Node::new_core(id)));
        }
        for i in 0..nr_cores {
            let id = NodeId::new(nr_cores + i);
            id2idx.insert(id, g.add_node(Node::new_switch(id)));
        }
        let idx_of = |id| *id2idx.get(&id).unwrap();

        // Core <-> switch channels. Only the ejection direction may be
        // multi-ejection capable.
        for i in 0..nr_cores {
            let core = NodeId::new(i);
            let switch = NodeId::new(nr_cores + i);
            g.add_edge(idx_of(core), idx_of(switch), Channel::new(core, switch, false));
            g.add_edge(
                idx_of(switch),
                idx_of(core),
                Channel::new(switch, core, multi_ejection),
            );
        }

        let mut input_ports: FxHashMap<NodeId, BTreeMap<NodeId, u16>> = FxHashMap::default();
        let mut output_ports: FxHashMap<NodeId, BTreeMap<NodeId, u16>> = FxHashMap::default();
        let mut seen = FxHashSet::default();
        for &Link {
            a,
            a_port,
            b,
            b_port,
        } in links
        {
            // CORRECTNESS: For any two boards, at most one link between them.
            let key = if a < b { (a, b) } else { (b, a) };
            if !seen.insert(key) {
                return Err(TopologyError::DuplicateLink { n1: a, n2: b });
            }
            let sw_a = NodeId::new(a.inner() + nr_cores);
            let sw_b = NodeId::new(b.inner() + nr_cores);
            g.add_edge(idx_of(sw_a), idx_of(sw_b), Channel::new(sw_a, sw_b, false));
            g.add_edge(idx_of(sw_b), idx_of(sw_a), Channel::new(sw_b, sw_a, false));
            // The cable occupies `a_port` on board a and `b_port` on board b,
            // in both directions.
            input_ports.entry(sw_a).or_default().insert(sw_b, a_port);
            output_ports.entry(sw_a).or_default().insert(sw_b, a_port);
            input_ports.entry(sw_b).or_default().insert(sw_a, b_port);
            output_ports.entry(sw_b).or_default().insert(sw_a, b_port);
        }

        Ok(Self {
            graph: g,
            id2idx,
            links: Vec::from(links),
            nr_cores,
            multi_ejection,
            input_ports,
            output_ports,
        })
    }

    /// The number of cores (equal to the number of switches).
    pub fn nr_cores(&self) -> usize {
        self.nr_cores
    }

    /// The total number of nodes, cores and switches together.
    pub fn nr_nodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns an iterator over all core IDs.
    pub fn core_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nr_cores).map(NodeId::new)
    }

    /// The switch attached to a given core.
    pub fn switch_of(&self, core: NodeId) -> NodeId {
        debug_assert!(core.inner() < self.nr_cores);
        NodeId::new(core.inner() + self.nr_cores)
    }

    /// The core attached to a given switch.
    pub fn core_of(&self, switch: NodeId) -> NodeId {
        debug_assert!(switch.inner() >= self.nr_cores);
        NodeId::new(switch.inner() - self.nr_cores)
    }

    pub fn is_switch(&self, id: NodeId) -> bool {
        id.inner() >= self.nr_cores && id.inner() < 2 * self.nr_cores
    }

    /// Returns the channel from `a` to `b`, if any.
    pub fn channel(&self, a: NodeId, b: NodeId) -> Option<&Channel> {
        let a = *self.idx_of(&a)?;
        let b = *self.idx_of(&b)?;
        let eidx = self.graph.find_edge(a, b)?;
        self.graph.edge_weight(eidx)
    }

    /// Whether the channel from `a` to `b` exists and is multi-ejection.
    pub fn is_multi_ejection(&self, a: NodeId, b: NodeId) -> bool {
        self.channel(a, b).map_or(false, |c| c.multi_ejection)
    }

    /// The ingress port on `switch` facing neighboring switch `adj`.
    pub fn input_port(&self, switch: NodeId, adj: NodeId) -> Option<u16> {
        self.input_ports.get(&switch)?.get(&adj).copied()
    }

    /// The egress port on `switch` facing neighboring switch `adj`.
    pub fn output_port(&self, switch: NodeId, adj: NodeId) -> Option<u16> {
        self.output_ports.get(&switch)?.get(&adj).copied()
    }

    delegate::delegate! {
        to self.id2idx {
            #[call(get)]
            pub(crate) fn idx_of(&self, id: &NodeId) -> Option<&NodeIndex>;
        }

        to self.graph {
            #[call(edge_count)]
            pub fn nr_edges(&self) -> usize;

            pub(crate) fn find_edge(&self, a: NodeIndex, b: NodeIndex) -> Option<EdgeIndex>;
        }

        to self.links {
            /// Returns an iterator over all inter-switch links.
            #[call(iter)]
            pub fn links(&self) -> impl Iterator<Item = &Link>;
        }
    }
}

impl PartialEq for Topology {
    fn eq(&self, other: &Self) -> bool {
        self.nr_cores == other.nr_cores
            && self.multi_ejection == other.multi_ejection
            && self.links == other.links
    }
}

impl Eq for Topology {}

/// An error type listing some of the reasons a topology is invalid.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// A board is linked to itself.
    #[error("board {0} is linked to itself")]
    NodeAdjacentSelf(NodeId),

    /// Board IDs are not contiguous.
    #[error("board IDs not contiguous; hole before {0}")]
    HoleBeforeId(NodeId),

    /// Duplicate link between two boards.
    #[error("duplicate links between {n1} and {n2}")]
    DuplicateLink {
        /// The first board.
        n1: NodeId,
        /// The second board.
        n2: NodeId,
    },
}
