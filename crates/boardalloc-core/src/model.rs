//! Typed records for virtual jobs: applications, virtual nodes, flows, and
//! pairs. Everything is arena-and-index: records refer to each other by ID
//! and live in the owning [`AllocatorUnit`](crate::unit::AllocatorUnit), so a
//! deep copy of the whole state is a plain structural clone.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::network::{NodeId, Path};

identifier!(VNodeId, usize);
identifier!(PairId, usize);
identifier!(FlowId, usize);
identifier!(AppId, usize);

/// One directed vNode-to-vNode communication, owned by exactly one flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Pair {
    pub id: PairId,
    pub src: VNodeId,
    pub dst: VNodeId,
    pub flow: FlowId,
    /// The chosen route, always drawn from the path table for the current
    /// board placement of `src` and `dst`.
    pub path: Option<Path>,
    /// Freshly added pairs allocate; `apply` freezes them.
    pub allocating: bool,
}

/// A set of pairs sharing a flow ID, forming one logical multicast tree. A
/// frozen flow occupies exactly one time-division slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub pairs: Vec<PairId>,
    pub slot: Option<usize>,
    pub allocating: bool,
    /// Union of the pairs' paths, materialized when the flow is frozen.
    pub(crate) graph: Option<FlowGraph>,
}

impl Flow {
    /// Canonical vertex ID for the conflict layer. Non-negative while the
    /// flow is still to be colored; `-(slot + 1)` once its slot is fixed, so
    /// the sign alone tells the coloring step what it may move.
    pub fn cvid(&self) -> i64 {
        if self.allocating {
            self.id.inner() as i64
        } else {
            let slot = self.slot.expect("frozen flow without a slot");
            -(slot as i64) - 1
        }
    }
}

/// A virtual endpoint of an application, bound to a physical core by the
/// allocator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VNode {
    pub id: VNodeId,
    pub send_pairs: Vec<PairId>,
    pub recv_pairs: Vec<PairId>,
    pub rnode: Option<NodeId>,
    pub allocating: bool,
}

/// A bundle of vNodes, flows, and pairs added atomically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct App {
    pub id: AppId,
    pub vnodes: Vec<VNodeId>,
    pub flows: Vec<FlowId>,
    pub pairs: Vec<PairId>,
    /// Where the app came from (e.g. the communication file name).
    pub description: String,
}

/// The union of a flow's pair paths, kept as a directed edge set. This is all
/// the conflict and slot layers ever look at.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FlowGraph {
    edges: BTreeSet<(NodeId, NodeId)>,
}

impl FlowGraph {
    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Self {
        let mut graph = Self::default();
        for path in paths {
            graph.add_path(path);
        }
        graph
    }

    pub fn add_path(&mut self, path: &Path) {
        for hop in path.windows(2) {
            self.edges.insert((hop[0], hop[1]));
        }
    }

    pub fn merge(&mut self, other: &FlowGraph) {
        self.edges.extend(other.edges.iter().copied());
    }

    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.edges.iter().copied()
    }

    pub fn nr_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All nodes touched by the flow.
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        self.edges
            .iter()
            .flat_map(|&(a, b)| [a, b])
            .collect()
    }

    /// Whether the two flows share at least one directed edge.
    pub fn intersects(&self, other: &FlowGraph) -> bool {
        let (small, large) = if self.edges.len() <= other.edges.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.edges.iter().any(|e| large.edges.contains(e))
    }
}

/// Generator for dense record IDs. One per allocator lifetime; IDs are never
/// reused, even after `remove_app`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IdGen {
    next_vnode: usize,
    next_pair: usize,
    next_flow: usize,
    next_app: usize,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes generation above a set of already-used IDs, e.g. after loading
    /// a saved allocator.
    pub fn resume(next_vnode: usize, next_pair: usize, next_flow: usize, next_app: usize) -> Self {
        Self {
            next_vnode,
            next_pair,
            next_flow,
            next_app,
        }
    }

    pub fn fresh_vnode(&mut self) -> VNodeId {
        let id = VNodeId::new(self.next_vnode);
        self.next_vnode += 1;
        id
    }

    pub fn fresh_pair(&mut self) -> PairId {
        let id = PairId::new(self.next_pair);
        self.next_pair += 1;
        id
    }

    pub fn fresh_flow(&mut self) -> FlowId {
        let id = FlowId::new(self.next_flow);
        self.next_flow += 1;
        id
    }

    pub fn fresh_app(&mut self) -> AppId {
        let id = AppId::new(self.next_app);
        self.next_app += 1;
        id
    }
}

/// One row of a communication pattern: `src` talks to `dst` as part of the
/// flow labelled `flow`. Labels are opaque and app-local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommSpec {
    pub src: u64,
    pub dst: u64,
    pub flow: u64,
}

impl CommSpec {
    pub fn new(src: u64, dst: u64, flow: u64) -> Self {
        Self { src, dst, flow }
    }
}

/// An application description: the communication rows plus provenance. The
/// build step maps labels 1-to-1 onto fresh dense IDs.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct AppSpec {
    pub comms: Vec<CommSpec>,
    #[builder(default)]
    pub description: String,
}

/// A fully constructed application, ready for
/// [`AllocatorUnit::add_app`](crate::unit::AllocatorUnit::add_app).
#[derive(Debug, Clone)]
pub struct AppBundle {
    pub app: App,
    pub vnodes: Vec<VNode>,
    pub flows: Vec<Flow>,
    pub pairs: Vec<Pair>,
}

impl AppSpec {
    /// Maps vNode and flow labels onto fresh dense IDs (in order of first
    /// appearance) and assembles the record bundle.
    pub fn build(&self, ids: &mut IdGen) -> AppBundle {
        let mut label2vnode: FxHashMap<u64, VNodeId> = FxHashMap::default();
        let mut label2flow: FxHashMap<u64, FlowId> = FxHashMap::default();
        let mut vnode_order = Vec::new();
        let mut flow_order = Vec::new();
        for comm in &self.comms {
            for label in [comm.src, comm.dst] {
                label2vnode.entry(label).or_insert_with(|| {
                    let id = ids.fresh_vnode();
                    vnode_order.push(id);
                    id
                });
            }
            label2flow.entry(comm.flow).or_insert_with(|| {
                let id = ids.fresh_flow();
                flow_order.push(id);
                id
            });
        }

        let pairs = self
            .comms
            .iter()
            .map(|comm| Pair {
                id: ids.fresh_pair(),
                src: label2vnode[&comm.src],
                dst: label2vnode[&comm.dst],
                flow: label2flow[&comm.flow],
                path: None,
                allocating: true,
            })
            .collect::<Vec<_>>();

        let vnodes = vnode_order
            .iter()
            .map(|&id| VNode {
                id,
                send_pairs: pairs.iter().filter(|p| p.src == id).map(|p| p.id).collect(),
                recv_pairs: pairs.iter().filter(|p| p.dst == id).map(|p| p.id).collect(),
                rnode: None,
                allocating: true,
            })
            .collect::<Vec<_>>();

        let flows = flow_order
            .iter()
            .map(|&id| Flow {
                id,
                pairs: pairs.iter().filter(|p| p.flow == id).map(|p| p.id).collect(),
                slot: None,
                allocating: true,
                graph: None,
            })
            .collect::<Vec<_>>();

        let app = App {
            id: ids.fresh_app(),
            vnodes: vnode_order,
            flows: flow_order.clone(),
            pairs: pairs.iter().map(|p| p.id).collect(),
            description: self.description.clone(),
        };

        AppBundle {
            app,
            vnodes,
            flows,
            pairs,
        }
    }
}
