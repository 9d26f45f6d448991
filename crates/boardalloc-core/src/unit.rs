//! The central mutable allocator state: which vNode sits on which board,
//! which pair uses which path, which flow got which slot.
//!
//! An `AllocatorUnit` is a value. Operators clone it, mutate the copy through
//! the primitives here, and hand the copy back; nothing in this module is
//! shared or locked. The fabric (topology + path table) is behind an `Arc`
//! and is the only piece shared between copies.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use rustc_hash::FxHashMap;

use crate::model::{App, AppBundle, AppId, Flow, FlowGraph, FlowId, IdGen, Pair, PairId, VNode, VNodeId};
use crate::network::{Fabric, NodeId, Path};
use crate::slots;

/// Central container for one allocation state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AllocatorUnit {
    fabric: Arc<Fabric>,
    apps: BTreeMap<AppId, App>,
    vnodes: BTreeMap<VNodeId, VNode>,
    flows: BTreeMap<FlowId, Flow>,
    pairs: BTreeMap<PairId, Pair>,
}

impl AllocatorUnit {
    /// Creates an empty allocator over a fabric.
    pub fn new(fabric: Arc<Fabric>) -> Self {
        Self {
            fabric,
            apps: BTreeMap::new(),
            vnodes: BTreeMap::new(),
            flows: BTreeMap::new(),
            pairs: BTreeMap::new(),
        }
    }

    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    pub fn share_fabric(&self) -> Arc<Fabric> {
        Arc::clone(&self.fabric)
    }

    pub fn apps(&self) -> impl Iterator<Item = &App> {
        self.apps.values()
    }

    pub fn vnodes(&self) -> impl Iterator<Item = &VNode> {
        self.vnodes.values()
    }

    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &Pair> {
        self.pairs.values()
    }

    pub fn app(&self, id: AppId) -> Option<&App> {
        self.apps.get(&id)
    }

    pub fn vnode(&self, id: VNodeId) -> Option<&VNode> {
        self.vnodes.get(&id)
    }

    pub fn flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id)
    }

    pub fn pair(&self, id: PairId) -> Option<&Pair> {
        self.pairs.get(&id)
    }

    /// An ID generator positioned above every ID currently in use. Lets a
    /// caller that loaded a saved allocator keep adding apps without
    /// collisions.
    pub fn id_gen(&self) -> IdGen {
        let next = |n: Option<usize>| n.map_or(0, |v| v + 1);
        IdGen::resume(
            next(self.vnodes.keys().last().map(|id| id.inner())),
            next(self.pairs.keys().last().map(|id| id.inner())),
            next(self.flows.keys().last().map(|id| id.inner())),
            next(self.apps.keys().last().map(|id| id.inner())),
        )
    }

    // ---- derived views -------------------------------------------------

    /// IDs of vNodes still being allocated, in ascending order.
    pub fn allocating_vnode_ids(&self) -> Vec<VNodeId> {
        self.vnodes
            .values()
            .filter(|v| v.allocating)
            .map(|v| v.id)
            .collect()
    }

    /// IDs of pairs still being allocated, in ascending order.
    pub fn allocating_pair_ids(&self) -> Vec<PairId> {
        self.pairs
            .values()
            .filter(|p| p.allocating)
            .map(|p| p.id)
            .collect()
    }

    /// IDs of flows still being allocated, in ascending order.
    pub fn allocating_flow_ids(&self) -> Vec<FlowId> {
        self.flows
            .values()
            .filter(|f| f.allocating)
            .map(|f| f.id)
            .collect()
    }

    pub fn nr_allocating_vnodes(&self) -> usize {
        self.vnodes.values().filter(|v| v.allocating).count()
    }

    /// Boards held by currently-allocating vNodes, keyed by board.
    pub fn temp_allocated_rnodes(&self) -> BTreeMap<NodeId, VNodeId> {
        self.vnodes
            .values()
            .filter(|v| v.allocating)
            .filter_map(|v| v.rnode.map(|r| (r, v.id)))
            .collect()
    }

    /// Boards not assigned to any vNode, allocating or frozen.
    pub fn empty_rnodes(&self) -> BTreeSet<NodeId> {
        let used = self
            .vnodes
            .values()
            .filter_map(|v| v.rnode)
            .collect::<BTreeSet<_>>();
        self.fabric
            .core_ids()
            .filter(|id| !used.contains(id))
            .collect()
    }

    // ---- app lifecycle -------------------------------------------------

    /// Inserts an application atomically. Returns `false` without mutating
    /// anything when the app would overfill the cluster or its ID is already
    /// present.
    pub fn add_app(&mut self, bundle: AppBundle) -> bool {
        if self.apps.contains_key(&bundle.app.id) {
            return false;
        }
        if self.vnodes.len() + bundle.vnodes.len() > self.fabric.nr_cores() {
            return false;
        }
        let AppBundle {
            app,
            vnodes,
            flows,
            pairs,
        } = bundle;
        self.apps.insert(app.id, app);
        for v in vnodes {
            self.vnodes.insert(v.id, v);
        }
        for f in flows {
            self.flows.insert(f.id, f);
        }
        for p in pairs {
            self.pairs.insert(p.id, p);
        }
        true
    }

    /// Erases an application and every record it owns; its boards return to
    /// the empty set.
    pub fn remove_app(&mut self, id: AppId) -> Result<(), Error> {
        let app = self.apps.remove(&id).ok_or(Error::NoSuchApp(id))?;
        for v in &app.vnodes {
            self.vnodes.remove(v);
        }
        for f in &app.flows {
            self.flows.remove(f);
        }
        for p in &app.pairs {
            self.pairs.remove(p);
        }
        Ok(())
    }

    // ---- pair primitives -----------------------------------------------

    /// Installs a route for a pair. The caller guarantees `path` is drawn
    /// from the path table for the pair's current board placement.
    pub fn pair_allocation(&mut self, id: PairId, path: Path) -> Result<(), Error> {
        let pair = self.pairs.get_mut(&id).ok_or(Error::NoSuchPair(id))?;
        if !pair.allocating {
            return Err(Error::FrozenPair(id));
        }
        pair.path = Some(path);
        Ok(())
    }

    /// Samples a route uniformly from the path table for the pair's current
    /// board placement.
    pub fn random_pair_allocation<R: Rng + ?Sized>(
        &mut self,
        id: PairId,
        rng: &mut R,
    ) -> Result<(), Error> {
        let pair = self.pairs.get(&id).ok_or(Error::NoSuchPair(id))?;
        let src = self
            .vnodes
            .get(&pair.src)
            .and_then(|v| v.rnode)
            .ok_or(Error::EndpointUnallocated(id))?;
        let dst = self
            .vnodes
            .get(&pair.dst)
            .and_then(|v| v.rnode)
            .ok_or(Error::EndpointUnallocated(id))?;
        let path = self
            .fabric
            .paths()
            .paths(src, dst)
            .choose(rng)
            .expect("no path between allocated boards")
            .clone();
        self.pair_allocation(id, path)
    }

    /// Clears a pair's route.
    pub fn pair_deallocation(&mut self, id: PairId) -> Result<(), Error> {
        let pair = self.pairs.get_mut(&id).ok_or(Error::NoSuchPair(id))?;
        if !pair.allocating {
            return Err(Error::FrozenPair(id));
        }
        pair.path = None;
        Ok(())
    }

    // ---- node primitives -----------------------------------------------

    /// Binds a vNode to a board. With `with_pair_alloc`, every incident pair
    /// whose other endpoint already has a board gets a random route.
    pub fn node_allocation<R: Rng + ?Sized>(
        &mut self,
        id: VNodeId,
        rnode: NodeId,
        with_pair_alloc: bool,
        rng: &mut R,
    ) -> Result<(), Error> {
        {
            let vnode = self.vnodes.get(&id).ok_or(Error::NoSuchVNode(id))?;
            if !vnode.allocating {
                return Err(Error::FrozenVNode(id));
            }
            if vnode.rnode.is_some() {
                return Err(Error::AlreadyAllocated(id));
            }
            if !self.empty_rnodes().contains(&rnode) {
                return Err(Error::RNodeOccupied(rnode));
            }
        }
        self.vnodes.get_mut(&id).unwrap().rnode = Some(rnode);

        if with_pair_alloc {
            let vnode = self.vnodes.get(&id).unwrap();
            let incident = vnode
                .send_pairs
                .iter()
                .chain(vnode.recv_pairs.iter())
                .copied()
                .collect::<Vec<_>>();
            for pid in incident {
                let pair = &self.pairs[&pid];
                let other = if pair.src == id { pair.dst } else { pair.src };
                if self.vnodes[&other].rnode.is_some() {
                    self.random_pair_allocation(pid, rng)?;
                }
            }
        }
        Ok(())
    }

    /// Binds a vNode to a board picked uniformly from the empty set.
    pub fn random_node_allocation<R: Rng + ?Sized>(
        &mut self,
        id: VNodeId,
        with_pair_alloc: bool,
        rng: &mut R,
    ) -> Result<(), Error> {
        let rnode = self
            .empty_rnodes()
            .into_iter()
            .choose(rng)
            .ok_or(Error::NoEmptyRNode)?;
        self.node_allocation(id, rnode, with_pair_alloc, rng)
    }

    /// Unbinds a vNode from its board. With `with_pair_dealloc`, every
    /// incident pair with a route loses it.
    pub fn node_deallocation(&mut self, id: VNodeId, with_pair_dealloc: bool) -> Result<(), Error> {
        let vnode = self.vnodes.get_mut(&id).ok_or(Error::NoSuchVNode(id))?;
        if !vnode.allocating {
            return Err(Error::FrozenVNode(id));
        }
        vnode.rnode = None;
        if with_pair_dealloc {
            let incident = vnode
                .send_pairs
                .iter()
                .chain(vnode.recv_pairs.iter())
                .copied()
                .collect::<Vec<_>>();
            for pid in incident {
                if self.pairs[&pid].path.is_some() {
                    self.pair_deallocation(pid)?;
                }
            }
        }
        Ok(())
    }

    // ---- apply ---------------------------------------------------------

    /// One-shot freeze: verifies the invariants, re-runs greedy slot
    /// allocation, then commits every fully-allocated item. A consistency
    /// violation here means an operator corrupted the state, which is a bug;
    /// this panics with the violated invariant.
    pub fn apply(&mut self) {
        if let Err(err) = self.consistency_checker() {
            panic!("consistency violation in apply: {err}");
        }
        self.greedy_slot_allocation();
        for v in self.vnodes.values_mut() {
            if v.rnode.is_some() {
                v.allocating = false;
            }
        }
        for p in self.pairs.values_mut() {
            if p.path.is_some() {
                p.allocating = false;
            }
        }
        let to_freeze = self
            .flows
            .values()
            .filter(|f| {
                f.allocating
                    && f.slot.is_some()
                    && f.pairs.iter().all(|pid| self.pairs[pid].path.is_some())
            })
            .map(|f| f.id)
            .collect::<Vec<_>>();
        for id in to_freeze {
            let graph = self.flow_graph(id);
            let flow = self.flows.get_mut(&id).unwrap();
            flow.allocating = false;
            flow.graph = Some(graph);
        }
    }

    /// Re-derives the board assignment and route endpoints and checks them
    /// against the invariants.
    pub fn consistency_checker(&self) -> Result<(), ConsistencyError> {
        let mut used = BTreeSet::new();
        for vnode in self.vnodes.values() {
            if let Some(rnode) = vnode.rnode {
                if !used.insert(rnode) {
                    return Err(ConsistencyError::DuplicateRNode(rnode));
                }
            }
        }
        for pair in self.pairs.values() {
            let Some(path) = &pair.path else {
                continue;
            };
            let src = self.vnodes[&pair.src]
                .rnode
                .ok_or(ConsistencyError::RoutedPairWithoutBoard(pair.id))?;
            let dst = self.vnodes[&pair.dst]
                .rnode
                .ok_or(ConsistencyError::RoutedPairWithoutBoard(pair.id))?;
            if !self.fabric.paths().paths(src, dst).contains(path) {
                return Err(ConsistencyError::PathNotInTable(pair.id));
            }
        }
        for flow in self.flows.values() {
            if flow.allocating {
                continue;
            }
            if flow.slot.is_none() {
                return Err(ConsistencyError::FrozenFlowWithoutSlot(flow.id));
            }
            for pid in &flow.pairs {
                if self.pairs[pid].path.is_none() {
                    return Err(ConsistencyError::FrozenFlowWithUnroutedPair(flow.id, *pid));
                }
            }
        }
        Ok(())
    }

    // ---- slot allocation ----------------------------------------------

    /// The flow set handed to the conflict and coloring layers: one entry per
    /// allocating flow with at least one route, plus one merged pseudo-flow
    /// per already-fixed slot.
    pub(crate) fn coloring_flows(&self) -> BTreeMap<i64, FlowGraph> {
        let mut out: BTreeMap<i64, FlowGraph> = BTreeMap::new();
        for flow in self.flows.values() {
            let graph = self.flow_graph(flow.id);
            if graph.is_empty() {
                continue;
            }
            out.entry(flow.cvid())
                .and_modify(|g| g.merge(&graph))
                .or_insert(graph);
        }
        out
    }

    /// Runs the greedy slot coloring and writes the result back onto the
    /// allocating flows. Previously fixed slots are preserved exactly.
    /// Panics if the produced coloring puts two edge-sharing flows into the
    /// same slot; that would be a coloring bug, never something to paper
    /// over by burning an extra slot.
    pub fn greedy_slot_allocation(&mut self) {
        for flow in self.flows.values_mut() {
            if flow.allocating {
                flow.slot = None;
            }
        }
        let flows = self.coloring_flows();
        if flows.is_empty() {
            return;
        }
        let coloring = slots::greedy_coloring(&flows);
        slots::verify_coloring(&flows, &coloring);
        for (&cvid, &slot) in &coloring {
            if cvid >= 0 {
                self.flows
                    .get_mut(&FlowId::new(cvid as usize))
                    .expect("coloring returned an unknown flow")
                    .slot = Some(slot);
            }
        }
    }

    /// The minimum number of slots for the current routes, from the exact
    /// branch-and-bound cover. Reporting only; nothing is written back.
    pub fn optimal_slot_num(&self) -> usize {
        slots::exact_cover_size(&self.coloring_flows())
    }

    // ---- metrics -------------------------------------------------------

    /// The union of a flow's pair routes. Frozen flows return their
    /// materialized graph.
    pub fn flow_graph(&self, id: FlowId) -> FlowGraph {
        let flow = &self.flows[&id];
        if let Some(graph) = &flow.graph {
            graph.clone()
        } else {
            FlowGraph::from_paths(
                flow.pairs
                    .iter()
                    .filter_map(|pid| self.pairs[pid].path.as_ref()),
            )
        }
    }

    /// Highest slot index in use, plus one.
    pub fn max_slot_num(&self) -> usize {
        self.flows
            .values()
            .filter_map(|f| f.slot)
            .max()
            .map_or(0, |s| s + 1)
    }

    /// Total number of edges over all flow graphs.
    pub fn total_flow_edges(&self) -> usize {
        self.flows
            .keys()
            .map(|&id| self.flow_graph(id).nr_edges())
            .sum()
    }

    /// Number of switches touched by any pair's route.
    pub fn routed_board_num(&self) -> usize {
        self.pairs
            .values()
            .filter_map(|p| p.path.as_ref())
            .flatten()
            .filter(|&&n| self.fabric.is_switch(n))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Number of nodes touched by the routes of currently-allocating pairs.
    pub fn board_num_used_by_allocating_app(&self) -> usize {
        self.pairs
            .values()
            .filter(|p| p.allocating)
            .filter_map(|p| p.path.as_ref())
            .flatten()
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Mean per-switch slot count. Walks slots from the highest down and
    /// pushes each touched switch's count up to the level the slot implies.
    pub fn avg_slot_num(&self) -> f64 {
        let nr_switches = self.fabric.nr_cores();
        if nr_switches == 0 {
            return 0.0;
        }
        let mut by_slot: BTreeMap<usize, Vec<FlowId>> = BTreeMap::new();
        for flow in self.flows.values() {
            if let Some(slot) = flow.slot {
                by_slot.entry(slot).or_default().push(flow.id);
            }
        }
        let mut counts: FxHashMap<NodeId, usize> = FxHashMap::default();
        for (&slot, flow_ids) in by_slot.iter().rev() {
            for &fid in flow_ids {
                let switches = self
                    .flow_graph(fid)
                    .nodes()
                    .into_iter()
                    .filter(|&n| self.fabric.is_switch(n))
                    .collect::<Vec<_>>();
                let level = switches
                    .iter()
                    .map(|n| counts.get(n).copied().unwrap_or(0))
                    .max()
                    .unwrap_or(0);
                let target = if level > slot + 1 { level + 1 } else { slot + 1 };
                for n in switches {
                    counts.insert(n, target);
                }
            }
        }
        counts.values().sum::<usize>() as f64 / nr_switches as f64
    }

    /// Structural hash over the model state (the fabric does not
    /// participate). Stable across clones and serialize round-trips.
    pub fn structural_hash(&self) -> u64 {
        crate::utils::calculate_hash(self)
    }
}

impl Hash for AllocatorUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.apps.hash(state);
        self.vnodes.hash(state);
        self.flows.hash(state);
        self.pairs.hash(state);
    }
}

impl PartialEq for AllocatorUnit {
    fn eq(&self, other: &Self) -> bool {
        self.fabric == other.fabric
            && self.apps == other.apps
            && self.vnodes == other.vnodes
            && self.flows == other.flows
            && self.pairs == other.pairs
    }
}

impl Eq for AllocatorUnit {}

/// Errors from the allocator primitives. The shell catches these, prints
/// them, and resumes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown application ID.
    #[error("no such app: {0}")]
    NoSuchApp(AppId),

    /// Unknown vNode ID.
    #[error("no such vNode: {0}")]
    NoSuchVNode(VNodeId),

    /// Unknown pair ID.
    #[error("no such pair: {0}")]
    NoSuchPair(PairId),

    /// The vNode was frozen by `apply` and can no longer be moved.
    #[error("vNode {0} is frozen")]
    FrozenVNode(VNodeId),

    /// The pair was frozen by `apply` and can no longer be re-routed.
    #[error("pair {0} is frozen")]
    FrozenPair(PairId),

    /// The vNode already holds a board.
    #[error("vNode {0} is already allocated")]
    AlreadyAllocated(VNodeId),

    /// The requested board is held by another vNode.
    #[error("board {0} is not free")]
    RNodeOccupied(NodeId),

    /// No board is free.
    #[error("no empty board left")]
    NoEmptyRNode,

    /// The pair's endpoints are not both on boards yet.
    #[error("pair {0} has an unallocated endpoint")]
    EndpointUnallocated(PairId),
}

/// Invariant violations found by [`AllocatorUnit::consistency_checker`].
/// Any of these escaping an operator is a bug in that operator.
#[derive(Debug, thiserror::Error)]
pub enum ConsistencyError {
    /// Two vNodes share one board.
    #[error("board {0} is assigned to two vNodes")]
    DuplicateRNode(NodeId),

    /// A routed pair has an endpoint without a board.
    #[error("pair {0} has a path but an endpoint without a board")]
    RoutedPairWithoutBoard(PairId),

    /// A pair's path is not a shortest path for its current placement.
    #[error("pair {0}: path is not in the shortest-path table for its placement")]
    PathNotInTable(PairId),

    /// A frozen flow has no slot.
    #[error("frozen flow {0} has no slot")]
    FrozenFlowWithoutSlot(FlowId),

    /// A frozen flow owns an unrouted pair.
    #[error("frozen flow {0} owns unrouted pair {1}")]
    FrozenFlowWithUnroutedPair(FlowId, PairId),
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::testing;

    fn unit_with_one_pair() -> AllocatorUnit {
        let mut unit = testing::ring_unit(4, false);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::single_pair_app(&mut ids)));
        unit
    }

    #[test]
    fn add_app_rejects_overfill() {
        let mut unit = testing::ring_unit(4, false);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::fully_connected_app(4, &mut ids)));
        let before = unit.clone();
        assert!(!unit.add_app(testing::single_pair_app(&mut ids)));
        assert_eq!(unit, before);
    }

    #[test]
    fn add_app_rejects_duplicate_id() {
        let mut unit = testing::ring_unit(8, false);
        let mut ids = IdGen::new();
        let bundle = testing::single_pair_app(&mut ids);
        assert!(unit.add_app(bundle.clone()));
        let before = unit.clone();
        assert!(!unit.add_app(bundle));
        assert_eq!(unit, before);
    }

    #[test]
    fn add_then_remove_restores_state() {
        let mut unit = testing::ring_unit(4, false);
        let baseline = unit.clone();
        let mut ids = IdGen::new();
        let bundle = testing::single_pair_app(&mut ids);
        let app_id = bundle.app.id;
        assert!(unit.add_app(bundle));
        unit.remove_app(app_id).unwrap();
        assert_eq!(unit, baseline);
        assert_eq!(unit.structural_hash(), baseline.structural_hash());
    }

    #[test]
    fn remove_unknown_app_fails() {
        let mut unit = testing::ring_unit(4, false);
        assert!(matches!(
            unit.remove_app(AppId::new(7)),
            Err(Error::NoSuchApp(_))
        ));
    }

    #[test]
    fn node_allocation_routes_incident_pairs() {
        let mut unit = unit_with_one_pair();
        let mut rng = StdRng::seed_from_u64(0);
        let ids = unit.allocating_vnode_ids();
        unit.node_allocation(ids[0], NodeId::new(0), true, &mut rng)
            .unwrap();
        unit.node_allocation(ids[1], NodeId::new(2), true, &mut rng)
            .unwrap();
        let pair = unit.pairs().next().unwrap();
        let path = pair.path.as_ref().expect("pair should have been routed");
        assert_eq!(path[0], NodeId::new(0));
        assert_eq!(*path.last().unwrap(), NodeId::new(2));
        unit.consistency_checker().unwrap();
    }

    #[test]
    fn node_allocation_rejects_taken_board() {
        let mut unit = unit_with_one_pair();
        let mut rng = StdRng::seed_from_u64(0);
        let ids = unit.allocating_vnode_ids();
        unit.node_allocation(ids[0], NodeId::new(1), false, &mut rng)
            .unwrap();
        assert!(matches!(
            unit.node_allocation(ids[1], NodeId::new(1), false, &mut rng),
            Err(Error::RNodeOccupied(_))
        ));
    }

    #[test]
    fn node_deallocation_clears_routes() {
        let mut unit = unit_with_one_pair();
        let mut rng = StdRng::seed_from_u64(0);
        for id in unit.allocating_vnode_ids() {
            unit.random_node_allocation(id, true, &mut rng).unwrap();
        }
        let ids = unit.allocating_vnode_ids();
        unit.node_deallocation(ids[0], true).unwrap();
        assert!(unit.pairs().all(|p| p.path.is_none()));
        assert_eq!(unit.empty_rnodes().len(), 3);
    }

    #[test]
    fn derived_views_partition_the_boards() {
        let mut unit = testing::ring_unit(8, false);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::fully_connected_app(4, &mut ids)));
        let mut rng = StdRng::seed_from_u64(0);
        for id in unit.allocating_vnode_ids() {
            unit.random_node_allocation(id, true, &mut rng).unwrap();
        }
        assert_eq!(
            unit.temp_allocated_rnodes().len() + unit.empty_rnodes().len(),
            unit.fabric().nr_cores()
        );
    }

    #[test]
    fn apply_freezes_everything_allocated() {
        let mut unit = unit_with_one_pair();
        let mut rng = StdRng::seed_from_u64(0);
        for id in unit.allocating_vnode_ids() {
            unit.random_node_allocation(id, true, &mut rng).unwrap();
        }
        unit.apply();
        assert_eq!(unit.nr_allocating_vnodes(), 0);
        assert!(unit.pairs().all(|p| !p.allocating));
        assert!(unit.flows().all(|f| !f.allocating && f.slot.is_some()));
        // Frozen items refuse further mutation.
        let vid = unit.vnodes().next().unwrap().id;
        assert!(matches!(
            unit.node_deallocation(vid, true),
            Err(Error::FrozenVNode(_))
        ));
        let pid = unit.pairs().next().unwrap().id;
        assert!(matches!(
            unit.pair_deallocation(pid),
            Err(Error::FrozenPair(_))
        ));
    }

    #[test]
    fn frozen_flow_graph_matches_pair_paths() {
        let mut unit = unit_with_one_pair();
        let mut rng = StdRng::seed_from_u64(0);
        for id in unit.allocating_vnode_ids() {
            unit.random_node_allocation(id, true, &mut rng).unwrap();
        }
        unit.apply();
        let flow = unit.flows().next().unwrap();
        let expected = FlowGraph::from_paths(
            flow.pairs
                .iter()
                .filter_map(|pid| unit.pair(*pid).unwrap().path.as_ref()),
        );
        assert_eq!(unit.flow_graph(flow.id), expected);
    }

    #[test]
    fn serialize_round_trip_is_structural_identity() -> anyhow::Result<()> {
        let mut unit = unit_with_one_pair();
        let mut rng = StdRng::seed_from_u64(0);
        for id in unit.allocating_vnode_ids() {
            unit.random_node_allocation(id, true, &mut rng).unwrap();
        }
        unit.greedy_slot_allocation();
        let bytes = rmp_serde::to_vec(&unit)?;
        let restored: AllocatorUnit = rmp_serde::from_slice(&bytes)?;
        assert_eq!(unit, restored);
        assert_eq!(unit.structural_hash(), restored.structural_hash());
        Ok(())
    }

    #[test]
    fn id_gen_resumes_above_existing_ids() {
        let mut unit = testing::ring_unit(8, false);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::single_pair_app(&mut ids)));
        let mut resumed = unit.id_gen();
        let bundle = testing::single_pair_app(&mut resumed);
        assert!(unit.add_app(bundle));
        assert_eq!(unit.apps().count(), 2);
    }
}
