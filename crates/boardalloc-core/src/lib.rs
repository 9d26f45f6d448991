#![warn(unreachable_pub, missing_debug_implementations)]

//! The core board-allocator library. Virtual compute jobs are placed onto a
//! fixed FPGA cluster: every virtual node gets a physical board, every
//! board-to-board communication a shortest path, and every flow a
//! time-division slot such that no two flows sharing a wire share a slot.
//!
//! The usual entry points are [`AllocatorUnit`] for state,
//! [`alns`](alns::alns) / [`ga::nsga2`] for optimization, and
//! [`Evaluator`] for the objective vector.

#[macro_use]
mod ident;

pub mod alns;
pub mod conflict;
pub mod eval;
pub mod ga;
pub mod model;
pub mod network;
pub mod ops;
mod slots;
mod unit;

pub(crate) mod utils;

pub mod testing;

pub use eval::{Evaluator, Fitness};
pub use model::{
    App, AppBundle, AppId, AppSpec, CommSpec, Flow, FlowGraph, FlowId, IdGen, Pair, PairId, VNode,
    VNodeId,
};
pub use network::{Fabric, Link, Node, NodeId, NodeKind, Path, PathTable, Topology, TopologyError};
pub use unit::{AllocatorUnit, ConsistencyError, Error};
