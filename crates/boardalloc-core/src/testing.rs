//! Utilities for writing tests: canned fabrics and workloads.

use std::sync::Arc;

use crate::model::{AppBundle, AppSpec, CommSpec, IdGen};
use crate::network::{Fabric, Link, NodeId};
use crate::unit::AllocatorUnit;

/// A ring of `n` boards (`n >= 3`): board `i` links to board `(i + 1) % n`,
/// using port 0 on the lower side and port 1 on the upper.
pub fn ring_links(n: usize) -> Vec<Link> {
    (0..n)
        .map(|i| Link::new(NodeId::new(i), 0, NodeId::new((i + 1) % n), 1))
        .collect()
}

/// A `w` x `h` grid of boards, row-major IDs. Ports 0/1 run east-west and
/// 2/3 north-south.
pub fn mesh_links(w: usize, h: usize) -> Vec<Link> {
    let mut links = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let id = y * w + x;
            if x + 1 < w {
                links.push(Link::new(NodeId::new(id), 0, NodeId::new(id + 1), 1));
            }
            if y + 1 < h {
                links.push(Link::new(NodeId::new(id), 2, NodeId::new(id + w), 3));
            }
        }
    }
    links
}

/// An empty allocator over a ring fabric.
pub fn ring_unit(n: usize, multi_ejection: bool) -> AllocatorUnit {
    let fabric = Fabric::new(&ring_links(n), multi_ejection).unwrap();
    AllocatorUnit::new(Arc::new(fabric))
}

/// An empty allocator over a mesh fabric.
pub fn mesh_unit(w: usize, h: usize) -> AllocatorUnit {
    let fabric = Fabric::new(&mesh_links(w, h), false).unwrap();
    AllocatorUnit::new(Arc::new(fabric))
}

/// Two vNodes, one pair, one flow.
pub fn single_pair_app(ids: &mut IdGen) -> AppBundle {
    let spec = AppSpec::builder()
        .comms(vec![CommSpec::new(0, 1, 0)])
        .description("single pair".into())
        .build();
    spec.build(ids)
}

/// `n` vNodes talking all-to-all, one flow per ordered pair
/// (`n * (n - 1)` pairs and flows).
pub fn fully_connected_app(n: usize, ids: &mut IdGen) -> AppBundle {
    let mut comms = Vec::new();
    for i in 0..n as u64 {
        for j in 0..n as u64 {
            if i != j {
                comms.push(CommSpec::new(i, j, i * n as u64 + j));
            }
        }
    }
    let spec = AppSpec::builder()
        .comms(comms)
        .description(format!("all-to-all {n}"))
        .build();
    spec.build(ids)
}

/// An FFT butterfly over `n` vNodes (`n` a power of two): in stage `s`,
/// node `i` sends to `i ^ (1 << s)`, each transfer its own flow. That is
/// `log2(n)` flows per node.
pub fn fft_app(n: usize, ids: &mut IdGen) -> AppBundle {
    assert!(n.is_power_of_two());
    let stages = n.trailing_zeros() as u64;
    let mut comms = Vec::new();
    for s in 0..stages {
        for i in 0..n as u64 {
            let partner = i ^ (1 << s);
            comms.push(CommSpec::new(i, partner, s * n as u64 + i));
        }
    }
    let spec = AppSpec::builder()
        .comms(comms)
        .description(format!("fft {n}"))
        .build();
    spec.build(ids)
}
