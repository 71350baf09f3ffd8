//! Implicit k-d tree over spline point positions.
//!
//! Nodes are stored flat: the node for the range `[lo, hi)` sits at
//! `lo + (hi - lo) / 2`, split on axis `depth % 3`. No child links are stored,
//! so the same layout can be searched straight out of the cache file.

use protocol::Vector3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KdNode {
    pub position: Vector3,
    pub point_id: i32,
}

/// Random access to a flattened tree, in memory or memory-mapped.
pub trait KdNodes {
    fn node_count(&self) -> usize;
    fn node(&self, index: usize) -> Option<KdNode>;
}

impl KdNodes for [KdNode] {
    fn node_count(&self) -> usize {
        self.len()
    }

    fn node(&self, index: usize) -> Option<KdNode> {
        self.get(index).copied()
    }
}

impl KdNodes for Vec<KdNode> {
    fn node_count(&self) -> usize {
        self.len()
    }

    fn node(&self, index: usize) -> Option<KdNode> {
        self.get(index).copied()
    }
}

fn midpoint(lo: usize, hi: usize) -> usize {
    lo + (hi - lo) / 2
}

/// Reorders `nodes` in place into the implicit layout.
pub fn build(nodes: &mut [KdNode]) {
    build_range(nodes, 0);
}

fn build_range(nodes: &mut [KdNode], depth: usize) {
    if nodes.len() <= 1 {
        return;
    }
    let axis = depth % 3;
    let mid = nodes.len() / 2;
    nodes.select_nth_unstable_by(mid, |a, b| {
        a.position.axis(axis).total_cmp(&b.position.axis(axis))
    });

    let (left, rest) = nodes.split_at_mut(mid);
    build_range(left, depth + 1);
    build_range(&mut rest[1..], depth + 1);
}

/// Nearest stored point to `target` as `(point_id, distance_squared)`.
/// An empty tree yields `(-1, f32::INFINITY)`.
pub fn nearest<T: KdNodes + ?Sized>(tree: &T, target: Vector3) -> (i32, f32) {
    let mut best = (-1, f32::INFINITY);
    search(tree, target, 0, tree.node_count(), 0, &mut best);
    best
}

fn search<T: KdNodes + ?Sized>(
    tree: &T,
    target: Vector3,
    lo: usize,
    hi: usize,
    depth: usize,
    best: &mut (i32, f32),
) {
    if lo >= hi {
        return;
    }
    let mid = midpoint(lo, hi);
    let node = match tree.node(mid) {
        Some(node) => node,
        None => return,
    };

    let distance = node.position.distance_squared(target);
    if distance < best.1 {
        *best = (node.point_id, distance);
    }

    let axis = depth % 3;
    let diff = target.axis(axis) - node.position.axis(axis);
    let (near, far) = if diff < 0.0 {
        ((lo, mid), (mid + 1, hi))
    } else {
        ((mid + 1, hi), (lo, mid))
    };

    search(tree, target, near.0, near.1, depth + 1, best);
    if diff * diff < best.1 {
        search(tree, target, far.0, far.1, depth + 1, best);
    }
}
