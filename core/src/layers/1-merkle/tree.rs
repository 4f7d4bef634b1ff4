//! Node id arithmetic. Pure functions, no state.

/// Position of a node in a hash tree; the root is 1.
pub type NodeId = usize;

/// Node id of the root of every tree.
pub const ROOT_NODE_ID: NodeId = 1;

/// Number of leaves in a tree holding at least `min_capacity` leaves.
///
/// Rounds up to a power of two. A tree has at least one internal node
/// (the root), so the result is never below two.
pub fn full_tree_leaf_count(min_capacity: usize) -> usize {
    min_capacity.max(2).next_power_of_two()
}

/// Total number of nodes, leaves and internal ones, in a tree holding at
/// least `min_capacity` leaves.
pub fn full_tree_node_count(min_capacity: usize) -> usize {
    full_tree_leaf_count(min_capacity) * 2 - 1
}

#[inline]
pub fn parent(node_id: NodeId) -> NodeId {
    node_id >> 1
}

#[inline]
pub fn left_child(node_id: NodeId) -> NodeId {
    node_id << 1
}

#[inline]
pub fn right_child(node_id: NodeId) -> NodeId {
    (node_id << 1) | 1
}

/// The other child of this node's parent.
#[inline]
pub fn sibling(node_id: NodeId) -> NodeId {
    node_id ^ 1
}

/// Whether two nodes share a parent.
#[inline]
pub fn is_siblings(node_id: NodeId, other_node_id: NodeId) -> bool {
    node_id ^ other_node_id == 1
}

#[inline]
pub fn is_left_child(node_id: NodeId) -> bool {
    node_id & 1 == 0
}

#[inline]
pub fn is_right_child(node_id: NodeId) -> bool {
    node_id & 1 == 1
}

/// Node id of the 0-based leaf `leaf_id` in a tree of `capacity` leaves.
#[inline]
pub fn leaf_node_id(capacity: usize, leaf_id: usize) -> NodeId {
    capacity + leaf_id
}

#[inline]
pub fn is_leaf_node(capacity: usize, node_id: NodeId) -> bool {
    capacity <= node_id
}

/// Iterates `node_id, parent(node_id), ..., ROOT_NODE_ID`.
pub fn path_to_root(node_id: NodeId) -> PathToRoot {
    PathToRoot { next: node_id }
}

/// Iterator returned by `path_to_root`.
///
/// Cloning it restarts the walk from the current position.
#[derive(Clone, Debug)]
pub struct PathToRoot {
    next: NodeId,
}

impl Iterator for PathToRoot {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.next == 0 {
            return None;
        }
        let node_id = self.next;
        self.next = parent(node_id);
        Some(node_id)
    }
}

/// The nodes needed to update or verify `node_id`:
/// `[n, sibling(n), parent(n), sibling(parent(n)), ..., root]`.
///
/// Even positions hold the path to the root, odd positions the sibling of
/// the node before them. Node caches interpret update paths positionally,
/// so this order is part of their contract.
pub fn node_update_path(node_id: NodeId) -> Vec<NodeId> {
    let mut node_ids = Vec::new();
    for path_node_id in path_to_root(node_id) {
        node_ids.push(path_node_id);
        if path_node_id != ROOT_NODE_ID {
            node_ids.push(sibling(path_node_id));
        }
    }
    node_ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_count_rounding() {
        assert_eq!(full_tree_leaf_count(0), 2);
        assert_eq!(full_tree_leaf_count(1), 2);
        assert_eq!(full_tree_leaf_count(2), 2);
        assert_eq!(full_tree_leaf_count(3), 4);
        assert_eq!(full_tree_leaf_count(1000), 1024);
        assert_eq!(full_tree_leaf_count(1024), 1024);
        assert_eq!(full_tree_leaf_count(1025), 2048);
        assert_eq!(full_tree_node_count(1), 3);
        assert_eq!(full_tree_node_count(1000), 2047);
    }

    #[test]
    fn arithmetic_roundtrip() {
        for n in 2..4096 {
            assert_eq!(parent(left_child(n)), n);
            assert_eq!(parent(right_child(n)), n);
            assert_eq!(sibling(sibling(n)), n);
            assert!(is_siblings(n, sibling(n)));
            assert!(!is_siblings(n, n));
            assert_ne!(is_left_child(n), is_right_child(n));
            assert!(is_left_child(left_child(n)));
            assert!(is_right_child(right_child(n)));
        }
        assert!(!is_siblings(3, 4));
    }

    #[test]
    fn leaves() {
        assert_eq!(leaf_node_id(1024, 0), 1024);
        assert_eq!(leaf_node_id(1024, 5), 1029);
        assert!(is_leaf_node(1024, 1024));
        assert!(is_leaf_node(1024, 2047));
        assert!(!is_leaf_node(1024, 1023));
    }

    #[test]
    fn path_visits_ancestors() {
        let path: Vec<_> = path_to_root(13).collect();
        assert_eq!(path, vec![13, 6, 3, 1]);
        assert_eq!(path_to_root(1).collect::<Vec<_>>(), vec![1]);

        let mut walk = path_to_root(13);
        walk.next();
        let restarted = walk.clone();
        assert_eq!(walk.collect::<Vec<_>>(), restarted.collect::<Vec<_>>());
    }

    #[test]
    fn update_path_interleaves_siblings() {
        assert_eq!(node_update_path(13), vec![13, 12, 6, 7, 3, 2, 1]);
        assert_eq!(node_update_path(4), vec![4, 5, 2, 3, 1]);
        assert_eq!(node_update_path(1), vec![1]);
        for node_id in 2..64 {
            let path = node_update_path(node_id);
            assert_eq!(path.len() % 2, 1);
            assert_eq!(*path.last().unwrap(), ROOT_NODE_ID);
            for level in path.chunks(2).filter(|level| level.len() == 2) {
                assert!(is_siblings(level[0], level[1]));
            }
        }
    }
}
