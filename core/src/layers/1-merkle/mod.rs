//! The layer of Merkle tree arithmetic and the authoritative hash tree.
//!
//! Trees are full binary trees numbered from 1: the root is node 1, node `n`
//! has children `2n` and `2n + 1`. A tree with capacity `c` (a power of two)
//! keeps its leaves at node ids `c..2c`, leaf `i` being node `c + i`.

mod hash_tree;
mod tree;

pub use self::hash_tree::HashTree;
pub use self::tree::{
    full_tree_leaf_count, full_tree_node_count, is_leaf_node, is_left_child, is_right_child,
    is_siblings, leaf_node_id, left_child, node_update_path, parent, path_to_root, right_child,
    sibling, NodeId, PathToRoot, ROOT_NODE_ID,
};
