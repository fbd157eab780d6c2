//! Hierarchical namespace of versioned nodes.
mod data_tree;
mod node;
pub mod path;

pub use data_tree::*;
pub use node::*;
