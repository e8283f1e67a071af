#![forbid(unsafe_code)]

pub mod feature_tree;
pub mod kdtree;

pub use feature_tree::FeatureKdTree;
pub use kdtree::KdTree;
