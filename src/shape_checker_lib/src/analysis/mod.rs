//! Modules necessary for graph-based and fixpoint-based analyses,
//! as well as the shape analysis built on top of them.

pub mod abstraction;
pub mod fixpoint;
pub mod graph;
pub mod shape_analysis;
pub mod symbolic_heap;
