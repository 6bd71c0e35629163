//! Shader graph compiler.
//!
//! Composes a graph of GLSL fragments into one fragment and one vertex
//! program by parsing each node, finding its fillable holes, splicing
//! upstream expressions into them and merging the per-node sections.

pub mod ast;
pub mod compiler;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod graph;
pub mod nodes;
pub mod preprocess;
pub mod sections;
pub mod strategy;
pub mod utils;
pub mod validation;

pub use compiler::{CompileContext, CompileResult, compile_graph, compute_all_contexts};
pub use dsl::{Edge, Graph, GraphNode, ShaderStage};
pub use engine::{EngineConfig, MergeOptions};
pub use error::{AstError, CompileError, Diagnostic};
