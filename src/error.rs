//! Error and diagnostic types shared by the AST helpers and the graph compiler.

use serde::Serialize;

use crate::dsl::ShaderStage;

/// Failures raised while parsing or rewriting a single node's AST.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AstError {
    /// Malformed shader source or a synthesized snippet that failed to parse.
    #[error("failed to parse {kind} `{text}`: {message}")]
    Parse {
        kind: &'static str,
        text: String,
        message: String,
    },

    #[error("no `{name}` function found")]
    MissingFunction { name: String },

    #[error("no assignment to `{target}` found in `{function}`")]
    MissingAssignment { function: String, target: String },

    #[error("no `out vec4` declaration found in the fragment program")]
    MissingOutputDeclaration,

    #[error("preprocessor error on line {line}: {message}")]
    Preprocess { line: usize, message: String },
}

/// Fatal errors that abort a whole `compile_graph` call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    #[error("graph has more than one {stage} output node: {first} and {second}")]
    DuplicateOutput {
        stage: ShaderStage,
        first: String,
        second: String,
    },

    #[error("cycle detected among {stage} nodes (cannot topologically sort)")]
    Cycle { stage: ShaderStage },

    #[error("node {node_id} ({stage}): {source}")]
    Node {
        node_id: String,
        stage: ShaderStage,
        #[source]
        source: AstError,
    },

    #[error(
        "node {node_id} ({stage}) declares `{found}`, conflicting with `{existing}` from node {existing_node_id}"
    )]
    VersionConflict {
        node_id: String,
        stage: ShaderStage,
        existing: String,
        existing_node_id: String,
        found: String,
    },
}

impl CompileError {
    pub(crate) fn node(node_id: &str, stage: ShaderStage, source: AstError) -> Self {
        CompileError::Node {
            node_id: node_id.to_string(),
            stage,
            source,
        }
    }

    /// The node the error is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            CompileError::Node { node_id, .. } | CompileError::VersionConflict { node_id, .. } => {
                Some(node_id)
            }
            CompileError::DuplicateOutput { second, .. } => Some(second),
            CompileError::InvalidGraph(_) | CompileError::Cycle { .. } => None,
        }
    }
}

/// Recoverable problems. Compilation continues and the affected node is
/// flagged in the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Diagnostic {
    /// An edge targets an input that no strategy discovered. The hole keeps
    /// its placeholder.
    #[serde(rename_all = "camelCase")]
    UnresolvedInput {
        node_id: String,
        stage: ShaderStage,
        input: String,
        from: String,
    },

    /// More than one edge targets the same `(to, input)` pair. The first edge
    /// in edge order is kept.
    #[serde(rename_all = "camelCase")]
    DuplicateProducer {
        node_id: String,
        stage: ShaderStage,
        input: String,
        kept_from: String,
        dropped_from: String,
    },

    /// A later strategy replaced an input discovered by an earlier one.
    #[serde(rename_all = "camelCase")]
    InputOverride {
        node_id: String,
        stage: ShaderStage,
        input: String,
    },

    /// An edge connects nodes whose stages disagree. The edge is ignored.
    #[serde(rename_all = "camelCase")]
    StageMismatch {
        node_id: String,
        stage: ShaderStage,
        from: String,
        from_stage: Option<ShaderStage>,
        edge_stage: ShaderStage,
    },

    /// No output node exists for the stage; its sections stay empty.
    #[serde(rename_all = "camelCase")]
    MissingOutput { stage: ShaderStage },
}

impl Diagnostic {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Diagnostic::UnresolvedInput { node_id, .. }
            | Diagnostic::DuplicateProducer { node_id, .. }
            | Diagnostic::InputOverride { node_id, .. }
            | Diagnostic::StageMismatch { node_id, .. } => Some(node_id),
            Diagnostic::MissingOutput { .. } => None,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::UnresolvedInput {
                node_id,
                stage,
                input,
                from,
            } => write!(
                f,
                "node {node_id} ({stage}) has no input `{input}` (edge from {from})"
            ),
            Diagnostic::DuplicateProducer {
                node_id,
                stage,
                input,
                kept_from,
                dropped_from,
            } => write!(
                f,
                "node {node_id} ({stage}) input `{input}` has several producers; kept {kept_from}, dropped {dropped_from}"
            ),
            Diagnostic::InputOverride {
                node_id,
                stage,
                input,
            } => write!(
                f,
                "node {node_id} ({stage}) input `{input}` was discovered by more than one strategy; the last one wins"
            ),
            Diagnostic::StageMismatch {
                node_id,
                stage,
                from,
                from_stage,
                edge_stage,
            } => match from_stage {
                Some(from_stage) => write!(
                    f,
                    "edge {from} -> {node_id} ({edge_stage}) ignored: {from} is a {from_stage} node, compiling {stage}"
                ),
                None => write!(
                    f,
                    "edge {from} -> {node_id} ({edge_stage}) ignored while compiling {stage}"
                ),
            },
            Diagnostic::MissingOutput { stage } => write!(f, "graph has no {stage} output node"),
        }
    }
}
