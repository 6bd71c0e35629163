use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;

/// Pipeline phase a program (and most nodes) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Fragment, ShaderStage::Vertex];

    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<GraphNode>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check the structural invariants the compiler relies on: unique node
    /// ids and edges that only reference existing nodes.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut ids: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        for n in &self.nodes {
            if !ids.insert(n.id.as_str()) {
                return Err(format!("duplicate node id: {}", n.id));
            }
        }
        for e in &self.edges {
            if !ids.contains(e.from.as_str()) || !ids.contains(e.to.as_str()) {
                return Err(format!("edge references missing node: {} -> {}", e.from, e.to));
            }
        }
        Ok(())
    }

    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.to == node_id)
    }

    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Stage a node compiles in when it is looked at in isolation.
    ///
    /// Nodes with an explicit stage use it. Bi-stage nodes take the stage of
    /// their first inbound edge, then of their first outbound edge; a node
    /// with no edges at all has no stage.
    pub fn resolved_stage(&self, node_id: &str) -> Option<ShaderStage> {
        let node = self.node(node_id)?;
        if let Some(stage) = node.stage {
            return Some(stage);
        }
        self.incoming_edges(node_id)
            .next()
            .or_else(|| self.outgoing_edges(node_id).next())
            .map(|e| e.stage)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<ShaderStage>,
    #[serde(default)]
    pub config: NodeConfig,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub inputs: Vec<NodeInput>,
    #[serde(default)]
    pub outputs: Vec<NodeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_stage_node_id: Option<String>,
}

impl GraphNode {
    /// Expression-only nodes contribute a single spliceable expression and
    /// no program sections.
    pub fn expression_only(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Expression
                | NodeKind::Binary { .. }
                | NodeKind::Number { .. }
                | NodeKind::Vector { .. }
        )
    }

    pub fn is_output(&self) -> bool {
        matches!(self.kind, NodeKind::Output)
    }

    /// Pair this node with its counterpart in the other stage.
    pub fn with_next_stage_node(mut self, id: impl Into<String>) -> Self {
        self.next_stage_node_id = Some(id.into());
        self
    }

    /// Bi-stage nodes carry no stage of their own.
    pub fn bi_stage(&self) -> bool {
        self.stage.is_none()
    }

    /// The hole an edge input name maps to. Declared inputs may redirect to a
    /// differently named hole (`color` -> `frogFragOut`).
    pub fn hole_for_input<'a>(&'a self, input: &'a str) -> &'a str {
        self.inputs
            .iter()
            .find(|i| i.name == input)
            .and_then(|i| i.filler.as_deref())
            .unwrap_or(input)
    }
}

/// Closed set of node kinds. The `type` tag is shared with the persisted
/// graph format.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    Source,
    Expression,
    Binary { operator: BinaryOperator },
    Output,
    Phong,
    Physical,
    Toon,
    Number { value: String },
    Vector { value: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOperator {
    Add,
    Multiply,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Multiply => "*",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// GLSL generation the source is written in: 2 for legacy
    /// (`attribute`/`varying`/`gl_FragColor`), 3 for `in`/`out`.
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default)]
    pub preprocess: bool,
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub uniforms: Vec<UniformData>,
    #[serde(default)]
    pub properties: Vec<NodeProperty>,
}

fn default_version() -> u8 {
    3
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            preprocess: false,
            strategies: Vec::new(),
            uniforms: Vec::new(),
            properties: Vec::new(),
        }
    }
}

/// Data type tag carried by ports and uniform metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum GraphDataType {
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "vector2")]
    Vector2,
    #[serde(rename = "vector3")]
    Vector3,
    #[serde(rename = "vector4")]
    Vector4,
    #[serde(rename = "rgb")]
    Rgb,
    #[serde(rename = "rgba")]
    Rgba,
    #[serde(rename = "mat2")]
    Mat2,
    #[serde(rename = "mat3")]
    Mat3,
    #[serde(rename = "mat4")]
    Mat4,
    #[serde(rename = "mat2x3")]
    Mat2x3,
    #[serde(rename = "mat2x4")]
    Mat2x4,
    #[serde(rename = "mat3x2")]
    Mat3x2,
    #[serde(rename = "mat3x4")]
    Mat3x4,
    #[serde(rename = "mat4x2")]
    Mat4x2,
    #[serde(rename = "mat4x3")]
    Mat4x3,
    #[serde(rename = "sampler2D")]
    Sampler2D,
    #[serde(rename = "samplerCube")]
    SamplerCube,
    #[serde(rename = "array")]
    Array,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<GraphDataType>,
    /// Name of the discovered hole this input fills. Defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filler: Option<String>,
    /// Material property the input was generated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

impl NodeInput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
            filler: None,
            property: None,
        }
    }

    pub fn with_filler(mut self, filler: impl Into<String>) -> Self {
        self.filler = Some(filler.into());
        self
    }

    pub fn with_type(mut self, data_type: GraphDataType) -> Self {
        self.data_type = Some(data_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<GraphDataType>,
}

/// Uniform metadata declared by a node, consumed by the rendering layer when
/// it binds values.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UniformData {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: GraphDataType,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Material property exposed by engine preset nodes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProperty {
    pub display_name: String,
    pub property: String,
    #[serde(rename = "type")]
    pub data_type: GraphDataType,
    /// Hole the property is wired into, if it can be driven by the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filler_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub output: String,
    pub input: String,
    pub stage: ShaderStage,
}

impl Edge {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        output: impl Into<String>,
        input: impl Into<String>,
        stage: ShaderStage,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            output: output.into(),
            input: input.into(),
            stage,
        }
    }
}

pub fn find_node<'a>(nodes_by_id: &'a HashMap<&str, &'a GraphNode>, node_id: &str) -> Option<&'a GraphNode> {
    nodes_by_id.get(node_id).copied()
}

pub fn load_graph_from_str(text: &str) -> Result<Graph> {
    let graph: Graph = serde_json::from_str(text).context("failed to parse graph json")?;
    graph
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid graph json: {e}"))?;
    Ok(graph)
}

pub fn load_graph_from_path(path: impl AsRef<std::path::Path>) -> Result<Graph> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph json at {}", path.display()))?;
    load_graph_from_str(&text).with_context(|| format!("failed to load graph {}", path.display()))
}

pub fn save_graph_to_string(graph: &Graph) -> Result<String> {
    serde_json::to_string_pretty(graph).context("failed to serialize graph")
}
