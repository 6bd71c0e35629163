//! Node factories.
//!
//! Every factory returns a plain [`GraphNode`] record; behavior is keyed off
//! [`NodeKind`] and the configured strategies.

use crate::dsl::{
    BinaryOperator, GraphDataType, GraphNode, NodeConfig, NodeInput, NodeKind, NodeOutput, NodeProperty,
    ShaderStage, UniformData,
};
use crate::dsl::GraphDataType::{Number, Rgb, Sampler2D, Vector2};
use crate::strategy::Strategy;

/// Hole the fragment output node's `color` input fills.
pub const FRAGMENT_OUTPUT_VAR: &str = "frogFragOut";
pub const VERTEX_OUTPUT_VAR: &str = "gl_Position";

const FRAGMENT_OUTPUT_SOURCE: &str = "#version 300 es
precision highp float;

out vec4 frogFragOut;
void main() {
  frogFragOut = vec4(1.0);
}
";

const VERTEX_OUTPUT_SOURCE: &str = "#version 300 es
precision highp float;

void main() {
  gl_Position = vec4(1.0);
}
";

fn out_port(data_type: Option<GraphDataType>) -> Vec<NodeOutput> {
    vec![NodeOutput {
        name: "out".to_string(),
        data_type,
    }]
}

fn node(id: &str, name: &str, kind: NodeKind, stage: Option<ShaderStage>, config: NodeConfig) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        name: name.to_string(),
        kind,
        stage,
        config,
        source: String::new(),
        inputs: Vec::new(),
        outputs: out_port(None),
        next_stage_node_id: None,
    }
}

pub fn source_node(
    id: &str,
    name: &str,
    config: NodeConfig,
    source: impl Into<String>,
    stage: ShaderStage,
) -> GraphNode {
    GraphNode {
        source: source.into(),
        ..node(id, name, NodeKind::Source, Some(stage), config)
    }
}

pub fn output_node(id: &str, name: &str, stage: ShaderStage) -> GraphNode {
    let (target, input, source) = match stage {
        ShaderStage::Fragment => (FRAGMENT_OUTPUT_VAR, "color", FRAGMENT_OUTPUT_SOURCE),
        ShaderStage::Vertex => (VERTEX_OUTPUT_VAR, "position", VERTEX_OUTPUT_SOURCE),
    };
    GraphNode {
        source: source.to_string(),
        inputs: vec![
            NodeInput::new(input)
                .with_filler(target)
                .with_type(GraphDataType::Vector4),
        ],
        outputs: Vec::new(),
        ..node(
            id,
            name,
            NodeKind::Output,
            Some(stage),
            NodeConfig {
                strategies: vec![Strategy::assignment_to(target)],
                ..NodeConfig::default()
            },
        )
    }
}

/// Expression-only node whose identifiers are all holes.
pub fn expression_node(id: &str, name: &str, source: impl Into<String>) -> GraphNode {
    GraphNode {
        source: source.into(),
        ..node(
            id,
            name,
            NodeKind::Expression,
            None,
            NodeConfig {
                strategies: vec![Strategy::Variable],
                ..NodeConfig::default()
            },
        )
    }
}

/// Bi-stage `a <op> b` node. The compiler widens the operand list to the
/// node's inbound input names.
pub fn binary_node(id: &str, name: &str, operator: BinaryOperator) -> GraphNode {
    GraphNode {
        source: binary_expression(operator, &["a", "b"]),
        inputs: vec![NodeInput::new("a"), NodeInput::new("b")],
        ..node(
            id,
            name,
            NodeKind::Binary { operator },
            None,
            NodeConfig {
                strategies: vec![Strategy::Variable],
                ..NodeConfig::default()
            },
        )
    }
}

pub fn add_node(id: &str) -> GraphNode {
    binary_node(id, "Add", BinaryOperator::Add)
}

pub fn multiply_node(id: &str) -> GraphNode {
    binary_node(id, "Multiply", BinaryOperator::Multiply)
}

pub fn binary_expression<S: AsRef<str>>(operator: BinaryOperator, operands: &[S]) -> String {
    let parts: Vec<&str> = operands.iter().map(AsRef::as_ref).collect();
    parts.join(&format!(" {} ", operator.symbol()))
}

pub fn property(
    display_name: &str,
    property: &str,
    data_type: GraphDataType,
    filler_name: Option<&str>,
) -> NodeProperty {
    NodeProperty {
        display_name: display_name.to_string(),
        property: property.to_string(),
        data_type,
        filler_name: filler_name.map(str::to_string),
    }
}

/// Give every wireable material property an input that maps onto its hole.
pub fn prepopulate_property_inputs(mut node: GraphNode) -> GraphNode {
    for prop in &node.config.properties {
        let Some(filler) = &prop.filler_name else {
            continue;
        };
        if node.inputs.iter().any(|i| i.name == prop.property) {
            continue;
        }
        let mut input = NodeInput::new(prop.property.clone())
            .with_filler(filler.clone())
            .with_type(prop.data_type);
        input.property = Some(prop.property.clone());
        node.inputs.push(input);
    }
    node
}

fn material_strategies(stage: ShaderStage) -> Vec<Strategy> {
    vec![
        Strategy::Uniform,
        match stage {
            ShaderStage::Fragment => Strategy::Texture2D,
            ShaderStage::Vertex => Strategy::named_attribute("position"),
        },
    ]
}

fn material_node(
    id: &str,
    name: &str,
    kind: NodeKind,
    stage: ShaderStage,
    source: String,
    uniforms: Vec<UniformData>,
    properties: Vec<NodeProperty>,
) -> GraphNode {
    prepopulate_property_inputs(GraphNode {
        source,
        ..node(
            id,
            name,
            kind,
            Some(stage),
            NodeConfig {
                version: 3,
                preprocess: true,
                strategies: material_strategies(stage),
                uniforms,
                properties,
            },
        )
    })
}

pub fn phong_node(id: &str, name: &str, stage: ShaderStage, source: impl Into<String>) -> GraphNode {
    let properties = vec![
        property("Color", "color", Rgb, Some("diffuse")),
        property("Emissive", "emissive", Rgb, Some("emissive")),
        property("Emissive Map", "emissiveMap", Sampler2D, Some("emissiveMap")),
        property("Emissive Intensity", "emissiveIntensity", Number, Some("emissive")),
        property("Texture", "map", Sampler2D, Some("map")),
        property("Normal Map", "normalMap", Sampler2D, Some("normalMap")),
        property("Normal Scale", "normalScale", Vector2, None),
        property("Shininess", "shininess", Number, None),
        property("Reflectivity", "reflectivity", Number, None),
        property("Refraction Ratio", "refractionRatio", Number, None),
        property("Specular", "specular", Rgb, Some("specular")),
        property("Specular Map", "specularMap", Sampler2D, Some("specularMap")),
        property("Displacement Map", "displacementMap", Sampler2D, None),
        property("Env Map", "envMap", Sampler2D, None),
    ];
    material_node(id, name, NodeKind::Phong, stage, source.into(), Vec::new(), properties)
}

pub fn physical_node(
    id: &str,
    name: &str,
    stage: ShaderStage,
    source: impl Into<String>,
    uniforms: Vec<UniformData>,
) -> GraphNode {
    let properties = vec![
        property("Color", "color", Rgb, Some("diffuse")),
        property("Texture", "map", Sampler2D, Some("map")),
        property("Normal Map", "normalMap", Sampler2D, Some("normalMap")),
        property("Normal Scale", "normalScale", Vector2, None),
        property("Metalness", "metalness", Number, None),
        property("Roughness", "roughness", Number, None),
        property("Roughness Map", "roughnessMap", Sampler2D, Some("roughnessMap")),
        property("Displacement Map", "displacementMap", Sampler2D, None),
        property("Env Map", "envMap", Sampler2D, None),
        property("Transmission", "transmission", Number, None),
        property("Transmission Map", "transmissionMap", Sampler2D, Some("transmissionMap")),
        property("Thickness", "thickness", Number, None),
        property("Index of Refraction", "ior", Number, None),
        property("Sheen", "sheen", Number, None),
        property("Reflectivity", "reflectivity", Number, None),
        property("Clearcoat", "clearcoat", Number, None),
    ];
    material_node(id, name, NodeKind::Physical, stage, source.into(), uniforms, properties)
}

pub fn toon_node(
    id: &str,
    name: &str,
    stage: ShaderStage,
    source: impl Into<String>,
    uniforms: Vec<UniformData>,
) -> GraphNode {
    let properties = vec![
        property("Color", "color", Rgb, Some("diffuse")),
        property("Texture", "map", Sampler2D, Some("map")),
        property("Gradient Map", "gradientMap", Sampler2D, Some("gradientMap")),
        property("Normal Map", "normalMap", Sampler2D, Some("normalMap")),
        property("Normal Scale", "normalScale", Vector2, None),
        property("Displacement Map", "displacementMap", Sampler2D, None),
        property("Env Map", "envMap", Sampler2D, None),
    ];
    material_node(id, name, NodeKind::Toon, stage, source.into(), uniforms, properties)
}

/// Constant float node. `value` is GLSL literal text such as `0.5`.
pub fn number_node(id: &str, name: &str, value: impl Into<String>) -> GraphNode {
    GraphNode {
        outputs: out_port(Some(Number)),
        ..node(
            id,
            name,
            NodeKind::Number { value: value.into() },
            None,
            NodeConfig::default(),
        )
    }
}

/// Constant `vecN` node with 2 to 4 components.
pub fn vector_node(id: &str, name: &str, value: &[&str]) -> GraphNode {
    let data_type = match value.len() {
        2 => GraphDataType::Vector2,
        3 => GraphDataType::Vector3,
        _ => GraphDataType::Vector4,
    };
    GraphNode {
        outputs: out_port(Some(data_type)),
        ..node(
            id,
            name,
            NodeKind::Vector {
                value: value.iter().map(|v| v.to_string()).collect(),
            },
            None,
            NodeConfig::default(),
        )
    }
}

/// GLSL float literal for a number node value (`1` -> `1.0`).
pub fn float_literal(value: &str) -> String {
    let value = value.trim();
    let is_integer = !value.is_empty() && value.trim_start_matches('-').bytes().all(|b| b.is_ascii_digit());
    if is_integer {
        format!("{value}.0")
    } else {
        value.to_string()
    }
}

/// Filler text of a data node: the literal it stands for.
pub fn data_node_expression(kind: &NodeKind) -> Option<String> {
    match kind {
        NodeKind::Number { value } => Some(float_literal(value)),
        NodeKind::Vector { value } => {
            let parts: Vec<String> = value.iter().map(|v| float_literal(v)).collect();
            Some(format!("vec{}({})", value.len(), parts.join(", ")))
        }
        _ => None,
    }
}
