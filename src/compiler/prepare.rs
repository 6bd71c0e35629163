use glsl::syntax::TranslationUnit;

use crate::ast::mangle::{mangle_program, mangle_suffix};
use crate::ast::transform::{convert_out_main_to_return, return_gl_position, upgrade_stage_linkage};
use crate::ast::{NodeAst, make_expression, parse_program};
use crate::dsl::{GraphNode, NodeKind, ShaderStage};
use crate::engine::EngineConfig;
use crate::error::AstError;
use crate::nodes::{binary_expression, data_node_expression};
use crate::preprocess::preprocess;
use crate::strategy::{InputMap, find_inputs};

/// A node's prepared AST and the holes discovered in it, for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeContext {
    pub ast: NodeAst,
    pub inputs: InputMap,
    /// Inputs a later strategy re-discovered.
    pub overridden: Vec<String>,
    pub suffix: String,
}

const ENTRY_POINT: &str = "main";

/// Binary node text for the given inbound operands. Up to two operands the
/// node's own expression is used.
pub fn binary_source(node: &GraphNode, operands: &[String]) -> String {
    let NodeKind::Binary { operator } = &node.kind else {
        return node.source.clone();
    };
    if operands.len() > 2 {
        binary_expression(*operator, operands)
    } else if node.source.trim().is_empty() {
        binary_expression(*operator, &["a", "b"])
    } else {
        node.source.clone()
    }
}

fn expression_text(source: &str) -> &str {
    source.trim().trim_end_matches(';').trim_end()
}

fn prepare_program(
    engine: &EngineConfig,
    node: &GraphNode,
    stage: ShaderStage,
    suffix: &str,
) -> Result<TranslationUnit, AstError> {
    let text = if node.config.preprocess {
        preprocess(&node.source, &engine.defines)?
    } else {
        node.source.clone()
    };
    let mut tu = parse_program(&text)?;
    if node.config.version == 2 {
        upgrade_stage_linkage(&mut tu, stage)?;
    }
    if node.is_output() {
        return Ok(tu);
    }
    match stage {
        ShaderStage::Fragment => convert_out_main_to_return(ENTRY_POINT, &mut tu)?,
        ShaderStage::Vertex => return_gl_position(ENTRY_POINT, &mut tu)?,
    }
    mangle_program(&mut tu, suffix, &engine.preserve);
    Ok(tu)
}

/// Parse and prepare a node for `stage`, then run its strategies.
pub fn prepare_node(
    engine: &EngineConfig,
    node: &GraphNode,
    stage: ShaderStage,
    operands: &[String],
) -> Result<NodeContext, AstError> {
    let suffix = mangle_suffix(&node.id);
    let ast = match &node.kind {
        NodeKind::Binary { .. } => NodeAst::Expression(make_expression(&binary_source(node, operands))?),
        NodeKind::Number { .. } | NodeKind::Vector { .. } => {
            let text = data_node_expression(&node.kind).unwrap_or_default();
            NodeAst::Expression(make_expression(&text)?)
        }
        NodeKind::Expression => NodeAst::Expression(make_expression(expression_text(&node.source))?),
        NodeKind::Source | NodeKind::Output | NodeKind::Phong | NodeKind::Physical | NodeKind::Toon => {
            NodeAst::Program(prepare_program(engine, node, stage, &suffix)?)
        }
    };
    let (inputs, overridden) = find_inputs(&ast, &node.config.strategies, &suffix);
    Ok(NodeContext {
        ast,
        inputs,
        overridden,
        suffix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::NodeConfig;
    use crate::nodes::{add_node, number_node, output_node, source_node};
    use crate::strategy::{HoleLocation, Strategy};

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn fragment_source_becomes_mangled_function() {
        let node = source_node(
            "7",
            "Tint",
            NodeConfig {
                strategies: vec![Strategy::Uniform],
                ..NodeConfig::default()
            },
            "uniform vec3 tint;\nout vec4 color;\nvoid main() {\n    color = vec4(tint, 1.0);\n}\n",
            ShaderStage::Fragment,
        );
        let ctx = prepare_node(&EngineConfig::default(), &node, ShaderStage::Fragment, &[]).unwrap();
        let out = squash(&ctx.ast.generate());
        assert!(out.contains("vec4main_7()"), "{out}");
        assert!(out.contains("uniformvec3tint_7;"), "{out}");
        assert!(!out.contains("outvec4color"), "{out}");
        assert_eq!(
            ctx.inputs["tint"],
            HoleLocation::Uniform {
                name: "tint_7".into()
            }
        );
    }

    #[test]
    fn legacy_vertex_source_is_upgraded() {
        let node = source_node(
            "v",
            "Vert",
            NodeConfig {
                version: 2,
                ..NodeConfig::default()
            },
            "attribute vec3 position;\nvarying vec3 vPos;\nvoid main() {\n    vPos = position;\n    gl_Position = vec4(position, 1.0);\n}\n",
            ShaderStage::Vertex,
        );
        let ctx = prepare_node(&EngineConfig::default(), &node, ShaderStage::Vertex, &[]).unwrap();
        let out = squash(&ctx.ast.generate());
        assert!(out.contains("invec3position;"), "{out}");
        assert!(out.contains("outvec3vPos;"), "{out}");
        assert!(out.contains("vec4main_v()"), "{out}");
    }

    #[test]
    fn preprocess_flag_runs_with_engine_defines() {
        let mut node = output_node("o", "Output", ShaderStage::Fragment);
        node.config.preprocess = true;
        node.source = "#version 300 es\nprecision highp float;\nout vec4 frogFragOut;\nvoid main() {\n#ifdef BRIGHT\n    frogFragOut = vec4(2.0);\n#else\n    frogFragOut = vec4(1.0);\n#endif\n}\n".to_string();
        let engine = EngineConfig::new("test").with_define("BRIGHT", "1");
        let ctx = prepare_node(&engine, &node, ShaderStage::Fragment, &[]).unwrap();
        let out = squash(&ctx.ast.generate());
        assert!(out.contains("frogFragOut=vec4(2.)"), "{out}");
        assert!(!out.contains("vec4(1.)"), "{out}");
    }

    #[test]
    fn binary_operands_widen_past_two() {
        let node = add_node("add");
        let ops = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(binary_source(&node, &ops), "a + b + c");
        assert_eq!(binary_source(&node, &ops[..1]), "a + b");
        let ctx = prepare_node(&EngineConfig::default(), &node, ShaderStage::Fragment, &ops).unwrap();
        assert_eq!(ctx.inputs.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn data_nodes_have_no_holes() {
        let ctx = prepare_node(&EngineConfig::default(), &number_node("n", "N", "3"), ShaderStage::Fragment, &[]).unwrap();
        assert!(ctx.inputs.is_empty());
        assert_eq!(ctx.ast.generate(), "3.");
    }

    #[test]
    fn missing_main_is_reported() {
        let node = source_node(
            "s",
            "Broken",
            NodeConfig::default(),
            "out vec4 color;\nvoid entry() {\n    color = vec4(1.0);\n}\n",
            ShaderStage::Fragment,
        );
        let err = prepare_node(&EngineConfig::default(), &node, ShaderStage::Fragment, &[]).unwrap_err();
        assert_eq!(err, AstError::MissingFunction { name: "main".into() });
    }
}
