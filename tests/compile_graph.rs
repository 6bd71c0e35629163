use std::path::PathBuf;

use shader_graph_compiler::ast::{generate, parse_program};
use shader_graph_compiler::dsl::{self, NodeConfig};
use shader_graph_compiler::nodes::{add_node, expression_node, number_node, output_node, source_node};
use shader_graph_compiler::strategy::Strategy;
use shader_graph_compiler::validation::validate_glsl;
use shader_graph_compiler::{
    CompileContext, CompileError, CompileResult, Diagnostic, Edge, EngineConfig, Graph, MergeOptions, ShaderStage,
    compile_graph,
};

fn squash(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

fn compile(graph: &Graph) -> CompileResult {
    compile_graph(&mut CompileContext::new(), &EngineConfig::default(), graph).expect("compile graph")
}

fn fragment(result: &CompileResult) -> String {
    squash(&result.fragment_source(&MergeOptions::default()))
}

fn frag_edge(from: &str, to: &str, input: &str) -> Edge {
    Edge::new(from, to, "out", input, ShaderStage::Fragment)
}

fn color_source(id: &str, body: &str) -> shader_graph_compiler::GraphNode {
    source_node(
        id,
        id,
        NodeConfig::default(),
        format!("out vec4 color;\n{body}"),
        ShaderStage::Fragment,
    )
}

#[test]
fn expression_fills_fragment_output() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            expression_node("e", "Expr", "vec4(2.0)"),
        ],
        vec![frag_edge("e", "out", "color")],
    );
    let result = compile(&graph);
    let fs = fragment(&result);
    assert!(fs.contains("frogFragOut=vec4(2.)"), "{fs}");
    assert!(!fs.contains("vec4(1.)"), "{fs}");
    assert!(result.diagnostics.iter().all(|d| !matches!(d, Diagnostic::UnresolvedInput { .. })));
}

#[test]
fn two_sources_through_add_share_one_version() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            color_source("x", "void main() {\n    color = vec4(1.0, 0.0, 0.0, 1.0);\n}\n"),
            color_source("y", "void main() {\n    color = vec4(0.0, 0.0, 1.0, 1.0);\n}\n"),
            add_node("add"),
        ],
        vec![
            frag_edge("x", "add", "a"),
            frag_edge("y", "add", "b"),
            frag_edge("add", "out", "color"),
        ],
    );
    let result = compile(&graph);
    let text = result.fragment_source(&MergeOptions::default());
    assert_eq!(text.matches("#version").count(), 1, "{text}");

    let fs = squash(&text);
    assert!(fs.contains("vec4main_x()"), "{fs}");
    assert!(fs.contains("vec4main_y()"), "{fs}");
    assert!(fs.contains("frogFragOut=(main_x())+(main_y())"), "{fs}");
    let x = fs.find("vec4main_x()").unwrap();
    let out = fs.find("voidmain()").unwrap();
    assert!(x < out, "{fs}");
}

#[test]
fn same_sampler_texture_calls_fill_independently() {
    let tex = source_node(
        "tex",
        "Texture",
        NodeConfig {
            strategies: vec![Strategy::Texture2D],
            ..NodeConfig::default()
        },
        "uniform sampler2D map;\nin vec2 vUv;\nout vec4 color;\nvoid main() {\n    color = texture(map, vUv) * texture(map, vUv * 2.0);\n}\n",
        ShaderStage::Fragment,
    );
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            tex,
            expression_node("first", "First", "vec4(0.25)"),
            expression_node("second", "Second", "vec4(0.75)"),
        ],
        vec![
            frag_edge("first", "tex", "map_0"),
            frag_edge("second", "tex", "map_1"),
            frag_edge("tex", "out", "color"),
        ],
    );
    let fs = fragment(&compile(&graph));
    assert!(!fs.contains("texture("), "{fs}");
    let first = fs.find("vec4(0.25)").unwrap();
    let second = fs.find("vec4(0.75)").unwrap();
    assert!(first < second, "{fs}");
    assert!(fs.contains("invec2vUv;"), "{fs}");
}

#[test]
fn nodes_declaring_the_same_names_stay_distinct() {
    let body = "float brightness = 0.5;\nvec4 shade(vec4 c) {\n    return c * brightness;\n}\nvoid main() {\n    color = shade(vec4(1.0));\n}\n";
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            color_source("s1", body),
            color_source("s2", body),
            add_node("add"),
        ],
        vec![
            frag_edge("s1", "add", "a"),
            frag_edge("s2", "add", "b"),
            frag_edge("add", "out", "color"),
        ],
    );
    let fs = fragment(&compile(&graph));
    assert!(fs.contains("floatbrightness_s1=0.5;"), "{fs}");
    assert!(fs.contains("floatbrightness_s2=0.5;"), "{fs}");
    assert!(fs.contains("vec4shade_s1(vec4c)"), "{fs}");
    assert!(fs.contains("vec4shade_s2(vec4c)"), "{fs}");
    assert!(fs.contains("(c)*(brightness_s2)"), "{fs}");
    assert!(!fs.contains("floatbrightness="), "{fs}");
}

#[test]
fn nodes_declaring_different_structs_stay_distinct() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            color_source(
                "s1",
                "struct Light { float power; };\nvoid main() {\n    Light l = Light(0.5);\n    color = vec4(l.power);\n}\n",
            ),
            color_source(
                "s2",
                "struct Light { vec3 tint; };\nvoid main() {\n    Light l = Light(vec3(0.25));\n    color = vec4(l.tint, 1.0);\n}\n",
            ),
            add_node("add"),
        ],
        vec![
            frag_edge("s1", "add", "a"),
            frag_edge("s2", "add", "b"),
            frag_edge("add", "out", "color"),
        ],
    );
    let fs = fragment(&compile(&graph));
    assert!(fs.contains("structLight_s1{floatpower;}"), "{fs}");
    assert!(fs.contains("structLight_s2{vec3tint;}"), "{fs}");
    assert!(fs.contains("Light_s1l=Light_s1(0.5)"), "{fs}");
    assert!(fs.contains("Light_s2l=Light_s2(vec3(0.25))"), "{fs}");
}

#[test]
fn second_producer_for_an_input_is_reported_and_dropped() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            expression_node("a", "A", "vec4(2.0)"),
            expression_node("b", "B", "vec4(3.0)"),
        ],
        vec![frag_edge("a", "out", "color"), frag_edge("b", "out", "color")],
    );
    let result = compile(&graph);
    let fs = fragment(&result);
    assert!(fs.contains("frogFragOut=vec4(2.)"), "{fs}");
    assert!(!fs.contains("vec4(3.)"), "{fs}");

    let dup: Vec<&Diagnostic> = result.diagnostics_for("out").collect();
    assert_eq!(
        dup,
        vec![&Diagnostic::DuplicateProducer {
            node_id: "out".into(),
            stage: ShaderStage::Fragment,
            input: "color".into(),
            kept_from: "a".into(),
            dropped_from: "b".into(),
        }]
    );
}

#[test]
fn unknown_input_is_reported() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            expression_node("e", "E", "vec4(2.0)"),
        ],
        vec![frag_edge("e", "out", "nope")],
    );
    let result = compile(&graph);
    assert!(result.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::UnresolvedInput { node_id, input, .. } if node_id == "out" && input == "nope"
    )));
    assert!(fragment(&result).contains("frogFragOut=vec4(1.)"));
}

#[test]
fn output_alone_round_trips_its_source() {
    let out = output_node("out", "Output", ShaderStage::Fragment);
    let expected = squash(&generate(&parse_program(&out.source).unwrap()));
    let result = compile(&Graph::new(vec![out], Vec::new()));
    assert_eq!(fragment(&result), expected);
    assert!(result.vertex.is_empty());
    assert!(
        result
            .diagnostics
            .contains(&Diagnostic::MissingOutput { stage: ShaderStage::Vertex })
    );
}

#[test]
fn bi_stage_nodes_follow_their_edges() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            output_node("vout", "Output", ShaderStage::Vertex),
            add_node("add"),
            number_node("one", "One", "1"),
            number_node("two", "Two", "2"),
        ],
        vec![
            Edge::new("one", "add", "out", "a", ShaderStage::Vertex),
            Edge::new("two", "add", "out", "b", ShaderStage::Vertex),
            Edge::new("add", "vout", "out", "position", ShaderStage::Vertex),
        ],
    );
    assert_eq!(graph.resolved_stage("add"), Some(ShaderStage::Vertex));
    assert_eq!(graph.resolved_stage("out"), Some(ShaderStage::Fragment));

    let result = compile(&graph);
    let vs = squash(&result.vertex_source(&MergeOptions::default()));
    assert!(vs.contains("gl_Position=(1.)+(2.)"), "{vs}");
    assert!(fragment(&result).contains("frogFragOut=vec4(1.)"));
    assert_eq!(result.active_node_ids, vec!["out", "vout", "add", "one", "two"]);
}

#[test]
fn edge_into_the_wrong_stage_is_ignored() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            output_node("vout", "Output", ShaderStage::Vertex),
            color_source("f", "void main() {\n    color = vec4(1.0);\n}\n"),
        ],
        vec![Edge::new("f", "vout", "out", "position", ShaderStage::Vertex)],
    );
    let result = compile(&graph);
    assert!(result.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::StageMismatch { node_id, from, .. } if node_id == "vout" && from == "f"
    )));
    let vs = squash(&result.vertex_source(&MergeOptions::default()));
    assert!(vs.contains("gl_Position=vec4(1.)"), "{vs}");
    assert!(!vs.contains("main_f"), "{vs}");
}

#[test]
fn cycles_are_rejected() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            add_node("p"),
            add_node("q"),
        ],
        vec![
            frag_edge("p", "q", "a"),
            frag_edge("q", "p", "a"),
            frag_edge("q", "out", "color"),
        ],
    );
    let err = compile_graph(&mut CompileContext::new(), &EngineConfig::default(), &graph).unwrap_err();
    assert_eq!(err, CompileError::Cycle { stage: ShaderStage::Fragment });
}

#[test]
fn preserved_names_are_not_mangled() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            color_source(
                "s",
                "uniform float time;\nvoid main() {\n    color = vec4(sin(time));\n}\n",
            ),
        ],
        vec![frag_edge("s", "out", "color")],
    );
    let engine = EngineConfig::new("test").with_preserved(["time"]);
    let result = compile_graph(&mut CompileContext::new(), &engine, &graph).unwrap();
    let fs = fragment(&result);
    assert!(fs.contains("uniformfloattime;"), "{fs}");
    assert!(fs.contains("sin(time)"), "{fs}");
}

#[test]
fn concurrent_compiles_agree() {
    let graph = Graph::new(
        vec![
            output_node("out", "Output", ShaderStage::Fragment),
            color_source("x", "void main() {\n    color = vec4(0.5);\n}\n"),
            expression_node("e", "E", "vec4(0.25)"),
            add_node("add"),
        ],
        vec![
            frag_edge("x", "add", "a"),
            frag_edge("e", "add", "b"),
            frag_edge("add", "out", "color"),
        ],
    );
    let engine = &EngineConfig::default();
    let graph = &graph;
    let expected = compile(graph);

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(move || {
                    let mut ctx = CompileContext::new();
                    compile_graph(&mut ctx, engine, graph).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

#[test]
fn desktop_output_program_validates_with_naga() {
    let mut out = output_node("out", "Output", ShaderStage::Fragment);
    out.source = "#version 450\nlayout(location = 0) out vec4 frogFragOut;\nvoid main() {\n    frogFragOut = vec4(1.0);\n}\n".to_string();
    let graph = Graph::new(
        vec![
            out,
            color_source(
                "glow",
                "const float strength = 0.5;\nvoid main() {\n    color = vec4(strength, 0.25, 0.0, 1.0);\n}\n",
            ),
        ],
        vec![frag_edge("glow", "out", "color")],
    );
    let result = compile(&graph);
    let source = result.fragment_source(&MergeOptions::default());
    let module = validate_glsl(&source, ShaderStage::Fragment).unwrap_or_else(|e| panic!("{e:#}"));
    assert_eq!(module.entry_points.len(), 1);
}

#[test]
fn json_case_compiles() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("cases")
        .join("tinted_multiply.json");
    let graph = dsl::load_graph_from_path(&path).expect("load graph case");
    assert_eq!(graph.nodes.len(), 5);

    let result = compile(&graph);
    let fs = fragment(&result);
    assert!(fs.contains("vec4(vec3(1.,0.,0.),1.)"), "{fs}");
    assert!(!fs.contains("uniformvec3tint"), "{fs}");
    assert!(fs.contains("frogFragOut=(main_tint())*(0.5)"), "{fs}");
    assert!(result.vertex.is_empty());

    let saved = dsl::save_graph_to_string(&graph).unwrap();
    assert_eq!(dsl::load_graph_from_str(&saved).unwrap(), graph);
}
