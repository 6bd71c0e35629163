//! Graph compiler: Parse -> Discover -> Wire -> Merge, once per stage.

mod prepare;

pub use prepare::{NodeContext, binary_source, prepare_node};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glsl::syntax::{Expr, TranslationUnit};
use serde::Serialize;
use tracing::{debug, info_span, trace, warn};

use crate::ast::find::find_fn_mut;
use crate::ast::mangle::{mangle_name, mangle_suffix};
use crate::ast::{NodeAst, make_expression, make_fn_statement};
use crate::dsl::{Edge, Graph, GraphNode, NodeKind, ShaderStage, find_node};
use crate::engine::{EngineConfig, MergeOptions};
use crate::error::{AstError, CompileError, Diagnostic};
use crate::graph::{stage_edges, topo_sort, upstream_reachable};
use crate::sections::{ShaderSections, find_shader_sections};
use crate::strategy::{HoleLocation, apply_fills};
use crate::utils::fnv1a64;

struct CacheEntry {
    hash: u64,
    context: Arc<NodeContext>,
}

/// Prepared node contexts, keyed by `(node id, stage)` and checked against a
/// hash of everything that goes into preparing the node.
#[derive(Default)]
pub struct CompileContext {
    cache: HashMap<(String, ShaderStage), CacheEntry>,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_context(&self, node_id: &str, stage: ShaderStage) -> Option<Arc<NodeContext>> {
        self.cache
            .get(&(node_id.to_string(), stage))
            .map(|entry| entry.context.clone())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Drop cached contexts of nodes that are no longer in `graph`.
    pub fn retain_graph(&mut self, graph: &Graph) {
        let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        self.cache.retain(|(id, _), _| ids.contains(id.as_str()));
    }

    fn get_or_prepare(
        &mut self,
        engine: &EngineConfig,
        node: &GraphNode,
        stage: ShaderStage,
        operands: &[String],
    ) -> Result<Arc<NodeContext>, CompileError> {
        let hash = content_hash(engine, node, stage, operands);
        let key = (node.id.clone(), stage);
        if let Some(entry) = self.cache.get(&key) {
            if entry.hash == hash {
                trace!(node = %node.id, %stage, "node context cache hit");
                return Ok(entry.context.clone());
            }
        }
        let context = Arc::new(
            prepare_node(engine, node, stage, operands).map_err(|e| CompileError::node(&node.id, stage, e))?,
        );
        debug!(node = %node.id, %stage, inputs = context.inputs.len(), "prepared node context");
        self.cache.insert(
            key,
            CacheEntry {
                hash,
                context: context.clone(),
            },
        );
        Ok(context)
    }
}

fn content_hash(engine: &EngineConfig, node: &GraphNode, stage: ShaderStage, operands: &[String]) -> u64 {
    let payload = serde_json::json!({
        "source": node.source,
        "kind": node.kind,
        "config": node.config,
        "stage": stage,
        "operands": operands,
        "engine": engine.preparation_key(),
    });
    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    fnv1a64(&bytes)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileResult {
    pub fragment: ShaderSections,
    pub vertex: ShaderSections,
    /// Nodes compiled into at least one stage, in graph order.
    pub active_node_ids: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileResult {
    pub fn sections(&self, stage: ShaderStage) -> &ShaderSections {
        match stage {
            ShaderStage::Fragment => &self.fragment,
            ShaderStage::Vertex => &self.vertex,
        }
    }

    pub fn source(&self, stage: ShaderStage, options: &MergeOptions) -> String {
        self.sections(stage).to_source(options)
    }

    pub fn fragment_source(&self, options: &MergeOptions) -> String {
        self.source(ShaderStage::Fragment, options)
    }

    pub fn vertex_source(&self, options: &MergeOptions) -> String {
        self.source(ShaderStage::Vertex, options)
    }

    pub fn diagnostics_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.diagnostics.iter().filter(move |d| d.node_id() == Some(node_id))
    }
}

/// Per-stage summary the CLI prints alongside the program text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    pub stage: ShaderStage,
    pub version: Option<String>,
    pub io_names: Vec<String>,
    pub declarations: usize,
}

impl StageSummary {
    pub fn new(stage: ShaderStage, sections: &ShaderSections) -> Self {
        let mut io_names: Vec<String> = sections.declared_io_names.iter().cloned().collect();
        io_names.sort();
        Self {
            stage,
            version: sections.version.as_ref().map(|v| v.text.clone()),
            io_names,
            declarations: sections.program.len(),
        }
    }
}

fn report(diagnostics: &mut Vec<Diagnostic>, diagnostic: Diagnostic) {
    warn!(node = diagnostic.node_id().unwrap_or("-"), "{diagnostic}");
    diagnostics.push(diagnostic);
}

fn find_outputs(graph: &Graph) -> Result<HashMap<ShaderStage, &GraphNode>, CompileError> {
    let mut outputs: HashMap<ShaderStage, &GraphNode> = HashMap::new();
    for node in graph.nodes.iter().filter(|n| n.is_output()) {
        let Some(stage) = node.stage else {
            return Err(CompileError::InvalidGraph(format!(
                "output node {} has no stage",
                node.id
            )));
        };
        if let Some(first) = outputs.insert(stage, node) {
            return Err(CompileError::DuplicateOutput {
                stage,
                first: first.id.clone(),
                second: node.id.clone(),
            });
        }
    }
    Ok(outputs)
}

/// Inbound input names of a node, sorted and deduped. Binary nodes use them
/// as their operand list.
fn operand_names(edges: &[&Edge], node_id: &str) -> Vec<String> {
    let mut names: Vec<String> = edges
        .iter()
        .filter(|e| e.to == node_id)
        .map(|e| e.input.clone())
        .collect();
    names.sort();
    names.dedup();
    names
}

struct StagePlan<'g> {
    stage: ShaderStage,
    output: &'g GraphNode,
    edges: Vec<&'g Edge>,
    active: HashSet<String>,
    /// Full-program nodes compiled in only because their counterpart in the
    /// other stage is active.
    linked: Vec<&'g GraphNode>,
}

fn plan_stage<'g>(
    graph: &'g Graph,
    stage: ShaderStage,
    output: Option<&'g GraphNode>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<StagePlan<'g>> {
    let (edges, mismatched) = stage_edges(graph, stage);
    for e in mismatched {
        report(
            diagnostics,
            Diagnostic::StageMismatch {
                node_id: e.to.clone(),
                stage,
                from: e.from.clone(),
                from_stage: graph.node(&e.from).and_then(|n| n.stage),
                edge_stage: e.stage,
            },
        );
    }
    let Some(output) = output else {
        report(diagnostics, Diagnostic::MissingOutput { stage });
        return None;
    };
    let active = upstream_reachable(&edges, &output.id);
    Some(StagePlan {
        stage,
        output,
        edges,
        active,
        linked: Vec::new(),
    })
}

/// Nodes of `plan.stage` paired (either direction) with an active node of
/// the other stage.
fn linked_counterparts<'g>(graph: &'g Graph, plan: &StagePlan<'g>, other_active: &HashSet<String>) -> Vec<&'g GraphNode> {
    graph
        .nodes
        .iter()
        .filter(|n| n.stage == Some(plan.stage) && !n.is_output() && !n.expression_only())
        .filter(|n| !plan.active.contains(&n.id))
        .filter(|n| {
            let forward = n
                .next_stage_node_id
                .as_ref()
                .is_some_and(|next| other_active.contains(next));
            let backward = graph.nodes.iter().any(|m| {
                other_active.contains(&m.id) && m.next_stage_node_id.as_deref() == Some(n.id.as_str())
            });
            forward || backward
        })
        .collect()
}

/// Insert `entry();` calls at the top of the output program's `main`.
fn call_linked_entry_points(tu: &mut TranslationUnit, entries: &[String]) -> Result<(), AstError> {
    let mut calls = Vec::with_capacity(entries.len());
    for entry in entries {
        calls.push(make_fn_statement(&format!("{entry}()"))?);
    }
    let main = find_fn_mut(tu, "main").ok_or_else(|| AstError::MissingFunction {
        name: "main".to_string(),
    })?;
    main.statement.statement_list.splice(0..0, calls);
    Ok(())
}

fn compile_stage(
    ctx: &mut CompileContext,
    engine: &EngineConfig,
    graph: &Graph,
    plan: &StagePlan<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<(ShaderSections, Vec<String>), CompileError> {
    let stage = plan.stage;
    let span = info_span!("stage", %stage);
    let _enter = span.enter();

    let linked_ids: HashSet<&str> = plan.linked.iter().map(|n| n.id.as_str()).collect();
    let members: Vec<&str> = graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| plan.active.contains(*id) || linked_ids.contains(id))
        .collect();

    // linked entry points must be defined before the output calls them
    let ordering: Vec<Edge> = plan
        .linked
        .iter()
        .map(|n| Edge::new(n.id.clone(), plan.output.id.clone(), "out", "", stage))
        .collect();
    let mut order_edges: Vec<&Edge> = plan.edges.clone();
    order_edges.extend(ordering.iter());
    let order = topo_sort(&members, &order_edges, stage)?;

    let by_id: HashMap<&str, &GraphNode> = graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut fillers: HashMap<String, Expr> = HashMap::new();
    let mut sections = ShaderSections::default();

    for id in &order {
        let Some(node) = find_node(&by_id, id) else {
            continue;
        };
        let operands = match node.kind {
            NodeKind::Binary { .. } => operand_names(&plan.edges, id),
            _ => Vec::new(),
        };
        let context = ctx.get_or_prepare(engine, node, stage, &operands)?;
        let mut ast = context.ast.clone();

        for name in &context.overridden {
            report(
                diagnostics,
                Diagnostic::InputOverride {
                    node_id: id.clone(),
                    stage,
                    input: name.clone(),
                },
            );
        }

        let mut fills: Vec<(HoleLocation, Expr)> = Vec::new();
        let mut producers: HashMap<&str, &Edge> = HashMap::new();
        for e in plan.edges.iter().copied().filter(|e| e.to == *id) {
            if let Some(first) = producers.get(e.input.as_str()) {
                report(
                    diagnostics,
                    Diagnostic::DuplicateProducer {
                        node_id: id.clone(),
                        stage,
                        input: e.input.clone(),
                        kept_from: first.from.clone(),
                        dropped_from: e.from.clone(),
                    },
                );
                continue;
            }
            producers.insert(e.input.as_str(), e);

            let hole = node.hole_for_input(&e.input);
            let Some(location) = context.inputs.get(hole) else {
                report(
                    diagnostics,
                    Diagnostic::UnresolvedInput {
                        node_id: id.clone(),
                        stage,
                        input: e.input.clone(),
                        from: e.from.clone(),
                    },
                );
                continue;
            };
            if let Some(filler) = fillers.get(&e.from) {
                fills.push((location.clone(), filler.clone()));
            }
        }
        apply_fills(&mut ast, &fills);
        debug!(node = %id, fills = fills.len(), "applied fills");

        if node.is_output() && !plan.linked.is_empty() {
            if let NodeAst::Program(tu) = &mut ast {
                let entries: Vec<String> = order
                    .iter()
                    .filter(|o| linked_ids.contains(o.as_str()))
                    .map(|o| mangle_name("main", &mangle_suffix(o)))
                    .collect();
                call_linked_entry_points(tu, &entries).map_err(|e| CompileError::node(id, stage, e))?;
            }
        }

        let filler = match &ast {
            NodeAst::Expression(e) => e.clone(),
            NodeAst::Program(_) => make_expression(&format!("{}()", mangle_name("main", &context.suffix)))
                .map_err(|e| CompileError::node(id, stage, e))?,
        };
        fillers.insert(id.clone(), filler);

        if let NodeAst::Program(tu) = &ast {
            if !node.expression_only() {
                sections.merge(find_shader_sections(tu, id), stage)?;
            }
        }
    }

    Ok((sections, order))
}

/// Compile `graph` into one program per stage.
pub fn compile_graph(
    ctx: &mut CompileContext,
    engine: &EngineConfig,
    graph: &Graph,
) -> Result<CompileResult, CompileError> {
    let span = info_span!("compile_graph", engine = %engine.name, nodes = graph.nodes.len());
    let _enter = span.enter();

    graph.validate().map_err(CompileError::InvalidGraph)?;
    ctx.retain_graph(graph);
    let outputs = find_outputs(graph)?;

    let mut diagnostics = Vec::new();
    let mut fragment = plan_stage(
        graph,
        ShaderStage::Fragment,
        outputs.get(&ShaderStage::Fragment).copied(),
        &mut diagnostics,
    );
    let mut vertex = plan_stage(
        graph,
        ShaderStage::Vertex,
        outputs.get(&ShaderStage::Vertex).copied(),
        &mut diagnostics,
    );

    let fragment_active = fragment.as_ref().map(|p| p.active.clone()).unwrap_or_default();
    if let Some(plan) = vertex.as_mut() {
        plan.linked = linked_counterparts(graph, plan, &fragment_active);
    }
    let vertex_active = vertex.as_ref().map(|p| p.active.clone()).unwrap_or_default();
    if let Some(plan) = fragment.as_mut() {
        plan.linked = linked_counterparts(graph, plan, &vertex_active);
    }

    let mut result = CompileResult::default();
    let mut compiled: HashSet<String> = HashSet::new();
    if let Some(plan) = &fragment {
        let (sections, order) = compile_stage(ctx, engine, graph, plan, &mut diagnostics)?;
        result.fragment = sections;
        compiled.extend(order);
    }
    if let Some(plan) = &vertex {
        let (sections, order) = compile_stage(ctx, engine, graph, plan, &mut diagnostics)?;
        result.vertex = sections;
        compiled.extend(order);
    }

    result.active_node_ids = graph
        .nodes
        .iter()
        .filter(|n| compiled.contains(&n.id))
        .map(|n| n.id.clone())
        .collect();
    result.diagnostics = diagnostics;
    debug!(
        active = result.active_node_ids.len(),
        diagnostics = result.diagnostics.len(),
        "compiled graph"
    );
    Ok(result)
}

/// Prepare every node for every stage it can compile in, filling the cache.
pub fn compute_all_contexts(
    ctx: &mut CompileContext,
    engine: &EngineConfig,
    graph: &Graph,
) -> Result<(), CompileError> {
    graph.validate().map_err(CompileError::InvalidGraph)?;
    for node in &graph.nodes {
        let stages: &[ShaderStage] = match &node.stage {
            Some(stage) => std::slice::from_ref(stage),
            None => &ShaderStage::ALL,
        };
        for &stage in stages {
            let operands = match node.kind {
                NodeKind::Binary { .. } => {
                    let (edges, _) = stage_edges(graph, stage);
                    operand_names(&edges, &node.id)
                }
                _ => Vec::new(),
            };
            ctx.get_or_prepare(engine, node, stage, &operands)?;
        }
    }
    Ok(())
}
