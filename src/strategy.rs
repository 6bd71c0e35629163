//! Input discovery.
//!
//! A strategy looks at a node's prepared AST and reports the holes an
//! upstream value can be spliced into. Holes are plain [`HoleLocation`]
//! values; [`apply_fills`] later applies every fill for a node in one pass.

use std::collections::HashMap;

use glsl::syntax::{Declaration, Expr, ExternalDeclaration, Statement, StorageQualifier, TranslationUnit};
use glsl::visitor::{Host, HostMut, Visit, Visitor, VisitorMut};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::find::{find_assignment_to, statement_assignment_to};
use crate::ast::mangle::unmangle_name;
use crate::ast::transform::remove_declared_name;
use crate::ast::{NodeAst, declared_names, fun_call_name, generate_expr, has_storage, is_sampler_type};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Strategy {
    /// Non-sampler `uniform` declarations.
    Uniform,
    /// The first assignment statement to an identifier.
    #[serde(rename_all = "camelCase")]
    AssignmentTo { assign_to: String },
    /// Texture sampling calls, one hole per call site.
    #[serde(rename = "texture2D")]
    Texture2D,
    /// References to a named attribute.
    #[serde(rename_all = "camelCase")]
    NamedAttribute { attribute_name: String },
    /// Every identifier in the AST.
    Variable,
}

impl Strategy {
    pub fn assignment_to(target: impl Into<String>) -> Self {
        Strategy::AssignmentTo {
            assign_to: target.into(),
        }
    }

    pub fn named_attribute(name: impl Into<String>) -> Self {
        Strategy::NamedAttribute {
            attribute_name: name.into(),
        }
    }
}

/// Where a discovered hole lives in the prepared AST.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HoleLocation {
    /// Right-hand side of the first assignment statement to `target`.
    AssignmentRhs { target: String },
    /// A top-level uniform (by its mangled name): the declaration is removed
    /// and references are substituted.
    Uniform { name: String },
    /// The `ordinal`-th texture call in pre-order.
    TextureCall { ordinal: usize },
    /// Every reference to the identifier `name`.
    References { name: String },
}

pub type InputMap = IndexMap<String, HoleLocation>;

fn is_texture_call(name: Option<&str>) -> bool {
    matches!(name, Some("texture2D" | "texture"))
}

/// Holes found by one strategy, keyed by unmangled input name.
pub fn apply_strategy(strategy: &Strategy, ast: &NodeAst, suffix: &str) -> InputMap {
    match strategy {
        Strategy::Uniform => ast.as_program().map(|tu| uniform_inputs(tu, suffix)).unwrap_or_default(),
        Strategy::AssignmentTo { assign_to } => assignment_inputs(ast, assign_to),
        Strategy::Texture2D => texture_inputs(ast, suffix),
        Strategy::NamedAttribute { attribute_name } => attribute_inputs(ast, attribute_name, suffix),
        Strategy::Variable => variable_inputs(ast, suffix),
    }
}

/// Run `strategies` in order. Later strategies replace inputs of the same
/// name found by earlier ones; the replaced names are returned alongside.
pub fn find_inputs(ast: &NodeAst, strategies: &[Strategy], suffix: &str) -> (InputMap, Vec<String>) {
    let mut inputs = InputMap::new();
    let mut overridden = Vec::new();
    for strategy in strategies {
        for (name, hole) in apply_strategy(strategy, ast, suffix) {
            if inputs.insert(name.clone(), hole).is_some() && !overridden.contains(&name) {
                overridden.push(name);
            }
        }
    }
    (inputs, overridden)
}

fn uniform_inputs(tu: &TranslationUnit, suffix: &str) -> InputMap {
    let mut inputs = InputMap::new();
    for decl in &tu.0.0 {
        let ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) = decl else {
            continue;
        };
        if !has_storage(&list.head.ty.qualifier, |s| *s == StorageQualifier::Uniform)
            || is_sampler_type(&list.head.ty.ty.ty)
        {
            continue;
        }
        for name in declared_names(list) {
            inputs.insert(
                unmangle_name(name, suffix).to_string(),
                HoleLocation::Uniform { name: name.to_string() },
            );
        }
    }
    inputs
}

fn assignment_inputs(ast: &NodeAst, target: &str) -> InputMap {
    let mut inputs = InputMap::new();
    if let NodeAst::Program(tu) = ast {
        if find_assignment_to(tu, target).is_some() {
            inputs.insert(
                target.to_string(),
                HoleLocation::AssignmentRhs {
                    target: target.to_string(),
                },
            );
        }
    }
    inputs
}

struct TextureCalls {
    calls: Vec<(usize, Option<String>)>,
}

impl Visitor for TextureCalls {
    fn visit_expr(&mut self, e: &Expr) -> Visit {
        if let Expr::FunCall(id, args) = e {
            if is_texture_call(fun_call_name(id)) {
                let ordinal = self.calls.len();
                self.calls.push((ordinal, args.first().map(generate_expr)));
            }
        }
        Visit::Children
    }
}

fn visit_node_ast<V: Visitor>(ast: &NodeAst, visitor: &mut V) {
    match ast {
        NodeAst::Program(tu) => tu.visit(visitor),
        NodeAst::Expression(e) => e.visit(visitor),
    }
}

fn texture_inputs(ast: &NodeAst, suffix: &str) -> InputMap {
    let mut finder = TextureCalls { calls: Vec::new() };
    visit_node_ast(ast, &mut finder);

    let samplers: Vec<(usize, String)> = finder
        .calls
        .into_iter()
        .filter_map(|(ordinal, sampler)| sampler.map(|s| (ordinal, unmangle_name(s.trim(), suffix).to_string())))
        .collect();
    let mut uses: HashMap<&str, usize> = HashMap::new();
    for (_, sampler) in &samplers {
        *uses.entry(sampler.as_str()).or_default() += 1;
    }

    // Repeated samplers take the call's position among all texture calls.
    let mut inputs = InputMap::new();
    for (ordinal, sampler) in &samplers {
        let name = if uses[sampler.as_str()] > 1 {
            format!("{sampler}_{ordinal}")
        } else {
            sampler.clone()
        };
        inputs.insert(name, HoleLocation::TextureCall { ordinal: *ordinal });
    }
    inputs
}

struct Identifiers {
    names: IndexMap<String, ()>,
}

impl Visitor for Identifiers {
    fn visit_expr(&mut self, e: &Expr) -> Visit {
        if let Expr::Variable(ident) = e {
            self.names.insert(ident.as_str().to_string(), ());
        }
        Visit::Children
    }

    fn visit_declaration(&mut self, decl: &Declaration) -> Visit {
        if let Declaration::InitDeclaratorList(list) = decl {
            for name in declared_names(list) {
                self.names.insert(name.to_string(), ());
            }
        }
        Visit::Children
    }
}

fn identifiers(ast: &NodeAst) -> IndexMap<String, ()> {
    let mut finder = Identifiers { names: IndexMap::new() };
    visit_node_ast(ast, &mut finder);
    finder.names
}

fn attribute_inputs(ast: &NodeAst, attribute: &str, suffix: &str) -> InputMap {
    let mut inputs = InputMap::new();
    let names = identifiers(ast);
    let mangled = crate::ast::mangle::mangle_name(attribute, suffix);
    let found = [attribute, mangled.as_str()].into_iter().find(|n| names.contains_key(*n));
    if let Some(name) = found {
        inputs.insert(
            attribute.to_string(),
            HoleLocation::References { name: name.to_string() },
        );
    }
    inputs
}

fn variable_inputs(ast: &NodeAst, suffix: &str) -> InputMap {
    identifiers(ast)
        .into_keys()
        .map(|name| {
            (
                unmangle_name(&name, suffix).to_string(),
                HoleLocation::References { name },
            )
        })
        .collect()
}

struct CountTextureCalls(usize);

impl Visitor for CountTextureCalls {
    fn visit_expr(&mut self, e: &Expr) -> Visit {
        if let Expr::FunCall(id, _) = e {
            if is_texture_call(fun_call_name(id)) {
                self.0 += 1;
            }
        }
        Visit::Children
    }
}

fn count_texture_calls<H: Host>(node: &H) -> usize {
    let mut counter = CountTextureCalls(0);
    node.visit(&mut counter);
    counter.0
}

struct Fill<'a> {
    assignments: HashMap<&'a str, &'a Expr>,
    substitutions: HashMap<&'a str, &'a Expr>,
    textures: HashMap<usize, &'a Expr>,
    next_texture: usize,
}

impl VisitorMut for Fill<'_> {
    fn visit_statement(&mut self, stmt: &mut Statement) -> Visit {
        if self.assignments.is_empty() {
            return Visit::Children;
        }
        let target = self
            .assignments
            .keys()
            .copied()
            .find(|target| statement_assignment_to(stmt, target).is_some());
        let Some(target) = target else {
            return Visit::Children;
        };
        let Some(fill) = self.assignments.remove(target) else {
            return Visit::Children;
        };
        self.next_texture += count_texture_calls(&*stmt);
        if let Statement::Simple(simple) = stmt {
            if let glsl::syntax::SimpleStatement::Expression(Some(Expr::Assignment(_, _, rhs))) = simple.as_mut() {
                **rhs = fill.clone();
            }
        }
        Visit::Parent
    }

    fn visit_expr(&mut self, e: &mut Expr) -> Visit {
        match e {
            Expr::Variable(ident) => {
                if let Some(fill) = self.substitutions.get(ident.as_str()) {
                    *e = (*fill).clone();
                    return Visit::Parent;
                }
                Visit::Children
            }
            Expr::FunCall(id, args) if is_texture_call(fun_call_name(id)) => {
                let ordinal = self.next_texture;
                self.next_texture += 1;
                match self.textures.get(&ordinal) {
                    Some(fill) => {
                        let nested: usize = args.iter().map(|a| count_texture_calls(a)).sum();
                        self.next_texture += nested;
                        *e = (*fill).clone();
                        Visit::Parent
                    }
                    None => Visit::Children,
                }
            }
            _ => Visit::Children,
        }
    }
}

/// Splice every `(hole, filler)` pair into `ast` in one pass.
///
/// Uniform holes first drop their declaration. A single pre-order walk then
/// replaces assignment right-hand sides, identifier references and texture
/// calls; spliced fillers are not descended into.
pub fn apply_fills(ast: &mut NodeAst, fills: &[(HoleLocation, Expr)]) {
    let mut fill = Fill {
        assignments: HashMap::new(),
        substitutions: HashMap::new(),
        textures: HashMap::new(),
        next_texture: 0,
    };
    let mut removed_uniforms: Vec<&str> = Vec::new();
    for (hole, expr) in fills {
        match hole {
            HoleLocation::AssignmentRhs { target } => {
                fill.assignments.insert(target, expr);
            }
            HoleLocation::Uniform { name } => {
                removed_uniforms.push(name);
                fill.substitutions.insert(name, expr);
            }
            HoleLocation::TextureCall { ordinal } => {
                fill.textures.insert(*ordinal, expr);
            }
            HoleLocation::References { name } => {
                fill.substitutions.insert(name, expr);
            }
        }
    }

    match ast {
        NodeAst::Program(tu) => {
            for name in removed_uniforms {
                remove_uniform(tu, name);
            }
            tu.visit_mut(&mut fill);
        }
        NodeAst::Expression(e) => e.visit_mut(&mut fill),
    }
}

fn remove_uniform(tu: &mut TranslationUnit, name: &str) {
    let index = tu.0.0.iter().position(|decl| match decl {
        ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) => {
            has_storage(&list.head.ty.qualifier, |s| *s == StorageQualifier::Uniform)
                && declared_names(list).contains(&name)
        }
        _ => false,
    });
    if let Some(index) = index {
        remove_declared_name(tu, index, name);
    }
}
