//! Per-node identifier renaming.
//!
//! Every node's top-level names get a suffix derived from the node id, so
//! that two nodes declaring `color` stay distinct once merged.

use std::collections::{HashMap, HashSet};

use glsl::syntax::{
    CaseLabel, Condition, Declaration, Expr, ExternalDeclaration, ForInitStatement, FunctionDefinition,
    FunctionParameterDeclaration, IterationStatement, JumpStatement, SelectionRestStatement, SimpleStatement,
    Statement, TranslationUnit, TypeName, TypeSpecifierNonArray,
};
use glsl::visitor::{HostMut, Visit, VisitorMut};

use super::{declared_names, fun_call_name, has_storage, is_stage_io, rename_fun_identifier};
use crate::utils::{fnv1a64, sanitize_glsl_ident};

/// Suffix for a node id. Ids that are already identifier-safe are used as
/// is; anything else gets a hash appended so distinct ids never share a
/// suffix.
pub fn mangle_suffix(node_id: &str) -> String {
    let base = sanitize_glsl_ident(node_id);
    if base == node_id {
        base
    } else {
        format!("{base}_{:08x}", fnv1a64(node_id.as_bytes()) as u32)
    }
}

pub fn mangle_name(name: &str, suffix: &str) -> String {
    format!("{name}_{suffix}")
}

/// Inverse of [`mangle_name`] for names carrying `suffix`.
pub fn unmangle_name<'a>(name: &'a str, suffix: &str) -> &'a str {
    name.strip_suffix(suffix)
        .and_then(|n| n.strip_suffix('_'))
        .filter(|n| !n.is_empty())
        .unwrap_or(name)
}

fn keeps_name(name: &str, preserve: &HashSet<String>) -> bool {
    name.starts_with("gl_") || preserve.contains(name)
}

/// Top-level names this program would rename, original -> mangled.
pub fn mangle_targets(tu: &TranslationUnit, suffix: &str, preserve: &HashSet<String>) -> HashMap<String, String> {
    let mut renames = HashMap::new();
    let mut add = |name: &str| {
        if !keeps_name(name, preserve) {
            renames.insert(name.to_string(), mangle_name(name, suffix));
        }
    };
    for decl in &tu.0.0 {
        match decl {
            ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) => {
                if let TypeSpecifierNonArray::Struct(s) = &list.head.ty.ty.ty {
                    if let Some(name) = &s.name {
                        add(name.as_str());
                    }
                }
                if has_storage(&list.head.ty.qualifier, is_stage_io) {
                    continue;
                }
                for name in declared_names(list) {
                    add(name);
                }
            }
            ExternalDeclaration::Declaration(Declaration::FunctionPrototype(proto)) => add(proto.name.as_str()),
            ExternalDeclaration::FunctionDefinition(f) => add(f.prototype.name.as_str()),
            _ => {}
        }
    }
    renames
}

struct RenameReferences<'a> {
    renames: &'a HashMap<String, String>,
    shadowed: &'a [HashSet<String>],
}

impl RenameReferences<'_> {
    fn target(&self, name: &str) -> Option<&String> {
        if self.shadowed.iter().any(|scope| scope.contains(name)) {
            return None;
        }
        self.renames.get(name)
    }
}

impl VisitorMut for RenameReferences<'_> {
    fn visit_expr(&mut self, e: &mut Expr) -> Visit {
        match e {
            Expr::Variable(ident) => {
                if let Some(to) = self.target(ident.as_str()) {
                    ident.0 = to.clone();
                }
            }
            Expr::FunCall(id, _) => {
                if let Some(to) = fun_call_name(id).and_then(|n| self.target(n)).cloned() {
                    rename_fun_identifier(id, &to);
                }
            }
            _ => {}
        }
        Visit::Children
    }

    fn visit_type_name(&mut self, t: &mut TypeName) -> Visit {
        if let Some(to) = self.target(t.as_str()) {
            t.0 = to.clone();
        }
        Visit::Children
    }
}

/// Walks a function body keeping one scope per block. A local hides a
/// top-level name from its declarator to the end of its block.
struct ScopedRenames<'a> {
    renames: &'a HashMap<String, String>,
    scopes: Vec<HashSet<String>>,
}

impl<'a> ScopedRenames<'a> {
    fn for_function(renames: &'a HashMap<String, String>, f: &FunctionDefinition) -> Self {
        let params: HashSet<String> = f
            .prototype
            .parameters
            .iter()
            .filter_map(|param| match param {
                FunctionParameterDeclaration::Named(_, declarator) => Some(declarator.ident.ident.as_str().to_string()),
                FunctionParameterDeclaration::Unnamed(..) => None,
            })
            .collect();
        Self {
            renames,
            scopes: vec![params],
        }
    }

    fn rename<H: HostMut>(&self, node: &mut H) {
        node.visit_mut(&mut RenameReferences {
            renames: self.renames,
            shadowed: &self.scopes,
        });
    }

    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn block(&mut self, statements: &mut [Statement]) {
        self.scopes.push(HashSet::new());
        for stmt in statements {
            self.statement(stmt);
        }
        self.scopes.pop();
    }

    fn scoped(&mut self, stmt: &mut Statement) {
        self.block(std::slice::from_mut(stmt));
    }

    fn statement(&mut self, stmt: &mut Statement) {
        match stmt {
            Statement::Compound(c) => self.block(&mut c.statement_list),
            Statement::Simple(s) => self.simple(s),
        }
    }

    fn declaration(&mut self, decl: &mut Declaration) {
        let list = match decl {
            Declaration::InitDeclaratorList(list) => list,
            other => return self.rename(other),
        };
        self.rename(&mut list.head.ty);
        if let Some(array) = list.head.array_specifier.as_mut() {
            self.rename(array);
        }
        if let Some(init) = list.head.initializer.as_mut() {
            self.rename(init);
        }
        if let Some(name) = &list.head.name {
            self.bind(name.as_str());
        }
        for tail in list.tail.iter_mut() {
            if let Some(array) = tail.ident.array_spec.as_mut() {
                self.rename(array);
            }
            if let Some(init) = tail.initializer.as_mut() {
                self.rename(init);
            }
            self.bind(tail.ident.ident.as_str());
        }
    }

    fn condition(&mut self, cond: &mut Condition) {
        match cond {
            Condition::Expr(e) => self.rename(&mut **e),
            Condition::Assignment(ty, name, init) => {
                self.rename(ty);
                self.rename(init);
                self.bind(name.as_str());
            }
        }
    }

    fn simple(&mut self, stmt: &mut SimpleStatement) {
        match stmt {
            SimpleStatement::Declaration(decl) => self.declaration(decl),
            SimpleStatement::Expression(Some(e)) => self.rename(e),
            SimpleStatement::Expression(None) => {}
            SimpleStatement::Selection(sel) => {
                self.rename(&mut *sel.cond);
                match &mut sel.rest {
                    SelectionRestStatement::Statement(s) => self.scoped(s),
                    SelectionRestStatement::Else(then, otherwise) => {
                        self.scoped(then);
                        self.scoped(otherwise);
                    }
                }
            }
            SimpleStatement::Switch(sw) => {
                self.rename(&mut *sw.head);
                self.block(&mut sw.body);
            }
            SimpleStatement::CaseLabel(CaseLabel::Case(e)) => self.rename(&mut **e),
            SimpleStatement::CaseLabel(CaseLabel::Def) => {}
            SimpleStatement::Iteration(it) => {
                self.scopes.push(HashSet::new());
                match it {
                    IterationStatement::While(cond, body) => {
                        self.condition(cond);
                        self.statement(body);
                    }
                    IterationStatement::DoWhile(body, cond) => {
                        self.scoped(body);
                        self.rename(&mut **cond);
                    }
                    IterationStatement::For(init, rest, body) => {
                        match init {
                            ForInitStatement::Expression(Some(e)) => self.rename(e),
                            ForInitStatement::Expression(None) => {}
                            ForInitStatement::Declaration(decl) => self.declaration(decl),
                        }
                        if let Some(cond) = rest.condition.as_mut() {
                            self.condition(cond);
                        }
                        if let Some(post) = rest.post_expr.as_mut() {
                            self.rename(&mut **post);
                        }
                        self.statement(body);
                    }
                }
                self.scopes.pop();
            }
            SimpleStatement::Jump(JumpStatement::Return(Some(e))) => self.rename(&mut **e),
            SimpleStatement::Jump(_) => {}
        }
    }
}

/// Rename the program's top-level variables, functions, prototypes and
/// struct types to `name_<suffix>` and rewrite their references. Stage IO declarations,
/// `gl_*` names and `preserve`d names are left alone. Returns the applied
/// renames.
pub fn mangle_program(
    tu: &mut TranslationUnit,
    suffix: &str,
    preserve: &HashSet<String>,
) -> HashMap<String, String> {
    let renames = mangle_targets(tu, suffix, preserve);
    if renames.is_empty() {
        return renames;
    }
    for decl in tu.0.0.iter_mut() {
        match decl {
            ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) => {
                if !has_storage(&list.head.ty.qualifier, is_stage_io) {
                    if let Some(name) = list.head.name.as_mut() {
                        if let Some(to) = renames.get(name.as_str()) {
                            name.0 = to.clone();
                        }
                    }
                    for tail in list.tail.iter_mut() {
                        if let Some(to) = renames.get(tail.ident.ident.as_str()) {
                            tail.ident.ident.0 = to.clone();
                        }
                    }
                }
                list.visit_mut(&mut RenameReferences {
                    renames: &renames,
                    shadowed: &[],
                });
            }
            ExternalDeclaration::Declaration(Declaration::FunctionPrototype(proto)) => {
                if let Some(to) = renames.get(proto.name.as_str()) {
                    proto.name.0 = to.clone();
                }
                proto.visit_mut(&mut RenameReferences {
                    renames: &renames,
                    shadowed: &[],
                });
            }
            ExternalDeclaration::FunctionDefinition(f) => {
                if let Some(to) = renames.get(f.prototype.name.as_str()) {
                    f.prototype.name.0 = to.clone();
                }
                f.prototype.visit_mut(&mut RenameReferences {
                    renames: &renames,
                    shadowed: &[],
                });
                let mut body = ScopedRenames::for_function(&renames, f);
                body.block(&mut f.statement.statement_list);
            }
            _ => {}
        }
    }
    renames
}
