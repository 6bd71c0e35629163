//! Single-pass lookups over a GLSL AST.

use glsl::syntax::{Expr, ExternalDeclaration, FunctionDefinition, SimpleStatement, Statement, TranslationUnit};
use glsl::visitor::{Host, Visit, Visitor};

use super::fun_call_name;

/// The first call to a constructor together with the expression that
/// assigns it, when the call sits on the right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstructorCall {
    pub call: Expr,
    pub assignment: Option<Expr>,
}

struct ConstructorFinder<'a> {
    name: &'a str,
    track_assignments: bool,
    found: Option<ConstructorCall>,
}

impl Visitor for ConstructorFinder<'_> {
    fn visit_expr(&mut self, e: &Expr) -> Visit {
        if self.found.is_some() {
            return Visit::Parent;
        }
        match e {
            Expr::Assignment(_, _, rhs) if self.track_assignments => {
                if let Some(call) = first_call(rhs.as_ref(), self.name) {
                    self.found = Some(ConstructorCall {
                        call,
                        assignment: Some(e.clone()),
                    });
                    return Visit::Parent;
                }
                Visit::Children
            }
            Expr::FunCall(id, _) if fun_call_name(id) == Some(self.name) => {
                self.found = Some(ConstructorCall {
                    call: e.clone(),
                    assignment: None,
                });
                Visit::Parent
            }
            _ => Visit::Children,
        }
    }
}

fn first_call<H: Host>(ast: &H, name: &str) -> Option<Expr> {
    let mut finder = ConstructorFinder {
        name,
        track_assignments: false,
        found: None,
    };
    ast.visit(&mut finder);
    finder.found.map(|f| f.call)
}

/// Depth-first search for the first call to `name` (e.g. `vec4`). Stops
/// descending once a match is recorded.
pub fn find_constructor_call<H: Host>(ast: &H, name: &str) -> Option<ConstructorCall> {
    let mut finder = ConstructorFinder {
        name,
        track_assignments: true,
        found: None,
    };
    ast.visit(&mut finder);
    finder.found
}

/// Returns the assignment expression of a statement `target = ...;` (any
/// assignment operator), if the statement assigns to the plain identifier.
pub fn statement_assignment_to<'a>(stmt: &'a Statement, target: &str) -> Option<&'a Expr> {
    let Statement::Simple(simple) = stmt else {
        return None;
    };
    match simple.as_ref() {
        SimpleStatement::Expression(Some(e @ Expr::Assignment(lhs, _, _))) => match lhs.as_ref() {
            Expr::Variable(ident) if ident.as_str() == target => Some(e),
            _ => None,
        },
        _ => None,
    }
}

struct AssignmentFinder<'a> {
    target: &'a str,
    found: Option<Expr>,
}

impl Visitor for AssignmentFinder<'_> {
    fn visit_statement(&mut self, stmt: &Statement) -> Visit {
        if self.found.is_some() {
            return Visit::Parent;
        }
        if let Some(assign) = statement_assignment_to(stmt, self.target) {
            self.found = Some(assign.clone());
            return Visit::Parent;
        }
        Visit::Children
    }
}

/// First expression statement whose left-hand side is `target`.
pub fn find_assignment_to<H: Host>(ast: &H, target: &str) -> Option<Expr> {
    let mut finder = AssignmentFinder { target, found: None };
    ast.visit(&mut finder);
    finder.found
}

pub fn find_fn<'a>(tu: &'a TranslationUnit, name: &str) -> Option<&'a FunctionDefinition> {
    tu.0.0.iter().find_map(|decl| match decl {
        ExternalDeclaration::FunctionDefinition(f) if f.prototype.name.as_str() == name => Some(f),
        _ => None,
    })
}

pub fn find_fn_mut<'a>(tu: &'a mut TranslationUnit, name: &str) -> Option<&'a mut FunctionDefinition> {
    tu.0.0.iter_mut().find_map(|decl| match decl {
        ExternalDeclaration::FunctionDefinition(f) if f.prototype.name.as_str() == name => Some(f),
        _ => None,
    })
}
