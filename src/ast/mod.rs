//! AST helpers on top of the `glsl` crate: building small fragments from
//! text, turning trees back into text, and the whole-program rewrites the
//! compiler needs.
//!
//! - `find`: locating assignments, constructor calls and functions
//! - `transform`: stage-linkage upgrade and `main` -> value-returning rewrites
//! - `mangle`: per-node identifier renaming

pub mod find;
pub mod mangle;
pub mod transform;

use glsl::parser::Parse as _;
use glsl::syntax::{
    Declaration, Expr, ExternalDeclaration, FullySpecifiedType, FunIdentifier, InitDeclaratorList,
    SimpleStatement, Statement, StorageQualifier, TranslationUnit, TypeQualifier, TypeQualifierSpec,
    TypeSpecifierNonArray,
};
use glsl::transpiler::glsl as show;

use crate::error::AstError;

/// A node's parsed source: either a whole program or, for expression-only
/// nodes, a single expression.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAst {
    Program(TranslationUnit),
    Expression(Expr),
}

impl NodeAst {
    pub fn as_program(&self) -> Option<&TranslationUnit> {
        match self {
            NodeAst::Program(tu) => Some(tu),
            NodeAst::Expression(_) => None,
        }
    }

    pub fn generate(&self) -> String {
        match self {
            NodeAst::Program(tu) => generate(tu),
            NodeAst::Expression(e) => generate_expr(e),
        }
    }
}

fn parse_error(kind: &'static str, text: &str, err: glsl::parser::ParseError) -> AstError {
    AstError::Parse {
        kind,
        text: text.to_string(),
        message: err.info,
    }
}

fn malformed(kind: &'static str, text: &str) -> AstError {
    AstError::Parse {
        kind,
        text: text.to_string(),
        message: format!("text did not produce a single {kind}"),
    }
}

pub fn parse_program(source: &str) -> Result<TranslationUnit, AstError> {
    TranslationUnit::parse(source).map_err(|e| parse_error("program", source, e))
}

/// Parse a standalone expression by wrapping it in a throwaway assignment.
pub fn make_expression(expr: &str) -> Result<Expr, AstError> {
    let wrapped = format!("void main() {{\n    a = {expr};\n}}\n");
    let tu = TranslationUnit::parse(wrapped.as_str()).map_err(|e| parse_error("expression", expr, e))?;
    let statement = first_fn_statement(tu).ok_or_else(|| malformed("expression", expr))?;
    match statement {
        Statement::Simple(simple) => match *simple {
            SimpleStatement::Expression(Some(Expr::Assignment(_, _, rhs))) => Ok(*rhs),
            _ => Err(malformed("expression", expr)),
        },
        Statement::Compound(_) => Err(malformed("expression", expr)),
    }
}

/// Parse a top-level statement such as `vec4 x = vec4(1.0)`.
pub fn make_statement(stmt: &str) -> Result<ExternalDeclaration, AstError> {
    let wrapped = format!("{stmt};\n");
    let tu = TranslationUnit::parse(wrapped.as_str()).map_err(|e| parse_error("statement", stmt, e))?;
    let mut decls = tu.0.0;
    if decls.len() != 1 {
        return Err(malformed("statement", stmt));
    }
    Ok(decls.remove(0))
}

/// Parse a statement that is only valid inside a function body, such as
/// `return frogOut`.
pub fn make_fn_statement(stmt: &str) -> Result<Statement, AstError> {
    let wrapped = format!("void main() {{\n    {stmt};\n}}\n");
    let tu = TranslationUnit::parse(wrapped.as_str()).map_err(|e| parse_error("function statement", stmt, e))?;
    first_fn_statement(tu).ok_or_else(|| malformed("function statement", stmt))
}

/// Parse a complete top-level declaration, `;` included.
pub fn make_declaration(text: &str) -> Result<Declaration, AstError> {
    let tu = TranslationUnit::parse(text).map_err(|e| parse_error("declaration", text, e))?;
    match tu.0.0.into_iter().next() {
        Some(ExternalDeclaration::Declaration(d)) => Ok(d),
        _ => Err(malformed("declaration", text)),
    }
}

/// Parse a type such as `vec4` or `highp vec3`.
pub fn make_type(ty: &str) -> Result<FullySpecifiedType, AstError> {
    let wrapped = format!("{ty} frogTypeProbe();\n");
    let tu = TranslationUnit::parse(wrapped.as_str()).map_err(|e| parse_error("type", ty, e))?;
    match tu.0.0.into_iter().next() {
        Some(ExternalDeclaration::Declaration(Declaration::FunctionPrototype(proto))) => Ok(proto.ty),
        _ => Err(malformed("type", ty)),
    }
}

fn first_fn_statement(tu: TranslationUnit) -> Option<Statement> {
    match tu.0.0.into_iter().next()? {
        ExternalDeclaration::FunctionDefinition(f) => f.statement.statement_list.into_iter().next(),
        _ => None,
    }
}

pub fn generate(tu: &TranslationUnit) -> String {
    let mut out = String::new();
    show::show_translation_unit(&mut out, tu);
    out
}

pub fn generate_expr(expr: &Expr) -> String {
    let mut out = String::new();
    show::show_expr(&mut out, expr);
    out
}

pub fn generate_statement(stmt: &Statement) -> String {
    let mut out = String::new();
    show::show_statement(&mut out, stmt);
    out
}

pub fn generate_external_declaration(decl: &ExternalDeclaration) -> String {
    let mut out = String::new();
    show::show_external_declaration(&mut out, decl);
    out.trim().to_string()
}

/// Name of the called function, for plain calls and constructors.
pub fn fun_call_name(id: &FunIdentifier) -> Option<&str> {
    match id {
        FunIdentifier::Identifier(ident) => Some(ident.as_str()),
        FunIdentifier::Expr(e) => match e.as_ref() {
            Expr::Variable(ident) => Some(ident.as_str()),
            _ => None,
        },
    }
}

pub(crate) fn rename_fun_identifier(id: &mut FunIdentifier, to: &str) {
    match id {
        FunIdentifier::Identifier(ident) => ident.0 = to.to_string(),
        FunIdentifier::Expr(e) => {
            if let Expr::Variable(ident) = e.as_mut() {
                ident.0 = to.to_string();
            }
        }
    }
}

/// Names declared by a declarator list, head first.
pub fn declared_names(list: &InitDeclaratorList) -> Vec<&str> {
    let mut names = Vec::with_capacity(1 + list.tail.len());
    if let Some(name) = &list.head.name {
        names.push(name.as_str());
    }
    names.extend(list.tail.iter().map(|d| d.ident.ident.as_str()));
    names
}

pub fn has_storage(qualifier: &Option<TypeQualifier>, wanted: impl Fn(&StorageQualifier) -> bool) -> bool {
    qualifier.as_ref().is_some_and(|q| {
        q.qualifiers.0.iter().any(|spec| match spec {
            TypeQualifierSpec::Storage(s) => wanted(s),
            _ => false,
        })
    })
}

/// Any opaque sampler type (`sampler2D`, `samplerCube`, `isampler3D`, ...).
pub fn is_sampler_type(ty: &TypeSpecifierNonArray) -> bool {
    let mut text = String::new();
    show::show_type_specifier_non_array(&mut text, ty);
    text.contains("sampler")
}

/// Stage linkage qualifiers: `in`, `out` and their legacy spellings.
pub fn is_stage_io(storage: &StorageQualifier) -> bool {
    matches!(
        storage,
        StorageQualifier::In | StorageQualifier::Out | StorageQualifier::Attribute | StorageQualifier::Varying
    )
}
