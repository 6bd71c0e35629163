//! Whole-program rewrites applied while preparing a node's AST.

use glsl::syntax::{
    Declaration, Expr, ExternalDeclaration, Initializer, Preprocessor, SimpleStatement, Statement,
    StorageQualifier, TranslationUnit, TypeQualifierSpec, TypeSpecifierNonArray,
};
use glsl::visitor::{HostMut, Visit, VisitorMut};

use super::find::{find_constructor_call, find_fn, find_fn_mut, statement_assignment_to};
use super::{declared_names, fun_call_name, has_storage, make_declaration, make_fn_statement, make_type, rename_fun_identifier};
use crate::dsl::ShaderStage;
use crate::error::AstError;

/// Local that holds the value a converted entry point returns.
pub const RETURN_VAR: &str = "frogOut";

/// Output declared for legacy fragment programs that wrote `gl_FragColor`.
pub const FRAGMENT_OUT: &str = "fragmentColor";

const LEGACY_FRAG_COLOR: &str = "gl_FragColor";

/// Right-hand side of an assignment expression.
pub fn assignment_rhs(assign: &Expr) -> Option<&Expr> {
    match assign {
        Expr::Assignment(_, _, rhs) => Some(rhs.as_ref()),
        _ => None,
    }
}

/// Rewrite `void fn() { target = expr; }` into
/// `T fn() { T frogOut = rhs(assignment); return frogOut; }`.
///
/// Only statements directly in the function body are considered for the
/// assignment.
pub fn convert_main_to_return<F>(
    fn_name: &str,
    tu: &mut TranslationUnit,
    return_type: &str,
    target: &str,
    rhs: F,
) -> Result<(), AstError>
where
    F: FnOnce(&Expr) -> Result<Expr, AstError>,
{
    let new_ty = make_type(return_type)?;
    let mut return_decl = make_fn_statement(&format!("{return_type} {RETURN_VAR} = 1.0"))?;
    let return_stmt = make_fn_statement(&format!("return {RETURN_VAR}"))?;

    let main = find_fn_mut(tu, fn_name).ok_or_else(|| AstError::MissingFunction {
        name: fn_name.to_string(),
    })?;

    let statements = &mut main.statement.statement_list;
    let (index, assign) = statements
        .iter()
        .enumerate()
        .find_map(|(i, s)| statement_assignment_to(s, target).map(|a| (i, a.clone())))
        .ok_or_else(|| AstError::MissingAssignment {
            function: fn_name.to_string(),
            target: target.to_string(),
        })?;

    let init = rhs(&assign)?;
    set_declaration_initializer(&mut return_decl, init);

    statements[index] = return_decl;
    statements.push(return_stmt);
    main.prototype.ty = new_ty;
    Ok(())
}

fn set_declaration_initializer(stmt: &mut Statement, init: Expr) {
    if let Statement::Simple(simple) = stmt {
        if let SimpleStatement::Declaration(Declaration::InitDeclaratorList(list)) = simple.as_mut() {
            list.head.initializer = Some(Initializer::Simple(Box::new(init)));
        }
    }
}

/// Vertex entry point returning the `gl_Position` value as a `vec4`.
pub fn return_gl_position(fn_name: &str, tu: &mut TranslationUnit) -> Result<(), AstError> {
    convert_main_to_return(fn_name, tu, "vec4", "gl_Position", |assign| {
        assignment_rhs(assign).cloned().ok_or_else(|| AstError::MissingAssignment {
            function: fn_name.to_string(),
            target: "gl_Position".to_string(),
        })
    })
}

/// Vertex entry point returning the `vec3` position wrapped by the
/// `vec4(position, 1.0)` constructor of the `gl_Position` assignment.
pub fn return_gl_position_vec3_right(fn_name: &str, tu: &mut TranslationUnit) -> Result<(), AstError> {
    convert_main_to_return(fn_name, tu, "vec3", "gl_Position", |assign| {
        let call = find_constructor_call(assign, "vec4").map(|found| found.call);
        match call {
            Some(Expr::FunCall(_, mut args)) if args.len() == 2 => Ok(args.remove(0)),
            _ => Err(AstError::MissingAssignment {
                function: fn_name.to_string(),
                target: "gl_Position = vec4(<vec3>, 1.0)".to_string(),
            }),
        }
    })
}

struct RenameVariable<'a> {
    from: &'a str,
    to: &'a str,
}

impl VisitorMut for RenameVariable<'_> {
    fn visit_expr(&mut self, e: &mut Expr) -> Visit {
        if let Expr::Variable(ident) = e {
            if ident.as_str() == self.from {
                ident.0 = self.to.to_string();
            }
        }
        Visit::Children
    }
}

/// Index and name of the first top-level `out vec4` declaration.
fn find_out_vec4(tu: &TranslationUnit) -> Option<(usize, String)> {
    tu.0.0.iter().enumerate().find_map(|(i, decl)| match decl {
        ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list))
            if has_storage(&list.head.ty.qualifier, |s| *s == StorageQualifier::Out)
                && list.head.ty.ty.ty == TypeSpecifierNonArray::Vec4 =>
        {
            declared_names(list).first().map(|n| (i, n.to_string()))
        }
        _ => None,
    })
}

/// Remove a single name from a top-level declarator list, dropping the whole
/// declaration when it was the only one.
pub fn remove_declared_name(tu: &mut TranslationUnit, index: usize, name: &str) {
    let remove_all = match &mut tu.0.0[index] {
        ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) => {
            if declared_names(list).len() <= 1 {
                true
            } else {
                if list.head.name.as_ref().is_some_and(|n| n.as_str() == name) {
                    let next = list.tail.remove(0);
                    list.head.name = Some(next.ident.ident);
                    list.head.array_specifier = next.ident.array_spec;
                    list.head.initializer = next.initializer;
                } else {
                    list.tail.retain(|d| d.ident.ident.as_str() != name);
                }
                false
            }
        }
        _ => false,
    };
    if remove_all {
        tu.0.0.remove(index);
    }
}

/// Fragment variant of [`convert_main_to_return`]: the program's `out vec4`
/// variable becomes a local that the entry point returns.
pub fn convert_out_main_to_return(fn_name: &str, tu: &mut TranslationUnit) -> Result<(), AstError> {
    if find_fn(tu, fn_name).is_none() {
        return Err(AstError::MissingFunction {
            name: fn_name.to_string(),
        });
    }
    let (index, out_name) = find_out_vec4(tu).ok_or(AstError::MissingOutputDeclaration)?;

    let new_ty = make_type("vec4")?;
    let declare = make_fn_statement(&format!("vec4 {RETURN_VAR}"))?;
    let ret = make_fn_statement(&format!("return {RETURN_VAR}"))?;

    remove_declared_name(tu, index, &out_name);
    tu.visit_mut(&mut RenameVariable {
        from: &out_name,
        to: RETURN_VAR,
    });

    let main = find_fn_mut(tu, fn_name).ok_or_else(|| AstError::MissingFunction {
        name: fn_name.to_string(),
    })?;
    main.prototype.ty = new_ty;
    main.statement.statement_list.insert(0, declare);
    main.statement.statement_list.push(ret);
    Ok(())
}

struct LegacyCalls {
    wrote_frag_color: bool,
}

impl VisitorMut for LegacyCalls {
    fn visit_expr(&mut self, e: &mut Expr) -> Visit {
        match e {
            Expr::FunCall(id, _) => {
                if matches!(fun_call_name(id), Some("texture2D" | "textureCube")) {
                    rename_fun_identifier(id, "texture");
                }
            }
            Expr::Variable(ident) if ident.as_str() == LEGACY_FRAG_COLOR => {
                ident.0 = FRAGMENT_OUT.to_string();
                self.wrote_frag_color = true;
            }
            _ => {}
        }
        Visit::Children
    }
}

fn upgrade_qualifiers(specs: &mut [TypeQualifierSpec], stage: ShaderStage) {
    for spec in specs {
        if let TypeQualifierSpec::Storage(storage) = spec {
            match storage {
                StorageQualifier::Attribute => *storage = StorageQualifier::In,
                StorageQualifier::Varying => {
                    *storage = match stage {
                        ShaderStage::Vertex => StorageQualifier::Out,
                        ShaderStage::Fragment => StorageQualifier::In,
                    }
                }
                _ => {}
            }
        }
    }
}

fn declares_top_level(tu: &TranslationUnit, name: &str) -> bool {
    tu.0.0.iter().any(|decl| match decl {
        ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) => {
            declared_names(list).contains(&name)
        }
        _ => false,
    })
}

/// Upgrade a legacy (`attribute`/`varying`/`texture2D`/`gl_FragColor`)
/// program to `in`/`out` linkage. Running it twice is a no-op.
pub fn upgrade_stage_linkage(tu: &mut TranslationUnit, stage: ShaderStage) -> Result<(), AstError> {
    let mut calls = LegacyCalls {
        wrote_frag_color: false,
    };
    tu.visit_mut(&mut calls);

    tu.0.0.retain(|decl| {
        !matches!(
            decl,
            ExternalDeclaration::Preprocessor(Preprocessor::Version(v)) if v.version == 100
        )
    });

    for decl in tu.0.0.iter_mut() {
        match decl {
            ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list)) => {
                if let Some(q) = list.head.ty.qualifier.as_mut() {
                    upgrade_qualifiers(&mut q.qualifiers.0, stage);
                }
            }
            ExternalDeclaration::Declaration(Declaration::Global(q, _)) => {
                upgrade_qualifiers(&mut q.qualifiers.0, stage);
            }
            _ => {}
        }
    }

    if stage == ShaderStage::Fragment && calls.wrote_frag_color && !declares_top_level(tu, FRAGMENT_OUT) {
        let decl = make_declaration(&format!("out vec4 {FRAGMENT_OUT};"))?;
        let at = tu
            .0
            .0
            .iter()
            .take_while(|d| matches!(d, ExternalDeclaration::Preprocessor(_)))
            .count();
        tu.0.0.insert(at, ExternalDeclaration::Declaration(decl));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::find::find_assignment_to;
    use crate::ast::{generate, generate_expr, make_expression, parse_program};

    const LEGACY_FRAGMENT: &str = r#"
#version 100
precision highp float;
uniform sampler2D image;
varying vec2 vUv;
void main() {
    vec4 color = texture2D(image, vUv);
    gl_FragColor = color * 2.0;
}
"#;

    const LEGACY_VERTEX: &str = r#"
attribute vec3 position;
varying vec2 vUv;
uniform mat4 projectionMatrix;
void main() {
    vUv = position.xy;
    gl_Position = projectionMatrix * vec4(position, 1.0);
}
"#;

    fn squash(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn upgrade_fragment_rewrites_legacy_constructs() {
        let mut tu = parse_program(LEGACY_FRAGMENT).unwrap();
        upgrade_stage_linkage(&mut tu, ShaderStage::Fragment).unwrap();
        let out = squash(&generate(&tu));
        assert!(!out.contains("#version100"), "{out}");
        assert!(out.contains("outvec4fragmentColor;"), "{out}");
        assert!(out.contains("invec2vUv;"), "{out}");
        assert!(out.contains("texture(image,vUv)"), "{out}");
        assert!(!out.contains("texture2D"), "{out}");
        assert!(!out.contains("gl_FragColor"), "{out}");
    }

    #[test]
    fn upgrade_vertex_maps_varying_to_out() {
        let mut tu = parse_program(LEGACY_VERTEX).unwrap();
        upgrade_stage_linkage(&mut tu, ShaderStage::Vertex).unwrap();
        let out = squash(&generate(&tu));
        assert!(out.contains("invec3position;"), "{out}");
        assert!(out.contains("outvec2vUv;"), "{out}");
        assert!(!out.contains("fragmentColor"), "{out}");
    }

    #[test]
    fn upgrade_is_idempotent() {
        for (src, stage) in [
            (LEGACY_FRAGMENT, ShaderStage::Fragment),
            (LEGACY_VERTEX, ShaderStage::Vertex),
        ] {
            let mut once = parse_program(src).unwrap();
            upgrade_stage_linkage(&mut once, stage).unwrap();
            let mut twice = once.clone();
            upgrade_stage_linkage(&mut twice, stage).unwrap();
            assert_eq!(generate(&once), generate(&twice));
        }
    }

    #[test]
    fn converts_vertex_main_to_return() {
        let mut tu = parse_program(LEGACY_VERTEX).unwrap();
        return_gl_position("main", &mut tu).unwrap();
        let main = find_fn(&tu, "main").unwrap();
        assert_eq!(main.prototype.ty.ty.ty, TypeSpecifierNonArray::Vec4);
        let out = squash(&generate(&tu));
        assert!(out.contains("vec4frogOut="), "{out}");
        assert!(out.contains("returnfrogOut;"), "{out}");
        assert!(find_assignment_to(&tu, "gl_Position").is_none());
    }

    #[test]
    fn vec3_right_extracts_constructor_argument() {
        let mut tu = parse_program(LEGACY_VERTEX).unwrap();
        return_gl_position_vec3_right("main", &mut tu).unwrap();
        let main = find_fn(&tu, "main").unwrap();
        assert_eq!(main.prototype.ty.ty.ty, TypeSpecifierNonArray::Vec3);
        let Statement::Simple(simple) = &main.statement.statement_list[1] else {
            panic!("expected simple statement");
        };
        let SimpleStatement::Declaration(Declaration::InitDeclaratorList(list)) = simple.as_ref() else {
            panic!("expected declaration");
        };
        let Some(Initializer::Simple(init)) = &list.head.initializer else {
            panic!("expected initializer");
        };
        assert_eq!(generate_expr(init), generate_expr(&make_expression("position").unwrap()));
    }

    #[test]
    fn missing_function_and_assignment_are_reported() {
        let mut tu = parse_program(LEGACY_VERTEX).unwrap();
        assert_eq!(
            return_gl_position("entry", &mut tu),
            Err(AstError::MissingFunction { name: "entry".into() })
        );
        let mut tu = parse_program("void main() { float x = 1.0; }").unwrap();
        assert_eq!(
            return_gl_position("main", &mut tu),
            Err(AstError::MissingAssignment {
                function: "main".into(),
                target: "gl_Position".into()
            })
        );
    }

    #[test]
    fn out_main_to_return_replaces_output_variable() {
        let src = r#"
#version 300 es
precision highp float;
out vec4 pc_fragColor;
void main() {
    pc_fragColor = vec4(1.0);
    pc_fragColor.a = 0.5;
}
"#;
        let mut tu = parse_program(src).unwrap();
        convert_out_main_to_return("main", &mut tu).unwrap();
        let out = squash(&generate(&tu));
        assert!(!out.contains("pc_fragColor"), "{out}");
        assert!(out.contains("vec4main()"), "{out}");
        assert!(out.contains("vec4frogOut;"), "{out}");
        assert!(out.contains("frogOut.a="), "{out}");
        assert!(out.ends_with("returnfrogOut;}"), "{out}");
    }

    #[test]
    fn out_main_to_return_requires_out_declaration() {
        let mut tu = parse_program("void main() { gl_FragColor = vec4(1.0); }").unwrap();
        assert_eq!(
            convert_out_main_to_return("main", &mut tu),
            Err(AstError::MissingOutputDeclaration)
        );
    }

    #[test]
    fn remove_declared_name_keeps_co_declarations() {
        let mut tu = parse_program("uniform float a, b, c;\nvoid main() {}\n").unwrap();
        remove_declared_name(&mut tu, 0, "a");
        remove_declared_name(&mut tu, 0, "c");
        assert_eq!(squash(&generate(&tu)), squash("uniform float b;\nvoid main() {}"));
        remove_declared_name(&mut tu, 0, "b");
        assert_eq!(tu.0.0.len(), 1);
    }
}
