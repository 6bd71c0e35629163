//! Program sections: a node's top-level declarations split by role so that
//! many nodes can be merged into one program.

use std::collections::HashSet;

use glsl::syntax::{Declaration, ExternalDeclaration, NonEmpty, Preprocessor, TranslationUnit};

use crate::ast::{declared_names, generate_external_declaration, has_storage, is_stage_io};
use crate::dsl::ShaderStage;
use crate::engine::MergeOptions;
use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub struct VersionPragma {
    pub declaration: ExternalDeclaration,
    pub text: String,
    pub node_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderSections {
    pub version: Option<VersionPragma>,
    pub preprocessor: Vec<ExternalDeclaration>,
    pub precision: Vec<ExternalDeclaration>,
    pub io_declarations: Vec<ExternalDeclaration>,
    pub declared_io_names: HashSet<String>,
    pub program: Vec<ExternalDeclaration>,
    seen: HashSet<String>,
}

fn io_names(decl: &ExternalDeclaration) -> Option<Vec<String>> {
    match decl {
        ExternalDeclaration::Declaration(Declaration::InitDeclaratorList(list))
            if has_storage(&list.head.ty.qualifier, is_stage_io) =>
        {
            Some(declared_names(list).into_iter().map(str::to_string).collect())
        }
        ExternalDeclaration::Declaration(Declaration::Block(block))
            if has_storage(&Some(block.qualifier.clone()), is_stage_io) =>
        {
            Some(vec![block.name.0.clone()])
        }
        _ => None,
    }
}

/// Split a prepared node program into sections. `node_id` is recorded as the
/// owner of its `#version` pragma.
pub fn find_shader_sections(tu: &TranslationUnit, node_id: &str) -> ShaderSections {
    let mut sections = ShaderSections::default();
    for decl in &tu.0.0 {
        match decl {
            ExternalDeclaration::Preprocessor(Preprocessor::Version(_)) => {
                if sections.version.is_none() {
                    sections.version = Some(VersionPragma {
                        declaration: decl.clone(),
                        text: generate_external_declaration(decl),
                        node_id: node_id.to_string(),
                    });
                }
            }
            ExternalDeclaration::Preprocessor(_) => sections.push_unique(Bucket::Preprocessor, decl.clone()),
            ExternalDeclaration::Declaration(Declaration::Precision(..)) => {
                sections.push_unique(Bucket::Precision, decl.clone())
            }
            _ => match io_names(decl) {
                Some(names) => sections.push_io(decl.clone(), names),
                None => sections.push_unique(Bucket::Program, decl.clone()),
            },
        }
    }
    sections
}

enum Bucket {
    Preprocessor,
    Precision,
    Program,
}

impl ShaderSections {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.preprocessor.is_empty()
            && self.precision.is_empty()
            && self.io_declarations.is_empty()
            && self.program.is_empty()
    }

    fn push_unique(&mut self, bucket: Bucket, decl: ExternalDeclaration) {
        let text = generate_external_declaration(&decl);
        if !self.seen.insert(text) {
            return;
        }
        match bucket {
            Bucket::Preprocessor => self.preprocessor.push(decl),
            Bucket::Precision => self.precision.push(decl),
            Bucket::Program => self.program.push(decl),
        }
    }

    /// IO declarations are deduped by declared name, not by text.
    fn push_io(&mut self, decl: ExternalDeclaration, names: Vec<String>) {
        if names.iter().all(|n| self.declared_io_names.contains(n)) {
            return;
        }
        self.declared_io_names.extend(names);
        self.io_declarations.push(decl);
    }

    /// Append `other` after `self`. The first `#version` wins; a different
    /// one later on is an error.
    pub fn merge(&mut self, other: ShaderSections, stage: ShaderStage) -> Result<(), CompileError> {
        if let Some(found) = other.version {
            match &self.version {
                Some(existing) if existing.text != found.text => {
                    return Err(CompileError::VersionConflict {
                        node_id: found.node_id,
                        stage,
                        existing: existing.text.clone(),
                        existing_node_id: existing.node_id.clone(),
                        found: found.text,
                    });
                }
                Some(_) => {}
                None => self.version = Some(found),
            }
        }
        for decl in other.preprocessor {
            self.push_unique(Bucket::Preprocessor, decl);
        }
        for decl in other.precision {
            self.push_unique(Bucket::Precision, decl);
        }
        for decl in other.io_declarations {
            let names = io_names(&decl).unwrap_or_default();
            self.push_io(decl, names);
        }
        for decl in other.program {
            self.push_unique(Bucket::Program, decl);
        }
        Ok(())
    }

    /// Reassemble the sections in canonical order: version, preprocessor,
    /// precision, IO, program. `None` when nothing would be emitted.
    pub fn to_translation_unit(&self, options: &MergeOptions) -> Option<TranslationUnit> {
        let mut decls = Vec::new();
        if options.include_version {
            if let Some(v) = &self.version {
                decls.push(v.declaration.clone());
            }
        }
        decls.extend(self.preprocessor.iter().cloned());
        if options.include_precisions {
            decls.extend(self.precision.iter().cloned());
        }
        decls.extend(self.io_declarations.iter().cloned());
        decls.extend(self.program.iter().cloned());
        if decls.is_empty() {
            None
        } else {
            Some(TranslationUnit(NonEmpty(decls)))
        }
    }

    pub fn to_source(&self, options: &MergeOptions) -> String {
        self.to_translation_unit(options)
            .map(|tu| crate::ast::generate(&tu))
            .unwrap_or_default()
    }
}
