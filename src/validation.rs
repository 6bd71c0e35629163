//! GLSL validation of compiled programs using the naga library.
//!
//! naga's GLSL front end accepts desktop versions (`#version 450` and up),
//! so graphs meant to be validated need an output node that declares one.

use anyhow::{Context, Result, anyhow};

use crate::dsl::ShaderStage;

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

/// Parse and validate a single stage program.
///
/// # Returns
/// The parsed naga Module on success, or an error listing the source with
/// line numbers on failure.
pub fn validate_glsl(source: &str, stage: ShaderStage) -> Result<naga::Module> {
    let mut parser = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: naga_stage(stage),
        defines: Default::default(),
    };

    let module = parser
        .parse(&options, source)
        .map_err(|e| anyhow!("GLSL parse failed: {e:?}\n{}", numbered_source(source)))?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| anyhow!("GLSL validation failed: {e:?}\n{}", numbered_source(source)))?;

    Ok(module)
}

/// Validate and say which graph/stage produced the program on failure.
pub fn validate_glsl_with_context(source: &str, stage: ShaderStage, context: &str) -> Result<naga::Module> {
    validate_glsl(source, stage).with_context(|| format!("{context} generated invalid {stage} GLSL"))
}

fn numbered_source(source: &str) -> String {
    let mut output = String::new();
    output.push_str("Generated GLSL:\n");
    output.push_str("---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_fragment_program() {
        let source = r#"#version 450
layout(location = 0) out vec4 color;
vec4 tint_1() {
    return vec4(1.0, 0.5, 0.25, 1.0);
}
void main() {
    color = tint_1();
}
"#;
        let module = validate_glsl(source, ShaderStage::Fragment).unwrap();
        assert_eq!(module.entry_points.len(), 1);
    }

    #[test]
    fn invalid_program_lists_source() {
        let source = "#version 450\nvoid main() {\n    undefined_fn();\n}\n";
        let err = validate_glsl_with_context(source, ShaderStage::Fragment, "graph test").unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("graph test generated invalid fragment GLSL"), "{msg}");
        assert!(msg.contains("   3 |"), "{msg}");
    }
}
