use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use shader_graph_compiler::compiler::StageSummary;
use shader_graph_compiler::dsl::{self, ShaderStage};
use shader_graph_compiler::validation::validate_glsl_with_context;
use shader_graph_compiler::{CompileContext, EngineConfig, compile_graph};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Clone)]
struct Cli {
    graph: Option<PathBuf>,
    engine: Option<PathBuf>,
    stage: Option<ShaderStage>,
    output_dir: Option<PathBuf>,
    preserve: Vec<String>,
    defines: Vec<(String, String)>,
    validate: bool,
    summary: bool,
}

fn parse_stage(v: &str) -> Result<ShaderStage> {
    match v {
        "fragment" | "frag" => Ok(ShaderStage::Fragment),
        "vertex" | "vert" => Ok(ShaderStage::Vertex),
        other => Err(anyhow!("unknown stage: {other} (expected fragment or vertex)")),
    }
}

fn parse_define(v: &str) -> (String, String) {
    match v.split_once('=') {
        Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
        None => (v.trim().to_string(), "1".to_string()),
    }
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--validate" => {
                cli.validate = true;
                i += 1;
            }
            "--summary" => {
                cli.summary = true;
                i += 1;
            }
            "--graph" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --graph"));
                };
                cli.graph = Some(PathBuf::from(v));
                i += 2;
            }
            "--engine" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --engine"));
                };
                cli.engine = Some(PathBuf::from(v));
                i += 2;
            }
            "--stage" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --stage"));
                };
                cli.stage = Some(parse_stage(v)?);
                i += 2;
            }
            "--outputdir" | "--output-dir" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --outputdir"));
                };
                cli.output_dir = Some(PathBuf::from(v));
                i += 2;
            }
            "--preserve" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --preserve"));
                };
                cli.preserve.extend(
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToOwned::to_owned),
                );
                i += 2;
            }
            "--define" | "-D" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --define"));
                };
                cli.defines.push(parse_define(v));
                i += 2;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --graph <graph.json>, --engine <engine.json>, --stage <fragment|vertex>, --outputdir <dir>, --preserve <a,b>, --define <NAME[=VALUE]>, --validate, --summary)"
                ));
            }
        }
    }
    Ok(cli)
}

fn load_engine(cli: &Cli) -> Result<EngineConfig> {
    let mut engine = match cli.engine.as_deref() {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read --engine file {}", path.display()))?;
            serde_json::from_str::<EngineConfig>(&text).with_context(|| format!("failed to parse engine config {}", path.display()))?
        }
        None => EngineConfig::new("cli"),
    };
    engine = engine.with_preserved(cli.preserve.iter().cloned());
    for (name, value) in &cli.defines {
        engine = engine.with_define(name.clone(), value.clone());
    }
    Ok(engine)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    let Some(graph_path) = cli.graph.as_deref() else {
        return Err(anyhow!("missing --graph <graph.json>"));
    };

    let graph = dsl::load_graph_from_path(graph_path)?;
    let engine = load_engine(&cli)?;
    let mut ctx = CompileContext::new();
    let result = compile_graph(&mut ctx, &engine, &graph)
        .with_context(|| format!("failed to compile {}", graph_path.display()))?;

    for diagnostic in &result.diagnostics {
        eprintln!("[diagnostic] {diagnostic}");
    }

    let stages: Vec<ShaderStage> = match cli.stage {
        Some(stage) => vec![stage],
        None => ShaderStage::ALL.to_vec(),
    };
    for stage in stages {
        let sections = result.sections(stage);
        if sections.is_empty() {
            continue;
        }
        let source = result.source(stage, &engine.merge_options);
        if cli.validate {
            validate_glsl_with_context(&source, stage, &graph_path.display().to_string())?;
            tracing::info!(%stage, "validated");
        }
        if cli.summary {
            let summary = serde_json::to_string(&StageSummary::new(stage, sections))?;
            eprintln!("[summary] {summary}");
        }
        match cli.output_dir.as_deref() {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create output dir {}", dir.display()))?;
                let ext = match stage {
                    ShaderStage::Fragment => "frag",
                    ShaderStage::Vertex => "vert",
                };
                let path = dir.join(format!("{}.{ext}", engine.name));
                std::fs::write(&path, &source).with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(path = %path.display(), "wrote {stage} program");
            }
            None => {
                println!("// {stage}");
                println!("{source}");
            }
        }
    }
    Ok(())
}
