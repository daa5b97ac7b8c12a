//! Lower command - runs closure conversion over compilation units

use anyhow::{anyhow, Context, Result};
use clap::Args;
use hoist_diagnostics::{DiagnosticEmitter, Diagnostics, JsonEmitter, Severity, TerminalEmitter};
use hoist_ir::CompilationUnit;
use hoist_transform::closure::synthesized::{environment_text, EnvironmentType};
use hoist_transform::{
    baseline_key, convert_closures, Baseline, LoweredMethod, LoweringOptions,
    SingletonFrameCache, SlotAllocator,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{Config, Overrides};
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct LowerArgs {
    /// Compilation unit (JSON) or a directory of them
    pub input: PathBuf,

    /// Write the lowered output here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Merge environments as in an optimized build
    #[arg(long)]
    pub release: bool,

    /// Edit-and-continue generation (0 for a regular build)
    #[arg(long)]
    pub generation: Option<u32>,

    /// Debug info of the previous generation
    #[arg(long)]
    pub baseline: Option<PathBuf>,

    /// Write the debug info of this generation
    #[arg(long)]
    pub emit_baseline: Option<PathBuf>,

    /// Report every environment allocation and cached function value
    #[arg(long)]
    pub report_allocations: bool,

    /// Configuration file (defaults to hoist.toml next to the input)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Lowered form of one compilation unit
#[derive(Debug, Serialize)]
pub struct LoweredUnit {
    pub name: String,
    pub methods: Vec<LoweredMethod>,
    /// Shared `<>c` frames, emitted once per unit
    pub shared_frames: Vec<EnvironmentType>,
    /// Methods that failed to lower; their errors are in the diagnostics
    pub failed: Vec<String>,
}

impl LoweredUnit {
    pub fn to_text(&self) -> String {
        let mut out = format!("// unit {}\n", self.name);
        for method in &self.methods {
            out.push('\n');
            out.push_str(&method.to_text());
        }
        for frame in &self.shared_frames {
            out.push_str(&environment_text(frame));
        }
        for name in &self.failed {
            out.push_str(&format!("\n// {} was not lowered\n", name));
        }
        out
    }
}

/// Collect compilation units below `path`
fn collect_units(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(anyhow!("Input not found: {}", path.display()));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    files.sort();
    Ok(files)
}

fn read_unit(path: &Path) -> Result<CompilationUnit> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse compilation unit {}", path.display()))
}

fn read_baseline(path: &Path) -> Result<Baseline> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read baseline {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse baseline {}", path.display()))
}

/// A baseline only makes sense for a later generation; generation 0 would
/// hand out ids that collide with the baseline's.
fn check_generation(baseline: Option<&Path>, generation: u32) -> Result<()> {
    match baseline {
        Some(path) if generation == 0 => Err(anyhow!(
            "Baseline {} given without --generation; pass the generation being built (1 or later)",
            path.display()
        )),
        _ => Ok(()),
    }
}

/// Lower every method of `unit`. Debug info of the lowered methods is added
/// to `next_baseline`.
pub fn lower_unit(
    unit: CompilationUnit,
    options: &LoweringOptions,
    baseline: &Baseline,
    next_baseline: &mut Baseline,
    diagnostics: &mut Diagnostics,
) -> LoweredUnit {
    let mut frame_cache = SingletonFrameCache::new();
    let mut methods = Vec::new();
    let mut failed = Vec::new();

    for method in unit.methods {
        let key = baseline_key(&method.containing_type, &method.name, method.ordinal);
        let allocator = baseline.get(&key).map(|info| info as &dyn SlotAllocator);
        let display_name = format!("{}.{}", method.containing_type, method.name);
        match convert_closures(method, options, allocator, &mut frame_cache, diagnostics) {
            Ok(lowered) => {
                next_baseline.insert(key, lowered.debug_info.clone());
                methods.push(lowered);
            }
            Err(_) => failed.push(display_name),
        }
    }

    log::info!(
        "unit {}: {} methods lowered, {} failed, {} shared frames",
        unit.name,
        methods.len(),
        failed.len(),
        frame_cache.len()
    );
    LoweredUnit {
        name: unit.name,
        methods,
        shared_frames: frame_cache.into_frames(),
        failed,
    }
}

pub fn run(args: LowerArgs, format: OutputFormat, use_color: bool, quiet: bool) -> Result<()> {
    let config = Config::discover(args.config.as_deref(), &args.input)?;
    let overrides = Overrides {
        release: args.release,
        generation: args.generation,
        report_allocations: args.report_allocations,
        baseline: args.baseline.clone(),
    };
    let options = config.lowering_options(&overrides);
    let baseline_path = config.baseline(&overrides);
    check_generation(baseline_path.as_deref(), options.generation)?;
    let baseline = match baseline_path {
        Some(path) => read_baseline(&path)?,
        None => Baseline::new(),
    };
    if options.generation > 0 && baseline.is_empty() {
        log::warn!(
            "generation {} without a baseline; every id will be fresh",
            options.generation
        );
    }

    let files = collect_units(&args.input)?;
    if files.is_empty() {
        return Err(anyhow!("No compilation units found in {}", args.input.display()));
    }

    let mut diagnostics = Diagnostics::new();
    let mut next_baseline = Baseline::new();
    let mut units = Vec::new();
    for file in &files {
        let unit = read_unit(file)?;
        units.push(lower_unit(
            unit,
            &options,
            &baseline,
            &mut next_baseline,
            &mut diagnostics,
        ));
    }

    let rendered = match format {
        OutputFormat::Text => units
            .iter()
            .map(LoweredUnit::to_text)
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => serde_json::to_string_pretty(&units)?,
    };
    match &args.output {
        Some(path) => fs::write(path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => {
            if !quiet {
                println!("{}", rendered);
            }
        }
    }

    if let Some(path) = &args.emit_baseline {
        let json = serde_json::to_string_pretty(&next_baseline)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write baseline {}", path.display()))?;
        log::info!("wrote baseline for {} methods to {}", next_baseline.len(), path.display());
    }

    let has_errors = diagnostics.has_errors();
    let error_count = diagnostics.error_count();
    if quiet {
        diagnostics.retain_at_least(Severity::Warning);
    }

    // Diagnostics go to stderr so they never mix with the lowered output
    if !diagnostics.is_empty() {
        let stderr = std::io::stderr();
        match format {
            OutputFormat::Text => {
                let mut emitter = TerminalEmitter::new(stderr.lock(), use_color);
                emitter.emit_all(&diagnostics)?;
                emitter.emit_summary(&diagnostics)?;
            }
            OutputFormat::Json => {
                let mut emitter = JsonEmitter::new(stderr.lock());
                emitter.emit_all(&diagnostics)?;
                emitter.emit_summary(&diagnostics)?;
            }
        }
    }

    if has_errors {
        return Err(anyhow!("Lowering failed with {} error(s)", error_count));
    }
    Ok(())
}
