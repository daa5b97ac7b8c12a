//! Closure conversion
//!
//! Lowers lambdas and local functions of one method body into synthesized
//! callables. Captured variables move into environment types allocated at
//! the start of the scope declaring them:
//! 1. Build the scope tree and record what every nested function captures
//! 2. Assign environments, choose struct or class, chain class environments
//! 3. Merge environments (release builds) and inline a `this`-only one
//! 4. Classify each nested function and rewrite the body against the result

pub mod analysis;
pub mod classify;
pub mod debug_info;
pub mod error;
pub mod frame_cache;
pub mod names;
pub mod options;
mod rewriter;
pub mod scope_tree;
pub mod synthesized;

use hoist_diagnostics::{Diagnostic, DiagnosticCode, Diagnostics};
use hoist_ir::visit::contains_nested_functions;
use hoist_ir::MethodBody;

pub use analysis::{Analysis, EnvId, Environment};
pub use classify::{classify, ClosureKind};
pub use debug_info::{
    baseline_key, Baseline, DebugId, DebugInfoBuilder, MethodDebugInfo, RudeEdit, RudeEditKind,
    SlotAllocator,
};
pub use error::{ClosureConversionError, Result};
pub use frame_cache::SingletonFrameCache;
pub use options::{LoweringOptions, OptimizationLevel};
pub use scope_tree::ScopeTree;
pub use synthesized::{
    EnvironmentKind, EnvironmentType, FieldKind, HoistedField, LoweredMethod, SynthesizedCallable,
};

use rewriter::Rewriter;

/// Convert the closures of one method body.
///
/// `slot_allocator` supplies the debug ids of a previous generation, if any.
/// Stateless function values of non-generic methods land on the shared frame
/// in `frame_cache`. Hints, rude edits and fatal errors are reported to
/// `diagnostics`; an error aborts lowering of the method.
pub fn convert_closures(
    method: MethodBody,
    options: &LoweringOptions,
    slot_allocator: Option<&dyn SlotAllocator>,
    frame_cache: &mut SingletonFrameCache,
    diagnostics: &mut Diagnostics,
) -> Result<LoweredMethod> {
    let qualified_name = format!("{}.{}", method.containing_type, method.name);
    let span = method.span;

    match lower(method, options, slot_allocator, frame_cache) {
        Ok((lowered, notes)) => {
            log::debug!(
                "lowered {}: {} environments, {} callables",
                qualified_name,
                lowered.environments.len(),
                lowered.callables.len()
            );
            if options.report_allocations {
                diagnostics.extend_in_method(&qualified_name, notes);
            }
            let rude_edits = lowered.debug_info.rude_edits.iter().map(|rude_edit| {
                Diagnostic::new(
                    DiagnosticCode::RudeEdit,
                    format!(
                        "{} (previous id {} cannot be reused)",
                        rude_edit.message, rude_edit.previous_id
                    ),
                )
                .with_span(span)
                .with_help("restart the debugging session to apply this edit")
                .build()
            });
            diagnostics.extend_in_method(&qualified_name, rude_edits);
            Ok(lowered)
        }
        Err(err) => {
            log::error!("closure conversion of {} failed: {}", qualified_name, err);
            diagnostics.push(
                Diagnostic::new(err.code(), err.to_string())
                    .with_span(span)
                    .in_method(qualified_name)
                    .build(),
            );
            Err(err)
        }
    }
}

/// Lower `method`, returning the allocation notes next to the result.
fn lower(
    method: MethodBody,
    options: &LoweringOptions,
    slot_allocator: Option<&dyn SlotAllocator>,
    frame_cache: &mut SingletonFrameCache,
) -> Result<(LoweredMethod, Vec<Diagnostic>)> {
    if let Some(allocator) = slot_allocator {
        let previous = allocator.latest_generation();
        if options.generation <= previous {
            return Err(ClosureConversionError::Internal(format!(
                "generation {} must follow the baseline's generation {}",
                options.generation, previous
            )));
        }
    }

    if !contains_nested_functions(&method.body) {
        let debug_info =
            DebugInfoBuilder::new(slot_allocator, method.ordinal, options.generation).finish();
        let lowered = LoweredMethod {
            method,
            callables: Vec::new(),
            environments: Vec::new(),
            debug_info,
        };
        return Ok((lowered, Vec::new()));
    }

    let tree = ScopeTree::build(&method)?;
    let analysis = Analysis::analyze(tree, options)?;
    let rewritten =
        Rewriter::new(&method, &analysis, options, slot_allocator, frame_cache).rewrite(method)?;

    let leftover = contains_nested_functions(&rewritten.method.body)
        || rewritten
            .callables
            .iter()
            .any(|c| contains_nested_functions(&c.body));
    if leftover {
        return Err(ClosureConversionError::Internal(
            "nested function survived closure conversion".to_string(),
        ));
    }

    let lowered = LoweredMethod {
        method: rewritten.method,
        callables: rewritten.callables,
        environments: rewritten.environments,
        debug_info: rewritten.debug_info,
    };
    Ok((lowered, rewritten.notes))
}
