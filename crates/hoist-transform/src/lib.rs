//! IR Transformations for hoist
//!
//! This crate contains the lowering passes that run on bound method bodies:
//! - Closure conversion

pub mod closure;

// Re-export the entry point and what callers need to drive it
pub use closure::{
    baseline_key, convert_closures, Baseline, ClosureConversionError, LoweredMethod,
    LoweringOptions, MethodDebugInfo, OptimizationLevel, SingletonFrameCache, SlotAllocator,
};
