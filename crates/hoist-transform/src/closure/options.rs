//! Options controlling closure conversion

use std::collections::BTreeSet;

use hoist_types::LocalId;
use serde::{Deserialize, Serialize};

/// Optimization level of the compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    /// Keep one environment per scope so every variable has its own lifetime in the debugger
    #[default]
    Debug,
    /// Merge environments with identical capturing functions
    Release,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoweringOptions {
    pub optimization: OptimizationLevel,
    /// Edit-and-continue generation; 0 for a regular build
    pub generation: u32,
    /// Locals that keep their own slot even when hoisted into an environment
    pub assign_locals: BTreeSet<LocalId>,
    /// Report a hint for each heap environment and each cached function value
    pub report_allocations: bool,
}

impl LoweringOptions {
    pub fn release() -> Self {
        Self {
            optimization: OptimizationLevel::Release,
            ..Self::default()
        }
    }

    pub fn is_release(&self) -> bool {
        self.optimization == OptimizationLevel::Release
    }
}
