//! Internal invariant violations raised by closure conversion
//!
//! None of these are caused by user code. Each one means an upstream pass
//! handed over IR that breaks the contract closure conversion relies on.

use hoist_diagnostics::DiagnosticCode;
use hoist_types::{FuncId, LocalId, NodeId};

use super::analysis::EnvId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClosureConversionError {
    #[error("local {local} is referenced but no enclosing scope declares it")]
    UndeclaredVariable { local: LocalId },

    #[error("nested function {func} is referenced but never declared")]
    UnknownFunction { func: FuncId },

    #[error("environment {env} captured by {function} is not reachable from its declaration")]
    UnreachableEnvironment { env: EnvId, function: String },

    #[error("environment {env} already has parent {existing}, cannot also chain to {new}")]
    ConflictingParent {
        env: EnvId,
        existing: EnvId,
        new: EnvId,
    },

    #[error("cannot merge environment of scope {from} into scope {into}: capturing functions differ")]
    MergeMismatch { from: NodeId, into: NodeId },

    #[error("no frame pointer reaches environment type {ty}")]
    UnreachableFrame { ty: String },

    #[error("internal closure conversion error: {0}")]
    Internal(String),
}

impl ClosureConversionError {
    /// Diagnostic code reported for this error
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::UndeclaredVariable { .. } => DiagnosticCode::UndeclaredVariable,
            Self::UnknownFunction { .. } => DiagnosticCode::UnknownNestedFunction,
            Self::UnreachableEnvironment { .. } => DiagnosticCode::UnreachableEnvironment,
            Self::ConflictingParent { .. } => DiagnosticCode::ConflictingEnvironmentParent,
            Self::MergeMismatch { .. } => DiagnosticCode::EnvironmentMergeMismatch,
            Self::UnreachableFrame { .. } => DiagnosticCode::UnreachableFrame,
            Self::Internal(_) => DiagnosticCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClosureConversionError>;
