//! Diagnostic infrastructure for the hoist lowering passes.
//!
//! Lowering passes run after binding, so most user-facing problems have
//! already been reported. What remains here is:
//! - Spans identifying IR nodes (file plus syntax offsets)
//! - Diagnostic codes for edit-and-continue rude edits and internal errors
//! - A sink collecting diagnostics across methods, each tagged with its method
//! - Emitters for terminal, JSON and plain text output
//!
//! # Example
//!
//! ```
//! use hoist_diagnostics::{
//!     Diagnostic, DiagnosticCode, DiagnosticEmitter, Diagnostics, FileId, SimpleEmitter, Span,
//! };
//!
//! let mut diagnostics = Diagnostics::new();
//! diagnostics.push(
//!     Diagnostic::new(DiagnosticCode::RudeEdit, "closure parent changed")
//!         .with_span(Span::new(FileId(0), 10, 24))
//!         .in_method("Program.Main")
//!         .build(),
//! );
//!
//! let mut out = Vec::new();
//! let mut emitter = SimpleEmitter::new(&mut out);
//! emitter.emit_all(&diagnostics).unwrap();
//! assert!(!diagnostics.has_errors());
//! assert_eq!(
//!     String::from_utf8(out).unwrap(),
//!     "file0:10..24: Program.Main: warning: closure parent changed [E001]\n"
//! );
//! ```

pub mod diagnostic;
pub mod emitter;
pub mod span;

// Re-export commonly used types
pub use diagnostic::{Diagnostic, DiagnosticBuilder, DiagnosticCode, Diagnostics, Severity};
pub use emitter::{DiagnosticEmitter, JsonEmitter, SimpleEmitter, TerminalEmitter};
pub use span::{FileId, Label, Span};
