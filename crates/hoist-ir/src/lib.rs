//! Bound Intermediate Representation for hoist
//!
//! The IR is a typed tree of method bodies as produced by binding. Nested
//! functions (lambdas and local functions) still appear inline; lowering
//! passes turn it into flat callables.

pub mod build;
pub mod ir;
pub mod printer;
pub mod visit;

pub use build::MethodBuilder;
pub use ir::*;
pub use printer::Printer;
pub use visit::Visitor;
