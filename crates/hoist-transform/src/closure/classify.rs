//! Placement of each nested function after analysis

use serde::{Deserialize, Serialize};

use super::analysis::Analysis;
use super::scope_tree::NestedFunction;

/// Where a lowered nested function lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClosureKind {
    /// Static member of the containing type
    Static,
    /// Instance member of a shared, stateless frame
    Singleton,
    /// Instance member of the containing type
    ThisOnly,
    /// Instance member of its containing environment's type
    General,
}

impl ClosureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosureKind::Static => "static",
            ClosureKind::Singleton => "singleton",
            ClosureKind::ThisOnly => "this-only",
            ClosureKind::General => "general",
        }
    }
}

impl std::fmt::Display for ClosureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify one nested function. Stateless functions that become function
/// values need an instance receiver, and so do all of them when the method
/// sits in a variant interface, where static synthesized members are not allowed.
pub fn classify(function: &NestedFunction, in_variant_interface: bool) -> ClosureKind {
    if function.containing_environment.is_some() {
        ClosureKind::General
    } else if function.captures_this {
        ClosureKind::ThisOnly
    } else if function.converted_to_delegate || in_variant_interface {
        ClosureKind::Singleton
    } else {
        ClosureKind::Static
    }
}

impl Analysis {
    pub fn closure_kind(&self, function: &NestedFunction) -> ClosureKind {
        classify(function, self.tree.in_variant_interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::options::LoweringOptions;
    use crate::closure::scope_tree::ScopeTree;
    use hoist_ir::build::*;
    use hoist_ir::Expr;
    use hoist_types::Type;

    #[test]
    fn test_each_kind() {
        let mut b = MethodBuilder::instance("C", "M");
        let x = b.local("x", Type::Int32);

        let stat = b.next_func_id();
        let stat_body = b.block(vec![], vec![ret(int(1))]);
        let stat_decl = b.local_function(stat, "s", vec![], Type::Int32, stat_body);

        let singleton_body = b.block(vec![], vec![ret(int(2))]);
        let singleton = b.lambda(vec![], Type::Int32, singleton_body);

        let this_only_body = b.block(vec![], vec![ret(Expr::field(Expr::This, "C", "f"))]);
        let this_only = b.lambda(vec![], Type::Int32, this_only_body);

        let general_body = b.block(vec![], vec![ret(local(x))]);
        let general = b.lambda(vec![], Type::Int32, general_body);

        let inner = b.block(vec![x], vec![expr(general)]);
        let body = b.block(
            vec![],
            vec![
                stat_decl,
                expr(call_local(stat, vec![])),
                expr(singleton),
                expr(this_only),
                hoist_ir::Stmt::Block(inner),
            ],
        );
        let method = b.finish(body);

        let tree = ScopeTree::build(&method).expect("scope tree");
        let analysis = Analysis::analyze(tree, &LoweringOptions::default()).expect("analysis");
        let kinds: Vec<ClosureKind> = analysis
            .tree
            .functions
            .iter()
            .map(|f| analysis.closure_kind(f))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ClosureKind::Static,
                ClosureKind::Singleton,
                ClosureKind::ThisOnly,
                ClosureKind::General
            ]
        );

        // Classification is a pure function of the analysis
        let again: Vec<ClosureKind> = analysis
            .tree
            .functions
            .iter()
            .map(|f| analysis.closure_kind(f))
            .collect();
        assert_eq!(kinds, again);
    }

    #[test]
    fn test_variant_interface_forces_instance_placement() {
        let mut b = MethodBuilder::new("I", "M").variant_interface();
        let f = b.next_func_id();
        let f_body = b.block(vec![], vec![ret(int(1))]);
        let decl = b.local_function(f, "f", vec![], Type::Int32, f_body);
        let body = b.block(vec![], vec![decl, expr(call_local(f, vec![]))]);
        let method = b.finish(body);

        let tree = ScopeTree::build(&method).expect("scope tree");
        let analysis = Analysis::analyze(tree, &LoweringOptions::default()).expect("analysis");
        assert_eq!(
            analysis.closure_kind(&analysis.tree.functions[0]),
            ClosureKind::Singleton
        );
    }
}
