//! Capture and environment analysis
//!
//! Decides which scopes allocate an environment, whether each environment
//! is a struct passed by reference or a heap class, which environment a
//! nested function is lowered onto, and how class environments chain to
//! each other. Release builds then merge environments that are referenced
//! by exactly the same functions, and a top-level environment holding only
//! `this` is dropped in favor of the containing type.

use std::collections::BTreeSet;

use hoist_types::{FuncId, LocalId};

use super::error::{ClosureConversionError, Result};
use super::options::LoweringOptions;
use super::scope_tree::{ScopeId, ScopeTree};

pub type EnvId = usize;

#[derive(Debug, Clone)]
pub struct Environment {
    pub id: EnvId,
    /// Scope the environment is allocated in
    pub scope: ScopeId,
    /// Hoisted variables, in field order
    pub captured_variables: Vec<LocalId>,
    /// Value type passed by reference instead of a heap object
    pub is_struct: bool,
    /// Environment reachable through the parent field. None with
    /// `captures_parent` set means the field holds the enclosing instance.
    pub parent: Option<EnvId>,
    pub captures_parent: bool,
    /// Folded into another environment or eliminated
    pub discarded: bool,
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub tree: ScopeTree,
    pub environments: Vec<Environment>,
}

impl Analysis {
    pub fn analyze(tree: ScopeTree, options: &LoweringOptions) -> Result<Analysis> {
        let mut analysis = Analysis {
            tree,
            environments: Vec::new(),
        };
        analysis.make_and_assign_environments();
        analysis.compute_lambda_scopes_and_frame_captures()?;
        if options.is_release() {
            let merged = analysis.merge_environments()?;
            log::debug!("merged {} environments", merged);
        }
        analysis.inline_this_only_environment();
        Ok(analysis)
    }

    pub fn environment(&self, env: EnvId) -> &Environment {
        &self.environments[env]
    }

    /// Environments that survive merging and inlining
    pub fn live_environments(&self) -> impl Iterator<Item = &Environment> {
        self.environments.iter().filter(|e| !e.discarded)
    }

    pub fn scope_environment(&self, scope: ScopeId) -> Option<EnvId> {
        self.tree.scope(scope).environment
    }

    /// For every scope declaring captured variables, find the least fixed
    /// point of nested functions that must reference its environment.
    fn make_and_assign_environments(&mut self) {
        let variance = self.tree.in_variant_interface;
        for scope in self.tree.preorder() {
            let declared = self.tree.scope(scope).declared_variables.clone();
            if declared.is_empty() {
                continue;
            }
            let candidates = self.tree.functions_within(scope);

            let mut closures: Vec<FuncId> = Vec::new();
            loop {
                let mut added = false;
                for &func in &candidates {
                    if closures.contains(&func) {
                        continue;
                    }
                    let Ok(info) = self.tree.function(func) else {
                        continue;
                    };
                    let captures_variable =
                        declared.iter().any(|v| info.captured_variables.contains(v));
                    let captures_closure =
                        closures.iter().any(|c| info.captured_functions.contains(c));
                    if captures_variable || captures_closure {
                        closures.push(func);
                        added = true;
                    }
                }
                if !added {
                    break;
                }
            }
            if closures.is_empty() {
                continue;
            }

            let is_struct = !variance
                && closures.iter().all(|&func| {
                    self.tree
                        .function(func)
                        .map(|f| f.can_take_ref_parameters())
                        .unwrap_or(false)
                });
            let env = self.environments.len();
            let holds_this = self
                .tree
                .this_local
                .map_or(false, |this| declared.contains(&this));
            self.environments.push(Environment {
                id: env,
                scope,
                captured_variables: declared,
                is_struct,
                parent: None,
                captures_parent: false,
                discarded: false,
            });
            self.tree.scope_mut(scope).environment = Some(env);
            log::debug!(
                "scope {} gets {} environment {} referenced by {} functions",
                self.tree.scope(scope).node,
                if is_struct { "struct" } else { "class" },
                env,
                closures.len()
            );

            for func in closures {
                if let Ok(info) = self.tree.function_mut(func) {
                    info.captured_environments.push(env);
                    if holds_this {
                        info.captures_this = true;
                    }
                }
            }
        }
    }

    /// Pick each function's containing environment and link the class
    /// environments between it and the outermost one it captures.
    fn compute_lambda_scopes_and_frame_captures(&mut self) -> Result<()> {
        for index in 0..self.tree.functions.len() {
            let func = &self.tree.functions[index];
            if func.captured_environments.is_empty() {
                continue;
            }
            let name = func.display_name();
            let mut remaining: BTreeSet<EnvId> = func.captured_environments.iter().copied().collect();

            let mut current = Some(func.scope);
            let mut containing = None;
            while let Some(scope) = current {
                current = self.tree.scope(scope).parent;
                if let Some(env) = self.tree.scope(scope).environment {
                    if remaining.remove(&env) && !self.environments[env].is_struct {
                        containing = Some(env);
                        break;
                    }
                }
            }
            self.tree.functions[index].containing_environment = containing;

            let mut previous = containing;
            while let Some(scope) = current {
                if remaining.is_empty() {
                    break;
                }
                current = self.tree.scope(scope).parent;
                let Some(env) = self.tree.scope(scope).environment else {
                    continue;
                };
                if !self.environments[env].is_struct {
                    if let Some(inner) = previous {
                        self.link_parent(inner)?;
                    }
                    previous = Some(env);
                }
                remaining.remove(&env);
            }

            if let Some(&env) = remaining.iter().next() {
                return Err(ClosureConversionError::UnreachableEnvironment { env, function: name });
            }
        }
        Ok(())
    }

    /// Mark `env` as capturing its parent, which is whatever class
    /// environment is live when `env` is allocated.
    fn link_parent(&mut self, env: EnvId) -> Result<()> {
        let parent = self.runtime_enclosing_frame(self.environments[env].scope)?;
        self.set_parent(env, parent)
    }

    fn set_parent(&mut self, env: EnvId, parent: Option<EnvId>) -> Result<()> {
        let slot = &mut self.environments[env];
        if slot.captures_parent && slot.parent != parent {
            let existing = slot.parent.unwrap_or(env);
            return Err(ClosureConversionError::ConflictingParent {
                env,
                existing,
                new: parent.unwrap_or(env),
            });
        }
        slot.captures_parent = true;
        slot.parent = parent;
        Ok(())
    }

    /// The class environment held by the innermost frame pointer on entry
    /// to `scope`. Inside a nested function that is the environment the
    /// function is lowered onto.
    fn runtime_enclosing_frame(&self, scope: ScopeId) -> Result<Option<EnvId>> {
        let mut current = scope;
        loop {
            let info = self.tree.scope(current);
            if info.is_function_body {
                let func = info
                    .containing_function
                    .ok_or_else(|| ClosureConversionError::Internal(format!(
                        "function body scope {} has no function",
                        info.node
                    )))?;
                return Ok(self.tree.function(func)?.containing_environment);
            }
            let Some(parent) = info.parent else {
                return Ok(None);
            };
            current = parent;
            if let Some(env) = self.tree.scope(current).environment {
                if !self.environments[env].is_struct {
                    return Ok(Some(env));
                }
            }
        }
    }

    /// Functions referencing `env` directly or through a child environment
    /// that captures it as its parent
    pub fn capturing_functions(&self, env: EnvId) -> BTreeSet<FuncId> {
        let mut result: BTreeSet<FuncId> = self
            .tree
            .functions
            .iter()
            .filter(|f| f.captured_environments.contains(&env))
            .map(|f| f.func)
            .collect();
        for child in &self.environments {
            if !child.discarded && child.captures_parent && child.parent == Some(env) && child.id != env {
                result.extend(self.capturing_functions(child.id));
            }
        }
        result
    }

    /// Merge class environments into the highest ancestor environment
    /// referenced by exactly the same functions. Returns the number of
    /// environments merged away.
    pub fn merge_environments(&mut self) -> Result<usize> {
        let mut merged = 0;
        for scope in self.tree.preorder() {
            let Some(env) = self.tree.scope(scope).environment else {
                continue;
            };
            if self.environments[env].is_struct {
                continue;
            }
            let closures = self.capturing_functions(env);

            let mut target = None;
            let mut current = scope;
            while self.tree.scope(current).can_merge_with_parent {
                let Some(parent) = self.tree.scope(current).parent else {
                    break;
                };
                current = parent;
                let Some(parent_env) = self.tree.scope(parent).environment else {
                    continue;
                };
                if self.environments[parent_env].is_struct
                    || self.capturing_functions(parent_env) != closures
                {
                    break;
                }
                target = Some(parent);
            }

            if let Some(target_scope) = target {
                self.merge_into(scope, target_scope)?;
                merged += 1;
            }
        }
        Ok(merged)
    }

    fn merge_into(&mut self, from_scope: ScopeId, into_scope: ScopeId) -> Result<()> {
        let mismatch = || ClosureConversionError::MergeMismatch {
            from: self.tree.scope(from_scope).node,
            into: self.tree.scope(into_scope).node,
        };
        let (Some(from), Some(into)) = (
            self.tree.scope(from_scope).environment,
            self.tree.scope(into_scope).environment,
        ) else {
            return Err(mismatch());
        };
        if self.capturing_functions(from) != self.capturing_functions(into) {
            return Err(mismatch());
        }
        log::debug!(
            "merging environment {} of scope {} into environment {} of scope {}",
            from,
            self.tree.scope(from_scope).node,
            into,
            self.tree.scope(into_scope).node
        );

        let moved = std::mem::take(&mut self.environments[from].captured_variables);
        self.environments[into].captured_variables.extend(moved);
        self.environments[from].discarded = true;
        self.tree.scope_mut(from_scope).environment = None;

        for func in &mut self.tree.functions {
            let mut redirected = Vec::with_capacity(func.captured_environments.len());
            for &env in &func.captured_environments {
                let env = if env == from { into } else { env };
                if !redirected.contains(&env) {
                    redirected.push(env);
                }
            }
            func.captured_environments = redirected;
            if func.containing_environment == Some(from) {
                func.containing_environment = Some(into);
            }
        }
        for env in &mut self.environments {
            if env.parent == Some(from) {
                env.parent = Some(into);
            }
        }
        Ok(())
    }

    /// Drop a top-level environment that holds nothing but `this`.
    fn inline_this_only_environment(&mut self) {
        let Some(this) = self.tree.this_local else {
            return;
        };
        let Some(env) = self.tree.scope(ScopeTree::ROOT).environment else {
            return;
        };
        if self.environments[env].captured_variables != [this] {
            return;
        }

        let remove = if self.environments[env].is_struct {
            !self.tree.functions.iter().any(|f| {
                f.captured_environments.contains(&env) && f.containing_environment.is_some()
            })
        } else {
            !self.tree.in_variant_interface
        };
        if !remove {
            return;
        }

        log::debug!("inlining this-only environment {}", env);
        self.tree.scope_mut(ScopeTree::ROOT).environment = None;
        self.environments[env].discarded = true;
        for func in &mut self.tree.functions {
            func.captured_environments.retain(|&e| e != env);
            if func.containing_environment == Some(env) {
                func.containing_environment = None;
            }
        }
        for other in &mut self.environments {
            if other.parent == Some(env) {
                other.parent = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::options::OptimizationLevel;
    use hoist_ir::build::*;
    use hoist_ir::{Expr, MethodBody, Stmt};
    use hoist_types::Type;

    fn analyze(method: &MethodBody, optimization: OptimizationLevel) -> Analysis {
        let tree = ScopeTree::build(method).expect("scope tree should build");
        let options = LoweringOptions {
            optimization,
            ..LoweringOptions::default()
        };
        Analysis::analyze(tree, &options).expect("analysis should succeed")
    }

    /// `x` in the method body, `y` in a nested block, one lambda in the
    /// nested block capturing both
    fn nested_capture(loop_body: bool) -> (MethodBody, hoist_types::NodeId) {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let y = b.local("y", Type::Int32);
        let lambda_body = b.block(vec![], vec![ret(add(local(x), local(y)))]);
        let lambda = b.lambda(vec![], Type::Int32, lambda_body);
        let inner = b.block(vec![y], vec![expr(lambda)]);
        let inner_node = inner.id;
        let stmt = if loop_body {
            while_loop(Expr::Bool(true), inner)
        } else {
            Stmt::Block(inner)
        };
        let body = b.block(vec![x], vec![stmt]);
        (b.finish(body), inner_node)
    }

    #[test]
    fn test_two_lambdas_share_one_environment() {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let first_body = b.block(vec![], vec![expr(assign(local(x), int(1)))]);
        let first = b.lambda(vec![], Type::Void, first_body);
        let second_body = b.block(vec![], vec![ret(local(x))]);
        let second = b.lambda(vec![], Type::Int32, second_body);
        let body = b.block(vec![x], vec![expr(first), expr(second)]);
        let method = b.finish(body);

        let analysis = analyze(&method, OptimizationLevel::Debug);
        assert_eq!(analysis.live_environments().count(), 1);
        let env = analysis.environment(0);
        assert!(!env.is_struct, "lambdas force a class environment");
        for func in &analysis.tree.functions {
            assert_eq!(func.captured_environments, vec![0]);
            assert_eq!(func.containing_environment, Some(0));
        }
    }

    #[test]
    fn test_local_function_gets_struct_environment() {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let f = b.next_func_id();
        let f_body = b.block(vec![], vec![ret(local(x))]);
        let decl = b.local_function(f, "f", vec![], Type::Int32, f_body);
        let body = b.block(vec![x], vec![decl, expr(call_local(f, vec![]))]);
        let method = b.finish(body);

        let analysis = analyze(&method, OptimizationLevel::Debug);
        let env = analysis.environment(0);
        assert!(env.is_struct);
        let info = analysis.tree.function(f).expect("f");
        assert_eq!(info.captured_environments, vec![0]);
        assert_eq!(info.containing_environment, None, "struct environments are passed by ref");
    }

    #[test]
    fn test_converted_or_async_local_function_forces_class() {
        for make_async in [false, true] {
            let mut b = MethodBuilder::new("C", "M");
            let x = b.local("x", Type::Int32);
            let f = b.next_func_id();
            let f_body = b.block(vec![], vec![ret(local(x))]);
            let mut decl = b.function(
                f,
                hoist_ir::FunctionKind::LocalFunction,
                Some("f"),
                vec![],
                Type::Int32,
                f_body,
            );
            decl.is_async = make_async;
            let delegate_type = b.delegate_type(&decl);
            let use_site = if make_async {
                expr(call_local(f, vec![]))
            } else {
                expr(local_function_value(f, delegate_type))
            };
            let body = b.block(vec![x], vec![Stmt::LocalFunction(Box::new(decl)), use_site]);
            let method = b.finish(body);

            let analysis = analyze(&method, OptimizationLevel::Debug);
            assert!(
                !analysis.environment(0).is_struct,
                "async={} should force a class environment",
                make_async
            );
        }
    }

    #[test]
    fn test_local_function_chain_reaches_fixed_point() {
        // h calls g calls f; only f captures x
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let f = b.next_func_id();
        let g = b.next_func_id();
        let h = b.next_func_id();
        let f_body = b.block(vec![], vec![ret(local(x))]);
        let f_decl = b.local_function(f, "f", vec![], Type::Int32, f_body);
        let g_body = b.block(vec![], vec![ret(call_local(f, vec![]))]);
        let g_decl = b.local_function(g, "g", vec![], Type::Int32, g_body);
        let h_body = b.block(vec![], vec![ret(call_local(g, vec![]))]);
        let h_decl = b.local_function(h, "h", vec![], Type::Int32, h_body);
        let body = b.block(vec![x], vec![h_decl, g_decl, f_decl]);
        let method = b.finish(body);

        let analysis = analyze(&method, OptimizationLevel::Debug);
        for func in [f, g, h] {
            assert_eq!(
                analysis.tree.function(func).expect("declared").captured_environments,
                vec![0],
                "function {} should reference the environment",
                func
            );
        }
    }

    #[test]
    fn test_containing_environment_and_chain() {
        let (method, inner_node) = nested_capture(false);
        let analysis = analyze(&method, OptimizationLevel::Debug);

        let inner_scope = analysis.tree.scope_for_node(inner_node).expect("inner scope");
        let inner_env = analysis.scope_environment(inner_scope).expect("inner env");
        let outer_env = analysis.scope_environment(ScopeTree::ROOT).expect("outer env");
        let lambda = &analysis.tree.functions[0];
        assert_eq!(lambda.containing_environment, Some(inner_env));
        assert!(analysis.environment(inner_env).captures_parent);
        assert_eq!(analysis.environment(inner_env).parent, Some(outer_env));
        assert!(!analysis.environment(outer_env).captures_parent);
    }

    #[test]
    fn test_release_merges_matching_environments() {
        let (method, inner_node) = nested_capture(false);
        let analysis = analyze(&method, OptimizationLevel::Release);

        assert_eq!(analysis.live_environments().count(), 1);
        let inner_scope = analysis.tree.scope_for_node(inner_node).expect("inner scope");
        assert_eq!(analysis.scope_environment(inner_scope), None);
        let root_env = analysis.scope_environment(ScopeTree::ROOT).expect("root env");
        assert_eq!(analysis.environment(root_env).captured_variables.len(), 2);
        assert_eq!(analysis.tree.functions[0].containing_environment, Some(root_env));
        assert_eq!(analysis.tree.functions[0].captured_environments, vec![root_env]);
    }

    #[test]
    fn test_environment_captured_by_fewer_functions_is_kept() {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let y = b.local("y", Type::Int32);
        let outer_body = b.block(vec![], vec![ret(local(x))]);
        let outer_lambda = b.lambda(vec![], Type::Int32, outer_body);
        let inner_body = b.block(vec![], vec![ret(add(local(x), local(y)))]);
        let inner_lambda = b.lambda(vec![], Type::Int32, inner_body);
        let inner = b.block(vec![y], vec![expr(inner_lambda)]);
        let inner_node = inner.id;
        let body = b.block(vec![x], vec![expr(outer_lambda), Stmt::Block(inner)]);
        let method = b.finish(body);

        let analysis = analyze(&method, OptimizationLevel::Release);
        assert_eq!(analysis.live_environments().count(), 2);
        let inner_scope = analysis.tree.scope_for_node(inner_node).expect("inner scope");
        let inner_env = analysis.scope_environment(inner_scope).expect("inner env survives");
        let outer_env = analysis.scope_environment(ScopeTree::ROOT).expect("outer env");
        assert_eq!(analysis.capturing_functions(inner_env).len(), 1);
        assert_eq!(analysis.capturing_functions(outer_env).len(), 2);
        assert_eq!(analysis.environment(inner_env).parent, Some(outer_env));
    }

    #[test]
    fn test_loop_environment_is_never_merged() {
        let (method, inner_node) = nested_capture(true);
        let analysis = analyze(&method, OptimizationLevel::Release);

        assert_eq!(analysis.live_environments().count(), 2);
        let inner_scope = analysis.tree.scope_for_node(inner_node).expect("loop scope");
        assert!(analysis.scope_environment(inner_scope).is_some());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (method, _) = nested_capture(false);
        let mut analysis = analyze(&method, OptimizationLevel::Release);
        let again = analysis.merge_environments().expect("second merge");
        assert_eq!(again, 0, "second merge pass should be a no-op");
    }

    #[test]
    fn test_this_only_environment_is_inlined() {
        let mut b = MethodBuilder::instance("C", "M");
        let lambda_body = b.block(vec![], vec![ret(Expr::field(Expr::This, "C", "f"))]);
        let lambda = b.lambda(vec![], Type::Int32, lambda_body);
        let body = b.block(vec![], vec![expr(lambda)]);
        let method = b.finish(body);

        let analysis = analyze(&method, OptimizationLevel::Debug);
        assert_eq!(analysis.live_environments().count(), 0);
        let lambda = &analysis.tree.functions[0];
        assert!(lambda.captures_this);
        assert!(lambda.captured_environments.is_empty());
        assert_eq!(lambda.containing_environment, None);
    }

    #[test]
    fn test_variant_interface_keeps_this_environment() {
        let mut b = MethodBuilder::instance("I", "M").variant_interface();
        let lambda_body = b.block(vec![], vec![ret(Expr::This)]);
        let lambda = b.lambda(vec![], Type::Object, lambda_body);
        let body = b.block(vec![], vec![expr(lambda)]);
        let method = b.finish(body);

        let analysis = analyze(&method, OptimizationLevel::Debug);
        assert_eq!(analysis.live_environments().count(), 1);
        assert!(analysis.tree.functions[0].containing_environment.is_some());
    }

    #[test]
    fn test_this_with_local_is_not_inlined() {
        let mut b = MethodBuilder::instance("C", "M");
        let x = b.local("x", Type::Int32);
        let lambda_body = b.block(vec![], vec![ret(add(local(x), Expr::field(Expr::This, "C", "f")))]);
        let lambda = b.lambda(vec![], Type::Int32, lambda_body);
        let body = b.block(vec![x], vec![expr(lambda)]);
        let method = b.finish(body);

        let analysis = analyze(&method, OptimizationLevel::Debug);
        assert_eq!(analysis.live_environments().count(), 1);
        assert_eq!(analysis.environment(0).captured_variables.len(), 2);
    }

    #[test]
    fn test_captured_environment_off_the_lexical_path_is_fatal() {
        let (method, _) = nested_capture(false);
        let tree = ScopeTree::build(&method).expect("scope tree");
        let mut analysis = Analysis {
            tree,
            environments: Vec::new(),
        };
        analysis.make_and_assign_environments();
        // Pretend the lambda also captures an environment of a sibling scope
        let bogus = analysis.environments.len();
        analysis.environments.push(Environment {
            id: bogus,
            scope: ScopeTree::ROOT,
            captured_variables: vec![],
            is_struct: false,
            parent: None,
            captures_parent: false,
            discarded: false,
        });
        analysis.tree.functions[0].captured_environments.push(bogus);

        let err = analysis
            .compute_lambda_scopes_and_frame_captures()
            .expect_err("bogus environment is not on any scope");
        assert!(matches!(err, ClosureConversionError::UnreachableEnvironment { env, .. } if env == bogus));
    }

    #[test]
    fn test_conflicting_parent_is_fatal() {
        let (method, _) = nested_capture(false);
        let mut analysis = analyze(&method, OptimizationLevel::Debug);
        let inner = analysis
            .environments
            .iter()
            .position(|e| e.captures_parent)
            .expect("inner environment captures its parent");
        analysis.set_parent(inner, analysis.environment(inner).parent).expect("same parent is fine");
        let err = analysis.set_parent(inner, Some(inner)).expect_err("second parent");
        assert!(matches!(err, ClosureConversionError::ConflictingParent { .. }));
    }
}
