//! Scope tree of a method body
//!
//! Mirrors the lexical nesting of the IR: one scope per block, catch clause
//! and sequence with locals. Each scope lists the captured variables it
//! declares and the nested functions declared directly in it. Scopes and
//! nested functions live in arenas and refer to each other by index.

use std::collections::{BTreeSet, HashMap};

use hoist_diagnostics::Span;
use hoist_ir::visit::{walk_catch, walk_expr, walk_stmt, Visitor};
use hoist_ir::{Block, CatchClause, Expr, FunctionDecl, FunctionKind, MethodBody, MethodRef, Stmt};
use hoist_types::{FuncId, LocalId, NodeId, Type};

use super::analysis::EnvId;
use super::error::{ClosureConversionError, Result};

pub type ScopeId = usize;

#[derive(Debug, Clone)]
pub struct Scope {
    /// IR node owning the scope
    pub node: NodeId,
    pub span: Span,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    /// Captured variables declared directly here, in declaration order
    pub declared_variables: Vec<LocalId>,
    /// Nested functions declared directly here, in declaration order
    pub nested_functions: Vec<FuncId>,
    /// Innermost nested function whose body contains this scope
    pub containing_function: Option<FuncId>,
    /// Set on the outermost scope of a nested function's body
    pub is_function_body: bool,
    /// Whether this scope's environment may be folded into the parent's
    pub can_merge_with_parent: bool,
    /// Environment assigned by analysis
    pub environment: Option<EnvId>,
}

#[derive(Debug, Clone)]
pub struct NestedFunction {
    pub func: FuncId,
    pub kind: FunctionKind,
    pub name: Option<String>,
    pub span: Span,
    /// Scope the declaration appears in
    pub scope: ScopeId,
    /// Outermost scope of the body
    pub body_scope: ScopeId,
    /// Nested function the declaration appears in
    pub parent_function: Option<FuncId>,
    pub params: Vec<LocalId>,
    pub type_params: Vec<String>,
    pub return_type: Type,
    pub is_async: bool,
    pub is_iterator: bool,
    /// Used as a function value at least once (always true for lambdas)
    pub converted_to_delegate: bool,
    pub captured_variables: BTreeSet<LocalId>,
    /// Local functions referenced from the body that are declared outside it
    pub captured_functions: BTreeSet<FuncId>,

    // Filled in by analysis
    pub captured_environments: Vec<EnvId>,
    pub containing_environment: Option<EnvId>,
    pub captures_this: bool,
}

impl NestedFunction {
    /// Whether a struct environment can be passed to this function by reference
    pub fn can_take_ref_parameters(&self) -> bool {
        !(self.is_async || self.is_iterator || self.converted_to_delegate)
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("lambda#{}", self.func),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScopeTree {
    pub scopes: Vec<Scope>,
    /// Nested functions in declaration preorder
    pub functions: Vec<NestedFunction>,
    pub this_local: Option<LocalId>,
    pub in_variant_interface: bool,
    by_node: HashMap<NodeId, ScopeId>,
    by_func: HashMap<FuncId, usize>,
}

impl ScopeTree {
    pub const ROOT: ScopeId = 0;

    /// Build the scope tree of a method body and record captures
    pub fn build(method: &MethodBody) -> Result<ScopeTree> {
        let mut builder = Builder::new(method);
        builder.build(method)?;
        let tree = builder.finish()?;
        log::debug!(
            "scope tree for {}.{}: {} scopes, {} nested functions",
            method.containing_type,
            method.name,
            tree.scopes.len(),
            tree.functions.len()
        );
        Ok(tree)
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id]
    }

    pub fn scope_for_node(&self, node: NodeId) -> Option<ScopeId> {
        self.by_node.get(&node).copied()
    }

    pub fn function_index(&self, func: FuncId) -> Result<usize> {
        self.by_func
            .get(&func)
            .copied()
            .ok_or(ClosureConversionError::UnknownFunction { func })
    }

    pub fn function(&self, func: FuncId) -> Result<&NestedFunction> {
        let index = self.function_index(func)?;
        Ok(&self.functions[index])
    }

    pub fn function_mut(&mut self, func: FuncId) -> Result<&mut NestedFunction> {
        let index = self.function_index(func)?;
        Ok(&mut self.functions[index])
    }

    /// All scopes in preorder
    pub fn preorder(&self) -> Vec<ScopeId> {
        let mut order = Vec::with_capacity(self.scopes.len());
        let mut stack = vec![Self::ROOT];
        while let Some(scope) = stack.pop() {
            order.push(scope);
            stack.extend(self.scopes[scope].children.iter().rev());
        }
        order
    }

    /// Whether `ancestor` is `scope` or encloses it
    pub fn is_within(&self, scope: ScopeId, ancestor: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(s) = current {
            if s == ancestor {
                return true;
            }
            current = self.scopes[s].parent;
        }
        false
    }

    /// Nested functions declared in `scope` or any scope below it
    pub fn functions_within(&self, scope: ScopeId) -> Vec<FuncId> {
        self.functions
            .iter()
            .filter(|f| self.is_within(f.scope, scope))
            .map(|f| f.func)
            .collect()
    }
}

struct Builder {
    scopes: Vec<Scope>,
    functions: Vec<NestedFunction>,
    by_node: HashMap<NodeId, ScopeId>,
    by_func: HashMap<FuncId, usize>,
    this_local: Option<LocalId>,
    in_variant_interface: bool,
    current: ScopeId,
    /// Nested functions enclosing the walk position, outermost first
    function_stack: Vec<FuncId>,
    /// Declaring scope, function depth at declaration, declaration order
    declarations: HashMap<LocalId, (ScopeId, usize)>,
    declared_in: Vec<Vec<LocalId>>,
    captured: BTreeSet<LocalId>,
    /// Local function references: enclosing functions at the reference, callee
    function_refs: Vec<(Vec<FuncId>, FuncId)>,
    converted: BTreeSet<FuncId>,
    next_scope_unmergeable: bool,
    error: Option<ClosureConversionError>,
}

impl Builder {
    fn new(method: &MethodBody) -> Self {
        Self {
            scopes: Vec::new(),
            functions: Vec::new(),
            by_node: HashMap::new(),
            by_func: HashMap::new(),
            this_local: method.this_local,
            in_variant_interface: method.in_variant_interface,
            current: ScopeTree::ROOT,
            function_stack: Vec::new(),
            declarations: HashMap::new(),
            declared_in: Vec::new(),
            captured: BTreeSet::new(),
            function_refs: Vec::new(),
            converted: BTreeSet::new(),
            next_scope_unmergeable: false,
            error: None,
        }
    }

    fn fail(&mut self, error: ClosureConversionError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn push_scope(&mut self, node: NodeId, span: Span, can_merge: bool) -> ScopeId {
        let id = self.scopes.len();
        let parent = if self.scopes.is_empty() {
            None
        } else {
            Some(self.current)
        };
        self.scopes.push(Scope {
            node,
            span,
            parent,
            children: Vec::new(),
            declared_variables: Vec::new(),
            nested_functions: Vec::new(),
            containing_function: self.function_stack.last().copied(),
            is_function_body: false,
            can_merge_with_parent: can_merge && parent.is_some(),
            environment: None,
        });
        self.declared_in.push(Vec::new());
        if let Some(parent) = parent {
            self.scopes[parent].children.push(id);
        }
        self.by_node.insert(node, id);
        self.current = id;
        id
    }

    fn pop_scope(&mut self) {
        if let Some(parent) = self.scopes[self.current].parent {
            self.current = parent;
        }
    }

    fn declare(&mut self, local: LocalId) {
        self.declarations
            .insert(local, (self.current, self.function_stack.len()));
        self.declared_in[self.current].push(local);
    }

    fn reference(&mut self, local: LocalId) {
        let Some(&(_, depth)) = self.declarations.get(&local) else {
            self.fail(ClosureConversionError::UndeclaredVariable { local });
            return;
        };
        if depth >= self.function_stack.len() {
            return;
        }
        self.captured.insert(local);
        for func in self.function_stack[depth..].to_vec() {
            if let Some(&index) = self.by_func.get(&func) {
                self.functions[index].captured_variables.insert(local);
            }
        }
    }

    fn reference_function(&mut self, func: FuncId) {
        if !self.function_stack.is_empty() {
            self.function_refs.push((self.function_stack.clone(), func));
        }
    }

    fn build(&mut self, method: &MethodBody) -> Result<()> {
        let root = &method.body;
        self.push_scope(root.id, root.span, false);
        if let Some(this) = method.this_local {
            self.declare(this);
        }
        for &param in &method.params {
            self.declare(param);
        }
        self.declare_and_walk(root);
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn declare_and_walk(&mut self, block: &Block) {
        for &local in &block.locals {
            self.declare(local);
        }
        for stmt in &block.stmts {
            self.visit_stmt(stmt);
        }
    }

    fn enter_function(&mut self, decl: &FunctionDecl) {
        let declaring_scope = self.current;
        let index = self.functions.len();
        self.by_func.insert(decl.id, index);
        self.scopes[declaring_scope].nested_functions.push(decl.id);
        self.functions.push(NestedFunction {
            func: decl.id,
            kind: decl.kind,
            name: decl.name.clone(),
            span: decl.span,
            scope: declaring_scope,
            body_scope: declaring_scope,
            parent_function: self.function_stack.last().copied(),
            params: decl.params.clone(),
            type_params: decl.type_params.clone(),
            return_type: decl.return_type.clone(),
            is_async: decl.is_async,
            is_iterator: decl.is_iterator,
            converted_to_delegate: decl.is_lambda(),
            captured_variables: BTreeSet::new(),
            captured_functions: BTreeSet::new(),
            captured_environments: Vec::new(),
            containing_environment: None,
            captures_this: false,
        });

        self.function_stack.push(decl.id);
        let body = self.push_scope(decl.body.id, decl.body.span, false);
        self.scopes[body].is_function_body = true;
        self.functions[index].body_scope = body;
        for &param in &decl.params {
            self.declare(param);
        }
        self.declare_and_walk(&decl.body);
        self.pop_scope();
        self.function_stack.pop();
    }

    fn finish(mut self) -> Result<ScopeTree> {
        for (stack, callee) in std::mem::take(&mut self.function_refs) {
            if !self.by_func.contains_key(&callee) {
                return Err(ClosureConversionError::UnknownFunction { func: callee });
            }
            for func in stack {
                if func == callee || self.nested_in(callee, func) {
                    continue;
                }
                let index = self.by_func[&func];
                self.functions[index].captured_functions.insert(callee);
            }
        }
        for func in std::mem::take(&mut self.converted) {
            match self.by_func.get(&func) {
                Some(&index) => self.functions[index].converted_to_delegate = true,
                None => return Err(ClosureConversionError::UnknownFunction { func }),
            }
        }
        for (scope, declared) in self.declared_in.iter().enumerate() {
            self.scopes[scope].declared_variables = declared
                .iter()
                .copied()
                .filter(|local| self.captured.contains(local))
                .collect();
        }
        Ok(ScopeTree {
            scopes: self.scopes,
            functions: self.functions,
            this_local: self.this_local,
            in_variant_interface: self.in_variant_interface,
            by_node: self.by_node,
            by_func: self.by_func,
        })
    }

    fn nested_in(&self, inner: FuncId, outer: FuncId) -> bool {
        let parent_of = |f: FuncId| {
            self.by_func
                .get(&f)
                .and_then(|&i| self.functions[i].parent_function)
        };
        let mut current = parent_of(inner);
        while let Some(func) = current {
            if func == outer {
                return true;
            }
            current = parent_of(func);
        }
        false
    }
}

impl Visitor for Builder {
    fn visit_block(&mut self, block: &Block) {
        let can_merge = !std::mem::take(&mut self.next_scope_unmergeable);
        self.push_scope(block.id, block.span, can_merge);
        self.declare_and_walk(block);
        self.pop_scope();
    }

    fn visit_loop_body(&mut self, body: &Block) {
        self.next_scope_unmergeable = true;
        self.visit_block(body);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::LocalFunction(decl) => self.enter_function(decl),
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_catch(&mut self, catch: &CatchClause) {
        self.push_scope(catch.id, catch.span, false);
        for &local in &catch.locals {
            self.declare(local);
        }
        walk_catch(self, catch);
        self.pop_scope();
    }

    fn visit_function(&mut self, func: &FunctionDecl) {
        self.enter_function(func);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Local(local) => self.reference(*local),
            Expr::This | Expr::Base => match self.this_local {
                Some(this) => self.reference(this),
                None => self.fail(ClosureConversionError::Internal(
                    "`this` referenced in a static method".to_string(),
                )),
            },
            Expr::Call {
                method: MethodRef::Local(func),
                ..
            } => {
                self.reference_function(*func);
                walk_expr(self, expr);
            }
            Expr::Delegate {
                method: MethodRef::Local(func),
                ..
            } => {
                self.converted.insert(*func);
                self.reference_function(*func);
                walk_expr(self, expr);
            }
            Expr::Sequence {
                id,
                span,
                locals,
                side_effects,
                value,
            } if !locals.is_empty() => {
                self.push_scope(*id, *span, true);
                for &local in locals {
                    self.declare(local);
                }
                for effect in side_effects {
                    self.visit_expr(effect);
                }
                self.visit_expr(value);
                self.pop_scope();
            }
            _ => walk_expr(self, expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_ir::build::*;

    #[test]
    fn test_captures_are_recorded_on_every_enclosing_function() {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let inner_body = b.block(vec![], vec![ret(local(x))]);
        let inner = b.lambda(vec![], Type::Int32, inner_body);
        let outer_body = b.block(vec![], vec![ret(invoke(inner, vec![]))]);
        let outer = b.lambda(vec![], Type::Int32, outer_body);
        let body = b.block(vec![x], vec![expr(outer)]);
        let method = b.finish(body);

        let tree = ScopeTree::build(&method).expect("scope tree should build");
        assert_eq!(tree.functions.len(), 2);
        for func in &tree.functions {
            assert!(
                func.captured_variables.contains(&x),
                "{} should capture x",
                func.display_name()
            );
        }
        assert_eq!(tree.scope(ScopeTree::ROOT).declared_variables, vec![x]);
        // Outer lambda is declared before inner in preorder
        assert_eq!(tree.functions[0].parent_function, None);
        assert_eq!(tree.functions[1].parent_function, Some(tree.functions[0].func));
    }

    #[test]
    fn test_uncaptured_locals_are_not_declared() {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let y = b.local("y", Type::Int32);
        let lambda_body = b.block(vec![], vec![ret(local(x))]);
        let lambda = b.lambda(vec![], Type::Int32, lambda_body);
        let body = b.block(vec![x, y], vec![expr(assign(local(y), int(1))), expr(lambda)]);
        let method = b.finish(body);

        let tree = ScopeTree::build(&method).expect("scope tree should build");
        assert_eq!(tree.scope(ScopeTree::ROOT).declared_variables, vec![x]);
    }

    #[test]
    fn test_local_function_references() {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let g = b.next_func_id();
        let f = b.next_func_id();
        let g_body = b.block(vec![], vec![ret(local(x))]);
        let g_decl = b.local_function(g, "g", vec![], Type::Int32, g_body);
        let f_body = b.block(vec![], vec![ret(call_local(g, vec![]))]);
        let f_decl = b.local_function(f, "f", vec![], Type::Int32, f_body);
        let body = b.block(vec![x], vec![g_decl, f_decl, expr(call_local(f, vec![]))]);
        let method = b.finish(body);

        let tree = ScopeTree::build(&method).expect("scope tree should build");
        let f_info = tree.function(f).expect("f is declared");
        assert!(f_info.captured_variables.is_empty());
        assert!(f_info.captured_functions.contains(&g));
        assert!(!f_info.converted_to_delegate);
        assert!(tree.function(g).expect("g").captured_variables.contains(&x));
    }

    #[test]
    fn test_loop_body_cannot_merge() {
        let mut b = MethodBuilder::new("C", "M");
        let i = b.local("i", Type::Int32);
        let loop_body = b.block(vec![i], vec![]);
        let loop_node = loop_body.id;
        let body = b.block(vec![], vec![while_loop(Expr::Bool(true), loop_body)]);
        let method = b.finish(body);

        let tree = ScopeTree::build(&method).expect("scope tree should build");
        let scope = tree.scope_for_node(loop_node).expect("loop body has a scope");
        assert!(!tree.scope(scope).can_merge_with_parent);
    }

    #[test]
    fn test_undeclared_variable_is_an_error() {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let body = b.block(vec![], vec![expr(local(x))]);
        let method = b.finish(body);

        let err = ScopeTree::build(&method).expect_err("x is never declared");
        assert_eq!(err, ClosureConversionError::UndeclaredVariable { local: x });
    }

    #[test]
    fn test_this_capture() {
        let mut b = MethodBuilder::instance("C", "M");
        let lambda_body = b.block(vec![], vec![ret(Expr::field(Expr::This, "C", "f"))]);
        let lambda = b.lambda(vec![], Type::Int32, lambda_body);
        let body = b.block(vec![], vec![expr(lambda)]);
        let method = b.finish(body);

        let tree = ScopeTree::build(&method).expect("scope tree should build");
        let this = method.this_local.expect("instance method");
        assert!(tree.functions[0].captured_variables.contains(&this));
        assert_eq!(tree.scope(ScopeTree::ROOT).declared_variables, vec![this]);
    }
}
