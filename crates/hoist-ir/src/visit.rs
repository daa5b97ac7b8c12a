//! Read-only traversal of the bound IR
//!
//! Implementors override the hooks they care about and call the matching
//! `walk_*` function to continue into children.

use std::collections::BTreeSet;

use hoist_types::{FuncId, NodeId};

use crate::ir::*;

pub trait Visitor {
    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_catch(&mut self, catch: &CatchClause) {
        walk_catch(self, catch);
    }

    fn visit_function(&mut self, func: &FunctionDecl) {
        walk_function(self, func);
    }

    /// Body block of a loop statement
    fn visit_loop_body(&mut self, body: &Block) {
        self.visit_block(body);
    }
}

pub fn walk_block<V: Visitor + ?Sized>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        v.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Block(block) => v.visit_block(block),
        Stmt::Expr(expr) => v.visit_expr(expr),
        Stmt::Return(expr) | Stmt::Throw(expr) | Stmt::Yield(expr) => {
            if let Some(expr) = expr {
                v.visit_expr(expr);
            }
        }
        Stmt::If {
            condition,
            then_branch,
            else_branch,
        } => {
            v.visit_expr(condition);
            v.visit_block(then_branch);
            if let Some(else_branch) = else_branch {
                v.visit_block(else_branch);
            }
        }
        Stmt::While { condition, body } => {
            v.visit_expr(condition);
            v.visit_loop_body(body);
        }
        Stmt::DoWhile { body, condition } => {
            v.visit_loop_body(body);
            v.visit_expr(condition);
        }
        Stmt::For {
            init,
            condition,
            update,
            body,
        } => {
            for expr in init {
                v.visit_expr(expr);
            }
            if let Some(condition) = condition {
                v.visit_expr(condition);
            }
            for expr in update {
                v.visit_expr(expr);
            }
            v.visit_loop_body(body);
        }
        Stmt::Break | Stmt::Continue => {}
        Stmt::Try {
            body,
            catches,
            finally,
        } => {
            v.visit_block(body);
            for catch in catches {
                v.visit_catch(catch);
            }
            if let Some(finally) = finally {
                v.visit_block(finally);
            }
        }
        Stmt::LocalFunction(func) => v.visit_function(func),
    }
}

pub fn walk_catch<V: Visitor + ?Sized>(v: &mut V, catch: &CatchClause) {
    if let Some(target) = &catch.exception_target {
        v.visit_expr(target);
    }
    if let Some(filter) = &catch.filter {
        v.visit_expr(filter);
    }
    v.visit_block(&catch.body);
}

pub fn walk_function<V: Visitor + ?Sized>(v: &mut V, func: &FunctionDecl) {
    v.visit_block(&func.body);
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Null
        | Expr::Bool(_)
        | Expr::Int(_)
        | Expr::Str(_)
        | Expr::Default(_)
        | Expr::Local(_)
        | Expr::This
        | Expr::Base
        | Expr::TypeRef(_) => {}
        Expr::Field { receiver, .. } => {
            if let Some(receiver) = receiver {
                v.visit_expr(receiver);
            }
        }
        Expr::Assign { target, value } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        Expr::Binary { left, right, .. } | Expr::Coalesce { left, right } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::Unary { operand, .. } => v.visit_expr(operand),
        Expr::Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                v.visit_expr(receiver);
            }
            for arg in args {
                v.visit_expr(arg);
            }
        }
        Expr::ConstructorInitializer { args, .. } | Expr::New { args, .. } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
        Expr::Invoke { callee, args } => {
            v.visit_expr(callee);
            for arg in args {
                v.visit_expr(arg);
            }
        }
        Expr::Lambda { func, .. } => v.visit_function(func),
        Expr::Delegate { receiver, .. } => {
            if let Some(receiver) = receiver {
                v.visit_expr(receiver);
            }
        }
        Expr::Sequence {
            side_effects,
            value,
            ..
        } => {
            for effect in side_effects {
                v.visit_expr(effect);
            }
            v.visit_expr(value);
        }
        Expr::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            v.visit_expr(condition);
            v.visit_expr(then_expr);
            v.visit_expr(else_expr);
        }
        Expr::Ref(inner) | Expr::Await(inner) => v.visit_expr(inner),
    }
}

/// Collects facts used by completeness checks.
#[derive(Default)]
struct Census {
    nested_functions: usize,
    local_function_refs: BTreeSet<FuncId>,
    max_node: NodeId,
}

impl Visitor for Census {
    fn visit_block(&mut self, block: &Block) {
        self.max_node = self.max_node.max(block.id);
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let Stmt::LocalFunction(_) = stmt {
            self.nested_functions += 1;
        }
        walk_stmt(self, stmt);
    }

    fn visit_catch(&mut self, catch: &CatchClause) {
        self.max_node = self.max_node.max(catch.id);
        walk_catch(self, catch);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Lambda { .. } => self.nested_functions += 1,
            Expr::Sequence { id, .. } => self.max_node = self.max_node.max(*id),
            Expr::Call {
                method: MethodRef::Local(func),
                ..
            }
            | Expr::Delegate {
                method: MethodRef::Local(func),
                ..
            } => {
                self.local_function_refs.insert(*func);
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}

fn census(block: &Block) -> Census {
    let mut census = Census::default();
    census.visit_block(block);
    census
}

/// Highest node id used anywhere in the block
pub fn max_node_id(block: &Block) -> NodeId {
    census(block).max_node
}

/// Whether any lambda, local function declaration, or local function
/// reference remains in the block
pub fn contains_nested_functions(block: &Block) -> bool {
    let census = census(block);
    census.nested_functions > 0 || !census.local_function_refs.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{expr, local, ret, MethodBuilder};
    use hoist_types::Type;

    #[test]
    fn test_census_sees_through_lambdas() {
        let mut b = MethodBuilder::new("C", "M");
        let x = b.local("x", Type::Int32);
        let inner = b.block(vec![], vec![ret(local(x))]);
        let lambda = b.lambda(vec![], Type::Int32, inner);
        let body = b.block(vec![x], vec![expr(lambda)]);

        assert!(contains_nested_functions(&body));
        assert!(max_node_id(&body) >= body.id);
    }
}
