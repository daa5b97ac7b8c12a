//! Pseudo-source rendering of the IR, used by the CLI and in test failures

use std::fmt::Write;

use hoist_types::LocalId;

use crate::ir::*;

pub struct Printer<'a> {
    locals: &'a [LocalInfo],
    out: String,
    indent: usize,
}

impl<'a> Printer<'a> {
    pub fn new(locals: &'a [LocalInfo]) -> Self {
        Self {
            locals,
            out: String::new(),
            indent: 0,
        }
    }

    /// Render a whole method, signature included
    pub fn method(method: &MethodBody) -> String {
        let mut printer = Printer::new(&method.locals);
        let params = printer.params(&method.params);
        let _ = write!(
            printer.out,
            "{}{} {}.{}({}) ",
            if method.is_static() { "static " } else { "" },
            method.return_type,
            method.containing_type,
            method.name,
            params
        );
        printer.block(&method.body);
        printer.finish()
    }

    pub fn finish(self) -> String {
        self.out
    }

    pub fn params(&self, params: &[LocalId]) -> String {
        params
            .iter()
            .map(|p| match self.locals.get(*p as usize) {
                Some(info) if info.kind == LocalKind::EnvironmentParameter => {
                    format!("ref {} {}", info.ty, info.name)
                }
                Some(info) => format!("{} {}", info.ty, info.name),
                None => format!("?{}", p),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn local_name(&self, id: LocalId) -> String {
        match self.locals.get(id as usize) {
            Some(info) => info.name.clone(),
            None => format!("local{}", id),
        }
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
    }

    pub fn block(&mut self, block: &Block) {
        self.out.push('{');
        self.indent += 1;
        for local in &block.locals {
            self.newline();
            let ty = self
                .locals
                .get(*local as usize)
                .map(|l| l.ty.to_string())
                .unwrap_or_else(|| "var".to_string());
            let name = self.local_name(*local);
            let _ = write!(self.out, "{} {};", ty, name);
        }
        for stmt in &block.stmts {
            self.newline();
            self.stmt(stmt);
        }
        self.indent -= 1;
        self.newline();
        self.out.push('}');
    }

    pub fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Block(block) => self.block(block),
            Stmt::Expr(expr) => {
                self.expr(expr);
                self.out.push(';');
            }
            Stmt::Return(expr) => {
                self.out.push_str("return");
                if let Some(expr) = expr {
                    self.out.push(' ');
                    self.expr(expr);
                }
                self.out.push(';');
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.out.push_str("if (");
                self.expr(condition);
                self.out.push_str(") ");
                self.block(then_branch);
                if let Some(else_branch) = else_branch {
                    self.out.push_str(" else ");
                    self.block(else_branch);
                }
            }
            Stmt::While { condition, body } => {
                self.out.push_str("while (");
                self.expr(condition);
                self.out.push_str(") ");
                self.block(body);
            }
            Stmt::DoWhile { body, condition } => {
                self.out.push_str("do ");
                self.block(body);
                self.out.push_str(" while (");
                self.expr(condition);
                self.out.push_str(");");
            }
            Stmt::For {
                init,
                condition,
                update,
                body,
            } => {
                self.out.push_str("for (");
                self.expr_list(init);
                self.out.push_str("; ");
                if let Some(condition) = condition {
                    self.expr(condition);
                }
                self.out.push_str("; ");
                self.expr_list(update);
                self.out.push_str(") ");
                self.block(body);
            }
            Stmt::Break => self.out.push_str("break;"),
            Stmt::Continue => self.out.push_str("continue;"),
            Stmt::Throw(expr) => {
                self.out.push_str("throw");
                if let Some(expr) = expr {
                    self.out.push(' ');
                    self.expr(expr);
                }
                self.out.push(';');
            }
            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                self.out.push_str("try ");
                self.block(body);
                for catch in catches {
                    let _ = write!(self.out, " catch ({}", catch.exception_type);
                    if let Some(target) = &catch.exception_target {
                        self.out.push_str(" -> ");
                        self.expr(target);
                    }
                    self.out.push(')');
                    if let Some(filter) = &catch.filter {
                        self.out.push_str(" when (");
                        self.expr(filter);
                        self.out.push(')');
                    }
                    self.out.push(' ');
                    self.block(&catch.body);
                }
                if let Some(finally) = finally {
                    self.out.push_str(" finally ");
                    self.block(finally);
                }
            }
            Stmt::LocalFunction(func) => {
                let params = self.params(&func.params);
                let _ = write!(
                    self.out,
                    "{}{} {}({}) ",
                    if func.is_async { "async " } else { "" },
                    func.return_type,
                    func.display_name(),
                    params
                );
                self.block(&func.body);
            }
            Stmt::Yield(expr) => match expr {
                Some(expr) => {
                    self.out.push_str("yield return ");
                    self.expr(expr);
                    self.out.push(';');
                }
                None => self.out.push_str("yield break;"),
            },
        }
    }

    fn expr_list(&mut self, exprs: &[Expr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(expr);
        }
    }

    fn method_ref(&mut self, method: &MethodRef) {
        match method {
            MethodRef::Member { name, .. } | MethodRef::Synthesized { name, .. } => {
                self.out.push_str(name)
            }
            MethodRef::Local(func) => {
                let _ = write!(self.out, "local#{}", func);
            }
        }
    }

    pub fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Null => self.out.push_str("null"),
            Expr::Bool(b) => {
                let _ = write!(self.out, "{}", b);
            }
            Expr::Int(i) => {
                let _ = write!(self.out, "{}", i);
            }
            Expr::Str(s) => {
                let _ = write!(self.out, "{:?}", s);
            }
            Expr::Default(ty) => {
                let _ = write!(self.out, "default({})", ty);
            }
            Expr::Local(id) => {
                let name = self.local_name(*id);
                self.out.push_str(&name);
            }
            Expr::This => self.out.push_str("this"),
            Expr::Base => self.out.push_str("base"),
            Expr::Field { receiver, field } => {
                match receiver {
                    Some(receiver) => self.expr(receiver),
                    None => self.out.push_str(&field.owner),
                }
                let _ = write!(self.out, ".{}", field.name);
            }
            Expr::Assign { target, value } => {
                self.expr(target);
                self.out.push_str(" = ");
                self.expr(value);
            }
            Expr::Binary { op, left, right } => {
                self.out.push('(');
                self.expr(left);
                let _ = write!(self.out, " {} ", op.as_str());
                self.expr(right);
                self.out.push(')');
            }
            Expr::Unary { op, operand } => {
                self.out.push(match op {
                    UnaryOp::Neg => '-',
                    UnaryOp::Not => '!',
                });
                self.expr(operand);
            }
            Expr::Call {
                receiver,
                method,
                args,
            } => {
                match receiver {
                    Some(receiver) => {
                        self.expr(receiver);
                        self.out.push('.');
                    }
                    None => {
                        if let MethodRef::Member { owner, .. }
                        | MethodRef::Synthesized { owner, .. } = method
                        {
                            let _ = write!(self.out, "{}.", owner);
                        }
                    }
                }
                self.method_ref(method);
                self.out.push('(');
                self.expr_list(args);
                self.out.push(')');
            }
            Expr::ConstructorInitializer { target, args } => {
                let _ = write!(self.out, "{}::.ctor(", target);
                self.expr_list(args);
                self.out.push(')');
            }
            Expr::Invoke { callee, args } => {
                self.expr(callee);
                self.out.push_str(".Invoke(");
                self.expr_list(args);
                self.out.push(')');
            }
            Expr::New { ty, args } => {
                let _ = write!(self.out, "new {}(", ty);
                self.expr_list(args);
                self.out.push(')');
            }
            Expr::Lambda { func, .. } => {
                let params = self.params(&func.params);
                let _ = write!(
                    self.out,
                    "{}({}) => ",
                    if func.is_async { "async " } else { "" },
                    params
                );
                self.block(&func.body);
            }
            Expr::Delegate {
                receiver,
                method,
                delegate_type,
            } => {
                let _ = write!(self.out, "new {}(", delegate_type);
                if let Some(receiver) = receiver {
                    self.expr(receiver);
                    self.out.push('.');
                }
                self.method_ref(method);
                self.out.push(')');
            }
            Expr::Sequence {
                locals,
                side_effects,
                value,
                ..
            } => {
                self.out.push_str("(");
                for local in locals {
                    let name = self.local_name(*local);
                    let _ = write!(self.out, "var {}; ", name);
                }
                for effect in side_effects {
                    self.expr(effect);
                    self.out.push_str(", ");
                }
                self.expr(value);
                self.out.push(')');
            }
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                self.expr(condition);
                self.out.push_str(" ? ");
                self.expr(then_expr);
                self.out.push_str(" : ");
                self.expr(else_expr);
            }
            Expr::Coalesce { left, right } => {
                self.expr(left);
                self.out.push_str(" ?? (");
                self.expr(right);
                self.out.push(')');
            }
            Expr::Ref(inner) => {
                self.out.push_str("ref ");
                self.expr(inner);
            }
            Expr::TypeRef(name) => self.out.push_str(name),
            Expr::Await(inner) => {
                self.out.push_str("await ");
                self.expr(inner);
            }
        }
    }
}
