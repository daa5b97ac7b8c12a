//! Fluent construction of method bodies
//!
//! Binding produces IR directly; this builder exists for tools and tests
//! that need well-formed IR without a front end. It hands out local ids,
//! node ids, function ids and distinct, increasing spans.

use hoist_diagnostics::{FileId, Span};
use hoist_types::{FuncId, LocalId, NodeId, Type};

use crate::ir::*;

const SPAN_STRIDE: u32 = 10;

pub struct MethodBuilder {
    name: String,
    containing_type: String,
    kind: MethodKind,
    ordinal: i32,
    this_local: Option<LocalId>,
    in_variant_interface: bool,
    type_params: Vec<String>,
    params: Vec<LocalId>,
    return_type: Type,
    locals: Vec<LocalInfo>,
    next_node: NodeId,
    next_func: FuncId,
    next_offset: u32,
}

impl MethodBuilder {
    /// A static method
    pub fn new(containing_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            containing_type: containing_type.into(),
            kind: MethodKind::Ordinary,
            ordinal: 0,
            this_local: None,
            in_variant_interface: false,
            type_params: Vec::new(),
            params: Vec::new(),
            return_type: Type::Void,
            locals: Vec::new(),
            next_node: 0,
            next_func: 0,
            next_offset: SPAN_STRIDE,
        }
    }

    /// An instance method; `this` is local 0
    pub fn instance(containing_type: impl Into<String>, name: impl Into<String>) -> Self {
        let mut builder = Self::new(containing_type, name);
        let this_ty = Type::Named(builder.containing_type.clone());
        let this = builder.add_local("this", this_ty, LocalKind::This);
        builder.this_local = Some(this);
        builder
    }

    pub fn constructor(containing_type: impl Into<String>) -> Self {
        let mut builder = Self::instance(containing_type, ".ctor");
        builder.kind = MethodKind::Constructor;
        builder
    }

    pub fn static_constructor(containing_type: impl Into<String>) -> Self {
        let mut builder = Self::new(containing_type, ".cctor");
        builder.kind = MethodKind::StaticConstructor;
        builder
    }

    pub fn ordinal(mut self, ordinal: i32) -> Self {
        self.ordinal = ordinal;
        self
    }

    pub fn generic(mut self, type_params: &[&str]) -> Self {
        self.type_params = type_params.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn variant_interface(mut self) -> Self {
        self.in_variant_interface = true;
        self
    }

    pub fn returns(mut self, ty: Type) -> Self {
        self.return_type = ty;
        self
    }

    pub fn this_local(&self) -> Option<LocalId> {
        self.this_local
    }

    /// Shift all following spans, as if text had been inserted
    pub fn skip(&mut self, bytes: u32) {
        self.next_offset += bytes;
    }

    fn add_local(&mut self, name: &str, ty: Type, kind: LocalKind) -> LocalId {
        let id = self.locals.len() as LocalId;
        self.locals.push(LocalInfo {
            name: name.to_string(),
            ty,
            kind,
        });
        id
    }

    fn next_span(&mut self) -> Span {
        let start = self.next_offset;
        self.next_offset += SPAN_STRIDE;
        Span::new(FileId(0), start, start + SPAN_STRIDE / 2)
    }

    fn next_node(&mut self) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        id
    }

    /// A parameter of the method itself
    pub fn param(&mut self, name: &str, ty: Type) -> LocalId {
        let id = self.add_local(name, ty, LocalKind::Parameter);
        self.params.push(id);
        id
    }

    /// A parameter of a nested function
    pub fn lambda_param(&mut self, name: &str, ty: Type) -> LocalId {
        self.add_local(name, ty, LocalKind::Parameter)
    }

    pub fn local(&mut self, name: &str, ty: Type) -> LocalId {
        self.add_local(name, ty, LocalKind::Local)
    }

    pub fn local_type(&self, id: LocalId) -> Type {
        self.locals
            .get(id as usize)
            .map(|l| l.ty.clone())
            .unwrap_or(Type::Object)
    }

    pub fn block(&mut self, locals: Vec<LocalId>, stmts: Vec<Stmt>) -> Block {
        Block {
            id: self.next_node(),
            span: self.next_span(),
            locals,
            stmts,
        }
    }

    pub fn sequence(&mut self, locals: Vec<LocalId>, side_effects: Vec<Expr>, value: Expr) -> Expr {
        Expr::Sequence {
            id: self.next_node(),
            span: self.next_span(),
            locals,
            side_effects,
            value: Box::new(value),
        }
    }

    pub fn catch(
        &mut self,
        locals: Vec<LocalId>,
        exception_target: Option<Expr>,
        filter: Option<Expr>,
        body: Block,
    ) -> CatchClause {
        CatchClause {
            id: self.next_node(),
            span: self.next_span(),
            locals,
            exception_type: Type::Named("Exception".to_string()),
            exception_target,
            filter,
            body,
        }
    }

    pub fn next_func_id(&mut self) -> FuncId {
        let id = self.next_func;
        self.next_func += 1;
        id
    }

    pub fn function(
        &mut self,
        id: FuncId,
        kind: FunctionKind,
        name: Option<&str>,
        params: Vec<LocalId>,
        return_type: Type,
        body: Block,
    ) -> FunctionDecl {
        FunctionDecl {
            id,
            kind,
            name: name.map(str::to_string),
            params,
            type_params: Vec::new(),
            return_type,
            body,
            is_async: false,
            is_iterator: false,
            span: self.next_span(),
        }
    }

    /// Delegate type matching a function's signature
    pub fn delegate_type(&self, func: &FunctionDecl) -> Type {
        let params = func.params.iter().map(|p| self.local_type(*p)).collect();
        Type::delegate(params, func.return_type.clone())
    }

    pub fn lambda(&mut self, params: Vec<LocalId>, return_type: Type, body: Block) -> Expr {
        let id = self.next_func_id();
        let func = self.function(id, FunctionKind::Lambda, None, params, return_type, body);
        self.lambda_of(func)
    }

    /// Wrap an already built declaration (e.g. an async one) as a lambda
    pub fn lambda_of(&self, func: FunctionDecl) -> Expr {
        let delegate_type = self.delegate_type(&func);
        Expr::Lambda {
            func: Box::new(func),
            delegate_type,
        }
    }

    pub fn local_function(
        &mut self,
        id: FuncId,
        name: &str,
        params: Vec<LocalId>,
        return_type: Type,
        body: Block,
    ) -> Stmt {
        let func = self.function(
            id,
            FunctionKind::LocalFunction,
            Some(name),
            params,
            return_type,
            body,
        );
        Stmt::LocalFunction(Box::new(func))
    }

    pub fn finish(self, body: Block) -> MethodBody {
        MethodBody {
            name: self.name,
            containing_type: self.containing_type,
            kind: self.kind,
            ordinal: self.ordinal,
            this_local: self.this_local,
            in_variant_interface: self.in_variant_interface,
            type_params: self.type_params,
            params: self.params,
            return_type: self.return_type,
            locals: self.locals,
            body,
            span: Span::new(FileId(0), 0, self.next_offset),
        }
    }
}

pub fn local(id: LocalId) -> Expr {
    Expr::Local(id)
}

pub fn int(value: i64) -> Expr {
    Expr::Int(value)
}

pub fn string(value: &str) -> Expr {
    Expr::Str(value.to_string())
}

pub fn assign(target: Expr, value: Expr) -> Expr {
    Expr::assign(target, value)
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn add(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Add, left, right)
}

pub fn call(receiver: Option<Expr>, owner: &str, name: &str, args: Vec<Expr>) -> Expr {
    Expr::Call {
        receiver: receiver.map(Box::new),
        method: MethodRef::Member {
            owner: owner.to_string(),
            name: name.to_string(),
        },
        args,
    }
}

pub fn call_local(func: FuncId, args: Vec<Expr>) -> Expr {
    Expr::Call {
        receiver: None,
        method: MethodRef::Local(func),
        args,
    }
}

/// Conversion of a local function to a function value
pub fn local_function_value(func: FuncId, delegate_type: Type) -> Expr {
    Expr::Delegate {
        receiver: None,
        method: MethodRef::Local(func),
        delegate_type,
    }
}

pub fn invoke(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Invoke {
        callee: Box::new(callee),
        args,
    }
}

pub fn base_initializer(base: &str, args: Vec<Expr>) -> Expr {
    Expr::ConstructorInitializer {
        target: base.to_string(),
        args,
    }
}

pub fn expr(expr: Expr) -> Stmt {
    Stmt::Expr(expr)
}

pub fn ret(expr: Expr) -> Stmt {
    Stmt::Return(Some(expr))
}

pub fn while_loop(condition: Expr, body: Block) -> Stmt {
    Stmt::While { condition, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_and_spans_are_distinct() {
        let mut b = MethodBuilder::instance("C", "M");
        let x = b.local("x", Type::Int32);
        let a = b.block(vec![x], vec![]);
        let c = b.block(vec![], vec![]);
        assert_ne!(a.id, c.id, "node ids should be unique");
        assert!(a.span.start < c.span.start, "spans should increase");
        assert_eq!(b.this_local(), Some(0));
        let method = b.finish(Block {
            id: 99,
            span: Span::DUMMY,
            locals: vec![],
            stmts: vec![Stmt::Block(a), Stmt::Block(c)],
        });
        assert_eq!(method.local(x).map(|l| l.name.as_str()), Some("x"));
    }

    #[test]
    fn test_lambda_delegate_type() {
        let mut b = MethodBuilder::new("C", "M");
        let p = b.lambda_param("p", Type::Int32);
        let body = b.block(vec![], vec![ret(local(p))]);
        let lambda = b.lambda(vec![p], Type::Int32, body);
        match lambda {
            Expr::Lambda { delegate_type, .. } => {
                assert_eq!(delegate_type, Type::delegate(vec![Type::Int32], Type::Int32));
            }
            _ => panic!("Expected lambda"),
        }
    }
}
