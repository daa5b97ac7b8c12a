//! Rewrites a method body against its analysis
//!
//! Every scope that owns an environment allocates it on entry, chains it to
//! the enclosing frame when required and copies hoisted parameters into it.
//! References to hoisted variables become field accesses reached through
//! frame pointers, nested function bodies move into synthesized callables,
//! and local function calls and function values are redirected to them.

use std::collections::HashMap;

use hoist_diagnostics::{Diagnostic, DiagnosticCode, Span};
use hoist_ir::visit::max_node_id;
use hoist_ir::{
    Block, CatchClause, Expr, FunctionDecl, FunctionKind, LocalInfo, LocalKind, MethodBody,
    MethodKind, MethodRef, Stmt,
};
use hoist_types::{FuncId, LocalId, NodeId, Type};

use super::analysis::{Analysis, EnvId};
use super::classify::ClosureKind;
use super::debug_info::{DebugId, DebugInfoBuilder, MethodDebugInfo, SlotAllocator};
use super::error::{ClosureConversionError, Result};
use super::frame_cache::SingletonFrameCache;
use super::names::{self, FieldNames, SINGLETON_FIELD, THIS_PROXY_FIELD};
use super::options::LoweringOptions;
use super::synthesized::{
    EnvironmentKind, EnvironmentType, FieldKind, HoistedField, SynthesizedCallable,
};

/// Field that replaces a captured variable or an outer frame pointer
#[derive(Debug, Clone)]
struct Proxy {
    env: EnvId,
    field: String,
}

/// Synthesized type and frame local of one live environment
#[derive(Debug, Clone)]
struct Frame {
    /// Index into the rewriter's environment types
    type_index: usize,
    type_name: String,
    ty: Type,
    is_struct: bool,
    closure_id: DebugId,
    scope_node: NodeId,
    local: LocalId,
    parent_field: Option<String>,
    fields: HashMap<LocalId, String>,
}

/// Where a nested function ends up and how to reach it
#[derive(Debug, Clone)]
struct Signature {
    kind: ClosureKind,
    name: String,
    owner: String,
    is_static: bool,
    /// Struct environments passed by reference, in parameter order
    struct_params: Vec<(EnvId, LocalId)>,
    lambda_id: DebugId,
    containing_environment: Option<EnvId>,
    declaring_scope: NodeId,
}

/// The body being rewritten: the method itself or a nested function
#[derive(Debug, Clone)]
struct Current {
    func: Option<FuncId>,
    /// Type that `this` has inside the body
    frame_this: Option<String>,
    struct_params: Vec<(EnvId, LocalId)>,
    body: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Scope(NodeId),
    LoopOrLambda,
}

/// Frame state replaced on entry to a scope, restored on exit
#[derive(Debug, Default)]
struct SavedFrame {
    proxies: Vec<(LocalId, Option<Proxy>)>,
    frame_pointer: Option<(String, Option<LocalId>)>,
    innermost: Option<Option<LocalId>>,
}

/// Per-body state saved while a nested function is rewritten
struct SavedBody {
    current: Current,
    innermost: Option<LocalId>,
    added_locals: Vec<LocalId>,
    added_statements: Vec<Stmt>,
}

pub(crate) struct Rewritten {
    pub method: MethodBody,
    pub callables: Vec<SynthesizedCallable>,
    pub environments: Vec<EnvironmentType>,
    pub debug_info: MethodDebugInfo,
    pub notes: Vec<Diagnostic>,
}

pub(crate) struct Rewriter<'a> {
    analysis: &'a Analysis,
    options: &'a LoweringOptions,
    frame_cache: &'a mut SingletonFrameCache,
    debug: DebugInfoBuilder<'a>,

    method_name: String,
    containing_type: String,
    method_kind: MethodKind,
    this_local: Option<LocalId>,
    type_params: Vec<String>,
    method_span: Span,
    locals: Vec<LocalInfo>,

    frames: HashMap<EnvId, Frame>,
    environments: Vec<EnvironmentType>,
    static_frame: Option<usize>,
    signatures: HashMap<FuncId, Signature>,

    proxies: HashMap<LocalId, Proxy>,
    /// Local holding the current instance of each frame type
    frame_pointers: HashMap<String, LocalId>,
    /// Innermost class frame, the parent of the next chained environment
    innermost: Option<LocalId>,
    current: Current,
    seen_base_call: bool,
    /// `this` proxy initializations waiting for the constructor initializer
    pending_this_init: Vec<Expr>,
    added_locals: Vec<LocalId>,
    added_statements: Vec<Stmt>,
    syntax: Vec<Marker>,

    callables: Vec<SynthesizedCallable>,
    notes: Vec<Diagnostic>,
    next_node: NodeId,
    cache_locals: usize,
}

impl<'a> Rewriter<'a> {
    pub(crate) fn new(
        method: &MethodBody,
        analysis: &'a Analysis,
        options: &'a LoweringOptions,
        slot_allocator: Option<&'a dyn SlotAllocator>,
        frame_cache: &'a mut SingletonFrameCache,
    ) -> Self {
        let mut frame_pointers = HashMap::new();
        if let Some(this) = method.this_local {
            frame_pointers.insert(method.containing_type.clone(), this);
        }
        Self {
            analysis,
            options,
            frame_cache,
            debug: DebugInfoBuilder::new(slot_allocator, method.ordinal, options.generation),
            method_name: method.name.clone(),
            containing_type: method.containing_type.clone(),
            method_kind: method.kind,
            this_local: method.this_local,
            type_params: method.type_params.clone(),
            method_span: method.span,
            locals: method.locals.clone(),
            frames: HashMap::new(),
            environments: Vec::new(),
            static_frame: None,
            signatures: HashMap::new(),
            proxies: HashMap::new(),
            frame_pointers,
            innermost: method.this_local,
            current: Current {
                func: None,
                frame_this: method.this_local.map(|_| method.containing_type.clone()),
                struct_params: Vec::new(),
                body: method.body.id,
            },
            seen_base_call: method.kind != MethodKind::Constructor,
            pending_this_init: Vec::new(),
            added_locals: Vec::new(),
            added_statements: Vec::new(),
            syntax: Vec::new(),
            callables: Vec::new(),
            notes: Vec::new(),
            next_node: max_node_id(&method.body) + 1,
            cache_locals: 0,
        }
    }

    pub(crate) fn rewrite(mut self, mut method: MethodBody) -> Result<Rewritten> {
        self.synthesize_environments()?;
        self.compute_signatures()?;

        let placeholder = empty_block(method.body.id, method.body.span);
        let body = std::mem::replace(&mut method.body, placeholder);
        let body = self.rewrite_block(body)?;
        method.body = self.add_statements_if_needed(body);

        if !self.pending_this_init.is_empty() {
            return Err(ClosureConversionError::Internal(format!(
                "constructor {}.{} captures `this` but never reaches its initializer",
                self.containing_type, self.method_name
            )));
        }
        method.locals = self.locals;

        Ok(Rewritten {
            method,
            callables: self.callables,
            environments: self.environments,
            debug_info: self.debug.finish(),
            notes: self.notes,
        })
    }

    // ---- setup ----

    fn synthesize_environments(&mut self) -> Result<()> {
        let analysis = self.analysis;
        let method_id = self.debug.method_id();
        for scope in analysis.tree.preorder() {
            let Some(env_id) = analysis.tree.scope(scope).environment else {
                continue;
            };
            let env = analysis.environment(env_id);
            let scope_info = analysis.tree.scope(scope);

            let mut names = FieldNames::new();
            let mut fields = Vec::new();
            let mut variable_fields = HashMap::new();

            let mut parent_closure = None;
            let parent_field = if env.captures_parent {
                let (base, ty, kind) = match env.parent {
                    Some(parent) => {
                        let frame = self.frame(parent)?;
                        parent_closure = Some(frame.closure_id);
                        (self.local_name(frame.local), frame.ty.clone(), FieldKind::Parent)
                    }
                    None => (
                        THIS_PROXY_FIELD.to_string(),
                        Type::Named(self.containing_type.clone()),
                        FieldKind::EnclosingInstance,
                    ),
                };
                let name = names.unique(&base);
                fields.push(HoistedField {
                    name: name.clone(),
                    ty,
                    is_static: false,
                    kind,
                });
                Some(name)
            } else {
                None
            };

            for &local in &env.captured_variables {
                let info = self.local_info(local)?;
                let base = if Some(local) == self.this_local {
                    THIS_PROXY_FIELD.to_string()
                } else {
                    info.name.clone()
                };
                let ty = info.ty.clone();
                let name = names.unique(&base);
                fields.push(HoistedField {
                    name: name.clone(),
                    ty,
                    is_static: false,
                    kind: FieldKind::Variable(local),
                });
                variable_fields.insert(local, name);
            }

            let struct_captures = env
                .is_struct
                .then(|| fields.iter().map(|f| f.name.clone()).collect::<Vec<_>>());
            let syntax_offset = scope_info.span.syntax_offset(self.method_span);
            let closure_id = self.debug.closure_id(syntax_offset, parent_closure, struct_captures);

            let env_type = EnvironmentType {
                name: names::display_class_name(method_id, closure_id),
                containing_type: self.containing_type.clone(),
                kind: if env.is_struct {
                    EnvironmentKind::Struct
                } else {
                    EnvironmentKind::Class
                },
                type_params: self.type_params.clone(),
                closure_id: Some(closure_id),
                scope: Some(scope_info.node),
                fields,
            };
            let type_name = env_type.qualified_name();
            let ty = env_type.ty();
            let local = self.add_local(
                names::frame_local_name(self.frames.len()),
                ty.clone(),
                LocalKind::FramePointer,
            );
            log::debug!(
                "environment {} of scope {} becomes {}",
                env_id,
                scope_info.node,
                type_name
            );

            self.frames.insert(
                env_id,
                Frame {
                    type_index: self.environments.len(),
                    type_name,
                    ty,
                    is_struct: env.is_struct,
                    closure_id,
                    scope_node: scope_info.node,
                    local,
                    parent_field,
                    fields: variable_fields,
                },
            );
            self.environments.push(env_type);
        }
        Ok(())
    }

    fn compute_signatures(&mut self) -> Result<()> {
        let analysis = self.analysis;
        let method_id = self.debug.method_id();
        for function in &analysis.tree.functions {
            let kind = analysis.closure_kind(function);
            let (owner, is_static, closure_ordinal) = match kind {
                ClosureKind::General => {
                    let env = function.containing_environment.ok_or_else(|| {
                        ClosureConversionError::Internal(format!(
                            "{} is general but has no containing environment",
                            function.display_name()
                        ))
                    })?;
                    let frame = self.frame(env)?;
                    (frame.type_name.clone(), false, frame.closure_id.ordinal)
                }
                ClosureKind::ThisOnly => (
                    self.containing_type.clone(),
                    false,
                    DebugId::THIS_ONLY_CLOSURE_ORDINAL,
                ),
                ClosureKind::Singleton => {
                    (self.singleton_frame(), false, DebugId::STATIC_CLOSURE_ORDINAL)
                }
                ClosureKind::Static => (
                    self.containing_type.clone(),
                    true,
                    DebugId::STATIC_CLOSURE_ORDINAL,
                ),
            };

            let mut struct_params = Vec::new();
            let mut struct_closure_ids = Vec::new();
            for &env in &function.captured_environments {
                let frame = self.frame(env)?;
                if !frame.is_struct {
                    continue;
                }
                let (name, ty, closure_id) =
                    (self.local_name(frame.local), frame.ty.clone(), frame.closure_id);
                let param = self.add_local(name, ty, LocalKind::EnvironmentParameter);
                struct_params.push((env, param));
                struct_closure_ids.push(closure_id);
            }

            let syntax_offset = function.span.syntax_offset(self.method_span);
            let lambda_id = self
                .debug
                .lambda_id(syntax_offset, closure_ordinal, struct_closure_ids);
            let name = match (function.kind, &function.name) {
                (FunctionKind::LocalFunction, Some(local_name)) => {
                    names::local_function_name(&self.method_name, local_name, method_id, lambda_id)
                }
                _ => names::lambda_method_name(
                    &self.method_name,
                    (kind != ClosureKind::General).then_some(method_id),
                    lambda_id,
                ),
            };
            log::debug!("{} lowers to {} {}.{}", function.display_name(), kind, owner, name);

            self.signatures.insert(
                function.func,
                Signature {
                    kind,
                    name,
                    owner,
                    is_static,
                    struct_params,
                    lambda_id,
                    containing_environment: function.containing_environment,
                    declaring_scope: analysis.tree.scope(function.scope).node,
                },
            );
        }
        Ok(())
    }

    /// Frame for stateless callables: shared per type, or per method when
    /// the method is generic
    fn singleton_frame(&mut self) -> String {
        if self.type_params.is_empty() {
            return self.frame_cache.get_or_create(&self.containing_type).qualified_name();
        }
        let index = match self.static_frame {
            Some(index) => index,
            None => {
                let name = names::static_frame_name(self.debug.method_id());
                let mut frame = EnvironmentType {
                    name,
                    containing_type: self.containing_type.clone(),
                    kind: EnvironmentKind::Singleton,
                    type_params: self.type_params.clone(),
                    closure_id: None,
                    scope: None,
                    fields: Vec::new(),
                };
                frame.fields.push(HoistedField {
                    name: SINGLETON_FIELD.to_string(),
                    ty: frame.ty(),
                    is_static: true,
                    kind: FieldKind::SingletonInstance,
                });
                self.environments.push(frame);
                let index = self.environments.len() - 1;
                self.static_frame = Some(index);
                index
            }
        };
        self.environments[index].qualified_name()
    }

    fn add_singleton_field(&mut self, field: HoistedField) {
        match self.static_frame {
            Some(index) => self.environments[index].fields.push(field),
            None => self
                .frame_cache
                .get_or_create(&self.containing_type)
                .fields
                .push(field),
        }
    }

    // ---- lookups ----

    fn frame(&self, env: EnvId) -> Result<&Frame> {
        self.frames.get(&env).ok_or_else(|| {
            ClosureConversionError::Internal(format!("environment {} was never synthesized", env))
        })
    }

    fn signature(&self, func: FuncId) -> Result<&Signature> {
        self.signatures
            .get(&func)
            .ok_or(ClosureConversionError::UnknownFunction { func })
    }

    fn local_info(&self, local: LocalId) -> Result<&LocalInfo> {
        self.locals
            .get(local as usize)
            .ok_or(ClosureConversionError::UndeclaredVariable { local })
    }

    fn local_name(&self, local: LocalId) -> String {
        self.locals
            .get(local as usize)
            .map(|l| l.name.clone())
            .unwrap_or_else(|| format!("local{}", local))
    }

    fn add_local(&mut self, name: String, ty: Type, kind: LocalKind) -> LocalId {
        let id = self.locals.len() as LocalId;
        self.locals.push(LocalInfo { name, ty, kind });
        id
    }

    fn fresh_node(&mut self) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        id
    }

    fn scope_environment(&self, node: NodeId) -> Option<EnvId> {
        self.analysis
            .tree
            .scope_for_node(node)
            .and_then(|scope| self.analysis.scope_environment(scope))
    }

    /// Type of the frame a frame-pointer local holds
    fn frame_pointer_type(&self, local: LocalId) -> Option<String> {
        if Some(local) == self.this_local {
            return Some(self.containing_type.clone());
        }
        self.locals
            .get(local as usize)
            .and_then(|l| l.ty.name())
            .map(str::to_string)
    }

    // ---- frame pointers ----

    /// Expression evaluating to the current instance of frame type `type_name`
    fn frame_pointer(&self, type_name: &str) -> Result<Expr> {
        if self.current.frame_this.as_deref() == Some(type_name) {
            return Ok(Expr::This);
        }
        for (env, param) in &self.current.struct_params {
            if self.frame(*env)?.type_name == type_name {
                return Ok(Expr::Local(*param));
            }
        }
        let local = *self
            .frame_pointers
            .get(type_name)
            .ok_or_else(|| ClosureConversionError::UnreachableFrame {
                ty: type_name.to_string(),
            })?;
        self.local_value(local)
    }

    /// Value of a local, following its proxy when it was hoisted
    fn local_value(&self, local: LocalId) -> Result<Expr> {
        if let Some(proxy) = self.proxies.get(&local) {
            let frame = self.frame(proxy.env)?;
            let receiver = self.frame_pointer(&frame.type_name)?;
            return Ok(Expr::field(receiver, frame.type_name.clone(), proxy.field.clone()));
        }
        if Some(local) == self.this_local {
            return Err(ClosureConversionError::UnreachableFrame {
                ty: self.containing_type.clone(),
            });
        }
        Ok(Expr::Local(local))
    }

    fn this_reference(&self) -> Result<Expr> {
        if self.this_local.is_none() {
            return Err(ClosureConversionError::Internal(format!(
                "`this` referenced in static method {}.{}",
                self.containing_type, self.method_name
            )));
        }
        self.frame_pointer(&self.containing_type)
    }

    /// Allocate the environment of the scope being entered and install its
    /// proxies. Returns the frame local and the prologue to run on entry.
    fn introduce_frame(&mut self, env: EnvId, span: Span) -> Result<(LocalId, Vec<Expr>, SavedFrame)> {
        let analysis = self.analysis;
        let environment = analysis.environment(env);
        let frame = self.frame(env)?.clone();
        log::trace!("allocating {} in scope {}", frame.type_name, frame.scope_node);
        let mut saved = SavedFrame::default();
        let mut prologue = Vec::new();

        let creation = if frame.is_struct {
            Expr::Default(frame.ty.clone())
        } else {
            Expr::New {
                ty: frame.ty.clone(),
                args: Vec::new(),
            }
        };
        prologue.push(Expr::assign(Expr::Local(frame.local), creation));
        if !frame.is_struct && self.options.report_allocations {
            self.notes.push(
                Diagnostic::new(
                    DiagnosticCode::EnvironmentAllocated,
                    format!("scope allocates environment {}", frame.type_name),
                )
                .with_span(span)
                .build(),
            );
        }

        if let Some(parent_field) = &frame.parent_field {
            let expected = match environment.parent {
                Some(parent) => self.frame(parent)?.type_name.clone(),
                None => self.containing_type.clone(),
            };
            let innermost = self
                .innermost
                .ok_or_else(|| ClosureConversionError::UnreachableFrame { ty: expected.clone() })?;
            if self.frame_pointer_type(innermost).as_deref() != Some(expected.as_str()) {
                return Err(ClosureConversionError::Internal(format!(
                    "{} chains to {} but the innermost frame is {}",
                    frame.type_name,
                    expected,
                    self.frame_pointer_type(innermost).unwrap_or_default()
                )));
            }
            let value = self.frame_pointer(&expected)?;
            prologue.push(Expr::assign(
                Expr::field(Expr::Local(frame.local), frame.type_name.clone(), parent_field.clone()),
                value,
            ));
            let previous = self.proxies.insert(
                innermost,
                Proxy {
                    env,
                    field: parent_field.clone(),
                },
            );
            saved.proxies.push((innermost, previous));
        }

        for &local in &environment.captured_variables {
            let field = frame.fields.get(&local).cloned().ok_or_else(|| {
                ClosureConversionError::Internal(format!(
                    "local {} has no field in {}",
                    local, frame.type_name
                ))
            })?;
            let is_this = Some(local) == self.this_local;
            let initial_value = if is_this {
                Some(Expr::This)
            } else if self.local_info(local)?.kind.is_parameter()
                || self.options.assign_locals.contains(&local)
            {
                Some(Expr::Local(local))
            } else {
                None
            };
            if let Some(value) = initial_value {
                let assignment = Expr::assign(
                    Expr::field(Expr::Local(frame.local), frame.type_name.clone(), field.clone()),
                    value,
                );
                if is_this && !self.seen_base_call {
                    self.pending_this_init.push(assignment);
                } else {
                    prologue.push(assignment);
                }
            }
            let previous = self.proxies.insert(local, Proxy { env, field });
            saved.proxies.push((local, previous));
        }

        let previous = self.frame_pointers.insert(frame.type_name.clone(), frame.local);
        saved.frame_pointer = Some((frame.type_name.clone(), previous));
        if !frame.is_struct {
            saved.innermost = Some(self.innermost);
            self.innermost = Some(frame.local);
        }
        Ok((frame.local, prologue, saved))
    }

    fn restore_frame(&mut self, saved: SavedFrame) {
        for (local, previous) in saved.proxies.into_iter().rev() {
            match previous {
                Some(proxy) => {
                    self.proxies.insert(local, proxy);
                }
                None => {
                    self.proxies.remove(&local);
                }
            }
        }
        if let Some((type_name, previous)) = saved.frame_pointer {
            match previous {
                Some(local) => {
                    self.frame_pointers.insert(type_name, local);
                }
                None => {
                    self.frame_pointers.remove(&type_name);
                }
            }
        }
        if let Some(innermost) = saved.innermost {
            self.innermost = innermost;
        }
    }

    fn enter_scope(
        &mut self,
        node: NodeId,
        span: Span,
    ) -> Result<(Option<LocalId>, Vec<Expr>, Option<SavedFrame>)> {
        self.syntax.push(Marker::Scope(node));
        match self.scope_environment(node) {
            Some(env) => {
                let (local, prologue, saved) = self.introduce_frame(env, span)?;
                Ok((Some(local), prologue, Some(saved)))
            }
            None => Ok((None, Vec::new(), None)),
        }
    }

    fn exit_scope(&mut self, saved: Option<SavedFrame>) {
        if let Some(saved) = saved {
            self.restore_frame(saved);
        }
        self.syntax.pop();
    }

    /// Locals that still need a slot: the frame first, then everything not
    /// hoisted (assign-locals keep theirs)
    fn scope_locals(&self, frame: Option<LocalId>, locals: Vec<LocalId>) -> Vec<LocalId> {
        frame
            .into_iter()
            .chain(locals.into_iter().filter(|local| {
                !self.proxies.contains_key(local) || self.options.assign_locals.contains(local)
            }))
            .collect()
    }

    // ---- statements ----

    fn rewrite_block(&mut self, block: Block) -> Result<Block> {
        let Block {
            id,
            span,
            locals,
            stmts,
        } = block;
        let (frame, prologue, saved) = self.enter_scope(id, span)?;

        let mut rewritten: Vec<Stmt> = prologue.into_iter().map(Stmt::Expr).collect();
        for stmt in stmts {
            if let Some(stmt) = self.rewrite_stmt(stmt)? {
                rewritten.push(stmt);
            }
            if self.seen_base_call && !self.pending_this_init.is_empty() {
                rewritten.extend(self.pending_this_init.drain(..).map(Stmt::Expr));
            }
        }

        let locals = self.scope_locals(frame, locals);
        self.exit_scope(saved);
        Ok(Block {
            id,
            span,
            locals,
            stmts: rewritten,
        })
    }

    fn rewrite_loop<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.syntax.push(Marker::LoopOrLambda);
        let result = f(self);
        self.syntax.pop();
        result
    }

    /// Rewrite a statement; local function declarations are removed
    fn rewrite_stmt(&mut self, stmt: Stmt) -> Result<Option<Stmt>> {
        let stmt = match stmt {
            Stmt::Block(block) => Stmt::Block(self.rewrite_block(block)?),
            Stmt::Expr(expr) => Stmt::Expr(self.rewrite_expr(expr)?),
            Stmt::Return(expr) => Stmt::Return(self.rewrite_opt(expr)?),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => Stmt::If {
                condition: self.rewrite_expr(condition)?,
                then_branch: self.rewrite_block(then_branch)?,
                else_branch: match else_branch {
                    Some(block) => Some(self.rewrite_block(block)?),
                    None => None,
                },
            },
            Stmt::While { condition, body } => self.rewrite_loop(|this| {
                Ok(Stmt::While {
                    condition: this.rewrite_expr(condition)?,
                    body: this.rewrite_block(body)?,
                })
            })?,
            Stmt::DoWhile { body, condition } => self.rewrite_loop(|this| {
                Ok(Stmt::DoWhile {
                    body: this.rewrite_block(body)?,
                    condition: this.rewrite_expr(condition)?,
                })
            })?,
            Stmt::For {
                init,
                condition,
                update,
                body,
            } => self.rewrite_loop(|this| {
                Ok(Stmt::For {
                    init: this.rewrite_exprs(init)?,
                    condition: this.rewrite_opt(condition)?,
                    update: this.rewrite_exprs(update)?,
                    body: this.rewrite_block(body)?,
                })
            })?,
            Stmt::Break => Stmt::Break,
            Stmt::Continue => Stmt::Continue,
            Stmt::Throw(expr) => Stmt::Throw(self.rewrite_opt(expr)?),
            Stmt::Yield(expr) => Stmt::Yield(self.rewrite_opt(expr)?),
            Stmt::Try {
                body,
                catches,
                finally,
            } => {
                let body = self.rewrite_block(body)?;
                let catches = catches
                    .into_iter()
                    .map(|catch| self.rewrite_catch(catch))
                    .collect::<Result<Vec<_>>>()?;
                let finally = match finally {
                    Some(block) => Some(self.rewrite_block(block)?),
                    None => None,
                };
                Stmt::Try {
                    body,
                    catches,
                    finally,
                }
            }
            Stmt::LocalFunction(decl) => {
                self.lower_function(*decl)?;
                return Ok(None);
            }
        };
        Ok(Some(stmt))
    }

    /// The catch prologue runs when the exception is stored, before the
    /// filter, or at the top of the body, whichever comes first
    fn rewrite_catch(&mut self, catch: CatchClause) -> Result<CatchClause> {
        let CatchClause {
            id,
            span,
            locals,
            exception_type,
            exception_target,
            filter,
            body,
        } = catch;
        let (frame, mut prologue, saved) = self.enter_scope(id, span)?;

        let exception_target = match exception_target {
            Some(target) => {
                let target = self.rewrite_expr(target)?;
                Some(self.prepend_effects(span, std::mem::take(&mut prologue), target))
            }
            None => None,
        };
        let filter = match filter {
            Some(filter) => {
                let filter = self.rewrite_expr(filter)?;
                Some(self.prepend_effects(span, std::mem::take(&mut prologue), filter))
            }
            None => None,
        };
        let mut body = self.rewrite_block(body)?;
        if !prologue.is_empty() {
            let mut stmts: Vec<Stmt> = prologue.into_iter().map(Stmt::Expr).collect();
            stmts.append(&mut body.stmts);
            body.stmts = stmts;
        }

        let locals = self.scope_locals(frame, locals);
        self.exit_scope(saved);
        Ok(CatchClause {
            id,
            span,
            locals,
            exception_type,
            exception_target,
            filter,
            body,
        })
    }

    fn prepend_effects(&mut self, span: Span, side_effects: Vec<Expr>, value: Expr) -> Expr {
        if side_effects.is_empty() {
            return value;
        }
        Expr::Sequence {
            id: self.fresh_node(),
            span,
            locals: Vec::new(),
            side_effects,
            value: Box::new(value),
        }
    }

    // ---- expressions ----

    fn rewrite_opt(&mut self, expr: Option<Expr>) -> Result<Option<Expr>> {
        expr.map(|e| self.rewrite_expr(e)).transpose()
    }

    fn rewrite_exprs(&mut self, exprs: Vec<Expr>) -> Result<Vec<Expr>> {
        exprs.into_iter().map(|e| self.rewrite_expr(e)).collect()
    }

    fn rewrite_boxed(&mut self, expr: Box<Expr>) -> Result<Box<Expr>> {
        Ok(Box::new(self.rewrite_expr(*expr)?))
    }

    fn rewrite_boxed_opt(&mut self, expr: Option<Box<Expr>>) -> Result<Option<Box<Expr>>> {
        expr.map(|e| self.rewrite_boxed(e)).transpose()
    }

    fn rewrite_expr(&mut self, expr: Expr) -> Result<Expr> {
        let rewritten = match expr {
            e @ (Expr::Null
            | Expr::Bool(_)
            | Expr::Int(_)
            | Expr::Str(_)
            | Expr::Default(_)
            | Expr::TypeRef(_)) => e,
            Expr::Local(local) if Some(local) == self.this_local => self.this_reference()?,
            Expr::Local(local) => self.local_value(local)?,
            Expr::This => self.this_reference()?,
            Expr::Base => match self.this_reference()? {
                Expr::This => Expr::Base,
                other => other,
            },
            Expr::Field { receiver, field } => Expr::Field {
                receiver: self.rewrite_boxed_opt(receiver)?,
                field,
            },
            Expr::Assign { target, value } => Expr::Assign {
                target: self.rewrite_boxed(target)?,
                value: self.rewrite_boxed(value)?,
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: self.rewrite_boxed(left)?,
                right: self.rewrite_boxed(right)?,
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: self.rewrite_boxed(operand)?,
            },
            Expr::Call {
                method: MethodRef::Local(func),
                args,
                ..
            } => self.rewrite_local_call(func, args)?,
            Expr::Call {
                receiver,
                method,
                args,
            } => Expr::Call {
                receiver: self.rewrite_boxed_opt(receiver)?,
                method,
                args: self.rewrite_exprs(args)?,
            },
            Expr::ConstructorInitializer { target, args } => {
                let args = self.rewrite_exprs(args)?;
                if self.current.func.is_none() {
                    self.seen_base_call = true;
                }
                Expr::ConstructorInitializer { target, args }
            }
            Expr::Invoke { callee, args } => Expr::Invoke {
                callee: self.rewrite_boxed(callee)?,
                args: self.rewrite_exprs(args)?,
            },
            Expr::New { ty, args } => Expr::New {
                ty,
                args: self.rewrite_exprs(args)?,
            },
            Expr::Lambda {
                func,
                delegate_type,
            } => self.rewrite_lambda(*func, delegate_type)?,
            Expr::Delegate {
                method: MethodRef::Local(func),
                delegate_type,
                ..
            } => {
                let signature = self.signature(func)?.clone();
                self.delegate_to(&signature, delegate_type)?
            }
            Expr::Delegate {
                receiver,
                method,
                delegate_type,
            } => Expr::Delegate {
                receiver: self.rewrite_boxed_opt(receiver)?,
                method,
                delegate_type,
            },
            Expr::Sequence {
                id,
                span,
                locals,
                side_effects,
                value,
            } => {
                let (frame, prologue, saved) = self.enter_scope(id, span)?;
                let mut effects = prologue;
                effects.extend(self.rewrite_exprs(side_effects)?);
                let value = self.rewrite_boxed(value)?;
                let locals = self.scope_locals(frame, locals);
                self.exit_scope(saved);
                Expr::Sequence {
                    id,
                    span,
                    locals,
                    side_effects: effects,
                    value,
                }
            }
            Expr::Conditional {
                condition,
                then_expr,
                else_expr,
            } => Expr::Conditional {
                condition: self.rewrite_boxed(condition)?,
                then_expr: self.rewrite_boxed(then_expr)?,
                else_expr: self.rewrite_boxed(else_expr)?,
            },
            Expr::Coalesce { left, right } => Expr::Coalesce {
                left: self.rewrite_boxed(left)?,
                right: self.rewrite_boxed(right)?,
            },
            Expr::Ref(inner) => Expr::Ref(self.rewrite_boxed(inner)?),
            Expr::Await(inner) => Expr::Await(self.rewrite_boxed(inner)?),
        };
        Ok(rewritten)
    }

    /// Receiver of a call to a synthesized callable
    fn receiver(&self, signature: &Signature) -> Result<Option<Box<Expr>>> {
        let receiver = match signature.kind {
            ClosureKind::Static => return Ok(None),
            ClosureKind::Singleton => Expr::static_field(signature.owner.clone(), SINGLETON_FIELD),
            ClosureKind::ThisOnly | ClosureKind::General => self.frame_pointer(&signature.owner)?,
        };
        Ok(Some(Box::new(receiver)))
    }

    fn method_ref(signature: &Signature) -> MethodRef {
        MethodRef::Synthesized {
            owner: signature.owner.clone(),
            name: signature.name.clone(),
        }
    }

    fn rewrite_local_call(&mut self, func: FuncId, args: Vec<Expr>) -> Result<Expr> {
        let signature = self.signature(func)?.clone();
        let mut args = self.rewrite_exprs(args)?;
        for (env, _) in &signature.struct_params {
            let type_name = self.frame(*env)?.type_name.clone();
            args.push(Expr::Ref(Box::new(self.frame_pointer(&type_name)?)));
        }
        Ok(Expr::Call {
            receiver: self.receiver(&signature)?,
            method: Self::method_ref(&signature),
            args,
        })
    }

    fn delegate_to(&self, signature: &Signature, delegate_type: Type) -> Result<Expr> {
        let receiver = match signature.kind {
            ClosureKind::Static => Some(Box::new(Expr::type_ref(signature.owner.clone()))),
            _ => self.receiver(signature)?,
        };
        Ok(Expr::Delegate {
            receiver,
            method: Self::method_ref(signature),
            delegate_type,
        })
    }

    fn rewrite_lambda(&mut self, decl: FunctionDecl, delegate_type: Type) -> Result<Expr> {
        let func = decl.id;
        let span = decl.span;
        self.lower_function(decl)?;
        let signature = self.signature(func)?.clone();
        let delegate = self.delegate_to(&signature, delegate_type.clone())?;
        self.cache_delegate(&signature, span, delegate, delegate_type)
    }

    /// Whether a loop or lambda sits between the current position and the
    /// scope node `scope`
    fn in_loop_or_lambda(&self, scope: NodeId) -> bool {
        for marker in self.syntax.iter().rev() {
            match marker {
                Marker::Scope(node) if *node == scope => return false,
                Marker::LoopOrLambda => return true,
                Marker::Scope(_) => {}
            }
        }
        false
    }

    /// Wrap a function value in a null-checked cache when it would
    /// otherwise be rebuilt on every evaluation with the same receiver
    fn cache_delegate(
        &mut self,
        signature: &Signature,
        span: Span,
        delegate: Expr,
        delegate_type: Type,
    ) -> Result<Expr> {
        let cache_singleton = signature.kind == ClosureKind::Singleton
            && self.method_kind != MethodKind::StaticConstructor;
        let lambda_scope = match signature.kind {
            ClosureKind::General => match signature.containing_environment {
                Some(env) => Some(self.frame(env)?.scope_node),
                None => None,
            },
            ClosureKind::ThisOnly => Some(self.current.body),
            ClosureKind::Static | ClosureKind::Singleton => None,
        };
        let cache_in_loop = lambda_scope.map_or(false, |scope| {
            scope != signature.declaring_scope && self.in_loop_or_lambda(scope)
        });
        if !cache_singleton && !cache_in_loop {
            return Ok(delegate);
        }

        // Fields live on frames generic over the method's type parameters only
        let fits_in_field = !delegate_type.mentions_type_var_outside(&self.type_params);
        let method_id = self.debug.method_id();
        let cache = match signature.kind {
            ClosureKind::Singleton if fits_in_field => {
                let name = names::delegate_cache_field(Some(method_id), signature.lambda_id);
                self.add_singleton_field(HoistedField {
                    name: name.clone(),
                    ty: delegate_type,
                    is_static: true,
                    kind: FieldKind::DelegateCache,
                });
                Expr::static_field(signature.owner.clone(), name)
            }
            ClosureKind::General if fits_in_field => {
                let env = signature.containing_environment.ok_or_else(|| {
                    ClosureConversionError::Internal(format!(
                        "{} has no containing environment",
                        signature.name
                    ))
                })?;
                let type_index = self.frame(env)?.type_index;
                let name = names::delegate_cache_field(None, signature.lambda_id);
                self.environments[type_index].fields.push(HoistedField {
                    name: name.clone(),
                    ty: delegate_type,
                    is_static: false,
                    kind: FieldKind::DelegateCache,
                });
                Expr::field(self.frame_pointer(&signature.owner)?, signature.owner.clone(), name)
            }
            ClosureKind::ThisOnly => {
                let local = self.add_local(
                    names::delegate_cache_local(self.cache_locals),
                    delegate_type,
                    LocalKind::DelegateCache,
                );
                self.cache_locals += 1;
                self.added_locals.push(local);
                self.added_statements
                    .push(Stmt::Expr(Expr::assign(Expr::Local(local), Expr::Null)));
                Expr::Local(local)
            }
            _ => return Ok(delegate),
        };

        if self.options.report_allocations {
            self.notes.push(
                Diagnostic::new(
                    DiagnosticCode::DelegateCached,
                    format!("function value {} is cached", signature.name),
                )
                .with_span(span)
                .build(),
            );
        }
        Ok(Expr::Coalesce {
            left: Box::new(cache.clone()),
            right: Box::new(Expr::assign(cache, delegate)),
        })
    }

    // ---- nested functions ----

    /// Move a nested function's body into its synthesized callable
    fn lower_function(&mut self, decl: FunctionDecl) -> Result<()> {
        let FunctionDecl {
            id,
            kind,
            name: _,
            params,
            type_params,
            return_type,
            body,
            is_async,
            is_iterator,
            span: _,
        } = decl;
        let signature = self.signature(id)?.clone();
        log::trace!("moving body of function {} into {}.{}", id, signature.owner, signature.name);

        let frame_this = if signature.is_static || signature.kind == ClosureKind::Singleton {
            None
        } else {
            Some(signature.owner.clone())
        };
        let innermost = match signature.kind {
            ClosureKind::General | ClosureKind::ThisOnly => {
                self.frame_pointers.get(&signature.owner).copied()
            }
            ClosureKind::Static | ClosureKind::Singleton => None,
        };
        let saved = SavedBody {
            current: std::mem::replace(
                &mut self.current,
                Current {
                    func: Some(id),
                    frame_this,
                    struct_params: signature.struct_params.clone(),
                    body: body.id,
                },
            ),
            innermost: std::mem::replace(&mut self.innermost, innermost),
            added_locals: std::mem::take(&mut self.added_locals),
            added_statements: std::mem::take(&mut self.added_statements),
        };

        if kind == FunctionKind::Lambda {
            self.syntax.push(Marker::LoopOrLambda);
        }
        let body = self.rewrite_block(body);
        if kind == FunctionKind::Lambda {
            self.syntax.pop();
        }
        let body = self.add_statements_if_needed(body?);

        self.current = saved.current;
        self.innermost = saved.innermost;
        self.added_locals = saved.added_locals;
        self.added_statements = saved.added_statements;

        let mut all_params = params;
        all_params.extend(signature.struct_params.iter().map(|(_, param)| *param));
        self.callables.push(SynthesizedCallable {
            name: signature.name,
            owner: signature.owner,
            closure_kind: signature.kind,
            kind,
            original: id,
            is_static: signature.is_static,
            params: all_params,
            type_params,
            return_type,
            is_async,
            is_iterator,
            lambda_id: signature.lambda_id,
            body,
        });
        Ok(())
    }

    /// Wrap a body with the locals and initializers added while rewriting it
    fn add_statements_if_needed(&mut self, body: Block) -> Block {
        if self.added_locals.is_empty() && self.added_statements.is_empty() {
            return body;
        }
        let span = body.span;
        let mut stmts = std::mem::take(&mut self.added_statements);
        stmts.push(Stmt::Block(body));
        Block {
            id: self.fresh_node(),
            span,
            locals: std::mem::take(&mut self.added_locals),
            stmts,
        }
    }
}

fn empty_block(id: NodeId, span: Span) -> Block {
    Block {
        id,
        span,
        locals: Vec::new(),
        stmts: Vec::new(),
    }
}
