//! Bound IR definitions
//!
//! Every construct that can own the lifetime of a local (blocks, catch
//! clauses, sequences with locals) carries a [`NodeId`] and a [`Span`] so
//! later passes can key per-scope decisions on it.

use hoist_diagnostics::Span;
use hoist_types::{FuncId, LocalId, NodeId, Type};
use serde::{Deserialize, Serialize};

/// A set of method bodies lowered together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub name: String,
    pub methods: Vec<MethodBody>,
}

impl CompilationUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }
}

/// What kind of member a method body belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MethodKind {
    #[default]
    Ordinary,
    /// Instance constructor; `this` is unusable until the initializer call
    Constructor,
    /// Type initializer
    StaticConstructor,
}

/// A method body with its local table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodBody {
    /// Method name
    pub name: String,
    /// Name of the type declaring the method
    pub containing_type: String,
    pub kind: MethodKind,
    /// Position of the method among the members of its type
    pub ordinal: i32,
    /// The `this` local (None for static methods)
    pub this_local: Option<LocalId>,
    /// Declared inside a variant interface, where synthesized members are restricted
    #[serde(default)]
    pub in_variant_interface: bool,
    /// Method type parameters
    #[serde(default)]
    pub type_params: Vec<String>,
    /// Method parameters
    pub params: Vec<LocalId>,
    pub return_type: Type,
    /// All locals of the method, nested functions included, indexed by LocalId
    pub locals: Vec<LocalInfo>,
    pub body: Block,
    pub span: Span,
}

impl MethodBody {
    /// Look up a local by id
    pub fn local(&self, id: LocalId) -> Option<&LocalInfo> {
        self.locals.get(id as usize)
    }

    /// Add a new local to the table, returning its id
    pub fn add_local(&mut self, name: impl Into<String>, ty: Type, kind: LocalKind) -> LocalId {
        let id = self.locals.len() as LocalId;
        self.locals.push(LocalInfo {
            name: name.into(),
            ty,
            kind,
        });
        id
    }

    pub fn is_static(&self) -> bool {
        self.this_local.is_none()
    }
}

/// Local variable metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalInfo {
    pub name: String,
    pub ty: Type,
    pub kind: LocalKind,
}

/// Origin of a local
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalKind {
    /// User-declared local
    Local,
    /// Parameter of the method or of a nested function
    Parameter,
    /// The enclosing instance
    This,
    /// Synthesized: holds an environment instance
    FramePointer,
    /// Synthesized: caches a function value
    DelegateCache,
    /// Synthesized: by-ref struct environment parameter of a lowered callable
    EnvironmentParameter,
}

impl LocalKind {
    pub fn is_parameter(&self) -> bool {
        matches!(self, LocalKind::Parameter)
    }
}

/// A braced block; owns the locals declared directly in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub locals: Vec<LocalId>,
    pub stmts: Vec<Stmt>,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// Nested block
    Block(Block),
    /// Expression statement
    Expr(Expr),
    /// Return statement
    Return(Option<Expr>),
    If {
        condition: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    While {
        condition: Expr,
        body: Block,
    },
    DoWhile {
        body: Block,
        condition: Expr,
    },
    /// For loop; locals of the initializer live in the enclosing block
    For {
        init: Vec<Expr>,
        condition: Option<Expr>,
        update: Vec<Expr>,
        body: Block,
    },
    Break,
    Continue,
    /// Throw (None rethrows inside a catch)
    Throw(Option<Expr>),
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    /// Local function declaration
    LocalFunction(Box<FunctionDecl>),
    /// `yield return` (Some) or `yield break` (None)
    Yield(Option<Expr>),
}

/// A catch clause of a try statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub id: NodeId,
    pub span: Span,
    /// Locals scoped to the clause (the exception variable among them)
    pub locals: Vec<LocalId>,
    pub exception_type: Type,
    /// Where the caught exception is stored
    pub exception_target: Option<Expr>,
    pub filter: Option<Expr>,
    pub body: Block,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// A field reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    /// Declaring type
    pub owner: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

/// Target of a call or function value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodRef {
    /// An ordinary member of some type
    Member { owner: String, name: String },
    /// A local function of the current method
    Local(FuncId),
    /// A callable synthesized by lowering
    Synthesized { owner: String, name: String },
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Default value of a type (zero-initialized struct for value types)
    Default(Type),
    /// Local variable or parameter
    Local(LocalId),
    /// The enclosing instance
    This,
    /// The enclosing instance viewed as its base type
    Base,
    /// Field access; a missing receiver means a static field
    Field {
        receiver: Option<Box<Expr>>,
        field: FieldRef,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Method call; a missing receiver means a static call
    Call {
        receiver: Option<Box<Expr>>,
        method: MethodRef,
        args: Vec<Expr>,
    },
    /// `: base(...)` or `: this(...)` at the start of a constructor
    ConstructorInitializer {
        target: String,
        args: Vec<Expr>,
    },
    /// Invocation of a function value
    Invoke {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Object creation
    New {
        ty: Type,
        args: Vec<Expr>,
    },
    /// Anonymous function converted to a function value
    Lambda {
        func: Box<FunctionDecl>,
        delegate_type: Type,
    },
    /// Function value bound to a method
    Delegate {
        receiver: Option<Box<Expr>>,
        method: MethodRef,
        delegate_type: Type,
    },
    /// Side effects followed by a value, with its own locals
    Sequence {
        id: NodeId,
        span: Span,
        locals: Vec<LocalId>,
        side_effects: Vec<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// `left ?? right`
    Coalesce {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// By-reference argument
    Ref(Box<Expr>),
    /// A type used as the receiver of a static member
    TypeRef(String),
    Await(Box<Expr>),
}

impl Expr {
    /// Type of a static receiver
    pub fn type_ref(name: impl Into<String>) -> Self {
        Expr::TypeRef(name.into())
    }

    pub fn field(receiver: Expr, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Field {
            receiver: Some(Box::new(receiver)),
            field: FieldRef::new(owner, name),
        }
    }

    pub fn static_field(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Field {
            receiver: None,
            field: FieldRef::new(owner, name),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }
}

/// Lambda or local function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    Lambda,
    LocalFunction,
}

/// A nested function declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub id: FuncId,
    pub kind: FunctionKind,
    /// Declared name (None for lambdas)
    pub name: Option<String>,
    pub params: Vec<LocalId>,
    #[serde(default)]
    pub type_params: Vec<String>,
    pub return_type: Type,
    pub body: Block,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_iterator: bool,
    pub span: Span,
}

impl FunctionDecl {
    pub fn is_lambda(&self) -> bool {
        self.kind == FunctionKind::Lambda
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("lambda#{}", self.id),
        }
    }
}
