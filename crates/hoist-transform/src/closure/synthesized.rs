//! Declarations produced by closure conversion

use hoist_ir::{Block, FunctionKind, MethodBody, Printer};
use hoist_types::{FuncId, LocalId, NodeId, Type};
use serde::{Deserialize, Serialize};

use super::classify::ClosureKind;
use super::debug_info::{DebugId, MethodDebugInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// A hoisted local or parameter
    Variable(LocalId),
    /// The enclosing instance
    EnclosingInstance,
    /// The enclosing environment
    Parent,
    /// Cached function value
    DelegateCache,
    /// Shared instance of a singleton frame
    SingletonInstance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoistedField {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentKind {
    /// Heap allocated display class
    Class,
    /// Value type passed to local functions by reference
    Struct,
    /// Stateless frame shared through a static instance
    Singleton,
}

/// A synthesized type nested in the method's containing type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentType {
    pub name: String,
    pub containing_type: String,
    pub kind: EnvironmentKind,
    pub type_params: Vec<String>,
    pub closure_id: Option<DebugId>,
    /// Scope the environment is allocated in
    pub scope: Option<NodeId>,
    pub fields: Vec<HoistedField>,
}

impl EnvironmentType {
    pub fn qualified_name(&self) -> String {
        qualified(&self.containing_type, &self.name)
    }

    /// The type as seen from the method body
    pub fn ty(&self) -> Type {
        if self.type_params.is_empty() {
            Type::Named(self.qualified_name())
        } else {
            Type::Generic {
                base: self.qualified_name(),
                type_args: self
                    .type_params
                    .iter()
                    .map(|p| Type::TypeVar(p.clone()))
                    .collect(),
            }
        }
    }

    pub fn field(&self, name: &str) -> Option<&HoistedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn variable_field(&self, local: LocalId) -> Option<&HoistedField> {
        self.fields
            .iter()
            .find(|f| f.kind == FieldKind::Variable(local))
    }

    pub fn is_struct(&self) -> bool {
        self.kind == EnvironmentKind::Struct
    }
}

pub fn qualified(containing_type: &str, name: &str) -> String {
    format!("{}.{}", containing_type, name)
}

/// Callable that replaces a nested function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedCallable {
    pub name: String,
    /// Qualified name of the declaring type
    pub owner: String,
    pub closure_kind: ClosureKind,
    pub kind: FunctionKind,
    pub original: FuncId,
    pub is_static: bool,
    /// Original parameters followed by struct environment parameters
    pub params: Vec<LocalId>,
    pub type_params: Vec<String>,
    pub return_type: Type,
    pub is_async: bool,
    pub is_iterator: bool,
    pub lambda_id: DebugId,
    pub body: Block,
}

/// Everything closure conversion produces for one method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoweredMethod {
    /// Rewritten method; its local table also covers the callables
    pub method: MethodBody,
    pub callables: Vec<SynthesizedCallable>,
    /// Display classes and per-method static frames. Shared singleton
    /// frames live in the frame cache.
    pub environments: Vec<EnvironmentType>,
    pub debug_info: MethodDebugInfo,
}

impl LoweredMethod {
    pub fn environment(&self, qualified_name: &str) -> Option<&EnvironmentType> {
        self.environments
            .iter()
            .find(|e| e.qualified_name() == qualified_name)
    }

    pub fn callable_for(&self, func: FuncId) -> Option<&SynthesizedCallable> {
        self.callables.iter().find(|c| c.original == func)
    }

    /// Pseudo-source of the method, its environments and callables
    pub fn to_text(&self) -> String {
        let mut out = Printer::method(&self.method);
        out.push('\n');
        for env in &self.environments {
            out.push_str(&environment_text(env));
        }
        for callable in &self.callables {
            let mut printer = Printer::new(&self.method.locals);
            let params = printer.params(&callable.params);
            printer.block(&callable.body);
            out.push_str(&format!(
                "\n// {} ({})\n{}{} {}.{}({}) {}\n",
                callable.kind_label(),
                callable.closure_kind,
                if callable.is_static { "static " } else { "" },
                callable.return_type,
                callable.owner,
                callable.name,
                params,
                printer.finish()
            ));
        }
        out
    }
}

impl SynthesizedCallable {
    fn kind_label(&self) -> &'static str {
        match self.kind {
            FunctionKind::Lambda => "lambda",
            FunctionKind::LocalFunction => "local function",
        }
    }
}

pub fn environment_text(env: &EnvironmentType) -> String {
    let keyword = match env.kind {
        EnvironmentKind::Struct => "struct",
        EnvironmentKind::Class | EnvironmentKind::Singleton => "class",
    };
    let mut out = format!("\n{} {} {{\n", keyword, env.ty());
    for field in &env.fields {
        out.push_str(&format!(
            "    {}{} {};\n",
            if field.is_static { "static " } else { "" },
            field.ty,
            field.name
        ));
    }
    out.push_str("}\n");
    out
}
