//! Type system for hoist
//!
//! Defines the type representations carried by the bound IR and by the
//! declarations synthesized during lowering.

use serde::{Deserialize, Serialize};

/// Unique identifier for local variables (including parameters and `this`)
pub type LocalId = u32;

/// Unique identifier for nested functions (lambdas and local functions)
pub type FuncId = u32;

/// Unique identifier for scope-owning IR nodes
pub type NodeId = u32;

/// Core type representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// No value
    Void,
    Boolean,
    Int32,
    Int64,
    Double,
    String,
    /// The root reference type
    Object,
    /// Array type with element type
    Array(Box<Type>),
    /// Function value type (a delegate)
    Function(FunctionType),
    /// Reference to a named type (class, struct, or synthesized environment)
    Named(String),
    /// Type parameter reference (e.g., T in M<T>)
    TypeVar(String),
    /// Generic type instantiation (e.g., List<int>)
    Generic {
        /// The base type name (e.g., "List", "Dictionary")
        base: String,
        /// Type arguments
        type_args: Vec<Type>,
    },
}

/// Function value type information
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    /// Parameter types
    pub params: Vec<Type>,
    /// Return type
    pub return_type: Box<Type>,
}

impl Type {
    /// Build a delegate type from parameter and return types.
    pub fn delegate(params: Vec<Type>, return_type: Type) -> Self {
        Type::Function(FunctionType {
            params,
            return_type: Box::new(return_type),
        })
    }

    /// Check if this type uses a type parameter not listed in `allowed`.
    ///
    /// A method's own type parameters are `allowed`; anything else belongs
    /// to an enclosing generic context the method cannot name.
    pub fn mentions_type_var_outside(&self, allowed: &[String]) -> bool {
        match self {
            Type::TypeVar(name) => !allowed.contains(name),
            Type::Array(elem) => elem.mentions_type_var_outside(allowed),
            Type::Function(func) => {
                func.params
                    .iter()
                    .any(|p| p.mentions_type_var_outside(allowed))
                    || func.return_type.mentions_type_var_outside(allowed)
            }
            Type::Generic { type_args, .. } => type_args
                .iter()
                .any(|arg| arg.mentions_type_var_outside(allowed)),
            _ => false,
        }
    }

    /// Name of a named type, if this is one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Type::Named(name) => Some(name),
            Type::Generic { base, .. } => Some(base),
            _ => None,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Boolean => write!(f, "bool"),
            Type::Int32 => write!(f, "int"),
            Type::Int64 => write!(f, "long"),
            Type::Double => write!(f, "double"),
            Type::String => write!(f, "string"),
            Type::Object => write!(f, "object"),
            Type::Array(elem) => write!(f, "{}[]", elem),
            Type::Function(func) => {
                write!(f, "Func<")?;
                for param in &func.params {
                    write!(f, "{}, ", param)?;
                }
                write!(f, "{}>", func.return_type)
            }
            Type::Named(name) | Type::TypeVar(name) => write!(f, "{}", name),
            Type::Generic { base, type_args } => {
                write!(f, "{}<", base)?;
                for (i, arg) in type_args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ">")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_vars_outside_allowed() {
        let allowed = vec!["T".to_string()];
        let closed = Type::delegate(vec![Type::Int32], Type::String);
        assert!(!closed.mentions_type_var_outside(&[]));

        let own = Type::delegate(vec![Type::TypeVar("T".to_string())], Type::Void);
        assert!(!own.mentions_type_var_outside(&allowed));
        assert!(own.mentions_type_var_outside(&[]), "T is foreign without allow list");

        let nested = Type::Generic {
            base: "List".to_string(),
            type_args: vec![Type::Array(Box::new(Type::TypeVar("U".to_string())))],
        };
        assert!(nested.mentions_type_var_outside(&allowed));
    }

    #[test]
    fn test_display() {
        let ty = Type::Generic {
            base: "Dictionary".to_string(),
            type_args: vec![Type::String, Type::Int32],
        };
        assert_eq!(ty.to_string(), "Dictionary<string, int>");
        assert_eq!(
            Type::delegate(vec![Type::Int32], Type::Boolean).to_string(),
            "Func<int, bool>"
        );
    }
}
