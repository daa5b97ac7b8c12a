//! Names of synthesized types, members and locals
//!
//! Names contain characters that are illegal in source identifiers so they
//! can never collide with user declarations.

use std::collections::HashSet;

use super::debug_info::DebugId;

/// Field holding the enclosing instance
pub const THIS_PROXY_FIELD: &str = "<>4__this";

/// Shared frame for stateless function values
pub const SINGLETON_CLASS: &str = "<>c";

/// Static field holding the shared frame instance
pub const SINGLETON_FIELD: &str = "<>9";

/// `<prefix><method>[#gen]_<entity>[#gen]`
fn method_scoped(prefix: &str, method: DebugId, entity: DebugId) -> String {
    format!("{}{}_{}", prefix, method, entity)
}

pub fn display_class_name(method: DebugId, closure: DebugId) -> String {
    method_scoped("<>c__DisplayClass", method, closure)
}

/// Static frame of a generic method; cannot be shared across methods
pub fn static_frame_name(method: DebugId) -> String {
    format!("<>c__{}", method)
}

/// Lambda callable. The method id is left out when the lambda lives on a
/// display class, which is already specific to the method.
pub fn lambda_method_name(method_name: &str, method: Option<DebugId>, lambda: DebugId) -> String {
    match method {
        Some(method) => format!("<{}>b__{}_{}", method_name, method, lambda),
        None => format!("<{}>b__{}", method_name, lambda),
    }
}

pub fn local_function_name(
    method_name: &str,
    local_name: &str,
    method: DebugId,
    lambda: DebugId,
) -> String {
    format!("<{}>g__{}|{}_{}", method_name, local_name, method, lambda)
}

/// Local holding an environment instance; also names parent fields
pub fn frame_local_name(index: usize) -> String {
    format!("CS$<>8__locals{}", index)
}

pub fn delegate_cache_field(method: Option<DebugId>, lambda: DebugId) -> String {
    match method {
        Some(method) => format!("<>9__{}_{}", method, lambda),
        None => format!("<>9__{}", lambda),
    }
}

pub fn delegate_cache_local(index: usize) -> String {
    format!("CS$<>9__CachedAnonymousMethodDelegate{}", index)
}

/// Keeps field names unique within one synthesized type
#[derive(Debug, Default)]
pub struct FieldNames {
    used: HashSet<String>,
}

impl FieldNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_suffixes() {
        assert_eq!(
            display_class_name(DebugId::new(2, 0), DebugId::new(0, 0)),
            "<>c__DisplayClass2_0"
        );
        assert_eq!(
            display_class_name(DebugId::new(2, 1), DebugId::new(3, 1)),
            "<>c__DisplayClass2#1_3#1"
        );
        assert_eq!(
            lambda_method_name("Run", Some(DebugId::new(1, 0)), DebugId::new(4, 0)),
            "<Run>b__1_4"
        );
        assert_eq!(lambda_method_name("Run", None, DebugId::new(4, 0)), "<Run>b__4");
        assert_eq!(
            local_function_name("Run", "helper", DebugId::new(1, 0), DebugId::new(0, 0)),
            "<Run>g__helper|1_0"
        );
    }

    #[test]
    fn test_field_names_are_deduplicated() {
        let mut names = FieldNames::new();
        assert_eq!(names.unique("x"), "x");
        assert_eq!(names.unique("x"), "x_2");
        assert_eq!(names.unique("x"), "x_3");
        assert_eq!(names.unique("y"), "y");
    }
}
