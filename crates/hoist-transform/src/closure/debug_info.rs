//! Stable identities for synthesized closures and lambdas
//!
//! Edit-and-continue maps the environments and lambdas of a previous
//! generation onto the new compilation by syntax offset. An environment is
//! matched when its parent and, for struct environments, its captured field
//! names are unchanged. A struct environment has no type identity across
//! generations, so its field list is the only thing tying it to the old one.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Identity of a synthesized entity: an ordinal plus the generation that
/// introduced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DebugId {
    pub ordinal: i32,
    pub generation: u32,
}

impl DebugId {
    /// Closure ordinal of lambdas lowered onto the containing type or the singleton frame
    pub const STATIC_CLOSURE_ORDINAL: i32 = -1;
    /// Closure ordinal of lambdas lowered onto the containing type as instance members
    pub const THIS_ONLY_CLOSURE_ORDINAL: i32 = -2;

    pub fn new(ordinal: i32, generation: u32) -> Self {
        Self { ordinal, generation }
    }
}

impl std::fmt::Display for DebugId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.generation > 0 {
            write!(f, "{}#{}", self.ordinal, self.generation)
        } else {
            write!(f, "{}", self.ordinal)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureDebugInfo {
    pub syntax_offset: i32,
    pub closure_id: DebugId,
    pub parent_closure_id: Option<DebugId>,
    /// Field names of a struct environment, in order
    pub struct_captures: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaDebugInfo {
    pub syntax_offset: i32,
    pub lambda_id: DebugId,
    /// Ordinal of the environment the lambda is lowered onto, or one of
    /// the negative placement ordinals
    pub closure_ordinal: i32,
    /// Struct environments passed by reference
    pub struct_closure_ids: Vec<DebugId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RudeEditKind {
    /// The environment is now chained to a different parent
    ClosureParentChanged,
    /// A struct environment captures a different set of variables
    StructCapturesChanged,
    /// A lambda receives different struct environments
    LambdaStructClosuresChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RudeEdit {
    pub kind: RudeEditKind,
    /// Identity in the previous generation that can no longer be used
    pub previous_id: DebugId,
    pub syntax_offset: i32,
    pub message: String,
}

/// Result of looking up an entity of the previous generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotLookup {
    Reused(DebugId),
    Incompatible(RudeEdit),
    NotFound,
}

/// Debug identities from a previous compilation of the same method
pub trait SlotAllocator {
    fn method_id(&self) -> Option<DebugId>;

    /// Newest generation among the ids this allocator hands back. The
    /// generation being compiled must be strictly greater.
    fn latest_generation(&self) -> u32;

    fn previous_closure(
        &self,
        syntax_offset: i32,
        parent: Option<DebugId>,
        struct_captures: Option<&[String]>,
    ) -> SlotLookup;

    fn previous_lambda(
        &self,
        syntax_offset: i32,
        closure_ordinal: i32,
        struct_closure_ids: &[DebugId],
    ) -> SlotLookup;
}

/// Debug record of one lowered method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDebugInfo {
    pub method_id: DebugId,
    pub closures: Vec<ClosureDebugInfo>,
    pub lambdas: Vec<LambdaDebugInfo>,
    #[serde(default)]
    pub rude_edits: Vec<RudeEdit>,
}

/// A previous generation's record doubles as the slot allocator for the next one
impl SlotAllocator for MethodDebugInfo {
    fn method_id(&self) -> Option<DebugId> {
        Some(self.method_id)
    }

    fn latest_generation(&self) -> u32 {
        let closures = self
            .closures
            .iter()
            .flat_map(|c| std::iter::once(c.closure_id).chain(c.parent_closure_id));
        let lambdas = self.lambdas.iter().flat_map(|l| {
            std::iter::once(l.lambda_id).chain(l.struct_closure_ids.iter().copied())
        });
        std::iter::once(self.method_id)
            .chain(closures)
            .chain(lambdas)
            .map(|id| id.generation)
            .max()
            .unwrap_or(0)
    }

    fn previous_closure(
        &self,
        syntax_offset: i32,
        parent: Option<DebugId>,
        struct_captures: Option<&[String]>,
    ) -> SlotLookup {
        let Some(previous) = self.closures.iter().find(|c| c.syntax_offset == syntax_offset) else {
            return SlotLookup::NotFound;
        };
        if previous.parent_closure_id != parent {
            return SlotLookup::Incompatible(RudeEdit {
                kind: RudeEditKind::ClosureParentChanged,
                previous_id: previous.closure_id,
                syntax_offset,
                message: "the scope of a captured variable is now chained differently".to_string(),
            });
        }
        if previous.struct_captures.as_deref() != struct_captures {
            return SlotLookup::Incompatible(RudeEdit {
                kind: RudeEditKind::StructCapturesChanged,
                previous_id: previous.closure_id,
                syntax_offset,
                message: "the set of variables captured in this scope changed".to_string(),
            });
        }
        SlotLookup::Reused(previous.closure_id)
    }

    fn previous_lambda(
        &self,
        syntax_offset: i32,
        closure_ordinal: i32,
        struct_closure_ids: &[DebugId],
    ) -> SlotLookup {
        let Some(previous) = self.lambdas.iter().find(|l| l.syntax_offset == syntax_offset) else {
            return SlotLookup::NotFound;
        };
        if previous.closure_ordinal != closure_ordinal {
            return SlotLookup::NotFound;
        }
        if previous.struct_closure_ids != struct_closure_ids {
            return SlotLookup::Incompatible(RudeEdit {
                kind: RudeEditKind::LambdaStructClosuresChanged,
                previous_id: previous.lambda_id,
                syntax_offset,
                message: "the function now captures different local scopes".to_string(),
            });
        }
        SlotLookup::Reused(previous.lambda_id)
    }
}

/// Baseline records of every method in a compilation unit, keyed by
/// `Type::Method` and ordinal
pub type Baseline = HashMap<String, MethodDebugInfo>;

pub fn baseline_key(containing_type: &str, method: &str, ordinal: i32) -> String {
    format!("{}::{}#{}", containing_type, method, ordinal)
}

/// Hands out debug ids for one method, reusing previous ones when possible
pub struct DebugInfoBuilder<'a> {
    allocator: Option<&'a dyn SlotAllocator>,
    generation: u32,
    method_id: DebugId,
    closures: Vec<ClosureDebugInfo>,
    lambdas: Vec<LambdaDebugInfo>,
    rude_edits: Vec<RudeEdit>,
    issued_closures: HashSet<DebugId>,
    issued_lambdas: HashSet<DebugId>,
}

/// Which id space a lookup belongs to
#[derive(Clone, Copy)]
enum IdSpace {
    Closure,
    Lambda,
}

impl<'a> DebugInfoBuilder<'a> {
    pub fn new(allocator: Option<&'a dyn SlotAllocator>, method_ordinal: i32, generation: u32) -> Self {
        let method_id = allocator
            .and_then(|a| a.method_id())
            .unwrap_or_else(|| DebugId::new(method_ordinal, generation));
        Self {
            allocator,
            generation,
            method_id,
            closures: Vec::new(),
            lambdas: Vec::new(),
            rude_edits: Vec::new(),
            issued_closures: HashSet::new(),
            issued_lambdas: HashSet::new(),
        }
    }

    pub fn method_id(&self) -> DebugId {
        self.method_id
    }

    fn resolve(&mut self, lookup: SlotLookup, space: IdSpace) -> DebugId {
        let generation = self.generation;
        let issued = match space {
            IdSpace::Closure => &mut self.issued_closures,
            IdSpace::Lambda => &mut self.issued_lambdas,
        };
        let reused = match lookup {
            SlotLookup::Reused(id) if !issued.contains(&id) => Some(id),
            SlotLookup::Reused(id) => {
                log::debug!("previous id {} already issued, allocating a fresh one", id);
                None
            }
            SlotLookup::Incompatible(rude_edit) => {
                log::debug!(
                    "rude edit at offset {}: {}",
                    rude_edit.syntax_offset,
                    rude_edit.message
                );
                self.rude_edits.push(rude_edit);
                None
            }
            SlotLookup::NotFound => None,
        };
        let id = reused.unwrap_or_else(|| {
            // Lowest ordinal of this generation nobody holds yet
            (0..)
                .map(|ordinal| DebugId::new(ordinal, generation))
                .find(|id| !issued.contains(id))
                .unwrap_or(DebugId::new(i32::MAX, generation))
        });
        issued.insert(id);
        id
    }

    pub fn closure_id(
        &mut self,
        syntax_offset: i32,
        parent: Option<DebugId>,
        struct_captures: Option<Vec<String>>,
    ) -> DebugId {
        let lookup = match self.allocator {
            Some(allocator) => {
                allocator.previous_closure(syntax_offset, parent, struct_captures.as_deref())
            }
            None => SlotLookup::NotFound,
        };
        let id = self.resolve(lookup, IdSpace::Closure);
        self.closures.push(ClosureDebugInfo {
            syntax_offset,
            closure_id: id,
            parent_closure_id: parent,
            struct_captures,
        });
        id
    }

    pub fn lambda_id(
        &mut self,
        syntax_offset: i32,
        closure_ordinal: i32,
        struct_closure_ids: Vec<DebugId>,
    ) -> DebugId {
        let lookup = match self.allocator {
            Some(allocator) => {
                allocator.previous_lambda(syntax_offset, closure_ordinal, &struct_closure_ids)
            }
            None => SlotLookup::NotFound,
        };
        let id = self.resolve(lookup, IdSpace::Lambda);
        self.lambdas.push(LambdaDebugInfo {
            syntax_offset,
            lambda_id: id,
            closure_ordinal,
            struct_closure_ids,
        });
        id
    }

    pub fn finish(self) -> MethodDebugInfo {
        MethodDebugInfo {
            method_id: self.method_id,
            closures: self.closures,
            lambdas: self.lambdas,
            rude_edits: self.rude_edits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> MethodDebugInfo {
        let mut builder = DebugInfoBuilder::new(None, 3, 0);
        let outer = builder.closure_id(0, None, None);
        builder.closure_id(20, Some(outer), None);
        builder.closure_id(40, None, Some(vec!["x".to_string()]));
        builder.lambda_id(60, 1, vec![]);
        builder.lambda_id(80, DebugId::STATIC_CLOSURE_ORDINAL, vec![DebugId::new(2, 0)]);
        builder.finish()
    }

    #[test]
    fn test_fresh_ids_are_sequential() {
        let info = baseline();
        assert_eq!(info.method_id, DebugId::new(3, 0));
        let ids: Vec<_> = info.closures.iter().map(|c| c.closure_id.ordinal).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(info.rude_edits.is_empty());
    }

    #[test]
    fn test_unchanged_method_reuses_every_id() {
        let previous = baseline();
        let mut builder = DebugInfoBuilder::new(Some(&previous), 7, 1);
        let outer = builder.closure_id(0, None, None);
        builder.closure_id(20, Some(outer), None);
        builder.closure_id(40, None, Some(vec!["x".to_string()]));
        builder.lambda_id(60, 1, vec![]);
        builder.lambda_id(80, DebugId::STATIC_CLOSURE_ORDINAL, vec![DebugId::new(2, 0)]);
        let next = builder.finish();

        assert_eq!(next.method_id, previous.method_id, "method id comes from the allocator");
        assert_eq!(next.closures, previous.closures);
        assert_eq!(next.lambdas, previous.lambdas);
        assert!(next.rude_edits.is_empty());
    }

    #[test]
    fn test_struct_capture_change_is_a_rude_edit() {
        let previous = baseline();
        let mut builder = DebugInfoBuilder::new(Some(&previous), 3, 1);
        let id = builder.closure_id(40, None, Some(vec!["x".to_string(), "y".to_string()]));
        let next = builder.finish();

        assert_eq!(id, DebugId::new(0, 1), "fresh id in the new generation");
        assert_eq!(next.rude_edits.len(), 1);
        assert_eq!(next.rude_edits[0].kind, RudeEditKind::StructCapturesChanged);
        assert_eq!(next.rude_edits[0].previous_id, DebugId::new(2, 0));
    }

    #[test]
    fn test_parent_change_is_a_rude_edit() {
        let previous = baseline();
        let lookup = previous.previous_closure(20, None, None);
        assert!(matches!(
            lookup,
            SlotLookup::Incompatible(RudeEdit { kind: RudeEditKind::ClosureParentChanged, .. })
        ));
    }

    #[test]
    fn test_lambda_moved_to_other_closure_gets_fresh_id_silently() {
        let previous = baseline();
        let mut builder = DebugInfoBuilder::new(Some(&previous), 3, 2);
        let id = builder.lambda_id(60, 5, vec![]);
        assert_eq!(id, DebugId::new(0, 2));
        assert!(builder.finish().rude_edits.is_empty());
    }

    #[test]
    fn test_lambda_struct_closure_change_is_a_rude_edit() {
        let previous = baseline();
        let lookup = previous.previous_lambda(80, DebugId::STATIC_CLOSURE_ORDINAL, &[]);
        assert!(matches!(
            lookup,
            SlotLookup::Incompatible(RudeEdit { kind: RudeEditKind::LambdaStructClosuresChanged, .. })
        ));
    }

    #[test]
    fn test_fresh_ids_never_repeat_an_issued_id() {
        // previous record of the same generation: offset 20 holds ordinal 0
        let mut builder = DebugInfoBuilder::new(None, 3, 0);
        builder.closure_id(20, None, None);
        builder.lambda_id(25, 0, vec![]);
        let previous = builder.finish();

        let mut builder = DebugInfoBuilder::new(Some(&previous), 3, 0);
        let added = builder.closure_id(0, None, None);
        let kept = builder.closure_id(20, None, None);
        let added_lambda = builder.lambda_id(5, 0, vec![]);
        let kept_lambda = builder.lambda_id(25, 0, vec![]);
        assert_ne!(added, kept, "closure ids must be distinct");
        assert_ne!(added_lambda, kept_lambda, "lambda ids must be distinct");
        assert_eq!(kept, DebugId::new(1, 0));
    }

    #[test]
    fn test_latest_generation_covers_every_id() {
        let mut info = baseline();
        assert_eq!(info.latest_generation(), 0);
        info.lambdas[1].struct_closure_ids.push(DebugId::new(0, 4));
        assert_eq!(info.latest_generation(), 4);
    }

    #[test]
    fn test_debug_info_serializes() {
        let info = baseline();
        let json = serde_json::to_string(&info).expect("serialize");
        let back: MethodDebugInfo = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, info);
    }

    #[test]
    fn test_display_includes_generation() {
        assert_eq!(DebugId::new(4, 0).to_string(), "4");
        assert_eq!(DebugId::new(4, 2).to_string(), "4#2");
    }
}
