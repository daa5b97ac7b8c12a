//! Shared frames for stateless function values
//!
//! Every non-generic method of a type lowers its stateless lambdas onto the
//! same `<>c` frame. The driver owns the cache and passes it to each
//! invocation, then emits the accumulated frames once per compilation unit.

use std::collections::BTreeMap;

use hoist_types::Type;

use super::names::{SINGLETON_CLASS, SINGLETON_FIELD};
use super::synthesized::{qualified, EnvironmentKind, EnvironmentType, FieldKind, HoistedField};

#[derive(Debug, Default)]
pub struct SingletonFrameCache {
    frames: BTreeMap<String, EnvironmentType>,
}

impl SingletonFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame for `containing_type`, created on first request
    pub fn get_or_create(&mut self, containing_type: &str) -> &mut EnvironmentType {
        self.frames
            .entry(containing_type.to_string())
            .or_insert_with(|| {
                log::debug!("creating singleton frame for {}", containing_type);
                let ty = Type::Named(qualified(containing_type, SINGLETON_CLASS));
                EnvironmentType {
                    name: SINGLETON_CLASS.to_string(),
                    containing_type: containing_type.to_string(),
                    kind: EnvironmentKind::Singleton,
                    type_params: Vec::new(),
                    closure_id: None,
                    scope: None,
                    fields: vec![HoistedField {
                        name: SINGLETON_FIELD.to_string(),
                        ty,
                        is_static: true,
                        kind: FieldKind::SingletonInstance,
                    }],
                }
            })
    }

    pub fn frame(&self, containing_type: &str) -> Option<&EnvironmentType> {
        self.frames.get(containing_type)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> impl Iterator<Item = &EnvironmentType> {
        self.frames.values()
    }

    pub fn into_frames(self) -> Vec<EnvironmentType> {
        self.frames.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_is_created_once_per_type() {
        let mut cache = SingletonFrameCache::new();
        cache.get_or_create("C").fields.push(HoistedField {
            name: "<>9__0_0".to_string(),
            ty: Type::Object,
            is_static: true,
            kind: FieldKind::DelegateCache,
        });
        let again = cache.get_or_create("C");
        assert_eq!(again.fields.len(), 2, "second request must return the same frame");
        cache.get_or_create("D");
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.frame("C").map(|f| f.qualified_name()),
            Some("C.<>c".to_string())
        );
    }
}
