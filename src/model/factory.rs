/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Constructs default instances of observable types from their type tag.

use std::{collections::HashMap, sync::Arc};

use super::observable::{ObjectRef, Observable};

type Constructor = Arc<dyn Fn() -> ObjectRef + Send + Sync>;

/// Maps each type tag that may appear in a `CreateObject` command to a constructor of a default
/// instance of that type.
///
/// Every peer must register the same set of types under the same tags.
#[derive(Clone, Default)]
pub struct TypeFactory {
    constructors: HashMap<&'static str, Constructor>,
}

impl TypeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`, under the tag its default instance reports through
    /// [`Observable::type_tag`].
    pub fn register<T: Observable + Default>(mut self) -> Self {
        let tag = T::default().type_tag();
        self.constructors
            .insert(tag, Arc::new(|| Arc::new(T::default()) as ObjectRef));
        self
    }

    /// Register a custom constructor under `tag`.
    pub fn register_with<F>(mut self, tag: &'static str, constructor: F) -> Self
    where
        F: Fn() -> ObjectRef + Send + Sync + 'static,
    {
        self.constructors.insert(tag, Arc::new(constructor));
        self
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Instantiate a default object of the type registered under `tag`, or `None` if no such type is
    /// registered.
    pub fn create(&self, tag: &str) -> Option<ObjectRef> {
        self.constructors.get(tag).map(|constructor| constructor())
    }
}
