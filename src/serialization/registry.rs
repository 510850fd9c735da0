//! Structure and handle factories
//!
//! Lookup tables from type name to constructor, owned by a decoder instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::value::{ObjectHandle, Structure};

/// Produces an empty structure, field slots declared but unset
pub type StructureConstructor = Arc<dyn Fn() -> Structure + Send + Sync>;

/// Produces a handle from its identifier
pub type HandleConstructor = Arc<dyn Fn(&str) -> ObjectHandle + Send + Sync>;

/// Named constructors used while decoding composite values
#[derive(Clone, Default)]
pub struct TypeRegistry {
    structures: HashMap<String, StructureConstructor>,
    handles: HashMap<String, HandleConstructor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_structure<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Structure + Send + Sync + 'static,
    {
        self.structures.insert(name.into(), Arc::new(constructor));
        self
    }

    pub fn register_handle<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&str) -> ObjectHandle + Send + Sync + 'static,
    {
        self.handles.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Register a handle type whose handles carry nothing but the identifier
    pub fn register_handle_type(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        let type_name = name.clone();
        self.register_handle(name, move |id| ObjectHandle::new(type_name.clone(), id))
    }

    pub fn with_structure<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Structure + Send + Sync + 'static,
    {
        self.register_structure(name, constructor);
        self
    }

    pub fn with_handle_type(mut self, name: impl Into<String>) -> Self {
        self.register_handle_type(name);
        self
    }

    pub fn create_structure(&self, name: &str) -> Option<Structure> {
        self.structures.get(name).map(|constructor| constructor())
    }

    pub fn create_handle(&self, name: &str, id: &str) -> Option<ObjectHandle> {
        self.handles.get(name).map(|constructor| constructor(id))
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("structures", &self.structures.keys().collect::<Vec<_>>())
            .field("handles", &self.handles.keys().collect::<Vec<_>>())
            .finish()
    }
}
