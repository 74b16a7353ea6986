//! Type catalog
//!
//! Maps type names to their serializable field table and, when known, a
//! factory building default instances for the decoder.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{SyncError, SyncResult};
use crate::serialize::{short_type_name, Field, NetworkObject, ObjectRef, ObservableList, RecordSchema};

/// Builds a default instance of a type
pub type Factory = Arc<dyn Fn() -> ObjectRef + Send + Sync>;

/// Cached description of a type
#[derive(Clone)]
pub struct TypeInfo {
    pub name: String,
    pub short_name: String,
    pub registrable: bool,
    /// Serialized fields, network id first for registrable types
    pub fields: Vec<Field>,
    factory: Option<Factory>,
}

impl TypeInfo {
    fn describe(object: &dyn NetworkObject, factory: Option<Factory>) -> Self {
        let registrable = object.identity().is_some();
        let mut fields: Vec<Field> = object
            .fields()
            .iter()
            .filter(|f| f.is_serialized())
            .cloned()
            .collect();
        if registrable {
            fields.sort_by_key(|f| !f.is_network_id());
        }

        Self {
            name: object.type_name().to_string(),
            short_name: short_type_name(object.type_name()).to_string(),
            registrable,
            fields,
            factory,
        }
    }

    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }

    /// Build a default instance
    pub fn create(&self) -> SyncResult<ObjectRef> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| SyncError::NoFactory(self.name.clone()))?;
        Ok(factory())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("name", &self.name)
            .field("registrable", &self.registrable)
            .field("fields", &self.fields)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

/// Thread-safe, read-mostly type catalog
#[derive(Default)]
pub struct TypeCatalog {
    types: RwLock<HashMap<String, Arc<TypeInfo>>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the library's own types
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        catalog.register::<ObservableList>();
        catalog
    }

    /// Register a type constructible through `Default`
    pub fn register<T: NetworkObject + Default>(&self) -> Arc<TypeInfo> {
        self.register_factory(|| Arc::new(T::default()) as ObjectRef)
    }

    /// Register a type through its factory. The factory is invoked once to
    /// read the type name and field table.
    pub fn register_factory(
        &self,
        factory: impl Fn() -> ObjectRef + Send + Sync + 'static,
    ) -> Arc<TypeInfo> {
        self.insert_factory(Arc::new(factory))
    }

    pub fn register_schema(&self, schema: &Arc<RecordSchema>) -> Arc<TypeInfo> {
        self.register_factory(schema.factory())
    }

    /// Register a batch of types at startup
    pub fn register_all<I>(&self, factories: I) -> usize
    where
        I: IntoIterator<Item = Factory>,
    {
        factories
            .into_iter()
            .map(|factory| self.insert_factory(factory))
            .count()
    }

    fn insert_factory(&self, factory: Factory) -> Arc<TypeInfo> {
        let sample = factory();
        let info = Arc::new(TypeInfo::describe(sample.as_ref(), Some(factory)));
        tracing::debug!("Registered type {}", info.name);
        self.types.write().insert(info.name.clone(), info.clone());
        info
    }

    /// Descriptor for an object's type, computed once and cached
    pub fn describe(&self, object: &dyn NetworkObject) -> Arc<TypeInfo> {
        if let Some(info) = self.types.read().get(object.type_name()) {
            return info.clone();
        }
        let info = Arc::new(TypeInfo::describe(object, None));
        self.types
            .write()
            .entry(info.name.clone())
            .or_insert(info)
            .clone()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<TypeInfo>> {
        self.types.read().get(name).cloned()
    }

    /// Build a default instance of a named type
    pub fn create(&self, name: &str) -> SyncResult<ObjectRef> {
        self.lookup(name)
            .ok_or_else(|| SyncError::UnknownType(name.to_string()))?
            .create()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.types.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::{Record, NETWORK_ID};

    #[test]
    fn test_builtins() {
        let catalog = TypeCatalog::with_builtins();
        let info = catalog.lookup("peersync.ObservableList").unwrap();
        assert!(info.registrable);
        assert_eq!(info.short_name, "ObservableList");
        assert_eq!(info.fields[0].name, NETWORK_ID);
        assert!(catalog.create("peersync.ObservableList").is_ok());
    }

    #[test]
    fn test_network_id_first_and_selection() {
        let schema = Arc::new(
            RecordSchema::new("demo.Player")
                .value("Name", "")
                .read_only("Level", 1i32)
                .ignored("Secret", "")
                .registrable()
                .list("Tags", "String"),
        );
        let catalog = TypeCatalog::new();
        let info = catalog.register_schema(&schema);
        let names: Vec<&str> = info.fields.iter().map(|f| f.name.as_ref()).collect();
        assert_eq!(names, vec![NETWORK_ID, "Name", "Tags"]);
    }

    #[test]
    fn test_describe_without_factory() {
        let schema = Arc::new(RecordSchema::new("demo.Point").value("X", 0i32));
        let catalog = TypeCatalog::new();
        let point = Record::new(schema);

        let info = catalog.describe(&point);
        assert!(!info.has_factory());
        assert!(matches!(catalog.create("demo.Point"), Err(SyncError::NoFactory(_))));
        assert!(matches!(catalog.create("demo.Nope"), Err(SyncError::UnknownType(_))));
    }

    #[test]
    fn test_register_all() {
        let a = Arc::new(RecordSchema::new("demo.A").value("X", 0i32));
        let b = Arc::new(RecordSchema::new("demo.B").value("Y", 0i32));
        let catalog = TypeCatalog::new();
        let factories: Vec<Factory> = vec![Arc::new(a.factory()), Arc::new(b.factory())];
        assert_eq!(catalog.register_all(factories), 2);
        assert_eq!(catalog.names(), vec!["demo.A".to_string(), "demo.B".to_string()]);
    }
}
