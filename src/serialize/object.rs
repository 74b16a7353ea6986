//! Object contract used by the serializer and the registry
//!
//! Types describe their fields with a static [`Field`] table instead of
//! runtime reflection. Objects are shared behind `Arc`, so mutation goes
//! through `&self` and implementations use interior mutability.

use std::any::Any;
use std::borrow::Cow;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use super::{CollectionChange, NetworkList, Value};

/// Name of the identifier field of registrable objects
pub const NETWORK_ID: &str = "NetworkId";

/// Field access errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error("Unknown field {field} on {type_name}")]
    Unknown { type_name: String, field: String },

    #[error("Field {field} on {type_name} expects {expected}, got {actual}")]
    TypeMismatch {
        type_name: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Field {field} on {type_name} is read-only")]
    ReadOnly { type_name: String, field: String },

    #[error("Index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("Negative index {0}")]
    NegativeIndex(i32),
}

/// How a field takes part in serialization and graph walks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A scalar, object or list value
    Value,
    /// A list or collection held by the object
    Container,
    /// The items of a collection object, written as an untyped list
    Items,
}

/// Field descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: Cow<'static, str>,
    pub kind: FieldKind,
    pub writable: bool,
    /// `false` excludes the field from serialization
    pub serialize: bool,
}

impl Field {
    /// Writable value field
    pub const fn value(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind: FieldKind::Value,
            writable: true,
            serialize: true,
        }
    }

    /// Read-only value field, skipped by the serializer
    pub const fn read_only(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind: FieldKind::Value,
            writable: false,
            serialize: true,
        }
    }

    /// Read-only container, serialized and merged into on decode
    pub const fn container(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            kind: FieldKind::Container,
            writable: false,
            serialize: true,
        }
    }

    /// Items of a collection object
    pub const fn items() -> Self {
        Self {
            name: Cow::Borrowed("Items"),
            kind: FieldKind::Items,
            writable: false,
            serialize: true,
        }
    }

    /// The network identifier field
    pub const fn network_id() -> Self {
        Self::value(NETWORK_ID)
    }

    /// Field with a runtime name
    pub fn named(name: impl Into<String>, kind: FieldKind, writable: bool) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            kind,
            writable,
            serialize: true,
        }
    }

    /// Exclude from serialization
    pub const fn ignored(mut self) -> Self {
        self.serialize = false;
        self
    }

    pub fn is_network_id(&self) -> bool {
        self.name == NETWORK_ID
    }

    /// Writable fields and read-only containers are serialized
    pub fn is_serialized(&self) -> bool {
        self.serialize && (self.writable || self.kind != FieldKind::Value)
    }
}

/// Receives mutation notifications from registered objects
pub trait MutationListener: Send + Sync {
    fn property_changed(&self, network_id: &str, property: &str);
    fn collection_changed(&self, network_id: &str, change: &CollectionChange);
}

/// Network id and listener slot carried by registrable objects
#[derive(Default)]
pub struct NetworkIdentity {
    id: RwLock<String>,
    listener: Mutex<Option<Arc<dyn MutationListener>>>,
}

impl std::fmt::Debug for NetworkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkIdentity")
            .field("id", &*self.id.read())
            .field("listening", &self.is_listening())
            .finish()
    }
}

impl NetworkIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: RwLock::new(id.into()),
            listener: Mutex::new(None),
        }
    }

    pub fn id(&self) -> String {
        self.id.read().clone()
    }

    pub fn set_id(&self, id: impl Into<String>) {
        *self.id.write() = id.into();
    }

    pub fn has_id(&self) -> bool {
        !self.id.read().is_empty()
    }

    /// Install the listener. Replaces any previous listener.
    pub fn attach(&self, listener: Arc<dyn MutationListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Remove the listener. Returns `true` if one was installed.
    pub fn detach(&self) -> bool {
        self.listener.lock().take().is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Notify the listener, if any, that a property changed
    pub fn notify_property(&self, property: &str) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.property_changed(&self.id(), property);
        }
    }

    /// Notify the listener, if any, that the collection changed
    pub fn notify_collection(&self, change: &CollectionChange) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.collection_changed(&self.id(), change);
        }
    }
}

/// Downcasting support for [`NetworkObject`] implementors
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An object that can be serialized, registered and synchronized
pub trait NetworkObject: AsAny + Send + Sync + 'static {
    /// Fully qualified type name, e.g. `game.Player`
    fn type_name(&self) -> &str;

    /// Field descriptors
    fn fields(&self) -> &[Field];

    /// Read a field. `None` for unknown fields.
    fn get(&self, field: &str) -> Option<Value>;

    /// Write a field
    fn set(&self, field: &str, value: Value) -> Result<(), FieldError>;

    /// Identity of registrable objects
    fn identity(&self) -> Option<&NetworkIdentity> {
        None
    }

    /// Collection view of list objects
    fn as_list(&self) -> Option<&dyn NetworkList> {
        None
    }
}

/// Text after the last `.` of a type name
pub fn short_type_name(type_name: &str) -> &str {
    type_name.rsplit('.').next().unwrap_or(type_name)
}

/// Downcast a shared object to its concrete type
pub fn downcast<T: NetworkObject>(object: super::ObjectRef) -> Option<Arc<T>> {
    object.into_any().downcast::<T>().ok()
}

/// Network id of an object, empty for non-registrable objects
pub fn network_id_of(object: &dyn NetworkObject) -> String {
    object.identity().map(NetworkIdentity::id).unwrap_or_default()
}

/// Helper for `set` implementations reporting a type mismatch
pub fn mismatch(type_name: &str, field: &str, expected: &str, actual: &Value) -> FieldError {
    FieldError::TypeMismatch {
        type_name: type_name.to_string(),
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.type_name(),
    }
}

/// Helper for `set` implementations reporting an unknown field
pub fn unknown_field(type_name: &str, field: &str) -> FieldError {
    FieldError::Unknown {
        type_name: type_name.to_string(),
        field: field.to_string(),
    }
}
