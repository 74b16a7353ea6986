//! Schema driven objects
//!
//! A [`Record`] is a [`NetworkObject`] whose field table comes from a
//! [`RecordSchema`] built at runtime, so applications can declare
//! synchronized types without implementing the trait by hand.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::object::{mismatch, unknown_field};
use super::value::builtin_name;
use super::{
    Field, FieldError, FieldKind, NetworkIdentity, NetworkObject, ObjectRef, ObservableList,
    Value, NETWORK_ID,
};

/// Initial value of a record field
#[derive(Debug, Clone)]
pub enum FieldDefault {
    /// A fixed value, cloned into every instance
    Value(Value),
    /// An empty plain list of the given element type
    List(String),
    /// A fresh [`ObservableList`] per instance
    ObservableList,
}

impl FieldDefault {
    fn instantiate(&self) -> Value {
        match self {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::List(element) => Value::list(element.clone(), Vec::new()),
            FieldDefault::ObservableList => Value::Object(Arc::new(ObservableList::new())),
        }
    }
}

/// Field table and defaults for one record type
#[derive(Debug, Clone)]
pub struct RecordSchema {
    type_name: String,
    registrable: bool,
    fields: Vec<Field>,
    defaults: HashMap<String, FieldDefault>,
}

impl RecordSchema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            registrable: false,
            fields: Vec::new(),
            defaults: HashMap::new(),
        }
    }

    /// Give instances a network identity
    pub fn registrable(mut self) -> Self {
        if !self.registrable {
            self.registrable = true;
            self.fields.insert(0, Field::network_id());
        }
        self
    }

    /// Writable value field
    pub fn value(self, name: &str, default: impl Into<Value>) -> Self {
        self.field(
            Field::named(name, FieldKind::Value, true),
            FieldDefault::Value(default.into()),
        )
    }

    /// Read-only value field, never serialized
    pub fn read_only(self, name: &str, default: impl Into<Value>) -> Self {
        self.field(
            Field::named(name, FieldKind::Value, false),
            FieldDefault::Value(default.into()),
        )
    }

    /// Writable value field excluded from serialization
    pub fn ignored(self, name: &str, default: impl Into<Value>) -> Self {
        self.field(
            Field::named(name, FieldKind::Value, true).ignored(),
            FieldDefault::Value(default.into()),
        )
    }

    /// Read-only plain list
    pub fn list(self, name: &str, element: &str) -> Self {
        self.field(
            Field::named(name, FieldKind::Container, false),
            FieldDefault::List(element.to_string()),
        )
    }

    /// Read-only observable list
    pub fn observable(self, name: &str) -> Self {
        self.field(
            Field::named(name, FieldKind::Container, false),
            FieldDefault::ObservableList,
        )
    }

    pub fn field(mut self, field: Field, default: FieldDefault) -> Self {
        self.defaults.insert(field.name.to_string(), default);
        self.fields.push(field);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_registrable(&self) -> bool {
        self.registrable
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Factory producing default instances
    pub fn factory(self: &Arc<Self>) -> impl Fn() -> ObjectRef + Send + Sync + 'static {
        let schema = self.clone();
        move || Arc::new(Record::new(schema.clone())) as ObjectRef
    }
}

/// Instance of a [`RecordSchema`]
#[derive(Debug)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: RwLock<HashMap<String, Value>>,
    identity: Option<NetworkIdentity>,
}

impl Record {
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        let values = schema
            .defaults
            .iter()
            .map(|(name, default)| (name.clone(), default.instantiate()))
            .collect();
        let identity = schema.registrable.then(NetworkIdentity::new);
        Self {
            schema,
            values: RwLock::new(values),
            identity,
        }
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Set a field from anything convertible into a [`Value`]
    pub fn set_value(&self, field: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        self.set(field, value.into())
    }

    pub fn get_str(&self, field: &str) -> Option<String> {
        self.get(field).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(|v| v.as_i64())
    }

    pub fn get_object(&self, field: &str) -> Option<ObjectRef> {
        self.get(field).and_then(|v| v.as_object().cloned())
    }

    fn check_type(&self, field: &str, value: &Value) -> Result<(), FieldError> {
        let Some(FieldDefault::Value(default)) = self.schema.defaults.get(field) else {
            return Ok(());
        };
        match (builtin_name(default), builtin_name(value)) {
            (Some(expected), Some(actual)) if expected != actual => {
                Err(mismatch(&self.schema.type_name, field, expected, value))
            }
            _ => Ok(()),
        }
    }
}

impl NetworkObject for Record {
    fn type_name(&self) -> &str {
        &self.schema.type_name
    }

    fn fields(&self) -> &[Field] {
        &self.schema.fields
    }

    fn get(&self, field: &str) -> Option<Value> {
        if field == NETWORK_ID {
            return self.identity.as_ref().map(|i| Value::Str(i.id()));
        }
        self.values.read().get(field).cloned()
    }

    fn set(&self, field: &str, value: Value) -> Result<(), FieldError> {
        if field == NETWORK_ID {
            let identity = self
                .identity
                .as_ref()
                .ok_or_else(|| unknown_field(&self.schema.type_name, field))?;
            match value {
                Value::Str(id) => identity.set_id(id),
                Value::Null => identity.set_id(""),
                other => return Err(mismatch(&self.schema.type_name, field, "String", &other)),
            }
            return Ok(());
        }

        if !self.schema.defaults.contains_key(field) {
            return Err(unknown_field(&self.schema.type_name, field));
        }
        self.check_type(field, &value)?;
        self.values.write().insert(field.to_string(), value);

        if let Some(identity) = &self.identity {
            identity.notify_property(field);
        }
        Ok(())
    }

    fn identity(&self) -> Option<&NetworkIdentity> {
        self.identity.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::NetworkList;

    fn player_schema() -> Arc<RecordSchema> {
        Arc::new(
            RecordSchema::new("demo.Player")
                .registrable()
                .value("Name", "")
                .value("Score", 0i32)
                .observable("Inventory")
                .list("Tags", "String"),
        )
    }

    #[test]
    fn test_defaults_and_identity() {
        let schema = player_schema();
        assert_eq!(schema.fields()[0].name, NETWORK_ID);

        let player = Record::new(schema);
        assert_eq!(player.get_str("Name").as_deref(), Some(""));
        assert_eq!(player.get_i64("Score"), Some(0));
        assert_eq!(player.get_str(NETWORK_ID).as_deref(), Some(""));
        assert!(player.get_object("Inventory").unwrap().as_list().unwrap().is_empty());
        assert_eq!(player.get("Tags"), Some(Value::list("String", Vec::new())));
    }

    #[test]
    fn test_each_instance_gets_its_own_list() {
        let schema = player_schema();
        let factory = schema.factory();
        let a = factory();
        let b = factory();
        let inv_a = a.get("Inventory").unwrap();
        let inv_b = b.get("Inventory").unwrap();
        assert_ne!(inv_a, inv_b);
    }

    #[test]
    fn test_type_checked_set() {
        let player = Record::new(player_schema());
        player.set_value("Score", 12i32).unwrap();
        assert_eq!(player.get_i64("Score"), Some(12));

        let err = player.set_value("Score", "twelve").unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { .. }));
        assert!(matches!(
            player.set_value("Missing", 1i32),
            Err(FieldError::Unknown { .. })
        ));
    }

    #[test]
    fn test_non_registrable_has_no_network_id() {
        let schema = Arc::new(RecordSchema::new("demo.Point").value("X", 0i32));
        let point = Record::new(schema);
        assert!(point.identity().is_none());
        assert!(point.get(NETWORK_ID).is_none());
        assert!(point.set_value(NETWORK_ID, "x").is_err());
    }
}
