//! Collection contract and the built-in observable list

use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;

use super::object::{mismatch, unknown_field};
use super::{Field, FieldError, NetworkIdentity, NetworkObject, Value, NETWORK_ID};

/// Type name of [`ObservableList`]
pub const OBSERVABLE_LIST_TYPE: &str = "peersync.ObservableList";

/// Kind of collection mutation, written as its numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CollectionAction {
    Add = 0,
    Remove = 1,
    Replace = 2,
    Move = 3,
    Reset = 4,
}

impl CollectionAction {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(CollectionAction::Add),
            1 => Some(CollectionAction::Remove),
            2 => Some(CollectionAction::Replace),
            3 => Some(CollectionAction::Move),
            4 => Some(CollectionAction::Reset),
            _ => None,
        }
    }
}

impl fmt::Display for CollectionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for CollectionAction {
    type Err = String;

    /// Accepts the numeric code or the action name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<i32>() {
            return Self::from_code(code).ok_or_else(|| format!("unknown collection action {}", code));
        }
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(CollectionAction::Add),
            "remove" => Ok(CollectionAction::Remove),
            "replace" => Ok(CollectionAction::Replace),
            "move" => Ok(CollectionAction::Move),
            "reset" => Ok(CollectionAction::Reset),
            _ => Err(format!("unknown collection action {:?}", s)),
        }
    }
}

/// A collection mutation. `items` holds the new items, or the removed
/// items for [`CollectionAction::Remove`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionChange {
    pub action: CollectionAction,
    pub new_index: i32,
    pub old_index: i32,
    pub old_count: i32,
    pub items: Vec<Value>,
}

impl CollectionChange {
    pub fn add(index: usize, items: Vec<Value>) -> Self {
        Self {
            action: CollectionAction::Add,
            new_index: index as i32,
            old_index: -1,
            old_count: 0,
            items,
        }
    }

    pub fn remove(index: usize, removed: Vec<Value>) -> Self {
        Self {
            action: CollectionAction::Remove,
            new_index: -1,
            old_index: index as i32,
            old_count: removed.len() as i32,
            items: removed,
        }
    }

    pub fn replace(index: usize, old_count: usize, items: Vec<Value>) -> Self {
        Self {
            action: CollectionAction::Replace,
            new_index: index as i32,
            old_index: index as i32,
            old_count: old_count as i32,
            items,
        }
    }

    pub fn moved(old_index: usize, new_index: usize, items: Vec<Value>) -> Self {
        Self {
            action: CollectionAction::Move,
            new_index: new_index as i32,
            old_index: old_index as i32,
            old_count: items.len() as i32,
            items,
        }
    }

    pub fn reset() -> Self {
        Self {
            action: CollectionAction::Reset,
            new_index: -1,
            old_index: -1,
            old_count: 0,
            items: Vec::new(),
        }
    }
}

/// Index based access to a collection object
pub trait NetworkList: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the items
    fn items(&self) -> Vec<Value>;

    fn get_item(&self, index: usize) -> Option<Value>;

    fn insert(&self, index: usize, value: Value) -> Result<(), FieldError>;

    fn remove_at(&self, index: usize) -> Result<Value, FieldError>;

    fn replace(&self, index: usize, value: Value) -> Result<Value, FieldError>;

    fn clear(&self);

    fn push(&self, value: Value) -> Result<(), FieldError> {
        self.insert(self.len(), value)
    }
}

/// Registrable list raising a collection notification for every change
#[derive(Debug, Default)]
pub struct ObservableList {
    identity: NetworkIdentity,
    items: RwLock<Vec<Value>>,
}

static OBSERVABLE_LIST_FIELDS: [Field; 2] = [Field::network_id(), Field::items()];

impl ObservableList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<Value>) -> Self {
        Self {
            identity: NetworkIdentity::new(),
            items: RwLock::new(items),
        }
    }

    /// Move one item, notifying a single move
    pub fn move_item(&self, old_index: usize, new_index: usize) -> Result<(), FieldError> {
        let item = {
            let mut items = self.items.write();
            let len = items.len();
            if old_index >= len || new_index >= len {
                return Err(FieldError::OutOfRange {
                    index: old_index.max(new_index),
                    len,
                });
            }
            let item = items.remove(old_index);
            items.insert(new_index, item.clone());
            item
        };
        self.identity
            .notify_collection(&CollectionChange::moved(old_index, new_index, vec![item]));
        Ok(())
    }
}

impl NetworkList for ObservableList {
    fn len(&self) -> usize {
        self.items.read().len()
    }

    fn items(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    fn get_item(&self, index: usize) -> Option<Value> {
        self.items.read().get(index).cloned()
    }

    fn insert(&self, index: usize, value: Value) -> Result<(), FieldError> {
        {
            let mut items = self.items.write();
            if index > items.len() {
                return Err(FieldError::OutOfRange {
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, value.clone());
        }
        self.identity
            .notify_collection(&CollectionChange::add(index, vec![value]));
        Ok(())
    }

    fn remove_at(&self, index: usize) -> Result<Value, FieldError> {
        let removed = {
            let mut items = self.items.write();
            if index >= items.len() {
                return Err(FieldError::OutOfRange {
                    index,
                    len: items.len(),
                });
            }
            items.remove(index)
        };
        self.identity
            .notify_collection(&CollectionChange::remove(index, vec![removed.clone()]));
        Ok(removed)
    }

    fn replace(&self, index: usize, value: Value) -> Result<Value, FieldError> {
        let old = {
            let mut items = self.items.write();
            let len = items.len();
            let slot = items
                .get_mut(index)
                .ok_or(FieldError::OutOfRange { index, len })?;
            std::mem::replace(slot, value.clone())
        };
        self.identity
            .notify_collection(&CollectionChange::replace(index, 1, vec![value]));
        Ok(old)
    }

    fn clear(&self) {
        self.items.write().clear();
        self.identity.notify_collection(&CollectionChange::reset());
    }
}

impl NetworkObject for ObservableList {
    fn type_name(&self) -> &str {
        OBSERVABLE_LIST_TYPE
    }

    fn fields(&self) -> &[Field] {
        &OBSERVABLE_LIST_FIELDS
    }

    fn get(&self, field: &str) -> Option<Value> {
        match field {
            NETWORK_ID => Some(Value::Str(self.identity.id())),
            "Items" => Some(Value::objects(self.items())),
            _ => None,
        }
    }

    fn set(&self, field: &str, value: Value) -> Result<(), FieldError> {
        match (field, value) {
            (NETWORK_ID, Value::Str(id)) => {
                self.identity.set_id(id);
                Ok(())
            }
            (NETWORK_ID, Value::Null) => {
                self.identity.set_id("");
                Ok(())
            }
            ("Items", Value::List { items, .. }) => {
                *self.items.write() = items;
                Ok(())
            }
            (NETWORK_ID, other) => Err(mismatch(OBSERVABLE_LIST_TYPE, field, "String", &other)),
            ("Items", other) => Err(mismatch(OBSERVABLE_LIST_TYPE, field, "Object[]", &other)),
            _ => Err(unknown_field(OBSERVABLE_LIST_TYPE, field)),
        }
    }

    fn identity(&self) -> Option<&NetworkIdentity> {
        Some(&self.identity)
    }

    fn as_list(&self) -> Option<&dyn NetworkList> {
        Some(self)
    }
}
