//! Dynamic values carried by packets and object fields

use std::fmt;
use std::sync::Arc;

use super::NetworkObject;

/// Shared handle to a live object
pub type ObjectRef = Arc<dyn NetworkObject>;

/// Element type name used for untyped lists
pub const OBJECT_TYPE: &str = "Object";

/// A value that can be written in the text grammar.
///
/// Objects compare by identity, everything else structurally.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(char),
    Str(String),
    List { element: String, items: Vec<Value> },
    Object(ObjectRef),
}

impl Value {
    /// Build a list with the given element type name
    pub fn list(element: impl Into<String>, items: Vec<Value>) -> Self {
        Value::List {
            element: element.into(),
            items,
        }
    }

    /// Build an untyped list
    pub fn objects(items: Vec<Value>) -> Self {
        Value::list(OBJECT_TYPE, items)
    }

    pub fn object(object: ObjectRef) -> Self {
        Value::Object(object)
    }

    /// Type name as written in the grammar
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::List { element, .. } => format!("{}[]", element),
            Value::Object(obj) => obj.type_name().to_string(),
            other => builtin_name(other).unwrap_or("null").to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::I16(v) => Some(i64::from(*v)),
            Value::U16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::U32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(v) => Some(f64::from(*v)),
            Value::F64(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Value::List { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Every object directly held by this value
    pub fn objects_in(&self) -> Vec<ObjectRef> {
        match self {
            Value::Object(obj) => vec![obj.clone()],
            Value::List { items, .. } => items
                .iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Short name of a built-in scalar type, `None` for lists, objects and null
pub fn builtin_name(value: &Value) -> Option<&'static str> {
    let name = match value {
        Value::Bool(_) => "Boolean",
        Value::Byte(_) => "Byte",
        Value::I16(_) => "Int16",
        Value::U16(_) => "UInt16",
        Value::I32(_) => "Int32",
        Value::U32(_) => "UInt32",
        Value::I64(_) => "Int64",
        Value::U64(_) => "UInt64",
        Value::F32(_) => "Single",
        Value::F64(_) => "Double",
        Value::Char(_) => "Char",
        Value::Str(_) => "String",
        _ => return None,
    };
    Some(name)
}

/// Identity comparison for shared objects
pub fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Address used to track objects in seen and visited sets
pub(crate) fn object_addr(obj: &ObjectRef) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (
                Value::List { element: ea, items: ia },
                Value::List { element: eb, items: ib },
            ) => ea == eb && ia == ib,
            (Value::Object(a), Value::Object(b)) => same_object(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({})", v),
            Value::Byte(v) => write!(f, "Byte({})", v),
            Value::I16(v) => write!(f, "I16({})", v),
            Value::U16(v) => write!(f, "U16({})", v),
            Value::I32(v) => write!(f, "I32({})", v),
            Value::U32(v) => write!(f, "U32({})", v),
            Value::I64(v) => write!(f, "I64({})", v),
            Value::U64(v) => write!(f, "U64({})", v),
            Value::F32(v) => write!(f, "F32({})", v),
            Value::F64(v) => write!(f, "F64({})", v),
            Value::Char(v) => write!(f, "Char({:?})", v),
            Value::Str(v) => write!(f, "Str({:?})", v),
            Value::List { element, items } => {
                write!(f, "{}[]", element)?;
                f.debug_list().entries(items).finish()
            }
            Value::Object(obj) => {
                let id = obj.identity().map(|i| i.id()).unwrap_or_default();
                write!(f, "Object({}#{})", obj.type_name(), id)
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from!(
    bool => Bool,
    u8 => Byte,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    char => Char,
    String => Str,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
