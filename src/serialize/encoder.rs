//! Value to text encoding
//!
//! Grammar:
//! - `null`
//! - `<Builtin>:<text>` for scalars, `String:"<escaped>"` for strings
//! - `<Elem>[]:[<value>,<value>]` for lists
//! - `<Type>:{<Field>=<value>;...}` for composite objects
//! - `{<networkId>}` for registered objects and repeats within one call

use crate::error::{SyncError, SyncResult};
use crate::registry::Registry;

use super::{network_id_of, same_object, value::builtin_name, FieldKind, NetworkList, ObjectRef, Value};

/// Encodes values against a registry. One encoder tracks the objects seen
/// during its lifetime, so use a fresh encoder per payload.
pub struct Encoder<'a> {
    registry: &'a Registry,
    seen: Vec<ObjectRef>,
    inline_registered: bool,
}

impl<'a> Encoder<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            seen: Vec::new(),
            inline_registered: false,
        }
    }

    /// Write registered objects in full instead of as `{id}` references,
    /// except when they repeat. Used for request responses so the receiver
    /// never needs a further fetch.
    pub fn inline_registered(mut self) -> Self {
        self.inline_registered = true;
        self
    }

    pub fn encode(&mut self, value: &Value) -> SyncResult<String> {
        let mut out = String::new();
        self.write_value(value, &mut out)?;
        Ok(out)
    }

    fn write_value(&mut self, value: &Value, out: &mut String) -> SyncResult<()> {
        match value {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => {
                out.push_str("Boolean:");
                out.push_str(if *b { "True" } else { "False" });
            }
            Value::Str(s) => {
                out.push_str("String:");
                push_quoted(s, out);
            }
            Value::Char(c) => {
                out.push_str("Char:");
                push_quoted(c.encode_utf8(&mut [0u8; 4]), out);
            }
            Value::List { element, items } => {
                out.push_str(element);
                out.push_str("[]:");
                self.write_items(items, out)?;
            }
            Value::Object(object) => self.write_object(object, out)?,
            scalar => {
                let name = builtin_name(scalar).unwrap_or("Object");
                out.push_str(name);
                out.push(':');
                push_scalar(scalar, out);
            }
        }
        Ok(())
    }

    fn write_items(&mut self, items: &[Value], out: &mut String) -> SyncResult<()> {
        out.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            self.write_value(item, out)?;
        }
        out.push(']');
        Ok(())
    }

    fn write_object(&mut self, object: &ObjectRef, out: &mut String) -> SyncResult<()> {
        let id = network_id_of(object.as_ref());
        let has_id = object.identity().is_some() && !id.is_empty();

        if self.seen.iter().any(|seen| same_object(seen, object)) {
            if has_id {
                push_reference(&id, out);
                return Ok(());
            }
            return Err(SyncError::CircularReference(object.type_name().to_string()));
        }

        if has_id && !self.inline_registered && self.registry.is_registered(object) {
            push_reference(&id, out);
            return Ok(());
        }

        self.seen.push(object.clone());
        let info = self.registry.types().describe(object.as_ref());

        out.push_str(&info.name);
        out.push_str(":{");
        for field in &info.fields {
            out.push_str(&field.name);
            out.push('=');
            if field.kind == FieldKind::Items {
                let items = match object.as_list() {
                    Some(list) => list.items(),
                    None => object
                        .get(&field.name)
                        .and_then(|v| v.as_items().map(<[Value]>::to_vec))
                        .unwrap_or_default(),
                };
                self.write_items(&items, out)?;
            } else {
                let value = object.get(&field.name).unwrap_or(Value::Null);
                self.write_value(&value, out)?;
            }
            out.push(';');
        }
        out.push('}');
        Ok(())
    }
}

/// Encode one value with a fresh encoder
pub fn encode(registry: &Registry, value: &Value) -> SyncResult<String> {
    Encoder::new(registry).encode(value)
}

fn push_reference(id: &str, out: &mut String) {
    out.push('{');
    out.push_str(id);
    out.push('}');
}

fn push_quoted(text: &str, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn push_scalar(value: &Value, out: &mut String) {
    use std::fmt::Write;

    // Writing into a String cannot fail.
    let _ = match value {
        Value::Byte(v) => write!(out, "{}", v),
        Value::I16(v) => write!(out, "{}", v),
        Value::U16(v) => write!(out, "{}", v),
        Value::I32(v) => write!(out, "{}", v),
        Value::U32(v) => write!(out, "{}", v),
        Value::I64(v) => write!(out, "{}", v),
        Value::U64(v) => write!(out, "{}", v),
        Value::F32(v) => write!(out, "{}", v),
        Value::F64(v) => write!(out, "{}", v),
        _ => Ok(()),
    };
}
