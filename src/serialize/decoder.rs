//! Text to value decoding
//!
//! The scanner splits composite bodies on `;` and `=` and list bodies on
//! `,` at nesting depth zero. `{`/`[` open a level, `}`/`]` close one and
//! double quotes toggle a quoted run in which `\` escapes the next char.

use thiserror::Error;

use crate::error::{SyncError, SyncResult};
use crate::registry::{ListenerGuard, Registry};

use super::{
    same_object, FieldKind, NetworkObject, ObjectRef, Value, NETWORK_ID, OBJECT_TYPE,
};

/// Malformed text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Missing type prefix in {0:?}")]
    MissingType(String),

    #[error("Unbalanced brackets or quotes in {0:?}")]
    Unbalanced(String),

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Invalid {type_name} literal {text:?}")]
    InvalidLiteral { type_name: String, text: String },

    #[error("Expected {expected} segments, got {actual}")]
    Segments { expected: usize, actual: usize },
}

const SCALAR_TYPES: [&str; 12] = [
    "Boolean", "Byte", "Int16", "UInt16", "Int32", "UInt32", "Int64", "UInt64", "Single",
    "Double", "Char", "String",
];

/// Whether remote fetches may resolve unknown references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Ask the remote side, blocking until it answers
    Block,
    /// Fail with an unresolved reference
    Never,
}

/// Decodes text against a registry. One decoder tracks the objects built
/// during its lifetime, so use a fresh decoder per payload.
pub struct Decoder<'a> {
    registry: &'a Registry,
    seen: Vec<ObjectRef>,
    fetch: FetchPolicy,
}

impl<'a> Decoder<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            seen: Vec::new(),
            fetch: FetchPolicy::Block,
        }
    }

    pub fn with_fetch(mut self, fetch: FetchPolicy) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn decode(&mut self, text: &str) -> SyncResult<Value> {
        if text == "null" {
            return Ok(Value::Null);
        }
        if let Some(id) = reference_id(text) {
            return self.resolve_reference(id);
        }
        if text.starts_with('"') {
            return Ok(Value::Str(unquote(text)?));
        }

        let (type_name, body) = text
            .split_once(':')
            .ok_or_else(|| ParseError::MissingType(text.to_string()))?;

        if let Some(element) = type_name.strip_suffix("[]") {
            return self.decode_list(element, body);
        }

        let short = type_name.strip_prefix("System.").unwrap_or(type_name);
        if let Some(value) = parse_scalar(short, body)? {
            return Ok(value);
        }
        self.decode_object(type_name, body)
    }

    fn resolve_reference(&mut self, id: &str) -> SyncResult<Value> {
        if let Some(object) = self.registry.get(id) {
            return Ok(Value::Object(object));
        }
        if let Some(object) = self
            .seen
            .iter()
            .find(|o| o.identity().map(|i| i.id() == id).unwrap_or(false))
        {
            return Ok(Value::Object(object.clone()));
        }
        match self.fetch {
            FetchPolicy::Block => match self.registry.fetch_object(id)? {
                Some(object) => Ok(Value::Object(object)),
                None => Err(SyncError::UnresolvedReference(id.to_string())),
            },
            FetchPolicy::Never => Err(SyncError::UnresolvedReference(id.to_string())),
        }
    }

    fn decode_list(&mut self, element: &str, body: &str) -> SyncResult<Value> {
        let element = element.strip_prefix("System.").unwrap_or(element);
        if !self.is_known_element(element) {
            return Err(SyncError::UnknownType(element.to_string()));
        }
        let items = self.decode_items(body)?;
        Ok(Value::list(element, items))
    }

    fn decode_items(&mut self, body: &str) -> SyncResult<Vec<Value>> {
        let inner = body
            .strip_prefix('[')
            .and_then(|b| b.strip_suffix(']'))
            .ok_or_else(|| ParseError::Malformed(format!("expected a [...] list, got {:?}", body)))?;
        split_items(inner)?
            .into_iter()
            .map(|item| self.decode(item))
            .collect()
    }

    fn is_known_element(&self, element: &str) -> bool {
        if let Some(inner) = element.strip_suffix("[]") {
            return self.is_known_element(inner);
        }
        element == OBJECT_TYPE
            || SCALAR_TYPES.contains(&element)
            || self.registry.types().contains(element)
    }

    fn decode_object(&mut self, type_name: &str, body: &str) -> SyncResult<Value> {
        let registry = self.registry;
        let info = registry
            .types()
            .lookup(type_name)
            .ok_or_else(|| SyncError::UnknownType(type_name.to_string()))?;
        let inner = body
            .strip_prefix('{')
            .and_then(|b| b.strip_suffix('}'))
            .ok_or_else(|| ParseError::Malformed(format!("expected a {{...}} body, got {:?}", body)))?;
        let fields = split_fields(inner)?;

        let fresh = info.create()?;
        self.seen.push(fresh.clone());

        let mut target = fresh.clone();
        let mut existing = false;
        let mut guard: Option<ListenerGuard<'a>> = None;

        for (name, raw) in fields {
            if name == NETWORK_ID && fresh.identity().is_some() {
                let id = match self.decode(raw)? {
                    Value::Str(id) => id,
                    Value::Null => String::new(),
                    other => {
                        return Err(ParseError::InvalidLiteral {
                            type_name: "String".to_string(),
                            text: format!("{:?}", other),
                        }
                        .into())
                    }
                };
                if id.is_empty() {
                    continue;
                }
                match registry.get(&id) {
                    Some(found) if !same_object(&found, &fresh) && found.type_name() == fresh.type_name() => {
                        if let Some(slot) = self.seen.iter_mut().find(|o| same_object(o, &fresh)) {
                            *slot = found.clone();
                        }
                        guard = Some(registry.suspend([found.clone()]));
                        target = found;
                        existing = true;
                    }
                    _ => fresh.set(NETWORK_ID, Value::Str(id))?,
                }
                continue;
            }

            let value = self.decode(raw)?;
            self.assign(&target, name, value, existing)?;
        }
        drop(guard);

        if !existing {
            if let Some(identity) = fresh.identity() {
                if identity.has_id() && !registry.contains(&identity.id()) {
                    if let Err(e) = registry.register(fresh.clone()) {
                        registry.diagnostics().warning(format!(
                            "Could not register decoded {}: {}",
                            fresh.type_name(),
                            e
                        ));
                    }
                }
            }
        }
        Ok(Value::Object(target))
    }

    fn assign(&mut self, target: &ObjectRef, name: &str, value: Value, replace: bool) -> SyncResult<()> {
        let Some(field) = target.fields().iter().find(|f| f.name == name).cloned() else {
            self.registry.diagnostics().warning(format!(
                "Ignoring unknown property {} on {}",
                name,
                target.type_name()
            ));
            return Ok(());
        };

        match field.kind {
            FieldKind::Items => self.fill_items(target, value),
            FieldKind::Container if !field.writable => self.merge_container(target, name, value, replace),
            _ => {
                target.set(name, value)?;
                Ok(())
            }
        }
    }

    /// Replace the items of a collection object
    fn fill_items(&mut self, target: &ObjectRef, value: Value) -> SyncResult<()> {
        let Some(list) = target.as_list() else {
            target.set("Items", value)?;
            return Ok(());
        };
        let Value::List { items, .. } = value else {
            return Err(ParseError::Malformed(format!(
                "items of {} must be a list",
                target.type_name()
            ))
            .into());
        };
        list.clear();
        for item in items {
            list.push(item)?;
        }
        Ok(())
    }

    /// Merge a decoded container into the one the target already holds
    fn merge_container(&mut self, target: &ObjectRef, name: &str, value: Value, replace: bool) -> SyncResult<()> {
        let current = target.get(name);
        match (current, value) {
            (Some(Value::Object(current)), Value::Object(decoded)) if current.as_list().is_some() => {
                if same_object(&current, &decoded) {
                    return Ok(());
                }
                self.adopt_identity(&current, &decoded);
                let items = decoded.as_list().map(|l| l.items()).unwrap_or_default();
                self.merge_items(&current, items, replace)
            }
            (Some(Value::Object(current)), Value::List { items, .. }) if current.as_list().is_some() => {
                self.merge_items(&current, items, replace)
            }
            (Some(Value::List { element, items: mut merged }), Value::List { items, .. }) => {
                if replace {
                    merged.clear();
                }
                merged.extend(items);
                target.set(name, Value::List { element, items: merged })?;
                Ok(())
            }
            (_, value) => {
                target.set(name, value)?;
                Ok(())
            }
        }
    }

    fn merge_items(&self, current: &ObjectRef, items: Vec<Value>, replace: bool) -> SyncResult<()> {
        let Some(list) = current.as_list() else {
            return Ok(());
        };
        let _guard = self.registry.suspend([current.clone()]);
        if replace {
            list.clear();
        }
        for item in items {
            list.push(item)?;
        }
        Ok(())
    }

    /// The target's own collection takes over the identity of the decoded one
    fn adopt_identity(&self, current: &ObjectRef, decoded: &ObjectRef) {
        let (Some(current_identity), Some(decoded_identity)) = (current.identity(), decoded.identity()) else {
            return;
        };
        let id = decoded_identity.id();
        if id.is_empty() || id == current_identity.id() {
            return;
        }

        let registry = self.registry;
        registry.unregister(decoded);
        if registry.is_registered(current) {
            registry.unregister(current);
        }
        current_identity.set_id(id);
        if let Err(e) = registry.register(current.clone()) {
            registry
                .diagnostics()
                .warning(format!("Could not register merged collection: {}", e));
        }
    }
}

/// Decode one value with a fresh decoder
pub fn decode(registry: &Registry, text: &str) -> SyncResult<Value> {
    Decoder::new(registry).decode(text)
}

/// `{id}` with no nested structure
fn reference_id(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains(&['{', '}', ':', '"', ';', '='][..]) {
        return None;
    }
    Some(inner)
}

fn parse_scalar(short: &str, text: &str) -> Result<Option<Value>, ParseError> {
    fn number<T: std::str::FromStr>(short: &str, text: &str) -> Result<T, ParseError> {
        text.parse().map_err(|_| ParseError::InvalidLiteral {
            type_name: short.to_string(),
            text: text.to_string(),
        })
    }

    let value = match short {
        "Boolean" => match text.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => {
                return Err(ParseError::InvalidLiteral {
                    type_name: short.to_string(),
                    text: text.to_string(),
                })
            }
        },
        "Byte" => Value::Byte(number(short, text)?),
        "Int16" => Value::I16(number(short, text)?),
        "UInt16" => Value::U16(number(short, text)?),
        "Int32" => Value::I32(number(short, text)?),
        "UInt32" => Value::U32(number(short, text)?),
        "Int64" => Value::I64(number(short, text)?),
        "UInt64" => Value::U64(number(short, text)?),
        "Single" => Value::F32(number(short, text)?),
        "Double" => Value::F64(number(short, text)?),
        "String" => Value::Str(unquote(text)?),
        "Char" => {
            let s = unquote(text)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Char(c),
                _ => {
                    return Err(ParseError::InvalidLiteral {
                        type_name: short.to_string(),
                        text: text.to_string(),
                    })
                }
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Strip surrounding quotes and resolve backslash escapes
pub fn unquote(text: &str) -> Result<String, ParseError> {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .ok_or_else(|| ParseError::Malformed(format!("expected a quoted string, got {:?}", text)))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped) => out.push(escaped),
                None => return Err(ParseError::Unbalanced(text.to_string())),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Tracks nesting and quoting while scanning
#[derive(Default)]
struct Scanner {
    depth: i32,
    quoted: bool,
    escaped: bool,
}

impl Scanner {
    /// Feed one char. Returns `true` when it sits at depth zero outside quotes.
    fn step(&mut self, c: char) -> Result<bool, ()> {
        if self.quoted {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.quoted = false;
            }
            return Ok(false);
        }
        match c {
            '"' => self.quoted = true,
            '{' | '[' => self.depth += 1,
            '}' | ']' => {
                self.depth -= 1;
                if self.depth < 0 {
                    return Err(());
                }
            }
            _ => return Ok(self.depth == 0),
        }
        Ok(false)
    }

    fn balanced(&self) -> bool {
        self.depth == 0 && !self.quoted
    }
}

/// Split `Name=value;Name=value;` into pairs
fn split_fields(body: &str) -> Result<Vec<(&str, &str)>, ParseError> {
    let unbalanced = || ParseError::Unbalanced(body.to_string());
    let mut scanner = Scanner::default();
    let mut fields = Vec::new();
    let mut name: Option<&str> = None;
    let mut start = 0;

    for (i, c) in body.char_indices() {
        if !scanner.step(c).map_err(|_| unbalanced())? {
            continue;
        }
        match c {
            '=' if name.is_none() => {
                name = Some(&body[start..i]);
                start = i + 1;
            }
            ';' => {
                let field = name
                    .take()
                    .ok_or_else(|| ParseError::Malformed(format!("field without '=' in {:?}", body)))?;
                fields.push((field, &body[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }

    if !scanner.balanced() {
        return Err(unbalanced());
    }
    match name {
        Some(field) => fields.push((field, &body[start..])),
        None if !body[start..].is_empty() => {
            return Err(ParseError::Malformed(format!("trailing text in {:?}", body)))
        }
        None => {}
    }
    Ok(fields)
}

/// Split `a,b,c` at depth zero
fn split_items(body: &str) -> Result<Vec<&str>, ParseError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let mut scanner = Scanner::default();
    let mut items = Vec::new();
    let mut start = 0;

    for (i, c) in body.char_indices() {
        let top = scanner
            .step(c)
            .map_err(|_| ParseError::Unbalanced(body.to_string()))?;
        if top && c == ',' {
            items.push(&body[start..i]);
            start = i + 1;
        }
    }
    if !scanner.balanced() {
        return Err(ParseError::Unbalanced(body.to_string()));
    }
    items.push(&body[start..]);
    Ok(items)
}
