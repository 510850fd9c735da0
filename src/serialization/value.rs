//! Value model
//!
//! Values carried by calls: primitives, lists, named structures and opaque
//! object handles. `None` stands for a null value everywhere a value may be
//! absent (optional fields, list elements, results).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::types::DataType;

/// A single value. Nullability lives outside, as `Option<Value>`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
    String(String),
    ByteArray(Vec<u8>),
    Void,
    Structure(StructureRef),
    List(Vec<Option<Value>>),
    Handle(ObjectHandle),
}

impl Value {
    /// Render as JSON for display. A structure met again inside itself is
    /// rendered as `{"$type": name, "$cycle": true}`.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_within(&mut Vec::new())
    }

    fn to_json_within(&self, stack: &mut Vec<usize>) -> serde_json::Value {
        use serde_json::json;

        let nullable = |value: &Option<Value>, stack: &mut Vec<usize>| {
            value
                .as_ref()
                .map_or(serde_json::Value::Null, |value| value.to_json_within(stack))
        };

        match self {
            Value::Int32(v) => json!(v),
            Value::Int64(v) => json!(v),
            Value::Double(v) => json!(v),
            Value::Bool(v) => json!(v),
            Value::String(v) => json!(v),
            Value::ByteArray(v) => json!(v),
            Value::Void => serde_json::Value::Null,
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(|item| nullable(item, stack)).collect())
            }
            Value::Handle(handle) => json!({ "$handle": handle.type_name(), "id": handle.id() }),
            Value::Structure(structure) => {
                let identity = structure.identity();
                let snapshot = structure.snapshot();
                if stack.contains(&identity) {
                    return json!({ "$type": snapshot.name(), "$cycle": true });
                }

                stack.push(identity);
                let mut object = serde_json::Map::new();
                object.insert("$type".to_string(), json!(snapshot.name()));
                if snapshot.is_placeholder() {
                    object.insert("$placeholder".to_string(), json!(true));
                }
                for (id, field) in snapshot.fields() {
                    object.insert(id.to_string(), nullable(&field.value, stack));
                }
                stack.pop();
                serde_json::Value::Object(object)
            }
        }
    }
}

/// A value together with its type tag
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub data_type: DataType,
    pub value: Option<Value>,
}

impl TypedValue {
    pub fn new(data_type: DataType, value: Value) -> Self {
        Self {
            data_type,
            value: Some(value),
        }
    }

    /// A null value of the given type
    pub fn null(data_type: DataType) -> Self {
        Self {
            data_type,
            value: None,
        }
    }

    pub fn int32(v: i32) -> Self {
        Self::new(DataType::Int32, Value::Int32(v))
    }

    pub fn int64(v: i64) -> Self {
        Self::new(DataType::Int64, Value::Int64(v))
    }

    pub fn double(v: f64) -> Self {
        Self::new(DataType::Double, Value::Double(v))
    }

    pub fn bool(v: bool) -> Self {
        Self::new(DataType::Bool, Value::Bool(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self::new(DataType::String, Value::String(v.into()))
    }

    pub fn byte_array(v: impl Into<Vec<u8>>) -> Self {
        Self::new(DataType::ByteArray, Value::ByteArray(v.into()))
    }

    pub fn void() -> Self {
        Self::null(DataType::Void)
    }

    pub fn structure(structure: Structure) -> Self {
        Self::new(
            DataType::Structure(structure.name().to_string()),
            Value::Structure(StructureRef::new(structure)),
        )
    }

    pub fn handle(handle: ObjectHandle) -> Self {
        Self::new(
            DataType::ObjectHandle(handle.type_name().to_string()),
            Value::Handle(handle),
        )
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

/// Reference to a remote object. Only the identifier travels; the object
/// itself lives on the server and is addressed by later calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    type_name: String,
    id: String,
}

impl ObjectHandle {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// One slot of a structure
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub data_type: DataType,
    pub value: Option<Value>,
    pub optional: bool,
    /// Set once the field has been assigned or decoded
    pub present: bool,
}

/// Named composite value addressed by small integer field ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    name: String,
    fields: BTreeMap<u32, Field>,
    /// Raw payload kept when the name was not registered with the decoder
    placeholder: Option<Vec<u8>>,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            placeholder: None,
        }
    }

    /// Stand-in for a structure type this client does not know about
    pub fn placeholder(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            placeholder: Some(payload),
        }
    }

    /// Declare a field slot without assigning it
    pub fn with_field(mut self, id: u32, data_type: DataType, optional: bool) -> Self {
        self.fields.insert(
            id,
            Field {
                data_type,
                value: None,
                optional,
                present: false,
            },
        );
        self
    }

    /// Assign a field, declaring it as required if it was not declared
    pub fn set(&mut self, id: u32, typed: TypedValue) -> &mut Self {
        let field = self.fields.entry(id).or_insert_with(|| Field {
            data_type: typed.data_type.clone(),
            value: None,
            optional: false,
            present: false,
        });
        field.data_type = typed.data_type;
        field.value = typed.value;
        field.present = true;
        self
    }

    /// Builder form of [`Structure::set`]
    pub fn with(mut self, id: u32, typed: TypedValue) -> Self {
        self.set(id, typed);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self, id: u32) -> Option<&Field> {
        self.fields.get(&id)
    }

    /// The value of a present field
    pub fn value(&self, id: u32) -> Option<&Value> {
        self.fields
            .get(&id)
            .filter(|field| field.present)
            .and_then(|field| field.value.as_ref())
    }

    pub fn fields(&self) -> impl Iterator<Item = (u32, &Field)> {
        self.fields.iter().map(|(id, field)| (*id, field))
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }

    pub fn placeholder_payload(&self) -> Option<&[u8]> {
        self.placeholder.as_deref()
    }
}

/// Shared, mutable handle to a structure.
///
/// Structures are shared so the same instance may appear in several places of
/// a value graph; the encoder uses the pointer identity to reject cycles.
#[derive(Clone)]
pub struct StructureRef(Arc<Mutex<Structure>>);

impl StructureRef {
    pub fn new(structure: Structure) -> Self {
        Self(Arc::new(Mutex::new(structure)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Structure> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the structure as it is now. Nested structures stay shared.
    pub fn snapshot(&self) -> Structure {
        self.lock().clone()
    }

    /// Identity of the underlying structure
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn ptr_eq(&self, other: &StructureRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

thread_local! {
    /// Identity pairs of the structure comparisons running on this thread
    static COMPARING: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Pops the innermost comparison pair, also on unwind
struct ComparisonScope;

impl ComparisonScope {
    fn enter(pair: (usize, usize)) -> Self {
        COMPARING.with(|comparing| comparing.borrow_mut().push(pair));
        ComparisonScope
    }
}

impl Drop for ComparisonScope {
    fn drop(&mut self) {
        COMPARING.with(|comparing| {
            comparing.borrow_mut().pop();
        });
    }
}

/// Structural equality. Fields are compared on snapshots so no lock is held
/// while nested structures are visited; a pair already under comparison
/// higher up compares equal, which makes cyclic graphs terminate.
impl PartialEq for StructureRef {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let pair = (self.identity(), other.identity());
        if COMPARING.with(|comparing| comparing.borrow().contains(&pair)) {
            return true;
        }

        let left = self.snapshot();
        let right = other.snapshot();
        let _scope = ComparisonScope::enter(pair);
        left == right
    }
}

impl fmt::Debug for StructureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_lock() {
            Ok(structure) => write!(f, "StructureRef({})", structure.name()),
            Err(_) => write!(f, "StructureRef(<locked>)"),
        }
    }
}
