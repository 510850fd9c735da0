//! Typed value serializer
//!
//! Every value is written as `[type tag][validity][value bytes]`, the value
//! bytes being omitted when the validity byte is `INVALID` (a null value).
//!
//! Composite layouts:
//! - list: 4-byte count, then per element a validity byte and the element's
//!   value bytes; the element tag is only written once, in the list's tag
//! - structure: a length-prefixed payload holding `(4-byte field id,
//!   self-describing value)` pairs
//! - object handle: the identifier string

use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use super::buffer::{put_bool, put_byte_array, put_length, put_string, Chopper};
use super::registry::TypeRegistry;
use super::types::DataType;
use super::value::{ObjectHandle, Structure, StructureRef, TypedValue, Value};
use super::CodecError;

/// Validity byte values
pub const VALID: u8 = 0x01;
pub const INVALID: u8 = 0x00;

/// Nesting limit when decoding untrusted bytes
pub(crate) const MAX_DECODE_DEPTH: usize = 64;

/// Encodes and decodes self-describing values.
///
/// The registry maps structure and handle names to constructors and is owned
/// by the codec, so two codecs may decode the same bytes differently.
#[derive(Debug, Clone, Default)]
pub struct ValueCodec {
    registry: Arc<TypeRegistry>,
}

impl ValueCodec {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Serialize one value into a fresh buffer
    pub fn serialize(&self, data_type: &DataType, value: Option<&Value>) -> Result<Vec<u8>, CodecError> {
        let mut buf = BytesMut::new();
        self.write_value(&mut buf, data_type, value)?;
        Ok(buf.to_vec())
    }

    pub fn serialize_typed(&self, typed: &TypedValue) -> Result<Vec<u8>, CodecError> {
        self.serialize(&typed.data_type, typed.value.as_ref())
    }

    /// Deserialize exactly one value; trailing bytes are an error
    pub fn deserialize(&self, bytes: &[u8]) -> Result<TypedValue, CodecError> {
        let mut chopper = Chopper::new(bytes);
        let typed = self.read_value(&mut chopper)?;
        chopper.finish()?;
        Ok(typed)
    }

    /// Append one self-describing value
    pub fn write_value(
        &self,
        buf: &mut BytesMut,
        data_type: &DataType,
        value: Option<&Value>,
    ) -> Result<(), CodecError> {
        let mut encoder = Encoder { stack: Vec::new() };
        encoder.write_tagged(buf, data_type, value)
    }

    /// Read one self-describing value
    pub fn read_value(&self, chopper: &mut Chopper<'_>) -> Result<TypedValue, CodecError> {
        Decoder {
            registry: &self.registry,
            depth: 0,
        }
        .read_tagged(chopper)
    }
}

/// Encoding pass. `stack` holds the identities of structures currently being
/// written; meeting one of them again means the graph is cyclic.
struct Encoder {
    stack: Vec<usize>,
}

impl Encoder {
    fn write_tagged(
        &mut self,
        buf: &mut BytesMut,
        data_type: &DataType,
        value: Option<&Value>,
    ) -> Result<(), CodecError> {
        if *data_type == DataType::Unknown {
            return Err(CodecError::UnsupportedType(data_type.to_string()));
        }
        data_type.write_to(buf)?;
        self.write_validity_and_body(buf, data_type, value)
    }

    fn write_validity_and_body(
        &mut self,
        buf: &mut BytesMut,
        data_type: &DataType,
        value: Option<&Value>,
    ) -> Result<(), CodecError> {
        match value {
            None => {
                buf.put_u8(INVALID);
                Ok(())
            }
            Some(value) => {
                buf.put_u8(VALID);
                self.write_body(buf, data_type, value)
            }
        }
    }

    fn write_body(&mut self, buf: &mut BytesMut, data_type: &DataType, value: &Value) -> Result<(), CodecError> {
        match (data_type, value) {
            (DataType::Int32, Value::Int32(v)) => buf.put_i32(*v),
            (DataType::Int64, Value::Int64(v)) => buf.put_i64(*v),
            (DataType::Double, Value::Double(v)) => buf.put_f64(*v),
            (DataType::Bool, Value::Bool(v)) => put_bool(buf, *v),
            (DataType::String, Value::String(v)) => put_string(buf, v)?,
            (DataType::ByteArray, Value::ByteArray(v)) => put_byte_array(buf, v)?,
            (DataType::Void, Value::Void) => {}
            (DataType::List(element), Value::List(items)) => {
                put_length(buf, items.len())?;
                for item in items {
                    self.write_validity_and_body(buf, element, item.as_ref())?;
                }
            }
            (DataType::Structure(name), Value::Structure(structure)) => {
                self.write_structure(buf, name, structure)?;
            }
            (DataType::ObjectHandle(name) | DataType::InlineObject(name), Value::Handle(handle)) => {
                if handle.type_name() != name {
                    return Err(CodecError::TypeMismatch {
                        expected: data_type.to_string(),
                        found: format!("handle<{}>", handle.type_name()),
                    });
                }
                put_string(buf, handle.id())?;
            }
            (DataType::Unknown, _) => {
                return Err(CodecError::UnsupportedType(data_type.to_string()));
            }
            _ => {
                return Err(CodecError::TypeMismatch {
                    expected: data_type.to_string(),
                    found: value_kind(value).to_string(),
                });
            }
        }
        Ok(())
    }

    fn write_structure(
        &mut self,
        buf: &mut BytesMut,
        name: &str,
        structure: &StructureRef,
    ) -> Result<(), CodecError> {
        let identity = structure.identity();
        if self.stack.contains(&identity) {
            return Err(CodecError::CircularReference(name.to_string()));
        }
        self.stack.push(identity);

        let result = {
            let structure = structure.lock();
            self.write_structure_payload(buf, name, &structure)
        };

        self.stack.pop();
        result
    }

    fn write_structure_payload(
        &mut self,
        buf: &mut BytesMut,
        name: &str,
        structure: &Structure,
    ) -> Result<(), CodecError> {
        if structure.name() != name {
            return Err(CodecError::TypeMismatch {
                expected: format!("structure<{}>", name),
                found: format!("structure<{}>", structure.name()),
            });
        }

        if let Some(payload) = structure.placeholder_payload() {
            return put_byte_array(buf, payload);
        }

        let mut inner = BytesMut::new();
        for (id, field) in structure.fields() {
            if !field.present {
                if field.optional {
                    continue;
                }
                return Err(CodecError::MissingField {
                    structure: name.to_string(),
                    field: id,
                });
            }
            inner.put_u32(id);
            self.write_tagged(&mut inner, &field.data_type, field.value.as_ref())?;
        }
        put_byte_array(buf, &inner)
    }
}

struct Decoder<'r> {
    registry: &'r TypeRegistry,
    depth: usize,
}

impl Decoder<'_> {
    fn read_tagged(&mut self, chopper: &mut Chopper<'_>) -> Result<TypedValue, CodecError> {
        let data_type = DataType::read_from(chopper)?;
        let value = self.read_validity_and_body(chopper, &data_type)?;
        Ok(TypedValue { data_type, value })
    }

    fn read_validity_and_body(
        &mut self,
        chopper: &mut Chopper<'_>,
        data_type: &DataType,
    ) -> Result<Option<Value>, CodecError> {
        match chopper.read_u8()? {
            INVALID => Ok(None),
            VALID => self.read_body(chopper, data_type).map(Some),
            other => Err(CodecError::InvalidValidity(other)),
        }
    }

    fn read_body(&mut self, chopper: &mut Chopper<'_>, data_type: &DataType) -> Result<Value, CodecError> {
        let value = match data_type {
            DataType::Int32 => Value::Int32(chopper.read_i32()?),
            DataType::Int64 => Value::Int64(chopper.read_i64()?),
            DataType::Double => Value::Double(chopper.read_f64()?),
            DataType::Bool => Value::Bool(chopper.read_bool()?),
            DataType::String => Value::String(chopper.read_string()?),
            DataType::ByteArray => Value::ByteArray(chopper.read_byte_array()?),
            DataType::Void => Value::Void,
            DataType::Unknown => return Err(CodecError::UnsupportedType(data_type.to_string())),
            DataType::List(element) => {
                self.enter()?;
                let count = chopper.read_u32()? as usize;
                // Each element takes at least its validity byte.
                if count > chopper.remaining() {
                    return Err(CodecError::Truncated {
                        offset: chopper.offset(),
                        needed: count,
                        available: chopper.remaining(),
                    });
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_validity_and_body(chopper, element)?);
                }
                self.depth -= 1;
                Value::List(items)
            }
            DataType::Structure(name) => {
                let payload = chopper.read_byte_slice()?;
                self.enter()?;
                let structure = self.read_structure(name, payload)?;
                self.depth -= 1;
                Value::Structure(StructureRef::new(structure))
            }
            DataType::ObjectHandle(name) | DataType::InlineObject(name) => {
                let id = chopper.read_string()?;
                Value::Handle(self.create_handle(name, &id)?)
            }
        };
        Ok(value)
    }

    fn read_structure(&mut self, name: &str, payload: &[u8]) -> Result<Structure, CodecError> {
        let Some(mut structure) = self.registry.create_structure(name) else {
            tracing::debug!("Unregistered structure '{}', keeping {} raw bytes", name, payload.len());
            return Ok(Structure::placeholder(name, payload.to_vec()));
        };

        let mut fields = Chopper::new(payload);
        while !fields.is_empty() {
            let id = fields.read_u32()?;
            let typed = self.read_tagged(&mut fields)?;
            structure.set(id, typed);
        }
        Ok(structure)
    }

    fn create_handle(&self, name: &str, id: &str) -> Result<ObjectHandle, CodecError> {
        self.registry
            .create_handle(name, id)
            .ok_or_else(|| CodecError::UnregisteredHandle(name.to_string()))
    }

    fn enter(&mut self) -> Result<(), CodecError> {
        self.depth += 1;
        if self.depth > MAX_DECODE_DEPTH {
            return Err(CodecError::TooDeep(MAX_DECODE_DEPTH));
        }
        Ok(())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Int32(_) => "int32",
        Value::Int64(_) => "int64",
        Value::Double(_) => "double",
        Value::Bool(_) => "bool",
        Value::String(_) => "string",
        Value::ByteArray(_) => "byte-array",
        Value::Void => "void",
        Value::Structure(_) => "structure",
        Value::List(_) => "list",
        Value::Handle(_) => "handle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> ValueCodec {
        let registry = TypeRegistry::new()
            .with_structure("Point", || {
                Structure::new("Point")
                    .with_field(1, DataType::Double, false)
                    .with_field(2, DataType::Double, false)
                    .with_field(3, DataType::String, true)
            })
            .with_handle_type("Detector");
        ValueCodec::new(Arc::new(registry))
    }

    fn roundtrip(codec: &ValueCodec, typed: TypedValue) {
        let bytes = codec.serialize_typed(&typed).unwrap();
        assert_eq!(codec.deserialize(&bytes).unwrap(), typed);
    }

    #[test]
    fn test_primitive_roundtrips() {
        let codec = codec();
        roundtrip(&codec, TypedValue::int32(-7));
        roundtrip(&codec, TypedValue::int64(i64::MIN));
        roundtrip(&codec, TypedValue::double(1.5e-3));
        roundtrip(&codec, TypedValue::bool(true));
        roundtrip(&codec, TypedValue::string("MoveTo"));
        roundtrip(&codec, TypedValue::byte_array(vec![0u8, 1, 2, 255]));
        roundtrip(&codec, TypedValue::new(DataType::Void, Value::Void));
    }

    #[test]
    fn test_null_is_tag_plus_invalid() {
        let codec = codec();
        let bytes = codec.serialize(&DataType::String, None).unwrap();
        assert_eq!(bytes, vec![0x05, INVALID]);
        assert_eq!(codec.deserialize(&bytes).unwrap(), TypedValue::null(DataType::String));

        let list_type = DataType::list_of(DataType::Int32);
        let bytes = codec.serialize(&list_type, None).unwrap();
        assert_eq!(codec.deserialize(&bytes).unwrap(), TypedValue::null(list_type));
    }

    #[test]
    fn test_list_layout_does_not_repeat_element_tag() {
        let codec = codec();
        let list = TypedValue::new(
            DataType::list_of(DataType::Int32),
            Value::List(vec![Some(Value::Int32(1)), None, Some(Value::Int32(3))]),
        );
        let bytes = codec.serialize_typed(&list).unwrap();

        assert_eq!(
            bytes,
            vec![
                0x0C, 0x01, VALID, // list<int32>, valid
                0, 0, 0, 3, // count
                VALID, 0, 0, 0, 1, //
                INVALID, //
                VALID, 0, 0, 0, 3,
            ]
        );
        roundtrip(&codec, list);
    }

    #[test]
    fn test_registered_structure_roundtrip() {
        let codec = codec();
        let point = Structure::new("Point")
            .with_field(1, DataType::Double, false)
            .with_field(2, DataType::Double, false)
            .with_field(3, DataType::String, true)
            .with(1, TypedValue::double(0.5))
            .with(2, TypedValue::double(-0.25));
        roundtrip(&codec, TypedValue::structure(point));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let codec = codec();
        let point = Structure::new("Point")
            .with_field(1, DataType::Double, false)
            .with(2, TypedValue::double(1.0));
        let err = codec.serialize_typed(&TypedValue::structure(point)).unwrap_err();
        assert!(matches!(err, CodecError::MissingField { field: 1, .. }));
    }

    #[test]
    fn test_unknown_structure_becomes_placeholder_and_siblings_decode() {
        let sender = ValueCodec::new(Arc::new(
            TypeRegistry::new().with_structure("Future", || Structure::new("Future")),
        ));
        let future = Structure::new("Future").with(9, TypedValue::string("from a newer server"));
        let outer_list = TypedValue::new(
            DataType::list_of(DataType::structure("Future")),
            Value::List(vec![Some(Value::Structure(StructureRef::new(future)))]),
        );

        let mut buf = BytesMut::new();
        sender.write_value(&mut buf, &outer_list.data_type, outer_list.value.as_ref()).unwrap();
        sender.write_value(&mut buf, &DataType::Int32, Some(&Value::Int32(42))).unwrap();

        let receiver = codec();
        let mut chopper = Chopper::new(&buf);
        let first = receiver.read_value(&mut chopper).unwrap();
        let second = receiver.read_value(&mut chopper).unwrap();

        match first.value {
            Some(Value::List(items)) => match &items[0] {
                Some(Value::Structure(s)) => {
                    assert!(s.lock().is_placeholder());
                    assert_eq!(s.lock().name(), "Future");
                }
                other => panic!("expected structure, got {:?}", other),
            },
            other => panic!("expected list, got {:?}", other),
        }
        assert_eq!(second, TypedValue::int32(42));
        assert!(chopper.is_empty());
    }

    #[test]
    fn test_placeholder_reencodes_verbatim() {
        let sender = ValueCodec::new(Arc::new(
            TypeRegistry::new().with_structure("Future", || Structure::new("Future")),
        ));
        let original = TypedValue::structure(Structure::new("Future").with(1, TypedValue::int64(5)));
        let bytes = sender.serialize_typed(&original).unwrap();

        let receiver = codec();
        let decoded = receiver.deserialize(&bytes).unwrap();
        assert_eq!(receiver.serialize_typed(&decoded).unwrap(), bytes);
    }

    #[test]
    fn test_handle_roundtrip_and_unregistered_handle() {
        let codec = codec();
        roundtrip(&codec, TypedValue::handle(ObjectHandle::new("Detector", "det-0")));

        let bytes = codec
            .serialize_typed(&TypedValue::handle(ObjectHandle::new("Stage", "stage-1")))
            .unwrap();
        assert!(matches!(
            codec.deserialize(&bytes),
            Err(CodecError::UnregisteredHandle(name)) if name == "Stage"
        ));
    }

    #[test]
    fn test_circular_reference_rejected() {
        let codec = codec();
        let node = StructureRef::new(Structure::new("Node"));
        node.lock().set(
            1,
            TypedValue::new(DataType::structure("Node"), Value::Structure(node.clone())),
        );

        let err = codec
            .serialize(&DataType::structure("Node"), Some(&Value::Structure(node.clone())))
            .unwrap_err();
        assert!(matches!(err, CodecError::CircularReference(_)));
    }

    #[test]
    fn test_shared_sibling_is_not_a_cycle() {
        let codec = ValueCodec::new(Arc::new(
            TypeRegistry::new().with_structure("Leaf", || Structure::new("Leaf")),
        ));
        let leaf = StructureRef::new(Structure::new("Leaf").with(1, TypedValue::bool(true)));
        let list = TypedValue::new(
            DataType::list_of(DataType::structure("Leaf")),
            Value::List(vec![
                Some(Value::Structure(leaf.clone())),
                Some(Value::Structure(leaf)),
            ]),
        );
        roundtrip(&codec, list);
    }

    #[test]
    fn test_type_mismatch_and_unknown_type() {
        let codec = codec();
        assert!(matches!(
            codec.serialize(&DataType::Int32, Some(&Value::String("x".into()))),
            Err(CodecError::TypeMismatch { .. })
        ));
        assert!(matches!(
            codec.serialize(&DataType::Unknown, None),
            Err(CodecError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_malformed_bytes() {
        let codec = codec();
        assert!(matches!(codec.deserialize(&[0x01, VALID, 0x00]), Err(CodecError::Truncated { .. })));
        assert!(matches!(codec.deserialize(&[0x01, 0x07]), Err(CodecError::InvalidValidity(0x07))));
        assert!(matches!(codec.deserialize(&[0x04, VALID, 0x01, 0xAA]), Err(CodecError::TrailingBytes(1))));
    }

    #[test]
    fn test_deep_list_tag_rejected() {
        let codec = codec();
        let bytes = vec![0x0C; 2_000_000];
        assert_eq!(codec.deserialize(&bytes), Err(CodecError::TooDeep(MAX_DECODE_DEPTH)));
    }
}
