//! Call requests and responses
//!
//! Parameter block: `[count: i32]` followed by `count` self-describing values.
//! Result block: one self-describing value.
//! Optional-field block of a call error: repeated `[field id: i32][length-
//! prefixed bytes holding one self-describing value]` until exhausted.

use std::collections::BTreeMap;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use super::Message;
use crate::serialization::{put_byte_array, put_length, Chopper, CodecError, TypedValue, ValueCodec};

/// One logical call. The endpoint fills in `session_id` and `call_id` and
/// bumps `attempt_number` when it reissues the request after recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    pub session_id: String,
    pub call_id: u32,
    pub attempt_number: u8,
    pub object_id: String,
    pub method_name: String,
    pub parameters: Vec<TypedValue>,
}

impl CallRequest {
    pub fn new(object_id: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            session_id: String::new(),
            call_id: 0,
            attempt_number: 1,
            object_id: object_id.into(),
            method_name: method_name.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_param(mut self, parameter: TypedValue) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_params(mut self, parameters: impl IntoIterator<Item = TypedValue>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    /// Build the wire message
    pub fn to_message(&self, codec: &ValueCodec) -> Result<Message, CodecError> {
        Ok(Message::CallRequest {
            session_id: self.session_id.clone(),
            call_id: self.call_id,
            attempt_number: self.attempt_number,
            object_id: self.object_id.clone(),
            method_name: self.method_name.clone(),
            parameters: encode_parameters(codec, &self.parameters)?,
        })
    }
}

pub fn encode_parameters(codec: &ValueCodec, parameters: &[TypedValue]) -> Result<Vec<u8>, CodecError> {
    let mut buf = BytesMut::new();
    put_length(&mut buf, parameters.len())?;
    for parameter in parameters {
        codec.write_value(&mut buf, &parameter.data_type, parameter.value.as_ref())?;
    }
    Ok(buf.to_vec())
}

pub fn decode_parameters(codec: &ValueCodec, bytes: &[u8]) -> Result<Vec<TypedValue>, CodecError> {
    let mut chopper = Chopper::new(bytes);
    let count = chopper.read_u32()? as usize;
    let mut parameters = Vec::with_capacity(count.min(chopper.remaining()));
    for _ in 0..count {
        parameters.push(codec.read_value(&mut chopper)?);
    }
    chopper.finish()?;
    Ok(parameters)
}

/// Server-reported call failure
#[derive(Error, Debug, Clone, PartialEq)]
#[error("call failed with code {code}: {description}")]
pub struct CallFailure {
    pub code: i32,
    pub description: String,
    /// Optional fields that decoded cleanly
    pub fields: BTreeMap<u32, TypedValue>,
    /// Ids of optional fields that could not be decoded and were skipped
    pub skipped_fields: Vec<u32>,
}

impl CallFailure {
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            fields: BTreeMap::new(),
            skipped_fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, id: u32, value: TypedValue) -> Self {
        self.fields.insert(id, value);
        self
    }

    pub fn field(&self, id: u32) -> Option<&TypedValue> {
        self.fields.get(&id)
    }
}

/// Outcome carried by a call response
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(TypedValue),
    Failure(CallFailure),
}

/// Decoded response to a call
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub session_id: String,
    pub call_id: u32,
    pub outcome: CallOutcome,
}

impl CallResponse {
    /// Decode a `CallResult` or `CallError`; any other message yields `None`
    pub fn from_message(message: &Message, codec: &ValueCodec) -> Result<Option<Self>, CodecError> {
        let response = match message {
            Message::CallResult {
                session_id,
                call_id,
                result,
            } => CallResponse {
                session_id: session_id.clone(),
                call_id: *call_id,
                outcome: CallOutcome::Success(codec.deserialize(result)?),
            },
            Message::CallError {
                session_id,
                call_id,
                error_code,
                description,
                optional_fields,
            } => {
                let (fields, skipped_fields) = decode_optional_fields(codec, optional_fields);
                CallResponse {
                    session_id: session_id.clone(),
                    call_id: *call_id,
                    outcome: CallOutcome::Failure(CallFailure {
                        code: *error_code,
                        description: description.clone(),
                        fields,
                        skipped_fields,
                    }),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(response))
    }

    pub fn was_call_successful(&self) -> bool {
        matches!(self.outcome, CallOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<TypedValue, CallFailure> {
        match self.outcome {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::Failure(failure) => Err(failure),
        }
    }
}

pub fn encode_optional_fields(
    codec: &ValueCodec,
    fields: &BTreeMap<u32, TypedValue>,
) -> Result<Vec<u8>, CodecError> {
    let mut buf = BytesMut::new();
    for (id, value) in fields {
        buf.put_u32(*id);
        put_byte_array(&mut buf, &codec.serialize_typed(value)?)?;
    }
    Ok(buf.to_vec())
}

/// Decode an optional-field block leniently.
///
/// A field whose value cannot be decoded is skipped by its declared length
/// and reported in the second element. A block whose framing itself is cut
/// short stops decoding at that point.
pub fn decode_optional_fields(codec: &ValueCodec, bytes: &[u8]) -> (BTreeMap<u32, TypedValue>, Vec<u32>) {
    let mut fields = BTreeMap::new();
    let mut skipped = Vec::new();
    let mut chopper = Chopper::new(bytes);

    while !chopper.is_empty() {
        let entry = chopper
            .read_u32()
            .and_then(|id| chopper.read_byte_slice().map(|payload| (id, payload)));
        let (id, payload) = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Optional field block cut short: {}", e);
                break;
            }
        };

        match codec.deserialize(payload) {
            Ok(value) => {
                fields.insert(id, value);
            }
            Err(e) => {
                tracing::warn!("Skipping optional field {} ({} bytes): {}", id, payload.len(), e);
                skipped.push(id);
            }
        }
    }

    (fields, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::{DataType, ObjectHandle, TypeRegistry};
    use std::sync::Arc;

    #[test]
    fn test_parameters_roundtrip() {
        let codec = ValueCodec::default();
        let params = vec![
            TypedValue::double(1.5e-3),
            TypedValue::string("um"),
            TypedValue::null(DataType::Int32),
        ];
        let bytes = encode_parameters(&codec, &params).unwrap();
        assert_eq!(&bytes[..4], &[0, 0, 0, 3]);
        assert_eq!(decode_parameters(&codec, &bytes).unwrap(), params);
    }

    #[test]
    fn test_call_result_decodes_to_success() {
        let codec = ValueCodec::default();
        let message = Message::CallResult {
            session_id: "S1".into(),
            call_id: 3,
            result: codec.serialize_typed(&TypedValue::double(0.5)).unwrap(),
        };

        let response = CallResponse::from_message(&message, &codec).unwrap().unwrap();
        assert!(response.was_call_successful());
        assert_eq!(response.call_id, 3);
        assert_eq!(response.into_result().unwrap(), TypedValue::double(0.5));
    }

    #[test]
    fn test_call_error_skips_undecodable_optional_field() {
        let sender = ValueCodec::new(Arc::new(TypeRegistry::new().with_handle_type("Beam")));
        let mut fields = BTreeMap::new();
        fields.insert(1, TypedValue::string("vacuum not ready"));
        fields.insert(2, TypedValue::handle(ObjectHandle::new("Beam", "b0")));
        fields.insert(3, TypedValue::int32(12));
        let block = encode_optional_fields(&sender, &fields).unwrap();

        let receiver = ValueCodec::default();
        let message = Message::CallError {
            session_id: "S1".into(),
            call_id: 9,
            error_code: 17,
            description: "refused".into(),
            optional_fields: block,
        };
        let response = CallResponse::from_message(&message, &receiver).unwrap().unwrap();
        let failure = response.into_result().unwrap_err();

        assert_eq!(failure.code, 17);
        assert_eq!(failure.field(1), Some(&TypedValue::string("vacuum not ready")));
        assert_eq!(failure.field(3), Some(&TypedValue::int32(12)));
        assert!(failure.field(2).is_none());
        assert_eq!(failure.skipped_fields, vec![2]);
    }

    #[test]
    fn test_cut_short_block_keeps_earlier_fields() {
        let codec = ValueCodec::default();
        let mut fields = BTreeMap::new();
        fields.insert(1, TypedValue::int32(1));
        let mut block = encode_optional_fields(&codec, &fields).unwrap();
        block.extend([0, 0, 0, 2, 0, 0]);

        let (decoded, skipped) = decode_optional_fields(&codec, &block);
        assert_eq!(decoded.len(), 1);
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_other_messages_are_not_responses() {
        let codec = ValueCodec::default();
        assert!(CallResponse::from_message(&Message::KeepAlive, &codec).unwrap().is_none());
    }

    #[test]
    fn test_malformed_result_is_serialization_fault() {
        let codec = ValueCodec::default();
        let message = Message::CallResult {
            session_id: "S1".into(),
            call_id: 1,
            result: vec![0x01, 0x01, 0x00],
        };
        assert!(CallResponse::from_message(&message, &codec).is_err());
    }
}
