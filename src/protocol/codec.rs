//! Message codec
//!
//! Frame content layout: `[discriminant: u8][sequence: i32][body]`, the
//! sequence number being the one carried by the enclosing frame.

use bytes::{BufMut, Bytes, BytesMut};

use super::{message_types, Message};
use crate::network::{Frame, FrameReader, FrameWriter, TransportError};
use crate::serialization::{put_byte_array, put_string, Chopper, CodecError};

/// A decoded message with the sequence number it arrived under
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sequence: u32,
    pub message: Message,
}

/// Failure to send or receive a message on a connection
#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Undecodable message: {0}")]
    Codec(#[from] CodecError),
}

/// Encode a message under the given sequence number
pub fn encode_message(message: &Message, sequence: u32) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_u8(message.type_id());
    buf.put_u32(sequence);

    match message {
        Message::SessionInquiry | Message::SessionEnd | Message::KeepAlive => {}
        Message::SessionOffer { offered_session_id } => put_string(&mut buf, offered_session_id)?,
        Message::SessionJoinRequest { desired_session_id } => put_string(&mut buf, desired_session_id)?,
        Message::SessionJoinResponse { assigned_session_id } => put_string(&mut buf, assigned_session_id)?,
        Message::SessionError {
            session_id,
            code,
            description,
        } => {
            put_string(&mut buf, session_id)?;
            buf.put_i32(*code);
            put_string(&mut buf, description)?;
        }
        Message::CallRequest {
            session_id,
            call_id,
            attempt_number,
            object_id,
            method_name,
            parameters,
        } => {
            put_string(&mut buf, session_id)?;
            buf.put_u32(*call_id);
            buf.put_u8(*attempt_number);
            put_string(&mut buf, object_id)?;
            put_string(&mut buf, method_name)?;
            put_byte_array(&mut buf, parameters)?;
        }
        Message::CallResult {
            session_id,
            call_id,
            result,
        } => {
            put_string(&mut buf, session_id)?;
            buf.put_u32(*call_id);
            put_byte_array(&mut buf, result)?;
        }
        Message::CallError {
            session_id,
            call_id,
            error_code,
            description,
            optional_fields,
        } => {
            put_string(&mut buf, session_id)?;
            buf.put_u32(*call_id);
            buf.put_i32(*error_code);
            put_string(&mut buf, description)?;
            put_byte_array(&mut buf, optional_fields)?;
        }
    }

    Ok(buf.freeze())
}

/// Decode frame content into a message. Unknown discriminants are fatal.
pub fn decode_message(content: &[u8]) -> Result<Envelope, CodecError> {
    let mut chopper = Chopper::new(content);
    let discriminant = chopper.read_u8()?;
    let sequence = chopper.read_u32()?;

    let message = match discriminant {
        message_types::SESSION_INQUIRY => Message::SessionInquiry,
        message_types::SESSION_END => Message::SessionEnd,
        message_types::KEEP_ALIVE => Message::KeepAlive,
        message_types::SESSION_OFFER => Message::SessionOffer {
            offered_session_id: chopper.read_string()?,
        },
        message_types::SESSION_JOIN_REQUEST => Message::SessionJoinRequest {
            desired_session_id: chopper.read_string()?,
        },
        message_types::SESSION_JOIN_RESPONSE => Message::SessionJoinResponse {
            assigned_session_id: chopper.read_string()?,
        },
        message_types::SESSION_ERROR => Message::SessionError {
            session_id: chopper.read_string()?,
            code: chopper.read_i32()?,
            description: chopper.read_string()?,
        },
        message_types::CALL_REQUEST => Message::CallRequest {
            session_id: chopper.read_string()?,
            call_id: chopper.read_u32()?,
            attempt_number: chopper.read_u8()?,
            object_id: chopper.read_string()?,
            method_name: chopper.read_string()?,
            parameters: chopper.read_byte_array()?,
        },
        message_types::CALL_RESULT => Message::CallResult {
            session_id: chopper.read_string()?,
            call_id: chopper.read_u32()?,
            result: chopper.read_byte_array()?,
        },
        message_types::CALL_ERROR => Message::CallError {
            session_id: chopper.read_string()?,
            call_id: chopper.read_u32()?,
            error_code: chopper.read_i32()?,
            description: chopper.read_string()?,
            optional_fields: chopper.read_byte_array()?,
        },
        other => return Err(CodecError::UnknownMessageType(other)),
    };

    chopper.finish()?;
    Ok(Envelope { sequence, message })
}

/// Send one message in a data frame; returns the sequence number used
pub async fn send_message(writer: &mut FrameWriter, message: &Message) -> Result<u32, MessageError> {
    let sequence = writer.next_sequence();
    let content = encode_message(message, sequence)?;
    writer.write_frame(&Frame::data(sequence, content)).await?;
    tracing::trace!("Sent {} (seq {})", message.name(), sequence);
    Ok(sequence)
}

/// Receive the next message
pub async fn receive_message(reader: &mut FrameReader) -> Result<Envelope, MessageError> {
    let frame = reader.receive_frame().await?;
    let envelope = decode_message(&frame.content)?;
    tracing::trace!("Received {} (seq {})", envelope.message.name(), envelope.sequence);
    Ok(envelope)
}
