//! ORC - Object Remote Call client
//!
//! Talks to an application server over a framed binary protocol:
//! - [`serialization`] encodes self-describing typed values
//! - [`network`] carries frames over a byte stream
//! - [`protocol`] defines the session and call messages
//! - [`endpoint`] runs the session, dispatches calls and recovers from faults

pub mod config;
pub mod endpoint;
pub mod logging;
pub mod network;
pub mod protocol;
pub mod serialization;

pub use config::Config;
pub use endpoint::{Endpoint, EndpointConfig, EndpointError, EndpointResult, EndpointState, ErrorKind, RemoteObject};
pub use logging::{EventLog, TracingLog};
pub use protocol::{CallFailure, CallRequest};
pub use serialization::{DataType, ObjectHandle, Structure, TypeRegistry, TypedValue, Value, ValueCodec};
