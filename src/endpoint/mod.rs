//! Endpoint module - Client side of one ORC session
//!
//! Drives the connection lifecycle:
//! - Session handshake on connect, and again on every recovery
//! - Call dispatch with at most one call in flight
//! - Recovery after transport faults, on a bounded schedule
//! - Background vitality monitoring
//!
//! Lock discipline: the call-processing lock owns the read half of the socket,
//! the send lock owns the write half, and the state lock guards the
//! Idle/Running/Stopped transitions. The call path takes the call lock before
//! the send lock; the vitality task only ever takes the send lock.

mod error;
mod recovery;
mod remote;
mod session;
mod vitality;


pub use error::*;
pub use recovery::*;
pub use remote::*;
pub use session::handshake;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::logging::{EventLog, TracingLog};
use crate::network::{
    Connector, FrameReader, FrameWriter, FramedConnection, SequenceGenerator, TcpConnector, TransportError,
};
use crate::protocol::{receive_message, send_message, CallRequest, CallResponse, Message, MessageError};
use crate::serialization::{CodecError, TypeRegistry, TypedValue, ValueCodec};

/// Lifecycle state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointState::Idle => write!(f, "idle"),
            EndpointState::Running => write!(f, "running"),
            EndpointState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Runtime settings of an endpoint
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Keep-alive period; zero disables the vitality task
    pub vitality_interval: Duration,
    /// Attempts per call, the first one included
    pub max_call_attempts: u8,
    pub recovery: RecoverySchedule,
    /// Wrap point of the frame sequence and call id generators
    pub sequence_max: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EndpointConfig {
    fn from(config: &Config) -> Self {
        Self {
            vitality_interval: config.vitality_interval(),
            max_call_attempts: config.session.max_call_attempts.max(1),
            recovery: RecoverySchedule::from(&config.recovery),
            sequence_max: config.sequence.max_value,
        }
    }
}

/// Builds an [`Endpoint`]
pub struct EndpointBuilder {
    connector: Arc<dyn Connector>,
    config: EndpointConfig,
    registry: TypeRegistry,
    log: Arc<dyn EventLog>,
}

impl EndpointBuilder {
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.log = log;
        self
    }

    pub fn build(self) -> Endpoint {
        let sequence_max = self.config.sequence_max;
        Endpoint {
            shared: Arc::new(Shared {
                connector: self.connector,
                codec: ValueCodec::new(Arc::new(self.registry)),
                log: self.log,
                state: RwLock::new(EndpointState::Idle),
                session_id: RwLock::new(None),
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                frame_sequence: Arc::new(SequenceGenerator::with_max(sequence_max)),
                call_ids: SequenceGenerator::with_max(sequence_max),
                call_in_flight: AtomicBool::new(false),
                vitality: std::sync::Mutex::new(None),
                config: self.config,
            }),
        }
    }
}

/// Client endpoint owning one connection and one session over its lifetime.
///
/// Cloning yields another handle to the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<Shared>,
}

struct Shared {
    config: EndpointConfig,
    connector: Arc<dyn Connector>,
    codec: ValueCodec,
    log: Arc<dyn EventLog>,
    state: RwLock<EndpointState>,
    session_id: RwLock<Option<String>>,
    /// Call-processing lock
    reader: Mutex<Option<FrameReader>>,
    /// Send lock
    writer: Mutex<Option<FrameWriter>>,
    frame_sequence: Arc<SequenceGenerator>,
    call_ids: SequenceGenerator,
    call_in_flight: AtomicBool,
    vitality: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Why waiting for a call response stopped
enum ExchangeError {
    Transport(TransportError),
    Session(InterruptReason),
    Codec(CodecError),
}

impl From<TransportError> for ExchangeError {
    fn from(error: TransportError) -> Self {
        ExchangeError::Transport(error)
    }
}

impl From<MessageError> for ExchangeError {
    fn from(error: MessageError) -> Self {
        match error {
            MessageError::Transport(e) => ExchangeError::Transport(e),
            MessageError::Codec(e) => ExchangeError::Codec(e),
        }
    }
}

/// Marks a call as in flight for the vitality task
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Endpoint {
    pub fn builder(connector: Arc<dyn Connector>) -> EndpointBuilder {
        EndpointBuilder {
            connector,
            config: EndpointConfig::default(),
            registry: TypeRegistry::new(),
            log: Arc::new(TracingLog),
        }
    }

    /// TCP endpoint for the server named in the configuration
    pub fn from_config(config: &Config, registry: TypeRegistry) -> Self {
        let connector = TcpConnector::new(config.endpoint.host.clone(), config.endpoint.port)
            .with_connect_timeout(config.connect_timeout())
            .with_max_frame_size(config.session.max_frame_size);

        Self::builder(Arc::new(connector))
            .config(EndpointConfig::from(config))
            .registry(registry)
            .build()
    }

    pub async fn state(&self) -> EndpointState {
        *self.shared.state.read().await
    }

    /// Session bound by the last successful handshake
    pub async fn session_id(&self) -> Option<String> {
        self.shared.session_id.read().await.clone()
    }

    pub fn remote(&self) -> String {
        self.shared.connector.remote()
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.shared.codec
    }

    /// Connect and establish the session. Only valid while idle; a failed
    /// attempt leaves the endpoint idle.
    pub async fn connect(&self) -> EndpointResult<String> {
        let mut reader = self.shared.reader.lock().await;
        let state = self.state().await;
        if state != EndpointState::Idle {
            return Err(StateError::AlreadyConnected(state).into());
        }

        self.shared.log.log_event(&format!("Connecting to {}", self.remote()));
        let (connection, session_id) = match self.open_session(None).await {
            Ok(opened) => opened,
            Err(e) => {
                self.shared.log.log_error(&format!("Connect to {} failed: {}", self.remote(), e));
                return Err(e);
            }
        };

        *reader = Some(connection.reader);
        *self.shared.writer.lock().await = Some(connection.writer);
        *self.shared.session_id.write().await = Some(session_id.clone());
        *self.shared.state.write().await = EndpointState::Running;

        self.shared.log.log_session_bound(&session_id, false);
        self.start_vitality();
        Ok(session_id)
    }

    /// Invoke a remote method and wait for its outcome.
    ///
    /// Transport faults are absorbed by recovery and the request is reissued
    /// while attempts remain. Server-reported failures come back as
    /// [`EndpointError::Application`].
    pub async fn perform_call(&self, mut request: CallRequest) -> EndpointResult<TypedValue> {
        self.ensure_running().await?;
        let mut reader = self.shared.reader.lock().await;
        // The state may have changed while waiting for the call lock.
        self.ensure_running().await?;
        let _in_flight = InFlight::enter(&self.shared.call_in_flight);

        request.session_id = self.bound_session().await?;
        request.call_id = self.shared.call_ids.next();
        request.attempt_number = 1;

        loop {
            let message = request.to_message(&self.shared.codec)?;
            self.shared.log.log_call(&request);

            let fault = match self.exchange(&mut reader, request.call_id, &message).await {
                Ok(response) => return self.finish_call(&request, response),
                Err(ExchangeError::Transport(fault)) => fault,
                Err(ExchangeError::Session(reason)) => {
                    self.shared
                        .log
                        .log_error(&format!("Call {} interrupted: {}", request.call_id, reason));
                    reader.take();
                    self.stop().await;
                    return Err(EndpointError::interrupted(reason, None));
                }
                Err(ExchangeError::Codec(e)) => {
                    self.shared
                        .log
                        .log_error(&format!("Call {} response undecodable: {}", request.call_id, e));
                    return Err(EndpointError::Serialization(e));
                }
            };

            if self.state().await == EndpointState::Stopped {
                reader.take();
                return Err(EndpointError::interrupted(
                    InterruptReason::Stopped,
                    Some(EndpointError::Transport(fault)),
                ));
            }

            self.shared.log.log_warning(&format!(
                "Call {} attempt {} hit a transport fault: {}",
                request.call_id, request.attempt_number, fault
            ));
            request.session_id = self.recover(&mut reader).await?;

            if request.attempt_number >= self.shared.config.max_call_attempts {
                return Err(EndpointError::interrupted(
                    InterruptReason::SessionLost,
                    Some(EndpointError::Transport(fault)),
                ));
            }
            request.attempt_number += 1;
        }
    }

    /// End the session and stop the endpoint for good.
    pub async fn disconnect(&self) -> EndpointResult<()> {
        match self.state().await {
            EndpointState::Idle => return Err(StateError::NeverConnected.into()),
            EndpointState::Stopped => return Ok(()),
            EndpointState::Running => {}
        }

        // Taken out of the slot so no keep-alive can follow the SessionEnd
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = send_message(&mut writer, &Message::SessionEnd).await {
                self.shared.log.log_event(&format!("SessionEnd not delivered: {}", e));
            }
            writer.shutdown().await;
        }

        self.stop().await;
        // An in-flight call still owns the reader and drops it when it fails.
        if let Ok(mut reader) = self.shared.reader.try_lock() {
            reader.take();
        }

        self.shared.log.log_notification(&format!("Disconnected from {}", self.remote()));
        Ok(())
    }

    async fn ensure_running(&self) -> EndpointResult<()> {
        match self.state().await {
            EndpointState::Running => Ok(()),
            other => Err(StateError::NotRunning(other).into()),
        }
    }

    async fn bound_session(&self) -> EndpointResult<String> {
        match self.session_id().await {
            Some(session_id) => Ok(session_id),
            None => Err(StateError::NotRunning(self.state().await).into()),
        }
    }

    /// Open a connection and run the handshake on it
    async fn open_session(&self, previous: Option<&str>) -> EndpointResult<(FramedConnection, String)> {
        let mut connection = self
            .shared
            .connector
            .connect(self.shared.frame_sequence.clone())
            .await?;

        match session::handshake(&mut connection, previous).await {
            Ok(session_id) => Ok((connection, session_id)),
            Err(e) => {
                connection.writer.shutdown().await;
                Err(e.into())
            }
        }
    }

    /// Send the request and wait for the response carrying its call id
    async fn exchange(
        &self,
        reader: &mut Option<FrameReader>,
        call_id: u32,
        message: &Message,
    ) -> Result<CallResponse, ExchangeError> {
        {
            let mut writer = self.shared.writer.lock().await;
            let writer = writer.as_mut().ok_or(TransportError::Disconnected)?;
            send_message(writer, message).await?;
        }

        let reader = reader.as_mut().ok_or(TransportError::Disconnected)?;
        loop {
            let envelope = receive_message(reader).await?;

            match envelope.message {
                Message::SessionEnd => return Err(ExchangeError::Session(InterruptReason::SessionEnded)),
                Message::SessionError { code, description, .. } => {
                    return Err(ExchangeError::Session(InterruptReason::SessionRejected { code, description }))
                }
                ref response if response.response_call_id() == Some(call_id) => {
                    return match CallResponse::from_message(response, &self.shared.codec) {
                        Ok(Some(response)) => Ok(response),
                        Ok(None) => Err(ExchangeError::Codec(CodecError::UnknownMessageType(response.type_id()))),
                        Err(e) => Err(ExchangeError::Codec(e)),
                    };
                }
                Message::KeepAlive => {}
                other => {
                    self.shared.log.log_event(&format!(
                        "Discarding {} (call {:?}) while waiting for call {}",
                        other.name(),
                        other.response_call_id(),
                        call_id
                    ));
                }
            }
        }
    }

    fn finish_call(&self, request: &CallRequest, response: CallResponse) -> EndpointResult<TypedValue> {
        match response.into_result() {
            Ok(value) => {
                self.shared.log.log_event(&format!(
                    "Call {} {}.{} returned {}",
                    request.call_id, request.object_id, request.method_name, value.data_type
                ));
                Ok(value)
            }
            Err(failure) => {
                self.shared.log.log_event(&format!(
                    "Call {} {}.{} failed: {}",
                    request.call_id, request.object_id, request.method_name, failure
                ));
                Err(EndpointError::Application(failure))
            }
        }
    }

    /// Replace the connection, re-joining the bound session.
    ///
    /// Runs with the call lock held. Exhausting the schedule stops the
    /// endpoint.
    async fn recover(&self, reader: &mut Option<FrameReader>) -> EndpointResult<String> {
        let session_id = self.bound_session().await?;
        reader.take();
        self.release_writer().await;

        let schedule = &self.shared.config.recovery;
        let mut step = 1;
        let mut last_error;
        loop {
            if self.state().await == EndpointState::Stopped {
                return Err(EndpointError::interrupted(InterruptReason::Stopped, None));
            }

            match self.open_session(Some(&session_id)).await {
                Ok((mut connection, _)) => {
                    // A disconnect may have landed during the handshake. The
                    // state lock is held until the new halves are in place.
                    let state = self.shared.state.write().await;
                    if *state == EndpointState::Stopped {
                        drop(state);
                        connection.writer.shutdown().await;
                        return Err(EndpointError::interrupted(InterruptReason::Stopped, None));
                    }
                    *reader = Some(connection.reader);
                    *self.shared.writer.lock().await = Some(connection.writer);
                    drop(state);
                    self.shared.log.log_session_bound(&session_id, true);
                    return Ok(session_id);
                }
                Err(e) => {
                    self.shared
                        .log
                        .log_warning(&format!("Recovery attempt {} failed: {}", step, e));
                    last_error = e;
                }
            }

            step += 1;
            match schedule.delay_before(step) {
                Some(delay) => {
                    self.shared.log.log_recovery_step(step, schedule.max_steps(), delay);
                    tokio::time::sleep(delay).await;
                }
                None => break,
            }
        }

        self.shared.log.log_error(&format!(
            "Session {} unrecoverable after {} attempts",
            session_id,
            schedule.max_steps()
        ));
        self.stop().await;
        Err(EndpointError::interrupted(InterruptReason::Unrecoverable, Some(last_error)))
    }

    fn start_vitality(&self) {
        let interval = self.shared.config.vitality_interval;
        if interval.is_zero() {
            return;
        }
        let handle = vitality::spawn(Arc::downgrade(&self.shared), interval);
        let mut slot = self
            .shared
            .vitality
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(handle);
    }

    /// Enter the terminal state and release the socket
    async fn stop(&self) {
        *self.shared.state.write().await = EndpointState::Stopped;

        let handle = self
            .shared
            .vitality
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }

        self.release_writer().await;
    }

    async fn release_writer(&self) {
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await;
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("remote", &self.remote())
            .field("config", &self.shared.config)
            .finish()
    }
}
