//! Error Taxonomy Module
//!
//! Each layer of the core has its own error type so callers can tell a
//! transport failure apart from a malformed payload or a resolution miss.
//! Only [`EndpointError`] is meant to reach UI-facing callers; codec and
//! gateway failures observed by the receive loop are absorbed into logs or
//! into the global initialization state.

use thiserror::Error;

use crate::initialization::InitializationState;
use crate::message::MessageType;

/// Failures reported by the relay network transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The relay app is absent or refused the binding. Retryable on re-probe.
    #[error("gateway binding failed: {0}")]
    Binding(String),

    /// The native encryption library failed. Not retryable without a restart.
    #[error("encryption library failure: {0}")]
    EncryptionInit(String),

    #[error("endpoint registration failed: {0}")]
    Registration(String),

    #[error("malformed connection parameters: {0}")]
    MalformedConnectionParams(String),

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("failed to issue or revoke authorization: {0}")]
    Authorization(String),

    #[error("failed to receive messages: {0}")]
    Receive(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The gateway was used before `set_up`/`bind_gateway` completed.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Whether this failure comes from the encryption library and must
    /// escalate the process to the fatal state.
    pub fn is_encryption_failure(&self) -> bool {
        matches!(self, GatewayError::EncryptionInit(_))
    }
}

/// Failures of the durable endpoint store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the DER message codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The payload is not a well-formed instance of the message schema.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// A domain value cannot be represented in its wire field.
    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Errors returned by [`crate::manager::EndpointManager`] operations.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("relay gateway not ready (state {0:?})")]
    NotReady(InitializationState),

    #[error("recipient node id is missing")]
    MissingNodeId,

    #[error("third-party endpoint '{node_id}' not found")]
    ThirdPartyNotFound { node_id: String },

    #[error("first-party endpoint '{node_id}' not found")]
    FirstPartyNotFound { node_id: String },

    #[error("bundled connection parameters unavailable: {0}")]
    ConnectionParams(String),

    #[error("relay lane is closed")]
    LaneClosed,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors assembling a [`crate::router::MessageRouter`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("a handler for {0} is already registered")]
    DuplicateRoute(MessageType),
}
