//! Letro Core Library
//!
//! Endpoint lifecycle and message dispatch core of the Letro messenger. It
//! registers and caches relay endpoints, encodes domain messages as DER
//! payloads, sends them over the relay network and routes inbound payloads to
//! handlers behind sender-authenticity checks.

pub mod codec;
pub mod config;
pub mod connection_params;
pub mod endpoint;
pub mod error;
pub mod gateway;
pub mod initialization;
pub mod lane;
pub mod manager;
pub mod message;
pub mod router;
pub mod store;

// Re-export commonly used types
pub use codec::MessageCodec;
pub use config::Config;
pub use connection_params::ConnectionParamsSource;
pub use endpoint::{Account, AuthorizationGrant, Endpoint, EndpointKind, EndpointOwner, Recipient};
pub use error::{CodecError, EndpointError, GatewayError, RouterError, StoreError};
pub use gateway::{GatewayTransport, LoopbackGateway};
pub use initialization::{InitializationState, InitializationStateMachine};
pub use manager::{EndpointManager, ManagerConfig};
pub use message::{IncomingMessage, MessageType, OutgoingMessage, Payload, ReceivedMessage};
pub use router::{AckPolicy, MessageHandler, MessageRouter, RouteOutcome};
pub use store::{EndpointStore, FileEndpointStore, InMemoryEndpointStore};
