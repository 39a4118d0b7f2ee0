//! Relay Gateway Transport Module
//!
//! Thin async interface over the relay network client. The native client is
//! not safe for concurrent use, so the endpoint manager only calls into a
//! transport from its relay lane.

pub mod loopback;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::endpoint::Endpoint;
use crate::error::GatewayError;
use crate::message::{IncomingMessage, OutgoingMessage};

pub use loopback::LoopbackGateway;

/// Unbounded stream of inbound messages, live for the process lifetime.
pub type IncomingStream = BoxStream<'static, Result<IncomingMessage, GatewayError>>;

/// Operations the core needs from the relay network.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// One-time setup of the local client (key stores, encryption library).
    async fn set_up(&self) -> Result<(), GatewayError>;

    /// Binds to the relay app. Fails with [`GatewayError::Binding`] when it
    /// is not installed.
    async fn bind_gateway(&self) -> Result<(), GatewayError>;

    /// Registers a new first-party endpoint. The returned endpoint has no owner.
    async fn register_first_party_endpoint(&self) -> Result<Endpoint, GatewayError>;

    async fn load_first_party_endpoint(
        &self,
        node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError>;

    /// Imports the server's public endpoint from DER connection parameters.
    async fn import_server_third_party_endpoint(
        &self,
        connection_params: &[u8],
    ) -> Result<Endpoint, GatewayError>;

    async fn load_public_third_party_endpoint(
        &self,
        node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError>;

    async fn load_private_third_party_endpoint(
        &self,
        node_id: &str,
        first_party_node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError>;

    /// Imports a peer-issued authorization, yielding the peer's private endpoint.
    async fn import_private_third_party_auth(
        &self,
        authorization: &[u8],
    ) -> Result<Endpoint, GatewayError>;

    async fn receive_messages(&self) -> Result<IncomingStream, GatewayError>;

    async fn send_message(&self, message: OutgoingMessage) -> Result<(), GatewayError>;

    /// Issues an authorization letting `third_party` reach `first_party` indefinitely.
    async fn authorize_indefinitely(
        &self,
        first_party: &Endpoint,
        third_party: &Endpoint,
    ) -> Result<Vec<u8>, GatewayError>;

    async fn revoke_authorization(
        &self,
        first_party: &Endpoint,
        third_party_node_id: &str,
    ) -> Result<(), GatewayError>;
}
