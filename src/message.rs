//! Message Envelope Module
//!
//! Message types and the envelopes exchanged with the relay transport.
//! The wire tag of a [`MessageType`] is the only routing key the router
//! dispatches on.

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::future::Future;
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::error::GatewayError;

// ============================================================================
// MESSAGE TYPES
// ============================================================================

/// Closed set of Letro message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    AccountCreationRequest,
    AccountCreation,
    ContactPairingRequest,
    ContactPairingMatch,
    ContactPairingAuthorization,
    AuthorizeReceivingFromServer,
    ConnectionParams,
    MemberPublicKeyImport,
    VeraIdMemberBundle,
    MisconfiguredInternetEndpoint,
    NewConversation,
    NewMessage,
}

impl MessageType {
    pub const ALL: [MessageType; 12] = [
        MessageType::AccountCreationRequest,
        MessageType::AccountCreation,
        MessageType::ContactPairingRequest,
        MessageType::ContactPairingMatch,
        MessageType::ContactPairingAuthorization,
        MessageType::AuthorizeReceivingFromServer,
        MessageType::ConnectionParams,
        MessageType::MemberPublicKeyImport,
        MessageType::VeraIdMemberBundle,
        MessageType::MisconfiguredInternetEndpoint,
        MessageType::NewConversation,
        MessageType::NewMessage,
    ];

    /// Stable content type embedded in the transport envelope.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            MessageType::AccountCreationRequest => {
                "application/vnd.relaycorp.letro.account-creation-request"
            }
            MessageType::AccountCreation => {
                "application/vnd.relaycorp.letro.account-creation-completed"
            }
            MessageType::ContactPairingRequest => {
                "application/vnd.relaycorp.letro.contact-pairing-request"
            }
            MessageType::ContactPairingMatch => {
                "application/vnd.relaycorp.letro.contact-pairing-match"
            }
            MessageType::ContactPairingAuthorization => {
                "application/vnd.relaycorp.letro.contact-pairing-auth"
            }
            MessageType::AuthorizeReceivingFromServer => "application/vnd+relaycorp.awala.pda-path",
            MessageType::ConnectionParams => "application/vnd.relaycorp.letro.connection-params",
            MessageType::MemberPublicKeyImport => {
                "application/vnd.relaycorp.letro.member-public-key-import"
            }
            MessageType::VeraIdMemberBundle => {
                "application/vnd.relaycorp.letro.veraid-member-bundle"
            }
            MessageType::MisconfiguredInternetEndpoint => {
                "application/vnd.relaycorp.letro.misconfigured-internet-endpoint"
            }
            MessageType::NewConversation => {
                "application/vnd.relaycorp.letro.conversation-initiation"
            }
            MessageType::NewMessage => "application/vnd.relaycorp.letro.message",
        }
    }

    /// Parses a wire tag. Unknown tags yield `None`.
    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.wire_tag() == tag)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// OUTGOING
// ============================================================================

/// Message content submitted by a caller, before endpoint resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub message_type: MessageType,
    pub content: Vec<u8>,
}

impl Payload {
    pub fn new(message_type: MessageType, content: Vec<u8>) -> Self {
        Self {
            message_type,
            content,
        }
    }
}

/// A message with resolved endpoints, handed to the transport by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub message_type: MessageType,
    pub content: Vec<u8>,
    pub sender: Endpoint,
    pub recipient: Endpoint,
}

impl OutgoingMessage {
    pub fn new(payload: Payload, sender: Endpoint, recipient: Endpoint) -> Self {
        Self {
            message_type: payload.message_type,
            content: payload.content,
            sender,
            recipient,
        }
    }
}

// ============================================================================
// INCOMING
// ============================================================================

/// One-shot acknowledgement of a delivery attempt.
///
/// Consumed by value, so a given delivery attempt is acknowledged at most once.
pub struct Acknowledgement(Box<dyn FnOnce() -> BoxFuture<'static, Result<(), GatewayError>> + Send>);

impl Acknowledgement {
    pub fn new<F, Fut>(ack: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), GatewayError>> + Send + 'static,
    {
        Self(Box::new(move || ack().boxed()))
    }

    /// Acknowledgement that does nothing, for transports without relay-side queues.
    pub fn noop() -> Self {
        Self::new(|| async { Ok(()) })
    }

    pub async fn acknowledge(self) -> Result<(), GatewayError> {
        (self.0)().await
    }
}

impl fmt::Debug for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Acknowledgement")
    }
}

/// A message received from the relay network.
#[derive(Debug)]
pub struct IncomingMessage {
    pub parcel_id: Uuid,
    /// Raw wire tag as found in the envelope
    pub type_tag: String,
    pub content: Vec<u8>,
    pub sender_node_id: String,
    pub recipient_node_id: String,
    ack: Acknowledgement,
}

impl IncomingMessage {
    /// Builds an incoming envelope. Both endpoint ids are required.
    pub fn new(
        parcel_id: Uuid,
        type_tag: impl Into<String>,
        content: Vec<u8>,
        sender_node_id: impl Into<String>,
        recipient_node_id: impl Into<String>,
        ack: Acknowledgement,
    ) -> Result<Self, GatewayError> {
        let sender_node_id = sender_node_id.into();
        let recipient_node_id = recipient_node_id.into();
        if sender_node_id.is_empty() && recipient_node_id.is_empty() {
            return Err(GatewayError::InvalidEnvelope(
                "both sender and recipient node ids are empty".to_string(),
            ));
        }
        if sender_node_id.is_empty() {
            return Err(GatewayError::InvalidEnvelope("sender node id is empty".to_string()));
        }
        if recipient_node_id.is_empty() {
            return Err(GatewayError::InvalidEnvelope(
                "recipient node id is empty".to_string(),
            ));
        }
        Ok(Self {
            parcel_id,
            type_tag: type_tag.into(),
            content,
            sender_node_id,
            recipient_node_id,
            ack,
        })
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire_tag(&self.type_tag)
    }

    /// Splits off the acknowledgement so content can be processed separately.
    pub fn into_parts(self) -> (ReceivedMessage, Acknowledgement) {
        (
            ReceivedMessage {
                parcel_id: self.parcel_id,
                type_tag: self.type_tag,
                content: self.content,
                sender_node_id: self.sender_node_id,
                recipient_node_id: self.recipient_node_id,
            },
            self.ack,
        )
    }
}

/// Incoming message without its acknowledgement capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub parcel_id: Uuid,
    pub type_tag: String,
    pub content: Vec<u8>,
    pub sender_node_id: String,
    pub recipient_node_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_unique_and_round_trip() {
        for message_type in MessageType::ALL {
            assert_eq!(MessageType::from_wire_tag(message_type.wire_tag()), Some(message_type));
        }
        let mut tags: Vec<_> = MessageType::ALL.iter().map(|t| t.wire_tag()).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), MessageType::ALL.len());
    }

    #[test]
    fn test_unknown_wire_tag() {
        assert_eq!(MessageType::from_wire_tag("text/plain"), None);
    }

    #[test]
    fn test_incoming_message_requires_endpoint_ids() {
        let err = IncomingMessage::new(
            Uuid::new_v4(),
            MessageType::NewMessage.wire_tag(),
            vec![],
            "",
            "",
            Acknowledgement::noop(),
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidEnvelope(_)));

        assert!(IncomingMessage::new(
            Uuid::new_v4(),
            MessageType::NewMessage.wire_tag(),
            vec![],
            "0sender",
            "",
            Acknowledgement::noop(),
        )
        .is_err());
    }
}
