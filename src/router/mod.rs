//! Message Router Module
//!
//! Dispatches inbound messages to handlers by wire tag.
//!
//! ## Flow
//!
//! 1. Look up the route for the message's wire tag (unknown or unrouted: ignore)
//! 2. Decode the payload with the route's codec (malformed: drop)
//! 3. Check the sender against the injected predicate and the handler (mismatch: drop)
//! 4. Hand the decoded message to the handler
//!
//! Every delivery attempt is acknowledged exactly once, whatever the outcome.
//! Delivery is at least once, so handlers must be idempotent.

pub mod processors;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::codec::MessageCodec;
use crate::error::RouterError;
use crate::message::{Acknowledgement, IncomingMessage, MessageType, ReceivedMessage};

/// Decoded message type of a handler.
pub type Decoded<H> = <<H as MessageHandler>::Codec as MessageCodec>::Message;

/// Caller-supplied sender check: `(decoded message, sender node id) -> accept?`
pub type SenderPredicate<M> = Arc<dyn Fn(&M, &str) -> bool + Send + Sync>;

// ============================================================================
// POLICY AND OUTCOMES
// ============================================================================

/// When the router acknowledges a delivery attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Acknowledge once routing finished, whatever the outcome.
    #[default]
    AfterProcessing,
    /// Acknowledge on receipt, so a crashing handler cannot keep the parcel
    /// queued on the relay.
    BeforeProcessing,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The handler processed the message.
    Handled,
    /// Unknown wire tag or no handler for the type.
    Ignored,
    /// The payload did not decode.
    Malformed,
    /// The sender is not the one expected for this message.
    Unauthenticated,
    /// The handler returned an error.
    HandlerFailed,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Business logic for one message type.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Codec: MessageCodec;

    /// Whether `sender_node_id` may send `message` to `recipient_node_id`.
    ///
    /// Sensitive handlers derive the expected sender from the decoded content.
    async fn is_from_expected_sender(
        &self,
        _message: &Decoded<Self>,
        _recipient_node_id: &str,
        _sender_node_id: &str,
    ) -> bool {
        true
    }

    async fn handle_message(
        &self,
        message: Decoded<Self>,
        envelope: &ReceivedMessage,
    ) -> anyhow::Result<()>;
}

#[async_trait]
trait Route: Send + Sync {
    async fn dispatch(&self, envelope: &ReceivedMessage) -> RouteOutcome;
}

struct TypedRoute<H: MessageHandler> {
    handler: H,
    sender_predicate: Option<SenderPredicate<Decoded<H>>>,
}

#[async_trait]
impl<H: MessageHandler> Route for TypedRoute<H> {
    async fn dispatch(&self, envelope: &ReceivedMessage) -> RouteOutcome {
        let message_type = <H::Codec as MessageCodec>::MESSAGE_TYPE;
        let message = match <H::Codec as MessageCodec>::decode(&envelope.content) {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    "Dropping malformed {} parcel {} from {}: {}",
                    message_type, envelope.parcel_id, envelope.sender_node_id, e
                );
                return RouteOutcome::Malformed;
            }
        };

        if let Some(predicate) = &self.sender_predicate {
            if !predicate(&message, &envelope.sender_node_id) {
                warn!(
                    "Dropping {} parcel {}: unexpected sender {}",
                    message_type, envelope.parcel_id, envelope.sender_node_id
                );
                return RouteOutcome::Unauthenticated;
            }
        }
        if !self
            .handler
            .is_from_expected_sender(&message, &envelope.recipient_node_id, &envelope.sender_node_id)
            .await
        {
            warn!(
                "Dropping {} parcel {}: handler rejected sender {}",
                message_type, envelope.parcel_id, envelope.sender_node_id
            );
            return RouteOutcome::Unauthenticated;
        }

        match self.handler.handle_message(message, envelope).await {
            Ok(()) => {
                debug!("Handled {} parcel {}", message_type, envelope.parcel_id);
                RouteOutcome::Handled
            }
            Err(e) => {
                error!(
                    "Handler for {} failed on parcel {}: {:#}",
                    message_type, envelope.parcel_id, e
                );
                RouteOutcome::HandlerFailed
            }
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Dispatch table from message type to handler, fixed at build time.
pub struct MessageRouter {
    routes: HashMap<MessageType, Box<dyn Route>>,
    ack_policy: AckPolicy,
}

impl MessageRouter {
    pub fn builder() -> MessageRouterBuilder {
        MessageRouterBuilder::default()
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    pub fn handles(&self, message_type: MessageType) -> bool {
        self.routes.contains_key(&message_type)
    }

    /// Routes one inbound message and acknowledges it per the ack policy.
    pub async fn route(&self, message: IncomingMessage) -> RouteOutcome {
        let (envelope, ack) = message.into_parts();
        match self.ack_policy {
            AckPolicy::BeforeProcessing => {
                acknowledge(ack, &envelope).await;
                self.dispatch(&envelope).await
            }
            AckPolicy::AfterProcessing => {
                let outcome = self.dispatch(&envelope).await;
                acknowledge(ack, &envelope).await;
                outcome
            }
        }
    }

    async fn dispatch(&self, envelope: &ReceivedMessage) -> RouteOutcome {
        let message_type = match MessageType::from_wire_tag(&envelope.type_tag) {
            Some(message_type) => message_type,
            None => {
                debug!(
                    "Ignoring parcel {} with unknown type '{}'",
                    envelope.parcel_id, envelope.type_tag
                );
                return RouteOutcome::Ignored;
            }
        };
        match self.routes.get(&message_type) {
            Some(route) => route.dispatch(envelope).await,
            None => {
                debug!(
                    "Ignoring {} parcel {}: no handler registered",
                    message_type, envelope.parcel_id
                );
                RouteOutcome::Ignored
            }
        }
    }
}

async fn acknowledge(ack: Acknowledgement, envelope: &ReceivedMessage) {
    if let Err(e) = ack.acknowledge().await {
        warn!("Failed to acknowledge parcel {}: {}", envelope.parcel_id, e);
    }
}

/// Assembles a [`MessageRouter`]. Registering a type twice fails the build.
#[derive(Default)]
pub struct MessageRouterBuilder {
    routes: HashMap<MessageType, Box<dyn Route>>,
    duplicates: Vec<MessageType>,
    ack_policy: AckPolicy,
}

impl MessageRouterBuilder {
    pub fn route<H: MessageHandler>(self, handler: H) -> Self {
        self.insert(TypedRoute {
            handler,
            sender_predicate: None,
        })
    }

    /// Registers `handler` behind an extra sender predicate.
    pub fn route_with_sender_check<H, P>(self, handler: H, predicate: P) -> Self
    where
        H: MessageHandler,
        P: Fn(&Decoded<H>, &str) -> bool + Send + Sync + 'static,
    {
        self.insert(TypedRoute {
            handler,
            sender_predicate: Some(Arc::new(predicate)),
        })
    }

    pub fn ack_policy(mut self, ack_policy: AckPolicy) -> Self {
        self.ack_policy = ack_policy;
        self
    }

    pub fn build(self) -> Result<MessageRouter, RouterError> {
        if let Some(message_type) = self.duplicates.first() {
            return Err(RouterError::DuplicateRoute(*message_type));
        }
        Ok(MessageRouter {
            routes: self.routes,
            ack_policy: self.ack_policy,
        })
    }

    fn insert<H: MessageHandler>(mut self, route: TypedRoute<H>) -> Self {
        let message_type = <H::Codec as MessageCodec>::MESSAGE_TYPE;
        if self.routes.contains_key(&message_type) {
            self.duplicates.push(message_type);
        } else {
            self.routes.insert(message_type, Box::new(route));
        }
        self
    }
}
