//! Built-in message handlers.

use anyhow::Context;
use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::info;

use super::{Decoded, MessageHandler};
use crate::codec::{
    ContactPairingAuthorizationCodec, MessageCodec, VeraIdMemberBundle, VeraIdMemberBundleCodec,
};
use crate::endpoint::Account;
use crate::manager::EndpointManager;
use crate::message::ReceivedMessage;

/// Notified once a contact's authorization has been imported.
#[async_trait]
pub trait PairingListener: Send + Sync + 'static {
    /// `peer_node_id` can now be messaged from `local_node_id`.
    async fn contact_paired(&self, peer_node_id: &str, local_node_id: &str) -> anyhow::Result<()>;
}

/// Completes contact pairing by importing the peer's authorization.
///
/// Re-importing the same authorization is harmless, so redelivery is fine.
pub struct PairingAuthorizationProcessor<L> {
    manager: EndpointManager,
    listener: L,
}

impl<L: PairingListener> PairingAuthorizationProcessor<L> {
    pub fn new(manager: EndpointManager, listener: L) -> Self {
        Self { manager, listener }
    }
}

#[async_trait]
impl<L: PairingListener> MessageHandler for PairingAuthorizationProcessor<L> {
    type Codec = ContactPairingAuthorizationCodec;

    async fn handle_message(
        &self,
        authorization: Vec<u8>,
        envelope: &ReceivedMessage,
    ) -> anyhow::Result<()> {
        let peer_node_id = self
            .manager
            .import_private_third_party_auth(&authorization)
            .await
            .context("Failed to import contact pairing authorization")?;
        info!(
            "Imported pairing authorization from {} for {}",
            peer_node_id, envelope.recipient_node_id
        );
        self.listener
            .contact_paired(&peer_node_id, &envelope.recipient_node_id)
            .await
    }
}

/// Local accounts, and the sink for their VeraId member bundles.
#[async_trait]
pub trait MemberBundleListener: Send + Sync + 'static {
    /// Account whose first-party endpoint is `local_node_id`, if any.
    async fn account_for_endpoint(&self, local_node_id: &str) -> Option<Account>;

    async fn member_bundle_received(
        &self,
        account: &Account,
        bundle: VeraIdMemberBundle,
    ) -> anyhow::Result<()>;
}

/// Accepts a VeraId member bundle only from the receiving account's
/// `veraid_auth_endpoint_id`.
///
/// Bundles addressed to an unknown endpoint, or to an account with no
/// authorization endpoint on record, are rejected as unauthenticated.
pub struct VeraIdMemberBundleProcessor<L> {
    listener: L,
}

impl<L: MemberBundleListener> VeraIdMemberBundleProcessor<L> {
    pub fn new(listener: L) -> Self {
        Self { listener }
    }
}

#[async_trait]
impl<L: MemberBundleListener> MessageHandler for VeraIdMemberBundleProcessor<L> {
    type Codec = VeraIdMemberBundleCodec;

    async fn is_from_expected_sender(
        &self,
        _bundle: &VeraIdMemberBundle,
        recipient_node_id: &str,
        sender_node_id: &str,
    ) -> bool {
        match self.listener.account_for_endpoint(recipient_node_id).await {
            Some(account) => account.veraid_auth_endpoint_id.as_deref() == Some(sender_node_id),
            None => false,
        }
    }

    async fn handle_message(
        &self,
        bundle: VeraIdMemberBundle,
        envelope: &ReceivedMessage,
    ) -> anyhow::Result<()> {
        let account = self
            .listener
            .account_for_endpoint(&envelope.recipient_node_id)
            .await
            .with_context(|| format!("No account owns endpoint {}", envelope.recipient_node_id))?;
        info!(
            "Received VeraId member bundle for {} (key {})",
            account.veraid_id, bundle.member_public_key_id
        );
        self.listener.member_bundle_received(&account, bundle).await
    }
}

/// Logs every decoded message of one type. Used by the daemon for types it
/// has no business logic for.
pub struct LoggingHandler<C> {
    _codec: PhantomData<fn() -> C>,
}

impl<C> LoggingHandler<C> {
    pub fn new() -> Self {
        Self {
            _codec: PhantomData,
        }
    }
}

impl<C> Default for LoggingHandler<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<C> MessageHandler for LoggingHandler<C>
where
    C: MessageCodec + 'static,
    C::Message: Debug,
{
    type Codec = C;

    async fn handle_message(
        &self,
        message: Decoded<Self>,
        envelope: &ReceivedMessage,
    ) -> anyhow::Result<()> {
        info!(
            "Received {} from {}: {:?}",
            C::MESSAGE_TYPE,
            envelope.sender_node_id,
            message
        );
        Ok(())
    }
}
