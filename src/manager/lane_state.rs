//! State owned by the relay lane and the endpoint resolution built on it.
//!
//! Nothing here is locked: every method runs inside a lane job, so the caches
//! and the transport are only ever touched by one task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection_params::ConnectionParamsSource;
use crate::endpoint::{AuthorizationGrant, Endpoint, EndpointOwner, Recipient};
use crate::error::{EndpointError, GatewayError};
use crate::gateway::GatewayTransport;
use crate::message::{MessageType, OutgoingMessage, Payload};
use crate::store::EndpointStore;

enum ResolvedRecipient<'r> {
    Public(Endpoint),
    /// Node id of a private third party, resolved once the sender is known
    Private(&'r str),
}

pub(crate) struct LaneState {
    pub(super) transport: Arc<dyn GatewayTransport>,
    store: Arc<dyn EndpointStore>,
    connection_params: Arc<dyn ConnectionParamsSource>,
    first_party: HashMap<EndpointOwner, Endpoint>,
    server_endpoint: Option<Endpoint>,
    /// Keyed by (first-party node id, private third-party node id)
    private_peers: HashMap<(String, String), Endpoint>,
    /// Owners whose registered endpoint has not yet sent its bootstrap grant
    pending_bootstrap: HashSet<EndpointOwner>,
}

impl LaneState {
    pub(super) fn new(
        transport: Arc<dyn GatewayTransport>,
        store: Arc<dyn EndpointStore>,
        connection_params: Arc<dyn ConnectionParamsSource>,
    ) -> Self {
        Self {
            transport,
            store,
            connection_params,
            first_party: HashMap::new(),
            server_endpoint: None,
            private_peers: HashMap::new(),
            pending_bootstrap: HashSet::new(),
        }
    }

    // ------------------------------------------------------------------------
    // FIRST PARTY
    // ------------------------------------------------------------------------

    /// Cached or persisted first-party endpoint of `owner`, without registering.
    pub(super) async fn first_party_endpoint(
        &mut self,
        owner: &EndpointOwner,
    ) -> Result<Option<Endpoint>, EndpointError> {
        if let Some(endpoint) = self.first_party.get(owner) {
            return Ok(Some(endpoint.clone()));
        }

        let node_id = match self.store.first_party_node_id(owner).await? {
            Some(node_id) => node_id,
            None => return Ok(None),
        };
        match self.transport.load_first_party_endpoint(&node_id).await? {
            Some(endpoint) => {
                let endpoint = endpoint.owned_by(owner);
                debug!("Loaded first-party endpoint {} for {}", node_id, owner);
                self.first_party.insert(owner.clone(), endpoint.clone());
                Ok(Some(endpoint))
            }
            None => {
                warn!(
                    "Persisted first-party endpoint {} for {} is unknown to the gateway",
                    node_id, owner
                );
                Ok(None)
            }
        }
    }

    /// First-party endpoint of `owner`, registering and persisting one if needed.
    pub(super) async fn resolve_first_party(
        &mut self,
        owner: &EndpointOwner,
    ) -> Result<Endpoint, EndpointError> {
        match self.first_party_endpoint(owner).await? {
            Some(endpoint) => Ok(endpoint),
            None => self.register_first_party(owner).await,
        }
    }

    /// Registers a new first-party endpoint for `owner`.
    ///
    /// The endpoint owes a bootstrap grant to the recipient of its first
    /// successful send; see [`LaneState::send`].
    async fn register_first_party(
        &mut self,
        owner: &EndpointOwner,
    ) -> Result<Endpoint, EndpointError> {
        let endpoint = self
            .transport
            .register_first_party_endpoint()
            .await?
            .owned_by(owner);
        self.store
            .save_first_party_node_id(owner, &endpoint.node_id)
            .await?;
        info!(
            "Registered first-party endpoint {} for {}",
            endpoint.node_id, owner
        );
        self.first_party.insert(owner.clone(), endpoint.clone());
        self.pending_bootstrap.insert(owner.clone());
        Ok(endpoint)
    }

    // ------------------------------------------------------------------------
    // THIRD PARTY
    // ------------------------------------------------------------------------

    /// The server's public endpoint: memory, then store, then a cold import
    /// from the bundled connection parameters. Only an import is persisted.
    pub(super) async fn server_third_party_endpoint(&mut self) -> Result<Endpoint, EndpointError> {
        if let Some(endpoint) = &self.server_endpoint {
            return Ok(endpoint.clone());
        }

        if let Some(node_id) = self.store.server_third_party_node_id().await? {
            match self.transport.load_public_third_party_endpoint(&node_id).await? {
                Some(endpoint) => {
                    debug!("Loaded server endpoint {} from store", node_id);
                    self.server_endpoint = Some(endpoint.clone());
                    return Ok(endpoint);
                }
                None => warn!(
                    "Persisted server endpoint {} is unknown to the gateway, re-importing",
                    node_id
                ),
            }
        }

        let params = self.connection_params.connection_params().await?;
        let endpoint = self
            .transport
            .import_server_third_party_endpoint(&params)
            .await?;
        self.store
            .save_server_third_party_node_id(&endpoint.node_id)
            .await?;
        info!("Imported server endpoint {}", endpoint.node_id);
        self.server_endpoint = Some(endpoint.clone());
        Ok(endpoint)
    }

    async fn private_third_party_endpoint(
        &mut self,
        node_id: &str,
        first_party: &Endpoint,
    ) -> Result<Endpoint, EndpointError> {
        let key = (first_party.node_id.clone(), node_id.to_string());
        if let Some(endpoint) = self.private_peers.get(&key) {
            return Ok(endpoint.clone());
        }
        let endpoint = self
            .transport
            .load_private_third_party_endpoint(node_id, &first_party.node_id)
            .await?
            .ok_or_else(|| EndpointError::ThirdPartyNotFound {
                node_id: node_id.to_string(),
            })?;
        self.private_peers.insert(key, endpoint.clone());
        Ok(endpoint)
    }

    async fn public_third_party_endpoint(&mut self, node_id: &str) -> Result<Endpoint, EndpointError> {
        self.transport
            .load_public_third_party_endpoint(node_id)
            .await?
            .ok_or_else(|| EndpointError::ThirdPartyNotFound {
                node_id: node_id.to_string(),
            })
    }

    /// Resolves what can be resolved without knowing the sender.
    ///
    /// Private third parties are keyed by their first party, so only their
    /// node id is validated here.
    async fn resolve_recipient<'r>(
        &mut self,
        recipient: &'r Recipient,
    ) -> Result<ResolvedRecipient<'r>, EndpointError> {
        match recipient {
            Recipient::Server { node_id: None } => self
                .server_third_party_endpoint()
                .await
                .map(ResolvedRecipient::Public),
            Recipient::Server {
                node_id: Some(node_id),
            }
            | Recipient::PublicThirdParty(node_id) => {
                if node_id.is_empty() {
                    return Err(EndpointError::MissingNodeId);
                }
                self.public_third_party_endpoint(node_id)
                    .await
                    .map(ResolvedRecipient::Public)
            }
            Recipient::PrivateThirdParty(node_id) => {
                if node_id.is_empty() {
                    return Err(EndpointError::MissingNodeId);
                }
                Ok(ResolvedRecipient::Private(node_id))
            }
        }
    }

    // ------------------------------------------------------------------------
    // OPERATIONS
    // ------------------------------------------------------------------------

    /// Resolves both endpoints and sends `payload`. Returns the sender's node id.
    ///
    /// A newly registered endpoint first sends its recipient a grant to reply,
    /// as an `AuthorizeReceivingFromServer` message. The grant stays owed until
    /// it has been sent, so a failed send retries it on the next call.
    pub(super) async fn send(
        &mut self,
        payload: Payload,
        recipient: &Recipient,
        owner: &EndpointOwner,
    ) -> Result<String, EndpointError> {
        let existing = self.first_party_endpoint(owner).await?;
        // Public recipients resolve before anything gets registered
        let resolved = self.resolve_recipient(recipient).await?;
        let sender = match existing {
            Some(endpoint) => endpoint,
            None => self.register_first_party(owner).await?,
        };
        let recipient = match resolved {
            ResolvedRecipient::Public(endpoint) => endpoint,
            ResolvedRecipient::Private(node_id) => {
                self.private_third_party_endpoint(node_id, &sender).await?
            }
        };

        if self.pending_bootstrap.contains(owner) {
            let grant = self
                .transport
                .authorize_indefinitely(&sender, &recipient)
                .await?;
            info!(
                "Sending authorization from new endpoint {} to {}",
                sender.node_id, recipient.node_id
            );
            self.transport
                .send_message(OutgoingMessage::new(
                    Payload::new(MessageType::AuthorizeReceivingFromServer, grant),
                    sender.clone(),
                    recipient.clone(),
                ))
                .await?;
            self.pending_bootstrap.remove(owner);
        }

        debug!(
            "Sending {} from {} to {}",
            payload.message_type, sender.node_id, recipient.node_id
        );
        self.transport
            .send_message(OutgoingMessage::new(payload, sender.clone(), recipient))
            .await?;
        Ok(sender.node_id)
    }

    pub(super) async fn authorize(
        &mut self,
        owner: &EndpointOwner,
        third_party: &Endpoint,
    ) -> Result<AuthorizationGrant, EndpointError> {
        if third_party.node_id.is_empty() {
            return Err(EndpointError::MissingNodeId);
        }
        let first_party = self.resolve_first_party(owner).await?;
        let bytes = self
            .transport
            .authorize_indefinitely(&first_party, third_party)
            .await?;
        info!(
            "Authorized {} to reach {}",
            third_party.node_id, first_party.node_id
        );
        Ok(AuthorizationGrant {
            grantor_node_id: first_party.node_id,
            grantee_node_id: third_party.node_id.clone(),
            bytes,
        })
    }

    pub(super) async fn revoke(
        &mut self,
        owner: &EndpointOwner,
        third_party_node_id: &str,
    ) -> Result<(), EndpointError> {
        if third_party_node_id.is_empty() {
            return Err(EndpointError::MissingNodeId);
        }
        let first_party = self.first_party_endpoint(owner).await?.ok_or_else(|| {
            EndpointError::FirstPartyNotFound {
                node_id: owner.storage_key(),
            }
        })?;
        self.transport
            .revoke_authorization(&first_party, third_party_node_id)
            .await?;
        self.private_peers
            .remove(&(first_party.node_id.clone(), third_party_node_id.to_string()));
        info!(
            "Revoked authorization of {} for {}",
            third_party_node_id, first_party.node_id
        );
        Ok(())
    }

    pub(super) async fn import_private_auth(
        &mut self,
        authorization: &[u8],
    ) -> Result<String, EndpointError> {
        if authorization.is_empty() {
            return Err(GatewayError::Authorization("empty authorization".to_string()).into());
        }
        let endpoint = self
            .transport
            .import_private_third_party_auth(authorization)
            .await?;
        if let Some(first_party_node_id) = &endpoint.paired_node_id {
            self.private_peers.insert(
                (first_party_node_id.clone(), endpoint.node_id.clone()),
                endpoint.clone(),
            );
        }
        Ok(endpoint.node_id)
    }
}
