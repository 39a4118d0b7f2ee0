//! In-process relay gateway.
//!
//! Gives each first-party endpoint a real Ed25519 identity and signs
//! authorizations with it, but delivers parcels inside the process instead of
//! over the relay network. Every sent message is recorded in an outbox, and
//! messages addressed to a local first-party endpoint are also fed back into
//! the receive stream.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use futures::stream::{self, StreamExt};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use super::{GatewayTransport, IncomingStream};
use crate::codec::der::{SequenceWriter, TaggedSequence};
use crate::codec::{ConnectionParams, ConnectionParamsCodec, MessageCodec, SessionKey};
use crate::endpoint::{Endpoint, EndpointKind, EndpointOwner};
use crate::error::{CodecError, GatewayError};
use crate::message::{Acknowledgement, IncomingMessage, OutgoingMessage};

// ============================================================================
// IDENTITY HELPERS
// ============================================================================

/// Node id of an identity key: `0` followed by the hex SHA-256 of the key.
pub fn derive_node_id(public_key: &[u8]) -> String {
    format!("0{}", hex::encode(Sha256::digest(public_key)))
}

/// Generates a fresh Ed25519 identity key.
pub fn generate_signing_key() -> SigningKey {
    let mut rng = rand::rngs::OsRng;
    let mut secret_key_bytes = [0u8; 32];
    rng.fill(&mut secret_key_bytes);
    SigningKey::from_bytes(&secret_key_bytes)
}

/// Builds DER connection parameters for a public endpoint identified by `identity`.
///
/// The loopback relay does not encrypt channels, so the session key is random.
pub fn connection_params_for(
    identity: &SigningKey,
    internet_address: &str,
) -> Result<Vec<u8>, CodecError> {
    let mut rng = rand::rngs::OsRng;
    let mut key_id = [0u8; 8];
    let mut session_public_key = [0u8; 32];
    rng.fill(&mut key_id);
    rng.fill(&mut session_public_key);

    ConnectionParamsCodec::encode(&ConnectionParams {
        internet_address: internet_address.to_string(),
        identity_key: identity.verifying_key().to_bytes().to_vec(),
        session_key: SessionKey {
            key_id: key_id.to_vec(),
            public_key: session_public_key.to_vec(),
        },
    })
}

// ============================================================================
// AUTHORIZATION GRANTS
// ============================================================================

struct Grant {
    grantor_node_id: String,
    grantee_node_id: String,
    grantor_public_key: Vec<u8>,
    signature: Vec<u8>,
}

fn grant_signing_input(grantor_node_id: &str, grantee_node_id: &str) -> Vec<u8> {
    let mut input = Vec::with_capacity(grantor_node_id.len() + grantee_node_id.len() + 1);
    input.extend_from_slice(grantor_node_id.as_bytes());
    input.push(0);
    input.extend_from_slice(grantee_node_id.as_bytes());
    input
}

fn encode_grant(grant: &Grant) -> Result<Vec<u8>, CodecError> {
    Ok(SequenceWriter::new()
        .visible_string("grantor_node_id", &grant.grantor_node_id)?
        .visible_string("grantee_node_id", &grant.grantee_node_id)?
        .octets(&grant.grantor_public_key)
        .octets(&grant.signature)
        .finish())
}

fn decode_grant(bytes: &[u8]) -> Result<Grant, CodecError> {
    let sequence = TaggedSequence::parse(bytes, 4)?;
    Ok(Grant {
        grantor_node_id: sequence.visible_string(0)?,
        grantee_node_id: sequence.visible_string(1)?,
        grantor_public_key: sequence.octets(2)?,
        signature: sequence.octets(3)?,
    })
}

fn verify_grant(grant: &Grant) -> Result<(), GatewayError> {
    let key_bytes: [u8; 32] = grant
        .grantor_public_key
        .as_slice()
        .try_into()
        .map_err(|_| GatewayError::Authorization("grantor key must be 32 bytes".to_string()))?;
    if derive_node_id(&key_bytes) != grant.grantor_node_id {
        return Err(GatewayError::Authorization(
            "grantor key does not match grantor node id".to_string(),
        ));
    }
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| GatewayError::Authorization(format!("invalid grantor key: {}", e)))?;
    let signature_bytes: [u8; 64] = grant
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| GatewayError::Authorization("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&signature_bytes);
    verifying_key
        .verify(
            &grant_signing_input(&grant.grantor_node_id, &grant.grantee_node_id),
            &signature,
        )
        .map_err(|e| GatewayError::Authorization(format!("bad grant signature: {}", e)))
}

// ============================================================================
// LOOPBACK GATEWAY
// ============================================================================

#[derive(Default)]
struct LoopbackState {
    set_up: bool,
    bound: bool,
    first_party: HashMap<String, SigningKey>,
    public_peers: HashSet<String>,
    /// (first-party node id, private third-party node id)
    private_peers: HashSet<(String, String)>,
    sent: Vec<OutgoingMessage>,
}

/// Relay gateway running entirely inside the process.
pub struct LoopbackGateway {
    installed: AtomicBool,
    state: Mutex<LoopbackState>,
    inbound_tx: mpsc::UnboundedSender<IncomingMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
    acknowledged: Arc<AtomicUsize>,
}

impl LoopbackGateway {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            installed: AtomicBool::new(true),
            state: Mutex::new(LoopbackState::default()),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            acknowledged: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Simulates installing or removing the relay app.
    pub fn set_installed(&self, installed: bool) {
        self.installed.store(installed, Ordering::SeqCst);
    }

    /// Every message sent through the gateway, in send order.
    pub async fn sent_messages(&self) -> Vec<OutgoingMessage> {
        self.state.lock().await.sent.clone()
    }

    /// Number of inbound messages acknowledged so far.
    pub fn acknowledged_count(&self) -> usize {
        self.acknowledged.load(Ordering::SeqCst)
    }

    /// Injects an inbound message as if the relay had delivered it.
    pub fn deliver(
        &self,
        type_tag: &str,
        content: Vec<u8>,
        sender_node_id: &str,
        recipient_node_id: &str,
    ) -> Result<Uuid, GatewayError> {
        let parcel_id = Uuid::new_v4();
        let acknowledged = self.acknowledged.clone();
        let message = IncomingMessage::new(
            parcel_id,
            type_tag,
            content,
            sender_node_id,
            recipient_node_id,
            Acknowledgement::new(move || async move {
                acknowledged.fetch_add(1, Ordering::SeqCst);
                debug!("Loopback parcel {} acknowledged", parcel_id);
                Ok(())
            }),
        )?;
        self.inbound_tx
            .send(message)
            .map_err(|_| GatewayError::Receive("inbound channel closed".to_string()))?;
        Ok(parcel_id)
    }

    fn require_bound(state: &LoopbackState) -> Result<(), GatewayError> {
        if !state.bound {
            return Err(GatewayError::Unavailable("gateway not bound".to_string()));
        }
        Ok(())
    }

    fn signing_key<'a>(
        state: &'a LoopbackState,
        node_id: &str,
    ) -> Result<&'a SigningKey, GatewayError> {
        state.first_party.get(node_id).ok_or_else(|| {
            GatewayError::Authorization(format!("unknown first-party endpoint {}", node_id))
        })
    }
}

impl Default for LoopbackGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GatewayTransport for LoopbackGateway {
    async fn set_up(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        state.set_up = true;
        debug!("Loopback gateway set up");
        Ok(())
    }

    async fn bind_gateway(&self) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        if !state.set_up {
            return Err(GatewayError::Unavailable("gateway not set up".to_string()));
        }
        if !self.installed.load(Ordering::SeqCst) {
            return Err(GatewayError::Binding("relay app is not installed".to_string()));
        }
        state.bound = true;
        info!("Loopback gateway bound");
        Ok(())
    }

    async fn register_first_party_endpoint(&self) -> Result<Endpoint, GatewayError> {
        let mut state = self.state.lock().await;
        if !state.set_up {
            return Err(GatewayError::Registration("gateway not set up".to_string()));
        }
        let signing_key = generate_signing_key();
        let node_id = derive_node_id(signing_key.verifying_key().as_bytes());
        state.first_party.insert(node_id.clone(), signing_key);
        debug!("Registered loopback first-party endpoint {}", node_id);
        Ok(Endpoint::first_party(node_id, &EndpointOwner::Unassigned))
    }

    async fn load_first_party_endpoint(
        &self,
        node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError> {
        let state = self.state.lock().await;
        Ok(state
            .first_party
            .contains_key(node_id)
            .then(|| Endpoint::first_party(node_id, &EndpointOwner::Unassigned)))
    }

    async fn import_server_third_party_endpoint(
        &self,
        connection_params: &[u8],
    ) -> Result<Endpoint, GatewayError> {
        let params = ConnectionParamsCodec::decode(connection_params)
            .map_err(|e| GatewayError::MalformedConnectionParams(e.to_string()))?;
        let node_id = derive_node_id(&params.identity_key);
        let mut state = self.state.lock().await;
        state.public_peers.insert(node_id.clone());
        info!(
            "Imported public endpoint {} at {}",
            node_id, params.internet_address
        );
        Ok(Endpoint::public_third_party(node_id))
    }

    async fn load_public_third_party_endpoint(
        &self,
        node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError> {
        let state = self.state.lock().await;
        Ok(state
            .public_peers
            .contains(node_id)
            .then(|| Endpoint::public_third_party(node_id)))
    }

    async fn load_private_third_party_endpoint(
        &self,
        node_id: &str,
        first_party_node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError> {
        let state = self.state.lock().await;
        let key = (first_party_node_id.to_string(), node_id.to_string());
        Ok(state
            .private_peers
            .contains(&key)
            .then(|| Endpoint::private_third_party(node_id, first_party_node_id)))
    }

    async fn import_private_third_party_auth(
        &self,
        authorization: &[u8],
    ) -> Result<Endpoint, GatewayError> {
        let grant = decode_grant(authorization)
            .map_err(|e| GatewayError::Authorization(format!("malformed authorization: {}", e)))?;
        verify_grant(&grant)?;

        let mut state = self.state.lock().await;
        if !state.first_party.contains_key(&grant.grantee_node_id) {
            return Err(GatewayError::Authorization(format!(
                "authorization is for unknown endpoint {}",
                grant.grantee_node_id
            )));
        }
        state
            .private_peers
            .insert((grant.grantee_node_id.clone(), grant.grantor_node_id.clone()));
        Ok(Endpoint::private_third_party(
            grant.grantor_node_id,
            grant.grantee_node_id,
        ))
    }

    async fn receive_messages(&self) -> Result<IncomingStream, GatewayError> {
        let receiver = self
            .inbound_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| GatewayError::Receive("receive stream already taken".to_string()))?;
        let stream = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (Ok(message), receiver))
        });
        Ok(stream.boxed())
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        Self::require_bound(&state)?;
        if !state.first_party.contains_key(&message.sender.node_id) {
            return Err(GatewayError::Send(format!(
                "sender {} is not a registered first-party endpoint",
                message.sender.node_id
            )));
        }
        if message.recipient.kind == EndpointKind::PrivateThirdParty {
            let key = (
                message.sender.node_id.clone(),
                message.recipient.node_id.clone(),
            );
            if !state.private_peers.contains(&key) {
                return Err(GatewayError::Send(format!(
                    "no authorization to reach {}",
                    message.recipient.node_id
                )));
            }
        }

        let local = state.first_party.contains_key(&message.recipient.node_id);
        debug!(
            "Loopback send {} from {} to {} ({})",
            message.message_type,
            message.sender.node_id,
            message.recipient.node_id,
            if local { "local" } else { "outbox" }
        );
        state.sent.push(message.clone());
        drop(state);

        if local {
            self.deliver(
                message.message_type.wire_tag(),
                message.content,
                &message.sender.node_id,
                &message.recipient.node_id,
            )?;
        }
        Ok(())
    }

    async fn authorize_indefinitely(
        &self,
        first_party: &Endpoint,
        third_party: &Endpoint,
    ) -> Result<Vec<u8>, GatewayError> {
        let state = self.state.lock().await;
        let signing_key = Self::signing_key(&state, &first_party.node_id)?;
        let signature = signing_key.sign(&grant_signing_input(
            &first_party.node_id,
            &third_party.node_id,
        ));
        let grant = Grant {
            grantor_node_id: first_party.node_id.clone(),
            grantee_node_id: third_party.node_id.clone(),
            grantor_public_key: signing_key.verifying_key().to_bytes().to_vec(),
            signature: signature.to_bytes().to_vec(),
        };
        encode_grant(&grant).map_err(|e| GatewayError::Authorization(e.to_string()))
    }

    async fn revoke_authorization(
        &self,
        first_party: &Endpoint,
        third_party_node_id: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().await;
        let removed = state
            .private_peers
            .remove(&(first_party.node_id.clone(), third_party_node_id.to_string()));
        debug!(
            "Revoked authorization of {} for {} (was present: {})",
            third_party_node_id, first_party.node_id, removed
        );
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
