//! Shared test helpers
//!
//! This module provides helpers used by the integration tests.
//!
//! The module is organized into several categories:
//! - **Constants**: Dummy node ids, account ids and connection parameters
//! - **Recording Gateway**: A scripted `GatewayTransport` that records every call
//! - **Builders**: Functions to create managers and incoming messages

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use letro_core::codec::{ConnectionParams, ConnectionParamsCodec, MessageCodec, SessionKey};
use letro_core::connection_params::StaticConnectionParams;
use letro_core::gateway::IncomingStream;
use letro_core::message::Acknowledgement;
use letro_core::{
    Account, Endpoint, EndpointManager, EndpointOwner, GatewayError, GatewayTransport,
    InMemoryEndpointStore, IncomingMessage, ManagerConfig, MessageType, OutgoingMessage,
};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Internet address of the dummy server
pub const DUMMY_SERVER_ADDRESS: &str = "letro.example";

/// Node id the recording gateway assigns to the dummy server on import
pub const DUMMY_IMPORTED_SERVER_NODE_ID: &str = "srv-letro.example";

/// Node id of a private peer known to the gateway
pub const DUMMY_PEER_NODE_ID: &str = "peer-1";

/// Dummy local account id
pub const DUMMY_ACCOUNT_ID: &str = "account-1";

/// Dummy VeraId id
pub const DUMMY_VERAID_ID: &str = "alice@example.com";

pub fn dummy_account() -> Account {
    Account::new(DUMMY_ACCOUNT_ID, DUMMY_VERAID_ID)
}

pub fn dummy_connection_params() -> Vec<u8> {
    ConnectionParamsCodec::encode(&ConnectionParams {
        internet_address: DUMMY_SERVER_ADDRESS.to_string(),
        identity_key: vec![7; 32],
        session_key: SessionKey {
            key_id: vec![1, 2, 3, 4],
            public_key: vec![9; 32],
        },
    })
    .unwrap()
}

// ============================================================================
// RECORDING GATEWAY
// ============================================================================

/// One call made to the recording gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    SetUp,
    BindGateway,
    RegisterFirstParty,
    LoadFirstParty(String),
    ImportServer,
    LoadPublic(String),
    LoadPrivate { node_id: String, first_party: String },
    ImportPrivateAuth,
    Receive,
    Send {
        message_type: MessageType,
        sender: String,
        recipient: String,
    },
    Authorize { first_party: String, third_party: String },
    Revoke { first_party: String, third_party: String },
}

/// Scripted gateway that records every call.
///
/// Authorizations it issues are the UTF-8 text `grantor:grantee`, and it
/// imports the same format.
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    sent: Mutex<Vec<OutgoingMessage>>,
    next_node: AtomicUsize,
    first_parties: Mutex<HashSet<String>>,
    public_peers: Mutex<HashSet<String>>,
    private_peers: Mutex<HashSet<String>>,
    set_up_failure: Mutex<Option<GatewayError>>,
    bind_failure: Mutex<Option<GatewayError>>,
    send_failure: Mutex<Option<GatewayError>>,
    inbound_tx: mpsc::UnboundedSender<IncomingMessage>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<IncomingMessage>>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            calls: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            next_node: AtomicUsize::new(1),
            first_parties: Mutex::new(HashSet::new()),
            public_peers: Mutex::new(HashSet::new()),
            private_peers: Mutex::new(HashSet::new()),
            set_up_failure: Mutex::new(None),
            bind_failure: Mutex::new(None),
            send_failure: Mutex::new(None),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
        }
    }

    pub fn with_first_party(self, node_id: &str) -> Self {
        self.first_parties.lock().unwrap().insert(node_id.to_string());
        self
    }

    pub fn with_public_peer(self, node_id: &str) -> Self {
        self.public_peers.lock().unwrap().insert(node_id.to_string());
        self
    }

    pub fn with_private_peer(self, node_id: &str) -> Self {
        self.private_peers.lock().unwrap().insert(node_id.to_string());
        self
    }

    pub fn fail_set_up(&self, failure: Option<GatewayError>) {
        *self.set_up_failure.lock().unwrap() = failure;
    }

    pub fn fail_bind(&self, failure: Option<GatewayError>) {
        *self.bind_failure.lock().unwrap() = failure;
    }

    pub fn fail_send(&self, failure: Option<GatewayError>) {
        *self.send_failure.lock().unwrap() = failure;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&GatewayCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| matches(call)).count()
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Queues an inbound message on the receive stream.
    pub fn deliver(&self, message: IncomingMessage) {
        self.inbound_tx.send(message).unwrap();
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GatewayTransport for RecordingGateway {
    async fn set_up(&self) -> Result<(), GatewayError> {
        self.record(GatewayCall::SetUp);
        match self.set_up_failure.lock().unwrap().clone() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn bind_gateway(&self) -> Result<(), GatewayError> {
        self.record(GatewayCall::BindGateway);
        match self.bind_failure.lock().unwrap().clone() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }

    async fn register_first_party_endpoint(&self) -> Result<Endpoint, GatewayError> {
        self.record(GatewayCall::RegisterFirstParty);
        let node_id = format!("fp-{}", self.next_node.fetch_add(1, Ordering::SeqCst));
        self.first_parties.lock().unwrap().insert(node_id.clone());
        Ok(Endpoint::first_party(node_id, &EndpointOwner::Unassigned))
    }

    async fn load_first_party_endpoint(
        &self,
        node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError> {
        self.record(GatewayCall::LoadFirstParty(node_id.to_string()));
        Ok(self
            .first_parties
            .lock()
            .unwrap()
            .contains(node_id)
            .then(|| Endpoint::first_party(node_id, &EndpointOwner::Unassigned)))
    }

    async fn import_server_third_party_endpoint(
        &self,
        connection_params: &[u8],
    ) -> Result<Endpoint, GatewayError> {
        self.record(GatewayCall::ImportServer);
        let params = ConnectionParamsCodec::decode(connection_params)
            .map_err(|e| GatewayError::MalformedConnectionParams(e.to_string()))?;
        let node_id = format!("srv-{}", params.internet_address);
        self.public_peers.lock().unwrap().insert(node_id.clone());
        Ok(Endpoint::public_third_party(node_id))
    }

    async fn load_public_third_party_endpoint(
        &self,
        node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError> {
        self.record(GatewayCall::LoadPublic(node_id.to_string()));
        Ok(self
            .public_peers
            .lock()
            .unwrap()
            .contains(node_id)
            .then(|| Endpoint::public_third_party(node_id)))
    }

    async fn load_private_third_party_endpoint(
        &self,
        node_id: &str,
        first_party_node_id: &str,
    ) -> Result<Option<Endpoint>, GatewayError> {
        self.record(GatewayCall::LoadPrivate {
            node_id: node_id.to_string(),
            first_party: first_party_node_id.to_string(),
        });
        Ok(self
            .private_peers
            .lock()
            .unwrap()
            .contains(node_id)
            .then(|| Endpoint::private_third_party(node_id, first_party_node_id)))
    }

    async fn import_private_third_party_auth(
        &self,
        authorization: &[u8],
    ) -> Result<Endpoint, GatewayError> {
        self.record(GatewayCall::ImportPrivateAuth);
        let text = std::str::from_utf8(authorization)
            .map_err(|e| GatewayError::Authorization(e.to_string()))?;
        let (grantor, grantee) = text
            .split_once(':')
            .ok_or_else(|| GatewayError::Authorization("not a test grant".to_string()))?;
        self.private_peers.lock().unwrap().insert(grantor.to_string());
        Ok(Endpoint::private_third_party(grantor, grantee))
    }

    async fn receive_messages(&self) -> Result<IncomingStream, GatewayError> {
        self.record(GatewayCall::Receive);
        let receiver = self
            .inbound_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| GatewayError::Receive("already receiving".to_string()))?;
        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (Ok(message), receiver))
        })
        .boxed())
    }

    async fn send_message(&self, message: OutgoingMessage) -> Result<(), GatewayError> {
        self.record(GatewayCall::Send {
            message_type: message.message_type,
            sender: message.sender.node_id.clone(),
            recipient: message.recipient.node_id.clone(),
        });
        if let Some(failure) = self.send_failure.lock().unwrap().clone() {
            return Err(failure);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn authorize_indefinitely(
        &self,
        first_party: &Endpoint,
        third_party: &Endpoint,
    ) -> Result<Vec<u8>, GatewayError> {
        self.record(GatewayCall::Authorize {
            first_party: first_party.node_id.clone(),
            third_party: third_party.node_id.clone(),
        });
        Ok(format!("{}:{}", first_party.node_id, third_party.node_id).into_bytes())
    }

    async fn revoke_authorization(
        &self,
        first_party: &Endpoint,
        third_party_node_id: &str,
    ) -> Result<(), GatewayError> {
        self.record(GatewayCall::Revoke {
            first_party: first_party.node_id.clone(),
            third_party: third_party_node_id.to_string(),
        });
        self.private_peers.lock().unwrap().remove(third_party_node_id);
        Ok(())
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

pub fn build_manager(
    gateway: Arc<RecordingGateway>,
    store: Arc<InMemoryEndpointStore>,
) -> EndpointManager {
    EndpointManager::new(
        gateway,
        store,
        Arc::new(StaticConnectionParams::new(dummy_connection_params())),
        ManagerConfig::default(),
    )
}

/// Manager over a fresh recording gateway and an empty in-memory store.
pub fn build_test_manager() -> (EndpointManager, Arc<RecordingGateway>, Arc<InMemoryEndpointStore>) {
    let gateway = Arc::new(RecordingGateway::new().with_private_peer(DUMMY_PEER_NODE_ID));
    let store = Arc::new(InMemoryEndpointStore::new());
    (build_manager(gateway.clone(), store.clone()), gateway, store)
}

/// Incoming message whose acknowledgement increments `acks`.
pub fn incoming(
    type_tag: &str,
    content: Vec<u8>,
    sender_node_id: &str,
    recipient_node_id: &str,
    acks: Arc<AtomicUsize>,
) -> IncomingMessage {
    IncomingMessage::new(
        Uuid::new_v4(),
        type_tag,
        content,
        sender_node_id,
        recipient_node_id,
        Acknowledgement::new(move || async move {
            acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    )
    .unwrap()
}
