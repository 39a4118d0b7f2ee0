//! Endpoint Identity Module
//!
//! Types describing cryptographic nodes on the relay network and the accounts
//! that own them.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ENDPOINTS
// ============================================================================

/// Kind of relay network node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    /// Identity owned by this device (one per local account)
    FirstParty,
    /// Remote identity reachable over the Internet (the Letro server)
    PublicThirdParty,
    /// Remote identity of a paired user, reachable only via the relay
    PrivateThirdParty,
}

/// Owner of a first-party endpoint.
///
/// Before an account exists the app still needs a first-party endpoint to
/// request the account from the server; that endpoint is `Unassigned`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointOwner {
    Unassigned,
    Account(String),
}

impl EndpointOwner {
    pub fn from_account(account: Option<&Account>) -> Self {
        match account {
            Some(account) => EndpointOwner::Account(account.id.clone()),
            None => EndpointOwner::Unassigned,
        }
    }

    /// Storage key for this owner's first-party node id.
    pub fn storage_key(&self) -> String {
        match self {
            EndpointOwner::Unassigned => "server".to_string(),
            EndpointOwner::Account(id) => format!("account:{}", id),
        }
    }
}

impl fmt::Display for EndpointOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointOwner::Unassigned => write!(f, "unassigned"),
            EndpointOwner::Account(id) => write!(f, "account {}", id),
        }
    }
}

/// A node on the relay network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Node identifier derived from the endpoint's identity key
    pub node_id: String,
    pub kind: EndpointKind,
    /// Owning account of a first-party endpoint (if any)
    pub account_id: Option<String>,
    /// Node id of the first-party endpoint a private third party is paired with
    pub paired_node_id: Option<String>,
}

impl Endpoint {
    pub fn first_party(node_id: impl Into<String>, owner: &EndpointOwner) -> Self {
        let account_id = match owner {
            EndpointOwner::Account(id) => Some(id.clone()),
            EndpointOwner::Unassigned => None,
        };
        Self {
            node_id: node_id.into(),
            kind: EndpointKind::FirstParty,
            account_id,
            paired_node_id: None,
        }
    }

    pub fn public_third_party(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            kind: EndpointKind::PublicThirdParty,
            account_id: None,
            paired_node_id: None,
        }
    }

    pub fn private_third_party(
        node_id: impl Into<String>,
        paired_node_id: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            kind: EndpointKind::PrivateThirdParty,
            account_id: None,
            paired_node_id: Some(paired_node_id.into()),
        }
    }

    /// Same endpoint, attributed to `owner`.
    pub fn owned_by(mut self, owner: &EndpointOwner) -> Self {
        self.account_id = match owner {
            EndpointOwner::Account(id) => Some(id.clone()),
            EndpointOwner::Unassigned => None,
        };
        self
    }

    pub fn is_first_party(&self) -> bool {
        self.kind == EndpointKind::FirstParty
    }

    pub fn is_third_party(&self) -> bool {
        !self.is_first_party()
    }
}

// ============================================================================
// ACCOUNTS AND RECIPIENTS
// ============================================================================

/// Local account as seen by the endpoint core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Local account identifier
    pub id: String,
    /// VeraId identifier (e.g. "alice@example.com")
    pub veraid_id: String,
    /// Node id of the endpoint allowed to send this account its VeraId
    /// member bundle, if one has been registered
    #[serde(default)]
    pub veraid_auth_endpoint_id: Option<String>,
}

impl Account {
    pub fn new(id: impl Into<String>, veraid_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            veraid_id: veraid_id.into(),
            veraid_auth_endpoint_id: None,
        }
    }
}

/// Where an outgoing message should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// The Letro server. Without a node id, the bundled server endpoint is used.
    Server { node_id: Option<String> },
    PublicThirdParty(String),
    PrivateThirdParty(String),
}

impl Recipient {
    pub fn server() -> Self {
        Recipient::Server { node_id: None }
    }
}

// ============================================================================
// AUTHORIZATION GRANTS
// ============================================================================

/// Parcel Delivery Authorization issued by a first-party endpoint, letting a
/// third party send messages to it indefinitely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub grantor_node_id: String,
    pub grantee_node_id: String,
    /// Serialized authorization as produced by the transport
    pub bytes: Vec<u8>,
}
