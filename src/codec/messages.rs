//! Letro message schemas.
//!
//! Field `n` of each schema is carried under implicit tag `[n]`.

use crate::codec::der::{SequenceWriter, TaggedSequence};
use crate::codec::{normalize_locale, MessageCodec};
use crate::error::CodecError;
use crate::message::MessageType;

// ============================================================================
// ACCOUNT CREATION
// ============================================================================

/// Request sent to the server to create a VeraId-backed account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCreationRequest {
    pub user_name: String,
    pub locale: String,
    /// Public key of the VeraId member key pair (DER SubjectPublicKeyInfo)
    pub public_key: Vec<u8>,
}

pub struct AccountCreationRequestCodec;

impl MessageCodec for AccountCreationRequestCodec {
    type Message = AccountCreationRequest;
    const MESSAGE_TYPE: MessageType = MessageType::AccountCreationRequest;

    fn encode(message: &AccountCreationRequest) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .utf8_string(&message.user_name)
            .visible_string("locale", &normalize_locale(&message.locale))?
            .octets(&message.public_key)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<AccountCreationRequest, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 3)?;
        Ok(AccountCreationRequest {
            user_name: sequence.utf8_string(0)?,
            locale: sequence.visible_string(1)?,
            public_key: sequence.octets(2)?,
        })
    }
}

/// Server confirmation that an account was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCreation {
    pub requested_user_name: String,
    pub locale: String,
    /// VeraId id assigned by the server (may differ from the requested one)
    pub assigned_user_id: String,
    pub veraid_bundle: Vec<u8>,
}

pub struct AccountCreationCodec;

impl MessageCodec for AccountCreationCodec {
    type Message = AccountCreation;
    const MESSAGE_TYPE: MessageType = MessageType::AccountCreation;

    fn encode(message: &AccountCreation) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .utf8_string(&message.requested_user_name)
            .visible_string("locale", &normalize_locale(&message.locale))?
            .utf8_string(&message.assigned_user_id)
            .octets(&message.veraid_bundle)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<AccountCreation, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 4)?;
        Ok(AccountCreation {
            requested_user_name: sequence.utf8_string(0)?,
            locale: sequence.visible_string(1)?,
            assigned_user_id: sequence.utf8_string(2)?,
            veraid_bundle: sequence.octets(3)?,
        })
    }
}

// ============================================================================
// CONTACT PAIRING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactPairingRequest {
    pub requester_veraid_id: String,
    pub contact_veraid_id: String,
    pub requester_endpoint_public_key: Vec<u8>,
}

pub struct ContactPairingRequestCodec;

impl MessageCodec for ContactPairingRequestCodec {
    type Message = ContactPairingRequest;
    const MESSAGE_TYPE: MessageType = MessageType::ContactPairingRequest;

    fn encode(message: &ContactPairingRequest) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .utf8_string(&message.requester_veraid_id)
            .utf8_string(&message.contact_veraid_id)
            .octets(&message.requester_endpoint_public_key)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<ContactPairingRequest, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 3)?;
        Ok(ContactPairingRequest {
            requester_veraid_id: sequence.utf8_string(0)?,
            contact_veraid_id: sequence.utf8_string(1)?,
            requester_endpoint_public_key: sequence.octets(2)?,
        })
    }
}

/// Sent by the server once both sides of a pairing have requested each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactPairingMatch {
    pub requester_veraid_id: String,
    pub contact_veraid_id: String,
    pub contact_endpoint_id: String,
    pub contact_endpoint_public_key: Vec<u8>,
}

pub struct ContactPairingMatchCodec;

impl MessageCodec for ContactPairingMatchCodec {
    type Message = ContactPairingMatch;
    const MESSAGE_TYPE: MessageType = MessageType::ContactPairingMatch;

    fn encode(message: &ContactPairingMatch) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .utf8_string(&message.requester_veraid_id)
            .utf8_string(&message.contact_veraid_id)
            .visible_string("contact_endpoint_id", &message.contact_endpoint_id)?
            .octets(&message.contact_endpoint_public_key)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<ContactPairingMatch, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 4)?;
        Ok(ContactPairingMatch {
            requester_veraid_id: sequence.utf8_string(0)?,
            contact_veraid_id: sequence.utf8_string(1)?,
            contact_endpoint_id: sequence.visible_string(2)?,
            contact_endpoint_public_key: sequence.octets(3)?,
        })
    }
}

// ============================================================================
// RAW AUTHORIZATIONS
// ============================================================================

fn raw_payload(bytes: &[u8], what: &str) -> Result<Vec<u8>, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Malformed(format!("empty {}", what)));
    }
    Ok(bytes.to_vec())
}

/// Authorization issued by a paired contact, forwarded verbatim.
pub struct ContactPairingAuthorizationCodec;

impl MessageCodec for ContactPairingAuthorizationCodec {
    type Message = Vec<u8>;
    const MESSAGE_TYPE: MessageType = MessageType::ContactPairingAuthorization;

    fn encode(message: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        raw_payload(message, "contact pairing authorization")
    }

    fn decode(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        raw_payload(bytes, "contact pairing authorization")
    }
}

/// Parcel Delivery Authorization path letting the server reach a new endpoint.
pub struct PdaPathCodec;

impl MessageCodec for PdaPathCodec {
    type Message = Vec<u8>;
    const MESSAGE_TYPE: MessageType = MessageType::AuthorizeReceivingFromServer;

    fn encode(message: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        raw_payload(message, "authorization path")
    }

    fn decode(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        raw_payload(bytes, "authorization path")
    }
}

// ============================================================================
// CONNECTION PARAMETERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub key_id: Vec<u8>,
    pub public_key: Vec<u8>,
}

/// Parameters needed to reach a public endpoint, as bundled with the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub internet_address: String,
    pub identity_key: Vec<u8>,
    pub session_key: SessionKey,
}

pub struct ConnectionParamsCodec;

impl MessageCodec for ConnectionParamsCodec {
    type Message = ConnectionParams;
    const MESSAGE_TYPE: MessageType = MessageType::ConnectionParams;

    fn encode(message: &ConnectionParams) -> Result<Vec<u8>, CodecError> {
        let session_key = SequenceWriter::new()
            .octets(&message.session_key.key_id)
            .octets(&message.session_key.public_key);
        Ok(SequenceWriter::new()
            .visible_string("internet_address", &message.internet_address)?
            .octets(&message.identity_key)
            .sequence(session_key)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<ConnectionParams, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 3)?;
        let session_key = sequence.sequence(2, 2)?;
        Ok(ConnectionParams {
            internet_address: sequence.visible_string(0)?,
            identity_key: sequence.octets(1)?,
            session_key: SessionKey {
                key_id: session_key.octets(0)?,
                public_key: session_key.octets(1)?,
            },
        })
    }
}

// ============================================================================
// VERAID MEMBERSHIP
// ============================================================================

/// Request to import a member public key into a VeraId organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPublicKeyImport {
    pub user_name: String,
    pub org_name: String,
    pub public_key: Vec<u8>,
}

pub struct MemberPublicKeyImportCodec;

impl MessageCodec for MemberPublicKeyImportCodec {
    type Message = MemberPublicKeyImport;
    const MESSAGE_TYPE: MessageType = MessageType::MemberPublicKeyImport;

    fn encode(message: &MemberPublicKeyImport) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .utf8_string(&message.user_name)
            .visible_string("org_name", &message.org_name)?
            .octets(&message.public_key)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<MemberPublicKeyImport, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 3)?;
        Ok(MemberPublicKeyImport {
            user_name: sequence.utf8_string(0)?,
            org_name: sequence.visible_string(1)?,
            public_key: sequence.octets(2)?,
        })
    }
}

/// VeraId member bundle for a previously imported public key.
///
/// Only the account's registered VeraId authentication endpoint may send it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VeraIdMemberBundle {
    pub member_public_key_id: String,
    pub bundle: Vec<u8>,
}

pub struct VeraIdMemberBundleCodec;

impl MessageCodec for VeraIdMemberBundleCodec {
    type Message = VeraIdMemberBundle;
    const MESSAGE_TYPE: MessageType = MessageType::VeraIdMemberBundle;

    fn encode(message: &VeraIdMemberBundle) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .visible_string("member_public_key_id", &message.member_public_key_id)?
            .octets(&message.bundle)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<VeraIdMemberBundle, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 2)?;
        Ok(VeraIdMemberBundle {
            member_public_key_id: sequence.visible_string(0)?,
            bundle: sequence.octets(1)?,
        })
    }
}

/// The server could not reach the Awala Internet endpoint of a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MisconfiguredInternetEndpoint {
    pub internet_domain: String,
}

pub struct MisconfiguredInternetEndpointCodec;

impl MessageCodec for MisconfiguredInternetEndpointCodec {
    type Message = MisconfiguredInternetEndpoint;
    const MESSAGE_TYPE: MessageType = MessageType::MisconfiguredInternetEndpoint;

    fn encode(message: &MisconfiguredInternetEndpoint) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .visible_string("internet_domain", &message.internet_domain)?
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<MisconfiguredInternetEndpoint, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 1)?;
        Ok(MisconfiguredInternetEndpoint {
            internet_domain: sequence.visible_string(0)?,
        })
    }
}

// ============================================================================
// CONVERSATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub conversation_id: String,
    pub sender_veraid_id: String,
    pub recipient_veraid_id: String,
    pub subject: Option<String>,
    pub message_text: String,
}

pub struct NewConversationCodec;

impl MessageCodec for NewConversationCodec {
    type Message = NewConversation;
    const MESSAGE_TYPE: MessageType = MessageType::NewConversation;

    fn encode(message: &NewConversation) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .visible_string("conversation_id", &message.conversation_id)?
            .utf8_string(&message.sender_veraid_id)
            .utf8_string(&message.recipient_veraid_id)
            .optional_utf8_string(message.subject.as_deref())
            .utf8_string(&message.message_text)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<NewConversation, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 4)?;
        Ok(NewConversation {
            conversation_id: sequence.visible_string(0)?,
            sender_veraid_id: sequence.utf8_string(1)?,
            recipient_veraid_id: sequence.utf8_string(2)?,
            subject: sequence.optional_utf8_string(3)?,
            message_text: sequence.utf8_string(4)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_veraid_id: String,
    pub recipient_veraid_id: String,
    pub message_text: String,
}

pub struct NewMessageCodec;

impl MessageCodec for NewMessageCodec {
    type Message = NewMessage;
    const MESSAGE_TYPE: MessageType = MessageType::NewMessage;

    fn encode(message: &NewMessage) -> Result<Vec<u8>, CodecError> {
        Ok(SequenceWriter::new()
            .visible_string("conversation_id", &message.conversation_id)?
            .utf8_string(&message.sender_veraid_id)
            .utf8_string(&message.recipient_veraid_id)
            .utf8_string(&message.message_text)
            .finish())
    }

    fn decode(bytes: &[u8]) -> Result<NewMessage, CodecError> {
        let sequence = TaggedSequence::parse(bytes, 4)?;
        Ok(NewMessage {
            conversation_id: sequence.visible_string(0)?,
            sender_veraid_id: sequence.utf8_string(1)?,
            recipient_veraid_id: sequence.utf8_string(2)?,
            message_text: sequence.utf8_string(3)?,
        })
    }
}
