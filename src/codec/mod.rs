//! Message Codec Module
//!
//! One codec per [`MessageType`]. Codecs turn domain objects into DER payloads
//! and back; a decode failure is always a [`CodecError::Malformed`], never a
//! panic, so the router can drop the payload and move on.

pub mod der;
pub mod messages;

use crate::error::CodecError;
use crate::message::MessageType;

pub use messages::{
    AccountCreation, AccountCreationCodec, AccountCreationRequest, AccountCreationRequestCodec,
    ConnectionParams, ConnectionParamsCodec, ContactPairingAuthorizationCodec, ContactPairingMatch,
    ContactPairingMatchCodec, ContactPairingRequest, ContactPairingRequestCodec,
    MemberPublicKeyImport, MemberPublicKeyImportCodec, MisconfiguredInternetEndpoint,
    MisconfiguredInternetEndpointCodec, NewConversation, NewConversationCodec, NewMessage,
    NewMessageCodec, PdaPathCodec, SessionKey, VeraIdMemberBundle, VeraIdMemberBundleCodec,
};

/// Encoder/decoder for one message type's wire format.
pub trait MessageCodec {
    /// Domain object carried by this message type
    type Message: Send + Sync + 'static;

    const MESSAGE_TYPE: MessageType;

    fn encode(message: &Self::Message) -> Result<Vec<u8>, CodecError>;

    fn decode(bytes: &[u8]) -> Result<Self::Message, CodecError>;
}

/// Normalizes a locale tag to lowercase `language-country` form.
///
/// `en_GB`, `en-GB` and `EN-gb` all become `en-gb`; a bare language stays as is.
pub fn normalize_locale(locale: &str) -> String {
    locale
        .trim()
        .split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_locale() {
        assert_eq!(normalize_locale("en_GB"), "en-gb");
        assert_eq!(normalize_locale("EN-gb"), "en-gb");
        assert_eq!(normalize_locale("es"), "es");
        assert_eq!(normalize_locale(" pt_BR "), "pt-br");
        assert_eq!(normalize_locale(""), "");
    }
}
