//! Tests for inbound message routing, sender checks and acknowledgement.

mod helpers;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use helpers::incoming;
use letro_core::codec::{
    AccountCreation, AccountCreationCodec, MessageCodec, VeraIdMemberBundle,
    VeraIdMemberBundleCodec,
};
use letro_core::router::processors::{MemberBundleListener, VeraIdMemberBundleProcessor};
use letro_core::{
    Account, AckPolicy, MessageHandler, MessageRouter, MessageType, ReceivedMessage, RouteOutcome,
    RouterError,
};

const SERVER_NODE_ID: &str = "srv-1";
const LOCAL_NODE_ID: &str = "fp-1";
const VERAID_AUTH_NODE_ID: &str = "veraid-auth-1";

/// Records handled account creations and the ack count seen at handling time.
#[derive(Clone, Default)]
struct AccountCreationRecorder {
    handled: Arc<Mutex<Vec<AccountCreation>>>,
    acks_at_handling: Arc<Mutex<Vec<usize>>>,
    acks: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl MessageHandler for AccountCreationRecorder {
    type Codec = AccountCreationCodec;

    async fn handle_message(
        &self,
        message: AccountCreation,
        _envelope: &ReceivedMessage,
    ) -> anyhow::Result<()> {
        self.acks_at_handling
            .lock()
            .unwrap()
            .push(self.acks.load(Ordering::SeqCst));
        self.handled.lock().unwrap().push(message);
        if self.fail {
            anyhow::bail!("storage unavailable");
        }
        Ok(())
    }
}

/// Accepts VeraId bundles only from the account's registered auth endpoint.
#[derive(Clone, Default)]
struct BundleImporter {
    imported: Arc<Mutex<Vec<VeraIdMemberBundle>>>,
}

#[async_trait]
impl MessageHandler for BundleImporter {
    type Codec = VeraIdMemberBundleCodec;

    async fn is_from_expected_sender(
        &self,
        _message: &VeraIdMemberBundle,
        _recipient_node_id: &str,
        sender_node_id: &str,
    ) -> bool {
        sender_node_id == VERAID_AUTH_NODE_ID
    }

    async fn handle_message(
        &self,
        message: VeraIdMemberBundle,
        _envelope: &ReceivedMessage,
    ) -> anyhow::Result<()> {
        self.imported.lock().unwrap().push(message);
        Ok(())
    }
}

fn account_creation() -> AccountCreation {
    AccountCreation {
        requested_user_name: "alice".to_string(),
        locale: "en-gb".to_string(),
        assigned_user_id: "alice@example.com".to_string(),
        veraid_bundle: vec![1, 2, 3],
    }
}

fn bundle() -> VeraIdMemberBundle {
    VeraIdMemberBundle {
        member_public_key_id: "key-1".to_string(),
        bundle: vec![4, 5, 6],
    }
}

fn account_creation_router(recorder: &AccountCreationRecorder, policy: AckPolicy) -> MessageRouter {
    MessageRouter::builder()
        .ack_policy(policy)
        .route(recorder.clone())
        .build()
        .unwrap()
}

// ============================================================================
// DECODING
// ============================================================================

/// 1. Test: Valid Message Is Handled And Acknowledged
/// Verifies that a well-formed message reaches its handler and is acknowledged once.
/// Why: This is the normal inbound path.
#[tokio::test]
async fn test_valid_message_is_handled_and_acknowledged() {
    let recorder = AccountCreationRecorder::default();
    let router = account_creation_router(&recorder, AckPolicy::AfterProcessing);
    let content = AccountCreationCodec::encode(&account_creation()).unwrap();

    let outcome = router
        .route(incoming(
            MessageType::AccountCreation.wire_tag(),
            content,
            SERVER_NODE_ID,
            LOCAL_NODE_ID,
            recorder.acks.clone(),
        ))
        .await;

    assert_eq!(outcome, RouteOutcome::Handled);
    assert_eq!(*recorder.handled.lock().unwrap(), vec![account_creation()]);
    assert_eq!(recorder.acks.load(Ordering::SeqCst), 1);
}

/// 2. Test: Malformed Account Creation Is Dropped
/// Verifies that a single zero byte declared as AccountCreation is dropped
/// without calling the handler, and still acknowledged.
/// Why: The relay cannot redeliver a corrected payload; retrying is pointless.
#[tokio::test]
async fn test_malformed_account_creation_is_dropped() {
    let recorder = AccountCreationRecorder::default();
    let router = account_creation_router(&recorder, AckPolicy::AfterProcessing);

    let outcome = router
        .route(incoming(
            MessageType::AccountCreation.wire_tag(),
            vec![0x00],
            SERVER_NODE_ID,
            LOCAL_NODE_ID,
            recorder.acks.clone(),
        ))
        .await;

    assert_eq!(outcome, RouteOutcome::Malformed);
    assert!(recorder.handled.lock().unwrap().is_empty());
    assert_eq!(recorder.acks.load(Ordering::SeqCst), 1);
}

/// 3. Test: Malformed Payloads Never Reach Handlers
/// Verifies a set of broken encodings, including truncated and oversized ones.
/// Why: Decoding must fail closed for any input, not just obvious garbage.
#[tokio::test]
async fn test_malformed_payloads_never_reach_handlers() {
    let recorder = AccountCreationRecorder::default();
    let router = account_creation_router(&recorder, AckPolicy::AfterProcessing);
    let valid = AccountCreationCodec::encode(&account_creation()).unwrap();

    let mut with_trailing_byte = valid.clone();
    with_trailing_byte.push(0x00);
    let truncated = valid[..valid.len() - 1].to_vec();
    let too_few_fields = vec![0x30, 0x03, 0x80, 0x01, b'a'];

    let payloads = vec![
        vec![],
        vec![0x30],
        vec![0x30, 0x80, 0x00, 0x00],
        with_trailing_byte,
        truncated,
        too_few_fields,
    ];
    let count = payloads.len();
    for payload in payloads {
        let outcome = router
            .route(incoming(
                MessageType::AccountCreation.wire_tag(),
                payload,
                SERVER_NODE_ID,
                LOCAL_NODE_ID,
                recorder.acks.clone(),
            ))
            .await;
        assert_eq!(outcome, RouteOutcome::Malformed);
    }

    assert!(recorder.handled.lock().unwrap().is_empty());
    assert_eq!(recorder.acks.load(Ordering::SeqCst), count);
}

// ============================================================================
// SENDER CHECKS
// ============================================================================

/// 4. Test: Handler Sender Check Blocks Spoofed Bundle
/// Verifies that a VeraId bundle from an unexpected sender is dropped silently.
/// Why: Importing a bundle from anyone would let them impersonate the account.
#[tokio::test]
async fn test_handler_sender_check_blocks_spoofed_bundle() {
    let importer = BundleImporter::default();
    let router = MessageRouter::builder()
        .route(importer.clone())
        .build()
        .unwrap();
    let acks = Arc::new(AtomicUsize::new(0));
    let content = VeraIdMemberBundleCodec::encode(&bundle()).unwrap();

    let spoofed = router
        .route(incoming(
            MessageType::VeraIdMemberBundle.wire_tag(),
            content.clone(),
            "attacker",
            LOCAL_NODE_ID,
            acks.clone(),
        ))
        .await;
    assert_eq!(spoofed, RouteOutcome::Unauthenticated);
    assert!(importer.imported.lock().unwrap().is_empty());

    let genuine = router
        .route(incoming(
            MessageType::VeraIdMemberBundle.wire_tag(),
            content,
            VERAID_AUTH_NODE_ID,
            LOCAL_NODE_ID,
            acks.clone(),
        ))
        .await;
    assert_eq!(genuine, RouteOutcome::Handled);
    assert_eq!(*importer.imported.lock().unwrap(), vec![bundle()]);
    assert_eq!(acks.load(Ordering::SeqCst), 2);
}

/// 5. Test: Injected Sender Predicate
/// Verifies that a route's injected predicate can reject a sender the handler
/// itself would accept.
/// Why: Expected-sender derivation is supplied by the caller per message type.
#[tokio::test]
async fn test_injected_sender_predicate() {
    let recorder = AccountCreationRecorder::default();
    let router = MessageRouter::builder()
        .route_with_sender_check(recorder.clone(), |message: &AccountCreation, sender: &str| {
            message.assigned_user_id.ends_with("@example.com") && sender == SERVER_NODE_ID
        })
        .build()
        .unwrap();
    let content = AccountCreationCodec::encode(&account_creation()).unwrap();

    let outcome = router
        .route(incoming(
            MessageType::AccountCreation.wire_tag(),
            content.clone(),
            "not-the-server",
            LOCAL_NODE_ID,
            recorder.acks.clone(),
        ))
        .await;
    assert_eq!(outcome, RouteOutcome::Unauthenticated);
    assert!(recorder.handled.lock().unwrap().is_empty());

    let outcome = router
        .route(incoming(
            MessageType::AccountCreation.wire_tag(),
            content,
            SERVER_NODE_ID,
            LOCAL_NODE_ID,
            recorder.acks.clone(),
        ))
        .await;
    assert_eq!(outcome, RouteOutcome::Handled);
}

// ============================================================================
// UNROUTED MESSAGES AND FAILURES
// ============================================================================

/// 6. Test: Unknown And Unrouted Types Are Ignored
/// Verifies that unknown wire tags and known types without handlers are
/// acknowledged and ignored.
/// Why: Newer servers may send types this client does not understand.
#[tokio::test]
async fn test_unknown_and_unrouted_types_are_ignored() {
    let recorder = AccountCreationRecorder::default();
    let router = account_creation_router(&recorder, AckPolicy::AfterProcessing);
    assert!(!router.handles(MessageType::NewMessage));

    let unknown = router
        .route(incoming(
            "application/vnd.example.future",
            vec![1],
            SERVER_NODE_ID,
            LOCAL_NODE_ID,
            recorder.acks.clone(),
        ))
        .await;
    let unrouted = router
        .route(incoming(
            MessageType::NewMessage.wire_tag(),
            vec![1],
            SERVER_NODE_ID,
            LOCAL_NODE_ID,
            recorder.acks.clone(),
        ))
        .await;

    assert_eq!(unknown, RouteOutcome::Ignored);
    assert_eq!(unrouted, RouteOutcome::Ignored);
    assert_eq!(recorder.acks.load(Ordering::SeqCst), 2);
}

/// 7. Test: Handler Failure Is Acknowledged
/// Verifies that a failing handler is reported as HandlerFailed and the message
/// is still acknowledged.
/// Why: A parcel that always fails must not block the relay queue forever.
#[tokio::test]
async fn test_handler_failure_is_acknowledged() {
    let recorder = AccountCreationRecorder {
        fail: true,
        ..Default::default()
    };
    let router = account_creation_router(&recorder, AckPolicy::AfterProcessing);
    let content = AccountCreationCodec::encode(&account_creation()).unwrap();

    let outcome = router
        .route(incoming(
            MessageType::AccountCreation.wire_tag(),
            content,
            SERVER_NODE_ID,
            LOCAL_NODE_ID,
            recorder.acks.clone(),
        ))
        .await;

    assert_eq!(outcome, RouteOutcome::HandlerFailed);
    assert_eq!(recorder.acks.load(Ordering::SeqCst), 1);
}

// ============================================================================
// ACKNOWLEDGEMENT POLICY
// ============================================================================

/// 8. Test: Acknowledgement Timing Follows Policy
/// Verifies that BeforeProcessing acknowledges before the handler runs and
/// AfterProcessing after it, each exactly once.
/// Why: The policy trades redelivery on crash for a relay queue that never sticks.
#[tokio::test]
async fn test_acknowledgement_timing_follows_policy() {
    for (policy, expected_at_handling) in [
        (AckPolicy::BeforeProcessing, 1),
        (AckPolicy::AfterProcessing, 0),
    ] {
        let recorder = AccountCreationRecorder::default();
        let router = account_creation_router(&recorder, policy);
        assert_eq!(router.ack_policy(), policy);
        let content = AccountCreationCodec::encode(&account_creation()).unwrap();

        router
            .route(incoming(
                MessageType::AccountCreation.wire_tag(),
                content,
                SERVER_NODE_ID,
                LOCAL_NODE_ID,
                recorder.acks.clone(),
            ))
            .await;

        assert_eq!(
            *recorder.acks_at_handling.lock().unwrap(),
            vec![expected_at_handling]
        );
        assert_eq!(recorder.acks.load(Ordering::SeqCst), 1);
    }
}

/// 9. Test: Duplicate Route Is Rejected
/// Verifies that registering two handlers for one type fails the build.
/// Why: Each message type maps to at most one handler.
#[test]
fn test_duplicate_route_is_rejected() {
    let result = MessageRouter::builder()
        .route(AccountCreationRecorder::default())
        .route(AccountCreationRecorder::default())
        .build();

    assert!(matches!(
        result,
        Err(RouterError::DuplicateRoute(MessageType::AccountCreation))
    ));
}

// ============================================================================
// BUILT-IN PROCESSORS
// ============================================================================

/// Local accounts keyed by first-party node id, recording received bundles.
#[derive(Clone, Default)]
struct AccountBook {
    accounts: HashMap<String, Account>,
    received: Arc<Mutex<Vec<(String, VeraIdMemberBundle)>>>,
}

#[async_trait]
impl MemberBundleListener for AccountBook {
    async fn account_for_endpoint(&self, local_node_id: &str) -> Option<Account> {
        self.accounts.get(local_node_id).cloned()
    }

    async fn member_bundle_received(
        &self,
        account: &Account,
        bundle: VeraIdMemberBundle,
    ) -> anyhow::Result<()> {
        self.received
            .lock()
            .unwrap()
            .push((account.id.clone(), bundle));
        Ok(())
    }
}

/// 10. Test: Member Bundle Processor Checks Account Auth Endpoint
/// Verifies that a bundle is handled only when the sender is the receiving
/// account's VeraId authorization endpoint, and rejected for unknown
/// endpoints and for accounts without one.
/// Why: The daemon relies on this processor to keep spoofed bundles out.
#[tokio::test]
async fn test_member_bundle_processor_checks_account_auth_endpoint() {
    let mut alice = Account::new("alice", "alice@example.com");
    alice.veraid_auth_endpoint_id = Some(VERAID_AUTH_NODE_ID.to_string());
    let bob = Account::new("bob", "bob@example.com");
    let book = AccountBook {
        accounts: HashMap::from([
            (LOCAL_NODE_ID.to_string(), alice),
            ("fp-2".to_string(), bob),
        ]),
        ..AccountBook::default()
    };
    let router = MessageRouter::builder()
        .route(VeraIdMemberBundleProcessor::new(book.clone()))
        .build()
        .unwrap();
    let acks = Arc::new(AtomicUsize::new(0));
    let content = VeraIdMemberBundleCodec::encode(&bundle()).unwrap();
    let deliver = |sender: &str, recipient: &str| {
        incoming(
            MessageType::VeraIdMemberBundle.wire_tag(),
            content.clone(),
            sender,
            recipient,
            acks.clone(),
        )
    };

    for (sender, recipient) in [
        ("attacker", LOCAL_NODE_ID),
        (VERAID_AUTH_NODE_ID, "fp-2"),
        (VERAID_AUTH_NODE_ID, "fp-unknown"),
    ] {
        assert_eq!(
            router.route(deliver(sender, recipient)).await,
            RouteOutcome::Unauthenticated,
            "{} -> {}",
            sender,
            recipient
        );
    }
    assert!(book.received.lock().unwrap().is_empty());

    let outcome = router
        .route(deliver(VERAID_AUTH_NODE_ID, LOCAL_NODE_ID))
        .await;
    assert_eq!(outcome, RouteOutcome::Handled);
    assert_eq!(
        *book.received.lock().unwrap(),
        vec![("alice".to_string(), bundle())]
    );
    assert_eq!(acks.load(Ordering::SeqCst), 4);
}
