//! Endpoint Manager Module
//!
//! Owns the endpoint lifecycle: binds to the relay gateway, registers and
//! caches first-party endpoints per account, imports and caches the server's
//! public endpoint, issues and revokes authorizations, and drives the
//! inbound message loop.
//!
//! ## Lanes
//!
//! All transport calls and cache mutations run on the relay lane (see
//! [`crate::lane`]). The inbound loop runs on its own task, started by
//! [`EndpointManager::start_receiving`], and hops onto the relay lane only to
//! obtain the message stream.

mod lane_state;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::connection_params::ConnectionParamsSource;
use crate::endpoint::{Account, AuthorizationGrant, Endpoint, EndpointOwner, Recipient};
use crate::error::{EndpointError, GatewayError};
use crate::gateway::GatewayTransport;
use crate::initialization::{InitializationState, InitializationStateMachine};
use crate::lane::RelayLane;
use crate::message::Payload;
use crate::router::MessageRouter;
use crate::store::EndpointStore;

use lane_state::LaneState;

type InitializationFuture = Shared<BoxFuture<'static, InitializationState>>;

/// Tunables of the endpoint manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Delay before an asynchronous encryption failure reaches `FatalError`
    pub fatal_error_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            fatal_error_delay: Duration::from_millis(1000),
        }
    }
}

struct ManagerInner {
    lane: RelayLane<LaneState>,
    state: InitializationStateMachine,
    initialization: Mutex<Option<InitializationFuture>>,
    rebind: Mutex<Option<InitializationFuture>>,
    set_up_done: AtomicBool,
    receiving: AtomicBool,
    config: ManagerConfig,
}

/// Endpoint lifecycle owner. Cheap to clone; clones share the same lanes.
#[derive(Clone)]
pub struct EndpointManager {
    inner: Arc<ManagerInner>,
}

impl EndpointManager {
    /// Creates the manager and spawns its relay lane.
    ///
    /// Must be called from within a tokio runtime. Nothing touches the
    /// transport until [`EndpointManager::initialize`] runs.
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        store: Arc<dyn EndpointStore>,
        connection_params: Arc<dyn ConnectionParamsSource>,
        config: ManagerConfig,
    ) -> Self {
        let lane = RelayLane::spawn(
            "relay",
            LaneState::new(transport, store, connection_params),
        );
        Self {
            inner: Arc::new(ManagerInner {
                lane,
                state: InitializationStateMachine::new(),
                initialization: Mutex::new(None),
                rebind: Mutex::new(None),
                set_up_done: AtomicBool::new(false),
                receiving: AtomicBool::new(false),
                config,
            }),
        }
    }

    // ========================================================================
    // INITIALIZATION
    // ========================================================================

    pub fn state(&self) -> InitializationState {
        self.inner.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<InitializationState> {
        self.inner.state.subscribe()
    }

    /// Sets up and binds the gateway, once per process.
    ///
    /// The first caller starts the sequence; concurrent and later callers
    /// await the same run. Returns the state the sequence ended in.
    pub async fn initialize(&self) -> InitializationState {
        let initialization = {
            let mut slot = self
                .inner
                .initialization
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert_with(|| {
                self.spawn_shared(|manager| async move { manager.run_initialization().await })
            })
            .clone()
        };
        initialization.await
    }

    /// Re-probes the gateway binding, e.g. after the relay app was installed.
    ///
    /// Only meaningful from `NotInstalled` or `NonFatalError`; from any other
    /// state the current state is returned unchanged. Concurrent callers
    /// share one attempt and all receive the state it ended in.
    pub async fn initialize_gateway(&self) -> InitializationState {
        let rebind = {
            let mut slot = self
                .inner
                .rebind
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.clone() {
                Some(running) => running,
                None => {
                    let current = self.state();
                    if !matches!(
                        current,
                        InitializationState::NotInstalled | InitializationState::NonFatalError
                    ) {
                        debug!("Not re-probing gateway from state {:?}", current);
                        return current;
                    }
                    let running =
                        self.spawn_shared(|manager| async move { manager.run_rebind().await });
                    *slot = Some(running.clone());
                    running
                }
            }
        };
        rebind.await
    }

    async fn run_rebind(&self) -> InitializationState {
        info!("Retrying relay gateway binding");
        let state = if self.inner.set_up_done.load(Ordering::SeqCst) {
            self.bind().await
        } else {
            self.run_initialization().await
        };
        self.inner
            .rebind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        state
    }

    /// Runs `f` on its own task and shares its outcome between awaiters.
    fn spawn_shared<F, Fut>(&self, f: F) -> InitializationFuture
    where
        F: FnOnce(EndpointManager) -> Fut,
        Fut: Future<Output = InitializationState> + Send + 'static,
    {
        let task = tokio::spawn(f(self.clone()));
        let state = self.inner.state.clone();
        async move {
            match task.await {
                Ok(final_state) => final_state,
                Err(e) => {
                    error!("Initialization task failed: {}", e);
                    state.current()
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn run_initialization(&self) -> InitializationState {
        info!("Setting up relay gateway");
        let result = self
            .inner
            .lane
            .run(|lane| Box::pin(async move { lane.transport.set_up().await }))
            .await;
        match result {
            Ok(Ok(())) => {
                self.inner.set_up_done.store(true, Ordering::SeqCst);
                self.inner.state.transition(InitializationState::SetUp);
            }
            Ok(Err(e)) if e.is_encryption_failure() => {
                error!("Gateway set-up hit an encryption library failure: {}", e);
                self.inner.state.transition(InitializationState::FatalError);
                return self.state();
            }
            Ok(Err(e)) => {
                warn!("Gateway set-up failed: {}", e);
                self.inner.state.transition(InitializationState::NonFatalError);
                return self.state();
            }
            Err(e) => {
                error!("Gateway set-up could not run: {}", e);
                self.inner.state.transition(InitializationState::NonFatalError);
                return self.state();
            }
        }
        self.bind().await
    }

    async fn bind(&self) -> InitializationState {
        if !self.inner.state.transition(InitializationState::GatewayBinding) {
            return self.state();
        }
        let result = self
            .inner
            .lane
            .run(|lane| Box::pin(async move { lane.transport.bind_gateway().await }))
            .await;
        let next = match result {
            Ok(Ok(())) => InitializationState::Initialized,
            Ok(Err(GatewayError::Binding(reason))) => {
                warn!("Relay app unavailable: {}", reason);
                InitializationState::NotInstalled
            }
            Ok(Err(e)) if e.is_encryption_failure() => {
                error!("Gateway binding hit an encryption library failure: {}", e);
                InitializationState::FatalError
            }
            Ok(Err(e)) => {
                warn!("Gateway binding failed: {}", e);
                InitializationState::NonFatalError
            }
            Err(e) => {
                error!("Gateway binding could not run: {}", e);
                InitializationState::NonFatalError
            }
        };
        self.inner.state.transition(next);
        self.state()
    }

    /// Escalates an asynchronous encryption library failure.
    ///
    /// The state moves to `FatalError` after the configured delay so the
    /// failure does not race with whatever the UI is doing at that moment.
    pub fn report_encryption_failure(&self, failure: GatewayError) {
        error!("Encryption library failure: {}", failure);
        if self.state().is_terminal() {
            return;
        }
        let state = self.inner.state.clone();
        let delay = self.inner.config.fatal_error_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !state.current().is_terminal() {
                state.transition(InitializationState::FatalError);
            }
        });
    }

    async fn ensure_initialized(&self) -> Result<(), EndpointError> {
        self.initialize().await;
        // Re-read: a re-probe may have succeeded after the first run ended.
        match self.state() {
            InitializationState::Initialized => Ok(()),
            state => Err(EndpointError::NotReady(state)),
        }
    }

    async fn on_lane<R, F>(&self, f: F) -> Result<R, EndpointError>
    where
        F: for<'a> FnOnce(&'a mut LaneState) -> BoxFuture<'a, Result<R, EndpointError>>
            + Send
            + 'static,
        R: Send + 'static,
    {
        let result = self.inner.lane.run(f).await.and_then(|result| result);
        if let Err(EndpointError::Gateway(e)) = &result {
            if e.is_encryption_failure() {
                self.report_encryption_failure(e.clone());
            }
        }
        result
    }

    // ========================================================================
    // ENDPOINT OPERATIONS
    // ========================================================================

    /// Sends `payload` to `recipient` from the first-party endpoint of
    /// `sender_account` (the unassigned endpoint when `None`).
    ///
    /// A first-party endpoint registered by this call first sends the
    /// recipient an authorization to reply, as an
    /// [`crate::message::MessageType::AuthorizeReceivingFromServer`] message.
    /// Returns the sender's node id.
    pub async fn send_message(
        &self,
        payload: Payload,
        recipient: Recipient,
        sender_account: Option<&Account>,
    ) -> Result<String, EndpointError> {
        self.ensure_initialized().await?;
        let owner = EndpointOwner::from_account(sender_account);
        self.on_lane(move |lane| {
            Box::pin(async move { lane.send(payload, &recipient, &owner).await })
        })
        .await
    }

    /// Lets `third_party` send messages to `account`'s endpoint indefinitely.
    pub async fn authorize_third_party(
        &self,
        account: &Account,
        third_party: &Endpoint,
    ) -> Result<AuthorizationGrant, EndpointError> {
        self.ensure_initialized().await?;
        let owner = EndpointOwner::Account(account.id.clone());
        let third_party = third_party.clone();
        self.on_lane(move |lane| {
            Box::pin(async move { lane.authorize(&owner, &third_party).await })
        })
        .await
    }

    /// Revokes `third_party_node_id`'s authorization and forgets the peer.
    pub async fn revoke_authorization(
        &self,
        account: &Account,
        third_party_node_id: &str,
    ) -> Result<(), EndpointError> {
        self.ensure_initialized().await?;
        let owner = EndpointOwner::Account(account.id.clone());
        let third_party_node_id = third_party_node_id.to_string();
        self.on_lane(move |lane| {
            Box::pin(async move { lane.revoke(&owner, &third_party_node_id).await })
        })
        .await
    }

    /// Imports a peer-issued authorization and returns the peer's node id.
    pub async fn import_private_third_party_auth(
        &self,
        authorization: &[u8],
    ) -> Result<String, EndpointError> {
        self.ensure_initialized().await?;
        let authorization = authorization.to_vec();
        self.on_lane(move |lane| {
            Box::pin(async move { lane.import_private_auth(&authorization).await })
        })
        .await
    }

    /// The server's public endpoint as seen from `self_node_id`.
    pub async fn server_third_party_endpoint(
        &self,
        self_node_id: &str,
    ) -> Result<Endpoint, EndpointError> {
        self.ensure_initialized().await?;
        debug!("Resolving server endpoint for {}", self_node_id);
        self.on_lane(|lane| Box::pin(async move { lane.server_third_party_endpoint().await }))
            .await
    }

    /// Existing first-party endpoint of `owner`. Never registers one.
    pub async fn first_party_endpoint(
        &self,
        owner: &EndpointOwner,
    ) -> Result<Option<Endpoint>, EndpointError> {
        self.ensure_initialized().await?;
        let owner = owner.clone();
        self.on_lane(move |lane| Box::pin(async move { lane.first_party_endpoint(&owner).await }))
            .await
    }

    // ========================================================================
    // INBOUND
    // ========================================================================

    /// Starts the inbound loop feeding `router`.
    ///
    /// Returns whether this call started the loop. Calls made while a loop
    /// is running are no-ops; once a loop has stopped (stream failed to open
    /// or ended) the next call starts a fresh one.
    pub fn start_receiving(&self, router: Arc<MessageRouter>) -> bool {
        if self.inner.receiving.swap(true, Ordering::SeqCst) {
            debug!("Inbound loop already running");
            return false;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.clone().receive_loop(router).await;
            manager.inner.receiving.store(false, Ordering::SeqCst);
        });
        true
    }

    async fn receive_loop(self, router: Arc<MessageRouter>) {
        self.initialize().await;

        let mut states = self.subscribe_state();
        loop {
            let state = *states.borrow_and_update();
            if state == InitializationState::Initialized {
                break;
            }
            if state.is_terminal() {
                warn!("Inbound loop not started: gateway in state {:?}", state);
                return;
            }
            if states.changed().await.is_err() {
                return;
            }
        }

        let stream = self
            .inner
            .lane
            .run(|lane| Box::pin(async move { lane.transport.receive_messages().await }))
            .await
            .and_then(|stream| stream.map_err(EndpointError::from));
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(EndpointError::Gateway(e)) if e.is_encryption_failure() => {
                self.report_encryption_failure(e);
                return;
            }
            Err(e) => {
                error!("Failed to open inbound message stream: {}", e);
                return;
            }
        };

        info!("Inbound loop started");
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => {
                    let parcel_id = message.parcel_id;
                    let outcome = router.route(message).await;
                    debug!("Parcel {} routed: {:?}", parcel_id, outcome);
                }
                Err(e) if e.is_encryption_failure() => self.report_encryption_failure(e),
                Err(e) => warn!("Failed to receive message: {}", e),
            }
        }
        warn!("Inbound message stream ended");
    }
}
