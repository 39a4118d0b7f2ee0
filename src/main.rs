//! Letro Core Daemon
//!
//! Runs the endpoint manager against the in-process loopback relay, logs every
//! initialization state change and routes inbound messages until Ctrl-C.
//!
//! Useful for exercising the core end to end without the relay app: once the
//! gateway is bound, the unassigned endpoint requests an account from the
//! server, which bootstraps the server's authorization first.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use letro_core::codec::{
    AccountCreationCodec, AccountCreationRequest, AccountCreationRequestCodec,
    MisconfiguredInternetEndpointCodec, NewConversationCodec, NewMessageCodec, VeraIdMemberBundle,
};
use letro_core::connection_params::{self, ConnectionParamsSource, StaticConnectionParams};
use letro_core::gateway::loopback::{connection_params_for, generate_signing_key};
use letro_core::router::processors::{
    LoggingHandler, MemberBundleListener, PairingAuthorizationProcessor, PairingListener,
    VeraIdMemberBundleProcessor,
};
use letro_core::{
    Account, Config, EndpointManager, EndpointStore, FileEndpointStore, InMemoryEndpointStore,
    InitializationState, LoopbackGateway, ManagerConfig, MessageCodec, MessageRouter, MessageType,
    Payload, Recipient,
};

struct LogPairing;

#[async_trait::async_trait]
impl PairingListener for LogPairing {
    async fn contact_paired(&self, peer_node_id: &str, local_node_id: &str) -> Result<()> {
        info!("Contact {} paired with {}", peer_node_id, local_node_id);
        Ok(())
    }
}

/// Accounts the daemon knows, keyed by their first-party node id.
///
/// The daemon only ever sends from the unassigned endpoint, so this starts
/// empty and every member bundle is rejected.
#[derive(Default)]
struct DaemonAccounts(HashMap<String, Account>);

#[async_trait::async_trait]
impl MemberBundleListener for DaemonAccounts {
    async fn account_for_endpoint(&self, local_node_id: &str) -> Option<Account> {
        self.0.get(local_node_id).cloned()
    }

    async fn member_bundle_received(
        &self,
        account: &Account,
        bundle: VeraIdMemberBundle,
    ) -> Result<()> {
        info!(
            "Member bundle for {}: {} byte(s)",
            account.id,
            bundle.bundle.len()
        );
        Ok(())
    }
}

fn print_help() {
    println!("Letro Core Daemon");
    println!();
    println!("Usage: letro-core [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <path>   Use custom config file path");
    println!("  --dev             Run with the built-in development configuration");
    println!("  --help, -h        Show this help message");
    println!();
    println!("Environment variables:");
    println!("  LETRO_CONFIG_PATH    Path to config file (overrides --config)");
}

/// Main application entry point.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file (or the development defaults)
/// 3. Builds the gateway, store, manager and router
/// 4. Initializes the gateway and starts the inbound loop
/// 5. Runs until Ctrl-C
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Letro Core");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    let mut config_path = None;
    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 1;
        }
        i += 1;
    }

    if let Some(path) = config_path {
        if std::env::var("LETRO_CONFIG_PATH").is_err() {
            std::env::set_var("LETRO_CONFIG_PATH", &path);
        }
        info!("Using custom config: {}", path);
    }

    let config = if args.iter().any(|arg| arg == "--dev") {
        info!("Using development configuration");
        Config::default()
    } else {
        Config::load()?
    };
    info!("Configuration loaded successfully");

    // Gateway and bundled server connection parameters
    let gateway = Arc::new(LoopbackGateway::new());
    let params: Arc<dyn ConnectionParamsSource> =
        match connection_params::source_from_config(&config.gateway) {
            Some(source) => source,
            None => {
                let server_key = generate_signing_key();
                let bytes = connection_params_for(&server_key, &config.gateway.server_internet_address)
                    .context("Failed to build local server connection parameters")?;
                info!(
                    "Generated local server identity for {}",
                    config.gateway.server_internet_address
                );
                Arc::new(StaticConnectionParams::new(bytes))
            }
        };

    let store: Arc<dyn EndpointStore> = match &config.store.path {
        Some(path) => Arc::new(
            FileEndpointStore::open(path)
                .await
                .with_context(|| format!("Failed to open endpoint store at {}", path))?,
        ),
        None => {
            warn!("No store.path configured, endpoints will not survive a restart");
            Arc::new(InMemoryEndpointStore::new())
        }
    };

    let manager = EndpointManager::new(
        gateway.clone(),
        store,
        params,
        ManagerConfig {
            fatal_error_delay: config.gateway.fatal_error_delay(),
        },
    );

    // Log every state change
    let mut states = manager.subscribe_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            info!("Relay state: {:?} ({})", state, state.code());
        }
    });

    let router = MessageRouter::builder()
        .ack_policy(config.router.ack_policy)
        .route(PairingAuthorizationProcessor::new(manager.clone(), LogPairing))
        .route(LoggingHandler::<AccountCreationCodec>::new())
        .route(VeraIdMemberBundleProcessor::new(DaemonAccounts::default()))
        .route(LoggingHandler::<MisconfiguredInternetEndpointCodec>::new())
        .route(LoggingHandler::<NewConversationCodec>::new())
        .route(LoggingHandler::<NewMessageCodec>::new())
        .build()?;

    let state = manager.initialize().await;
    if state != InitializationState::Initialized {
        warn!("Relay gateway not ready: {:?}", state);
    }
    manager.start_receiving(Arc::new(router));

    if state == InitializationState::Initialized {
        let request = AccountCreationRequest {
            user_name: "alice".to_string(),
            locale: "en_GB".to_string(),
            public_key: generate_signing_key().verifying_key().to_bytes().to_vec(),
        };
        let payload = Payload::new(
            MessageType::AccountCreationRequest,
            AccountCreationRequestCodec::encode(&request)?,
        );
        let node_id = manager.send_message(payload, Recipient::server(), None).await?;
        info!("Requested account creation from endpoint {}", node_id);
        info!("Loopback outbox holds {} message(s)", gateway.sent_messages().await.len());
    }

    info!("Letro Core running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
