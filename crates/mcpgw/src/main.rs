//! `mcpgw` CLI entry point: loads configuration, wires the gateway's
//! crates together behind one axum server, and serves until shutdown.

mod config;
mod local;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use clap::{Parser, Subcommand};
use mcpgw_authz::Authorizer;
use mcpgw_credentials::{CredentialResolver, EncryptionKey};
use mcpgw_frontend::{AppState, NotificationHub};
use mcpgw_instances::{new_container_manager, new_process_manager};
use mcpgw_proxy::{ClientFactory, ClientFactoryConfig, ProxyEngine, ProxyEngineConfig};
use mcpgw_session::{SessionManager, SessionManagerConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GatewayConfig;
use crate::local::{HeaderIdentityProvider, RepoEnvConfigSource, RepoPolicySource, StaticRepository};

const ENCRYPTION_KEY_ENV: &str = "MCPGW_ENCRYPTION_KEY";

/// The MCP multiplexing gateway: a single session-scoped endpoint fanning
/// requests out across multiple named upstream MCP servers.
#[derive(Debug, Parser)]
#[command(name = "mcpgw", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the gateway's HTTP server.
    Serve(ServeArgs),
}

#[derive(Debug, clap::Args)]
struct ServeArgs {
    /// Path to a TOML config file. In its absence, the gateway runs on
    /// built-in defaults plus any `MCPGW__*` environment overrides.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the listen address from the config file/environment.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Reads the gateway's encryption key material (spec §6: AES-256-GCM, key
/// exactly 32 bytes). Returned as raw bytes rather than an [`EncryptionKey`]
/// because the key isn't `Clone` (it wraps a `ring::aead::LessSafeKey`) and
/// three independent holders need one built from the same bytes: the
/// static repository (encrypting config-file plaintext at load), the
/// credential resolver (decrypting env-config rows per request), and the
/// client factory (decrypting a target's default fallback credential).
fn load_encryption_key_bytes() -> anyhow::Result<Vec<u8>> {
    let encoded = std::env::var(ENCRYPTION_KEY_ENV).map_err(|_| {
        anyhow::anyhow!("{ENCRYPTION_KEY_ENV} must be set to a base64-encoded 32-byte key")
    })?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| anyhow::anyhow!("{ENCRYPTION_KEY_ENV} is not valid base64: {e}"))
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut gateway_config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        gateway_config.listen_addr = bind;
    }

    let key_bytes = load_encryption_key_bytes()?;
    let repository_key = EncryptionKey::new(&key_bytes)?;
    let resolver_key = EncryptionKey::new(&key_bytes)?;
    let fallback_key = EncryptionKey::new(&key_bytes)?;
    let repository = StaticRepository::from_config(&gateway_config, &repository_key)?;

    info!(
        targets = gateway_config.targets.len(),
        policies = gateway_config.policies.len(),
        "loaded static configuration"
    );

    let authorizer = Arc::new(Authorizer::new(RepoPolicySource(repository.clone())));
    let credentials = CredentialResolver::new(RepoEnvConfigSource(repository.clone()), resolver_key);

    let process_manager = Arc::new(new_process_manager(
        gateway_config.process_manager.to_instance_manager_config(),
    ));
    let container_manager = Arc::new(new_container_manager(
        gateway_config.container_manager.to_instance_manager_config(),
    ));

    let factory_config = ClientFactoryConfig {
        request_timeout: std::time::Duration::from_secs(gateway_config.client_request_timeout_secs),
        container_readiness_timeout: std::time::Duration::from_secs(
            gateway_config.container_readiness_timeout_secs,
        ),
    };
    // No container resource controller is wired up: provisioning the
    // compute backend behind container targets (spec §4.G) is an external
    // collaborator's responsibility (spec §1 Out of scope). Container
    // transport targets will fail to build until one is supplied.
    let factory = Arc::new(ClientFactory::new(
        factory_config,
        credentials,
        Some(fallback_key),
        process_manager.clone(),
        container_manager.clone(),
        None,
    ));

    let proxy = Arc::new(ProxyEngine::new(
        ProxyEngineConfig::default(),
        authorizer,
        factory,
        repository.clone(),
    ));

    let session_manager_config = SessionManagerConfig {
        timeout: std::time::Duration::from_secs(gateway_config.session_timeout_secs),
        cleanup_interval: std::time::Duration::from_secs(gateway_config.session_cleanup_interval_secs),
    };
    let sessions = SessionManager::new(repository.clone(), session_manager_config);

    let hub = NotificationHub::new();
    let identity_provider: Arc<dyn mcpgw_frontend::IdentityProvider> = Arc::new(HeaderIdentityProvider);

    let state = AppState {
        proxy,
        sessions: sessions.clone(),
        hub,
        identity_provider,
        mount_path: gateway_config.mount_path.clone(),
    };

    // The frontend exposes one logical endpoint handling all three verbs
    // (POST/GET/DELETE); mount it under `mount_path` (spec §4.L).
    let app = axum::Router::new().nest(&gateway_config.mount_path, mcpgw_frontend::router(state));

    let cancellation_token = CancellationToken::new();
    sessions.spawn_sweep_loop(cancellation_token.clone()).await;
    process_manager.spawn_gc_loop(cancellation_token.clone());
    container_manager.spawn_gc_loop(cancellation_token.clone());

    let addr: SocketAddr = gateway_config
        .listen_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen_addr {:?}: {e}", gateway_config.listen_addr))?;
    info!(%addr, mount_path = %gateway_config.mount_path, "mcpgw listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancellation_token.cancel();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}
