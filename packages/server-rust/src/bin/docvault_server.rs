//! Standalone docvault server over the in-memory repository.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use docvault_core::Channel;
use docvault_server::network::{NetworkConfig, NetworkModule};
use docvault_server::service::domain::ADMIN_ROLE;
use docvault_server::service::{build_dispatcher, Collaborators, ServerConfig};
use docvault_server::storage::{MemoryRepository, StaticAuthenticator};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docvault-server", about = "Versioned document repository server")]
struct Args {
    /// Bind address.
    #[arg(long, env = "DOCVAULT_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "DOCVAULT_PORT", default_value_t = 8080)]
    port: u16,

    /// Host name reported in opaque internal errors.
    #[arg(long, env = "HOSTNAME", default_value = "localhost")]
    host_name: String,

    /// Tenant applied to usernames without an `@tenant` suffix.
    #[arg(long, env = "DOCVAULT_DEFAULT_TENANT", default_value = "default")]
    default_tenant: String,

    /// Log the non-sensitive arguments of failed operations.
    #[arg(long, env = "DOCVAULT_TRACE_ARGUMENTS")]
    trace_arguments: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "DOCVAULT_LOG_JSON")]
    log_json: bool,

    #[arg(long, env = "DOCVAULT_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long, env = "DOCVAULT_ADMIN_USER", default_value = "admin")]
    admin_user: String,

    #[arg(long, env = "DOCVAULT_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: String,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,docvault_server=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = Arc::new(ServerConfig {
        host_name: args.host_name,
        default_tenant: args.default_tenant.clone(),
        channel: Channel::Rest,
        trace_arguments: args.trace_arguments,
        ..ServerConfig::default()
    });

    let repo = MemoryRepository::new();
    let root = repo.create_root("root");
    let authenticator = StaticAuthenticator::new();
    authenticator.add_account(
        &args.admin_user,
        &args.default_tenant,
        &args.admin_password,
        &[ADMIN_ROLE],
    );
    info!(%root, tenant = %args.default_tenant, "in-memory repository ready");

    let dispatcher = build_dispatcher(config, Collaborators::in_memory(&repo, authenticator)).await?;

    let mut network = NetworkModule::new(
        NetworkConfig {
            host: args.host,
            port: args.port,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            ..NetworkConfig::default()
        },
        dispatcher.clone(),
    );
    let port = network.start().await?;
    info!(port, "docvault server listening");

    network
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    dispatcher.shutdown(false).await?;
    info!("docvault server stopped");
    Ok(())
}
