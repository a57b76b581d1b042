//! Warden Server - search cluster authorization gateway node.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden_server::{Args, Gateway};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting Warden node");

    let args = Args::parse();
    let config = args.into_config()?;

    tracing::info!(
        node_id = %config.node_id,
        data_path = %config.data_path.display(),
        admins = config.admin_principals.len(),
        node_subjects = config.node_subjects.len(),
        anonymous = config.anonymous_access,
        early_auth = config.early_authentication,
        codec_mode = ?config.codec_mode,
        "configuration loaded"
    );

    let gateway = Gateway::open(config)?;
    let snapshot = gateway.registry().snapshot();
    tracing::info!(roles = snapshot.role_count(), "security config installed");

    // The transport front ends attach to the gateway; this process only keeps
    // the node's security state until shutdown.
    tracing::info!("node ready");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
        return Err(e.into());
    }
    tracing::info!("received shutdown signal");
    Ok(())
}
