//! Shamir Relay
//!
//! Standalone HTTP service exposing the server half of the Shamir
//! 3-pass protocol: generate a lock keypair, apply the server's lock to
//! a client KEK, remove it again, and report which keypair is
//! currently loaded.
//!
//! # Usage
//!
//! ```bash
//! shamir-relay --port 4321
//! SHAMIR_RELAY_E_S_B64U=... SHAMIR_RELAY_D_S_B64U=... shamir-relay
//! ```

use clap::Parser;
use shamir_relay::config::Args;
use shamir_relay::routes::{router, AppState};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting shamir relay");

    let group = args.group()?;
    let keys = args.server_keys(&group)?;
    let key_id = shamir_relay::keyid::current_key_id(&shamir_relay::shamir::encode_biguint_b64u(&keys.e_s));
    tracing::info!(key_id, "server lock keypair ready");

    let state = Arc::new(AppState { group, keys });
    let app = router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shamir relay shutdown complete");
    Ok(())
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
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
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_host_and_port_overrides() {
        let args = Args::parse_from(["shamir-relay", "--host", "127.0.0.1", "--port", "9999"]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 9999);
    }

    #[test]
    fn cli_defaults_to_the_compiled_in_prime_when_unset() {
        let args = Args::parse_from(["shamir-relay"]);
        assert!(args.prime_b64u.is_none());
        assert!(args.group().is_ok());
    }
}
