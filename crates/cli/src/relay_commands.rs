//! `run` and `send`.

use std::{path::Path, sync::Arc};

use {
    anyhow::Result,
    hubrelay_channels::{HubTransport, RoutingEndpoint},
    hubrelay_config::{load_config, resolve_config_path},
    hubrelay_hub::{
        HttpHubClient, OrgRegistry, Relay, SubprocessDeliverer, WsTransport, select_org,
        send_message,
    },
    tracing::{info, warn},
};

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    info!(path = %path.display(), "loading config");
    let config = load_config(&path)?;
    let registry = OrgRegistry::from_config(&config)?;
    let deliverer = Arc::new(SubprocessDeliverer::from_config(&config.delivery)?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        orgs = %registry.labels().join(", "),
        "hubrelay starting"
    );

    let mut relay = Relay::spawn(&registry, &config, deliverer, |spec| {
        let transport: Arc<dyn HubTransport> = Arc::new(WsTransport::new(spec)?);
        Ok(transport)
    })?;

    let signal = shutdown_signal();
    tokio::pin!(signal);
    let started = tokio::select! {
        started = relay.wait_started() => Some(started),
        () = &mut signal => None,
    };
    match started {
        Some(Ok(())) => {
            info!(orgs = %relay.active_orgs().join(", "), "relay running");
            signal.await;
        },
        Some(Err(e)) => {
            relay.shutdown().await;
            return Err(e.into());
        },
        None => info!("shutdown requested during startup"),
    }

    if !relay.shutdown().await {
        warn!("shutdown deadline passed before everything closed");
    }
    Ok(())
}

pub async fn send(
    config_path: Option<&Path>,
    org: Option<&str>,
    target: &str,
    message: &str,
) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    let config = load_config(&path)?;
    let registry = OrgRegistry::from_config(&config)?;
    let endpoint: RoutingEndpoint = target.parse()?;
    let spec = select_org(&registry, &endpoint, org)?;

    let client = HttpHubClient::new(spec)?;
    let sent = send_message(&client, &endpoint.target, message).await?;
    println!("Sent {sent} via org {}", spec.label);
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
