//! Wires sessions, router and dispatcher into one running relay.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    hubrelay_channels::{Deliverer, HubTransport},
    hubrelay_config::RelayConfig,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{info, warn},
};

use crate::{
    Result,
    dispatch::DeliveryDispatcher,
    registry::{OrgRegistry, OrgSpec},
    router::EventRouter,
    session::{OrgSession, SessionTuning},
    supervisor::SessionSupervisor,
};

/// Events buffered between sessions and the router.
const EVENT_QUEUE_CAPACITY: usize = 1024;

pub struct Relay {
    supervisor: SessionSupervisor,
    router: JoinHandle<()>,
    dispatcher: DeliveryDispatcher,
    multi_org: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

impl Relay {
    /// Spawn a session per configured org plus the router and dispatcher.
    /// Sessions start connecting immediately and events flow as soon as one
    /// connects; [`Relay::wait_started`] reports when startup has settled.
    ///
    /// `transport_for` builds the hub transport of each org.
    pub fn spawn<F>(
        registry: &OrgRegistry,
        config: &RelayConfig,
        deliverer: Arc<dyn Deliverer>,
        mut transport_for: F,
    ) -> Result<Self>
    where
        F: FnMut(&Arc<OrgSpec>) -> Result<Arc<dyn HubTransport>>,
    {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let tuning = SessionTuning::from_config(&config.connection);
        let mut sessions = Vec::with_capacity(registry.len());
        for spec in registry.orgs() {
            sessions.push(OrgSession::new(
                Arc::clone(spec),
                transport_for(spec)?,
                events_tx.clone(),
                tuning.clone(),
            ));
        }
        drop(events_tx);

        let dispatcher = DeliveryDispatcher::new(
            deliverer,
            Duration::from_millis(config.delivery.retry_delay_ms),
        );
        let router = EventRouter::new(registry, &config.threads);
        let multi_org = router.multi_org_flag();
        let router = tokio::spawn(router.run(events_rx, dispatcher.clone()));

        let shutdown_timeout = Duration::from_millis(config.connection.shutdown_timeout_ms);
        Ok(Self {
            supervisor: SessionSupervisor::spawn(sessions, shutdown_timeout),
            router,
            dispatcher,
            multi_org,
            shutdown_timeout,
        })
    }

    /// Wait until every org has connected or given up, then drop the org
    /// prefix if only one org is left. Fails if no org could be connected;
    /// the relay must still be shut down.
    ///
    /// Cancel safe.
    pub async fn wait_started(&mut self) -> Result<()> {
        self.supervisor.wait_started().await?;
        let multi_org = self.supervisor.active_labels().len() > 1;
        if self.multi_org.swap(multi_org, Ordering::Relaxed) != multi_org {
            info!(multi_org, "org prefix follows the connected orgs");
        }
        Ok(())
    }

    /// [`Relay::spawn`] followed by [`Relay::wait_started`]. On failure
    /// everything spawned is shut down before the error is returned.
    pub async fn start<F>(
        registry: &OrgRegistry,
        config: &RelayConfig,
        deliverer: Arc<dyn Deliverer>,
        transport_for: F,
    ) -> Result<Self>
    where
        F: FnMut(&Arc<OrgSpec>) -> Result<Arc<dyn HubTransport>>,
    {
        let mut relay = Self::spawn(registry, config, deliverer, transport_for)?;
        if let Err(e) = relay.wait_started().await {
            relay.shutdown().await;
            return Err(e);
        }
        Ok(relay)
    }

    pub fn active_orgs(&self) -> Vec<&str> {
        self.supervisor.active_labels()
    }

    /// Stop sessions, let the router drain, then wait for in-flight
    /// deliveries. Returns `false` if any stage hit its deadline.
    pub async fn shutdown(self) -> bool {
        info!("shutting down relay");
        let mut clean = self.supervisor.shutdown().await;

        let abort = self.router.abort_handle();
        match tokio::time::timeout(self.shutdown_timeout, self.router).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                warn!(error = %e, "router task failed");
                clean = false;
            },
            Err(_) => {
                warn!("router did not drain in time, aborting");
                abort.abort();
                clean = false;
            },
        }

        clean &= self.dispatcher.shutdown(self.shutdown_timeout).await;
        info!(clean, "relay stopped");
        clean
    }
}
