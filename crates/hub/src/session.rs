//! One streaming connection to one hub identity.
//!
//! ```text
//! Idle -> Connecting -> Connected <-> Reconnecting
//!             |             |              |
//!             v             v              v
//!         Terminated <------+--------------+   (startup exhaustion or shutdown)
//! ```
//!
//! Handshake failures before the first successful connect are bounded by
//! `max_initial_attempts`; once connected, reconnects retry forever.

use std::{sync::Arc, time::Duration};

use {
    hubrelay_channels::{HubConnection, HubTransport},
    hubrelay_config::ConnectionConfig,
    tokio::{
        sync::{mpsc, watch},
        time::{Instant, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    backoff::Backoff,
    decode::decode_frame,
    delivery::preview,
    registry::OrgSpec,
    router::RoutedEvent,
};

/// Characters of an undecodable frame kept in logs.
const BAD_FRAME_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Terminated,
}

impl SessionStatus {
    /// Startup is over for this session: it either connected or gave up.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Connected | Self::Terminated)
    }
}

/// Why [`OrgSession::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Shutdown,
    /// The first connect never succeeded.
    StartupExhausted { attempts: u32 },
}

/// Connection tunables for a session.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Failed first-connect handshakes tolerated before giving up.
    pub max_initial_attempts: u32,
    pub keepalive: Duration,
}

impl SessionTuning {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
            max_initial_attempts: config.max_initial_attempts,
            keepalive: Duration::from_secs(config.keepalive_secs),
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_delay, self.backoff_factor, self.max_delay)
    }
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

enum PumpEnd {
    Shutdown,
    Lost(String),
}

pub struct OrgSession {
    spec: Arc<OrgSpec>,
    label: Arc<str>,
    transport: Arc<dyn HubTransport>,
    events: mpsc::Sender<RoutedEvent>,
    tuning: SessionTuning,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
}

impl OrgSession {
    pub fn new(
        spec: Arc<OrgSpec>,
        transport: Arc<dyn HubTransport>,
        events: mpsc::Sender<RoutedEvent>,
        tuning: SessionTuning,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        Self {
            label: Arc::from(spec.label.as_str()),
            spec,
            transport,
            events,
            tuning,
            status,
            cancel: CancellationToken::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn spec(&self) -> &Arc<OrgSpec> {
        &self.spec
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Token that stops the session when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the session until shutdown or startup exhaustion.
    pub async fn run(self) -> SessionExit {
        self.set_status(SessionStatus::Connecting);
        let mut backoff = self.tuning.backoff();

        let mut conn = match self.connect_initial(&mut backoff).await {
            Ok(Some(conn)) => conn,
            Ok(None) => {
                self.set_status(SessionStatus::Terminated);
                return SessionExit::Shutdown;
            },
            Err(attempts) => {
                self.set_status(SessionStatus::Terminated);
                return SessionExit::StartupExhausted { attempts };
            },
        };

        loop {
            self.set_status(SessionStatus::Connected);
            let end = self.pump(conn.as_mut()).await;
            conn.close().await;
            match end {
                PumpEnd::Shutdown => break,
                PumpEnd::Lost(reason) => {
                    warn!(org = %self.label, reason = %reason, "connection lost");
                    self.set_status(SessionStatus::Reconnecting);
                    match self.reconnect(&mut backoff).await {
                        Some(next) => conn = next,
                        None => break,
                    }
                },
            }
        }

        info!(org = %self.label, "session stopped");
        self.set_status(SessionStatus::Terminated);
        SessionExit::Shutdown
    }

    /// First connect with bounded retries. `Ok(None)` means shutdown was
    /// requested; `Err(n)` means `n` consecutive handshakes failed.
    async fn connect_initial(
        &self,
        backoff: &mut Backoff,
    ) -> Result<Option<Box<dyn HubConnection>>, u32> {
        loop {
            info!(org = %self.label, hub = %self.spec.hub_url, "connecting");
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                result = self.transport.connect() => result,
            };
            let err = match result {
                Ok(conn) => {
                    info!(org = %self.label, attempts = backoff.failures() + 1, "connected");
                    backoff.reset();
                    return Ok(Some(conn));
                },
                Err(e) => e,
            };

            let delay = backoff.next_delay();
            let attempt = backoff.failures();
            error!(org = %self.label, attempt, error = %err, "connection attempt failed");
            if attempt > self.tuning.max_initial_attempts {
                error!(org = %self.label, attempts = attempt, "giving up on org after repeated startup failures");
                return Err(attempt);
            }
            info!(org = %self.label, delay_ms = delay.as_millis() as u64, "retrying connection");
            if !self.wait(delay).await {
                return Ok(None);
            }
        }
    }

    /// Reconnect after a lost connection, retrying without limit.
    async fn reconnect(&self, backoff: &mut Backoff) -> Option<Box<dyn HubConnection>> {
        loop {
            let delay = backoff.next_delay();
            let attempt = backoff.failures();
            info!(org = %self.label, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            if !self.wait(delay).await {
                return None;
            }
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = self.transport.connect() => result,
            };
            match result {
                Ok(conn) => {
                    info!(org = %self.label, attempts = attempt, "reconnected");
                    backoff.reset();
                    return Some(conn);
                },
                Err(e) => warn!(org = %self.label, attempt, error = %e, "reconnect attempt failed"),
            }
        }
    }

    /// Read frames and send keepalives until the connection drops or
    /// shutdown is requested.
    async fn pump(&self, conn: &mut dyn HubConnection) -> PumpEnd {
        let mut keepalive = tokio::time::interval_at(
            Instant::now() + self.tuning.keepalive,
            self.tuning.keepalive,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpEnd::Shutdown,
                _ = keepalive.tick() => {
                    if let Err(e) = conn.ping().await {
                        return PumpEnd::Lost(format!("keepalive failed: {e}"));
                    }
                    debug!(org = %self.label, "keepalive sent");
                },
                frame = conn.next_frame() => match frame {
                    Some(Ok(raw)) => {
                        if !self.handle_frame(&raw).await {
                            return PumpEnd::Shutdown;
                        }
                    },
                    Some(Err(e)) => return PumpEnd::Lost(e.to_string()),
                    None => return PumpEnd::Lost("connection closed by hub".into()),
                },
            }
        }
    }

    /// Decode and forward one frame. Returns `false` once the router is gone.
    async fn handle_frame(&self, raw: &str) -> bool {
        let event = match decode_frame(raw) {
            Ok(Some(event)) => event,
            Ok(None) => return true,
            Err(e) => {
                warn!(
                    org = %self.label,
                    error = %e,
                    frame = %preview(raw, BAD_FRAME_PREVIEW_CHARS),
                    "dropping undecodable frame"
                );
                return true;
            },
        };
        debug!(org = %self.label, kind = event.kind(), "inbound event");
        self.events
            .send(RoutedEvent {
                org: Arc::clone(&self.label),
                event,
            })
            .await
            .is_ok()
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(org = %self.label, from = ?previous, to = ?status, "session status");
        }
    }
}
