//! Starts org sessions side by side and stops them together.

use std::time::Duration;

use {
    futures::future::join_all,
    tokio::{sync::watch, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    session::{OrgSession, SessionExit, SessionStatus},
};

struct Supervised {
    label: String,
    cancel: CancellationToken,
    status: watch::Receiver<SessionStatus>,
    task: JoinHandle<SessionExit>,
}

/// Owns the running org sessions.
pub struct SessionSupervisor {
    sessions: Vec<Supervised>,
    shutdown_timeout: Duration,
}

impl SessionSupervisor {
    /// Spawn every session. They start connecting right away.
    pub fn spawn(sessions: Vec<OrgSession>, shutdown_timeout: Duration) -> Self {
        let sessions = sessions
            .into_iter()
            .map(|session| Supervised {
                label: session.label().to_string(),
                cancel: session.cancel_token(),
                status: session.status(),
                task: tokio::spawn(session.run()),
            })
            .collect();
        Self {
            sessions,
            shutdown_timeout,
        }
    }

    /// Wait until each session has either connected or given up. Orgs that
    /// gave up are dropped; the rest keep running.
    ///
    /// Fails with [`Error::NoSessionConnected`] when no org connected.
    /// Cancel safe: dropping the future leaves every session supervised.
    pub async fn wait_started(&mut self) -> Result<()> {
        let settled = join_all(self.sessions.iter_mut().map(|s| async move {
            match s.status.wait_for(|status| status.is_settled()).await {
                Ok(status) => *status,
                Err(_) => SessionStatus::Terminated,
            }
        }))
        .await;

        let mut gone = Vec::new();
        for (session, status) in std::mem::take(&mut self.sessions).into_iter().zip(settled) {
            if status == SessionStatus::Connected {
                self.sessions.push(session);
            } else {
                gone.push(session);
            }
        }
        for session in gone {
            match session.task.await {
                Ok(exit) => warn!(org = %session.label, ?exit, "org unavailable, continuing without it"),
                Err(e) => error!(org = %session.label, error = %e, "org session task failed"),
            }
        }

        if self.sessions.is_empty() {
            error!("no org could be connected");
            return Err(Error::NoSessionConnected);
        }
        info!(orgs = %self.active_labels().join(", "), "relay started");
        Ok(())
    }

    /// Labels of the supervised orgs: every org until startup settles, then
    /// the ones that connected.
    pub fn active_labels(&self) -> Vec<&str> {
        self.sessions.iter().map(|s| s.label.as_str()).collect()
    }

    /// Current status of every running session.
    pub fn statuses(&self) -> Vec<(&str, SessionStatus)> {
        self.sessions
            .iter()
            .map(|s| (s.label.as_str(), *s.status.borrow()))
            .collect()
    }

    /// Stop every session and wait for each to close, bounded by the
    /// shutdown timeout per session. Returns `false` if any session had to
    /// be aborted.
    pub async fn shutdown(self) -> bool {
        for session in &self.sessions {
            session.cancel.cancel();
        }
        let timeout = self.shutdown_timeout;
        let results = join_all(self.sessions.into_iter().map(|session| async move {
            let abort = session.task.abort_handle();
            match tokio::time::timeout(timeout, session.task).await {
                Ok(Ok(exit)) => {
                    debug!(org = %session.label, ?exit, "session closed");
                    true
                },
                Ok(Err(e)) => {
                    error!(org = %session.label, error = %e, "org session task failed");
                    true
                },
                Err(_) => {
                    warn!(org = %session.label, "session did not close in time, aborting");
                    abort.abort();
                    false
                },
            }
        }))
        .await;
        results.into_iter().all(|clean| clean)
    }
}
