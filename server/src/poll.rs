//! # Status Polling
//!
//! The initiating session has no push channel: after submitting a signup or
//! reset it learns about the email click by polling the status queries. This
//! module is the client half of that contract.
//!
//! A poll session is one spawned task selecting over three futures: a cancel
//! watch, a wall-clock deadline, and an interval ticker whose first tick
//! fires immediately. The deadline is armed once and never extended, so a
//! slow probe cannot stretch it. [`StatusPoller`] keeps at most one live
//! session per poll kind; starting a new one tears the old one down first.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::warn;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const POLL_DEADLINE: Duration = Duration::from_secs(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    Signup,
    Reset,
}

/// Terminal result of one poll session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Confirmed,
    TimedOut,
    Cancelled,
}

/// Where a confirmation flow currently stands, for driving a client UI.
/// One enumeration instead of a pile of booleans; impossible combinations
/// cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    Submitting,
    AwaitingConfirmation,
    Confirmed,
    TimedOut,
    Failed,
}

impl FlowState {
    pub fn from_outcome(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Confirmed => FlowState::Confirmed,
            PollOutcome::TimedOut => FlowState::TimedOut,
            PollOutcome::Cancelled => FlowState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            deadline: POLL_DEADLINE,
        }
    }
}

#[derive(Debug, Error)]
#[error("status probe failed: {0}")]
pub struct ProbeError(pub String);

struct PollSession {
    cancel: watch::Sender<bool>,
    task: JoinHandle<PollOutcome>,
}

/// Owns the poll sessions of one client. At most one interval timer and one
/// deadline timer exist per kind at any moment.
#[derive(Default)]
pub struct StatusPoller {
    signup: Option<PollSession>,
    reset: Option<PollSession>,
}

impl StatusPoller {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, kind: PollKind) -> &mut Option<PollSession> {
        match kind {
            PollKind::Signup => &mut self.signup,
            PollKind::Reset => &mut self.reset,
        }
    }

    /// Start polling. Any prior session of the same kind is cancelled first.
    ///
    /// `probe` is called once immediately and then once per interval tick;
    /// `Ok(true)` confirms, `Ok(false)` keeps waiting, and errors are
    /// logged and treated as "not yet" so a transient network failure does
    /// not kill the session.
    pub fn start<F, Fut>(&mut self, kind: PollKind, config: PollConfig, probe: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool, ProbeError>> + Send + 'static,
    {
        self.cancel(kind);

        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_poll(probe, config, cancel_rx));
        *self.slot(kind) = Some(PollSession { cancel, task });
    }

    /// Stop a session, if one is live. Safe at any time; no further probes
    /// are issued afterwards.
    pub fn cancel(&mut self, kind: PollKind) {
        if let Some(session) = self.slot(kind).take() {
            let _ = session.cancel.send(true);
            session.task.abort();
        }
    }

    /// Wait for the current session of `kind` to reach a terminal outcome.
    /// Returns `None` if no session was started.
    pub async fn wait(&mut self, kind: PollKind) -> Option<PollOutcome> {
        let session = self.slot(kind).take()?;
        Some(session.task.await.unwrap_or(PollOutcome::Cancelled))
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.cancel(PollKind::Signup);
        self.cancel(PollKind::Reset);
    }
}

async fn run_poll<F, Fut>(
    mut probe: F,
    config: PollConfig,
    mut cancel_rx: watch::Receiver<bool>,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, ProbeError>>,
{
    let deadline = sleep(config.deadline);
    tokio::pin!(deadline);
    let mut ticker = interval(config.interval);

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => return PollOutcome::Cancelled,
            _ = &mut deadline => return PollOutcome::TimedOut,
            _ = ticker.tick() => match probe().await {
                Ok(true) => return PollOutcome::Confirmed,
                Ok(false) => {}
                Err(e) => warn!("status probe failed, will retry: {e}"),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyStatus {
    is_verified: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetStatus {
    reset_verified: bool,
}

/// Signup probe against a running server.
pub async fn check_verify_status(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
) -> Result<bool, ProbeError> {
    let response = client
        .get(format!("{base_url}/api/auth/verify-status"))
        .query(&[("email", email)])
        .send()
        .await
        .map_err(|e| ProbeError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ProbeError(format!("status {}", response.status())));
    }

    let status: VerifyStatus = response.json().await.map_err(|e| ProbeError(e.to_string()))?;
    Ok(status.is_verified)
}

/// Reset probe against a running server.
pub async fn check_reset_status(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
    observed_version: u64,
) -> Result<bool, ProbeError> {
    let response = client
        .get(format!("{base_url}/api/auth/check-reset"))
        .query(&[
            ("email", email.to_string()),
            ("tokenVersion", observed_version.to_string()),
        ])
        .send()
        .await
        .map_err(|e| ProbeError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(ProbeError(format!("status {}", response.status())));
    }

    let status: ResetStatus = response.json().await.map_err(|e| ProbeError(e.to_string()))?;
    Ok(status.reset_verified)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast() -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(150),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn confirms_once_the_probe_reports_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut poller = StatusPoller::new();
        poller.start(PollKind::Signup, fast(), move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 2) }
        });

        assert_eq!(
            poller.wait(PollKind::Signup).await,
            Some(PollOutcome::Confirmed)
        );
        // Immediate first probe plus two interval ticks.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_the_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut poller = StatusPoller::new();
        poller.start(PollKind::Signup, fast(), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        });

        assert_eq!(
            poller.wait(PollKind::Signup).await,
            Some(PollOutcome::TimedOut)
        );
        // 150s deadline over a 5s cadence: the tick racing the deadline may
        // or may not land, anything outside [29, 31] is a broken timer.
        let calls = calls.load(Ordering::SeqCst);
        assert!((29..=31).contains(&calls), "{calls} probes");
    }

    #[tokio::test(start_paused = true)]
    async fn probe_errors_do_not_end_the_session() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut poller = StatusPoller::new();
        poller.start(PollKind::Reset, fast(), move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ProbeError("connection refused".to_string()))
                } else {
                    Ok(n >= 1)
                }
            }
        });

        assert_eq!(
            poller.wait(PollKind::Reset).await,
            Some(PollOutcome::Confirmed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_probing_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut poller = StatusPoller::new();
        poller.start(PollKind::Signup, fast(), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        poller.cancel(PollKind::Signup);
        let after_cancel = calls.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
        assert_eq!(poller.wait(PollKind::Signup).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_again_replaces_the_previous_session() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let mut poller = StatusPoller::new();
        let seen = first_calls.clone();
        poller.start(PollKind::Signup, fast(), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        let first_seen = first_calls.load(Ordering::SeqCst);

        let seen = second_calls.clone();
        poller.start(PollKind::Signup, fast(), move || {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 1) }
        });

        assert_eq!(
            poller.wait(PollKind::Signup).await,
            Some(PollOutcome::Confirmed)
        );
        // The first session stopped probing when it was replaced.
        assert_eq!(first_calls.load(Ordering::SeqCst), first_seen);
        assert!(second_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_poll_independently() {
        let mut poller = StatusPoller::new();

        poller.start(PollKind::Signup, fast(), || async { Ok(true) });
        poller.start(PollKind::Reset, fast(), || async { Ok(false) });

        assert_eq!(
            poller.wait(PollKind::Signup).await,
            Some(PollOutcome::Confirmed)
        );
        assert_eq!(
            poller.wait(PollKind::Reset).await,
            Some(PollOutcome::TimedOut)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_wall_clock_not_probe_count() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();

        let mut poller = StatusPoller::new();
        let config = PollConfig {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(30),
        };
        poller.start(PollKind::Reset, config, move || {
            seen.fetch_add(1, Ordering::SeqCst);
            async {
                // A probe slower than the interval.
                tokio::time::sleep(Duration::from_secs(20)).await;
                Ok(false)
            }
        });

        assert_eq!(
            poller.wait(PollKind::Reset).await,
            Some(PollOutcome::TimedOut)
        );
        // Far fewer probes than deadline / interval would suggest.
        assert!(calls.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn flow_state_maps_outcomes() {
        assert_eq!(
            FlowState::from_outcome(PollOutcome::Confirmed),
            FlowState::Confirmed
        );
        assert_eq!(
            FlowState::from_outcome(PollOutcome::TimedOut),
            FlowState::TimedOut
        );
        assert_eq!(
            FlowState::from_outcome(PollOutcome::Cancelled),
            FlowState::Idle
        );
    }
}
