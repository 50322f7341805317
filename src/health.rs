use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::config::{HEALTH_CHECK_INTERVAL, RECONNECT_DELAY};
use crate::event::AppEvent;
use crate::transport::ChatTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Unknown,
    Connected,
    Disconnected,
}

/// Things outside the timer that warrant a fresh check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTrigger {
    /// The client became visible again (terminal focus gained).
    Visible,
    /// The user asked for a recheck.
    Recheck,
    ServerChanged,
}

/// How failed checks are retried while disconnected. The delay never grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>, // None retries forever
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay, max_attempts: None }
    }

    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
        }
    }

    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(RECONNECT_DELAY)
    }
}

#[derive(Debug)]
pub struct HealthMonitor {
    status: ConnectionStatus,
    interval: Duration,
    retry: RetryPolicy,
    retry_attempts: u32,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HEALTH_CHECK_INTERVAL, RetryPolicy::default())
    }
}

impl HealthMonitor {
    pub fn new(interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            status: ConnectionStatus::Unknown,
            interval,
            retry,
            retry_attempts: 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Applies one check result. Returns the delay after which to retry, if any.
    pub fn record(&mut self, healthy: bool) -> Option<Duration> {
        let previous = self.status;
        if healthy {
            self.status = ConnectionStatus::Connected;
            self.retry_attempts = 0;
            if previous != ConnectionStatus::Connected {
                info!("server reachable");
            }
            return None;
        }

        self.status = ConnectionStatus::Disconnected;
        if previous != ConnectionStatus::Disconnected {
            warn!("server unreachable");
        }
        let attempt = self.retry_attempts + 1;
        if self.retry.allows(attempt) {
            self.retry_attempts = attempt;
            Some(self.retry.delay)
        } else {
            None
        }
    }

    /// Runs until the trigger channel closes or nobody listens to the reports.
    pub async fn run(
        mut self,
        transport: Arc<dyn ChatTransport>,
        mut triggers: mpsc::Receiver<HealthTrigger>,
        events: mpsc::Sender<AppEvent>,
    ) {
        let mut ticker = time::interval(self.interval); // First tick fires immediately: startup check
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry_at: Option<Instant> = None;

        loop {
            let retry_deadline = retry_at;
            let retry_sleep = async move {
                match retry_deadline {
                    Some(deadline) => time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let healthy = tokio::select! {
                _ = ticker.tick() => {
                    debug!("scheduled health check");
                    transport.check_health().await
                }
                _ = retry_sleep => {
                    retry_at = None;
                    debug!(attempt = self.retry_attempts, "reconnect attempt");
                    transport.check_health().await
                }
                trigger = triggers.recv() => match trigger {
                    None => break,
                    Some(trigger) => {
                        debug!(?trigger, "triggered health check");
                        transport.check_health().await
                    }
                },
            };

            match self.record(healthy) {
                Some(delay) if retry_at.is_none() => retry_at = Some(Instant::now() + delay),
                Some(_) => {}
                None => retry_at = None,
            }

            if events.send(AppEvent::Health(healthy)).await.is_err() {
                break;
            }
        }
        debug!("health monitor stopped");
    }
}
