//! Capacity waiting
//!
//! After a load balancer is attached, the waiter polls until enough of the
//! group's instances are healthy on that one load balancer. Health reported
//! by any other load balancer on the group is never consulted.
//!
//! The loop ends when:
//! - the healthy count reaches the target (success),
//! - the deadline passes (`WaitError::Timeout`), even in the middle of a poll,
//! - a non-retryable API error occurs, or the group disappears,
//! - the cancellation token fires (`WaitError::Cancelled`).
//!
//! Throttling and other transient errors are retried until the deadline.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::attachment::AttachmentKind;
use crate::client::AutoScalingApi;
use crate::error::ApiError;

/// Default delay between two polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default time to wait for capacity (10 minutes)
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration for a capacity wait
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Delay between two polls
    pub poll_interval: Duration,
    /// Maximum total time to wait
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

/// Why a capacity wait did not succeed
#[derive(Debug, Error)]
pub enum WaitError {
    #[error(
        "timeout after {elapsed:?} waiting for {target} healthy instance(s), last observed {observed}{}",
        last_error.as_ref().map(|e| format!(" (last error: {})", e)).unwrap_or_default()
    )]
    Timeout {
        target: usize,
        observed: usize,
        elapsed: Duration,
        last_error: Option<ApiError>,
    },

    #[error("wait for capacity was cancelled")]
    Cancelled,

    #[error("autoscaling group \"{0}\" not found")]
    GroupNotFound(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Outcome of a successful wait
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityReport {
    pub healthy: usize,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Bookkeeping for one wait call
struct PollState<'a> {
    group: &'a str,
    target: usize,
    observed: usize,
    polls: u32,
    started: Instant,
    deadline: Instant,
    last_error: Option<ApiError>,
}

impl PollState<'_> {
    fn timeout(self, now: Instant) -> WaitError {
        WaitError::Timeout {
            target: self.target,
            observed: self.observed,
            elapsed: now - self.started,
            last_error: self.last_error,
        }
    }
}

/// Polls one group/load balancer pair until it reaches a healthy count
pub struct CapacityWaiter<'a, C: AutoScalingApi + ?Sized> {
    api: &'a C,
    config: WaitConfig,
}

impl<'a, C: AutoScalingApi + ?Sized> CapacityWaiter<'a, C> {
    pub fn new(api: &'a C, config: WaitConfig) -> Self {
        Self { api, config }
    }

    /// Wait until `target` instances of `group` are healthy on `load_balancer`
    ///
    /// A target of zero succeeds immediately without any API call. A target
    /// the group can never reach is not detected early; only the timeout ends
    /// the wait, since the group may be resized meanwhile.
    pub async fn wait(
        &self,
        group: &str,
        load_balancer: &AttachmentKind,
        target: usize,
        cancel: &CancellationToken,
    ) -> Result<CapacityReport, WaitError> {
        if target == 0 {
            return Ok(CapacityReport {
                healthy: 0,
                polls: 0,
                elapsed: Duration::ZERO,
            });
        }

        let started = Instant::now();
        let mut state = PollState {
            group,
            target,
            observed: 0,
            polls: 0,
            started,
            deadline: started + self.config.timeout,
            last_error: None,
        };

        info!(
            "Waiting up to {:?} for {} healthy instance(s) of {} on {}",
            self.config.timeout, target, group, load_balancer
        );

        loop {
            if cancel.is_cancelled() {
                return Err(WaitError::Cancelled);
            }

            state.polls += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep_until(state.deadline) => {
                    warn!("{}: capacity poll still running at the deadline", state.group);
                    return Err(state.timeout(Instant::now()));
                }
                result = self.count_healthy(state.group, load_balancer) => result,
            };

            match result {
                Ok(healthy) => {
                    state.observed = healthy;
                    state.last_error = None;
                    debug!(
                        "{}: {}/{} healthy on {} (poll {})",
                        state.group, healthy, state.target, load_balancer, state.polls
                    );
                    if healthy >= state.target {
                        return Ok(CapacityReport {
                            healthy,
                            polls: state.polls,
                            elapsed: started.elapsed(),
                        });
                    }
                }
                Err(WaitError::Api(err)) if err.is_retryable() => {
                    warn!("{}: transient error while polling capacity: {}", state.group, err);
                    state.last_error = Some(err);
                }
                Err(err) => return Err(err),
            }

            let now = Instant::now();
            if now >= state.deadline {
                return Err(state.timeout(now));
            }

            let pause = self.config.poll_interval.min(state.deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Count group members that are healthy on this load balancer
    async fn count_healthy(
        &self,
        group: &str,
        load_balancer: &AttachmentKind,
    ) -> Result<usize, WaitError> {
        let asg = self
            .api
            .describe_group(group)
            .await?
            .ok_or_else(|| WaitError::GroupNotFound(group.to_string()))?;

        let members: HashSet<&str> = asg.instance_ids.iter().map(String::as_str).collect();

        let health = self.api.describe_health(load_balancer).await?;
        Ok(health
            .iter()
            .filter(|h| h.state.is_healthy() && members.contains(h.instance_id.as_str()))
            .count())
    }
}
