//! Connection lifecycle state machine.
//!
//! Every transition is a plain method call taking the current instant, so the
//! controller can be driven without real timers. While `Connecting`, exactly
//! one poll timer and one timeout timer are pending.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::ConnectionError;
use crate::gateway::BackendError;
use crate::scheduler::{Scheduler, TimerToken};
use crate::settings::EngineSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionTimer {
    Poll,
    Timeout,
}

/// Work the owner must perform after timers fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Issue a table-list probe and report its outcome back.
    Probe,
    /// The handshake gave up; surface this to the user.
    TimedOut(ConnectionError),
}

#[derive(Debug)]
pub struct ConnectionController {
    state: ConnectionState,
    poll_interval: Duration,
    timeout: Duration,
    timers: Scheduler<ConnectionTimer>,
    poll: Option<TimerToken>,
    deadline: Option<TimerToken>,
    been_ready: bool,
    failed_probes: u32,
    last_error: Option<BackendError>,
}

impl ConnectionController {
    #[must_use]
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Idle,
            poll_interval,
            timeout,
            timers: Scheduler::new(),
            poll: None,
            deadline: None,
            been_ready: false,
            failed_probes: 0,
            last_error: None,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.poll_interval(), settings.connect_timeout())
    }

    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    #[must_use]
    pub fn has_been_ready(&self) -> bool {
        self.been_ready
    }

    #[must_use]
    pub fn failed_probes(&self) -> u32 {
        self.failed_probes
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&BackendError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// When the pending handshake gives up. `None` outside `Connecting`.
    #[must_use]
    pub fn handshake_deadline(&self) -> Option<Instant> {
        self.deadline.and_then(|token| self.timers.deadline(token))
    }

    /// Enters `Connecting`, replacing any poll/timeout pair left from an
    /// earlier attempt.
    pub fn start_at(&mut self, now: Instant) -> &ConnectionState {
        self.cancel_timers();
        self.failed_probes = 0;
        self.last_error = None;
        self.transition(ConnectionState::Connecting);
        self.poll = Some(
            self.timers
                .schedule(now + self.poll_interval, ConnectionTimer::Poll),
        );
        self.deadline = Some(
            self.timers
                .schedule(now + self.timeout, ConnectionTimer::Timeout),
        );
        &self.state
    }

    /// Success path shared by a successful probe and the `backendReady` push.
    /// Returns `false` when the handshake is not pending, so whichever signal
    /// arrives second is a no-op.
    pub fn mark_ready(&mut self) -> bool {
        if !self.is_connecting() {
            return false;
        }
        self.cancel_timers();
        self.been_ready = true;
        self.transition(ConnectionState::Ready);
        true
    }

    /// Records a failed handshake probe.
    ///
    /// First-contact failures are retried silently on the next poll. Once the
    /// connection has been `Ready` before, a failing handshake is reported and
    /// polling stops.
    pub fn probe_failed_at(
        &mut self,
        now: Instant,
        error: BackendError,
    ) -> Option<ConnectionError> {
        if !self.is_connecting() {
            return None;
        }

        if self.been_ready {
            self.cancel_timers();
            let reported = ConnectionError::Lost(error);
            self.transition(ConnectionState::Failed(reported.to_string()));
            return Some(reported);
        }

        self.failed_probes += 1;
        debug!(
            attempt = self.failed_probes,
            error = %error,
            "handshake probe failed, retrying"
        );
        self.last_error = Some(error);
        if let Some(token) = self.poll.take() {
            self.timers.cancel(token);
        }
        self.poll = Some(
            self.timers
                .schedule(now + self.poll_interval, ConnectionTimer::Poll),
        );
        None
    }

    /// A request failed after `Ready`. Transport loss moves the controller to
    /// `Failed`; other errors leave it untouched.
    pub fn connection_lost(&mut self, error: &BackendError) -> Option<ConnectionError> {
        if !self.is_ready() || !error.is_disconnected() {
            return None;
        }
        let reported = ConnectionError::Lost(error.clone());
        self.transition(ConnectionState::Failed(reported.to_string()));
        Some(reported)
    }

    pub fn fire_due(&mut self, now: Instant) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        for (token, timer) in self.timers.pop_due(now) {
            match timer {
                ConnectionTimer::Poll => {
                    if self.poll == Some(token) {
                        self.poll = None;
                    }
                    if self.is_connecting() {
                        events.push(ConnectionEvent::Probe);
                    }
                }
                ConnectionTimer::Timeout => {
                    if self.deadline == Some(token) {
                        self.deadline = None;
                    }
                    if let Some(error) = self.time_out() {
                        events.retain(|event| *event != ConnectionEvent::Probe);
                        events.push(ConnectionEvent::TimedOut(error));
                    }
                }
            }
        }
        events
    }

    /// Gives up the pending handshake: `Failed("connection timeout")` with no
    /// timers left. Also used when a probe is still in flight at the deadline.
    pub fn time_out(&mut self) -> Option<ConnectionError> {
        if !self.is_connecting() {
            return None;
        }
        self.cancel_timers();
        self.transition(ConnectionState::Failed("connection timeout".to_string()));
        Some(ConnectionError::Timeout {
            last_error: self.last_error.as_ref().map(ToString::to_string),
        })
    }

    /// Explicit disconnect: back to `Idle` with no timers and a fresh history.
    pub fn reset(&mut self) {
        self.cancel_timers();
        self.been_ready = false;
        self.failed_probes = 0;
        self.last_error = None;
        self.transition(ConnectionState::Idle);
    }

    fn cancel_timers(&mut self) {
        self.poll = None;
        self.deadline = None;
        self.timers.clear();
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "connection state changed");
        }
        self.state = next;
    }
}
