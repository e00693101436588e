use std::time::{Duration, Instant};

use crate::scheduler::{Scheduler, TimerToken};
use crate::settings::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Expiry;

/// Single-slot notification feed: the newest message replaces the visible
/// one and restarts the expiry countdown.
#[derive(Debug)]
pub struct NotificationQueue {
    ttl: Duration,
    current: Option<Notification>,
    timers: Scheduler<Expiry>,
    expiry: Option<TimerToken>,
}

impl NotificationQueue {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            current: None,
            timers: Scheduler::new(),
            expiry: None,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.notification_ttl())
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn current(&self) -> Option<&Notification> {
        self.current.as_ref()
    }

    pub fn push_at(
        &mut self,
        message: impl Into<String>,
        kind: NotificationKind,
        now: Instant,
    ) -> &Notification {
        self.cancel_expiry();
        self.expiry = Some(self.timers.schedule(now + self.ttl, Expiry));
        self.current.insert(Notification {
            message: message.into(),
            kind,
            created_at: now,
        })
    }

    pub fn success_at(&mut self, message: impl Into<String>, now: Instant) -> &Notification {
        self.push_at(message, NotificationKind::Success, now)
    }

    pub fn error_at(&mut self, message: impl Into<String>, now: Instant) -> &Notification {
        self.push_at(message, NotificationKind::Error, now)
    }

    pub fn dismiss(&mut self) -> Option<Notification> {
        self.cancel_expiry();
        self.current.take()
    }

    /// Clears the slot if its countdown has run out. Returns whether it did.
    pub fn expire_at(&mut self, now: Instant) -> bool {
        let mut expired = false;
        for (token, Expiry) in self.timers.pop_due(now) {
            if self.expiry == Some(token) {
                self.expiry = None;
                expired |= self.current.take().is_some();
            }
        }
        expired
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.expiry.and_then(|token| self.timers.deadline(token))
    }

    fn cancel_expiry(&mut self) {
        if let Some(token) = self.expiry.take() {
            self.timers.cancel(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{NotificationKind, NotificationQueue};
    use crate::scheduler::{Clock, ManualClock};

    #[test]
    fn notification_expires_after_ttl() {
        let clock = ManualClock::new();
        let mut queue = NotificationQueue::new(Duration::from_secs(3));
        queue.success_at("Record added", clock.now());

        clock.advance(Duration::from_millis(2_999));
        assert!(!queue.expire_at(clock.now()));
        assert!(queue.current().is_some());

        clock.advance(Duration::from_millis(1));
        assert!(queue.expire_at(clock.now()));
        assert!(queue.current().is_none());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn newer_push_replaces_message_and_resets_countdown() {
        let clock = ManualClock::new();
        let mut queue = NotificationQueue::new(Duration::from_secs(3));
        queue.success_at("first", clock.now());

        clock.advance(Duration::from_secs(2));
        queue.error_at("second", clock.now());

        clock.advance(Duration::from_secs(2));
        assert!(!queue.expire_at(clock.now()));
        let current = queue.current().expect("second message should be visible");
        assert_eq!(current.message, "second");
        assert_eq!(current.kind, NotificationKind::Error);

        clock.advance(Duration::from_secs(1));
        assert!(queue.expire_at(clock.now()));
    }

    #[test]
    fn manual_dismissal_cancels_pending_expiry() {
        let clock = ManualClock::new();
        let mut queue = NotificationQueue::new(Duration::from_secs(3));
        queue.error_at("boom", clock.now());

        let dismissed = queue.dismiss().expect("message should be dismissed");
        assert_eq!(dismissed.message, "boom");
        assert_eq!(queue.next_deadline(), None);

        queue.success_at("later", clock.now());
        clock.advance(Duration::from_secs(3));
        assert!(queue.expire_at(clock.now()));
    }
}
