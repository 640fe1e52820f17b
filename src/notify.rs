//! "Starting soon" reminders for scheduled calls.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::clock::Clock;
use crate::feed::{ChangeFeed, ChangeFilter};
use crate::models::{ListQuery, ScheduledSession, SessionFilter};
use crate::store::ScheduleStore;
use crate::window::minutes_until;

pub const NOTIFY_LEAD_MINUTES: f64 = 5.0;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub session_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub minutes_until: f64,
    pub message: String,
}

/// One notification per session starting within the lead time. Sessions
/// already started (or exactly now) are skipped.
pub fn due_notifications(sessions: &[ScheduledSession], now: DateTime<Utc>) -> Vec<Notification> {
    sessions
        .iter()
        .filter_map(|s| {
            let minutes = minutes_until(now, s.scheduled_at);
            (minutes > 0.0 && minutes <= NOTIFY_LEAD_MINUTES).then(|| Notification {
                session_id: s.id,
                scheduled_at: s.scheduled_at,
                minutes_until: minutes,
                message: format!(
                    "Video call starting soon, scheduled for {}",
                    s.scheduled_at.format("%H:%M UTC")
                ),
            })
        })
        .collect()
}

/// Applies optional de-duplication on top of [`due_notifications`].
#[derive(Debug, Default)]
pub struct ReminderTracker {
    dedupe: bool,
    notified: HashSet<Uuid>,
}

impl ReminderTracker {
    pub fn new(dedupe: bool) -> Self {
        Self {
            dedupe,
            notified: HashSet::new(),
        }
    }

    pub fn evaluate(&mut self, sessions: &[ScheduledSession], now: DateTime<Utc>) -> Vec<Notification> {
        let due = due_notifications(sessions, now);
        if !self.dedupe {
            return due;
        }
        // forget sessions that started or left the upcoming list
        self.notified
            .retain(|id| sessions.iter().any(|s| s.id == *id && s.scheduled_at > now));
        due.into_iter()
            .filter(|n| self.notified.insert(n.session_id))
            .collect()
    }

    /// True when the tracker remembers nothing and can be dropped.
    pub fn is_idle(&self) -> bool {
        self.notified.is_empty()
    }
}

/// Refetches one viewer's upcoming sessions on every matching change and on
/// a fixed poll interval, forwarding due reminders.
pub struct ReminderWatcher {
    pub store: Arc<dyn ScheduleStore>,
    pub clock: Arc<dyn Clock>,
    pub feed: ChangeFeed,
    pub viewer: SessionFilter,
    pub poll_interval: Duration,
    pub tracker: ReminderTracker,
}

impl ReminderWatcher {
    pub async fn run(mut self, out: mpsc::Sender<Notification>, mut shutdown: watch::Receiver<bool>) {
        let filter = match self.viewer {
            SessionFilter::ByTeacher(id) => ChangeFilter::Teacher(id),
            SessionFilter::ByStudent(id) => ChangeFilter::Student(id),
            SessionFilter::All => ChangeFilter::Any,
        };
        let mut changes = self.feed.subscribe(filter);
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = changes.changed() => {
                    if changed.is_none() {
                        tracing::debug!("change feed closed, stopping reminders");
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }

            let now = self.clock.now();
            let sessions = match self.store.list(&ListQuery::upcoming(self.viewer), now).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to refresh upcoming sessions");
                    continue;
                }
            };
            for n in self.tracker.evaluate(&sessions, now) {
                tracing::info!(session_id = %n.session_id, minutes = n.minutes_until, "call starting soon");
                if out.send(n).await.is_err() {
                    return;
                }
            }
        }
    }
}
