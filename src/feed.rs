//! In-process change feed.
//!
//! Every store mutation publishes a [`ChangeEvent`]. Subscribers filter by
//! teacher or student id and refetch their whole view on any match; events
//! carry ids only, never row contents.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const SCHEDULES_TABLE: &str = "video_call_schedules";

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: &'static str,
    pub kind: ChangeKind,
    pub row_id: Uuid,
    pub teacher_id: Uuid,
    pub student_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFilter {
    Any,
    Teacher(Uuid),
    Student(Uuid),
}

impl ChangeFilter {
    pub fn matches(&self, ev: &ChangeEvent) -> bool {
        match *self {
            ChangeFilter::Any => true,
            ChangeFilter::Teacher(id) => ev.teacher_id == id,
            ChangeFilter::Student(id) => ev.student_id == id,
        }
    }
}

#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, ev: ChangeEvent) {
        // no receivers is fine
        let _ = self.tx.send(ev);
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: ChangeFilter,
}

impl Subscription {
    /// Waits for the next change relevant to this subscriber. Returns `None`
    /// once the feed is gone. A lagged receiver reports a change, since the
    /// consumer refetches everything anyway.
    pub async fn changed(&mut self) -> Option<()> {
        loop {
            match self.rx.recv().await {
                Ok(ev) if self.filter.matches(&ev) => return Some(()),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "change feed lagged");
                    return Some(());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
