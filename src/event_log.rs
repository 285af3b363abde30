use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Retained entries; older ones are dropped.
pub const MAX_LOG_ENTRIES: usize = 100;

const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
    Send,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub kind: LogKind,
}

/// Bounded, newest-first event log shared by the scheduler, the registry and
/// the transport.
///
/// Cheap to clone; all clones share the same entries. Every record is also
/// emitted through `tracing` and broadcast to live subscribers.
#[derive(Clone)]
pub struct EventLog {
    entries: Arc<RwLock<VecDeque<LogEntry>>>,
    events: broadcast::Sender<LogEntry>,
}

impl Default for EventLog {
    fn default() -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_LOG_ENTRIES + 1))),
            events,
        }
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend an entry, trimming the tail down to [`MAX_LOG_ENTRIES`].
    pub async fn record(&self, kind: LogKind, message: impl Into<String>) {
        let entry = LogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message: message.into(),
            kind,
        };

        match kind {
            LogKind::Warning => warn!(kind = ?kind, "{}", entry.message),
            LogKind::Error => error!(kind = ?kind, "{}", entry.message),
            _ => info!(kind = ?kind, "{}", entry.message),
        }

        {
            let mut entries = self.entries.write().await;
            entries.push_front(entry.clone());
            entries.truncate(MAX_LOG_ENTRIES);
        }

        // No subscribers is fine.
        let _ = self.events.send(entry);
    }

    /// Snapshot, newest first.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Live stream of entries recorded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.events.subscribe()
    }

    #[cfg(test)]
    pub async fn count(&self, kind: LogKind) -> usize {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}
