//! Table-granularity invalidation bus driving reactive queries.
//!
//! The tracker maps mutated tables to live subscriptions. A subscription
//! registers a recomputation function together with the set of tables its
//! query reads; every committed write to one of those tables wakes the
//! subscription, which re-runs the query and publishes the full, freshly
//! computed result set through a watch channel - never a delta.
//!
//! Invalidation is deliberately table-granular (any write re-runs every live
//! query on that table). Notifications that pile up before a recomputation
//! runs coalesce into a single re-run.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::Result;

/// Identifier of a persisted table, used as the invalidation granule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(&'static str);

impl TableId {
    /// Creates a table identifier from a static table name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the table name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One committed mutation, broadcast to all live subscriptions.
#[derive(Debug, Clone)]
struct InvalidationEvent {
    /// Unique identifier for tracing.
    event_id: Uuid,
    /// Tables mutated by the committed write.
    tables: Arc<[TableId]>,
}

/// Central invalidation tracker.
///
/// Writers call [`InvalidationTracker::notify`] after a committed write;
/// reactive queries register through [`InvalidationTracker::subscribe`].
/// Notification never blocks the writer: delivery and recomputation happen on
/// subscription tasks, strictly after the commit that triggered them.
#[derive(Debug)]
pub struct InvalidationTracker {
    sender: broadcast::Sender<InvalidationEvent>,
}

impl InvalidationTracker {
    /// Creates a tracker with the given broadcast buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Reports that `tables` were mutated by a committed write.
    ///
    /// Best effort: with no live subscription the event is dropped.
    pub fn notify(&self, tables: &[TableId]) {
        let event = InvalidationEvent {
            event_id: Uuid::new_v4(),
            tables: tables.into(),
        };
        metrics::counter!("invalidation_notify_total").increment(1);
        tracing::debug!(
            event_id = %event.event_id,
            tables = ?event.tables,
            receivers = self.sender.receiver_count(),
            "table invalidation"
        );
        let _ = self.sender.send(event);
    }

    /// Registers a reactive query.
    ///
    /// Runs `recompute` once synchronously to produce the first value, then
    /// spawns a task on the ambient tokio runtime that re-runs it after every
    /// notification whose table set intersects `tables` and publishes the
    /// result. The event receiver is registered before the first run, so a
    /// write committed while the initial read is in flight is queued and
    /// triggers a recomputation rather than being lost. Queued notifications
    /// are drained before each re-run, so a burst of writes costs one
    /// recomputation, not one per write. A lagged receiver (buffer overflow)
    /// is treated as an invalidation.
    ///
    /// Recomputations run on the blocking thread pool; a slow query does not
    /// stall other tasks on the runtime.
    ///
    /// A failed recomputation is logged and the previous snapshot retained;
    /// the subscription stays live.
    ///
    /// # Errors
    ///
    /// Returns the error of the initial `recompute` run.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn subscribe<T, F>(&self, tables: &[TableId], recompute: F) -> Result<QuerySubscription<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let mut events = self.sender.subscribe();
        let initial = recompute()?;
        let (tx, rx) = watch::channel(initial);
        let watched: HashSet<TableId> = tables.iter().copied().collect();
        let id = Uuid::new_v4();
        let recompute = Arc::new(recompute);

        metrics::counter!("invalidation_subscriptions_total").increment(1);
        tracing::debug!(subscription_id = %id, tables = ?tables, "query subscription registered");

        let task = tokio::spawn(async move {
            loop {
                let mut relevant = match events.recv().await {
                    Ok(event) => event.tables.iter().any(|t| watched.contains(t)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        metrics::counter!("invalidation_lagged_total").increment(skipped);
                        true
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                // Coalesce everything already queued into one recomputation.
                loop {
                    match events.try_recv() {
                        Ok(event) => {
                            relevant |= event.tables.iter().any(|t| watched.contains(t));
                        },
                        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                            metrics::counter!("invalidation_lagged_total").increment(skipped);
                            relevant = true;
                        },
                        Err(_) => break,
                    }
                }

                if !relevant {
                    continue;
                }

                metrics::counter!("invalidation_recompute_total").increment(1);
                let run = Arc::clone(&recompute);
                let outcome = match tokio::task::spawn_blocking(move || run()).await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        // The recomputation panicked; no further progress is
                        // possible on this subscription.
                        tracing::warn!(subscription_id = %id, error = %join_err, "query recomputation task failed");
                        break;
                    },
                };
                match outcome {
                    Ok(value) => {
                        // Receiver dropped: the subscription is gone.
                        if tx.send(value).is_err() {
                            break;
                        }
                    },
                    Err(err) => {
                        tracing::warn!(subscription_id = %id, error = %err, "query recomputation failed");
                    },
                }
            }
        });

        Ok(QuerySubscription {
            id,
            receiver: rx,
            task,
        })
    }
}

/// A live reactive query.
///
/// Holds the latest full result snapshot; [`QuerySubscription::next`] waits
/// for the snapshot published after the next relevant mutation. Dropping the
/// subscription (or calling [`QuerySubscription::unsubscribe`]) cancels the
/// recomputation task; an in-flight result is discarded, never delivered.
#[derive(Debug)]
pub struct QuerySubscription<T> {
    id: Uuid,
    receiver: watch::Receiver<T>,
    task: JoinHandle<()>,
}

impl<T: Clone> QuerySubscription<T> {
    /// Returns the latest published snapshot.
    #[must_use]
    pub fn current(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Waits for the next published snapshot.
    ///
    /// Returns `None` once the subscription is cancelled. Snapshots published
    /// while the caller was not waiting are not replayed; only the latest one
    /// is observed (full snapshots, not deltas, make intermediate states
    /// redundant).
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

impl<T> QuerySubscription<T> {
    /// Returns the subscription identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Cancels the subscription.
    ///
    /// Equivalent to dropping it; safe while a recomputation is in flight.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for QuerySubscription<T> {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!(subscription_id = %self.id, "query subscription cancelled");
    }
}
