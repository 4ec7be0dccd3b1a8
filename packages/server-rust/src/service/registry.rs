//! Execution registry: correlates in-flight execution tokens with the result
//! that eventually completes them.
//!
//! Each token maps to a [`Waiter`], a single-assignment slot paired with a
//! [`Notify`]. Callers hold a [`Registration`] while they are interested in
//! a token; dropping the last one removes the entry, so an abandoned request
//! never leaks it. Async dispatches [`detach`](Registration::detach) their
//! registration to keep the entry for a later retrieval, and the reaper
//! expires detached entries nobody came back for.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::{ExecutionId, InvocationMessage};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::worker::BackgroundRunnable;

// ---------------------------------------------------------------------------
// Completion / errors
// ---------------------------------------------------------------------------

/// A result delivered to a waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub message: InvocationMessage,
    pub received_at: SystemTime,
}

/// What [`ExecutionRegistry::complete`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Delivered,
    /// No live entry for the token; the result was dropped.
    Unknown,
    /// The entry already holds a result; the new one was dropped.
    AlreadyCompleted,
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("no result within {0:?}")]
    TimedOut(Duration),
}

// ---------------------------------------------------------------------------
// Waiter
// ---------------------------------------------------------------------------

/// Per-execution synchronization handle.
#[derive(Debug)]
pub struct Waiter {
    slot: Mutex<Option<Completion>>,
    notify: Notify,
    holders: AtomicUsize,
    created_at: Instant,
}

impl Waiter {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
            holders: AtomicUsize::new(0),
            created_at: Instant::now(),
        }
    }

    fn fill(&self, message: InvocationMessage) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(Completion {
                message,
                received_at: SystemTime::now(),
            });
        }
        self.notify.notify_waiters();
        true
    }

    fn peek(&self) -> Option<Completion> {
        self.slot.lock().clone()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_some()
    }

    async fn wait_filled(&self) -> Completion {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the slot so a fill between the
            // check and the await still wakes us.
            notified.as_mut().enable();
            if let Some(done) = self.peek() {
                return done;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionRegistry
// ---------------------------------------------------------------------------

/// Concurrent map from execution token to [`Waiter`].
///
/// Cloning is cheap and yields a handle to the same map. The map's shard
/// locks are held only for lookups and inserts, never across an await.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRegistry {
    entries: Arc<DashMap<ExecutionId, Arc<Waiter>>>,
}

impl ExecutionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `id`, creating the entry if absent.
    ///
    /// Re-registering a live token joins the existing waiter, so an async
    /// dispatch followed by an immediate retrieval share one result.
    #[must_use = "dropping the registration immediately deregisters it"]
    pub fn register(&self, id: &ExecutionId) -> Registration {
        let waiter = {
            let entry = self
                .entries
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Waiter::new()));
            // Counted under the shard lock so a concurrent release or reap
            // cannot remove the entry between lookup and increment.
            entry.holders.fetch_add(1, Ordering::AcqRel);
            Arc::clone(entry.value())
        };
        Registration {
            registry: self.clone(),
            id: id.clone(),
            waiter,
            held: true,
        }
    }

    /// Delivers `message` to the waiter registered for `id`.
    ///
    /// The first completion per registration wins. A result for a token with
    /// no live entry is logged and dropped.
    pub fn complete(&self, id: &ExecutionId, message: InvocationMessage) -> CompleteOutcome {
        let Some(waiter) = self.entries.get(id).map(|e| Arc::clone(e.value())) else {
            warn!(execution_id = %id, "received unknown result");
            return CompleteOutcome::Unknown;
        };
        if waiter.fill(message) {
            debug!(execution_id = %id, "result delivered");
            CompleteOutcome::Delivered
        } else {
            warn!(execution_id = %id, "duplicate result ignored");
            CompleteOutcome::AlreadyCompleted
        }
    }

    /// Removes the entry for `id` regardless of outstanding registrations.
    /// Returns `true` if an entry was removed.
    pub fn deregister(&self, id: &ExecutionId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Number of live entries.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn contains(&self, id: &ExecutionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Removes unheld entries older than `ttl`. Returns how many were removed.
    pub fn reap_detached(&self, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, waiter| {
            waiter.holders.load(Ordering::Acquire) > 0 || waiter.created_at.elapsed() < ttl
        });
        before.saturating_sub(self.entries.len())
    }

    fn release(&self, id: &ExecutionId, waiter: &Arc<Waiter>) {
        if waiter.holders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.entries.remove_if(id, |_, current| {
                Arc::ptr_eq(current, waiter) && current.holders.load(Ordering::Acquire) == 0
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// RAII interest in one execution token.
#[derive(Debug)]
pub struct Registration {
    registry: ExecutionRegistry,
    id: ExecutionId,
    waiter: Arc<Waiter>,
    held: bool,
}

impl Registration {
    #[must_use]
    pub fn id(&self) -> &ExecutionId {
        &self.id
    }

    /// Waits for the result, up to `deadline` when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::TimedOut`] when the deadline elapses first.
    pub async fn wait(&self, deadline: Option<Duration>) -> Result<Completion, WaitError> {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, self.waiter.wait_filled())
                .await
                .map_err(|_| WaitError::TimedOut(limit)),
            None => Ok(self.waiter.wait_filled().await),
        }
    }

    /// Gives up this handle but leaves the entry registered, so a later
    /// retrieval by id can still join it. The reaper expires it eventually.
    pub fn detach(mut self) {
        self.waiter.holders.fetch_sub(1, Ordering::AcqRel);
        self.held = false;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.held {
            self.registry.release(&self.id, &self.waiter);
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryReaper
// ---------------------------------------------------------------------------

/// Expires detached entries on every worker tick, or on demand.
pub struct RegistryReaper {
    registry: ExecutionRegistry,
    ttl: Duration,
}

/// On-demand reaper request.
#[derive(Debug)]
pub struct ReapNow;

impl RegistryReaper {
    #[must_use]
    pub fn new(registry: ExecutionRegistry, ttl: Duration) -> Self {
        Self { registry, ttl }
    }

    fn sweep(&self) {
        let reaped = self.registry.reap_detached(self.ttl);
        if reaped > 0 {
            info!(reaped, pending = self.registry.pending(), "expired detached executions");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for RegistryReaper {
    type Task = ReapNow;

    async fn run(&mut self, _task: ReapNow) {
        self.sweep();
    }

    async fn on_tick(&mut self) {
        self.sweep();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn msg(id: &str, body: &str) -> InvocationMessage {
        InvocationMessage::new(ExecutionId::from(id), false, body)
    }

    #[tokio::test]
    async fn complete_wakes_waiter() {
        let registry = ExecutionRegistry::new();
        let id = ExecutionId::from("a");
        let reg = registry.register(&id);

        let completer = {
            let registry = registry.clone();
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry.complete(&id, msg("a", "done"))
            })
        };

        let done = reg.wait(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(done.message.user_data(), "done");
        assert_eq!(completer.await.unwrap(), CompleteOutcome::Delivered);
    }

    #[tokio::test]
    async fn completion_before_wait_is_not_lost() {
        let registry = ExecutionRegistry::new();
        let id = ExecutionId::from("early");
        let reg = registry.register(&id);
        assert_eq!(registry.complete(&id, msg("early", "x")), CompleteOutcome::Delivered);
        let done = reg.wait(Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(done.message.user_data(), "x");
    }

    #[tokio::test]
    async fn first_completion_wins() {
        let registry = ExecutionRegistry::new();
        let id = ExecutionId::from("dup");
        let reg = registry.register(&id);
        assert_eq!(registry.complete(&id, msg("dup", "one")), CompleteOutcome::Delivered);
        assert_eq!(
            registry.complete(&id, msg("dup", "two")),
            CompleteOutcome::AlreadyCompleted
        );
        let done = reg.wait(None).await.unwrap();
        assert_eq!(done.message.user_data(), "one");
    }

    #[test]
    fn unknown_result_leaves_registry_untouched() {
        let registry = ExecutionRegistry::new();
        let _other = registry.register(&ExecutionId::from("other"));
        let outcome = registry.complete(&ExecutionId::from("ghost"), msg("ghost", "x"));
        assert_eq!(outcome, CompleteOutcome::Unknown);
        assert_eq!(registry.pending(), 1);
        assert!(!registry.contains(&ExecutionId::from("ghost")));
    }

    #[test]
    fn drop_deregisters() {
        let registry = ExecutionRegistry::new();
        let id = ExecutionId::from("d");
        {
            let _reg = registry.register(&id);
            assert!(registry.contains(&id));
        }
        assert!(!registry.contains(&id));
        assert_eq!(
            registry.complete(&id, msg("d", "late")),
            CompleteOutcome::Unknown
        );
    }

    #[test]
    fn reregistration_shares_the_waiter() {
        let registry = ExecutionRegistry::new();
        let id = ExecutionId::from("shared");
        let first = registry.register(&id);
        let second = registry.register(&id);
        assert_eq!(registry.pending(), 1);

        drop(first);
        assert!(registry.contains(&id), "second holder keeps the entry alive");
        drop(second);
        assert!(!registry.contains(&id));
    }

    #[tokio::test]
    async fn detached_entry_is_joined_by_retrieval() {
        let registry = ExecutionRegistry::new();
        let id = ExecutionId::from("async");
        registry.register(&id).detach();
        assert!(registry.contains(&id));

        let retrieval = registry.register(&id);
        registry.complete(&id, msg("async", "r"));
        let done = retrieval.wait(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(done.message.user_data(), "r");
        drop(retrieval);
        assert!(!registry.contains(&id));
    }

    #[tokio::test]
    async fn wait_times_out() {
        let registry = ExecutionRegistry::new();
        let reg = registry.register(&ExecutionId::from("slow"));
        let err = reg.wait(Some(Duration::from_millis(20))).await.unwrap_err();
        assert!(matches!(err, WaitError::TimedOut(d) if d == Duration::from_millis(20)));
    }

    #[test]
    fn reaper_only_removes_unheld_expired_entries() {
        let registry = ExecutionRegistry::new();
        registry.register(&ExecutionId::from("detached")).detach();
        let _held = registry.register(&ExecutionId::from("held"));

        assert_eq!(registry.reap_detached(Duration::from_secs(3600)), 0);
        assert_eq!(registry.reap_detached(Duration::ZERO), 1);
        assert!(registry.contains(&ExecutionId::from("held")));
        assert!(!registry.contains(&ExecutionId::from("detached")));
    }

    #[test]
    fn explicit_deregister_removes_entry() {
        let registry = ExecutionRegistry::new();
        let id = ExecutionId::from("x");
        let reg = registry.register(&id);
        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        // Dropping the stale handle must not disturb a newer entry.
        let fresh = registry.register(&id);
        drop(reg);
        assert!(registry.contains(&id));
        drop(fresh);
    }

    #[tokio::test]
    async fn reaper_worker_sweeps_on_demand() {
        use crate::service::worker::BackgroundWorker;

        let registry = ExecutionRegistry::new();
        registry.register(&ExecutionId::from("old")).detach();
        let mut worker = BackgroundWorker::start(RegistryReaper::new(registry.clone(), Duration::ZERO), 60_000);
        worker.submit(ReapNow).await.unwrap();
        worker.stop().await;
        assert_eq!(registry.pending(), 0);
    }

    proptest! {
        #[test]
        fn live_entries_match_held_tokens(ids in proptest::collection::vec("[a-d]", 1..20)) {
            let registry = ExecutionRegistry::new();
            let regs: Vec<_> = ids.iter().map(|s| registry.register(&ExecutionId::from(s.as_str()))).collect();
            let distinct: std::collections::BTreeSet<_> = ids.iter().collect();
            prop_assert_eq!(registry.pending(), distinct.len());
            drop(regs);
            prop_assert_eq!(registry.pending(), 0);
        }
    }
}
