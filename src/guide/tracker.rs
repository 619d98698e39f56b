//! Optimistic guide completion tracking with rollback.
//!
//! Steps are marked done locally before the server confirms. A rejected
//! write rolls the single mutated step back to its pre-mutation value, so a
//! failed persist can never leave a step stuck as complete. Server
//! responses are authoritative: every merge can move the flow backward as
//! well as forward.

use crate::config::PollConfig;
use crate::error::Result;
use crate::guide::{GuideState, StepId};
use crate::poll::{PollDriver, PollHandle};
use crate::remote::{GuideStatePayload, GuideStore};
use chrono::Utc;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tracks the guide flow against a remote [`GuideStore`].
pub struct GuideTracker<S> {
    store: S,
    state: GuideState,
    last_error: Option<String>,
}

impl<S: GuideStore> GuideTracker<S> {
    /// Create a tracker with an all-incomplete local state and no bound
    /// device.
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: GuideState::default(),
            last_error: None,
        }
    }

    /// Read-only view of the current flow state.
    #[must_use]
    pub fn state(&self) -> &GuideState {
        &self.state
    }

    /// Message from the most recent failed operation, cleared by the next
    /// successful sync.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Bind a device key and reconcile with the server.
    ///
    /// An empty key is the unbound condition: local state stays untouched
    /// and no request is made. Binding a different key than before discards
    /// the previous sync marker. A fetch failure leaves the existing steps
    /// and `active_index` unchanged.
    pub async fn bootstrap(&mut self, device_key: &str) -> Result<()> {
        self.state.set_device_key(device_key);
        if device_key.is_empty() {
            return Ok(());
        }
        self.fetch_and_merge().await
    }

    /// Re-fetch and merge the authoritative state for the bound device.
    ///
    /// Quiet no-op when unbound. Mutates steps only to what the server
    /// reports.
    pub async fn resync(&mut self) -> Result<()> {
        if self.state.device_key().is_empty() {
            return Ok(());
        }
        self.fetch_and_merge().await
    }

    /// Mark one step complete, optimistically, then persist.
    ///
    /// Already-completed steps are a no-op: no mutation, no request. On a
    /// persist failure the mutated step is restored to its exact
    /// pre-mutation value before the error propagates.
    pub async fn mark_complete(&mut self, id: StepId) -> Result<()> {
        let Some(index) = self.state.steps().iter().position(|s| s.id == id) else {
            return Ok(());
        };
        if self.state.steps()[index].completed {
            return Ok(());
        }

        // Pre-mutation snapshot; rollback is a pure substitution of this.
        let previous = {
            let step = &self.state.steps()[index];
            (step.completed, step.completed_at)
        };

        {
            let step = &mut self.state.steps_mut()[index];
            step.completed = true;
            step.completed_at = Some(Utc::now());
        }
        self.state.recompute_active_index();
        debug!(step = %id, "step marked complete locally");

        if self.state.device_key().is_empty() {
            // Unbound: the optimistic mutation stands locally and the next
            // bootstrap reconciles it against the server.
            return Ok(());
        }

        let steps = self.state.steps().iter().map(|s| s.to_payload()).collect();
        match self.store.persist(self.state.device_key(), steps).await {
            Ok(payload) => {
                self.apply_remote(payload);
                Ok(())
            }
            Err(err) => {
                let step = &mut self.state.steps_mut()[index];
                (step.completed, step.completed_at) = previous;
                self.state.recompute_active_index();
                self.last_error = Some(err.to_string());
                warn!(step = %id, "persist failed, step rolled back: {err}");
                Err(err)
            }
        }
    }

    async fn fetch_and_merge(&mut self) -> Result<()> {
        match self.store.fetch(self.state.device_key()).await {
            Ok(payload) => {
                self.apply_remote(payload);
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                warn!("guide state sync failed: {err}");
                Err(err)
            }
        }
    }

    /// Merge an authoritative server response into local state.
    ///
    /// The local enumeration's order is canonical: each local step is
    /// replaced field-for-field by the matching remote step, unknown remote
    /// ids are ignored, and ids the server omits keep their local values.
    /// A step the server marks complete without a timestamp is backfilled
    /// with the current time.
    fn apply_remote(&mut self, payload: GuideStatePayload) {
        let now = Utc::now();
        let remote: HashMap<&str, _> = payload
            .steps
            .iter()
            .map(|step| (step.id.as_str(), step))
            .collect();

        for step in self.state.steps_mut() {
            let Some(incoming) = remote.get(step.id.as_str()) else {
                continue;
            };
            step.completed = incoming.completed;
            step.completed_at = if incoming.completed {
                incoming.completed_at.or(step.completed_at).or(Some(now))
            } else {
                None
            };
        }

        self.last_error = None;
        self.state.set_last_synced_at(payload.updated_at.unwrap_or(now));
        self.state.recompute_active_index();
    }
}

/// Start periodic reconciliation of a shared tracker.
///
/// Runs [`GuideTracker::resync`] on the configured interval. The loop stops
/// itself once the tracker is unbound; cancelling or dropping the handle
/// stops it from the outside. Transient failures keep the loop alive — the
/// error is already recorded on the tracker.
pub fn start_resync<S>(
    tracker: Arc<tokio::sync::Mutex<GuideTracker<S>>>,
    poll: &PollConfig,
) -> PollHandle
where
    S: GuideStore + 'static,
{
    start_resync_on(
        tracker,
        PollDriver::new(Duration::from_secs(poll.guide_resync_interval_secs)),
    )
}

fn start_resync_on<S>(
    tracker: Arc<tokio::sync::Mutex<GuideTracker<S>>>,
    driver: PollDriver,
) -> PollHandle
where
    S: GuideStore + 'static,
{
    driver.spawn(move || {
        let tracker = Arc::clone(&tracker);
        async move {
            let mut tracker = tracker.lock().await;
            if tracker.state().device_key().is_empty() {
                return ControlFlow::Break(());
            }
            let _ = tracker.resync().await;
            ControlFlow::Continue(())
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::CoreError;
    use crate::guide::FlowPhase;
    use crate::remote::GuideStepPayload;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    fn payload(steps: Vec<GuideStepPayload>, updated_at: Option<&str>) -> GuideStatePayload {
        GuideStatePayload {
            device_id: "device-1".to_owned(),
            steps,
            updated_at: updated_at.map(ts),
        }
    }

    fn step(id: &str, completed: bool, completed_at: Option<&str>) -> GuideStepPayload {
        GuideStepPayload {
            id: id.to_owned(),
            completed,
            completed_at: completed_at.map(ts),
        }
    }

    /// Store stub: scripted fetch result, persist either echoes the sent
    /// steps back (the server agreeing) or fails, with call counters.
    #[derive(Default)]
    struct StubStore {
        fetch_response: Mutex<Option<GuideStatePayload>>,
        persist_response: Mutex<Option<GuideStatePayload>>,
        fail_fetch: bool,
        fail_persist: bool,
        fetch_calls: AtomicUsize,
        persist_calls: AtomicUsize,
    }

    #[async_trait]
    impl GuideStore for &StubStore {
        async fn fetch(&self, _device_key: &str) -> crate::error::Result<GuideStatePayload> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(CoreError::Transport("fetch unreachable".to_owned()));
            }
            Ok(self
                .fetch_response
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| payload(Vec::new(), None)))
        }

        async fn persist(
            &self,
            device_key: &str,
            steps: Vec<GuideStepPayload>,
        ) -> crate::error::Result<GuideStatePayload> {
            self.persist_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_persist {
                return Err(CoreError::Rejected("malformed step".to_owned()));
            }
            if let Some(scripted) = self.persist_response.lock().unwrap().clone() {
                return Ok(scripted);
            }
            Ok(GuideStatePayload {
                device_id: device_key.to_owned(),
                steps,
                updated_at: Some(Utc::now()),
            })
        }
    }

    fn invariant_holds(tracker: &GuideTracker<&StubStore>) -> bool {
        tracker
            .state()
            .steps()
            .iter()
            .all(|s| s.completed || s.completed_at.is_none())
    }

    #[tokio::test]
    async fn bootstrap_with_empty_key_is_a_quiet_no_op() {
        let store = StubStore::default();
        let mut tracker = GuideTracker::new(&store);

        tracker.bootstrap("").await.unwrap();

        assert_eq!(store.fetch_calls.load(Ordering::SeqCst), 0);
        assert!(tracker.last_error().is_none());
        assert_eq!(tracker.state().completed_count(), 0);
        assert_eq!(tracker.state().active_index(), 0);
        assert_eq!(tracker.state().phase(), FlowPhase::Bootstrapping);
    }

    #[tokio::test]
    async fn bootstrap_merges_remote_state() {
        let store = StubStore::default();
        *store.fetch_response.lock().unwrap() = Some(payload(
            vec![
                step("location", true, Some("2024-05-01T08:05:00Z")),
                step("notification", false, None),
            ],
            Some("2024-05-01T08:05:00Z"),
        ));
        let mut tracker = GuideTracker::new(&store);

        tracker.bootstrap("device-1").await.unwrap();

        let state = tracker.state();
        assert!(state.step(StepId::Location).unwrap().completed);
        assert_eq!(
            state.step(StepId::Location).unwrap().completed_at,
            Some(ts("2024-05-01T08:05:00Z"))
        );
        assert!(!state.step(StepId::Notification).unwrap().completed);
        assert_eq!(state.active_index(), 1);
        assert_eq!(state.last_synced_at(), Some(ts("2024-05-01T08:05:00Z")));
        assert_eq!(state.phase(), FlowPhase::InProgress(1));
    }

    #[tokio::test]
    async fn bootstrap_failure_preserves_state_and_surfaces_error() {
        let store = StubStore {
            fail_fetch: true,
            ..StubStore::default()
        };
        let mut tracker = GuideTracker::new(&store);

        let err = tracker.bootstrap("device-1").await.unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));

        assert_eq!(tracker.state().completed_count(), 0);
        assert_eq!(tracker.state().active_index(), 0);
        assert!(tracker.last_error().is_some());
        assert!(tracker.state().last_synced_at().is_none());
    }

    #[tokio::test]
    async fn successful_sync_clears_previous_error() {
        let store = StubStore {
            fail_fetch: true,
            ..StubStore::default()
        };
        let mut tracker = GuideTracker::new(&store);
        tracker.bootstrap("device-1").await.unwrap_err();
        assert!(tracker.last_error().is_some());

        let store_ok = StubStore::default();
        let mut tracker = GuideTracker {
            store: &store_ok,
            state: tracker.state.clone(),
            last_error: tracker.last_error.clone(),
        };
        tracker.resync().await.unwrap();
        assert!(tracker.last_error().is_none());
    }

    #[tokio::test]
    async fn mark_complete_advances_active_index() {
        let store = StubStore::default();
        let mut tracker = GuideTracker::new(&store);
        tracker.bootstrap("device-1").await.unwrap();
        assert_eq!(tracker.state().active_index(), 0);

        tracker.mark_complete(StepId::Location).await.unwrap();

        assert_eq!(tracker.state().active_index(), 1);
        assert!(tracker.state().step(StepId::Location).unwrap().completed);
        assert!(tracker.state().step(StepId::Location).unwrap().completed_at.is_some());
        assert_eq!(store.persist_calls.load(Ordering::SeqCst), 1);
        assert!(invariant_holds(&tracker));
    }

    #[tokio::test]
    async fn mark_complete_adopts_server_adjusted_timestamp() {
        let store = StubStore::default();
        *store.persist_response.lock().unwrap() = Some(payload(
            vec![
                step("location", true, Some("2024-05-01T08:05:00Z")),
                step("notification", false, None),
                step("autostart", false, None),
                step("usage", false, None),
            ],
            Some("2024-05-01T08:05:00Z"),
        ));
        let mut tracker = GuideTracker::new(&store);
        tracker.bootstrap("device-1").await.unwrap();

        tracker.mark_complete(StepId::Location).await.unwrap();

        assert_eq!(
            tracker.state().step(StepId::Location).unwrap().completed_at,
            Some(ts("2024-05-01T08:05:00Z"))
        );
    }

    #[tokio::test]
    async fn persist_failure_rolls_back_the_mutated_step() {
        let store = StubStore {
            fail_persist: true,
            ..StubStore::default()
        };
        let mut tracker = GuideTracker::new(&store);
        tracker.bootstrap("device-1").await.unwrap();

        let err = tracker.mark_complete(StepId::Location).await.unwrap_err();
        assert!(matches!(err, CoreError::Rejected(_)));

        let restored = tracker.state().step(StepId::Location).unwrap();
        assert!(!restored.completed);
        assert!(restored.completed_at.is_none());
        assert_eq!(tracker.state().active_index(), 0);
        assert!(tracker.last_error().is_some());
        assert!(invariant_holds(&tracker));
    }

    #[tokio::test]
    async fn rollback_is_idempotent_across_repeated_failures() {
        let store = StubStore {
            fail_persist: true,
            ..StubStore::default()
        };
        let mut tracker = GuideTracker::new(&store);
        tracker.bootstrap("device-1").await.unwrap();

        for _ in 0..5 {
            tracker.mark_complete(StepId::Location).await.unwrap_err();
            let step = tracker.state().step(StepId::Location).unwrap();
            assert!(!step.completed);
            assert!(step.completed_at.is_none());
            assert_eq!(tracker.state().active_index(), 0);
            assert!(invariant_holds(&tracker));
        }
        assert_eq!(store.persist_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn mark_complete_on_completed_step_is_a_no_op() {
        let store = StubStore::default();
        *store.fetch_response.lock().unwrap() = Some(payload(
            vec![step("location", true, Some("2024-05-01T08:05:00Z"))],
            Some("2024-05-01T08:05:00Z"),
        ));
        let mut tracker = GuideTracker::new(&store);
        tracker.bootstrap("device-1").await.unwrap();

        tracker.mark_complete(StepId::Location).await.unwrap();

        assert_eq!(store.persist_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            tracker.state().step(StepId::Location).unwrap().completed_at,
            Some(ts("2024-05-01T08:05:00Z"))
        );
    }

    #[tokio::test]
    async fn mark_complete_while_unbound_sticks_locally() {
        let store = StubStore::default();
        let mut tracker = GuideTracker::new(&store);

        tracker.mark_complete(StepId::Location).await.unwrap();

        assert_eq!(store.persist_calls.load(Ordering::SeqCst), 0);
        assert!(tracker.state().step(StepId::Location).unwrap().completed);
        assert_eq!(tracker.state().active_index(), 1);
    }

    #[tokio::test]
    async fn merge_ignores_unknown_ids_and_keeps_missing_ones() {
        let store = StubStore::default();
        let mut tracker = GuideTracker::new(&store);
        tracker.mark_complete(StepId::Usage).await.unwrap();
        let local_usage_at = tracker.state().step(StepId::Usage).unwrap().completed_at;

        *store.fetch_response.lock().unwrap() = Some(payload(
            vec![
                step("location", true, Some("2024-05-01T08:05:00Z")),
                step("camera", true, Some("2024-05-01T08:06:00Z")),
            ],
            Some("2024-05-01T08:06:00Z"),
        ));
        tracker.bootstrap("device-1").await.unwrap();

        let state = tracker.state();
        // Known remote id applied.
        assert!(state.step(StepId::Location).unwrap().completed);
        // Unknown remote id ignored, local order preserved.
        assert_eq!(state.steps().len(), 4);
        // Id the server omitted keeps its local value.
        assert_eq!(state.step(StepId::Usage).unwrap().completed_at, local_usage_at);
        assert_eq!(state.active_index(), 1);
    }

    #[tokio::test]
    async fn merge_backfills_missing_timestamp_for_completed_steps() {
        let store = StubStore::default();
        *store.fetch_response.lock().unwrap() =
            Some(payload(vec![step("location", true, None)], None));
        let mut tracker = GuideTracker::new(&store);

        tracker.bootstrap("device-1").await.unwrap();

        let location = tracker.state().step(StepId::Location).unwrap();
        assert!(location.completed);
        assert!(location.completed_at.is_some());
        assert!(tracker.state().last_synced_at().is_some());
    }

    #[tokio::test]
    async fn server_can_regress_completed_steps() {
        let store = StubStore::default();
        *store.fetch_response.lock().unwrap() = Some(payload(
            StepId::ALL
                .iter()
                .map(|id| step(id.as_str(), true, Some("2024-05-01T08:05:00Z")))
                .collect(),
            Some("2024-05-01T08:05:00Z"),
        ));
        let mut tracker = GuideTracker::new(&store);
        tracker.bootstrap("device-1").await.unwrap();
        assert!(tracker.state().all_complete());
        assert_eq!(tracker.state().phase(), FlowPhase::AllComplete);
        assert_eq!(tracker.state().active_index(), 3);

        *store.fetch_response.lock().unwrap() = Some(payload(
            vec![step("notification", false, None)],
            Some("2024-05-01T09:00:00Z"),
        ));
        tracker.resync().await.unwrap();

        let notification = tracker.state().step(StepId::Notification).unwrap();
        assert!(!notification.completed);
        assert!(notification.completed_at.is_none());
        assert_eq!(tracker.state().active_index(), 1);
        assert_eq!(tracker.state().phase(), FlowPhase::InProgress(1));
        assert!(invariant_holds(&tracker));
    }

    #[tokio::test]
    async fn rebinding_a_different_device_clears_sync_marker() {
        let store = StubStore {
            fail_fetch: true,
            ..StubStore::default()
        };
        let ok_store = StubStore::default();

        let mut tracker = GuideTracker::new(&ok_store);
        tracker.bootstrap("device-1").await.unwrap();
        assert!(tracker.state().last_synced_at().is_some());

        // Binding a new device drops the marker even when the fetch fails.
        let mut tracker = GuideTracker {
            store: &store,
            state: tracker.state.clone(),
            last_error: None,
        };
        tracker.bootstrap("device-2").await.unwrap_err();
        assert!(tracker.state().last_synced_at().is_none());
        assert_eq!(tracker.state().device_key(), "device-2");
    }

    /// Owned store stub for the resync loop (the loop needs `'static`).
    #[derive(Clone, Default)]
    struct SharedStore {
        fetch_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GuideStore for SharedStore {
        async fn fetch(&self, device_key: &str) -> crate::error::Result<GuideStatePayload> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(GuideStatePayload {
                device_id: device_key.to_owned(),
                steps: Vec::new(),
                updated_at: Some(Utc::now()),
            })
        }

        async fn persist(
            &self,
            device_key: &str,
            steps: Vec<GuideStepPayload>,
        ) -> crate::error::Result<GuideStatePayload> {
            Ok(GuideStatePayload {
                device_id: device_key.to_owned(),
                steps,
                updated_at: Some(Utc::now()),
            })
        }
    }

    #[tokio::test]
    async fn resync_loop_polls_and_stops_once_unbound() {
        let store = SharedStore::default();
        let mut tracker = GuideTracker::new(store.clone());
        tracker.bootstrap("device-1").await.unwrap();
        let calls_after_bootstrap = store.fetch_calls.load(Ordering::SeqCst);

        let shared = Arc::new(tokio::sync::Mutex::new(tracker));
        let handle = super::start_resync_on(
            Arc::clone(&shared),
            crate::poll::PollDriver::unclamped(std::time::Duration::from_millis(10)),
        );

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(store.fetch_calls.load(Ordering::SeqCst) > calls_after_bootstrap);

        // Unbinding the device stops the loop from the inside.
        shared.lock().await.bootstrap("").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert!(handle.is_finished());
    }
}
