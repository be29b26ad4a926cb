use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use super::aggregator::{AggregateError, SnapshotSource};
use super::recommendation_engine::RecommendationEngine;
use crate::models::{DashboardSnapshot, RecommendationSet, RefreshSettings};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    Snapshot,
    Recommendations,
}

impl RefreshKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshKind::Snapshot => "snapshot",
            RefreshKind::Recommendations => "recommendations",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RefreshOutput {
    Snapshot(Arc<DashboardSnapshot>),
    Recommendations(Arc<RecommendationSet>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    Refreshed { email: String, kind: RefreshKind },
    /// Sent once per expiry; scheduling again for the learner re-arms it.
    SessionExpired { email: String },
}

type SharedRefresh<T> = Shared<BoxFuture<'static, Result<T, AggregateError>>>;

struct InFlight<T> {
    generation: u64,
    abort: AbortHandle,
    future: SharedRefresh<T>,
}

struct Latest<T> {
    value: T,
    at: Instant,
}

struct Lane<T> {
    in_flight: HashMap<String, InFlight<T>>,
    latest: HashMap<String, Latest<T>>,
}

impl<T> Default for Lane<T> {
    fn default() -> Self {
        Self {
            in_flight: HashMap::new(),
            latest: HashMap::new(),
        }
    }
}

struct Timer {
    interval: Duration,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    snapshots: Lane<Arc<DashboardSnapshot>>,
    recommendations: Lane<Arc<RecommendationSet>>,
    timers: HashMap<(String, RefreshKind), Timer>,
    expired: HashSet<String>,
    next_generation: u64,
}

fn snapshot_lane(state: &mut State) -> &mut Lane<Arc<DashboardSnapshot>> {
    &mut state.snapshots
}

fn recommendation_lane(state: &mut State) -> &mut Lane<Arc<RecommendationSet>> {
    &mut state.recommendations
}

struct Inner {
    source: Arc<dyn SnapshotSource>,
    engine: RecommendationEngine,
    intervals: RefreshSettings,
    state: Mutex<State>,
    events: broadcast::Sender<CoordinatorEvent>,
}

/// Owns every refresh timer and in-flight request, keyed by learner and kind.
///
/// At most one request per (learner, kind) is in flight; concurrent triggers,
/// manual or scheduled, attach to it. The state lock is never held across an await.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(source: Arc<dyn SnapshotSource>, engine: RecommendationEngine, intervals: RefreshSettings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                source,
                engine,
                intervals,
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.inner.events.subscribe()
    }

    pub fn default_interval(&self, kind: RefreshKind) -> Duration {
        match kind {
            RefreshKind::Snapshot => self.inner.intervals.snapshot_interval(),
            RefreshKind::Recommendations => self.inner.intervals.recommendations_interval(),
        }
    }

    /// Starts or replaces the timer for (learner, kind). Same interval is a no-op.
    pub fn schedule(&self, email: &str, kind: RefreshKind, interval: Duration) {
        let email = normalize_email(email);
        let interval = interval.max(self.inner.intervals.min_interval());
        let mut state = self.inner.state();
        state.expired.remove(&email);

        let key = (email.clone(), kind);
        if let Some(timer) = state.timers.get(&key) {
            if timer.interval == interval && !timer.handle.is_finished() {
                return;
            }
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                log::debug!("Scheduled {} refresh for {}", kind.as_str(), email);
                // failures are recorded by the worker
                let _ = inner.trigger(&email, kind).await;
            }
        });

        if let Some(previous) = state.timers.insert(key, Timer { interval, handle }) {
            previous.handle.abort();
        }
        log::info!("Timer for {} refresh set to {:?}", kind.as_str(), interval);
    }

    pub async fn trigger_now(&self, email: &str, kind: RefreshKind) -> Result<RefreshOutput, AggregateError> {
        self.inner.trigger(&normalize_email(email), kind).await
    }

    /// Latest snapshot within the snapshot cadence, or a (shared) fresh build.
    pub async fn snapshot(&self, email: &str, force: bool) -> Result<Arc<DashboardSnapshot>, AggregateError> {
        let email = normalize_email(email);
        if !force {
            if let Some(snapshot) = self.inner.fresh_snapshot(&email) {
                return Ok(snapshot);
            }
        }
        self.inner.shared_snapshot(&email).await
    }

    pub async fn recommendations(&self, email: &str, force: bool) -> Result<Arc<RecommendationSet>, AggregateError> {
        let window = self.inner.intervals.recommendations_interval();
        self.recommendations_within(email, window, force).await
    }

    /// Like `recommendations`, but a cached set only counts as fresh within `window`.
    /// A forced build ranks against a newly fetched snapshot.
    pub async fn recommendations_within(
        &self,
        email: &str,
        window: Duration,
        force: bool,
    ) -> Result<Arc<RecommendationSet>, AggregateError> {
        let email = normalize_email(email);
        if !force {
            let window = window.max(self.inner.intervals.min_interval());
            if let Some(set) = self.inner.fresh(&email, recommendation_lane, window) {
                return Ok(set);
            }
        }
        self.inner.shared_recommendations(&email, !force).await
    }

    /// Stops the timer, aborts any in-flight request and drops the retained result.
    /// Returns whether anything was running.
    pub fn cancel(&self, email: &str, kind: RefreshKind) -> bool {
        let email = normalize_email(email);
        let mut state = self.inner.state();
        let mut cancelled = false;
        if let Some(timer) = state.timers.remove(&(email.clone(), kind)) {
            timer.handle.abort();
            cancelled = true;
        }
        let in_flight = match kind {
            RefreshKind::Snapshot => {
                state.snapshots.latest.remove(&email);
                state.snapshots.in_flight.remove(&email).map(|f| f.abort)
            }
            RefreshKind::Recommendations => {
                state.recommendations.latest.remove(&email);
                state.recommendations.in_flight.remove(&email).map(|f| f.abort)
            }
        };
        if let Some(abort) = in_flight {
            abort.abort();
            cancelled = true;
        }
        if cancelled {
            log::info!("Cancelled {} refresh for {}", kind.as_str(), email);
        }
        cancelled
    }

    /// Dashboard closed: forgets everything held for the learner.
    pub fn cancel_all(&self, email: &str) {
        self.cancel(email, RefreshKind::Snapshot);
        self.cancel(email, RefreshKind::Recommendations);
        self.inner.state().expired.remove(&normalize_email(email));
    }

    pub fn latest_snapshot(&self, email: &str) -> Option<Arc<DashboardSnapshot>> {
        self.inner.fresh_snapshot(&normalize_email(email))
    }

    pub fn latest_recommendations(&self, email: &str) -> Option<Arc<RecommendationSet>> {
        let window = self.inner.intervals.recommendations_interval();
        self.inner.fresh(&normalize_email(email), recommendation_lane, window)
    }

    pub fn active_timers(&self, email: &str) -> Vec<RefreshKind> {
        let email = normalize_email(email);
        let state = self.inner.state();
        let mut kinds: Vec<RefreshKind> = state
            .timers
            .iter()
            .filter(|((owner, _), timer)| *owner == email && !timer.handle.is_finished())
            .map(|((_, kind), _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub fn is_session_expired(&self, email: &str) -> bool {
        self.inner.state().expired.contains(&normalize_email(email))
    }

    /// Periodically evicts results that outlived their cadence for learners no longer polling.
    pub fn start_maintenance(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let period = inner.intervals.snapshot_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = inner.evict_stale();
                if evicted > 0 {
                    log::debug!("Evicted {} stale refresh results", evicted);
                }
            }
        })
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn trigger(self: &Arc<Self>, email: &str, kind: RefreshKind) -> Result<RefreshOutput, AggregateError> {
        match kind {
            RefreshKind::Snapshot => self.shared_snapshot(email).await.map(RefreshOutput::Snapshot),
            RefreshKind::Recommendations => self
                .shared_recommendations(email, true)
                .await
                .map(RefreshOutput::Recommendations),
        }
    }

    fn shared_snapshot(self: &Arc<Self>, email: &str) -> SharedRefresh<Arc<DashboardSnapshot>> {
        let inner = self.clone();
        let owner = email.to_string();
        self.join_or_start(email, snapshot_lane, move |generation| async move {
            let result = inner.source.build_snapshot(&owner).await.map(Arc::new);
            inner.settle(&owner, RefreshKind::Snapshot, generation, snapshot_lane, &result);
            result
        })
    }

    fn shared_recommendations(
        self: &Arc<Self>,
        email: &str,
        reuse_snapshot: bool,
    ) -> SharedRefresh<Arc<RecommendationSet>> {
        let inner = self.clone();
        let owner = email.to_string();
        self.join_or_start(email, recommendation_lane, move |generation| async move {
            let result = inner.build_recommendations(&owner, reuse_snapshot).await;
            inner.settle(&owner, RefreshKind::Recommendations, generation, recommendation_lane, &result);
            result
        })
    }

    /// Ranks against the retained snapshot only when `reuse_snapshot` is set and no
    /// newer snapshot is being fetched.
    async fn build_recommendations(
        self: &Arc<Self>,
        email: &str,
        reuse_snapshot: bool,
    ) -> Result<Arc<RecommendationSet>, AggregateError> {
        let retained = if reuse_snapshot && !self.snapshot_in_flight(email) {
            self.fresh_snapshot(email)
        } else {
            None
        };
        let snapshot = match retained {
            Some(snapshot) => snapshot,
            None => self.shared_snapshot(email).await?,
        };
        let profile = self.engine.build_profile(&snapshot);
        let now = Utc::now();
        let recommendations = self.engine.rank(&snapshot, &profile, now);
        Ok(Arc::new(RecommendationSet {
            recommendations,
            learner_profile: profile,
            generated_at: now,
            error: None,
        }))
    }

    /// Attaches to the in-flight request for `email` or spawns a worker for a new one.
    fn join_or_start<T, F, Fut>(
        &self,
        email: &str,
        lane: fn(&mut State) -> &mut Lane<T>,
        start: F,
    ) -> SharedRefresh<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<T, AggregateError>> + Send + 'static,
    {
        let mut state = self.state();
        if let Some(existing) = lane(&mut *state).in_flight.get(email) {
            return existing.future.clone();
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let worker = tokio::spawn(start(generation));
        let abort = worker.abort_handle();
        let future = async move {
            match worker.await {
                Ok(result) => result,
                Err(_) => Err(AggregateError::Cancelled),
            }
        }
        .boxed()
        .shared();

        lane(&mut *state).in_flight.insert(
            email.to_string(),
            InFlight {
                generation,
                abort,
                future: future.clone(),
            },
        );
        future
    }

    fn settle<T: Clone>(
        &self,
        email: &str,
        kind: RefreshKind,
        generation: u64,
        lane: fn(&mut State) -> &mut Lane<T>,
        result: &Result<T, AggregateError>,
    ) {
        let window = self.window(kind);
        {
            let mut state = self.state();
            let lane = lane(&mut *state);
            lane.latest.retain(|_, latest| latest.at.elapsed() < window);
            if lane
                .in_flight
                .get(email)
                .is_some_and(|f| f.generation == generation)
            {
                lane.in_flight.remove(email);
            }
            if let Ok(value) = result {
                lane.latest.insert(
                    email.to_string(),
                    Latest {
                        value: value.clone(),
                        at: Instant::now(),
                    },
                );
            }
        }

        match result {
            Ok(_) => {
                let _ = self.events.send(CoordinatorEvent::Refreshed {
                    email: email.to_string(),
                    kind,
                });
            }
            Err(AggregateError::Unauthorized) => self.expire_session(email),
            Err(error) => log::warn!("Refresh of {} for {} failed: {}", kind.as_str(), email, error),
        }
    }

    /// Cancels every timer for the learner and signals expiry the first time only.
    fn expire_session(&self, email: &str) {
        let first = {
            let mut state = self.state();
            let keys: Vec<(String, RefreshKind)> = state
                .timers
                .keys()
                .filter(|(owner, _)| owner == email)
                .cloned()
                .collect();
            for key in keys {
                if let Some(timer) = state.timers.remove(&key) {
                    timer.handle.abort();
                }
            }
            state.snapshots.latest.remove(email);
            state.recommendations.latest.remove(email);
            state.expired.insert(email.to_string())
        };

        if first {
            log::warn!("Session expired for {}, timers cancelled", email);
            let _ = self.events.send(CoordinatorEvent::SessionExpired {
                email: email.to_string(),
            });
        }
    }

    fn window(&self, kind: RefreshKind) -> Duration {
        match kind {
            RefreshKind::Snapshot => self.intervals.snapshot_interval(),
            RefreshKind::Recommendations => self.intervals.recommendations_interval(),
        }
    }

    fn snapshot_in_flight(&self, email: &str) -> bool {
        self.state().snapshots.in_flight.contains_key(email)
    }

    fn fresh_snapshot(&self, email: &str) -> Option<Arc<DashboardSnapshot>> {
        self.fresh(email, snapshot_lane, self.intervals.snapshot_interval())
    }

    /// Returns the retained value if younger than `window`; older entries are evicted.
    fn fresh<T: Clone>(&self, email: &str, lane: fn(&mut State) -> &mut Lane<T>, window: Duration) -> Option<T> {
        let mut state = self.state();
        let lane = lane(&mut *state);
        let latest = lane.latest.remove(email)?;
        if latest.at.elapsed() >= window {
            return None;
        }
        let value = latest.value.clone();
        lane.latest.insert(email.to_string(), latest);
        Some(value)
    }

    /// Drops retained results older than their kind's cadence.
    fn evict_stale(&self) -> usize {
        let snapshot_window = self.intervals.snapshot_interval();
        let recommendation_window = self.intervals.recommendations_interval();
        let mut state = self.state();
        let before = state.snapshots.latest.len() + state.recommendations.latest.len();
        state.snapshots.latest.retain(|_, l| l.at.elapsed() < snapshot_window);
        state.recommendations.latest.retain(|_, l| l.at.elapsed() < recommendation_window);
        state.timers.retain(|_, timer| !timer.handle.is_finished());
        before - state.snapshots.latest.len() - state.recommendations.latest.len()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
