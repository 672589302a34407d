//! View controller: the orchestrator behind every dashboard tab.
//!
//! One `ViewController` owns the shared cache for all of its views and wires
//! together the loading tracker, retry executor, polling scheduler and
//! reconciliation guard. Results are delivered both as return values and as
//! `SyncEvent`s on a bounded channel that the rendering layer drains.
//!
//! Per view the state machine is:
//!
//! ```text
//! Init --(cache hit)--> Display
//! Init --(cache miss)--> Loading --> Display
//! Display --(poll tick)--> SilentRefresh --> Display
//! any failed fetch --> DisplayWithError --(next tick)--> SilentRefresh
//! ```
//!
//! Clones are cheap and share the same state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::clock::{Clock, TokioClock};
use crate::config::SyncConfig;
use crate::error::{Classification, ClassifiedError, FetchError, SyncError, SyncResult};
use crate::lifecycle::{ActiveSignal, ViewLifecycle};
use crate::loading::{ClaimId, LoadingStateTracker};
use crate::poll::{PollingScheduler, Tick};
use crate::reconcile::ReconciliationGuard;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::sequence::SequenceGuard;
use crate::views::{Fetcher, ViewSpec, ViewTable};

/// Buffer size for the sync event channel.
const EVENT_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewState {
    #[default]
    Init,
    Loading,
    Display,
    SilentRefresh,
    DisplayWithError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewStatus {
    pub state: ViewState,
    pub last_error: Option<SyncError>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Options for a single `load`.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Overrides the view's TTL.
    pub ttl: Option<Duration>,
    /// Skip the cache lookup.
    pub force_refresh: bool,
    /// Never show the loading indicator.
    pub silent: bool,
    /// Overrides the view's retry policy.
    pub retry: Option<RetryPolicy>,
}

impl LoadOptions {
    /// Options used by poll ticks.
    pub fn background() -> Self {
        Self {
            force_refresh: true,
            silent: true,
            ..Self::default()
        }
    }

    pub fn forced() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Served from cache without a network call.
    Hit(Value),
    /// Fetched and written through the cache.
    Fetched(Value),
    /// Another fetch for the key was already in flight; carries whatever is
    /// cached.
    Coalesced(Option<Value>),
    /// A newer debounced request replaced this one.
    Superseded,
    /// The view was exited while the call was in flight; nothing was applied.
    Dropped,
}

impl LoadOutcome {
    pub fn payload(&self) -> Option<&Value> {
        match self {
            LoadOutcome::Hit(v) | LoadOutcome::Fetched(v) => Some(v),
            LoadOutcome::Coalesced(v) => v.as_ref(),
            LoadOutcome::Superseded | LoadOutcome::Dropped => None,
        }
    }

    pub fn into_payload(self) -> Option<Value> {
        match self {
            LoadOutcome::Hit(v) | LoadOutcome::Fetched(v) => Some(v),
            LoadOutcome::Coalesced(v) => v,
            LoadOutcome::Superseded | LoadOutcome::Dropped => None,
        }
    }
}

/// Notifications for the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// New render-visible state for `view`.
    Updated {
        view: String,
        payload: Value,
        silent: bool,
    },
    /// A fetch failed; the last good payload stays on screen.
    Failed { view: String, error: SyncError },
}

struct State {
    cache: CacheStore,
    loading: LoadingStateTracker,
    guard: ReconciliationGuard,
    sequences: SequenceGuard,
    views: ViewTable,
    lifecycles: HashMap<String, ViewLifecycle>,
    display: HashMap<String, Value>,
    status: HashMap<String, ViewStatus>,
    torn_down: bool,
}

impl State {
    fn status_mut(&mut self, key: &str) -> &mut ViewStatus {
        self.status.entry(key.to_string()).or_default()
    }

    /// Signal for the current visit of `key`, starting one if needed.
    fn signal(&mut self, key: &str) -> ActiveSignal {
        self.lifecycles
            .entry(key.to_string())
            .or_default()
            .signal()
    }

    fn policy_for(&self, key: &str, opts: &LoadOptions, default: &RetryPolicy) -> RetryPolicy {
        opts.retry
            .clone()
            .or_else(|| self.views.get(key).and_then(|s| s.retry.clone()))
            .unwrap_or_else(|| default.clone())
    }

    fn ttl_for(&self, key: &str, opts: &LoadOptions, default: Duration) -> Duration {
        opts.ttl
            .or_else(|| self.views.get(key).map(|s| s.ttl))
            .unwrap_or(default)
    }

    /// Write a successful result: remote payload into the cache, reconciled
    /// payload into the render-visible state. Returns the latter.
    fn apply(&mut self, view: &str, cache_key: &str, remote: Value, ttl: Duration) -> Value {
        self.cache.set(cache_key, remote.clone(), ttl);

        let mut merged = remote;
        if let Some(local) = self.display.get(view) {
            for scope in self.views.scopes_of(view) {
                merged = self.guard.reconcile(&scope, local, &merged);
            }
        }
        self.display.insert(view.to_string(), merged.clone());

        let status = self.status_mut(view);
        status.state = ViewState::Display;
        status.last_error = None;
        status.last_success = Some(Utc::now());
        merged
    }

    fn record_failure(&mut self, view: &str, error: &SyncError) {
        let status = self.status_mut(view);
        status.state = ViewState::DisplayWithError;
        status.last_error = Some(error.clone());
    }

    fn clear_scopes(&mut self, view: &str) {
        for scope in self.views.scopes_of(view) {
            self.guard.clear_dirty(&scope);
        }
    }
}

/// In-flight claim held by one `load`. Released explicitly on completion, or
/// on drop when the load future is abandoned (an aborted poll tick).
struct InFlight {
    inner: Weak<Inner>,
    key: String,
    id: ClaimId,
    armed: bool,
}

impl InFlight {
    fn release(mut self, state: &mut State) {
        self.armed = false;
        state.loading.release(&self.key, self.id);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.loading.release(&self.key, self.id) {
                debug!(view = %self.key, "Abandoned fetch released its claim");
            }
        }
    }
}

struct Inner {
    config: SyncConfig,
    default_retry: RetryPolicy,
    state: Mutex<State>,
    scheduler: Mutex<PollingScheduler>,
    events_tx: mpsc::Sender<SyncEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<SyncEvent>>>,
}

#[derive(Clone)]
pub struct ViewController {
    inner: Arc<Inner>,
}

impl ViewController {
    pub fn new(config: SyncConfig) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    pub fn with_clock(config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let state = State {
            cache: CacheStore::new(config.max_cache_size, clock),
            loading: LoadingStateTracker::new(),
            guard: ReconciliationGuard::new(),
            sequences: SequenceGuard::new(),
            views: ViewTable::new(),
            lifecycles: HashMap::new(),
            display: HashMap::new(),
            status: HashMap::new(),
            torn_down: false,
        };
        Self {
            inner: Arc::new(Inner {
                default_retry: RetryPolicy::from_config(&config),
                config,
                state: Mutex::new(state),
                scheduler: Mutex::new(PollingScheduler::new()),
                events_tx: tx,
                events_rx: Mutex::new(Some(rx)),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scheduler(&self) -> MutexGuard<'_, PollingScheduler> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.inner
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.inner.events_tx.try_send(event) {
            debug!(error = %e, "Sync event not delivered");
        }
    }

    // =========================================================================
    // View table
    // =========================================================================

    pub fn register(&self, spec: ViewSpec) -> SyncResult<()> {
        let mut state = self.state();
        if state.torn_down {
            return Err(SyncError::TornDown);
        }
        for (scope, fields) in &spec.scopes {
            state.guard.designate(scope, fields.iter().cloned());
        }
        debug!(view = %spec.key, "View registered");
        state.views.insert(spec);
        Ok(())
    }

    pub fn register_all(&self, table: ViewTable) -> SyncResult<()> {
        for key in table.keys() {
            if let Some(spec) = table.get(key) {
                self.register(spec.clone())?;
            }
        }
        Ok(())
    }

    pub fn view_keys(&self) -> Vec<String> {
        self.state().views.keys().into_iter().map(String::from).collect()
    }

    /// Enter a registered view: discard stale edits, load immediately and
    /// start its background refresh.
    pub async fn enter(&self, view: &str) -> SyncResult<LoadOutcome> {
        let spec = {
            let state = self.state();
            if state.torn_down {
                return Err(SyncError::TornDown);
            }
            state
                .views
                .get(view)
                .cloned()
                .ok_or_else(|| SyncError::UnknownView(view.to_string()))?
        };
        // Stop the previous visit's timer before its claims are dropped below
        self.scheduler().stop(view);
        {
            let mut state = self.state();
            // Replacing the lifecycle ends any previous visit
            state
                .lifecycles
                .insert(view.to_string(), ViewLifecycle::new());
            state.loading.finish(view);
            state.clear_scopes(view);
            state.display.remove(view);
        }
        info!(view = view, "Entering view");

        if let Some(interval) = spec.poll_interval {
            self.start_polling(view, interval, Arc::clone(&spec.fetcher));
        }

        self.load(view, spec.fetcher.as_ref(), LoadOptions::default())
            .await
    }

    /// Leave a view: stop its timer, cancel in-flight work and discard edits.
    pub fn exit(&self, view: &str) {
        self.scheduler().stop(view);
        let mut state = self.state();
        if let Some(lifecycle) = state.lifecycles.remove(view) {
            lifecycle.deactivate();
        }
        state.loading.finish(view);
        state.clear_scopes(view);
        info!(view = view, "Exited view");
    }

    /// Tear the controller down: every view is exited, the cache discarded and
    /// all further writes refused.
    pub fn teardown(&self) {
        self.scheduler().stop_all();
        let mut state = self.state();
        if state.torn_down {
            return;
        }
        state.torn_down = true;
        for (_, lifecycle) in state.lifecycles.drain() {
            lifecycle.deactivate();
        }
        state.cache.mark_torn_down();
        state.loading.clear();
        state.display.clear();
        state.sequences.reset();
        info!("View controller torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.state().torn_down
    }

    fn start_polling(&self, view: &str, interval: Duration, fetcher: Arc<dyn Fetcher>) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let key = view.to_string();
        self.scheduler().start(view, interval, move |tick: Tick| {
            let weak = weak.clone();
            let key = key.clone();
            let fetcher = Arc::clone(&fetcher);
            async move {
                let Some(inner) = weak.upgrade() else {
                    return Ok(());
                };
                let controller = ViewController { inner };
                let opts = LoadOptions {
                    silent: tick.silent,
                    ..LoadOptions::background()
                };
                controller
                    .load(&key, fetcher.as_ref(), opts)
                    .await
                    .map(|_| ())
            }
        });
    }

    pub fn is_polling(&self, view: &str) -> bool {
        self.scheduler().is_active(view)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load `key`, from cache when possible, otherwise through the retry
    /// executor. On failure the previously cached payload is left intact.
    pub async fn load<F>(&self, key: &str, fetcher: &F, opts: LoadOptions) -> SyncResult<LoadOutcome>
    where
        F: Fetcher + ?Sized,
    {
        let (signal, policy, ttl, silent, claim) = {
            let mut state = self.state();
            if state.torn_down {
                return Err(SyncError::TornDown);
            }
            let signal = state.signal(key);

            let cached = state.cache.get(key).cloned();
            if let (false, Some(payload)) = (opts.force_refresh, cached.as_ref()) {
                debug!(view = key, "Cache hit");
                let payload = payload.clone();
                state.display.entry(key.to_string()).or_insert_with(|| payload.clone());
                let status = state.status_mut(key);
                if status.state == ViewState::Init {
                    status.state = ViewState::Display;
                }
                return Ok(LoadOutcome::Hit(payload));
            }

            // A loading indicator only makes sense when there is nothing to show
            let silent = opts.silent || cached.is_some();
            let Some(id) = state.loading.begin(key, silent) else {
                debug!(view = key, "Fetch already in flight, coalescing");
                return Ok(LoadOutcome::Coalesced(cached));
            };
            let claim = InFlight {
                inner: Arc::downgrade(&self.inner),
                key: key.to_string(),
                id,
                armed: true,
            };
            state.status_mut(key).state = if silent {
                ViewState::SilentRefresh
            } else {
                ViewState::Loading
            };

            let policy = state.policy_for(key, &opts, &self.inner.default_retry);
            let ttl = state.ttl_for(key, &opts, self.inner.config.ttl());
            (signal, policy, ttl, opts.silent, claim)
        };

        let result = RetryExecutor::run(|| fetcher.fetch(), &policy, &signal).await;

        let event = {
            let mut state = self.state();
            claim.release(&mut state);
            if state.torn_down || !signal.is_active() {
                debug!(view = key, "View inactive, dropping result");
                return Ok(LoadOutcome::Dropped);
            }

            match result {
                Ok(remote) => {
                    let shown = state.apply(key, key, remote.clone(), ttl);
                    (
                        Ok(LoadOutcome::Fetched(remote)),
                        SyncEvent::Updated {
                            view: key.to_string(),
                            payload: shown,
                            silent,
                        },
                    )
                }
                Err(e) if e.is_cancelled() => return Ok(LoadOutcome::Dropped),
                Err(e) => {
                    warn!(view = key, error = %e, "Fetch failed, keeping last good data");
                    let error = SyncError::Fetch(e);
                    state.record_failure(key, &error);
                    (
                        Err(error.clone()),
                        SyncEvent::Failed {
                            view: key.to_string(),
                            error,
                        },
                    )
                }
            }
        };

        let (outcome, event) = event;
        self.emit(event);
        outcome
    }

    /// Typed variant of `load`. A payload that does not deserialize into `T`
    /// is reported as a malformed response and is never written to the cache.
    pub async fn load_as<T, F>(&self, key: &str, fetcher: &F, opts: LoadOptions) -> SyncResult<Option<T>>
    where
        T: DeserializeOwned + 'static,
        F: Fetcher + ?Sized,
    {
        let checked = || {
            let pending = fetcher.fetch();
            async move {
                let value = pending.await?;
                if let Err(e) = serde_json::from_value::<T>(value.clone()) {
                    warn!(error = %e, "Malformed payload");
                    return Err(FetchError::malformed(e.to_string()));
                }
                Ok(value)
            }
        };

        let outcome = self.load(key, &checked, opts).await?;
        match outcome.into_payload() {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                SyncError::Fetch(ClassifiedError {
                    source: FetchError::malformed(e.to_string()),
                    classification: Classification::Fatal,
                    attempts: 0,
                })
            }),
            None => Ok(None),
        }
    }

    /// Debounced load for search and pagination. `channel` groups requests
    /// that replace each other (one search box); `key` is the cache key of
    /// this particular request. Only the latest request of a channel applies.
    pub async fn load_debounced<F>(
        &self,
        channel: &str,
        key: &str,
        fetcher: &F,
        opts: LoadOptions,
    ) -> SyncResult<LoadOutcome>
    where
        F: Fetcher + ?Sized,
    {
        let (seq, signal) = {
            let mut state = self.state();
            if state.torn_down {
                return Err(SyncError::TornDown);
            }
            (state.sequences.issue(channel), state.signal(channel))
        };

        tokio::select! {
            biased;
            _ = signal.cancelled() => return Ok(LoadOutcome::Dropped),
            _ = tokio::time::sleep(self.inner.config.debounce()) => {}
        }

        let (policy, ttl) = {
            let mut state = self.state();
            if state.torn_down || !signal.is_active() {
                return Ok(LoadOutcome::Dropped);
            }
            if !state.sequences.is_latest(channel, seq) {
                debug!(channel = channel, seq = seq.value(), "Superseded during debounce");
                return Ok(LoadOutcome::Superseded);
            }
            let cached = state.cache.get(key).cloned();
            if let (false, Some(payload)) = (opts.force_refresh, cached.as_ref()) {
                let payload = payload.clone();
                state.loading.set_loading(channel, false);
                state.display.insert(channel.to_string(), payload.clone());
                state.status_mut(channel).state = ViewState::Display;
                return Ok(LoadOutcome::Hit(payload));
            }
            let silent = opts.silent || cached.is_some();
            state.loading.set_loading(channel, !silent);
            state.status_mut(channel).state = if silent {
                ViewState::SilentRefresh
            } else {
                ViewState::Loading
            };
            (
                state.policy_for(channel, &opts, &self.inner.default_retry),
                state.ttl_for(channel, &opts, self.inner.config.ttl()),
            )
        };

        let result = RetryExecutor::run(|| fetcher.fetch(), &policy, &signal).await;

        let (outcome, event) = {
            let mut state = self.state();
            if state.torn_down || !signal.is_active() {
                return Ok(LoadOutcome::Dropped);
            }
            if !state.sequences.is_latest(channel, seq) {
                debug!(channel = channel, seq = seq.value(), "Stale response discarded");
                return Ok(LoadOutcome::Superseded);
            }
            state.loading.set_loading(channel, false);

            match result {
                Ok(remote) => {
                    let shown = state.apply(channel, key, remote.clone(), ttl);
                    (
                        Ok(LoadOutcome::Fetched(remote)),
                        SyncEvent::Updated {
                            view: channel.to_string(),
                            payload: shown,
                            silent: opts.silent,
                        },
                    )
                }
                Err(e) if e.is_cancelled() => return Ok(LoadOutcome::Dropped),
                Err(e) => {
                    let error = SyncError::Fetch(e);
                    state.record_failure(channel, &error);
                    (
                        Err(error.clone()),
                        SyncEvent::Failed {
                            view: channel.to_string(),
                            error,
                        },
                    )
                }
            }
        };

        self.emit(event);
        outcome
    }

    pub fn invalidate(&self, key: &str) {
        self.state().cache.invalidate(key);
    }

    pub fn cached(&self, key: &str) -> Option<Value> {
        self.state().cache.get(key).cloned()
    }

    /// "Last updated" label for a cached key.
    pub fn cache_age(&self, key: &str) -> Option<String> {
        self.state().cache.entry(key).map(|e| e.age_display())
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.state().loading.is_loading(key)
    }

    pub fn status(&self, view: &str) -> ViewStatus {
        self.state().status.get(view).cloned().unwrap_or_default()
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    /// Render-visible state of `view`, falling back to its cached payload.
    pub fn displayed(&self, view: &str) -> Option<Value> {
        let state = self.state();
        state
            .display
            .get(view)
            .cloned()
            .or_else(|| state.cache.get(view).cloned())
    }

    /// Record a user edit of `field` in `view`. Marks the owning scope dirty so
    /// background refreshes keep the local value until `commit_saved`.
    pub fn edit_local(&self, view: &str, field: &str, value: Value) -> SyncResult<()> {
        let mut state = self.state();
        if state.torn_down {
            return Err(SyncError::TornDown);
        }

        let base = match state.display.get(view) {
            Some(v) => v.clone(),
            None => state.cache.get(view).cloned().unwrap_or(Value::Null),
        };
        let mut fields = match base {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        fields.insert(field.to_string(), value);
        state.display.insert(view.to_string(), Value::Object(fields));

        let owning = state
            .views
            .get(view)
            .and_then(|spec| {
                spec.scopes
                    .iter()
                    .find(|(_, owned)| owned.iter().any(|f| f == field))
                    .map(|(scope, _)| scope.clone())
            });
        match owning {
            Some(scope) => state.guard.mark_dirty(&scope),
            None => debug!(view = view, field = field, "Edited field is not protected"),
        }
        Ok(())
    }

    pub fn mark_dirty(&self, scope: &str) {
        self.state().guard.mark_dirty(scope);
    }

    pub fn clear_dirty(&self, scope: &str) {
        self.state().guard.clear_dirty(scope);
    }

    pub fn is_dirty(&self, scope: &str) -> bool {
        self.state().guard.is_dirty(scope)
    }

    /// Call after the view's edits were saved successfully.
    pub fn commit_saved(&self, view: &str) {
        self.state().clear_scopes(view);
    }
}

// ============================================================================
// Tests
// ============================================================================
