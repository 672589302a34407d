//! tabsync-core: tab-scoped caching and resilient background sync.
//!
//! A multi-tab dashboard registers one `ViewSpec` per tab. The
//! `ViewController` then serves loads from a TTL-bounded cache, retries
//! transient failures with exponential backoff, refreshes the active tab on a
//! timer without a loading flash, and keeps unsaved form edits from being
//! overwritten by those refreshes.
//!
//! The core never interprets payloads; a view's data is opaque JSON produced
//! by its injected `Fetcher`.

pub mod cache;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod loading;
pub mod poll;
pub mod reconcile;
pub mod retry;
pub mod sequence;
pub mod views;

pub use cache::{CacheEntry, CacheStore};
pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{default_views, AppConfig, SyncConfig, ViewEntry};
pub use controller::{LoadOptions, LoadOutcome, SyncEvent, ViewController, ViewState, ViewStatus};
pub use error::{Classification, ClassifiedError, ErrorKind, FetchError, SyncError, SyncResult};
pub use http::{HttpClient, HttpFetcher};
pub use lifecycle::{ActiveSignal, ViewLifecycle};
pub use loading::LoadingStateTracker;
pub use poll::{PollingScheduler, Tick};
pub use reconcile::{EditFlag, ReconciliationGuard};
pub use retry::{RetryExecutor, RetryPolicy};
pub use sequence::{Sequence, SequenceGuard};
pub use views::{FetchFuture, Fetcher, ViewSpec, ViewTable};
