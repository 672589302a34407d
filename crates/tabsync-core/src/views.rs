//! Declarative view table.
//!
//! A view is one dashboard tab: a fetcher plus its cache lifetime, optional
//! background refresh period and the scopes of editable fields it protects.
//! The controller is driven entirely by this table instead of per-tab code.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::warn;

use crate::config::{SyncConfig, ViewEntry};
use crate::error::FetchError;
use crate::retry::RetryPolicy;

pub type FetchFuture = BoxFuture<'static, Result<Value, FetchError>>;

/// Injected data source for a view. The core treats payloads as opaque JSON.
pub trait Fetcher: Send + Sync {
    fn fetch(&self) -> FetchFuture;
}

impl<F, Fut> Fetcher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    fn fetch(&self) -> FetchFuture {
        Box::pin(self())
    }
}

#[derive(Clone)]
pub struct ViewSpec {
    pub key: String,
    pub ttl: Duration,
    pub poll_interval: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub fetcher: Arc<dyn Fetcher>,
    /// Editable scope name -> top-level fields it owns.
    pub scopes: BTreeMap<String, Vec<String>>,
}

impl ViewSpec {
    pub fn new(key: &str, ttl: Duration, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            key: key.to_string(),
            ttl,
            poll_interval: None,
            retry: None,
            fetcher,
            scopes: BTreeMap::new(),
        }
    }

    /// A zero interval means no background refresh.
    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn editable(mut self, scope: &str, fields: &[&str]) -> Self {
        self.scopes.insert(
            scope.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    /// Build a spec from a config row; `fetcher` supplies the transport.
    pub fn from_entry(entry: &ViewEntry, config: &SyncConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let ttl = entry
            .ttl_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.ttl());
        let mut spec = Self::new(&entry.key, ttl, fetcher);
        spec.poll_interval = match entry.poll_interval_ms {
            Some(0) => {
                warn!(view = %entry.key, "pollIntervalMs is 0, polling disabled");
                None
            }
            other => other.map(Duration::from_millis),
        };
        if let Some(timeout_ms) = entry.timeout_ms {
            spec.retry = Some(
                RetryPolicy::from_config(config).with_timeout(Duration::from_millis(timeout_ms)),
            );
        }
        spec.scopes = entry.editable.clone();
        spec
    }
}

impl std::fmt::Debug for ViewSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewSpec")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("poll_interval", &self.poll_interval)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewTable {
    views: HashMap<String, ViewSpec>,
}

impl ViewTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: ViewSpec) {
        self.views.insert(spec.key.clone(), spec);
    }

    pub fn get(&self, key: &str) -> Option<&ViewSpec> {
        self.views.get(key)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.views.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Scope names declared by `view`.
    pub fn scopes_of(&self, view: &str) -> Vec<String> {
        self.views
            .get(view)
            .map(|spec| spec.scopes.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl FromIterator<ViewSpec> for ViewTable {
    fn from_iter<I: IntoIterator<Item = ViewSpec>>(iter: I) -> Self {
        let mut table = Self::new();
        for spec in iter {
            table.insert(spec);
        }
        table
    }
}
