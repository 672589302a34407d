//! Configuration for the sync engine and the dashboard view table.
//!
//! `SyncConfig` carries the engine-wide defaults (cache bound, TTL, retry and
//! debounce timings). `AppConfig` adds the backend location and the list of
//! views, and is stored at `~/.config/tabsync/config.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config directory paths
const APP_NAME: &str = "tabsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_MAX_CACHE_SIZE: usize = 5;
const DEFAULT_TTL_MS: u64 = 120_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
const DEFAULT_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Engine-wide settings. Durations are stored in milliseconds so the JSON form
/// matches what operators write by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub max_cache_size: usize,
    pub ttl_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            ttl_ms: DEFAULT_TTL_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_cache_size(mut self, max: usize) -> Self {
        self.max_cache_size = max;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_debounce(mut self, quiet: Duration) -> Self {
        self.debounce_ms = quiet.as_millis() as u64;
        self
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// One row of the declarative view table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewEntry {
    pub key: String,
    /// Endpoint path appended to `AppConfig::base_url`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Editable scopes and the top-level fields each one owns.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub editable: BTreeMap<String, Vec<String>>,
}

impl ViewEntry {
    pub fn new(key: &str, path: &str) -> Self {
        Self {
            key: key.to_string(),
            path: path.to_string(),
            ttl_ms: None,
            poll_interval_ms: None,
            timeout_ms: None,
            editable: BTreeMap::new(),
        }
    }

    pub fn poll_every(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = Some(interval_ms);
        self
    }

    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn editable(mut self, scope: &str, fields: &[&str]) -> Self {
        self.editable.insert(
            scope.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        );
        self
    }
}

/// The dashboard's views as shipped: admin list tabs, cashier and student
/// meal views.
pub fn default_views() -> Vec<ViewEntry> {
    vec![
        ViewEntry::new("overview", "/api/admin/overview")
            .ttl(DEFAULT_TTL_MS)
            .poll_every(120_000),
        ViewEntry::new("rewards", "/api/admin/rewards")
            .ttl(DEFAULT_TTL_MS)
            .poll_every(120_000),
        ViewEntry::new("borrowed", "/api/admin/borrowed")
            .ttl(DEFAULT_TTL_MS)
            .poll_every(60_000),
        ViewEntry::new("returned", "/api/admin/returned")
            .ttl(DEFAULT_TTL_MS)
            .poll_every(60_000),
        ViewEntry::new("mealRegistration", "/api/student/meal-registration")
            .ttl(DEFAULT_TTL_MS)
            .poll_every(60_000)
            .editable("mealRegistration", &["breakfast", "lunch", "dinner"]),
        ViewEntry::new("availedMeals", "/api/cashier/availed-meals")
            .ttl(DEFAULT_TTL_MS)
            .poll_every(5_000),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub views: Vec<ViewEntry>,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            sync: SyncConfig::default(),
            views: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from the default location, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Write to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `TABSYNC_BASE_URL` / `TABSYNC_TOKEN` from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("TABSYNC_BASE_URL") {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(token) = std::env::var("TABSYNC_TOKEN") {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
    }

    /// Configured views, or the built-in table when none are listed.
    pub fn effective_views(&self) -> Vec<ViewEntry> {
        if self.views.is_empty() {
            default_views()
        } else {
            self.views.clone()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
