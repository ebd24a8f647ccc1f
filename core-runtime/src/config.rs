//! # Sync Configuration Module
//!
//! Two layers of configuration live here:
//!
//! - [`SyncConfig`] / [`SyncSettings`]: the runtime-mutable knobs (cooldowns,
//!   intervals, timeouts, retry policy, feature toggles, enabled record
//!   families). Every service reads a snapshot at the start of each cycle, so
//!   an admin change takes effect on the next cycle without a restart.
//! - [`ServiceConfig`]: the service identity read once from the environment at
//!   start-up (Supabase project, spreadsheet, service-account credentials,
//!   listener strategy, HTTP port). It is validated fail-fast and never
//!   reloaded.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{IntervalKind, ServiceConfig, SyncSettings};
//!
//! let config = ServiceConfig::from_env()?;
//! let settings = SyncSettings::new(config.sync.clone());
//!
//! settings.set_interval(IntervalKind::BackgroundSyncInterval, 120)?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Smallest interval (seconds) the admin surface accepts for any interval kind.
pub const MIN_INTERVAL_SECS: u64 = 10;

/// Default channel for `LISTEN`/`NOTIFY` change payloads.
pub const DEFAULT_NOTIFY_CHANNEL: &str = "table_changes";

pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Largest accepted session cleanup age (about a century).
pub const MAX_CLEANUP_DAYS_OLD: i64 = 36_500;

/// Durations cross the wire as seconds: whole numbers stay integers, anything
/// finer goes out as a fraction.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Record families
// ============================================================================

/// A category of source records exported to its own sheet tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFamily {
    UserProfiles,
    QuizResponses,
    EngagementLogs,
    ChatLogs,
    CourseProgress,
}

impl RecordFamily {
    pub const ALL: [RecordFamily; 5] = [
        RecordFamily::UserProfiles,
        RecordFamily::QuizResponses,
        RecordFamily::EngagementLogs,
        RecordFamily::ChatLogs,
        RecordFamily::CourseProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordFamily::UserProfiles => "user_profiles",
            RecordFamily::QuizResponses => "quiz_responses",
            RecordFamily::EngagementLogs => "engagement_logs",
            RecordFamily::ChatLogs => "chat_logs",
            RecordFamily::CourseProgress => "course_progress",
        }
    }
}

impl fmt::Display for RecordFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        RecordFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == needle)
            .ok_or_else(|| Error::Config(format!("Unknown record family: {}", needle)))
    }
}

// ============================================================================
// Intervals
// ============================================================================

/// The intervals that can be changed at runtime through the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalKind {
    TriggeredSyncCooldown,
    BackgroundSyncInterval,
    ListenerPollInterval,
    ListenerReconnectDelay,
}

impl IntervalKind {
    pub const ALL: [IntervalKind; 4] = [
        IntervalKind::TriggeredSyncCooldown,
        IntervalKind::BackgroundSyncInterval,
        IntervalKind::ListenerPollInterval,
        IntervalKind::ListenerReconnectDelay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalKind::TriggeredSyncCooldown => "triggered_sync_cooldown",
            IntervalKind::BackgroundSyncInterval => "background_sync_interval",
            IntervalKind::ListenerPollInterval => "listener_poll_interval",
            IntervalKind::ListenerReconnectDelay => "listener_reconnect_delay",
        }
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        IntervalKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownInterval(s.to_string()))
    }
}

// ============================================================================
// Retry policy
// ============================================================================

/// Exponential backoff for whole sync attempts.
///
/// The delay before retry `k + 1` is `min(initial_delay * backoff_base^k, max_delay)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub initial_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt with zero-based index `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_base.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Retry policy needs at least one attempt".to_string(),
            ));
        }
        if !(self.backoff_base >= 1.0) {
            return Err(Error::Config(format!(
                "Retry backoff base must be >= 1.0 (got {})",
                self.backoff_base
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(Error::Config(
                "Retry initial delay cannot exceed the maximum delay".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Sync configuration
// ============================================================================

/// Feature toggles for the long-running services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    pub triggered_sync: bool,
    pub background_sync: bool,
    pub change_listener: bool,
    pub session_cleanup: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            triggered_sync: true,
            background_sync: true,
            change_listener: true,
            session_cleanup: true,
        }
    }
}

/// Runtime-mutable sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minimum gap between two admitted triggered syncs
    #[serde(with = "duration_secs")]
    pub triggered_sync_cooldown: Duration,
    /// Sleep between background sync cycles
    #[serde(with = "duration_secs")]
    pub background_sync_interval: Duration,
    /// Sleep between polling-listener cycles
    #[serde(with = "duration_secs")]
    pub listener_poll_interval: Duration,
    /// Wait before resubscribing after the push feed drops
    #[serde(with = "duration_secs")]
    pub listener_reconnect_delay: Duration,
    /// Upper bound for a single sheet write
    #[serde(with = "duration_secs")]
    pub sink_timeout: Duration,
    /// Upper bound for a single source query
    #[serde(with = "duration_secs")]
    pub source_timeout: Duration,
    pub retry: RetryPolicy,
    pub cleanup_interval_hours: u64,
    /// Empty sessions older than this many days are deleted
    pub cleanup_days_old: i64,
    /// Wait after a failed cleanup cycle
    #[serde(with = "duration_secs")]
    pub cleanup_error_retry: Duration,
    pub toggles: FeatureToggles,
    pub enabled_families: BTreeSet<RecordFamily>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            triggered_sync_cooldown: Duration::from_secs(30),
            background_sync_interval: Duration::from_secs(300),
            listener_poll_interval: Duration::from_secs(30),
            listener_reconnect_delay: Duration::from_secs(10),
            sink_timeout: Duration::from_secs(60),
            source_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            cleanup_interval_hours: 24,
            cleanup_days_old: 30,
            cleanup_error_retry: Duration::from_secs(3600),
            toggles: FeatureToggles::default(),
            enabled_families: RecordFamily::ALL.into_iter().collect(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `SYNC_*` / `SESSION_CLEANUP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let secs = |key: &str| -> Result<Option<Duration>> {
            Ok(parse_var::<u64, _>(&lookup, key)?.map(Duration::from_secs))
        };

        if let Some(d) = secs("SYNC_TRIGGERED_COOLDOWN_SECS")? {
            config.triggered_sync_cooldown = d;
        }
        if let Some(d) = secs("SYNC_BACKGROUND_INTERVAL_SECS")? {
            config.background_sync_interval = d;
        }
        if let Some(d) = secs("SYNC_POLL_INTERVAL_SECS")? {
            config.listener_poll_interval = d;
        }
        if let Some(d) = secs("SYNC_RECONNECT_DELAY_SECS")? {
            config.listener_reconnect_delay = d;
        }
        if let Some(d) = secs("SYNC_SINK_TIMEOUT_SECS")? {
            config.sink_timeout = d;
        }
        if let Some(d) = secs("SYNC_SOURCE_TIMEOUT_SECS")? {
            config.source_timeout = d;
        }
        if let Some(n) = parse_var(&lookup, "SYNC_MAX_ATTEMPTS")? {
            config.retry.max_attempts = n;
        }
        if let Some(d) = secs("SYNC_RETRY_INITIAL_DELAY_SECS")? {
            config.retry.initial_delay = d;
        }
        if let Some(d) = secs("SYNC_RETRY_MAX_DELAY_SECS")? {
            config.retry.max_delay = d;
        }
        if let Some(hours) = parse_var(&lookup, "SESSION_CLEANUP_INTERVAL_HOURS")? {
            config.cleanup_interval_hours = hours;
        }
        if let Some(days) = parse_var(&lookup, "SESSION_CLEANUP_DAYS_OLD")? {
            config.cleanup_days_old = days;
        }

        if let Some(on) = parse_flag(&lookup, "SYNC_TRIGGERED_ENABLED")? {
            config.toggles.triggered_sync = on;
        }
        if let Some(on) = parse_flag(&lookup, "SYNC_BACKGROUND_ENABLED")? {
            config.toggles.background_sync = on;
        }
        if let Some(on) = parse_flag(&lookup, "SYNC_LISTENER_ENABLED")? {
            config.toggles.change_listener = on;
        }
        if let Some(on) = parse_flag(&lookup, "SESSION_CLEANUP_ENABLED")? {
            config.toggles.session_cleanup = on;
        }

        if let Some(list) = lookup("SYNC_FAMILIES") {
            config.enabled_families = list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(RecordFamily::from_str)
                .collect::<Result<_>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn interval(&self, kind: IntervalKind) -> Duration {
        match kind {
            IntervalKind::TriggeredSyncCooldown => self.triggered_sync_cooldown,
            IntervalKind::BackgroundSyncInterval => self.background_sync_interval,
            IntervalKind::ListenerPollInterval => self.listener_poll_interval,
            IntervalKind::ListenerReconnectDelay => self.listener_reconnect_delay,
        }
    }

    fn interval_mut(&mut self, kind: IntervalKind) -> &mut Duration {
        match kind {
            IntervalKind::TriggeredSyncCooldown => &mut self.triggered_sync_cooldown,
            IntervalKind::BackgroundSyncInterval => &mut self.background_sync_interval,
            IntervalKind::ListenerPollInterval => &mut self.listener_poll_interval,
            IntervalKind::ListenerReconnectDelay => &mut self.listener_reconnect_delay,
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours.saturating_mul(3600))
    }

    pub fn is_family_enabled(&self, family: RecordFamily) -> bool {
        self.enabled_families.contains(&family)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Runtime-adjustable intervals are at least [`MIN_INTERVAL_SECS`]
    /// - Timeouts are non-zero
    /// - The retry policy is usable
    /// - Cleanup settings are positive and the cleanup age is at most
    ///   [`MAX_CLEANUP_DAYS_OLD`]
    pub fn validate(&self) -> Result<()> {
        for kind in IntervalKind::ALL {
            let seconds = self.interval(kind).as_secs();
            if seconds < MIN_INTERVAL_SECS {
                return Err(Error::InvalidInterval {
                    kind: kind.to_string(),
                    seconds,
                    min: MIN_INTERVAL_SECS,
                });
            }
        }

        if self.sink_timeout.is_zero() || self.source_timeout.is_zero() {
            return Err(Error::Config(
                "Sink and source timeouts must be greater than 0 seconds".to_string(),
            ));
        }

        self.retry.validate()?;

        if self.cleanup_interval_hours == 0 {
            return Err(Error::Config(
                "Session cleanup interval must be at least 1 hour".to_string(),
            ));
        }
        if self.cleanup_days_old <= 0 {
            return Err(Error::Config(
                "Session cleanup age must be at least 1 day".to_string(),
            ));
        }
        if self.cleanup_days_old > MAX_CLEANUP_DAYS_OLD {
            return Err(Error::Config(format!(
                "Session cleanup age must be at most {} days",
                MAX_CLEANUP_DAYS_OLD
            )));
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, raw))),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(Error::Config(format!("{} must be true or false: {}", key, v))),
        },
    }
}

// ============================================================================
// Process-wide settings holder
// ============================================================================

/// Shared, mutable holder for [`SyncConfig`].
///
/// Readers take cheap snapshots; the admin surface writes through
/// [`SyncSettings::set_interval`] or [`SyncSettings::update`].
#[derive(Debug, Default)]
pub struct SyncSettings {
    inner: RwLock<SyncConfig>,
}

impl SyncSettings {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    pub fn snapshot(&self) -> SyncConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn interval(&self, kind: IntervalKind) -> Duration {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .interval(kind)
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut SyncConfig),
    {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Change one interval; values below [`MIN_INTERVAL_SECS`] are rejected.
    pub fn set_interval(&self, kind: IntervalKind, seconds: u64) -> Result<Duration> {
        if seconds < MIN_INTERVAL_SECS {
            return Err(Error::InvalidInterval {
                kind: kind.to_string(),
                seconds,
                min: MIN_INTERVAL_SECS,
            });
        }
        let value = Duration::from_secs(seconds);
        self.update(|config| *config.interval_mut(kind) = value);
        Ok(value)
    }
}

// ============================================================================
// Service identity (environment, read once)
// ============================================================================

/// How the change listener learns about source changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerStrategy {
    /// Subscribe to a notification channel
    Push,
    /// Periodically query the source for rows newer than a watermark
    Poll,
    Disabled,
}

impl ListenerStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerStrategy::Push => "push",
            ListenerStrategy::Poll => "poll",
            ListenerStrategy::Disabled => "disabled",
        }
    }
}

impl FromStr for ListenerStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(ListenerStrategy::Push),
            "poll" | "polling" => Ok(ListenerStrategy::Poll),
            "disabled" | "off" | "none" => Ok(ListenerStrategy::Disabled),
            other => Err(Error::Config(format!(
                "SYNC_LISTENER must be push, poll or disabled (got {})",
                other
            ))),
        }
    }
}

/// Where the Google service-account key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum GoogleCredentialsSource {
    File(PathBuf),
    Inline(String),
}

impl fmt::Debug for GoogleCredentialsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoogleCredentialsSource::File(path) => f.debug_tuple("File").field(path).finish(),
            GoogleCredentialsSource::Inline(_) => f.write_str("Inline([REDACTED])"),
        }
    }
}

/// Start-up configuration for the sync server.
///
/// Use [`ServiceConfigBuilder`] or [`ServiceConfig::from_env`] to construct it.
#[derive(Clone)]
pub struct ServiceConfig {
    /// Supabase project URL, e.g. `https://abc.supabase.co`
    pub supabase_url: String,
    /// Service-role key used for both `apikey` and bearer auth
    pub supabase_service_key: String,
    pub spreadsheet_id: String,
    pub google_credentials: GoogleCredentialsSource,
    /// Direct Postgres connection used for `LISTEN` (push strategy only)
    pub database_url: Option<String>,
    pub listener_strategy: ListenerStrategy,
    pub notify_channel: String,
    pub http_port: u16,
    /// Initial runtime settings
    pub sync: SyncConfig,
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_service_key", &"[REDACTED]")
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("google_credentials", &self.google_credentials)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("listener_strategy", &self.listener_strategy)
            .field("notify_channel", &self.notify_channel)
            .field("http_port", &self.http_port)
            .field("sync", &self.sync)
            .finish()
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    /// Read the process environment once.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder = ServiceConfig::builder().sync(SyncConfig::from_lookup(&lookup)?);

        if let Some(url) = non_empty("SUPABASE_URL") {
            builder = builder.supabase_url(url);
        }
        if let Some(key) = non_empty("SUPABASE_SERVICE_KEY") {
            builder = builder.supabase_service_key(key);
        }
        if let Some(id) = non_empty("GOOGLE_SHEETS_SPREADSHEET_ID") {
            builder = builder.spreadsheet_id(id);
        }
        if let Some(json) = non_empty("GOOGLE_SERVICE_ACCOUNT_JSON") {
            builder = builder.google_credentials(GoogleCredentialsSource::Inline(json));
        } else if let Some(path) = non_empty("GOOGLE_SERVICE_ACCOUNT_FILE") {
            builder = builder.google_credentials(GoogleCredentialsSource::File(path.into()));
        }
        if let Some(url) = non_empty("DATABASE_URL") {
            builder = builder.database_url(url);
        }
        if let Some(strategy) = non_empty("SYNC_LISTENER") {
            builder = builder.listener_strategy(strategy.parse()?);
        }
        if let Some(channel) = non_empty("SYNC_NOTIFY_CHANNEL") {
            builder = builder.notify_channel(channel);
        }
        if let Some(port) = parse_var(&lookup, "HTTP_PORT")? {
            builder = builder.http_port(port);
        }

        builder.build()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if !(self.supabase_url.starts_with("https://") || self.supabase_url.starts_with("http://"))
        {
            return Err(Error::Config(format!(
                "SUPABASE_URL must be an http(s) URL (got {})",
                self.supabase_url
            )));
        }

        if self.listener_strategy == ListenerStrategy::Push && self.database_url.is_none() {
            return Err(Error::Config(
                "Push listener requires DATABASE_URL. \
                 Set SYNC_LISTENER=poll to watch the source through the REST API instead."
                    .to_string(),
            ));
        }

        let channel_ok = !self.notify_channel.is_empty()
            && self
                .notify_channel
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !channel_ok {
            return Err(Error::Config(format!(
                "Notification channel must be a plain identifier (got {:?})",
                self.notify_channel
            )));
        }

        self.sync.validate()
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Default)]
pub struct ServiceConfigBuilder {
    supabase_url: Option<String>,
    supabase_service_key: Option<String>,
    spreadsheet_id: Option<String>,
    google_credentials: Option<GoogleCredentialsSource>,
    database_url: Option<String>,
    listener_strategy: Option<ListenerStrategy>,
    notify_channel: Option<String>,
    http_port: Option<u16>,
    sync: Option<SyncConfig>,
}

impl ServiceConfigBuilder {
    pub fn supabase_url(mut self, url: impl Into<String>) -> Self {
        self.supabase_url = Some(url.into());
        self
    }

    pub fn supabase_service_key(mut self, key: impl Into<String>) -> Self {
        self.supabase_service_key = Some(key.into());
        self
    }

    pub fn spreadsheet_id(mut self, id: impl Into<String>) -> Self {
        self.spreadsheet_id = Some(id.into());
        self
    }

    pub fn google_credentials(mut self, source: GoogleCredentialsSource) -> Self {
        self.google_credentials = Some(source);
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Default: push when a database URL is configured, poll otherwise.
    pub fn listener_strategy(mut self, strategy: ListenerStrategy) -> Self {
        self.listener_strategy = Some(strategy);
        self
    }

    pub fn notify_channel(mut self, channel: impl Into<String>) -> Self {
        self.notify_channel = Some(channel.into());
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    pub fn sync(mut self, sync: SyncConfig) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the missing environment variable when
    /// a required value was not provided, or the first validation failure.
    pub fn build(self) -> Result<ServiceConfig> {
        let supabase_url = self
            .supabase_url
            .ok_or_else(|| missing("SUPABASE_URL", "Supabase project URL"))?;
        let supabase_service_key = self
            .supabase_service_key
            .ok_or_else(|| missing("SUPABASE_SERVICE_KEY", "Supabase service-role key"))?;
        let spreadsheet_id = self
            .spreadsheet_id
            .ok_or_else(|| missing("GOOGLE_SHEETS_SPREADSHEET_ID", "target spreadsheet id"))?;
        let google_credentials = self.google_credentials.ok_or_else(|| {
            missing(
                "GOOGLE_SERVICE_ACCOUNT_FILE or GOOGLE_SERVICE_ACCOUNT_JSON",
                "service-account key",
            )
        })?;

        let listener_strategy = self.listener_strategy.unwrap_or(if self.database_url.is_some() {
            ListenerStrategy::Push
        } else {
            ListenerStrategy::Poll
        });

        let config = ServiceConfig {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_service_key,
            spreadsheet_id,
            google_credentials,
            database_url: self.database_url,
            listener_strategy,
            notify_channel: self
                .notify_channel
                .unwrap_or_else(|| DEFAULT_NOTIFY_CHANNEL.to_string()),
            http_port: self.http_port.unwrap_or(DEFAULT_HTTP_PORT),
            sync: self.sync.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

fn missing(var: &str, what: &str) -> Error {
    Error::Config(format!("{} is required: set {}", what, var))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SUPABASE_URL", "https://abc.supabase.co/"),
            ("SUPABASE_SERVICE_KEY", "service-role"),
            ("GOOGLE_SHEETS_SPREADSHEET_ID", "sheet-1"),
            ("GOOGLE_SERVICE_ACCOUNT_FILE", "/etc/sync/key.json"),
        ]
    }

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.triggered_sync_cooldown, Duration::from_secs(30));
        assert_eq!(config.background_sync_interval, Duration::from_secs(300));
        assert_eq!(config.listener_poll_interval, Duration::from_secs(30));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(24 * 3600));
        assert_eq!(config.cleanup_days_old, 30);
        assert_eq!(config.enabled_families.len(), 5);
        assert!(config.toggles.background_sync);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delay_for_attempt_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_base: 2.0,
        };

        let delays: Vec<u64> = (0..6).map(|k| policy.delay_for_attempt(k).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_policy_validation() {
        let mut policy = RetryPolicy::default();
        policy.max_attempts = 0;
        assert!(policy.validate().is_err());

        let mut policy = RetryPolicy::default();
        policy.backoff_base = 0.5;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_interval_kind_parsing() {
        assert_eq!(
            "background_sync_interval".parse::<IntervalKind>().unwrap(),
            IntervalKind::BackgroundSyncInterval
        );
        let err = "sync_everything".parse::<IntervalKind>().unwrap_err();
        assert!(matches!(err, Error::UnknownInterval(name) if name == "sync_everything"));
    }

    #[test]
    fn test_set_interval_rejects_below_minimum() {
        let settings = SyncSettings::default();

        let err = settings
            .set_interval(IntervalKind::ListenerPollInterval, 9)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInterval { seconds: 9, min: 10, .. }));
        assert_eq!(
            settings.interval(IntervalKind::ListenerPollInterval),
            Duration::from_secs(30)
        );

        settings
            .set_interval(IntervalKind::ListenerPollInterval, 10)
            .unwrap();
        assert_eq!(settings.snapshot().listener_poll_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_sync_config_env_overrides() {
        let config = SyncConfig::from_lookup(env(&[
            ("SYNC_BACKGROUND_INTERVAL_SECS", "600"),
            ("SYNC_MAX_ATTEMPTS", "5"),
            ("SESSION_CLEANUP_DAYS_OLD", "7"),
            ("SYNC_LISTENER_ENABLED", "false"),
            ("SYNC_FAMILIES", "user_profiles, chat_logs"),
        ]))
        .unwrap();

        assert_eq!(config.background_sync_interval, Duration::from_secs(600));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.cleanup_days_old, 7);
        assert!(!config.toggles.change_listener);
        assert!(config.is_family_enabled(RecordFamily::ChatLogs));
        assert!(!config.is_family_enabled(RecordFamily::QuizResponses));
    }

    #[test]
    fn test_sync_config_env_rejects_garbage() {
        let err = SyncConfig::from_lookup(env(&[("SYNC_MAX_ATTEMPTS", "many")])).unwrap_err();
        assert!(err.to_string().contains("SYNC_MAX_ATTEMPTS"));

        let err = SyncConfig::from_lookup(env(&[("SYNC_POLL_INTERVAL_SECS", "2")])).unwrap_err();
        assert!(matches!(err, Error::InvalidInterval { .. }));
    }

    #[test]
    fn test_sync_config_serializes_durations_as_seconds() {
        let json = serde_json::to_value(SyncConfig::default()).unwrap();
        assert_eq!(json["triggered_sync_cooldown"], 30);
        assert_eq!(json["retry"]["initial_delay"], 1);
        assert_eq!(json["enabled_families"][0], "user_profiles");

        let fractional = SyncConfig {
            sink_timeout: Duration::from_millis(1500),
            ..SyncConfig::default()
        };
        let json = serde_json::to_value(fractional).unwrap();
        assert_eq!(json["sink_timeout"], 1.5);

        let back: SyncConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.sink_timeout, Duration::from_millis(1500));
        assert_eq!(back.triggered_sync_cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_sync_config_rejects_unrepresentable_cleanup_age() {
        let huge = (i64::MAX / 2).to_string();
        let err = SyncConfig::from_lookup(env(&[("SESSION_CLEANUP_DAYS_OLD", huge.as_str())]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config =
            SyncConfig::from_lookup(env(&[("SESSION_CLEANUP_DAYS_OLD", "36500")])).unwrap();
        assert_eq!(config.cleanup_days_old, MAX_CLEANUP_DAYS_OLD);
    }

    #[test]
    fn test_service_config_from_env() {
        let config = ServiceConfig::from_lookup(env(&required())).unwrap();

        assert_eq!(config.supabase_url, "https://abc.supabase.co");
        assert_eq!(config.listener_strategy, ListenerStrategy::Poll);
        assert_eq!(config.notify_channel, DEFAULT_NOTIFY_CHANNEL);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(
            config.google_credentials,
            GoogleCredentialsSource::File("/etc/sync/key.json".into())
        );
    }

    #[test]
    fn test_service_config_defaults_to_push_with_database_url() {
        let mut vars = required();
        vars.push(("DATABASE_URL", "postgres://sync@db/tutor"));
        vars.push(("HTTP_PORT", "9000"));
        let config = ServiceConfig::from_lookup(env(&vars)).unwrap();

        assert_eq!(config.listener_strategy, ListenerStrategy::Push);
        assert_eq!(config.http_port, 9000);
    }

    #[test]
    fn test_service_config_missing_required_var() {
        let vars: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "GOOGLE_SHEETS_SPREADSHEET_ID")
            .collect();
        let err = ServiceConfig::from_lookup(env(&vars)).unwrap_err();

        assert!(err.to_string().contains("GOOGLE_SHEETS_SPREADSHEET_ID"));
    }

    #[test]
    fn test_push_requires_database_url() {
        let mut vars = required();
        vars.push(("SYNC_LISTENER", "push"));
        let err = ServiceConfig::from_lookup(env(&vars)).unwrap_err();

        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = required();
        vars.push(("GOOGLE_SERVICE_ACCOUNT_JSON", "{\"private_key\":\"pk\"}"));
        let config = ServiceConfig::from_lookup(env(&vars)).unwrap();
        let rendered = format!("{:?}", config);

        assert!(!rendered.contains("service-role"));
        assert!(!rendered.contains("private_key"));
        assert!(rendered.contains("Inline([REDACTED])"));
    }
}
