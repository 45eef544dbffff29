//! Runtime configuration.
//!
//! Built from `Default`, overridden by `FORMLINK_*` environment variables, or
//! deserialized from a JSON/YAML document. Durations are milliseconds.

use crate::bridge::{ClientOptions, DiscoveryOptions};
use crate::errors::{AutomationError, Result};
use crate::filter::ElementFilter;
use crate::geometry::DEFAULT_ANCHOR_INSET;
use crate::selector::{Scope, SourcePreference};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub port_min: u16,
    pub port_max: u16,
    /// Skip the socket table and probe only this port.
    pub port: Option<u16>,
    pub probe_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub probe_concurrency: usize,
    pub request_timeout_ms: u64,
    pub failure_threshold: u32,
    pub rediscovery_cooldown_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port_min: 1024,
            port_max: 65535,
            port: None,
            probe_timeout_ms: 500,
            discovery_timeout_ms: 5_000,
            probe_concurrency: 16,
            request_timeout_ms: 3_000,
            failure_threshold: 1,
            rediscovery_cooldown_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub default_scope: Scope,
    pub source_preference: SourcePreference,
    #[serde(flatten)]
    pub filter: ElementFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub anchor_inset: i32,
    /// Wait after each batch step unless the step sets its own.
    pub default_wait_ms: u64,
    /// Pause between the focusing click and typing in `set_text`.
    pub focus_settle_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            anchor_inset: DEFAULT_ANCHOR_INSET,
            default_wait_ms: 100,
            focus_settle_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormlinkConfig {
    pub bridge: BridgeConfig,
    pub resolver: ResolverConfig,
    pub input: InputConfig,
    /// Refuse element steps while a native dialog of the target is open.
    pub dialog_guard: bool,
}

impl FormlinkConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, which maps a `FORMLINK_*` name to a value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let b = &mut self.bridge;
        if let Some(host) = lookup("FORMLINK_BRIDGE_HOST") {
            b.host = host;
        }
        set_parsed(&lookup, "FORMLINK_PORT_MIN", &mut b.port_min)?;
        set_parsed(&lookup, "FORMLINK_PORT_MAX", &mut b.port_max)?;
        if let Some(port) = parse_var::<u16, _>(&lookup, "FORMLINK_BRIDGE_PORT")? {
            b.port = Some(port);
        }
        set_parsed(&lookup, "FORMLINK_PROBE_TIMEOUT_MS", &mut b.probe_timeout_ms)?;
        set_parsed(&lookup, "FORMLINK_DISCOVERY_TIMEOUT_MS", &mut b.discovery_timeout_ms)?;
        set_parsed(&lookup, "FORMLINK_PROBE_CONCURRENCY", &mut b.probe_concurrency)?;
        set_parsed(&lookup, "FORMLINK_REQUEST_TIMEOUT_MS", &mut b.request_timeout_ms)?;
        set_parsed(&lookup, "FORMLINK_FAILURE_THRESHOLD", &mut b.failure_threshold)?;
        set_parsed(&lookup, "FORMLINK_REDISCOVERY_COOLDOWN_MS", &mut b.rediscovery_cooldown_ms)?;

        let r = &mut self.resolver;
        set_parsed(&lookup, "FORMLINK_DEFAULT_SCOPE", &mut r.default_scope)?;
        set_parsed(&lookup, "FORMLINK_SOURCE", &mut r.source_preference)?;
        set_flag(&lookup, "FORMLINK_INCLUDE_HIDDEN", &mut r.filter.include_hidden)?;
        set_flag(&lookup, "FORMLINK_INCLUDE_LABELS", &mut r.filter.include_labels)?;
        set_flag(&lookup, "FORMLINK_INCLUDE_CONTAINERS", &mut r.filter.include_containers)?;

        set_parsed(&lookup, "FORMLINK_ANCHOR_INSET", &mut self.input.anchor_inset)?;
        set_parsed(&lookup, "FORMLINK_DEFAULT_WAIT_MS", &mut self.input.default_wait_ms)?;
        set_parsed(&lookup, "FORMLINK_FOCUS_SETTLE_MS", &mut self.input.focus_settle_ms)?;
        set_flag(&lookup, "FORMLINK_DIALOG_GUARD", &mut self.dialog_guard)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.bridge;
        if b.port_min > b.port_max {
            return Err(AutomationError::InvalidArgument(format!(
                "empty port range {}..={}",
                b.port_min, b.port_max
            )));
        }
        if b.probe_concurrency == 0 {
            return Err(AutomationError::InvalidArgument(
                "probe_concurrency must be at least 1".to_string(),
            ));
        }
        if b.failure_threshold == 0 {
            return Err(AutomationError::InvalidArgument(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if b.probe_timeout_ms == 0 || b.discovery_timeout_ms == 0 || b.request_timeout_ms == 0 {
            return Err(AutomationError::InvalidArgument(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.input.anchor_inset < 0 {
            return Err(AutomationError::InvalidArgument(
                "anchor_inset cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        let b = &self.bridge;
        DiscoveryOptions {
            port_range: b.port_min..=b.port_max,
            fixed_port: b.port,
            per_probe_timeout: Duration::from_millis(b.probe_timeout_ms),
            overall_timeout: Duration::from_millis(b.discovery_timeout_ms),
            max_concurrency: b.probe_concurrency,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        let b = &self.bridge;
        ClientOptions {
            request_timeout: Duration::from_millis(b.request_timeout_ms),
            failure_threshold: b.failure_threshold,
            rediscovery_cooldown: Duration::from_millis(b.rediscovery_cooldown_ms),
        }
    }

    pub fn default_wait(&self) -> Duration {
        Duration::from_millis(self.input.default_wait_ms)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AutomationError::InvalidArgument(format!("{key}={raw}: {e}"))),
    }
}

fn set_parsed<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = parse_var(lookup, key)? {
        *slot = value;
    }
    Ok(())
}

fn set_flag<F>(lookup: &F, key: &str, slot: &mut bool) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    *slot = match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" | "" => false,
        _ => {
            return Err(AutomationError::InvalidArgument(format!(
                "{key}={raw}: expected a boolean"
            )))
        }
    };
    Ok(())
}
