//! dormant.toml configuration parser and validator.
//!
//! The file is deserialized into private `Raw*` structs and then
//! validated into [`LifecycleConfig`]. Every validation failure is a
//! [`ConfigError`]; a process must refuse to start on one.
//!
//! ```toml
//! [thresholds]
//! active = "10m"
//! idle = "30m"
//! system_idle = "1h"
//!
//! [executor]
//! kind = "inference-service"
//! base_url = "http://localhost:5002"
//!
//! [[rules]]
//! pattern = "^/llama/"
//! resource = "llama"
//! endpoint = "http://localhost:5003/models/llama/report"
//! status_endpoints = { "502" = "http://localhost:5002/models/llama/start" }
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::matcher::{Pattern, PatternMatcher, Rule};
use crate::types::MacAddress;

const DEFAULT_LISTEN: &str = "0.0.0.0:5003";
const DEFAULT_BROADCAST: &str = "255.255.255.255:9";
const DEFAULT_UNIT_TEMPLATE: &str = "model@{resource}";

// ── Raw (file) shape ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    service: RawService,
    thresholds: RawThresholds,
    #[serde(default)]
    timing: RawTiming,
    executor: RawExecutor,
    wake: Option<RawWake>,
    ingest: Option<RawIngest>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    listen: Option<String>,
    starter_listen: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawThresholds {
    active: String,
    idle: String,
    system_idle: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawTiming {
    sweep_period: Option<String>,
    escalation_debounce: Option<String>,
    wake_debounce: Option<String>,
    readiness_poll_interval: Option<String>,
    readiness_timeout: Option<String>,
    executor_timeout: Option<String>,
    escalation_timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
enum RawExecutor {
    InferenceService {
        base_url: String,
        shutdown_command: Option<Vec<String>>,
    },
    Systemctl {
        unit_template: Option<String>,
        use_sudo: Option<bool>,
        shutdown_command: Option<Vec<String>>,
    },
}

#[derive(Debug, Deserialize)]
struct RawWake {
    mac_address: Option<String>,
    broadcast: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIngest {
    log_file: PathBuf,
    poll_interval: Option<String>,
    retry_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MatchKind {
    #[default]
    Regex,
    Substring,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    pattern: String,
    #[serde(default, rename = "match")]
    match_kind: MatchKind,
    resource: String,
    endpoint: Option<String>,
    #[serde(default)]
    status_endpoints: BTreeMap<String, String>,
    escalation_debounce: Option<String>,
    idle: Option<String>,
    wake_mac: Option<String>,
}

// ── Validated shape ────────────────────────────────────────────

/// Listen addresses for the query surface and the starter endpoint.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub listen: SocketAddr,
    pub starter_listen: Option<SocketAddr>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 5003)),
            starter_listen: None,
        }
    }
}

/// Classification thresholds. Invariant: `active <= idle < system_idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub active: Duration,
    pub idle: Duration,
    pub system_idle: Duration,
}

impl Thresholds {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.active > self.idle {
            return Err(ConfigError::Thresholds(format!(
                "active ({:?}) must not exceed idle ({:?})",
                self.active, self.idle
            )));
        }
        if self.idle >= self.system_idle {
            return Err(ConfigError::Thresholds(format!(
                "system_idle ({:?}) must be greater than idle ({:?})",
                self.system_idle, self.idle
            )));
        }
        Ok(())
    }
}

/// Periods, debounce windows, and call bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub sweep_period: Duration,
    pub escalation_debounce: Duration,
    pub wake_debounce: Duration,
    pub readiness_poll_interval: Duration,
    pub readiness_timeout: Duration,
    pub executor_timeout: Duration,
    pub escalation_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            sweep_period: Duration::from_secs(60),
            escalation_debounce: Duration::from_secs(60),
            wake_debounce: Duration::from_secs(5 * 60),
            readiness_poll_interval: Duration::from_secs(2),
            readiness_timeout: Duration::from_secs(60),
            executor_timeout: Duration::from_secs(10),
            escalation_timeout: Duration::from_secs(30),
        }
    }
}

/// Which lifecycle executor drives start/stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorConfig {
    /// REST calls against an inference service (`/models/...`).
    InferenceService {
        base_url: String,
        shutdown_command: Vec<String>,
    },
    /// Local `systemctl` unit control.
    Systemctl {
        unit_template: String,
        use_sudo: bool,
        shutdown_command: Vec<String>,
    },
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig::Systemctl {
            unit_template: DEFAULT_UNIT_TEMPLATE.to_string(),
            use_sudo: true,
            shutdown_command: default_shutdown_command(),
        }
    }
}

fn default_shutdown_command() -> Vec<String> {
    ["sudo", "/sbin/shutdown", "-h", "now"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeConfig {
    pub mac_address: Option<MacAddress>,
    pub broadcast: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub log_file: PathBuf,
    pub poll_interval: Duration,
    pub retry_interval: Duration,
}

/// Fully validated process configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub service: ServiceConfig,
    pub thresholds: Thresholds,
    pub timing: Timing,
    pub executor: ExecutorConfig,
    pub wake: Option<WakeConfig>,
    pub ingest: Option<IngestConfig>,
    pub matcher: PatternMatcher,
}

impl LifecycleConfig {
    /// Build a config in code with default timing and executor.
    ///
    /// Does not validate; use [`LifecycleConfig::validate`] when the
    /// inputs are untrusted.
    pub fn new(matcher: PatternMatcher, thresholds: Thresholds) -> Self {
        Self {
            service: ServiceConfig::default(),
            thresholds,
            timing: Timing::default(),
            executor: ExecutorConfig::default(),
            wake: None,
            ingest: None,
            matcher,
        }
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        let config = Self::from_raw(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the cross-field invariants.
    pub fn validate(&self) -> ConfigResult<()> {
        self.thresholds.validate()?;
        if self.matcher.is_empty() {
            return Err(ConfigError::NoRules);
        }
        for (index, rule) in self.matcher.rules().iter().enumerate() {
            if let Some(idle) = rule.idle_threshold {
                let per_rule = Thresholds { idle, ..self.thresholds };
                per_rule.validate().map_err(|e| ConfigError::Rule {
                    index,
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// Distinct configured resource ids, in rule order.
    pub fn resources(&self) -> Vec<String> {
        self.matcher.resources()
    }

    pub fn is_configured(&self, resource_id: &str) -> bool {
        self.matcher.rule_for_resource(resource_id).is_some()
    }

    /// Idle threshold for a resource, honoring the first rule's override.
    pub fn idle_threshold_for(&self, resource_id: &str) -> Duration {
        self.matcher
            .rule_for_resource(resource_id)
            .and_then(|rule| rule.idle_threshold)
            .unwrap_or(self.thresholds.idle)
    }

    pub fn escalation_debounce_for(&self, rule: &Rule) -> Duration {
        rule.escalation_debounce
            .unwrap_or(self.timing.escalation_debounce)
    }

    /// Wake target for a rule: the rule's own MAC, else the global one.
    pub fn wake_target_for(&self, rule: &Rule) -> Option<(MacAddress, SocketAddr)> {
        let broadcast = self
            .wake
            .as_ref()
            .map(|w| w.broadcast)
            .unwrap_or_else(default_broadcast);
        rule.wake_mac
            .or_else(|| self.wake.as_ref().and_then(|w| w.mac_address))
            .map(|mac| (mac, broadcast))
    }

    fn from_raw(raw: RawConfig) -> ConfigResult<Self> {
        let service = ServiceConfig {
            listen: parse_addr(
                "service.listen",
                raw.service.listen.as_deref().unwrap_or(DEFAULT_LISTEN),
            )?,
            starter_listen: raw
                .service
                .starter_listen
                .as_deref()
                .map(|s| parse_addr("service.starter_listen", s))
                .transpose()?,
        };

        let thresholds = Thresholds {
            active: required_duration("thresholds.active", &raw.thresholds.active)?,
            idle: required_duration("thresholds.idle", &raw.thresholds.idle)?,
            system_idle: required_duration("thresholds.system_idle", &raw.thresholds.system_idle)?,
        };

        let defaults = Timing::default();
        let t = &raw.timing;
        let timing = Timing {
            sweep_period: optional_duration("timing.sweep_period", &t.sweep_period, defaults.sweep_period)?,
            escalation_debounce: optional_duration(
                "timing.escalation_debounce",
                &t.escalation_debounce,
                defaults.escalation_debounce,
            )?,
            wake_debounce: optional_duration("timing.wake_debounce", &t.wake_debounce, defaults.wake_debounce)?,
            readiness_poll_interval: optional_duration(
                "timing.readiness_poll_interval",
                &t.readiness_poll_interval,
                defaults.readiness_poll_interval,
            )?,
            readiness_timeout: optional_duration(
                "timing.readiness_timeout",
                &t.readiness_timeout,
                defaults.readiness_timeout,
            )?,
            executor_timeout: optional_duration(
                "timing.executor_timeout",
                &t.executor_timeout,
                defaults.executor_timeout,
            )?,
            escalation_timeout: optional_duration(
                "timing.escalation_timeout",
                &t.escalation_timeout,
                defaults.escalation_timeout,
            )?,
        };
        if timing.sweep_period.is_zero() || timing.readiness_poll_interval.is_zero() {
            return Err(ConfigError::Duration {
                field: "timing".to_string(),
                value: "sweep_period and readiness_poll_interval must be non-zero".to_string(),
            });
        }

        let executor = match raw.executor {
            RawExecutor::InferenceService {
                base_url,
                shutdown_command,
            } => {
                validate_http_url(&base_url).map_err(ConfigError::Executor)?;
                ExecutorConfig::InferenceService {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    shutdown_command: shutdown_command_or_default(shutdown_command)?,
                }
            }
            RawExecutor::Systemctl {
                unit_template,
                use_sudo,
                shutdown_command,
            } => {
                let unit_template =
                    unit_template.unwrap_or_else(|| DEFAULT_UNIT_TEMPLATE.to_string());
                if !unit_template.contains("{resource}") {
                    return Err(ConfigError::Executor(format!(
                        "unit_template {unit_template:?} must contain {{resource}}"
                    )));
                }
                ExecutorConfig::Systemctl {
                    unit_template,
                    use_sudo: use_sudo.unwrap_or(true),
                    shutdown_command: shutdown_command_or_default(shutdown_command)?,
                }
            }
        };

        let wake = raw
            .wake
            .map(|w| -> ConfigResult<WakeConfig> {
                Ok(WakeConfig {
                    mac_address: w.mac_address.as_deref().map(str::parse::<MacAddress>).transpose()?,
                    broadcast: parse_addr(
                        "wake.broadcast",
                        w.broadcast.as_deref().unwrap_or(DEFAULT_BROADCAST),
                    )?,
                })
            })
            .transpose()?;

        let ingest = raw
            .ingest
            .map(|i| -> ConfigResult<IngestConfig> {
                Ok(IngestConfig {
                    log_file: i.log_file,
                    poll_interval: optional_duration(
                        "ingest.poll_interval",
                        &i.poll_interval,
                        Duration::from_millis(100),
                    )?,
                    retry_interval: optional_duration(
                        "ingest.retry_interval",
                        &i.retry_interval,
                        Duration::from_secs(5),
                    )?,
                })
            })
            .transpose()?;

        let rules = raw
            .rules
            .into_iter()
            .enumerate()
            .map(|(index, r)| build_rule(index, r))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            service,
            thresholds,
            timing,
            executor,
            wake,
            ingest,
            matcher: PatternMatcher::new(rules),
        })
    }
}

/// Shared, swappable view of the active configuration.
///
/// Readers take an `Arc` snapshot and keep using it for the rest of their
/// operation; [`ConfigHandle::replace`] only affects later snapshots.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<LifecycleConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn current(&self) -> Arc<LifecycleConfig> {
        Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Validate and install a new config. The old one stays on error.
    pub fn replace(&self, config: LifecycleConfig) -> ConfigResult<()> {
        config.validate()?;
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        Ok(())
    }
}

fn build_rule(index: usize, raw: RawRule) -> ConfigResult<Rule> {
    let rule_err = |reason: String| ConfigError::Rule { index, reason };

    if raw.resource.trim().is_empty() {
        return Err(rule_err("resource must not be empty".to_string()));
    }
    if raw.pattern.is_empty() {
        return Err(rule_err("pattern must not be empty".to_string()));
    }

    let pattern = match raw.match_kind {
        MatchKind::Regex => Pattern::Regex(
            Regex::new(&raw.pattern).map_err(|e| rule_err(format!("invalid regex: {e}")))?,
        ),
        MatchKind::Substring => Pattern::Substring(raw.pattern),
    };

    if let Some(endpoint) = &raw.endpoint {
        validate_http_url(endpoint).map_err(rule_err)?;
    }

    let mut status_endpoints = BTreeMap::new();
    for (code, url) in raw.status_endpoints {
        let code: u16 = code
            .parse()
            .ok()
            .filter(|c| (100..=599).contains(c))
            .ok_or_else(|| rule_err(format!("invalid status code key {code:?}")))?;
        validate_http_url(&url).map_err(rule_err)?;
        status_endpoints.insert(code, url);
    }

    let escalation_debounce = raw
        .escalation_debounce
        .as_deref()
        .map(|s| required_duration(&format!("rules[{index}].escalation_debounce"), s))
        .transpose()?;
    let idle_threshold = raw
        .idle
        .as_deref()
        .map(|s| required_duration(&format!("rules[{index}].idle"), s))
        .transpose()?;
    let wake_mac = raw
        .wake_mac
        .as_deref()
        .map(str::parse::<MacAddress>)
        .transpose()?;

    Ok(Rule {
        pattern,
        resource_id: raw.resource.trim().to_string(),
        endpoint: raw.endpoint,
        status_endpoints,
        escalation_debounce,
        idle_threshold,
        wake_mac,
    })
}

fn required_duration(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn optional_duration(field: &str, value: &Option<String>, default: Duration) -> ConfigResult<Duration> {
    match value {
        Some(v) => required_duration(field, v),
        None => Ok(default),
    }
}

fn parse_addr(field: &str, value: &str) -> ConfigResult<SocketAddr> {
    value.parse().map_err(|_| ConfigError::Address {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn default_broadcast() -> SocketAddr {
    SocketAddr::from(([255, 255, 255, 255], 9))
}

fn shutdown_command_or_default(cmd: Option<Vec<String>>) -> ConfigResult<Vec<String>> {
    match cmd {
        Some(argv) if argv.is_empty() => Err(ConfigError::Executor(
            "shutdown_command must not be empty".to_string(),
        )),
        Some(argv) => Ok(argv),
        None => Ok(default_shutdown_command()),
    }
}

/// Escalation and executor targets are plain-HTTP URLs with a host.
fn validate_http_url(url: &str) -> Result<(), String> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e| format!("invalid URL {url:?}: {e}"))?;
    if uri.scheme_str() != Some("http") {
        return Err(format!("URL {url:?} must use the http scheme"));
    }
    if uri.authority().is_none() {
        return Err(format!("URL {url:?} has no host"));
    }
    Ok(())
}
