//! Configuration for sync nodes.
//!
//! Values come from builder methods or from `LOOPSYNC_*` environment
//! variables. Parsing goes through a lookup function so it can be exercised
//! without touching the process environment.

use loopsync_engine::{AppId, Domain};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Identity and timing of one process taking part in sync.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Stable application id; also the input of the port hash
    pub app_id: AppId,
    /// Human-readable application name
    pub app_name: String,
    /// Application version, sent in handshakes
    pub app_version: String,
    /// Loopback address to listen on and dial
    pub host: IpAddr,
    /// Number of consecutive ports tried from the preferred one
    pub port_window: u16,
    /// Attempts of the supervised bind loop before giving up
    pub bind_attempts: u32,
    /// Fixed pause between bind attempts
    pub bind_backoff: Duration,
    /// Sibling app ids whose preferred ports are probed
    pub known_apps: Vec<AppId>,
    /// Extra ports probed on every discovery round
    pub static_ports: Vec<u16>,
    /// Ports past each guessed preferred port that are probed too
    pub probe_depth: u16,
    /// Discovery round interval; `None` disables discovery
    pub discovery_interval: Option<Duration>,
    /// Deadline for an outbound TCP connect
    pub connect_timeout: Duration,
    /// Deadline for the peer's handshake frame
    pub handshake_timeout: Duration,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// Silent intervals tolerated before a session is closed
    pub missed_heartbeats: u32,
    /// Window over which local changes are coalesced
    pub debounce: Duration,
    /// Maximum objects per `object_batch` frame
    pub max_batch_objects: usize,
    /// Backoff for re-dialing ports that failed
    pub retry: RetryConfig,
    /// How long `stop()` waits for tasks before aborting them
    pub shutdown_grace: Duration,
}

impl NodeConfig {
    /// Create a configuration with default timings.
    pub fn new(
        app_id: impl Into<AppId>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_name: app_name.into(),
            app_version: app_version.into(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_window: 100,
            bind_attempts: 3,
            bind_backoff: Duration::from_millis(250),
            known_apps: Vec::new(),
            static_ports: Vec::new(),
            probe_depth: 2,
            discovery_interval: Some(Duration::from_secs(5)),
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            missed_heartbeats: 3,
            debounce: Duration::from_millis(200),
            max_batch_objects: 256,
            retry: RetryConfig::default(),
            shutdown_grace: Duration::from_secs(2),
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_port_window(mut self, window: u16) -> Self {
        self.port_window = window;
        self
    }

    pub fn with_bind_attempts(mut self, attempts: u32, backoff: Duration) -> Self {
        self.bind_attempts = attempts;
        self.bind_backoff = backoff;
        self
    }

    pub fn with_known_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AppId>,
    {
        self.known_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_static_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.static_ports = ports.into_iter().collect();
        self
    }

    pub fn with_probe_depth(mut self, depth: u16) -> Self {
        self.probe_depth = depth;
        self
    }

    pub fn with_discovery_interval(mut self, interval: Option<Duration>) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, missed: u32) -> Self {
        self.heartbeat_interval = interval;
        self.missed_heartbeats = missed;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_max_batch_objects(mut self, max: usize) -> Self {
        self.max_batch_objects = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Silence after which a session is considered dead.
    pub fn liveness_timeout(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.missed_heartbeats.max(1))
    }

    /// Check invariants the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_id.trim().is_empty() {
            return Err(ConfigError::MissingAppId);
        }
        if !self.host.is_loopback() {
            return Err(ConfigError::NonLoopbackHost(self.host.to_string()));
        }
        if self.port_window == 0 {
            return Err(ConfigError::invalid("port_window", "0"));
        }
        if self.max_batch_objects == 0 {
            return Err(ConfigError::invalid("max_batch_objects", "0"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::invalid("heartbeat_interval", "0"));
        }
        Ok(())
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_id = lookup("LOOPSYNC_APP_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingAppId)?;
        let app_name = lookup("LOOPSYNC_APP_NAME").unwrap_or_else(|| app_id.clone());
        let app_version = lookup("LOOPSYNC_APP_VERSION")
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

        let mut config = Self::new(app_id, app_name, app_version);

        if let Some(host) = lookup("LOOPSYNC_HOST") {
            config.host = parse_var("LOOPSYNC_HOST", &host)?;
        }
        if let Some(apps) = lookup("LOOPSYNC_KNOWN_APPS") {
            config.known_apps = split_list(&apps).map(str::to_string).collect();
        }
        if let Some(ports) = lookup("LOOPSYNC_STATIC_PORTS") {
            config.static_ports = split_list(&ports)
                .map(|p| parse_var("LOOPSYNC_STATIC_PORTS", p))
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = lookup("LOOPSYNC_PORT_WINDOW") {
            config.port_window = parse_var("LOOPSYNC_PORT_WINDOW", &v)?;
        }
        if let Some(v) = lookup("LOOPSYNC_PROBE_DEPTH") {
            config.probe_depth = parse_var("LOOPSYNC_PROBE_DEPTH", &v)?;
        }
        if let Some(v) = lookup("LOOPSYNC_BIND_ATTEMPTS") {
            config.bind_attempts = parse_var("LOOPSYNC_BIND_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("LOOPSYNC_DISCOVERY_INTERVAL_MS") {
            let ms: u64 = parse_var("LOOPSYNC_DISCOVERY_INTERVAL_MS", &v)?;
            config.discovery_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(v) = lookup("LOOPSYNC_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval =
                Duration::from_millis(parse_var("LOOPSYNC_HEARTBEAT_INTERVAL_MS", &v)?);
        }
        if let Some(v) = lookup("LOOPSYNC_MISSED_HEARTBEATS") {
            config.missed_heartbeats = parse_var("LOOPSYNC_MISSED_HEARTBEATS", &v)?;
        }
        if let Some(v) = lookup("LOOPSYNC_DEBOUNCE_MS") {
            config.debounce = Duration::from_millis(parse_var("LOOPSYNC_DEBOUNCE_MS", &v)?);
        }
        if let Some(v) = lookup("LOOPSYNC_MAX_BATCH") {
            config.max_batch_objects = parse_var("LOOPSYNC_MAX_BATCH", &v)?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Exponential backoff for re-dialing unreachable ports.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound of any delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before retrying after `failures` consecutive failures.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Settings that only the standalone binary reads.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Domains to run a manager for
    pub domains: Vec<Domain>,
    /// Address of the status endpoint, if it should be served
    pub status_addr: Option<SocketAddr>,
    /// Directory holding `<domain>.json` store snapshots
    pub state_dir: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let domains = match lookup("LOOPSYNC_DOMAINS") {
            Some(list) if list.trim().eq_ignore_ascii_case("all") => Domain::all().collect(),
            Some(list) => {
                let mut domains: Vec<Domain> = split_list(&list)
                    .map(|d| parse_var("LOOPSYNC_DOMAINS", d))
                    .collect::<Result<_, _>>()?;
                domains.sort();
                domains.dedup();
                domains
            }
            None => Domain::all().collect(),
        };

        let status_addr = lookup("LOOPSYNC_STATUS_ADDR")
            .filter(|v| !v.trim().is_empty())
            .map(|v| parse_var("LOOPSYNC_STATUS_ADDR", &v))
            .transpose()?;

        let state_dir = lookup("LOOPSYNC_STATE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            domains,
            status_addr,
            state_dir,
        })
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(var, value))
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("LOOPSYNC_APP_ID environment variable is required")]
    MissingAppId,

    #[error("host {0} is not a loopback address")]
    NonLoopbackHost(String),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str) -> Self {
        ConfigError::Invalid {
            var,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = NodeConfig::new("com.shareconnect", "ShareConnect", "1.0.0");
        assert_eq!(config.port_window, 100);
        assert_eq!(config.bind_attempts, 3);
        assert_eq!(config.discovery_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.missed_heartbeats, 3);
        assert_eq!(config.debounce, Duration::from_millis(200));
        assert_eq!(config.liveness_timeout(), Duration::from_secs(90));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_overrides() {
        let config = NodeConfig::new("a", "A", "1")
            .with_known_apps(["b", "c"])
            .with_static_ports([9000, 9001])
            .with_discovery_interval(None)
            .with_heartbeat(Duration::from_millis(50), 2)
            .with_max_batch_objects(10);
        assert_eq!(config.known_apps, vec!["b", "c"]);
        assert_eq!(config.static_ports, vec![9000, 9001]);
        assert!(config.discovery_interval.is_none());
        assert_eq!(config.liveness_timeout(), Duration::from_millis(100));
        assert_eq!(config.max_batch_objects, 10);
    }

    #[test]
    fn rejects_non_loopback_host() {
        let config = NodeConfig::new("a", "A", "1").with_host("192.168.1.10".parse().unwrap());
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonLoopbackHost("192.168.1.10".into()))
        );
    }

    #[test]
    fn from_lookup_requires_app_id() {
        assert_eq!(
            NodeConfig::from_lookup(lookup(&[])).unwrap_err(),
            ConfigError::MissingAppId
        );
        assert_eq!(
            NodeConfig::from_lookup(lookup(&[("LOOPSYNC_APP_ID", "  ")])).unwrap_err(),
            ConfigError::MissingAppId
        );
    }

    #[test]
    fn from_lookup_reads_everything() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("LOOPSYNC_APP_ID", "com.shareconnect.qbitconnect"),
            ("LOOPSYNC_APP_NAME", "qBitConnect"),
            ("LOOPSYNC_KNOWN_APPS", "com.shareconnect, com.shareconnect.transmissionconnect,"),
            ("LOOPSYNC_STATIC_PORTS", "8891,8892"),
            ("LOOPSYNC_DISCOVERY_INTERVAL_MS", "0"),
            ("LOOPSYNC_HEARTBEAT_INTERVAL_MS", "1000"),
            ("LOOPSYNC_MISSED_HEARTBEATS", "5"),
            ("LOOPSYNC_DEBOUNCE_MS", "20"),
            ("LOOPSYNC_MAX_BATCH", "64"),
        ]))
        .unwrap();

        assert_eq!(config.app_name, "qBitConnect");
        assert_eq!(config.app_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            config.known_apps,
            vec!["com.shareconnect", "com.shareconnect.transmissionconnect"]
        );
        assert_eq!(config.static_ports, vec![8891, 8892]);
        assert!(config.discovery_interval.is_none());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.missed_heartbeats, 5);
        assert_eq!(config.debounce, Duration::from_millis(20));
        assert_eq!(config.max_batch_objects, 64);
    }

    #[test]
    fn from_lookup_rejects_bad_values() {
        let err = NodeConfig::from_lookup(lookup(&[
            ("LOOPSYNC_APP_ID", "a"),
            ("LOOPSYNC_STATIC_PORTS", "8891,notaport"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "LOOPSYNC_STATIC_PORTS",
                value: "notaport".into()
            }
        );

        let err = NodeConfig::from_lookup(lookup(&[
            ("LOOPSYNC_APP_ID", "a"),
            ("LOOPSYNC_HOST", "10.0.0.1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::NonLoopbackHost(_)));
    }

    #[test]
    fn retry_backoff() {
        let retry = RetryConfig::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn daemon_config() {
        let config = DaemonConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.domains.len(), 8);
        assert!(config.status_addr.is_none());

        let config = DaemonConfig::from_lookup(lookup(&[
            ("LOOPSYNC_DOMAINS", "theme, language, theme"),
            ("LOOPSYNC_STATUS_ADDR", "127.0.0.1:7070"),
            ("LOOPSYNC_STATE_DIR", "/tmp/loopsync"),
        ]))
        .unwrap();
        assert_eq!(config.domains, vec![Domain::Theme, Domain::Language]);
        assert_eq!(config.status_addr, Some("127.0.0.1:7070".parse().unwrap()));
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/loopsync")));

        assert!(DaemonConfig::from_lookup(lookup(&[("LOOPSYNC_DOMAINS", "weather")])).is_err());
    }
}
