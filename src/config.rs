use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{EgretError, Result};
use crate::models::ProxyProtocol;

/// Application configuration loaded from environment variables
///
/// Every recognized option is enumerated here with its default and
/// validated once at startup; nothing reads the environment later.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pool source configuration
    pub source: SourceConfig,
    /// Candidate filtering applied at fetch time
    pub filter: FilterConfig,
    /// Liveness probe configuration
    pub probe: ProbeConfig,
    /// Selection and rotation configuration
    pub rotation: RotationConfig,
    /// Background monitor toggles
    pub monitors: MonitorConfig,
    /// Activation hook configuration
    pub hooks: HooksConfig,
    /// Fire a notification on every successful activation
    pub notifications: bool,
    /// Persistence file locations
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Proxy list API endpoint
    pub api_url: String,
    /// Fetch timeout in seconds
    pub fetch_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Maximum advertised latency in milliseconds
    pub max_latency_ms: u64,
    /// Allowed country codes (empty = no filter)
    pub countries: Vec<String>,
    /// Ordered protocol preference; the first protocol a candidate
    /// advertises is the one recorded
    pub protocol_preference: Vec<ProxyProtocol>,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Liveness check endpoint host
    pub host: String,
    /// Liveness check endpoint port
    pub port: u16,
    /// Request path on the endpoint
    pub path: String,
    /// Per-probe timeout in seconds
    pub timeout: u64,
}

impl ProbeConfig {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Probe attempt budget per selection round
    pub max_attempts: usize,
    /// Activation history cap
    pub max_history: usize,
    /// Start the rotation loop at boot
    pub auto_start: bool,
    /// Rotation interval in seconds
    pub interval_secs: u64,
    /// Rotation window in seconds; 0 means unbounded
    pub duration_secs: u64,
}

impl RotationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// The zero sentinel maps to "no end time" before it reaches the engine
    pub fn duration(&self) -> Option<Duration> {
        if self.duration_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.duration_secs))
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Re-activate automatically when the current proxy stops working
    pub failover_watch: bool,
    /// Accrue per-proxy uptime records
    pub uptime_monitor: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HooksConfig {
    /// Update HTTP_PROXY/HTTPS_PROXY for child processes
    pub egress_env: bool,
    /// Optional curl-style rc file kept pointing at the current proxy
    pub curlrc_path: Option<PathBuf>,
    /// dnscrypt-proxy configuration to harden; hook is absent without it
    pub dnscrypt_config: Option<PathBuf>,
    /// External commands, each invoked with the proxy URL as last argument
    pub kill_switch_cmd: Option<String>,
    pub mac_randomize_cmd: Option<String>,
    pub fingerprint_cmd: Option<String>,
    pub anonymity_cmd: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Snapshot file for restart continuity
    pub state_path: PathBuf,
    /// Favorites file, persisted independently of pool lifetime
    pub favorites_path: PathBuf,
}

const DEFAULT_API_URL: &str =
    "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc";
const DEFAULT_PROBE_URL: &str = "http://icanhazip.com";

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let probe_url = get_env_or("EGRET_PROBE_URL", DEFAULT_PROBE_URL);
        let (probe_host, probe_port, probe_path) = parse_probe_endpoint(&probe_url)?;

        let protocol_preference = get_env_or("EGRET_PROTOCOLS", "http,socks5,socks4,https")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                ProxyProtocol::from_str(s)
                    .ok_or_else(|| EgretError::InvalidConfig(format!("unknown protocol: {}", s)))
            })
            .collect::<Result<Vec<_>>>()?;
        if protocol_preference.is_empty() {
            return Err(EgretError::InvalidConfig(
                "EGRET_PROTOCOLS must name at least one protocol".into(),
            ));
        }

        let config = Config {
            source: SourceConfig {
                api_url: get_env_or("EGRET_API_URL", DEFAULT_API_URL),
                fetch_timeout: parse_env_or("EGRET_FETCH_TIMEOUT", 30)?,
            },
            filter: FilterConfig {
                max_latency_ms: parse_env_or("EGRET_MAX_LATENCY_MS", 2000)?,
                countries: get_env_or("EGRET_COUNTRIES", "")
                    .split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect(),
                protocol_preference,
            },
            probe: ProbeConfig {
                host: probe_host,
                port: probe_port,
                path: probe_path,
                timeout: parse_env_or("EGRET_PROBE_TIMEOUT", 5)?,
            },
            rotation: RotationConfig {
                max_attempts: parse_env_or("EGRET_MAX_ATTEMPTS", 15)?,
                max_history: parse_env_or("EGRET_MAX_HISTORY", 50)?,
                auto_start: parse_env_or("EGRET_AUTO_START", false)?,
                interval_secs: parse_env_or("EGRET_ROTATION_INTERVAL", 300)?,
                duration_secs: parse_env_or("EGRET_ROTATION_DURATION", 0)?,
            },
            monitors: MonitorConfig {
                failover_watch: parse_env_or("EGRET_FAILOVER_WATCH", true)?,
                uptime_monitor: parse_env_or("EGRET_UPTIME_MONITOR", false)?,
            },
            hooks: HooksConfig {
                egress_env: parse_env_or("EGRET_EGRESS_ENV", true)?,
                curlrc_path: get_env_path("EGRET_CURLRC_FILE"),
                dnscrypt_config: get_env_path("EGRET_DNSCRYPT_CONFIG"),
                kill_switch_cmd: get_env_opt("EGRET_KILL_SWITCH_CMD"),
                mac_randomize_cmd: get_env_opt("EGRET_MAC_CMD"),
                fingerprint_cmd: get_env_opt("EGRET_FINGERPRINT_CMD"),
                anonymity_cmd: get_env_opt("EGRET_ANONYMITY_CMD"),
            },
            notifications: parse_env_or("EGRET_NOTIFICATIONS", true)?,
            persistence: PersistenceConfig {
                state_path: PathBuf::from(get_env_or("EGRET_STATE_FILE", "state.json")),
                favorites_path: PathBuf::from(get_env_or("EGRET_FAVORITES_FILE", "favorites.json")),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rotation.max_attempts == 0 {
            return Err(EgretError::InvalidConfig(
                "EGRET_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }
        if self.rotation.max_history == 0 {
            return Err(EgretError::InvalidConfig(
                "EGRET_MAX_HISTORY must be at least 1".into(),
            ));
        }
        if self.rotation.interval_secs == 0 {
            return Err(EgretError::InvalidConfig(
                "EGRET_ROTATION_INTERVAL must be at least 1 second".into(),
            ));
        }
        if self.probe.timeout == 0 {
            return Err(EgretError::InvalidConfig(
                "EGRET_PROBE_TIMEOUT must be at least 1 second".into(),
            ));
        }
        for country in &self.filter.countries {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(EgretError::InvalidConfig(format!(
                    "EGRET_COUNTRIES entries must be two-letter codes, got: {}",
                    country
                )));
            }
        }
        Ok(())
    }
}

fn parse_probe_endpoint(raw: &str) -> Result<(String, u16, String)> {
    let url = Url::parse(raw)
        .map_err(|e| EgretError::InvalidConfig(format!("EGRET_PROBE_URL is not a URL: {}", e)))?;

    if url.scheme() != "http" {
        return Err(EgretError::InvalidConfig(
            "EGRET_PROBE_URL must use plain http (the probe speaks through the candidate)".into(),
        ));
    }

    let host = url
        .host_str()
        .ok_or_else(|| EgretError::InvalidConfig("EGRET_PROBE_URL must include a host".into()))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let path = if url.path().is_empty() {
        "/".to_string()
    } else {
        url.path().to_string()
    };

    Ok((host, port, path))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn get_env_path(key: &str) -> Option<PathBuf> {
    get_env_opt(key).map(PathBuf::from)
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| EgretError::InvalidConfig(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "EGRET_API_URL",
        "EGRET_FETCH_TIMEOUT",
        "EGRET_MAX_LATENCY_MS",
        "EGRET_COUNTRIES",
        "EGRET_PROTOCOLS",
        "EGRET_PROBE_URL",
        "EGRET_PROBE_TIMEOUT",
        "EGRET_MAX_ATTEMPTS",
        "EGRET_MAX_HISTORY",
        "EGRET_AUTO_START",
        "EGRET_ROTATION_INTERVAL",
        "EGRET_ROTATION_DURATION",
        "EGRET_FAILOVER_WATCH",
        "EGRET_UPTIME_MONITOR",
        "EGRET_EGRESS_ENV",
        "EGRET_CURLRC_FILE",
        "EGRET_DNSCRYPT_CONFIG",
        "EGRET_KILL_SWITCH_CMD",
        "EGRET_MAC_CMD",
        "EGRET_FINGERPRINT_CMD",
        "EGRET_ANONYMITY_CMD",
        "EGRET_NOTIFICATIONS",
        "EGRET_STATE_FILE",
        "EGRET_FAVORITES_FILE",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert_eq!(config.filter.max_latency_ms, 2000);
        assert!(config.filter.countries.is_empty());
        assert_eq!(
            config.filter.protocol_preference,
            vec![
                ProxyProtocol::Http,
                ProxyProtocol::Socks5,
                ProxyProtocol::Socks4,
                ProxyProtocol::Https,
            ]
        );

        assert_eq!(config.probe.host, "icanhazip.com");
        assert_eq!(config.probe.port, 80);
        assert_eq!(config.probe.path, "/");
        assert_eq!(config.probe.timeout, 5);

        assert_eq!(config.rotation.max_attempts, 15);
        assert_eq!(config.rotation.max_history, 50);
        assert!(!config.rotation.auto_start);
        assert_eq!(config.rotation.interval(), Duration::from_secs(300));
        assert_eq!(config.rotation.duration(), None);

        assert!(config.monitors.failover_watch);
        assert!(!config.monitors.uptime_monitor);
        assert!(config.notifications);
        assert!(config.hooks.egress_env);
        assert!(config.hooks.kill_switch_cmd.is_none());
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("EGRET_MAX_LATENCY_MS", "800");
        env::set_var("EGRET_COUNTRIES", "us, de");
        env::set_var("EGRET_PROTOCOLS", "socks5,http");
        env::set_var("EGRET_PROBE_URL", "http://checkip.example:8080/plain");
        env::set_var("EGRET_ROTATION_INTERVAL", "60");
        env::set_var("EGRET_ROTATION_DURATION", "3600");
        env::set_var("EGRET_KILL_SWITCH_CMD", "/usr/local/bin/killswitch");

        let config = Config::from_env().unwrap();

        assert_eq!(config.filter.max_latency_ms, 800);
        assert_eq!(config.filter.countries, vec!["US", "DE"]);
        assert_eq!(
            config.filter.protocol_preference,
            vec![ProxyProtocol::Socks5, ProxyProtocol::Http]
        );
        assert_eq!(config.probe.host, "checkip.example");
        assert_eq!(config.probe.port, 8080);
        assert_eq!(config.probe.path, "/plain");
        assert_eq!(
            config.rotation.duration(),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            config.hooks.kill_switch_cmd.as_deref(),
            Some("/usr/local/bin/killswitch")
        );
    }

    #[test]
    fn test_config_rejects_invalid_protocol() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("EGRET_PROTOCOLS", "http,gopher");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, EgretError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_zero_interval() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("EGRET_ROTATION_INTERVAL", "0");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, EgretError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_malformed_country_code() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("EGRET_COUNTRIES", "USA");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, EgretError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_rejects_https_probe_url() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("EGRET_PROBE_URL", "https://icanhazip.com");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, EgretError::InvalidConfig(_)));
    }

    #[test]
    fn test_rotation_duration_sentinel() {
        let rotation = RotationConfig {
            max_attempts: 5,
            max_history: 10,
            auto_start: false,
            interval_secs: 300,
            duration_secs: 0,
        };
        assert_eq!(rotation.duration(), None);
    }
}
