//! Shared configuration for pool controller tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `poolsync_core::DeviceConfig`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use poolsync_core::{DeviceConfig, DeviceCredentials, TlsVerification};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults applied where a profile is silent.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named device profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: f64,

    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub permit_manual_dosing: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
            rate_limit_per_sec: default_rate_limit(),
            rate_burst: default_rate_burst(),
            insecure: false,
            permit_manual_dosing: false,
        }
    }
}

fn default_timeout() -> u64 {
    10
}
fn default_poll_interval() -> u64 {
    30
}
fn default_rate_limit() -> f64 {
    2.0
}
fn default_rate_burst() -> u32 {
    5
}

/// A named device profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Device base URL (e.g., "http://192.168.4.20").
    pub device: String,

    /// Username for HTTP Basic auth.
    pub username: Option<String>,

    /// Password (plaintext -- prefer keyring or env).
    pub password: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override request timeout, in seconds.
    pub timeout: Option<u64>,

    /// Override poll cadence, in seconds.
    pub poll_interval: Option<u64>,

    /// Override request budget.
    pub rate_limit_per_sec: Option<f64>,

    /// Override burst ceiling.
    pub rate_burst: Option<u32>,

    /// Override the manual-dosing permit.
    pub permit_manual_dosing: Option<bool>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "poolsync", "poolsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("poolsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("POOLSYNC_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Profile selection ───────────────────────────────────────────────

/// Pick a profile: explicit name, else the configured default, else
/// the profile literally named "default".
pub fn select_profile<'c>(
    config: &'c Config,
    name: Option<&str>,
) -> Result<(&'c str, &'c Profile), ConfigError> {
    let name = name
        .or(config.default_profile.as_deref())
        .unwrap_or("default");

    config
        .profiles
        .get_key_value(name)
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| ConfigError::Validation {
            field: "profile".into(),
            reason: format!("no profile named '{name}'"),
        })
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve Basic-auth credentials for a profile.
///
/// Username comes from the profile or `POOLSYNC_USERNAME`; no username
/// anywhere means the device is open and `None` is returned. The
/// password is then taken from the first source that has one:
/// `POOLSYNC_PASSWORD`, the OS keyring, the plaintext profile field.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<(String, SecretString)>, ConfigError> {
    let Some(username) = profile
        .username
        .clone()
        .or_else(|| std::env::var("POOLSYNC_USERNAME").ok())
    else {
        return Ok(None);
    };

    // 1. Env var
    if let Ok(pw) = std::env::var("POOLSYNC_PASSWORD") {
        return Ok(Some((username, SecretString::from(pw))));
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new("poolsync", &format!("{profile_name}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Ok(Some((username, SecretString::from(pw))));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(Some((username, SecretString::from(pw.clone()))));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Translation to a runtime DeviceConfig ───────────────────────────

/// Build a `DeviceConfig` from a profile, filling gaps from `defaults`.
pub fn profile_to_device_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<DeviceConfig, ConfigError> {
    let url: url::Url = profile.device.parse().map_err(|_| ConfigError::Validation {
        field: "device".into(),
        reason: format!("invalid URL: {}", profile.device),
    })?;

    let credentials = resolve_credentials(profile, profile_name)?
        .map(|(username, password)| DeviceCredentials { username, password });

    // Most devices sit on plain HTTP; TLS shows up behind reverse
    // proxies with real certificates, so strict verification is the
    // sensible default.
    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut device = DeviceConfig::new(url);
    device.credentials = credentials;
    device.tls = tls;
    device.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    device.poll_interval =
        Duration::from_secs(profile.poll_interval.unwrap_or(defaults.poll_interval));
    device.rate_limit_per_sec = profile
        .rate_limit_per_sec
        .unwrap_or(defaults.rate_limit_per_sec);
    device.rate_burst = profile.rate_burst.unwrap_or(defaults.rate_burst);
    device.permit_manual_dosing = profile
        .permit_manual_dosing
        .unwrap_or(defaults.permit_manual_dosing);
    Ok(device)
}

/// Select a profile and translate it in one step.
pub fn device_config(config: &Config, name: Option<&str>) -> Result<DeviceConfig, ConfigError> {
    let (profile_name, profile) = select_profile(config, name)?;
    profile_to_device_config(profile, profile_name, &config.defaults)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SAMPLE: &str = r#"
        default_profile = "home"

        [defaults]
        timeout = 15
        permit_manual_dosing = true

        [profiles.home]
        device = "http://192.168.4.20"
        username = "admin"
        password = "swordfish"

        [profiles.cabin]
        device = "https://pool.example.net"
        ca_cert = "/etc/poolsync/ca.pem"
        timeout = 5
        permit_manual_dosing = false
    "#;

    fn sample_config() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn profiles_parse_with_defaults_filled() {
        let config = sample_config();
        assert_eq!(config.default_profile.as_deref(), Some("home"));
        assert_eq!(config.defaults.timeout, 15);
        // Unset fields keep their serde defaults.
        assert_eq!(config.defaults.poll_interval, 30);
        assert_eq!(config.profiles.len(), 2);
        assert!(config.profiles["home"].ca_cert.is_none());
    }

    #[test]
    fn select_profile_falls_back_to_the_default() {
        let config = sample_config();

        let (name, _) = select_profile(&config, None).unwrap();
        assert_eq!(name, "home");

        let (name, profile) = select_profile(&config, Some("cabin")).unwrap();
        assert_eq!(name, "cabin");
        assert_eq!(profile.device, "https://pool.example.net");

        assert!(matches!(
            select_profile(&config, Some("garage")),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn translation_merges_profile_over_defaults() {
        let config = sample_config();
        let device = device_config(&config, Some("cabin")).unwrap();

        assert_eq!(device.url.as_str(), "https://pool.example.net/");
        // Profile override beats the [defaults] section.
        assert_eq!(device.timeout, Duration::from_secs(5));
        // Silent fields fall through to [defaults], then serde defaults.
        assert_eq!(device.poll_interval, Duration::from_secs(30));
        assert!(!device.permit_manual_dosing);
        assert_eq!(
            device.tls,
            TlsVerification::CustomCa(PathBuf::from("/etc/poolsync/ca.pem"))
        );
    }

    #[test]
    fn insecure_wins_over_a_custom_ca() {
        let mut config = sample_config();
        if let Some(profile) = config.profiles.get_mut("cabin") {
            profile.insecure = Some(true);
        }

        let device = device_config(&config, Some("cabin")).unwrap();
        assert_eq!(device.tls, TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = sample_config();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.profiles.len(), config.profiles.len());
        assert_eq!(reparsed.defaults.timeout, 15);
    }

    #[test]
    fn bad_device_url_is_refused() {
        let profile = Profile {
            device: "not a url".into(),
            ..Profile::default()
        };
        let err = profile_to_device_config(&profile, "test", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }
}
