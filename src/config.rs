use crate::reconcile::ReconcilePolicy;
use crate::{Result, ScanError};
use directories::ProjectDirs;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static! {
    static ref PORT_RANGE_RE: Regex = Regex::new(r"^\d+-\d+$").expect("port range pattern");
}

/// Section names accepted by `section.key=value` overrides
const SECTIONS: [&str; 5] = ["ports", "fuzz", "acao", "retry", "storage"];

/// Keys whose override value is a comma-separated list of strings
const STRING_LIST_KEYS: [&str; 4] = [
    "fuzz.wordlist",
    "fuzz.extensions",
    "acao.endpoints",
    "acao.malicious_origins",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ports: PortsConfig,
    pub fuzz: FuzzConfig,
    pub acao: AcaoConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub range: String,
    /// Ports acknowledged automatically whenever a target's state is loaded
    pub expected: Vec<u16>,
    pub timeout: f64, // seconds
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzConfig {
    #[serde(deserialize_with = "string_or_list")]
    pub wordlist: Vec<String>,
    pub extensions: Vec<String>,
    pub timeout: f64, // seconds
    pub delay: f64,   // seconds before every request
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcaoConfig {
    pub endpoints: Vec<String>,
    /// Origin templates, `{domain}` is replaced by the target host
    pub malicious_origins: Vec<String>,
    pub arbitrary_origin: String,
    pub timeout: f64, // seconds
    pub concurrency: usize,
    pub policy: ReconcilePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per probe, including the first one
    pub attempts: u32,
    pub backoff: f64, // seconds, doubled after each failed attempt
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            range: "1-65535".to_string(),
            expected: vec![80, 443],
            timeout: 1.0,
            concurrency: 100,
        }
    }
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            wordlist: Vec::new(),
            extensions: Vec::new(),
            timeout: 5.0,
            delay: 0.0,
            concurrency: 50,
        }
    }
}

impl Default for AcaoConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["/".to_string()],
            malicious_origins: vec!["http://malicious-{domain}".to_string()],
            arbitrary_origin: "http://evil.com".to_string(),
            timeout: 5.0,
            concurrency: 50,
            policy: ReconcilePolicy::Resolve,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: 0.1,
        }
    }
}

/// Accepts `wordlist = "a.txt"`, `wordlist = "a.txt,b.txt"` or `wordlist = ["a.txt", "b.txt"]`.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let items = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => split_list(&value),
        OneOrMany::Many(values) => values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect(),
    };
    Ok(items)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", env!("CARGO_PKG_NAME"))
}

/// Location of the user configuration file, if the platform has one
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Directory holding one JSON document per scanned target
pub fn default_state_dir() -> PathBuf {
    match project_dirs() {
        Some(dirs) => dirs.data_dir().join("targets"),
        None => PathBuf::from(".mch").join("targets"),
    }
}

/// A parsed `section.key=value` override
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    Text(String),
    Integer(i64),
    Float(f64),
    TextList(Vec<String>),
    IntegerList(Vec<i64>),
}

impl From<OverrideValue> for config::Value {
    fn from(value: OverrideValue) -> Self {
        match value {
            OverrideValue::Text(v) => v.into(),
            OverrideValue::Integer(v) => v.into(),
            OverrideValue::Float(v) => v.into(),
            OverrideValue::TextList(v) => v.into(),
            OverrideValue::IntegerList(v) => v.into(),
        }
    }
}

/// Parse a command line override such as `ports.range=1-1024` or `fuzz.extensions=.bak,.old`.
pub fn parse_override(raw: &str) -> Result<(String, OverrideValue)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ScanError::InvalidInput(format!("Invalid override {}: expected section.key=value", raw)))?;
    let key = key.trim();
    let value = value.trim();

    let (section, field) = key
        .split_once('.')
        .ok_or_else(|| ScanError::InvalidInput(format!("Invalid override {}: missing section", raw)))?;
    if !SECTIONS.contains(&section) || field.is_empty() {
        return Err(ScanError::InvalidInput(format!("Invalid override {}: unknown key {}", raw, key)));
    }

    let invalid = |what: &str| ScanError::InvalidInput(format!("Invalid override {}: {}", raw, what));

    let parsed = match key {
        "ports.range" => {
            if !PORT_RANGE_RE.is_match(value) {
                return Err(ScanError::InvalidPortRange(value.to_string()));
            }
            OverrideValue::Text(value.to_string())
        }
        "ports.expected" => {
            let ports = split_list(value)
                .iter()
                .map(|p| p.parse::<u16>().map(i64::from))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| invalid("expected a comma-separated list of ports"))?;
            OverrideValue::IntegerList(ports)
        }
        k if STRING_LIST_KEYS.contains(&k) => OverrideValue::TextList(split_list(value)),
        _ if field == "timeout" || field == "delay" || field == "backoff" => {
            let secs: f64 = value.parse().map_err(|_| invalid("expected a number of seconds"))?;
            OverrideValue::Float(secs)
        }
        _ if field == "concurrency" || field == "attempts" => {
            let n: i64 = value.parse().map_err(|_| invalid("expected an integer"))?;
            OverrideValue::Integer(n)
        }
        _ => OverrideValue::Text(value.to_string()),
    };

    Ok((key.to_string(), parsed))
}

impl Config {
    /// Build the effective configuration.
    ///
    /// Layers, lowest precedence first: built-in defaults, the TOML file
    /// (`path`, or the platform config file when it exists), `MCH_*`
    /// environment variables, then `section.key=value` overrides.
    pub fn load(path: Option<&Path>, overrides: &[String]) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                debug!("Loading configuration from {}", path.display());
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = default_config_path() {
                    debug!("Looking for configuration in {}", default_path.display());
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MCH")
                .prefix_separator("_")
                .separator("__"),
        );

        for raw in overrides {
            let (key, value) = parse_override(raw)?;
            debug!("Applying override {} = {:?}", key, value);
            builder = builder.set_override(key, value)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;

        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml_string)?;
        info!("Wrote configuration to {}", path);
        Ok(())
    }

    /// Reject values that would make a scanner misbehave rather than fail.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("ports.timeout", self.ports.timeout),
            ("fuzz.timeout", self.fuzz.timeout),
            ("acao.timeout", self.acao.timeout),
        ];
        for (key, value) in timeouts {
            if !value.is_finite() || value <= 0.0 {
                return Err(ScanError::InvalidInput(format!("{} must be positive, got {}", key, value)));
            }
        }
        if !self.fuzz.delay.is_finite() || self.fuzz.delay < 0.0 {
            return Err(ScanError::InvalidInput(format!("fuzz.delay must not be negative, got {}", self.fuzz.delay)));
        }
        if !self.retry.backoff.is_finite() || self.retry.backoff < 0.0 {
            return Err(ScanError::InvalidInput(format!("retry.backoff must not be negative, got {}", self.retry.backoff)));
        }
        if self.retry.attempts == 0 {
            return Err(ScanError::InvalidInput("retry.attempts must be at least 1".to_string()));
        }
        let limits = [
            ("ports.concurrency", self.ports.concurrency),
            ("fuzz.concurrency", self.fuzz.concurrency),
            ("acao.concurrency", self.acao.concurrency),
        ];
        for (key, value) in limits {
            if value == 0 {
                return Err(ScanError::InvalidInput(format!("{} must be at least 1", key)));
            }
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.storage.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ports.timeout)
    }

    pub fn fuzz_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fuzz.timeout)
    }

    pub fn fuzz_delay(&self) -> Duration {
        Duration::from_secs_f64(self.fuzz.delay)
    }

    pub fn acao_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.acao.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.ports.range, "1-65535");
        assert_eq!(config.ports.expected, vec![80, 443]);
        assert_eq!(config.port_timeout(), Duration::from_secs(1));
        assert_eq!(config.acao.endpoints, vec!["/"]);
        assert_eq!(config.acao.malicious_origins, vec!["http://malicious-{domain}"]);
        assert_eq!(config.fuzz.concurrency, 50);
        assert_eq!(config.retry.attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_override_types() {
        assert_eq!(
            parse_override("ports.range=1-1024").unwrap(),
            ("ports.range".to_string(), OverrideValue::Text("1-1024".to_string()))
        );
        assert_eq!(
            parse_override("ports.expected=22, 80,443").unwrap().1,
            OverrideValue::IntegerList(vec![22, 80, 443])
        );
        assert_eq!(
            parse_override("fuzz.extensions=.bak,.old").unwrap().1,
            OverrideValue::TextList(vec![".bak".to_string(), ".old".to_string()])
        );
        assert_eq!(parse_override("fuzz.delay=0.5").unwrap().1, OverrideValue::Float(0.5));
        assert_eq!(parse_override("acao.concurrency=8").unwrap().1, OverrideValue::Integer(8));
    }

    #[test]
    fn test_parse_override_rejects_garbage() {
        assert!(matches!(
            parse_override("ports.range=80"),
            Err(ScanError::InvalidPortRange(_))
        ));
        assert!(parse_override("ports.range").is_err());
        assert!(parse_override("range=1-10").is_err());
        assert!(parse_override("bogus.key=1").is_err());
        assert!(parse_override("fuzz.timeout=soon").is_err());
        assert!(parse_override("ports.expected=80,http").is_err());
    }

    #[test]
    fn test_overrides_take_precedence_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[ports]\nrange = \"1-100\"\ntimeout = 2.5\n").unwrap();

        let config = Config::load(Some(path.as_path()), &["ports.range=20-30".to_string()]).unwrap();
        assert_eq!(config.ports.range, "20-30");
        assert_eq!(config.ports.timeout, 2.5);
        assert_eq!(config.ports.expected, vec![80, 443]);
    }

    #[test]
    fn test_wordlist_accepts_comma_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[fuzz]\nwordlist = \"a.txt, b.txt\"\n").unwrap();

        let config = Config::load(Some(path.as_path()), &[]).unwrap();
        assert_eq!(config.fuzz.wordlist, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.fuzz.concurrency = 0;
        assert!(config.validate().is_err());
    }
}
