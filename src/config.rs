//! Process configuration, read once at startup from `BOOKD_*` environment
//! variables.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::engine::OverlapMode;

pub const RESERVATION_COMPONENT: &str = "reservation";
pub const CONFIGURATION_COMPONENT: &str = "configuration";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    MalformedStores(String),
    UnknownComponent(String),
    TlsPair,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::MalformedStores(entry) => {
                write!(f, "BOOKD_STORES entry must be component=name: {entry:?}")
            }
            ConfigError::UnknownComponent(c) => write!(f, "no store configured for component {c:?}"),
            ConfigError::TlsPair => {
                write!(f, "both BOOKD_TLS_CERT and BOOKD_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for io::Error {
    fn from(e: ConfigError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, e)
    }
}

/// Which store file backs which component. Names resolve under the data dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
    names: BTreeMap<String, String>,
}

impl Default for StoreNames {
    fn default() -> Self {
        let mut names = BTreeMap::new();
        names.insert(RESERVATION_COMPONENT.to_string(), "reservations.wal".to_string());
        names.insert(CONFIGURATION_COMPONENT.to_string(), "configuration.json".to_string());
        Self { names }
    }
}

impl StoreNames {
    /// Parse `component=name` pairs separated by commas, on top of the defaults.
    pub fn parse(mapping: &str) -> Result<Self, ConfigError> {
        let mut stores = Self::default();
        for entry in mapping.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (component, name) = entry
                .split_once('=')
                .map(|(c, n)| (c.trim(), n.trim()))
                .filter(|(c, n)| !c.is_empty() && !n.is_empty())
                .ok_or_else(|| ConfigError::MalformedStores(entry.to_string()))?;
            stores.names.insert(component.to_string(), name.to_string());
        }
        Ok(stores)
    }

    pub fn resolve(&self, component: &str) -> Result<&str, ConfigError> {
        self.names
            .get(component)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownComponent(component.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsFiles>,
    pub overlap_mode: OverlapMode,
    pub stores: StoreNames,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "bookd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls: None,
            overlap_mode: OverlapMode::Lenient,
            stores: StoreNames::default(),
        }
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<bool, ConfigError> {
    match lookup(var).as_deref().map(str::trim) {
        None | Some("") | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            var,
            value: other.to_string(),
        }),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let tls = match (lookup("BOOKD_TLS_CERT"), lookup("BOOKD_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::TlsPair),
        };
        let overlap_mode = if flag(&lookup, "BOOKD_STRICT_OVERLAP")? {
            OverlapMode::Strict
        } else {
            OverlapMode::Lenient
        };
        let stores = match lookup("BOOKD_STORES") {
            Some(mapping) => StoreNames::parse(&mapping)?,
            None => defaults.stores,
        };

        Ok(Self {
            port: parsed(&lookup, "BOOKD_PORT")?.unwrap_or(defaults.port),
            bind: lookup("BOOKD_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("BOOKD_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: lookup("BOOKD_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "BOOKD_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "BOOKD_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "BOOKD_METRICS_PORT")?,
            tls,
            overlap_mode,
            stores,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// File backing `component`, under the data dir.
    pub fn store_path(&self, component: &str) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir.join(self.stores.resolve(component)?))
    }
}
