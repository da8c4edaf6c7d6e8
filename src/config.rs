use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::engine::ReservationPolicy;

/// Server settings, read once from `RESERVD_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction that trigger a new one.
    pub compact_threshold: u64,
    pub policy: ReservationPolicy,
    pub overdue_scan_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "reservd".into(),
            max_connections: 256,
            compact_threshold: 1000,
            policy: ReservationPolicy::default(),
            overdue_scan_interval: Duration::from_secs(60),
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    TlsPair,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::TlsPair => {
                write!(f, "both RESERVD_TLS_CERT and RESERVD_TLS_KEY must be set, or neither")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep their
    /// defaults; set but unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RESERVD_PORT") {
            config.port = parse(v, "RESERVD_PORT")?;
        }
        if let Some(v) = get("RESERVD_BIND") {
            config.bind = v;
        }
        if let Some(v) = get("RESERVD_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RESERVD_PASSWORD") {
            config.password = v;
        }
        if let Some(v) = get("RESERVD_MAX_CONNECTIONS") {
            config.max_connections = parse(v, "RESERVD_MAX_CONNECTIONS")?;
        }
        if let Some(v) = get("RESERVD_COMPACT_THRESHOLD") {
            config.compact_threshold = parse(v, "RESERVD_COMPACT_THRESHOLD")?;
        }
        if let Some(v) = get("RESERVD_AUTO_CONFIRM") {
            config.policy.auto_confirm = parse_bool(v, "RESERVD_AUTO_CONFIRM")?;
        }
        if let Some(v) = get("RESERVD_OVERDUE_SCAN_SECS") {
            let secs: u64 = parse(v.clone(), "RESERVD_OVERDUE_SCAN_SECS")?;
            if secs == 0 {
                return Err(ConfigError::Invalid { var: "RESERVD_OVERDUE_SCAN_SECS", value: v });
            }
            config.overdue_scan_interval = Duration::from_secs(secs);
        }
        if let Some(v) = get("RESERVD_METRICS_PORT") {
            config.metrics_port = Some(parse(v, "RESERVD_METRICS_PORT")?);
        }

        config.tls_cert = get("RESERVD_TLS_CERT").map(PathBuf::from);
        config.tls_key = get("RESERVD_TLS_KEY").map(PathBuf::from);
        if config.tls_cert.is_some() != config.tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        Ok(config)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservd.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Load the TLS acceptor if a certificate pair is configured.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let (cert_path, key_path) = match (&self.tls_cert, &self.tls_key) {
            (None, None) => return Ok(None),
            (Some(c), Some(k)) => (c, k),
            _ => return Err(io::Error::new(ErrorKind::InvalidInput, ConfigError::TlsPair)),
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn parse<T: std::str::FromStr>(value: String, var: &'static str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

fn parse_bool(value: String, var: &'static str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { var, value }),
    }
}
